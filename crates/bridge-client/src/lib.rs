//! Protocol bridge REST API client.
//!
//! The bridge is a sidecar that speaks the messaging protocol; this crate
//! exposes it as a `session_core::Connector`.

mod client;
mod connector;
mod error;
mod receiver;
mod types;

pub use client::BridgeClient;
pub use connector::{BridgeConnection, BridgeConnector};
pub use error::BridgeError;
pub use receiver::EventReceiver;
pub use types::*;
