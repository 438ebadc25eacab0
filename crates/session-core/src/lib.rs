//! Session lifecycle core.
//!
//! Keeps at most one live protocol connection per phone number, drives the
//! pairing handshake, persists credentials as the protocol rotates them and
//! reacts to close events.

pub mod connection;
pub mod coordinator;
pub mod error;
pub mod hooks;
pub mod number;
pub mod reactor;
pub mod registry;
pub mod store;
pub mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use connection::{Connection, ConnectionEvent, Connector, EventStream, Link};
pub use coordinator::{PairingConfig, PairingCoordinator, ResponseSink, SessionServices};
pub use error::{ConnectionError, SessionError, SessionResult, StoreError};
pub use hooks::{KnownNumbers, SessionHook, WelcomeMessage};
pub use number::{format_pairing_code, normalize_number};
pub use reactor::LinkState;
pub use registry::{SessionInfo, SessionRegistry, Slot};
pub use store::{open_store, CredentialStore, FileStore, LocalCache, MemoryStore};
pub use types::*;
