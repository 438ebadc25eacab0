//! Pairing proxy - HTTP front end of the session lifecycle core.
//!
//! This service:
//! - Issues one-time pairing codes for phone numbers
//! - Keeps exactly one live protocol session per number
//! - Persists session credentials so restarts resume without re-pairing

pub mod api;
pub mod config;
pub mod error;

pub use config::Config;
pub use error::ApiError;
