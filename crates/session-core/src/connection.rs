//! Connection capability consumed by the session core.
//!
//! The messaging protocol itself lives behind these traits. A [`Connector`]
//! opens a [`Link`] for a number: a handle for outbound calls plus the
//! ordered stream of lifecycle events emitted by that connection.

use crate::error::ConnectionError;
use crate::types::{Credentials, DisconnectReason};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

/// Lifecycle events emitted by one connection, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Protocol is ready to accept a pairing code request
    Ready,
    /// Credential state changed and should be persisted
    CredentialsUpdated(Credentials),
    /// Session authenticated and running
    Opened {
        /// Protocol user id of the linked account
        user: Option<String>,
    },
    /// Connection closed; no further events follow
    Closed(DisconnectReason),
}

/// Ordered event stream of a single connection.
pub type EventStream = BoxStream<'static, ConnectionEvent>;

/// Handle to one live connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Number this connection belongs to.
    fn number(&self) -> &str;

    /// Whether the connection was constructed with completed credentials.
    fn is_registered(&self) -> bool;

    /// Request a one-time pairing code (raw, unformatted).
    async fn request_pairing_code(&self) -> Result<String, ConnectionError>;

    /// Send a text message to the linked account itself.
    async fn send_message(&self, text: &str) -> Result<(), ConnectionError>;

    /// Close the connection and release its resources.
    async fn close(&self) -> Result<(), ConnectionError>;
}

/// A freshly opened connection.
pub struct Link {
    pub handle: Arc<dyn Connection>,
    pub events: EventStream,
}

/// Opens connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection for `number`, optionally resuming from stored credentials.
    async fn connect(
        &self,
        number: &str,
        credentials: Option<Credentials>,
    ) -> Result<Link, ConnectionError>;

    /// Check if the underlying protocol service is reachable.
    async fn health_check(&self) -> bool {
        true
    }
}
