//! Actions run when a session opens or closes.

mod known;
mod welcome;

pub use known::KnownNumbers;
pub use welcome::{WelcomeMessage, DEFAULT_WELCOME};

use crate::connection::Connection;
use crate::error::SessionResult;
use crate::types::DisconnectReason;
use async_trait::async_trait;

/// Session hook trait.
#[async_trait]
pub trait SessionHook: Send + Sync {
    /// Hook name for logging (e.g., "welcome").
    fn name(&self) -> &str;

    /// Run once after the session authenticated.
    async fn on_open(&self, number: &str, connection: &dyn Connection) -> SessionResult<()>;

    /// Run once after the connection closed.
    async fn on_close(&self, _number: &str, _reason: &DisconnectReason) -> SessionResult<()> {
        Ok(())
    }
}
