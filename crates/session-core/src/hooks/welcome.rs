//! Welcome message sent to the linked account.

use super::SessionHook;
use crate::connection::Connection;
use crate::error::SessionResult;
use async_trait::async_trait;
use tracing::info;

/// Default welcome text. `{number}` is replaced with the linked number.
pub const DEFAULT_WELCOME: &str = "Connected\n\nYour session is now active on {number}";

/// Sends a one-time text message over the connection when it opens.
pub struct WelcomeMessage {
    text: String,
}

impl WelcomeMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    fn render(&self, number: &str) -> String {
        self.text.replace("{number}", number)
    }
}

impl Default for WelcomeMessage {
    fn default() -> Self {
        Self::new(DEFAULT_WELCOME)
    }
}

#[async_trait]
impl SessionHook for WelcomeMessage {
    fn name(&self) -> &str {
        "welcome"
    }

    async fn on_open(&self, number: &str, connection: &dyn Connection) -> SessionResult<()> {
        connection.send_message(&self.render(number)).await?;
        info!(number = %number, "Sent welcome message");
        Ok(())
    }
}
