//! Known-numbers index maintenance.

use super::SessionHook;
use crate::connection::Connection;
use crate::error::SessionResult;
use crate::store::CredentialStore;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Records every number that opens a session in the store's known-numbers index.
pub struct KnownNumbers {
    store: Arc<dyn CredentialStore>,
}

impl KnownNumbers {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SessionHook for KnownNumbers {
    fn name(&self) -> &str {
        "known-numbers"
    }

    async fn on_open(&self, number: &str, _connection: &dyn Connection) -> SessionResult<()> {
        self.store.add_known_number(number).await?;
        debug!(number = %number, "Recorded known number");
        Ok(())
    }
}
