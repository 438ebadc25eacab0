//! Connection capability backed by the bridge.

use crate::client::BridgeClient;
use crate::receiver::EventReceiver;
use async_trait::async_trait;
use futures::StreamExt;
use session_core::{Connection, ConnectionError, Connector, Credentials, Link};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// One bridge session.
pub struct BridgeConnection {
    client: BridgeClient,
    number: String,
    registered: bool,
}

#[async_trait]
impl Connection for BridgeConnection {
    fn number(&self) -> &str {
        &self.number
    }

    fn is_registered(&self) -> bool {
        self.registered
    }

    async fn request_pairing_code(&self) -> Result<String, ConnectionError> {
        Ok(self.client.request_pairing_code(&self.number).await?)
    }

    async fn send_message(&self, text: &str) -> Result<(), ConnectionError> {
        Ok(self.client.send_text(&self.number, text).await?)
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        Ok(self.client.close_session(&self.number).await?)
    }
}

/// Opens bridge sessions and polls their events.
#[derive(Clone)]
pub struct BridgeConnector {
    client: BridgeClient,
    poll_interval: Duration,
}

impl BridgeConnector {
    pub fn new(client: BridgeClient, poll_interval: Duration) -> Self {
        Self {
            client,
            poll_interval,
        }
    }
}

#[async_trait]
impl Connector for BridgeConnector {
    async fn connect(
        &self,
        number: &str,
        credentials: Option<Credentials>,
    ) -> Result<Link, ConnectionError> {
        let opened = self.client.open_session(number, credentials).await?;
        info!(number = %number, registered = opened.registered, "Bridge session opened");

        let handle = Arc::new(BridgeConnection {
            client: self.client.clone(),
            number: number.to_string(),
            registered: opened.registered,
        });
        let events = EventReceiver::new(self.client.clone(), number, self.poll_interval)
            .stream()
            .boxed();

        Ok(Link { handle, events })
    }

    async fn health_check(&self) -> bool {
        self.client.health_check().await
    }
}
