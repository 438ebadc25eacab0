//! Event receiver with polling.

use crate::client::BridgeClient;
use session_core::{ConnectionEvent, DisconnectReason};
use std::time::Duration;
use tokio::time::sleep;
use tokio_stream::Stream;
use tracing::{debug, error, warn};

/// Pause after a failed poll.
const DEFAULT_BACKOFF: Duration = Duration::from_secs(5);

/// Polls the bridge for one session's lifecycle events.
pub struct EventReceiver {
    client: BridgeClient,
    number: String,
    poll_interval: Duration,
    backoff: Duration,
}

impl EventReceiver {
    /// Create a new event receiver.
    pub fn new(client: BridgeClient, number: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            client,
            number: number.into(),
            poll_interval,
            backoff: DEFAULT_BACKOFF,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Start receiving events as an async stream. The stream ends after a close event.
    pub fn stream(self) -> impl Stream<Item = ConnectionEvent> {
        async_stream::stream! {
            loop {
                match self.client.poll_events(&self.number).await {
                    Ok(events) => {
                        for event in events {
                            let closing = event.is_close();
                            match event.into_connection_event() {
                                Some(event) => yield event,
                                None => debug!(number = %self.number, "Skipping unknown bridge event"),
                            }
                            if closing {
                                return;
                            }
                        }
                    }
                    Err(crate::BridgeError::SessionNotFound(_)) => {
                        warn!(number = %self.number, "Bridge session disappeared");
                        yield ConnectionEvent::Closed(DisconnectReason::Unknown);
                        return;
                    }
                    Err(e) => {
                        error!(number = %self.number, "Event poll error: {}", e);
                        // Back off on error
                        sleep(self.backoff).await;
                        continue;
                    }
                }

                sleep(self.poll_interval).await;
            }
        }
    }
}
