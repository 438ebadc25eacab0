//! Scripted in-memory connector for tests.
//!
//! Each [`ScriptedConnection`] is driven by the test through
//! [`ScriptedConnection::emit`]; nothing talks to a real protocol.

use crate::connection::{Connection, ConnectionEvent, Connector, Link};
use crate::error::ConnectionError;
use crate::types::Credentials;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Raw code handed out when none is configured.
pub const DEFAULT_CODE: &str = "ABCD1234EF";

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Connector whose connections follow a fixed script.
pub struct ScriptedConnector {
    code: Result<String, ConnectionError>,
    auto_ready: bool,
    connect_error: Option<ConnectionError>,
    healthy: bool,
    links: Mutex<Vec<Arc<ScriptedConnection>>>,
}

impl Default for ScriptedConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedConnector {
    /// Connections become ready immediately and hand out [`DEFAULT_CODE`].
    pub fn new() -> Self {
        Self {
            code: Ok(DEFAULT_CODE.to_string()),
            auto_ready: true,
            connect_error: None,
            healthy: true,
            links: Mutex::new(Vec::new()),
        }
    }

    pub fn with_code(mut self, code: &str) -> Self {
        self.code = Ok(code.to_string());
        self
    }

    /// Connections never emit `Ready` on their own.
    pub fn never_ready(mut self) -> Self {
        self.auto_ready = false;
        self
    }

    /// Pairing code requests fail with this message.
    pub fn failing_code(mut self, message: &str) -> Self {
        self.code = Err(ConnectionError::Rejected(message.to_string()));
        self
    }

    /// `connect` fails with this message.
    pub fn failing_connect(mut self, message: &str) -> Self {
        self.connect_error = Some(ConnectionError::Transport(message.to_string()));
        self
    }

    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    /// Every connection opened so far, oldest first.
    pub fn links(&self) -> Vec<Arc<ScriptedConnection>> {
        locked(&self.links).clone()
    }

    pub fn last_link(&self) -> Option<Arc<ScriptedConnection>> {
        locked(&self.links).last().cloned()
    }

    pub fn link_count(&self) -> usize {
        locked(&self.links).len()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        number: &str,
        credentials: Option<Credentials>,
    ) -> Result<Link, ConnectionError> {
        if let Some(e) = &self.connect_error {
            return Err(e.clone());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let registered = credentials.as_ref().is_some_and(Credentials::is_registered);

        let connection = Arc::new(ScriptedConnection {
            number: number.to_string(),
            registered,
            prefill: credentials,
            code: self.code.clone(),
            closed: AtomicBool::new(false),
            pairing_requests: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            events: tx,
        });

        if registered {
            connection.emit(ConnectionEvent::Opened {
                user: Some(number.to_string()),
            });
        } else if self.auto_ready {
            connection.emit(ConnectionEvent::Ready);
        }

        locked(&self.links).push(connection.clone());

        Ok(Link {
            handle: connection,
            events: UnboundedReceiverStream::new(rx).boxed(),
        })
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }
}

/// One scripted connection.
pub struct ScriptedConnection {
    number: String,
    registered: bool,
    prefill: Option<Credentials>,
    code: Result<String, ConnectionError>,
    closed: AtomicBool,
    pairing_requests: AtomicUsize,
    sent: Mutex<Vec<String>>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

impl ScriptedConnection {
    /// Connection with no event consumer, for driving a registry directly.
    pub fn detached(number: &str) -> Arc<Self> {
        let (tx, _rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            number: number.to_string(),
            registered: false,
            prefill: None,
            code: Ok(DEFAULT_CODE.to_string()),
            closed: AtomicBool::new(false),
            pairing_requests: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            events: tx,
        })
    }

    /// Push an event into this connection's stream.
    pub fn emit(&self, event: ConnectionEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Emit what the protocol emits when the user enters the code:
    /// registered credentials followed by `Opened`.
    pub fn complete_pairing(&self) {
        self.emit(ConnectionEvent::CredentialsUpdated(Credentials::new(
            json!({"registered": true, "me": {"id": self.number}}),
            Some(json!({"pre-keys": {"1": "AAAA"}})),
        )));
        self.emit(ConnectionEvent::Opened {
            user: Some(self.number.clone()),
        });
    }

    /// Credentials the connection was constructed from.
    pub fn prefill(&self) -> Option<Credentials> {
        self.prefill.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn pairing_requests(&self) -> usize {
        self.pairing_requests.load(Ordering::SeqCst)
    }

    /// Messages sent over this connection.
    pub fn sent_messages(&self) -> Vec<String> {
        locked(&self.sent).clone()
    }
}

#[async_trait]
impl Connection for ScriptedConnection {
    fn number(&self) -> &str {
        &self.number
    }

    fn is_registered(&self) -> bool {
        self.registered
    }

    async fn request_pairing_code(&self) -> Result<String, ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        self.pairing_requests.fetch_add(1, Ordering::SeqCst);
        self.code.clone()
    }

    async fn send_message(&self, text: &str) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        locked(&self.sent).push(text.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
