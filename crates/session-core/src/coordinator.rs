//! Pairing handshake for a single number.
//!
//! [`PairingCoordinator::start`] validates the number and hands the attempt to
//! its own task, so a caller that stops waiting does not cancel a handshake
//! that is already talking to the protocol. The result travels back through a
//! single-use [`ResponseSink`].

use crate::connection::{Connection, Connector, Link};
use crate::error::{SessionError, SessionResult};
use crate::hooks::SessionHook;
use crate::number::{format_pairing_code, normalize_number};
use crate::reactor::{LifecycleReactor, LinkState};
use crate::registry::SessionRegistry;
use crate::store::{CredentialStore, LocalCache};
use crate::types::PairingOutcome;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

/// Default bound on waiting for protocol readiness.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Pairing configuration.
#[derive(Debug, Clone)]
pub struct PairingConfig {
    /// How long to wait for readiness, and for the code request itself
    pub ready_timeout: Duration,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }
}

/// Shared collaborators of the coordinator and every reactor.
#[derive(Clone)]
pub struct SessionServices {
    pub registry: Arc<SessionRegistry>,
    pub store: Arc<dyn CredentialStore>,
    pub cache: LocalCache,
    pub hooks: Vec<Arc<dyn SessionHook>>,
}

impl SessionServices {
    pub fn new(store: Arc<dyn CredentialStore>, cache: LocalCache) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            store,
            cache,
            hooks: Vec::new(),
        }
    }

    /// Add a hook run on every session open and close.
    pub fn with_hook(mut self, hook: Arc<dyn SessionHook>) -> Self {
        self.hooks.push(hook);
        self
    }
}

type Delivery = oneshot::Sender<SessionResult<PairingOutcome>>;

/// Single-use reply channel of one pairing request.
///
/// The first delivery wins; later ones are discarded.
#[derive(Clone)]
pub struct ResponseSink {
    inner: Arc<Mutex<Option<Delivery>>>,
}

impl ResponseSink {
    /// Create a sink and the receiver the caller waits on.
    pub fn channel() -> (Self, oneshot::Receiver<SessionResult<PairingOutcome>>) {
        let (tx, rx) = oneshot::channel();
        let sink = Self {
            inner: Arc::new(Mutex::new(Some(tx))),
        };
        (sink, rx)
    }

    /// Deliver a result. Returns `false` if the sink was already fulfilled.
    pub async fn fulfil(&self, result: SessionResult<PairingOutcome>) -> bool {
        let Some(tx) = self.inner.lock().await.take() else {
            debug!("Discarding second pairing response");
            return false;
        };

        if tx.send(result).is_err() {
            debug!("Pairing caller stopped waiting before the response");
        }
        true
    }

    /// Whether no result has been delivered yet.
    pub async fn is_open(&self) -> bool {
        self.inner.lock().await.is_some()
    }
}

/// Drives pairing attempts.
#[derive(Clone)]
pub struct PairingCoordinator {
    services: SessionServices,
    connector: Arc<dyn Connector>,
    config: PairingConfig,
}

impl PairingCoordinator {
    pub fn new(services: SessionServices, connector: Arc<dyn Connector>, config: PairingConfig) -> Self {
        Self {
            services,
            connector,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.services.registry
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.services.store
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    /// Start pairing a number and wait for the outcome.
    pub async fn start(&self, number: &str) -> SessionResult<PairingOutcome> {
        let number = normalize_number(number).map_err(SessionError::InvalidNumber)?;

        let (sink, response) = ResponseSink::channel();
        let coordinator = self.clone();
        tokio::spawn(async move { coordinator.run(number, sink).await });

        response.await.unwrap_or_else(|_| {
            Err(SessionError::PairingFailed(
                "pairing task ended without a result".into(),
            ))
        })
    }

    async fn run(self, number: String, sink: ResponseSink) {
        let result = self.pair(&number, &sink).await;

        if let Err(e) = &result {
            warn!(number = %number, error = %e, "Pairing attempt failed");
        }
        sink.fulfil(result).await;
    }

    #[instrument(skip(self, sink))]
    async fn pair(&self, number: &str, sink: &ResponseSink) -> SessionResult<PairingOutcome> {
        let registry = &self.services.registry;
        let slot = registry.acquire(number).await;

        let base_revision = self.prefill(number).await;

        let credentials = match self.services.cache.read(number).await {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!(error = %e, "Unreadable local credential cache, starting fresh");
                None
            }
        };

        let Link { handle, events } = match self.connector.connect(number, credentials).await {
            Ok(link) => link,
            Err(e) => {
                self.purge_cache(number).await;
                return Err(SessionError::PairingFailed(format!("could not connect: {}", e)));
            }
        };

        let generation = match registry.install_evicting(&slot, handle.clone()).await {
            Ok(generation) => generation,
            Err(e) => {
                close_quietly(handle.as_ref()).await;
                self.purge_cache(number).await;
                return Err(e);
            }
        };

        let (state_tx, mut state) = watch::channel(LinkState::Connecting);
        let reactor = LifecycleReactor::new(
            number,
            generation,
            handle.clone(),
            self.services.clone(),
            state_tx,
            sink.clone(),
            base_revision,
        );
        let task = tokio::spawn(reactor.run(events));
        registry.attach(&slot, generation, task.abort_handle()).await;
        drop(slot);

        if handle.is_registered() {
            info!("Number already registered, resuming session");
            return Ok(PairingOutcome::AlreadyRegistered);
        }

        let waited = timeout(self.config.ready_timeout, async {
            state
                .wait_for(|s| *s != LinkState::Connecting)
                .await
                .map(|s| s.clone())
        })
        .await;

        let link_state = match waited {
            Ok(Ok(link_state)) => link_state,
            Ok(Err(_)) => {
                return Err(SessionError::PairingFailed(
                    "superseded by a newer pairing request".into(),
                ))
            }
            Err(_) => {
                self.abandon(number, generation).await;
                return Err(SessionError::PairingTimeout(self.config.ready_timeout));
            }
        };

        match link_state {
            LinkState::Open => Ok(PairingOutcome::AlreadyRegistered),
            LinkState::Closed(reason) => Err(SessionError::PairingFailed(format!(
                "connection closed before pairing: {}",
                reason
            ))),
            LinkState::Connecting | LinkState::Ready => {
                self.request_code(number, generation, handle.as_ref()).await
            }
        }
    }

    async fn request_code(
        &self,
        number: &str,
        generation: u64,
        handle: &dyn Connection,
    ) -> SessionResult<PairingOutcome> {
        match timeout(self.config.ready_timeout, handle.request_pairing_code()).await {
            Ok(Ok(code)) => {
                info!("Pairing code issued");
                Ok(PairingOutcome::Code(format_pairing_code(&code)))
            }
            Ok(Err(e)) => {
                self.abandon(number, generation).await;
                Err(SessionError::PairingFailed(format!(
                    "pairing code request failed: {}",
                    e
                )))
            }
            Err(_) => {
                self.abandon(number, generation).await;
                Err(SessionError::PairingTimeout(self.config.ready_timeout))
            }
        }
    }

    /// Seed the local cache from the durable record.
    ///
    /// Returns the stored revision, or `None` when the store could not be read.
    async fn prefill(&self, number: &str) -> Option<u64> {
        let record = match self.services.store.load(number).await {
            Ok(Some(record)) => record,
            Ok(None) => return Some(0),
            Err(e) => {
                warn!(error = %e, "Credential store prefill failed");
                return None;
            }
        };

        if let Err(e) = self.services.cache.write(number, &record.to_credentials()).await {
            warn!(error = %e, "Failed to prefill local credential cache");
        } else {
            debug!(revision = record.revision, "Prefilled session from credential store");
        }
        Some(record.revision)
    }

    /// Tear down a failed attempt if it is still the active connection.
    async fn abandon(&self, number: &str, generation: u64) {
        let registry = &self.services.registry;
        let slot = registry.claim(number).await;

        if registry.retire(&slot, generation).await {
            self.purge_cache(number).await;
        }
    }

    async fn purge_cache(&self, number: &str) {
        if let Err(e) = self.services.cache.purge(number).await {
            warn!(number = %number, error = %e, "Failed to purge local credential cache");
        }
    }
}

async fn close_quietly(handle: &dyn Connection) {
    if let Err(e) = handle.close().await {
        debug!(number = %handle.number(), error = %e, "Ignoring close error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::ScriptedConnector;

    fn coordinator(connector: Arc<ScriptedConnector>, dir: &std::path::Path) -> PairingCoordinator {
        let services = SessionServices::new(Arc::new(MemoryStore::new()), LocalCache::new(dir));
        PairingCoordinator::new(
            services,
            connector,
            PairingConfig {
                ready_timeout: Duration::from_millis(200),
            },
        )
    }

    #[tokio::test]
    async fn test_sink_delivers_once() {
        let (sink, rx) = ResponseSink::channel();
        assert!(sink.is_open().await);

        assert!(sink.fulfil(Ok(PairingOutcome::AlreadyRegistered)).await);
        assert!(!sink.fulfil(Ok(PairingOutcome::Code("X".into()))).await);
        assert!(!sink.is_open().await);

        assert_eq!(rx.await.unwrap().unwrap(), PairingOutcome::AlreadyRegistered);
    }

    #[tokio::test]
    async fn test_sink_tolerates_dropped_caller() {
        let (sink, rx) = ResponseSink::channel();
        drop(rx);
        assert!(sink.fulfil(Ok(PairingOutcome::AlreadyRegistered)).await);
    }

    #[tokio::test]
    async fn test_invalid_number_is_rejected_before_connecting() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(ScriptedConnector::new());
        let coordinator = coordinator(connector.clone(), dir.path());

        let result = coordinator.start("call me maybe").await;
        assert!(matches!(result, Err(SessionError::InvalidNumber(_))));
        assert_eq!(connector.link_count(), 0);
    }

    #[tokio::test]
    async fn test_code_is_formatted() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(ScriptedConnector::new().with_code("WXYZ9876"));
        let coordinator = coordinator(connector, dir.path());

        let outcome = coordinator.start("15550100").await.unwrap();
        assert_eq!(outcome, PairingOutcome::Code("WXYZ-9876".into()));
        assert!(coordinator.registry().lookup("15550100").await.is_some());
    }

    #[tokio::test]
    async fn test_connect_failure_is_pairing_failed() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(ScriptedConnector::new().failing_connect("bridge down"));
        let coordinator = coordinator(connector, dir.path());

        let result = coordinator.start("15550100").await;
        assert!(matches!(result, Err(SessionError::PairingFailed(_))));
        assert_eq!(coordinator.registry().count().await, 0);
    }

    #[tokio::test]
    async fn test_code_request_failure_releases_slot() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(ScriptedConnector::new().failing_code("rate-overlimit"));
        let coordinator = coordinator(connector.clone(), dir.path());

        let result = coordinator.start("15550100").await;
        assert!(matches!(result, Err(SessionError::PairingFailed(_))));
        assert!(coordinator.registry().lookup("15550100").await.is_none());
        assert!(connector.last_link().unwrap().is_closed());
    }

    #[tokio::test]
    async fn test_registry_locks_released_after_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(ScriptedConnector::new());
        let coordinator = coordinator(connector.clone(), dir.path());

        for number in ["15550100", "14155551234"] {
            coordinator.start(number).await.unwrap();
        }
        connector
            .last_link()
            .unwrap()
            .emit(crate::connection::ConnectionEvent::Closed(
                crate::types::DisconnectReason::LoggedOut,
            ));
        coordinator.start("15550100").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(coordinator.registry().count().await, 1);
        assert_eq!(coordinator.registry().claimed(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_caller_does_not_cancel_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(ScriptedConnector::new().never_ready());
        let coordinator = coordinator(connector.clone(), dir.path());

        let caller = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.start("15550100").await })
        };
        while connector.link_count() == 0 {
            tokio::task::yield_now().await;
        }
        caller.abort();

        // Attempt is still waiting for readiness
        connector
            .last_link()
            .unwrap()
            .emit(crate::connection::ConnectionEvent::Ready);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(connector.last_link().unwrap().pairing_requests(), 1);
    }
}
