//! Registry of active connections, at most one per phone number.
//!
//! All mutation goes through a [`Slot`]: an exclusive, per-number claim.
//! [`SessionRegistry::acquire`] takes the claim and tears down any previous
//! connection before returning, so installing through the slot can never
//! leave two live handles for the same number.

use crate::connection::Connection;
use crate::error::SessionError;
use crate::types::SessionStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as SyncMutex};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

/// One live connection.
struct ActiveConnection {
    handle: Arc<dyn Connection>,
    status: SessionStatus,
    generation: u64,
    /// Reactor task consuming the connection's events
    subscription: Option<AbortHandle>,
    since: DateTime<Utc>,
}

/// Snapshot of an active connection for listing.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub number: String,
    pub status: SessionStatus,
    pub generation: u64,
    pub since: DateTime<Utc>,
}

type LockTable = Arc<SyncMutex<HashMap<String, Arc<Mutex<()>>>>>;

/// Exclusive claim on a number. Dropping it lets the next claimant proceed.
pub struct Slot {
    number: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: LockTable,
}

impl Slot {
    pub fn number(&self) -> &str {
        &self.number
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        drop(self.guard.take());

        // Claimants clone the lock under the table mutex, so a count of one
        // means nobody holds or waits on this number
        let Ok(mut locks) = self.locks.lock() else {
            return;
        };
        if locks.get(&self.number).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&self.number);
        }
    }
}

/// Source of truth mapping number → active connection.
#[derive(Default)]
pub struct SessionRegistry {
    entries: RwLock<HashMap<String, ActiveConnection>>,
    locks: LockTable,
    next_generation: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the exclusive claim on a number without touching its entry.
    pub async fn claim(&self, number: &str) -> Slot {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(number.to_string()).or_default().clone()
        };

        Slot {
            number: number.to_string(),
            guard: Some(lock.lock_owned().await),
            locks: self.locks.clone(),
        }
    }

    /// Claim a number, evicting any existing connection first.
    pub async fn acquire(&self, number: &str) -> Slot {
        let slot = self.claim(number).await;
        self.evict(&slot).await;
        slot
    }

    /// Tear down the current connection for the slot's number, whatever its generation.
    pub async fn evict(&self, slot: &Slot) -> bool {
        self.teardown(slot, None).await
    }

    /// Tear down the slot's connection only if it is still `generation`.
    pub async fn retire(&self, slot: &Slot, generation: u64) -> bool {
        self.teardown(slot, Some(generation)).await
    }

    async fn teardown(&self, slot: &Slot, generation: Option<u64>) -> bool {
        let (handle, evicted) = {
            let mut entries = self.entries.write().await;
            let Some(entry) = entries.get_mut(&slot.number) else {
                return false;
            };
            if generation.is_some_and(|g| g != entry.generation) {
                return false;
            }

            entry.status = SessionStatus::Closing;
            if let Some(subscription) = entry.subscription.take() {
                subscription.abort();
            }
            (entry.handle.clone(), entry.generation)
        };

        info!(number = %slot.number, generation = evicted, "Tearing down connection");

        if let Err(e) = handle.close().await {
            debug!(number = %slot.number, error = %e, "Ignoring close error from torn down connection");
        }

        self.release_generation(&slot.number, evicted).await
    }

    /// Register a new connection through the slot.
    ///
    /// Fails with `AlreadyActive` if an entry is present.
    pub async fn install(&self, slot: &Slot, handle: Arc<dyn Connection>) -> Result<u64, SessionError> {
        let mut entries = self.entries.write().await;

        if entries.contains_key(&slot.number) {
            return Err(SessionError::AlreadyActive(slot.number.clone()));
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        entries.insert(
            slot.number.clone(),
            ActiveConnection {
                handle,
                status: SessionStatus::Pairing,
                generation,
                subscription: None,
                since: Utc::now(),
            },
        );

        debug!(number = %slot.number, generation, "Installed connection");
        Ok(generation)
    }

    /// Install through the slot, evicting a leftover entry once if present.
    pub async fn install_evicting(
        &self,
        slot: &Slot,
        handle: Arc<dyn Connection>,
    ) -> Result<u64, SessionError> {
        match self.install(slot, handle.clone()).await {
            Err(SessionError::AlreadyActive(_)) => {
                warn!(number = %slot.number, "Entry still present under slot, evicting before install");
                self.evict(slot).await;
                self.install(slot, handle).await
            }
            result => result,
        }
    }

    /// Record the event subscription of an installed connection.
    pub async fn attach(&self, slot: &Slot, generation: u64, subscription: AbortHandle) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get_mut(&slot.number) {
            Some(entry) if entry.generation == generation => {
                entry.subscription = Some(subscription);
                true
            }
            _ => false,
        }
    }

    /// Transition a connection from `pairing` to `open`.
    pub async fn mark_open(&self, number: &str, generation: u64) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get_mut(number) {
            Some(entry) if entry.generation == generation && entry.status == SessionStatus::Pairing => {
                entry.status = SessionStatus::Open;
                entry.since = Utc::now();
                true
            }
            _ => false,
        }
    }

    /// Remove the entry for a number. Releasing an absent number is a no-op.
    pub async fn release(&self, number: &str) -> bool {
        self.entries.write().await.remove(number).is_some()
    }

    /// Remove the entry only if it is still `generation`.
    pub async fn release_generation(&self, number: &str, generation: u64) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get(number) {
            Some(entry) if entry.generation == generation => {
                entries.remove(number);
                true
            }
            _ => false,
        }
    }

    /// Number of per-number locks currently held or awaited.
    pub fn claimed(&self) -> usize {
        self.locks.lock().map_or(0, |locks| locks.len())
    }

    /// Handle of the active connection for a number.
    pub async fn lookup(&self, number: &str) -> Option<Arc<dyn Connection>> {
        self.entries
            .read()
            .await
            .get(number)
            .map(|entry| entry.handle.clone())
    }

    /// Whether `generation` is the active connection for a number.
    pub async fn is_current(&self, number: &str, generation: u64) -> bool {
        self.entries
            .read()
            .await
            .get(number)
            .is_some_and(|entry| entry.generation == generation)
    }

    /// Status snapshot for a number.
    pub async fn status(&self, number: &str) -> Option<SessionInfo> {
        self.entries
            .read()
            .await
            .get(number)
            .map(|entry| info_for(number, entry))
    }

    /// Snapshot of every active connection, ordered by number.
    pub async fn list(&self) -> Vec<SessionInfo> {
        let entries = self.entries.read().await;
        let mut sessions: Vec<SessionInfo> = entries
            .iter()
            .map(|(number, entry)| info_for(number, entry))
            .collect();
        sessions.sort_by(|a, b| a.number.cmp(&b.number));
        sessions
    }

    /// Number of active connections.
    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Tear down every active connection.
    pub async fn shutdown(&self) {
        let numbers: Vec<String> = self.entries.read().await.keys().cloned().collect();

        for number in numbers {
            let slot = self.claim(&number).await;
            self.evict(&slot).await;
        }

        info!("Session registry shut down");
    }
}

fn info_for(number: &str, entry: &ActiveConnection) -> SessionInfo {
    SessionInfo {
        number: number.to_string(),
        status: entry.status,
        generation: entry.generation,
        since: entry.since,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectionError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;

    /// Connection stub tracking how many stubs are live at once.
    struct StubConnection {
        number: String,
        closed: AtomicBool,
        live: Arc<AtomicUsize>,
    }

    impl StubConnection {
        fn new(number: &str, live: Arc<AtomicUsize>, max_live: &AtomicUsize) -> Arc<Self> {
            let now = live.fetch_add(1, Ordering::SeqCst) + 1;
            max_live.fetch_max(now, Ordering::SeqCst);
            Arc::new(Self {
                number: number.into(),
                closed: AtomicBool::new(false),
                live,
            })
        }

        fn simple(number: &str) -> Arc<Self> {
            Self::new(number, Arc::new(AtomicUsize::new(0)), &AtomicUsize::new(0))
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connection for StubConnection {
        fn number(&self) -> &str {
            &self.number
        }

        fn is_registered(&self) -> bool {
            false
        }

        async fn request_pairing_code(&self) -> Result<String, ConnectionError> {
            Ok("ABCD1234".into())
        }

        async fn send_message(&self, _text: &str) -> Result<(), ConnectionError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), ConnectionError> {
            if !self.closed.swap(true, Ordering::SeqCst) {
                self.live.fetch_sub(1, Ordering::SeqCst);
            }
            // Evicted handles may already be dead
            Err(ConnectionError::Closed)
        }
    }

    #[tokio::test]
    async fn test_install_and_lookup() {
        let registry = SessionRegistry::new();
        let slot = registry.acquire("15550100").await;
        let generation = registry
            .install(&slot, StubConnection::simple("15550100"))
            .await
            .unwrap();

        let handle = registry.lookup("15550100").await.unwrap();
        assert_eq!(handle.number(), "15550100");

        let info = registry.status("15550100").await.unwrap();
        assert_eq!(info.status, SessionStatus::Pairing);
        assert_eq!(info.generation, generation);
        assert!(registry.lookup("14155551234").await.is_none());
    }

    #[tokio::test]
    async fn test_acquire_evicts_previous_connection() {
        let registry = SessionRegistry::new();
        let first = StubConnection::simple("15550100");

        let slot = registry.acquire("15550100").await;
        registry.install(&slot, first.clone()).await.unwrap();
        drop(slot);

        let slot = registry.acquire("15550100").await;
        assert!(first.is_closed());
        assert!(registry.lookup("15550100").await.is_none());

        let second = StubConnection::simple("15550100");
        registry.install(&slot, second.clone()).await.unwrap();
        assert!(!second.is_closed());
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_install_over_existing_entry_fails() {
        let registry = SessionRegistry::new();
        let slot = registry.acquire("15550100").await;
        registry
            .install(&slot, StubConnection::simple("15550100"))
            .await
            .unwrap();

        let result = registry
            .install(&slot, StubConnection::simple("15550100"))
            .await;
        assert!(matches!(result, Err(SessionError::AlreadyActive(n)) if n == "15550100"));
    }

    #[tokio::test]
    async fn test_install_evicting_replaces_leftover_entry() {
        let registry = SessionRegistry::new();
        let slot = registry.acquire("15550100").await;
        let first = StubConnection::simple("15550100");
        let old = registry.install(&slot, first.clone()).await.unwrap();

        let second = StubConnection::simple("15550100");
        let new = registry.install_evicting(&slot, second.clone()).await.unwrap();

        assert_ne!(old, new);
        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert!(registry.is_current("15550100", new).await);
    }

    #[tokio::test]
    async fn test_locks_are_dropped_with_their_slot() {
        let registry = SessionRegistry::new();

        for i in 0..100 {
            let slot = registry.acquire(&format!("1555{:04}", i)).await;
            drop(slot);
        }
        assert_eq!(registry.claimed(), 0);

        let slot = registry.acquire("15550100").await;
        registry
            .install(&slot, StubConnection::simple("15550100"))
            .await
            .unwrap();
        assert_eq!(registry.claimed(), 1);
        drop(slot);

        let slot = registry.acquire("15550100").await;
        drop(slot);
        assert_eq!(registry.count().await, 0);
        assert_eq!(registry.claimed(), 0);
    }

    #[tokio::test]
    async fn test_waiting_claimant_keeps_lock() {
        let registry = Arc::new(SessionRegistry::new());
        let slot = registry.acquire("15550100").await;

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move {
                let _slot = registry.claim("15550100").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        drop(slot);
        assert_eq!(registry.claimed(), 1);

        waiter.await.unwrap();
        assert_eq!(registry.claimed(), 0);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let registry = SessionRegistry::new();
        let slot = registry.acquire("15550100").await;
        registry
            .install(&slot, StubConnection::simple("15550100"))
            .await
            .unwrap();
        drop(slot);

        assert!(registry.release("15550100").await);
        assert!(!registry.release("15550100").await);
        assert!(!registry.release("19999999").await);
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_release_generation_ignores_successor() {
        let registry = SessionRegistry::new();

        let slot = registry.acquire("15550100").await;
        let old = registry
            .install(&slot, StubConnection::simple("15550100"))
            .await
            .unwrap();
        drop(slot);

        let slot = registry.acquire("15550100").await;
        let new = registry
            .install(&slot, StubConnection::simple("15550100"))
            .await
            .unwrap();
        drop(slot);

        assert!(!registry.release_generation("15550100", old).await);
        assert!(registry.is_current("15550100", new).await);
        assert!(registry.release_generation("15550100", new).await);
    }

    #[tokio::test]
    async fn test_retire_checks_generation() {
        let registry = SessionRegistry::new();
        let stub = StubConnection::simple("15550100");
        let slot = registry.acquire("15550100").await;
        let generation = registry.install(&slot, stub.clone()).await.unwrap();

        assert!(!registry.retire(&slot, generation + 100).await);
        assert!(!stub.is_closed());

        assert!(registry.retire(&slot, generation).await);
        assert!(stub.is_closed());
        assert!(registry.lookup("15550100").await.is_none());
    }

    #[tokio::test]
    async fn test_mark_open() {
        let registry = SessionRegistry::new();
        let slot = registry.acquire("15550100").await;
        let generation = registry
            .install(&slot, StubConnection::simple("15550100"))
            .await
            .unwrap();

        assert!(!registry.mark_open("15550100", generation + 1).await);
        assert!(registry.mark_open("15550100", generation).await);
        assert!(!registry.mark_open("15550100", generation).await);
        assert_eq!(
            registry.status("15550100").await.unwrap().status,
            SessionStatus::Open
        );
    }

    #[tokio::test]
    async fn test_eviction_aborts_subscription() {
        let registry = SessionRegistry::new();
        let slot = registry.acquire("15550100").await;
        let generation = registry
            .install(&slot, StubConnection::simple("15550100"))
            .await
            .unwrap();

        let task = tokio::spawn(std::future::pending::<()>());
        assert!(registry.attach(&slot, generation, task.abort_handle()).await);
        drop(slot);

        let _slot = registry.acquire("15550100").await;
        let result = task.await;
        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_keeps_one_live_connection() {
        let registry = Arc::new(SessionRegistry::new());
        let live = Arc::new(AtomicUsize::new(0));
        let max_live = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            let live = live.clone();
            let max_live = max_live.clone();
            tasks.push(tokio::spawn(async move {
                let slot = registry.acquire("15550100").await;
                let stub = StubConnection::new("15550100", live, &max_live);
                tokio::time::sleep(Duration::from_millis(2)).await;
                registry.install(&slot, stub).await.unwrap();
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_live.load(Ordering::SeqCst), 1);
        assert_eq!(live.load(Ordering::SeqCst), 1);
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let registry = SessionRegistry::new();
        let a = StubConnection::simple("15550100");
        let b = StubConnection::simple("14155551234");

        for stub in [a.clone(), b.clone()] {
            let slot = registry.acquire(stub.number()).await;
            registry.install(&slot, stub).await.unwrap();
        }

        registry.shutdown().await;

        assert!(a.is_closed());
        assert!(b.is_closed());
        assert_eq!(registry.count().await, 0);
        assert!(registry.list().await.is_empty());
    }
}
