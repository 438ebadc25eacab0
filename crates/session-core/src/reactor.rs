//! Per-connection lifecycle state machine.
//!
//! One reactor consumes the ordered event stream of one connection:
//! `connecting → ready → open → closed`, with no exit from `closed`. Events are
//! handled sequentially, so credential writes for a number land in the order
//! the protocol emitted them.

use crate::connection::{Connection, ConnectionEvent, EventStream};
use crate::coordinator::{ResponseSink, SessionServices};
use crate::error::SessionError;
use crate::types::{Credentials, DisconnectReason, SessionRecord};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Connection state as observed by the pairing coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Ready,
    Open,
    Closed(DisconnectReason),
}

pub(crate) struct LifecycleReactor {
    number: String,
    generation: u64,
    handle: Arc<dyn Connection>,
    services: SessionServices,
    state: watch::Sender<LinkState>,
    sink: ResponseSink,
    /// Last revision written, `None` until the stored revision is known
    revision: Option<u64>,
    opened: bool,
}

impl LifecycleReactor {
    pub(crate) fn new(
        number: &str,
        generation: u64,
        handle: Arc<dyn Connection>,
        services: SessionServices,
        state: watch::Sender<LinkState>,
        sink: ResponseSink,
        revision: Option<u64>,
    ) -> Self {
        Self {
            number: number.to_string(),
            generation,
            handle,
            services,
            state,
            sink,
            revision,
            opened: false,
        }
    }

    /// Consume events until the connection closes.
    pub(crate) async fn run(mut self, mut events: EventStream) {
        while let Some(event) = events.next().await {
            match event {
                ConnectionEvent::Ready => self.on_ready(),
                ConnectionEvent::CredentialsUpdated(credentials) => {
                    self.on_credentials(credentials).await
                }
                ConnectionEvent::Opened { user } => self.on_open(user).await,
                ConnectionEvent::Closed(reason) => {
                    self.on_close(reason).await;
                    return;
                }
            }
        }

        debug!(number = %self.number, "Event stream ended without a close event");
        self.on_close(DisconnectReason::Unknown).await;
    }

    fn on_ready(&self) {
        self.state.send_if_modified(|state| {
            if *state == LinkState::Connecting {
                *state = LinkState::Ready;
                true
            } else {
                false
            }
        });
    }

    async fn on_credentials(&mut self, credentials: Credentials) {
        if let Err(e) = self.services.cache.write(&self.number, &credentials).await {
            warn!(number = %self.number, error = %e, "Failed to cache credentials locally");
        }

        let revision = self.next_revision().await;
        let mut record = SessionRecord::new(&self.number, credentials, revision);
        let mut persisted = self.services.store.upsert(&record).await;

        if matches!(persisted, Ok(false)) {
            // Stored revision moved past ours
            warn!(number = %self.number, revision = record.revision, "Store holds a newer revision, rebasing");
            self.revision = None;
            record.revision = self.next_revision().await;
            persisted = self.services.store.upsert(&record).await;
        }

        match persisted {
            Ok(true) => debug!(number = %self.number, revision = record.revision, "Persisted credentials"),
            Ok(false) => warn!(number = %self.number, revision = record.revision, "Store rejected credentials as stale"),
            Err(e) => warn!(number = %self.number, error = %e, "Failed to persist credentials"),
        }
    }

    /// Next write revision, reading the stored one when it is not known yet.
    async fn next_revision(&mut self) -> u64 {
        let base = match self.revision {
            Some(revision) => revision,
            None => match self.services.store.load(&self.number).await {
                Ok(record) => record.map_or(0, |r| r.revision),
                Err(e) => {
                    warn!(number = %self.number, error = %e, "Could not read stored revision");
                    return 1;
                }
            },
        };

        self.revision = Some(base + 1);
        base + 1
    }

    async fn on_open(&mut self, user: Option<String>) {
        if self.opened {
            return;
        }
        self.opened = true;

        self.services
            .registry
            .mark_open(&self.number, self.generation)
            .await;
        self.state.send_replace(LinkState::Open);

        info!(
            number = %self.number,
            user = user.as_deref().unwrap_or("unknown"),
            "Session opened"
        );

        for hook in &self.services.hooks {
            if let Err(e) = hook.on_open(&self.number, self.handle.as_ref()).await {
                warn!(number = %self.number, hook = hook.name(), error = %e, "Session hook failed");
            }
        }
    }

    async fn on_close(self, reason: DisconnectReason) {
        self.state.send_replace(LinkState::Closed(reason.clone()));

        self.sink
            .fulfil(Err(SessionError::PairingFailed(format!(
                "connection closed: {}",
                reason
            ))))
            .await;

        let registry = &self.services.registry;
        let slot = registry.claim(&self.number).await;

        if !registry.release_generation(&self.number, self.generation).await {
            debug!(number = %self.number, "Connection already superseded, leaving state alone");
            return;
        }

        if reason.is_terminal() {
            let terminal = SessionError::TerminalDisconnect {
                number: self.number.clone(),
                reason: reason.clone(),
            };
            warn!(error = %terminal, "Removing stored session");

            if let Err(e) = self.services.cache.purge(&self.number).await {
                warn!(number = %self.number, error = %e, "Failed to purge local credential cache");
            }
            if let Err(e) = self.services.store.delete(&self.number).await {
                warn!(number = %self.number, error = %e, "Failed to delete stored credentials");
            }
        } else {
            info!(number = %self.number, reason = %reason, "Connection closed, keeping stored credentials");
        }
        drop(slot);

        for hook in &self.services.hooks {
            if let Err(e) = hook.on_close(&self.number, &reason).await {
                warn!(number = %self.number, hook = hook.name(), error = %e, "Session hook failed");
            }
        }
    }
}
