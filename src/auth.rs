//! Shared authentication state across lanes.

use crate::events::{EventBus, QueueEvent, SessionLostEvent, SessionRestoredEvent};
use crate::types::Lane;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;

/// Swappable handle to the API client, shared by every lane.
///
/// Lanes take a clone of the inner `Arc` right before dispatching, so
/// replacing the client only affects the next dispatch and never a call
/// already in flight.
pub struct ClientSlot<C> {
    inner: Arc<RwLock<Option<Arc<C>>>>,
}

impl<C> Clone for ClientSlot<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> Default for ClientSlot<C> {
    fn default() -> Self {
        Self::new(None)
    }
}

impl<C> ClientSlot<C> {
    pub fn new(client: Option<C>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(client.map(Arc::new))),
        }
    }

    pub fn current(&self) -> Option<Arc<C>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install a new client (or none) and return the previous one.
    pub fn replace(&self, client: Option<C>) -> Option<Arc<C>> {
        let mut slot = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, client.map(Arc::new))
    }

    pub fn clear(&self) -> Option<Arc<C>> {
        self.replace(None)
    }

    pub fn is_present(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Whether the API session is currently usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Lost { episode: u64 },
}

impl SessionStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Active)
    }
}

struct MonitorInner {
    status: watch::Sender<SessionStatus>,
    episodes: AtomicU64,
    events: EventBus,
}

/// Process-wide "API session lost" notification.
///
/// Any lane may report a loss; only the first report of an episode is
/// published. The episode ends when the owner supplies a fresh client and
/// calls [`restore`](Self::restore).
#[derive(Clone)]
pub struct SessionMonitor {
    inner: Arc<MonitorInner>,
}

impl SessionMonitor {
    pub fn new(events: EventBus) -> Self {
        let (status, _) = watch::channel(SessionStatus::Active);
        Self {
            inner: Arc::new(MonitorInner {
                status,
                episodes: AtomicU64::new(0),
                events,
            }),
        }
    }

    /// Mark the session as lost. Returns `true` only for the report that
    /// opened a new episode.
    pub fn report_lost(&self, lane: Lane) -> bool {
        let mut opened = None;
        self.inner.status.send_if_modified(|status| match *status {
            SessionStatus::Active => {
                let episode = self.inner.episodes.fetch_add(1, Ordering::SeqCst) + 1;
                *status = SessionStatus::Lost { episode };
                opened = Some(episode);
                true
            }
            SessionStatus::Lost { .. } => false,
        });

        match opened {
            Some(episode) => {
                tracing::warn!(lane = %lane, episode, "API session lost");
                self.inner
                    .events
                    .emit(QueueEvent::SessionLost(SessionLostEvent { episode, lane }));
                true
            }
            None => false,
        }
    }

    /// End the current invalidation episode, if any.
    pub fn restore(&self) {
        let mut ended = None;
        self.inner.status.send_if_modified(|status| match *status {
            SessionStatus::Lost { episode } => {
                *status = SessionStatus::Active;
                ended = Some(episode);
                true
            }
            SessionStatus::Active => false,
        });

        if let Some(episode) = ended {
            tracing::info!(episode, "API session restored");
            self.inner
                .events
                .emit(QueueEvent::SessionRestored(SessionRestoredEvent { episode }));
        }
    }

    pub fn status(&self) -> SessionStatus {
        *self.inner.status.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.status().is_active()
    }

    /// Number of invalidation episodes opened so far.
    pub fn episode(&self) -> u64 {
        self.inner.episodes.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }
}
