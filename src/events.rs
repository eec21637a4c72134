use crate::types::{JobId, Lane};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Emitted once per invalidation episode when a lane finds the API
/// session unusable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionLostEvent {
    pub episode: u64,
    pub lane: Lane,
}

/// Emitted when a fresh client ends an invalidation episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRestoredEvent {
    pub episode: u64,
}

/// Emitted by a lane that paused itself after a job ran out of attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseRequestedEvent {
    pub lane: Lane,
    pub job_id: Option<JobId>,
}

/// Emitted after pause markers were queued on the listed lanes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuesPausedEvent {
    pub lanes: Vec<Lane>,
}

/// Emitted when the listed lanes were told to resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuesResumedEvent {
    pub lanes: Vec<Lane>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum QueueEvent {
    SessionLost(SessionLostEvent),
    SessionRestored(SessionRestoredEvent),
    PauseRequested(PauseRequestedEvent),
    Paused(QueuesPausedEvent),
    Resumed(QueuesResumedEvent),
}

impl QueueEvent {
    /// Event name used when forwarding to a front end.
    pub fn name(&self) -> &'static str {
        match self {
            QueueEvent::SessionLost(_) => "queue:session_lost",
            QueueEvent::SessionRestored(_) => "queue:session_restored",
            QueueEvent::PauseRequested(_) => "queue:pause_requested",
            QueueEvent::Paused(_) => "queue:paused",
            QueueEvent::Resumed(_) => "queue:resumed",
        }
    }
}

/// Fan-out of [`QueueEvent`]s to any number of listeners.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<QueueEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Having no listeners is not an error.
    pub fn emit(&self, event: QueueEvent) {
        tracing::trace!(event = event.name(), "Publishing queue event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Re-emit every queue event to the Tauri front end under
/// [`QueueEvent::name`].
#[cfg(feature = "tauri")]
pub fn forward_to_tauri(
    bus: &EventBus,
    app_handle: tauri::AppHandle,
) -> tauri::async_runtime::JoinHandle<()> {
    use tauri::Emitter;

    let mut rx = bus.subscribe();
    tauri::async_runtime::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Err(e) = app_handle.emit(event.name(), event.clone()) {
                        tracing::warn!(event = event.name(), "Failed to forward event: {}", e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Tauri event bridge lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
