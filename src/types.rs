use serde::{Deserialize, Serialize};

/// Unique identifier given to every API job at construction.
pub type JobId = uuid::Uuid;

/// Priority tier for queued jobs.
///
/// Lower values are served first. Within the same tier, jobs are processed
/// in the order they were enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobPriority(pub u8);

impl JobPriority {
    pub const TOKEN_INVALIDATION: Self = Self(10);
    pub const PAUSE: Self = Self(11);
    pub const METADATA_SYNC: Self = Self(12);
    pub const DOWNLOAD: Self = Self(13);
    pub const DELETION: Self = Self(14);
    pub const SEND_REPLY: Self = Self(15);
    pub const UPDATE: Self = Self(16);

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for JobPriority {
    fn default() -> Self {
        JobPriority::UPDATE
    }
}

impl From<u8> for JobPriority {
    fn from(value: u8) -> Self {
        JobPriority(value)
    }
}

/// Independent processing lanes. Each lane has its own worker, so a slow
/// file download never holds up metadata or reply traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Lane {
    Main,
    Downloads,
}

impl Lane {
    pub const ALL: [Lane; 2] = [Lane::Main, Lane::Downloads];

    pub fn as_str(&self) -> &str {
        match self {
            Lane::Main => "main",
            Lane::Downloads => "downloads",
        }
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coordinator lifecycle: Idle -> Dispatching -> Paused/SessionInvalid/Idle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueueState {
    Idle,
    Dispatching,
    Paused,
    SessionInvalid,
}

impl QueueState {
    pub fn as_str(&self) -> &str {
        match self {
            QueueState::Idle => "idle",
            QueueState::Dispatching => "dispatching",
            QueueState::Paused => "paused",
            QueueState::SessionInvalid => "session_invalid",
        }
    }
}
