/// Attempt budget given to jobs when no other value is configured.
pub const DEFAULT_NUM_ATTEMPTS: u32 = 5;

/// Configuration for the queue system.
///
/// Use [`QueueConfig::builder()`] for ergonomic construction, or
/// [`QueueConfig::default()`] for sensible defaults.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Attempts given to jobs built by the queue, and restored when a job is
    /// put back after the session was lost or its attempts ran out.
    pub default_attempts: u32,

    /// Buffer size of the queue event broadcast channel.
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_attempts: DEFAULT_NUM_ATTEMPTS,
            event_capacity: 64,
        }
    }
}

impl QueueConfig {
    /// Start building a config with the builder pattern.
    pub fn builder() -> QueueConfigBuilder {
        QueueConfigBuilder::default()
    }
}

/// Builder for [`QueueConfig`].
#[derive(Default)]
pub struct QueueConfigBuilder {
    config: QueueConfig,
}

impl QueueConfigBuilder {
    /// Set how many times a job may call the API before giving up on timeouts.
    pub fn with_default_attempts(mut self, attempts: u32) -> Self {
        self.config.default_attempts = attempts;
        self
    }

    /// Set how many undelivered events a slow listener may fall behind by.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Build the final [`QueueConfig`].
    pub fn build(self) -> QueueConfig {
        self.config
    }
}
