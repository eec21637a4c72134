use thiserror::Error;

/// Errors raised by an API client or by a job's action.
///
/// The executor classifies these into three blast radii: authentication
/// problems escalate past the job, timeouts are retried, and everything else
/// is reported through the job's failure signal.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error(
        "API is inaccessible either because there is no client or because the client is not \
         properly authenticated"
    )]
    Inaccessible,

    #[error("Request timed out")]
    Timeout,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    /// Build an application-level failure from any displayable message.
    pub fn other(message: impl std::fmt::Display) -> Self {
        ApiError::Other(anyhow::anyhow!("{}", message))
    }

    /// True for errors meaning the current session can no longer be used.
    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Auth(_) | ApiError::Inaccessible)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ApiError::Timeout)
    }
}

/// Conditions that escape the retry executor and must be handled by the
/// queue coordinator rather than by the job itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error(
        "API is inaccessible either because there is no client or because the client is not \
         properly authenticated"
    )]
    ApiInaccessible,

    #[error("Request timed out after {attempts} attempt(s)")]
    TimedOut { attempts: u32 },
}

/// Errors from the ordering relation between queued jobs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderingError {
    #[error("Cannot compare jobs without an order number")]
    Unassigned,

    #[error("Job already holds order number {0} and cannot be enqueued again")]
    AlreadyAssigned(u64),
}

/// Errors that can occur in the queue system.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Ordering error: {0}")]
    Ordering(#[from] OrderingError),

    #[error("Not adding job, we are not logged in")]
    NotLoggedIn,

    #[error("Job was discarded before it reached a terminal state")]
    JobDropped,

    #[error("Failed to open session: {0}")]
    Session(String),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for QueueError {
    fn from(err: anyhow::Error) -> Self {
        QueueError::Other(format!("{:#}", err))
    }
}
