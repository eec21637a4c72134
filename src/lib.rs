//! # API Job Queue
//!
//! Ordered, retrying background job queue for desktop clients that talk to a
//! remote API. The UI thread enqueues work; worker tasks run it against an
//! injected API client and report back without ever blocking the UI.
//!
//! ## Features
//!
//! - Priority tiers with FIFO order inside a tier
//! - Bounded retry of timeouts, one attempt for everything else
//! - Authentication failures halt every lane until a new client is supplied
//! - Pause markers that stop a lane without dropping queued work
//! - Outcome delivery over channels or onto the owner's own event loop
//! - Separate lanes so downloads never hold up ordinary requests
//!
//! ## Quick Start
//!
//! 1. Define job types implementing [`ApiCall`]
//! 2. Create an [`ApiJobQueue`] with a [`QueueConfig`] and a [`SessionMaker`]
//! 3. Call [`ApiJobQueue::login()`] with an API client to start the workers
//! 4. Add jobs with [`ApiJobQueue::enqueue()`] and await the returned receiver
//!
//! See the `demos/` directory for complete usage examples.

pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod job;
pub mod manager;
pub mod ordering;
pub mod queue;
pub mod session;
pub mod signals;
pub mod types;

pub use auth::{ClientSlot, SessionMonitor, SessionStatus};
pub use config::{QueueConfig, QueueConfigBuilder, DEFAULT_NUM_ATTEMPTS};
pub use error::{ApiError, ExecutionError, OrderingError, QueueError};
pub use events::{EventBus, QueueEvent};
pub use executor::JobDisposition;
pub use job::{ApiJob, PauseJob, QueueJob, RunnableJob};
pub use manager::ApiJobQueue;
pub use ordering::{OrderKey, OrderedQueue};
pub use queue::{QueueWorker, RunnableQueue};
#[cfg(feature = "sqlite")]
pub use session::SqliteSessionMaker;
pub use session::SessionMaker;
pub use signals::{main_context, JobOutcome, JobReceiver, JobSignals, MainContext, MainLoop};
pub use types::{JobId, JobPriority, Lane, QueueState};

/// Trait that job types must implement to be run by the queue.
///
/// `C` is the API client type and `S` the session type produced by the
/// queue's [`SessionMaker`]. The engine never looks inside either.
///
/// `call_api` must return `Ok` if and only if the work succeeded. Return
/// [`ApiError::Auth`] or [`ApiError::Inaccessible`] when the client is no
/// longer authenticated, [`ApiError::Timeout`] when a request ran out of
/// time, and anything else through [`ApiError::Other`].
///
/// # Example
///
/// ```ignore
/// use api_job_queue::*;
///
/// struct UpdateStar {
///     source_uuid: String,
///     starred: bool,
/// }
///
/// #[async_trait::async_trait]
/// impl ApiCall<MyClient, rusqlite::Connection> for UpdateStar {
///     type Output = String;
///
///     async fn call_api(
///         &self,
///         client: &MyClient,
///         session: &mut rusqlite::Connection,
///     ) -> Result<String, ApiError> {
///         client.star(&self.source_uuid, self.starred).await?;
///         Ok(self.source_uuid.clone())
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait ApiCall<C, S>: Send + Sync + 'static
where
    C: Send + Sync + 'static,
    S: Send + 'static,
{
    /// Value delivered to the success signal.
    type Output: Send + 'static;

    /// Make the API call and handle its result.
    async fn call_api(&self, client: &C, session: &mut S) -> Result<Self::Output, ApiError>;

    /// Tier used when this job is enqueued through [`ApiJobQueue`].
    fn priority(&self) -> JobPriority {
        JobPriority::default()
    }

    /// Lane this job runs on when enqueued through [`ApiJobQueue`].
    fn lane(&self) -> Lane {
        Lane::Main
    }

    /// Optional: a human-readable name for this job type, used in logging.
    fn job_type(&self) -> &str {
        std::any::type_name::<Self>()
    }
}
