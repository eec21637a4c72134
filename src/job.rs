//! Queue entries: API jobs and pause markers.

use crate::error::{ExecutionError, OrderingError};
use crate::executor::{self, JobDisposition};
use crate::ordering::{self, OrderKey};
use crate::signals::{JobOutcome, JobReceiver, JobSignals};
use crate::types::{JobId, JobPriority, Lane};
use crate::ApiCall;
use async_trait::async_trait;
use std::cmp::Ordering;
use std::marker::PhantomData;

/// An [`ApiCall`] together with its attempt budget, queue position and
/// outcome sink.
///
/// The order number is assigned when the job is enqueued and never changes
/// afterwards, even if the job is put back into its queue.
pub struct ApiJob<C, S, J>
where
    C: Send + Sync + 'static,
    S: Send + 'static,
    J: ApiCall<C, S>,
{
    id: JobId,
    pub(crate) call: J,
    priority: JobPriority,
    pub(crate) remaining_attempts: u32,
    order_number: Option<u64>,
    signals: Option<JobSignals<J::Output>>,
    _marker: PhantomData<fn(&C, &mut S)>,
}

impl<C, S, J> ApiJob<C, S, J>
where
    C: Send + Sync + 'static,
    S: Send + 'static,
    J: ApiCall<C, S>,
{
    /// Create a job whose outcome is delivered to the returned receiver.
    pub fn new(call: J, attempts: u32) -> (Self, JobReceiver<J::Output>) {
        let (signals, receiver) = JobSignals::channel();
        (Self::with_signals(call, attempts, signals), receiver)
    }

    /// Create a job that reports through the given signals.
    pub fn with_signals(call: J, attempts: u32, signals: JobSignals<J::Output>) -> Self {
        let priority = call.priority();
        Self {
            id: uuid::Uuid::new_v4(),
            call,
            priority,
            remaining_attempts: attempts,
            order_number: None,
            signals: Some(signals),
            _marker: PhantomData,
        }
    }

    /// Override the tier taken from [`ApiCall::priority`] (builder pattern).
    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn call(&self) -> &J {
        &self.call
    }

    pub fn priority(&self) -> JobPriority {
        self.priority
    }

    pub fn remaining_attempts(&self) -> u32 {
        self.remaining_attempts
    }

    pub fn order_number(&self) -> Option<u64> {
        self.order_number
    }

    pub fn order_key(&self) -> OrderKey {
        OrderKey::new(self.priority, self.order_number)
    }

    pub(crate) fn emit(&mut self, outcome: JobOutcome<J::Output>) {
        match self.signals.take() {
            Some(signals) => signals.emit(outcome),
            None => tracing::warn!(job_id = %self.id, "Job already reported an outcome"),
        }
    }
}

impl<C, S, J> std::fmt::Debug for ApiJob<C, S, J>
where
    C: Send + Sync + 'static,
    S: Send + 'static,
    J: ApiCall<C, S>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiJob")
            .field("id", &self.id)
            .field("job_type", &self.call.job_type())
            .field("priority", &self.priority)
            .field("remaining_attempts", &self.remaining_attempts)
            .field("order_number", &self.order_number)
            .finish()
    }
}

/// Type-erased view of an [`ApiJob`] so jobs of different kinds can share
/// one queue.
#[async_trait]
pub trait RunnableJob<C, S>: Send
where
    C: Send + Sync + 'static,
    S: Send + 'static,
{
    fn id(&self) -> JobId;

    fn job_type(&self) -> &str;

    fn lane(&self) -> Lane;

    fn order_key(&self) -> OrderKey;

    /// Give the job its queue position. Fails if it already has one.
    fn assign(&mut self, priority: JobPriority, order_number: u64) -> Result<(), OrderingError>;

    fn remaining_attempts(&self) -> u32;

    fn reset_attempts(&mut self, attempts: u32);

    /// Run the job through the retry executor.
    async fn run(
        &mut self,
        client: Option<&C>,
        session: &mut S,
    ) -> Result<JobDisposition, ExecutionError>;
}

#[async_trait]
impl<C, S, J> RunnableJob<C, S> for ApiJob<C, S, J>
where
    C: Send + Sync + 'static,
    S: Send + 'static,
    J: ApiCall<C, S>,
{
    fn id(&self) -> JobId {
        self.id
    }

    fn job_type(&self) -> &str {
        self.call.job_type()
    }

    fn lane(&self) -> Lane {
        self.call.lane()
    }

    fn order_key(&self) -> OrderKey {
        OrderKey::new(self.priority, self.order_number)
    }

    fn assign(&mut self, priority: JobPriority, order_number: u64) -> Result<(), OrderingError> {
        if let Some(existing) = self.order_number {
            return Err(OrderingError::AlreadyAssigned(existing));
        }
        self.priority = priority;
        self.order_number = Some(order_number);
        Ok(())
    }

    fn remaining_attempts(&self) -> u32 {
        self.remaining_attempts
    }

    fn reset_attempts(&mut self, attempts: u32) {
        self.remaining_attempts = attempts;
    }

    async fn run(
        &mut self,
        client: Option<&C>,
        session: &mut S,
    ) -> Result<JobDisposition, ExecutionError> {
        executor::execute(self, client, session).await
    }
}

/// Marker whose only effect is to stop its lane when dequeued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PauseJob {
    priority: JobPriority,
    order_number: Option<u64>,
}

impl Default for PauseJob {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseJob {
    pub fn new() -> Self {
        Self {
            priority: JobPriority::PAUSE,
            order_number: None,
        }
    }

    pub fn order_key(&self) -> OrderKey {
        OrderKey::new(self.priority, self.order_number)
    }

    fn assign(&mut self, priority: JobPriority, order_number: u64) -> Result<(), OrderingError> {
        if let Some(existing) = self.order_number {
            return Err(OrderingError::AlreadyAssigned(existing));
        }
        self.priority = priority;
        self.order_number = Some(order_number);
        Ok(())
    }
}

/// Anything that can sit in a lane's ordered queue.
pub enum QueueJob<C, S>
where
    C: Send + Sync + 'static,
    S: Send + 'static,
{
    Api(Box<dyn RunnableJob<C, S>>),
    Pause(PauseJob),
}

impl<C, S> QueueJob<C, S>
where
    C: Send + Sync + 'static,
    S: Send + 'static,
{
    pub fn api<J>(job: ApiJob<C, S, J>) -> Self
    where
        J: ApiCall<C, S>,
    {
        QueueJob::Api(Box::new(job))
    }

    pub fn pause() -> Self {
        QueueJob::Pause(PauseJob::new())
    }

    /// Whether dequeuing this entry should stop the lane.
    pub fn is_pause(&self) -> bool {
        matches!(self, QueueJob::Pause(_))
    }

    pub fn order_key(&self) -> OrderKey {
        match self {
            QueueJob::Api(job) => job.order_key(),
            QueueJob::Pause(pause) => pause.order_key(),
        }
    }

    pub fn order_number(&self) -> Option<u64> {
        self.order_key().order_number
    }

    /// Order two entries by `(priority, order_number)`.
    pub fn compare(&self, other: &Self) -> Result<Ordering, OrderingError> {
        ordering::compare(&self.order_key(), &other.order_key())
    }

    pub(crate) fn assign(
        &mut self,
        priority: JobPriority,
        order_number: u64,
    ) -> Result<(), OrderingError> {
        match self {
            QueueJob::Api(job) => job.assign(priority, order_number),
            QueueJob::Pause(pause) => pause.assign(priority, order_number),
        }
    }
}

impl<C, S, J> From<ApiJob<C, S, J>> for QueueJob<C, S>
where
    C: Send + Sync + 'static,
    S: Send + 'static,
    J: ApiCall<C, S>,
{
    fn from(job: ApiJob<C, S, J>) -> Self {
        QueueJob::api(job)
    }
}

impl<C, S> std::fmt::Debug for QueueJob<C, S>
where
    C: Send + Sync + 'static,
    S: Send + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueJob::Api(job) => f
                .debug_struct("Api")
                .field("id", &job.id())
                .field("job_type", &job.job_type())
                .field("order_key", &job.order_key())
                .finish(),
            QueueJob::Pause(pause) => f.debug_tuple("Pause").field(pause).finish(),
        }
    }
}
