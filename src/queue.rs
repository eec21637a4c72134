use crate::{
    auth::{ClientSlot, SessionMonitor, SessionStatus},
    config::QueueConfig,
    error::{ExecutionError, OrderingError, QueueError},
    events::{PauseRequestedEvent, QueueEvent},
    job::{ApiJob, QueueJob, RunnableJob},
    ordering::OrderedQueue,
    session::SessionMaker,
    types::{JobId, JobPriority, Lane, QueueState},
    ApiCall,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

type Session<M> = <M as SessionMaker>::Session;

/// A single lane: an ordered collection of jobs drained by one worker task.
///
/// At most one job runs at a time. Enqueueing never blocks and is safe from
/// any thread while the worker is busy.
///
/// # Example
///
/// ```ignore
/// let queue = RunnableQueue::new(
///     Lane::Main,
///     QueueConfig::default(),
///     ClientSlot::new(Some(client)),
///     Arc::new(|| Ok::<_, QueueError>(())),
///     SessionMonitor::new(EventBus::new(64)),
/// );
/// queue.enqueue_job(job)?;
/// let worker = queue.spawn();
/// ```
pub struct RunnableQueue<C, M>
where
    C: Send + Sync + 'static,
    M: SessionMaker,
{
    inner: Arc<Inner<C, M>>,
}

struct Inner<C, M>
where
    C: Send + Sync + 'static,
    M: SessionMaker,
{
    lane: Lane,
    config: QueueConfig,
    jobs: Mutex<OrderedQueue<QueueJob<C, Session<M>>>>,
    paused: AtomicBool,
    state: watch::Sender<QueueState>,
    wakeup: Notify,
    client: ClientSlot<C>,
    sessions: Arc<M>,
    monitor: SessionMonitor,
}

impl<C, M> Clone for RunnableQueue<C, M>
where
    C: Send + Sync + 'static,
    M: SessionMaker,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[derive(Default)]
struct StopSignal {
    requested: AtomicBool,
    notify: Notify,
}

/// Handle to a spawned dispatch loop.
pub struct QueueWorker {
    handle: JoinHandle<()>,
    stop: Arc<StopSignal>,
}

impl QueueWorker {
    /// Ask the loop to exit at its next wait point. A job that is already
    /// running finishes first.
    pub fn stop(&self) {
        self.stop.requested.store(true, Ordering::SeqCst);
        self.stop.notify.notify_one();
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.requested.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the loop immediately, including any job it is running.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Wait for the loop to exit.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                tracing::error!("Queue worker panicked: {}", e);
            }
        }
    }
}

enum Next<C, S>
where
    C: Send + Sync + 'static,
    S: Send + 'static,
{
    Job(JobPriority, u64, QueueJob<C, S>),
    Wait(QueueState),
}

impl<C, M> RunnableQueue<C, M>
where
    C: Send + Sync + 'static,
    M: SessionMaker,
{
    pub fn new(
        lane: Lane,
        config: QueueConfig,
        client: ClientSlot<C>,
        sessions: Arc<M>,
        monitor: SessionMonitor,
    ) -> Self {
        let (state, _) = watch::channel(QueueState::Idle);
        Self {
            inner: Arc::new(Inner {
                lane,
                config,
                jobs: Mutex::new(OrderedQueue::new()),
                paused: AtomicBool::new(false),
                state,
                wakeup: Notify::new(),
                client,
                sessions,
                monitor,
            }),
        }
    }

    pub fn lane(&self) -> Lane {
        self.inner.lane
    }

    pub fn client(&self) -> &ClientSlot<C> {
        &self.inner.client
    }

    pub fn monitor(&self) -> &SessionMonitor {
        &self.inner.monitor
    }

    /// Current session status as seen by this lane.
    pub fn session_status(&self) -> SessionStatus {
        self.inner.monitor.status()
    }

    /// Add a job at the given priority. Returns its order number.
    ///
    /// The order number is taken and the job inserted under one lock, so
    /// concurrent producers can never interleave the two steps.
    pub fn enqueue(
        &self,
        mut job: QueueJob<C, Session<M>>,
        priority: JobPriority,
    ) -> Result<u64, QueueError> {
        let order_number = {
            let mut jobs = self.lock_jobs();
            if let Some(existing) = job.order_number() {
                return Err(OrderingError::AlreadyAssigned(existing).into());
            }
            let order_number = jobs.next_order_number();
            job.assign(priority, order_number)?;
            jobs.push(priority, order_number, job);
            order_number
        };

        tracing::debug!(
            lane = %self.inner.lane,
            order_number,
            priority = priority.value(),
            "Added job to queue"
        );
        self.inner.wakeup.notify_one();
        Ok(order_number)
    }

    /// Add an API job at its own priority.
    pub fn enqueue_job<J>(&self, job: ApiJob<C, Session<M>, J>) -> Result<u64, QueueError>
    where
        J: ApiCall<C, Session<M>>,
    {
        let priority = job.priority();
        self.enqueue(QueueJob::api(job), priority)
    }

    /// Add a pause marker. It runs ahead of all ordinary work already queued.
    pub fn enqueue_pause(&self) -> Result<u64, QueueError> {
        self.enqueue(QueueJob::pause(), JobPriority::PAUSE)
    }

    /// Leave the paused state. Waiting jobs are dispatched again in order.
    pub fn resume(&self) {
        if self.inner.paused.swap(false, Ordering::SeqCst) {
            tracing::info!(lane = %self.inner.lane, "Resuming queue");
        }
        self.inner.wakeup.notify_one();
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> QueueState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<QueueState> {
        self.inner.state.subscribe()
    }

    /// Number of entries waiting, pause markers included.
    pub fn pending(&self) -> usize {
        self.lock_jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_jobs().is_empty()
    }

    /// Spawn the dispatch loop as a background tokio task.
    pub fn spawn(&self) -> QueueWorker {
        self.spawn_after(None)
    }

    /// Spawn a dispatch loop that only starts once `previous` has exited,
    /// so two loops never drain the lane at the same time.
    pub fn spawn_after(&self, previous: Option<QueueWorker>) -> QueueWorker {
        let stop = Arc::new(StopSignal::default());
        let signal = Arc::clone(&stop);
        let queue = self.clone();
        let handle = tokio::spawn(async move {
            if let Some(previous) = previous {
                previous.stop();
                previous.join().await;
            }
            queue.run(&signal).await;
        });
        QueueWorker { handle, stop }
    }

    /// Dispatch loop without a stop handle. Runs until the task is aborted.
    ///
    /// Waits while the lane is empty, paused, or the session is lost.
    /// Otherwise pops the next job and runs it to completion before looking
    /// at the queue again.
    pub async fn process(&self) {
        self.run(&StopSignal::default()).await;
    }

    async fn run(&self, stop: &StopSignal) {
        let mut session = self.inner.monitor.subscribe();

        loop {
            if stop.requested.load(Ordering::SeqCst) {
                tracing::debug!(lane = %self.inner.lane, "Queue worker stopped");
                return;
            }

            let active = session.borrow_and_update().is_active();
            let (priority, order_number, job) = match self.next(active) {
                Next::Job(priority, order_number, job) => (priority, order_number, job),
                Next::Wait(state) => {
                    self.set_state(state);
                    tokio::select! {
                        _ = self.inner.wakeup.notified() => {}
                        _ = stop.notify.notified() => {}
                        changed = session.changed() => {
                            if changed.is_err() {
                                return;
                            }
                        }
                    }
                    continue;
                }
            };

            match job {
                QueueJob::Pause(_) => {
                    tracing::info!(lane = %self.inner.lane, "Paused queue");
                    self.inner.paused.store(true, Ordering::SeqCst);
                    self.set_state(QueueState::Paused);
                }
                QueueJob::Api(job) => {
                    self.set_state(QueueState::Dispatching);
                    self.dispatch(priority, order_number, job).await;
                }
            }
        }
    }

    async fn dispatch(
        &self,
        priority: JobPriority,
        order_number: u64,
        mut job: Box<dyn RunnableJob<C, Session<M>>>,
    ) {
        let job_id = job.id();
        let client = self.inner.client.current();

        let mut session = match self.inner.sessions.open() {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(
                    lane = %self.inner.lane,
                    job_id = %job_id,
                    "Failed to open session: {}",
                    e
                );
                self.requeue(priority, order_number, job);
                self.pause_after_failure(job_id);
                return;
            }
        };

        tracing::debug!(
            lane = %self.inner.lane,
            job_id = %job_id,
            job_type = job.job_type(),
            "Processing job"
        );
        let result = job.run(client.as_deref(), &mut session).await;
        drop(session);

        match result {
            Ok(disposition) => {
                tracing::debug!(
                    lane = %self.inner.lane,
                    job_id = %job_id,
                    ?disposition,
                    "Job finished"
                );
            }
            Err(ExecutionError::ApiInaccessible) => {
                self.requeue(priority, order_number, job);
                if self.client_replaced(client.as_ref()) {
                    tracing::debug!(
                        lane = %self.inner.lane,
                        job_id = %job_id,
                        "Client was replaced during the call, retrying with the new one"
                    );
                } else {
                    tracing::debug!(
                        lane = %self.inner.lane,
                        job_id = %job_id,
                        "API inaccessible, halting lane"
                    );
                    self.inner.monitor.report_lost(self.inner.lane);
                    self.set_state(QueueState::SessionInvalid);
                }
            }
            Err(ExecutionError::TimedOut { attempts }) => {
                tracing::debug!(
                    lane = %self.inner.lane,
                    job_id = %job_id,
                    attempts,
                    "Job timed out on every attempt"
                );
                self.requeue(priority, order_number, job);
                self.pause_after_failure(job_id);
            }
        }
    }

    fn next(&self, session_active: bool) -> Next<C, Session<M>> {
        if self.is_paused() {
            return Next::Wait(QueueState::Paused);
        }
        if !session_active {
            return Next::Wait(QueueState::SessionInvalid);
        }
        match self.lock_jobs().pop() {
            Some((priority, order_number, job)) => Next::Job(priority, order_number, job),
            None => Next::Wait(QueueState::Idle),
        }
    }

    /// Put a job back at its original position with a fresh attempt budget.
    fn requeue(
        &self,
        priority: JobPriority,
        order_number: u64,
        mut job: Box<dyn RunnableJob<C, Session<M>>>,
    ) {
        job.reset_attempts(self.inner.config.default_attempts);
        self.lock_jobs()
            .push(priority, order_number, QueueJob::Api(job));
        self.inner.wakeup.notify_one();
    }

    /// Whether the client installed now differs from the one a finished
    /// call started with.
    fn client_replaced(&self, started: Option<&Arc<C>>) -> bool {
        match (started, self.inner.client.current()) {
            (Some(old), Some(new)) => !Arc::ptr_eq(old, &new),
            (None, Some(_)) => true,
            (_, None) => false,
        }
    }

    /// Pause this lane right away and tell the owner, who pauses the
    /// sibling lanes.
    fn pause_after_failure(&self, job_id: JobId) {
        if !self.inner.paused.swap(true, Ordering::SeqCst) {
            tracing::info!(lane = %self.inner.lane, "Paused queue");
        }
        self.set_state(QueueState::Paused);
        self.inner
            .monitor
            .events()
            .emit(QueueEvent::PauseRequested(PauseRequestedEvent {
                lane: self.inner.lane,
                job_id: Some(job_id),
            }));
    }

    fn set_state(&self, state: QueueState) {
        let changed = self.inner.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            tracing::trace!(lane = %self.inner.lane, state = state.as_str(), "Queue state changed");
        }
    }

    fn lock_jobs(&self) -> MutexGuard<'_, OrderedQueue<QueueJob<C, Session<M>>>> {
        self.inner.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
