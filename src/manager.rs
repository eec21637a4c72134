use crate::{
    auth::{ClientSlot, SessionMonitor},
    config::QueueConfig,
    error::QueueError,
    events::{EventBus, QueueEvent, QueuesPausedEvent, QueuesResumedEvent},
    job::ApiJob,
    queue::{QueueWorker, RunnableQueue},
    session::SessionMaker,
    signals::JobReceiver,
    types::Lane,
    ApiCall,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

type Session<M> = <M as SessionMaker>::Session;

#[derive(Default)]
struct Workers {
    lanes: HashMap<Lane, QueueWorker>,
    pause_listener: Option<JoinHandle<()>>,
}

/// High-level queue manager providing the public API.
///
/// Owns one [`RunnableQueue`] per [`Lane`]. All lanes share the API client,
/// the session maker and the [`SessionMonitor`], so an authentication
/// failure on any lane halts all of them until [`login`](Self::login) is
/// called with a fresh client.
///
/// Workers run on the ambient tokio runtime. They are started by the first
/// [`login`](Self::login) or enqueue and stopped by
/// [`shutdown`](Self::shutdown) or on drop. A call already in flight is never
/// cancelled.
///
/// # Example
///
/// ```ignore
/// let queue = ApiJobQueue::new(QueueConfig::default(), SqliteSessionMaker::new("client.db"));
/// queue.login(client);
///
/// let receiver = queue.enqueue(UpdateStar { source_uuid, starred: true })?;
/// match receiver.await?.into_result() {
///     Ok(uuid) => println!("starred {}", uuid),
///     Err(e) => eprintln!("star failed: {}", e),
/// }
/// ```
pub struct ApiJobQueue<C, M>
where
    C: Send + Sync + 'static,
    M: SessionMaker,
{
    config: QueueConfig,
    client: ClientSlot<C>,
    monitor: SessionMonitor,
    main_queue: RunnableQueue<C, M>,
    download_queue: RunnableQueue<C, M>,
    workers: Mutex<Workers>,
}

impl<C, M> ApiJobQueue<C, M>
where
    C: Send + Sync + 'static,
    M: SessionMaker,
{
    pub fn new(config: QueueConfig, sessions: M) -> Self {
        let client = ClientSlot::default();
        let monitor = SessionMonitor::new(EventBus::new(config.event_capacity));
        let sessions = Arc::new(sessions);

        let lane_queue = |lane| {
            RunnableQueue::new(
                lane,
                config.clone(),
                client.clone(),
                Arc::clone(&sessions),
                monitor.clone(),
            )
        };
        let main_queue = lane_queue(Lane::Main);
        let download_queue = lane_queue(Lane::Downloads);

        Self {
            config,
            client,
            monitor,
            main_queue,
            download_queue,
            workers: Mutex::new(Workers::default()),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Install a fresh API client, end any invalidation episode and make
    /// sure every lane has a running worker.
    ///
    /// Jobs that were put back when the session was lost run again, in
    /// their original order.
    pub fn login(&self, client: C) {
        self.client.replace(Some(client));
        self.monitor.restore();
        self.start_queues();
        tracing::info!("Logged in, queues running");
    }

    /// Forget the API client. Queued jobs stay queued; the next dispatch on
    /// each lane finds no client and halts that lane.
    pub fn logout(&self) {
        if self.client.clear().is_some() {
            tracing::info!("Logged out");
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.client.is_present()
    }

    /// Spawn a worker for every lane that does not have a live one.
    ///
    /// Does nothing outside a tokio runtime.
    pub fn start_queues(&self) {
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::warn!("No tokio runtime, queue workers not started");
            return;
        }

        let mut workers = self.lock_workers();
        for lane in Lane::ALL {
            let worker = match workers.lanes.remove(&lane) {
                Some(worker) if !worker.is_finished() && !worker.is_stopping() => worker,
                previous => {
                    tracing::debug!(lane = %lane, "Starting queue worker");
                    let previous = previous.filter(|worker| !worker.is_finished());
                    self.queue(lane).spawn_after(previous)
                }
            };
            workers.lanes.insert(lane, worker);
        }

        let listening = workers
            .pause_listener
            .as_ref()
            .is_some_and(|handle| !handle.is_finished());
        if !listening {
            workers.pause_listener = Some(self.spawn_pause_listener());
        }
    }

    /// Queue a pause marker on every lane. Each lane stops once whatever it
    /// is running finishes, ahead of all ordinary work already waiting.
    pub fn pause_queues(&self) -> Result<(), QueueError> {
        for lane in Lane::ALL {
            self.queue(lane).enqueue_pause()?;
        }
        tracing::info!("Pausing queues");
        self.events().emit(QueueEvent::Paused(QueuesPausedEvent {
            lanes: Lane::ALL.to_vec(),
        }));
        Ok(())
    }

    /// Undo a pause on every lane.
    pub fn resume_queues(&self) {
        self.start_queues();
        for lane in Lane::ALL {
            self.queue(lane).resume();
        }
        self.events().emit(QueueEvent::Resumed(QueuesResumedEvent {
            lanes: Lane::ALL.to_vec(),
        }));
    }

    /// Wrap an [`ApiCall`] in a job with the configured attempt budget and
    /// queue it. The receiver resolves with the job's outcome.
    pub fn enqueue<J>(&self, call: J) -> Result<JobReceiver<J::Output>, QueueError>
    where
        J: ApiCall<C, Session<M>>,
    {
        let (job, receiver) = ApiJob::new(call, self.config.default_attempts);
        self.enqueue_job(job)?;
        Ok(receiver)
    }

    /// Queue a prepared job on the lane its call asks for. Returns the
    /// job's order number.
    ///
    /// Refused with [`QueueError::NotLoggedIn`] while no client is
    /// installed.
    pub fn enqueue_job<J>(&self, job: ApiJob<C, Session<M>, J>) -> Result<u64, QueueError>
    where
        J: ApiCall<C, Session<M>>,
    {
        if !self.client.is_present() {
            tracing::info!(
                job_type = job.call().job_type(),
                "Not adding job, not logged in"
            );
            return Err(QueueError::NotLoggedIn);
        }

        self.start_queues();
        let lane = job.call().lane();
        self.queue(lane).enqueue_job(job)
    }

    pub fn queue(&self, lane: Lane) -> &RunnableQueue<C, M> {
        match lane {
            Lane::Main => &self.main_queue,
            Lane::Downloads => &self.download_queue,
        }
    }

    pub fn monitor(&self) -> &SessionMonitor {
        &self.monitor
    }

    pub fn events(&self) -> &EventBus {
        self.monitor.events()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events().subscribe()
    }

    /// Stop every worker once the job it is running, if any, has finished.
    /// Queued jobs stay where they are and run again after the next
    /// [`start_queues`](Self::start_queues).
    pub fn shutdown(&self) {
        let mut workers = self.lock_workers();
        for (lane, worker) in workers.lanes.iter() {
            tracing::debug!(lane = %lane, "Stopping queue worker");
            worker.stop();
        }
        if let Some(handle) = workers.pause_listener.take() {
            handle.abort();
        }
    }

    /// Pause the sibling lanes whenever a lane pauses itself after a job
    /// ran out of attempts.
    fn spawn_pause_listener(&self) -> JoinHandle<()> {
        let mut rx = self.subscribe();
        let queues = [self.main_queue.clone(), self.download_queue.clone()];
        let events = self.events().clone();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(QueueEvent::PauseRequested(request)) => {
                        tracing::info!(
                            lane = %request.lane,
                            "Lane paused itself, pausing the other lanes"
                        );
                        for queue in queues.iter().filter(|q| q.lane() != request.lane) {
                            if let Err(e) = queue.enqueue_pause() {
                                tracing::error!(lane = %queue.lane(), "Failed to pause lane: {}", e);
                            }
                        }
                        events.emit(QueueEvent::Paused(QueuesPausedEvent {
                            lanes: Lane::ALL.to_vec(),
                        }));
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Pause listener lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn lock_workers(&self) -> MutexGuard<'_, Workers> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C, M> Drop for ApiJobQueue<C, M>
where
    C: Send + Sync + 'static,
    M: SessionMaker,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::types::QueueState;
    use async_trait::async_trait;

    struct Client;

    struct Noop;

    #[async_trait]
    impl ApiCall<Client, ()> for Noop {
        type Output = ();

        async fn call_api(&self, _client: &Client, _session: &mut ()) -> Result<(), ApiError> {
            Ok(())
        }
    }

    fn open_session() -> Result<(), QueueError> {
        Ok(())
    }

    fn manager() -> ApiJobQueue<Client, fn() -> Result<(), QueueError>> {
        ApiJobQueue::new(
            QueueConfig::default(),
            open_session as fn() -> Result<(), QueueError>,
        )
    }

    #[test]
    fn test_enqueue_refused_when_logged_out() {
        let queue = manager();
        assert!(matches!(queue.enqueue(Noop), Err(QueueError::NotLoggedIn)));
        assert!(queue.queue(Lane::Main).is_empty());
    }

    #[test]
    fn test_lanes_are_distinct() {
        let queue = manager();
        assert_eq!(queue.queue(Lane::Main).lane(), Lane::Main);
        assert_eq!(queue.queue(Lane::Downloads).lane(), Lane::Downloads);
        assert_eq!(queue.queue(Lane::Main).state(), QueueState::Idle);
    }

    #[tokio::test]
    async fn test_pause_queues_marks_every_lane() {
        let queue = manager();
        let mut events = queue.subscribe();
        queue.pause_queues().unwrap();

        for lane in Lane::ALL {
            assert_eq!(queue.queue(lane).pending(), 1);
        }
        assert_eq!(
            events.recv().await.unwrap(),
            QueueEvent::Paused(QueuesPausedEvent {
                lanes: Lane::ALL.to_vec()
            })
        );
    }

    #[tokio::test]
    async fn test_login_then_logout() {
        let queue = manager();
        queue.login(Client);
        assert!(queue.is_logged_in());
        assert!(queue.enqueue(Noop).unwrap().await.unwrap().is_success());

        queue.logout();
        assert!(!queue.is_logged_in());
        assert!(matches!(queue.enqueue(Noop), Err(QueueError::NotLoggedIn)));
        queue.shutdown();
    }
}
