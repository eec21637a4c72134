//! Success / failure delivery from the dispatch task back to the owner.
//!
//! Every API job carries one [`JobSignals`] sink. Emitting consumes the sink,
//! so a job can report success or failure at most once. The owner either
//! awaits (or polls) a [`JobReceiver`], or registers a handler that is run on
//! its own thread through a [`MainContext`] / [`MainLoop`] pair.

use crate::error::{ApiError, QueueError};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};

/// Terminal outcome of an API job.
#[derive(Debug)]
pub enum JobOutcome<T> {
    Succeeded(T),
    Failed(ApiError),
}

impl<T> JobOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded(_))
    }

    pub fn into_result(self) -> Result<T, ApiError> {
        match self {
            JobOutcome::Succeeded(value) => Ok(value),
            JobOutcome::Failed(err) => Err(err),
        }
    }
}

type Task = Box<dyn FnOnce() + Send>;

/// Sending half used by worker tasks to run closures on the owner's thread.
#[derive(Clone)]
pub struct MainContext {
    tx: mpsc::UnboundedSender<Task>,
}

/// Receiving half, drained by the owner (typically from its UI event loop).
pub struct MainLoop {
    rx: mpsc::UnboundedReceiver<Task>,
}

/// Create a linked [`MainContext`] / [`MainLoop`] pair.
pub fn main_context() -> (MainContext, MainLoop) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MainContext { tx }, MainLoop { rx })
}

impl MainContext {
    /// Queue a closure for the owner. Never blocks.
    ///
    /// Returns `false` if the [`MainLoop`] has been dropped.
    pub fn post<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.send(Box::new(f)).is_ok()
    }
}

impl MainLoop {
    /// Run every closure queued so far, without waiting. Returns how many ran.
    pub fn dispatch_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Wait for the next closure and run it.
    ///
    /// Returns `false` once every [`MainContext`] is gone.
    pub async fn dispatch_next(&mut self) -> bool {
        match self.rx.recv().await {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }
}

enum Sink<T> {
    Channel(oneshot::Sender<JobOutcome<T>>),
    Marshalled {
        context: MainContext,
        handler: Box<dyn FnOnce(JobOutcome<T>) + Send>,
    },
}

/// Where a job reports its outcome.
pub struct JobSignals<T> {
    sink: Sink<T>,
}

impl<T: Send + 'static> JobSignals<T> {
    /// Deliver the outcome through a oneshot channel.
    pub fn channel() -> (Self, JobReceiver<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                sink: Sink::Channel(tx),
            },
            JobReceiver { rx },
        )
    }

    /// Deliver the outcome by running `handler` on the owner's [`MainLoop`].
    pub fn connect<F>(context: &MainContext, handler: F) -> Self
    where
        F: FnOnce(JobOutcome<T>) + Send + 'static,
    {
        Self {
            sink: Sink::Marshalled {
                context: context.clone(),
                handler: Box::new(handler),
            },
        }
    }

    pub(crate) fn emit(self, outcome: JobOutcome<T>) {
        match self.sink {
            Sink::Channel(tx) => {
                if tx.send(outcome).is_err() {
                    tracing::debug!("Job outcome dropped, receiver is gone");
                }
            }
            Sink::Marshalled { context, handler } => {
                if !context.post(move || handler(outcome)) {
                    tracing::debug!("Job outcome dropped, main loop is gone");
                }
            }
        }
    }
}

impl<T> std::fmt::Debug for JobSignals<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.sink {
            Sink::Channel(_) => "channel",
            Sink::Marshalled { .. } => "marshalled",
        };
        f.debug_struct("JobSignals").field("sink", &kind).finish()
    }
}

/// Owner-side handle for a job's outcome.
///
/// Await it, or poll it without blocking from a single-threaded loop with
/// [`try_outcome`](Self::try_outcome). Resolves to
/// [`QueueError::JobDropped`] if the job is discarded before finishing.
#[derive(Debug)]
pub struct JobReceiver<T> {
    rx: oneshot::Receiver<JobOutcome<T>>,
}

impl<T> JobReceiver<T> {
    /// `Ok(None)` while the job is still queued or retrying.
    pub fn try_outcome(&mut self) -> Result<Option<JobOutcome<T>>, QueueError> {
        match self.rx.try_recv() {
            Ok(outcome) => Ok(Some(outcome)),
            Err(oneshot::error::TryRecvError::Empty) => Ok(None),
            Err(oneshot::error::TryRecvError::Closed) => Err(QueueError::JobDropped),
        }
    }
}

impl<T> Future for JobReceiver<T> {
    type Output = Result<JobOutcome<T>, QueueError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.map_err(|_| QueueError::JobDropped))
    }
}
