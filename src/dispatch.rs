//! Delivery workers.
//!
//! Broadcasters hand one job per (subscriber, envelope) to a fixed pool of
//! worker threads. A subscriber is always routed to the same worker, so its
//! messages are handed to the sink in order while different subscribers are
//! served in parallel. Each job reports back on a channel owned by the
//! [`DeliveryHandle`] returned to the caller.

use crate::error::{HeraldError, Result};
use crate::filter::{PipelineSnapshot, SubscriberOutcome};
use crate::sink::{DeliveryError, Sink};
use crate::types::{Envelope, Sequence, Subscriber};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Worker pool configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Number of worker threads.
    /// Default: 4
    pub workers: usize,

    /// Max queued jobs per worker. A job that finds its worker's queue full
    /// is dropped and reported as failed for its subscriber.
    /// Default: 1024
    pub queue_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
        }
    }
}

impl DispatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(HeraldError::InvalidConfig(
                "dispatch.workers must be at least 1".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(HeraldError::InvalidConfig(
                "dispatch.queue_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// How one job ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum JobOutcome {
    Delivered,
    Failed,
    /// A subscriber-aware filter aborted the message for this subscriber.
    Skipped,
}

/// Why the dispatcher refused a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Rejection {
    QueueFull,
    Closed,
}

impl Rejection {
    pub(crate) fn into_error(self) -> DeliveryError {
        match self {
            Rejection::QueueFull => DeliveryError::QueueFull,
            Rejection::Closed => DeliveryError::DispatcherClosed,
        }
    }
}

/// One message for one subscriber.
pub(crate) struct DeliveryJob {
    pub subscriber: Subscriber,
    pub envelope: Arc<Envelope>,
    pub pipeline: PipelineSnapshot,
    pub sink: Arc<dyn Sink>,
    pub done: Sender<JobOutcome>,
}

impl DeliveryJob {
    fn run(self) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.deliver())).unwrap_or_else(|_| {
            warn!(
                subscriber = %self.subscriber.id(),
                sequence = self.envelope.sequence.0,
                "sink panicked during delivery"
            );
            JobOutcome::Failed
        });
        // The handle may already be gone; nobody is waiting then.
        let _ = self.done.send(outcome);
    }

    fn deliver(&self) -> JobOutcome {
        let envelope = &self.envelope;
        let personalized =
            self.pipeline
                .personalize(&self.subscriber, &envelope.original, &envelope.message);

        let message = match personalized {
            Ok(SubscriberOutcome::Deliver(message)) => message,
            Ok(SubscriberOutcome::Aborted { filter }) => {
                debug!(
                    broadcaster = %envelope.broadcaster,
                    subscriber = %self.subscriber.id(),
                    sequence = envelope.sequence.0,
                    filter = %filter,
                    "message aborted for subscriber"
                );
                return JobOutcome::Skipped;
            }
            Err(failure) => {
                warn!(
                    broadcaster = %envelope.broadcaster,
                    subscriber = %self.subscriber.id(),
                    error = %failure,
                    "subscriber filter failed"
                );
                self.sink
                    .on_error(&self.subscriber, &DeliveryError::Filter(failure));
                return JobOutcome::Failed;
            }
        };

        match self.sink.on_message(&self.subscriber, &message) {
            Ok(()) => {
                trace!(
                    broadcaster = %envelope.broadcaster,
                    subscriber = %self.subscriber.id(),
                    sequence = envelope.sequence.0,
                    "delivered"
                );
                JobOutcome::Delivered
            }
            Err(e) => {
                warn!(
                    broadcaster = %envelope.broadcaster,
                    subscriber = %self.subscriber.id(),
                    error = %e,
                    "sink rejected message"
                );
                self.sink
                    .on_error(&self.subscriber, &DeliveryError::Rejected(e));
                JobOutcome::Failed
            }
        }
    }
}

/// Pool of delivery worker threads.
pub struct Dispatcher {
    queues: RwLock<Vec<Sender<DeliveryJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(config: DispatchConfig) -> Result<Self> {
        config.validate()?;

        let mut queues = Vec::with_capacity(config.workers);
        let mut workers = Vec::with_capacity(config.workers);

        for index in 0..config.workers {
            let (sender, receiver) = bounded::<DeliveryJob>(config.queue_capacity);
            let handle = thread::Builder::new()
                .name(format!("herald-dispatch-{}", index))
                .spawn(move || {
                    for job in receiver.iter() {
                        job.run();
                    }
                })?;
            queues.push(sender);
            workers.push(handle);
        }

        debug!(workers = config.workers, "dispatcher started");

        Ok(Self {
            queues: RwLock::new(queues),
            workers: Mutex::new(workers),
        })
    }

    pub fn worker_count(&self) -> usize {
        self.queues.read().len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.queues.read().is_empty()
    }

    /// Queue a job on the worker owning its subscriber. Never blocks: callers
    /// hold the publish lock, and a sink may be waiting on that lock.
    pub(crate) fn try_submit(&self, job: DeliveryJob) -> std::result::Result<(), Rejection> {
        let queues = self.queues.read();
        if queues.is_empty() {
            return Err(Rejection::Closed);
        }
        let index = (job.subscriber.id().0 % queues.len() as u64) as usize;

        match queues[index].try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Rejection::QueueFull),
            Err(TrySendError::Disconnected(_)) => Err(Rejection::Closed),
        }
    }

    /// Stop accepting jobs, let workers drain their queues, and join them.
    pub fn shutdown(&self) {
        self.queues.write().clear();

        let current = thread::current().id();
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in workers {
            // A sink may trigger shutdown from a worker thread.
            if worker.thread().id() == current {
                continue;
            }
            let _ = worker.join();
        }
        debug!("dispatcher shut down");
    }
}

/// Outcome of a broadcast or a replay.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryResult {
    /// Sequence assigned to the broadcast. None for aborted broadcasts and replays.
    pub sequence: Option<Sequence>,
    /// Messages the sink accepted.
    pub delivered: usize,
    /// Messages the sink rejected or that failed in a subscriber filter.
    pub failed: usize,
    /// Messages a subscriber-aware filter aborted for its subscriber.
    pub skipped: usize,
    /// True if a filter vetoed the broadcast. Nothing was cached or delivered.
    pub aborted: bool,
    /// True if the broadcast was written to the replay cache.
    pub cached: bool,
}

/// Completion signal for a broadcast or replay.
///
/// The broadcast itself has already happened when this is returned; the
/// handle only reports when every job was handed to the sink.
#[must_use = "a DeliveryHandle does nothing unless waited on"]
pub struct DeliveryHandle {
    result: DeliveryResult,
    pending: usize,
    outcomes: Option<Receiver<JobOutcome>>,
}

impl DeliveryHandle {
    pub(crate) fn new(
        sequence: Option<Sequence>,
        cached: bool,
        pending: usize,
        outcomes: Receiver<JobOutcome>,
    ) -> Self {
        Self {
            result: DeliveryResult {
                sequence,
                cached,
                ..Default::default()
            },
            pending,
            outcomes: Some(outcomes),
        }
    }

    pub(crate) fn aborted() -> Self {
        Self {
            result: DeliveryResult {
                aborted: true,
                ..Default::default()
            },
            pending: 0,
            outcomes: None,
        }
    }

    /// Count jobs that were never queued as failed.
    pub(crate) fn with_failed(mut self, failed: usize) -> Self {
        self.result.failed += failed;
        self
    }

    /// Jobs not yet reported.
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Block until every job has been handed to the sink.
    pub fn wait(mut self) -> DeliveryResult {
        while self.pending > 0 {
            let received = match &self.outcomes {
                Some(outcomes) => outcomes.recv().ok(),
                None => None,
            };
            match received {
                Some(outcome) => self.record(outcome),
                None => self.abandon(),
            }
        }
        self.result
    }

    /// Like [`wait`](Self::wait) but gives the handle back on timeout.
    pub fn wait_timeout(mut self, timeout: Duration) -> std::result::Result<DeliveryResult, Self> {
        let deadline = Instant::now() + timeout;
        while self.pending > 0 {
            let received = match &self.outcomes {
                Some(outcomes) => outcomes.recv_deadline(deadline),
                None => Err(RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(outcome) => self.record(outcome),
                Err(RecvTimeoutError::Timeout) => return Err(self),
                Err(RecvTimeoutError::Disconnected) => self.abandon(),
            }
        }
        Ok(self.result)
    }

    fn record(&mut self, outcome: JobOutcome) {
        self.pending -= 1;
        match outcome {
            JobOutcome::Delivered => self.result.delivered += 1,
            JobOutcome::Failed => self.result.failed += 1,
            JobOutcome::Skipped => self.result.skipped += 1,
        }
    }

    /// Jobs dropped without reporting (dispatcher shut down) count as failed.
    fn abandon(&mut self) {
        self.result.failed += self.pending;
        self.pending = 0;
    }
}
