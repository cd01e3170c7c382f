//! Broadcaster: membership, filters and replay cache for one identity.

use crate::cache::{BroadcasterCache, CacheConfig, CacheFailurePolicy, CacheMode, MemoryCache};
use crate::dispatch::{
    DeliveryHandle, DeliveryJob, DispatchConfig, Dispatcher, JobOutcome, Rejection,
};
use crate::error::{CacheError, HeraldError, Result};
use crate::filter::{BroadcastFilter, Canonical, FilterPipeline, PipelineSnapshot};
use crate::sink::Sink;
use crate::types::{
    BroadcasterId, Envelope, Payload, Sequence, Subscriber, SubscriberId, Timestamp,
};
use crossbeam_channel::{unbounded, Sender};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Broadcaster configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcasterConfig {
    /// Retention of the replay cache.
    pub cache: CacheConfig,

    /// Which broadcasts are cached.
    pub cache_mode: CacheMode,

    /// What to do when the cache refuses a broadcast.
    pub cache_failure: CacheFailurePolicy,
}

impl BroadcasterConfig {
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()
    }
}

/// A job the dispatcher refused while the publish lock was held.
struct Refused {
    subscriber: Subscriber,
    sequence: Sequence,
    rejection: Rejection,
}

/// State serialized across broadcasts and attaches.
struct PublishState {
    last_sequence: Sequence,
    last_timestamp: Timestamp,
}

/// Publishes messages to the subscribers attached to one identity.
///
/// `broadcast` and `add_subscriber` are serialized against each other: a
/// broadcast sees a consistent membership snapshot, and a subscriber attaching
/// concurrently gets any given message at most once, either live or from the
/// replay, never out of order. A message is only lost for a subscriber whose
/// delivery queue is full, and that loss is reported through
/// [`Sink::on_error`].
pub struct Broadcaster {
    id: BroadcasterId,
    config: BroadcasterConfig,
    pipeline: FilterPipeline,
    cache: Arc<dyn BroadcasterCache>,
    subscribers: RwLock<HashMap<SubscriberId, Subscriber>>,
    publish: Mutex<PublishState>,
    sink: Arc<dyn Sink>,
    dispatcher: Arc<Dispatcher>,
    destroyed: AtomicBool,
    last_activity: Mutex<Instant>,
}

impl Broadcaster {
    /// Create a broadcaster with its own delivery workers.
    pub fn new(
        id: impl Into<BroadcasterId>,
        config: BroadcasterConfig,
        sink: Arc<dyn Sink>,
    ) -> Result<Self> {
        let dispatcher = Arc::new(Dispatcher::new(DispatchConfig::default())?);
        Self::with_dispatcher(id, config, sink, dispatcher)
    }

    /// Create a broadcaster sharing an existing worker pool.
    pub fn with_dispatcher(
        id: impl Into<BroadcasterId>,
        config: BroadcasterConfig,
        sink: Arc<dyn Sink>,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<Self> {
        config.validate()?;
        let cache = Arc::new(MemoryCache::new(config.cache.clone()));

        Ok(Self {
            id: id.into(),
            config,
            pipeline: FilterPipeline::new(),
            cache,
            subscribers: RwLock::new(HashMap::new()),
            publish: Mutex::new(PublishState {
                last_sequence: Sequence(0),
                last_timestamp: Timestamp(0),
            }),
            sink,
            dispatcher,
            destroyed: AtomicBool::new(false),
            last_activity: Mutex::new(Instant::now()),
        })
    }

    /// Replace the replay cache. Intended for construction time; entries in
    /// the previous cache are not carried over.
    pub fn with_cache(mut self, cache: Arc<dyn BroadcasterCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn id(&self) -> &BroadcasterId {
        &self.id
    }

    pub fn config(&self) -> &BroadcasterConfig {
        &self.config
    }

    // --- Filters ---

    /// Append a filter. Applies from the next broadcast on.
    pub fn add_filter<F: BroadcastFilter + 'static>(&self, filter: F) {
        self.add_shared_filter(Arc::new(filter));
    }

    /// Append a filter shared with other broadcasters.
    pub fn add_shared_filter(&self, filter: Arc<dyn BroadcastFilter>) {
        debug!(broadcaster = %self.id, filter = filter.name(), "filter added");
        self.pipeline.add(filter);
    }

    pub fn filter_names(&self) -> Vec<String> {
        self.pipeline.names()
    }

    // --- Publishing ---

    /// Publish `payload` to every attached subscriber and cache it for
    /// subscribers that attach later.
    ///
    /// Returns once the canonical fold, the cache write and the hand-off to
    /// the delivery workers are done. A filter error fails the broadcast and
    /// nothing is cached or delivered; a filter abort is a successful no-op
    /// reported as `aborted`.
    pub fn broadcast(&self, payload: impl Into<Payload>) -> Result<DeliveryHandle> {
        let original = payload.into();

        let mut state = self.publish.lock();
        self.ensure_ready()?;
        self.touch();
        let pipeline = self.pipeline.snapshot();

        let message = match pipeline.canonical(&original)? {
            Canonical::Message(message) => message,
            Canonical::Aborted { filter } => {
                debug!(broadcaster = %self.id, filter = %filter, "broadcast aborted by filter");
                return Ok(DeliveryHandle::aborted());
            }
        };

        let sequence = state.last_sequence.next();
        let envelope = Arc::new(Envelope {
            broadcaster: self.id.clone(),
            sequence,
            timestamp: Timestamp::now().max(state.last_timestamp),
            original,
            message,
        });

        let targets: Vec<Subscriber> = self.subscribers.read().values().cloned().collect();
        let should_cache = match self.config.cache_mode {
            CacheMode::All => true,
            CacheMode::WhenUnattended => targets.is_empty(),
        };

        let cached = match self.append_to_cache(&envelope, should_cache) {
            Ok(cached) => cached,
            Err(source) => match self.config.cache_failure {
                CacheFailurePolicy::DeliverLive => {
                    warn!(
                        broadcaster = %self.id,
                        sequence = sequence.0,
                        error = %source,
                        "cache write failed, delivering to live subscribers only"
                    );
                    false
                }
                CacheFailurePolicy::FailBroadcast => {
                    return Err(HeraldError::CacheWrite {
                        broadcaster: self.id.clone(),
                        source,
                    });
                }
            },
        };

        state.last_sequence = sequence;
        state.last_timestamp = envelope.timestamp;

        let (done, outcomes) = unbounded();
        let jobs = targets
            .iter()
            .map(|subscriber| (subscriber.clone(), Arc::clone(&envelope)));
        let refused = self.enqueue(jobs, &pipeline, &done);
        drop(state);

        debug!(
            broadcaster = %self.id,
            envelope = ?envelope.summary(),
            subscribers = targets.len(),
            cached,
            "broadcast"
        );
        self.report_refused(&refused);

        let queued = targets.len() - refused.len();
        Ok(DeliveryHandle::new(Some(sequence), cached, queued, outcomes).with_failed(refused.len()))
    }

    fn append_to_cache(
        &self,
        envelope: &Arc<Envelope>,
        should_cache: bool,
    ) -> std::result::Result<bool, CacheError> {
        if !should_cache {
            return Ok(false);
        }
        self.cache.append(Arc::clone(envelope))?;
        Ok(true)
    }

    // --- Membership ---

    /// Attach `subscriber` and replay the cache to it.
    ///
    /// Every attach replays everything the cache still holds at or after the
    /// subscriber's replay bound, even entries this subscriber already saw in
    /// an earlier attach. The returned handle completes when the replay has
    /// been handed to the sink.
    pub fn add_subscriber(&self, subscriber: Subscriber) -> Result<DeliveryHandle> {
        let state = self.publish.lock();
        self.ensure_ready()?;
        self.touch();

        self.subscribers
            .write()
            .insert(subscriber.id(), subscriber.clone());

        let entries = self.cache.query(subscriber.replay_bound());
        let pipeline = self.pipeline.snapshot();
        let (done, outcomes) = unbounded();
        let jobs = entries
            .iter()
            .map(|envelope| (subscriber.clone(), Arc::clone(envelope)));
        let refused = self.enqueue(jobs, &pipeline, &done);
        drop(state);

        debug!(
            broadcaster = %self.id,
            subscriber = %subscriber.id(),
            replayed = entries.len(),
            "subscriber attached"
        );
        self.report_refused(&refused);

        let queued = entries.len() - refused.len();
        Ok(DeliveryHandle::new(None, false, queued, outcomes).with_failed(refused.len()))
    }

    /// Hand jobs to the delivery workers without blocking. Must be called
    /// with the publish lock held so per-subscriber order matches sequence
    /// order.
    fn enqueue(
        &self,
        jobs: impl Iterator<Item = (Subscriber, Arc<Envelope>)>,
        pipeline: &PipelineSnapshot,
        done: &Sender<JobOutcome>,
    ) -> Vec<Refused> {
        let mut refused = Vec::new();
        for (subscriber, envelope) in jobs {
            let sequence = envelope.sequence;
            let job = DeliveryJob {
                subscriber: subscriber.clone(),
                envelope,
                pipeline: pipeline.clone(),
                sink: Arc::clone(&self.sink),
                done: done.clone(),
            };
            if let Err(rejection) = self.dispatcher.try_submit(job) {
                refused.push(Refused {
                    subscriber,
                    sequence,
                    rejection,
                });
            }
        }
        refused
    }

    /// Tell the sink about jobs that never reached a worker. Called after the
    /// publish lock is released, so the sink may publish again.
    fn report_refused(&self, refused: &[Refused]) {
        for job in refused {
            warn!(
                broadcaster = %self.id,
                subscriber = %job.subscriber.id(),
                sequence = job.sequence.0,
                reason = ?job.rejection,
                "delivery not queued"
            );
            self.sink
                .on_error(&job.subscriber, &job.rejection.into_error());
        }
    }

    /// Detach a subscriber. Returns false if it was not attached.
    pub fn remove_subscriber(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.write().remove(&id).is_some();
        if removed {
            self.touch();
            debug!(broadcaster = %self.id, subscriber = %id, "subscriber detached");
        }
        removed
    }

    pub fn is_attached(&self, id: SubscriberId) -> bool {
        self.subscribers.read().contains_key(&id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn subscriber_ids(&self) -> Vec<SubscriberId> {
        let mut ids: Vec<_> = self.subscribers.read().keys().copied().collect();
        ids.sort();
        ids
    }

    // --- Cache & lifecycle ---

    /// Number of envelopes currently retained for replay.
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Sequence of the last successful broadcast (`Seq(0)` before the first).
    pub fn last_sequence(&self) -> Sequence {
        self.publish.lock().last_sequence
    }

    /// Time since the last broadcast or membership change.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Detach everyone, drop the cache and filters, and refuse further work.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _state = self.publish.lock();
        self.subscribers.write().clear();
        self.cache.clear();
        self.pipeline.clear();
        debug!(broadcaster = %self.id, "broadcaster destroyed");
    }

    /// Checked with the publish lock held; `destroy` takes the same lock
    /// after setting the flag.
    fn ensure_ready(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(HeraldError::Destroyed(self.id.clone()));
        }
        if self.dispatcher.is_shut_down() {
            return Err(HeraldError::DispatcherClosed);
        }
        Ok(())
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }
}
