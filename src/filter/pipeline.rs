//! Ordered filter list and the two-stage fold.

use super::{BroadcastFilter, FilterAction, FilterFailure};
use crate::types::{Payload, Subscriber};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::trace;

/// Filters in registration order.
struct FilterList {
    filters: Vec<Arc<dyn BroadcastFilter>>,
    /// Number of filters with the subscriber-aware capability.
    subscriber_aware: usize,
}

/// Result of the canonical fold.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Canonical {
    Message(Payload),
    Aborted { filter: String },
}

/// Result of the per-subscriber fold after the fallback rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubscriberOutcome {
    Deliver(Payload),
    Aborted { filter: String },
}

/// Ordered filter list of one broadcaster.
///
/// Appends copy the list; readers take a [`PipelineSnapshot`] and never
/// block a concurrent `add`.
pub struct FilterPipeline {
    list: RwLock<Arc<FilterList>>,
}

impl FilterPipeline {
    pub fn new() -> Self {
        Self {
            list: RwLock::new(Arc::new(FilterList {
                filters: Vec::new(),
                subscriber_aware: 0,
            })),
        }
    }

    /// Append a filter. Snapshots taken earlier are unaffected.
    pub fn add(&self, filter: Arc<dyn BroadcastFilter>) {
        let mut list = self.list.write();
        let mut filters = list.filters.clone();
        let aware = filter.as_subscriber_filter().is_some();
        filters.push(filter);
        *list = Arc::new(FilterList {
            filters,
            subscriber_aware: list.subscriber_aware + usize::from(aware),
        });
    }

    /// Remove every filter.
    pub fn clear(&self) {
        *self.list.write() = Arc::new(FilterList {
            filters: Vec::new(),
            subscriber_aware: 0,
        });
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            list: Arc::clone(&self.list.read()),
        }
    }

    pub fn len(&self) -> usize {
        self.list.read().filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn names(&self) -> Vec<String> {
        self.snapshot().names()
    }
}

impl Default for FilterPipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable view of the filter list at one point in time.
#[derive(Clone)]
pub struct PipelineSnapshot {
    list: Arc<FilterList>,
}

impl PipelineSnapshot {
    pub fn len(&self) -> usize {
        self.list.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.filters.is_empty()
    }

    /// True if at least one filter is subscriber-aware.
    pub fn has_subscriber_filters(&self) -> bool {
        self.list.subscriber_aware > 0
    }

    pub fn names(&self) -> Vec<String> {
        self.list.filters.iter().map(|f| f.name().to_string()).collect()
    }

    /// Stage A: fold `original` through every filter's generic capability.
    pub fn canonical(&self, original: &Payload) -> Result<Canonical, FilterFailure> {
        let mut current = original.clone();

        for filter in &self.list.filters {
            let action = filter.filter(original, &current).map_err(|source| FilterFailure {
                filter: filter.name().to_string(),
                source,
            })?;

            match action {
                FilterAction::Continue(next) => current = next,
                FilterAction::Abstain => {}
                FilterAction::Skip(next) => return Ok(Canonical::Message(next)),
                FilterAction::Abort => {
                    trace!(filter = filter.name(), "canonical fold aborted");
                    return Ok(Canonical::Aborted {
                        filter: filter.name().to_string(),
                    });
                }
            }
        }

        Ok(Canonical::Message(current))
    }

    /// Stage B plus fallback: what `subscriber` receives for a message whose
    /// raw payload is `original` and whose canonical form is `canonical`.
    ///
    /// Only subscriber-aware filters take part, seeded from `original`. If
    /// none of them produces a variant, the canonical message is delivered.
    pub fn personalize(
        &self,
        subscriber: &Subscriber,
        original: &Payload,
        canonical: &Payload,
    ) -> Result<SubscriberOutcome, FilterFailure> {
        if !self.has_subscriber_filters() {
            return Ok(SubscriberOutcome::Deliver(canonical.clone()));
        }

        let mut current = original.clone();
        let mut customized = false;

        for filter in &self.list.filters {
            let Some(aware) = filter.as_subscriber_filter() else {
                continue;
            };

            let action = aware
                .filter_for(subscriber, original, &current)
                .map_err(|source| FilterFailure {
                    filter: filter.name().to_string(),
                    source,
                })?;

            match action {
                FilterAction::Continue(next) => {
                    current = next;
                    customized = true;
                }
                FilterAction::Abstain => {}
                FilterAction::Skip(next) => {
                    current = next;
                    customized = true;
                    break;
                }
                FilterAction::Abort => {
                    return Ok(SubscriberOutcome::Aborted {
                        filter: filter.name().to_string(),
                    });
                }
            }
        }

        if customized {
            Ok(SubscriberOutcome::Deliver(current))
        } else {
            Ok(SubscriberOutcome::Deliver(canonical.clone()))
        }
    }
}
