//! Broadcast filters.
//!
//! A filter is registered once on a broadcaster and always offers the
//! generic capability ([`BroadcastFilter::filter`]). Filters that can produce
//! a subscriber-specific variant also expose [`SubscriberFilter`] through
//! [`BroadcastFilter::as_subscriber_filter`].
//!
//! The pipeline folds every broadcast twice:
//!
//! ```text
//! Stage A:  O → [f1] → [f2] → ... → [fn] → canonical   (all filters, once)
//! Stage B:  O → [s1] → [s2] → ... → [sk] → variant     (subscriber-aware only,
//!                                                        once per subscriber)
//! ```
//!
//! A subscriber receives its Stage B variant only if some subscriber-aware
//! filter actually produced one; otherwise it receives the canonical message.

mod builtin;
mod pipeline;

pub use builtin::{FnFilter, TrackMessageSize, TRACK_MESSAGE_SIZE};
pub use pipeline::{Canonical, FilterPipeline, PipelineSnapshot, SubscriberOutcome};

use crate::error::FilterError;
use crate::types::{Payload, Subscriber};
use thiserror::Error;

/// What a filter decided for one message.
///
/// New actions may be added; code outside this crate must keep a wildcard arm.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum FilterAction {
    /// Replace the current message and keep folding.
    Continue(Payload),
    /// Leave the current message untouched. For subscriber-aware filters this
    /// means "no specialization for this subscriber".
    Abstain,
    /// Stop folding and use this payload as the result.
    Skip(Payload),
    /// Drop the message. In the canonical fold this drops the broadcast for
    /// everyone; in the subscriber fold only that subscriber misses it.
    Abort,
}

/// Result of a single filter invocation.
pub type FilterResult = std::result::Result<FilterAction, FilterError>;

/// Generic filter capability, applied once per broadcast.
pub trait BroadcastFilter: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Transform `message` (the output of the previous filter). `original` is
    /// what the publisher broadcast.
    fn filter(&self, original: &Payload, message: &Payload) -> FilterResult;

    /// The subscriber-aware capability, if this filter has one.
    fn as_subscriber_filter(&self) -> Option<&dyn SubscriberFilter> {
        None
    }
}

/// Subscriber-aware filter capability, applied once per subscriber.
pub trait SubscriberFilter: Send + Sync {
    fn filter_for(
        &self,
        subscriber: &Subscriber,
        original: &Payload,
        message: &Payload,
    ) -> FilterResult;
}

/// A filter returned an error.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("Filter '{filter}' failed: {source}")]
pub struct FilterFailure {
    pub filter: String,
    #[source]
    pub source: FilterError,
}
