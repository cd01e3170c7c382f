//! Replay cache for reattaching subscribers.
//!
//! Every broadcast that survives the canonical fold is appended here, even
//! when nobody is attached. When a subscriber attaches, the broadcaster
//! queries the cache and redelivers what it finds. The cache keeps no record
//! of what a given subscriber already saw, so reattaching replays the same
//! entries again (at-least-once delivery).

mod memory;

pub use memory::MemoryCache;

use crate::error::{CacheError, HeraldError, Result};
use crate::types::{Envelope, ReplayBound};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Default number of retained envelopes per broadcaster.
pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// Retention bounds for a replay cache.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Max retained envelopes (None = no count bound).
    /// Default: 100
    pub max_entries: Option<usize>,

    /// Max age of a retained envelope (None = no age bound).
    pub max_age: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: Some(DEFAULT_MAX_ENTRIES),
            max_age: None,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == Some(0) {
            return Err(HeraldError::InvalidConfig(
                "cache.max_entries must be at least 1".into(),
            ));
        }
        if self.max_age == Some(Duration::ZERO) {
            return Err(HeraldError::InvalidConfig(
                "cache.max_age must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// What a broadcast does when the cache refuses an envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheFailurePolicy {
    /// Log, deliver to attached subscribers anyway. Subscribers that attach
    /// later never see the message.
    DeliverLive,
    /// Fail the broadcast; nothing is delivered.
    FailBroadcast,
}

impl Default for CacheFailurePolicy {
    fn default() -> Self {
        CacheFailurePolicy::DeliverLive
    }
}

/// Which broadcasts are written to the replay cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Every broadcast that survives the canonical fold.
    All,
    /// Only broadcasts that found no attached subscriber. Subscribers that
    /// were attached at broadcast time do not get the message again on
    /// reattach.
    WhenUnattended,
}

impl Default for CacheMode {
    fn default() -> Self {
        CacheMode::All
    }
}

/// Ordered store of canonical envelopes for one broadcaster.
///
/// The owning broadcaster is the only writer and appends in strictly
/// increasing sequence order. Queries may run concurrently with appends and
/// must return a gap-free prefix-consistent range.
pub trait BroadcasterCache: Send + Sync {
    fn append(&self, envelope: Arc<Envelope>) -> std::result::Result<(), CacheError>;

    /// Retained envelopes at or after `bound`, oldest first.
    fn query(&self, bound: ReplayBound) -> Vec<Arc<Envelope>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&self);
}
