//! In-process replay cache.

use super::{BroadcasterCache, CacheConfig};
use crate::error::CacheError;
use crate::types::{Envelope, ReplayBound, Timestamp};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Bounded, time-indexed in-memory cache.
///
/// Entries are kept in sequence order (timestamps are non-decreasing with
/// sequence), so both sequence and time bounds resolve with a binary search.
pub struct MemoryCache {
    config: CacheConfig,
    entries: RwLock<VecDeque<Arc<Envelope>>>,
    /// Envelopes dropped by retention so far.
    evicted: AtomicU64,
}

impl MemoryCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(VecDeque::new()),
            evicted: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Number of envelopes dropped by retention since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Drop entries older than `max_age` relative to `now`.
    pub fn evict_expired(&self, now: Timestamp) -> usize {
        let Some(cutoff) = self.age_cutoff(now) else {
            return 0;
        };
        let mut entries = self.entries.write();
        let expired = entries.partition_point(|e| e.timestamp < cutoff);
        entries.drain(..expired);
        self.evicted.fetch_add(expired as u64, Ordering::Relaxed);
        expired
    }

    fn age_cutoff(&self, now: Timestamp) -> Option<Timestamp> {
        self.config.max_age.map(|age| now.saturating_sub(age))
    }

    fn enforce_count(&self, entries: &mut VecDeque<Arc<Envelope>>) {
        let Some(max) = self.config.max_entries else {
            return;
        };
        let excess = entries.len().saturating_sub(max);
        if excess > 0 {
            entries.drain(..excess);
            self.evicted.fetch_add(excess as u64, Ordering::Relaxed);
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl BroadcasterCache for MemoryCache {
    fn append(&self, envelope: Arc<Envelope>) -> Result<(), CacheError> {
        let mut entries = self.entries.write();

        if let Some(last) = entries.back() {
            if envelope.sequence <= last.sequence {
                return Err(CacheError::OutOfOrder {
                    last: last.sequence,
                    got: envelope.sequence,
                });
            }
        }

        let now = envelope.timestamp;
        entries.push_back(envelope);
        self.enforce_count(&mut entries);

        if let Some(cutoff) = self.age_cutoff(now) {
            let expired = entries.partition_point(|e| e.timestamp < cutoff);
            entries.drain(..expired);
            self.evicted.fetch_add(expired as u64, Ordering::Relaxed);
        }

        Ok(())
    }

    fn query(&self, bound: ReplayBound) -> Vec<Arc<Envelope>> {
        let entries = self.entries.read();

        let mut start = match bound {
            ReplayBound::Beginning => 0,
            ReplayBound::Since(ts) => entries.partition_point(|e| e.timestamp < ts),
            ReplayBound::FromSequence(seq) => entries.partition_point(|e| e.sequence < seq),
        };

        // Expired entries not yet evicted are never replayed.
        if let Some(cutoff) = self.age_cutoff(Timestamp::now()) {
            start = start.max(entries.partition_point(|e| e.timestamp < cutoff));
        }

        entries.range(start..).cloned().collect()
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }

    fn clear(&self) {
        self.entries.write().clear();
    }
}
