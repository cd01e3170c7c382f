//! Core types for the broadcast engine.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::borrow::{Borrow, Cow};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Identity of a broadcaster.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BroadcasterId(String);

impl BroadcasterId {
    pub fn new(id: impl Into<String>) -> Self {
        BroadcasterId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BroadcasterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BroadcasterId({})", self.0)
    }
}

impl fmt::Display for BroadcasterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for BroadcasterId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BroadcasterId {
    fn from(id: &str) -> Self {
        BroadcasterId(id.to_string())
    }
}

impl From<String> for BroadcasterId {
    fn from(id: String) -> Self {
        BroadcasterId(id)
    }
}

/// Unique identifier for an attached client session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriberId(pub u64);

impl fmt::Debug for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriberId({})", self.0)
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a broadcast within its broadcaster. The first broadcast is `Seq(1)`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Sequence(pub u64);

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seq({})", self.0)
    }
}

impl Sequence {
    pub fn next(self) -> Self {
        Sequence(self.0 + 1)
    }

    pub fn prev(self) -> Option<Self> {
        if self.0 > 0 {
            Some(Sequence(self.0 - 1))
        } else {
            None
        }
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        Timestamp(micros)
    }

    /// This timestamp moved back by `duration`, saturating.
    pub fn saturating_sub(self, duration: Duration) -> Self {
        let micros = i64::try_from(duration.as_micros()).unwrap_or(i64::MAX);
        Timestamp(self.0.saturating_sub(micros))
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Message body carried through the pipeline.
///
/// Cloning is cheap: the bytes are shared. Text and JSON payloads are plain
/// byte payloads with helpers on top.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Payload(Arc<[u8]>);

impl Payload {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Payload(Arc::from(bytes.into()))
    }

    /// Encode a structured value as a JSON payload.
    pub fn json(value: &impl Serialize) -> Result<Self, serde_json::Error> {
        Ok(Payload::new(serde_json::to_vec(value)?))
    }

    /// Decode a JSON payload.
    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The payload as text, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A new payload with `suffix` appended.
    pub fn concat(&self, suffix: impl AsRef<[u8]>) -> Self {
        let suffix = suffix.as_ref();
        let mut bytes = Vec::with_capacity(self.0.len() + suffix.len());
        bytes.extend_from_slice(&self.0);
        bytes.extend_from_slice(suffix);
        Payload::new(bytes)
    }

    /// True if both payloads share the same allocation.
    pub fn ptr_eq(&self, other: &Payload) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(text) => write!(f, "Payload({:?})", text),
            None => write!(f, "Payload({} bytes)", self.0.len()),
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

impl AsRef<[u8]> for Payload {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::new(text.as_bytes())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::new(text.into_bytes())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::new(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Payload::new(bytes)
    }
}

/// Lower bound for a replay query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayBound {
    /// Everything still retained.
    Beginning,
    /// Entries created at or after this time.
    Since(Timestamp),
    /// Entries at or after this sequence.
    FromSequence(Sequence),
}

impl Default for ReplayBound {
    fn default() -> Self {
        ReplayBound::Beginning
    }
}

/// Handle for one attached client session.
///
/// Owned by the transport layer; a broadcaster only keeps it while the
/// session is attached. Attributes are read-only request metadata that
/// subscriber-aware filters may inspect.
#[derive(Clone, Debug)]
pub struct Subscriber {
    id: SubscriberId,
    attributes: Arc<HashMap<String, String>>,
    replay_bound: ReplayBound,
}

impl Subscriber {
    pub fn new(id: SubscriberId) -> Self {
        Self {
            id,
            attributes: Arc::new(HashMap::new()),
            replay_bound: ReplayBound::Beginning,
        }
    }

    /// Attach a request attribute (e.g. a header the transport parsed).
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.attributes).insert(key.into(), value.into());
        self
    }

    /// Limit replay on attach to entries at or after `bound`.
    pub fn with_replay_bound(mut self, bound: ReplayBound) -> Self {
        self.replay_bound = bound;
        self
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn replay_bound(&self) -> ReplayBound {
        self.replay_bound
    }
}

/// A broadcast message as it is cached.
///
/// `message` is the canonical (fully filtered) payload; `original` is the raw
/// payload the publisher handed in, kept so subscriber-aware filters can be
/// re-run on replay.
#[derive(Clone, Debug)]
pub struct Envelope {
    pub broadcaster: BroadcasterId,
    pub sequence: Sequence,
    pub timestamp: Timestamp,
    pub original: Payload,
    pub message: Payload,
}

impl Envelope {
    pub fn summary(&self) -> EnvelopeSummary {
        EnvelopeSummary {
            broadcaster: self.broadcaster.clone(),
            sequence: self.sequence,
            timestamp: self.timestamp.0,
            original_size: self.original.len(),
            message_size: self.message.len(),
        }
    }
}

/// Summary of an envelope (for logs and collaborators, omits the payloads).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnvelopeSummary {
    pub broadcaster: BroadcasterId,
    pub sequence: Sequence,
    pub timestamp: i64,
    pub original_size: usize,
    pub message_size: usize,
}
