//! Registry of broadcasters keyed by identity.

use crate::broadcaster::{Broadcaster, BroadcasterConfig};
use crate::dispatch::{DispatchConfig, Dispatcher};
use crate::error::Result;
use crate::sink::Sink;
use crate::types::BroadcasterId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// When an unused broadcaster is reclaimed by [`BroadcasterRegistry::reap`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePolicy {
    /// Broadcasters live until removed explicitly.
    Never,
    /// Reclaim as soon as no subscriber is attached.
    Empty,
    /// Reclaim once no subscriber is attached and nothing happened for this long.
    Idle(Duration),
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        LifecyclePolicy::Never
    }
}

impl LifecyclePolicy {
    fn is_reclaimable(&self, broadcaster: &Broadcaster) -> bool {
        match *self {
            LifecyclePolicy::Never => false,
            LifecyclePolicy::Empty => broadcaster.subscriber_count() == 0,
            LifecyclePolicy::Idle(timeout) => {
                broadcaster.subscriber_count() == 0 && broadcaster.idle_for() >= timeout
            }
        }
    }
}

/// Registry configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Config applied to every broadcaster the registry creates.
    pub broadcaster: BroadcasterConfig,

    /// Delivery worker pool shared by all broadcasters.
    pub dispatch: DispatchConfig,

    pub lifecycle: LifecyclePolicy,
}

impl RegistryConfig {
    pub fn validate(&self) -> Result<()> {
        self.broadcaster.validate()?;
        self.dispatch.validate()
    }

    /// Parse a JSON config document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: RegistryConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

/// Owns every broadcaster of a process, at most one per identity.
///
/// Broadcasters are created on first lookup and share one sink and one
/// delivery worker pool.
pub struct BroadcasterRegistry {
    config: RegistryConfig,
    sink: Arc<dyn Sink>,
    dispatcher: Arc<Dispatcher>,
    broadcasters: RwLock<HashMap<BroadcasterId, Arc<Broadcaster>>>,
}

impl BroadcasterRegistry {
    pub fn new(config: RegistryConfig, sink: Arc<dyn Sink>) -> Result<Self> {
        config.validate()?;
        let dispatcher = Arc::new(Dispatcher::new(config.dispatch.clone())?);

        Ok(Self {
            config,
            sink,
            dispatcher,
            broadcasters: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// The broadcaster for `id`, created if it does not exist yet.
    pub fn get_or_create(&self, id: &str) -> Result<Arc<Broadcaster>> {
        if let Some(existing) = self.lookup(id) {
            return Ok(existing);
        }

        let mut broadcasters = self.broadcasters.write();
        if let Some(existing) = broadcasters.get(id) {
            return Ok(Arc::clone(existing));
        }

        let broadcaster = Arc::new(Broadcaster::with_dispatcher(
            id,
            self.config.broadcaster.clone(),
            Arc::clone(&self.sink),
            Arc::clone(&self.dispatcher),
        )?);
        broadcasters.insert(broadcaster.id().clone(), Arc::clone(&broadcaster));
        debug!(broadcaster = %id, "broadcaster created");

        Ok(broadcaster)
    }

    /// The broadcaster for `id`, if it exists.
    pub fn lookup(&self, id: &str) -> Option<Arc<Broadcaster>> {
        self.broadcasters.read().get(id).cloned()
    }

    /// Remove and destroy the broadcaster for `id`.
    pub fn remove(&self, id: &str) -> Option<Arc<Broadcaster>> {
        let removed = self.broadcasters.write().remove(id);
        if let Some(broadcaster) = &removed {
            broadcaster.destroy();
        }
        removed
    }

    /// Destroy every broadcaster the lifecycle policy considers unused.
    /// Returns the reclaimed identities.
    pub fn reap(&self) -> Vec<BroadcasterId> {
        let policy = self.config.lifecycle;
        let mut reclaimed = Vec::new();

        self.broadcasters.write().retain(|id, broadcaster| {
            if policy.is_reclaimable(broadcaster) {
                broadcaster.destroy();
                reclaimed.push(id.clone());
                false
            } else {
                true
            }
        });

        if !reclaimed.is_empty() {
            debug!(count = reclaimed.len(), "reclaimed idle broadcasters");
        }
        reclaimed.sort();
        reclaimed
    }

    pub fn len(&self) -> usize {
        self.broadcasters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<BroadcasterId> {
        let mut ids: Vec<_> = self.broadcasters.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Destroy every broadcaster and stop the delivery workers.
    pub fn shutdown(&self) {
        let drained: Vec<_> = self.broadcasters.write().drain().collect();
        for (_, broadcaster) in drained {
            broadcaster.destroy();
        }
        self.dispatcher.shutdown();
    }
}
