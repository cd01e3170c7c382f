//! # Herald
//!
//! A broadcast engine for long-lived client sessions that may disconnect and
//! later reattach.
//!
//! ## Core Concepts
//!
//! - **Broadcasters**: One per identity; own the attached subscribers, the
//!   filter pipeline and the replay cache
//! - **Filters**: Ordered transforms applied to every broadcast; some can
//!   specialize a message per subscriber
//! - **Replay cache**: Canonical messages retained so a subscriber attaching
//!   later still receives what it missed
//! - **Sink**: The transport-side consumer that receives delivered payloads
//!
//! ## Example
//!
//! ```ignore
//! use herald::{BroadcasterRegistry, ChannelSink, FilterAction, FnFilter, RegistryConfig,
//!     Subscriber, SubscriberId};
//!
//! let (sink, deliveries) = ChannelSink::channel();
//! let registry = BroadcasterRegistry::new(RegistryConfig::default(), Arc::new(sink))?;
//!
//! let chat = registry.get_or_create("chat")?;
//! chat.add_filter(FnFilter::new("trim", |_, message| {
//!     Ok(FilterAction::Continue(message.to_string().trim().into()))
//! }));
//!
//! chat.add_subscriber(Subscriber::new(SubscriberId(1)))?.wait();
//! let result = chat.broadcast("  hello  ")?.wait();
//! assert_eq!(result.delivered, 1);
//! ```

pub mod broadcaster;
pub mod cache;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod registry;
pub mod sink;
pub mod types;

// Re-exports
pub use broadcaster::{Broadcaster, BroadcasterConfig};
pub use cache::{BroadcasterCache, CacheConfig, CacheFailurePolicy, CacheMode, MemoryCache};
pub use dispatch::{DeliveryHandle, DeliveryResult, DispatchConfig, Dispatcher};
pub use error::{CacheError, FilterError, HeraldError, Result, SinkError};
pub use filter::{
    BroadcastFilter, Canonical, FilterAction, FilterFailure, FilterPipeline, FilterResult,
    FnFilter, PipelineSnapshot, SubscriberFilter, SubscriberOutcome, TrackMessageSize,
    TRACK_MESSAGE_SIZE,
};
pub use registry::{BroadcasterRegistry, LifecyclePolicy, RegistryConfig};
pub use sink::{ChannelSink, Delivery, DeliveryError, Sink};
pub use types::*;
