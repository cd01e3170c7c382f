//! The consumer of delivered messages.
//!
//! A sink is what turns a delivered payload into something on the wire for
//! one subscriber. The engine only calls it; framing and transport belong to
//! the sink implementation.

use crate::error::SinkError;
use crate::filter::FilterFailure;
use crate::types::{Payload, Subscriber, SubscriberId};
use crossbeam_channel::{unbounded, Receiver, Sender};
use thiserror::Error;

/// Why a message could not be delivered to one subscriber.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DeliveryError {
    /// The sink refused the message.
    #[error("Sink rejected message: {0}")]
    Rejected(#[from] SinkError),

    /// A subscriber-aware filter failed while specializing the message.
    #[error(transparent)]
    Filter(#[from] FilterFailure),

    /// The subscriber's delivery queue was full; the message was dropped for it.
    #[error("Delivery queue full")]
    QueueFull,

    /// The delivery workers were shut down before the message was queued.
    #[error("Delivery dispatcher is shut down")]
    DispatcherClosed,
}

/// Receives delivered messages, one subscriber at a time.
///
/// Calls for the same subscriber are made in broadcast order, never
/// concurrently. Calls for different subscribers may run in parallel.
pub trait Sink: Send + Sync {
    fn on_message(&self, subscriber: &Subscriber, message: &Payload) -> Result<(), SinkError>;

    /// Called when delivery to `subscriber` failed. Other subscribers are
    /// unaffected. Queueing failures are reported from the publishing thread
    /// once the broadcast has been handed off.
    fn on_error(&self, _subscriber: &Subscriber, _error: &DeliveryError) {}
}

/// A message handed to a [`ChannelSink`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub subscriber: SubscriberId,
    pub message: Payload,
}

/// Sink that forwards every delivery into a crossbeam channel.
pub struct ChannelSink {
    sender: Sender<Delivery>,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its channel.
    pub fn channel() -> (Self, Receiver<Delivery>) {
        let (sender, receiver) = unbounded();
        (Self { sender }, receiver)
    }
}

impl Sink for ChannelSink {
    fn on_message(&self, subscriber: &Subscriber, message: &Payload) -> Result<(), SinkError> {
        self.sender
            .send(Delivery {
                subscriber: subscriber.id(),
                message: message.clone(),
            })
            .map_err(|_| SinkError::new("receiver disconnected"))
    }
}
