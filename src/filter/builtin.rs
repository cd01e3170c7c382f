//! Ready-made filters.

use super::{BroadcastFilter, FilterAction, FilterResult, SubscriberFilter};
use crate::types::{Payload, Subscriber};

type GenericFn = dyn Fn(&Payload, &Payload) -> FilterResult + Send + Sync;
type SubscriberFn = dyn Fn(&Subscriber, &Payload, &Payload) -> FilterResult + Send + Sync;

/// Filter built from closures.
///
/// ```ignore
/// let shout = FnFilter::new("shout", |_, message| {
///     Ok(FilterAction::Continue(message.to_string().to_uppercase().into()))
/// });
/// ```
pub struct FnFilter {
    name: String,
    generic: Box<GenericFn>,
    per_subscriber: Option<Box<SubscriberFn>>,
}

impl FnFilter {
    pub fn new<F>(name: impl Into<String>, generic: F) -> Self
    where
        F: Fn(&Payload, &Payload) -> FilterResult + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            generic: Box::new(generic),
            per_subscriber: None,
        }
    }

    /// Give this filter a subscriber-aware capability.
    pub fn with_subscriber<F>(mut self, per_subscriber: F) -> Self
    where
        F: Fn(&Subscriber, &Payload, &Payload) -> FilterResult + Send + Sync + 'static,
    {
        self.per_subscriber = Some(Box::new(per_subscriber));
        self
    }
}

impl BroadcastFilter for FnFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn filter(&self, original: &Payload, message: &Payload) -> FilterResult {
        (self.generic)(original, message)
    }

    fn as_subscriber_filter(&self) -> Option<&dyn SubscriberFilter> {
        match self.per_subscriber {
            Some(_) => Some(self),
            None => None,
        }
    }
}

impl SubscriberFilter for FnFilter {
    fn filter_for(
        &self,
        subscriber: &Subscriber,
        original: &Payload,
        message: &Payload,
    ) -> FilterResult {
        match &self.per_subscriber {
            Some(f) => f(subscriber, original, message),
            None => Ok(FilterAction::Abstain),
        }
    }
}

/// Attribute a subscriber sets to ask for size-prefixed messages.
pub const TRACK_MESSAGE_SIZE: &str = "track-message-size";

/// Prefixes each message with its length and a delimiter (`"3|abc"`) so a
/// client reading a stream can split messages that arrive glued together.
///
/// Only subscribers carrying the [`TRACK_MESSAGE_SIZE`] attribute set to
/// `"true"` are affected unless built with [`TrackMessageSize::always`]. The
/// canonical message is never prefixed.
#[derive(Clone, Debug)]
pub struct TrackMessageSize {
    delimiter: char,
    always: bool,
}

impl TrackMessageSize {
    pub fn new() -> Self {
        Self {
            delimiter: '|',
            always: false,
        }
    }

    /// Prefix for every subscriber regardless of its attributes.
    pub fn always() -> Self {
        Self {
            delimiter: '|',
            always: true,
        }
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    fn applies_to(&self, subscriber: &Subscriber) -> bool {
        self.always || subscriber.attribute(TRACK_MESSAGE_SIZE) == Some("true")
    }
}

impl Default for TrackMessageSize {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastFilter for TrackMessageSize {
    fn name(&self) -> &str {
        "track-message-size"
    }

    fn filter(&self, _original: &Payload, _message: &Payload) -> FilterResult {
        Ok(FilterAction::Abstain)
    }

    fn as_subscriber_filter(&self) -> Option<&dyn SubscriberFilter> {
        Some(self)
    }
}

impl SubscriberFilter for TrackMessageSize {
    fn filter_for(
        &self,
        subscriber: &Subscriber,
        _original: &Payload,
        message: &Payload,
    ) -> FilterResult {
        if !self.applies_to(subscriber) {
            return Ok(FilterAction::Abstain);
        }

        // Text is measured in characters, anything else in bytes.
        let length = match message.as_str() {
            Some(text) => text.chars().count(),
            None => message.len(),
        };

        let mut prefixed = format!("{}{}", length, self.delimiter).into_bytes();
        prefixed.extend_from_slice(message.as_bytes());
        Ok(FilterAction::Continue(Payload::new(prefixed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SubscriberId;

    #[test]
    fn test_fn_filter_capabilities() {
        let plain = FnFilter::new("plain", |_, m| Ok(FilterAction::Continue(m.concat("1"))));
        assert_eq!(plain.name(), "plain");
        assert!(plain.as_subscriber_filter().is_none());

        let aware = FnFilter::new("aware", |_, _| Ok(FilterAction::Abstain))
            .with_subscriber(|s, _, m| Ok(FilterAction::Continue(m.concat(s.id().to_string()))));
        let capability = aware.as_subscriber_filter().unwrap();

        let result = capability
            .filter_for(&Subscriber::new(SubscriberId(9)), &"0".into(), &"0".into())
            .unwrap();
        assert_eq!(result, FilterAction::Continue(Payload::from("09")));
    }

    #[test]
    fn test_track_message_size_only_when_requested() {
        let filter = TrackMessageSize::new();
        let message = Payload::from("XXX");

        let plain = Subscriber::new(SubscriberId(1));
        assert_eq!(
            filter.filter_for(&plain, &message, &message).unwrap(),
            FilterAction::Abstain
        );

        let tracking = Subscriber::new(SubscriberId(2)).with_attribute(TRACK_MESSAGE_SIZE, "true");
        assert_eq!(
            filter.filter_for(&tracking, &message, &message).unwrap(),
            FilterAction::Continue(Payload::from("3|XXX"))
        );

        assert_eq!(filter.filter(&message, &message).unwrap(), FilterAction::Abstain);
    }

    #[test]
    fn test_track_message_size_counts_characters() {
        let filter = TrackMessageSize::always().with_delimiter('#');
        let message = Payload::from("héllo");
        let subscriber = Subscriber::new(SubscriberId(1));

        assert_eq!(
            filter.filter_for(&subscriber, &message, &message).unwrap(),
            FilterAction::Continue(Payload::from("5#héllo"))
        );
    }
}
