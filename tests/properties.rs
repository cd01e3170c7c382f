//! Property tests for ordering and fold determinism.

use herald::{
    Broadcaster, BroadcasterConfig, CacheConfig, ChannelSink, DispatchConfig, Dispatcher,
    FilterAction, FnFilter, Subscriber, SubscriberId,
};
use proptest::prelude::*;
use std::sync::Arc;

fn broadcaster() -> (Broadcaster, crossbeam_channel::Receiver<herald::Delivery>) {
    let (sink, deliveries) = ChannelSink::channel();
    let dispatcher = Arc::new(
        Dispatcher::new(DispatchConfig {
            workers: 2,
            queue_capacity: 64,
        })
        .unwrap(),
    );
    let config = BroadcasterConfig {
        cache: CacheConfig {
            max_entries: None,
            max_age: None,
        },
        ..Default::default()
    };
    let broadcaster =
        Broadcaster::with_dispatcher("prop", config, Arc::new(sink), dispatcher).unwrap();
    (broadcaster, deliveries)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_attached_subscriber_sees_broadcast_order(
        messages in prop::collection::vec("[a-z]{0,8}", 1..40)
    ) {
        let (broadcaster, deliveries) = broadcaster();
        broadcaster.add_subscriber(Subscriber::new(SubscriberId(1))).unwrap().wait();

        for message in &messages {
            broadcaster.broadcast(message.as_str()).unwrap().wait();
        }

        let received: Vec<String> = deliveries
            .try_iter()
            .map(|d| d.message.to_string())
            .collect();
        prop_assert_eq!(received, messages);
    }

    #[test]
    fn prop_plain_filters_deliver_canonical_to_everyone(
        suffixes in prop::collection::vec("[0-9]{1,3}", 0..6),
        subscribers in 1u64..6,
    ) {
        let (broadcaster, deliveries) = broadcaster();
        for id in 0..subscribers {
            broadcaster.add_subscriber(Subscriber::new(SubscriberId(id))).unwrap().wait();
        }
        for suffix in &suffixes {
            let suffix = suffix.clone();
            broadcaster.add_filter(FnFilter::new(suffix.clone(), move |_, message| {
                Ok(FilterAction::Continue(message.concat(&suffix)))
            }));
        }

        let result = broadcaster.broadcast("m").unwrap().wait();
        prop_assert_eq!(result.delivered as u64, subscribers);

        let canonical = format!("m{}", suffixes.concat());
        for delivery in deliveries.try_iter() {
            prop_assert_eq!(delivery.message.to_string(), canonical.clone());
        }
    }

    #[test]
    fn prop_replay_matches_history(
        messages in prop::collection::vec("[a-z]{1,4}", 0..20),
        reattaches in 1usize..4,
    ) {
        let (broadcaster, deliveries) = broadcaster();
        for message in &messages {
            broadcaster.broadcast(message.as_str()).unwrap().wait();
        }

        for _ in 0..reattaches {
            broadcaster.add_subscriber(Subscriber::new(SubscriberId(1))).unwrap().wait();
            broadcaster.remove_subscriber(SubscriberId(1));
        }

        let received: Vec<String> = deliveries
            .try_iter()
            .map(|d| d.message.to_string())
            .collect();
        let expected: Vec<String> = std::iter::repeat(messages.clone())
            .take(reattaches)
            .flatten()
            .collect();
        prop_assert_eq!(received, expected);
    }
}
