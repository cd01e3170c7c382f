//! Registry lifecycle and broadcasters sharing one worker pool.

use herald::{
    BroadcasterRegistry, ChannelSink, HeraldError, LifecyclePolicy, RegistryConfig, Subscriber,
    SubscriberId,
};
use std::sync::Arc;
use std::thread;

/// Route engine logs to the test harness output.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn test_registry(
    lifecycle: LifecyclePolicy,
) -> (BroadcasterRegistry, crossbeam_channel::Receiver<herald::Delivery>) {
    init_tracing();
    let (sink, deliveries) = ChannelSink::channel();
    let registry = BroadcasterRegistry::new(
        RegistryConfig {
            lifecycle,
            ..Default::default()
        },
        Arc::new(sink),
    )
    .unwrap();
    (registry, deliveries)
}

#[test]
fn test_broadcasters_are_independent() {
    let (registry, deliveries) = test_registry(LifecyclePolicy::Never);

    let chat = registry.get_or_create("chat").unwrap();
    let news = registry.get_or_create("news").unwrap();
    chat.add_subscriber(Subscriber::new(SubscriberId(1)))
        .unwrap()
        .wait();
    news.add_subscriber(Subscriber::new(SubscriberId(2)))
        .unwrap()
        .wait();

    chat.broadcast("hello").unwrap().wait();

    let received: Vec<_> = deliveries.try_iter().collect();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].subscriber, SubscriberId(1));
    assert_eq!(news.cached_len(), 0);
}

#[test]
fn test_concurrent_get_or_create_yields_one_instance() {
    let (registry, _deliveries) = test_registry(LifecyclePolicy::Never);
    let registry = Arc::new(registry);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.get_or_create("shared").unwrap())
        })
        .collect();

    let instances: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for instance in &instances[1..] {
        assert!(Arc::ptr_eq(&instances[0], instance));
    }
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_reaped_broadcaster_refuses_work() {
    let (registry, _deliveries) = test_registry(LifecyclePolicy::Empty);
    let chat = registry.get_or_create("chat").unwrap();
    chat.broadcast("cached").unwrap().wait();

    registry.reap();

    assert!(matches!(chat.broadcast("late"), Err(HeraldError::Destroyed(_))));
    assert!(registry.lookup("chat").is_none());
}

#[test]
fn test_detached_broadcaster_becomes_reclaimable() {
    let (registry, _deliveries) = test_registry(LifecyclePolicy::Empty);
    let chat = registry.get_or_create("chat").unwrap();
    chat.add_subscriber(Subscriber::new(SubscriberId(1)))
        .unwrap()
        .wait();

    assert!(registry.reap().is_empty());

    chat.remove_subscriber(SubscriberId(1));
    assert_eq!(registry.reap().len(), 1);
    assert!(registry.is_empty());
}

#[test]
fn test_shutdown() {
    let (registry, _deliveries) = test_registry(LifecyclePolicy::Never);
    let chat = registry.get_or_create("chat").unwrap();

    registry.shutdown();

    assert!(chat.is_destroyed());
    assert!(registry.is_empty());
}
