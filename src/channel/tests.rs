use super::*;
use std::time::Duration;
use tokio::sync::mpsc;

fn subscriber() -> (Subscriber, mpsc::Receiver<Outbound>) {
    subscriber_with_capacity(16)
}

fn subscriber_with_capacity(capacity: usize) -> (Subscriber, mpsc::Receiver<Outbound>) {
    let (tx, rx) = mpsc::channel(capacity);
    (Subscriber::new(ConnectionId::new(), tx), rx)
}

async fn has_overflowed(subscriber: &Subscriber) -> bool {
    tokio::time::timeout(Duration::from_millis(50), subscriber.overflowed())
        .await
        .is_ok()
}

#[test]
fn test_first_listener_creates_channel() {
    let manager = InMemoryChannelManager::new();
    let (sub, _rx) = subscriber();

    assert_eq!(manager.channel_count(), 0);
    let id = manager.add_listener(sub, "room1");

    assert_eq!(id, 1);
    assert_eq!(manager.channel_count(), 1);
    assert_eq!(manager.subscriber_count("room1"), 1);
}

#[test]
fn test_subscriber_ids_increase_per_channel() {
    let manager = InMemoryChannelManager::new();
    let (a, _ra) = subscriber();
    let (b, _rb) = subscriber();
    let (c, _rc) = subscriber();

    assert_eq!(manager.add_listener(a, "room1"), 1);
    assert_eq!(manager.add_listener(b, "room1"), 2);
    // Separate channel has its own sequence
    assert_eq!(manager.add_listener(c, "room2"), 1);
}

#[test]
fn test_ids_do_not_collide_after_churn() {
    let manager = InMemoryChannelManager::new();
    let (a, _ra) = subscriber();
    let (b, _rb) = subscriber();
    let (c, _rc) = subscriber();
    let a_id = a.id;

    let first = manager.add_listener(a, "room1");
    let second = manager.add_listener(b, "room1");
    manager.remove_listener(a_id, "room1");
    let third = manager.add_listener(c, "room1");

    assert_eq!(manager.subscriber_count("room1"), 2);
    assert_ne!(third, second);
    assert_ne!(third, first);
}

#[test]
fn test_last_remove_deletes_channel() {
    let manager = InMemoryChannelManager::new();
    let (a, _ra) = subscriber();
    let (b, _rb) = subscriber();
    let (a_id, b_id) = (a.id, b.id);

    manager.add_listener(a, "room1");
    manager.add_listener(b, "room1");

    manager.remove_listener(a_id, "room1");
    assert_eq!(manager.channel_count(), 1);

    manager.remove_listener(b_id, "room1");
    assert_eq!(manager.channel_count(), 0);
    assert_eq!(manager.subscriber_count("room1"), 0);
}

#[test]
fn test_interleaved_add_remove_matches_membership() {
    let manager = InMemoryChannelManager::new();
    let subs: Vec<_> = (0..6).map(|_| subscriber()).collect();
    let ids: Vec<ConnectionId> = subs.iter().map(|(s, _)| s.id).collect();

    for (sub, _) in &subs {
        manager.add_listener(sub.clone(), "room1");
    }
    manager.remove_listener(ids[0], "room1");
    manager.remove_listener(ids[3], "room1");
    // Removing twice is harmless
    manager.remove_listener(ids[3], "room1");
    manager.add_listener(subs[0].0.clone(), "room1");

    assert_eq!(manager.subscriber_count("room1"), 5);

    for id in &ids {
        manager.remove_listener(*id, "room1");
    }
    assert_eq!(manager.channel_count(), 0);
}

#[test]
fn test_remove_on_unknown_channel_is_noop() {
    let manager = InMemoryChannelManager::new();
    manager.remove_listener(ConnectionId::new(), "nowhere");
    assert_eq!(manager.channel_count(), 0);
}

#[test]
fn test_post_reaches_every_subscriber() {
    let manager = InMemoryChannelManager::new();
    let (a, mut ra) = subscriber();
    let (b, mut rb) = subscriber();
    let (other, mut rother) = subscriber();

    manager.add_listener(a, "room1");
    manager.add_listener(b, "room1");
    manager.add_listener(other, "room2");

    manager.post("room1", "hello");

    assert_eq!(ra.try_recv().unwrap(), Outbound::Text("hello".to_string()));
    assert_eq!(rb.try_recv().unwrap(), Outbound::Text("hello".to_string()));
    assert!(rother.try_recv().is_err());
}

#[test]
fn test_post_to_empty_channel_is_noop() {
    let manager = InMemoryChannelManager::new();
    manager.post("ghost", "hello");
    assert_eq!(manager.channel_count(), 0);
}

#[test]
fn test_post_skips_closed_subscriber() {
    let manager = InMemoryChannelManager::new();
    let (a, ra) = subscriber();
    let (b, mut rb) = subscriber();

    manager.add_listener(a, "room1");
    manager.add_listener(b, "room1");
    drop(ra);

    manager.post("room1", "still here");
    assert_eq!(rb.try_recv().unwrap(), Outbound::Text("still here".to_string()));
}

#[test]
fn test_no_delivery_after_remove() {
    let manager = InMemoryChannelManager::new();
    let (a, mut ra) = subscriber();
    let a_id = a.id;

    manager.add_listener(a, "room1");
    manager.remove_listener(a_id, "room1");
    manager.post("room1", "late");

    assert!(ra.try_recv().is_err());
}

#[tokio::test]
async fn test_full_queue_flags_only_the_slow_subscriber() {
    let manager = InMemoryChannelManager::new();
    let (slow, mut slow_rx) = subscriber_with_capacity(1);
    let (fast, mut fast_rx) = subscriber_with_capacity(8);

    manager.add_listener(slow.clone(), "room1");
    manager.add_listener(fast.clone(), "room1");

    manager.post("room1", "one");
    manager.post("room1", "two");

    assert!(has_overflowed(&slow).await);
    assert!(!has_overflowed(&fast).await);

    // The slow subscriber keeps what fit; nothing queues past the limit
    assert_eq!(slow_rx.try_recv().unwrap(), Outbound::Text("one".to_string()));
    assert!(slow_rx.try_recv().is_err());

    assert_eq!(fast_rx.try_recv().unwrap(), Outbound::Text("one".to_string()));
    assert_eq!(fast_rx.try_recv().unwrap(), Outbound::Text("two".to_string()));
}

#[tokio::test]
async fn test_send_reports_full_queue() {
    let (sub, _rx) = subscriber_with_capacity(1);

    assert!(sub.send("fits"));
    assert!(!sub.send("overflows"));
    assert!(has_overflowed(&sub).await);
}
