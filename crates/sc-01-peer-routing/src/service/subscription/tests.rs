use std::sync::Arc;

use super::*;
use crate::domain::{predicates, ConsumerId, HookKey, SubscriptionError};
use crate::service::{Consumer, Peer};
use crate::test_utils::{addr, ping, pong, RecordingConsumer};
use shared_types::MsgKind;

fn registry() -> Subscriptions<&'static str> {
    Subscriptions::new("test-owner")
}

// =============================================================================
// TEST GROUP 1: Add and produce
// =============================================================================

#[tokio::test]
async fn test_produce_reaches_matching_consumers() {
    let subs = registry();
    let origin = Peer::new(addr(5));
    let pings = RecordingConsumer::new();
    let all = RecordingConsumer::new();
    subs.add(predicates::is_kind(MsgKind::Ping), pings.clone())
        .unwrap();
    subs.add(predicates::any(), all.clone()).unwrap();

    assert_eq!(subs.produce(&ping(1), &origin).await, 2);
    assert_eq!(subs.produce(&pong(2), &origin).await, 1);

    assert_eq!(pings.received(), vec![(addr(5), ping(1))]);
    assert_eq!(all.received(), vec![(addr(5), ping(1)), (addr(5), pong(2))]);
}

#[tokio::test]
async fn test_produce_without_match_returns_zero() {
    let subs = registry();
    let origin = Peer::new(addr(5));
    let consumer = RecordingConsumer::new();
    subs.add(predicates::is_kind(MsgKind::Pong), consumer.clone())
        .unwrap();

    assert_eq!(subs.produce(&ping(1), &origin).await, 0);
    assert!(consumer.received().is_empty());
}

#[test]
#[should_panic(expected = "subscribed twice")]
fn test_duplicate_consumer_panics() {
    let subs = registry();
    let consumer = RecordingConsumer::new();
    subs.add(predicates::any(), consumer.clone()).unwrap();
    let _ = subs.add(predicates::any(), consumer);
}

// =============================================================================
// TEST GROUP 2: Removal
// =============================================================================

#[test]
fn test_delete_removes_entry() {
    let subs = registry();
    let consumer = RecordingConsumer::new();
    subs.add(predicates::any(), consumer.clone()).unwrap();
    assert!(subs.contains(consumer.id()));

    subs.delete(consumer.id());
    assert!(subs.is_empty());
}

#[test]
#[should_panic(expected = "is not subscribed to test-owner")]
fn test_delete_unknown_consumer_panics() {
    let subs = registry();
    subs.delete(RecordingConsumer::new().id());
}

#[test]
fn test_consumer_close_removes_entry() {
    let subs = registry();
    let consumer = RecordingConsumer::new();
    let other = RecordingConsumer::new();
    subs.add(predicates::any(), consumer.clone()).unwrap();
    subs.add(predicates::any(), other.clone()).unwrap();

    consumer.close();
    assert_eq!(subs.len(), 1);
    assert!(subs.contains(other.id()));
}

#[test]
fn test_closed_consumer_never_stays() {
    let subs = registry();
    let consumer = RecordingConsumer::new();
    consumer.close();

    subs.add(predicates::any(), consumer.clone()).unwrap();
    assert!(subs.is_empty());
}

#[test]
fn test_resubscribing_does_not_pile_up_close_hooks() {
    let subs = registry();
    let consumer = RecordingConsumer::new();
    for _ in 0..50 {
        subs.add(predicates::any(), consumer.clone()).unwrap();
        assert_eq!(consumer.pending_hooks(), 1);
        subs.delete(consumer.id());
    }
    assert_eq!(consumer.pending_hooks(), 0);
}

// =============================================================================
// TEST GROUP 3: Close
// =============================================================================

#[test]
fn test_close_drops_everything_once() {
    let subs = registry();
    subs.add(predicates::any(), RecordingConsumer::new()).unwrap();
    subs.add(predicates::any(), RecordingConsumer::new()).unwrap();

    assert_eq!(subs.close(), Some(2));
    assert!(subs.is_closed());
    assert!(subs.is_empty());
    assert_eq!(subs.close(), None);
}

#[test]
fn test_close_withdraws_consumer_hooks() {
    let subs = registry();
    let consumer = RecordingConsumer::new();
    subs.add(predicates::any(), consumer.clone()).unwrap();
    assert_eq!(consumer.pending_hooks(), 1);

    subs.close();
    assert_eq!(consumer.pending_hooks(), 0);
}

#[test]
fn test_add_after_close_rejected() {
    let subs = registry();
    subs.close();
    assert_eq!(
        subs.add(predicates::any(), RecordingConsumer::new()),
        Err(SubscriptionError::Closed)
    );
}

#[test]
fn test_delete_after_close_is_noop() {
    let subs = registry();
    let consumer = RecordingConsumer::new();
    subs.add(predicates::any(), consumer.clone()).unwrap();
    subs.close();

    subs.delete(consumer.id());
    // the consumer's own close hook finds nothing left either
    consumer.close();
    assert!(subs.is_empty());
}

#[tokio::test]
async fn test_consumer_may_unsubscribe_during_delivery() {
    struct SelfRemoving {
        inner: Arc<RecordingConsumer>,
        subs: Arc<Subscriptions<&'static str>>,
    }

    #[async_trait::async_trait]
    impl Consumer for SelfRemoving {
        fn id(&self) -> ConsumerId {
            self.inner.id()
        }
        async fn put(&self, origin: &Arc<Peer>, envelope: shared_types::Envelope) {
            self.subs.delete(self.id());
            self.inner.put(origin, envelope).await;
        }
        fn on_close(&self, hook: crate::domain::CloseHook) -> Option<HookKey> {
            self.inner.on_close(hook)
        }
        fn remove_close_hook(&self, key: HookKey) {
            self.inner.remove_close_hook(key);
        }
    }

    let subs = Arc::new(registry());
    let recorder = RecordingConsumer::new();
    let consumer = Arc::new(SelfRemoving {
        inner: Arc::clone(&recorder),
        subs: Arc::clone(&subs),
    });
    subs.add(predicates::any(), consumer).unwrap();

    let origin = Peer::new(addr(5));
    assert_eq!(subs.produce(&ping(1), &origin).await, 1);
    assert_eq!(subs.produce(&ping(2), &origin).await, 0);
    assert_eq!(recorder.received().len(), 1);
}
