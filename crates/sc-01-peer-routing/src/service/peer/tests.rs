use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::domain::{predicates, ConnectionError, Context, ContextError, PeerError};
use crate::service::Consumer;
use crate::test_utils::{addr, ping, pong, RecordingConnection, RecordingConsumer};
use shared_types::{Envelope, MsgKind};

async fn bound_peer() -> (Arc<Peer>, Arc<RecordingConnection>) {
    let peer = Peer::new(addr(9));
    let conn = RecordingConnection::new();
    assert!(peer.try_create(conn.clone()).await.unwrap());
    (peer, conn)
}

// =============================================================================
// TEST GROUP 1: Binding
// =============================================================================

#[tokio::test]
async fn test_create_binds_once() {
    let peer = Peer::new(addr(9));
    assert!(!peer.is_bound());

    let first = RecordingConnection::new();
    let second = RecordingConnection::new();
    assert!(peer.create(first.clone()).await);
    assert!(peer.is_bound());

    assert!(!peer.create(second.clone()).await);
    assert_eq!(second.close_calls(), 1);
    assert_eq!(first.close_calls(), 0);

    peer.send(&Context::background(), ping(1)).await.unwrap();
    assert_eq!(first.sent(), vec![ping(1)]);
    assert_eq!(second.send_calls(), 0);
}

#[tokio::test]
async fn test_try_create_on_closed_peer_disposes() {
    let peer = Peer::new(addr(9));
    peer.close().await.unwrap();

    let conn = RecordingConnection::new();
    assert_eq!(peer.try_create(conn.clone()).await, Err(PeerError::Closed));
    assert_eq!(conn.close_calls(), 1);
    assert!(!peer.is_bound());
}

#[tokio::test]
#[should_panic(expected = "create on closed peer")]
async fn test_create_on_closed_peer_panics() {
    let peer = Peer::new(addr(9));
    peer.close().await.unwrap();
    peer.create(RecordingConnection::new()).await;
}

#[tokio::test]
async fn test_wait_ready_does_not_close() {
    let peer = Peer::new(addr(9));
    let ctx = Context::background().with_cancel();
    ctx.cancel();
    assert_eq!(
        peer.wait_ready(&ctx).await,
        Err(PeerError::NotReady(ContextError::Cancelled))
    );
    assert!(!peer.is_closed());
}

// =============================================================================
// TEST GROUP 2: Send
// =============================================================================

#[tokio::test]
async fn test_send_waits_for_connection() {
    let peer = Peer::new(addr(9));
    let sender = Arc::clone(&peer);
    let pending =
        tokio::spawn(async move { sender.send(&Context::background(), ping(1)).await });

    tokio::task::yield_now().await;
    assert!(!pending.is_finished());

    let conn = RecordingConnection::new();
    peer.create(conn.clone()).await;
    tokio::time::timeout(Duration::from_secs(1), pending)
        .await
        .expect("send completed")
        .unwrap()
        .unwrap();
    assert_eq!(conn.sent(), vec![ping(1)]);
}

#[tokio::test]
async fn test_cancelled_context_never_writes() {
    let (peer, conn) = bound_peer().await;
    let ctx = Context::background().with_cancel();
    ctx.cancel();

    let err = peer.send(&ctx, ping(1)).await.unwrap_err();
    assert_eq!(err, PeerError::NotReady(ContextError::Cancelled));
    assert_eq!(conn.send_calls(), 0);
    assert!(peer.is_closed());
    assert_eq!(conn.close_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unbound_send_times_out_and_closes() {
    let peer = Peer::new(addr(9));
    let ctx = Context::background().with_timeout(Duration::from_millis(100));

    let err = peer.send(&ctx, ping(1)).await.unwrap_err();
    assert_eq!(err, PeerError::NotReady(ContextError::DeadlineExceeded));
    assert!(peer.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_write_is_abandoned() {
    let (peer, conn) = bound_peer().await;
    conn.stall_sends();
    let ctx = Context::background().with_timeout(Duration::from_millis(100));

    let err = peer.send(&ctx, ping(1)).await.unwrap_err();
    assert_eq!(err, PeerError::Aborted(ContextError::DeadlineExceeded));
    assert_eq!(conn.send_calls(), 1);
    assert!(peer.is_closed());
}

#[tokio::test]
async fn test_write_failure_closes_peer() {
    let (peer, conn) = bound_peer().await;
    conn.fail_sends();

    let err = peer
        .send(&Context::background(), ping(1))
        .await
        .unwrap_err();
    assert!(matches!(err, PeerError::Connection(ConnectionError::Send(_))));
    assert!(peer.is_closed());
}

#[tokio::test]
async fn test_close_releases_waiting_send() {
    let peer = Peer::new(addr(9));
    let sender = Arc::clone(&peer);
    let pending =
        tokio::spawn(async move { sender.send(&Context::background(), ping(1)).await });
    tokio::task::yield_now().await;

    peer.close().await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(1), pending)
        .await
        .expect("send released")
        .unwrap();
    assert_eq!(result, Err(PeerError::Closed));
}

#[tokio::test]
async fn test_concurrent_sends_all_written() {
    let (peer, conn) = bound_peer().await;
    let handles: Vec<_> = (0..10)
        .map(|i| {
            let peer = Arc::clone(&peer);
            tokio::spawn(async move { peer.send(&Context::background(), ping(i)).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(conn.sent().len(), 10);
    assert!(!peer.is_closed());
}

// =============================================================================
// TEST GROUP 3: Receive loop
// =============================================================================

#[tokio::test]
async fn test_receive_loop_delivers_in_order() {
    let (peer, conn) = bound_peer().await;
    let consumer = RecordingConsumer::new();
    peer.subscribe(consumer.clone(), predicates::any()).unwrap();
    assert!(peer.spawn_receive_loop());
    assert!(!peer.spawn_receive_loop());

    for i in 0..5 {
        conn.push_inbound(ping(i));
    }
    tokio::time::timeout(Duration::from_secs(1), async {
        while consumer.received().len() < 5 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("all delivered");

    let order: Vec<_> = consumer.received().into_iter().map(|(_, e)| e).collect();
    assert_eq!(order, (0..5).map(ping).collect::<Vec<_>>());
    assert!(consumer.received().iter().all(|(origin, _)| *origin == addr(9)));
}

#[tokio::test]
async fn test_unmatched_goes_to_default_handler() {
    let unhandled = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&unhandled);
    let peer = Peer::with_default_handler(
        addr(9),
        Arc::new(move |_: &Arc<Peer>, _: &Envelope| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );
    let conn = RecordingConnection::new();
    peer.create(conn.clone()).await;

    let consumer = RecordingConsumer::new();
    peer.subscribe(consumer.clone(), predicates::is_kind(MsgKind::Ping))
        .unwrap();
    peer.spawn_receive_loop();

    conn.push_inbound(pong(1));
    conn.push_inbound(ping(2));
    tokio::time::timeout(Duration::from_secs(1), async {
        while consumer.received().is_empty() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("ping delivered");

    assert_eq!(unhandled.load(Ordering::SeqCst), 1);
    assert_eq!(consumer.received().len(), 1);
}

#[tokio::test]
async fn test_receive_error_closes_peer() {
    let (peer, conn) = bound_peer().await;
    peer.spawn_receive_loop();
    conn.push_recv_error();

    tokio::time::timeout(Duration::from_secs(1), peer.closed())
        .await
        .expect("peer closed");
    assert!(peer.is_closed());
}

// =============================================================================
// TEST GROUP 4: Close
// =============================================================================

#[tokio::test]
async fn test_close_is_one_shot() {
    let (peer, conn) = bound_peer().await;
    let hooks = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hooks);
    peer.on_close(Box::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    peer.close().await.unwrap();
    assert!(peer.is_closed());
    assert_eq!(peer.close().await, Err(PeerError::AlreadyClosed));
    assert_eq!(hooks.load(Ordering::SeqCst), 1);
    assert_eq!(conn.close_calls(), 1);

    assert_eq!(
        peer.send(&Context::background(), ping(1)).await,
        Err(PeerError::Closed)
    );
    assert_eq!(conn.send_calls(), 0);
}

#[tokio::test]
async fn test_close_drops_subscriptions_silently() {
    let (peer, _conn) = bound_peer().await;
    let consumer = RecordingConsumer::new();
    peer.subscribe(consumer.clone(), predicates::any()).unwrap();
    assert_eq!(peer.subscriber_count(), 1);

    peer.close().await.unwrap();
    assert_eq!(peer.subscriber_count(), 0);
    // unsubscribing from a closed peer is a no-op
    peer.unsubscribe(consumer.id());
    assert_eq!(
        peer.subscribe(consumer.clone(), predicates::any()),
        Err(PeerError::Closed)
    );
}

#[tokio::test]
async fn test_close_unbound_skips_bound_peer() {
    let (peer, conn) = bound_peer().await;
    assert!(!peer.close_unbound().await);
    assert!(!peer.is_closed());
    assert_eq!(conn.close_calls(), 0);

    let unbound = Peer::new(addr(3));
    assert!(unbound.close_unbound().await);
    assert!(unbound.is_closed());
}
