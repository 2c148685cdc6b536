//! # Two-Node Routing Tests
//!
//! Two registries talking over an in-process [`ConnHub`]: one side dials,
//! the other accepts, and both tear down without leaking a connection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sc_01_peer_routing::adapters::{ConnHub, HubListener};
use sc_01_peer_routing::test_utils::{addr, ping, pong};
use sc_01_peer_routing::{
    predicates, Context, NewPeerHook, Peer, Receiver, Registry, RegistryConfig,
};
use shared_types::{Address, Envelope, MsgKind};
use tokio::task::JoinHandle;

// =============================================================================
// TEST HELPERS
// =============================================================================

struct Node {
    registry: Registry,
    listener: Arc<HubListener>,
    accept_loop: JoinHandle<()>,
}

impl Node {
    fn start(hub: &ConnHub, local: Address, on_new_peer: Option<NewPeerHook>) -> Self {
        let listener = hub.listener(local);
        let registry = Registry::new(
            local,
            hub.dialer(local),
            on_new_peer,
            RegistryConfig::for_testing(),
        );
        let accept_loop = {
            let registry = registry.clone();
            let listener = Arc::clone(&listener);
            tokio::spawn(async move {
                let _ = registry.listen(listener.as_ref()).await;
            })
        };
        Self {
            registry,
            listener,
            accept_loop,
        }
    }

    async fn shutdown(self) {
        use sc_01_peer_routing::Listener;
        self.listener.close().await.unwrap();
        self.registry.close().await.unwrap();
        self.accept_loop.await.unwrap();
    }
}

async fn eventually<F: Fn() -> bool>(what: &str, condition: F) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {}", what));
}

/// Hook subscribing `receiver` to every new peer.
fn subscribe_all(receiver: &Arc<Receiver>) -> NewPeerHook {
    let receiver = Arc::clone(receiver);
    Arc::new(move |peer: &Arc<Peer>| {
        receiver.subscribe(peer, predicates::any()).unwrap();
    })
}

// =============================================================================
// TEST GROUP 1: Connection establishment
// =============================================================================

#[tokio::test]
async fn test_dial_and_accept_share_one_connection() {
    let hub = ConnHub::new();
    let inbox = Receiver::new(8);
    let alice = Node::start(&hub, addr(1), None);
    let bob = Node::start(&hub, addr(2), Some(subscribe_all(&inbox)));

    let to_bob = alice.registry.get(&addr(2)).unwrap();
    to_bob.send(&Context::background(), ping(1)).await.unwrap();

    let ctx = Context::background().with_timeout(Duration::from_secs(2));
    let (origin, envelope) = inbox.next(&ctx).await.expect("ping delivered");
    assert_eq!(origin.address(), addr(1));
    assert_eq!(envelope, ping(1));

    // bob answers over the accepted connection instead of dialing back
    let to_alice = bob.registry.get(&addr(1)).unwrap();
    assert!(to_alice.is_bound());
    to_alice.send(&Context::background(), pong(2)).await.unwrap();
    assert_eq!(hub.created(), 2);

    alice.shutdown().await;
    bob.shutdown().await;
    eventually("all pipes closed", || hub.open() == 0).await;
    // closed peers do not linger in a long-lived inbox
    assert_eq!(inbox.subscribed_count(), 0);
    inbox.close().await.unwrap();
}

#[tokio::test]
async fn test_dial_to_absent_node_fails_cleanly() {
    let hub = ConnHub::new();
    let alice = Node::start(&hub, addr(1), None);

    let nobody = alice.registry.get(&addr(9)).unwrap();
    tokio::time::timeout(Duration::from_secs(2), nobody.closed())
        .await
        .expect("unreachable peer closed");
    assert!(!alice.registry.has(&addr(9)));
    assert_eq!(hub.created(), 0);

    alice.shutdown().await;
}

// =============================================================================
// TEST GROUP 2: Delivery
// =============================================================================

#[tokio::test]
async fn test_receiver_sees_only_later_envelopes() {
    let hub = ConnHub::new();
    let unhandled = Arc::new(AtomicUsize::new(0));
    let hook: NewPeerHook = {
        let unhandled = Arc::clone(&unhandled);
        Arc::new(move |peer: &Arc<Peer>| {
            let unhandled = Arc::clone(&unhandled);
            peer.set_default_handler(Arc::new(move |_: &Arc<Peer>, _: &Envelope| {
                unhandled.fetch_add(1, Ordering::SeqCst);
            }));
        })
    };
    let alice = Node::start(&hub, addr(1), None);
    let bob = Node::start(&hub, addr(2), Some(hook));

    let to_bob = alice.registry.get(&addr(2)).unwrap();
    to_bob.send(&Context::background(), ping(1)).await.unwrap();
    eventually("first ping dropped", || unhandled.load(Ordering::SeqCst) == 1).await;

    let inbox = Receiver::new(8);
    let from_alice = bob.registry.find(&addr(1)).unwrap();
    inbox
        .subscribe(&from_alice, predicates::is_kind(MsgKind::Ping))
        .unwrap();
    to_bob.send(&Context::background(), ping(2)).await.unwrap();
    to_bob.send(&Context::background(), pong(3)).await.unwrap();
    to_bob.send(&Context::background(), ping(4)).await.unwrap();

    let ctx = Context::background().with_timeout(Duration::from_secs(2));
    assert_eq!(inbox.next(&ctx).await.map(|(_, e)| e), Some(ping(2)));
    assert_eq!(inbox.next(&ctx).await.map(|(_, e)| e), Some(ping(4)));
    eventually("pong dropped", || unhandled.load(Ordering::SeqCst) == 2).await;
    assert!(inbox.try_next().is_none());

    inbox.close().await.unwrap();
    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn test_remote_close_tears_down_local_peer() {
    let hub = ConnHub::new();
    let alice = Node::start(&hub, addr(1), None);
    let bob = Node::start(&hub, addr(2), None);

    let to_bob = alice.registry.get(&addr(2)).unwrap();
    to_bob.send(&Context::background(), ping(1)).await.unwrap();
    eventually("bob registered alice", || bob.registry.has(&addr(1))).await;

    bob.shutdown().await;
    tokio::time::timeout(Duration::from_secs(2), to_bob.closed())
        .await
        .expect("alice noticed");
    assert!(!alice.registry.has(&addr(2)));

    alice.shutdown().await;
    eventually("all pipes closed", || hub.open() == 0).await;
}
