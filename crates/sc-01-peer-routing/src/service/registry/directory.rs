//! Peer directory with lookup-or-dial semantics.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use sc_telemetry::DIAL_ATTEMPTS;
use shared_types::Address;
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::domain::fault::invariant_violation;
use crate::domain::{Context, ListenerError, PeerError, RegistryError};
use crate::ports::{Connection, Dialer, Listener};
use crate::service::peer::{Bind, Peer};
use crate::service::Receiver;

/// Called once for every peer entering the directory, before its receive
/// loop starts. Typically subscribes the protocol's default consumers.
///
/// Runs under the directory lock: it must not call back into the registry.
pub type NewPeerHook = Arc<dyn Fn(&Arc<Peer>) + Send + Sync>;

#[derive(Default)]
struct Directory {
    closed: bool,
    peers: HashMap<Address, Arc<Peer>>,
}

struct Inner {
    local: Address,
    directory: RwLock<Directory>,
    dialer: Arc<dyn Dialer>,
    on_new_peer: Option<NewPeerHook>,
    config: RegistryConfig,
}

/// Node-wide directory of peers, keyed by address.
///
/// At most one peer per address is registered at a time. Peers remove
/// themselves when they close. Cloning is cheap and shares the directory.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = self.inner.directory.read();
        f.debug_struct("Registry")
            .field("local", &self.inner.local)
            .field("peers", &dir.peers.len())
            .field("closed", &dir.closed)
            .finish()
    }
}

enum Lookup {
    Closed,
    Entered(Arc<Peer>),
    Existing(Arc<Peer>),
}

impl Registry {
    #[must_use]
    pub fn new(
        local: Address,
        dialer: Arc<dyn Dialer>,
        on_new_peer: Option<NewPeerHook>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                local,
                directory: RwLock::new(Directory::default()),
                dialer,
                on_new_peer,
                config,
            }),
        }
    }

    /// Address of the node this registry belongs to.
    #[must_use]
    pub fn local_address(&self) -> Address {
        self.inner.local
    }

    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// A fresh [`Receiver`] sized by the configured `receiver_capacity`.
    #[must_use]
    pub fn receiver(&self) -> Arc<Receiver> {
        Receiver::new(self.inner.config.receiver_capacity)
    }

    // =========================================================================
    // LOOKUP
    // =========================================================================

    /// Return the peer for `address`, creating and dialing it if needed.
    ///
    /// Never waits for the dial: a new peer is returned Unbound and the first
    /// `send` on it waits for the connection. A failed dial closes the peer,
    /// which removes it again. Must be called inside a tokio runtime.
    pub fn get(&self, address: &Address) -> Result<Arc<Peer>, RegistryError> {
        let peer = {
            let mut dir = self.inner.directory.write();
            if dir.closed {
                return Err(RegistryError::Closed);
            }
            if let Some(peer) = dir.peers.get(address) {
                return Ok(Arc::clone(peer));
            }
            let peer = Peer::new(*address);
            self.enter(&mut dir, &peer);
            peer
        };
        self.spawn_dial(&peer);
        Ok(peer)
    }

    /// Look `address` up without dialing.
    #[must_use]
    pub fn find(&self, address: &Address) -> Option<Arc<Peer>> {
        self.inner.directory.read().peers.get(address).cloned()
    }

    #[must_use]
    pub fn has(&self, address: &Address) -> bool {
        self.inner.directory.read().peers.contains_key(address)
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.directory.read().peers.len()
    }

    /// Snapshot of the registered addresses, in no particular order.
    #[must_use]
    pub fn addresses(&self) -> Vec<Address> {
        self.inner.directory.read().peers.keys().copied().collect()
    }

    // =========================================================================
    // INBOUND CONNECTIONS
    // =========================================================================

    /// Hand an accepted connection for `address` to the registry.
    ///
    /// Completes the existing peer if there is one (a redundant connection
    /// is closed), otherwise enters a new, already Bound peer. On a closed
    /// registry the connection is closed and [`RegistryError::Closed`]
    /// returned.
    pub async fn register(
        &self,
        address: Address,
        conn: Arc<dyn Connection>,
    ) -> Result<Arc<Peer>, RegistryError> {
        let mut conn = conn;
        loop {
            let lookup = {
                let mut dir = self.inner.directory.write();
                if dir.closed {
                    Lookup::Closed
                } else if let Some(peer) = dir.peers.get(&address) {
                    Lookup::Existing(Arc::clone(peer))
                } else {
                    let peer = Peer::new(address);
                    if !matches!(peer.bind(Arc::clone(&conn)), Bind::Installed) {
                        invariant_violation(format_args!(
                            "fresh peer {} refused its connection",
                            address
                        ));
                    }
                    self.enter(&mut dir, &peer);
                    Lookup::Entered(peer)
                }
            };

            let peer = match lookup {
                Lookup::Closed => {
                    close_quietly(&address, conn).await;
                    return Err(RegistryError::Closed);
                }
                Lookup::Entered(peer) => return Ok(peer),
                Lookup::Existing(peer) => peer,
            };

            match peer.bind(conn) {
                Bind::Installed => return Ok(peer),
                Bind::Redundant(redundant) => {
                    debug!(peer = %address, "Peer already bound, dropping accepted connection");
                    close_quietly(&address, redundant).await;
                    return Ok(peer);
                }
                Bind::Closed(returned) => {
                    // the closing peer is about to leave the directory
                    conn = returned;
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    /// Feed every connection `listener` accepts into
    /// [`register`](Self::register).
    ///
    /// Returns the accept error that stopped the loop, or `Ok` once the
    /// registry is closed.
    pub async fn listen(&self, listener: &dyn Listener) -> Result<(), ListenerError> {
        info!(local = %self.inner.local, "Accepting inbound connections");
        loop {
            let (address, conn) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    debug!(local = %self.inner.local, error = %e, "Accept loop stopped");
                    return Err(e);
                }
            };
            match self.register(address, conn).await {
                Ok(_) => {}
                Err(RegistryError::Closed) => return Ok(()),
                Err(e) => warn!(peer = %address, error = %e, "Failed to register connection"),
            }
        }
    }

    // =========================================================================
    // DIRECTORY MAINTENANCE
    // =========================================================================

    fn enter(&self, dir: &mut Directory, peer: &Arc<Peer>) {
        let registry = Arc::downgrade(&self.inner);
        let weak_peer = Arc::downgrade(peer);
        peer.on_close(Box::new(move || {
            if let (Some(inner), Some(peer)) = (registry.upgrade(), weak_peer.upgrade()) {
                Registry { inner }.delete(&peer);
            }
        }));

        dir.peers.insert(peer.address(), Arc::clone(peer));
        if let Some(hook) = &self.inner.on_new_peer {
            hook(peer);
        }
        peer.spawn_receive_loop();
        debug!(local = %self.inner.local, peer = %peer.address(), "Peer entered");
    }

    /// Remove `peer` from the directory.
    ///
    /// Peers call this from their close hook; nothing else should.
    ///
    /// # Panics
    ///
    /// If `peer` is not the registered entry for its address.
    pub fn delete(&self, peer: &Arc<Peer>) {
        let mut dir = self.inner.directory.write();
        let address = peer.address();
        match dir.peers.get(&address) {
            Some(entry) if Arc::ptr_eq(entry, peer) => {
                dir.peers.remove(&address);
            }
            _ => {
                drop(dir);
                invariant_violation(format_args!("peer {} is not in the directory", address));
            }
        }
    }

    fn spawn_dial(&self, peer: &Arc<Peer>) {
        let dialer = Arc::clone(&self.inner.dialer);
        let timeout = self.inner.config.dial_timeout;
        let peer = Arc::clone(peer);

        tokio::spawn(async move {
            let address = peer.address();
            let ctx = Context::background().with_timeout(timeout);
            debug!(peer = %address, "Dialing");

            match dialer.dial(&ctx, &address).await {
                Ok(conn) => match peer.try_create(conn).await {
                    Ok(true) => {
                        DIAL_ATTEMPTS.with_label_values(&["success"]).inc();
                    }
                    Ok(false) | Err(_) => {
                        DIAL_ATTEMPTS.with_label_values(&["superseded"]).inc();
                        debug!(peer = %address, "Dialed connection not needed");
                    }
                },
                Err(e) => {
                    DIAL_ATTEMPTS.with_label_values(&["failed"]).inc();
                    warn!(peer = %address, error = %e, "Dial failed");
                    if !peer.close_unbound().await {
                        debug!(peer = %address, "Peer bound or closed elsewhere, keeping it");
                    }
                }
            }
        });
    }

    // =========================================================================
    // SHUTDOWN
    // =========================================================================

    /// Close the dialer, then every peer.
    ///
    /// All peers are closed even if some fail; the first error is returned.
    /// A second call fails with [`RegistryError::AlreadyClosed`].
    pub async fn close(&self) -> Result<(), RegistryError> {
        {
            let mut dir = self.inner.directory.write();
            if dir.closed {
                return Err(RegistryError::AlreadyClosed);
            }
            dir.closed = true;
        }
        info!(local = %self.inner.local, "Closing registry");

        let mut first_error: Option<RegistryError> = None;
        if let Err(e) = self.inner.dialer.close().await {
            first_error.get_or_insert(e.into());
        }

        loop {
            let next = self.inner.directory.read().peers.values().next().cloned();
            let Some(peer) = next else {
                break;
            };
            match peer.close().await {
                Ok(()) => {}
                // another closer won; its hook removes the entry
                Err(PeerError::AlreadyClosed) => tokio::task::yield_now().await,
                Err(e) => {
                    warn!(peer = %peer.address(), error = %e, "Peer close failed");
                    first_error.get_or_insert(e.into());
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.directory.read().closed
    }
}

async fn close_quietly(address: &Address, conn: Arc<dyn Connection>) {
    if let Err(e) = conn.close().await {
        debug!(peer = %address, error = %e, "Connection close failed");
    }
}
