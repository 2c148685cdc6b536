//! # Closer
//!
//! One-shot close latch with close hooks.
//!
//! The first `close` wins: it collects the registered hooks, runs them in
//! registration order and then signals every waiter. Later calls report
//! [`AlreadyClosed`]. A hook registered after close runs immediately on the
//! registering task. Keyed hooks can be withdrawn before close, so an owner
//! that is subscribed and unsubscribed repeatedly does not pile them up.

use parking_lot::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Callback run exactly once when the owning entity closes.
pub type CloseHook = Box<dyn FnOnce() + Send + 'static>;

/// Returned to every `close` caller after the first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("already closed")]
pub struct AlreadyClosed;

/// Handle for withdrawing a hook registered with [`Closer::on_close_keyed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookKey(u64);

#[derive(Default)]
struct State {
    closed: bool,
    next_key: u64,
    hooks: Vec<(HookKey, CloseHook)>,
}

/// One-shot close latch.
#[derive(Default)]
pub struct Closer {
    state: Mutex<State>,
    signal: CancellationToken,
}

impl std::fmt::Debug for Closer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Closer")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Closer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook. Returns `false` (after running the hook) if the
    /// latch is already closed.
    pub fn on_close(&self, hook: CloseHook) -> bool {
        self.on_close_keyed(hook).is_some()
    }

    /// Like [`on_close`](Self::on_close), but returns a key for
    /// [`remove_hook`](Self::remove_hook). `None` means the latch was
    /// already closed and the hook has run.
    pub fn on_close_keyed(&self, hook: CloseHook) -> Option<HookKey> {
        {
            let mut state = self.state.lock();
            if !state.closed {
                let key = HookKey(state.next_key);
                state.next_key += 1;
                state.hooks.push((key, hook));
                return Some(key);
            }
        }
        hook();
        None
    }

    /// Withdraw a hook that has not run yet. Returns whether it was found.
    pub fn remove_hook(&self, key: HookKey) -> bool {
        let removed = {
            let mut state = self.state.lock();
            state
                .hooks
                .iter()
                .position(|(k, _)| *k == key)
                .map(|idx| state.hooks.remove(idx))
        };
        // the hook's captures drop outside the lock
        removed.is_some()
    }

    /// Hooks waiting for close.
    #[must_use]
    pub fn hook_count(&self) -> usize {
        self.state.lock().hooks.len()
    }

    /// Close the latch, run every hook, then wake waiters.
    pub fn close(&self) -> Result<(), AlreadyClosed> {
        let hooks = self.start()?;
        self.complete(hooks);
        Ok(())
    }

    /// First half of `close`: flip the flag and take the hooks.
    ///
    /// Lets an owner flip the flag while holding one of its own locks and
    /// run the hooks after releasing it.
    pub(crate) fn start(&self) -> Result<Vec<CloseHook>, AlreadyClosed> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(AlreadyClosed);
        }
        state.closed = true;
        Ok(std::mem::take(&mut state.hooks)
            .into_iter()
            .map(|(_, hook)| hook)
            .collect())
    }

    /// Second half of `close`.
    pub(crate) fn complete(&self, hooks: Vec<CloseHook>) {
        for hook in hooks {
            hook();
        }
        self.signal.cancel();
    }

    /// Whether `close` has started.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Resolve once `close` has finished running its hooks.
    pub async fn closed(&self) {
        self.signal.cancelled().await;
    }
}
