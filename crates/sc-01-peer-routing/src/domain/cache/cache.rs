//! Correlation buffer implementation.

use shared_types::Envelope;

use crate::domain::{predicates, Context, Predicate};

/// A cached envelope with the caller-supplied annex it arrived with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry<A = ()> {
    pub envelope: Envelope,
    pub annex: A,
}

/// Buffer for envelopes that arrive before anyone waits for them.
///
/// Interest is registered with [`cache`](Self::cache) and lasts until its
/// context is done. Expired interest is dropped lazily on the next `put`.
///
/// Not synchronized: wrap it in a mutex to share it.
pub struct MessageCache<A = ()> {
    entries: Vec<CacheEntry<A>>,
    interest: Vec<(Context, Predicate)>,
}

impl<A> Default for MessageCache<A> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            interest: Vec::new(),
        }
    }
}

impl<A> std::fmt::Debug for MessageCache<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageCache")
            .field("entries", &self.entries.len())
            .field("predicates", &self.interest.len())
            .finish()
    }
}

impl<A> MessageCache<A> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache envelopes matching `predicate` until `ctx` is done.
    pub fn cache(&mut self, ctx: &Context, predicate: Predicate) {
        self.interest.push((ctx.clone(), predicate));
    }

    /// Cache every envelope until `ctx` is done.
    pub fn cache_all(&mut self, ctx: &Context) {
        self.cache(ctx, predicates::any());
    }

    /// Store `envelope` if any live predicate matches it.
    ///
    /// The entry is stored once no matter how many predicates match.
    pub fn put(&mut self, envelope: Envelope, annex: A) -> bool {
        self.interest.retain(|(ctx, _)| !ctx.is_done());
        let matched = self.interest.iter().any(|(_, p)| p(&envelope));
        if matched {
            self.entries.push(CacheEntry { envelope, annex });
        }
        matched
    }

    /// Remove and return every cached entry matching `predicate`, oldest
    /// first. The rest stay in their original order.
    pub fn get<F>(&mut self, predicate: F) -> Vec<CacheEntry<A>>
    where
        F: Fn(&Envelope) -> bool,
    {
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|entry| predicate(&entry.envelope));
        self.entries = kept;
        taken
    }

    /// Drop every cached entry. Registered interest stays.
    pub fn flush(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered predicates, including ones whose context expired since
    /// the last `put`.
    #[must_use]
    pub fn predicate_count(&self) -> usize {
        self.interest.len()
    }
}
