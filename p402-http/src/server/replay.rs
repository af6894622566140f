//! In-memory guard against presenting the same payment twice.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Expired entries are swept once every this many reservations.
const SWEEP_EVERY: usize = 256;

/// Seen-nonce set keyed by `(lowercase sender, nonce)`.
///
/// Each reservation lives for the TTL it was made with. The gateway passes
/// the rest of the payload's freshness window: `maxTimeoutSeconds` plus the
/// facilitator's clock skew, plus however far the payload is dated ahead.
/// After that the freshness gate rejects the payload anyway. Clones share the
/// same set. State is per process.
#[derive(Debug, Clone, Default)]
pub struct ReplayGuard {
    seen: Arc<DashMap<(String, String), Instant>>,
    reservations: Arc<AtomicUsize>,
}

impl ReplayGuard {
    /// Creates an empty guard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `(sender, nonce)` for `ttl`.
    ///
    /// Returns `false` if the pair is already reserved and not yet expired.
    pub fn reserve(&self, sender: &str, nonce: &str, ttl: Duration) -> bool {
        if self.reservations.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.sweep();
        }
        let now = Instant::now();
        let expires_at = now + ttl;
        match self.seen.entry(key(sender, nonce)) {
            Entry::Occupied(mut entry) => {
                if *entry.get() > now {
                    false
                } else {
                    entry.insert(expires_at);
                    true
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(expires_at);
                true
            }
        }
    }

    /// Drops a reservation so the payment may be presented again.
    pub fn release(&self, sender: &str, nonce: &str) {
        self.seen.remove(&key(sender, nonce));
    }

    /// Number of live or not yet swept reservations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Returns `true` if nothing is reserved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn sweep(&self) {
        let now = Instant::now();
        self.seen.retain(|_, expires_at| *expires_at > now);
    }
}

fn key(sender: &str, nonce: &str) -> (String, String) {
    (sender.trim().to_ascii_lowercase(), nonce.to_owned())
}
