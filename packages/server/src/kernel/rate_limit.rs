//! Fixed-window request admission.
//!
//! Protects HTTP-exposed entry points from abuse. Windows are fixed rather
//! than sliding: the counter resets wholesale at `reset_at`, so a caller can
//! burst up to twice the limit across a window boundary. Accepted tradeoff
//! for an abuse-mitigation backstop. State is in-memory only; a restart
//! clears it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// How often expired windows are swept even when the key count stays low.
const GC_INTERVAL: Duration = Duration::from_secs(60);

/// Key count that triggers an immediate sweep, and the cap enforced after
/// expired keys are purged. Bounds memory when an attacker spins client
/// identities.
const MAX_TRACKED_KEYS: usize = 10_000;

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub limited: bool,
    pub remaining: u32,
}

/// A counting window for one caller key.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitWindow {
    pub count: u32,
    pub reset_at: Instant,
}

/// Backing store for rate-limit windows.
///
/// The in-memory implementation below is the production default; the trait
/// lets a shared store be swapped in without touching admission logic.
/// Implementations must tolerate concurrent access from a multi-threaded
/// runtime - the window map mutates on every request.
pub trait WindowStore: Send + Sync {
    fn get(&self, key: &str) -> Option<RateLimitWindow>;
    fn set(&self, key: &str, window: RateLimitWindow);
    fn remove(&self, key: &str);
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Snapshot of all (key, window) pairs, used by garbage collection.
    fn entries(&self) -> Vec<(String, RateLimitWindow)>;
}

/// `HashMap` behind a mutex. The lock is held only for map operations and
/// never across an await point.
#[derive(Default)]
pub struct InMemoryWindowStore {
    windows: Mutex<HashMap<String, RateLimitWindow>>,
}

impl WindowStore for InMemoryWindowStore {
    fn get(&self, key: &str) -> Option<RateLimitWindow> {
        self.windows
            .lock()
            .expect("window store mutex poisoned")
            .get(key)
            .copied()
    }

    fn set(&self, key: &str, window: RateLimitWindow) {
        self.windows
            .lock()
            .expect("window store mutex poisoned")
            .insert(key.to_string(), window);
    }

    fn remove(&self, key: &str) {
        self.windows
            .lock()
            .expect("window store mutex poisoned")
            .remove(key);
    }

    fn len(&self) -> usize {
        self.windows.lock().expect("window store mutex poisoned").len()
    }

    fn entries(&self) -> Vec<(String, RateLimitWindow)> {
        self.windows
            .lock()
            .expect("window store mutex poisoned")
            .iter()
            .map(|(key, window)| (key.clone(), *window))
            .collect()
    }
}

impl<S: WindowStore> WindowStore for Arc<S> {
    fn get(&self, key: &str) -> Option<RateLimitWindow> {
        (**self).get(key)
    }

    fn set(&self, key: &str, window: RateLimitWindow) {
        (**self).set(key, window)
    }

    fn remove(&self, key: &str) {
        (**self).remove(key)
    }

    fn len(&self) -> usize {
        (**self).len()
    }

    fn entries(&self) -> Vec<(String, RateLimitWindow)> {
        (**self).entries()
    }
}

/// Fixed-window rate limiter keyed by caller identity.
pub struct RateLimiter {
    store: Box<dyn WindowStore>,
    gc_interval: Duration,
    max_tracked_keys: usize,
    last_gc: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_store(Box::new(InMemoryWindowStore::default()))
    }

    pub fn with_store(store: Box<dyn WindowStore>) -> Self {
        Self::with_limits(store, GC_INTERVAL, MAX_TRACKED_KEYS)
    }

    pub fn with_limits(
        store: Box<dyn WindowStore>,
        gc_interval: Duration,
        max_tracked_keys: usize,
    ) -> Self {
        Self {
            store,
            gc_interval,
            max_tracked_keys,
            last_gc: Mutex::new(Instant::now()),
        }
    }

    /// Check and record one request for `key`.
    ///
    /// The first request for a fresh or expired key opens a new window and
    /// admits. Requests beyond `limit` inside the window are denied with
    /// `remaining` clamped to zero.
    pub fn admit(&self, key: &str, limit: u32, window: Duration) -> RateLimitDecision {
        self.admit_at(key, limit, window, Instant::now())
    }

    /// Admission check against an explicit clock, for tests.
    pub fn admit_at(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now: Instant,
    ) -> RateLimitDecision {
        self.maybe_gc(now);

        let mut entry = match self.store.get(key) {
            Some(existing) if now < existing.reset_at => existing,
            _ => RateLimitWindow {
                count: 0,
                reset_at: now + window,
            },
        };

        // Increment first, then compare. Clamped so the stored count never
        // exceeds limit + 1 no matter how hard a denied caller hammers.
        entry.count = entry.count.saturating_add(1).min(limit.saturating_add(1));
        let limited = entry.count > limit;
        self.store.set(key, entry);

        RateLimitDecision {
            limited,
            remaining: limit.saturating_sub(entry.count),
        }
    }

    /// Sweep the store on a wall-clock interval, or immediately when the key
    /// count passes the high-water mark. Expired windows go first; if the
    /// store is still over the cap, the windows expiring soonest are evicted
    /// until it fits.
    fn maybe_gc(&self, now: Instant) {
        let due = {
            let mut last_gc = self.last_gc.lock().expect("gc clock mutex poisoned");
            let interval_elapsed = now.duration_since(*last_gc) >= self.gc_interval;
            if interval_elapsed || self.store.len() > self.max_tracked_keys {
                *last_gc = now;
                true
            } else {
                false
            }
        };
        if !due {
            return;
        }

        let before = self.store.len();
        let mut live: Vec<(String, RateLimitWindow)> = Vec::new();
        for (key, window) in self.store.entries() {
            if window.reset_at <= now {
                self.store.remove(&key);
            } else {
                live.push((key, window));
            }
        }

        if live.len() > self.max_tracked_keys {
            live.sort_by_key(|(_, window)| window.reset_at);
            for (key, _) in &live[..live.len() - self.max_tracked_keys] {
                self.store.remove(key);
            }
        }

        let evicted = before.saturating_sub(self.store.len());
        if evicted > 0 {
            tracing::debug!(evicted, tracked = self.store.len(), "rate limit window sweep");
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(300);

    #[test]
    fn sixth_request_in_window_is_denied() {
        let limiter = RateLimiter::new();
        let now = Instant::now();

        for expected_remaining in (0..5).rev() {
            let decision = limiter.admit_at("verify:1.2.3.4", 5, WINDOW, now);
            assert!(!decision.limited);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let denied = limiter.admit_at("verify:1.2.3.4", 5, WINDOW, now);
        assert!(denied.limited);
        assert_eq!(denied.remaining, 0);
    }

    #[test]
    fn expired_window_resets_and_admits() {
        let limiter = RateLimiter::new();
        let start = Instant::now();

        assert!(!limiter.admit_at("k", 1, WINDOW, start).limited);
        assert!(limiter.admit_at("k", 1, WINDOW, start).limited);

        let after_reset = start + WINDOW + Duration::from_millis(1);
        let decision = limiter.admit_at("k", 1, WINDOW, after_reset);
        assert!(!decision.limited);
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new();
        let now = Instant::now();

        assert!(!limiter.admit_at("route:a", 1, WINDOW, now).limited);
        assert!(limiter.admit_at("route:a", 1, WINDOW, now).limited);
        assert!(!limiter.admit_at("route:b", 1, WINDOW, now).limited);
    }

    #[test]
    fn stored_count_clamps_at_limit_plus_one() {
        let store = Arc::new(InMemoryWindowStore::default());
        let limiter = RateLimiter::with_store(Box::new(store.clone()));
        let now = Instant::now();

        for _ in 0..20 {
            limiter.admit_at("k", 5, WINDOW, now);
        }

        let window = store.get("k").expect("window exists");
        assert_eq!(window.count, 6);
    }

    #[test]
    fn gc_purges_expired_windows() {
        let store = Arc::new(InMemoryWindowStore::default());
        // Zero interval: every admission sweeps.
        let limiter = RateLimiter::with_limits(Box::new(store.clone()), Duration::ZERO, 100);
        let start = Instant::now();

        limiter.admit_at("short", 5, Duration::from_secs(1), start);
        limiter.admit_at("long", 5, Duration::from_secs(600), start);

        let later = start + Duration::from_secs(2);
        limiter.admit_at("fresh", 5, WINDOW, later);

        assert!(store.get("short").is_none());
        assert!(store.get("long").is_some());
        assert!(store.get("fresh").is_some());
    }

    #[test]
    fn gc_evicts_oldest_expiring_keys_over_the_cap() {
        let store = Arc::new(InMemoryWindowStore::default());
        let limiter = RateLimiter::with_limits(Box::new(store.clone()), Duration::ZERO, 3);
        let start = Instant::now();

        limiter.admit_at("k1", 5, Duration::from_secs(10), start);
        limiter.admit_at("k2", 5, Duration::from_secs(20), start);
        limiter.admit_at("k3", 5, Duration::from_secs(30), start);
        limiter.admit_at("k4", 5, Duration::from_secs(40), start);

        // Four live keys exceed the cap of three: the sweep run by this
        // admission drops k1, the soonest to expire.
        limiter.admit_at("k5", 5, Duration::from_secs(50), start);

        assert!(store.get("k1").is_none());
        assert!(store.get("k2").is_some());
        assert!(store.get("k3").is_some());
        assert!(store.get("k4").is_some());
        assert!(store.get("k5").is_some());
    }
}
