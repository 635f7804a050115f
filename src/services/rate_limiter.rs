//! Per-number send limiter.
//!
//! `SendLimiter` is injected into the delivery channel. `InMemorySendLimiter`
//! tracks successful send timestamps per destination over a trailing window;
//! it resets on process restart and is safe to share via `Arc`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

// =============================================================================
// Trait
// =============================================================================

pub trait SendLimiter: Send + Sync {
    /// Whether another send to `key` fits in the window. Does not record.
    fn permits(&self, key: &str) -> bool;

    /// Record a successful send to `key`
    fn record(&self, key: &str);

    /// Drop expired entries
    fn cleanup(&self);
}

// =============================================================================
// InMemorySendLimiter
// =============================================================================

pub struct InMemorySendLimiter {
    sends: Mutex<HashMap<String, Vec<Instant>>>,
    max_sends: usize,
    window: Duration,
}

impl InMemorySendLimiter {
    pub fn new(max_sends: usize, window: Duration) -> Self {
        Self {
            sends: Mutex::new(HashMap::new()),
            max_sends,
            window,
        }
    }

    fn prune(&self, entries: &mut Vec<Instant>, now: Instant) {
        entries.retain(|t| now.duration_since(*t) < self.window);
    }
}

impl SendLimiter for InMemorySendLimiter {
    fn permits(&self, key: &str) -> bool {
        let mut sends = self.sends.lock();
        let now = Instant::now();
        match sends.get_mut(key) {
            Some(entries) => {
                self.prune(entries, now);
                entries.len() < self.max_sends
            }
            None => self.max_sends > 0,
        }
    }

    fn record(&self, key: &str) {
        let mut sends = self.sends.lock();
        let now = Instant::now();
        let entries = sends.entry(key.to_string()).or_default();
        self.prune(entries, now);
        entries.push(now);
    }

    fn cleanup(&self) {
        let mut sends = self.sends.lock();
        let now = Instant::now();
        sends.retain(|_, entries| {
            entries.retain(|t| now.duration_since(*t) < self.window);
            !entries.is_empty()
        });
    }
}

// =============================================================================
// Tests
// =============================================================================
