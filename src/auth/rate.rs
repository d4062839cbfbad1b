//! Request-Rate Governor
//!
//! Fixed-window request counting per caller-supplied key. The governor is
//! agnostic to what the key represents; callers typically pass a client or
//! network discriminator. Admission checks guard the state machine's entry
//! points before any credential work happens.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Configuration for the rate governor.
#[derive(Debug, Clone)]
pub struct RateConfig {
    /// Requests admitted per key within one window.
    pub ceiling: u32,
    /// Window length.
    pub window: Duration,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            ceiling: crate::DEFAULT_RATE_CEILING,
            window: Duration::from_secs(crate::DEFAULT_RATE_WINDOW_SECS),
        }
    }
}

/// Admission verdict for a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Request may proceed.
    Allowed,
    /// Ceiling reached for this key's current window.
    Rejected,
}

/// Counter for one key's current window.
#[derive(Debug, Clone)]
struct WindowEntry {
    count: u32,
    opened_at: Instant,
}

/// Thread-safe fixed-window limiter.
///
/// A key's first request opens its window; each admitted request increments
/// the counter; once the ceiling is reached every further request in the
/// window is rejected without touching the counter. An elapsed window resets
/// atomically on the next call for that key.
pub struct RateGovernor {
    config: RateConfig,
    windows: RwLock<HashMap<String, WindowEntry>>,
}

impl RateGovernor {
    /// Create a governor with the given configuration.
    pub fn new(config: RateConfig) -> Self {
        Self {
            config,
            windows: RwLock::new(HashMap::new()),
        }
    }

    /// Create a governor with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(RateConfig::default())
    }

    /// Decide whether one request for `key` may proceed.
    ///
    /// The increment-and-compare runs under the write lock, so concurrent
    /// callers on the same key see a consistent count.
    pub fn admit(&self, key: &str) -> Admission {
        let mut windows = match self.windows.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();

        let entry = windows
            .entry(key.to_string())
            .or_insert_with(|| WindowEntry {
                count: 0,
                opened_at: now,
            });

        if now.duration_since(entry.opened_at) >= self.config.window {
            entry.count = 0;
            entry.opened_at = now;
        }

        if entry.count >= self.config.ceiling {
            return Admission::Rejected;
        }

        entry.count += 1;
        Admission::Allowed
    }

    /// Admitted-request count in `key`'s current window.
    pub fn current_count(&self, key: &str) -> u32 {
        let windows = match self.windows.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        match windows.get(key) {
            Some(entry) if now.duration_since(entry.opened_at) < self.config.window => entry.count,
            _ => 0,
        }
    }

    /// Drop windows whose expiry has passed. Called periodically to bound
    /// memory; correctness does not depend on it.
    pub fn sweep(&self) {
        let mut windows = match self.windows.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        windows.retain(|_, entry| now.duration_since(entry.opened_at) < self.config.window);
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        match self.windows.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}
