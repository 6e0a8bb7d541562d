//! Replay protection for incoming records.
//!
//! Every outgoing record embeds a fresh timestamp-derived nonce; the
//! receiving side tracks recently seen nonces and rejects duplicates and
//! values older than the retention window. Rejection is a drop-and-log
//! signal, never a session fault.

use std::collections::HashSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::core::constants::REPLAY_NONCE_RESOLUTION;

/// Tracks recently observed replay nonces.
pub struct ReplayGuard {
    seen: HashSet<u64>,
    highest: u64,
    /// Nonces below this watermark are rejected outright.
    oldest: Option<u64>,
    window_ticks: u64,
    last_issued: u64,
}

impl ReplayGuard {
    /// Create a guard with the given retention window.
    pub fn new(window: Duration) -> Self {
        Self {
            seen: HashSet::new(),
            highest: 0,
            oldest: None,
            window_ticks: window.as_secs() * REPLAY_NONCE_RESOLUTION,
            last_issued: 0,
        }
    }

    /// Issue a fresh nonce from the local clock.
    ///
    /// Strictly increasing: records sealed within the same clock tick get
    /// consecutive nonces instead of colliding.
    pub fn issue(&mut self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        // One tick per microsecond at the configured resolution.
        let tick = now.as_secs() * REPLAY_NONCE_RESOLUTION
            + u64::from(now.subsec_micros()) * REPLAY_NONCE_RESOLUTION / 1_000_000;
        self.last_issued = tick.max(self.last_issued + 1);
        self.last_issued
    }

    /// Admit a nonce if it is fresh; record it. Returns `false` for
    /// duplicates and for values older than the watermark.
    pub fn verify(&mut self, nonce: u64) -> bool {
        match self.oldest {
            None => {
                self.oldest = Some(nonce.saturating_sub(self.window_ticks));
                self.highest = nonce;
                self.seen.insert(nonce);
                true
            }
            Some(oldest) => {
                if nonce < oldest || !self.seen.insert(nonce) {
                    return false;
                }
                self.highest = self.highest.max(nonce);
                true
            }
        }
    }

    /// Advance the watermark to `max(seen) - window` and evict everything
    /// older, bounding memory use. Called periodically, independent of any
    /// single record.
    pub fn sweep(&mut self) {
        if self.seen.is_empty() {
            return;
        }
        let oldest = self.highest.saturating_sub(self.window_ticks);
        self.oldest = Some(oldest);
        self.seen.retain(|&n| n >= oldest);
    }

    /// Number of nonces currently retained.
    #[cfg(test)]
    fn retained(&self) -> usize {
        self.seen.len()
    }
}
