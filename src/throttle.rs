//! Sliding-window issuance throttle keyed by identity.
//!
//! Each identity gets a bounded number of issuance attempts per window.
//! Timestamps outside the window are pruned lazily on each check, so no
//! background task is involved. Rejected attempts are not recorded; a
//! throttled caller never pushes its own retry window further out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

/// Outcome of a throttle check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// Under quota; the attempt was recorded.
    Allowed,
    /// Over quota; nothing was recorded.
    Limited {
        /// Time until the oldest counted attempt leaves the window.
        retry_after: Duration,
    },
}

/// Per-identity sliding-window attempt counter.
#[derive(Debug, Clone)]
pub struct IdentityThrottle {
    window: chrono::Duration,
    max_attempts: usize,
    attempts: Arc<RwLock<HashMap<String, Vec<DateTime<Utc>>>>>,
}

impl IdentityThrottle {
    /// Create a throttle allowing `max_attempts` per identity per `window`.
    pub fn new(window: Duration, max_attempts: usize) -> Self {
        // An unrepresentable window saturates to the widest chrono span;
        // the checked arithmetic in the check treats it as never elapsing.
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
        Self {
            window,
            max_attempts,
            attempts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Check the quota for `identity` at `now` and record the attempt if
    /// it is allowed.
    ///
    /// An attempt exactly `window` old no longer counts, so the instant
    /// `retry_after` reports is itself admissible.
    pub async fn check_and_record(&self, identity: &str, now: DateTime<Utc>) -> ThrottleDecision {
        let mut attempts = self.attempts.write().await;
        let entry = attempts.entry(identity.to_string()).or_default();

        // A window wider than the datetime range saturates instead of
        // overflowing; no attempt is then ever old enough to prune.
        let cutoff = now
            .checked_sub_signed(self.window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        entry.retain(|t| *t > cutoff);

        if entry.len() >= self.max_attempts {
            let oldest = entry.iter().min().copied().unwrap_or(now);
            let retry_after = oldest
                .checked_add_signed(self.window)
                .map(|leaves| (leaves - now).to_std().unwrap_or(Duration::ZERO))
                .unwrap_or(Duration::MAX);
            return ThrottleDecision::Limited { retry_after };
        }

        entry.push(now);
        ThrottleDecision::Allowed
    }

    /// Number of identities currently holding attempt history.
    ///
    /// Idle identities are never evicted here, only pruned down to an
    /// empty history; the count is a diagnostics signal, not a bound.
    pub async fn tracked_identities(&self) -> usize {
        self.attempts.read().await.len()
    }

    /// Drop all recorded attempts.
    pub async fn clear(&self) {
        self.attempts.write().await.clear();
    }
}
