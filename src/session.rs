//! Pairing session records and the state machine that governs them.
//!
//! A session advances forward only: `Pending` to `Verified` to `Redeemed`,
//! or out of any non-terminal state to `Expired` once its deadline passes.
//! Terminal states never sit in the store; redeemed records are removed in
//! the same critical section that claims them and expired records are
//! removed by the reaper (or read as absent until it gets there).

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifact::ArtifactRef;

/// Lifecycle state of a pairing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Issued, waiting for the user to submit the code.
    Pending,
    /// Code confirmed; credentials may be redeemed once.
    Verified,
    /// Credentials handed out. Terminal.
    Redeemed,
    /// Deadline passed before redemption. Terminal.
    Expired,
}

impl SessionState {
    /// Whether `self -> to` is a legal forward step.
    ///
    /// `Expired` is not listed: it is derived from the clock, never
    /// assigned through a transition.
    pub fn can_advance_to(self, to: SessionState) -> bool {
        matches!(
            (self, to),
            (SessionState::Pending, SessionState::Verified)
                | (SessionState::Verified, SessionState::Redeemed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Redeemed | SessionState::Expired)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Pending => write!(f, "pending"),
            SessionState::Verified => write!(f, "verified"),
            SessionState::Redeemed => write!(f, "redeemed"),
            SessionState::Expired => write!(f, "expired"),
        }
    }
}

/// A single pairing session bound to one identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingSession {
    /// Unique id distinguishing this session from successors under the
    /// same identity.
    pub session_id: Uuid,
    /// Canonical identity the session belongs to.
    pub identity: String,
    /// Canonical pairing code (uppercase, no separators).
    pub code: String,
    /// When the session was issued.
    pub created_at: DateTime<Utc>,
    /// Hard deadline; at or past this instant the session is expired.
    pub expires_at: DateTime<Utc>,
    /// Current lifecycle state.
    pub state: SessionState,
    /// Artifact area the session owns.
    pub artifact: ArtifactRef,
}

impl PairingSession {
    /// Create a fresh `Pending` session expiring `ttl` after `now`.
    pub fn new(
        identity: String,
        code: String,
        artifact: ArtifactRef,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            session_id: Uuid::new_v4(),
            identity,
            code,
            created_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
            state: SessionState::Pending,
            artifact,
        }
    }

    /// Whether the session's deadline has passed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Time left until expiry at `now`, clamped to zero.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn artifact(id: &str) -> ArtifactRef {
        ArtifactRef {
            id: id.to_string(),
            dir: PathBuf::from("/tmp/pairgate-test").join(id),
        }
    }

    fn session(ttl_secs: u64, now: DateTime<Utc>) -> PairingSession {
        PairingSession::new(
            "254712345678".to_string(),
            "AB3D9XK2".to_string(),
            artifact("254712345678-0-deadbeef"),
            Duration::from_secs(ttl_secs),
            now,
        )
    }

    #[test]
    fn test_new_session_is_pending_with_deadline() {
        let now = Utc::now();
        let s = session(120, now);
        assert_eq!(s.state, SessionState::Pending);
        assert_eq!(s.created_at, now);
        assert_eq!(s.expires_at, now + chrono::Duration::seconds(120));
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let now = Utc::now();
        let s = session(120, now);
        assert!(!s.is_expired(now));
        assert!(!s.is_expired(now + chrono::Duration::seconds(119)));
        // Exactly at the deadline counts as expired.
        assert!(s.is_expired(now + chrono::Duration::seconds(120)));
        assert!(s.is_expired(now + chrono::Duration::seconds(121)));
    }

    #[test]
    fn test_remaining_clamps_to_zero() {
        let now = Utc::now();
        let s = session(120, now);
        assert_eq!(s.remaining(now), Duration::from_secs(120));
        assert_eq!(
            s.remaining(now + chrono::Duration::seconds(500)),
            Duration::ZERO
        );
    }

    #[test]
    fn test_legal_forward_steps() {
        assert!(SessionState::Pending.can_advance_to(SessionState::Verified));
        assert!(SessionState::Verified.can_advance_to(SessionState::Redeemed));
    }

    #[test]
    fn test_illegal_steps_rejected() {
        assert!(!SessionState::Pending.can_advance_to(SessionState::Redeemed));
        assert!(!SessionState::Verified.can_advance_to(SessionState::Pending));
        assert!(!SessionState::Redeemed.can_advance_to(SessionState::Verified));
        assert!(!SessionState::Expired.can_advance_to(SessionState::Pending));
        assert!(!SessionState::Pending.can_advance_to(SessionState::Expired));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!SessionState::Pending.is_terminal());
        assert!(!SessionState::Verified.is_terminal());
        assert!(SessionState::Redeemed.is_terminal());
        assert!(SessionState::Expired.is_terminal());
    }

    #[test]
    fn test_state_display_lowercase() {
        assert_eq!(SessionState::Pending.to_string(), "pending");
        assert_eq!(SessionState::Verified.to_string(), "verified");
        assert_eq!(SessionState::Redeemed.to_string(), "redeemed");
        assert_eq!(SessionState::Expired.to_string(), "expired");
    }
}
