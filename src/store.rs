//! In-memory session store with lazy expiry.
//!
//! One coarse `RwLock` guards the identity-to-session map; every mutation
//! runs under the single writer, which is where per-identity operations
//! get their mutual exclusion. Expiry is lazy: readers treat an expired
//! record as absent, and only [`SessionStore::take_expired`] (driven by
//! the reaper) physically removes it. Nothing here touches the disk or
//! the handshake driver, so no lock is ever held across an await into
//! foreign code.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::artifact::ArtifactRef;
use crate::code;
use crate::error::StoreError;
use crate::session::{PairingSession, SessionState};

/// One live pairing session per identity, keyed by canonical identity.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, PairingSession>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh `Pending` session for `identity`.
    ///
    /// Fails with `Conflict` while a live session exists for the identity
    /// and with `CodeCollision` when the code matches another live
    /// session's code. An expired record under the same identity is
    /// displaced and returned alongside the new session so the caller can
    /// release its artifact area.
    pub async fn create(
        &self,
        identity: &str,
        code: &str,
        artifact: ArtifactRef,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<(PairingSession, Option<PairingSession>), StoreError> {
        let mut sessions = self.sessions.write().await;

        if let Some(existing) = sessions.get(identity) {
            if !existing.is_expired(now) {
                return Err(StoreError::Conflict {
                    identity: identity.to_string(),
                });
            }
        }

        // Uniqueness only counts live sessions; the identity's own record,
        // if still present, is expired by now and does not block the code.
        let canonical = code::canonicalize(code);
        if sessions
            .values()
            .any(|s| !s.is_expired(now) && s.code == canonical)
        {
            return Err(StoreError::CodeCollision);
        }

        let displaced = sessions.remove(identity).map(|mut s| {
            s.state = SessionState::Expired;
            s
        });

        let session = PairingSession::new(identity.to_string(), canonical, artifact, ttl, now);
        sessions.insert(identity.to_string(), session.clone());

        Ok((session, displaced))
    }

    /// Fetch the live session for `identity`. Expired records read as
    /// absent; removing them is the reaper's job.
    pub async fn get(&self, identity: &str, now: DateTime<Utc>) -> Option<PairingSession> {
        self.sessions
            .read()
            .await
            .get(identity)
            .filter(|s| !s.is_expired(now))
            .cloned()
    }

    /// Advance `identity`'s session from `from` to `to`.
    ///
    /// Only non-terminal targets are accepted here: redemption goes
    /// through [`SessionStore::claim_verified`], which removes the record
    /// in the same critical section, and expiry is derived from the
    /// clock, never written.
    pub async fn transition(
        &self,
        identity: &str,
        from: SessionState,
        to: SessionState,
        now: DateTime<Utc>,
    ) -> Result<PairingSession, StoreError> {
        if to.is_terminal() || !from.can_advance_to(to) {
            return Err(StoreError::IllegalTransition { from, to });
        }

        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(identity)
            .filter(|s| !s.is_expired(now))
            .ok_or_else(|| StoreError::NotFound {
                identity: identity.to_string(),
            })?;

        if session.state != from {
            return Err(StoreError::InvalidState {
                identity: identity.to_string(),
                current: session.state,
                expected: from,
            });
        }

        session.state = to;
        Ok(session.clone())
    }

    /// Atomically claim a `Verified` session for redemption.
    ///
    /// The record is removed and returned with its state advanced to
    /// `Redeemed`, all under one writer hold, so exactly one of any number
    /// of concurrent redeemers wins; the rest observe `NotFound`.
    pub async fn claim_verified(
        &self,
        identity: &str,
        now: DateTime<Utc>,
    ) -> Result<PairingSession, StoreError> {
        let mut sessions = self.sessions.write().await;

        let current = match sessions.get(identity) {
            Some(s) if !s.is_expired(now) => s.state,
            _ => {
                return Err(StoreError::NotFound {
                    identity: identity.to_string(),
                });
            }
        };

        if current != SessionState::Verified {
            return Err(StoreError::InvalidState {
                identity: identity.to_string(),
                current,
                expected: SessionState::Verified,
            });
        }

        let mut session = sessions
            .remove(identity)
            .ok_or_else(|| StoreError::NotFound {
                identity: identity.to_string(),
            })?;
        session.state = SessionState::Redeemed;
        Ok(session)
    }

    /// Remove whatever record `identity` holds, expired or not. Idempotent.
    pub async fn remove(&self, identity: &str) -> Option<PairingSession> {
        self.sessions.write().await.remove(identity)
    }

    /// Remove `identity`'s record only if its session id matches.
    ///
    /// Cleanup after a failed handshake must not clobber a successor
    /// session created for the same identity in the meantime.
    pub async fn remove_session(
        &self,
        identity: &str,
        session_id: Uuid,
    ) -> Option<PairingSession> {
        let mut sessions = self.sessions.write().await;
        match sessions.get(identity) {
            Some(s) if s.session_id == session_id => sessions.remove(identity),
            _ => None,
        }
    }

    /// Remove and return `identity`'s record only if it is expired at
    /// `now`, marked `Expired`. A fresh replacement is left alone.
    pub async fn take_expired(
        &self,
        identity: &str,
        now: DateTime<Utc>,
    ) -> Option<PairingSession> {
        let mut sessions = self.sessions.write().await;
        match sessions.get(identity) {
            Some(s) if s.is_expired(now) => sessions.remove(identity).map(|mut s| {
                s.state = SessionState::Expired;
                s
            }),
            _ => None,
        }
    }

    /// Snapshot of every expired record at `now`. This is the physical
    /// scan the reaper starts from; lazy reads never see these.
    pub async fn all_expired(&self, now: DateTime<Utc>) -> Vec<PairingSession> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.is_expired(now))
            .cloned()
            .collect()
    }

    /// Artifact ids owned by live sessions at `now`. The stale-directory
    /// sweep must never touch these.
    pub async fn live_artifact_ids(&self, now: DateTime<Utc>) -> HashSet<String> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| !s.is_expired(now))
            .map(|s| s.artifact.id.clone())
            .collect()
    }

    /// Number of live sessions at `now`.
    pub async fn live_count(&self, now: DateTime<Utc>) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| !s.is_expired(now))
            .count()
    }

    /// Swap in a protocol-issued code for a specific session, keeping
    /// codes unique across live sessions. As everywhere else, an expired
    /// record reads as absent: its code does not block adoption, and its
    /// own code can no longer be swapped.
    pub async fn update_code(
        &self,
        identity: &str,
        session_id: Uuid,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let canonical = code::canonicalize(code);
        let mut sessions = self.sessions.write().await;

        if sessions
            .values()
            .any(|s| s.session_id != session_id && !s.is_expired(now) && s.code == canonical)
        {
            return Err(StoreError::CodeCollision);
        }

        let session = sessions
            .get_mut(identity)
            .filter(|s| s.session_id == session_id && !s.is_expired(now))
            .ok_or_else(|| StoreError::NotFound {
                identity: identity.to_string(),
            })?;

        session.code = canonical;
        Ok(())
    }

    /// Drain every record, expired or not. Used for teardown.
    pub async fn drain(&self) -> Vec<PairingSession> {
        self.sessions
            .write()
            .await
            .drain()
            .map(|(_, session)| session)
            .collect()
    }
}
