//! Pairing lifecycle orchestration: issue, verify, redeem.
//!
//! The manager owns the session store, the throttle, the artifact store,
//! and the handshake driver, and sequences them so that every session
//! record created here is either redeemed, abandoned with its artifact
//! released, or left TTL-bounded for the reaper. Driver calls run outside
//! any store lock and under the configured timeout; `now` is an explicit
//! argument throughout so tests can inject time.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::artifact::{ArtifactRef, ArtifactStore};
use crate::code::{self, CodeSource};
use crate::config::PairingConfig;
use crate::error::{PairingError, StoreError};
use crate::handshake::{CredentialMaterial, HandshakeDriver};
use crate::session::{PairingSession, SessionState};
use crate::store::SessionStore;
use crate::throttle::{IdentityThrottle, ThrottleDecision};

/// Code-generation retries before a collision becomes an internal error.
const MAX_CODE_ATTEMPTS: usize = 5;

/// Result of a successful issue call.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedPairing {
    /// Display form of the pairing code (hyphenated halves).
    pub code: String,
    /// Seconds until the session expires.
    pub expires_in: u64,
}

/// Orchestrates the pairing lifecycle for all identities.
pub struct PairingManager {
    config: PairingConfig,
    store: SessionStore,
    throttle: IdentityThrottle,
    artifacts: ArtifactStore,
    driver: Arc<dyn HandshakeDriver>,
}

impl PairingManager {
    /// Wire up a manager. The store and artifact store are shared with the
    /// reaper, so the caller passes them in rather than the manager
    /// building its own.
    pub fn new(
        config: PairingConfig,
        store: SessionStore,
        artifacts: ArtifactStore,
        driver: Arc<dyn HandshakeDriver>,
    ) -> Self {
        let throttle = IdentityThrottle::new(config.throttle_window, config.throttle_max_attempts);
        Self {
            config,
            store,
            throttle,
            artifacts,
            driver,
        }
    }

    /// Start a pairing session for `identity` and hand back the code to
    /// display.
    ///
    /// The session record is created before the upstream handshake is
    /// opened, so a request cancelled mid-flight leaves at worst a
    /// TTL-bounded record that still owns its artifact area. A failed or
    /// timed-out handshake removes the record (by session id) and releases
    /// the area before the error is returned.
    pub async fn issue(
        &self,
        identity: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedPairing, PairingError> {
        let identity = self.validate_identity(identity)?;

        match self.throttle.check_and_record(&identity, now).await {
            ThrottleDecision::Allowed => {}
            ThrottleDecision::Limited { retry_after } => {
                tracing::warn!(
                    identity = %identity,
                    retry_after_secs = retry_after.as_secs(),
                    "Pairing issuance throttled"
                );
                return Err(PairingError::RateLimited { retry_after });
            }
        }

        let artifact =
            self.artifacts
                .allocate(&identity, now)
                .map_err(|e| PairingError::Internal {
                    reason: format!("artifact allocation failed: {e}"),
                })?;

        let (session, displaced) = match self.create_with_fresh_code(&identity, &artifact, now).await
        {
            Ok(created) => created,
            Err(e) => {
                self.release_quietly(&identity, &artifact);
                return Err(e);
            }
        };

        if let Some(old) = displaced {
            // The displaced record has already left the store, so no sweep
            // will ever reach it. This is its one close-and-release site.
            self.close_quietly(&identity, &old.artifact).await;
            self.release_quietly(&identity, &old.artifact);
        }

        let open = match tokio::time::timeout(
            self.config.handshake_timeout,
            self.driver.open_handshake(&identity, &session.artifact),
        )
        .await
        {
            Ok(Ok(open)) => open,
            Ok(Err(e)) => {
                tracing::warn!(identity = %identity, error = %e, "Pairing handshake failed");
                self.abandon_session(&identity, &session).await;
                return Err(PairingError::UpstreamFailure {
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                tracing::warn!(
                    identity = %identity,
                    timeout_secs = self.config.handshake_timeout.as_secs(),
                    "Pairing handshake timed out"
                );
                self.abandon_session(&identity, &session).await;
                return Err(PairingError::UpstreamTimeout {
                    timeout: self.config.handshake_timeout,
                });
            }
        };

        let mut canonical = session.code.clone();
        if self.config.code_source == CodeSource::ProtocolIssued {
            if let Some(protocol_code) = open.protocol_code {
                canonical = code::canonicalize(&protocol_code);
                if let Err(e) = self
                    .store
                    .update_code(&identity, session.session_id, &canonical, now)
                    .await
                {
                    self.abandon_session(&identity, &session).await;
                    return Err(PairingError::Internal {
                        reason: format!("failed to adopt protocol code: {e}"),
                    });
                }
            }
        }

        tracing::info!(
            identity = %identity,
            session_id = %session.session_id,
            expires_at = %session.expires_at,
            "Pairing session issued"
        );

        Ok(IssuedPairing {
            code: code::display_code(&canonical),
            expires_in: session.remaining(now).as_secs(),
        })
    }

    /// Check a submitted code against `identity`'s live session.
    ///
    /// Comparison is case- and grouping-insensitive and constant-time. A
    /// session that is already `Verified` verifies again successfully, so
    /// a duplicated confirmation is harmless.
    pub async fn verify(
        &self,
        identity: &str,
        submitted_code: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, PairingError> {
        let identity = self.validate_identity(identity)?;

        let session = self
            .store
            .get(&identity, now)
            .await
            .ok_or(PairingError::NotFound)?;

        if !code::codes_match(submitted_code, &session.code) {
            tracing::warn!(identity = %identity, "Pairing code mismatch");
            return Err(PairingError::InvalidCode);
        }

        match self
            .store
            .transition(&identity, SessionState::Pending, SessionState::Verified, now)
            .await
        {
            Ok(_) => {
                tracing::info!(identity = %identity, "Pairing code verified");
                Ok(true)
            }
            Err(StoreError::InvalidState {
                current: SessionState::Verified,
                ..
            }) => Ok(true),
            Err(StoreError::NotFound { .. }) => Err(PairingError::NotFound),
            Err(other) => Err(PairingError::Internal {
                reason: other.to_string(),
            }),
        }
    }

    /// Exchange a verified session for credential material.
    ///
    /// Credentials are materialized before the record is claimed, so an
    /// upstream failure leaves the session `Verified` and retryable until
    /// it expires. The claim itself is one-shot: of any number of
    /// concurrent redeemers, exactly one gets the material-bearing removal
    /// and the rest observe `NotFound`.
    pub async fn redeem(
        &self,
        identity: &str,
        now: DateTime<Utc>,
    ) -> Result<CredentialMaterial, PairingError> {
        let identity = self.validate_identity(identity)?;

        let session = self
            .store
            .get(&identity, now)
            .await
            .ok_or(PairingError::NotFound)?;
        if session.state == SessionState::Pending {
            return Err(PairingError::NotVerified);
        }

        let material = match tokio::time::timeout(
            self.config.handshake_timeout,
            self.driver.materialize_credentials(&identity, &session.artifact),
        )
        .await
        {
            Ok(Ok(material)) => material,
            Ok(Err(e)) => {
                tracing::warn!(identity = %identity, error = %e, "Credential materialization failed");
                return Err(PairingError::UpstreamFailure {
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                tracing::warn!(
                    identity = %identity,
                    timeout_secs = self.config.handshake_timeout.as_secs(),
                    "Credential materialization timed out"
                );
                return Err(PairingError::UpstreamTimeout {
                    timeout: self.config.handshake_timeout,
                });
            }
        };

        let claimed = match self.store.claim_verified(&identity, now).await {
            Ok(claimed) => claimed,
            Err(StoreError::NotFound { .. }) => return Err(PairingError::NotFound),
            Err(StoreError::InvalidState { .. }) => return Err(PairingError::NotVerified),
            Err(other) => {
                return Err(PairingError::Internal {
                    reason: other.to_string(),
                });
            }
        };

        self.close_quietly(&identity, &claimed.artifact).await;
        self.release_quietly(&identity, &claimed.artifact);

        tracing::info!(
            identity = %identity,
            session_id = %claimed.session_id,
            "Pairing session redeemed"
        );
        Ok(material)
    }

    /// Tear down all state: close handshakes, release artifact areas, and
    /// clear the throttle.
    pub async fn shutdown(&self) {
        let drained = self.store.drain().await;
        let releases = drained.iter().map(|session| async move {
            self.close_quietly(&session.identity, &session.artifact).await;
            self.release_quietly(&session.identity, &session.artifact);
        });
        futures::future::join_all(releases).await;

        self.throttle.clear().await;
        if !drained.is_empty() {
            tracing::info!(
                released = drained.len(),
                "Released remaining pairing sessions on shutdown"
            );
        }
    }

    /// Number of live sessions at `now`.
    pub async fn live_sessions(&self, now: DateTime<Utc>) -> usize {
        self.store.live_count(now).await
    }

    /// Number of identities with throttle history.
    pub async fn tracked_identities(&self) -> usize {
        self.throttle.tracked_identities().await
    }

    pub fn config(&self) -> &PairingConfig {
        &self.config
    }

    fn validate_identity(&self, raw: &str) -> Result<String, PairingError> {
        self.config
            .identity_rule
            .validate(raw)
            .map_err(|reason| PairingError::InvalidIdentity { reason })
    }

    /// Create the session record, regenerating the code on a collision.
    async fn create_with_fresh_code(
        &self,
        identity: &str,
        artifact: &ArtifactRef,
        now: DateTime<Utc>,
    ) -> Result<(PairingSession, Option<PairingSession>), PairingError> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let candidate = code::generate_code(self.config.code_length);
            match self
                .store
                .create(
                    identity,
                    &candidate,
                    artifact.clone(),
                    self.config.session_ttl,
                    now,
                )
                .await
            {
                Ok(created) => return Ok(created),
                Err(StoreError::CodeCollision) => continue,
                Err(StoreError::Conflict { identity }) => {
                    return Err(PairingError::Conflict { identity });
                }
                Err(other) => {
                    return Err(PairingError::Internal {
                        reason: other.to_string(),
                    });
                }
            }
        }
        Err(PairingError::Internal {
            reason: format!("no unique pairing code after {MAX_CODE_ATTEMPTS} attempts"),
        })
    }

    /// Remove an abandoned session precisely (by session id) and reclaim
    /// what it owns. Best-effort on the driver and filesystem sides.
    async fn abandon_session(&self, identity: &str, session: &PairingSession) {
        self.close_quietly(identity, &session.artifact).await;
        self.release_quietly(identity, &session.artifact);
        self.store.remove_session(identity, session.session_id).await;
    }

    async fn close_quietly(&self, identity: &str, artifact: &ArtifactRef) {
        match tokio::time::timeout(
            self.config.handshake_timeout,
            self.driver.close_handshake(identity, artifact),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(identity = %identity, error = %e, "Handshake close failed");
            }
            Err(_) => {
                tracing::warn!(identity = %identity, "Handshake close timed out");
            }
        }
    }

    fn release_quietly(&self, identity: &str, artifact: &ArtifactRef) {
        if let Err(e) = self.artifacts.release(artifact) {
            tracing::warn!(
                identity = %identity,
                artifact_id = %artifact.id,
                error = %e,
                "Failed to release artifact area"
            );
        }
    }
}
