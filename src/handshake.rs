//! Boundary to the external pairing protocol.
//!
//! The lifecycle manager drives the upstream protocol exclusively through
//! the [`HandshakeDriver`] capability. Everything protocol-specific (wire
//! format, transport, retries inside a single call) stays behind it; the
//! manager only decides when to open, materialize, and close, and bounds
//! each call with its own timeout.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::artifact::ArtifactRef;
use crate::error::HandshakeError;

/// Outcome of opening a handshake.
#[derive(Debug, Clone, Default)]
pub struct HandshakeOpen {
    /// Display code issued by the protocol itself, for deployments where
    /// the upstream owns the code. `None` in self-generated mode.
    pub protocol_code: Option<String>,
}

/// Credential material produced by a completed handshake.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialMaterial {
    /// Identity the material is bound to.
    pub identity: String,
    /// Artifact area holding the registered credential state.
    pub artifact_id: String,
    /// Opaque payload handed back to the caller.
    pub payload: serde_json::Value,
}

/// Capability surface the pairing core needs from the protocol side.
///
/// Implementations must tolerate `close_handshake` with no handshake open
/// and may be called for the same identity again after a failure.
#[async_trait]
pub trait HandshakeDriver: Send + Sync {
    /// Begin a pairing handshake for `identity`, scaffolding whatever the
    /// protocol needs inside the session's artifact area.
    async fn open_handshake(
        &self,
        identity: &str,
        artifact: &ArtifactRef,
    ) -> Result<HandshakeOpen, HandshakeError>;

    /// Complete registration and produce credential material. Called only
    /// after the pairing code has been verified.
    async fn materialize_credentials(
        &self,
        identity: &str,
        artifact: &ArtifactRef,
    ) -> Result<CredentialMaterial, HandshakeError>;

    /// Tear down any open handshake state for this session.
    async fn close_handshake(
        &self,
        identity: &str,
        artifact: &ArtifactRef,
    ) -> Result<(), HandshakeError>;
}

/// In-process driver for self-generated-code deployments.
///
/// Scaffolds a credential area on open, writes a registration record on
/// materialize, and clears its per-session state on close. The real
/// messaging-protocol driver lives outside this crate.
#[derive(Debug, Default)]
pub struct LocalHandshakeDriver {
    open: RwLock<HashSet<String>>,
}

impl LocalHandshakeDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HandshakeDriver for LocalHandshakeDriver {
    async fn open_handshake(
        &self,
        identity: &str,
        artifact: &ArtifactRef,
    ) -> Result<HandshakeOpen, HandshakeError> {
        tokio::fs::create_dir_all(artifact.dir.join("credentials")).await?;
        self.open.write().await.insert(artifact.id.clone());
        tracing::debug!(identity = %identity, artifact_id = %artifact.id, "Handshake opened");
        Ok(HandshakeOpen {
            protocol_code: None,
        })
    }

    async fn materialize_credentials(
        &self,
        identity: &str,
        artifact: &ArtifactRef,
    ) -> Result<CredentialMaterial, HandshakeError> {
        if !self.open.read().await.contains(&artifact.id) {
            return Err(HandshakeError::NotOpen {
                artifact_id: artifact.id.clone(),
            });
        }

        let payload = serde_json::json!({
            "identity": identity,
            "registered_at": chrono::Utc::now().to_rfc3339(),
        });
        let record = artifact.dir.join("credentials").join("registration.json");
        tokio::fs::write(&record, payload.to_string()).await?;

        Ok(CredentialMaterial {
            identity: identity.to_string(),
            artifact_id: artifact.id.clone(),
            payload,
        })
    }

    async fn close_handshake(
        &self,
        identity: &str,
        artifact: &ArtifactRef,
    ) -> Result<(), HandshakeError> {
        self.open.write().await.remove(&artifact.id);
        tracing::debug!(identity = %identity, artifact_id = %artifact.id, "Handshake closed");
        Ok(())
    }
}
