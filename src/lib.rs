//! Pairing session lifecycle for identity-addressed devices.
//!
//! A pairing session walks one identity from a short-lived numeric or
//! alphanumeric code to redeemed credential material. The crate owns the
//! whole lifecycle: code issuance with per-identity rate limiting,
//! constant-time verification, one-shot redemption through a pluggable
//! handshake driver, and background reaping of expired sessions and the
//! filesystem artifacts they leave behind.
//!
//! The [`manager::PairingManager`] is the front door; the
//! [`server::PairingServer`] exposes it over HTTP.

pub mod artifact;
pub mod code;
pub mod config;
pub mod error;
pub mod handshake;
pub mod identity;
pub mod manager;
pub mod reaper;
pub mod server;
pub mod session;
pub mod store;
pub mod throttle;

pub use artifact::{ArtifactRef, ArtifactStore};
pub use code::CodeSource;
pub use config::PairingConfig;
pub use error::{Error, PairingError, Result};
pub use handshake::{CredentialMaterial, HandshakeDriver, HandshakeOpen, LocalHandshakeDriver};
pub use identity::IdentityRule;
pub use manager::{IssuedPairing, PairingManager};
pub use reaper::{SessionReaper, SweepStats};
pub use server::{PairingServer, ServerConfig};
pub use session::{PairingSession, SessionState};
pub use store::SessionStore;
pub use throttle::{IdentityThrottle, ThrottleDecision};
