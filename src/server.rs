//! Thin HTTP facade over the pairing manager.
//!
//! Handlers validate nothing and decide nothing; they pass requests to
//! the manager and translate `PairingError` into a status code plus the
//! uniform `ApiResponse` envelope. The error `kind` field carries the
//! machine-readable failure kind, so clients never parse messages.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::error::{PairingError, ServerError};
use crate::handshake::CredentialMaterial;
use crate::manager::{IssuedPairing, PairingManager};

/// Configuration for the HTTP facade.
pub struct ServerConfig {
    /// Address to bind the server to.
    pub addr: SocketAddr,
}

/// Uniform response envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

/// Wire form of a pairing failure.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct IssueRequest {
    identity: String,
}

#[derive(Debug, Deserialize)]
struct VerifyRequest {
    identity: String,
    code: String,
}

#[derive(Debug, Deserialize)]
struct RedeemRequest {
    identity: String,
}

#[derive(Debug, Serialize)]
struct VerifyData {
    verified: bool,
}

#[derive(Debug, Serialize)]
struct HealthData {
    status: &'static str,
    live_sessions: usize,
    tracked_identities: usize,
}

/// Build the pairing API router with its state applied.
pub fn router(manager: Arc<PairingManager>) -> Router {
    Router::new()
        .route("/pairing/issue", post(issue_handler))
        .route("/pairing/verify", post(verify_handler))
        .route("/pairing/redeem", post(redeem_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(manager)
}

async fn issue_handler(
    State(manager): State<Arc<PairingManager>>,
    Json(req): Json<IssueRequest>,
) -> (StatusCode, Json<ApiResponse<IssuedPairing>>) {
    respond(manager.issue(&req.identity, Utc::now()).await)
}

async fn verify_handler(
    State(manager): State<Arc<PairingManager>>,
    Json(req): Json<VerifyRequest>,
) -> (StatusCode, Json<ApiResponse<VerifyData>>) {
    respond(
        manager
            .verify(&req.identity, &req.code, Utc::now())
            .await
            .map(|verified| VerifyData { verified }),
    )
}

async fn redeem_handler(
    State(manager): State<Arc<PairingManager>>,
    Json(req): Json<RedeemRequest>,
) -> (StatusCode, Json<ApiResponse<CredentialMaterial>>) {
    respond(manager.redeem(&req.identity, Utc::now()).await)
}

async fn health_handler(
    State(manager): State<Arc<PairingManager>>,
) -> Json<ApiResponse<HealthData>> {
    let now = Utc::now();
    Json(ApiResponse {
        success: true,
        data: Some(HealthData {
            status: "ok",
            live_sessions: manager.live_sessions(now).await,
            tracked_identities: manager.tracked_identities().await,
        }),
        error: None,
    })
}

fn respond<T: Serialize>(result: Result<T, PairingError>) -> (StatusCode, Json<ApiResponse<T>>) {
    match result {
        Ok(data) => (
            StatusCode::OK,
            Json(ApiResponse {
                success: true,
                data: Some(data),
                error: None,
            }),
        ),
        Err(err) => (
            status_for(&err),
            Json(ApiResponse {
                success: false,
                data: None,
                error: Some(ApiError {
                    kind: err.kind().to_string(),
                    message: err.to_string(),
                }),
            }),
        ),
    }
}

fn status_for(err: &PairingError) -> StatusCode {
    match err {
        PairingError::InvalidIdentity { .. } | PairingError::InvalidCode => StatusCode::BAD_REQUEST,
        PairingError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        PairingError::Conflict { .. } | PairingError::NotVerified => StatusCode::CONFLICT,
        PairingError::NotFound => StatusCode::NOT_FOUND,
        PairingError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        PairingError::UpstreamFailure { .. } => StatusCode::BAD_GATEWAY,
        PairingError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// The pairing API server. Binds on `start`, serves until `shutdown`.
pub struct PairingServer {
    config: ServerConfig,
    manager: Arc<PairingManager>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl PairingServer {
    pub fn new(config: ServerConfig, manager: Arc<PairingManager>) -> Self {
        Self {
            config,
            manager,
            shutdown_tx: None,
            handle: None,
            local_addr: None,
        }
    }

    /// Bind the listener and spawn the server task. Returns the bound
    /// address, which differs from the configured one when port 0 was
    /// requested.
    pub async fn start(&mut self) -> Result<SocketAddr, ServerError> {
        let app = router(self.manager.clone());

        let listener = tokio::net::TcpListener::bind(self.config.addr)
            .await
            .map_err(|e| ServerError::BindFailed {
                addr: self.config.addr.to_string(),
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr().map_err(|e| ServerError::BindFailed {
            addr: self.config.addr.to_string(),
            reason: e.to_string(),
        })?;

        tracing::info!(addr = %local_addr, "Pairing server listening");

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                    tracing::info!("Pairing server shutting down");
                })
                .await
            {
                tracing::error!(error = %e, "Pairing server error");
            }
        });

        self.handle = Some(handle);
        self.local_addr = Some(local_addr);
        Ok(local_addr)
    }

    /// Address the server actually bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Signal graceful shutdown and wait for the server task to finish.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        self.local_addr = None;
    }
}
