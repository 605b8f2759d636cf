//! Periodic reclamation of expired sessions and orphaned artifacts.
//!
//! Lazy expiry makes expired records invisible to readers but leaves them
//! (and the directories they own) in place. The reaper is the component
//! that physically removes them: each sweep takes every expired record
//! out of the store, closes its handshake, releases its artifact area,
//! and then clears orphaned directories no live session owns.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::artifact::ArtifactStore;
use crate::config::PairingConfig;
use crate::handshake::HandshakeDriver;
use crate::store::SessionStore;

/// Counters from one sweep pass.
#[derive(Debug, Clone)]
pub struct SweepStats {
    /// Expired sessions removed from the store.
    pub reaped: usize,
    /// Close or release failures (logged, never fatal).
    pub release_failures: usize,
    /// Orphaned artifact directories removed.
    pub stale_dirs_removed: usize,
    /// When the sweep ran.
    pub timestamp: DateTime<Utc>,
}

/// Background sweeper for the session store and artifact root.
pub struct SessionReaper {
    interval: Duration,
    staleness_cutoff: Duration,
    close_timeout: Duration,
    store: SessionStore,
    artifacts: ArtifactStore,
    driver: Arc<dyn HandshakeDriver>,
    last_sweep: Arc<RwLock<Option<SweepStats>>>,
}

impl SessionReaper {
    /// Create a reaper over the same store, artifact store, and driver the
    /// manager uses.
    pub fn new(
        config: &PairingConfig,
        store: SessionStore,
        artifacts: ArtifactStore,
        driver: Arc<dyn HandshakeDriver>,
    ) -> Self {
        Self {
            interval: config.reap_interval,
            staleness_cutoff: config.staleness_cutoff,
            close_timeout: config.handshake_timeout,
            store,
            artifacts,
            driver,
            last_sweep: Arc::new(RwLock::new(None)),
        }
    }

    /// Run one sweep pass at `now`.
    ///
    /// Release failures are counted and logged; a session that cannot be
    /// fully released still leaves the store, and its directory remains
    /// for the stale sweep to retry later.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepStats {
        let mut stats = SweepStats {
            reaped: 0,
            release_failures: 0,
            stale_dirs_removed: 0,
            timestamp: now,
        };

        for expired in self.store.all_expired(now).await {
            // The record may have been displaced by a fresh session since
            // the scan; take_expired removes only what is still expired.
            let Some(session) = self.store.take_expired(&expired.identity, now).await else {
                continue;
            };

            match tokio::time::timeout(
                self.close_timeout,
                self.driver.close_handshake(&session.identity, &session.artifact),
            )
            .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    stats.release_failures += 1;
                    tracing::warn!(
                        identity = %session.identity,
                        error = %e,
                        "Handshake close failed during sweep"
                    );
                }
                Err(_) => {
                    stats.release_failures += 1;
                    tracing::warn!(
                        identity = %session.identity,
                        "Handshake close timed out during sweep"
                    );
                }
            }

            if let Err(e) = self.artifacts.release(&session.artifact) {
                stats.release_failures += 1;
                tracing::warn!(
                    identity = %session.identity,
                    artifact_id = %session.artifact.id,
                    error = %e,
                    "Failed to release artifact area during sweep"
                );
            }

            stats.reaped += 1;
            tracing::debug!(
                identity = %session.identity,
                session_id = %session.session_id,
                "Reaped expired pairing session"
            );
        }

        let live = self.store.live_artifact_ids(now).await;
        match self.artifacts.sweep_stale(now, self.staleness_cutoff, &live) {
            Ok(removed) => stats.stale_dirs_removed = removed,
            Err(e) => {
                tracing::warn!(error = %e, "Stale artifact sweep failed");
            }
        }

        stats
    }

    /// Start the periodic sweep task.
    pub fn spawn(self) -> JoinHandle<()> {
        let interval = self.interval;

        tokio::spawn(async move {
            tracing::info!(
                interval_secs = interval.as_secs(),
                staleness_cutoff_secs = self.staleness_cutoff.as_secs(),
                "Session reaper started"
            );

            let mut timer = tokio::time::interval(interval);
            loop {
                timer.tick().await;

                let stats = self.sweep(Utc::now()).await;
                if stats.reaped > 0 || stats.stale_dirs_removed > 0 {
                    tracing::info!(
                        reaped = stats.reaped,
                        stale_dirs_removed = stats.stale_dirs_removed,
                        release_failures = stats.release_failures,
                        "Sweep finished"
                    );
                }
                *self.last_sweep.write().await = Some(stats);
            }
        })
    }

    /// Result of the most recent sweep, if any.
    pub async fn last_sweep(&self) -> Option<SweepStats> {
        self.last_sweep.read().await.clone()
    }
}
