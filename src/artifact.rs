//! Per-session artifact areas on disk.
//!
//! Every pairing session owns exactly one directory under the artifact
//! root. The directory is created when the session is issued and removed
//! as a unit when the session is redeemed, abandoned, or reaped, so
//! nothing a session scaffolds can outlive it unaccounted for.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Reference to one session's artifact area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Directory name under the artifact root.
    pub id: String,
    /// Full path of the directory.
    pub dir: PathBuf,
}

/// Allocates and reclaims per-session artifact directories.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocate a fresh artifact area for `identity`.
    ///
    /// The id is `<identity>-<unix seconds>-<8 hex>`; the random suffix
    /// keeps ids unique when an identity pairs repeatedly within a second.
    pub fn allocate(&self, identity: &str, now: DateTime<Utc>) -> std::io::Result<ArtifactRef> {
        let suffix = rand::thread_rng().next_u32();
        let id = format!("{identity}-{}-{suffix:08x}", now.timestamp());
        let dir = self.root.join(&id);
        std::fs::create_dir_all(&dir)?;
        Ok(ArtifactRef { id, dir })
    }

    /// Remove an artifact area as a unit.
    ///
    /// Releasing an already-removed area is Ok, so release sites never
    /// have to coordinate over who got there first.
    pub fn release(&self, artifact: &ArtifactRef) -> std::io::Result<()> {
        match std::fs::remove_dir_all(&artifact.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Remove orphaned directories older than `cutoff` that are not in
    /// `live_ids`. Returns how many were removed.
    ///
    /// A directory belonging to a live session is never touched, however
    /// old its mtime looks. Entries that vanish or cannot be read
    /// mid-scan are skipped, not fatal.
    pub fn sweep_stale(
        &self,
        now: DateTime<Utc>,
        cutoff: Duration,
        live_ids: &HashSet<String>,
    ) -> std::io::Result<usize> {
        let now_sys = SystemTime::from(now);
        let mut removed = 0;

        for entry in std::fs::read_dir(&self.root)? {
            // A concurrent release can remove an entry between the
            // directory read and the stat; one unreadable entry must not
            // abort the whole sweep.
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipped unreadable artifact root entry");
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if live_ids.contains(&name) {
                continue;
            }

            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(e) => {
                    tracing::warn!(artifact_id = %name, error = %e, "Skipped unstatable artifact entry");
                    continue;
                }
            };
            if !meta.is_dir() {
                continue;
            }
            let modified = match meta.modified() {
                Ok(modified) => modified,
                Err(e) => {
                    tracing::warn!(artifact_id = %name, error = %e, "Skipped artifact entry without mtime");
                    continue;
                }
            };
            // A future mtime reads as age zero, never as stale.
            let age = now_sys.duration_since(modified).unwrap_or_default();
            if age < cutoff {
                continue;
            }

            match std::fs::remove_dir_all(entry.path()) {
                Ok(()) => {
                    removed += 1;
                    tracing::debug!(artifact_id = %name, "Removed stale artifact directory");
                }
                Err(e) => {
                    tracing::warn!(artifact_id = %name, error = %e, "Failed to remove stale artifact directory");
                }
            }
        }

        Ok(removed)
    }
}
