//! Time-based retention cleanup for the input and output directories.
//!
//! Jobs have no registry to expire them from; old files are simply removed
//! by modification time, regardless of whether the job they belonged to ever
//! completed.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use tokio::fs;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Files older than this are removed.
const MAX_AGE: Duration = Duration::from_secs(3 * 60 * 60);

/// Time between sweeps.
const SWEEP_PERIOD: Duration = Duration::from_secs(60 * 60);

/// Periodic sweeper over a set of directories.
pub struct RetentionCleaner {
    dirs: Vec<PathBuf>,
    max_age: Duration,
}

impl RetentionCleaner {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self {
            dirs,
            max_age: MAX_AGE,
        }
    }

    /// Spawn the cleanup loop: one sweep immediately, then one per period
    /// until the token is cancelled.
    pub fn start(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_PERIOD);
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = ticker.tick() => self.sweep().await,
                }
            }
        })
    }

    /// Remove everything older than the retention window.
    pub async fn sweep(&self) {
        let cutoff = SystemTime::now() - self.max_age;
        self.sweep_older_than(cutoff).await;
    }

    /// Remove regular files with a modification time before `cutoff`.
    /// Subdirectories are skipped; an unreadable directory skips that
    /// directory for the pass; a failed deletion is logged and skipped.
    pub async fn sweep_older_than(&self, cutoff: SystemTime) {
        for dir in &self.dirs {
            let mut entries = match fs::read_dir(dir).await {
                Ok(entries) => entries,
                Err(err) => {
                    debug!("cleanup: cannot read dir {}: {}", dir.display(), err);
                    continue;
                }
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(err) => {
                        debug!("cleanup: error listing {}: {}", dir.display(), err);
                        break;
                    }
                };
                let metadata = match entry.metadata().await {
                    Ok(metadata) => metadata,
                    Err(_) => continue,
                };
                if !metadata.is_file() {
                    continue;
                }
                let modified = match metadata.modified() {
                    Ok(modified) => modified,
                    Err(_) => continue,
                };
                if modified >= cutoff {
                    continue;
                }

                let path = entry.path();
                match fs::remove_file(&path).await {
                    Ok(()) => info!("cleanup: removed old file {}", path.display()),
                    Err(err) => {
                        debug!("cleanup: failed to remove {}: {}", path.display(), err)
                    }
                }
            }
        }
    }
}
