//! Debounced watch over the input directory.
//!
//! Raw notify events arrive in bursts (one file copy can produce several
//! create/modify events), so the loop waits for a quiet period after the
//! last event before emitting a single trigger.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Watches one directory and emits one debounced trigger per change burst.
pub struct DirWatcher {
    // Dropping the notify watcher stops event delivery, so it is moved into
    // the debounce task and lives as long as the loop does.
    watcher: RecommendedWatcher,
    raw_events: mpsc::UnboundedReceiver<()>,
    delay: Duration,
}

impl DirWatcher {
    /// Set up the native watch on `dir`, creating the directory if needed.
    pub fn new(dir: &Path, delay: Duration) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating watched directory {}", dir.display()))?;

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                if matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) {
                    let _ = raw_tx.send(());
                }
            }
        })
        .context("creating filesystem watcher")?;

        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("watching {}", dir.display()))?;

        Ok(Self {
            watcher,
            raw_events: raw_rx,
            delay,
        })
    }

    /// Spawn the debounce loop. Returns the trigger channel and the task
    /// handle. The channel holds at most one pending trigger; a burst that
    /// quiets down while a previous trigger is still unconsumed is folded
    /// into it.
    pub fn start(mut self, token: CancellationToken) -> (mpsc::Receiver<()>, JoinHandle<()>) {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);

        let handle = tokio::spawn(async move {
            // Keep the native watch alive for the duration of the loop.
            let _watcher = self.watcher;
            let mut deadline: Option<Instant> = None;

            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    raw = self.raw_events.recv() => match raw {
                        Some(()) => deadline = Some(Instant::now() + self.delay),
                        None => return,
                    },
                    _ = async { sleep_until(deadline.unwrap()).await }, if deadline.is_some() => {
                        deadline = None;
                        debug!("quiet period elapsed, emitting trigger");
                        let _ = trigger_tx.try_send(());
                    }
                }
            }
        });

        (trigger_rx, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test]
    async fn file_write_produces_one_debounced_trigger() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = DirWatcher::new(dir.path(), Duration::from_millis(100)).unwrap();
        let token = CancellationToken::new();
        let (mut trigger, handle) = watcher.start(token.clone());

        std::fs::write(dir.path().join("scan.pdf"), b"data").unwrap();

        timeout(Duration::from_secs(5), trigger.recv())
            .await
            .expect("no trigger within timeout")
            .expect("trigger channel closed");

        // The burst was folded into a single trigger.
        assert!(
            timeout(Duration::from_millis(300), trigger.recv())
                .await
                .is_err()
        );

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn new_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("incoming");
        let _watcher = DirWatcher::new(&nested, Duration::from_millis(50)).unwrap();
        assert!(nested.is_dir());
    }
}
