//! Conversion of dropped input files into processed output.
//!
//! The conversion itself is an opaque external command. What this module
//! owns is the coordination contract around it: progress lines appended to
//! the per-job debug log, the output file and its permission bits, the
//! `.success` marker, and removal of the consumed input file.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::names;

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Permission bits applied to produced output files (unix only).
    pub out_mode: u32,
    /// Conversion command, invoked as `<command> <input> <output>`.
    pub command: String,
}

/// Failure of a single file's conversion. Other files in the same pass are
/// unaffected.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("conversion command failed ({status}): {stderr}")]
    Command { status: String, stderr: String },
}

/// Handle for requesting a processing run. Cheap to clone.
///
/// Requests are fire-and-forget: the channel holds at most one pending run,
/// so triggers arriving while a run is in flight coalesce into a single
/// follow-up pass.
#[derive(Clone)]
pub struct ProcessorHandle {
    tx: mpsc::Sender<()>,
}

impl ProcessorHandle {
    pub fn trigger(&self) {
        // A full slot means a run is already pending; dropping is fine.
        let _ = self.tx.try_send(());
    }
}

pub struct Processor {
    config: ProcessorConfig,
}

impl Processor {
    /// Validate the configuration and make sure both data directories exist.
    /// Failures here are fatal at startup.
    pub fn new(config: ProcessorConfig) -> Result<Self> {
        if config.command.trim().is_empty() {
            bail!("conversion command must not be empty");
        }
        std::fs::create_dir_all(&config.input_dir).with_context(|| {
            format!("creating input directory {}", config.input_dir.display())
        })?;
        std::fs::create_dir_all(&config.output_dir).with_context(|| {
            format!("creating output directory {}", config.output_dir.display())
        })?;
        Ok(Self { config })
    }

    /// Spawn the processing loop; it waits for triggers until the token is
    /// cancelled. Each trigger scans the whole input directory.
    pub fn start(self, token: CancellationToken) -> (ProcessorHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(1);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    recv = rx.recv() => match recv {
                        Some(()) => {
                            if let Err(err) = self.process_all().await {
                                warn!("processing pass failed: {err:#}");
                            }
                        }
                        None => return,
                    },
                }
            }
        });

        (ProcessorHandle { tx }, handle)
    }

    /// Convert every regular file currently in the input directory. Per-file
    /// failures are logged into the job's debug log and do not abort the
    /// pass.
    pub async fn process_all(&self) -> Result<()> {
        let mut entries = fs::read_dir(&self.config.input_dir)
            .await
            .with_context(|| {
                format!("reading input directory {}", self.config.input_dir.display())
            })?;

        while let Some(entry) = entries.next_entry().await? {
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let debug_path = self.config.output_dir.join(names::debug_name(&name));

            match self.convert(&name, &entry.path(), &debug_path).await {
                Ok(()) => info!("processed {}", name),
                Err(err) => {
                    warn!("conversion of {} failed: {}", name, err);
                    let _ = append_line(&debug_path, &format!("Error: {}", err)).await;
                }
            }
        }

        Ok(())
    }

    async fn convert(
        &self,
        name: &str,
        input_path: &Path,
        debug_path: &Path,
    ) -> Result<(), ConvertError> {
        append_line(debug_path, &format!("Processing {}", name)).await?;

        let output_path = self.config.output_dir.join(name);
        let output = tokio::process::Command::new(&self.config.command)
            .arg(input_path)
            .arg(&output_path)
            .output()
            .await?;

        if !output.status.success() {
            return Err(ConvertError::Command {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(
                &output_path,
                std::fs::Permissions::from_mode(self.config.out_mode),
            )
            .await?;
        }

        append_line(debug_path, &format!("Finished {}", name)).await?;

        let success_path = self
            .config
            .output_dir
            .join(names::success_name(&names::debug_name(name)));
        fs::write(&success_path, b"").await?;

        fs::remove_file(input_path).await?;
        Ok(())
    }
}

/// Append one newline-terminated line to the job's debug log, creating the
/// file if it does not exist yet.
async fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(format!("{}\n", line).as_bytes()).await?;
    Ok(())
}
