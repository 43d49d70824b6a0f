//! scandrop - drop-folder document conversion server.
//!
//! Files dropped into the input directory (or uploaded through the web page)
//! are converted by an external command; progress is streamed live over SSE
//! and results are served for download.

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scandrop::cleanup::RetentionCleaner;
use scandrop::config;
use scandrop::processor::{Processor, ProcessorConfig};
use scandrop::server::{self, AppState};
use scandrop::watcher::DirWatcher;

/// How long the shutdown waiter gives the web transport to stop gracefully.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = config::Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.default_log_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let out_mode = args.out_mode()?;
    debug!("Input: {}", args.input_dir.display());
    debug!("Output: {}", args.output_dir.display());
    debug!("Permissions: {:03o}", out_mode);

    // One shared cancellation signal; every background loop takes a clone at
    // construction and exits at its next select point once it fires.
    let token = CancellationToken::new();
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    let watcher = DirWatcher::new(&args.input_dir, args.delay()).context("creating watcher")?;
    let (mut trigger_rx, watcher_task) = watcher.start(token.clone());
    tasks.push(watcher_task);

    let listener = TcpListener::bind(&args.listen_addr)
        .await
        .with_context(|| format!("binding {}", args.listen_addr))?;
    info!("Starting web server on {}", listener.local_addr()?);
    let state = AppState {
        input_dir: args.input_dir.clone(),
        output_dir: args.output_dir.clone(),
        resources_dir: args.resources_dir.clone(),
    };
    let (server_task, server_done) = server::spawn(listener, state, token.clone());
    let server_abort = server_task.abort_handle();
    tasks.push(server_task);

    let processor = Processor::new(ProcessorConfig {
        input_dir: args.input_dir.clone(),
        output_dir: args.output_dir.clone(),
        out_mode,
        command: args.ocr_command.clone(),
    })
    .context("creating processor")?;
    let (processor_handle, processor_task) = processor.start(token.clone());
    tasks.push(processor_task);

    tasks.push(
        RetentionCleaner::new(vec![args.input_dir.clone(), args.output_dir.clone()])
            .start(token.clone()),
    );

    // Trigger coordinator: multiplex debounced watcher triggers and OS
    // termination signals. Triggers are fire-and-forget; a termination
    // signal raises the shared cancellation and ends the loop.
    {
        let token = token.clone();
        tasks.push(tokio::spawn(async move {
            info!("Waiting for changes...");
            let shutdown = shutdown_signal();
            tokio::pin!(shutdown);
            loop {
                tokio::select! {
                    _ = &mut shutdown => {
                        info!("received termination signal, shutting down");
                        token.cancel();
                        return;
                    }
                    _ = token.cancelled() => return,
                    recv = trigger_rx.recv() => match recv {
                        Some(()) => processor_handle.trigger(),
                        None => return,
                    },
                }
            }
        }));
    }

    // Shutdown waiter: once cancellation fires, give the web transport a
    // bounded window to finish in-flight requests. Long-lived streaming
    // connections must not hold the process hostage, so the transport is
    // torn down once the window closes.
    {
        let token = token.clone();
        tasks.push(tokio::spawn(async move {
            token.cancelled().await;
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, server_done)
                .await
                .is_err()
            {
                warn!("web server did not stop within {:?}, aborting", SHUTDOWN_TIMEOUT);
                server_abort.abort();
            }
        }));
    }

    // Join barrier: the process ends only once every background task has
    // returned.
    for task in tasks {
        if let Err(err) = task.await {
            if !err.is_cancelled() {
                error!("background task failed: {err}");
            }
        }
    }
    info!("All done. Exiting.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
