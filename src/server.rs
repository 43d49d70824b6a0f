//! Web surface: upload page, file upload, live progress stream, completion
//! poll and result download.
//!
//! Handlers never share in-process state beyond the directory paths; every
//! job-related lookup goes through the filesystem naming contract in
//! [`crate::names`].

use std::convert::Infallible;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    body::Body,
    extract::multipart::Field,
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::{header, StatusCode},
    response::sse::{Event, Sse},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream, StreamExt};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::names;
use crate::tail::Tail;

/// Upload request bodies are rejected beyond this size.
const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

/// How often the stream endpoint checks the debug log for growth.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Directory paths shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub resources_dir: PathBuf,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(upload_page))
        .nest_service("/resources", ServeDir::new(state.resources_dir.clone()))
        .route("/upload", post(upload))
        .route("/stream", get(stream))
        .route("/exists", get(exists))
        .route("/download", get(download))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the web server until the token is cancelled. The returned receiver
/// fires once the transport has fully stopped; the shutdown waiter in `main`
/// bounds how long it is willing to wait for that.
pub fn spawn(
    listener: TcpListener,
    state: AppState,
    token: CancellationToken,
) -> (JoinHandle<()>, oneshot::Receiver<()>) {
    let app = router(state);
    let (done_tx, done_rx) = oneshot::channel();

    let handle = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app)
            .with_graceful_shutdown(token.cancelled_owned())
            .await
        {
            error!("web server error: {err}");
        }
        info!("web server stopped");
        let _ = done_tx.send(());
    });

    (handle, done_rx)
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(serde::Deserialize)]
struct FileQuery {
    file: String,
}

#[derive(serde::Serialize)]
struct ExistsResponse {
    exists: bool,
}

/// Serve the upload page.
async fn upload_page(State(state): State<AppState>) -> Result<Html<String>, (StatusCode, String)> {
    let page = state.resources_dir.join("upload.html");
    let html = fs::read_to_string(&page).await.map_err(|err| {
        error!("reading upload page {}: {}", page.display(), err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
        )
    })?;
    Ok(Html(html))
}

/// Accept a multipart upload, store it under a timestamp-prefixed name in
/// the input directory, seed the debug log, and redirect to the viewer.
async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Redirect, (StatusCode, String)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| (StatusCode::BAD_REQUEST, format!("Failed to parse form: {err}")))?
    {
        if field.name() == Some("file") {
            return store_upload(&state, field).await;
        }
    }
    Err((StatusCode::BAD_REQUEST, "Missing file".to_string()))
}

/// Copy the uploaded field to the input directory chunk by chunk (the body
/// cap is 100 MiB, too large to buffer per request) and seed the debug log.
async fn store_upload(
    state: &AppState,
    mut field: Field<'_>,
) -> Result<Redirect, (StatusCode, String)> {
    let original = field.file_name().unwrap_or("upload").to_string();
    let base = names::sanitize(&original)
        .ok_or_else(|| (StatusCode::BAD_REQUEST, "Invalid file name".to_string()))?;

    fs::create_dir_all(&state.input_dir)
        .await
        .map_err(|err| server_error("create input dir", err))?;

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0);
    let input_name = names::input_name(timestamp, &base);
    let input_path = state.input_dir.join(&input_name);

    let mut dst = fs::File::create(&input_path)
        .await
        .map_err(|err| server_error("create uploaded file", err))?;
    while let Some(chunk) = field.chunk().await.map_err(|err| {
        (StatusCode::BAD_REQUEST, format!("Failed to read file: {err}"))
    })? {
        dst.write_all(&chunk)
            .await
            .map_err(|err| server_error("write uploaded file", err))?;
    }
    dst.flush()
        .await
        .map_err(|err| server_error("write uploaded file", err))?;
    info!("saved uploaded file to {}", input_path.display());

    fs::create_dir_all(&state.output_dir)
        .await
        .map_err(|err| server_error("create output dir", err))?;

    let debug_name = names::debug_name(&input_name);
    let preamble = format!(
        "Debug for {}\nUploaded to: {}\n",
        original,
        input_path.display()
    );
    fs::write(state.output_dir.join(&debug_name), preamble)
        .await
        .map_err(|err| server_error("write debug file", err))?;

    let query = serde_urlencoded::to_string([("debug", debug_name.as_str())])
        .map_err(|err| server_error("encode redirect", err))?;
    Ok(Redirect::to(&format!("/?{query}")))
}

/// Tail the named debug log as server-sent events, one frame per appended
/// line. The stream only ends when the client disconnects.
async fn stream(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, String)> {
    let file = sanitized(&query.file)?;
    let path = state.output_dir.join(&file);

    let tail = Tail::open(&path).await.map_err(|err| {
        error!("opening debug file {}: {}", path.display(), err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "unable to open file".to_string(),
        )
    })?;

    let lines = stream::unfold(tail, |mut tail| async move {
        loop {
            tokio::time::sleep(POLL_INTERVAL).await;
            match tail.next_segments().await {
                Ok(segments) if !segments.is_empty() => {
                    return Some((stream::iter(segments), tail))
                }
                Ok(_) => {}
                // The file may have been removed by the retention cleaner;
                // keep polling.
                Err(err) => debug!("tailing debug file: {}", err),
            }
        }
    })
    .flatten()
    .map(|line| Ok::<_, Infallible>(Event::default().data(line)));

    Ok(Sse::new(lines))
}

/// Report whether the success marker derived from the given debug-log name
/// exists. Synchronous poll, complement to the push stream.
async fn exists(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
) -> Result<Json<ExistsResponse>, (StatusCode, String)> {
    let file = sanitized(&query.file)?;
    let marker = state.output_dir.join(names::success_name(&file));
    let exists = fs::try_exists(&marker).await.unwrap_or(false);
    Ok(Json(ExistsResponse { exists }))
}

/// Serve a produced output file as an attachment.
async fn download(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
) -> Result<Response, (StatusCode, String)> {
    let file = sanitized(&query.file)?;
    let path = state.output_dir.join(&file);

    let handle = match fs::File::open(&path).await {
        Ok(handle) => handle,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err((StatusCode::NOT_FOUND, "not found".to_string()));
        }
        Err(err) => return Err(server_error("open output file", err)),
    };

    let headers = [
        (
            header::CONTENT_TYPE,
            "application/octet-stream".to_string(),
        ),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{file}\""),
        ),
    ];
    let body = Body::from_stream(ReaderStream::new(handle));
    Ok((headers, body).into_response())
}

// ============================================================================
// Helpers
// ============================================================================

fn sanitized(raw: &str) -> Result<String, (StatusCode, String)> {
    names::sanitize(raw).ok_or_else(|| (StatusCode::BAD_REQUEST, "invalid file parameter".to_string()))
}

fn server_error(action: &str, err: impl std::fmt::Display) -> (StatusCode, String) {
    error!("{action}: {err}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Server error".to_string(),
    )
}
