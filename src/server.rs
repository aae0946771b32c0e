//! HTTP front end.
//!
//! ## Routes
//!
//! | Route | Source |
//! |---|---|
//! | `GET /images/*path?<options>` | file under `[sources] image_dir` |
//! | `GET /remote?src=<url>&<options>` | http(s) URL, when `allow_remote` is set |
//! | `GET /health` | JSON status: free conversion slots and cache counters |
//!
//! ## Request flow
//!
//! 1. Parse the query into [`TransformOptions`] and plan a [`Pipeline`].
//!    Bad options are rejected with 400 before anything runs.
//! 2. Resolve the [`Source`] (404 / 403 / 400 on failure).
//! 3. Serve from the [`FileCache`] if enabled and present.
//! 4. Wait for a conversion slot, start the backend, and wait for the first
//!    chunk of output. Until that chunk arrives nothing has been sent, so a
//!    failure is still a clean 500.
//! 5. Stream the rest as it is produced. A failure after this point aborts
//!    the body, since the status line is already gone.
//!
//! The slot (a semaphore permit) is held until the body finishes or the
//! client disconnects. Dropping the body drops the backend stream, which
//! kills the converter.

use crate::cache::FileCache;
use crate::config::{ServiceConfig, effective_permits};
use crate::imaging::{
    BackendError, ByteStream, ConvertBackend, MagickBackend, Pipeline, PlanContext, PlanError,
    plan_pipeline,
};
use crate::options::{OptionsError, TransformOptions};
use crate::source::{self, Source, SourceError};
use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tower_http::trace::TraceLayer;

#[derive(Error, Debug)]
pub enum ServeError {
    #[error(transparent)]
    Options(#[from] OptionsError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("Missing src parameter")]
    MissingSource,
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("Conversion failed: {0}")]
    Conversion(io::Error),
    #[error("Conversion produced no output")]
    EmptyOutput,
    #[error("Server is shutting down")]
    Unavailable,
}

impl ServeError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Options(_) | Self::Plan(_) | Self::MissingSource => StatusCode::BAD_REQUEST,
            Self::Source(SourceError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Source(SourceError::RemoteDisabled | SourceError::HostNotAllowed(_)) => {
                StatusCode::FORBIDDEN
            }
            Self::Source(SourceError::InvalidUrl(_)) => StatusCode::BAD_REQUEST,
            Self::Backend(_) | Self::Conversion(_) | Self::EmptyOutput => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Converter failures are logged where they happen; clients get the
        // bare status text instead of process details.
        let message = if status.is_server_error() {
            status.canonical_reason().unwrap_or("Error").to_string()
        } else {
            self.to_string()
        };
        (status, message).into_response()
    }
}

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    config: Arc<ServiceConfig>,
    backend: Arc<dyn ConvertBackend>,
    cache: Option<Arc<FileCache>>,
    permits: Arc<Semaphore>,
}

impl AppState {
    pub fn new(config: ServiceConfig, backend: Arc<dyn ConvertBackend>) -> Self {
        let cache = config
            .cache
            .enabled
            .then(|| Arc::new(FileCache::new(config.cache.dir.clone())));
        let permits = Arc::new(Semaphore::new(effective_permits(&config.processing)));
        Self {
            config: Arc::new(config),
            backend,
            cache,
            permits,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn cache(&self) -> Option<&FileCache> {
        self.cache.as_deref()
    }

    fn plan(&self, query: &HashMap<String, String>) -> Result<Pipeline, ServeError> {
        let options = TransformOptions::from_query(query)?;
        let context = PlanContext {
            overlay_dir: self.config.sources.overlay_dir.as_deref(),
            dither_colormap: self.config.convert.dither_colormap.as_deref(),
            max_dimension: self.config.limits.max_dimension,
        };
        Ok(plan_pipeline(&options, &context)?)
    }

    async fn respond(&self, source: Source, pipeline: Pipeline) -> Result<Response, ServeError> {
        let content_type = pipeline.mime_type();

        let pending = match &self.cache {
            Some(cache) => {
                let path = cache.entry_path(&source, &pipeline);
                if let Some(data) = cache.lookup(&path).await {
                    tracing::debug!(%source, "Serving {} from cache", path.display());
                    return Ok(image_response(content_type, Body::from(data)));
                }
                Some(PendingEntry {
                    cache: Arc::clone(cache),
                    path,
                    buffer: BytesMut::new(),
                })
            }
            None => None,
        };

        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| ServeError::Unavailable)?;

        let mut stream = self.backend.convert(&source, &pipeline).map_err(|e| {
            tracing::error!(%source, "Conversion failed to start: {e}");
            ServeError::from(e)
        })?;
        let first = match stream.next().await {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                tracing::error!(%source, "Conversion failed: {e}");
                return Err(ServeError::Conversion(e));
            }
            None => {
                tracing::error!(%source, "Conversion produced no output");
                return Err(ServeError::EmptyOutput);
            }
        };

        let body = ResponseBody {
            inner: stream,
            first: Some(first),
            pending,
            source: source.to_string(),
            done: false,
            _permit: permit,
        };
        let body = futures_util::stream::unfold(body, |mut body| async move {
            let item = body.next_chunk().await?;
            Some((item, body))
        });
        Ok(image_response(content_type, Body::from_stream(body)))
    }
}

fn image_response(content_type: &'static str, body: Body) -> Response {
    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}

/// Output waiting to be written to the cache once the conversion succeeds.
struct PendingEntry {
    cache: Arc<FileCache>,
    path: PathBuf,
    buffer: BytesMut,
}

impl PendingEntry {
    async fn commit(self) {
        match self.cache.store(self.path.clone(), self.buffer.freeze()).await {
            Ok(true) => tracing::debug!("Cached {}", self.path.display()),
            Ok(false) => {}
            Err(e) => tracing::warn!("Failed to cache {}: {e}", self.path.display()),
        }
    }
}

/// Streaming response body. Owns the conversion slot.
struct ResponseBody {
    inner: ByteStream,
    first: Option<Bytes>,
    pending: Option<PendingEntry>,
    source: String,
    done: bool,
    _permit: OwnedSemaphorePermit,
}

impl ResponseBody {
    async fn next_chunk(&mut self) -> Option<io::Result<Bytes>> {
        if self.done {
            return None;
        }
        let chunk = match self.first.take() {
            Some(first) => first,
            None => match self.inner.next().await {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    self.done = true;
                    self.pending = None;
                    tracing::error!(source = %self.source, "Conversion failed mid-stream: {e}");
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    if let Some(entry) = self.pending.take() {
                        tokio::spawn(entry.commit());
                    }
                    return None;
                }
            },
        };
        if let Some(entry) = self.pending.as_mut() {
            entry.buffer.extend_from_slice(&chunk);
        }
        Some(Ok(chunk))
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn local_image(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ServeError> {
    let pipeline = state.plan(&query)?;
    let source = source::resolve_local(&state.config.sources.image_dir, &path)?;
    state.respond(source, pipeline).await
}

async fn remote_image(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ServeError> {
    let src = query.get("src").ok_or(ServeError::MissingSource)?;
    let pipeline = state.plan(&query)?;
    let source = source::resolve_remote(src, &state.config.sources)?;
    state.respond(source, pipeline).await
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "available_permits": state.permits.available_permits(),
        "cache": state.cache().map(|c| c.stats().snapshot()),
    }))
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/images/*path", get(local_image))
        .route("/remote", get(remote_image))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the configured address and serve until Ctrl-C.
pub async fn serve(config: ServiceConfig) -> io::Result<()> {
    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let backend = Arc::new(MagickBackend::from_config(&config.convert));
    let state = AppState::new(config, backend);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("magick-gate listening on {}", listener.local_addr()?);
    let served = axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await;
    if let Some(cache) = state.cache() {
        tracing::info!("Cache: {}", cache.stats().snapshot());
    }
    served
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("Shutting down");
    }
}
