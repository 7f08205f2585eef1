//! HTTP server part of the sync storage server.
//!
//! The router is bit-compatible with the Sync 1.5 storage API: the same
//! paths, the same headers (`X-Weave-Timestamp` on everything,
//! `X-Last-Modified` where a resource has one), and the same Weave
//! numeric error bodies.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use axum::extract::{Path, Request, State};
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tower_http::trace::TraceLayer;
use tracing::{info, span, warn, Level};

mod error;
mod extract;
mod info;
mod storage;

pub use self::error::{AppError, AppResult, WEAVE_INVALID_WBO, WEAVE_OVER_QUOTA, WEAVE_UNKNOWN_ERROR};
pub use self::extract::{
    ConditionalHeaders, X_IF_MODIFIED_SINCE, X_IF_UNMODIFIED_SINCE, X_LAST_MODIFIED,
    X_WEAVE_NEXT_OFFSET, X_WEAVE_TIMESTAMP,
};

use crate::state::AppState;
use crate::storage::timestamp::{self, Timestamp};

/// The HTTP server task set.
pub struct HttpServer {
    tasks: JoinSet<std::io::Result<()>>,
    addr: SocketAddr,
}

impl HttpServer {
    /// Binds `addr` and spawns the server task.
    pub async fn spawn(addr: SocketAddr, state: AppState) -> Result<HttpServer> {
        let app = create_app(state);
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let bound_addr = listener.local_addr()?;
        info!("HTTP server listening on {bound_addr}");
        let mut tasks = JoinSet::new();
        tasks.spawn(axum::serve(listener, app).into_future());
        Ok(HttpServer {
            tasks,
            addr: bound_addr,
        })
    }

    /// The bound address of the HTTP socket.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Shutdown the server and wait for the task to complete.
    pub async fn shutdown(mut self) -> Result<()> {
        self.tasks.abort_all();
        self.run_until_done().await?;
        Ok(())
    }

    /// Wait for the server task to complete.
    ///
    /// Runs forever unless the task fails.
    pub async fn run_until_done(mut self) -> Result<()> {
        let mut final_res: Result<()> = Ok(());
        while let Some(res) = self.tasks.join_next().await {
            match res {
                Ok(Ok(())) => {}
                Err(err) if err.is_cancelled() => {}
                Ok(Err(err)) => {
                    warn!(?err, "server task failed");
                    final_res = Err(anyhow!(err).context("server task"));
                }
                Err(err) => {
                    warn!(?err, "server task panicked");
                    final_res = Err(anyhow!(err).context("join"));
                }
            }
        }
        final_res
    }
}

/// Rejects user ids that are not plain digit strings with the Weave 404.
pub(crate) fn require_uid(uid: &str) -> Result<(), AppError> {
    if uid.is_empty() || !uid.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AppError::not_found());
    }
    Ok(())
}

/// A timestamp as the bare `seconds.hh` JSON number Sync clients expect.
pub(crate) fn modified_value(modified: Timestamp) -> serde_json::Value {
    serde_json::Number::from_f64(modified as f64 / 100.0)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

async fn heartbeat(State(state): State<AppState>) -> Response {
    if state.dispatch.is_closed() {
        AppError::with_status(axum::http::StatusCode::SERVICE_UNAVAILABLE).into_response()
    } else {
        "OK".into_response()
    }
}

/// Not part of the public API; kept for checking that uid routing works.
async fn echo_uid(Path(uid): Path<String>) -> AppResult<Response> {
    require_uid(&uid)?;
    let now = timestamp::format(timestamp::now());
    Ok((
        [
            (X_WEAVE_TIMESTAMP, now.clone()),
            (X_LAST_MODIFIED, now),
        ],
        uid,
    )
        .into_response())
}

async fn weave_not_found() -> AppError {
    AppError::not_found()
}

/// Stamps `X-Weave-Timestamp` on every response that does not carry one
/// already.
async fn weave_timestamp_middleware(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    if !response.headers().contains_key(X_WEAVE_TIMESTAMP) {
        let now = timestamp::format(timestamp::now());
        response.headers_mut().insert(
            X_WEAVE_TIMESTAMP,
            HeaderValue::from_str(&now).expect("timestamps are valid header values"),
        );
    }
    response
}

/// Record request metrics.
async fn metrics_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> impl IntoResponse {
    let start = Instant::now();
    let response = next.run(req).await;
    let latency = start.elapsed().as_millis();
    let status = response.status();
    state
        .metrics
        .http_requests_duration_ms
        .inc_by(latency as u64);
    state.metrics.http_requests.inc();
    if status.is_success() {
        state.metrics.http_requests_success.inc();
    } else {
        state.metrics.http_requests_error.inc();
    }
    response
}

pub(crate) fn create_app(state: AppState) -> Router {
    // configure tracing middleware
    let trace = TraceLayer::new_for_http().make_span_with(|request: &http::Request<_>| {
        span!(
            Level::DEBUG,
            "http_request",
            method = ?request.method(),
            uri = ?request.uri(),
        )
    });

    // the sync 1.5 storage API
    // https://docs.services.mozilla.com/storage/apis-1.5.html
    let router = Router::new()
        .route("/__heartbeat__", get(heartbeat))
        .route("/1.5/{uid}", delete(storage::delete_all))
        .route("/1.5/{uid}/echo-uid", get(echo_uid))
        .route("/1.5/{uid}/info/collections", get(info::collections))
        .route(
            "/1.5/{uid}/info/collection_counts",
            get(info::collection_counts),
        )
        .route(
            "/1.5/{uid}/info/collection_usage",
            get(info::collection_usage),
        )
        .route("/1.5/{uid}/info/quota", get(info::quota))
        .route("/1.5/{uid}/storage", delete(storage::delete_all))
        .route(
            "/1.5/{uid}/storage/{collection}",
            get(storage::collection_get)
                .post(storage::collection_post)
                .delete(storage::collection_delete),
        )
        .route(
            "/1.5/{uid}/storage/{collection}/{bso}",
            get(storage::bso_get)
                .put(storage::bso_put)
                .delete(storage::bso_delete),
        )
        .fallback(weave_not_found)
        .with_state(state.clone());

    router
        .layer(trace)
        .layer(middleware::from_fn(weave_timestamp_middleware))
        .route_layer(middleware::from_fn_with_state(state, metrics_middleware))
}
