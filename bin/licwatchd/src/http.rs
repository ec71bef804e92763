//! ---
//! lw_section: "03-daemon"
//! lw_subsection: "binary"
//! lw_type: "source"
//! lw_scope: "code"
//! lw_description: "Metrics exporter and operator license API."
//! lw_version: "v0.0.0-prealpha"
//! lw_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use licwatch_core::{License, LicenseWatcher, WatcherError};
use prometheus::{Registry, TextEncoder, TEXT_FORMAT};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Shared state handed to every handler.
pub struct HttpState {
    watcher: Arc<LicenseWatcher>,
    registry: Arc<Registry>,
}

impl HttpState {
    pub fn new(watcher: Arc<LicenseWatcher>, registry: Arc<Registry>) -> Self {
        Self { watcher, registry }
    }

    fn license_response(&self) -> LicenseResponse {
        LicenseResponse {
            license: (*self.watcher.current_license()).clone(),
            features: self.watcher.features().to_map(),
        }
    }
}

/// Handle to the running HTTP server.
#[derive(Debug)]
pub struct HttpServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl HttpServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(result) => result,
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

pub fn router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/metrics", get(get_metrics))
        .route("/v1/operator/license", get(get_license).put(put_license))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind `addr` and serve metrics and the operator API until shut down.
pub fn spawn_http_server(state: Arc<HttpState>, addr: SocketAddr) -> Result<HttpServer> {
    let listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind http listener {addr}"))?;
    listener
        .set_nonblocking(true)
        .context("failed to configure http listener as non-blocking")?;
    let addr = listener
        .local_addr()
        .context("failed to read http listener address")?;
    let tcp_listener =
        TcpListener::from_std(listener).context("failed to create tokio listener")?;

    let app = router(state);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task: JoinHandle<Result<()>> = tokio::spawn(async move {
        info!(address = %addr, "http server listening");
        if let Err(err) = axum::serve(tcp_listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
        {
            error!(address = %addr, error = %err, "http server exited with error");
            return Err(err.into());
        }
        Ok(())
    });

    Ok(HttpServer {
        addr,
        shutdown: Some(shutdown_tx),
        task,
    })
}

#[derive(Debug, Serialize)]
struct LicenseResponse {
    license: License,
    features: BTreeMap<String, bool>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    message: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<WatcherError> for ApiError {
    fn from(err: WatcherError) -> Self {
        let status = match err {
            WatcherError::Config(_) | WatcherError::Validation { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

async fn get_metrics(State(state): State<Arc<HttpState>>) -> Response {
    let mut families = state.registry.gather();
    families.extend(prometheus::gather());
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(TEXT_FORMAT),
            )],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                String::from("metrics encoding error"),
            )
                .into_response()
        }
    }
}

async fn get_license(State(state): State<Arc<HttpState>>) -> Json<LicenseResponse> {
    Json(state.license_response())
}

/// Body is the raw license blob.
async fn put_license(
    State(state): State<Arc<HttpState>>,
    body: String,
) -> Result<Json<LicenseResponse>, ApiError> {
    if let Err(err) = state.watcher.set_license(&body) {
        warn!(error = %err, "operator license update rejected");
        return Err(err.into());
    }
    Ok(Json(state.license_response()))
}
