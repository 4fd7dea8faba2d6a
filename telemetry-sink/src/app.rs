//! HTTP ingress. There are two endpoints, one for health (`/health`) and another for data
//! (`/telemetry`). The `/telemetry` endpoint takes a `POST` with a JSON object as body and hands
//! it to the [TelemetrySink].

use std::future::Future;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::{MatchedPath, State};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower::ServiceBuilder;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::trace::TraceLayer;
use tracing::{Span, error, info, info_span, trace, warn};
use uuid::Uuid;

use crate::config::{ServerConfig, SinkConfig};
use crate::error::{Error, Result};
use crate::sink::{Message, TelemetrySink};

/// State shared by the handlers. Built once at startup and handed to the router.
#[derive(Clone)]
pub struct AppState {
    pub sink: TelemetrySink,
}

/// Creates the router with the ingress endpoints and request tracing.
pub fn router(state: AppState) -> Router {
    let layers = ServiceBuilder::new().layer(
        TraceLayer::new_for_http()
            .make_span_with(|req: &Request<Body>| {
                let req_path = req.uri().path();
                if req_path == "/health" {
                    return info_span!("request", method=?req.method(), path=req_path);
                }

                // timestamp part of a v7 UUID plus a few random characters
                let uuid = Uuid::now_v7().simple().to_string();
                let tid = format!(
                    "{}{}",
                    uuid.get(..12).unwrap_or_default(),
                    uuid.get(uuid.len() - 5..).unwrap_or_default()
                );

                let matched_path = req
                    .extensions()
                    .get::<MatchedPath>()
                    .map(MatchedPath::as_str);

                info_span!("request", tid, method=?req.method(), path=req_path, matched_path)
            })
            .on_response(|response: &Response<Body>, latency: Duration, _span: &Span| {
                if response.status().is_server_error() {
                    // logged at 'error' level in `on_failure`
                    return;
                }
                tracing::debug!(status=?response.status(), ?latency)
            })
            .on_failure(
                |error: ServerErrorsFailureClass, latency: Duration, _span: &Span| {
                    tracing::error!(?error, ?latency, "Server error");
                },
            ),
    );

    Router::new()
        .route("/health", get(health_handler))
        .route("/telemetry", post(telemetry_handler))
        .layer(layers)
        .with_state(state)
}

/// Binds the listener, starts the sink and serves requests until `shutdown` resolves. In-flight
/// requests are drained before the sink is shut down, so every accepted message is in the log
/// file when this returns `Ok`. Failing to bind is fatal and happens before the sink starts.
pub async fn serve<F>(
    server_config: ServerConfig,
    sink_config: SinkConfig,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = server_config.bind_addr;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Server(format!("Failed to bind to {addr}: {e}")))?;

    let log_path = sink_config.log_path.clone();
    let (sink, flush_loop) = TelemetrySink::new(sink_config);
    info!(log_path = %log_path.display(), "TelemetrySink started");

    info!(?addr, "Telemetry sink listening");
    let drain_timeout = server_config.drain_timeout;
    let (signalled_tx, signalled_rx) = oneshot::channel::<()>();
    let server = axum::serve(listener, router(AppState { sink }))
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!(?drain_timeout, "Shutdown signal received, draining requests");
            let _ = signalled_tx.send(());
        })
        .into_future();

    // in-flight requests get `drain_timeout` once the signal has fired
    let drain_deadline = async move {
        if signalled_rx.await.is_ok() {
            tokio::time::sleep(drain_timeout).await;
        } else {
            std::future::pending::<()>().await;
        }
    };

    let served = tokio::select! {
        result = server => result.map_err(|e| Error::Server(format!("Server error: {e}"))),
        _ = drain_deadline => {
            warn!(?drain_timeout, "Requests still in flight after the drain timeout, stopping anyway");
            Ok(())
        }
    };

    // drain the sink even if the server stopped on an error
    let drained = flush_loop.shutdown().await;
    served?;
    drained?;

    info!("TelemetrySink stopped");
    Ok(())
}

/// Health check endpoint handler
async fn health_handler() -> impl IntoResponse {
    StatusCode::OK
}

/// Telemetry ingestion endpoint handler
async fn telemetry_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let message: Message = match serde_json::from_slice(&body) {
        Ok(message) => message,
        Err(e) => {
            warn!(?e, body_size = body.len(), "Rejecting malformed telemetry body");
            return (StatusCode::BAD_REQUEST, "Invalid JSON").into_response();
        }
    };

    match state.sink.add_message(&message).await {
        Ok(true) => {
            trace!(body_size = body.len(), "Accepted telemetry message");
            (StatusCode::OK, "OK").into_response()
        }
        Ok(false) => (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded").into_response(),
        Err(Error::ShuttingDown) => {
            (StatusCode::SERVICE_UNAVAILABLE, "Sink is shutting down").into_response()
        }
        Err(e) => {
            // details stay in the server log
            error!(?e, "Failed to store telemetry message");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to store message").into_response()
        }
    }
}
