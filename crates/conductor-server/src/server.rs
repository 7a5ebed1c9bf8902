use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use conductor_engine::Orchestrator;

use crate::handlers::{self, HandlerState};
use crate::rpc::{RpcRequest, RpcResponse};

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8090,
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: Arc<HandlerState>) -> Router {
    Router::new()
        .route("/rpc", post(rpc_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and serve in the background. Port 0 picks a free port.
pub async fn start(
    config: ServerConfig,
    orchestrator: Arc<Orchestrator>,
) -> Result<ServerHandle, std::io::Error> {
    let state = Arc::new(HandlerState::new(orchestrator));
    let router = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(host = %config.host, port = local_addr.port(), "conductor server started");

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(signal.cancelled_owned())
            .await
        {
            tracing::error!(error = %e, "server stopped with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        shutdown,
        server,
    })
}

/// Handle returned by `start()`; keeps the server task alive.
pub struct ServerHandle {
    pub port: u16,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and wait for in-flight requests.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.server.await;
    }
}

/// `POST /rpc`. Bodies that are not JSON get `PARSE_ERROR`; JSON that is not a
/// request envelope gets `INVALID_REQUEST`.
async fn rpc_handler(State(state): State<Arc<HandlerState>>, body: String) -> Json<RpcResponse> {
    let value: serde_json::Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(_) => return Json(RpcResponse::parse_error()),
    };
    let id = value.get("id").cloned();
    let request: RpcRequest = match serde_json::from_value(value) {
        Ok(req) => req,
        Err(e) => return Json(RpcResponse::invalid_request(id, e.to_string())),
    };
    if request.method.is_empty() {
        return Json(RpcResponse::invalid_request(request.id, "empty method"));
    }

    let params = request.params.unwrap_or(serde_json::json!({}));
    tracing::debug!(method = %request.method, "rpc request");
    Json(handlers::dispatch(&state, &request.method, &params, request.id).await)
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<Arc<HandlerState>>) -> impl IntoResponse {
    let resp = handlers::dispatch(&state, "health", &serde_json::json!({}), None).await;
    Json(resp.result.unwrap_or_default())
}
