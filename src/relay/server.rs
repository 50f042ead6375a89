use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;

/// Shared state for relay handlers
#[derive(Clone)]
pub struct RelayState {
    /// Every text frame received from any client
    frames: broadcast::Sender<String>,
    clients: Arc<AtomicUsize>,
}

impl RelayState {
    pub fn new(channel_capacity: usize) -> Self {
        let (frames, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            frames,
            clients: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::SeqCst)
    }
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new(256)
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub clients: usize,
}

/// Create the relay router
pub fn create_router(state: RelayState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // Rebroadcasts every text frame to all clients, sender included
        .route("/ws/versus", get(ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the relay on an already bound listener
pub async fn serve_listener(listener: TcpListener, state: RelayState) -> Result<()> {
    let addr = listener.local_addr().context("Relay listener has no address")?;
    info!("Relay listening on {}", addr);

    axum::serve(listener, create_router(state))
        .await
        .context("Relay server failed")
}

pub async fn serve(config: &RelayConfig) -> Result<()> {
    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind relay to {}", addr))?;

    serve_listener(listener, RelayState::new(config.channel_capacity)).await
}

/// GET /health
async fn health_check(State(state): State<RelayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        clients: state.client_count(),
    })
}

/// GET /ws/versus
async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<RelayState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
        .into_response()
}

async fn handle_socket(socket: WebSocket, state: RelayState) {
    let (mut sender, mut receiver) = socket.split();
    let mut frames_rx = state.frames.subscribe();
    let clients = state.clients.fetch_add(1, Ordering::SeqCst) + 1;
    info!("Relay client connected ({} connected)", clients);

    let mut send_task = tokio::spawn(async move {
        loop {
            match frames_rx.recv().await {
                Ok(text) => {
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Relay client lagging, {} frames dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let frames = state.frames.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    debug!("Relaying frame ({} bytes)", text.len());
                    let _ = frames.send(text);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    let clients = state.clients.fetch_sub(1, Ordering::SeqCst) - 1;
    info!("Relay client disconnected ({} connected)", clients);
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_reports_no_clients() {
        let app = create_router(RelayState::default());

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, serde_json::json!({"status": "ok", "clients": 0}));
    }

    #[tokio::test]
    async fn test_plain_get_on_socket_route_is_rejected() {
        let app = create_router(RelayState::default());

        let response = app
            .oneshot(Request::builder().uri("/ws/versus").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }
}
