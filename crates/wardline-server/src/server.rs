use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use wardline_core::RelayError;
use wardline_engine::actions::ActionRegistry;
use wardline_llm::provider::{ChatOptions, ChatProvider};
use wardline_store::requests::RequestRepo;
use wardline_store::Database;

use crate::protocol::{ClientFrame, ServerFrame};
use crate::relay::StreamRelay;
use crate::session::SessionRegistry;

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
    pub max_send_queue: usize,
    pub call_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            max_send_queue: 256,
            call_timeout_secs: 120,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<StreamRelay>,
    pub max_send_queue: usize,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle that keeps it alive.
pub async fn start(
    config: ServerConfig,
    db: Database,
    provider: Arc<dyn ChatProvider>,
) -> Result<ServerHandle, std::io::Error> {
    let sessions = Arc::new(SessionRegistry::new());
    let actions = Arc::new(ActionRegistry::new(RequestRepo::new(db)));
    let options = ChatOptions {
        call_timeout: Duration::from_secs(config.call_timeout_secs),
        ..ChatOptions::default()
    };
    let relay = Arc::new(StreamRelay::new(sessions, provider, actions, options));

    let state = AppState {
        relay,
        max_send_queue: config.max_send_queue,
    };

    let router = build_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    info!(port = local_addr.port(), "wardline server started");

    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server,
    })
}

/// Handle returned by `start()` — dropping it does not stop the server,
/// but it exposes the bound port for callers that asked for port 0.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One task per connection: a writer draining the frame queue and a reader
/// loop that drives the relay. Disconnect cancels any in-flight generation
/// and closes the session.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let relay = state.relay;
    let session_id = relay.sessions().open();
    info!(session_id = %session_id, "client connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (frame_tx, mut frame_rx) = mpsc::channel::<ServerFrame>(state.max_send_queue);
    let cancel = CancellationToken::new();

    let writer_cancel = cancel.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to encode frame");
                    continue;
                }
            };
            if ws_tx.send(WsMessage::Text(json.into())).await.is_err() {
                // Socket is gone; stop any in-flight generation.
                writer_cancel.cancel();
                break;
            }
        }
    });

    // Frames arriving while a generation is in flight are deferred, not
    // dropped; a disconnect during generation cancels it immediately.
    let mut backlog: VecDeque<String> = VecDeque::new();
    let mut socket_open = true;

    'conn: loop {
        let text = match backlog.pop_front() {
            Some(text) => text,
            None => match ws_rx.next().await {
                Some(Ok(WsMessage::Text(text))) => text.to_string(),
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break 'conn,
                Some(Ok(_)) => continue 'conn,
            },
        };

        let frame: ClientFrame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "unparseable frame");
                continue 'conn;
            }
        };
        match frame {
            ClientFrame::Chat { text } => {
                let chat = relay.handle_chat(&session_id, &text, &frame_tx, &cancel);
                tokio::pin!(chat);
                // Keep reading the socket while the relay streams so a
                // disconnect is seen right away.
                let result = loop {
                    tokio::select! {
                        result = &mut chat => break result,
                        msg = ws_rx.next(), if socket_open => match msg {
                            Some(Ok(WsMessage::Text(text))) => backlog.push_back(text.to_string()),
                            Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => {
                                cancel.cancel();
                                socket_open = false;
                            }
                            Some(Ok(_)) => {}
                        },
                    }
                };
                if !socket_open || matches!(result, Err(RelayError::Cancelled)) {
                    break 'conn;
                }
            }
            ClientFrame::Context { patient, room } => {
                let _ = relay.sessions().set_context(&session_id, patient, room).await;
            }
        }
    }

    cancel.cancel();
    relay.sessions().close(&session_id);
    writer.abort();
    info!(session_id = %session_id, "client disconnected");
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "sessions": state.relay.sessions().count(),
    }))
}
