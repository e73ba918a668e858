//! Axum router wiring the three terminal-manager policies to WebSocket routes.
//!
//! Grounded on this codebase's `run_server` (the `CorsLayer` + listener +
//! `axum::serve(...).with_graceful_shutdown(shutdown_signal())` shape, and
//! `shutdown_signal`'s ctrl_c/SIGTERM `tokio::select!`) and on its
//! `terminal_handler`/`handle_terminal_socket` pair for the WebSocket
//! upgrade and split-socket I/O loop, adapted from a single ad-hoc terminal
//! endpoint to the three policy-specific routes this system exposes.
//! Everything unrelated to terminals in the teacher's router (the
//! dashboard, stats, chat-completion, and agent endpoints) has no
//! counterpart here and was dropped.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path as AxumPath, State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, trace, warn};

use crate::client::{parse_client_frame, ClientFrame, ClientSession, ServerFrame};
use crate::config::ManagerConfig;
use crate::manager::{NamedTerminalManager, SingleTerminalManager, UniqueTerminalManager};
use crate::security;

/// Shared application state: one manager instance per sharing policy.
pub struct AppState {
    pub unique: Arc<UniqueTerminalManager>,
    pub single: Arc<SingleTerminalManager>,
    pub named: Arc<NamedTerminalManager>,
}

impl AppState {
    pub fn new(config: ManagerConfig) -> Arc<Self> {
        Arc::new(Self {
            unique: UniqueTerminalManager::new(config.clone()),
            single: SingleTerminalManager::new(config.clone()),
            named: NamedTerminalManager::new(config),
        })
    }

    /// Forcefully terminates every live session across all three policies.
    pub async fn shutdown(&self) {
        self.unique.shutdown().await;
        self.single.shutdown().await;
        self.named.shutdown().await;
    }
}

/// Builds the router exposing `/unique`, `/single`, and `/named/:name`.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/unique", get(unique_handler))
        .route("/single", get(single_handler))
        .route("/named/:name", get(named_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn unique_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    match security::check_origin(&headers) {
        Ok(()) => ws.on_upgrade(move |socket| async move {
            if let Ok(session) = state.unique.get_terminal().await {
                serve_socket(socket, session, move |s| state.unique.client_disconnected(s)).await;
            }
        }),
        Err(e) => e.into_response(),
    }
}

async fn single_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    match security::check_origin(&headers) {
        Ok(()) => ws.on_upgrade(move |socket| async move {
            if let Ok(session) = state.single.get_terminal().await {
                serve_socket(socket, session, move |s| state.single.client_disconnected(s)).await;
            }
        }),
        Err(e) => e.into_response(),
    }
}

async fn named_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    AxumPath(name): AxumPath<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match security::check_origin(&headers) {
        Ok(()) => ws.on_upgrade(move |socket| async move {
            if let Ok(session) = state.named.get_terminal(&name).await {
                serve_socket(socket, session, move |s| state.named.client_disconnected(s)).await;
            }
        }),
        Err(e) => e.into_response(),
    }
}

/// Drives one attached WebSocket end to end: attach, setup, bidirectional
/// I/O, detach. `on_disconnect` is the policy-specific hook run once the
/// client has been removed from the session's client list.
///
/// Reading from the browser socket and draining the session's outgoing
/// frame channel happen in the same `tokio::select!` loop rather than a
/// split reader/writer-task pair, so a `disconnect` frame pushed by
/// `PtySession::notify_died` (e.g. the child died while this client was
/// otherwise idle) closes the transport immediately instead of waiting for
/// the next browser message to be noticed.
async fn serve_socket<F>(socket: WebSocket, session: Arc<crate::pty::PtySession>, on_disconnect: F)
where
    F: FnOnce(&Arc<crate::pty::PtySession>),
{
    let mut client = ClientSession::new();
    let handle = client.handle();
    session.attach(handle.clone()).await;
    handle.send(ServerFrame::setup());

    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            frame = client.recv() => {
                match frame {
                    Some(frame) => {
                        let is_disconnect = matches!(frame, ServerFrame::Disconnect(..));
                        let _ = ws_tx.send(Message::Text(frame.to_json())).await;
                        if is_disconnect {
                            break;
                        }
                    }
                    None => break,
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = security::validate_message_size(text.as_bytes()) {
                            warn!(session_id = %session.id(), error = %e, "oversized frame dropped");
                            continue;
                        }
                        match parse_client_frame(&text) {
                            Some(ClientFrame::Stdin(data)) => {
                                if session.write(data.as_bytes()).await.is_err() {
                                    break;
                                }
                            }
                            Some(ClientFrame::SetSize { rows, cols }) => {
                                if security::validate_terminal_dimensions(rows, cols).is_ok() {
                                    handle.set_reported_size(rows, cols);
                                    let _ = session.resize_to_smallest().await;
                                }
                            }
                            Some(ClientFrame::Unknown) | None => {}
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        trace!(error = %e, "websocket receive error");
                        break;
                    }
                }
            }
        }

        if !session.is_alive() {
            break;
        }
    }

    session.detach(handle.id()).await;
    let _ = session.resize_to_smallest().await;
    on_disconnect(&session);

    let _ = ws_tx.close().await;
    info!(session_id = %session.id(), "client detached");
}

/// Waits for Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

/// Binds and serves the router until a shutdown signal is received, then
/// forcefully terminates every live session before returning.
pub async fn run(config: ManagerConfig) -> anyhow::Result<()> {
    let bind_addr = config.bind_addr;
    let state = AppState::new(config);
    let app = build_router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(%bind_addr, "termmuxd listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down live terminal sessions");
    state.shutdown().await;
    Ok(())
}
