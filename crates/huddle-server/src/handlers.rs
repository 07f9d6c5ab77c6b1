//! Connection handlers.
//!
//! This module owns the transport: websocket upgrade, the mandatory
//! authenticate-before-anything handshake, and the per-connection event loop
//! bridging the socket to the hub. All engine semantics live in
//! `huddle-core`; nothing here inspects an event beyond decoding it.

use crate::auth::HmacVerifier;
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use bytes::BytesMut;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use huddle_core::{Hub, MemoryMessageStore, OpenOracle};
use huddle_protocol::{codec, ClientEvent, ErrorCode, ServerEvent};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Shared server state.
pub struct AppState {
    /// The engine.
    pub hub: Hub,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state with the bundled collaborators.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let verifier = Arc::new(HmacVerifier::new(config.auth.secret.as_bytes().to_vec()));
        let hub = Hub::new(
            verifier,
            Arc::new(MemoryMessageStore::new()),
            Arc::new(OpenOracle),
            Duration::from_millis(config.typing.ttl_ms),
        );

        Self { hub, config }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Typing expiry sweep
    let sweep_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(
            sweep_state.config.typing.sweep_interval_ms,
        ));
        loop {
            interval.tick().await;
            let expired = sweep_state.hub.sweep_typing(Instant::now());
            metrics::record_typing_expired(expired);
        }
    });

    // Build router
    let app = Router::new()
        .route(&config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("huddle server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.hub.stats().connections >= state.config.limits.max_connections {
        warn!("Connection limit reached, refusing upgrade");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state))
        .into_response()
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = format!("conn-{}", Uuid::new_v4());
    debug!(connection = %connection_id, "WebSocket connected");

    // Split the WebSocket
    let (mut sender, mut receiver) = socket.split();
    let mut read_buffer = BytesMut::with_capacity(4096);

    // Handshake: the first event must be connect, within the timeout. No
    // other handler is reachable before the gate resolves an identity.
    let handshake = tokio::time::timeout(
        Duration::from_millis(state.config.handshake.timeout_ms),
        read_event(&mut receiver, &mut read_buffer),
    )
    .await;

    let credential = match handshake {
        Ok(Some(ClientEvent::Connect { credential })) => credential,
        Ok(Some(_)) => {
            warn!(connection = %connection_id, "First event was not connect");
            let event = ServerEvent::error(0, ErrorCode::HandshakeRejected, "Expected connect");
            let _ = send_event(&mut sender, &event).await;
            metrics::record_error("handshake");
            return;
        }
        Ok(None) => {
            debug!(connection = %connection_id, "Closed before handshake");
            return;
        }
        Err(_) => {
            debug!(connection = %connection_id, "Handshake timed out");
            metrics::record_error("handshake");
            return;
        }
    };

    let identity = match state.hub.authenticate(credential.as_deref()).await {
        Ok(identity) => identity,
        Err(reason) => {
            let event = ServerEvent::error(0, ErrorCode::HandshakeRejected, reason.to_string());
            let _ = send_event(&mut sender, &event).await;
            metrics::record_error("handshake");
            return;
        }
    };

    // Register and confirm
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    state.hub.connect(&connection_id, &identity, event_tx);
    metrics::set_active_rooms(state.hub.stats().rooms);

    let connected = ServerEvent::Connected {
        connection_id: connection_id.clone(),
        identity: identity.id.clone(),
        version: huddle_protocol::PROTOCOL_VERSION.major,
        heartbeat: state.config.heartbeat.interval_ms as u32,
    };
    if send_event(&mut sender, &connected).await.is_err() {
        error!(connection = %connection_id, "Failed to send connected event");
        state.hub.disconnect(&connection_id);
        return;
    }

    // Events pipelined behind the connect frame are already buffered.
    if !drain_events(&state, &connection_id, &mut read_buffer).await {
        state.hub.disconnect(&connection_id);
        return;
    }

    // Event loop
    loop {
        tokio::select! {
            biased;

            // Events fanned out to this connection by the hub
            Some(event) = event_rx.recv() => {
                if send_event(&mut sender, &event).await.is_err() {
                    break;
                }
            }

            // Inbound from the websocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        let start = Instant::now();
                        read_buffer.extend_from_slice(&data);
                        metrics::record_message(data.len(), "inbound");

                        if !drain_events(&state, &connection_id, &mut read_buffer).await {
                            break;
                        }

                        metrics::record_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Text(text))) => {
                        // Treat text as binary
                        read_buffer.extend_from_slice(text.as_bytes());
                        if !drain_events(&state, &connection_id, &mut read_buffer).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Transport close is the only cancellation signal: run the coordinated
    // teardown exactly once.
    state.hub.disconnect(&connection_id);
    let stats = state.hub.stats();
    metrics::set_active_rooms(stats.rooms);
    metrics::set_active_calls(stats.calls);

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Decode and dispatch every complete frame in the buffer.
///
/// Returns `false` if the connection should close (undecodable input).
async fn drain_events(state: &Arc<AppState>, connection_id: &str, buffer: &mut BytesMut) -> bool {
    loop {
        match codec::decode_client_from(buffer) {
            Ok(Some(event)) => {
                state.hub.handle_event(connection_id, event).await;
                let stats = state.hub.stats();
                metrics::set_active_rooms(stats.rooms);
                metrics::set_active_calls(stats.calls);
            }
            Ok(None) => return true,
            Err(e) => {
                warn!(connection = %connection_id, error = %e, "Undecodable frame");
                metrics::record_error("protocol");
                return false;
            }
        }
    }
}

/// Read the next complete client event from the socket.
///
/// Returns `None` if the connection closed or produced undecodable input
/// before a full frame arrived.
async fn read_event(
    receiver: &mut SplitStream<WebSocket>,
    buffer: &mut BytesMut,
) -> Option<ClientEvent> {
    loop {
        match codec::decode_client_from(buffer) {
            Ok(Some(event)) => return Some(event),
            Ok(None) => {}
            Err(_) => return None,
        }

        match receiver.next().await {
            Some(Ok(Message::Binary(data))) => {
                buffer.extend_from_slice(&data);
            }
            Some(Ok(Message::Text(text))) => {
                buffer.extend_from_slice(text.as_bytes());
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) | None => return None,
            Some(Err(_)) => return None,
        }
    }
}

/// Send an event to the WebSocket.
async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<()> {
    let data = codec::encode_server(event)?;
    metrics::record_message(data.len(), "outbound");
    sender.send(Message::Binary(data.to_vec())).await?;
    Ok(())
}
