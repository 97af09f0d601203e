//! Session handlers for the relay.
//!
//! This module handles the session lifecycle and frame processing.

use crate::config::Config;
use crate::metrics::{self, SessionMetricsGuard};
use crate::router::{generate_session_id, Router, RouterStats};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Json,
};
use bytes::{Bytes, BytesMut};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use switchyard_protocol::frames::codes;
use switchyard_protocol::{wire, Frame, PROTOCOL_VERSION};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

type WsSender = SplitSink<WebSocket, Message>;
type WsReceiver = SplitStream<WebSocket>;

/// Shared relay state.
pub struct AppState {
    /// The routing table.
    pub router: Router,
    /// Relay configuration.
    pub config: Config,
}

impl AppState {
    /// Create the state for `config`.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            router: Router::with_config(config.router_config()),
            config,
        }
    }
}

/// Build the HTTP application.
pub fn build_app(state: Arc<AppState>) -> axum::Router {
    axum::Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
}

/// Serve the relay on an already bound listener.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let app = build_app(state);
    axum::serve(listener, app).await.context("Relay server failed")?;
    Ok(())
}

/// Bind and run the relay.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn run_server(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Switchyard relay listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, config.transport.websocket_path);

    serve(listener, Arc::new(AppState::new(config))).await
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": PROTOCOL_VERSION,
    }))
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Json<RouterStats> {
    Json(state.router.stats())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let max_frame = state.config.limits.max_message_size.saturating_add(4096);
    ws.max_message_size(max_frame)
        .on_upgrade(move |socket| handle_websocket(socket, state))
}

enum Handshake {
    Accepted(Option<String>),
    Rejected(Frame),
    Gone,
}

/// Read frames until the client's `hello`.
async fn await_hello(receiver: &mut WsReceiver, buffer: &mut BytesMut) -> Handshake {
    loop {
        match wire::decode_from(buffer) {
            Ok(Some(Frame::Hello { version, client })) if version == PROTOCOL_VERSION => {
                return Handshake::Accepted(client);
            }
            Ok(Some(Frame::Hello { version, .. })) => {
                return Handshake::Rejected(Frame::error(
                    codes::INCOMPATIBLE_VERSION,
                    format!("Unsupported protocol version {version}, relay speaks {PROTOCOL_VERSION}"),
                ));
            }
            Ok(Some(other)) => {
                return Handshake::Rejected(Frame::error(
                    codes::HANDSHAKE_REQUIRED,
                    format!("Expected hello, got {}", other.kind()),
                ));
            }
            Ok(None) => {}
            Err(e) => return Handshake::Rejected(Frame::error(codes::MALFORMED_FRAME, e.to_string())),
        }

        match receiver.next().await {
            Some(Ok(Message::Binary(data))) => buffer.extend_from_slice(&data),
            Some(Ok(Message::Text(_))) => {
                return Handshake::Rejected(Frame::error(codes::MALFORMED_FRAME, "Text frames are not supported"));
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return Handshake::Gone,
        }
    }
}

/// Handle one WebSocket session.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = SessionMetricsGuard::new();
    let session_id = generate_session_id();
    let (mut sender, mut receiver) = socket.split();
    let mut read_buffer = BytesMut::with_capacity(4096);

    let handshake = tokio::time::timeout(
        state.config.handshake_timeout(),
        await_hello(&mut receiver, &mut read_buffer),
    )
    .await
    .unwrap_or_else(|_| Handshake::Rejected(Frame::error(codes::HANDSHAKE_REQUIRED, "Handshake timed out")));

    match handshake {
        Handshake::Accepted(client) => {
            debug!(session = %session_id, client = ?client, "Handshake complete");
        }
        Handshake::Rejected(reply) => {
            warn!(session = %session_id, reason = ?reply, "Handshake rejected");
            metrics::record_error("handshake");
            if send_frame(&mut sender, &reply).await.is_ok() {
                let _ = sender.send(Message::Close(None)).await;
            }
            return;
        }
        Handshake::Gone => {
            debug!(session = %session_id, "Session left before handshake");
            return;
        }
    }

    let (outbox, mut inbox) = mpsc::unbounded_channel::<Bytes>();
    state.router.register_session(&session_id, outbox);

    if let Err(e) = send_frame(&mut sender, &Frame::welcome(&session_id)).await {
        error!(session = %session_id, error = %e, "Failed to send welcome");
        state.router.unregister_session(&session_id);
        return;
    }

    loop {
        tokio::select! {
            biased;

            Some(data) = inbox.recv() => {
                metrics::record_frame(data.len(), "outbound");
                if sender.send(Message::Binary(data.to_vec())).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        let start = Instant::now();
                        metrics::record_frame(data.len(), "inbound");
                        read_buffer.extend_from_slice(&data);

                        if !drain_frames(&mut read_buffer, &session_id, &state, &mut sender).await {
                            break;
                        }
                        metrics::record_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Text(_))) => {
                        let reply = Frame::error(codes::MALFORMED_FRAME, "Text frames are not supported");
                        if send_frame(&mut sender, &reply).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!(session = %session_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(session = %session_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(session = %session_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    let removed = state.router.unregister_session(&session_id);
    metrics::set_active_topics(state.router.stats().topic_count);

    debug!(session = %session_id, subscriptions = removed, "WebSocket disconnected");
}

/// Decode and handle every complete frame in `buffer`.
///
/// Returns `false` if the session must end.
async fn drain_frames(buffer: &mut BytesMut, session_id: &str, state: &AppState, sender: &mut WsSender) -> bool {
    loop {
        let reply = match wire::decode_from(buffer) {
            Ok(Some(frame)) => handle_frame(frame, session_id, state),
            Ok(None) => return true,
            Err(e) => {
                // The stream position is lost; report and end the session.
                warn!(session = %session_id, error = %e, "Malformed frame");
                metrics::record_error("malformed");
                let _ = send_frame(sender, &Frame::error(codes::MALFORMED_FRAME, e.to_string())).await;
                return false;
            }
        };

        if let Some(reply) = reply {
            if send_frame(sender, &reply).await.is_err() {
                return false;
            }
        }
    }
}

/// Apply one frame to the routing table, returning an error frame on failure.
fn handle_frame(frame: Frame, session_id: &str, state: &AppState) -> Option<Frame> {
    let router = &state.router;
    let result = match frame {
        Frame::Subscribe { topic } => {
            debug!(session = %session_id, topic = %topic, "Subscribe request");
            router.subscribe(session_id, &topic).map(|added| {
                if added {
                    metrics::record_subscription();
                    metrics::set_active_topics(router.stats().topic_count);
                }
            })
        }

        Frame::Unsubscribe { topic } => {
            debug!(session = %session_id, topic = %topic, "Unsubscribe request");
            router
                .unsubscribe(session_id, &topic)
                .map(|()| metrics::set_active_topics(router.stats().topic_count))
        }

        Frame::Advertise { topic } => router.advertise(session_id, &topic),

        Frame::Unadvertise { topic } => {
            if !router.unadvertise(session_id, &topic) {
                debug!(session = %session_id, topic = %topic, "Unadvertise without advertisement");
            }
            Ok(())
        }

        Frame::Publish { topic, payload } => router.publish(&topic, payload).map(|recipients| {
            metrics::record_fanout(recipients);
            debug!(session = %session_id, topic = %topic, recipients, "Published");
        }),

        Frame::Error { code, message } => {
            warn!(session = %session_id, code, message = %message, "Client reported error");
            Ok(())
        }

        other @ (Frame::Hello { .. } | Frame::Welcome { .. }) => {
            warn!(session = %session_id, frame_type = other.kind(), "Unexpected frame type");
            Ok(())
        }
    };

    match result {
        Ok(()) => None,
        Err(e) => {
            warn!(session = %session_id, error = %e, "Frame rejected");
            metrics::record_error("router");
            Some(e.to_frame())
        }
    }
}

async fn send_frame(sender: &mut WsSender, frame: &Frame) -> Result<()> {
    let data = wire::encode(frame)?;
    metrics::record_frame(data.len(), "outbound");
    sender.send(Message::Binary(data.to_vec())).await?;
    Ok(())
}
