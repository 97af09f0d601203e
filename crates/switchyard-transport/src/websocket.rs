//! WebSocket relay client.
//!
//! [`WebSocketTransport`] connects to a `switchyard` relay and implements the
//! [`Transport`] contract on top of it. One connection task owns the socket:
//! it performs the `hello` / `welcome` handshake, then forwards outbound
//! frames from an mpsc channel and decodes inbound `publish` frames into the
//! local dispatch core.
//!
//! Publishes are not delivered locally; they travel through the relay, which
//! echoes them back if this transport is itself subscribed.

use bytes::BytesMut;
use dashmap::DashSet;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use switchyard_core::{
    AdvertiseId, ConnectionState, Message, MessageCallback, ReadinessGate, ReadyCallback, SubscriptionId,
    SubscriptionRegistry, TopicInfo, Transport, TransportError,
};
use switchyard_protocol::{wire, CodecKind, Frame, MessageCodec, ProtocolError, PROTOCOL_VERSION};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message as WsMessage},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, trace, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Room for the frame envelope around a payload of the maximum size.
const FRAME_OVERHEAD: usize = 1024;

/// WebSocket transport configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// Relay endpoint, e.g. `ws://127.0.0.1:7400/ws`.
    pub url: String,
    /// Codec used for message payloads.
    #[serde(default)]
    pub codec: CodecKind,
    /// Maximum encoded message size in bytes, both directions.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Connection attempts before giving up.
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    /// Delay between connection attempts in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Time allowed for the relay's `welcome` in milliseconds.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Name announced in the `hello` frame.
    #[serde(default)]
    pub client_name: Option<String>,
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_connect_attempts() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_handshake_timeout_ms() -> u64 {
    5_000
}

impl WebSocketConfig {
    /// Default settings for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            codec: CodecKind::default(),
            max_message_size: default_max_message_size(),
            connect_attempts: default_connect_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            client_name: None,
        }
    }

    /// Use another payload codec.
    #[must_use]
    pub fn with_codec(mut self, codec: CodecKind) -> Self {
        self.codec = codec;
        self
    }

    /// Announce `name` to the relay.
    #[must_use]
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

/// State shared between the transport handle and its connection task.
struct Shared {
    codec: Arc<dyn MessageCodec>,
    registry: SubscriptionRegistry,
    gate: ReadinessGate,
    closed: AtomicBool,
    outbound: mpsc::UnboundedSender<Frame>,
    remote: Mutex<HashSet<String>>,
    session: Mutex<Option<String>>,
}

impl Shared {
    fn new(codec: CodecKind, outbound: mpsc::UnboundedSender<Frame>) -> Self {
        Self {
            codec: codec.codec(),
            registry: SubscriptionRegistry::new(),
            gate: ReadinessGate::new(),
            closed: AtomicBool::new(false),
            outbound,
            remote: Mutex::new(HashSet::new()),
            session: Mutex::new(None),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn send(&self, frame: Frame) {
        let kind = frame.kind();
        if self.outbound.send(frame).is_err() {
            trace!(frame = kind, "Connection task gone, frame dropped");
        }
    }

    /// Bring the relay subscription for `topic` in line with local listeners.
    fn sync_remote(&self, topic: &str) {
        let mut remote = self.remote.lock();
        let wanted = self.registry.active_count(topic) > 0;
        let present = remote.contains(topic);

        if wanted && !present {
            remote.insert(topic.to_owned());
            self.send(Frame::subscribe(topic));
        } else if !wanted && present {
            remote.remove(topic);
            self.send(Frame::unsubscribe(topic));
        }
    }

    fn handle_frame(&self, frame: Frame) {
        if self.is_closed() {
            trace!(frame = frame.kind(), "Transport closed, inbound frame dropped");
            return;
        }
        match frame {
            Frame::Publish { topic, payload } => match self.codec.decode_fields(&payload) {
                Ok(data) => {
                    let report = self.registry.dispatch(&topic, &Message::from_fields(data));
                    trace!(topic = %topic, delivered = report.delivered, "Inbound publish");
                }
                Err(e) => warn!(topic = %topic, error = %e, "Dropping undecodable payload"),
            },
            Frame::Error { code, message } => {
                warn!(code, message = %message, "Relay reported an error");
            }
            other => debug!(frame = other.kind(), "Ignoring unexpected frame"),
        }
    }
}

/// Client transport talking to a `switchyard` relay over WebSocket.
pub struct WebSocketTransport {
    config: WebSocketConfig,
    shared: Arc<Shared>,
    advertised: DashSet<AdvertiseId>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketTransport {
    /// Start connecting to the relay described by `config`.
    ///
    /// Returns immediately in the `Connecting` state; operations issued
    /// before the handshake completes are deferred. If every connection
    /// attempt fails the transport falls back to `Disconnected` and deferred
    /// operations stay queued until [`Transport::close`].
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Unavailable`] when called outside a Tokio
    /// runtime or with a URL that is not `ws://` or `wss://`.
    pub fn connect(config: WebSocketConfig) -> Result<Self, TransportError> {
        let handle = Handle::try_current()
            .map_err(|_| TransportError::Unavailable("WebSocket transport requires a Tokio runtime".into()))?;

        if !(config.url.starts_with("ws://") || config.url.starts_with("wss://")) {
            return Err(TransportError::Unavailable(format!(
                "Unsupported relay URL: {}",
                config.url
            )));
        }

        let (outbound, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new(config.codec, outbound));

        shared.gate.begin_connect();
        let task = handle.spawn(run_connection(Arc::clone(&shared), config.clone(), rx));
        debug!(url = %config.url, codec = %config.codec, "WebSocket transport connecting");

        Ok(Self {
            config,
            shared,
            advertised: DashSet::new(),
            task: Mutex::new(Some(task)),
        })
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }

    /// Session id assigned by the relay, once connected.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.shared.session.lock().clone()
    }

    /// Topics currently subscribed at the relay.
    #[must_use]
    pub fn remote_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.shared.remote.lock().iter().cloned().collect();
        topics.sort();
        topics
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.shared.is_closed() {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

impl Transport for WebSocketTransport {
    fn name(&self) -> &'static str {
        "websocket"
    }

    fn state(&self) -> ConnectionState {
        self.shared.gate.state()
    }

    fn on_ready(&self, callback: ReadyCallback) {
        if self.shared.is_closed() {
            trace!("Dropping ready callback on closed transport");
            return;
        }
        self.shared.gate.on_ready(callback);
    }

    fn advertise(&self, topic: &TopicInfo) -> Result<AdvertiseId, TransportError> {
        self.ensure_open()?;
        let id = AdvertiseId::new(topic.name_arc(), self.shared.registry.next_id());
        self.advertised.insert(id.clone());

        let shared = Arc::clone(&self.shared);
        let name = topic.name().to_owned();
        self.shared.gate.on_ready(move || shared.send(Frame::advertise(name)));
        Ok(id)
    }

    fn unadvertise(&self, id: &AdvertiseId) {
        if self.advertised.remove(id).is_none() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let name = id.topic().to_owned();
        self.shared.gate.on_ready(move || shared.send(Frame::unadvertise(name)));
    }

    fn publish(&self, topic: &TopicInfo, message: Message) -> Result<(), TransportError> {
        self.ensure_open()?;

        let payload = self.shared.codec.encode(message.data())?;
        if payload.len() > self.config.max_message_size {
            return Err(ProtocolError::FrameTooLarge(payload.len()).into());
        }

        let shared = Arc::clone(&self.shared);
        let name = topic.name().to_owned();
        self.shared.gate.on_ready(move || {
            if !shared.is_closed() {
                shared.send(Frame::publish(name, payload.to_vec()));
            }
        });
        Ok(())
    }

    fn subscribe(&self, topic: &TopicInfo, callback: MessageCallback) -> Result<SubscriptionId, TransportError> {
        self.ensure_open()?;

        let id = self.shared.registry.mint(topic);
        let shared = Arc::clone(&self.shared);
        let pending = id.clone();
        self.shared.gate.on_ready(move || {
            if shared.registry.activate(&pending, callback) {
                shared.sync_remote(pending.topic());
            }
        });

        debug!(topic = %topic, subscription = %id, "Subscribed");
        Ok(id)
    }

    fn unsubscribe_by_id(&self, id: &SubscriptionId) -> Result<(), TransportError> {
        if self.shared.registry.remove(id)? {
            self.shared.sync_remote(id.topic());
        }
        debug!(subscription = %id, "Unsubscribed");
        Ok(())
    }

    fn unsubscribe(&self, topic: &TopicInfo) -> usize {
        let removed = self.shared.registry.remove_topic(topic.name());
        self.shared.sync_remote(topic.name());
        removed
    }

    fn subscription_count(&self, topic: &TopicInfo) -> usize {
        self.shared.registry.count(topic.name())
    }

    fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }

        let discarded = self.shared.gate.discard_pending();
        let removed = self.shared.registry.clear();
        self.shared.remote.lock().clear();
        self.advertised.clear();
        self.shared.gate.mark_disconnected();
        info!(url = %self.config.url, discarded, removed, "WebSocket transport closed");
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

impl fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("url", &self.config.url)
            .field("state", &self.state())
            .field("session", &self.session_id())
            .finish()
    }
}

/// Body of the connection task.
async fn run_connection(shared: Arc<Shared>, config: WebSocketConfig, mut outbound: mpsc::UnboundedReceiver<Frame>) {
    let mut stream = match connect_with_retry(&config).await {
        Ok(stream) => stream,
        Err(e) => {
            error!(url = %config.url, error = %e, "Giving up on relay");
            shared.gate.mark_disconnected();
            return;
        }
    };

    let session = match tokio::time::timeout(config.handshake_timeout(), handshake(&mut stream, &config)).await {
        Ok(Ok(session)) => session,
        Ok(Err(e)) => {
            error!(url = %config.url, error = %e, "Relay handshake failed");
            shared.gate.mark_disconnected();
            return;
        }
        Err(_) => {
            error!(url = %config.url, "Relay handshake timed out");
            shared.gate.mark_disconnected();
            return;
        }
    };

    info!(url = %config.url, session = %session, "Connected to relay");
    *shared.session.lock() = Some(session);
    shared.gate.mark_connected();

    let mut buffer = BytesMut::with_capacity(4096);
    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = send_frame(&mut stream, &frame).await {
                    warn!(frame = frame.kind(), error = %e, "Failed to send frame");
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(WsMessage::Binary(data))) => {
                    ingest(&shared, &mut buffer, &data, config.max_message_size);
                }
                Some(Ok(WsMessage::Ping(data))) => {
                    if let Err(e) = stream.send(WsMessage::Pong(data)).await {
                        warn!(error = %e, "Failed to send pong");
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    debug!("Relay closed the connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(WsError::ConnectionClosed)) => break,
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket error");
                    break;
                }
            }
        }
    }

    shared.gate.mark_disconnected();
    shared.remote.lock().clear();
    info!(url = %config.url, "Relay connection ended");
}

/// Append inbound data and dispatch every complete frame.
///
/// An oversized message also discards any partial frame already buffered,
/// since the two can no longer be stitched together.
fn ingest(shared: &Shared, buffer: &mut BytesMut, data: &[u8], max_message_size: usize) {
    if data.len() > max_message_size.saturating_add(FRAME_OVERHEAD) {
        warn!(size = data.len(), max = max_message_size, buffered = buffer.len(), "Inbound message too large");
        buffer.clear();
        return;
    }
    buffer.extend_from_slice(data);
    drain_frames(shared, buffer);
}

fn drain_frames(shared: &Shared, buffer: &mut BytesMut) {
    loop {
        match wire::decode_from(buffer) {
            Ok(Some(frame)) => shared.handle_frame(frame),
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Discarding malformed frame data");
                buffer.clear();
                break;
            }
        }
    }
}

async fn connect_with_retry(config: &WebSocketConfig) -> Result<WsStream, WsError> {
    let attempts = config.connect_attempts.max(1);
    let mut attempt = 1;
    loop {
        match connect_async(config.url.as_str()).await {
            Ok((stream, _response)) => return Ok(stream),
            Err(e) if attempt < attempts => {
                warn!(url = %config.url, attempt, attempts, error = %e, "Relay connection failed, retrying");
                attempt += 1;
                tokio::time::sleep(config.retry_delay()).await;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn send_frame(stream: &mut WsStream, frame: &Frame) -> Result<(), TransportError> {
    let data = wire::encode(frame)?;
    stream
        .send(WsMessage::Binary(data.to_vec()))
        .await
        .map_err(|e| TransportError::Unavailable(e.to_string()))
}

/// Send `hello` and wait for the relay's `welcome`, returning the session id.
async fn handshake(stream: &mut WsStream, config: &WebSocketConfig) -> Result<String, TransportError> {
    send_frame(stream, &Frame::hello(config.client_name.clone())).await?;

    let mut buffer = BytesMut::new();
    while let Some(incoming) = stream.next().await {
        let data = match incoming.map_err(|e| TransportError::Unavailable(e.to_string()))? {
            WsMessage::Binary(data) => data,
            WsMessage::Close(_) => break,
            _ => continue,
        };
        buffer.extend_from_slice(&data);

        let Some(frame) = wire::decode_from(&mut buffer)? else {
            continue;
        };
        return match frame {
            Frame::Welcome { session_id, version } if version == PROTOCOL_VERSION => Ok(session_id),
            Frame::Welcome { version, .. } => Err(TransportError::Unavailable(format!(
                "Relay speaks protocol version {version}, expected {PROTOCOL_VERSION}"
            ))),
            Frame::Error { code, message } => Err(TransportError::Unavailable(format!(
                "Relay rejected handshake ({code}): {message}"
            ))),
            other => Err(TransportError::Unavailable(format!(
                "Expected welcome, got {}",
                other.kind()
            ))),
        };
    }

    Err(TransportError::Unavailable("Relay closed during handshake".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_core::wait_ready;

    #[test]
    fn test_config_defaults() {
        let config = WebSocketConfig::new("ws://127.0.0.1:7400/ws");
        assert_eq!(config.codec, CodecKind::Json);
        assert_eq!(config.max_message_size, 64 * 1024);
        assert_eq!(config.connect_attempts, 5);
        assert_eq!(config.client_name, None);
    }

    #[test]
    fn test_config_from_toml() {
        let config: WebSocketConfig = toml::from_str(
            r#"
            url = "wss://relay.example/ws"
            codec = "msgpack"
            retry_delay_ms = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.codec, CodecKind::Msgpack);
        assert_eq!(config.retry_delay(), Duration::from_millis(50));
        assert_eq!(config.handshake_timeout_ms, 5_000);
    }

    #[test]
    fn test_connect_outside_runtime_fails_fast() {
        let result = WebSocketTransport::connect(WebSocketConfig::new("ws://127.0.0.1:7400/ws"));
        assert!(matches!(result, Err(TransportError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_rejects_non_websocket_url() {
        let result = WebSocketTransport::connect(WebSocketConfig::new("http://127.0.0.1:7400"));
        assert!(matches!(result, Err(TransportError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_operations_stay_deferred_without_relay() {
        let mut config = WebSocketConfig::new("ws://127.0.0.1:1/ws");
        config.connect_attempts = 1;
        let transport = WebSocketTransport::connect(config).unwrap();
        let topic = TopicInfo::new("offline").unwrap();

        transport
            .subscribe(&topic, Arc::new(|_: &Message| Ok(())))
            .unwrap();
        transport.publish(&topic, Message::new().with("n", 1)).unwrap();
        assert_eq!(transport.subscription_count(&topic), 1);

        assert!(matches!(
            wait_ready(&transport, Duration::from_millis(200)).await,
            Err(TransportError::NotReady(_))
        ));
        assert_ne!(transport.state(), ConnectionState::Connected);

        transport.close();
        assert_eq!(transport.state(), ConnectionState::Disconnected);
        assert_eq!(transport.subscription_count(&topic), 0);
        assert!(matches!(
            transport.publish(&topic, Message::new()),
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_oversized_publish_is_rejected() {
        let mut config = WebSocketConfig::new("ws://127.0.0.1:1/ws");
        config.connect_attempts = 1;
        config.max_message_size = 16;
        let transport = WebSocketTransport::connect(config).unwrap();
        let topic = TopicInfo::new("big").unwrap();

        let result = transport.publish(&topic, Message::new().with("text", "x".repeat(64)));
        assert!(matches!(
            result,
            Err(TransportError::Protocol(ProtocolError::FrameTooLarge(_)))
        ));
    }

    fn listening(topic: &str) -> (Shared, Arc<Mutex<Vec<Message>>>) {
        let (outbound, _rx) = mpsc::unbounded_channel();
        let shared = Shared::new(CodecKind::Json, outbound);
        let id = shared.registry.mint(&TopicInfo::new(topic).unwrap());
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        shared.registry.activate(
            &id,
            Arc::new(move |message: &Message| {
                sink.lock().push(message.clone());
                Ok(())
            }),
        );
        (shared, log)
    }

    fn publish_frame(shared: &Shared, topic: &str, n: i64) -> Vec<u8> {
        let payload = shared.codec.encode(Message::new().with("n", n).data()).unwrap();
        wire::encode(&Frame::publish(topic, payload.to_vec())).unwrap().to_vec()
    }

    #[tokio::test]
    async fn test_on_ready_after_close_is_dropped() {
        let mut config = WebSocketConfig::new("ws://127.0.0.1:1/ws");
        config.connect_attempts = 1;
        let transport = WebSocketTransport::connect(config).unwrap();
        transport.close();

        for _ in 0..100 {
            transport.on_ready(Box::new(|| {}));
        }
        assert_eq!(transport.shared.gate.pending(), 0);
        assert!(matches!(
            wait_ready(&transport, Duration::from_millis(50)).await,
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn test_inbound_frames_dropped_once_closed() {
        let (shared, log) = listening("t");
        let mut buffer = BytesMut::new();

        let frame = publish_frame(&shared, "t", 1);
        ingest(&shared, &mut buffer, &frame, 1024);
        assert_eq!(log.lock().len(), 1);

        shared.closed.store(true, Ordering::Release);
        let frame = publish_frame(&shared, "t", 2);
        ingest(&shared, &mut buffer, &frame, 1024);
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn test_oversized_message_discards_partial_frame() {
        let (shared, log) = listening("t");
        let mut buffer = BytesMut::new();

        let frame = publish_frame(&shared, "t", 1);
        let (head, _) = frame.split_at(frame.len() / 2);
        ingest(&shared, &mut buffer, head, 1024);
        assert!(!buffer.is_empty());

        ingest(&shared, &mut buffer, &vec![0u8; FRAME_OVERHEAD + 1], 0);
        assert!(buffer.is_empty());
        assert!(log.lock().is_empty());

        let frame = publish_frame(&shared, "t", 2);
        ingest(&shared, &mut buffer, &frame, 1024);
        let log = log.lock();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].get_i64("n"), Some(2));
    }
}
