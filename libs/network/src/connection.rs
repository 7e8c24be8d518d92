//! # Broker Connection - Session Facade
//!
//! ## Purpose
//!
//! One multiplexed session to a trading gateway. Owns the schema catalog,
//! the transport, the pending-command table and the event bus, and wires
//! them into a single inbound pipeline.
//!
//! ## Data Flow
//!
//! ```text
//! send_command ─► SchemaRegistry::encode ─► encode_frame ─► Transport::send
//!
//! Transport ─► Data ─► FrameDecoder ─► SchemaRegistry::decode ─► Inbound::classify
//!                                                                  ├── Event      ─► EventBus
//!                                                                  ├── Response   ─► Correlator, then EventBus
//!                                                                  └── Unroutable ─► Correlator by id, if any
//! ```
//!
//! ## Ordering
//!
//! A single dispatch task consumes transport events. Each chunk is framed,
//! decoded and dispatched to completion before the next one, so replies
//! and events are observed in wire order.
//!
//! ## Session Lifecycle
//!
//! `Disconnected → Connecting → Connected → Disconnected`. The catalog is
//! loaded on the first `open()` only; a closed connection can be reopened
//! without reloading it. Closing, a peer hang-up, or a fatal framing fault
//! rejects every pending command with [`BrokerError::ConnectionClosed`].

use crate::correlator::{CommandCorrelator, PendingCommand};
use crate::dispatch::{Inbound, UnroutableReason};
use crate::error::{BrokerError, BrokerResult};
use crate::events::{BrokerEvent, EventBus, SubscriptionId};
use crate::transports::{
    GatewayTransport, Transport, TransportEvent, TransportEvents, TransportInfo,
};
use broker_config::{defaults, BrokerConfig, SessionConfig};
use codec::{
    encode_frame, error_code, DecodedMessage, Fields, FrameDecoder, MessageCategory, SchemaError,
    SchemaRegistry, UNKNOWN_PAYLOAD_NAME, UNKNOWN_PAYLOAD_TYPE,
};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Connection state, separate from the catalog load state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Session behavior knobs
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Heartbeat period; `None` disables the heartbeat task
    pub heartbeat_interval: Option<Duration>,
    /// Message type sent as heartbeat
    pub heartbeat_message: String,
    /// Default reply deadline; `None` waits indefinitely
    pub command_timeout: Option<Duration>,
    pub max_frame_size: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for ConnectionOptions {
    fn from(session: &SessionConfig) -> Self {
        Self {
            heartbeat_interval: session.heartbeat_interval(),
            heartbeat_message: session.heartbeat_message.clone(),
            command_timeout: session.command_timeout(),
            max_frame_size: session.max_frame_size,
        }
    }
}

/// Where the catalog comes from
#[derive(Debug, Clone, Default)]
struct SchemaSource {
    files: Vec<PathBuf>,
    include_dirs: Vec<PathBuf>,
}

struct ConnectionInner {
    options: ConnectionOptions,
    schema_source: SchemaSource,
    registry: OnceCell<Arc<SchemaRegistry>>,
    transport: Arc<dyn Transport>,
    correlator: CommandCorrelator,
    events: EventBus,
    state: RwLock<ConnectionState>,
    /// Bumped on every open so a stale dispatch task cannot end a newer session
    generation: AtomicU64,
    /// Held for the whole of `open()`; concurrent opens wait for the first
    opening: tokio::sync::Mutex<()>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

/// Handle on one gateway session; cheap to clone
#[derive(Clone)]
pub struct BrokerConnection {
    inner: Arc<ConnectionInner>,
}

impl BrokerConnection {
    /// Create a connection whose catalog is loaded from `schema_files` on first open
    pub fn new(
        schema_files: Vec<PathBuf>,
        transport: Arc<dyn Transport>,
        options: ConnectionOptions,
    ) -> Self {
        Self::build(
            SchemaSource {
                files: schema_files,
                include_dirs: Vec::new(),
            },
            OnceCell::new(),
            transport,
            options,
        )
    }

    /// Create a connection around an already-loaded catalog
    pub fn with_registry(
        registry: Arc<SchemaRegistry>,
        transport: Arc<dyn Transport>,
        options: ConnectionOptions,
    ) -> Self {
        Self::build(
            SchemaSource::default(),
            OnceCell::with_value(registry),
            transport,
            options,
        )
    }

    /// Create a TLS gateway connection from loaded configuration
    pub fn from_config(config: &BrokerConfig) -> Self {
        let transport = Arc::new(GatewayTransport::new((&config.gateway).into()));
        Self::build(
            SchemaSource {
                files: config.schema.file_paths(),
                include_dirs: config.schema.include_paths(),
            },
            OnceCell::new(),
            transport,
            ConnectionOptions::from(&config.session),
        )
    }

    fn build(
        schema_source: SchemaSource,
        registry: OnceCell<Arc<SchemaRegistry>>,
        transport: Arc<dyn Transport>,
        options: ConnectionOptions,
    ) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                options,
                schema_source,
                registry,
                transport,
                correlator: CommandCorrelator::new(),
                events: EventBus::new(),
                state: RwLock::new(ConnectionState::Disconnected),
                generation: AtomicU64::new(0),
                opening: tokio::sync::Mutex::new(()),
                heartbeat: Mutex::new(None),
                dispatcher: Mutex::new(None),
            }),
        }
    }

    /// The catalog, loading it on first use
    pub fn registry(&self) -> BrokerResult<&Arc<SchemaRegistry>> {
        self.inner
            .registry
            .get_or_try_init(|| {
                let source = &self.inner.schema_source;
                SchemaRegistry::load_with_includes(&source.files, &source.include_dirs).map(Arc::new)
            })
            .map_err(BrokerError::from)
    }

    /// Load the catalog if needed, then connect the transport
    ///
    /// A call made while another open is in flight waits for it and then
    /// returns `Ok` only if that open left the session connected; after a
    /// failed open it tries again itself.
    pub async fn open(&self) -> BrokerResult<()> {
        let registry = match self.registry() {
            Ok(registry) => registry.clone(),
            Err(err) => {
                error!(error = %err, "Failed to load schema catalog");
                return Err(err);
            }
        };

        let _opening = self.inner.opening.lock().await;
        {
            let mut state = self.inner.state.write();
            if *state == ConnectionState::Connected {
                debug!("open() ignored, session already connected");
                return Ok(());
            }
            *state = ConnectionState::Connecting;
        }

        let events = match self.inner.transport.connect().await {
            Ok(events) => events,
            Err(err) => {
                *self.inner.state.write() = ConnectionState::Disconnected;
                error!(error = %err, category = err.category(), "Failed to connect to gateway");
                return Err(err.into());
            }
        };

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.inner.state.write() = ConnectionState::Connected;

        let dispatcher = tokio::spawn(run_dispatch(
            Arc::downgrade(&self.inner),
            registry,
            events,
            generation,
        ));
        if let Some(stale) = self.inner.dispatcher.lock().replace(dispatcher) {
            stale.abort();
        }

        if let Some(interval) = self.inner.options.heartbeat_interval {
            let heartbeat = tokio::spawn(run_heartbeat(Arc::downgrade(&self.inner), interval));
            if let Some(stale) = self.inner.heartbeat.lock().replace(heartbeat) {
                stale.abort();
            }
        }

        let info = self.inner.transport.transport_info();
        info!(host = %info.host, port = info.port, tls = info.tls, "Broker session open");
        Ok(())
    }

    /// Disconnect and reject every pending command
    pub async fn close(&self) -> BrokerResult<()> {
        self.inner.stop_heartbeat();
        let result = self.inner.transport.disconnect().await;
        self.inner.mark_disconnected("closed locally");
        result.map_err(BrokerError::from)
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.state.read() == ConnectionState::Connected && self.inner.transport.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    /// Send a command and wait for its reply under the default deadline
    ///
    /// Event-type commands and requests without a matching response type
    /// resolve immediately with empty fields. A reply carrying a non-null
    /// `errorCode` rejects with [`BrokerError::Rejected`].
    pub async fn send_command(
        &self,
        name: &str,
        data: serde_json::Value,
        correlation_id: Option<String>,
    ) -> BrokerResult<Fields> {
        self.send_command_with_timeout(name, data, correlation_id, self.inner.options.command_timeout)
            .await
    }

    /// [`send_command`](Self::send_command) with an explicit deadline
    pub async fn send_command_with_timeout(
        &self,
        name: &str,
        data: serde_json::Value,
        correlation_id: Option<String>,
        timeout: Option<Duration>,
    ) -> BrokerResult<Fields> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }

        let registry = self.registry()?.clone();
        let correlation_id = correlation_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let envelope = registry.encode(name, &data, Some(&correlation_id))?;
        let frame = encode_frame(&envelope);

        if !expects_reply(&registry, name) {
            debug!(payload_name = name, client_msg_id = %correlation_id, "Sending without reply");
            self.inner.transport.send(frame).await?;
            return Ok(Fields::new());
        }

        let transport = &self.inner.transport;
        let reply = self
            .inner
            .correlator
            .create(&correlation_id, name, async move {
                transport.send(frame).await.map_err(BrokerError::from)
            })
            .await?;

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, reply).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(
                        payload_name = name,
                        client_msg_id = %correlation_id,
                        timeout_ms = limit.as_millis() as u64,
                        "Command timed out"
                    );
                    return Err(BrokerError::Timeout {
                        correlation_id,
                        timeout_ms: limit.as_millis() as u64,
                    });
                }
            },
            None => reply.await,
        };

        // A dropped sender means the table was torn down under us
        outcome.unwrap_or_else(|_| Err(BrokerError::connection_closed(correlation_id)))
    }

    /// [`send_command`](Self::send_command) that reports failure as `None`
    pub async fn try_send_command(
        &self,
        name: &str,
        data: serde_json::Value,
        correlation_id: Option<String>,
    ) -> Option<Fields> {
        match self.send_command(name, data, correlation_id).await {
            Ok(fields) => Some(fields),
            Err(err) => {
                debug!(payload_name = name, error = %err, "try_send_command failed");
                None
            }
        }
    }

    /// Subscribe to every future occurrence of an event or response type
    pub fn on<F>(&self, name: &str, handler: F) -> BrokerResult<SubscriptionId>
    where
        F: Fn(&BrokerEvent) + Send + Sync + 'static,
    {
        let topic = self.topic(name)?;
        Ok(self.inner.events.subscribe(topic, handler))
    }

    /// Resolve with the next occurrence of an event or response type
    pub fn once(&self, name: &str) -> BrokerResult<oneshot::Receiver<BrokerEvent>> {
        let topic = self.topic(name)?;
        Ok(self.inner.events.listen_once(topic))
    }

    /// Drop a subscription made with [`on`](Self::on)
    pub fn off(&self, subscription: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(subscription)
    }

    /// Numeric code for a type name, `0` when unknown
    pub fn payload_type_by_name(&self, name: &str) -> u32 {
        self.registry()
            .ok()
            .and_then(|registry| registry.payload_type(name))
            .unwrap_or(UNKNOWN_PAYLOAD_TYPE)
    }

    /// Type name for a numeric code, `"unknown"` when unknown
    pub fn payload_name_by_type(&self, payload_type: u32) -> String {
        self.registry()
            .ok()
            .and_then(|registry| registry.payload_name(payload_type))
            .unwrap_or(UNKNOWN_PAYLOAD_NAME)
            .to_string()
    }

    /// Send one heartbeat; failures are logged and swallowed
    pub async fn send_heartbeat(&self) {
        self.inner.send_heartbeat().await
    }

    /// Commands still waiting for a reply
    pub fn pending_commands(&self) -> usize {
        self.inner.correlator.len()
    }

    pub fn transport_info(&self) -> TransportInfo {
        self.inner.transport.transport_info()
    }

    fn topic(&self, name: &str) -> BrokerResult<u32> {
        let registry = self.registry()?;
        registry
            .entry_ignore_case(name)
            .map(|entry| entry.payload_type())
            .ok_or_else(|| SchemaError::unknown_message_type(name).into())
    }
}

/// Whether a command of this type is answered by a reply frame
fn expects_reply(registry: &SchemaRegistry, name: &str) -> bool {
    match registry.entry(name).map(|entry| entry.category()) {
        Some(MessageCategory::Event) => false,
        Some(MessageCategory::Request) => registry.response_for(name).is_some(),
        _ => true,
    }
}

impl ConnectionInner {
    fn dispatch_frame(&self, registry: &SchemaRegistry, frame: &[u8]) {
        match Inbound::classify(registry.decode(frame)) {
            Inbound::Event(message) => {
                self.events.publish(&BrokerEvent::from(message));
            }
            Inbound::Response(message) => self.dispatch_response(message),
            Inbound::Unroutable { message, reason } => self.dispatch_unroutable(message, reason),
        }
    }

    fn dispatch_response(&self, message: DecodedMessage) {
        match message.client_msg_id.as_deref() {
            Some(id) => match self.correlator.extract(id) {
                Some(command) => settle(command, message.fields.clone()),
                None => debug!(
                    payload_name = %message.payload_name,
                    client_msg_id = id,
                    "Response has no pending command"
                ),
            },
            None => debug!(
                payload_name = %message.payload_name,
                "Response without correlation id cannot be routed"
            ),
        }

        self.events.publish(&BrokerEvent::from(message));
    }

    /// Best-effort match by id for frames that fit no category
    fn dispatch_unroutable(&self, message: DecodedMessage, reason: UnroutableReason) {
        let command = message
            .client_msg_id
            .as_deref()
            .and_then(|id| self.correlator.extract(id));

        match command {
            Some(command) => {
                warn!(
                    %reason,
                    payload_type = message.payload_type,
                    client_msg_id = command.correlation_id(),
                    "Settling command from unroutable frame by correlation id"
                );
                settle(command, message.fields);
            }
            None => debug!(
                %reason,
                payload_type = message.payload_type,
                payload_name = %message.payload_name,
                client_msg_id = ?message.client_msg_id,
                "Dropping unroutable frame"
            ),
        }
    }

    async fn send_heartbeat(&self) {
        let name = self.options.heartbeat_message.as_str();
        let Some(registry) = self.registry.get() else {
            debug!("Heartbeat skipped, catalog not loaded");
            return;
        };

        let frame = match registry.encode(name, &serde_json::Value::Null, None) {
            Ok(envelope) => encode_frame(&envelope),
            Err(err) => {
                debug!(error = %err, "Heartbeat not encodable");
                return;
            }
        };

        if let Err(err) = self.transport.send(frame).await {
            debug!(error = %err, "Heartbeat send failed");
        }
    }

    fn stop_heartbeat(&self) {
        if let Some(heartbeat) = self.heartbeat.lock().take() {
            heartbeat.abort();
        }
    }

    fn mark_disconnected(&self, reason: &str) {
        *self.state.write() = ConnectionState::Disconnected;
        let rejected = self
            .correlator
            .reject_all(|id| BrokerError::connection_closed(id));

        if rejected > 0 {
            warn!(rejected, reason, "Rejected pending commands on disconnect");
        }
        info!(reason, "Broker session ended");
    }

    /// Session end reported by the dispatch task of `generation`
    fn on_session_end(&self, generation: u64, reason: &str) {
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(generation, "Ignoring end of a superseded session");
            return;
        }
        if *self.state.read() == ConnectionState::Disconnected {
            return;
        }
        self.stop_heartbeat();
        self.mark_disconnected(reason);
    }
}

fn settle(command: PendingCommand, fields: Fields) {
    let id = command.correlation_id().to_string();
    let delivered = if error_code(&fields).is_some() {
        command.reject(BrokerError::rejected(fields))
    } else {
        command.resolve(fields)
    };

    if !delivered {
        debug!(client_msg_id = %id, "Caller stopped waiting before the reply arrived");
    }
}

async fn run_dispatch(
    inner: Weak<ConnectionInner>,
    registry: Arc<SchemaRegistry>,
    mut events: TransportEvents,
    generation: u64,
) {
    let max_frame_size = inner
        .upgrade()
        .map(|inner| inner.options.max_frame_size)
        .unwrap_or(defaults::session::MAX_FRAME_SIZE);
    let mut decoder = FrameDecoder::new(max_frame_size);

    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };

        match event {
            TransportEvent::Data(chunk) => {
                let decoded =
                    decoder.decode_with(&chunk, |frame| inner.dispatch_frame(&registry, &frame));

                if let Err(err) = decoded {
                    if !err.is_fatal_to_stream() {
                        warn!(error = %err, category = err.category(), "Dropping bad frame");
                        continue;
                    }
                    error!(error = %err, category = err.category(), "Fatal framing fault, closing session");
                    if let Err(e) = inner.transport.disconnect().await {
                        debug!("Error disconnecting after framing fault: {}", e);
                    }
                    inner.on_session_end(generation, "framing fault");
                    break;
                }
            }
            TransportEvent::Error(err) => {
                warn!(error = %err, category = err.category(), "Transport error");
            }
            TransportEvent::Closed => {
                inner.on_session_end(generation, "transport closed");
                break;
            }
        }
    }
}

async fn run_heartbeat(inner: Weak<ConnectionInner>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    // First tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if *inner.state.read() != ConnectionState::Connected {
            continue;
        }
        inner.send_heartbeat().await;
    }
}
