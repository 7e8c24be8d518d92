//! Gateway Transport - TLS (or plaintext) TCP byte pipe
//!
//! Connects to one `host:port`, optionally wraps the socket in TLS, and
//! splits it: writes go through a mutex-guarded write half, reads run on a
//! dedicated task that forwards every chunk as [`TransportEvent::Data`].
//!
//! ```text
//! connect() ──► TcpStream ──► [TLS] ──► split
//!                                        ├── WriteHalf  ◄── send()
//!                                        └── ReadHalf   ──► reader task ──► TransportEvents
//! ```

use super::{Transport, TransportEvent, TransportEvents, TransportInfo};
use crate::{Result, TransportError};
use async_trait::async_trait;
use broker_config::GatewayConfig;
use bytes::{Bytes, BytesMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Any stream the gateway session can run over
trait GatewayStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> GatewayStream for T {}

type BoxedStream = Box<dyn GatewayStream>;

/// Gateway transport configuration
#[derive(Debug, Clone)]
pub struct GatewayTransportConfig {
    pub host: String,
    pub port: u16,
    /// Wrap the socket in TLS
    pub tls: bool,
    /// Budget for TCP connect and, separately, the TLS handshake
    pub connect_timeout: Duration,
    /// Buffer size for reading
    pub read_buffer_size: usize,
}

impl GatewayTransportConfig {
    /// Plaintext transport to a local endpoint
    pub fn plaintext(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: false,
            connect_timeout: Duration::from_millis(broker_config::defaults::gateway::CONNECT_TIMEOUT_MS),
            read_buffer_size: broker_config::defaults::gateway::READ_BUFFER_SIZE,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reject settings that can never produce a connection
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(TransportError::configuration("Gateway host is empty", Some("host")));
        }
        if self.port == 0 {
            return Err(TransportError::configuration("Gateway port must be non-zero", Some("port")));
        }
        if self.read_buffer_size == 0 {
            return Err(TransportError::configuration(
                "Read buffer size must be non-zero",
                Some("read_buffer_size"),
            ));
        }
        Ok(())
    }
}

impl From<&GatewayConfig> for GatewayTransportConfig {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            tls: config.tls,
            connect_timeout: config.connect_timeout(),
            read_buffer_size: config.read_buffer_size,
        }
    }
}

#[derive(Debug, Default)]
struct TransportStats {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

/// Handle on the running read task
struct ReaderHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// TLS/TCP transport to a trading gateway
pub struct GatewayTransport {
    config: GatewayTransportConfig,
    writer: Mutex<Option<WriteHalf<BoxedStream>>>,
    reader: parking_lot::Mutex<Option<ReaderHandle>>,
    connected: Arc<AtomicBool>,
    stats: Arc<TransportStats>,
}

impl GatewayTransport {
    pub fn new(config: GatewayTransportConfig) -> Self {
        Self {
            config,
            writer: Mutex::new(None),
            reader: parking_lot::Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(TransportStats::default()),
        }
    }

    pub fn config(&self) -> &GatewayTransportConfig {
        &self.config
    }

    async fn open_stream(&self) -> Result<BoxedStream> {
        let endpoint = self.config.endpoint();
        let timeout_ms = self.config.connect_timeout.as_millis() as u64;

        // Connect with timeout
        let tcp = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(&endpoint))
            .await
            .map_err(|_| TransportError::timeout("TCP connect", timeout_ms))?
            .map_err(|e| TransportError::network_with_source(format!("Failed to connect to {endpoint}"), e))?;

        if let Err(e) = tcp.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }

        if !self.config.tls {
            debug!(endpoint = %endpoint, "Using plaintext gateway connection");
            return Ok(Box::new(tcp));
        }

        let connector = native_tls::TlsConnector::new()
            .map_err(|e| TransportError::tls_with_source("Failed to build TLS connector", e))?;
        let connector = tokio_native_tls::TlsConnector::from(connector);

        let tls = tokio::time::timeout(self.config.connect_timeout, connector.connect(&self.config.host, tcp))
            .await
            .map_err(|_| TransportError::timeout("TLS handshake", timeout_ms))?
            .map_err(|e| TransportError::tls_with_source(format!("TLS handshake with {endpoint} failed"), e))?;

        Ok(Box::new(tls))
    }
}

#[async_trait]
impl Transport for GatewayTransport {
    async fn connect(&self) -> Result<TransportEvents> {
        self.config.validate()?;
        let endpoint = self.config.endpoint();
        if self.is_connected() {
            return Err(TransportError::connection("Already connected", Some(&endpoint)));
        }

        info!("Connecting to gateway at {}", endpoint);
        let stream = self.open_stream().await?;
        let (read_half, write_half) = tokio::io::split(stream);

        *self.writer.lock().await = Some(write_half);
        self.connected.store(true, Ordering::SeqCst);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(read_loop(
            read_half,
            events_tx,
            shutdown_rx,
            self.connected.clone(),
            self.stats.clone(),
            self.config.read_buffer_size,
            endpoint.clone(),
        ));

        if let Some(stale) = self.reader.lock().replace(ReaderHandle {
            shutdown: shutdown_tx,
            task,
        }) {
            stale.task.abort();
        }

        info!(tls = self.config.tls, "Connected to gateway at {}", endpoint);
        Ok(events_rx)
    }

    async fn send(&self, data: Bytes) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| TransportError::connection("Connection not established", None))?;

        writer
            .write_all(&data)
            .await
            .map_err(|e| TransportError::network_with_source("Failed to write to gateway", e))?;
        writer
            .flush()
            .await
            .map_err(|e| TransportError::network_with_source("Failed to flush gateway stream", e))?;

        let total = self.stats.bytes_sent.fetch_add(data.len() as u64, Ordering::Relaxed) + data.len() as u64;
        debug!(bytes = data.len(), total_sent = total, "Sent bytes to gateway");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let reader = self.reader.lock().take();
        let writer = self.writer.lock().await.take();
        if reader.is_none() && writer.is_none() {
            return Ok(());
        }

        self.connected.store(false, Ordering::SeqCst);

        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                debug!("Error shutting down gateway stream: {}", e);
            }
        }

        if let Some(reader) = reader {
            // The read task may already have exited on its own
            let _ = reader.shutdown.send(());
            if let Err(e) = reader.task.await {
                if !e.is_cancelled() {
                    warn!("Gateway read task ended abnormally: {}", e);
                }
            }
        }

        info!("Closed gateway connection to {}", self.config.endpoint());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn transport_info(&self) -> TransportInfo {
        TransportInfo {
            host: self.config.host.clone(),
            port: self.config.port,
            tls: self.config.tls,
            connected: self.is_connected(),
            bytes_sent: self.stats.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.stats.bytes_received.load(Ordering::Relaxed),
        }
    }
}

async fn read_loop(
    mut reader: ReadHalf<BoxedStream>,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut shutdown: oneshot::Receiver<()>,
    connected: Arc<AtomicBool>,
    stats: Arc<TransportStats>,
    buffer_size: usize,
    peer: String,
) {
    let mut read_buffer = BytesMut::with_capacity(buffer_size);

    loop {
        read_buffer.reserve(buffer_size);

        let read = tokio::select! {
            _ = &mut shutdown => {
                debug!(peer = %peer, "Read task stopped locally");
                break;
            }
            read = reader.read_buf(&mut read_buffer) => read,
        };

        match read {
            Ok(0) => {
                info!(peer = %peer, "Gateway closed the connection");
                break;
            }
            Ok(n) => {
                let total = stats.bytes_received.fetch_add(n as u64, Ordering::Relaxed) + n as u64;
                debug!(peer = %peer, bytes = n, total_received = total, "Received bytes from gateway");
                if events.send(TransportEvent::Data(read_buffer.split().freeze())).is_err() {
                    debug!(peer = %peer, "Event receiver dropped, stopping read task");
                    break;
                }
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "Gateway read failed");
                let _ = events.send(TransportEvent::Error(TransportError::network_with_source(
                    "Failed to read from gateway",
                    e,
                )));
                break;
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
    let _ = events.send(TransportEvent::Closed);
}
