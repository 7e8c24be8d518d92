//! Loopback fake gateway for connection tests
//!
//! Real TCP on 127.0.0.1 in plaintext mode; the gateway side encodes and
//! decodes with the same catalog the client loads.

#![allow(dead_code)]

use bytes::Bytes;
use codec::{encode_frame, DecodedMessage, Envelope, FrameDecoder, SchemaRegistry};
use network::{BrokerConnection, ConnectionOptions, GatewayTransport, GatewayTransportConfig};
use std::collections::VecDeque;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

pub fn fixture() -> PathBuf {
    PathBuf::from(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../codec/tests/fixtures/test_gateway.proto"
    ))
}

/// Options with no heartbeat and a short command deadline
pub fn test_options() -> ConnectionOptions {
    ConnectionOptions {
        heartbeat_interval: None,
        heartbeat_message: "HeartbeatEvent".to_string(),
        command_timeout: Some(Duration::from_secs(3)),
        max_frame_size: 64 * 1024,
    }
}

/// Route library logs to the test harness; `RUST_LOG` picks the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Fail the test instead of hanging
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(TEST_TIMEOUT, future)
        .await
        .expect("operation did not finish in time")
}

pub struct FakeGateway {
    listener: TcpListener,
    registry: Arc<SchemaRegistry>,
}

impl FakeGateway {
    pub async fn start() -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake gateway");
        let registry = SchemaRegistry::load(&[fixture()]).expect("Failed to load fixture catalog");
        Self {
            listener,
            registry: Arc::new(registry),
        }
    }

    pub fn port(&self) -> u16 {
        self.listener.local_addr().expect("listener address").port()
    }

    /// Client connection to this gateway, not yet opened
    pub fn client(&self, options: ConnectionOptions) -> BrokerConnection {
        let transport = GatewayTransport::new(GatewayTransportConfig::plaintext("127.0.0.1", self.port()));
        BrokerConnection::new(vec![fixture()], Arc::new(transport), options)
    }

    pub async fn accept(&self) -> GatewayPeer {
        let (stream, _) = within(self.listener.accept())
            .await
            .expect("Failed to accept client");
        GatewayPeer {
            stream,
            decoder: FrameDecoder::default(),
            frames: VecDeque::new(),
            registry: self.registry.clone(),
        }
    }

    /// Open `client` and accept its socket
    pub async fn open(&self, client: &BrokerConnection) -> GatewayPeer {
        within(client.open()).await.expect("Failed to open connection");
        self.accept().await
    }
}

/// Gateway end of one accepted client socket
pub struct GatewayPeer {
    stream: TcpStream,
    decoder: FrameDecoder,
    frames: VecDeque<Bytes>,
    registry: Arc<SchemaRegistry>,
}

impl GatewayPeer {
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Next frame the client sent, decoded
    pub async fn recv(&mut self) -> DecodedMessage {
        within(async {
            loop {
                if let Some(frame) = self.frames.pop_front() {
                    return self.registry.decode(&frame);
                }
                let mut buf = [0u8; 4096];
                let n = self.stream.read(&mut buf).await.expect("gateway read failed");
                assert!(n > 0, "client closed the connection");
                self.frames
                    .extend(self.decoder.decode(&buf[..n]).expect("client sent a bad frame"));
            }
        })
        .await
    }

    /// Send a catalog message to the client
    pub async fn reply(&mut self, name: &str, fields: serde_json::Value, client_msg_id: Option<&str>) {
        let envelope = self
            .registry
            .encode(name, &fields, client_msg_id)
            .expect("gateway failed to encode");
        self.send_raw(&encode_frame(&envelope)).await;
    }

    /// Send an envelope with an arbitrary type code
    pub async fn reply_envelope(&mut self, envelope: Envelope) {
        let bytes = self.registry.encode_envelope(&envelope);
        self.send_raw(&encode_frame(&bytes)).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("gateway write failed");
        self.stream.flush().await.expect("gateway flush failed");
    }

    /// Write bytes in small pieces to force fragmented reads
    pub async fn send_fragmented(&mut self, bytes: &[u8], piece: usize) {
        for chunk in bytes.chunks(piece) {
            self.send_raw(chunk).await;
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}
