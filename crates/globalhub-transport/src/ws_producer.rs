//! # WebSocket Producer
//!
//! Agent-side WebSocket client with automatic reconnection and backoff.
//!
//! ## Connection Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    WebSocket Connection States                          │
//! │                                                                         │
//! │  ┌────────────┐    connect()    ┌────────────┐                         │
//! │  │Disconnected│ ──────────────► │ Connecting │                         │
//! │  └────────────┘                 └─────┬──────┘                         │
//! │        ▲                              │                                 │
//! │        │                    success   │   failure                       │
//! │        │                        ┌─────┴─────┐                          │
//! │        │                        ▼           ▼                           │
//! │        │              ┌────────────┐  ┌────────────┐                   │
//! │        │              │ Connected  │  │ Backoff    │                   │
//! │        │              └─────┬──────┘  └─────┬──────┘                   │
//! │        │                    │               │                           │
//! │        │              disconnect/error      │  timer expired            │
//! │        │                    ▼               │                           │
//! │        │              ┌────────────┐        │                           │
//! │        └───────────── │Reconnecting│ ◄──────┘                          │
//! │                       └────────────┘                                    │
//! │                                                                         │
//! │  Messages queue in the outgoing channel while disconnected. A message   │
//! │  whose write failed is held and written first after reconnect.         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use futures_util::{Sink, SinkExt, StreamExt};
use globalhub_core::Message;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{TransportError, TransportResult};
use crate::traits::Producer;

// =============================================================================
// Producer State
// =============================================================================

/// Connection state of the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting before the next attempt.
    Backoff,
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Backoff => write!(f, "backoff"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct WsProducerConfig {
    /// Manager endpoint, e.g. `ws://globalhub-manager:8765/ws`.
    pub url: String,

    pub connect_timeout: Duration,

    pub initial_backoff: Duration,

    pub max_backoff: Duration,

    /// Maximum reconnection attempts (0 = infinite).
    pub max_retries: u32,

    /// Keepalive ping interval.
    pub ping_interval: Duration,

    /// Outgoing queue size.
    pub queue_capacity: usize,
}

impl Default for WsProducerConfig {
    fn default() -> Self {
        WsProducerConfig {
            url: String::new(),
            connect_timeout: Duration::from_secs(10),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
            max_retries: 0,
            ping_interval: Duration::from_secs(30),
            queue_capacity: 256,
        }
    }
}

// =============================================================================
// Producer Handle
// =============================================================================

/// Cloneable handle implementing [`Producer`].
#[derive(Clone)]
pub struct WsProducer {
    outgoing_tx: mpsc::Sender<Message>,
    state: Arc<RwLock<ConnectionState>>,
}

impl WsProducer {
    /// Validates the URL and spawns the connection task.
    ///
    /// The task stops when `shutdown` is cancelled or `max_retries` is hit.
    pub fn spawn(config: WsProducerConfig, shutdown: CancellationToken) -> TransportResult<Self> {
        url::Url::parse(&config.url)?;

        let (outgoing_tx, outgoing_rx) = mpsc::channel(config.queue_capacity.max(1));
        let state = Arc::new(RwLock::new(ConnectionState::Disconnected));

        let connection = Connection {
            config,
            state: state.clone(),
            outgoing_rx,
            pending: None,
            shutdown,
        };
        tokio::spawn(connection.run());

        Ok(WsProducer { outgoing_tx, state })
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn is_connected(&self) -> bool {
        *self.state.read().await == ConnectionState::Connected
    }

    /// True once the connection task has exited; every later send fails.
    pub fn is_stopped(&self) -> bool {
        self.outgoing_tx.is_closed()
    }
}

#[async_trait]
impl Producer for WsProducer {
    async fn send(&self, msg: Message) -> TransportResult<()> {
        if self.is_stopped() {
            return Err(TransportError::ChannelClosed("producer task stopped".into()));
        }
        self.outgoing_tx
            .send(msg)
            .await
            .map_err(|_| TransportError::ChannelClosed("producer task stopped".into()))
    }
}

// =============================================================================
// Connection Task
// =============================================================================

struct Connection {
    config: WsProducerConfig,
    state: Arc<RwLock<ConnectionState>>,
    outgoing_rx: mpsc::Receiver<Message>,
    /// Message whose write failed on the previous connection.
    pending: Option<Message>,
    shutdown: CancellationToken,
}

impl Connection {
    async fn run(mut self) {
        info!(url = %self.config.url, "Producer starting");

        let mut backoff = self.create_backoff();
        let mut retry_count = 0u32;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            *self.state.write().await = ConnectionState::Connecting;

            match self.connect_with_timeout().await {
                Ok(ws_stream) => {
                    info!("WebSocket connected");
                    *self.state.write().await = ConnectionState::Connected;

                    backoff.reset();
                    retry_count = 0;

                    match self.connection_loop(ws_stream).await {
                        Ok(()) if self.shutdown.is_cancelled() => break,
                        Ok(()) => info!("Connection closed by manager"),
                        Err(e) => warn!(error = %e, "Connection loop ended"),
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to connect");
                }
            }

            *self.state.write().await = ConnectionState::Backoff;

            if self.config.max_retries > 0 {
                retry_count += 1;
                if retry_count >= self.config.max_retries {
                    error!(
                        max_retries = self.config.max_retries,
                        "Max reconnection attempts reached"
                    );
                    break;
                }
            }

            let Some(duration) = backoff.next_backoff() else {
                error!("Backoff exhausted");
                break;
            };
            debug!(?duration, attempt = retry_count, "Waiting before reconnect");

            tokio::select! {
                _ = tokio::time::sleep(duration) => {
                    *self.state.write().await = ConnectionState::Reconnecting;
                }
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown during backoff");
                    break;
                }
            }
        }

        *self.state.write().await = ConnectionState::Disconnected;

        self.outgoing_rx.close();
        let mut dropped = usize::from(self.pending.take().is_some());
        while self.outgoing_rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            warn!(dropped, "Producer stopped with unsent messages");
        }
        info!("Producer stopped");
    }

    async fn connect_with_timeout(
        &self,
    ) -> TransportResult<WebSocketStream<MaybeTlsStream<TcpStream>>> {
        match timeout(self.config.connect_timeout, connect_async(&self.config.url)).await {
            Ok(Ok((ws_stream, response))) => {
                debug!(status = ?response.status(), "WebSocket handshake complete");
                Ok(ws_stream)
            }
            Ok(Err(e)) => Err(TransportError::from(e)),
            Err(_) => Err(TransportError::Timeout(self.config.connect_timeout.as_secs())),
        }
    }

    /// Writes queued messages and answers pings until the socket drops.
    async fn connection_loop(
        &mut self,
        ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    ) -> TransportResult<()> {
        let (mut write, mut read) = ws_stream.split();

        if let Some(msg) = self.pending.take() {
            write_message(&mut write, &msg, &mut self.pending).await?;
        }

        let mut ping_interval = tokio::time::interval(self.config.ping_interval);
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(msg) = self.outgoing_rx.recv() => {
                    write_message(&mut write, &msg, &mut self.pending).await?;
                }

                next = read.next() => {
                    let Some(result) = next else {
                        return Err(TransportError::ConnectionFailed("stream ended".into()));
                    };
                    match result {
                        Ok(WsMessage::Ping(data)) => {
                            write.send(WsMessage::Pong(data)).await?;
                        }
                        Ok(WsMessage::Pong(_)) => {
                            debug!("Received pong");
                        }
                        Ok(WsMessage::Close(frame)) => {
                            info!(?frame, "Received close frame");
                            return Ok(());
                        }
                        Ok(_) => {
                            warn!("Ignoring unexpected frame from manager");
                        }
                        Err(e) => {
                            error!(error = %e, "WebSocket error");
                            return Err(TransportError::from(e));
                        }
                    }
                }

                _ = ping_interval.tick() => {
                    write.send(WsMessage::Ping(vec![].into())).await?;
                    debug!("Sent ping");
                }

                _ = self.shutdown.cancelled() => {
                    info!("Shutdown signal received, closing connection");
                    let _ = write.send(WsMessage::Close(None)).await;
                    return Ok(());
                }
            }
        }
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.config.initial_backoff,
            max_interval: self.config.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

async fn write_message<S>(
    write: &mut S,
    msg: &Message,
    pending: &mut Option<Message>,
) -> TransportResult<()>
where
    S: Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let json = msg.to_json()?;
    debug!(key = %msg.key, version = %msg.version, "Sending message");

    if let Err(e) = write.send(WsMessage::Text(json.into())).await {
        *pending = Some(msg.clone());
        return Err(e.into());
    }
    Ok(())
}
