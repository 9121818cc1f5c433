//! # WebSocket Consumer
//!
//! Manager-side axum server. Every leaf hub agent keeps one WebSocket open and
//! writes JSON [`Message`] frames into it.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        WsConsumer (Axum)                                │
//! │                                                                         │
//! │  /health ──▶ "OK"                                                       │
//! │  /ws     ──▶ WebSocket upgrade                                          │
//! │                   │                                                     │
//! │         ┌─────────┼─────────┐                                           │
//! │         ▼         ▼         ▼                                           │
//! │     ┌───────┐ ┌───────┐ ┌───────┐   one task per agent connection       │
//! │     │ hub1  │ │ hub2  │ │ hub3  │                                       │
//! │     └───┬───┘ └───┬───┘ └───┬───┘                                       │
//! │         └─────────┼─────────┘                                           │
//! │                   ▼                                                     │
//! │            mpsc::Sender<Message> ──▶ message_chan() ──▶ dispatcher      │
//! │                                                                         │
//! │  Frames from one connection stay in order. Nothing is ordered across   │
//! │  connections.                                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use globalhub_core::Message;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{TransportError, TransportResult};
use crate::traits::Consumer;

// =============================================================================
// Constants
// =============================================================================

/// Default port of the manager's transport endpoint.
pub const DEFAULT_PORT: u16 = 8765;

const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Bundles can carry many objects.
const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct WsConsumerConfig {
    /// Port to listen on. `0` picks a free port.
    pub port: u16,
    pub bind_addr: String,
    /// Capacity of the message channel.
    pub capacity: usize,
}

impl Default for WsConsumerConfig {
    fn default() -> Self {
        WsConsumerConfig {
            port: DEFAULT_PORT,
            bind_addr: "0.0.0.0".to_string(),
            capacity: 1024,
        }
    }
}

impl WsConsumerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

// =============================================================================
// Server State
// =============================================================================

/// A connected agent.
#[derive(Debug, Clone)]
pub struct AgentConnection {
    pub addr: SocketAddr,
    /// Learned from the first message on the connection.
    pub leaf_hub: Option<String>,
    pub connected_at: Instant,
}

struct ConsumerState {
    messages_tx: mpsc::Sender<Message>,
    connections: RwLock<HashMap<SocketAddr, AgentConnection>>,
}

/// Router state: shared consumer state plus the token that closes agent
/// connections on shutdown.
#[derive(Clone)]
struct AppState {
    inner: Arc<ConsumerState>,
    shutdown: CancellationToken,
}

// =============================================================================
// Consumer
// =============================================================================

pub struct WsConsumer {
    config: WsConsumerConfig,
    state: Arc<ConsumerState>,
    messages_rx: Mutex<Option<mpsc::Receiver<Message>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl WsConsumer {
    pub fn new(config: WsConsumerConfig) -> Self {
        let (messages_tx, messages_rx) = mpsc::channel(config.capacity.max(1));
        WsConsumer {
            config,
            state: Arc::new(ConsumerState {
                messages_tx,
                connections: RwLock::new(HashMap::new()),
            }),
            messages_rx: Mutex::new(Some(messages_rx)),
            local_addr: Mutex::new(None),
        }
    }

    /// Bound address, available once `start` returned.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.lock().ok().and_then(|addr| *addr)
    }

    pub async fn connections(&self) -> Vec<AgentConnection> {
        self.state.connections.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl Consumer for WsConsumer {
    /// Binds the listener and serves in the background.
    async fn start(&self, shutdown: CancellationToken) -> TransportResult<()> {
        if self.local_addr().is_some() {
            return Err(TransportError::AlreadyStarted);
        }

        let app = Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .with_state(AppState {
                inner: self.state.clone(),
                shutdown: shutdown.clone(),
            });

        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| TransportError::Bind {
                addr: bind_addr.clone(),
                reason: e.to_string(),
            })?;

        let local_addr = listener.local_addr().map_err(|e| TransportError::Bind {
            addr: bind_addr.clone(),
            reason: e.to_string(),
        })?;
        if let Ok(mut slot) = self.local_addr.lock() {
            *slot = Some(local_addr);
        }

        info!(addr = %local_addr, "Transport consumer listening");

        tokio::spawn(async move {
            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!("Transport consumer shutting down");
            })
            .await;

            if let Err(e) = result {
                warn!(error = %e, "Transport consumer server stopped with error");
            }
        });

        Ok(())
    }

    fn message_chan(&self) -> Option<mpsc::Receiver<Message>> {
        self.messages_rx.lock().ok().and_then(|mut rx| rx.take())
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn health_handler() -> impl IntoResponse {
    "OK"
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    info!(addr = %addr, "New agent connection");
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, app.inner, app.shutdown, addr))
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<ConsumerState>,
    shutdown: CancellationToken,
    addr: SocketAddr,
) {
    let (mut sender, mut receiver) = socket.split();

    state.connections.write().await.insert(
        addr,
        AgentConnection {
            addr,
            leaf_hub: None,
            connected_at: Instant::now(),
        },
    );

    let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<WsMessage>(16);

    let outgoing_handle = tokio::spawn(async move {
        while let Some(msg) = outgoing_rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let ping_tx = outgoing_tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_interval = interval(PING_INTERVAL);
        loop {
            ping_interval.tick().await;
            if ping_tx.send(WsMessage::Ping(axum::body::Bytes::new())).await.is_err() {
                break;
            }
        }
    });

    loop {
        let next = tokio::select! {
            next = receiver.next() => next,
            _ = shutdown.cancelled() => {
                info!(addr = %addr, "Closing agent connection for shutdown");
                if outgoing_tx.send(WsMessage::Close(None)).await.is_err() {
                    debug!(addr = %addr, "Writer already gone");
                }
                break;
            }
        };

        let frame = match next {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                warn!(addr = %addr, error = %e, "WebSocket error");
                break;
            }
            None => {
                info!(addr = %addr, "Agent disconnected");
                break;
            }
        };

        let decoded = match frame {
            WsMessage::Text(text) => Message::from_json(text.as_str()),
            WsMessage::Binary(data) => serde_json::from_slice::<Message>(&data)
                .map_err(|e| globalhub_core::CoreError::decode("message", e)),
            WsMessage::Ping(data) => {
                if outgoing_tx.send(WsMessage::Pong(data)).await.is_err() {
                    debug!(addr = %addr, "Writer gone, dropping connection");
                    break;
                }
                continue;
            }
            WsMessage::Pong(_) => continue,
            WsMessage::Close(_) => {
                info!(addr = %addr, "Agent requested close");
                break;
            }
        };

        let msg = match decoded {
            Ok(msg) => msg,
            Err(e) => {
                warn!(addr = %addr, error = %e, "Dropping undecodable frame");
                continue;
            }
        };

        remember_leaf_hub(&state, addr, &msg).await;
        debug!(addr = %addr, key = %msg.key, version = %msg.version, "Received message");

        if state.messages_tx.send(msg).await.is_err() {
            warn!("Message channel closed, dropping connection");
            break;
        }
    }

    // Let the writer flush a pending close frame before the socket drops.
    ping_handle.abort();
    drop(outgoing_tx);
    if let Err(e) = outgoing_handle.await {
        debug!(addr = %addr, error = %e, "Writer task ended abnormally");
    }
    state.connections.write().await.remove(&addr);
}

async fn remember_leaf_hub(state: &ConsumerState, addr: SocketAddr, msg: &Message) {
    let mut connections = state.connections.write().await;
    if let Some(conn) = connections.get_mut(&addr) {
        if conn.leaf_hub.is_none() {
            info!(addr = %addr, leaf_hub = %msg.leaf_hub(), "Agent identified");
            conn.leaf_hub = Some(msg.leaf_hub().to_string());
        }
    }
}
