//! # globalhub-transport: Message Transport for Global Hub
//!
//! Delivers keyed [`Message`](globalhub_core::Message)s from leaf hub agents to
//! the global hub manager.
//!
//! ## Module Organization
//!
//! - [`traits`] - `Producer` / `Consumer` seams
//! - [`channel`] - In-process partitioned channels
//! - [`ws_producer`] - Reconnecting WebSocket client (agent side)
//! - [`ws_consumer`] - Axum WebSocket server (manager side)
//! - [`error`] - Transport error types
//!
//! ## Delivery Guarantees
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  • Per key FIFO (channel) / per connection FIFO (websocket)            │
//! │  • No ordering across keys or connections                              │
//! │  • No retry inside send(): the syncer keeps its bundle and resends     │
//! │    a newer version on the next tick                                    │
//! │  • Duplicates are possible; the manager drops stale versions           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod channel;
pub mod error;
pub mod traits;
pub mod ws_consumer;
pub mod ws_producer;

pub use channel::{ChannelConsumer, ChannelProducer, ChannelTransport};
pub use error::{TransportError, TransportResult};
pub use traits::{Consumer, Producer};
pub use ws_consumer::{WsConsumer, WsConsumerConfig};
pub use ws_producer::{ConnectionState, WsProducer, WsProducerConfig};
