//! # In-Process Channel Transport
//!
//! Partitioned tokio channels standing in for a message broker. Used by the
//! integration tests and by single-process deployments.
//!
//! ## Ordering
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ChannelProducer::send(msg)                                             │
//! │       │ hash(msg.key) % partitions                                      │
//! │       ▼                                                                 │
//! │  ┌───────────┐ ┌───────────┐ ┌───────────┐                              │
//! │  │ part 0    │ │ part 1    │ │ part 2    │   FIFO per partition         │
//! │  └─────┬─────┘ └─────┬─────┘ └─────┬─────┘                              │
//! │        └─────────────┼─────────────┘   forwarder task per partition     │
//! │                      ▼                                                  │
//! │               message_chan()          no order across partitions        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use async_trait::async_trait;
use globalhub_core::Message;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{TransportError, TransportResult};
use crate::traits::{Consumer, Producer};

/// Constructor for a connected producer/consumer pair.
pub struct ChannelTransport;

impl ChannelTransport {
    /// ## Arguments
    /// * `partitions` - Number of key-hash partitions (at least 1)
    /// * `capacity` - Buffer size of each partition and of the output channel
    pub fn new(partitions: usize, capacity: usize) -> (ChannelProducer, ChannelConsumer) {
        let partitions = partitions.max(1);
        let capacity = capacity.max(1);

        let mut senders = Vec::with_capacity(partitions);
        let mut receivers = Vec::with_capacity(partitions);
        for _ in 0..partitions {
            let (tx, rx) = mpsc::channel(capacity);
            senders.push(tx);
            receivers.push(rx);
        }

        let (out_tx, out_rx) = mpsc::channel(capacity);

        (
            ChannelProducer { partitions: senders },
            ChannelConsumer {
                partitions: Mutex::new(Some(receivers)),
                out_tx,
                out_rx: Mutex::new(Some(out_rx)),
            },
        )
    }
}

/// Partition index for a key.
pub fn partition_for(key: &str, partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % partitions.max(1) as u64) as usize
}

#[derive(Clone)]
pub struct ChannelProducer {
    partitions: Vec<mpsc::Sender<Message>>,
}

#[async_trait]
impl Producer for ChannelProducer {
    async fn send(&self, msg: Message) -> TransportResult<()> {
        let partition = partition_for(&msg.key, self.partitions.len());
        debug!(key = %msg.key, partition, "Producing message");

        self.partitions[partition]
            .send(msg)
            .await
            .map_err(|_| TransportError::ChannelClosed(format!("partition {}", partition)))
    }
}

pub struct ChannelConsumer {
    partitions: Mutex<Option<Vec<mpsc::Receiver<Message>>>>,
    out_tx: mpsc::Sender<Message>,
    out_rx: Mutex<Option<mpsc::Receiver<Message>>>,
}

#[async_trait]
impl Consumer for ChannelConsumer {
    async fn start(&self, shutdown: CancellationToken) -> TransportResult<()> {
        let receivers = self
            .partitions
            .lock()
            .map_err(|_| TransportError::ChannelClosed("partition lock poisoned".into()))?
            .take()
            .ok_or(TransportError::AlreadyStarted)?;

        info!(partitions = receivers.len(), "Channel consumer starting");

        for (index, mut rx) in receivers.into_iter().enumerate() {
            let out_tx = self.out_tx.clone();
            let shutdown = shutdown.clone();

            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        next = rx.recv() => match next {
                            Some(msg) => {
                                if out_tx.send(msg).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        },
                    }
                }
                debug!(partition = index, "Partition forwarder stopped");
            });
        }

        Ok(())
    }

    fn message_chan(&self) -> Option<mpsc::Receiver<Message>> {
        self.out_rx.lock().ok().and_then(|mut rx| rx.take())
    }
}
