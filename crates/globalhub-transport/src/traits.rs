//! Producer and consumer seams.
//!
//! Agents only see [`Producer`]; the manager only sees [`Consumer`]. Neither
//! retries internally: a failed `send` is reported to the caller, which keeps
//! its bundle and tries again on the next tick.

use async_trait::async_trait;
use globalhub_core::Message;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::TransportResult;

#[async_trait]
pub trait Producer: Send + Sync {
    /// Hands one message to the transport.
    async fn send(&self, msg: Message) -> TransportResult<()>;
}

#[async_trait]
pub trait Consumer: Send + Sync {
    /// Starts delivering into the message channel until `shutdown` fires.
    async fn start(&self, shutdown: CancellationToken) -> TransportResult<()>;

    /// Takes the receiving end. Returns `None` after the first call.
    fn message_chan(&self) -> Option<mpsc::Receiver<Message>>;
}

#[async_trait]
impl<P: Producer + ?Sized> Producer for std::sync::Arc<P> {
    async fn send(&self, msg: Message) -> TransportResult<()> {
        (**self).send(msg).await
    }
}
