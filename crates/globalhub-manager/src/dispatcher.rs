//! Transport dispatcher: consumer channel → conflation manager.

use globalhub_core::Message;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::conflator::{ConflationManager, Insert};
use crate::error::{ManagerError, ManagerResult};

pub struct TransportDispatcher {
    conflation: ConflationManager,
}

impl TransportDispatcher {
    pub fn new(conflation: ConflationManager) -> Self {
        TransportDispatcher { conflation }
    }

    /// Decodes one message and inserts its event.
    pub async fn dispatch(&self, msg: Message) -> ManagerResult<Insert> {
        let event = msg.to_event()?;
        self.conflation.insert(event).await
    }

    /// Dispatches until the channel closes or `shutdown` fires.
    pub async fn run(&self, mut rx: mpsc::Receiver<Message>, shutdown: CancellationToken) {
        info!("Transport dispatcher started");

        loop {
            let msg = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(msg) => msg,
                    None => {
                        info!("Consumer channel closed");
                        break;
                    }
                },
            };

            let key = msg.key.clone();
            match self.dispatch(msg).await {
                Ok(Insert::Stale) => {
                    debug!(key = %key, "Dropped stale bundle");
                }
                Ok(outcome) => {
                    debug!(key = %key, outcome = ?outcome, "Bundle conflated");
                }
                Err(ManagerError::UnregisteredEventType(event_type)) => {
                    warn!(key = %key, event_type = %event_type, "No handler for event type, dropping");
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to decode message, dropping");
                }
            }
        }

        info!("Transport dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use globalhub_core::{Event, EventType, SyncMode, Version};

    use crate::conflator::{BundleHandler, BundleMeta, ConflationPriority, ConflationRegistration};

    #[derive(Clone, Default)]
    struct Counter(Arc<AtomicUsize>);

    #[async_trait]
    impl BundleHandler for Counter {
        type Payload = Vec<serde_json::Value>;

        async fn handle(
            &self,
            _meta: &BundleMeta,
            _payload: Vec<serde_json::Value>,
            _shutdown: &CancellationToken,
        ) -> ManagerResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn dispatcher() -> TransportDispatcher {
        let conflation = ConflationManager::builder()
            .register(ConflationRegistration::new(
                ConflationPriority::ManagedCluster,
                SyncMode::CompleteState,
                EventType::ManagedCluster,
                Counter::default(),
            ))
            .build()
            .unwrap();
        TransportDispatcher::new(conflation)
    }

    fn message(event_type: EventType, value: u64, data: serde_json::Value) -> Message {
        let version = Version::from_parts(0, value);
        let event = Event::new(event_type, "hub1", version, &data).unwrap();
        Message::status_bundle("hub1", event_type, version, None, &event).unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_outcomes() {
        let dispatcher = dispatcher();

        let ok = dispatcher
            .dispatch(message(EventType::ManagedCluster, 1, serde_json::json!([])))
            .await
            .unwrap();
        assert_eq!(ok, Insert::Queued);

        let err = dispatcher
            .dispatch(message(EventType::Placement, 1, serde_json::json!([])))
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::UnregisteredEventType(_)));

        let err = dispatcher
            .dispatch(message(EventType::ManagedCluster, 2, serde_json::json!({"not": "a list"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::MalformedPayload { .. }));

        let mut garbage = message(EventType::ManagedCluster, 3, serde_json::json!([]));
        garbage.payload = b"not json".to_vec();
        assert!(matches!(
            dispatcher.dispatch(garbage).await,
            Err(ManagerError::Core(_))
        ));
    }

    #[tokio::test]
    async fn test_run_stops_when_channel_closes() {
        let dispatcher = dispatcher();
        let (tx, rx) = mpsc::channel(4);
        tx.send(message(EventType::Placement, 1, serde_json::json!([])))
            .await
            .unwrap();
        drop(tx);

        dispatcher.run(rx, CancellationToken::new()).await;
        assert!(dispatcher.conflation.is_idle().await);
    }
}
