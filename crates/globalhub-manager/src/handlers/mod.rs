//! # Bundle Handlers
//!
//! | Event type | Handler | Sync mode |
//! |------------|---------|-----------|
//! | HubClusterInfo | [`HubClusterInfoHandler`] | complete state |
//! | ManagedCluster, LocalPolicySpec, PlacementRule, Placement, PlacementDecision, SubscriptionReport, SubscriptionStatus | [`GenericObjectHandler`] | complete state |
//! | LocalCompliance | [`LocalComplianceHandler`] | delta |
//! | LocalCompleteCompliance | [`LocalCompleteComplianceHandler`] | complete state |
//! | LocalDeltaCompliance | [`DeltaComplianceHandler`] | delta |
//! | ManagedClusterEvent | [`ManagedClusterEventHandler`] | delta |

pub mod cluster_event;
pub mod compliance;
pub mod delta_compliance;
pub mod generic;
pub mod hub_info;

pub use cluster_event::ManagedClusterEventHandler;
pub use compliance::{
    reconcile_policy, DeletionPolicy, LocalComplianceHandler, LocalCompleteComplianceHandler,
};
pub use delta_compliance::DeltaComplianceHandler;
pub use generic::{GenericObjectHandler, SyncCounts};
pub use hub_info::HubClusterInfoHandler;

use globalhub_core::{EventType, SyncMode};
use globalhub_db::{Database, StatusTable};

use crate::conflator::{
    BundleHandler, ConflationManagerBuilder, ConflationPriority, ConflationRegistration,
};
use crate::config::ManagerConfig;

/// Event types stored whole in a status table.
pub const GENERIC_BUNDLES: [(EventType, StatusTable); 7] = [
    (EventType::ManagedCluster, StatusTable::ManagedClusters),
    (EventType::LocalPolicySpec, StatusTable::LocalPolicySpec),
    (EventType::PlacementRule, StatusTable::PlacementRules),
    (EventType::Placement, StatusTable::Placements),
    (EventType::PlacementDecision, StatusTable::PlacementDecisions),
    (EventType::SubscriptionReport, StatusTable::SubscriptionReports),
    (EventType::SubscriptionStatus, StatusTable::SubscriptionStatuses),
];

fn registration<H: BundleHandler>(
    event_type: EventType,
    sync_mode: SyncMode,
    handler: H,
) -> ConflationRegistration {
    ConflationRegistration::new(
        ConflationPriority::for_event_type(event_type),
        sync_mode,
        event_type,
        handler,
    )
}

/// Registers a handler for every event type.
pub fn register_handlers(
    builder: ConflationManagerBuilder,
    db: &Database,
    config: &ManagerConfig,
) -> ConflationManagerBuilder {
    let retry = config.retry_policy();

    let builder = GENERIC_BUNDLES
        .into_iter()
        .fold(builder, |builder, (event_type, table)| {
            builder.register(registration(
                event_type,
                SyncMode::CompleteState,
                GenericObjectHandler::new(db.clone(), table, retry.clone()),
            ))
        });

    builder
        .register(registration(
            EventType::HubClusterInfo,
            SyncMode::CompleteState,
            HubClusterInfoHandler::new(db.clone(), retry.clone()),
        ))
        .register(registration(
            EventType::LocalCompliance,
            SyncMode::Delta,
            LocalComplianceHandler::new(
                db.clone(),
                retry.clone(),
                config.conflation.policy_concurrency,
            ),
        ))
        .register(registration(
            EventType::LocalCompleteCompliance,
            SyncMode::CompleteState,
            LocalCompleteComplianceHandler::new(db.clone(), retry.clone()),
        ))
        .register(registration(
            EventType::LocalDeltaCompliance,
            SyncMode::Delta,
            DeltaComplianceHandler::new(db.clone(), retry.clone()),
        ))
        .register(registration(
            EventType::ManagedClusterEvent,
            SyncMode::Delta,
            ManagedClusterEventHandler::new(db.clone(), retry),
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflator::ConflationManager;
    use globalhub_db::DbConfig;

    #[tokio::test]
    async fn test_every_event_type_registered() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let manager = register_handlers(ConflationManager::builder(), &db, &ManagerConfig::default())
            .build()
            .unwrap();

        let mut expected = EventType::ALL.to_vec();
        expected.sort_by_key(|t| ConflationPriority::for_event_type(*t));
        assert_eq!(manager.registered_types(), expected);
    }
}
