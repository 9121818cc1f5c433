//! # Data Retention
//!
//! Soft-deleted rows stay queryable for the retention period, then a
//! periodic job removes them. Each table gets one entry in
//! `history.data_retention_job_log` per run, including failed runs.

use std::time::Duration;

use chrono::Utc;
use globalhub_db::{retention_tables, Database};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of one purge run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub deleted_rows: u64,
    /// Tables whose purge failed.
    pub failed: Vec<String>,
}

pub struct DataRetention {
    db: Database,
    retention: Duration,
    interval: Duration,
}

impl DataRetention {
    pub fn new(db: Database, retention: Duration, interval: Duration) -> Self {
        DataRetention {
            db,
            retention,
            interval,
        }
    }

    /// Purges every soft-delete table once.
    pub async fn run_once(&self) -> RetentionReport {
        let retention = chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(retention)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        let repo = self.db.retention();
        let mut report = RetentionReport::default();

        for table in retention_tables() {
            let start = Utc::now();
            let result = repo.purge_deleted(table, cutoff).await;
            let end = Utc::now();

            let (deleted, error) = match result {
                Ok(deleted) => {
                    debug!(table = %table, deleted, "Retention purge finished");
                    (deleted, None)
                }
                Err(e) => {
                    warn!(table = %table, error = %e, "Retention purge failed");
                    report.failed.push(table.to_string());
                    (0, Some(e.to_string()))
                }
            };
            report.deleted_rows += deleted;

            if let Err(e) = repo.log_job(table, start, end, deleted, error.as_deref()).await {
                warn!(table = %table, error = %e, "Failed to record retention job");
            }
        }

        info!(deleted = report.deleted_rows, failed = report.failed.len(), "Data retention run complete");
        report
    }

    /// Runs [`DataRetention::run_once`] every interval until `shutdown`.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_once().await;
                }
            }
        }
        debug!("Data retention stopped");
    }
}
