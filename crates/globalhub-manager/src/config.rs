//! # Manager Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     GLOBALHUB_MANAGER__DATABASE__PATH=/data/manager.db                 │
//! │     GLOBALHUB_MANAGER__CONFLATION__WORKERS=8                           │
//! │                                                                         │
//! │  2. TOML Config File (optional, passed on the command line)            │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! path = "/var/lib/globalhub/manager.db"
//! max_connections = 8
//!
//! [server]
//! port = 8765
//!
//! [conflation]
//! workers = 4
//! policy_concurrency = 10
//!
//! [retry]
//! max_attempts = 0   # unbounded
//!
//! [retention]
//! retention_days = 18
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use globalhub_db::DbConfig;
use globalhub_transport::{ws_consumer::DEFAULT_PORT, WsConsumerConfig};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ManagerError, ManagerResult};
use crate::retry::RetryPolicy;

/// Prefix of manager environment variables.
pub const ENV_PREFIX: &str = "GLOBALHUB_MANAGER";

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Main database file. `:memory:` for an in-memory database.
    pub path: PathBuf,
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: PathBuf::from("globalhub_manager.db"),
            max_connections: 5,
            busy_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_addr: String,
    pub port: u16,
    /// Capacity of the consumer message channel.
    pub channel_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            bind_addr: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            channel_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflationSettings {
    /// Conflation workers. Each handles one leaf hub at a time.
    pub workers: usize,
    /// Policies reconciled in parallel by the compliance handler.
    pub policy_concurrency: usize,
}

impl Default for ConflationSettings {
    fn default() -> Self {
        ConflationSettings {
            workers: 4,
            policy_concurrency: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub multiplier: f64,
    /// `0` retries until success or shutdown.
    pub max_attempts: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            initial_interval_ms: 100,
            max_interval_ms: 10_000,
            multiplier: 2.0,
            max_attempts: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionSettings {
    pub enabled: bool,
    /// Soft-deleted rows older than this are purged.
    pub retention_days: u64,
    pub interval_secs: u64,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        RetentionSettings {
            enabled: true,
            retention_days: 18,
            interval_secs: 24 * 60 * 60,
        }
    }
}

// =============================================================================
// Manager Config
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub database: DatabaseSettings,
    pub server: ServerSettings,
    pub conflation: ConflationSettings,
    pub retry: RetrySettings,
    pub retention: RetentionSettings,
}

impl ManagerConfig {
    /// Loads defaults, then `path` if given, then `GLOBALHUB_MANAGER__*`.
    pub fn load(path: Option<&Path>) -> ManagerResult<Self> {
        Self::load_from(path, None)
    }

    /// Like [`ManagerConfig::load`], reading variables from `env` instead of
    /// the process environment when it is `Some`.
    pub fn load_from(
        path: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> ManagerResult<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading manager configuration file");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let config: ManagerConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ManagerResult<()> {
        if self.database.max_connections == 0 {
            return Err(ManagerError::Config(
                "database.max_connections must be at least 1".into(),
            ));
        }
        if self.conflation.workers == 0 {
            return Err(ManagerError::Config(
                "conflation.workers must be at least 1".into(),
            ));
        }
        if self.conflation.policy_concurrency == 0 {
            return Err(ManagerError::Config(
                "conflation.policy_concurrency must be at least 1".into(),
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(ManagerError::Config(
                "retry.multiplier must be at least 1.0".into(),
            ));
        }
        if self.retry.initial_interval_ms > self.retry.max_interval_ms {
            return Err(ManagerError::Config(
                "retry.initial_interval_ms exceeds retry.max_interval_ms".into(),
            ));
        }
        if self.retention.enabled
            && (self.retention.retention_days == 0 || self.retention.interval_secs == 0)
        {
            return Err(ManagerError::Config(
                "retention.retention_days and retention.interval_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    // =========================================================================
    // Derived Settings
    // =========================================================================

    pub fn db_config(&self) -> DbConfig {
        let base = if self.database.path == Path::new(":memory:") {
            DbConfig::in_memory()
        } else {
            DbConfig::new(&self.database.path).max_connections(self.database.max_connections)
        };
        base.busy_timeout(Duration::from_millis(self.database.busy_timeout_ms))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_interval: Duration::from_millis(self.retry.initial_interval_ms),
            max_interval: Duration::from_millis(self.retry.max_interval_ms),
            multiplier: self.retry.multiplier,
            max_attempts: (self.retry.max_attempts > 0).then_some(self.retry.max_attempts),
        }
    }

    pub fn consumer_config(&self) -> WsConsumerConfig {
        WsConsumerConfig {
            port: self.server.port,
            bind_addr: self.server.bind_addr.clone(),
            capacity: self.server.channel_capacity,
        }
    }

    pub fn retention_period(&self) -> Duration {
        Duration::from_secs(self.retention.retention_days * 24 * 60 * 60)
    }

    pub fn retention_interval(&self) -> Duration {
        Duration::from_secs(self.retention.interval_secs)
    }
}
