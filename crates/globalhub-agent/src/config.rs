//! # Agent Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     GLOBALHUB_LEAF_HUB_NAME=hub1                                       │
//! │     GLOBALHUB_MANAGER_URL=ws://manager:8765/ws                         │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/globalhub-agent/agent.toml (Linux)                       │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [leaf_hub]
//! name = "hub1"
//! incarnation = 3
//!
//! [status]
//! aggregation_level = "full"
//! enable_local_policies = true
//! enable_delta_compliance = false
//! policy_sync_interval_secs = 5
//!
//! [transport]
//! url = "ws://globalhub-manager:8765/ws"
//! ```

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AgentError, AgentResult};

// =============================================================================
// Status Settings
// =============================================================================

/// How much status detail the agent reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationLevel {
    /// Per-cluster compliance is reported.
    #[default]
    Full,
    /// Only summaries; compliance bundles are not sent.
    Minimal,
}

impl std::str::FromStr for AggregationLevel {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" => Ok(AggregationLevel::Full),
            "minimal" => Ok(AggregationLevel::Minimal),
            other => Err(AgentError::InvalidConfig(format!(
                "Unknown aggregation level: '{}'. Valid options: full, minimal",
                other
            ))),
        }
    }
}

/// Toggles and intervals read by bundle predicates on every tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSettings {
    #[serde(default)]
    pub aggregation_level: AggregationLevel,

    #[serde(default = "default_true")]
    pub enable_local_policies: bool,

    #[serde(default)]
    pub enable_delta_compliance: bool,

    #[serde(default = "default_policy_interval")]
    pub policy_sync_interval_secs: u64,

    #[serde(default = "default_cluster_interval")]
    pub cluster_sync_interval_secs: u64,

    #[serde(default = "default_event_interval")]
    pub event_sync_interval_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_policy_interval() -> u64 {
    5
}
fn default_cluster_interval() -> u64 {
    5
}
fn default_event_interval() -> u64 {
    5
}

impl Default for StatusSettings {
    fn default() -> Self {
        StatusSettings {
            aggregation_level: AggregationLevel::default(),
            enable_local_policies: true,
            enable_delta_compliance: false,
            policy_sync_interval_secs: default_policy_interval(),
            cluster_sync_interval_secs: default_cluster_interval(),
            event_sync_interval_secs: default_event_interval(),
        }
    }
}

impl StatusSettings {
    pub fn policy_sync_interval(&self) -> Duration {
        Duration::from_secs(self.policy_sync_interval_secs)
    }

    pub fn cluster_sync_interval(&self) -> Duration {
        Duration::from_secs(self.cluster_sync_interval_secs)
    }

    pub fn event_sync_interval(&self) -> Duration {
        Duration::from_secs(self.event_sync_interval_secs)
    }
}

/// Settings shared between the config owner and bundle predicates.
pub type SharedStatusSettings = Arc<RwLock<StatusSettings>>;

// =============================================================================
// Leaf Hub / Transport Settings
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeafHubSettings {
    #[serde(default)]
    pub name: String,

    /// Restart counter. Raise it whenever the agent loses its version state.
    #[serde(default)]
    pub incarnation: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTransportSettings {
    /// WebSocket URL of the manager's transport endpoint.
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Set to 0 for infinite retries.
    #[serde(default)]
    pub max_retries: u32,
}

fn default_url() -> String {
    "ws://127.0.0.1:8765/ws".to_string()
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    60
}

impl Default for AgentTransportSettings {
    fn default() -> Self {
        AgentTransportSettings {
            url: default_url(),
            connect_timeout_secs: default_connect_timeout(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            max_retries: 0,
        }
    }
}

impl AgentTransportSettings {
    /// Producer settings for [`globalhub_transport::WsProducer::spawn`].
    pub fn producer_config(&self) -> globalhub_transport::WsProducerConfig {
        globalhub_transport::WsProducerConfig {
            url: self.url.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_secs(self.max_backoff_secs),
            max_retries: self.max_retries,
            ..Default::default()
        }
    }
}

// =============================================================================
// Agent Configuration
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub leaf_hub: LeafHubSettings,

    #[serde(default)]
    pub status: StatusSettings,

    #[serde(default)]
    pub transport: AgentTransportSettings,
}

impl AgentConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (agent.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> AgentResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading agent config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load agent config: {}. Using defaults.", e);
            Self::default()
        })
    }

    pub fn save(&self, config_path: Option<PathBuf>) -> AgentResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| AgentError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Agent config saved");
        Ok(())
    }

    pub fn validate(&self) -> AgentResult<()> {
        if self.leaf_hub.name.is_empty() {
            return Err(AgentError::InvalidConfig(
                "leaf_hub.name must be set".into(),
            ));
        }

        let url = url::Url::parse(&self.transport.url)?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(AgentError::InvalidUrl(format!(
                "Manager URL must start with ws:// or wss://, got: {}",
                self.transport.url
            )));
        }

        if self.status.policy_sync_interval_secs == 0
            || self.status.cluster_sync_interval_secs == 0
            || self.status.event_sync_interval_secs == 0
        {
            return Err(AgentError::InvalidConfig(
                "sync intervals must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(name) = std::env::var("GLOBALHUB_LEAF_HUB_NAME") {
            debug!(leaf_hub = %name, "Overriding leaf hub name from environment");
            self.leaf_hub.name = name;
        }

        if let Ok(incarnation) = std::env::var("GLOBALHUB_INCARNATION") {
            if let Ok(i) = incarnation.parse::<u64>() {
                self.leaf_hub.incarnation = i;
            }
        }

        if let Ok(url) = std::env::var("GLOBALHUB_MANAGER_URL") {
            debug!(url = %url, "Overriding manager URL from environment");
            self.transport.url = url;
        }

        if let Ok(level) = std::env::var("GLOBALHUB_AGGREGATION_LEVEL") {
            match level.parse() {
                Ok(parsed) => self.status.aggregation_level = parsed,
                Err(e) => warn!(error = %e, "Ignoring aggregation level from environment"),
            }
        }

        if let Ok(flag) = std::env::var("GLOBALHUB_ENABLE_LOCAL_POLICIES") {
            if let Ok(b) = flag.parse::<bool>() {
                self.status.enable_local_policies = b;
            }
        }

        if let Ok(flag) = std::env::var("GLOBALHUB_ENABLE_DELTA_COMPLIANCE") {
            if let Ok(b) = flag.parse::<bool>() {
                self.status.enable_delta_compliance = b;
            }
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("io", "open-cluster-management", "globalhub-agent")
            .map(|dirs| dirs.config_dir().join("agent.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn leaf_hub_name(&self) -> &str {
        &self.leaf_hub.name
    }

    pub fn incarnation(&self) -> u64 {
        self.leaf_hub.incarnation
    }

    /// Wraps the status settings for predicates.
    pub fn shared_status(&self) -> SharedStatusSettings {
        Arc::new(RwLock::new(self.status.clone()))
    }
}
