//! # CloudEvent Envelope
//!
//! Structured-mode CloudEvents JSON: context attributes and extensions sit at
//! the top level next to `data`.
//!
//! ```text
//! {
//!   "specversion": "1.0",
//!   "id": "7f0c…",
//!   "source": "hub1",
//!   "type": "io.open-cluster-management.operator.multiclusterglobalhubs.localcompliance",
//!   "datacontenttype": "application/json",
//!   "version": "3.2",
//!   "incarnation": "1",
//!   "data": [ … ]
//! }
//! ```

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::EventType;
use crate::version::Version;

/// Extension attribute carrying the bundle version.
pub const EXT_VERSION: &str = "version";

/// Extension attribute carrying the agent restart counter.
pub const EXT_INCARNATION: &str = "incarnation";

const SPEC_VERSION: &str = "1.0";
const CONTENT_TYPE_JSON: &str = "application/json";

/// A CloudEvent with JSON data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "specversion")]
    pub spec_version: String,
    pub id: String,
    /// Leaf hub that produced the event.
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(rename = "datacontenttype", default = "default_content_type")]
    pub data_content_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(flatten)]
    pub extensions: BTreeMap<String, String>,
}

fn default_content_type() -> String {
    CONTENT_TYPE_JSON.to_string()
}

impl Event {
    /// Builds an event for `event_type` from `source`, stamped with `version`.
    pub fn new<T: Serialize>(
        event_type: EventType,
        source: impl Into<String>,
        version: Version,
        data: &T,
    ) -> CoreResult<Self> {
        let data = serde_json::to_value(data).map_err(|e| CoreError::encode("event data", e))?;

        let mut extensions = BTreeMap::new();
        extensions.insert(EXT_VERSION.to_string(), version.to_string());

        Ok(Event {
            spec_version: SPEC_VERSION.to_string(),
            id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
            event_type: event_type.to_string(),
            data_content_type: default_content_type(),
            data,
            extensions,
        })
    }

    /// Sets the incarnation extension.
    pub fn with_incarnation(mut self, incarnation: u64) -> Self {
        self.extensions
            .insert(EXT_INCARNATION.to_string(), incarnation.to_string());
        self
    }

    /// Parsed `type` attribute.
    pub fn kind(&self) -> CoreResult<EventType> {
        self.event_type.parse()
    }

    /// Parsed `version` extension.
    pub fn version(&self) -> CoreResult<Version> {
        self.extensions
            .get(EXT_VERSION)
            .ok_or_else(|| CoreError::InvalidVersion(String::new()))?
            .parse()
    }

    /// Incarnation extension, `0` when the agent did not send one.
    pub fn incarnation(&self) -> u64 {
        self.extensions
            .get(EXT_INCARNATION)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// Decodes `data` into the payload type of this event.
    pub fn data_as<T: DeserializeOwned>(&self) -> CoreResult<T> {
        T::deserialize(&self.data).map_err(|e| CoreError::decode("event data", e))
    }

    pub fn to_json(&self) -> CoreResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CoreError::encode("cloudevent", e))
    }

    pub fn from_json(bytes: &[u8]) -> CoreResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| CoreError::decode("cloudevent", e))
    }
}
