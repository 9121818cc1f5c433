//! # Transport Message
//!
//! The unit handed to a producer and delivered by a consumer.
//!
//! ## Keys
//! ```text
//! id   = <leafHub>.<msgKind>                 stable per logical stream
//! key  = <leafHub>.<msgKind>                 complete-state bundles
//! key  = <leafHub>.<msgKind>@<transportId>   delta bundles
//! ```
//! The key routes the message to a partition. Every delta in a chain gets its
//! own key, while `id` groups them.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{CoreError, CoreResult};
use crate::event::Event;
use crate::types::EventType;
use crate::version::Version;

/// Message category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MsgType {
    SpecBundle,
    StatusBundle,
    Event,
}

/// Keyed, typed, versioned transport message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub key: String,
    pub id: String,
    pub msg_type: MsgType,
    pub version: String,
    #[serde(serialize_with = "encode_payload", deserialize_with = "decode_payload")]
    pub payload: Vec<u8>,
}

impl Message {
    /// Wraps a status CloudEvent.
    ///
    /// ## Arguments
    /// * `leaf_hub` - Reporting leaf hub
    /// * `event_type` - Supplies the message kind
    /// * `version` - Bundle version at send time
    /// * `transportation_id` - Set for delta bundles, appended to the key
    /// * `event` - Encoded into the payload
    pub fn status_bundle(
        leaf_hub: &str,
        event_type: EventType,
        version: Version,
        transportation_id: Option<u64>,
        event: &Event,
    ) -> CoreResult<Self> {
        let id = format!("{}.{}", leaf_hub, event_type.short_name());
        let key = match transportation_id {
            Some(tid) => format!("{}@{}", id, tid),
            None => id.clone(),
        };

        Ok(Message {
            key,
            id,
            msg_type: MsgType::StatusBundle,
            version: version.to_string(),
            payload: event.to_json()?,
        })
    }

    /// Wraps an emitter CloudEvent under a topic-derived key.
    pub fn event(leaf_hub: &str, topic: &str, version: Version, event: &Event) -> CoreResult<Self> {
        let id = format!("{}.{}", leaf_hub, topic);
        Ok(Message {
            key: id.clone(),
            id,
            msg_type: MsgType::Event,
            version: version.to_string(),
            payload: event.to_json()?,
        })
    }

    /// Leaf hub portion of the key.
    pub fn leaf_hub(&self) -> &str {
        self.id
            .rsplit_once('.')
            .map(|(hub, _)| hub)
            .unwrap_or(&self.id)
    }

    /// Transportation id of a delta message.
    pub fn transportation_id(&self) -> Option<u64> {
        self.key.rsplit_once('@').and_then(|(_, tid)| tid.parse().ok())
    }

    /// Decodes the payload as a CloudEvent.
    pub fn to_event(&self) -> CoreResult<Event> {
        Event::from_json(&self.payload)
    }

    pub fn to_json(&self) -> CoreResult<String> {
        serde_json::to_string(self).map_err(|e| CoreError::encode("message", e))
    }

    pub fn from_json(json: &str) -> CoreResult<Self> {
        serde_json::from_str(json).map_err(|e| CoreError::decode("message", e))
    }
}

fn encode_payload<S: Serializer>(payload: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(payload))
}

fn decode_payload<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD
        .decode(encoded.as_bytes())
        .map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PolicyComplianceStatus;

    fn sample_event() -> Event {
        Event::new(
            EventType::LocalDeltaCompliance,
            "hub1",
            Version::from_parts(0, 2),
            &vec![PolicyComplianceStatus::new("p1")],
        )
        .unwrap()
    }

    #[test]
    fn test_complete_state_key() {
        let msg = Message::status_bundle(
            "hub1",
            EventType::LocalCompliance,
            Version::from_parts(0, 2),
            None,
            &sample_event(),
        )
        .unwrap();

        assert_eq!(msg.id, "hub1.localcompliance");
        assert_eq!(msg.key, msg.id);
        assert_eq!(msg.version, "0.2");
        assert_eq!(msg.msg_type, MsgType::StatusBundle);
        assert_eq!(msg.transportation_id(), None);
        assert_eq!(msg.leaf_hub(), "hub1");
    }

    #[test]
    fn test_delta_key_carries_transportation_id() {
        let msg = Message::status_bundle(
            "hub1",
            EventType::LocalDeltaCompliance,
            Version::from_parts(0, 2),
            Some(7),
            &sample_event(),
        )
        .unwrap();

        assert_eq!(msg.key, "hub1.localdeltacompliance@7");
        assert_eq!(msg.id, "hub1.localdeltacompliance");
        assert_eq!(msg.transportation_id(), Some(7));
    }

    #[test]
    fn test_wire_form_encodes_payload() {
        let msg = Message::event("hub1", "event", Version::from_parts(1, 0), &sample_event()).unwrap();
        let json = msg.to_json().unwrap();

        let raw: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(raw["payload"].is_string());
        assert_eq!(raw["msgType"], "Event");

        let back = Message::from_json(&json).unwrap();
        assert_eq!(back.to_event().unwrap().source, "hub1");
    }
}
