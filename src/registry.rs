//! Device location registry
//!
//! Keeps the last reported position of every device that has published on
//! `devices/<id>/location`. Entries are upserted by id and kept in
//! first-seen order, which is the order markers are drawn on the map.

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::IngestError;
use crate::models::DeviceLocation;
use crate::topics::{self, TopicKind};

/// What an applied location message did to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceRegistry {
    devices: Vec<DeviceLocation>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one `devices/<id>/location` message.
    ///
    /// Known ids get a shallow merge: fields in the payload overwrite,
    /// fields it omits are kept. The topic id always wins over an `id`
    /// field in the payload.
    pub fn apply(&mut self, topic: &str, payload: &[u8]) -> Result<Upsert, IngestError> {
        let device_id = match topics::classify(topic) {
            Some(TopicKind::DeviceLocation(id)) => id,
            _ => return Err(IngestError::UnroutableTopic(topic.to_string())),
        };

        let mut fields = match serde_json::from_slice::<Value>(payload) {
            Ok(Value::Object(fields)) => fields,
            Ok(other) => {
                return Err(IngestError::malformed(
                    topic,
                    format!("expected a JSON object, got {}", json_kind(&other)),
                ))
            }
            Err(e) => return Err(IngestError::malformed(topic, e)),
        };
        fields.remove("id");

        let result = match self.devices.iter_mut().find(|d| d.id == device_id) {
            Some(existing) => {
                merge(&mut existing.fields, fields);
                Upsert::Updated
            }
            None => {
                self.devices.push(DeviceLocation {
                    id: device_id.clone(),
                    fields,
                });
                Upsert::Inserted
            }
        };

        debug!(device_id = %device_id, upsert = ?result, devices = self.devices.len(), "Device location applied");
        Ok(result)
    }

    pub fn get(&self, id: &str) -> Option<&DeviceLocation> {
        self.devices.iter().find(|d| d.id == id)
    }

    pub fn devices(&self) -> &[DeviceLocation] {
        &self.devices
    }
}

fn merge(into: &mut Map<String, Value>, from: Map<String, Value>) {
    for (key, value) in from {
        into.insert(key, value);
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
