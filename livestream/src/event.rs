use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("failed to decode event envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    #[error("failed to decode event payload: {0}")]
    Payload(#[source] serde_json::Error),
    #[error("event payload field {field} has the wrong type")]
    PayloadField { field: &'static str },
}

/// The wrapper capture writes to Kafka around every event.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct RawEnvelope {
    pub uuid: String,
    pub distinct_id: String,
    pub ip: String,
    pub data: String,
    pub token: String,
}

impl RawEnvelope {
    pub fn from_bytes(bytes: &[u8]) -> Result<RawEnvelope, DecodeError> {
        serde_json::from_slice(bytes).map_err(DecodeError::Envelope)
    }
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct CanonicalEvent {
    pub token: String,
    pub event: String,
    pub properties: HashMap<String, Value>,
    pub timestamp: String,
    pub uuid: String,
    pub distinct_id: String,
    pub lat: f64,
    pub lng: f64,
}

impl CanonicalEvent {
    /// An empty event stamped with the given receipt time.
    pub fn received_at(now: DateTime<Utc>) -> CanonicalEvent {
        CanonicalEvent {
            timestamp: format_timestamp(now),
            ..Default::default()
        }
    }

    /// Fills `token`, `event` and `properties` from the JSON-encoded payload
    /// carried in the envelope's `data` field.
    ///
    /// Decoding is per field: a field with the wrong type is skipped and keeps
    /// its current value, while the well-typed fields are still applied. The
    /// first problem encountered is returned after every field was visited.
    /// Any `timestamp` in the payload is ignored, the receipt time wins.
    pub fn merge_payload(&mut self, data: &[u8]) -> Result<(), DecodeError> {
        let payload: Value = serde_json::from_slice(data).map_err(DecodeError::Payload)?;
        let Value::Object(mut fields) = payload else {
            return Err(DecodeError::PayloadField { field: "<root>" });
        };

        let mut first_error = None;
        let mut record = |field: &'static str| {
            first_error.get_or_insert(DecodeError::PayloadField { field });
        };

        match fields.remove("api_key") {
            None | Some(Value::Null) => {}
            Some(Value::String(token)) => self.token = token,
            Some(_) => record("api_key"),
        }

        match fields.remove("event") {
            None | Some(Value::Null) => {}
            Some(Value::String(event)) => self.event = event,
            Some(_) => record("event"),
        }

        match fields.remove("properties") {
            None => {}
            Some(Value::Null) => self.properties = HashMap::new(),
            Some(Value::Object(properties)) => self.properties = properties.into_iter().collect(),
            Some(_) => record("properties"),
        }

        match fields.get("timestamp") {
            None | Some(Value::Null) | Some(Value::String(_)) => {}
            Some(_) => record("timestamp"),
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Returns the named property when it holds a string.
    pub fn string_property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }
}

/// ISO-8601 UTC with millisecond precision, e.g. `2024-03-01T12:30:00.000Z`.
pub fn format_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}
