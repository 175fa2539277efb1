//! Event decoding and subscription filtering
//!
//! Payloads are JSON objects produced by the appointment service, e.g.
//!
//! ```text
//! {"event_type":"appointment_created","appointment_id":12,"patient_id":3,
//!  "doctor_id":9,"timestamp":"2024-05-01T10:00:00"}
//! ```
//!
//! Every field is extracted on its own. A missing or unusable field is left
//! unset instead of failing the whole message; only payloads that are not a
//! JSON object at all are rejected.

use super::types::{AppointmentEvent, APPOINTMENT_CREATED};
use serde_json::{Map, Value};

#[derive(Debug)]
pub enum DecodeError {
    /// Payload is not valid JSON
    Malformed(serde_json::Error),
    /// Payload is valid JSON but not an object
    NotAnObject,
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError::Malformed(err)
    }
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Malformed(e) => write!(f, "Malformed payload: {}", e),
            DecodeError::NotAnObject => write!(f, "Payload is not a JSON object"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Decode a raw input message into an [`AppointmentEvent`]
pub fn decode(raw: &[u8]) -> Result<AppointmentEvent, DecodeError> {
    let value: Value = serde_json::from_slice(raw)?;
    let fields = value.as_object().ok_or(DecodeError::NotAnObject)?;

    Ok(AppointmentEvent {
        kind: string_field(fields, "event_type").unwrap_or_default(),
        appointment_id: id_field(fields, "appointment_id"),
        patient_id: id_field(fields, "patient_id"),
        doctor_id: id_field(fields, "doctor_id"),
        occurred_at: string_field(fields, "timestamp"),
    })
}

/// Returns true for the event kind this pipeline aggregates
pub fn is_subscribed(event: &AppointmentEvent) -> bool {
    event.kind == APPOINTMENT_CREATED
}

fn string_field(fields: &Map<String, Value>, name: &str) -> Option<String> {
    match fields.get(name)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => {
            log::debug!("Ignoring non-string {}: {}", name, other);
            None
        }
    }
}

/// Integers and base-10 integer strings are accepted; anything else is unset
fn id_field(fields: &Map<String, Value>, name: &str) -> Option<i64> {
    let parsed = match fields.get(name)? {
        Value::Null => return None,
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };

    if parsed.is_none() {
        log::debug!("Ignoring unusable {} in payload", name);
    }
    parsed
}
