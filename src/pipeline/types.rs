//! Core data types flowing through the analytics pipeline

use serde::{Deserialize, Serialize};

/// The only event kind the pipeline aggregates
pub const APPOINTMENT_CREATED: &str = "appointment_created";

/// Partition key every event is grouped under
pub const GLOBAL_PARTITION: &str = "all";

/// Grouping key for per-partition window state
pub type PartitionKey = &'static str;

/// Appointment lifecycle event decoded from the input topic
///
/// Identifier fields are optional: an absent id only excludes the event from
/// the aggregate keyed on that id, it never rejects the event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AppointmentEvent {
    /// Event kind (`event_type` on the wire), empty when the payload had none
    pub kind: String,
    pub appointment_id: Option<i64>,
    pub patient_id: Option<i64>,
    pub doctor_id: Option<i64>,
    /// Producer-side timestamp, informational only (never used for windowing)
    pub occurred_at: Option<String>,
}

impl AppointmentEvent {
    /// Convenience constructor for an `appointment_created` event
    pub fn created(patient_id: Option<i64>, doctor_id: Option<i64>) -> Self {
        Self {
            kind: APPOINTMENT_CREATED.to_string(),
            patient_id,
            doctor_id,
            ..Self::default()
        }
    }
}

/// Summary statistics for one sealed window
///
/// Serialized as the output message:
/// `{"totalAppointments":..,"uniquePatients":..,"activeDoctors":..,"windowEndTime":..}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult {
    pub total_appointments: u64,
    pub unique_patients: u64,
    pub active_doctors: u64,
    /// Window end boundary in epoch milliseconds
    pub window_end_time: i64,
}
