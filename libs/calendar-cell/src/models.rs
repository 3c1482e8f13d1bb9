// libs/calendar-cell/src/models.rs
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ==============================================================================
// STORED RECORDS
// ==============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DoctorSummary {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub qualification: Option<String>,
    pub designation: Option<String>,
}

/// One row of `doctor_availability`: a doctor's plan for one calendar day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorAvailability {
    pub id: String,
    pub doctor_id: String,
    pub center_id: String,
    pub date: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub is_available: bool,
    #[serde(default)]
    pub is_holiday: bool,
    #[serde(default)]
    pub holiday_name: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub break_start_time: Option<String>,
    pub break_end_time: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default = "default_max_appointments")]
    pub max_appointments: u32,
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doctor: Option<DoctorSummary>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

pub fn default_max_appointments() -> u32 {
    50
}

impl DoctorAvailability {
    pub fn day(&self) -> NaiveDate {
        self.date.date_naive()
    }

    pub fn has_working_hours(&self) -> bool {
        self.is_available && !self.is_holiday && self.start_time.is_some() && self.end_time.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    #[default]
    Available,
    Booked,
    Completed,
    Cancelled,
    NoShow,
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            SlotStatus::Available => "available",
            SlotStatus::Booked => "booked",
            SlotStatus::Completed => "completed",
            SlotStatus::Cancelled => "cancelled",
            SlotStatus::NoShow => "no_show",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentSlot {
    pub id: String,
    pub doctor_id: String,
    pub center_id: String,
    pub date: DateTime<Utc>,
    pub start_time: String,
    pub end_time: String,
    #[serde(default)]
    pub duration: u32,
    #[serde(default)]
    pub is_booked: bool,
    #[serde(default)]
    pub status: SlotStatus,
    pub patient_id: Option<String>,
    pub patient_appointment_id: Option<String>,
    pub booked_by: Option<String>,
    pub booked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doctor: Option<DoctorSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_appointment: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booked_by_user: Option<Value>,
}

/// Row shape for slot inserts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewSlot {
    pub doctor_id: String,
    pub center_id: String,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub duration: u32,
    pub is_booked: bool,
    pub status: SlotStatus,
    pub created_by: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientAppointment {
    pub id: String,
    pub status: Option<String>,
    pub preferred_date: Option<String>,
    pub preferred_time: Option<String>,
    pub confirmed_date: Option<String>,
    pub confirmed_time: Option<String>,
}

// ==============================================================================
// DERIVED VIEWS
// ==============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SlotCounts {
    pub total: usize,
    pub booked: usize,
    pub available: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorDay {
    pub doctor: Option<DoctorSummary>,
    pub appointments: Vec<AppointmentSlot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DayAppointments {
    pub date: NaiveDate,
    pub appointments_by_doctor: BTreeMap<String, DoctorDay>,
    pub doctor_stats: BTreeMap<String, SlotCounts>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SlotGenerationResult {
    pub created: usize,
    pub preserved: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BulkGenerationReport {
    pub dates: usize,
    pub created: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DefaultHoursOutcome {
    pub applied: usize,
    pub skipped: usize,
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SetAvailabilityRequest {
    pub doctor_id: Option<String>,
    pub date: Option<String>,
    pub is_available: Option<bool>,
    pub is_holiday: Option<bool>,
    pub holiday_name: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub break_start_time: Option<String>,
    pub break_end_time: Option<String>,
    pub notes: Option<String>,
    pub max_appointments: Option<u32>,
    pub slot_duration: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityQuery {
    #[serde(alias = "doctor_id")]
    pub doctor_id: Option<String>,
    #[serde(alias = "start_date")]
    pub start_date: Option<String>,
    #[serde(alias = "end_date")]
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarkSundaysRequest {
    pub doctor_id: Option<String>,
    pub year: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkHolidaysRequest {
    pub doctor_id: Option<String>,
    #[serde(default)]
    pub dates: Vec<String>,
    pub holiday_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkAvailabilityRequest {
    pub doctor_id: Option<String>,
    #[serde(default)]
    pub dates: Vec<String>,
    pub is_available: Option<bool>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub break_start_time: Option<String>,
    pub break_end_time: Option<String>,
    pub notes: Option<String>,
    pub max_appointments: Option<u32>,
    pub slot_duration: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DefaultWorkingHoursRequest {
    pub doctor_id: Option<String>,
    pub year: Option<i32>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub break_start_time: Option<String>,
    pub break_end_time: Option<String>,
    pub max_appointments: Option<u32>,
    pub slot_duration: Option<u32>,
    #[serde(default)]
    pub override_existing: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateSlotsRequest {
    pub doctor_id: Option<String>,
    pub date: Option<String>,
    pub slot_duration: Option<u32>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub break_start_time: Option<String>,
    pub break_end_time: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotsQuery {
    #[serde(alias = "doctor_id")]
    pub doctor_id: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DayQuery {
    pub date: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookSlotRequest {
    pub slot_id: Option<String>,
    pub patient_id: Option<String>,
    pub patient_appointment_id: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancelSlotRequest {
    pub slot_id: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteSlotsRequest {
    #[serde(alias = "doctor_id")]
    pub doctor_id: Option<String>,
    pub date: Option<String>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("Center ID is required")]
    MissingCenter,

    #[error("{0}")]
    MissingFields(String),

    #[error("Invalid time '{0}', expected HH:mm")]
    InvalidTimeFormat(String),

    #[error("Invalid date '{0}'")]
    InvalidDate(String),

    #[error("{0}")]
    InvalidSchedule(String),

    #[error("At most {max} dates per request, got {got}")]
    TooManyDates { max: usize, got: usize },

    #[error("Doctor not found or does not belong to this center")]
    DoctorNotFound,

    #[error("Doctor is not marked as available on this date")]
    DoctorUnavailable,

    #[error("Patient not found")]
    PatientNotFound,

    #[error("Slot not found or already booked")]
    SlotUnavailable,

    #[error("Slot not found or not booked")]
    SlotNotBooked,

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

/// Required string field, rejecting blanks.
pub fn require<'a>(value: &'a Option<String>, message: &str) -> Result<&'a str, CalendarError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CalendarError::MissingFields(message.to_string()))
}
