// libs/appointment-cell/src/models.rs
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;
use std::str::FromStr;

use crate::services::interval::Interval;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub employee_id: Option<Uuid>,
    pub store_id: Option<Uuid>,
    pub appointment_type: AppointmentType,
    pub appointment_date: DateTime<Utc>,
    pub duration_minutes: i32,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub symptoms: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// The half-open span this appointment occupies.
    pub fn interval(&self) -> Interval {
        Interval::from_duration(self.appointment_date, self.duration_minutes as i64)
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.interval().end
    }

    pub fn scope(&self) -> Scope {
        Scope::new(self.employee_id, self.store_id)
    }
}

/// The (employee, store) pair conflicts are evaluated against. Both filters
/// are optional and are ANDed when both are present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub employee_id: Option<Uuid>,
    pub store_id: Option<Uuid>,
}

impl Scope {
    pub fn new(employee_id: Option<Uuid>, store_id: Option<Uuid>) -> Self {
        Self { employee_id, store_id }
    }

    pub fn employee(employee_id: Uuid) -> Self {
        Self::new(Some(employee_id), None)
    }

    /// No resource named, so no contention is tracked.
    pub fn is_empty(&self) -> bool {
        self.employee_id.is_none() && self.store_id.is_none()
    }

    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.employee_id.is_none_or(|id| appointment.employee_id == Some(id))
            && self.store_id.is_none_or(|id| appointment.store_id == Some(id))
    }

    /// One key per named resource; used to serialize writes per resource.
    pub fn resource_keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(2);
        if let Some(id) = self.employee_id {
            keys.push(format!("employee:{}", id));
        }
        if let Some(id) = self.store_id {
            keys.push(format!("store:{}", id));
        }
        keys
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.employee_id, self.store_id) {
            (Some(e), Some(s)) => write!(f, "employee {} at store {}", e, s),
            (Some(e), None) => write!(f, "employee {}", e),
            (None, Some(s)) => write!(f, "store {}", s),
            (None, None) => write!(f, "unscoped"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 5] = [
        AppointmentStatus::Scheduled,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Completed,
        AppointmentStatus::Cancelled,
        AppointmentStatus::NoShow,
    ];

    /// Whether an appointment in this status occupies its slot. Only
    /// cancellations free it; a no-show still held the resource.
    pub fn blocks_slot(&self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = AppointmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AppointmentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s.trim())
            .ok_or_else(|| AppointmentError::Validation(format!(
                "Invalid status '{}'; expected one of scheduled, confirmed, completed, cancelled, no_show",
                s
            )))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentType {
    SleepStudy,
    Consultation,
    #[serde(alias = "followup")]
    FollowUp,
}

impl fmt::Display for AppointmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentType::SleepStudy => write!(f, "sleep_study"),
            AppointmentType::Consultation => write!(f, "consultation"),
            AppointmentType::FollowUp => write!(f, "follow_up"),
        }
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppointmentRequest {
    pub customer_id: Uuid,
    pub appointment_type: AppointmentType,
    pub appointment_date: DateTime<Utc>,
    pub duration_minutes: Option<i32>,
    pub employee_id: Option<Uuid>,
    pub store_id: Option<Uuid>,
    pub notes: Option<String>,
    pub symptoms: Option<String>,
}

/// Partial update. Moving the start, the duration, or the scope triggers a
/// conflict re-check; the other fields are patched as-is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub appointment_date: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i32>,
    pub appointment_type: Option<AppointmentType>,
    pub employee_id: Option<Uuid>,
    pub store_id: Option<Uuid>,
    pub notes: Option<String>,
    pub symptoms: Option<String>,
}

impl UpdateAppointmentRequest {
    pub fn changes_schedule(&self, current: &Appointment) -> bool {
        self.appointment_date.is_some_and(|d| d != current.appointment_date)
            || self.duration_minutes.is_some_and(|d| d != current.duration_minutes)
            || self.employee_id.is_some_and(|e| Some(e) != current.employee_id)
            || self.store_id.is_some_and(|s| Some(s) != current.store_id)
    }

    pub fn apply_to(&self, current: &Appointment) -> Appointment {
        let mut updated = current.clone();
        if let Some(date) = self.appointment_date {
            updated.appointment_date = date;
        }
        if let Some(duration) = self.duration_minutes {
            updated.duration_minutes = duration;
        }
        if let Some(appointment_type) = self.appointment_type {
            updated.appointment_type = appointment_type;
        }
        if let Some(employee_id) = self.employee_id {
            updated.employee_id = Some(employee_id);
        }
        if let Some(store_id) = self.store_id {
            updated.store_id = Some(store_id);
        }
        if let Some(notes) = &self.notes {
            updated.notes = Some(notes.clone());
        }
        if let Some(symptoms) = &self.symptoms {
            updated.symptoms = Some(symptoms.clone());
        }
        updated.updated_at = Utc::now();
        updated
    }
}

/// Status is taken as a raw string so unknown values surface as a 400 with a
/// readable message rather than a body-deserialization rejection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AvailableSlotsQuery {
    pub date: Option<NaiveDate>,
    pub duration_minutes: Option<i32>,
    pub store_id: Option<Uuid>,
    pub employee_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CalendarQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub store_id: Option<Uuid>,
    pub employee_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConflictCheckQuery {
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i32,
    pub employee_id: Option<Uuid>,
    pub store_id: Option<Uuid>,
    pub exclude_appointment_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Slot {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_minutes: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictCheckResponse {
    pub has_conflict: bool,
    pub conflicting_appointments: Vec<Appointment>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AppointmentError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Appointment not found")]
    NotFound,

    #[error("Customer not found")]
    CustomerNotFound,

    #[error("{0}")]
    Conflict(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Store error: {0}")]
    Store(String),
}

// ==============================================================================
// SCHEDULING RULES
// ==============================================================================

#[derive(Debug, Clone)]
pub struct SchedulingRules {
    pub min_duration_minutes: i32,
    pub max_duration_minutes: i32,
    pub default_duration_minutes: i32,
    pub business_open_hour: u32,
    pub business_close_hour: u32,
    pub slot_granularity_minutes: i64,
}

impl Default for SchedulingRules {
    fn default() -> Self {
        Self {
            min_duration_minutes: 15,
            max_duration_minutes: 480,
            default_duration_minutes: 60,
            business_open_hour: 9,
            business_close_hour: 17,
            slot_granularity_minutes: 30,
        }
    }
}

impl SchedulingRules {
    pub fn from_config(config: &shared_config::AppConfig) -> Self {
        Self {
            default_duration_minutes: config.default_duration_minutes,
            business_open_hour: config.business_open_hour,
            business_close_hour: config.business_close_hour,
            slot_granularity_minutes: config.slot_granularity_minutes,
            ..Self::default()
        }
    }

    pub fn validate_duration(&self, duration_minutes: i32) -> Result<(), AppointmentError> {
        if duration_minutes < self.min_duration_minutes || duration_minutes > self.max_duration_minutes {
            return Err(AppointmentError::Validation(format!(
                "duration_minutes must be between {} and {}, got {}",
                self.min_duration_minutes, self.max_duration_minutes, duration_minutes
            )));
        }
        Ok(())
    }
}
