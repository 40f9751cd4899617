// libs/appointment-cell/src/services/lifecycle.rs
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, CreateAppointmentRequest,
};

/// How strictly status updates are policed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransitionPolicy {
    /// Any of the five statuses may be set from any other.
    #[default]
    Permissive,
    /// Only the transitions in the lifecycle table are allowed.
    Strict,
}

impl TransitionPolicy {
    pub fn from_strict_flag(strict: bool) -> Self {
        if strict {
            TransitionPolicy::Strict
        } else {
            TransitionPolicy::Permissive
        }
    }
}

pub struct AppointmentLifecycleService {
    policy: TransitionPolicy,
}

impl AppointmentLifecycleService {
    pub fn new(policy: TransitionPolicy) -> Self {
        Self { policy }
    }

    /// Build a freshly booked appointment. Every booking starts out `scheduled`.
    pub fn schedule(
        &self,
        request: CreateAppointmentRequest,
        duration_minutes: i32,
        created_by: Option<String>,
        now: DateTime<Utc>,
    ) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            customer_id: request.customer_id,
            employee_id: request.employee_id,
            store_id: request.store_id,
            appointment_type: request.appointment_type,
            appointment_date: request.appointment_date,
            duration_minutes,
            status: AppointmentStatus::Scheduled,
            notes: request.notes,
            symptoms: request.symptoms,
            created_by,
            created_at: now,
            updated_at: now,
        }
    }

    /// Validate that a status transition is allowed under the active policy.
    pub fn validate_status_transition(
        &self,
        current_status: AppointmentStatus,
        new_status: AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        debug!("Validating status transition from {} to {}", current_status, new_status);

        if self.policy == TransitionPolicy::Permissive || current_status == new_status {
            return Ok(());
        }

        if !Self::get_valid_transitions(current_status).contains(&new_status) {
            warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
            return Err(AppointmentError::InvalidStatusTransition {
                from: current_status,
                to: new_status,
            });
        }

        Ok(())
    }

    /// The lifecycle table: scheduled -> confirmed -> completed, with
    /// cancelled and no_show reachable before completion.
    pub fn get_valid_transitions(current_status: AppointmentStatus) -> &'static [AppointmentStatus] {
        match current_status {
            AppointmentStatus::Scheduled => &[
                AppointmentStatus::Confirmed,
                AppointmentStatus::Cancelled,
                AppointmentStatus::NoShow,
            ],
            AppointmentStatus::Confirmed => &[
                AppointmentStatus::Completed,
                AppointmentStatus::Cancelled,
                AppointmentStatus::NoShow,
            ],
            AppointmentStatus::Completed
            | AppointmentStatus::Cancelled
            | AppointmentStatus::NoShow => &[],
        }
    }

    /// Moving out of `cancelled` puts the appointment back on the calendar,
    /// so its slot has to be re-validated.
    pub fn reoccupies_slot(current_status: AppointmentStatus, new_status: AppointmentStatus) -> bool {
        !current_status.blocks_slot() && new_status.blocks_slot()
    }
}
