// libs/appointment-cell/src/services/conflict.rs
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{Appointment, AppointmentError, ConflictCheckResponse, Scope};
use crate::services::interval::Interval;
use crate::store::AppointmentStore;

/// Existing appointments in `snapshot` that block `candidate`. Cancelled rows
/// and the excluded id never count.
pub fn conflicts_in<'a>(
    snapshot: &'a [Appointment],
    candidate: &'a Interval,
    exclude_appointment_id: Option<Uuid>,
) -> impl Iterator<Item = &'a Appointment> + 'a {
    snapshot.iter().filter(move |apt| {
        Some(apt.id) != exclude_appointment_id
            && apt.status.blocks_slot()
            && apt.interval().overlaps(candidate)
    })
}

pub struct ConflictDetectionService {
    store: Arc<dyn AppointmentStore>,
}

impl ConflictDetectionService {
    pub fn new(store: Arc<dyn AppointmentStore>) -> Self {
        Self { store }
    }

    /// Whether any non-cancelled appointment in `scope` overlaps `candidate`.
    /// An empty scope tracks no contention and never conflicts.
    pub async fn has_conflict(
        &self,
        candidate: &Interval,
        scope: &Scope,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<bool, AppointmentError> {
        Ok(self.first_conflict(candidate, scope, exclude_appointment_id).await?.is_some())
    }

    /// The earliest blocking appointment, if any.
    pub async fn first_conflict(
        &self,
        candidate: &Interval,
        scope: &Scope,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<Option<Appointment>, AppointmentError> {
        if scope.is_empty() {
            return Ok(None);
        }

        let existing = self.store.query_by_scope_and_window(scope, candidate, false).await?;
        let found = conflicts_in(&existing, candidate, exclude_appointment_id).next().cloned();

        if let Some(apt) = &found {
            warn!("Conflict detected for {} at {}: overlaps appointment {}",
                  scope, candidate.start, apt.id);
        }
        Ok(found)
    }

    /// Every blocking appointment, earliest first.
    pub async fn find_conflicts(
        &self,
        candidate: &Interval,
        scope: &Scope,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }

        let existing = self.store.query_by_scope_and_window(scope, candidate, false).await?;
        Ok(conflicts_in(&existing, candidate, exclude_appointment_id).cloned().collect())
    }

    pub async fn check_conflicts(
        &self,
        candidate: &Interval,
        scope: &Scope,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<ConflictCheckResponse, AppointmentError> {
        debug!("Checking conflicts for {} from {} to {}", scope, candidate.start, candidate.end);

        let conflicting_appointments = self
            .find_conflicts(candidate, scope, exclude_appointment_id)
            .await?;

        Ok(ConflictCheckResponse {
            has_conflict: !conflicting_appointments.is_empty(),
            conflicting_appointments,
        })
    }
}
