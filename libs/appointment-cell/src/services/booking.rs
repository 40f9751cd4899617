// libs/appointment-cell/src/services/booking.rs
use std::sync::Arc;

use chrono::{Duration, NaiveTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::{AppConfig, StoreBackend};
use shared_database::supabase::SupabaseClient;

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, AvailableSlotsQuery, CalendarQuery,
    ConflictCheckQuery, ConflictCheckResponse, CreateAppointmentRequest, SchedulingRules, Scope,
    Slot, UpdateAppointmentRequest,
};
use crate::services::availability::{AvailabilityService, BusinessHours};
use crate::services::conflict::ConflictDetectionService;
use crate::services::interval::Interval;
use crate::services::lifecycle::{AppointmentLifecycleService, TransitionPolicy};
use crate::services::locks::{ScopeGuard, ScopeLocks};
use crate::store::{
    AppointmentStore, CustomerDirectory, InMemoryAppointmentStore, InMemoryCustomerDirectory,
    SupabaseAppointmentStore, SupabaseCustomerDirectory,
};

/// Re-lock attempts when an appointment keeps moving between reads.
const MAX_LOCK_ATTEMPTS: usize = 3;

pub struct AppointmentBookingService {
    store: Arc<dyn AppointmentStore>,
    customers: Arc<dyn CustomerDirectory>,
    conflict_service: ConflictDetectionService,
    availability_service: AvailabilityService,
    lifecycle_service: AppointmentLifecycleService,
    locks: ScopeLocks,
    rules: SchedulingRules,
}

impl AppointmentBookingService {
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        customers: Arc<dyn CustomerDirectory>,
        rules: SchedulingRules,
        policy: TransitionPolicy,
    ) -> Self {
        let conflict_service = ConflictDetectionService::new(Arc::clone(&store));
        let availability_service =
            AvailabilityService::new(Arc::clone(&store), BusinessHours::from_rules(&rules));

        Self {
            store,
            customers,
            conflict_service,
            availability_service,
            lifecycle_service: AppointmentLifecycleService::new(policy),
            locks: ScopeLocks::new(),
            rules,
        }
    }

    /// Wire the service to the backend selected in `config`.
    pub fn from_config(config: &AppConfig) -> Self {
        let rules = SchedulingRules::from_config(config);
        let policy = TransitionPolicy::from_strict_flag(config.strict_status_transitions);

        match config.store_backend {
            StoreBackend::Supabase => {
                info!("Using Supabase appointment store at {}", config.supabase_url);
                let supabase = Arc::new(SupabaseClient::new(config));
                Self::new(
                    Arc::new(SupabaseAppointmentStore::new(Arc::clone(&supabase))),
                    Arc::new(SupabaseCustomerDirectory::new(supabase)),
                    rules,
                    policy,
                )
            }
            StoreBackend::Memory => {
                warn!("Using in-memory appointment store; bookings are lost on restart");
                Self::new(
                    Arc::new(InMemoryAppointmentStore::new()),
                    Arc::new(InMemoryCustomerDirectory::allow_all()),
                    rules,
                    policy,
                )
            }
        }
    }

    // ==============================================================================
    // BOOKING
    // ==============================================================================

    /// Book a new appointment. The conflict check and the insert run under the
    /// scope's lock so a concurrent booking cannot claim the same slot.
    pub async fn book_appointment(
        &self,
        request: CreateAppointmentRequest,
        created_by: Option<String>,
    ) -> Result<Appointment, AppointmentError> {
        let duration = request
            .duration_minutes
            .unwrap_or(self.rules.default_duration_minutes);
        self.rules.validate_duration(duration)?;

        info!("Booking {} appointment for customer {} at {}",
              request.appointment_type, request.customer_id, request.appointment_date);

        if !self.customers.customer_exists(request.customer_id).await? {
            warn!("Booking rejected: customer {} does not exist", request.customer_id);
            return Err(AppointmentError::CustomerNotFound);
        }

        let scope = Scope::new(request.employee_id, request.store_id);
        let candidate = Interval::from_duration(request.appointment_date, duration as i64);

        let _guard = self.locks.acquire(&[&scope], None).await;

        if let Some(existing) = self.conflict_service.first_conflict(&candidate, &scope, None).await? {
            return Err(conflict_error(&scope, &existing));
        }

        let appointment = self
            .lifecycle_service
            .schedule(request, duration, created_by, Utc::now());
        let created = self.store.insert(appointment).await?;

        info!("Appointment {} booked for {} ({} - {})",
              created.id, scope, created.appointment_date, created.end_time());
        Ok(created)
    }

    pub async fn get_appointment(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        debug!("Fetching appointment {}", appointment_id);

        self.store
            .get(appointment_id)
            .await?
            .ok_or(AppointmentError::NotFound)
    }

    /// Patch an appointment. Moving it in time or to another resource re-runs
    /// the conflict check against both the old and new scope's locks, with the
    /// appointment itself excluded from the check.
    pub async fn update_appointment(
        &self,
        appointment_id: Uuid,
        request: UpdateAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        if let Some(duration) = request.duration_minutes {
            self.rules.validate_duration(duration)?;
        }

        let (_guard, current) = self
            .lock_appointment(appointment_id, |apt| {
                vec![apt.scope(), request.apply_to(apt).scope()]
            })
            .await?;
        let updated = request.apply_to(&current);

        if request.changes_schedule(&current) && updated.status.blocks_slot() {
            debug!("Re-validating slot for appointment {}", appointment_id);
            let scope = updated.scope();
            if let Some(existing) = self
                .conflict_service
                .first_conflict(&updated.interval(), &scope, Some(appointment_id))
                .await?
            {
                return Err(conflict_error(&scope, &existing));
            }
        }

        let saved = self
            .store
            .update(updated)
            .await?
            .ok_or(AppointmentError::NotFound)?;

        info!("Appointment {} updated", appointment_id);
        Ok(saved)
    }

    /// Lock the resources `scopes_for` names for an existing appointment and
    /// return the row as read under those locks. The first read happens
    /// unlocked and may be stale, so the locked re-read must name the same
    /// scopes; if the row moved meanwhile, release and lock its new scopes.
    async fn lock_appointment<F>(
        &self,
        appointment_id: Uuid,
        scopes_for: F,
    ) -> Result<(ScopeGuard, Appointment), AppointmentError>
    where
        F: Fn(&Appointment) -> Vec<Scope>,
    {
        let mut observed = self.get_appointment(appointment_id).await?;

        for _ in 0..MAX_LOCK_ATTEMPTS {
            let scopes = scopes_for(&observed);
            let scope_refs: Vec<&Scope> = scopes.iter().collect();
            let guard = self.locks.acquire(&scope_refs, Some(appointment_id)).await;

            let current = self.get_appointment(appointment_id).await?;
            if scopes_for(&current) == scopes {
                return Ok((guard, current));
            }

            debug!("Appointment {} moved from {} to {} before locking; retrying",
                   appointment_id, observed.scope(), current.scope());
            drop(guard);
            observed = current;
        }

        warn!("Gave up locking appointment {} after {} attempts", appointment_id, MAX_LOCK_ATTEMPTS);
        Err(AppointmentError::Conflict(format!(
            "Appointment {} is being modified concurrently; please retry",
            appointment_id
        )))
    }

    // ==============================================================================
    // LIFECYCLE
    // ==============================================================================

    /// Parse a raw status value and apply it.
    pub async fn update_status_str(
        &self,
        appointment_id: Uuid,
        status: &str,
        notes: Option<String>,
    ) -> Result<Appointment, AppointmentError> {
        let new_status: AppointmentStatus = status.parse()?;
        self.update_status(appointment_id, new_status, notes).await
    }

    pub async fn update_status(
        &self,
        appointment_id: Uuid,
        new_status: AppointmentStatus,
        notes: Option<String>,
    ) -> Result<Appointment, AppointmentError> {
        let (_guard, current) = self
            .lock_appointment(appointment_id, |apt| vec![apt.scope()])
            .await?;
        self.lifecycle_service
            .validate_status_transition(current.status, new_status)?;

        if AppointmentLifecycleService::reoccupies_slot(current.status, new_status) {
            let scope = current.scope();
            if let Some(existing) = self
                .conflict_service
                .first_conflict(&current.interval(), &scope, Some(appointment_id))
                .await?
            {
                warn!("Cannot reactivate appointment {}: slot was taken", appointment_id);
                return Err(conflict_error(&scope, &existing));
            }
        }

        let updated = self
            .store
            .update_status(appointment_id, new_status, notes)
            .await?
            .ok_or(AppointmentError::NotFound)?;

        info!("Appointment {} status changed from {} to {}",
              appointment_id, current.status, new_status);
        Ok(updated)
    }

    pub async fn confirm_appointment(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.update_status(appointment_id, AppointmentStatus::Confirmed, None).await
    }

    pub async fn complete_appointment(
        &self,
        appointment_id: Uuid,
        notes: Option<String>,
    ) -> Result<Appointment, AppointmentError> {
        self.update_status(appointment_id, AppointmentStatus::Completed, notes).await
    }

    pub async fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        reason: Option<String>,
    ) -> Result<Appointment, AppointmentError> {
        self.update_status(appointment_id, AppointmentStatus::Cancelled, reason).await
    }

    pub async fn mark_no_show(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.update_status(appointment_id, AppointmentStatus::NoShow, None).await
    }

    pub async fn delete_appointment(&self, appointment_id: Uuid) -> Result<(), AppointmentError> {
        let _guard = self.locks.acquire(&[], Some(appointment_id)).await;

        if !self.store.delete(appointment_id).await? {
            return Err(AppointmentError::NotFound);
        }
        info!("Appointment {} deleted", appointment_id);
        Ok(())
    }

    // ==============================================================================
    // QUERIES
    // ==============================================================================

    pub async fn get_available_slots(&self, query: AvailableSlotsQuery) -> Result<Vec<Slot>, AppointmentError> {
        let date = query
            .date
            .ok_or_else(|| AppointmentError::Validation("date is required".to_string()))?;
        let duration = query
            .duration_minutes
            .unwrap_or(self.rules.default_duration_minutes);
        self.rules.validate_duration(duration)?;

        let scope = Scope::new(query.employee_id, query.store_id);
        self.availability_service
            .get_available_slots(date, duration, &scope)
            .await
    }

    /// Non-cancelled appointments overlapping the inclusive date range,
    /// ascending by start.
    pub async fn get_calendar(&self, query: CalendarQuery) -> Result<Vec<Appointment>, AppointmentError> {
        let (start_date, end_date) = match (query.start_date, query.end_date) {
            (Some(start), Some(end)) => (start, end),
            _ => {
                return Err(AppointmentError::Validation(
                    "start_date and end_date are required".to_string(),
                ))
            }
        };
        if end_date < start_date {
            return Err(AppointmentError::Validation(
                "end_date must not be before start_date".to_string(),
            ));
        }

        let window = Interval::new(
            start_date.and_time(NaiveTime::MIN).and_utc(),
            end_date.and_time(NaiveTime::MIN).and_utc() + Duration::days(1),
        );
        let scope = Scope::new(query.employee_id, query.store_id);
        debug!("Loading calendar for {} from {} to {}", scope, start_date, end_date);

        let mut appointments = self
            .store
            .query_by_scope_and_window(&scope, &window, false)
            .await?;
        appointments.sort_by_key(|apt| (apt.appointment_date, apt.id));
        Ok(appointments)
    }

    pub async fn check_conflicts(&self, query: ConflictCheckQuery) -> Result<ConflictCheckResponse, AppointmentError> {
        self.rules.validate_duration(query.duration_minutes)?;

        let candidate = Interval::from_duration(query.start_time, query.duration_minutes as i64);
        let scope = Scope::new(query.employee_id, query.store_id);
        self.conflict_service
            .check_conflicts(&candidate, &scope, query.exclude_appointment_id)
            .await
    }
}

fn conflict_error(scope: &Scope, existing: &Appointment) -> AppointmentError {
    AppointmentError::Conflict(format!(
        "Time slot conflicts with appointment {} for {} ({} - {}); please choose another time",
        existing.id,
        scope,
        existing.appointment_date.format("%Y-%m-%d %H:%M"),
        existing.end_time().format("%H:%M"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AppointmentType;
    use chrono::{DateTime, TimeZone};

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, hour, minute, 0).unwrap()
    }

    fn service(policy: TransitionPolicy) -> AppointmentBookingService {
        AppointmentBookingService::new(
            Arc::new(InMemoryAppointmentStore::new()),
            Arc::new(InMemoryCustomerDirectory::allow_all()),
            SchedulingRules::default(),
            policy,
        )
    }

    fn request(employee_id: Uuid, start: DateTime<Utc>, minutes: Option<i32>) -> CreateAppointmentRequest {
        CreateAppointmentRequest {
            customer_id: Uuid::new_v4(),
            appointment_type: AppointmentType::Consultation,
            appointment_date: start,
            duration_minutes: minutes,
            employee_id: Some(employee_id),
            store_id: None,
            notes: None,
            symptoms: None,
        }
    }

    #[tokio::test]
    async fn missing_duration_uses_default() {
        let service = service(TransitionPolicy::default());
        let apt = service
            .book_appointment(request(Uuid::new_v4(), at(9, 0), None), None)
            .await
            .unwrap();
        assert_eq!(apt.duration_minutes, 60);
        assert_eq!(apt.status, AppointmentStatus::Scheduled);
    }

    #[tokio::test]
    async fn out_of_range_duration_is_rejected() {
        let service = service(TransitionPolicy::default());
        for minutes in [14, 481] {
            let result = service
                .book_appointment(request(Uuid::new_v4(), at(9, 0), Some(minutes)), None)
                .await;
            assert!(matches!(result, Err(AppointmentError::Validation(_))));
        }
    }

    #[tokio::test]
    async fn overlapping_booking_names_the_existing_appointment() {
        let service = service(TransitionPolicy::default());
        let employee = Uuid::new_v4();
        let first = service
            .book_appointment(request(employee, at(9, 0), Some(60)), None)
            .await
            .unwrap();

        let err = service
            .book_appointment(request(employee, at(9, 30), Some(30)), None)
            .await
            .unwrap_err();
        match err {
            AppointmentError::Conflict(msg) => assert!(msg.contains(&first.id.to_string())),
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn calendar_requires_an_ordered_range() {
        let service = service(TransitionPolicy::default());
        let day = at(0, 0).date_naive();

        let missing = service
            .get_calendar(CalendarQuery { start_date: Some(day), end_date: None, store_id: None, employee_id: None })
            .await;
        assert!(matches!(missing, Err(AppointmentError::Validation(_))));

        let reversed = service
            .get_calendar(CalendarQuery {
                start_date: Some(day),
                end_date: day.pred_opt(),
                store_id: None,
                employee_id: None,
            })
            .await;
        assert!(matches!(reversed, Err(AppointmentError::Validation(_))));
    }

    #[tokio::test]
    async fn slots_require_a_date() {
        let service = service(TransitionPolicy::default());
        let result = service
            .get_available_slots(AvailableSlotsQuery {
                date: None,
                duration_minutes: None,
                store_id: None,
                employee_id: None,
            })
            .await;
        assert!(matches!(result, Err(AppointmentError::Validation(_))));
    }

    #[tokio::test]
    async fn unknown_status_string_is_a_validation_error() {
        let service = service(TransitionPolicy::default());
        let apt = service
            .book_appointment(request(Uuid::new_v4(), at(9, 0), None), None)
            .await
            .unwrap();

        let result = service.update_status_str(apt.id, "postponed", None).await;
        assert!(matches!(result, Err(AppointmentError::Validation(_))));
    }
}
