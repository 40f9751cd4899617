use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Timelike, Utc};
use futures::future::join_all;
use tokio::sync::Barrier;
use uuid::Uuid;

use appointment_cell::models::*;
use appointment_cell::services::{AppointmentBookingService, Interval, TransitionPolicy};
use appointment_cell::store::{
    AppointmentStore, InMemoryAppointmentStore, InMemoryCustomerDirectory, StoreError,
};

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 10, hour, minute, 0).unwrap()
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 10).unwrap()
}

struct Harness {
    service: Arc<AppointmentBookingService>,
    store: Arc<InMemoryAppointmentStore>,
    customer_id: Uuid,
}

async fn harness(policy: TransitionPolicy) -> Harness {
    let store = Arc::new(InMemoryAppointmentStore::new());
    let customers = InMemoryCustomerDirectory::new();
    let customer_id = Uuid::new_v4();
    customers.add(customer_id).await;

    let service = Arc::new(AppointmentBookingService::new(
        store.clone(),
        Arc::new(customers),
        SchedulingRules::default(),
        policy,
    ));
    Harness { service, store, customer_id }
}

fn create_request(
    customer_id: Uuid,
    employee_id: Option<Uuid>,
    store_id: Option<Uuid>,
    start: DateTime<Utc>,
    duration_minutes: i32,
) -> CreateAppointmentRequest {
    CreateAppointmentRequest {
        customer_id,
        appointment_type: AppointmentType::Consultation,
        appointment_date: start,
        duration_minutes: Some(duration_minutes),
        employee_id,
        store_id,
        notes: None,
        symptoms: None,
    }
}

#[tokio::test]
async fn overlapping_bookings_for_one_employee_are_rejected() {
    let h = harness(TransitionPolicy::default()).await;
    let e1 = Uuid::new_v4();

    h.service
        .book_appointment(create_request(h.customer_id, Some(e1), None, at(9, 0), 60), None)
        .await
        .unwrap();

    let overlap = h
        .service
        .book_appointment(create_request(h.customer_id, Some(e1), None, at(9, 30), 30), None)
        .await;
    assert_matches!(overlap, Err(AppointmentError::Conflict(_)));

    // Back-to-back is fine.
    h.service
        .book_appointment(create_request(h.customer_id, Some(e1), None, at(10, 0), 30), None)
        .await
        .unwrap();

    // Another employee is unaffected.
    h.service
        .book_appointment(create_request(h.customer_id, Some(Uuid::new_v4()), None, at(9, 30), 30), None)
        .await
        .unwrap();

    assert_eq!(h.store.len().await, 3);
}

#[tokio::test]
async fn store_scope_blocks_across_employees() {
    let h = harness(TransitionPolicy::default()).await;
    let store_id = Uuid::new_v4();

    h.service
        .book_appointment(create_request(h.customer_id, None, Some(store_id), at(13, 0), 60), None)
        .await
        .unwrap();

    let result = h
        .service
        .book_appointment(create_request(h.customer_id, Some(Uuid::new_v4()), Some(store_id), at(13, 30), 60), None)
        .await;
    assert_matches!(result, Err(AppointmentError::Conflict(_)));
}

#[tokio::test]
async fn unscoped_bookings_never_conflict() {
    let h = harness(TransitionPolicy::default()).await;

    for _ in 0..3 {
        h.service
            .book_appointment(create_request(h.customer_id, None, None, at(9, 0), 60), None)
            .await
            .unwrap();
    }
    assert_eq!(h.store.len().await, 3);
}

#[tokio::test]
async fn unknown_customer_is_rejected_before_booking() {
    let h = harness(TransitionPolicy::default()).await;

    let result = h
        .service
        .book_appointment(create_request(Uuid::new_v4(), Some(Uuid::new_v4()), None, at(9, 0), 60), None)
        .await;

    assert_matches!(result, Err(AppointmentError::CustomerNotFound));
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn created_by_is_recorded() {
    let h = harness(TransitionPolicy::default()).await;

    let apt = h
        .service
        .book_appointment(
            create_request(h.customer_id, None, None, at(9, 0), 60),
            Some("staff-42".to_string()),
        )
        .await
        .unwrap();

    assert_eq!(apt.created_by.as_deref(), Some("staff-42"));
    assert_eq!(h.service.get_appointment(apt.id).await.unwrap(), apt);
}

#[tokio::test]
async fn available_slots_skip_booked_time() {
    let h = harness(TransitionPolicy::default()).await;
    let e1 = Uuid::new_v4();

    h.service
        .book_appointment(create_request(h.customer_id, Some(e1), None, at(10, 0), 60), None)
        .await
        .unwrap();

    let slots = h
        .service
        .get_available_slots(AvailableSlotsQuery {
            date: Some(day()),
            duration_minutes: Some(60),
            store_id: None,
            employee_id: Some(e1),
        })
        .await
        .unwrap();

    let starts: Vec<(u32, u32)> = slots
        .iter()
        .map(|s| (s.start_time.hour(), s.start_time.minute()))
        .collect();

    // 09:30, 10:00 and 10:30 overlap the 10:00-11:00 booking; 09:00 touches it.
    assert!(starts.contains(&(9, 0)));
    assert!(!starts.contains(&(9, 30)));
    assert!(!starts.contains(&(10, 0)));
    assert!(!starts.contains(&(10, 30)));
    assert!(starts.contains(&(11, 0)));
    assert_eq!(slots.len(), 12);
    assert!(slots.iter().all(|s| s.duration_minutes == 60));
}

#[tokio::test]
async fn full_day_slots_on_an_empty_calendar() {
    let h = harness(TransitionPolicy::default()).await;

    let slots = h
        .service
        .get_available_slots(AvailableSlotsQuery {
            date: Some(day()),
            duration_minutes: None,
            store_id: Some(Uuid::new_v4()),
            employee_id: None,
        })
        .await
        .unwrap();

    assert_eq!(slots.len(), 15);
    assert_eq!(slots[0].start_time, at(9, 0));
    assert_eq!(slots[14].end_time, at(17, 0));
}

#[tokio::test]
async fn rescheduling_excludes_the_appointment_itself() {
    let h = harness(TransitionPolicy::default()).await;
    let e1 = Uuid::new_v4();

    let apt = h
        .service
        .book_appointment(create_request(h.customer_id, Some(e1), None, at(9, 0), 60), None)
        .await
        .unwrap();

    // Shifting by 30 minutes overlaps only its own old interval.
    let moved = h
        .service
        .update_appointment(
            apt.id,
            UpdateAppointmentRequest {
                appointment_date: Some(at(9, 30)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(moved.appointment_date, at(9, 30));
    assert_eq!(moved.id, apt.id);
}

#[tokio::test]
async fn rescheduling_onto_another_booking_conflicts() {
    let h = harness(TransitionPolicy::default()).await;
    let e1 = Uuid::new_v4();

    h.service
        .book_appointment(create_request(h.customer_id, Some(e1), None, at(9, 0), 60), None)
        .await
        .unwrap();
    let second = h
        .service
        .book_appointment(create_request(h.customer_id, Some(e1), None, at(11, 0), 60), None)
        .await
        .unwrap();

    let result = h
        .service
        .update_appointment(
            second.id,
            UpdateAppointmentRequest {
                duration_minutes: Some(60),
                appointment_date: Some(at(9, 45)),
                ..Default::default()
            },
        )
        .await;
    assert_matches!(result, Err(AppointmentError::Conflict(_)));

    // The stored row is unchanged.
    assert_eq!(h.service.get_appointment(second.id).await.unwrap().appointment_date, at(11, 0));
}

#[tokio::test]
async fn moving_to_a_busy_employee_conflicts() {
    let h = harness(TransitionPolicy::default()).await;
    let busy = Uuid::new_v4();

    h.service
        .book_appointment(create_request(h.customer_id, Some(busy), None, at(14, 0), 60), None)
        .await
        .unwrap();
    let apt = h
        .service
        .book_appointment(create_request(h.customer_id, Some(Uuid::new_v4()), None, at(14, 0), 60), None)
        .await
        .unwrap();

    let result = h
        .service
        .update_appointment(
            apt.id,
            UpdateAppointmentRequest { employee_id: Some(busy), ..Default::default() },
        )
        .await;
    assert_matches!(result, Err(AppointmentError::Conflict(_)));
}

#[tokio::test]
async fn notes_only_update_skips_the_conflict_check() {
    let h = harness(TransitionPolicy::default()).await;

    let apt = h
        .service
        .book_appointment(create_request(h.customer_id, Some(Uuid::new_v4()), None, at(9, 0), 60), None)
        .await
        .unwrap();

    let updated = h
        .service
        .update_appointment(
            apt.id,
            UpdateAppointmentRequest {
                notes: Some("bring previous results".to_string()),
                appointment_type: Some(AppointmentType::FollowUp),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.notes.as_deref(), Some("bring previous results"));
    assert_eq!(updated.appointment_type, AppointmentType::FollowUp);
    assert_eq!(updated.appointment_date, apt.appointment_date);
}

#[tokio::test]
async fn cancelled_slot_is_free_but_no_show_still_blocks() {
    let h = harness(TransitionPolicy::default()).await;
    let e1 = Uuid::new_v4();

    let cancelled = h
        .service
        .book_appointment(create_request(h.customer_id, Some(e1), None, at(9, 0), 60), None)
        .await
        .unwrap();
    h.service.cancel_appointment(cancelled.id, Some("customer called".to_string())).await.unwrap();

    let no_show = h
        .service
        .book_appointment(create_request(h.customer_id, Some(e1), None, at(9, 0), 60), None)
        .await
        .unwrap();
    h.service.mark_no_show(no_show.id).await.unwrap();

    let result = h
        .service
        .book_appointment(create_request(h.customer_id, Some(e1), None, at(9, 0), 60), None)
        .await;
    assert_matches!(result, Err(AppointmentError::Conflict(_)));
}

#[tokio::test]
async fn reactivating_a_cancelled_appointment_rechecks_the_slot() {
    let h = harness(TransitionPolicy::default()).await;
    let e1 = Uuid::new_v4();

    let original = h
        .service
        .book_appointment(create_request(h.customer_id, Some(e1), None, at(9, 0), 60), None)
        .await
        .unwrap();
    h.service.cancel_appointment(original.id, None).await.unwrap();

    h.service
        .book_appointment(create_request(h.customer_id, Some(e1), None, at(9, 30), 30), None)
        .await
        .unwrap();

    let result = h
        .service
        .update_status(original.id, AppointmentStatus::Scheduled, None)
        .await;
    assert_matches!(result, Err(AppointmentError::Conflict(_)));
    assert_eq!(
        h.service.get_appointment(original.id).await.unwrap().status,
        AppointmentStatus::Cancelled
    );
}

#[tokio::test]
async fn permissive_policy_allows_any_status() {
    let h = harness(TransitionPolicy::Permissive).await;

    let apt = h
        .service
        .book_appointment(create_request(h.customer_id, None, None, at(9, 0), 60), None)
        .await
        .unwrap();

    let completed = h.service.complete_appointment(apt.id, Some("done".to_string())).await.unwrap();
    assert_eq!(completed.status, AppointmentStatus::Completed);
    assert_eq!(completed.notes.as_deref(), Some("done"));

    let back = h.service.update_status_str(apt.id, "scheduled", None).await.unwrap();
    assert_eq!(back.status, AppointmentStatus::Scheduled);
    // Notes are kept when the status update carries none.
    assert_eq!(back.notes.as_deref(), Some("done"));
}

#[tokio::test]
async fn strict_policy_enforces_the_lifecycle() {
    let h = harness(TransitionPolicy::Strict).await;

    let apt = h
        .service
        .book_appointment(create_request(h.customer_id, None, None, at(9, 0), 60), None)
        .await
        .unwrap();

    assert_matches!(
        h.service.complete_appointment(apt.id, None).await,
        Err(AppointmentError::InvalidStatusTransition { .. })
    );

    h.service.confirm_appointment(apt.id).await.unwrap();
    h.service.complete_appointment(apt.id, None).await.unwrap();

    assert_matches!(
        h.service.cancel_appointment(apt.id, None).await,
        Err(AppointmentError::InvalidStatusTransition {
            from: AppointmentStatus::Completed,
            to: AppointmentStatus::Cancelled,
        })
    );
}

#[tokio::test]
async fn status_update_on_missing_appointment_is_not_found() {
    let h = harness(TransitionPolicy::default()).await;
    assert_matches!(
        h.service.confirm_appointment(Uuid::new_v4()).await,
        Err(AppointmentError::NotFound)
    );
}

#[tokio::test]
async fn delete_removes_the_row_once() {
    let h = harness(TransitionPolicy::default()).await;

    let apt = h
        .service
        .book_appointment(create_request(h.customer_id, None, None, at(9, 0), 60), None)
        .await
        .unwrap();

    h.service.delete_appointment(apt.id).await.unwrap();
    assert_matches!(h.service.get_appointment(apt.id).await, Err(AppointmentError::NotFound));
    assert_matches!(h.service.delete_appointment(apt.id).await, Err(AppointmentError::NotFound));
}

#[tokio::test]
async fn calendar_lists_active_appointments_in_order() {
    let h = harness(TransitionPolicy::default()).await;
    let store_id = Uuid::new_v4();

    let late = h
        .service
        .book_appointment(create_request(h.customer_id, None, Some(store_id), at(15, 0), 60), None)
        .await
        .unwrap();
    let early = h
        .service
        .book_appointment(create_request(h.customer_id, None, Some(store_id), at(9, 0), 60), None)
        .await
        .unwrap();
    let cancelled = h
        .service
        .book_appointment(create_request(h.customer_id, None, Some(store_id), at(12, 0), 60), None)
        .await
        .unwrap();
    h.service.cancel_appointment(cancelled.id, None).await.unwrap();

    // Another store's booking is outside the scope.
    h.service
        .book_appointment(create_request(h.customer_id, None, Some(Uuid::new_v4()), at(10, 0), 60), None)
        .await
        .unwrap();

    let calendar = h
        .service
        .get_calendar(CalendarQuery {
            start_date: Some(day()),
            end_date: Some(day()),
            store_id: Some(store_id),
            employee_id: None,
        })
        .await
        .unwrap();

    let ids: Vec<Uuid> = calendar.iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![early.id, late.id]);
}

#[tokio::test]
async fn conflict_check_reports_without_booking() {
    let h = harness(TransitionPolicy::default()).await;
    let e1 = Uuid::new_v4();

    let apt = h
        .service
        .book_appointment(create_request(h.customer_id, Some(e1), None, at(9, 0), 60), None)
        .await
        .unwrap();

    let busy = h
        .service
        .check_conflicts(ConflictCheckQuery {
            start_time: at(9, 30),
            duration_minutes: 30,
            employee_id: Some(e1),
            store_id: None,
            exclude_appointment_id: None,
        })
        .await
        .unwrap();
    assert!(busy.has_conflict);
    assert_eq!(busy.conflicting_appointments[0].id, apt.id);

    let excluded = h
        .service
        .check_conflicts(ConflictCheckQuery {
            start_time: at(9, 30),
            duration_minutes: 30,
            employee_id: Some(e1),
            store_id: None,
            exclude_appointment_id: Some(apt.id),
        })
        .await
        .unwrap();
    assert!(!excluded.has_conflict);
    assert_eq!(h.store.len().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bookings_for_one_slot_admit_exactly_one() {
    let h = harness(TransitionPolicy::default()).await;
    let e1 = Uuid::new_v4();

    let attempts = (0..10).map(|_| {
        let service = Arc::clone(&h.service);
        let request = create_request(h.customer_id, Some(e1), None, at(9, 0), 60);
        tokio::spawn(async move { service.book_appointment(request, None).await })
    });

    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let booked = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(AppointmentError::Conflict(_))))
        .count();

    assert_eq!(booked, 1);
    assert_eq!(conflicts, 9);

    let stored = h
        .store
        .query_by_scope_and_window(
            &Scope::employee(e1),
            &Interval::new(at(0, 0), at(23, 0)),
            false,
        )
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
}

#[tokio::test]
async fn every_listed_slot_passes_the_conflict_check() {
    let h = harness(TransitionPolicy::default()).await;
    let e1 = Uuid::new_v4();

    // Starts before opening and runs into business hours.
    h.service
        .book_appointment(create_request(h.customer_id, Some(e1), None, at(8, 0), 90), None)
        .await
        .unwrap();
    let no_show = h
        .service
        .book_appointment(create_request(h.customer_id, Some(e1), None, at(12, 0), 30), None)
        .await
        .unwrap();
    h.service.mark_no_show(no_show.id).await.unwrap();
    h.service
        .book_appointment(create_request(h.customer_id, Some(e1), None, at(14, 15), 45), None)
        .await
        .unwrap();

    let slots = h
        .service
        .get_available_slots(AvailableSlotsQuery {
            date: Some(day()),
            duration_minutes: Some(60),
            store_id: None,
            employee_id: Some(e1),
        })
        .await
        .unwrap();
    assert!(!slots.is_empty());

    for slot in &slots {
        let check = h
            .service
            .check_conflicts(ConflictCheckQuery {
                start_time: slot.start_time,
                duration_minutes: slot.duration_minutes,
                employee_id: Some(e1),
                store_id: None,
                exclude_appointment_id: None,
            })
            .await
            .unwrap();
        assert!(!check.has_conflict, "slot at {} overlaps a booking", slot.start_time);
    }

    let starts: Vec<DateTime<Utc>> = slots.iter().map(|s| s.start_time).collect();
    for blocked in [at(9, 0), at(11, 30), at(12, 0), at(13, 30), at(14, 0), at(14, 30)] {
        assert!(!starts.contains(&blocked), "{} should not be offered", blocked);
    }
    assert!(starts.contains(&at(9, 30)));
    assert!(starts.contains(&at(15, 0)));
}

/// In-memory store whose first `get` of one appointment returns an outdated
/// copy, and whose snapshot reads for one employee pause until a second
/// reader arrives or a short timeout passes.
struct StaleReadStore {
    inner: InMemoryAppointmentStore,
    stale: Mutex<Option<Appointment>>,
    gated_employee: Uuid,
    gate: Barrier,
}

#[async_trait]
impl AppointmentStore for StaleReadStore {
    async fn query_by_scope_and_window(
        &self,
        scope: &Scope,
        window: &Interval,
        include_cancelled: bool,
    ) -> Result<Vec<Appointment>, StoreError> {
        if scope.employee_id == Some(self.gated_employee) {
            let _ = tokio::time::timeout(Duration::from_millis(200), self.gate.wait()).await;
        }
        self.inner.query_by_scope_and_window(scope, window, include_cancelled).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        let stale = {
            let mut slot = self.stale.lock().unwrap();
            match slot.as_ref() {
                Some(apt) if apt.id == id => slot.take(),
                _ => None,
            }
        };
        match stale {
            Some(apt) => Ok(Some(apt)),
            None => self.inner.get(id).await,
        }
    }

    async fn insert(&self, appointment: Appointment) -> Result<Appointment, StoreError> {
        self.inner.insert(appointment).await
    }

    async fn update(&self, appointment: Appointment) -> Result<Option<Appointment>, StoreError> {
        self.inner.update(appointment).await
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: AppointmentStatus,
        notes: Option<String>,
    ) -> Result<Option<Appointment>, StoreError> {
        self.inner.update_status(id, status, notes).await
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        self.inner.delete(id).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reschedule_locks_the_scope_the_row_actually_has() {
    let e1 = Uuid::new_v4();
    let e2 = Uuid::new_v4();

    // Committed on E2 at 11:00, but the first read still sees it on E1.
    let committed = Appointment {
        id: Uuid::new_v4(),
        customer_id: Uuid::new_v4(),
        employee_id: Some(e2),
        store_id: None,
        appointment_type: AppointmentType::Consultation,
        appointment_date: at(11, 0),
        duration_minutes: 60,
        status: AppointmentStatus::Scheduled,
        notes: None,
        symptoms: None,
        created_by: None,
        created_at: at(8, 0),
        updated_at: at(8, 0),
    };
    let outdated = Appointment { employee_id: Some(e1), ..committed.clone() };

    let store = Arc::new(StaleReadStore {
        inner: InMemoryAppointmentStore::new(),
        stale: Mutex::new(Some(outdated)),
        gated_employee: e2,
        gate: Barrier::new(2),
    });
    store.insert(committed.clone()).await.unwrap();

    let service = Arc::new(AppointmentBookingService::new(
        store.clone(),
        Arc::new(InMemoryCustomerDirectory::allow_all()),
        SchedulingRules::default(),
        TransitionPolicy::default(),
    ));

    let reschedule = {
        let service = Arc::clone(&service);
        let id = committed.id;
        tokio::spawn(async move {
            service
                .update_appointment(
                    id,
                    UpdateAppointmentRequest { appointment_date: Some(at(9, 0)), ..Default::default() },
                )
                .await
        })
    };
    let booking = {
        let service = Arc::clone(&service);
        let request = create_request(Uuid::new_v4(), Some(e2), None, at(9, 0), 60);
        tokio::spawn(async move { service.book_appointment(request, None).await })
    };

    let rescheduled = reschedule.await.unwrap();
    let booked = booking.await.unwrap();
    assert_eq!(
        [rescheduled.is_ok(), booked.is_ok()].iter().filter(|ok| **ok).count(),
        1,
        "reschedule: {:?}, booking: {:?}",
        rescheduled,
        booked
    );

    let active = store
        .inner
        .query_by_scope_and_window(&Scope::employee(e2), &Interval::new(at(9, 0), at(10, 0)), false)
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
}
