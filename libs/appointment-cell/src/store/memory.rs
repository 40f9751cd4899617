// libs/appointment-cell/src/store/memory.rs
use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{Appointment, AppointmentStatus, Scope};
use crate::services::interval::Interval;
use crate::store::{AppointmentStore, CustomerDirectory, StoreError};

/// Process-local store used by tests and by the API when no database is configured.
#[derive(Default)]
pub struct InMemoryAppointmentStore {
    rows: RwLock<HashMap<Uuid, Appointment>>,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn query_by_scope_and_window(
        &self,
        scope: &Scope,
        window: &Interval,
        include_cancelled: bool,
    ) -> Result<Vec<Appointment>, StoreError> {
        let rows = self.rows.read().await;
        let mut matching: Vec<Appointment> = rows
            .values()
            .filter(|apt| include_cancelled || apt.status.blocks_slot())
            .filter(|apt| scope.matches(apt))
            .filter(|apt| apt.interval().overlaps(window))
            .cloned()
            .collect();

        matching.sort_by_key(|apt| (apt.appointment_date, apt.id));
        Ok(matching)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn insert(&self, appointment: Appointment) -> Result<Appointment, StoreError> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&appointment.id) {
            return Err(StoreError::Conflict(format!("duplicate id {}", appointment.id)));
        }
        rows.insert(appointment.id, appointment.clone());
        Ok(appointment)
    }

    async fn update(&self, appointment: Appointment) -> Result<Option<Appointment>, StoreError> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&appointment.id) {
            Some(row) => {
                *row = appointment.clone();
                Ok(Some(appointment))
            }
            None => Ok(None),
        }
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: AppointmentStatus,
        notes: Option<String>,
    ) -> Result<Option<Appointment>, StoreError> {
        let mut rows = self.rows.write().await;
        Ok(rows.get_mut(&id).map(|row| {
            row.status = status;
            if notes.is_some() {
                row.notes = notes;
            }
            row.updated_at = Utc::now();
            row.clone()
        }))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.rows.write().await.remove(&id).is_some())
    }
}

/// Customer lookup backed by a set of known ids. With `allow_unknown` every
/// id is accepted, which is how the API runs without a customer database.
#[derive(Default)]
pub struct InMemoryCustomerDirectory {
    known: RwLock<HashSet<Uuid>>,
    allow_unknown: bool,
}

impl InMemoryCustomerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_all() -> Self {
        Self {
            known: RwLock::default(),
            allow_unknown: true,
        }
    }

    pub async fn add(&self, customer_id: Uuid) {
        self.known.write().await.insert(customer_id);
    }
}

#[async_trait]
impl CustomerDirectory for InMemoryCustomerDirectory {
    async fn customer_exists(&self, customer_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.allow_unknown || self.known.read().await.contains(&customer_id))
    }
}
