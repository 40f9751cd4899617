// libs/appointment-cell/src/store/mod.rs
//
// Persistence seams for the scheduling core. The core only needs to look up
// appointments by scope and window, write rows, and check customers exist.
//

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Appointment, AppointmentError, AppointmentStatus, Scope};
use crate::services::interval::Interval;

pub mod memory;
pub mod supabase;

pub use memory::{InMemoryAppointmentStore, InMemoryCustomerDirectory};
pub use supabase::{SupabaseAppointmentStore, SupabaseCustomerDirectory};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// The backend rejected the write because it would overlap an existing row.
    #[error("Write rejected by store constraint: {0}")]
    Conflict(String),

    #[error("Store backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for AppointmentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => AppointmentError::Conflict(format!(
                "Appointment conflicts with an existing booking ({})",
                msg
            )),
            StoreError::Backend(msg) => AppointmentError::Store(msg),
        }
    }
}

#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// Appointments for `scope` whose interval overlaps `window`, ordered by start.
    async fn query_by_scope_and_window(
        &self,
        scope: &Scope,
        window: &Interval,
        include_cancelled: bool,
    ) -> Result<Vec<Appointment>, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, StoreError>;

    async fn insert(&self, appointment: Appointment) -> Result<Appointment, StoreError>;

    /// Replace the stored row. `None` when the id is unknown.
    async fn update(&self, appointment: Appointment) -> Result<Option<Appointment>, StoreError>;

    async fn update_status(
        &self,
        id: Uuid,
        status: AppointmentStatus,
        notes: Option<String>,
    ) -> Result<Option<Appointment>, StoreError>;

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    async fn customer_exists(&self, customer_id: Uuid) -> Result<bool, StoreError>;
}
