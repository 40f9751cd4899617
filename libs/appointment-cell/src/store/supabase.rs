// libs/appointment-cell/src/store/supabase.rs
//
// PostgREST-backed store. The `appointments` table is expected to carry an
// exclusion constraint on (scope, tstzrange) for non-cancelled rows; a write
// it rejects comes back as 409 / SQLSTATE 23P01 and is reported as a conflict,
// which covers races between separate API processes.
//

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, error};
use uuid::Uuid;

use shared_database::supabase::{ApiError, SupabaseClient};

use crate::models::{Appointment, AppointmentStatus, Scope, SchedulingRules};
use crate::services::interval::Interval;
use crate::store::{AppointmentStore, CustomerDirectory, StoreError};

const APPOINTMENTS_PATH: &str = "/rest/v1/appointments";
const CUSTOMERS_PATH: &str = "/rest/v1/customers";
const RETURN_REPRESENTATION: &str = "return=representation";

pub struct SupabaseAppointmentStore {
    supabase: Arc<SupabaseClient>,
    max_duration_minutes: i64,
}

impl SupabaseAppointmentStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self {
            supabase,
            max_duration_minutes: SchedulingRules::default().max_duration_minutes as i64,
        }
    }

    /// PostgREST filter string for a scope + window lookup. Rows are stored by
    /// start only, so the lower bound reaches back by the longest allowed
    /// duration and the exact overlap test runs afterwards.
    fn window_query(&self, scope: &Scope, window: &Interval, include_cancelled: bool) -> String {
        let lower = window.extend_back(self.max_duration_minutes).start;

        let mut query_parts = vec![
            "select=*".to_string(),
            format!("appointment_date=gte.{}", encode_timestamp(lower)),
            format!("appointment_date=lt.{}", encode_timestamp(window.end)),
        ];
        if let Some(employee_id) = scope.employee_id {
            query_parts.push(format!("employee_id=eq.{}", employee_id));
        }
        if let Some(store_id) = scope.store_id {
            query_parts.push(format!("store_id=eq.{}", store_id));
        }
        if !include_cancelled {
            query_parts.push(format!("status=neq.{}", AppointmentStatus::Cancelled));
        }
        query_parts.push("order=appointment_date.asc".to_string());

        format!("{}?{}", APPOINTMENTS_PATH, query_parts.join("&"))
    }

    async fn fetch_rows(&self, method: Method, path: &str, body: Option<Value>) -> Result<Vec<Appointment>, StoreError> {
        let rows: Vec<Value> = self
            .supabase
            .request_with_prefer(method, path, None, body, Some(RETURN_REPRESENTATION))
            .await
            .map_err(classify_error)?;

        rows.into_iter().map(parse_appointment).collect()
    }
}

/// Decode one row. Rows without a positive duration have no interval.
fn parse_appointment(row: Value) -> Result<Appointment, StoreError> {
    let appointment: Appointment = serde_json::from_value(row)
        .map_err(|e| StoreError::Backend(format!("Failed to parse appointment: {}", e)))?;

    if appointment.duration_minutes <= 0 {
        error!("Appointment {} has invalid duration {}", appointment.id, appointment.duration_minutes);
        return Err(StoreError::Backend(format!(
            "Appointment {} has non-positive duration {}",
            appointment.id, appointment.duration_minutes
        )));
    }
    Ok(appointment)
}

fn encode_timestamp(ts: DateTime<Utc>) -> String {
    urlencoding::encode(&ts.to_rfc3339()).into_owned()
}

/// Conflicts (409, exclusion or unique violations) become `StoreError::Conflict`;
/// everything else is a backend failure and is never retried.
fn classify_error(err: anyhow::Error) -> StoreError {
    if let Some(api_error) = err.downcast_ref::<ApiError>() {
        let pg_code = api_error.pg_code();
        if api_error.status == 409 || matches!(pg_code.as_deref(), Some("23P01") | Some("23505")) {
            return StoreError::Conflict(api_error.body.clone());
        }
    }
    error!("Appointment store request failed: {}", err);
    StoreError::Backend(err.to_string())
}

#[async_trait]
impl AppointmentStore for SupabaseAppointmentStore {
    async fn query_by_scope_and_window(
        &self,
        scope: &Scope,
        window: &Interval,
        include_cancelled: bool,
    ) -> Result<Vec<Appointment>, StoreError> {
        let path = self.window_query(scope, window, include_cancelled);
        debug!("Querying appointments for {} in window {} - {}", scope, window.start, window.end);

        let rows = self.fetch_rows(Method::GET, &path, None).await?;
        Ok(rows
            .into_iter()
            .filter(|apt| apt.interval().overlaps(window))
            .collect())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        let path = format!("{}?id=eq.{}&select=*", APPOINTMENTS_PATH, id);
        Ok(self.fetch_rows(Method::GET, &path, None).await?.into_iter().next())
    }

    async fn insert(&self, appointment: Appointment) -> Result<Appointment, StoreError> {
        let body = serde_json::to_value(&appointment)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        self.fetch_rows(Method::POST, APPOINTMENTS_PATH, Some(body))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Backend("Insert returned no rows".to_string()))
    }

    async fn update(&self, appointment: Appointment) -> Result<Option<Appointment>, StoreError> {
        let path = format!("{}?id=eq.{}", APPOINTMENTS_PATH, appointment.id);
        let body = json!({
            "employee_id": appointment.employee_id,
            "store_id": appointment.store_id,
            "appointment_type": appointment.appointment_type,
            "appointment_date": appointment.appointment_date,
            "duration_minutes": appointment.duration_minutes,
            "status": appointment.status,
            "notes": appointment.notes,
            "symptoms": appointment.symptoms,
            "updated_at": appointment.updated_at,
        });

        Ok(self.fetch_rows(Method::PATCH, &path, Some(body)).await?.into_iter().next())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: AppointmentStatus,
        notes: Option<String>,
    ) -> Result<Option<Appointment>, StoreError> {
        let path = format!("{}?id=eq.{}", APPOINTMENTS_PATH, id);
        let mut body = json!({
            "status": status,
            "updated_at": Utc::now(),
        });
        if let Some(notes) = notes {
            body["notes"] = json!(notes);
        }

        Ok(self.fetch_rows(Method::PATCH, &path, Some(body)).await?.into_iter().next())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let path = format!("{}?id=eq.{}", APPOINTMENTS_PATH, id);
        Ok(!self.fetch_rows(Method::DELETE, &path, None).await?.is_empty())
    }
}

pub struct SupabaseCustomerDirectory {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseCustomerDirectory {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }
}

#[async_trait]
impl CustomerDirectory for SupabaseCustomerDirectory {
    async fn customer_exists(&self, customer_id: Uuid) -> Result<bool, StoreError> {
        let path = format!("{}?id=eq.{}&select=id", CUSTOMERS_PATH, customer_id);
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None, None)
            .await
            .map_err(classify_error)?;

        Ok(!rows.is_empty())
    }
}
