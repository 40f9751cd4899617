// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    AppointmentError, AvailableSlotsQuery, CalendarQuery, ConflictCheckQuery,
    CreateAppointmentRequest, UpdateAppointmentRequest, UpdateStatusRequest,
};
use crate::services::booking::AppointmentBookingService;

pub type BookingState = Arc<AppointmentBookingService>;

impl From<AppointmentError> for AppError {
    fn from(err: AppointmentError) -> Self {
        match err {
            AppointmentError::Validation(msg) => AppError::ValidationError(msg),
            AppointmentError::InvalidStatusTransition { .. } => AppError::BadRequest(err.to_string()),
            // Overlaps are reported as a bad request carrying the conflict message.
            AppointmentError::Conflict(msg) => AppError::BadRequest(msg),
            AppointmentError::NotFound => AppError::NotFound("Appointment not found".to_string()),
            AppointmentError::CustomerNotFound => AppError::NotFound("Customer not found".to_string()),
            AppointmentError::Store(msg) => AppError::Database(msg),
        }
    }
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}

// ==============================================================================
// BOOKING HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn book_appointment(
    State(booking): State<BookingState>,
    Extension(user): Extension<User>,
    payload: Result<Json<CreateAppointmentRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let request = json_body(payload)?;
    debug!("User {} booking appointment for customer {}", user.id, request.customer_id);

    let appointment = booking.book_appointment(request, Some(user.id)).await?;

    Ok((StatusCode::CREATED, Json(json!(appointment))))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(booking): State<BookingState>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointment = booking.get_appointment(appointment_id).await?;
    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn update_appointment(
    State(booking): State<BookingState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
    payload: Result<Json<UpdateAppointmentRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let request = json_body(payload)?;
    debug!("User {} updating appointment {}", user.id, appointment_id);

    let appointment = booking.update_appointment(appointment_id, request).await?;
    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn update_appointment_status(
    State(booking): State<BookingState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
    payload: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let request = json_body(payload)?;
    debug!("User {} setting appointment {} to '{}'", user.id, appointment_id, request.status);

    let appointment = booking
        .update_status_str(appointment_id, &request.status, request.notes)
        .await?;
    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn delete_appointment(
    State(booking): State<BookingState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<StatusCode, AppError> {
    debug!("User {} deleting appointment {}", user.id, appointment_id);

    booking.delete_appointment(appointment_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ==============================================================================
// SCHEDULE QUERIES
// ==============================================================================

#[axum::debug_handler]
pub async fn get_available_slots(
    State(booking): State<BookingState>,
    Query(query): Query<AvailableSlotsQuery>,
) -> Result<Json<Value>, AppError> {
    let slots = booking.get_available_slots(query).await?;
    Ok(Json(json!(slots)))
}

#[axum::debug_handler]
pub async fn get_calendar(
    State(booking): State<BookingState>,
    Query(query): Query<CalendarQuery>,
) -> Result<Json<Value>, AppError> {
    let appointments = booking.get_calendar(query).await?;
    Ok(Json(json!(appointments)))
}

#[axum::debug_handler]
pub async fn check_appointment_conflicts(
    State(booking): State<BookingState>,
    Query(query): Query<ConflictCheckQuery>,
) -> Result<Json<Value>, AppError> {
    let response = booking.check_conflicts(query).await?;
    Ok(Json(json!(response)))
}
