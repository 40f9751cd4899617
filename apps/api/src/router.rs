use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use appointment_cell::router::appointment_routes;
use appointment_cell::AppointmentBookingService;
use shared_config::AppConfig;

pub fn create_router(state: Arc<AppConfig>, booking: Arc<AppointmentBookingService>) -> Router {
    Router::new()
        .route("/", get(|| async { "Retail Ops API is running!" }))
        .nest("/appointments", appointment_routes(state, booking))
}
