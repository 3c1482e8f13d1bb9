use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn calendar_routes(state: Arc<AppConfig>) -> Router {
    let protected_routes = Router::new()
        // Doctors & availability
        .route("/doctors", get(handlers::get_center_doctors))
        .route(
            "/availability",
            get(handlers::get_doctor_availability).post(handlers::set_doctor_availability),
        )
        .route("/month-availability", get(handlers::get_month_range_availability))
        .route("/mark-sundays", post(handlers::mark_sundays_as_holidays))
        .route("/bulk-holidays", post(handlers::bulk_set_holidays))
        .route("/bulk-availability", post(handlers::bulk_set_availability))
        .route("/default-working-hours", post(handlers::set_default_working_hours))
        // Slots
        .route(
            "/slots",
            get(handlers::get_appointment_slots).delete(handlers::delete_appointment_slots),
        )
        .route("/slots/create", post(handlers::create_appointment_slots))
        .route("/slots/book", post(handlers::book_slot_for_patient))
        .route("/slots/cancel", post(handlers::cancel_booked_slot))
        .route("/day-appointments", get(handlers::get_day_appointments))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
