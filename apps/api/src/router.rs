use std::sync::Arc;

use axum::{routing::get, Router};

use billing_cell::router::billing_routes;
use calendar_cell::router::calendar_routes;
use shared_config::AppConfig;

pub fn create_router(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic admin API is running!" }))
        .nest("/billing", billing_routes(state.clone()))
        .nest("/doctor-calendar", calendar_routes(state))
}
