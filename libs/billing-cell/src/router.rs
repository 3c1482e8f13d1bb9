use std::sync::Arc;

use axum::{middleware, routing::get, Router};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn billing_routes(state: Arc<AppConfig>) -> Router {
    let protected_routes = Router::new()
        .route("/bills", get(handlers::get_bills))
        .route("/financial-reports", get(handlers::get_financial_reports))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
