use std::sync::Arc;

use axum::{
    extract::{Extension, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use chrono::Utc;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use tracing::{debug, error};

use shared_config::AppConfig;
use shared_models::auth::{Role, User};
use shared_models::error::AppError;
use shared_utils::extractor::ensure_role;

use crate::models::{BillingError, BillsQuery, FinancialReportQuery};
use crate::services::{resolve_center_scope, BillingReconciliationService, FinancialReportService};

const BILLING_ROLES: [Role; 4] = [
    Role::Superadmin,
    Role::Centeradmin,
    Role::Accountant,
    Role::Receptionist,
];

fn to_app_error(err: BillingError, production: bool) -> AppError {
    match err {
        BillingError::MissingCenterAssignment => {
            AppError::invalid_input("MISSING_CENTER_ASSIGNMENT", err.to_string())
        }
        BillingError::InvalidCenterId(_) => AppError::invalid_input("INVALID_CENTER_ID", err.to_string()),
        BillingError::InvalidDateRange => AppError::invalid_input("INVALID_DATE", err.to_string()),
        BillingError::SourceUnavailable { source_name, message } => {
            error!("Billing source '{}' failed: {}", source_name, message);
            AppError::upstream(format!("Error fetching {} data", source_name), message, production)
        }
    }
}

// ==============================================================================
// BILLING HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_bills(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<BillsQuery>,
) -> Result<Json<Value>, AppError> {
    ensure_role(&user, &BILLING_ROLES)?;
    debug!("Bills requested by {} ({})", user.id, user.role());

    let production = state.is_production();
    let scope = resolve_center_scope(&user, query.center_id.as_deref())
        .map_err(|e| to_app_error(e, production))?;

    let service = BillingReconciliationService::new(&state);
    let response = service
        .get_bills_and_transactions(&scope, &query, auth.token())
        .await
        .map_err(|e| to_app_error(e, production))?;

    Ok(Json(json!({
        "bills": response.bills,
        "transactions": response.transactions,
        "pagination": response.pagination,
        "summary": response.summary,
    })))
}

#[axum::debug_handler]
pub async fn get_financial_reports(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<FinancialReportQuery>,
) -> Result<Json<Value>, AppError> {
    ensure_role(&user, &BILLING_ROLES)?;

    let production = state.is_production();
    let scope = resolve_center_scope(&user, query.center_id.as_deref())
        .map_err(|e| to_app_error(e, production))?;

    let service = FinancialReportService::new(&state);
    let report = service
        .generate_report(&scope, &query, Utc::now(), auth.token())
        .await
        .map_err(|e| to_app_error(e, production))?;

    Ok(Json(json!({
        "report_type": report.report_type,
        "period": report.period,
        "summary": report.summary,
        "breakdown": report.breakdown,
        "transactions": report.transactions,
    })))
}
