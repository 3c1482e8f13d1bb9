use std::sync::Arc;

use axum::{
    extract::{Extension, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use chrono::NaiveDate;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use tracing::{debug, error};

use shared_config::AppConfig;
use shared_models::auth::{Role, User};
use shared_models::error::AppError;
use shared_utils::extractor::ensure_role;

use crate::models::{
    require, AvailabilityQuery, BookSlotRequest, BulkAvailabilityRequest, BulkHolidaysRequest,
    CalendarError, CancelSlotRequest, CreateSlotsRequest, DayQuery, DefaultWorkingHoursRequest,
    DeleteSlotsRequest, MarkSundaysRequest, SetAvailabilityRequest, SlotsQuery,
};
use crate::services::slots::{count_slots, parse_day};
use crate::services::{AvailabilityService, BookingService, SlotGenerator};

const DESK_ROLES: [Role; 2] = [Role::Centeradmin, Role::Receptionist];
const ADMIN_ROLES: [Role; 1] = [Role::Centeradmin];

fn to_app_error(err: CalendarError, operation: &str, production: bool) -> AppError {
    match err {
        CalendarError::MissingCenter => AppError::invalid_input("MISSING_CENTER_ID", err.to_string()),
        CalendarError::MissingFields(_) => AppError::invalid_input("MISSING_FIELDS", err.to_string()),
        CalendarError::InvalidTimeFormat(_) => {
            AppError::invalid_input("INVALID_TIME_FORMAT", err.to_string())
        }
        CalendarError::InvalidDate(_) => AppError::invalid_input("INVALID_DATE", err.to_string()),
        CalendarError::InvalidSchedule(_)
        | CalendarError::TooManyDates { .. }
        | CalendarError::DoctorUnavailable => AppError::BadRequest(err.to_string()),
        CalendarError::DoctorNotFound
        | CalendarError::PatientNotFound
        | CalendarError::SlotUnavailable
        | CalendarError::SlotNotBooked => AppError::NotFound(err.to_string()),
        CalendarError::Database(e) => {
            error!("Calendar operation '{}' failed: {:#}", operation, e);
            AppError::upstream(format!("Error {}", operation), e, production)
        }
    }
}

/// Gate shared by every calendar handler: role check, then the caller's center.
fn center_of<'a>(user: &'a User, allowed: &[Role]) -> Result<&'a str, AppError> {
    ensure_role(user, allowed)?;
    require(&user.center_id, "Center ID is required")
        .map_err(|_| AppError::invalid_input("MISSING_CENTER_ID", CalendarError::MissingCenter.to_string()))
}

fn slot_lookup(query: &SlotsQuery) -> Result<(&str, NaiveDate), CalendarError> {
    let message = "Doctor ID and date are required";
    let doctor_id = require(&query.doctor_id, message)?;
    let day = parse_day(require(&query.date, message)?)?;
    Ok((doctor_id, day))
}

// ==============================================================================
// DOCTORS & AVAILABILITY
// ==============================================================================

#[axum::debug_handler]
pub async fn get_center_doctors(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let center_id = center_of(&user, &DESK_ROLES)?;

    let service = AvailabilityService::new(&state);
    let doctors = service
        .get_center_doctors(center_id, auth.token())
        .await
        .map_err(|e| to_app_error(e, "fetching doctors", state.is_production()))?;

    Ok(Json(json!({ "doctors": doctors })))
}

#[axum::debug_handler]
pub async fn set_doctor_availability(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<SetAvailabilityRequest>,
) -> Result<Json<Value>, AppError> {
    let center_id = center_of(&user, &ADMIN_ROLES)?;
    debug!("Availability update by {} for doctor {:?}", user.id, request.doctor_id);

    let service = AvailabilityService::new(&state);
    let update = service
        .set_availability(center_id, &user.id, &request, auth.token())
        .await
        .map_err(|e| to_app_error(e, "setting doctor availability", state.is_production()))?;

    Ok(Json(json!({
        "message": "Doctor availability updated successfully",
        "availability": update.availability,
        "slot_generation": update.slots,
    })))
}

#[axum::debug_handler]
pub async fn get_doctor_availability(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<Value>, AppError> {
    let center_id = center_of(&user, &ADMIN_ROLES)?;

    let service = AvailabilityService::new(&state);
    let availability = service
        .get_availability(center_id, &query, auth.token())
        .await
        .map_err(|e| to_app_error(e, "fetching doctor availability", state.is_production()))?;

    Ok(Json(json!({ "availability": availability })))
}

#[axum::debug_handler]
pub async fn get_month_range_availability(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<Value>, AppError> {
    let center_id = center_of(&user, &DESK_ROLES)?;

    let service = AvailabilityService::new(&state);
    let availability = service
        .get_month_range(center_id, &query, auth.token())
        .await
        .map_err(|e| to_app_error(e, "fetching month availability", state.is_production()))?;

    Ok(Json(json!({ "availability": availability })))
}

#[axum::debug_handler]
pub async fn mark_sundays_as_holidays(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<MarkSundaysRequest>,
) -> Result<Json<Value>, AppError> {
    let center_id = center_of(&user, &ADMIN_ROLES)?;

    let service = AvailabilityService::new(&state);
    let count = service
        .mark_sundays(center_id, &user.id, &request, auth.token())
        .await
        .map_err(|e| to_app_error(e, "marking Sundays as holidays", state.is_production()))?;

    Ok(Json(json!({
        "message": format!("Marked {} Sundays as holidays", count),
        "count": count,
    })))
}

#[axum::debug_handler]
pub async fn bulk_set_holidays(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<BulkHolidaysRequest>,
) -> Result<Json<Value>, AppError> {
    let center_id = center_of(&user, &ADMIN_ROLES)?;

    let service = AvailabilityService::new(&state);
    let count = service
        .bulk_holidays(center_id, &user.id, &request, auth.token())
        .await
        .map_err(|e| to_app_error(e, "setting holidays", state.is_production()))?;

    Ok(Json(json!({
        "message": format!("Set {} dates as holidays", count),
        "count": count,
    })))
}

#[axum::debug_handler]
pub async fn bulk_set_availability(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<BulkAvailabilityRequest>,
) -> Result<Json<Value>, AppError> {
    let center_id = center_of(&user, &ADMIN_ROLES)?;

    let service = AvailabilityService::new(&state);
    let written = service
        .bulk_availability(center_id, &user.id, &request, auth.token())
        .await
        .map_err(|e| to_app_error(e, "setting bulk availability", state.is_production()))?;

    // The generation task keeps running after the handle is dropped.
    let slot_generation = if written.generation.is_some() { "scheduled" } else { "not_required" };

    Ok(Json(json!({
        "message": format!("Updated availability for {} dates", written.count),
        "count": written.count,
        "slot_generation": slot_generation,
    })))
}

#[axum::debug_handler]
pub async fn set_default_working_hours(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<DefaultWorkingHoursRequest>,
) -> Result<Json<Value>, AppError> {
    let center_id = center_of(&user, &ADMIN_ROLES)?;

    let service = AvailabilityService::new(&state);
    let written = service
        .set_default_working_hours(center_id, &user.id, &request, auth.token())
        .await
        .map_err(|e| to_app_error(e, "setting default working hours", state.is_production()))?;

    let slot_generation = if written.generation.is_some() { "scheduled" } else { "not_required" };

    Ok(Json(json!({
        "message": format!("Default working hours applied to {} dates", written.count),
        "applied": written.count,
        "skipped": written.skipped,
        "slot_generation": slot_generation,
    })))
}

// ==============================================================================
// SLOTS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_appointment_slots(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateSlotsRequest>,
) -> Result<Json<Value>, AppError> {
    let center_id = center_of(&user, &DESK_ROLES)?;

    let service = AvailabilityService::new(&state);
    let result = service
        .create_slots(center_id, &user.id, &request, auth.token())
        .await
        .map_err(|e| to_app_error(e, "creating appointment slots", state.is_production()))?;

    Ok(Json(json!({
        "message": format!("Created {} appointment slots", result.created),
        "created": result.created,
        "preserved": result.preserved,
    })))
}

#[axum::debug_handler]
pub async fn get_appointment_slots(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<Value>, AppError> {
    let center_id = center_of(&user, &DESK_ROLES)?;
    let production = state.is_production();

    let (doctor_id, day) = slot_lookup(&query).map_err(|e| to_app_error(e, "fetching slots", production))?;

    let generator = SlotGenerator::new(&state);
    let slots = generator
        .get_slots(doctor_id, center_id, day, auth.token())
        .await
        .map_err(|e| to_app_error(e, "fetching slots", production))?;
    let summary = count_slots(&slots);

    Ok(Json(json!({
        "slots": slots,
        "summary": summary,
    })))
}

#[axum::debug_handler]
pub async fn get_day_appointments(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<DayQuery>,
) -> Result<Json<Value>, AppError> {
    let center_id = center_of(&user, &DESK_ROLES)?;
    let production = state.is_production();

    let day = require(&query.date, "Date is required")
        .and_then(parse_day)
        .map_err(|e| to_app_error(e, "fetching day appointments", production))?;

    let generator = SlotGenerator::new(&state);
    let appointments = generator
        .day_appointments(center_id, day, auth.token())
        .await
        .map_err(|e| to_app_error(e, "fetching day appointments", production))?;

    Ok(Json(json!(appointments)))
}

#[axum::debug_handler]
pub async fn book_slot_for_patient(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<BookSlotRequest>,
) -> Result<Json<Value>, AppError> {
    let center_id = center_of(&user, &DESK_ROLES)?;

    let service = BookingService::new(&state);
    let booking = service
        .book(center_id, &user.id, &request, auth.token())
        .await
        .map_err(|e| to_app_error(e, "booking slot", state.is_production()))?;

    Ok(Json(json!({
        "message": "Slot booked successfully",
        "slot": booking.slot,
        "appointment": booking.appointment,
    })))
}

#[axum::debug_handler]
pub async fn cancel_booked_slot(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CancelSlotRequest>,
) -> Result<Json<Value>, AppError> {
    let center_id = center_of(&user, &DESK_ROLES)?;

    let service = BookingService::new(&state);
    let slot = service
        .cancel(center_id, &request, auth.token())
        .await
        .map_err(|e| to_app_error(e, "cancelling slot", state.is_production()))?;

    Ok(Json(json!({
        "message": "Booking cancelled successfully",
        "slot": slot,
    })))
}

#[axum::debug_handler]
pub async fn delete_appointment_slots(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(request): Query<DeleteSlotsRequest>,
) -> Result<Json<Value>, AppError> {
    let center_id = center_of(&user, &ADMIN_ROLES)?;

    let service = BookingService::new(&state);
    let deleted = service
        .delete_slots(center_id, &request, auth.token())
        .await
        .map_err(|e| to_app_error(e, "deleting slots", state.is_production()))?;

    Ok(Json(json!({
        "message": format!("Deleted {} unbooked slots", deleted),
        "deleted": deleted,
    })))
}
