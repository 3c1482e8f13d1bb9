// libs/calendar-cell/tests/calendar_routes_test.rs
use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use calendar_cell::router::calendar_routes;
use shared_config::AppConfig;
use shared_utils::test_utils::{JwtTestUtils, MockSupabaseResponses, TestConfig, TestUser};

const CENTER_ID: &str = "c-north";
const DOCTOR_ID: &str = "d-1";

fn app_for(server: &MockServer) -> (Router, AppConfig) {
    let config = TestConfig::with_supabase_url(&server.uri()).to_app_config();
    (calendar_routes(Arc::new(config.clone())), config)
}

fn token_for(user: &TestUser, config: &AppConfig) -> String {
    JwtTestUtils::create_test_token(user, &config.supabase_jwt_secret, None)
}

async fn send(app: Router, verb: &str, uri: &str, token: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(verb)
        .uri(uri)
        .header("authorization", format!("Bearer {}", token));
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn mount_doctor(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/users"))
        .and(query_param("role", "eq.doctor"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": DOCTOR_ID, "name": "Dr. Kavya Rao", "email": "kavya@clinic.test" }
        ])))
        .mount(server)
        .await;
}

fn availability_row(start: Option<&str>, end: Option<&str>, is_holiday: bool) -> Value {
    json!({
        "id": "av-1",
        "doctor_id": DOCTOR_ID,
        "center_id": CENTER_ID,
        "date": "2024-03-04T00:00:00.000Z",
        "is_available": !is_holiday,
        "is_holiday": is_holiday,
        "holiday_name": if is_holiday { "Holi" } else { "" },
        "start_time": start,
        "end_time": end,
        "break_start_time": null,
        "break_end_time": null,
        "max_appointments": 50,
        "created_by": "u-admin"
    })
}

fn admin() -> TestUser {
    TestUser::centeradmin("admin@clinic.test").with_center(CENTER_ID)
}

fn desk() -> TestUser {
    TestUser::receptionist("desk@clinic.test").with_center(CENTER_ID)
}

// ==============================================================================
// AVAILABILITY
// ==============================================================================

#[tokio::test]
async fn holiday_clears_hours_and_never_creates_slots() {
    let server = MockServer::start().await;
    mount_doctor(&server).await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_availability"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/doctor_availability"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([availability_row(None, None, true)])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointment_slots"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/appointment_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let (app, config) = app_for(&server);
    let body = json!({
        "doctor_id": DOCTOR_ID,
        "date": "2024-03-04",
        "is_holiday": true,
        "holiday_name": "Holi",
        "start_time": "09:00",
        "end_time": "13:00"
    });
    let (status, response) = send(app, "POST", "/availability", &token_for(&admin(), &config), Some(body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["availability"]["is_available"], false);
    assert_eq!(response["availability"]["is_holiday"], true);
    assert_eq!(response["availability"]["start_time"], Value::Null);
    assert_eq!(response["slot_generation"], Value::Null);
}

#[tokio::test]
async fn malformed_time_is_rejected_before_any_lookup() {
    let server = MockServer::start().await;
    let (app, config) = app_for(&server);
    let body = json!({
        "doctor_id": DOCTOR_ID,
        "date": "2024-03-04",
        "start_time": "9am",
        "end_time": "13:00"
    });
    let (status, response) = send(app, "POST", "/availability", &token_for(&admin(), &config), Some(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"], "INVALID_TIME_FORMAT");
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn unknown_doctor_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let (app, config) = app_for(&server);
    let body = json!({ "doctor_id": "d-elsewhere", "year": 2024 });
    let (status, response) = send(app, "POST", "/mark-sundays", &token_for(&admin(), &config), Some(body)).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(response["error"], "Doctor not found or does not belong to this center");
}

#[tokio::test]
async fn receptionist_cannot_change_availability() {
    let server = MockServer::start().await;
    let (app, config) = app_for(&server);
    let body = json!({ "doctor_id": DOCTOR_ID, "year": 2024 });
    let (status, _) = send(app, "POST", "/mark-sundays", &token_for(&desk(), &config), Some(body)).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn caller_without_center_is_rejected() {
    let server = MockServer::start().await;
    let (app, config) = app_for(&server);
    let user = TestUser::receptionist("desk@clinic.test").without_center();
    let (status, response) = send(app, "GET", "/doctors", &token_for(&user, &config), None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"], "MISSING_CENTER_ID");
    assert_eq!(response["message"], "Center ID is required");
}

#[tokio::test]
async fn month_range_requires_both_dates() {
    let server = MockServer::start().await;
    let (app, config) = app_for(&server);
    let (status, response) = send(
        app,
        "GET",
        "/month-availability?startDate=2024-03-01",
        &token_for(&desk(), &config),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"], "MISSING_FIELDS");
}

// ==============================================================================
// SLOTS
// ==============================================================================

#[tokio::test]
async fn regeneration_keeps_booked_slots_and_fills_the_rest() {
    let server = MockServer::start().await;
    mount_doctor(&server).await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_availability"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([availability_row(Some("09:00"), Some("10:30"), false)])),
        )
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/appointment_slots"))
        .and(query_param("is_booked", "eq.false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_response("s-old", DOCTOR_ID, CENTER_ID, "09:30", "10:00", false)
        ])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointment_slots"))
        .and(query_param("is_booked", "eq.true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_response("s-booked", DOCTOR_ID, CENTER_ID, "09:00", "09:30", true)
        ])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointment_slots"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let (app, config) = app_for(&server);
    let body = json!({ "doctor_id": DOCTOR_ID, "date": "2024-03-04" });
    let (status, response) = send(app, "POST", "/slots/create", &token_for(&desk(), &config), Some(body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["created"], 2);
    assert_eq!(response["preserved"], 1);

    let inserts: Vec<Value> = server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.method.as_str() == "POST")
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect();
    let rows = inserts[0].as_array().unwrap();
    let starts: Vec<&str> = rows.iter().map(|r| r["start_time"].as_str().unwrap()).collect();
    assert_eq!(starts, vec!["09:30", "10:00"]);
    assert!(rows.iter().all(|r| r["status"] == "available" && r["is_booked"] == false));
}

#[tokio::test]
async fn slot_creation_requires_an_open_day() {
    let server = MockServer::start().await;
    mount_doctor(&server).await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_availability"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([availability_row(None, None, true)])))
        .mount(&server)
        .await;

    let (app, config) = app_for(&server);
    let body = json!({ "doctor_id": DOCTOR_ID, "date": "2024-03-04", "start_time": "09:00", "end_time": "12:00" });
    let (status, response) = send(app, "POST", "/slots/create", &token_for(&desk(), &config), Some(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"], "Doctor is not marked as available on this date");
}

#[tokio::test]
async fn slots_listing_reports_counts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointment_slots"))
        .and(query_param("doctor_id", "eq.d-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_response("s-1", DOCTOR_ID, CENTER_ID, "09:00", "09:30", true),
            MockSupabaseResponses::slot_response("s-2", DOCTOR_ID, CENTER_ID, "09:30", "10:00", false),
            MockSupabaseResponses::slot_response("s-3", DOCTOR_ID, CENTER_ID, "10:00", "10:30", false),
        ])))
        .mount(&server)
        .await;

    let (app, config) = app_for(&server);
    let (status, response) = send(
        app,
        "GET",
        "/slots?doctorId=d-1&date=2024-03-04",
        &token_for(&desk(), &config),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["slots"].as_array().unwrap().len(), 3);
    assert_eq!(response["summary"], json!({ "total": 3, "booked": 1, "available": 2 }));
}

// ==============================================================================
// BOOKING
// ==============================================================================

async fn mount_patient(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": "p-1" }])))
        .mount(server)
        .await;
}

#[tokio::test]
async fn booking_a_taken_slot_fails_without_overwriting() {
    let server = MockServer::start().await;
    mount_patient(&server).await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointment_slots"))
        .and(query_param("is_booked", "eq.false"))
        .and(query_param("status", "eq.available"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let (app, config) = app_for(&server);
    let body = json!({ "slot_id": "s-1", "patient_id": "p-1" });
    let (status, response) = send(app, "POST", "/slots/book", &token_for(&desk(), &config), Some(body)).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(response["error"], "Slot not found or already booked");
}

#[tokio::test]
async fn booking_confirms_the_linked_appointment() {
    let server = MockServer::start().await;
    mount_patient(&server).await;
    let mut booked = MockSupabaseResponses::slot_response("s-1", DOCTOR_ID, CENTER_ID, "11:00", "11:30", true);
    booked["patient_id"] = json!("p-1");
    booked["patient_appointment_id"] = json!("pa-1");
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointment_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([booked])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/patient_appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "pa-1", "status": "pending", "preferred_date": "2024-03-05", "preferred_time": "15:00" }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/patient_appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "pa-1", "status": "confirmed", "confirmed_date": "2024-03-04", "confirmed_time": "11:00" }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let (app, config) = app_for(&server);
    let body = json!({ "slot_id": "s-1", "patient_id": "p-1", "patient_appointment_id": "pa-1" });
    let (status, response) = send(app, "POST", "/slots/book", &token_for(&desk(), &config), Some(body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["slot"]["status"], "booked");
    assert_eq!(response["appointment"]["status"], "confirmed");

    let confirm = server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .find(|r| r.method.as_str() == "PATCH" && r.url.path() == "/rest/v1/patient_appointments")
        .unwrap();
    let sent: Value = serde_json::from_slice(&confirm.body).unwrap();
    assert_eq!(sent["confirmed_date"], "2024-03-04");
    assert_eq!(sent["confirmed_time"], "11:00");
}

#[tokio::test]
async fn booking_unknown_patient_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let (app, config) = app_for(&server);
    let body = json!({ "slot_id": "s-1", "patient_id": "p-missing" });
    let (status, response) = send(app, "POST", "/slots/book", &token_for(&desk(), &config), Some(body)).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(response["error"], "Patient not found");
}

#[tokio::test]
async fn cancel_survives_appointment_update_failure() {
    let server = MockServer::start().await;
    let mut booked = MockSupabaseResponses::slot_response("s-1", DOCTOR_ID, CENTER_ID, "11:00", "11:30", true);
    booked["patient_id"] = json!("p-1");
    booked["patient_appointment_id"] = json!("pa-1");
    booked["notes"] = json!("Walk-in");
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointment_slots"))
        .and(query_param("is_booked", "eq.true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([booked])))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointment_slots"))
        .and(query_param("status", "eq.booked"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_response("s-1", DOCTOR_ID, CENTER_ID, "11:00", "11:30", false)
        ])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/patient_appointments"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_json(MockSupabaseResponses::error_response("connection reset", "08006")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (app, config) = app_for(&server);
    let body = json!({ "slot_id": "s-1", "reason": "Patient travelling" });
    let (status, response) = send(app, "POST", "/slots/cancel", &token_for(&desk(), &config), Some(body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["slot"]["status"], "available");

    let release = server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .find(|r| r.method.as_str() == "PATCH" && r.url.path() == "/rest/v1/appointment_slots")
        .unwrap();
    let sent: Value = serde_json::from_slice(&release.body).unwrap();
    let notes = sent["notes"].as_str().unwrap();
    assert!(notes.starts_with("Walk-in\n["));
    assert!(notes.ends_with("] Cancelled: Patient travelling"));
    assert_eq!(sent["patient_id"], Value::Null);
}

fn booked_for_pa1() -> Value {
    let mut booked = MockSupabaseResponses::slot_response("s-1", DOCTOR_ID, CENTER_ID, "11:00", "11:30", true);
    booked["patient_id"] = json!("p-1");
    booked["patient_appointment_id"] = json!("pa-1");
    booked
}

#[tokio::test]
async fn cancel_cascades_to_the_linked_appointment() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointment_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([booked_for_pa1()])))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointment_slots"))
        .and(query_param("patient_id", "eq.p-1"))
        .and(query_param("patient_appointment_id", "eq.pa-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_response("s-1", DOCTOR_ID, CENTER_ID, "11:00", "11:30", false)
        ])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/patient_appointments"))
        .and(query_param("id", "eq.pa-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "pa-1", "status": "cancelled" }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let (app, config) = app_for(&server);
    let body = json!({ "slot_id": "s-1" });
    let (status, response) = send(app, "POST", "/slots/cancel", &token_for(&desk(), &config), Some(body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["slot"]["is_booked"], false);

    let cascade = server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .find(|r| r.method.as_str() == "PATCH" && r.url.path() == "/rest/v1/patient_appointments")
        .unwrap();
    let sent: Value = serde_json::from_slice(&cascade.body).unwrap();
    assert_eq!(sent["status"], "cancelled");
    assert_eq!(sent["cancellation_reason"], "Cancelled by staff");
    assert!(sent["cancelled_at"].is_string());
}

#[tokio::test]
async fn cancel_leaves_a_rebooked_slot_alone() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointment_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([booked_for_pa1()])))
        .mount(&server)
        .await;
    // The slot now carries someone else's booking, so the guarded release matches nothing.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointment_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/patient_appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let (app, config) = app_for(&server);
    let body = json!({ "slot_id": "s-1" });
    let (status, response) = send(app, "POST", "/slots/cancel", &token_for(&desk(), &config), Some(body)).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(response["error"], "Slot not found or not booked");
}

#[tokio::test]
async fn cancelling_an_unbooked_slot_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointment_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let (app, config) = app_for(&server);
    let body = json!({ "slot_id": "s-9" });
    let (status, response) = send(app, "POST", "/slots/cancel", &token_for(&desk(), &config), Some(body)).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(response["error"], "Slot not found or not booked");
}

#[tokio::test]
async fn delete_reports_removed_unbooked_slots() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/appointment_slots"))
        .and(query_param("is_booked", "eq.false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_response("s-2", DOCTOR_ID, CENTER_ID, "09:30", "10:00", false),
            MockSupabaseResponses::slot_response("s-3", DOCTOR_ID, CENTER_ID, "10:00", "10:30", false),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let (app, config) = app_for(&server);
    let (status, response) = send(
        app,
        "DELETE",
        "/slots?doctorId=d-1&date=2024-03-04",
        &token_for(&admin(), &config),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["deleted"], 2);
}
