// libs/calendar-cell/src/services/availability.rs
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use reqwest::Method;
use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use shared_config::AppConfig;
use shared_database::supabase::{representation_headers, upsert_headers, SupabaseClient};

use crate::models::{
    default_max_appointments, require, AvailabilityQuery, BulkAvailabilityRequest,
    BulkGenerationReport, BulkHolidaysRequest, CalendarError, CreateSlotsRequest,
    DefaultHoursOutcome, DefaultWorkingHoursRequest, DoctorAvailability, DoctorSummary,
    MarkSundaysRequest, SetAvailabilityRequest, SlotGenerationResult,
};
use crate::services::generation::{BulkGenerationJob, SlotGenerator};
use crate::services::slots::{
    accepts_default_hours, encode_day, index_by_day, parse_day, parse_days, plan_upserts,
    slot_duration, span_filter, sundays_in_year, working_days_in_year, year_span, UpsertPlan,
    WorkingHours,
};

const DOCTOR_SELECT: &str = "id,name,email,phone,qualification,designation";
const AVAILABILITY_SELECT: &str = "*,doctor:doctor_id(id,name,email,qualification)";

/// Outcome of a single-day availability write.
#[derive(Debug)]
pub struct AvailabilityUpdate {
    pub availability: DoctorAvailability,
    pub slots: Option<SlotGenerationResult>,
}

/// Outcome of a multi-day write; `generation` is the detached slot job, if any.
#[derive(Debug)]
pub struct BulkWrite {
    pub count: usize,
    pub skipped: usize,
    pub generation: Option<JoinHandle<BulkGenerationReport>>,
}

/// Fields written for a holiday: closed, no hours.
fn holiday_fields(name: &str, created_by: &str) -> Map<String, Value> {
    let mut row = Map::new();
    row.insert("is_available".into(), json!(false));
    row.insert("is_holiday".into(), json!(true));
    row.insert("holiday_name".into(), json!(name));
    row.insert("start_time".into(), Value::Null);
    row.insert("end_time".into(), Value::Null);
    row.insert("break_start_time".into(), Value::Null);
    row.insert("break_end_time".into(), Value::Null);
    row.insert("created_by".into(), json!(created_by));
    row
}

fn hours_fields(
    is_available: bool,
    hours: Option<&WorkingHours>,
    notes: Option<&str>,
    max_appointments: u32,
    created_by: &str,
) -> Map<String, Value> {
    let (break_start, break_end) = hours.map(WorkingHours::break_strs).unwrap_or((None, None));
    let mut row = Map::new();
    row.insert("is_available".into(), json!(is_available));
    row.insert("is_holiday".into(), json!(false));
    row.insert("holiday_name".into(), json!(""));
    row.insert("start_time".into(), json!(hours.map(WorkingHours::start_str)));
    row.insert("end_time".into(), json!(hours.map(WorkingHours::end_str)));
    row.insert("break_start_time".into(), json!(break_start));
    row.insert("break_end_time".into(), json!(break_end));
    row.insert("notes".into(), json!(notes.unwrap_or_default()));
    row.insert("max_appointments".into(), json!(max_appointments));
    row.insert("created_by".into(), json!(created_by));
    row
}

fn max_appointments(requested: Option<u32>) -> u32 {
    requested.filter(|m| *m > 0).unwrap_or_else(default_max_appointments)
}

pub struct AvailabilityService {
    supabase: Arc<SupabaseClient>,
    generator: SlotGenerator,
    default_duration: u32,
}

impl AvailabilityService {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_client(Arc::new(SupabaseClient::new(config)), config)
    }

    pub fn with_client(supabase: Arc<SupabaseClient>, config: &AppConfig) -> Self {
        Self {
            generator: SlotGenerator::with_client(supabase.clone(), config),
            supabase,
            default_duration: config.default_slot_duration,
        }
    }

    // ==========================================================================
    // DOCTORS
    // ==========================================================================

    /// Active doctors of the center, by name.
    pub async fn get_center_doctors(
        &self,
        center_id: &str,
        auth_token: &str,
    ) -> Result<Vec<DoctorSummary>, CalendarError> {
        debug!("Fetching doctors for center {}", center_id);
        let path = format!(
            "/rest/v1/users?select={}&center_id=eq.{}&role=eq.doctor&is_deleted=eq.false&status=eq.active&order=name.asc",
            DOCTOR_SELECT, center_id
        );
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;
        rows.into_iter()
            .map(|row| serde_json::from_value(row).map_err(|e| CalendarError::Database(e.into())))
            .collect()
    }

    pub async fn verify_doctor(
        &self,
        doctor_id: &str,
        center_id: &str,
        auth_token: &str,
    ) -> Result<DoctorSummary, CalendarError> {
        let path = format!(
            "/rest/v1/users?select={}&id=eq.{}&center_id=eq.{}&role=eq.doctor",
            DOCTOR_SELECT, doctor_id, center_id
        );
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;
        let row = rows.into_iter().next().ok_or(CalendarError::DoctorNotFound)?;
        serde_json::from_value(row).map_err(|e| CalendarError::Database(e.into()))
    }

    // ==========================================================================
    // READS
    // ==========================================================================

    async fn fetch_range(
        &self,
        center_id: &str,
        doctor_id: Option<&str>,
        first: Option<NaiveDate>,
        last: Option<NaiveDate>,
        auth_token: &str,
    ) -> Result<Vec<DoctorAvailability>, CalendarError> {
        let mut path = format!(
            "/rest/v1/doctor_availability?select={}&center_id=eq.{}",
            AVAILABILITY_SELECT, center_id
        );
        if let Some(doctor_id) = doctor_id {
            path.push_str(&format!("&doctor_id=eq.{}", doctor_id));
        }
        match (first, last) {
            (Some(first), Some(last)) => {
                path.push('&');
                path.push_str(&span_filter("date", first, last));
            }
            (Some(first), None) => {
                path.push_str(&format!("&date=gte.{}", encode_day(first)));
            }
            _ => {}
        }
        path.push_str("&order=date.asc,doctor_id.asc");

        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;
        rows.into_iter()
            .map(|row| serde_json::from_value(row).map_err(|e| CalendarError::Database(e.into())))
            .collect()
    }

    /// Optional doctor; optional start date with optional end date.
    pub async fn get_availability(
        &self,
        center_id: &str,
        query: &AvailabilityQuery,
        auth_token: &str,
    ) -> Result<Vec<DoctorAvailability>, CalendarError> {
        let first = query.start_date.as_deref().map(parse_day).transpose()?;
        let last = match first {
            Some(_) => query.end_date.as_deref().map(parse_day).transpose()?,
            None => None,
        };
        self.fetch_range(center_id, query.doctor_id.as_deref(), first, last, auth_token)
            .await
    }

    pub async fn get_month_range(
        &self,
        center_id: &str,
        query: &AvailabilityQuery,
        auth_token: &str,
    ) -> Result<Vec<DoctorAvailability>, CalendarError> {
        let message = "Start date and end date are required";
        let first = parse_day(require(&query.start_date, message)?)?;
        let last = parse_day(require(&query.end_date, message)?)?;
        self.fetch_range(center_id, query.doctor_id.as_deref(), Some(first), Some(last), auth_token)
            .await
    }

    pub async fn find_day(
        &self,
        doctor_id: &str,
        center_id: &str,
        day: NaiveDate,
        auth_token: &str,
    ) -> Result<Option<DoctorAvailability>, CalendarError> {
        let records = self
            .fetch_range(center_id, Some(doctor_id), Some(day), Some(day), auth_token)
            .await?;
        Ok(records.into_iter().next())
    }

    // ==========================================================================
    // WRITES
    // ==========================================================================

    /// Applies `fields` to every planned day: existing rows are upserted on their
    /// id, new days are inserted. Returns the number of rows written.
    async fn write_plan(
        &self,
        doctor_id: &str,
        center_id: &str,
        plan: &UpsertPlan,
        fields: &Map<String, Value>,
        auth_token: &str,
    ) -> Result<usize, CalendarError> {
        let row_for = |day: NaiveDate, id: Option<&str>| {
            let mut row = fields.clone();
            if let Some(id) = id {
                row.insert("id".into(), json!(id));
            }
            row.insert("doctor_id".into(), json!(doctor_id));
            row.insert("center_id".into(), json!(center_id));
            row.insert("date".into(), json!(encode_day(day)));
            row.insert("updated_at".into(), json!(Utc::now().to_rfc3339()));
            Value::Object(row)
        };

        let mut written = 0;
        if !plan.updates.is_empty() {
            let rows: Vec<Value> = plan
                .updates
                .iter()
                .map(|(id, day)| row_for(*day, Some(id)))
                .collect();
            let result: Vec<Value> = self
                .supabase
                .request_with_headers(
                    Method::POST,
                    "/rest/v1/doctor_availability",
                    Some(auth_token),
                    Some(Value::Array(rows)),
                    Some(upsert_headers()),
                )
                .await?;
            written += result.len();
        }
        if !plan.inserts.is_empty() {
            let rows: Vec<Value> = plan.inserts.iter().map(|day| row_for(*day, None)).collect();
            let result: Vec<Value> = self
                .supabase
                .request_with_headers(
                    Method::POST,
                    "/rest/v1/doctor_availability",
                    Some(auth_token),
                    Some(Value::Array(rows)),
                    Some(representation_headers()),
                )
                .await?;
            written += result.len();
        }
        Ok(written)
    }

    /// Upsert for one doctor and day. A holiday forces the day closed and clears
    /// its hours; an open day with hours regenerates that day's slots.
    pub async fn set_availability(
        &self,
        center_id: &str,
        user_id: &str,
        request: &SetAvailabilityRequest,
        auth_token: &str,
    ) -> Result<AvailabilityUpdate, CalendarError> {
        let message = "Doctor ID and date are required";
        let doctor_id = require(&request.doctor_id, message)?;
        let day = parse_day(require(&request.date, message)?)?;

        let is_holiday = request.is_holiday.unwrap_or(false);
        let (fields, hours) = if is_holiday {
            let name = request.holiday_name.as_deref().unwrap_or_default();
            let mut fields = holiday_fields(name, user_id);
            fields.insert("notes".into(), json!(request.notes.as_deref().unwrap_or_default()));
            fields.insert("max_appointments".into(), json!(max_appointments(request.max_appointments)));
            (fields, None)
        } else {
            let hours = WorkingHours::parse_optional(
                request.start_time.as_deref(),
                request.end_time.as_deref(),
                request.break_start_time.as_deref(),
                request.break_end_time.as_deref(),
            )?;
            let is_available = request.is_available.unwrap_or(true);
            let fields = hours_fields(
                is_available,
                hours.as_ref(),
                request.notes.as_deref(),
                max_appointments(request.max_appointments),
                user_id,
            );
            (fields, hours.filter(|_| is_available))
        };
        let duration = match hours {
            Some(_) => slot_duration(request.slot_duration, self.default_duration)?,
            None => self.default_duration,
        };

        let doctor = self.verify_doctor(doctor_id, center_id, auth_token).await?;
        let existing = self.find_day(doctor_id, center_id, day, auth_token).await?;

        let mut body = fields;
        body.insert("doctor_id".into(), json!(doctor_id));
        body.insert("center_id".into(), json!(center_id));
        body.insert("date".into(), json!(encode_day(day)));
        body.insert("updated_at".into(), json!(Utc::now().to_rfc3339()));

        let (method, path) = match &existing {
            Some(record) => (
                Method::PATCH,
                format!("/rest/v1/doctor_availability?id=eq.{}", record.id),
            ),
            None => (Method::POST, "/rest/v1/doctor_availability".to_string()),
        };
        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(
                method,
                &path,
                Some(auth_token),
                Some(Value::Object(body)),
                Some(representation_headers()),
            )
            .await?;
        let row = rows.into_iter().next().ok_or_else(|| {
            CalendarError::Database(anyhow::anyhow!("Availability write returned no row"))
        })?;
        let mut availability: DoctorAvailability =
            serde_json::from_value(row).map_err(|e| CalendarError::Database(e.into()))?;
        availability.doctor = Some(doctor);

        let slots = match hours {
            Some(hours) => match self
                .generator
                .regenerate(doctor_id, center_id, day, &hours, duration, user_id, auth_token)
                .await
            {
                Ok(result) => Some(result),
                Err(e) => {
                    warn!("Availability saved but slots for doctor {} on {} were not generated: {}", doctor_id, day, e);
                    None
                }
            },
            None => None,
        };

        info!("Availability for doctor {} on {} saved", doctor_id, day);
        Ok(AvailabilityUpdate { availability, slots })
    }

    /// Every Sunday of the year becomes a holiday named "Sunday".
    pub async fn mark_sundays(
        &self,
        center_id: &str,
        user_id: &str,
        request: &MarkSundaysRequest,
        auth_token: &str,
    ) -> Result<usize, CalendarError> {
        let message = "Doctor ID and year are required";
        let doctor_id = require(&request.doctor_id, message)?;
        let year = request
            .year
            .ok_or_else(|| CalendarError::MissingFields(message.to_string()))?;
        let sundays = sundays_in_year(year)?;
        let (first, last) = year_span(year)?;

        self.verify_doctor(doctor_id, center_id, auth_token).await?;
        let existing = self
            .fetch_range(center_id, Some(doctor_id), Some(first), Some(last), auth_token)
            .await?;

        let plan = plan_upserts(&existing, &sundays);
        self.write_plan(doctor_id, center_id, &plan, &holiday_fields("Sunday", user_id), auth_token)
            .await?;

        info!("Marked {} Sundays of {} as holidays for doctor {}", sundays.len(), year, doctor_id);
        Ok(sundays.len())
    }

    pub async fn bulk_holidays(
        &self,
        center_id: &str,
        user_id: &str,
        request: &BulkHolidaysRequest,
        auth_token: &str,
    ) -> Result<usize, CalendarError> {
        let doctor_id = require(&request.doctor_id, "Doctor ID and dates array are required")?;
        let days = parse_days(&request.dates)?;
        let holiday_name = require(&request.holiday_name, "Holiday name is required")?;

        self.verify_doctor(doctor_id, center_id, auth_token).await?;
        let existing = self
            .fetch_range(center_id, Some(doctor_id), days.first().copied(), days.last().copied(), auth_token)
            .await?;

        let plan = plan_upserts(&existing, &days);
        self.write_plan(doctor_id, center_id, &plan, &holiday_fields(holiday_name, user_id), auth_token)
            .await?;

        Ok(days.len())
    }

    /// Same hours (or the same day off) for many dates. Slots are generated in
    /// the background when the days are open with hours.
    pub async fn bulk_availability(
        &self,
        center_id: &str,
        user_id: &str,
        request: &BulkAvailabilityRequest,
        auth_token: &str,
    ) -> Result<BulkWrite, CalendarError> {
        let doctor_id = require(&request.doctor_id, "Doctor ID and dates array are required")?;
        let days = parse_days(&request.dates)?;
        let is_available = request.is_available.unwrap_or(true);
        let hours = WorkingHours::parse_optional(
            request.start_time.as_deref(),
            request.end_time.as_deref(),
            request.break_start_time.as_deref(),
            request.break_end_time.as_deref(),
        )?;
        let duration = slot_duration(request.slot_duration, self.default_duration)?;

        self.verify_doctor(doctor_id, center_id, auth_token).await?;
        let existing = self
            .fetch_range(center_id, Some(doctor_id), days.first().copied(), days.last().copied(), auth_token)
            .await?;

        let fields = hours_fields(
            is_available,
            hours.as_ref(),
            request.notes.as_deref(),
            max_appointments(request.max_appointments),
            user_id,
        );
        let plan = plan_upserts(&existing, &days);
        self.write_plan(doctor_id, center_id, &plan, &fields, auth_token).await?;

        let generation = hours.filter(|_| is_available).map(|hours| {
            self.generator.spawn_bulk(BulkGenerationJob {
                doctor_id: doctor_id.to_string(),
                center_id: center_id.to_string(),
                days: days.clone(),
                hours,
                duration,
                created_by: user_id.to_string(),
                auth_token: auth_token.to_string(),
            })
        });

        Ok(BulkWrite {
            count: days.len(),
            skipped: 0,
            generation,
        })
    }

    /// Standard hours for every non-Sunday of the year. Without
    /// `override_existing`, holidays, days off and days with other explicit
    /// hours are left as they are.
    pub async fn set_default_working_hours(
        &self,
        center_id: &str,
        user_id: &str,
        request: &DefaultWorkingHoursRequest,
        auth_token: &str,
    ) -> Result<BulkWrite, CalendarError> {
        let message = "Doctor ID, year, start time and end time are required";
        let doctor_id = require(&request.doctor_id, message)?;
        let year = request
            .year
            .ok_or_else(|| CalendarError::MissingFields(message.to_string()))?;
        let hours = WorkingHours::parse(
            require(&request.start_time, message)?,
            require(&request.end_time, message)?,
            request.break_start_time.as_deref(),
            request.break_end_time.as_deref(),
        )?;
        let duration = slot_duration(request.slot_duration, self.default_duration)?;
        let (first, last) = year_span(year)?;

        self.verify_doctor(doctor_id, center_id, auth_token).await?;
        let existing = self
            .fetch_range(center_id, Some(doctor_id), Some(first), Some(last), auth_token)
            .await?;
        let by_day = index_by_day(&existing);

        let candidates = working_days_in_year(year)?;
        let total = candidates.len();
        let days: Vec<NaiveDate> = candidates
            .into_iter()
            .filter(|day| accepts_default_hours(by_day.get(day).copied(), &hours, request.override_existing))
            .collect();
        let outcome = DefaultHoursOutcome {
            applied: days.len(),
            skipped: total - days.len(),
        };
        if outcome.skipped > 0 {
            debug!("Keeping {} explicitly configured days for doctor {}", outcome.skipped, doctor_id);
        }

        let fields = hours_fields(
            true,
            Some(&hours),
            None,
            max_appointments(request.max_appointments),
            user_id,
        );
        let plan = plan_upserts(&existing, &days);
        self.write_plan(doctor_id, center_id, &plan, &fields, auth_token).await?;

        let generation = if days.is_empty() {
            warn!("No days left to apply default hours for doctor {} in {}", doctor_id, year);
            None
        } else {
            Some(self.generator.spawn_bulk(BulkGenerationJob {
                doctor_id: doctor_id.to_string(),
                center_id: center_id.to_string(),
                days,
                hours,
                duration,
                created_by: user_id.to_string(),
                auth_token: auth_token.to_string(),
            }))
        };

        info!(
            "Default hours for doctor {} in {}: {} applied, {} kept",
            doctor_id, year, outcome.applied, outcome.skipped
        );
        Ok(BulkWrite {
            count: outcome.applied,
            skipped: outcome.skipped,
            generation,
        })
    }

    /// Explicit regeneration for one day. The doctor must be open that day;
    /// hours come from the request or, when omitted, from the stored record.
    pub async fn create_slots(
        &self,
        center_id: &str,
        user_id: &str,
        request: &CreateSlotsRequest,
        auth_token: &str,
    ) -> Result<SlotGenerationResult, CalendarError> {
        let message = "Doctor ID and date are required";
        let doctor_id = require(&request.doctor_id, message)?;
        let day = parse_day(require(&request.date, message)?)?;
        let requested = WorkingHours::parse_optional(
            request.start_time.as_deref(),
            request.end_time.as_deref(),
            request.break_start_time.as_deref(),
            request.break_end_time.as_deref(),
        )?;
        let duration = slot_duration(request.slot_duration, self.default_duration)?;

        self.verify_doctor(doctor_id, center_id, auth_token).await?;
        let record = self
            .find_day(doctor_id, center_id, day, auth_token)
            .await?
            .filter(|record| record.is_available && !record.is_holiday)
            .ok_or(CalendarError::DoctorUnavailable)?;

        let hours = match requested {
            Some(hours) => hours,
            None => WorkingHours::from_availability(&record)?.ok_or_else(|| {
                CalendarError::MissingFields("Start time and end time are required".to_string())
            })?,
        };

        self.generator
            .regenerate(doctor_id, center_id, day, &hours, duration, user_id, auth_token)
            .await
    }
}
