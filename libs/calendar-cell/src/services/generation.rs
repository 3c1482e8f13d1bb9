// libs/calendar-cell/src/services/generation.rs
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use reqwest::Method;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use shared_config::AppConfig;
use shared_database::supabase::{representation_headers, SupabaseClient};

use crate::models::{
    AppointmentSlot, BulkGenerationReport, CalendarError, DayAppointments, DoctorDay, NewSlot,
    SlotGenerationResult, SlotStatus,
};
use crate::services::slots::{
    count_slots, day_filter, days_filter, encode_day, plan_slots, WorkingHours,
};

const SLOT_DETAIL_SELECT: &str = "*,patient:patient_id(id,name,uh_id,phone),\
patient_appointment:patient_appointment_id(id,patient_name,confirmation_code,status),\
booked_by_user:booked_by(id,name)";
const DAY_DETAIL_SELECT: &str = "*,doctor:doctor_id(id,name,email,qualification),\
patient:patient_id(id,name,uh_id,phone,age,gender),\
patient_appointment:patient_appointment_id(id,patient_name,confirmation_code,status,preferred_date,preferred_time),\
booked_by_user:booked_by(id,name)";

/// Everything a detached regeneration run needs, owned.
#[derive(Debug, Clone)]
pub struct BulkGenerationJob {
    pub doctor_id: String,
    pub center_id: String,
    pub days: Vec<NaiveDate>,
    pub hours: WorkingHours,
    pub duration: u32,
    pub created_by: String,
    pub auth_token: String,
}

#[derive(Clone)]
pub struct SlotGenerator {
    supabase: Arc<SupabaseClient>,
    batch_size: usize,
}

impl SlotGenerator {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_client(Arc::new(SupabaseClient::new(config)), config)
    }

    pub fn with_client(supabase: Arc<SupabaseClient>, config: &AppConfig) -> Self {
        Self {
            supabase,
            batch_size: config.slot_generation_batch_size.max(1),
        }
    }

    fn slots_path(doctor_id: Option<&str>, center_id: &str, days: &[NaiveDate], extra: &str) -> String {
        let span = match days {
            [day] => day_filter("date", *day),
            _ => days_filter("date", days),
        };
        let mut path = format!("/rest/v1/appointment_slots?center_id=eq.{}&{}", center_id, span);
        if let Some(doctor_id) = doctor_id {
            path.push_str(&format!("&doctor_id=eq.{}", doctor_id));
        }
        if !extra.is_empty() {
            path.push('&');
            path.push_str(extra);
        }
        path
    }

    async fn fetch_slots(&self, path: &str, auth_token: &str) -> Result<Vec<AppointmentSlot>, CalendarError> {
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, path, Some(auth_token), None)
            .await?;
        rows.into_iter()
            .map(|row| serde_json::from_value(row).map_err(|e| CalendarError::Database(e.into())))
            .collect()
    }

    /// Removes the unbooked slots of `days`; booked ones are never touched.
    pub async fn delete_unbooked_days(
        &self,
        doctor_id: &str,
        center_id: &str,
        days: &[NaiveDate],
        auth_token: &str,
    ) -> Result<usize, CalendarError> {
        let path = Self::slots_path(Some(doctor_id), center_id, days, "is_booked=eq.false");
        let deleted: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::DELETE,
                &path,
                Some(auth_token),
                None,
                Some(representation_headers()),
            )
            .await?;
        debug!(
            "Deleted {} unbooked slots for doctor {} over {} dates",
            deleted.len(),
            doctor_id,
            days.len()
        );
        Ok(deleted.len())
    }

    pub async fn delete_unbooked(
        &self,
        doctor_id: &str,
        center_id: &str,
        day: NaiveDate,
        auth_token: &str,
    ) -> Result<usize, CalendarError> {
        self.delete_unbooked_days(doctor_id, center_id, &[day], auth_token)
            .await
    }

    /// Booked slots of `days`, keyed by calendar day.
    pub async fn booked_slots(
        &self,
        doctor_id: &str,
        center_id: &str,
        days: &[NaiveDate],
        auth_token: &str,
    ) -> Result<BTreeMap<NaiveDate, Vec<AppointmentSlot>>, CalendarError> {
        let path = Self::slots_path(
            Some(doctor_id),
            center_id,
            days,
            "is_booked=eq.true&select=*&order=start_time.asc",
        );
        let mut by_day: BTreeMap<NaiveDate, Vec<AppointmentSlot>> = BTreeMap::new();
        for slot in self.fetch_slots(&path, auth_token).await? {
            by_day.entry(slot.date.date_naive()).or_default().push(slot);
        }
        Ok(by_day)
    }

    /// Rebuilds the open slots of every day in `days` from `hours` with one
    /// delete, one read and one insert. Running it twice with the same hours
    /// yields the same slot set.
    #[allow(clippy::too_many_arguments)]
    pub async fn regenerate_days(
        &self,
        doctor_id: &str,
        center_id: &str,
        days: &[NaiveDate],
        hours: &WorkingHours,
        duration: u32,
        created_by: &str,
        auth_token: &str,
    ) -> Result<SlotGenerationResult, CalendarError> {
        let mut result = SlotGenerationResult::default();
        if days.is_empty() {
            return Ok(result);
        }
        debug!("Regenerating slots for doctor {} over {} dates", doctor_id, days.len());

        self.delete_unbooked_days(doctor_id, center_id, days, auth_token)
            .await?;
        let booked = self
            .booked_slots(doctor_id, center_id, days, auth_token)
            .await?;

        let mut rows: Vec<NewSlot> = Vec::new();
        for day in days {
            let plan = plan_slots(hours, duration, booked.get(day).map_or(&[][..], Vec::as_slice));
            result.preserved += plan.preserved;
            let date = encode_day(*day);
            rows.extend(plan.to_create.into_iter().map(|(start_time, end_time)| NewSlot {
                doctor_id: doctor_id.to_string(),
                center_id: center_id.to_string(),
                date: date.clone(),
                start_time,
                end_time,
                duration,
                is_booked: false,
                status: SlotStatus::Available,
                created_by: created_by.to_string(),
            }));
        }
        result.created = rows.len();

        if !rows.is_empty() {
            let body = serde_json::to_value(&rows).map_err(|e| CalendarError::Database(e.into()))?;
            let _: Vec<Value> = self
                .supabase
                .request_with_headers(
                    Method::POST,
                    "/rest/v1/appointment_slots",
                    Some(auth_token),
                    Some(body),
                    Some(representation_headers()),
                )
                .await?;
        }

        info!(
            "Slots for doctor {} over {} dates: {} created, {} booked preserved",
            doctor_id,
            days.len(),
            result.created,
            result.preserved
        );
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn regenerate(
        &self,
        doctor_id: &str,
        center_id: &str,
        day: NaiveDate,
        hours: &WorkingHours,
        duration: u32,
        created_by: &str,
        auth_token: &str,
    ) -> Result<SlotGenerationResult, CalendarError> {
        self.regenerate_days(doctor_id, center_id, &[day], hours, duration, created_by, auth_token)
            .await
    }

    /// Runs regeneration for every day of `job` in the background, one batched
    /// round trip per chunk. A failing chunk is logged and skipped.
    pub fn spawn_bulk(&self, job: BulkGenerationJob) -> JoinHandle<BulkGenerationReport> {
        let generator = self.clone();
        tokio::spawn(async move {
            let mut report = BulkGenerationReport {
                dates: job.days.len(),
                ..Default::default()
            };
            for (index, batch) in job.days.chunks(generator.batch_size).enumerate() {
                match generator
                    .regenerate_days(
                        &job.doctor_id,
                        &job.center_id,
                        batch,
                        &job.hours,
                        job.duration,
                        &job.created_by,
                        &job.auth_token,
                    )
                    .await
                {
                    Ok(result) => report.created += result.created,
                    Err(e) => {
                        report.failed += batch.len();
                        warn!(
                            "Slot batch {} ({} dates) failed for doctor {}: {}",
                            index + 1,
                            batch.len(),
                            job.doctor_id,
                            e
                        );
                    }
                }
            }
            info!(
                "Background slot generation for doctor {} finished: {} dates, {} slots, {} failures",
                job.doctor_id, report.dates, report.created, report.failed
            );
            report
        })
    }

    pub async fn get_slots(
        &self,
        doctor_id: &str,
        center_id: &str,
        day: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<AppointmentSlot>, CalendarError> {
        let extra = format!("select={}&order=start_time.asc", SLOT_DETAIL_SELECT);
        let path = Self::slots_path(Some(doctor_id), center_id, &[day], &extra);
        self.fetch_slots(&path, auth_token).await
    }

    /// Booked slots of the day grouped by doctor, with per-doctor counts over all slots.
    pub async fn day_appointments(
        &self,
        center_id: &str,
        day: NaiveDate,
        auth_token: &str,
    ) -> Result<DayAppointments, CalendarError> {
        let booked_path = Self::slots_path(
            None,
            center_id,
            &[day],
            &format!("is_booked=eq.true&select={}&order=doctor_id.asc,start_time.asc", DAY_DETAIL_SELECT),
        );
        let booked = self.fetch_slots(&booked_path, auth_token).await?;

        let all_path = Self::slots_path(None, center_id, &[day], "select=*");
        let all = self.fetch_slots(&all_path, auth_token).await?;

        let mut appointments_by_doctor: BTreeMap<String, DoctorDay> = BTreeMap::new();
        for slot in booked {
            appointments_by_doctor
                .entry(slot.doctor_id.clone())
                .or_insert_with(|| DoctorDay {
                    doctor: slot.doctor.clone(),
                    appointments: Vec::new(),
                })
                .appointments
                .push(slot);
        }

        let mut by_doctor: BTreeMap<String, Vec<&AppointmentSlot>> = BTreeMap::new();
        for slot in &all {
            by_doctor.entry(slot.doctor_id.clone()).or_default().push(slot);
        }
        let doctor_stats = by_doctor
            .into_iter()
            .map(|(doctor_id, slots)| (doctor_id, count_slots(slots)))
            .collect();

        Ok(DayAppointments {
            date: day,
            appointments_by_doctor,
            doctor_stats,
        })
    }
}
