// libs/calendar-cell/src/services/booking.rs
use std::sync::Arc;

use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use shared_config::AppConfig;
use shared_database::supabase::{representation_headers, SupabaseClient};

use crate::models::{
    require, AppointmentSlot, BookSlotRequest, CalendarError, CancelSlotRequest,
    DeleteSlotsRequest, PatientAppointment, SlotStatus,
};
use crate::services::generation::SlotGenerator;
use crate::services::slots::{append_note, parse_day};

/// Result of a booking; the appointment is only present when one was linked
/// and its confirmation went through.
#[derive(Debug)]
pub struct Booking {
    pub slot: AppointmentSlot,
    pub appointment: Option<PatientAppointment>,
}

pub struct BookingService {
    supabase: Arc<SupabaseClient>,
    generator: SlotGenerator,
}

impl BookingService {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_client(Arc::new(SupabaseClient::new(config)), config)
    }

    pub fn with_client(supabase: Arc<SupabaseClient>, config: &AppConfig) -> Self {
        Self {
            generator: SlotGenerator::with_client(supabase.clone(), config),
            supabase,
        }
    }

    async fn patch_slot(
        &self,
        path: &str,
        body: Value,
        auth_token: &str,
    ) -> Result<Option<AppointmentSlot>, CalendarError> {
        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                path,
                Some(auth_token),
                Some(body),
                Some(representation_headers()),
            )
            .await?;
        rows.into_iter()
            .next()
            .map(|row| serde_json::from_value(row).map_err(|e| CalendarError::Database(e.into())))
            .transpose()
    }

    async fn verify_patient(&self, patient_id: &str, center_id: &str, auth_token: &str) -> Result<(), CalendarError> {
        let path = format!(
            "/rest/v1/patients?select=id&id=eq.{}&center_id=eq.{}",
            patient_id, center_id
        );
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;
        if rows.is_empty() {
            return Err(CalendarError::PatientNotFound);
        }
        Ok(())
    }

    async fn fetch_appointment(
        &self,
        appointment_id: &str,
        auth_token: &str,
    ) -> anyhow::Result<Option<PatientAppointment>> {
        let path = format!(
            "/rest/v1/patient_appointments?select=id,status,preferred_date,preferred_time,confirmed_date,confirmed_time&id=eq.{}",
            appointment_id
        );
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(serde_json::from_value(row)?)),
            None => Ok(None),
        }
    }

    async fn update_appointment(
        &self,
        appointment_id: &str,
        body: Value,
        auth_token: &str,
    ) -> anyhow::Result<Option<PatientAppointment>> {
        let path = format!("/rest/v1/patient_appointments?id=eq.{}", appointment_id);
        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(body),
                Some(representation_headers()),
            )
            .await?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(serde_json::from_value(row)?)),
            None => Ok(None),
        }
    }

    /// Marks the linked appointment confirmed at the slot's date and time.
    async fn confirm_appointment(
        &self,
        appointment_id: &str,
        slot: &AppointmentSlot,
        auth_token: &str,
    ) -> anyhow::Result<Option<PatientAppointment>> {
        let Some(appointment) = self.fetch_appointment(appointment_id, auth_token).await? else {
            return Ok(None);
        };
        let confirmed_date = slot.date.format("%Y-%m-%d").to_string();
        let confirmed_time = Some(slot.start_time.clone())
            .filter(|t| !t.is_empty())
            .or(appointment.preferred_time.clone());

        self.update_appointment(
            appointment_id,
            json!({
                "status": "confirmed",
                "confirmed_date": confirmed_date,
                "confirmed_time": confirmed_time,
                "updated_at": Utc::now().to_rfc3339(),
            }),
            auth_token,
        )
        .await
    }

    /// Books a slot with a single conditional update, so a slot taken by a
    /// concurrent request comes back empty instead of being overwritten.
    pub async fn book(
        &self,
        center_id: &str,
        user_id: &str,
        request: &BookSlotRequest,
        auth_token: &str,
    ) -> Result<Booking, CalendarError> {
        let message = "Slot ID and patient ID are required";
        let slot_id = require(&request.slot_id, message)?;
        let patient_id = require(&request.patient_id, message)?;
        let appointment_id = request
            .patient_appointment_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());

        debug!("Booking slot {} for patient {}", slot_id, patient_id);
        self.verify_patient(patient_id, center_id, auth_token).await?;

        let path = format!(
            "/rest/v1/appointment_slots?id=eq.{}&center_id=eq.{}&is_booked=eq.false&status=eq.{}",
            slot_id,
            center_id,
            SlotStatus::Available
        );
        let body = json!({
            "is_booked": true,
            "status": SlotStatus::Booked,
            "patient_id": patient_id,
            "patient_appointment_id": appointment_id,
            "booked_by": user_id,
            "booked_at": Utc::now().to_rfc3339(),
            "notes": request.notes.as_deref().unwrap_or_default(),
            "updated_at": Utc::now().to_rfc3339(),
        });
        let slot = self
            .patch_slot(&path, body, auth_token)
            .await?
            .ok_or(CalendarError::SlotUnavailable)?;

        let appointment = match appointment_id {
            Some(appointment_id) => match self.confirm_appointment(appointment_id, &slot, auth_token).await {
                Ok(appointment) => appointment,
                Err(e) => {
                    warn!("Slot {} booked but appointment {} was not confirmed: {}", slot.id, appointment_id, e);
                    None
                }
            },
            None => None,
        };

        info!("Slot {} booked for patient {}", slot.id, patient_id);
        Ok(Booking { slot, appointment })
    }

    /// Frees a booked slot and cancels the appointment it carried. The slot is
    /// released even when the appointment update fails.
    pub async fn cancel(
        &self,
        center_id: &str,
        request: &CancelSlotRequest,
        auth_token: &str,
    ) -> Result<AppointmentSlot, CalendarError> {
        let slot_id = require(&request.slot_id, "Slot ID is required")?;
        let reason = request
            .reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or("Cancelled by staff");

        let booked_filter = format!(
            "id=eq.{}&center_id=eq.{}&is_booked=eq.true&status=eq.{}",
            slot_id,
            center_id,
            SlotStatus::Booked
        );
        let rows: Vec<Value> = self
            .supabase
            .request(
                Method::GET,
                &format!("/rest/v1/appointment_slots?select=*&{}", booked_filter),
                Some(auth_token),
                None,
            )
            .await?;
        let current: AppointmentSlot = rows
            .into_iter()
            .next()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| CalendarError::Database(e.into()))?
            .ok_or(CalendarError::SlotNotBooked)?;

        let now = Utc::now();
        let notes = append_note(current.notes.as_deref(), &format!("Cancelled: {}", reason), now);
        let body = json!({
            "is_booked": false,
            "status": SlotStatus::Available,
            "patient_id": Value::Null,
            "patient_appointment_id": Value::Null,
            "booked_by": Value::Null,
            "booked_at": Value::Null,
            "notes": notes,
            "updated_at": now.to_rfc3339(),
        });
        // Release only the booking that was read; a rebook in between misses the filter.
        let release_filter = format!(
            "{}&{}&{}",
            booked_filter,
            same_link("patient_id", current.patient_id.as_deref()),
            same_link("patient_appointment_id", current.patient_appointment_id.as_deref())
        );
        let slot = self
            .patch_slot(&format!("/rest/v1/appointment_slots?{}", release_filter), body, auth_token)
            .await?
            .ok_or(CalendarError::SlotNotBooked)?;

        if let Some(appointment_id) = current.patient_appointment_id.as_deref() {
            let cascade = self
                .update_appointment(
                    appointment_id,
                    json!({
                        "status": "cancelled",
                        "cancellation_reason": reason,
                        "cancelled_at": now.to_rfc3339(),
                        "updated_at": now.to_rfc3339(),
                    }),
                    auth_token,
                )
                .await;
            if let Err(e) = cascade {
                warn!("Slot {} released but appointment {} was not cancelled: {}", slot.id, appointment_id, e);
            }
        }

        info!("Booking on slot {} cancelled", slot.id);
        Ok(slot)
    }

    /// Deletes the unbooked slots of one doctor's day.
    pub async fn delete_slots(
        &self,
        center_id: &str,
        request: &DeleteSlotsRequest,
        auth_token: &str,
    ) -> Result<usize, CalendarError> {
        let message = "Doctor ID and date are required";
        let doctor_id = require(&request.doctor_id, message)?;
        let day = parse_day(require(&request.date, message)?)?;
        self.generator
            .delete_unbooked(doctor_id, center_id, day, auth_token)
            .await
    }
}

fn same_link(column: &str, value: Option<&str>) -> String {
    match value {
        Some(id) => format!("{}=eq.{}", column, id),
        None => format!("{}=is.null", column),
    }
}
