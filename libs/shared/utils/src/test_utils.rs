use std::sync::Arc;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use base64::{Engine as _, engine::general_purpose};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
        }
    }
}

impl TestConfig {
    pub fn with_supabase_url(url: &str) -> Self {
        Self {
            supabase_url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            app_env: "test".to_string(),
            server_port: 3000,
            default_page_limit: 50,
            slot_generation_batch_size: 50,
            default_slot_duration: 30,
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
    pub center_id: Option<String>,
}

impl Default for TestUser {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: "test@example.com".to_string(),
            role: "receptionist".to_string(),
            center_id: Some(Uuid::new_v4().to_string()),
        }
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
            center_id: Some(Uuid::new_v4().to_string()),
        }
    }

    pub fn superadmin(email: &str) -> Self {
        Self {
            center_id: None,
            ..Self::new(email, "superadmin")
        }
    }

    pub fn centeradmin(email: &str) -> Self {
        Self::new(email, "centeradmin")
    }

    pub fn accountant(email: &str) -> Self {
        Self::new(email, "accountant")
    }

    pub fn receptionist(email: &str) -> Self {
        Self::new(email, "receptionist")
    }

    pub fn doctor(email: &str) -> Self {
        Self::new(email, "doctor")
    }

    pub fn with_center(mut self, center_id: &str) -> Self {
        self.center_id = Some(center_id.to_string());
        self
    }

    pub fn without_center(mut self) -> Self {
        self.center_id = None;
        self
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            center_id: self.center_id.clone(),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        let mut app_metadata = json!({ "role": user.role });
        if let Some(center_id) = &user.center_id {
            app_metadata["center_id"] = json!(center_id);
        }

        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": "authenticated",
            "app_metadata": app_metadata,
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);

        format!("{}.{}", signing_input, signature_encoded)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }
}

/// Canned PostgREST rows shaped like the clinic tables.
pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    pub fn user_response(user_id: &str, name: &str, role: &str, center_id: &str) -> Value {
        json!({
            "id": user_id,
            "name": name,
            "username": name.to_lowercase().replace(' ', "."),
            "email": format!("{}@example.com", name.to_lowercase().replace(' ', ".")),
            "role": role,
            "center_id": center_id
        })
    }

    pub fn patient_response(patient_id: &str, name: &str, uh_id: &str, center_id: &str) -> Value {
        json!({
            "id": patient_id,
            "name": name,
            "uh_id": uh_id,
            "center_id": center_id,
            "created_at": "2024-01-01T00:00:00Z",
            "assigned_doctor": { "name": "Dr. Rao" },
            "current_doctor": null,
            "billing": [],
            "reassigned_billing": []
        })
    }

    pub fn consultation_bill(invoice_number: Option<&str>, amount: f64, paid: f64, status: &str, created_at: &str) -> Value {
        json!({
            "id": Uuid::new_v4().to_string(),
            "type": "consultation",
            "description": "Consultation fee",
            "amount": amount,
            "paid_amount": paid,
            "status": status,
            "invoice_number": invoice_number,
            "consultation_type": "OP",
            "created_at": created_at
        })
    }

    pub fn slot_response(slot_id: &str, doctor_id: &str, center_id: &str, start: &str, end: &str, booked: bool) -> Value {
        json!({
            "id": slot_id,
            "doctor_id": doctor_id,
            "center_id": center_id,
            "date": "2024-03-04T00:00:00Z",
            "start_time": start,
            "end_time": end,
            "duration": 30,
            "is_booked": booked,
            "status": if booked { "booked" } else { "available" },
            "patient_id": null,
            "patient_appointment_id": null,
            "booked_by": null,
            "booked_at": null,
            "notes": null
        })
    }

    pub fn error_response(message: &str, code: &str) -> Value {
        json!({
            "message": message,
            "code": code
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_creation() {
        let config = TestConfig::default();
        let app_config = config.to_app_config();

        assert_eq!(app_config.supabase_url, "http://localhost:54321");
        assert_eq!(app_config.supabase_anon_key, "test-anon-key");
        assert!(!app_config.supabase_jwt_secret.is_empty());
        assert!(!app_config.is_production());
    }

    #[test]
    fn test_user_creation() {
        let user = TestUser::accountant("acc@example.com").with_center("c-1");
        assert_eq!(user.role, "accountant");

        let user_model = user.to_user();
        assert_eq!(user_model.center_id.as_deref(), Some("c-1"));
        assert_eq!(user_model.id, user.id);

        assert!(TestUser::superadmin("root@example.com").center_id.is_none());
    }

    #[test]
    fn test_jwt_token_creation() {
        let user = TestUser::default();
        let token = JwtTestUtils::create_test_token(&user, "test-secret", Some(1));

        assert_eq!(token.split('.').count(), 3);
    }
}
