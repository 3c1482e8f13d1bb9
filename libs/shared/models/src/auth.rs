use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtHeader {
    pub alg: String,
    pub typ: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub app_metadata: Option<Value>,
    pub user_metadata: Option<Value>,
    pub aud: Option<String>,
    pub iat: Option<u64>,
}

impl JwtClaims {
    /// Center assignment lives in `app_metadata`; older tokens carry it in `user_metadata`.
    pub fn center_id(&self) -> Option<String> {
        [&self.app_metadata, &self.user_metadata]
            .into_iter()
            .flatten()
            .find_map(|meta| meta.get("center_id").and_then(Value::as_str))
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    }

    /// Application role, preferring `app_metadata.role` over the Postgres role claim.
    pub fn app_role(&self) -> Option<String> {
        self.app_metadata
            .as_ref()
            .and_then(|meta| meta.get("role"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| self.role.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub center_id: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn role(&self) -> Role {
        self.role.as_deref().map(Role::from_claim).unwrap_or(Role::Unknown)
    }

    pub fn has_any_role(&self, allowed: &[Role]) -> bool {
        allowed.contains(&self.role())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Superadmin,
    Centeradmin,
    Accountant,
    Doctor,
    Receptionist,
    LabStaff,
    Patient,
    Unknown,
}

impl Role {
    pub fn from_claim(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "superadmin" | "super_admin" => Role::Superadmin,
            "centeradmin" | "center_admin" => Role::Centeradmin,
            "accountant" => Role::Accountant,
            "doctor" => Role::Doctor,
            "receptionist" => Role::Receptionist,
            "lab_staff" | "labstaff" => Role::LabStaff,
            "patient" => Role::Patient,
            _ => Role::Unknown,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Role::Superadmin => "superadmin",
            Role::Centeradmin => "centeradmin",
            Role::Accountant => "accountant",
            Role::Doctor => "doctor",
            Role::Receptionist => "receptionist",
            Role::LabStaff => "lab_staff",
            Role::Patient => "patient",
            Role::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub valid: bool,
    pub user_id: String,
    pub email: Option<String>,
    pub role: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(app: Option<Value>, user: Option<Value>) -> JwtClaims {
        JwtClaims {
            sub: "u1".to_string(),
            exp: None,
            email: None,
            role: Some("authenticated".to_string()),
            app_metadata: app,
            user_metadata: user,
            aud: None,
            iat: None,
        }
    }

    #[test]
    fn center_id_prefers_app_metadata() {
        let c = claims(
            Some(json!({"center_id": "c-app"})),
            Some(json!({"center_id": "c-user"})),
        );
        assert_eq!(c.center_id().as_deref(), Some("c-app"));

        let c = claims(Some(json!({})), Some(json!({"center_id": "c-user"})));
        assert_eq!(c.center_id().as_deref(), Some("c-user"));

        let c = claims(Some(json!({"center_id": ""})), None);
        assert_eq!(c.center_id(), None);
    }

    #[test]
    fn app_role_overrides_postgres_role() {
        let c = claims(Some(json!({"role": "accountant"})), None);
        assert_eq!(c.app_role().as_deref(), Some("accountant"));
        assert_eq!(claims(None, None).app_role().as_deref(), Some("authenticated"));
    }

    #[test]
    fn role_parsing_accepts_common_spellings() {
        assert_eq!(Role::from_claim("CenterAdmin"), Role::Centeradmin);
        assert_eq!(Role::from_claim("lab-staff"), Role::LabStaff);
        assert_eq!(Role::from_claim("super_admin"), Role::Superadmin);
        assert_eq!(Role::from_claim("janitor"), Role::Unknown);
    }
}
