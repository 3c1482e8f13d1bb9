// libs/billing-cell/src/services/sources.rs
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::Result;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use shared_database::supabase::{encode_timestamp, in_list, SupabaseClient};

use crate::models::{
    CenterScope, DateWindow, PatientRecord, PaymentLogRecord, SlitTherapyRecord,
    TestRequestRecord, UserRecord,
};

const PATIENT_SELECT: &str = "id,name,uh_id,center_id,created_at,billing,reassigned_billing,\
assigned_doctor:assigned_doctor_id(id,name),current_doctor:current_doctor_id(id,name)";
const TEST_REQUEST_SELECT: &str = "id,center_id,patient_id,patient_name,doctor_name,created_at,billing,\
patient:patient_id(id,name,uh_id),doctor:doctor_id(id,name)";
const SLIT_SELECT: &str = "id,center_id,patient_id,patient_name,product_code,product_name,created_by,created_at,billing,\
patient:patient_id(id,name,uh_id)";
const PAYMENT_LOG_SELECT: &str = "*,patient:patient_id(id,name,uh_id)";

/// Values per `in.(..)` filter; keeps lookup URLs under server limits.
pub const IN_FILTER_CHUNK: usize = 100;

/// Which timestamps qualify a lab order for a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabDateMatch {
    /// Created in the window, or refunded in it.
    CreatedOrRefunded,
    CreatedOnly,
}

/// Read-only access to the billing collections.
#[derive(Clone)]
pub struct BillingSourceClient {
    supabase: Arc<SupabaseClient>,
}

impl BillingSourceClient {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// Rows that fail to decode are logged and dropped; the rest are kept.
    async fn get_rows<T: DeserializeOwned>(&self, path: &str, auth_token: &str) -> Result<Vec<T>> {
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, path, Some(auth_token), None)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.get("id").cloned().unwrap_or(Value::Null);
                match serde_json::from_value(row) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        warn!("Skipping malformed row {} from {}: {}", id, table_of(path), e);
                        None
                    }
                }
            })
            .collect())
    }

    pub async fn fetch_patients(&self, scope: &CenterScope, auth_token: &str) -> Result<Vec<PatientRecord>> {
        debug!("Fetching patients for {:?}", scope);
        let path = build_path("patients", PATIENT_SELECT, &[scope.filter()]);
        self.get_rows(&path, auth_token).await
    }

    pub async fn fetch_test_requests(
        &self,
        scope: &CenterScope,
        window: &DateWindow,
        date_match: LabDateMatch,
        auth_token: &str,
    ) -> Result<Vec<TestRequestRecord>> {
        debug!("Fetching test requests for {:?} ({:?})", scope, date_match);
        let date_filter = match date_match {
            LabDateMatch::CreatedOrRefunded => window_or(&["created_at", "billing->>refunded_at"], window),
            LabDateMatch::CreatedOnly => range_filters("created_at", window),
        };
        let path = build_path(
            "test_requests",
            TEST_REQUEST_SELECT,
            &[scope.filter(), date_filter],
        );
        self.get_rows(&path, auth_token).await
    }

    pub async fn fetch_slit_requests(
        &self,
        scope: &CenterScope,
        window: &DateWindow,
        auth_token: &str,
    ) -> Result<Vec<SlitTherapyRecord>> {
        debug!("Fetching SLIT therapy requests for {:?}", scope);
        let date_filter = window_or(
            &["created_at", "billing->>refunded_at", "billing->>generated_at"],
            window,
        );
        let path = build_path(
            "slit_therapy_requests",
            SLIT_SELECT,
            &[scope.filter(), date_filter],
        );
        self.get_rows(&path, auth_token).await
    }

    /// Ledger rows in scope and window, newest first.
    pub async fn fetch_payment_logs(
        &self,
        scope: &CenterScope,
        window: &DateWindow,
        auth_token: &str,
    ) -> Result<Vec<PaymentLogRecord>> {
        debug!("Fetching payment logs for {:?}", scope);
        let path = build_path(
            "payment_logs",
            PAYMENT_LOG_SELECT,
            &[
                scope.filter(),
                range_filters("created_at", window),
                "order=created_at.desc".to_string(),
            ],
        );
        self.get_rows(&path, auth_token).await
    }

    /// Ledger rows whose `column` is one of `values`, regardless of date.
    pub async fn fetch_logs_matching<I, S>(
        &self,
        scope: &CenterScope,
        column: &str,
        values: I,
        auth_token: &str,
    ) -> Result<Vec<PaymentLogRecord>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let values: Vec<S> = values.into_iter().collect();
        if values.is_empty() {
            return Ok(Vec::new());
        }
        debug!("Fetching payment logs by {} ({} values)", column, values.len());

        let mut logs: Vec<PaymentLogRecord> = Vec::new();
        for chunk in values.chunks(IN_FILTER_CHUNK) {
            let path = build_path(
                "payment_logs",
                PAYMENT_LOG_SELECT,
                &[
                    scope.filter(),
                    format!("{}={}", column, in_list(chunk)),
                    "order=created_at.desc".to_string(),
                ],
            );
            logs.extend(self.get_rows::<PaymentLogRecord>(&path, auth_token).await?);
        }
        if values.len() > IN_FILTER_CHUNK {
            logs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        }
        Ok(logs)
    }

    /// One batch lookup for every id; display name falls back to the username.
    pub async fn fetch_user_names(
        &self,
        ids: &BTreeSet<String>,
        auth_token: &str,
    ) -> Result<HashMap<String, String>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        debug!("Resolving {} user names", ids.len());

        let ids: Vec<&String> = ids.iter().collect();
        let mut users: Vec<UserRecord> = Vec::new();
        for chunk in ids.chunks(IN_FILTER_CHUNK) {
            let path = build_path("users", "id,name,username", &[format!("id={}", in_list(chunk))]);
            users.extend(self.get_rows::<UserRecord>(&path, auth_token).await?);
        }

        Ok(users
            .into_iter()
            .filter_map(|user| {
                let name = user
                    .name
                    .filter(|n| !n.trim().is_empty())
                    .or(user.username)?;
                Some((user.id, name))
            })
            .collect())
    }
}

fn table_of(path: &str) -> &str {
    path.trim_start_matches("/rest/v1/")
        .split('?')
        .next()
        .unwrap_or(path)
}

pub fn build_path(table: &str, select: &str, filters: &[String]) -> String {
    let mut path = format!("/rest/v1/{}?select={}", table, select);
    for filter in filters.iter().filter(|f| !f.is_empty()) {
        path.push('&');
        path.push_str(filter);
    }
    path
}

/// `col=gte.start&col=lte.end`, either bound optional.
pub fn range_filters(column: &str, window: &DateWindow) -> String {
    let mut parts = Vec::new();
    if let Some(start) = window.start {
        parts.push(format!("{}=gte.{}", column, encode_timestamp(&start)));
    }
    if let Some(end) = window.end {
        parts.push(format!("{}=lte.{}", column, encode_timestamp(&end)));
    }
    parts.join("&")
}

/// `or=(and(a.gte.s,a.lte.e),and(b.gte.s,b.lte.e))`: any column inside the window.
pub fn window_or(columns: &[&str], window: &DateWindow) -> String {
    if !window.is_bounded() {
        return String::new();
    }
    let clauses: Vec<String> = columns
        .iter()
        .map(|column| {
            let mut bounds = Vec::new();
            if let Some(start) = window.start {
                bounds.push(format!("{}.gte.{}", column, encode_timestamp(&start)));
            }
            if let Some(end) = window.end {
                bounds.push(format!("{}.lte.{}", column, encode_timestamp(&end)));
            }
            format!("and({})", bounds.join(","))
        })
        .collect();
    format!("or=({})", clauses.join(","))
}
