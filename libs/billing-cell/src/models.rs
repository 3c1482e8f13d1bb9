// libs/billing-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

// ==============================================================================
// LENIENT FIELD DECODERS
// ==============================================================================

/// Billing JSON has gone through several schema revisions: amounts appear as
/// numbers, numeric strings or null.
pub fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_opt_f64(deserializer)?.unwrap_or(0.0))
}

pub fn lenient_opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Ids arrive either as plain strings or as embedded `{id, name}` objects.
pub fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Object(map)) => map
            .get("id")
            .or_else(|| map.get("_id"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    })
}

// ==============================================================================
// STATUS AND TYPE ENUMS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillStatus {
    Paid,
    PartiallyPaid,
    Pending,
    Cancelled,
    Refunded,
    Completed,
    Generated,
    PaymentPending,
    #[serde(other)]
    Unknown,
}

impl BillStatus {
    /// Display severity used when merging several bills into one invoice.
    /// Statuses outside the consultation ledger never override the merged value.
    pub fn severity(self) -> Option<u8> {
        match self {
            BillStatus::Paid => Some(0),
            BillStatus::PartiallyPaid => Some(1),
            BillStatus::Pending => Some(2),
            BillStatus::Cancelled => Some(3),
            BillStatus::Refunded => Some(4),
            _ => None,
        }
    }

    pub fn is_inactive(self) -> bool {
        matches!(self, BillStatus::Cancelled | BillStatus::Refunded)
    }

    /// Counted as realised revenue by the financial reports.
    pub fn is_settled(self) -> bool {
        matches!(self, BillStatus::Paid | BillStatus::Completed)
    }
}

impl fmt::Display for BillStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            BillStatus::Paid => "paid",
            BillStatus::PartiallyPaid => "partially_paid",
            BillStatus::Pending => "pending",
            BillStatus::Cancelled => "cancelled",
            BillStatus::Refunded => "refunded",
            BillStatus::Completed => "completed",
            BillStatus::Generated => "generated",
            BillStatus::PaymentPending => "payment_pending",
            BillStatus::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BillType {
    Consultation,
    Superconsultant,
    Reassignment,
    #[serde(rename = "Lab/Test")]
    LabTest,
    #[serde(rename = "Slit Therapy")]
    SlitTherapy,
}

/// `billType` query filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillTypeFilter {
    Consultation,
    Superconsultant,
    Reassignment,
    Lab,
    #[serde(alias = "Slit Therapy")]
    SlitTherapy,
}

impl BillTypeFilter {
    pub fn admits(self, bill_type: BillType) -> bool {
        matches!(
            (self, bill_type),
            (BillTypeFilter::Consultation, BillType::Consultation)
                | (BillTypeFilter::Superconsultant, BillType::Superconsultant)
                | (BillTypeFilter::Reassignment, BillType::Reassignment)
                | (BillTypeFilter::Lab, BillType::LabTest)
                | (BillTypeFilter::SlitTherapy, BillType::SlitTherapy)
        )
    }
}

// ==============================================================================
// SOURCE RECORDS (as stored)
// ==============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NamedRef {
    #[serde(deserialize_with = "lenient_id")]
    pub id: Option<String>,
    pub name: Option<String>,
    pub uh_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentHistoryEntry {
    #[serde(deserialize_with = "lenient_f64")]
    pub amount: f64,
    pub payment_method: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient_id")]
    pub processed_by: Option<String>,
    #[serde(deserialize_with = "lenient_id")]
    pub created_by: Option<String>,
    #[serde(skip_deserializing)]
    pub processed_by_name: Option<String>,
    pub transaction_id: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RefundEntry {
    #[serde(deserialize_with = "lenient_f64", alias = "refunded_amount")]
    pub amount: f64,
    pub reason: Option<String>,
    #[serde(alias = "refund_method")]
    pub method: Option<String>,
    #[serde(deserialize_with = "lenient_id")]
    pub refunded_by: Option<String>,
    #[serde(skip_deserializing)]
    pub refunded_by_name: Option<String>,
    #[serde(deserialize_with = "lenient_id")]
    pub approved_by: Option<String>,
    #[serde(skip_deserializing)]
    pub approved_by_name: Option<String>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub transaction_id: Option<String>,
    pub receipt_number: Option<String>,
    /// Set when the refund was attached from the payment ledger.
    #[serde(skip_deserializing)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomData {
    #[serde(deserialize_with = "lenient_opt_f64")]
    pub discount_amount: Option<f64>,
    #[serde(deserialize_with = "lenient_opt_f64")]
    pub discount: Option<f64>,
    #[serde(deserialize_with = "lenient_opt_f64")]
    pub discount_percentage: Option<f64>,
    pub discount_reason: Option<String>,
    pub discount_notes: Option<String>,
    #[serde(deserialize_with = "lenient_opt_f64")]
    pub tax_percentage: Option<f64>,
    #[serde(deserialize_with = "null_as_default")]
    pub services: Vec<ServiceLine>,
}

impl CustomData {
    pub fn discount_value(&self) -> f64 {
        self.discount_amount.or(self.discount).unwrap_or(0.0)
    }

    pub fn reason(&self) -> Option<String> {
        self.discount_reason.clone().or_else(|| self.discount_notes.clone())
    }
}

/// One entry of `patients.billing` or `patients.reassigned_billing`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingEntry {
    #[serde(deserialize_with = "lenient_id")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub description: Option<String>,
    #[serde(deserialize_with = "lenient_f64")]
    pub amount: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub paid_amount: f64,
    pub status: Option<BillStatus>,
    pub invoice_number: Option<String>,
    pub bill_no: Option<String>,
    pub consultation_type: Option<String>,
    #[serde(deserialize_with = "lenient_opt_f64")]
    pub discount_amount: Option<f64>,
    #[serde(deserialize_with = "lenient_opt_f64")]
    pub discount: Option<f64>,
    #[serde(deserialize_with = "lenient_opt_f64")]
    pub discount_percentage: Option<f64>,
    pub discount_reason: Option<String>,
    pub custom_data: Option<CustomData>,
    pub payment_method: Option<String>,
    pub transaction_id: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub payment_history: Vec<PaymentHistoryEntry>,
    #[serde(deserialize_with = "null_as_default")]
    pub refunds: Vec<RefundEntry>,
    #[serde(deserialize_with = "lenient_id")]
    pub generated_by: Option<String>,
    #[serde(deserialize_with = "lenient_id")]
    pub created_by: Option<String>,
    #[serde(deserialize_with = "lenient_id")]
    pub user_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient_id")]
    pub cancelled_by: Option<String>,
    pub cancellation_reason: Option<String>,
}

impl BillingEntry {
    pub fn discount_value(&self) -> f64 {
        self.discount_amount.or(self.discount).unwrap_or(0.0)
    }

    pub fn explicit_creator(&self) -> Option<String> {
        self.generated_by
            .clone()
            .or_else(|| self.created_by.clone())
            .or_else(|| self.user_id.clone())
    }

    pub fn is_superconsultant(&self) -> bool {
        self.consultation_type
            .as_deref()
            .is_some_and(|t| t.starts_with("superconsultant_"))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PatientRecord {
    pub id: String,
    pub name: Option<String>,
    pub uh_id: Option<String>,
    pub center_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub assigned_doctor: Option<NamedRef>,
    pub current_doctor: Option<NamedRef>,
    #[serde(deserialize_with = "null_as_default")]
    pub billing: Vec<BillingEntry>,
    #[serde(deserialize_with = "null_as_default")]
    pub reassigned_billing: Vec<BillingEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LabItem {
    pub name: Option<String>,
    #[serde(deserialize_with = "lenient_opt_f64")]
    pub quantity: Option<f64>,
    #[serde(deserialize_with = "lenient_opt_f64")]
    pub unit_price: Option<f64>,
    #[serde(deserialize_with = "lenient_opt_f64")]
    pub total: Option<f64>,
}

/// `billing` sub-document shared by test requests and SLIT therapy requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderBilling {
    #[serde(deserialize_with = "null_as_default")]
    pub items: Vec<LabItem>,
    #[serde(deserialize_with = "lenient_opt_f64")]
    pub sub_total: Option<f64>,
    #[serde(deserialize_with = "lenient_opt_f64")]
    pub discounts: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    pub amount: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub paid_amount: f64,
    pub status: Option<BillStatus>,
    pub description: Option<String>,
    pub invoice_number: Option<String>,
    pub payment_method: Option<String>,
    pub transaction_id: Option<String>,
    pub discount_reason: Option<String>,
    pub notes: Option<String>,
    #[serde(deserialize_with = "lenient_id")]
    pub generated_by: Option<String>,
    pub generated_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient_f64")]
    pub courier_fee: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub refund_amount: f64,
    pub refunded_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient_id")]
    pub refunded_by: Option<String>,
    pub refund_method: Option<String>,
    pub refund_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub refunds: Vec<RefundEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TestRequestRecord {
    pub id: String,
    pub center_id: Option<String>,
    #[serde(deserialize_with = "lenient_id")]
    pub patient_id: Option<String>,
    pub patient: Option<NamedRef>,
    pub patient_name: Option<String>,
    pub doctor: Option<NamedRef>,
    pub doctor_name: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub billing: Option<OrderBilling>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SlitTherapyRecord {
    pub id: String,
    pub center_id: Option<String>,
    #[serde(deserialize_with = "lenient_id")]
    pub patient_id: Option<String>,
    pub patient: Option<NamedRef>,
    pub patient_name: Option<String>,
    pub product_code: Option<String>,
    pub product_name: Option<String>,
    #[serde(deserialize_with = "lenient_id")]
    pub created_by: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub billing: Option<OrderBilling>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentLogRefund {
    #[serde(deserialize_with = "lenient_f64")]
    pub refunded_amount: f64,
    #[serde(deserialize_with = "lenient_id")]
    pub refunded_by: Option<String>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub refund_method: Option<String>,
    pub external_refund_id: Option<String>,
    pub refund_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentLogRecord {
    pub id: String,
    pub center_id: Option<String>,
    #[serde(deserialize_with = "lenient_id")]
    pub patient_id: Option<String>,
    pub patient: Option<NamedRef>,
    pub invoice_number: Option<String>,
    pub bill_no: Option<String>,
    #[serde(deserialize_with = "lenient_f64")]
    pub amount: f64,
    pub status: Option<String>,
    pub description: Option<String>,
    pub payment_type: Option<String>,
    pub payment_method: Option<String>,
    pub transaction_id: Option<String>,
    #[serde(deserialize_with = "lenient_id")]
    pub processed_by: Option<String>,
    #[serde(deserialize_with = "lenient_id")]
    pub created_by: Option<String>,
    #[serde(deserialize_with = "lenient_id")]
    pub refunded_by: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub refund: Option<PaymentLogRefund>,
}

impl PaymentLogRecord {
    pub fn is_refund(&self) -> bool {
        let refunded_status = self
            .status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("refunded"));
        let refunded_amount = self
            .refund
            .as_ref()
            .is_some_and(|r| r.refunded_amount > 0.0);
        refunded_status || refunded_amount
    }

    pub fn creator(&self) -> Option<String> {
        self.created_by.clone().or_else(|| self.processed_by.clone())
    }

    pub fn matches_invoice(&self, invoice_number: &str) -> bool {
        self.invoice_number.as_deref() == Some(invoice_number)
            || self.bill_no.as_deref() == Some(invoice_number)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub name: Option<String>,
    pub username: Option<String>,
}

// ==============================================================================
// DERIVED INVOICE MODELS
// ==============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceLine {
    pub name: String,
    #[serde(deserialize_with = "lenient_f64")]
    pub quantity: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub charges: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub amount: f64,
    #[serde(deserialize_with = "lenient_opt_f64", skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<f64>,
    #[serde(deserialize_with = "lenient_opt_f64", skip_serializing_if = "Option::is_none")]
    pub paid_amount: Option<f64>,
    #[serde(deserialize_with = "lenient_opt_f64", skip_serializing_if = "Option::is_none")]
    pub balance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<BillStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Discount {
    pub discount_amount: f64,
    pub discount_percentage: Option<f64>,
    pub discount_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Invoice {
    pub id: String,
    pub patient_id: Option<String>,
    pub patient_name: String,
    pub uh_id: String,
    pub bill_type: BillType,
    pub invoice_number: String,
    pub bill_no: Option<String>,
    pub date: DateTime<Utc>,
    pub doctor: String,
    pub consultation_type: Option<String>,
    pub description: Option<String>,
    pub status: BillStatus,
    pub services: Vec<ServiceLine>,
    pub amount: f64,
    pub paid_amount: f64,
    pub balance: f64,
    #[serde(flatten)]
    pub discount: Discount,
    pub sub_total: Option<f64>,
    pub tax_percentage: f64,
    pub payment_method: Option<String>,
    pub transaction_id: Option<String>,
    pub payment_history: Vec<PaymentHistoryEntry>,
    pub refunds: Vec<RefundEntry>,
    pub refunded_amount: f64,
    pub refunded_at: Option<DateTime<Utc>>,
    pub refunded_by: Option<String>,
    pub refunded_by_name: Option<String>,
    pub refund_method: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<String>,
    pub cancelled_by_name: Option<String>,
    pub cancellation_reason: Option<String>,
    pub generated_by: Option<String>,
    pub generated_by_name: String,
}

impl Invoice {
    pub fn with_defaults(
        id: String,
        bill_type: BillType,
        invoice_number: String,
        date: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            patient_id: None,
            patient_name: "N/A".to_string(),
            uh_id: "N/A".to_string(),
            bill_type,
            invoice_number,
            bill_no: None,
            date,
            doctor: "N/A".to_string(),
            consultation_type: None,
            description: None,
            status: BillStatus::Pending,
            services: Vec::new(),
            amount: 0.0,
            paid_amount: 0.0,
            balance: 0.0,
            discount: Discount::default(),
            sub_total: None,
            tax_percentage: 0.0,
            payment_method: None,
            transaction_id: None,
            payment_history: Vec::new(),
            refunds: Vec::new(),
            refunded_amount: 0.0,
            refunded_at: None,
            refunded_by: None,
            refunded_by_name: None,
            refund_method: None,
            cancelled_at: None,
            cancelled_by: None,
            cancelled_by_name: None,
            cancellation_reason: None,
            generated_by: None,
            generated_by_name: "N/A".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionRefund {
    pub refunded_amount: f64,
    pub refunded_at: Option<DateTime<Utc>>,
    pub refunded_by: Option<String>,
    pub refunded_by_name: Option<String>,
    pub refund_method: Option<String>,
    pub external_refund_id: Option<String>,
    pub refund_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub id: String,
    pub patient_id: Option<String>,
    pub patient_name: String,
    pub uh_id: String,
    pub transaction_type: String,
    pub description: String,
    pub amount: f64,
    pub payment_method: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub processed_by: Option<String>,
    pub processed_by_name: String,
    pub invoice_number: Option<String>,
    pub status: String,
    pub refund: Option<TransactionRefund>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FinancialSummary {
    pub total_amount: f64,
    pub total_paid: f64,
    pub total_balance: f64,
    pub total_transactions: usize,
    pub active_invoices_count: usize,
    pub cancelled_count: usize,
    pub cancelled_amount: f64,
    pub refunded_count: usize,
    pub refunded_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pagination {
    pub current_page: usize,
    pub total_pages: usize,
    pub total_records: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BillsResponse {
    pub bills: Vec<Invoice>,
    pub transactions: Vec<Transaction>,
    pub pagination: Pagination,
    pub summary: FinancialSummary,
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillsQuery {
    #[serde(alias = "start_date")]
    pub start_date: Option<NaiveDate>,
    #[serde(alias = "end_date")]
    pub end_date: Option<NaiveDate>,
    #[serde(alias = "bill_type")]
    pub bill_type: Option<BillTypeFilter>,
    pub status: Option<BillStatus>,
    #[serde(alias = "consultation_type")]
    pub consultation_type: Option<String>,
    #[serde(alias = "center_id")]
    pub center_id: Option<String>,
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

/// Inclusive UTC window; either end may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DateWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateWindow {
    pub fn is_bounded(&self) -> bool {
        self.start.is_some() || self.end.is_some()
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start.is_none_or(|s| ts >= s) && self.end.is_none_or(|e| ts <= e)
    }
}

/// Filters applied while folding sources into invoices.
#[derive(Debug, Clone, Default)]
pub struct BillFilters {
    pub window: DateWindow,
    pub bill_type: Option<BillTypeFilter>,
    pub status: Option<BillStatus>,
    pub consultation_type: Option<String>,
}

impl BillFilters {
    pub fn admits_type(&self, bill_type: BillType) -> bool {
        self.bill_type.is_none_or(|f| f.admits(bill_type))
    }

    pub fn admits_status(&self, status: BillStatus) -> bool {
        self.status.is_none_or(|s| s == status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CenterScope {
    AllCenters,
    Center(String),
}

impl CenterScope {
    /// PostgREST filter fragment, empty for all-centers scope.
    pub fn filter(&self) -> String {
        match self {
            CenterScope::AllCenters => String::new(),
            CenterScope::Center(id) => format!("center_id=eq.{}", id),
        }
    }
}

// ==============================================================================
// FINANCIAL REPORT MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    #[default]
    Daily,
    Weekly,
    Monthly,
    Yearly,
    Custom,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialReportQuery {
    #[serde(alias = "report_type")]
    pub report_type: Option<ReportType>,
    #[serde(alias = "start_date")]
    pub start_date: Option<NaiveDate>,
    #[serde(alias = "end_date")]
    pub end_date: Option<NaiveDate>,
    #[serde(alias = "center_id")]
    pub center_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RevenueCategory {
    Consultation,
    Superconsultant,
    Reassignment,
    Lab,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetailedTransaction {
    pub id: String,
    pub category: RevenueCategory,
    pub patient_name: String,
    pub uh_id: String,
    pub invoice_number: Option<String>,
    pub description: Option<String>,
    pub amount: f64,
    pub paid_amount: f64,
    pub status: BillStatus,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RevenueSummary {
    pub total_revenue: f64,
    pub consultation_revenue: f64,
    pub superconsultant_revenue: f64,
    pub reassignment_revenue: f64,
    pub lab_revenue: f64,
    pub consultation_count: usize,
    pub superconsultant_count: usize,
    pub reassignment_count: usize,
    pub lab_count: usize,
    /// Settled bills only, summed over the four buckets.
    pub total_transactions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RevenueBreakdown {
    pub category: RevenueCategory,
    pub revenue: f64,
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportPeriod {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinancialReportResponse {
    pub report_type: ReportType,
    pub period: ReportPeriod,
    pub summary: RevenueSummary,
    pub breakdown: Vec<RevenueBreakdown>,
    pub transactions: Vec<DetailedTransaction>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Center ID is not assigned to this user")]
    MissingCenterAssignment,

    #[error("Invalid center ID: {0}")]
    InvalidCenterId(String),

    #[error("Error fetching {source_name} data: {message}")]
    SourceUnavailable { source_name: &'static str, message: String },

    #[error("Invalid date range: start date is after end date")]
    InvalidDateRange,
}
