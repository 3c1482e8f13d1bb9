// libs/billing-cell/src/services/attribution.rs
use std::collections::{BTreeSet, HashMap};

use crate::models::{Invoice, PaymentLogRecord, RefundEntry, Transaction};

/// Lookup tables built from the payment ledger.
#[derive(Debug, Default)]
pub struct AttributionContext {
    /// invoice number (or bill number) -> creator, first log wins
    pub invoice_creators: HashMap<String, String>,
    /// transaction id -> creator
    pub transaction_creators: HashMap<String, String>,
    /// patient id -> ledger entries for that patient
    pub patient_logs: HashMap<String, Vec<PaymentLogRecord>>,
}

const PROXIMITY_WINDOW_SECS: i64 = 24 * 60 * 60;

pub type CreatorResolver = fn(&Invoice, &AttributionContext) -> Option<String>;

/// Tried in order; the first `Some` wins.
pub const CREATOR_RESOLVERS: [(&str, CreatorResolver); 5] = [
    ("explicit_field", from_explicit_field),
    ("payment_history", from_payment_history),
    ("invoice_ledger", from_invoice_ledger),
    ("transaction_ledger", from_transaction_ledger),
    ("patient_proximity", from_patient_proximity),
];

pub fn from_explicit_field(invoice: &Invoice, _ctx: &AttributionContext) -> Option<String> {
    invoice.generated_by.clone()
}

pub fn from_payment_history(invoice: &Invoice, _ctx: &AttributionContext) -> Option<String> {
    invoice
        .payment_history
        .iter()
        .find_map(|p| p.processed_by.clone().or_else(|| p.created_by.clone()))
}

pub fn from_invoice_ledger(invoice: &Invoice, ctx: &AttributionContext) -> Option<String> {
    ctx.invoice_creators
        .get(&invoice.invoice_number)
        .or_else(|| {
            invoice
                .bill_no
                .as_ref()
                .and_then(|bill_no| ctx.invoice_creators.get(bill_no))
        })
        .cloned()
}

pub fn from_transaction_ledger(invoice: &Invoice, ctx: &AttributionContext) -> Option<String> {
    invoice_transaction_ids(invoice)
        .into_iter()
        .find_map(|id| ctx.transaction_creators.get(&id).cloned())
}

/// Same patient, and either the same invoice number or a payment within 24 hours
/// of the invoice date. Can pick up an unrelated same-day payment.
pub fn from_patient_proximity(invoice: &Invoice, ctx: &AttributionContext) -> Option<String> {
    let patient_id = invoice.patient_id.as_ref()?;
    let logs = ctx.patient_logs.get(patient_id)?;
    logs.iter()
        .find(|log| {
            log.matches_invoice(&invoice.invoice_number)
                || log
                    .created_at
                    .is_some_and(|at| (at - invoice.date).num_seconds().abs() < PROXIMITY_WINDOW_SECS)
        })
        .and_then(PaymentLogRecord::creator)
}

pub fn resolve_creator(invoice: &Invoice, ctx: &AttributionContext) -> Option<String> {
    CREATOR_RESOLVERS
        .iter()
        .find_map(|(_, resolver)| resolver(invoice, ctx))
}

pub fn invoice_transaction_ids(invoice: &Invoice) -> Vec<String> {
    invoice
        .transaction_id
        .iter()
        .chain(invoice.payment_history.iter().filter_map(|p| p.transaction_id.as_ref()))
        .filter(|id| !id.is_empty())
        .cloned()
        .collect()
}

pub fn build_invoice_creator_map<'a, I>(logs: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = &'a PaymentLogRecord>,
{
    let mut map = HashMap::new();
    for log in logs {
        let Some(creator) = log.creator() else { continue };
        for key in [&log.invoice_number, &log.bill_no].into_iter().flatten() {
            map.entry(key.clone()).or_insert_with(|| creator.clone());
        }
    }
    map
}

pub fn build_transaction_creator_map<'a, I>(logs: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = &'a PaymentLogRecord>,
{
    let mut map = HashMap::new();
    for log in logs {
        if let (Some(tx), Some(creator)) = (&log.transaction_id, log.creator()) {
            map.entry(tx.clone()).or_insert(creator);
        }
    }
    map
}

pub fn group_logs_by_patient(logs: Vec<PaymentLogRecord>) -> HashMap<String, Vec<PaymentLogRecord>> {
    let mut map: HashMap<String, Vec<PaymentLogRecord>> = HashMap::new();
    for log in logs {
        let patient_id = log
            .patient_id
            .clone()
            .or_else(|| log.patient.as_ref().and_then(|p| p.id.clone()));
        if let Some(patient_id) = patient_id {
            map.entry(patient_id).or_default().push(log);
        }
    }
    map
}

/// Fills `generated_by` on every invoice the chain can resolve.
pub fn apply_creators(invoices: &mut [Invoice], ctx: &AttributionContext) {
    for invoice in invoices.iter_mut() {
        if let Some(creator) = resolve_creator(invoice, ctx) {
            invoice.generated_by = Some(creator);
        }
    }
}

// ==============================================================================
// REFUNDS
// ==============================================================================

pub fn refund_from_log(log: &PaymentLogRecord) -> RefundEntry {
    let refund = log.refund.clone().unwrap_or_default();
    let amount = if refund.refunded_amount > 0.0 {
        refund.refunded_amount
    } else {
        log.amount
    };

    RefundEntry {
        amount,
        reason: refund.refund_reason.clone(),
        method: refund
            .refund_method
            .clone()
            .or_else(|| log.payment_method.clone())
            .or_else(|| Some("cash".to_string())),
        refunded_by: refund
            .refunded_by
            .clone()
            .or_else(|| log.refunded_by.clone())
            .or_else(|| log.processed_by.clone()),
        refunded_at: refund.refunded_at.or(log.updated_at).or(log.created_at),
        transaction_id: refund
            .external_refund_id
            .clone()
            .or_else(|| log.transaction_id.clone()),
        receipt_number: log.invoice_number.clone(),
        source: Some("payment_log".to_string()),
        ..Default::default()
    }
}

/// Appends ledger refunds to matching invoices and back-fills the top-level
/// refund fields from the first one where the invoice has none.
pub fn attach_refunds(invoices: &mut [Invoice], logs: &[PaymentLogRecord]) {
    let mut by_invoice: HashMap<&str, Vec<RefundEntry>> = HashMap::new();
    for log in logs.iter().filter(|log| log.is_refund()) {
        if let Some(number) = log.invoice_number.as_deref() {
            by_invoice.entry(number).or_default().push(refund_from_log(log));
        }
    }

    for invoice in invoices.iter_mut() {
        let Some(refunds) = by_invoice.get(invoice.invoice_number.as_str()) else {
            continue;
        };
        let Some(first) = refunds.first() else { continue };

        if invoice.refunded_amount == 0.0 {
            invoice.refunded_amount = first.amount;
        }
        if invoice.refunded_at.is_none() {
            invoice.refunded_at = first.refunded_at;
        }
        if invoice.refunded_by.is_none() {
            invoice.refunded_by = first.refunded_by.clone();
        }
        if invoice.refund_method.is_none() {
            invoice.refund_method = first.method.clone();
        }
        invoice.refunds.extend(refunds.iter().cloned());
    }
}

// ==============================================================================
// NAME RESOLUTION
// ==============================================================================

/// Every user id referenced by invoices and transactions, deduplicated.
pub fn collect_user_ids(invoices: &[Invoice], transactions: &[Transaction]) -> BTreeSet<String> {
    let mut ids = BTreeSet::new();
    for invoice in invoices {
        ids.extend(invoice.generated_by.iter().cloned());
        ids.extend(invoice.cancelled_by.iter().cloned());
        ids.extend(invoice.refunded_by.iter().cloned());
        for payment in &invoice.payment_history {
            ids.extend(payment.processed_by.iter().cloned());
            ids.extend(payment.created_by.iter().cloned());
        }
        for refund in &invoice.refunds {
            ids.extend(refund.refunded_by.iter().cloned());
            ids.extend(refund.approved_by.iter().cloned());
        }
    }
    for tx in transactions {
        ids.extend(tx.processed_by.iter().cloned());
        if let Some(refund) = &tx.refund {
            ids.extend(refund.refunded_by.iter().cloned());
        }
    }
    ids.retain(|id| !id.is_empty());
    ids
}

fn lookup(names: &HashMap<String, String>, id: Option<&String>) -> Option<String> {
    id.and_then(|id| names.get(id)).cloned()
}

pub fn apply_names(invoices: &mut [Invoice], transactions: &mut [Transaction], names: &HashMap<String, String>) {
    for invoice in invoices.iter_mut() {
        invoice.generated_by_name =
            lookup(names, invoice.generated_by.as_ref()).unwrap_or_else(|| "N/A".to_string());
        invoice.cancelled_by_name = lookup(names, invoice.cancelled_by.as_ref());
        invoice.refunded_by_name = lookup(names, invoice.refunded_by.as_ref());
        for payment in invoice.payment_history.iter_mut() {
            payment.processed_by_name = lookup(names, payment.processed_by.as_ref())
                .or_else(|| lookup(names, payment.created_by.as_ref()));
        }
        for refund in invoice.refunds.iter_mut() {
            refund.refunded_by_name = lookup(names, refund.refunded_by.as_ref());
            refund.approved_by_name = lookup(names, refund.approved_by.as_ref());
        }
    }

    for tx in transactions.iter_mut() {
        tx.processed_by_name =
            lookup(names, tx.processed_by.as_ref()).unwrap_or_else(|| "N/A".to_string());
        if let Some(refund) = tx.refund.as_mut() {
            refund.refunded_by_name = lookup(names, refund.refunded_by.as_ref());
        }
    }
}
