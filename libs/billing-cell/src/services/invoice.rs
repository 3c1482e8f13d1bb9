// libs/billing-cell/src/services/invoice.rs
//
// Folding of the three billing sources into the unified invoice shape.
// Every pass returns a fresh map or vector; nothing here touches the network.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};

use crate::models::{
    BillFilters, BillStatus, BillType, BillingEntry, DateWindow, Discount, Invoice,
    LabItem, OrderBilling, PatientRecord, RefundEntry, ServiceLine, SlitTherapyRecord,
    TestRequestRecord,
};

/// A raw billing fact, tagged by the record family it came from.
#[derive(Debug)]
pub enum BillingSource<'a> {
    /// All of one patient's `billing` entries for one UTC calendar day.
    Consultation {
        patient: &'a PatientRecord,
        day: NaiveDate,
        entries: Vec<&'a BillingEntry>,
    },
    Reassignment {
        patient: &'a PatientRecord,
        entry: &'a BillingEntry,
    },
    LabTest(&'a TestRequestRecord),
    SlitTherapy(&'a SlitTherapyRecord),
}

impl BillingSource<'_> {
    /// Adapts the source into an invoice. `None` when the record carries no
    /// billing sub-document or no usable date.
    pub fn to_invoice(&self) -> Option<Invoice> {
        match self {
            BillingSource::Consultation { patient, day, entries } => {
                consultation_invoice(patient, *day, entries)
            }
            BillingSource::Reassignment { patient, entry } => reassignment_invoice(patient, entry),
            BillingSource::LabTest(record) => lab_invoice(record),
            BillingSource::SlitTherapy(record) => slit_invoice(record),
        }
    }
}

// ==============================================================================
// SHARED HELPERS
// ==============================================================================

pub fn bill_date(entry: &BillingEntry, patient: &PatientRecord) -> Option<DateTime<Utc>> {
    entry.created_at.or(patient.created_at)
}

/// A bill qualifies when it was raised or refunded inside the window.
pub fn entry_in_window(entry: &BillingEntry, patient: &PatientRecord, window: &DateWindow) -> bool {
    if !window.is_bounded() {
        return true;
    }
    let raised = bill_date(entry, patient).is_some_and(|d| window.contains(d));
    let refunded = entry.refunded_at.is_some_and(|d| window.contains(d));
    raised || refunded
}

/// Worst-case status across constituent bills, starting from `paid`.
pub fn merge_status<I>(statuses: I) -> BillStatus
where
    I: IntoIterator<Item = BillStatus>,
{
    statuses.into_iter().fold(BillStatus::Paid, |acc, next| {
        match (acc.severity(), next.severity()) {
            (Some(current), Some(candidate)) if candidate > current => next,
            _ => acc,
        }
    })
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty()).cloned()
}

fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v > 0.0)
}

fn refunds_total(refunds: &[RefundEntry]) -> f64 {
    refunds.iter().map(|r| r.amount).sum()
}

fn doctor_name(doctor: Option<&crate::models::NamedRef>) -> String {
    doctor
        .and_then(|d| d.name.clone())
        .unwrap_or_else(|| "N/A".to_string())
}

fn apply_patient(invoice: &mut Invoice, patient: &PatientRecord) {
    invoice.patient_id = Some(patient.id.clone());
    invoice.patient_name = patient.name.clone().unwrap_or_else(|| "N/A".to_string());
    invoice.uh_id = patient.uh_id.clone().unwrap_or_else(|| "N/A".to_string());
}

// ==============================================================================
// CONSULTATION FOLDING
// ==============================================================================

/// Groups a patient's qualifying `billing` entries by UTC day, keeping entry order.
pub fn group_by_day<'a>(
    patient: &'a PatientRecord,
    window: &DateWindow,
) -> BTreeMap<NaiveDate, Vec<&'a BillingEntry>> {
    let mut groups: BTreeMap<NaiveDate, Vec<&'a BillingEntry>> = BTreeMap::new();
    for entry in &patient.billing {
        if !entry_in_window(entry, patient, window) {
            continue;
        }
        if let Some(date) = bill_date(entry, patient) {
            groups.entry(date.date_naive()).or_default().push(entry);
        }
    }
    groups
}

pub fn synthesized_invoice_number(patient: &PatientRecord, day: NaiveDate) -> String {
    format!(
        "INV-{}-{}",
        patient.uh_id.as_deref().unwrap_or("N/A"),
        day.format("%Y-%m-%d")
    )
}

/// Discount across a day-group: amounts accumulate, percentage and reason are first-wins.
pub fn fold_consultation_discount(entries: &[&BillingEntry]) -> Discount {
    entries.iter().fold(Discount::default(), |mut acc, entry| {
        acc.discount_amount += entry.discount_value();
        if acc.discount_percentage.is_none() {
            acc.discount_percentage = positive(entry.discount_percentage);
        }
        if acc.discount_reason.is_none() {
            acc.discount_reason = non_empty(entry.discount_reason.as_ref());
        }

        if let Some(custom) = &entry.custom_data {
            acc.discount_amount += custom.discount_value();
            if acc.discount_percentage.is_none() {
                acc.discount_percentage = positive(custom.discount_percentage);
            }
            if acc.discount_reason.is_none() {
                acc.discount_reason = non_empty(custom.reason().as_ref());
            }
        }
        acc
    })
}

fn consultation_invoice(
    patient: &PatientRecord,
    day: NaiveDate,
    entries: &[&BillingEntry],
) -> Option<Invoice> {
    let primary = entries.first()?;
    let date = bill_date(primary, patient)?;

    let invoice_number = non_empty(primary.invoice_number.as_ref())
        .unwrap_or_else(|| synthesized_invoice_number(patient, day));
    let bill_type = if entries.iter().any(|e| e.is_superconsultant()) {
        BillType::Superconsultant
    } else {
        BillType::Consultation
    };
    let id = primary
        .id
        .clone()
        .unwrap_or_else(|| format!("{}-{}", patient.id, day));

    let mut invoice = Invoice::with_defaults(id, bill_type, invoice_number, date);
    apply_patient(&mut invoice, patient);
    invoice.bill_no = primary.bill_no.clone();
    invoice.doctor = doctor_name(patient.assigned_doctor.as_ref());
    invoice.consultation_type = Some(
        primary
            .consultation_type
            .clone()
            .unwrap_or_else(|| "OP".to_string()),
    );
    invoice.payment_method = primary.payment_method.clone();
    invoice.transaction_id = primary.transaction_id.clone();
    invoice.tax_percentage = primary
        .custom_data
        .as_ref()
        .and_then(|c| c.tax_percentage)
        .unwrap_or(0.0);
    invoice.discount = fold_consultation_discount(entries);
    invoice.status = merge_status(
        entries
            .iter()
            .map(|e| e.status.unwrap_or(BillStatus::Pending)),
    );
    invoice.generated_by = entries.iter().find_map(|e| e.explicit_creator());

    for entry in entries {
        let status = entry.status.unwrap_or(BillStatus::Pending);
        invoice.services.push(ServiceLine {
            name: entry
                .description
                .clone()
                .or_else(|| entry.kind.clone())
                .unwrap_or_else(|| "Consultation".to_string()),
            quantity: 1.0,
            charges: entry.amount,
            amount: entry.amount,
            unit_price: None,
            paid_amount: Some(entry.paid_amount),
            balance: Some(entry.amount - entry.paid_amount),
            status: Some(status),
        });

        invoice.amount += entry.amount;
        invoice.paid_amount += entry.paid_amount;
        invoice.balance += entry.amount - entry.paid_amount;

        if status == BillStatus::Cancelled {
            if entry.cancelled_at.is_some() {
                invoice.cancelled_at = entry.cancelled_at;
            }
            if entry.cancelled_by.is_some() {
                invoice.cancelled_by = entry.cancelled_by.clone();
            }
            if entry.cancellation_reason.is_some() {
                invoice.cancellation_reason = entry.cancellation_reason.clone();
            }
        }
        if invoice.refunded_at.is_none() {
            invoice.refunded_at = entry.refunded_at;
        }

        invoice.payment_history.extend(entry.payment_history.iter().cloned());
        invoice.refunds.extend(entry.refunds.iter().cloned());
    }
    invoice.refunded_amount = refunds_total(&invoice.refunds);

    Some(invoice)
}

fn admits_consultation(invoice: &Invoice, filters: &BillFilters) -> bool {
    let type_ok = filters.admits_type(invoice.bill_type);
    let consultation_type_ok = match filters.consultation_type.as_deref() {
        None | Some("") => true,
        Some(wanted) => invoice.consultation_type.as_deref().unwrap_or("OP") == wanted,
    };
    type_ok && consultation_type_ok && filters.admits_status(invoice.status)
}

/// One invoice per (patient, day). A later group with the same invoice number
/// replaces the earlier one.
pub fn consultation_pass(patients: &[PatientRecord], filters: &BillFilters) -> BTreeMap<String, Invoice> {
    patients
        .iter()
        .flat_map(|patient| {
            group_by_day(patient, &filters.window)
                .into_iter()
                .map(move |(day, entries)| BillingSource::Consultation { patient, day, entries })
        })
        .filter_map(|source| source.to_invoice())
        .filter(|invoice| admits_consultation(invoice, filters))
        .fold(BTreeMap::new(), |mut map, invoice| {
            map.insert(invoice.invoice_number.clone(), invoice);
            map
        })
}

// ==============================================================================
// REASSIGNMENT
// ==============================================================================

pub fn reassignment_key(entry: &BillingEntry) -> String {
    non_empty(entry.invoice_number.as_ref()).unwrap_or_else(|| {
        format!("REASSIGN-{}", entry.id.as_deref().unwrap_or("unknown"))
    })
}

fn reassignment_invoice(patient: &PatientRecord, entry: &BillingEntry) -> Option<Invoice> {
    let date = bill_date(entry, patient)?;
    let invoice_number = reassignment_key(entry);
    let id = entry.id.clone().unwrap_or_else(|| invoice_number.clone());
    let custom = entry.custom_data.clone().unwrap_or_default();

    let mut invoice = Invoice::with_defaults(id, BillType::Reassignment, invoice_number, date);
    apply_patient(&mut invoice, patient);
    invoice.bill_no = entry.bill_no.clone().or_else(|| entry.invoice_number.clone());
    invoice.doctor = doctor_name(patient.current_doctor.as_ref());
    invoice.description = entry.description.clone();
    invoice.status = entry.status.unwrap_or(BillStatus::Pending);
    invoice.services = custom.services.clone();
    invoice.amount = entry.amount;
    invoice.paid_amount = entry.paid_amount;
    invoice.balance = entry.amount - entry.paid_amount;
    invoice.discount = Discount {
        discount_amount: positive(entry.discount_amount)
            .or(positive(custom.discount_amount))
            .or(positive(custom.discount))
            .unwrap_or(0.0),
        discount_percentage: positive(entry.discount_percentage)
            .or(positive(custom.discount_percentage)),
        discount_reason: non_empty(entry.discount_reason.as_ref())
            .or_else(|| non_empty(custom.reason().as_ref())),
    };
    invoice.tax_percentage = custom.tax_percentage.unwrap_or(0.0);
    invoice.payment_method = entry.payment_method.clone();
    invoice.transaction_id = entry.transaction_id.clone();
    invoice.payment_history = entry.payment_history.clone();
    invoice.refunds = entry.refunds.clone();
    invoice.refunded_amount = refunds_total(&entry.refunds);
    invoice.refunded_at = entry.refunded_at;
    invoice.cancelled_at = entry.cancelled_at;
    invoice.cancelled_by = entry.cancelled_by.clone();
    invoice.cancellation_reason = entry.cancellation_reason.clone();
    invoice.generated_by = entry.explicit_creator();

    Some(invoice)
}

/// One invoice per reassigned bill, no day folding. Duplicate keys are dropped:
/// the first bill seen under a key wins.
pub fn reassignment_pass(patients: &[PatientRecord], filters: &BillFilters) -> BTreeMap<String, Invoice> {
    let mut map = BTreeMap::new();
    for patient in patients {
        for entry in &patient.reassigned_billing {
            if !entry_in_window(entry, patient, &filters.window) {
                continue;
            }
            let Some(invoice) = (BillingSource::Reassignment { patient, entry }).to_invoice() else {
                continue;
            };
            if !filters.admits_type(invoice.bill_type) || !filters.admits_status(invoice.status) {
                continue;
            }
            map.entry(invoice.invoice_number.clone()).or_insert(invoice);
        }
    }
    map
}

/// Reassignment invoices only fill keys the consultation pass left free; they
/// never merge into an existing consultation invoice.
pub fn merge_passes(
    consultations: BTreeMap<String, Invoice>,
    reassignments: BTreeMap<String, Invoice>,
) -> BTreeMap<String, Invoice> {
    reassignments
        .into_iter()
        .fold(consultations, |mut merged, (key, invoice)| {
            merged.entry(key).or_insert(invoice);
            merged
        })
}

// ==============================================================================
// LAB AND SLIT THERAPY
// ==============================================================================

fn order_service_line(item: &LabItem, default_name: &str) -> ServiceLine {
    let quantity = positive(item.quantity).unwrap_or(1.0);
    let unit_price = item.unit_price.unwrap_or(0.0);
    let charges = positive(item.unit_price).or(item.total).unwrap_or(0.0);
    let amount = positive(item.total).unwrap_or(unit_price * quantity);
    ServiceLine {
        name: non_empty(item.name.as_ref()).unwrap_or_else(|| default_name.to_string()),
        quantity,
        charges,
        amount,
        unit_price: Some(unit_price),
        paid_amount: None,
        balance: None,
        status: None,
    }
}

pub fn services_total(services: &[ServiceLine]) -> f64 {
    services
        .iter()
        .map(|s| {
            if s.amount > 0.0 {
                s.amount
            } else {
                s.charges * s.quantity
            }
        })
        .sum()
}

/// Lab discount with inference for historical records that never stored one.
/// Returns the discount and the subtotal used for the percentage.
pub fn infer_lab_discount(billing: &OrderBilling, services_total: f64) -> (Discount, f64) {
    let final_amount = billing.amount;
    let sub_total = positive(billing.sub_total)
        .or(positive(Some(services_total)))
        .unwrap_or(final_amount);

    let mut discount_amount = billing.discounts.unwrap_or(0.0);
    if discount_amount == 0.0 && services_total > final_amount && final_amount > 0.0 {
        discount_amount = services_total - final_amount;
    }

    let discount_percentage = if discount_amount > 0.0 && sub_total > 0.0 {
        Some(discount_amount / sub_total * 100.0)
    } else {
        None
    };

    let discount = Discount {
        discount_amount,
        discount_percentage,
        discount_reason: non_empty(billing.discount_reason.as_ref())
            .or_else(|| non_empty(billing.notes.as_ref())),
    };
    (discount, sub_total)
}

fn apply_order_refund_fields(invoice: &mut Invoice, billing: &OrderBilling) {
    invoice.refunds = billing.refunds.clone();
    invoice.refunded_amount = billing.refund_amount;
    invoice.refunded_at = billing.refunded_at;
    invoice.refunded_by = billing.refunded_by.clone();
    invoice.refund_method = billing.refund_method.clone();
    invoice.cancelled_at = billing.cancelled_at;
    invoice.cancellation_reason = billing.cancellation_reason.clone();
}

fn lab_invoice(record: &TestRequestRecord) -> Option<Invoice> {
    let billing = record.billing.as_ref()?;
    let date = record.created_at.or(billing.generated_at)?;
    let invoice_number =
        non_empty(billing.invoice_number.as_ref()).unwrap_or_else(|| record.id.clone());

    let services: Vec<ServiceLine> = billing
        .items
        .iter()
        .map(|item| order_service_line(item, "Test"))
        .collect();
    let (discount, sub_total) = infer_lab_discount(billing, services_total(&services));

    let mut invoice =
        Invoice::with_defaults(record.id.clone(), BillType::LabTest, invoice_number, date);
    invoice.patient_id = record
        .patient
        .as_ref()
        .and_then(|p| p.id.clone())
        .or_else(|| record.patient_id.clone());
    invoice.patient_name = record
        .patient
        .as_ref()
        .and_then(|p| p.name.clone())
        .or_else(|| record.patient_name.clone())
        .unwrap_or_else(|| "Unknown Patient".to_string());
    invoice.uh_id = record
        .patient
        .as_ref()
        .and_then(|p| p.uh_id.clone())
        .unwrap_or_else(|| "N/A".to_string());
    invoice.doctor = record
        .doctor
        .as_ref()
        .and_then(|d| d.name.clone())
        .or_else(|| record.doctor_name.clone())
        .unwrap_or_else(|| "N/A".to_string());
    invoice.description = Some(
        billing
            .description
            .clone()
            .unwrap_or_else(|| "Laboratory Test".to_string()),
    );
    invoice.status = billing.status.unwrap_or(BillStatus::Pending);
    invoice.services = services;
    invoice.amount = billing.amount;
    invoice.paid_amount = billing.paid_amount;
    invoice.balance = billing.amount - billing.paid_amount;
    invoice.discount = discount;
    invoice.sub_total = Some(sub_total);
    invoice.payment_method = billing.payment_method.clone();
    invoice.transaction_id = billing.transaction_id.clone();
    invoice.generated_by = billing.generated_by.clone();
    apply_order_refund_fields(&mut invoice, billing);

    Some(invoice)
}

pub fn lab_invoices(records: &[TestRequestRecord], filters: &BillFilters) -> Vec<Invoice> {
    if !filters.admits_type(BillType::LabTest) {
        return Vec::new();
    }
    records
        .iter()
        .filter_map(|record| BillingSource::LabTest(record).to_invoice())
        .filter(|invoice| filters.admits_status(invoice.status))
        .collect()
}

fn slit_invoice(record: &SlitTherapyRecord) -> Option<Invoice> {
    let billing = record.billing.as_ref()?;
    let date = billing.generated_at.or(record.created_at)?;
    let invoice_number = non_empty(billing.invoice_number.as_ref())
        .unwrap_or_else(|| format!("SLIT-{}", record.id));

    let mut services: Vec<ServiceLine> = billing
        .items
        .iter()
        .map(|item| order_service_line(item, "SLIT Therapy"))
        .collect();
    if billing.courier_fee > 0.0 {
        services.push(ServiceLine {
            name: "Courier Fee".to_string(),
            quantity: 1.0,
            charges: billing.courier_fee,
            amount: billing.courier_fee,
            unit_price: Some(billing.courier_fee),
            paid_amount: None,
            balance: None,
            status: None,
        });
    }

    let product = record
        .product_name
        .clone()
        .or_else(|| record.product_code.clone())
        .unwrap_or_else(|| "Product".to_string());

    let mut invoice =
        Invoice::with_defaults(record.id.clone(), BillType::SlitTherapy, invoice_number, date);
    invoice.patient_id = record
        .patient
        .as_ref()
        .and_then(|p| p.id.clone())
        .or_else(|| record.patient_id.clone());
    invoice.patient_name = record
        .patient
        .as_ref()
        .and_then(|p| p.name.clone())
        .or_else(|| record.patient_name.clone())
        .unwrap_or_else(|| "Unknown Patient".to_string());
    invoice.uh_id = record
        .patient
        .as_ref()
        .and_then(|p| p.uh_id.clone())
        .unwrap_or_else(|| "N/A".to_string());
    invoice.description = Some(format!("SLIT Therapy - {}", product));
    invoice.status = billing.status.unwrap_or(BillStatus::Generated);
    invoice.services = services;
    invoice.amount = billing.amount;
    invoice.paid_amount = billing.paid_amount;
    invoice.balance = billing.amount - billing.paid_amount;
    invoice.payment_method = billing.payment_method.clone();
    invoice.transaction_id = billing.transaction_id.clone();
    invoice.generated_by = billing.generated_by.clone().or_else(|| record.created_by.clone());
    apply_order_refund_fields(&mut invoice, billing);

    Some(invoice)
}

pub fn slit_invoices(records: &[SlitTherapyRecord], filters: &BillFilters) -> Vec<Invoice> {
    if !filters.admits_type(BillType::SlitTherapy) {
        return Vec::new();
    }
    records
        .iter()
        .filter_map(|record| BillingSource::SlitTherapy(record).to_invoice())
        .filter(|invoice| filters.admits_status(invoice.status))
        .collect()
}

/// All invoices, newest first. The sort is stable so same-instant invoices keep
/// consultation, lab, SLIT order.
pub fn assemble_invoices(
    patients: &[PatientRecord],
    tests: &[TestRequestRecord],
    slits: &[SlitTherapyRecord],
    filters: &BillFilters,
) -> Vec<Invoice> {
    let folded = merge_passes(
        consultation_pass(patients, filters),
        reassignment_pass(patients, filters),
    );

    let mut invoices: Vec<Invoice> = folded.into_values().collect();
    invoices.extend(lab_invoices(tests, filters));
    invoices.extend(slit_invoices(slits, filters));
    invoices.sort_by(|a, b| b.date.cmp(&a.date));
    invoices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BillTypeFilter, CustomData, NamedRef};
    use chrono::TimeZone;
    use std::collections::HashSet;

    fn ts(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn entry(amount: f64, paid: f64, status: BillStatus, at: DateTime<Utc>) -> BillingEntry {
        BillingEntry {
            id: Some(format!("b-{}-{}", amount, at.timestamp())),
            kind: Some("consultation".to_string()),
            description: Some("Consultation fee".to_string()),
            amount,
            paid_amount: paid,
            status: Some(status),
            created_at: Some(at),
            ..Default::default()
        }
    }

    fn patient(billing: Vec<BillingEntry>) -> PatientRecord {
        PatientRecord {
            id: "p-1".to_string(),
            name: Some("Asha".to_string()),
            uh_id: Some("2345001".to_string()),
            assigned_doctor: Some(NamedRef {
                name: Some("Dr. Rao".to_string()),
                ..Default::default()
            }),
            billing,
            ..Default::default()
        }
    }

    #[test]
    fn folds_same_day_bills_into_one_invoice() {
        let p = patient(vec![
            entry(500.0, 500.0, BillStatus::Paid, ts(2024, 1, 5, 9)),
            entry(300.0, 0.0, BillStatus::Pending, ts(2024, 1, 5, 15)),
            entry(200.0, 200.0, BillStatus::Paid, ts(2024, 1, 6, 10)),
        ]);

        let invoices = assemble_invoices(&[p], &[], &[], &BillFilters::default());
        assert_eq!(invoices.len(), 2);

        let jan6 = &invoices[0];
        assert_eq!(jan6.invoice_number, "INV-2345001-2024-01-06");
        assert_eq!(jan6.amount, 200.0);
        assert_eq!(jan6.balance, 0.0);

        let jan5 = &invoices[1];
        assert_eq!(jan5.invoice_number, "INV-2345001-2024-01-05");
        assert_eq!(jan5.amount, 800.0);
        assert_eq!(jan5.paid_amount, 500.0);
        assert_eq!(jan5.balance, 300.0);
        assert_eq!(jan5.services.len(), 2);
        assert_eq!(jan5.status, BillStatus::Pending);
        assert_eq!(jan5.doctor, "Dr. Rao");

        for invoice in &invoices {
            assert!((invoice.amount - (invoice.balance + invoice.paid_amount)).abs() < 1e-9);
        }
    }

    #[test]
    fn every_source_keeps_amount_equal_to_balance_plus_paid() {
        let mut p = patient(vec![
            entry(500.0, 200.0, BillStatus::PartiallyPaid, ts(2024, 2, 1, 9)),
            entry(300.0, 0.0, BillStatus::Pending, ts(2024, 2, 1, 11)),
        ]);
        p.reassigned_billing = vec![BillingEntry {
            invoice_number: Some("RA-1".to_string()),
            ..entry(250.0, 100.0, BillStatus::PartiallyPaid, ts(2024, 2, 2, 9))
        }];

        let mut lab = lab_record(vec![(700.0, 1.0)], 600.0, None);
        if let Some(billing) = lab.billing.as_mut() {
            billing.paid_amount = 450.0;
            billing.status = Some(BillStatus::PartiallyPaid);
        }

        let slit = SlitTherapyRecord {
            id: "s-2".to_string(),
            created_at: Some(ts(2024, 2, 3, 9)),
            billing: Some(OrderBilling {
                amount: 9000.0,
                paid_amount: 4000.0,
                courier_fee: 150.0,
                ..Default::default()
            }),
            ..Default::default()
        };

        let invoices = assemble_invoices(&[p], &[lab], &[slit], &BillFilters::default());
        let types: HashSet<BillType> = invoices.iter().map(|i| i.bill_type).collect();
        assert_eq!(types.len(), 4);

        for invoice in &invoices {
            assert!(
                (invoice.amount - (invoice.balance + invoice.paid_amount)).abs() < 1e-9,
                "{} drifted: {} != {} + {}",
                invoice.invoice_number,
                invoice.amount,
                invoice.balance,
                invoice.paid_amount
            );
        }
    }

    #[test]
    fn merged_status_uses_worst_case_precedence() {
        use BillStatus::*;
        assert_eq!(merge_status([Paid, PartiallyPaid]), PartiallyPaid);
        assert_eq!(merge_status([Pending, PartiallyPaid]), Pending);
        assert_eq!(merge_status([Refunded, Cancelled, Pending]), Refunded);
        assert_eq!(merge_status([Paid, Cancelled, Paid]), Cancelled);
        assert_eq!(merge_status([Completed, Generated]), Paid);
        assert_eq!(merge_status(Vec::<BillStatus>::new()), Paid);
    }

    #[test]
    fn superconsultant_prefix_sets_bill_type() {
        let mut special = entry(1200.0, 1200.0, BillStatus::Paid, ts(2024, 2, 1, 11));
        special.consultation_type = Some("superconsultant_cardiology".to_string());
        let p = patient(vec![entry(100.0, 100.0, BillStatus::Paid, ts(2024, 2, 1, 10)), special]);

        let all = consultation_pass(std::slice::from_ref(&p), &BillFilters::default());
        let invoice = all.values().next().unwrap();
        assert_eq!(invoice.bill_type, BillType::Superconsultant);

        let filters = BillFilters {
            bill_type: Some(BillTypeFilter::Consultation),
            ..Default::default()
        };
        assert!(consultation_pass(&[p], &filters).is_empty());
    }

    #[test]
    fn discount_amount_accumulates_and_percentage_is_first_wins() {
        let mut first = entry(500.0, 450.0, BillStatus::Paid, ts(2024, 3, 1, 9));
        first.discount_amount = Some(50.0);
        let mut second = entry(300.0, 270.0, BillStatus::Paid, ts(2024, 3, 1, 10));
        second.discount_percentage = Some(10.0);
        second.custom_data = Some(CustomData {
            discount: Some(30.0),
            discount_percentage: Some(25.0),
            discount_reason: Some("staff".to_string()),
            ..Default::default()
        });

        let discount = fold_consultation_discount(&[&first, &second]);
        assert_eq!(discount.discount_amount, 80.0);
        assert_eq!(discount.discount_percentage, Some(10.0));
        assert_eq!(discount.discount_reason.as_deref(), Some("staff"));
    }

    #[test]
    fn refund_date_inside_window_keeps_old_bill() {
        let mut old = entry(400.0, 400.0, BillStatus::Refunded, ts(2023, 12, 20, 9));
        old.refunded_at = Some(ts(2024, 1, 3, 12));
        let p = patient(vec![old]);

        let filters = BillFilters {
            window: DateWindow {
                start: Some(ts(2024, 1, 1, 0)),
                end: Some(ts(2024, 1, 31, 23)),
            },
            ..Default::default()
        };
        let invoices = consultation_pass(&[p], &filters);
        assert_eq!(invoices.len(), 1);
        assert!(invoices.contains_key("INV-2345001-2023-12-20"));
    }

    #[test]
    fn reassignment_never_overrides_existing_key() {
        let mut consult = entry(500.0, 500.0, BillStatus::Paid, ts(2024, 4, 2, 9));
        consult.invoice_number = Some("INV-42".to_string());
        let mut reassigned = entry(700.0, 0.0, BillStatus::Pending, ts(2024, 4, 2, 11));
        reassigned.invoice_number = Some("INV-42".to_string());
        let mut fresh = entry(250.0, 0.0, BillStatus::Pending, ts(2024, 4, 3, 11));
        fresh.invoice_number = None;
        fresh.id = Some("r-9".to_string());

        let mut p = patient(vec![consult]);
        p.reassigned_billing = vec![reassigned, fresh];

        let merged = merge_passes(
            consultation_pass(std::slice::from_ref(&p), &BillFilters::default()),
            reassignment_pass(std::slice::from_ref(&p), &BillFilters::default()),
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged["INV-42"].bill_type, BillType::Consultation);
        assert_eq!(merged["INV-42"].amount, 500.0);
        assert_eq!(merged["REASSIGN-r-9"].bill_type, BillType::Reassignment);
    }

    fn lab_record(items: Vec<(f64, f64)>, amount: f64, sub_total: Option<f64>) -> TestRequestRecord {
        TestRequestRecord {
            id: "t-1".to_string(),
            patient_name: Some("Ravi".to_string()),
            created_at: Some(ts(2024, 5, 1, 9)),
            billing: Some(OrderBilling {
                items: items
                    .into_iter()
                    .map(|(unit, qty)| LabItem {
                        name: Some("CBC".to_string()),
                        quantity: Some(qty),
                        unit_price: Some(unit),
                        total: Some(unit * qty),
                    })
                    .collect(),
                sub_total,
                amount,
                paid_amount: amount,
                status: Some(BillStatus::Paid),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn lab_discount_is_inferred_from_line_items() {
        let record = lab_record(vec![(600.0, 1.0), (200.0, 2.0)], 850.0, Some(850.0));
        let invoice = BillingSource::LabTest(&record).to_invoice().unwrap();

        assert_eq!(invoice.discount.discount_amount, 150.0);
        let pct = invoice.discount.discount_percentage.unwrap();
        assert!((pct - 17.647).abs() < 0.01);
        assert_eq!(invoice.patient_name, "Ravi");
        assert_eq!(invoice.uh_id, "N/A");
        assert_eq!(invoice.invoice_number, "t-1");
    }

    #[test]
    fn inferred_lab_discount_without_stored_subtotal() {
        let record = lab_record(vec![(1000.0, 1.0)], 850.0, None);
        let invoice = BillingSource::LabTest(&record).to_invoice().unwrap();

        assert_eq!(invoice.discount.discount_amount, 150.0);
        assert_eq!(invoice.sub_total, Some(1000.0));
        // Same base as the reported sub-total.
        assert!((invoice.discount.discount_percentage.unwrap() - 15.0).abs() < 1e-9);
    }

    #[test]
    fn final_amount_is_the_last_percentage_base() {
        let mut record = lab_record(vec![(0.0, 1.0)], 800.0, None);
        if let Some(billing) = record.billing.as_mut() {
            billing.discounts = Some(200.0);
        }
        let invoice = BillingSource::LabTest(&record).to_invoice().unwrap();
        assert_eq!(invoice.sub_total, Some(800.0));
        assert!((invoice.discount.discount_percentage.unwrap() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn stored_subtotal_is_the_percentage_base() {
        let record = lab_record(vec![(1000.0, 1.0)], 850.0, Some(1000.0));
        let invoice = BillingSource::LabTest(&record).to_invoice().unwrap();
        assert!((invoice.discount.discount_percentage.unwrap() - 15.0).abs() < 1e-9);
    }

    #[test]
    fn explicit_lab_discount_is_not_overridden() {
        let mut record = lab_record(vec![(1000.0, 1.0)], 850.0, None);
        if let Some(billing) = record.billing.as_mut() {
            billing.discounts = Some(100.0);
        }
        let invoice = BillingSource::LabTest(&record).to_invoice().unwrap();
        assert_eq!(invoice.discount.discount_amount, 100.0);

        let undiscounted = lab_record(vec![(500.0, 1.0)], 500.0, None);
        let invoice = BillingSource::LabTest(&undiscounted).to_invoice().unwrap();
        assert_eq!(invoice.discount.discount_amount, 0.0);
        assert_eq!(invoice.discount.discount_percentage, None);
    }

    #[test]
    fn slit_invoice_defaults() {
        let record = SlitTherapyRecord {
            id: "s-1".to_string(),
            product_code: Some("SLIT002".to_string()),
            created_by: Some("u-lab".to_string()),
            created_at: Some(ts(2024, 6, 1, 9)),
            billing: Some(OrderBilling {
                amount: 10000.0,
                courier_fee: 150.0,
                ..Default::default()
            }),
            ..Default::default()
        };

        let invoice = BillingSource::SlitTherapy(&record).to_invoice().unwrap();
        assert_eq!(invoice.invoice_number, "SLIT-s-1");
        assert_eq!(invoice.status, BillStatus::Generated);
        assert_eq!(invoice.description.as_deref(), Some("SLIT Therapy - SLIT002"));
        assert_eq!(invoice.generated_by.as_deref(), Some("u-lab"));
        assert_eq!(invoice.services.len(), 1);
        assert_eq!(invoice.discount.discount_amount, 0.0);

        let lab_only = BillFilters {
            bill_type: Some(BillTypeFilter::Lab),
            ..Default::default()
        };
        assert!(slit_invoices(&[record], &lab_only).is_empty());
    }
}
