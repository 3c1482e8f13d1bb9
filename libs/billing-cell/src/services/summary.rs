use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::models::{
    BillStatus, BillingError, DateWindow, FinancialSummary, Invoice, Pagination, PaymentLogRecord,
    Transaction, TransactionRefund,
};

/// `startDate` opens at 00:00:00.000 UTC, `endDate` closes at 23:59:59.999 UTC.
pub fn day_window(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<DateWindow, BillingError> {
    if let (Some(s), Some(e)) = (start, end) {
        if s > e {
            return Err(BillingError::InvalidDateRange);
        }
    }
    Ok(DateWindow {
        start: start.map(start_of_day),
        end: end.map(end_of_day),
    })
}

pub fn start_of_day(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(NaiveTime::MIN).and_utc()
}

pub fn end_of_day(day: NaiveDate) -> DateTime<Utc> {
    let last = NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN);
    day.and_time(last).and_utc()
}

/// Totals over the full invoice set, not the current page.
pub fn summarize(invoices: &[Invoice], total_transactions: usize) -> FinancialSummary {
    invoices.iter().fold(
        FinancialSummary {
            total_transactions,
            ..Default::default()
        },
        |mut acc, invoice| {
            match invoice.status {
                s if !s.is_inactive() => {
                    acc.total_amount += invoice.amount;
                    acc.total_paid += invoice.paid_amount;
                    acc.total_balance += invoice.balance;
                    acc.active_invoices_count += 1;
                }
                BillStatus::Cancelled => {
                    acc.cancelled_count += 1;
                    acc.cancelled_amount += invoice.amount;
                }
                _ => {
                    acc.refunded_count += 1;
                    acc.refunded_amount += invoice.paid_amount;
                }
            }
            acc
        },
    )
}

pub fn normalize_page(page: Option<usize>, limit: Option<usize>, default_limit: usize) -> (usize, usize) {
    let page = page.filter(|p| *p >= 1).unwrap_or(1);
    let limit = limit.filter(|l| *l >= 1).unwrap_or(default_limit.max(1));
    (page, limit)
}

pub fn paginate<T: Clone>(items: &[T], page: usize, limit: usize) -> (Vec<T>, Pagination) {
    let total = items.len();
    let start = (page - 1).saturating_mul(limit).min(total);
    let end = start.saturating_add(limit).min(total);
    let pagination = Pagination {
        current_page: page,
        total_pages: total.div_ceil(limit),
        total_records: total,
        limit,
    };
    (items[start..end].to_vec(), pagination)
}

/// Flattens a ledger row for the transactions feed. Names are filled in later.
pub fn transaction_from_log(log: &PaymentLogRecord) -> Transaction {
    Transaction {
        id: log.id.clone(),
        patient_id: log
            .patient
            .as_ref()
            .and_then(|p| p.id.clone())
            .or_else(|| log.patient_id.clone()),
        patient_name: log
            .patient
            .as_ref()
            .and_then(|p| p.name.clone())
            .unwrap_or_else(|| "N/A".to_string()),
        uh_id: log
            .patient
            .as_ref()
            .and_then(|p| p.uh_id.clone())
            .unwrap_or_else(|| "N/A".to_string()),
        transaction_type: log.payment_type.clone().unwrap_or_else(|| "payment".to_string()),
        description: log.description.clone().unwrap_or_else(|| "Payment".to_string()),
        amount: log.amount,
        payment_method: log.payment_method.clone(),
        date: log.created_at,
        processed_by: log.processed_by.clone(),
        processed_by_name: "N/A".to_string(),
        invoice_number: log.invoice_number.clone(),
        status: log.status.clone().unwrap_or_else(|| "completed".to_string()),
        refund: log.refund.as_ref().map(|r| TransactionRefund {
            refunded_amount: r.refunded_amount,
            refunded_at: r.refunded_at,
            refunded_by: r.refunded_by.clone(),
            refunded_by_name: None,
            refund_method: r.refund_method.clone().or_else(|| log.payment_method.clone()),
            external_refund_id: r.external_refund_id.clone(),
            refund_reason: r.refund_reason.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use crate::models::BillType;
    use chrono::TimeZone;

    fn invoice(amount: f64, paid: f64, status: BillStatus) -> Invoice {
        let mut inv = Invoice::with_defaults(
            "i".into(),
            BillType::Consultation,
            format!("INV-{}", amount),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        );
        inv.amount = amount;
        inv.paid_amount = paid;
        inv.balance = amount - paid;
        inv.status = status;
        inv
    }

    #[test]
    fn summary_separates_active_cancelled_and_refunded() {
        let invoices = vec![
            invoice(800.0, 500.0, BillStatus::Pending),
            invoice(200.0, 200.0, BillStatus::Paid),
            invoice(150.0, 0.0, BillStatus::Cancelled),
            invoice(400.0, 400.0, BillStatus::Refunded),
            invoice(90.0, 0.0, BillStatus::Generated),
        ];

        let summary = summarize(&invoices, 7);
        assert_eq!(summary.total_amount, 1090.0);
        assert_eq!(summary.total_paid, 700.0);
        assert_eq!(summary.total_balance, 390.0);
        assert_eq!(summary.active_invoices_count, 3);
        assert_eq!(summary.cancelled_count, 1);
        assert_eq!(summary.cancelled_amount, 150.0);
        assert_eq!(summary.refunded_count, 1);
        assert_eq!(summary.refunded_amount, 400.0);
        assert_eq!(summary.total_transactions, 7);
    }

    #[test]
    fn pagination_clamps_and_rounds_up() {
        let items: Vec<u32> = (0..101).collect();
        let (page, pagination) = paginate(&items, 3, 50);
        assert_eq!(page, vec![100]);
        assert_eq!(pagination.total_pages, 3);
        assert_eq!(pagination.total_records, 101);

        let (beyond, _) = paginate(&items, 9, 50);
        assert!(beyond.is_empty());

        assert_eq!(normalize_page(Some(0), Some(0), 50), (1, 50));
        assert_eq!(normalize_page(None, Some(10), 50), (1, 10));
    }

    #[test]
    fn day_window_spans_whole_days() {
        let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        let window = day_window(Some(d(5)), Some(d(6))).unwrap();
        assert_eq!(window.start, Some(Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap()));
        assert!(window.contains(Utc.with_ymd_and_hms(2024, 1, 6, 23, 59, 59).unwrap()));
        assert!(!window.contains(Utc.with_ymd_and_hms(2024, 1, 7, 0, 0, 0).unwrap()));

        assert_matches!(day_window(Some(d(6)), Some(d(5))), Err(BillingError::InvalidDateRange));
    }
}
