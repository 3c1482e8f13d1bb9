// libs/billing-cell/src/services/reports.rs
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use tracing::{debug, info};

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    BillStatus, BillingEntry, BillingError, CenterScope, DateWindow, DetailedTransaction,
    FinancialReportQuery, FinancialReportResponse, PatientRecord, ReportPeriod, ReportType,
    RevenueBreakdown, RevenueCategory, RevenueSummary, TestRequestRecord,
};
use crate::services::invoice::{bill_date, BillingSource};
use crate::services::sources::{BillingSourceClient, LabDateMatch};
use crate::services::summary::{day_window, start_of_day};

/// Resolves the reporting window relative to `now`.
pub fn report_window(
    report_type: ReportType,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    now: DateTime<Utc>,
) -> Result<DateWindow, BillingError> {
    let today = now.date_naive();
    let window = match report_type {
        ReportType::Daily => {
            let start = start_of_day(today);
            DateWindow {
                start: Some(start),
                end: Some(start + Duration::hours(24)),
            }
        }
        ReportType::Weekly => DateWindow {
            start: Some(now - Duration::days(7)),
            end: Some(now),
        },
        ReportType::Monthly => DateWindow {
            start: today.with_day(1).map(start_of_day),
            end: Some(now),
        },
        ReportType::Yearly => DateWindow {
            start: NaiveDate::from_ymd_opt(today.year(), 1, 1).map(start_of_day),
            end: Some(now),
        },
        ReportType::Custom => match (start_date, end_date) {
            (Some(start), Some(end)) => day_window(Some(start), Some(end))?,
            _ => DateWindow::default(),
        },
    };
    Ok(window)
}

/// Paid or completed bills count toward revenue; paid amount wins over face amount.
fn recognized_revenue(status: BillStatus, amount: f64, paid_amount: f64) -> Option<f64> {
    if !status.is_settled() {
        return None;
    }
    Some(if paid_amount > 0.0 { paid_amount } else { amount })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Running totals plus the flat row list.
#[derive(Debug, Default)]
pub struct RevenueAccumulator {
    pub summary: RevenueSummary,
    pub rows: Vec<DetailedTransaction>,
}

impl RevenueAccumulator {
    pub fn record(&mut self, row: DetailedTransaction) {
        if let Some(revenue) = recognized_revenue(row.status, row.amount, row.paid_amount) {
            let summary = &mut self.summary;
            let (bucket, count) = match row.category {
                RevenueCategory::Consultation => {
                    (&mut summary.consultation_revenue, &mut summary.consultation_count)
                }
                RevenueCategory::Superconsultant => {
                    (&mut summary.superconsultant_revenue, &mut summary.superconsultant_count)
                }
                RevenueCategory::Reassignment => {
                    (&mut summary.reassignment_revenue, &mut summary.reassignment_count)
                }
                RevenueCategory::Lab => (&mut summary.lab_revenue, &mut summary.lab_count),
            };
            *bucket += revenue;
            *count += 1;
            summary.total_revenue += revenue;
            summary.total_transactions = summary.consultation_count
                + summary.superconsultant_count
                + summary.reassignment_count
                + summary.lab_count;
        }
        self.rows.push(row);
    }

    fn record_entry(
        &mut self,
        patient: &PatientRecord,
        entry: &BillingEntry,
        category: RevenueCategory,
        window: &DateWindow,
    ) {
        let Some(date) = bill_date(entry, patient) else { return };
        if !window.contains(date) {
            return;
        }
        self.record(DetailedTransaction {
            id: entry
                .id
                .clone()
                .or_else(|| entry.invoice_number.clone())
                .unwrap_or_else(|| format!("{}-{}", patient.id, date.timestamp_millis())),
            category,
            patient_name: patient.name.clone().unwrap_or_else(|| "N/A".to_string()),
            uh_id: patient.uh_id.clone().unwrap_or_else(|| "N/A".to_string()),
            invoice_number: entry.invoice_number.clone().or_else(|| entry.bill_no.clone()),
            description: entry.description.clone().or_else(|| entry.kind.clone()),
            amount: entry.amount,
            paid_amount: entry.paid_amount,
            status: entry.status.unwrap_or(BillStatus::Pending),
            date,
        });
    }

    pub fn add_patients(&mut self, patients: &[PatientRecord], window: &DateWindow) {
        for patient in patients {
            for entry in &patient.billing {
                let category = if entry.is_superconsultant() {
                    RevenueCategory::Superconsultant
                } else {
                    RevenueCategory::Consultation
                };
                self.record_entry(patient, entry, category, window);
            }
            for entry in &patient.reassigned_billing {
                self.record_entry(patient, entry, RevenueCategory::Reassignment, window);
            }
        }
    }

    pub fn add_lab_orders(&mut self, records: &[TestRequestRecord], window: &DateWindow) {
        for record in records {
            let Some(invoice) = BillingSource::LabTest(record).to_invoice() else {
                continue;
            };
            if record.created_at.is_some_and(|at| !window.contains(at)) {
                continue;
            }
            self.record(DetailedTransaction {
                id: record.id.clone(),
                category: RevenueCategory::Lab,
                patient_name: invoice.patient_name,
                uh_id: invoice.uh_id,
                invoice_number: Some(invoice.invoice_number),
                description: invoice.description,
                amount: invoice.amount,
                paid_amount: invoice.paid_amount,
                status: invoice.status,
                date: invoice.date,
            });
        }
    }

    pub fn breakdown(&self) -> Vec<RevenueBreakdown> {
        let s = &self.summary;
        let total = s.total_revenue;
        [
            (RevenueCategory::Consultation, s.consultation_revenue, s.consultation_count),
            (RevenueCategory::Superconsultant, s.superconsultant_revenue, s.superconsultant_count),
            (RevenueCategory::Reassignment, s.reassignment_revenue, s.reassignment_count),
            (RevenueCategory::Lab, s.lab_revenue, s.lab_count),
        ]
        .into_iter()
        .map(|(category, revenue, count)| RevenueBreakdown {
            category,
            revenue,
            count,
            percentage: if total > 0.0 {
                round2(revenue / total * 100.0)
            } else {
                0.0
            },
        })
        .collect()
    }

    pub fn finish(mut self, report_type: ReportType, window: DateWindow) -> FinancialReportResponse {
        let breakdown = self.breakdown();
        self.rows.sort_by(|a, b| b.date.cmp(&a.date));
        FinancialReportResponse {
            report_type,
            period: ReportPeriod {
                start: window.start,
                end: window.end,
            },
            summary: self.summary,
            breakdown,
            transactions: self.rows,
        }
    }
}

pub struct FinancialReportService {
    sources: BillingSourceClient,
}

impl FinancialReportService {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_client(Arc::new(SupabaseClient::new(config)))
    }

    pub fn with_client(supabase: Arc<SupabaseClient>) -> Self {
        Self {
            sources: BillingSourceClient::new(supabase),
        }
    }

    pub async fn generate_report(
        &self,
        scope: &CenterScope,
        query: &FinancialReportQuery,
        now: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<FinancialReportResponse, BillingError> {
        let report_type = query.report_type.unwrap_or_default();
        let window = report_window(report_type, query.start_date, query.end_date, now)?;
        debug!("Generating {:?} report for {:?}: {:?}", report_type, scope, window);

        let patients = self
            .sources
            .fetch_patients(scope, auth_token)
            .await
            .map_err(|e| BillingError::SourceUnavailable {
                source_name: "patient",
                message: e.to_string(),
            })?;
        let tests = self
            .sources
            .fetch_test_requests(scope, &window, LabDateMatch::CreatedOnly, auth_token)
            .await
            .map_err(|e| BillingError::SourceUnavailable {
                source_name: "test request",
                message: e.to_string(),
            })?;

        let mut acc = RevenueAccumulator::default();
        acc.add_patients(&patients, &window);
        acc.add_lab_orders(&tests, &window);

        info!(
            "Report {:?}: revenue {:.2} over {} bills",
            report_type, acc.summary.total_revenue, acc.summary.total_transactions
        );
        Ok(acc.finish(report_type, window))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderBilling;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn bill(amount: f64, paid: f64, status: BillStatus, date: DateTime<Utc>, kind: Option<&str>) -> BillingEntry {
        BillingEntry {
            id: Some(format!("b-{}", amount)),
            amount,
            paid_amount: paid,
            status: Some(status),
            consultation_type: kind.map(str::to_string),
            created_at: Some(date),
            ..Default::default()
        }
    }

    #[test]
    fn windows_follow_the_report_type() {
        let now = at(2024, 3, 15, 10);

        let daily = report_window(ReportType::Daily, None, None, now).unwrap();
        assert_eq!(daily.start, Some(at(2024, 3, 15, 0)));
        assert_eq!(daily.end, Some(at(2024, 3, 16, 0)));
        assert!(daily.contains(at(2024, 3, 15, 23)));
        assert!(!daily.contains(at(2024, 3, 16, 1)));
        assert_eq!(ReportType::default(), ReportType::Daily);

        let weekly = report_window(ReportType::Weekly, None, None, now).unwrap();
        assert_eq!(weekly.start, Some(at(2024, 3, 8, 10)));

        let monthly = report_window(ReportType::Monthly, None, None, now).unwrap();
        assert_eq!(monthly.start, Some(at(2024, 3, 1, 0)));
        assert_eq!(monthly.end, Some(now));

        let yearly = report_window(ReportType::Yearly, None, None, now).unwrap();
        assert_eq!(yearly.start, Some(at(2024, 1, 1, 0)));

        let open = report_window(ReportType::Custom, NaiveDate::from_ymd_opt(2024, 1, 1), None, now).unwrap();
        assert!(!open.is_bounded());
    }

    #[test]
    fn only_settled_bills_earn_revenue_but_all_are_listed() {
        let window = DateWindow::default();
        let patient = PatientRecord {
            id: "p1".to_string(),
            name: Some("Ravi".to_string()),
            billing: vec![
                bill(500.0, 500.0, BillStatus::Paid, at(2024, 3, 2, 9), Some("OP")),
                bill(300.0, 0.0, BillStatus::Pending, at(2024, 3, 3, 9), None),
                bill(1000.0, 0.0, BillStatus::Completed, at(2024, 3, 4, 9), Some("superconsultant_normal")),
            ],
            reassigned_billing: vec![bill(200.0, 150.0, BillStatus::Paid, at(2024, 3, 5, 9), None)],
            ..Default::default()
        };
        let lab = TestRequestRecord {
            id: "t1".to_string(),
            created_at: Some(at(2024, 3, 6, 9)),
            billing: Some(OrderBilling {
                amount: 600.0,
                paid_amount: 600.0,
                status: Some(BillStatus::Paid),
                ..Default::default()
            }),
            ..Default::default()
        };

        let mut acc = RevenueAccumulator::default();
        acc.add_patients(&[patient], &window);
        acc.add_lab_orders(&[lab], &window);
        let report = acc.finish(ReportType::Custom, window);

        assert_eq!(report.summary.consultation_revenue, 500.0);
        assert_eq!(report.summary.superconsultant_revenue, 1000.0);
        assert_eq!(report.summary.reassignment_revenue, 150.0);
        assert_eq!(report.summary.lab_revenue, 600.0);
        assert_eq!(report.summary.total_revenue, 2250.0);
        // The pending consultation is listed but not counted.
        assert_eq!(report.summary.consultation_count, 1);
        assert_eq!(report.summary.superconsultant_count, 1);
        assert_eq!(report.summary.reassignment_count, 1);
        assert_eq!(report.summary.lab_count, 1);
        assert_eq!(report.summary.total_transactions, 4);
        assert_eq!(report.transactions.len(), 5);
        assert_eq!(report.transactions[0].category, RevenueCategory::Lab);

        let lab_share = report
            .breakdown
            .iter()
            .find(|b| b.category == RevenueCategory::Lab)
            .unwrap();
        assert_eq!(lab_share.percentage, 26.67);
    }

    #[test]
    fn empty_report_has_zero_percentages() {
        let acc = RevenueAccumulator::default();
        let breakdown = acc.breakdown();
        assert_eq!(breakdown.len(), 4);
        assert!(breakdown.iter().all(|b| b.percentage == 0.0));
    }
}
