// libs/billing-cell/src/services/reconciliation.rs
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::auth::{Role, User};

use crate::models::{
    BillFilters, BillingError, BillsQuery, BillsResponse, CenterScope, Invoice, PaymentLogRecord,
    Transaction,
};
use crate::services::attribution::{
    apply_creators, apply_names, attach_refunds, build_invoice_creator_map,
    build_transaction_creator_map, collect_user_ids, group_logs_by_patient,
    invoice_transaction_ids, resolve_creator, AttributionContext,
};
use crate::services::invoice::assemble_invoices;
use crate::services::sources::{BillingSourceClient, LabDateMatch};
use crate::services::summary::{day_window, normalize_page, paginate, summarize, transaction_from_log};

/// Superadmins may name any center or none (all centers); everyone else is
/// pinned to their own assignment.
pub fn resolve_center_scope(user: &User, requested: Option<&str>) -> Result<CenterScope, BillingError> {
    if user.role() == Role::Superadmin {
        return match requested.map(str::trim).filter(|c| !c.is_empty()) {
            None => Ok(CenterScope::AllCenters),
            Some(center_id) => Uuid::parse_str(center_id)
                .map(|_| CenterScope::Center(center_id.to_string()))
                .map_err(|_| BillingError::InvalidCenterId(center_id.to_string())),
        };
    }

    user.center_id
        .as_deref()
        .filter(|c| !c.is_empty())
        .map(|c| CenterScope::Center(c.to_string()))
        .ok_or(BillingError::MissingCenterAssignment)
}

fn unavailable(source_name: &'static str, err: anyhow::Error) -> BillingError {
    BillingError::SourceUnavailable {
        source_name,
        message: err.to_string(),
    }
}

pub struct BillingReconciliationService {
    sources: BillingSourceClient,
    default_page_limit: usize,
}

impl BillingReconciliationService {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_client(Arc::new(SupabaseClient::new(config)), config)
    }

    pub fn with_client(supabase: Arc<SupabaseClient>, config: &AppConfig) -> Self {
        Self {
            sources: BillingSourceClient::new(supabase),
            default_page_limit: config.default_page_limit,
        }
    }

    /// Unified invoice list, ledger transactions, pagination and totals for one scope.
    pub async fn get_bills_and_transactions(
        &self,
        scope: &CenterScope,
        query: &BillsQuery,
        auth_token: &str,
    ) -> Result<BillsResponse, BillingError> {
        debug!("Reconciling bills for {:?}", scope);

        let window = day_window(query.start_date, query.end_date)?;
        let filters = BillFilters {
            window,
            bill_type: query.bill_type,
            status: query.status,
            consultation_type: query.consultation_type.clone(),
        };

        let patients = self
            .sources
            .fetch_patients(scope, auth_token)
            .await
            .map_err(|e| unavailable("patient", e))?;
        let tests = self
            .sources
            .fetch_test_requests(scope, &window, LabDateMatch::CreatedOrRefunded, auth_token)
            .await
            .map_err(|e| unavailable("test request", e))?;
        let slits = match self.sources.fetch_slit_requests(scope, &window, auth_token).await {
            Ok(records) => records,
            Err(e) => {
                warn!("SLIT therapy bills unavailable, continuing without them: {}", e);
                Vec::new()
            }
        };
        let logs = self
            .sources
            .fetch_payment_logs(scope, &window, auth_token)
            .await
            .map_err(|e| unavailable("payment log", e))?;

        let mut invoices = assemble_invoices(&patients, &tests, &slits, &filters);
        debug!(
            "Assembled {} invoices from {} patients, {} lab orders, {} SLIT orders",
            invoices.len(),
            patients.len(),
            tests.len(),
            slits.len()
        );

        self.attribute_creators(scope, &mut invoices, &logs, auth_token).await;
        // Only refunds logged inside the window; the wider lookups feed attribution alone.
        attach_refunds(&mut invoices, &logs);

        let mut transactions: Vec<Transaction> = logs.iter().map(transaction_from_log).collect();

        let user_ids = collect_user_ids(&invoices, &transactions);
        let names = match self.sources.fetch_user_names(&user_ids, auth_token).await {
            Ok(names) => names,
            Err(e) => {
                warn!("User name lookup failed, names fall back to N/A: {}", e);
                HashMap::new()
            }
        };
        apply_names(&mut invoices, &mut transactions, &names);

        let summary = summarize(&invoices, transactions.len());
        let (page, limit) = normalize_page(query.page, query.limit, self.default_page_limit);
        let (bills, pagination) = paginate(&invoices, page, limit);
        transactions.truncate(limit);

        info!(
            "Returning {} of {} invoices and {} transactions",
            bills.len(),
            pagination.total_records,
            transactions.len()
        );

        Ok(BillsResponse {
            bills,
            transactions,
            pagination,
            summary,
        })
    }

    /// Runs the creator chain, widening the ledger lookups only for invoices
    /// still unresolved.
    async fn attribute_creators(
        &self,
        scope: &CenterScope,
        invoices: &mut [Invoice],
        logs: &[PaymentLogRecord],
        auth_token: &str,
    ) {
        let mut ctx = AttributionContext {
            invoice_creators: build_invoice_creator_map(logs),
            ..Default::default()
        };

        let numbers: BTreeSet<&str> = invoices
            .iter()
            .flat_map(|i| std::iter::once(i.invoice_number.as_str()).chain(i.bill_no.as_deref()))
            .filter(|n| !n.is_empty())
            .collect();
        let extra_logs = self
            .lookup_logs(scope, "invoice_number", numbers, auth_token)
            .await;
        for (number, creator) in build_invoice_creator_map(&extra_logs) {
            ctx.invoice_creators.entry(number).or_insert(creator);
        }

        let tx_ids: BTreeSet<String> = unresolved(invoices, &ctx)
            .flat_map(invoice_transaction_ids)
            .collect();
        let tx_logs = self
            .lookup_logs(scope, "transaction_id", &tx_ids, auth_token)
            .await;
        ctx.transaction_creators = build_transaction_creator_map(&tx_logs);

        let patient_ids: BTreeSet<String> = unresolved(invoices, &ctx)
            .filter_map(|i| i.patient_id.clone())
            .collect();
        let patient_logs = self
            .lookup_logs(scope, "patient_id", &patient_ids, auth_token)
            .await;
        ctx.patient_logs = group_logs_by_patient(patient_logs);

        apply_creators(invoices, &ctx);
    }

    async fn lookup_logs<I, S>(
        &self,
        scope: &CenterScope,
        column: &str,
        values: I,
        auth_token: &str,
    ) -> Vec<PaymentLogRecord>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        match self
            .sources
            .fetch_logs_matching(scope, column, values, auth_token)
            .await
        {
            Ok(logs) => logs,
            Err(e) => {
                warn!("Payment log lookup by {} failed: {}", column, e);
                Vec::new()
            }
        }
    }
}

fn unresolved<'a>(
    invoices: &'a [Invoice],
    ctx: &'a AttributionContext,
) -> impl Iterator<Item = &'a Invoice> + 'a {
    invoices
        .iter()
        .filter(move |invoice| resolve_creator(invoice, ctx).is_none())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use shared_utils::test_utils::TestUser;

    #[test]
    fn superadmin_scope_follows_the_requested_center() {
        let admin = TestUser::superadmin("root@clinic.test").to_user();
        assert_eq!(resolve_center_scope(&admin, None).unwrap(), CenterScope::AllCenters);
        assert_eq!(resolve_center_scope(&admin, Some("  ")).unwrap(), CenterScope::AllCenters);

        let center = Uuid::new_v4().to_string();
        assert_eq!(
            resolve_center_scope(&admin, Some(&center)).unwrap(),
            CenterScope::Center(center.clone())
        );
        assert_matches!(
            resolve_center_scope(&admin, Some("not-a-uuid")),
            Err(BillingError::InvalidCenterId(_))
        );
    }

    #[test]
    fn other_roles_are_pinned_to_their_center() {
        let accountant = TestUser::accountant("books@clinic.test").with_center("c-9").to_user();
        let other = Uuid::new_v4().to_string();
        assert_eq!(
            resolve_center_scope(&accountant, Some(&other)).unwrap(),
            CenterScope::Center("c-9".to_string())
        );

        let orphan = TestUser::receptionist("desk@clinic.test").without_center().to_user();
        assert_matches!(
            resolve_center_scope(&orphan, None),
            Err(BillingError::MissingCenterAssignment)
        );
    }
}
