pub mod attribution;
pub mod invoice;
pub mod reconciliation;
pub mod reports;
pub mod sources;
pub mod summary;

pub use reconciliation::{resolve_center_scope, BillingReconciliationService};
pub use reports::FinancialReportService;
pub use sources::BillingSourceClient;
