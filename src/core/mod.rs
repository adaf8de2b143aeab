mod check;
mod finding;
mod provider;
mod report;
mod severity;

pub use check::CheckType;
pub use finding::{Finding, Remediation, SCAN_ERROR_TYPE};
pub(crate) use finding::now_rfc3339;
pub use provider::ProviderKind;
pub use report::{SCHEMA_VERSION, ScanReport, ScanSummary};
pub use severity::Severity;
