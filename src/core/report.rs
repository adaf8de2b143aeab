use std::collections::BTreeMap;

use crate::core::{CheckType, Finding, Severity};
use serde::{Deserialize, Serialize};

pub const SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub total_findings: usize,
    pub by_provider: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_type: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    pub schema_version: String,
    pub tool_version: String,
    pub generated_at: String,
    pub check_types: Vec<CheckType>,
    pub findings: BTreeMap<String, Vec<Finding>>,
    pub summary: ScanSummary,
}

impl ScanReport {
    /// Findings of every provider, in provider order.
    pub fn all_findings(&self) -> Vec<Finding> {
        self.findings.values().flatten().cloned().collect()
    }
}
