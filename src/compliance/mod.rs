//! Finding to compliance control mapping.
//!
//! A [`ComplianceMapper`] holds an explicit [`MappingConfig`]; nothing here
//! reads process-wide tables. Only failing controls are reported: a control
//! that does not appear in the output had no mapped finding.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::{Finding, ProviderKind, Severity};

mod tables;

pub const BUILTIN_MAPPING_VERSION: &str = "2024.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framework {
    Cis,
    Nist,
    PciDss,
    Hipaa,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameworkInfo {
    pub name: Framework,
    pub display_name: &'static str,
    pub description: &'static str,
    pub supported_providers: Vec<ProviderKind>,
}

impl Framework {
    pub const ALL: [Framework; 4] = [
        Framework::Cis,
        Framework::Nist,
        Framework::PciDss,
        Framework::Hipaa,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Framework::Cis => "cis",
            Framework::Nist => "nist",
            Framework::PciDss => "pci_dss",
            Framework::Hipaa => "hipaa",
        }
    }

    pub fn info(self) -> FrameworkInfo {
        let (display_name, description) = match self {
            Framework::Cis => (
                "CIS Benchmarks",
                "Center for Internet Security Benchmarks (AWS/Azure/GCP)",
            ),
            Framework::Nist => (
                "NIST CSF",
                "NIST Cybersecurity Framework (subcategory mapping)",
            ),
            Framework::PciDss => (
                "PCI-DSS",
                "Payment Card Industry Data Security Standard (finding-to-control mapping)",
            ),
            Framework::Hipaa => (
                "HIPAA",
                "Health Insurance Portability and Accountability Act (finding-to-safeguard mapping)",
            ),
        };
        FrameworkInfo {
            name: self,
            display_name,
            description,
            supported_providers: ProviderKind::ALL.to_vec(),
        }
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Framework {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "cis" => Ok(Framework::Cis),
            "nist" => Ok(Framework::Nist),
            "pci_dss" | "pci" => Ok(Framework::PciDss),
            "hipaa" => Ok(Framework::Hipaa),
            other => Err(format!(
                "unsupported framework: {other} (expected cis|nist|pci_dss|hipaa)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRef {
    pub control_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl ControlRef {
    pub fn new(control_id: &str, title: Option<&str>) -> Self {
        Self {
            control_id: control_id.to_string(),
            title: title.map(str::to_string),
        }
    }

    /// Title shown for the control; the id when no title is set.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.control_id)
    }
}

/// Control reference as written in a mapping file: either a bare id or a
/// table with `control_id` and an optional `title`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawControlRef {
    Id(String),
    Full(ControlRef),
}

impl From<RawControlRef> for ControlRef {
    fn from(raw: RawControlRef) -> Self {
        match raw {
            RawControlRef::Id(control_id) => ControlRef {
                control_id,
                title: None,
            },
            RawControlRef::Full(r) => r,
        }
    }
}

/// Finding type to control for one framework.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FrameworkTable {
    entries: BTreeMap<String, ControlRef>,
}

impl FrameworkTable {
    pub fn get(&self, finding_type: &str) -> Option<&ControlRef> {
        self.entries.get(finding_type)
    }

    pub fn insert(&mut self, finding_type: impl Into<String>, control: ControlRef) {
        self.entries.insert(finding_type.into(), control);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let mut table = Self::default();
        for (finding_type, control_id) in pairs {
            table.insert(*finding_type, ControlRef::new(control_id, None));
        }
        table
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingConfig {
    pub version: String,
    tables: BTreeMap<Framework, FrameworkTable>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMappingFile {
    version: Option<String>,
    cis: Option<BTreeMap<String, RawControlRef>>,
    nist: Option<BTreeMap<String, RawControlRef>>,
    pci_dss: Option<BTreeMap<String, RawControlRef>>,
    hipaa: Option<BTreeMap<String, RawControlRef>>,
}

impl MappingConfig {
    pub fn empty(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            tables: Framework::ALL
                .iter()
                .map(|fw| (*fw, FrameworkTable::default()))
                .collect(),
        }
    }

    /// Tables shipped with the tool.
    pub fn builtin() -> Self {
        let mut cis = FrameworkTable::default();
        for (finding_type, control_id, title) in tables::CIS {
            cis.insert(*finding_type, ControlRef::new(control_id, Some(*title)));
        }

        let mut config = Self::empty(BUILTIN_MAPPING_VERSION);
        config.tables.insert(Framework::Cis, cis);
        config
            .tables
            .insert(Framework::Nist, FrameworkTable::from_pairs(tables::NIST));
        config
            .tables
            .insert(Framework::PciDss, FrameworkTable::from_pairs(tables::PCI_DSS));
        config
            .tables
            .insert(Framework::Hipaa, FrameworkTable::from_pairs(tables::HIPAA));
        config
    }

    /// Parses a mapping file:
    ///
    /// ```toml
    /// version = "acme-1"
    /// [cis]
    /// custom_check = { control_id = "9.1", title = "Custom Control" }
    /// [nist]
    /// custom_check = "PR.AC-1"
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let raw: RawMappingFile = toml::from_str(text).context("failed to parse mapping file")?;
        let mut config = Self::empty(raw.version.unwrap_or_else(|| "custom".to_string()));
        let sections = [
            (Framework::Cis, raw.cis),
            (Framework::Nist, raw.nist),
            (Framework::PciDss, raw.pci_dss),
            (Framework::Hipaa, raw.hipaa),
        ];
        for (framework, section) in sections {
            let table = config.tables.entry(framework).or_default();
            for (finding_type, control) in section.unwrap_or_default() {
                table.insert(finding_type, control.into());
            }
        }
        Ok(config)
    }

    /// Overlays `other` on top of `self`; entries of `other` win.
    pub fn merge(mut self, other: MappingConfig) -> Self {
        for (framework, table) in other.tables {
            let target = self.tables.entry(framework).or_default();
            for (finding_type, control) in table.entries {
                target.insert(finding_type, control);
            }
        }
        self.version = format!("{}+{}", self.version, other.version);
        self
    }

    pub fn table(&self, framework: Framework) -> Option<&FrameworkTable> {
        self.tables.get(&framework)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlStatus {
    Passed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlResult {
    pub control_id: String,
    pub control_title: String,
    pub framework: Framework,
    pub status: ControlStatus,
    pub finding_ids: Vec<String>,
    pub finding_count: usize,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ControlInfo {
    pub control_id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceSummary {
    pub total_controls_evaluated: usize,
    pub passed: usize,
    pub failed: usize,
}

impl ComplianceSummary {
    pub fn from_results(results: &[ControlResult]) -> Self {
        let failed = results
            .iter()
            .filter(|r| r.status == ControlStatus::Failed)
            .count();
        Self {
            total_controls_evaluated: results.len(),
            passed: results.len() - failed,
            failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub schema_version: String,
    pub tool_version: String,
    pub generated_at: String,
    pub providers: Vec<String>,
    pub framework: Framework,
    pub findings_count: usize,
    pub controls: Vec<ControlResult>,
    pub summary: ComplianceSummary,
}

pub struct ComplianceMapper {
    config: MappingConfig,
}

impl Default for ComplianceMapper {
    fn default() -> Self {
        Self::new(MappingConfig::builtin())
    }
}

impl ComplianceMapper {
    pub fn new(config: MappingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MappingConfig {
        &self.config
    }

    /// Groups mapped findings by control. Scan errors and unmapped types are
    /// ignored; each result carries the ids of its findings in input order
    /// and the highest severity among them. Sorted by control id, then title.
    pub fn map_findings_to_framework(
        &self,
        findings: &[Finding],
        framework: Framework,
    ) -> Vec<ControlResult> {
        let Some(table) = self.config.table(framework) else {
            return Vec::new();
        };

        let mut buckets: BTreeMap<(String, String), (Vec<String>, Severity)> = BTreeMap::new();
        for finding in findings {
            if finding.is_scan_error() {
                continue;
            }
            let Some(control) = table.get(&finding.finding_type) else {
                continue;
            };
            let key = (
                control.control_id.clone(),
                control.display_title().to_string(),
            );
            let (ids, severity) = buckets.entry(key).or_insert((Vec::new(), Severity::Info));
            ids.push(finding.finding_id.clone());
            *severity = (*severity).max(finding.severity);
        }

        buckets
            .into_iter()
            .map(|((control_id, control_title), (finding_ids, severity))| ControlResult {
                control_id,
                control_title,
                framework,
                status: ControlStatus::Failed,
                finding_count: finding_ids.len(),
                finding_ids,
                severity,
            })
            .collect()
    }

    /// Every control the framework table references, de-duplicated and
    /// sorted.
    pub fn get_framework_controls(&self, framework: Framework) -> Vec<ControlInfo> {
        let Some(table) = self.config.table(framework) else {
            return Vec::new();
        };
        let mut controls: Vec<ControlInfo> = table
            .entries
            .values()
            .map(|c| ControlInfo {
                control_id: c.control_id.clone(),
                title: c.display_title().to_string(),
            })
            .collect();
        controls.sort();
        controls.dedup();
        controls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SCAN_ERROR_TYPE;

    fn finding(id: &str, kind: &str, severity: Severity) -> Finding {
        Finding::new(ProviderKind::Aws, id, kind, severity, "t", "d", "r", "global")
    }

    #[test]
    fn cis_maps_public_bucket_to_block_public_access() {
        let mapper = ComplianceMapper::default();
        let results = mapper.map_findings_to_framework(
            &[finding("aws-s3-public-b", "s3_public_access", Severity::High)],
            Framework::Cis,
        );
        assert_eq!(results.len(), 1);
        let r = &results[0];
        assert_eq!(r.control_id, "2.1.1");
        assert_eq!(r.control_title, "S3 Block Public Access");
        assert_eq!(r.framework, Framework::Cis);
        assert_eq!(r.status, ControlStatus::Failed);
        assert_eq!(r.finding_ids, vec!["aws-s3-public-b".to_string()]);
        assert_eq!(r.finding_count, 1);
        assert_eq!(r.severity, Severity::High);
    }

    #[test]
    fn nist_results_are_sorted_by_control_id() {
        let mapper = ComplianceMapper::default();
        let results = mapper.map_findings_to_framework(
            &[
                finding("u1", "iam_no_mfa", Severity::High),
                finding("sg1", "security_group_open", Severity::High),
            ],
            Framework::Nist,
        );
        let ids: Vec<&str> = results.iter().map(|r| r.control_id.as_str()).collect();
        assert_eq!(ids, vec!["PR.AC-5", "PR.AC-7"]);
        assert_eq!(results[0].control_title, "PR.AC-5");
    }

    #[test]
    fn severity_is_the_maximum_and_ids_keep_input_order() {
        let mapper = ComplianceMapper::default();
        let results = mapper.map_findings_to_framework(
            &[
                finding("a", "iam_overprivileged", Severity::Low),
                finding("b", "iam_root_access_keys", Severity::Critical),
                finding("c", "iam_broad_role", Severity::Medium),
            ],
            Framework::PciDss,
        );
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].control_id, "7.1");
        assert_eq!(results[0].severity, Severity::Critical);
        assert_eq!(results[0].finding_ids, vec!["a", "b", "c"]);
        assert_eq!(results[0].finding_count, 3);
    }

    #[test]
    fn same_id_different_titles_are_separate_controls() {
        let mapper = ComplianceMapper::default();
        let results = mapper.map_findings_to_framework(
            &[
                finding("root", "iam_root_access_keys", Severity::Critical),
                finding("gcp", "iam_broad_role", Severity::High),
            ],
            Framework::Cis,
        );
        let keys: Vec<(&str, &str)> = results
            .iter()
            .map(|r| (r.control_id.as_str(), r.control_title.as_str()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("1.4", "GCP IAM Least Privilege"),
                ("1.4", "Root Access Keys Inactive"),
            ]
        );
    }

    #[test]
    fn scan_errors_unmapped_types_and_empty_input_yield_nothing() {
        let mapper = ComplianceMapper::default();
        for framework in Framework::ALL {
            assert!(mapper.map_findings_to_framework(&[], framework).is_empty());
            let results = mapper.map_findings_to_framework(
                &[
                    finding("e", SCAN_ERROR_TYPE, Severity::Info),
                    finding("x", "made_up_type", Severity::Critical),
                ],
                framework,
            );
            assert!(results.is_empty(), "framework={framework}");
        }
    }

    #[test]
    fn only_failed_controls_are_reported() {
        let mapper = ComplianceMapper::default();
        let findings = [
            finding("v", "s3_no_versioning", Severity::Low),
            finding("t", "cloudtrail_disabled", Severity::High),
        ];
        let results = mapper.map_findings_to_framework(&findings, Framework::Cis);
        assert!(results.iter().all(|r| r.status == ControlStatus::Failed));
        assert!(results.iter().all(|r| r.finding_count > 0));
        assert!(!results.iter().any(|r| r.control_id == "2.1.1"));

        let summary = ComplianceSummary::from_results(&results);
        assert_eq!(summary.passed, 0);
        assert_eq!(summary.failed, results.len());
    }

    #[test]
    fn mapping_is_idempotent() {
        let mapper = ComplianceMapper::default();
        let findings = [
            finding("a", "nsg_open_rule", Severity::High),
            finding("b", "storage_no_encryption", Severity::Medium),
            finding("c", "ebs_unencrypted", Severity::Medium),
        ];
        for framework in Framework::ALL {
            assert_eq!(
                mapper.map_findings_to_framework(&findings, framework),
                mapper.map_findings_to_framework(&findings, framework)
            );
        }
    }

    #[test]
    fn framework_controls_are_deduplicated_and_sorted() {
        let mapper = ComplianceMapper::default();
        let hipaa = mapper.get_framework_controls(Framework::Hipaa);
        let ids: Vec<&str> = hipaa.iter().map(|c| c.control_id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["Access Control", "Audit Controls", "Encryption", "Integrity"]
        );

        let cis = mapper.get_framework_controls(Framework::Cis);
        assert!(cis.windows(2).all(|w| w[0] < w[1]));
        assert!(cis.iter().any(|c| c.control_id == "3.1" && c.title == "CloudTrail Enabled"));
        assert!(cis.iter().any(|c| c.control_id == "3.1" && c.title == "Storage Public Access"));
        assert!(!cis.iter().any(|c| c.control_id == "N/A"));
    }

    #[test]
    fn mapping_file_extends_builtin_tables() {
        let extra = MappingConfig::from_toml_str(
            r#"
version = "acme-1"

[cis]
custom_check = { control_id = "9.1", title = "Custom Control" }
s3_public_access = { control_id = "2.1.5" }

[hipaa]
custom_check = "Transmission Security"
"#,
        )
        .expect("parse mapping");
        let config = MappingConfig::builtin().merge(extra);
        assert_eq!(config.version, format!("{BUILTIN_MAPPING_VERSION}+acme-1"));

        let mapper = ComplianceMapper::new(config);
        let results = mapper.map_findings_to_framework(
            &[
                finding("c", "custom_check", Severity::Medium),
                finding("p", "s3_public_access", Severity::High),
            ],
            Framework::Cis,
        );
        let keys: Vec<(&str, &str)> = results
            .iter()
            .map(|r| (r.control_id.as_str(), r.control_title.as_str()))
            .collect();
        assert_eq!(keys, vec![("2.1.5", "2.1.5"), ("9.1", "Custom Control")]);

        let hipaa = mapper.map_findings_to_framework(
            &[finding("c", "custom_check", Severity::Medium)],
            Framework::Hipaa,
        );
        assert_eq!(hipaa[0].control_id, "Transmission Security");
    }

    #[test]
    fn mapping_file_rejects_unknown_frameworks() {
        assert!(MappingConfig::from_toml_str("[sox]\nx = \"1\"\n").is_err());
    }

    #[test]
    fn framework_names_parse_case_insensitively() {
        assert_eq!("PCI-DSS".parse::<Framework>(), Ok(Framework::PciDss));
        assert_eq!("Hipaa".parse::<Framework>(), Ok(Framework::Hipaa));
        assert!("sox".parse::<Framework>().is_err());
        assert_eq!(
            serde_json::to_value(Framework::PciDss).expect("serialize"),
            serde_json::json!("pci_dss")
        );
    }
}
