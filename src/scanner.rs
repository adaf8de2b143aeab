use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info};

use crate::core::{CheckType, Finding, ProviderKind, ScanSummary, Severity};
use crate::platform::{CommandRunner, SystemCommandRunner};
use crate::providers::{CloudProvider, Credentials};

/// Registry of authenticated providers keyed by kind.
pub struct CloudScanner {
    providers: BTreeMap<ProviderKind, CloudProvider>,
    runner: Arc<dyn CommandRunner>,
}

impl Default for CloudScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl CloudScanner {
    pub fn new() -> Self {
        Self::with_runner(Arc::new(SystemCommandRunner::default()))
    }

    pub fn with_runner(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            providers: BTreeMap::new(),
            runner,
        }
    }

    /// Authenticates and registers a provider. Returns false for an
    /// unsupported name or when authentication fails; nothing is registered
    /// in either case. A later success replaces the earlier instance.
    pub fn add_provider(&mut self, name: &str, credentials: Credentials, regions: Vec<String>) -> bool {
        let Ok(kind) = name.parse::<ProviderKind>() else {
            debug!(provider = name, "unsupported provider");
            return false;
        };
        let mut provider = CloudProvider::new(kind, credentials, regions, self.runner.clone());
        if !provider.authenticate() {
            info!(provider = kind.as_str(), "authentication failed");
            return false;
        }
        self.providers.insert(kind, provider);
        true
    }

    /// Scans the named providers (all registered when `None`). Unknown or
    /// unregistered names are skipped.
    pub fn scan(
        &mut self,
        check_types: Option<&[CheckType]>,
        providers: Option<&[&str]>,
    ) -> BTreeMap<String, Vec<Finding>> {
        let kinds: Vec<ProviderKind> = match providers {
            Some(names) => names
                .iter()
                .filter_map(|name| name.parse::<ProviderKind>().ok())
                .collect(),
            None => self.providers.keys().copied().collect(),
        };

        let mut results = BTreeMap::new();
        for kind in kinds {
            let Some(provider) = self.providers.get_mut(&kind) else {
                continue;
            };
            let findings = provider.scan_all(check_types);
            debug!(provider = kind.as_str(), count = findings.len(), "provider scanned");
            results.insert(kind.as_str().to_string(), findings);
        }
        results
    }

    pub fn scan_provider(&mut self, name: &str, check_types: Option<&[CheckType]>) -> Vec<Finding> {
        let Ok(kind) = name.parse::<ProviderKind>() else {
            return Vec::new();
        };
        match self.providers.get_mut(&kind) {
            Some(provider) => provider.scan_all(check_types),
            None => Vec::new(),
        }
    }

    pub fn get_summary(&self, findings: &BTreeMap<String, Vec<Finding>>) -> ScanSummary {
        summarize(findings)
    }

    pub fn list_providers(&self) -> Vec<String> {
        self.providers
            .keys()
            .map(|kind| kind.as_str().to_string())
            .collect()
    }
}

/// Drops repeats of an earlier `finding_id`, keeping the first occurrence.
///
/// `scan_all` runs account-wide categories (S3, IAM, RBAC, firewall rules)
/// once per region, so a multi-region scan reports the same resource several
/// times. Region-scoped findings and `scan_error`s carry distinct ids and
/// are kept.
pub fn dedup_findings(findings: &mut Vec<Finding>) {
    let mut seen = BTreeSet::new();
    findings.retain(|f| seen.insert(f.finding_id.clone()));
}

/// Counts findings per provider, severity and type. Every severity level is
/// present in the result, zero or not.
pub fn summarize(findings: &BTreeMap<String, Vec<Finding>>) -> ScanSummary {
    let mut summary = ScanSummary {
        total_findings: 0,
        by_provider: BTreeMap::new(),
        by_severity: Severity::ALL.iter().map(|s| (*s, 0)).collect(),
        by_type: BTreeMap::new(),
    };
    for (provider, list) in findings {
        summary.by_provider.insert(provider.clone(), list.len());
        summary.total_findings += list.len();
        for finding in list {
            *summary.by_severity.entry(finding.severity).or_insert(0) += 1;
            *summary
                .by_type
                .entry(finding.finding_type.clone())
                .or_insert(0) += 1;
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::testing::ScriptedRunner;

    fn finding(provider: ProviderKind, id: &str, kind: &str, severity: Severity) -> Finding {
        Finding::new(provider, id, kind, severity, "t", "d", "r", "global")
    }

    fn scanner(runner: ScriptedRunner) -> CloudScanner {
        CloudScanner::with_runner(Arc::new(runner))
    }

    #[test]
    fn unsupported_provider_is_rejected() {
        let mut s = scanner(ScriptedRunner::new());
        assert!(!s.add_provider("digitalocean", Credentials::default(), Vec::new()));
        assert!(s.list_providers().is_empty());
    }

    #[test]
    fn failed_authentication_registers_nothing() {
        let mut s = scanner(ScriptedRunner::new().fail("aws sts", "InvalidClientTokenId"));
        assert!(!s.add_provider("aws", Credentials::default(), Vec::new()));
        assert!(s.list_providers().is_empty());
        assert!(s.scan(None, None).is_empty());
    }

    #[test]
    fn scan_skips_unregistered_names() {
        let runner = ScriptedRunner::new()
            .ok("aws sts get-caller-identity", r#"{"Account":"1"}"#)
            .ok("aws s3api list-buckets", r#"{"Buckets":[]}"#);
        let mut s = scanner(runner);
        assert!(s.add_provider("AWS", Credentials::default(), Vec::new()));
        assert_eq!(s.list_providers(), vec!["aws".to_string()]);

        let checks = [CheckType::Storage];
        let results = s.scan(Some(&checks[..]), Some(&["aws", "gcp", "nope"][..]));
        assert_eq!(results.keys().collect::<Vec<_>>(), vec!["aws"]);
        assert!(results["aws"].is_empty());

        assert!(s.scan_provider("azure", None).is_empty());
    }

    #[test]
    fn summary_counts_every_dimension() {
        let mut findings = BTreeMap::new();
        findings.insert(
            "aws".to_string(),
            vec![
                finding(ProviderKind::Aws, "a1", "s3_public_access", Severity::High),
                finding(ProviderKind::Aws, "a2", "s3_public_access", Severity::High),
                finding(ProviderKind::Aws, "a3", "iam_no_mfa", Severity::Critical),
            ],
        );
        findings.insert(
            "gcp".to_string(),
            vec![finding(ProviderKind::Gcp, "g1", "gce_public_ip", Severity::Low)],
        );

        let summary = summarize(&findings);
        assert_eq!(summary.total_findings, 4);
        assert_eq!(summary.by_provider["aws"], 3);
        assert_eq!(summary.by_provider["gcp"], 1);
        assert_eq!(summary.by_severity[&Severity::High], 2);
        assert_eq!(summary.by_severity[&Severity::Info], 0);
        assert_eq!(summary.by_severity.len(), Severity::ALL.len());
        assert_eq!(summary.by_type["s3_public_access"], 2);
        assert_eq!(
            summary.by_severity.values().sum::<usize>(),
            summary.total_findings
        );
    }

    #[test]
    fn dedup_keeps_first_occurrence_in_order() {
        let mut findings = vec![
            finding(ProviderKind::Aws, "aws-iam-no-mfa-bob", "iam_no_mfa", Severity::High),
            finding(ProviderKind::Aws, "aws-sg-open-sg-1-22", "security_group_open", Severity::High),
            finding(ProviderKind::Aws, "aws-iam-no-mfa-bob", "iam_no_mfa", Severity::High),
            finding(ProviderKind::Aws, "aws-sg-open-sg-2-22", "security_group_open", Severity::High),
        ];
        dedup_findings(&mut findings);
        let ids: Vec<&str> = findings.iter().map(|f| f.finding_id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["aws-iam-no-mfa-bob", "aws-sg-open-sg-1-22", "aws-sg-open-sg-2-22"]
        );
    }

    #[test]
    fn empty_summary_has_all_levels_at_zero() {
        let summary = summarize(&BTreeMap::new());
        assert_eq!(summary.total_findings, 0);
        assert!(summary.by_severity.values().all(|n| *n == 0));
        assert_eq!(summary.by_severity.len(), 5);
    }
}
