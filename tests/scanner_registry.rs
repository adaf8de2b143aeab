use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use netsec_cloud::compliance::{ComplianceMapper, Framework};
use netsec_cloud::core::{CheckType, Severity};
use netsec_cloud::platform::{CommandOutput, CommandRunner};
use netsec_cloud::providers::Credentials;
use netsec_cloud::scanner::{CloudScanner, dedup_findings};

/// Answers vendor CLI calls from a fixed table of command line prefixes.
#[derive(Default)]
struct CannedCli {
    answers: Vec<(&'static str, CommandOutput)>,
    calls: Mutex<Vec<String>>,
}

impl CannedCli {
    fn answer(mut self, prefix: &'static str, stdout: &str) -> Self {
        self.answers.push((prefix, CommandOutput::success(stdout)));
        self
    }

    fn refuse(mut self, prefix: &'static str, stderr: &str) -> Self {
        self.answers.push((prefix, CommandOutput::failure(254, stderr)));
        self
    }

    fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .map(|c| c.iter().filter(|l| l.starts_with(prefix)).count())
            .unwrap_or(0)
    }
}

impl CommandRunner for CannedCli {
    fn run(&self, cmd: &str, args: &[String], _env: &[(String, String)]) -> Result<CommandOutput> {
        let line = format!("{cmd} {}", args.join(" "));
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(line.clone());
        }
        self.answers
            .iter()
            .filter(|(prefix, _)| line.starts_with(prefix))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, out)| out.clone())
            .ok_or_else(|| anyhow!("failed to start process: {cmd}"))
    }
}

fn aws_account() -> CannedCli {
    CannedCli::default()
        .answer("aws sts get-caller-identity", r#"{"Account":"123456789012"}"#)
        .answer(
            "aws s3api list-buckets",
            r#"{"Buckets":[{"Name":"public-logs"}]}"#,
        )
        .answer(
            "aws s3api get-bucket-acl",
            r#"{"Grants":[{"Grantee":{"Type":"Group","URI":"http://acs.amazonaws.com/groups/global/AllUsers"},"Permission":"READ"}]}"#,
        )
        .refuse(
            "aws s3api get-bucket-encryption",
            "An error occurred (ServerSideEncryptionConfigurationNotFoundError)",
        )
        .answer("aws s3api get-bucket-versioning", r#"{"Status":"Enabled"}"#)
}

#[test]
fn failing_check_becomes_one_scan_error_next_to_real_findings() {
    let runner = aws_account().refuse(
        "aws ec2 describe-security-groups",
        "An error occurred (UnauthorizedOperation)",
    );
    let mut scanner = CloudScanner::with_runner(Arc::new(runner));
    assert!(scanner.add_provider("aws", Credentials::default(), Vec::new()));

    let checks = [CheckType::Storage, CheckType::Networking];
    let results = scanner.scan(Some(&checks[..]), None);
    let aws = &results["aws"];

    let types: Vec<&str> = aws.iter().map(|f| f.finding_type.as_str()).collect();
    assert_eq!(types, vec!["s3_public_access", "s3_no_encryption", "scan_error"]);

    let error = &aws[2];
    assert_eq!(error.finding_id, "aws-scan-error-networking");
    assert_eq!(error.severity, Severity::Info);
    assert!(error.description.contains("UnauthorizedOperation"));

    let summary = scanner.get_summary(&results);
    assert_eq!(summary.total_findings, 3);
    assert_eq!(summary.by_provider["aws"], 3);
    assert_eq!(summary.by_type["scan_error"], 1);

    let all: Vec<_> = results.values().flatten().cloned().collect();
    let cis = ComplianceMapper::default().map_findings_to_framework(&all, Framework::Cis);
    let ids: Vec<&str> = cis.iter().map(|c| c.control_id.as_str()).collect();
    assert_eq!(ids, vec!["2.1.1", "2.1.2"]);
}

#[test]
fn every_region_rescans_account_wide_checks_and_dedup_collapses_them() {
    let runner = Arc::new(
        aws_account().answer("aws ec2 describe-security-groups", r#"{"SecurityGroups":[]}"#),
    );
    let mut scanner = CloudScanner::with_runner(runner.clone());
    let regions = vec!["us-east-1".to_string(), "eu-west-1".to_string()];
    assert!(scanner.add_provider("aws", Credentials::default(), regions));

    let checks = [CheckType::Storage, CheckType::Networking];
    let mut findings = scanner.scan_provider("aws", Some(&checks[..]));

    let public = |list: &[netsec_cloud::core::Finding]| {
        list.iter()
            .filter(|f| f.finding_type == "s3_public_access")
            .count()
    };
    assert_eq!(public(&findings), 2);
    assert_eq!(runner.count("aws s3api list-buckets"), 2);
    assert_eq!(runner.count("aws ec2 describe-security-groups --region us-east-1"), 1);
    assert_eq!(runner.count("aws ec2 describe-security-groups --region eu-west-1"), 1);

    dedup_findings(&mut findings);
    assert_eq!(public(&findings), 1);
    assert_eq!(findings.len(), 2);
}

#[test]
fn rejected_credentials_leave_the_registry_untouched() {
    let runner = CannedCli::default()
        .refuse("aws sts", "An error occurred (InvalidClientTokenId)")
        .answer("gcloud projects list", "[]");
    let mut scanner = CloudScanner::with_runner(Arc::new(runner));

    assert!(!scanner.add_provider("aws", Credentials::default(), Vec::new()));
    assert!(!scanner.add_provider("oracle", Credentials::default(), Vec::new()));
    assert!(scanner.add_provider("gcp", Credentials::default(), Vec::new()));
    assert_eq!(scanner.list_providers(), vec!["gcp".to_string()]);

    let results = scanner.scan(Some(&[CheckType::AuditLogging][..]), Some(&["aws", "gcp"][..]));
    assert_eq!(results.keys().collect::<Vec<_>>(), vec!["gcp"]);
    assert!(results["gcp"].is_empty());
    assert!(scanner.scan_provider("aws", None).is_empty());
}
