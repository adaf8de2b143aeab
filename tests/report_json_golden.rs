use std::collections::BTreeMap;

use netsec_cloud::core::{
    CheckType, Finding, ProviderKind, Remediation, SCHEMA_VERSION, ScanReport, Severity,
};
use netsec_cloud::scanner::summarize;

fn pinned(mut finding: Finding) -> Finding {
    finding.timestamp = "2026-01-01T00:00:00Z".to_string();
    finding
}

#[test]
fn scan_report_json_matches_golden() {
    let mut findings = BTreeMap::new();
    findings.insert(
        "aws".to_string(),
        vec![
            pinned(
                Finding::new(
                    ProviderKind::Aws,
                    "aws-s3-public-logs",
                    "s3_public_access",
                    Severity::High,
                    "S3 Bucket 'logs' has public read access",
                    "Bucket logs allows public read access, which may expose sensitive data",
                    "arn:aws:s3:::logs",
                    "global",
                )
                .with_remediation(Remediation::new(
                    &["Remove public read access from bucket ACL"],
                    &["Enable S3 Block Public Access"],
                )),
            ),
            pinned(Finding::new(
                ProviderKind::Aws,
                "aws-scan-error-compute-us-east-1",
                "scan_error",
                Severity::Info,
                "Error scanning AWS Compute",
                "Error occurred while scanning Compute: timed out",
                "aws",
                "us-east-1",
            )),
        ],
    );
    findings.insert("gcp".to_string(), vec![]);

    let report = ScanReport {
        schema_version: SCHEMA_VERSION.to_string(),
        tool_version: "0.1.0".to_string(),
        generated_at: "2026-01-01T00:00:00Z".to_string(),
        check_types: vec![CheckType::Storage, CheckType::Compute],
        summary: summarize(&findings),
        findings,
    };

    let actual = serde_json::to_value(&report).expect("serialize report");
    let expected: serde_json::Value =
        serde_json::from_str(include_str!("golden/scan_report.json")).expect("parse golden json");

    assert_eq!(actual, expected);
}
