use crate::core::{ProviderKind, Severity};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// `type` value of the synthetic finding emitted when enumeration fails.
pub const SCAN_ERROR_TYPE: &str = "scan_error";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remediation {
    #[serde(default)]
    pub immediate: Vec<String>,
    #[serde(default)]
    pub short_term: Vec<String>,
}

impl Remediation {
    pub fn new(immediate: &[&str], short_term: &[&str]) -> Self {
        Self {
            immediate: immediate.iter().map(|s| (*s).to_string()).collect(),
            short_term: short_term.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub finding_id: String,
    #[serde(rename = "type")]
    pub finding_type: String,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub resource: String,
    pub region: String,
    pub provider: ProviderKind,
    #[serde(default)]
    pub remediation: Option<Remediation>,
    pub timestamp: String,
}

impl Finding {
    pub fn new(
        provider: ProviderKind,
        finding_id: impl Into<String>,
        finding_type: impl Into<String>,
        severity: Severity,
        title: impl Into<String>,
        description: impl Into<String>,
        resource: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            finding_id: finding_id.into(),
            finding_type: finding_type.into(),
            severity,
            title: title.into(),
            description: description.into(),
            resource: resource.into(),
            region: region.into(),
            provider,
            remediation: None,
            timestamp: now_rfc3339(),
        }
    }

    pub fn with_remediation(mut self, remediation: Remediation) -> Self {
        self.remediation = Some(remediation);
        self
    }

    pub fn is_scan_error(&self) -> bool {
        self.finding_type == SCAN_ERROR_TYPE
    }
}

pub(crate) fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_type_and_lowercase_enums() {
        let finding = Finding::new(
            ProviderKind::Aws,
            "aws-s3-public-logs",
            "s3_public_access",
            Severity::High,
            "S3 Bucket 'logs' has public read access",
            "desc",
            "arn:aws:s3:::logs",
            "global",
        )
        .with_remediation(Remediation::new(&["a"], &["b"]));

        let v = serde_json::to_value(&finding).expect("serialize");
        assert_eq!(v["type"], "s3_public_access");
        assert_eq!(v["severity"], "high");
        assert_eq!(v["provider"], "aws");
        assert_eq!(v["remediation"]["immediate"][0], "a");
        assert!(v["timestamp"].as_str().is_some_and(|t| !t.is_empty()));
    }

    #[test]
    fn deserializes_without_remediation() {
        let json = r#"{
            "finding_id": "f1",
            "type": "iam_no_mfa",
            "severity": "medium",
            "title": "t",
            "description": "d",
            "resource": "r",
            "region": "global",
            "provider": "gcp",
            "timestamp": "2026-01-01T00:00:00Z"
        }"#;
        let finding: Finding = serde_json::from_str(json).expect("parse");
        assert_eq!(finding.remediation, None);
        assert_eq!(finding.provider, ProviderKind::Gcp);
        assert!(!finding.is_scan_error());
    }
}
