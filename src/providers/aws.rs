use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::core::{CheckType, Finding, ProviderKind, Remediation, Severity};
use crate::platform::CommandRunner;
use crate::providers::cli::{CliSession, error_mentions};
use crate::providers::{AuthState, Credentials, custom_scan_error, scan_error_finding};

const DEFAULT_REGION: &str = "us-east-1";
const ALL_USERS_URI: &str = "http://acs.amazonaws.com/groups/global/AllUsers";
const NO_ENCRYPTION_CODE: &str = "ServerSideEncryptionConfigurationNotFoundError";
const MAX_TRAIL_STATUS_CHECKS: usize = 10;

pub struct AwsProvider {
    credentials: Credentials,
    regions: Vec<String>,
    runner: Arc<dyn CommandRunner>,
    state: AuthState,
    session: Option<CliSession>,
    account_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CallerIdentity {
    account: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BucketList {
    #[serde(default)]
    buckets: Vec<Bucket>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Bucket {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BucketAcl {
    #[serde(default)]
    grants: Vec<Grant>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Grant {
    grantee: Option<Grantee>,
}

#[derive(Debug, Deserialize)]
struct Grantee {
    #[serde(rename = "Type")]
    kind: Option<String>,
    #[serde(rename = "URI")]
    uri: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Versioning {
    status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AccountSummary {
    #[serde(default)]
    summary_map: BTreeMap<String, i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UserList {
    #[serde(default)]
    users: Vec<User>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct User {
    user_name: String,
    arn: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MfaDevices {
    #[serde(rename = "MFADevices", default)]
    devices: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AccessKeys {
    #[serde(default)]
    access_key_metadata: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PolicyList {
    #[serde(default)]
    policies: Vec<Policy>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Policy {
    policy_name: String,
    arn: String,
    default_version_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PolicyVersionResponse {
    policy_version: PolicyVersion,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PolicyVersion {
    #[serde(default)]
    document: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SecurityGroupList {
    #[serde(default)]
    security_groups: Vec<SecurityGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SecurityGroup {
    group_id: String,
    #[serde(default)]
    group_name: String,
    #[serde(default)]
    ip_permissions: Vec<IpPermission>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IpPermission {
    from_port: Option<i64>,
    ip_protocol: Option<String>,
    #[serde(default)]
    ip_ranges: Vec<IpRange>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IpRange {
    cidr_ip: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceList {
    #[serde(default)]
    reservations: Vec<Reservation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Reservation {
    #[serde(default)]
    instances: Vec<Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Instance {
    #[serde(default)]
    instance_id: String,
    metadata_options: Option<MetadataOptions>,
    public_ip_address: Option<String>,
    state: Option<InstanceState>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MetadataOptions {
    http_tokens: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceState {
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VolumeList {
    #[serde(default)]
    volumes: Vec<Volume>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Volume {
    #[serde(default)]
    volume_id: String,
    encrypted: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrailList {
    #[serde(default)]
    trails: Vec<Trail>,
}

#[derive(Debug, Deserialize)]
struct Trail {
    #[serde(rename = "TrailARN")]
    trail_arn: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrailStatus {
    #[serde(default)]
    is_logging: bool,
}

impl AwsProvider {
    pub fn new(credentials: Credentials, regions: Vec<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            credentials,
            regions,
            runner,
            state: AuthState::Unauthenticated,
            session: None,
            account_id: None,
        }
    }

    pub fn regions(&self) -> &[String] {
        &self.regions
    }

    pub fn auth_state(&self) -> AuthState {
        self.state
    }

    fn build_session(&self) -> CliSession {
        let creds = &self.credentials;
        let session = CliSession::new("aws", self.runner.clone())
            .with_env("AWS_PAGER", "")
            .with_trailing_args(&["--output", "json"]);

        match (&creds.access_key_id, &creds.secret_access_key) {
            (Some(key_id), Some(secret)) => {
                let mut session = session
                    .with_env("AWS_ACCESS_KEY_ID", key_id.as_str())
                    .with_env("AWS_SECRET_ACCESS_KEY", secret.as_str())
                    .with_env(
                        "AWS_DEFAULT_REGION",
                        creds.region.as_deref().unwrap_or(DEFAULT_REGION),
                    );
                if let Some(token) = &creds.session_token {
                    session = session.with_env("AWS_SESSION_TOKEN", token.as_str());
                }
                session
            }
            _ => match &creds.profile {
                Some(profile) => session.with_trailing_args(&["--profile", profile.as_str()]),
                None => session,
            },
        }
    }

    pub fn authenticate(&mut self) -> bool {
        if self.state == AuthState::Authenticated {
            return true;
        }
        let session = self.build_session();
        match session.json::<CallerIdentity>(&["sts", "get-caller-identity"]) {
            Ok(identity) => {
                debug!(account = ?identity.account, "aws authenticated");
                self.account_id = identity.account;
                self.session = Some(session);
                self.state = AuthState::Authenticated;
                true
            }
            Err(err) => {
                debug!("aws authentication failed: {err:#}");
                self.session = None;
                self.state = AuthState::Failed;
                false
            }
        }
    }

    fn ready_session(&mut self) -> Option<CliSession> {
        if !self.authenticate() {
            return None;
        }
        self.session.clone()
    }

    fn account_id(&self) -> &str {
        self.account_id.as_deref().unwrap_or("unknown")
    }

    pub fn scan_storage(&mut self, region: Option<&str>) -> Vec<Finding> {
        let Some(session) = self.ready_session() else {
            return Vec::new();
        };
        let mut findings = Vec::new();
        if let Err(err) = collect_storage(&session, "global", &mut findings) {
            findings.push(scan_error_finding(
                ProviderKind::Aws,
                CheckType::Storage,
                region,
                region.unwrap_or("global"),
                &err,
            ));
        }
        findings
    }

    pub fn scan_iam(&mut self, region: Option<&str>) -> Vec<Finding> {
        let Some(session) = self.ready_session() else {
            return Vec::new();
        };
        let mut findings = Vec::new();
        if let Err(err) = self.collect_iam(&session, &mut findings) {
            findings.push(scan_error_finding(
                ProviderKind::Aws,
                CheckType::Iam,
                region,
                "global",
                &err,
            ));
        }
        findings
    }

    pub fn scan_networking(&mut self, region: Option<&str>) -> Vec<Finding> {
        let Some(session) = self.ready_session() else {
            return Vec::new();
        };
        let reg = region.unwrap_or(DEFAULT_REGION);
        let mut findings = Vec::new();
        if let Err(err) = collect_networking(&session, reg, &mut findings) {
            findings.push(scan_error_finding(
                ProviderKind::Aws,
                CheckType::Networking,
                region,
                reg,
                &err,
            ));
        }
        findings
    }

    pub fn scan_compute(&mut self, region: Option<&str>) -> Vec<Finding> {
        let Some(session) = self.ready_session() else {
            return Vec::new();
        };
        let reg = region.unwrap_or(DEFAULT_REGION);
        let mut findings = Vec::new();
        if let Err(err) = collect_compute(&session, reg, &mut findings) {
            findings.push(scan_error_finding(
                ProviderKind::Aws,
                CheckType::Compute,
                region,
                reg,
                &err,
            ));
        }
        findings
    }

    /// CloudTrail presence and logging status.
    pub fn scan_audit_logging(&mut self, region: Option<&str>) -> Vec<Finding> {
        let Some(session) = self.ready_session() else {
            return Vec::new();
        };
        let reg = region
            .or(self.credentials.region.as_deref())
            .unwrap_or(DEFAULT_REGION)
            .to_string();
        let id = |base: &str| match region {
            Some(r) => format!("{base}-{r}"),
            None => base.to_string(),
        };

        let mut findings = Vec::new();
        let trails = match session.json::<Option<TrailList>>(&[
            "cloudtrail",
            "list-trails",
            "--region",
            reg.as_str(),
        ]) {
            Ok(trails) => trails.unwrap_or_default(),
            Err(err) if error_mentions(&err, "AccessDenied") => {
                findings.push(custom_scan_error(
                    ProviderKind::Aws,
                    id("aws-cloudtrail-access-denied"),
                    "Cannot read CloudTrail",
                    "Insufficient permissions to list CloudTrail trails".to_string(),
                    "arn:aws:cloudtrail",
                    &reg,
                ));
                return findings;
            }
            Err(err) => {
                findings.push(custom_scan_error(
                    ProviderKind::Aws,
                    id("aws-cloudtrail-error"),
                    "Error scanning CloudTrail",
                    format!("{err:#}"),
                    "arn:aws:cloudtrail",
                    &reg,
                ));
                return findings;
            }
        };

        let arns: Vec<String> = trails.trails.into_iter().filter_map(|t| t.trail_arn).collect();
        if arns.is_empty() {
            findings.push(
                Finding::new(
                    ProviderKind::Aws,
                    id("aws-cloudtrail-disabled"),
                    "cloudtrail_disabled",
                    Severity::High,
                    "CloudTrail is not enabled",
                    "No CloudTrail trail found; enable at least one trail for audit logging (CIS 3.x)",
                    "arn:aws:cloudtrail",
                    reg.as_str(),
                )
                .with_remediation(Remediation::new(
                    &["Enable CloudTrail in the AWS Console or via CloudFormation"],
                    &[
                        "Use a multi-region trail for broad coverage",
                        "Enable log file validation and encrypt logs",
                    ],
                )),
            );
            return findings;
        }

        let any_logging = arns.iter().take(MAX_TRAIL_STATUS_CHECKS).any(|arn| {
            session
                .json::<Option<TrailStatus>>(&[
                    "cloudtrail",
                    "get-trail-status",
                    "--name",
                    arn.as_str(),
                    "--region",
                    reg.as_str(),
                ])
                .ok()
                .flatten()
                .is_some_and(|status| status.is_logging)
        });
        if !any_logging {
            findings.push(
                Finding::new(
                    ProviderKind::Aws,
                    id("aws-cloudtrail-not-logging"),
                    "cloudtrail_not_logging",
                    Severity::High,
                    "CloudTrail is not logging",
                    "CloudTrail trail(s) exist but none have logging enabled",
                    "arn:aws:cloudtrail",
                    reg.as_str(),
                )
                .with_remediation(Remediation::new(
                    &["Start logging on at least one CloudTrail trail"],
                    &["Enable log file validation and monitor trail status"],
                )),
            );
        }
        findings
    }

    fn collect_iam(&self, session: &CliSession, findings: &mut Vec<Finding>) -> Result<()> {
        let account = self.account_id();

        if let Ok(Some(summary)) =
            session.json::<Option<AccountSummary>>(&["iam", "get-account-summary"])
        {
            let root_keys = summary
                .summary_map
                .get("AccountAccessKeysPresent")
                .copied()
                .unwrap_or(0);
            if root_keys > 0 {
                findings.push(
                    Finding::new(
                        ProviderKind::Aws,
                        "aws-root-access-keys",
                        "iam_root_access_keys",
                        Severity::Critical,
                        "Root account has active access keys",
                        "Root user should not have access keys; use IAM users/roles instead (CIS 1.4)",
                        format!("arn:aws:iam::{account}:root"),
                        "global",
                    )
                    .with_remediation(Remediation::new(
                        &["Deactivate and delete root access keys"],
                        &["Use IAM users or roles with least privilege for programmatic access"],
                    )),
                );
            }
        }

        let users = session
            .json::<Option<UserList>>(&["iam", "list-users"])
            .context("failed to list IAM users")?
            .unwrap_or_default();
        debug!(count = users.users.len(), "aws iam users");
        for user in users.users {
            let name = user.user_name.as_str();
            let mfa = session
                .json::<Option<MfaDevices>>(&["iam", "list-mfa-devices", "--user-name", name])?
                .unwrap_or_default();
            if !mfa.devices.is_empty() {
                continue;
            }
            let keys = session
                .json::<Option<AccessKeys>>(&["iam", "list-access-keys", "--user-name", name])?
                .unwrap_or_default();
            if keys.access_key_metadata.is_empty() {
                continue;
            }
            let resource = user
                .arn
                .clone()
                .unwrap_or_else(|| format!("arn:aws:iam::{account}:user/{name}"));
            findings.push(Finding::new(
                ProviderKind::Aws,
                format!("aws-iam-no-mfa-{name}"),
                "iam_no_mfa",
                Severity::High,
                format!("IAM User '{name}' does not have MFA enabled"),
                format!("User {name} has access keys but no MFA device configured"),
                resource,
                "global",
            ));
        }

        let policies = session
            .json::<Option<PolicyList>>(&["iam", "list-policies", "--scope", "Local"])
            .context("failed to list IAM policies")?
            .unwrap_or_default();
        for policy in policies.policies {
            let lowered = policy.policy_name.to_lowercase();
            if !(lowered.contains('*') || lowered.contains("admin")) {
                continue;
            }
            let Some(version_id) = policy.default_version_id.as_deref() else {
                continue;
            };
            let Ok(version) = session.json::<PolicyVersionResponse>(&[
                "iam",
                "get-policy-version",
                "--policy-arn",
                policy.arn.as_str(),
                "--version-id",
                version_id,
            ]) else {
                continue;
            };
            if has_wildcard_action(&version.policy_version.document) {
                let name = policy.policy_name.as_str();
                findings.push(Finding::new(
                    ProviderKind::Aws,
                    format!("aws-iam-wildcard-{name}"),
                    "iam_overprivileged",
                    Severity::Medium,
                    format!("IAM Policy '{name}' may be overprivileged"),
                    format!(
                        "Policy {name} contains wildcard actions which may grant excessive permissions"
                    ),
                    policy.arn.as_str(),
                    "global",
                ));
            }
        }
        Ok(())
    }
}

fn collect_storage(session: &CliSession, label: &str, findings: &mut Vec<Finding>) -> Result<()> {
    let buckets = session
        .json::<Option<BucketList>>(&["s3api", "list-buckets"])
        .context("failed to list S3 buckets")?
        .unwrap_or_default();
    debug!(count = buckets.buckets.len(), "aws s3 buckets");

    for bucket in buckets.buckets {
        let name = bucket.name.as_str();
        let resource = format!("arn:aws:s3:::{name}");

        if let Ok(Some(acl)) =
            session.json::<Option<BucketAcl>>(&["s3api", "get-bucket-acl", "--bucket", name])
        {
            let public_read = acl.grants.iter().any(|grant| {
                grant.grantee.as_ref().is_some_and(|g| {
                    g.kind.as_deref() == Some("Group") && g.uri.as_deref() == Some(ALL_USERS_URI)
                })
            });
            if public_read {
                findings.push(
                    Finding::new(
                        ProviderKind::Aws,
                        format!("aws-s3-public-{name}"),
                        "s3_public_access",
                        Severity::High,
                        format!("S3 Bucket '{name}' has public read access"),
                        format!(
                            "Bucket {name} allows public read access, which may expose sensitive data"
                        ),
                        resource.as_str(),
                        label,
                    )
                    .with_remediation(Remediation::new(
                        &[
                            "Remove public read access from bucket ACL",
                            "Review bucket policy for public access",
                        ],
                        &[
                            "Enable S3 Block Public Access",
                            "Review and restrict bucket policies",
                        ],
                    )),
                );
            }
        }

        if let Err(err) = session.run(&["s3api", "get-bucket-encryption", "--bucket", name]) {
            if error_mentions(&err, NO_ENCRYPTION_CODE) {
                findings.push(Finding::new(
                    ProviderKind::Aws,
                    format!("aws-s3-no-encryption-{name}"),
                    "s3_no_encryption",
                    Severity::Medium,
                    format!("S3 Bucket '{name}' does not have encryption enabled"),
                    format!("Bucket {name} does not have server-side encryption configured"),
                    resource.as_str(),
                    label,
                ));
            }
        }

        if let Ok(versioning) = session.json::<Option<Versioning>>(&[
            "s3api",
            "get-bucket-versioning",
            "--bucket",
            name,
        ]) {
            let enabled = versioning
                .and_then(|v| v.status)
                .is_some_and(|status| status == "Enabled");
            if !enabled {
                findings.push(Finding::new(
                    ProviderKind::Aws,
                    format!("aws-s3-no-versioning-{name}"),
                    "s3_no_versioning",
                    Severity::Low,
                    format!("S3 Bucket '{name}' does not have versioning enabled"),
                    format!(
                        "Bucket {name} does not have versioning enabled, which may lead to data loss"
                    ),
                    resource.as_str(),
                    label,
                ));
            }
        }
    }
    Ok(())
}

fn collect_networking(session: &CliSession, reg: &str, findings: &mut Vec<Finding>) -> Result<()> {
    let groups = session
        .json::<Option<SecurityGroupList>>(&["ec2", "describe-security-groups", "--region", reg])
        .context("failed to describe security groups")?
        .unwrap_or_default();

    for sg in groups.security_groups {
        for rule in &sg.ip_permissions {
            for range in &rule.ip_ranges {
                if range.cidr_ip.as_deref() != Some("0.0.0.0/0") {
                    continue;
                }
                let port = rule
                    .from_port
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "all".to_string());
                let protocol = rule.ip_protocol.as_deref().unwrap_or("-1");
                findings.push(Finding::new(
                    ProviderKind::Aws,
                    format!("aws-sg-open-{}-{port}", sg.group_id),
                    "security_group_open",
                    Severity::High,
                    format!("Security Group '{}' allows open access", sg.group_name),
                    format!(
                        "Security group {} allows access from 0.0.0.0/0 on port {port}/{protocol}",
                        sg.group_id
                    ),
                    format!("arn:aws:ec2:{reg}:security-group/{}", sg.group_id),
                    reg,
                ));
            }
        }
    }
    Ok(())
}

fn collect_compute(session: &CliSession, reg: &str, findings: &mut Vec<Finding>) -> Result<()> {
    let instances = session
        .json::<Option<InstanceList>>(&["ec2", "describe-instances", "--region", reg])
        .context("failed to describe EC2 instances")?
        .unwrap_or_default();

    for instance in instances.reservations.into_iter().flat_map(|r| r.instances) {
        let id = instance.instance_id.as_str();
        if id.is_empty() {
            continue;
        }
        let resource = format!("arn:aws:ec2:{reg}:instance/{id}");

        let http_tokens = instance
            .metadata_options
            .as_ref()
            .and_then(|m| m.http_tokens.as_deref());
        if http_tokens != Some("required") {
            findings.push(
                Finding::new(
                    ProviderKind::Aws,
                    format!("aws-ec2-imdsv1-{id}"),
                    "ec2_imdsv1",
                    Severity::Medium,
                    format!("EC2 instance '{id}' does not require IMDSv2"),
                    "Instance Metadata Service v1 is allowed; prefer IMDSv2 to reduce SSRF risk",
                    resource.as_str(),
                    reg,
                )
                .with_remediation(Remediation::new(
                    &["Set instance metadata options to require IMDSv2"],
                    &["Use AWS Systems Manager or modify instance attribute: HttpTokens=required"],
                )),
            );
        }

        let running = instance
            .state
            .as_ref()
            .and_then(|s| s.name.as_deref())
            .is_some_and(|name| name == "running");
        if let Some(public_ip) = instance.public_ip_address.as_deref().filter(|_| running) {
            findings.push(
                Finding::new(
                    ProviderKind::Aws,
                    format!("aws-ec2-public-ip-{id}"),
                    "ec2_public_ip",
                    Severity::Low,
                    format!("EC2 instance '{id}' has a public IP"),
                    format!(
                        "Instance {id} has public IP {public_ip}; ensure it is intended and protected"
                    ),
                    resource.as_str(),
                    reg,
                )
                .with_remediation(Remediation::new(
                    &["Review whether this instance must be publicly reachable"],
                    &["Prefer private instances behind a load balancer or bastion host"],
                )),
            );
        }
    }

    let volumes = session
        .json::<Option<VolumeList>>(&["ec2", "describe-volumes", "--region", reg])
        .context("failed to describe EBS volumes")?
        .unwrap_or_default();
    for volume in volumes.volumes {
        if volume.encrypted != Some(false) {
            continue;
        }
        let id = volume.volume_id.as_str();
        findings.push(
            Finding::new(
                ProviderKind::Aws,
                format!("aws-ebs-unencrypted-{id}"),
                "ebs_unencrypted",
                Severity::Medium,
                format!("EBS volume '{id}' is not encrypted"),
                format!("Volume {id} has server-side encryption disabled"),
                format!("arn:aws:ec2:{reg}:volume/{id}"),
                reg,
            )
            .with_remediation(Remediation::new(
                &["Enable encryption on the volume or create an encrypted copy"],
                &["Use default EBS encryption at the account/region level"],
            )),
        );
    }
    Ok(())
}

/// True when any statement grants an action containing `*`. The document
/// may arrive decoded or as a JSON string.
fn has_wildcard_action(document: &Value) -> bool {
    if let Value::String(raw) = document {
        return serde_json::from_str::<Value>(raw)
            .map(|doc| has_wildcard_action(&doc))
            .unwrap_or(false);
    }
    let statements: Vec<&Value> = match document.get("Statement") {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(stmt @ Value::Object(_)) => vec![stmt],
        _ => return false,
    };
    statements.iter().any(|stmt| match stmt.get("Action") {
        Some(Value::String(action)) => action.contains('*'),
        Some(Value::Array(actions)) => actions
            .iter()
            .filter_map(Value::as_str)
            .any(|a| a.contains('*')),
        _ => false,
    })
}
