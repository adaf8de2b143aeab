use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::core::{CheckType, Finding, ProviderKind, Remediation, Severity};
use crate::platform::CommandRunner;
use crate::providers::cli::CliSession;
use crate::providers::{AuthState, Credentials, SessionDir, in_region, scan_error_finding};

const PUBLIC_MEMBERS: [&str; 2] = ["allUsers", "allAuthenticatedUsers"];
const PUBLIC_READ_ROLES: [&str; 2] = ["roles/storage.objectViewer", "roles/storage.legacyBucketReader"];
const WEB_PORTS: [&str; 2] = ["80", "443"];

pub struct GcpProvider {
    credentials: Credentials,
    regions: Vec<String>,
    runner: Arc<dyn CommandRunner>,
    state: AuthState,
    session: Option<CliSession>,
    config_dir: Option<SessionDir>,
}

#[derive(Debug, Default, Deserialize)]
struct IamPolicy {
    #[serde(default)]
    bindings: Vec<Binding>,
}

#[derive(Debug, Deserialize)]
struct Binding {
    #[serde(default)]
    role: String,
    #[serde(default)]
    members: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct StorageBucket {
    name: String,
    location: Option<String>,
    versioning: Option<BucketVersioning>,
}

#[derive(Debug, Deserialize)]
struct BucketVersioning {
    #[serde(default)]
    enabled: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FirewallRule {
    name: String,
    direction: Option<String>,
    #[serde(default)]
    disabled: bool,
    #[serde(default)]
    source_ranges: Vec<String>,
    #[serde(default)]
    allowed: Vec<FirewallAllowed>,
}

#[derive(Debug, Deserialize)]
struct FirewallAllowed {
    #[serde(default)]
    ports: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComputeInstance {
    name: String,
    zone: Option<String>,
    status: Option<String>,
    self_link: Option<String>,
    #[serde(default)]
    network_interfaces: Vec<NetworkInterface>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkInterface {
    #[serde(default)]
    access_configs: Vec<AccessConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccessConfig {
    #[serde(rename = "natIP")]
    nat_ip: Option<String>,
}

impl GcpProvider {
    pub fn new(credentials: Credentials, regions: Vec<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            credentials,
            regions,
            runner,
            state: AuthState::Unauthenticated,
            session: None,
            config_dir: None,
        }
    }

    pub fn regions(&self) -> &[String] {
        &self.regions
    }

    pub fn auth_state(&self) -> AuthState {
        self.state
    }

    fn project(&self) -> Option<&str> {
        self.credentials.project_id.as_deref()
    }

    /// Private gcloud config dir plus the key file to activate in it, when
    /// explicit service account credentials are configured.
    fn prepare_key(&self) -> Result<Option<(SessionDir, PathBuf)>> {
        let creds = &self.credentials;
        let prepared = match (&creds.service_account_info, &creds.service_account_file) {
            (Some(info), _) => {
                let dir = SessionDir::create(ProviderKind::Gcp)?;
                let path = write_key_file(&dir, info)?;
                (dir, path)
            }
            (None, Some(path)) => (SessionDir::create(ProviderKind::Gcp)?, path.clone()),
            (None, None) => return Ok(None),
        };
        Ok(Some(prepared))
    }

    /// Activates a service account key into a private gcloud config when
    /// one is given, then checks that a project listing succeeds.
    fn login(&mut self) -> Result<CliSession> {
        let mut session =
            CliSession::new("gcloud", self.runner.clone()).with_trailing_args(&["--format", "json"]);

        if let Some((dir, key_file)) = self.prepare_key()? {
            session = session.with_env(
                "CLOUDSDK_CONFIG",
                dir.path().to_string_lossy().into_owned(),
            );
            let key_arg = key_file.to_string_lossy().into_owned();
            session
                .run(&[
                    "auth",
                    "activate-service-account",
                    "--key-file",
                    key_arg.as_str(),
                ])
                .context("service account activation failed")?;
            self.config_dir = Some(dir);
        }

        if let Some(project) = self.project() {
            session = session.with_trailing_args(&["--project", project]);
        }
        session.run(&["projects", "list", "--limit", "1"])?;
        Ok(session)
    }

    pub fn authenticate(&mut self) -> bool {
        if self.state == AuthState::Authenticated {
            return true;
        }
        match self.login() {
            Ok(session) => {
                debug!(project = ?self.credentials.project_id, "gcp authenticated");
                self.session = Some(session);
                self.state = AuthState::Authenticated;
                true
            }
            Err(err) => {
                debug!("gcp authentication failed: {err:#}");
                self.session = None;
                self.config_dir = None;
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

    fn run_check(
        &mut self,
        check: CheckType,
        region: Option<&str>,
        region_label: &str,
        collect: fn(&CliSession, Option<&str>, Option<&str>, &mut Vec<Finding>) -> Result<()>,
    ) -> Vec<Finding> {
        let Some(session) = self.ready_session() else {
            return Vec::new();
        };
        let mut findings = Vec::new();
        if let Err(err) = collect(&session, self.project(), region, &mut findings) {
            findings.push(scan_error_finding(
                ProviderKind::Gcp,
                check,
                region,
                region_label,
                &err,
            ));
        }
        findings
    }

    /// Buckets are listed project-wide; multi-region locations (`US`, `EU`,
    /// `NAM4`) never name a single region, so no region filter applies.
    pub fn scan_storage(&mut self, region: Option<&str>) -> Vec<Finding> {
        self.run_check(CheckType::Storage, region, "global", collect_storage)
    }

    /// Project IAM policy; needs an explicit project id.
    pub fn scan_iam(&mut self, region: Option<&str>) -> Vec<Finding> {
        if self.project().is_none() {
            debug!("gcp iam scan skipped: no project_id");
            return Vec::new();
        }
        self.run_check(CheckType::Iam, region, "global", collect_iam)
    }

    pub fn scan_networking(&mut self, region: Option<&str>) -> Vec<Finding> {
        self.run_check(
            CheckType::Networking,
            region,
            region.unwrap_or("global"),
            collect_networking,
        )
    }

    pub fn scan_compute(&mut self, region: Option<&str>) -> Vec<Finding> {
        self.run_check(
            CheckType::Compute,
            region,
            region.unwrap_or("global"),
            collect_compute,
        )
    }

    pub fn scan_audit_logging(&mut self, region: Option<&str>) -> Vec<Finding> {
        if !self.authenticate() {
            return Vec::new();
        }
        debug!(region = ?region, "gcp audit logging has no rule set");
        Vec::new()
    }
}

fn write_key_file(dir: &SessionDir, info: &serde_json::Value) -> Result<PathBuf> {
    let path = dir.path().join("service-account.json");
    let body = serde_json::to_vec(info).context("failed to encode service account key")?;

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(&path)
        .with_context(|| format!("failed to create key file: {}", path.display()))?;
    std::io::Write::write_all(&mut file, &body)
        .with_context(|| format!("failed to write key file: {}", path.display()))?;
    Ok(path)
}

fn safe_member(member: &str, max: usize) -> String {
    member.replace([':', '/'], "-").chars().take(max).collect()
}

fn collect_storage(
    session: &CliSession,
    _project: Option<&str>,
    _region: Option<&str>,
    findings: &mut Vec<Finding>,
) -> Result<()> {
    let buckets: Vec<StorageBucket> = session
        .json::<Option<Vec<StorageBucket>>>(&["storage", "buckets", "list", "--raw"])
        .context("failed to list storage buckets")?
        .unwrap_or_default();
    debug!(count = buckets.len(), "gcp storage buckets");

    for bucket in buckets {
        let name = bucket.name.as_str();
        let url = format!("gs://{name}");
        let label = bucket.location.as_deref().unwrap_or("global").to_string();

        if let Ok(Some(policy)) = session.json::<Option<IamPolicy>>(&[
            "storage",
            "buckets",
            "get-iam-policy",
            url.as_str(),
        ]) {
            let public = policy.bindings.iter().any(|binding| {
                binding
                    .members
                    .iter()
                    .any(|m| PUBLIC_MEMBERS.contains(&m.as_str()))
                    && PUBLIC_READ_ROLES
                        .iter()
                        .any(|role| binding.role.contains(role))
            });
            if public {
                findings.push(
                    Finding::new(
                        ProviderKind::Gcp,
                        format!("gcp-storage-public-{name}"),
                        "storage_public_access",
                        Severity::High,
                        format!("GCP Storage Bucket '{name}' has public access"),
                        format!(
                            "Bucket {name} allows public read access, which may expose sensitive data"
                        ),
                        url.as_str(),
                        label.as_str(),
                    )
                    .with_remediation(Remediation::new(
                        &["Remove allUsers/allAuthenticatedUsers from bucket IAM bindings"],
                        &["Use IAM conditions and ensure public access prevention is enabled at org level"],
                    )),
                );
            }
        }

        let versioned = bucket.versioning.as_ref().is_some_and(|v| v.enabled);
        if !versioned {
            findings.push(
                Finding::new(
                    ProviderKind::Gcp,
                    format!("gcp-storage-no-versioning-{name}"),
                    "storage_no_versioning",
                    Severity::Low,
                    format!("GCP Storage Bucket '{name}' does not have versioning enabled"),
                    format!("Bucket {name} does not have versioning enabled"),
                    url.as_str(),
                    label.as_str(),
                )
                .with_remediation(Remediation::new(
                    &["Enable object versioning on the bucket if retention/recovery is required"],
                    &["Enforce versioning via organization policy for sensitive buckets"],
                )),
            );
        }
    }
    Ok(())
}

fn collect_iam(
    session: &CliSession,
    project: Option<&str>,
    _region: Option<&str>,
    findings: &mut Vec<Finding>,
) -> Result<()> {
    let Some(project) = project else {
        return Ok(());
    };
    let policy = session
        .json::<Option<IamPolicy>>(&["projects", "get-iam-policy", project])
        .context("failed to read project IAM policy")?
        .unwrap_or_default();
    let resource = format!("projects/{project}");

    let mut seen = BTreeSet::new();
    for binding in &policy.bindings {
        let role = binding.role.as_str();
        if role != "roles/owner" && role != "roles/editor" {
            continue;
        }
        for member in &binding.members {
            if !seen.insert((member.as_str(), role)) {
                continue;
            }
            if member.starts_with("user:") {
                let (severity, title_role) = if role == "roles/owner" {
                    (Severity::High, "Owner")
                } else {
                    (Severity::Medium, "Editor")
                };
                findings.push(
                    Finding::new(
                        ProviderKind::Gcp,
                        format!(
                            "gcp-iam-broad-{}-{}",
                            role.replace('/', "-"),
                            safe_member(member, 50)
                        ),
                        "iam_broad_role",
                        severity,
                        format!("GCP project has User with {title_role}"),
                        format!("User {member} has project-level {role}; consider minimal roles"),
                        resource.as_str(),
                        "global",
                    )
                    .with_remediation(Remediation::new(
                        &["Replace with Viewer or custom role with least privilege"],
                        &["Use IAM conditions and separate dev/prod projects"],
                    )),
                );
            } else if member.starts_with("serviceAccount:") && role == "roles/owner" {
                findings.push(
                    Finding::new(
                        ProviderKind::Gcp,
                        format!("gcp-iam-sa-owner-{}", safe_member(member, 55)),
                        "iam_sa_owner",
                        Severity::High,
                        "GCP project has Service Account with Owner",
                        format!("Service account {member} has Owner; high risk if key is exposed"),
                        resource.as_str(),
                        "global",
                    )
                    .with_remediation(Remediation::new(
                        &["Replace Owner with Contributor or custom role"],
                        &["Use workload identity and short-lived credentials"],
                    )),
                );
            }
        }
    }
    Ok(())
}

fn collect_networking(
    session: &CliSession,
    project: Option<&str>,
    _region: Option<&str>,
    findings: &mut Vec<Finding>,
) -> Result<()> {
    let rules: Vec<FirewallRule> = session
        .json::<Option<Vec<FirewallRule>>>(&["compute", "firewall-rules", "list"])
        .context("failed to list firewall rules")?
        .unwrap_or_default();
    let project = project.unwrap_or("unknown");

    for rule in rules {
        if rule.disabled || rule.direction.as_deref() != Some("INGRESS") {
            continue;
        }
        if !rule.source_ranges.iter().any(|r| r == "0.0.0.0/0") {
            continue;
        }
        let web_only = rule
            .allowed
            .first()
            .is_some_and(|allowed| allowed.ports.iter().any(|p| WEB_PORTS.contains(&p.as_str())));
        if web_only {
            continue;
        }
        let name = rule.name.as_str();
        findings.push(
            Finding::new(
                ProviderKind::Gcp,
                format!("gcp-firewall-open-{name}"),
                "firewall_open_rule",
                Severity::High,
                format!("GCP Firewall Rule '{name}' allows open access"),
                format!("Firewall rule {name} allows inbound access from 0.0.0.0/0"),
                format!("projects/{project}/global/firewalls/{name}"),
                "global",
            )
            .with_remediation(Remediation::new(
                &["Restrict source_ranges to specific IP ranges or use tags/targets"],
                &["Review firewall rules; use Cloud Armor and load balancers for public ingress"],
            )),
        );
    }
    Ok(())
}

fn collect_compute(
    session: &CliSession,
    project: Option<&str>,
    region: Option<&str>,
    findings: &mut Vec<Finding>,
) -> Result<()> {
    let instances: Vec<ComputeInstance> = session
        .json::<Option<Vec<ComputeInstance>>>(&["compute", "instances", "list"])
        .context("failed to list compute instances")?
        .unwrap_or_default();

    for instance in instances {
        let zone = instance
            .zone
            .as_deref()
            .and_then(|z| z.rsplit('/').next())
            .map(str::to_string);
        if !in_region(zone.as_deref(), region) {
            continue;
        }
        if instance.status.as_deref() != Some("RUNNING") {
            continue;
        }
        let Some(nat_ip) = instance
            .network_interfaces
            .iter()
            .flat_map(|nic| nic.access_configs.iter())
            .find_map(|ac| ac.nat_ip.as_deref())
        else {
            continue;
        };
        let name = instance.name.as_str();
        let zone_label = zone.as_deref().or(region).unwrap_or("global");
        let resource = instance.self_link.clone().unwrap_or_else(|| {
            format!(
                "projects/{}/zones/{zone_label}/instances/{name}",
                project.unwrap_or("unknown")
            )
        });
        findings.push(
            Finding::new(
                ProviderKind::Gcp,
                format!("gcp-gce-public-ip-{name}"),
                "gce_public_ip",
                Severity::Low,
                format!("GCE instance '{name}' has an external IP"),
                format!("Instance {name} has external IP {nat_ip}; ensure it is intended and protected"),
                resource,
                zone_label,
            )
            .with_remediation(Remediation::new(
                &["Review whether this instance must be publicly reachable"],
                &["Prefer Cloud NAT and Identity-Aware Proxy over external IPs"],
            )),
        );
    }
    Ok(())
}
