use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::debug;

use crate::core::{CheckType, Finding, ProviderKind, Remediation, Severity};
use crate::platform::CommandRunner;
use crate::providers::cli::CliSession;
use crate::providers::{
    AuthState, Credentials, SessionDir, in_region, scan_error_finding,
};

const OPEN_SOURCES: [&str; 3] = ["*", "0.0.0.0/0", "Internet"];

pub struct AzureProvider {
    credentials: Credentials,
    regions: Vec<String>,
    runner: Arc<dyn CommandRunner>,
    state: AuthState,
    session: Option<CliSession>,
    config_dir: Option<SessionDir>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StorageAccount {
    name: String,
    #[serde(default)]
    id: String,
    location: Option<String>,
    allow_blob_public_access: Option<bool>,
    encryption: Option<StorageEncryption>,
}

#[derive(Debug, Deserialize)]
struct StorageEncryption {
    services: Option<EncryptionServices>,
}

#[derive(Debug, Deserialize)]
struct EncryptionServices {
    blob: Option<EncryptionService>,
}

#[derive(Debug, Deserialize)]
struct EncryptionService {
    enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoleAssignment {
    principal_name: Option<String>,
    principal_id: Option<String>,
    principal_type: Option<String>,
    role_definition_name: Option<String>,
    #[serde(default)]
    scope: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkSecurityGroup {
    name: String,
    #[serde(default)]
    id: String,
    location: Option<String>,
    #[serde(default)]
    security_rules: Vec<SecurityRule>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecurityRule {
    name: String,
    direction: Option<String>,
    access: Option<String>,
    source_address_prefix: Option<String>,
    #[serde(default)]
    source_address_prefixes: Vec<String>,
    destination_port_range: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VirtualMachine {
    name: String,
    #[serde(default)]
    id: String,
    location: Option<String>,
    public_ips: Option<String>,
}

impl AzureProvider {
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

    /// Service principal login into a private config dir when a client
    /// certificate or secret is given; the ambient `az` login otherwise.
    ///
    /// `az` has no environment variable for the client secret, so a secret
    /// is visible in the process list while `az login` runs. A certificate
    /// file keeps only its path on the command line and wins when both are set.
    fn login(&mut self) -> Result<CliSession> {
        let creds = &self.credentials;
        let mut session =
            CliSession::new("az", self.runner.clone()).with_trailing_args(&["--output", "json"]);

        let proof = match (&creds.client_certificate_file, &creds.client_secret) {
            (Some(cert), _) => Some(("--certificate", cert.to_string_lossy().into_owned())),
            (None, Some(secret)) => {
                debug!("azure client secret is passed on the az command line");
                Some(("--password", secret.clone()))
            }
            (None, None) => None,
        };

        if let (Some(client_id), Some((proof_flag, proof))) = (&creds.client_id, proof) {
            let Some(tenant) = creds.tenant_id.as_deref() else {
                bail!("tenant_id is required for service principal login");
            };
            let dir = SessionDir::create(ProviderKind::Azure)?;
            session = session.with_env(
                "AZURE_CONFIG_DIR",
                dir.path().to_string_lossy().into_owned(),
            );
            session
                .run(&[
                    "login",
                    "--service-principal",
                    "--username",
                    client_id.as_str(),
                    proof_flag,
                    proof.as_str(),
                    "--tenant",
                    tenant,
                ])
                .context("service principal login failed")?;
            self.config_dir = Some(dir);
        }

        if let Some(subscription) = self.credentials.subscription_id.as_deref() {
            session = session.with_trailing_args(&["--subscription", subscription]);
        }
        session.run(&["group", "list"])?;
        Ok(session)
    }

    pub fn authenticate(&mut self) -> bool {
        if self.state == AuthState::Authenticated {
            return true;
        }
        match self.login() {
            Ok(session) => {
                debug!(subscription = ?self.credentials.subscription_id, "azure authenticated");
                self.session = Some(session);
                self.state = AuthState::Authenticated;
                true
            }
            Err(err) => {
                debug!("azure authentication failed: {err:#}");
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
        collect: fn(&CliSession, Option<&str>, &mut Vec<Finding>) -> Result<()>,
    ) -> Vec<Finding> {
        let Some(session) = self.ready_session() else {
            return Vec::new();
        };
        let mut findings = Vec::new();
        if let Err(err) = collect(&session, region, &mut findings) {
            findings.push(scan_error_finding(
                ProviderKind::Azure,
                check,
                region,
                region.unwrap_or("global"),
                &err,
            ));
        }
        findings
    }

    pub fn scan_storage(&mut self, region: Option<&str>) -> Vec<Finding> {
        self.run_check(CheckType::Storage, region, collect_storage)
    }

    pub fn scan_iam(&mut self, region: Option<&str>) -> Vec<Finding> {
        self.run_check(CheckType::Iam, region, collect_iam)
    }

    pub fn scan_networking(&mut self, region: Option<&str>) -> Vec<Finding> {
        self.run_check(CheckType::Networking, region, collect_networking)
    }

    pub fn scan_compute(&mut self, region: Option<&str>) -> Vec<Finding> {
        self.run_check(CheckType::Compute, region, collect_compute)
    }

    pub fn scan_audit_logging(&mut self, region: Option<&str>) -> Vec<Finding> {
        if !self.authenticate() {
            return Vec::new();
        }
        debug!(region = ?region, "azure audit logging has no rule set");
        Vec::new()
    }
}

fn location_label(location: Option<&str>, region: Option<&str>) -> String {
    location.or(region).unwrap_or("global").to_string()
}

fn collect_storage(session: &CliSession, region: Option<&str>, findings: &mut Vec<Finding>) -> Result<()> {
    let accounts: Vec<StorageAccount> = session
        .json::<Option<Vec<StorageAccount>>>(&["storage", "account", "list"])
        .context("failed to list storage accounts")?
        .unwrap_or_default();
    debug!(count = accounts.len(), "azure storage accounts");

    for account in accounts {
        if !in_region(account.location.as_deref(), region) {
            continue;
        }
        let name = account.name.as_str();
        let label = location_label(account.location.as_deref(), region);

        if account.allow_blob_public_access == Some(true) {
            findings.push(
                Finding::new(
                    ProviderKind::Azure,
                    format!("azure-storage-public-{name}"),
                    "storage_public_access",
                    Severity::High,
                    format!("Azure Storage Account '{name}' allows public blob access"),
                    format!(
                        "Storage account {name} has public blob access enabled, which may expose sensitive data"
                    ),
                    account.id.as_str(),
                    label.as_str(),
                )
                .with_remediation(Remediation::new(
                    &["Set allowBlobPublicAccess to false on the storage account"],
                    &["Enforce the 'Storage account public access should be disallowed' policy"],
                )),
            );
        }

        let blob_encrypted = account
            .encryption
            .as_ref()
            .and_then(|e| e.services.as_ref())
            .and_then(|s| s.blob.as_ref())
            .and_then(|b| b.enabled)
            .unwrap_or(false);
        if !blob_encrypted {
            findings.push(Finding::new(
                ProviderKind::Azure,
                format!("azure-storage-no-encryption-{name}"),
                "storage_no_encryption",
                Severity::Medium,
                format!("Azure Storage Account '{name}' does not have encryption enabled"),
                format!("Storage account {name} does not have blob encryption enabled"),
                account.id.as_str(),
                label.as_str(),
            ));
        }
    }
    Ok(())
}

fn is_subscription_scope(scope: &str) -> bool {
    let parts: Vec<&str> = scope.trim_matches('/').split('/').collect();
    parts.len() == 2 && parts[0].eq_ignore_ascii_case("subscriptions")
}

fn safe_id(raw: &str, max: usize) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '-' })
        .take(max)
        .collect()
}

fn collect_iam(session: &CliSession, _region: Option<&str>, findings: &mut Vec<Finding>) -> Result<()> {
    let assignments: Vec<RoleAssignment> = session
        .json::<Option<Vec<RoleAssignment>>>(&["role", "assignment", "list", "--all"])
        .context("failed to list role assignments")?
        .unwrap_or_default();
    debug!(count = assignments.len(), "azure role assignments");

    let mut seen = BTreeSet::new();
    for assignment in assignments {
        if !is_subscription_scope(&assignment.scope) {
            continue;
        }
        let Some(role) = assignment.role_definition_name.as_deref() else {
            continue;
        };
        let Some(principal) = assignment
            .principal_name
            .as_deref()
            .or(assignment.principal_id.as_deref())
        else {
            continue;
        };
        let principal_type = assignment.principal_type.as_deref().unwrap_or_default();

        let finding = match (principal_type, role) {
            ("User" | "Group", "Owner" | "Contributor") => {
                let severity = if role == "Owner" {
                    Severity::High
                } else {
                    Severity::Medium
                };
                Finding::new(
                    ProviderKind::Azure,
                    format!(
                        "azure-rbac-broad-{}-{}",
                        role.to_lowercase(),
                        safe_id(principal, 50)
                    ),
                    "rbac_broad_role",
                    severity,
                    format!("Azure subscription has {principal_type} with {role}"),
                    format!(
                        "{principal_type} {principal} has subscription-wide {role}; consider scoped or built-in reader roles"
                    ),
                    assignment.scope.as_str(),
                    "global",
                )
                .with_remediation(Remediation::new(
                    &["Replace the assignment with a narrower role or resource group scope"],
                    &["Use Privileged Identity Management for just-in-time elevation"],
                ))
            }
            ("ServicePrincipal", "Owner") => Finding::new(
                ProviderKind::Azure,
                format!("azure-rbac-sp-owner-{}", safe_id(principal, 55)),
                "rbac_sp_owner",
                Severity::High,
                "Azure subscription has Service Principal with Owner",
                format!(
                    "Service principal {principal} has Owner on the subscription; high risk if its secret is exposed"
                ),
                assignment.scope.as_str(),
                "global",
            )
            .with_remediation(Remediation::new(
                &["Replace Owner with Contributor or a custom role"],
                &["Prefer managed identities and short-lived federated credentials"],
            )),
            _ => continue,
        };
        if seen.insert((principal.to_string(), role.to_string())) {
            findings.push(finding);
        }
    }
    Ok(())
}

fn collect_networking(session: &CliSession, region: Option<&str>, findings: &mut Vec<Finding>) -> Result<()> {
    let nsgs: Vec<NetworkSecurityGroup> = session
        .json::<Option<Vec<NetworkSecurityGroup>>>(&["network", "nsg", "list"])
        .context("failed to list network security groups")?
        .unwrap_or_default();

    for nsg in nsgs {
        if !in_region(nsg.location.as_deref(), region) {
            continue;
        }
        let label = location_label(nsg.location.as_deref(), region);
        for rule in &nsg.security_rules {
            let inbound_allow = rule.direction.as_deref() == Some("Inbound")
                && rule.access.as_deref() == Some("Allow");
            let open = rule
                .source_address_prefix
                .iter()
                .chain(rule.source_address_prefixes.iter())
                .any(|prefix| OPEN_SOURCES.contains(&prefix.as_str()));
            if !(inbound_allow && open) {
                continue;
            }
            let ports = rule.destination_port_range.as_deref().unwrap_or("*");
            findings.push(Finding::new(
                ProviderKind::Azure,
                format!("azure-nsg-open-{}-{}", nsg.name, rule.name),
                "nsg_open_rule",
                Severity::High,
                format!("NSG '{}' has open inbound rule", nsg.name),
                format!(
                    "Network Security Group {} allows inbound access from 0.0.0.0/0 on port {ports}",
                    nsg.name
                ),
                nsg.id.as_str(),
                label.as_str(),
            ));
        }
    }
    Ok(())
}

fn collect_compute(session: &CliSession, region: Option<&str>, findings: &mut Vec<Finding>) -> Result<()> {
    let vms: Vec<VirtualMachine> = session
        .json::<Option<Vec<VirtualMachine>>>(&["vm", "list", "--show-details"])
        .context("failed to list virtual machines")?
        .unwrap_or_default();

    for vm in vms {
        if !in_region(vm.location.as_deref(), region) {
            continue;
        }
        let Some(public_ips) = vm.public_ips.as_deref().filter(|ips| !ips.trim().is_empty()) else {
            continue;
        };
        let name = vm.name.as_str();
        findings.push(
            Finding::new(
                ProviderKind::Azure,
                format!("azure-vm-public-ip-{name}"),
                "azure_vm_public_ip",
                Severity::Low,
                format!("Azure VM '{name}' has a public IP"),
                format!("VM {name} has public IP {public_ips}; ensure it is intended and protected"),
                vm.id.as_str(),
                location_label(vm.location.as_deref(), region),
            )
            .with_remediation(Remediation::new(
                &["Review whether this VM must be publicly reachable"],
                &["Prefer Azure Bastion or a load balancer in front of private VMs"],
            )),
        );
    }
    Ok(())
}
