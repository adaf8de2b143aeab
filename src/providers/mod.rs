//! Cloud providers and the scan dispatch shared by all of them.
//!
//! Each provider talks to its vendor CLI through a [`CliSession`] and turns
//! resource attributes into [`Finding`]s. Scans never fail: authentication
//! problems yield an empty list and enumeration problems yield a single
//! `scan_error` finding next to whatever was collected before the failure.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::{CheckType, Finding, ProviderKind, SCAN_ERROR_TYPE, Severity};
use crate::platform::CommandRunner;

mod aws;
mod azure;
pub mod cli;
mod gcp;

pub use aws::AwsProvider;
pub use azure::AzureProvider;
pub use cli::{CliSession, CommandFailed};
pub use gcp::GcpProvider;

/// Provider specific credentials. Every field is optional; each provider
/// picks the strongest form it finds.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    // aws
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    // azure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificate_file: Option<PathBuf>,
    // gcp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_info: Option<serde_json::Value>,
}

impl Credentials {
    /// Fills every unset field from `defaults`.
    pub fn or_defaults(mut self, defaults: &Credentials) -> Self {
        fn fill<T: Clone>(slot: &mut Option<T>, fallback: &Option<T>) {
            if slot.is_none() {
                slot.clone_from(fallback);
            }
        }
        fill(&mut self.access_key_id, &defaults.access_key_id);
        fill(&mut self.secret_access_key, &defaults.secret_access_key);
        fill(&mut self.session_token, &defaults.session_token);
        fill(&mut self.region, &defaults.region);
        fill(&mut self.profile, &defaults.profile);
        fill(&mut self.subscription_id, &defaults.subscription_id);
        fill(&mut self.tenant_id, &defaults.tenant_id);
        fill(&mut self.client_id, &defaults.client_id);
        fill(&mut self.client_secret, &defaults.client_secret);
        fill(&mut self.client_certificate_file, &defaults.client_certificate_file);
        fill(&mut self.project_id, &defaults.project_id);
        fill(&mut self.service_account_file, &defaults.service_account_file);
        fill(&mut self.service_account_info, &defaults.service_account_info);
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn redact<T>(v: &Option<T>) -> Option<&'static str> {
            v.as_ref().map(|_| "<redacted>")
        }
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &redact(&self.secret_access_key))
            .field("session_token", &redact(&self.session_token))
            .field("region", &self.region)
            .field("profile", &self.profile)
            .field("subscription_id", &self.subscription_id)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &redact(&self.client_secret))
            .field("client_certificate_file", &self.client_certificate_file)
            .field("project_id", &self.project_id)
            .field("service_account_file", &self.service_account_file)
            .field("service_account_info", &redact(&self.service_account_info))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticated,
    Failed,
}

pub enum CloudProvider {
    Aws(AwsProvider),
    Azure(AzureProvider),
    Gcp(GcpProvider),
}

impl CloudProvider {
    pub fn new(
        kind: ProviderKind,
        credentials: Credentials,
        regions: Vec<String>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        match kind {
            ProviderKind::Aws => CloudProvider::Aws(AwsProvider::new(credentials, regions, runner)),
            ProviderKind::Azure => {
                CloudProvider::Azure(AzureProvider::new(credentials, regions, runner))
            }
            ProviderKind::Gcp => CloudProvider::Gcp(GcpProvider::new(credentials, regions, runner)),
        }
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            CloudProvider::Aws(_) => ProviderKind::Aws,
            CloudProvider::Azure(_) => ProviderKind::Azure,
            CloudProvider::Gcp(_) => ProviderKind::Gcp,
        }
    }

    /// Regions as configured; empty means the provider default.
    pub fn regions(&self) -> &[String] {
        match self {
            CloudProvider::Aws(p) => p.regions(),
            CloudProvider::Azure(p) => p.regions(),
            CloudProvider::Gcp(p) => p.regions(),
        }
    }

    pub fn auth_state(&self) -> AuthState {
        match self {
            CloudProvider::Aws(p) => p.auth_state(),
            CloudProvider::Azure(p) => p.auth_state(),
            CloudProvider::Gcp(p) => p.auth_state(),
        }
    }

    pub fn authenticate(&mut self) -> bool {
        match self {
            CloudProvider::Aws(p) => p.authenticate(),
            CloudProvider::Azure(p) => p.authenticate(),
            CloudProvider::Gcp(p) => p.authenticate(),
        }
    }

    pub fn scan_storage(&mut self, region: Option<&str>) -> Vec<Finding> {
        match self {
            CloudProvider::Aws(p) => p.scan_storage(region),
            CloudProvider::Azure(p) => p.scan_storage(region),
            CloudProvider::Gcp(p) => p.scan_storage(region),
        }
    }

    pub fn scan_iam(&mut self, region: Option<&str>) -> Vec<Finding> {
        match self {
            CloudProvider::Aws(p) => p.scan_iam(region),
            CloudProvider::Azure(p) => p.scan_iam(region),
            CloudProvider::Gcp(p) => p.scan_iam(region),
        }
    }

    pub fn scan_networking(&mut self, region: Option<&str>) -> Vec<Finding> {
        match self {
            CloudProvider::Aws(p) => p.scan_networking(region),
            CloudProvider::Azure(p) => p.scan_networking(region),
            CloudProvider::Gcp(p) => p.scan_networking(region),
        }
    }

    pub fn scan_compute(&mut self, region: Option<&str>) -> Vec<Finding> {
        match self {
            CloudProvider::Aws(p) => p.scan_compute(region),
            CloudProvider::Azure(p) => p.scan_compute(region),
            CloudProvider::Gcp(p) => p.scan_compute(region),
        }
    }

    pub fn scan_audit_logging(&mut self, region: Option<&str>) -> Vec<Finding> {
        match self {
            CloudProvider::Aws(p) => p.scan_audit_logging(region),
            CloudProvider::Azure(p) => p.scan_audit_logging(region),
            CloudProvider::Gcp(p) => p.scan_audit_logging(region),
        }
    }

    pub fn scan(&mut self, check: CheckType, region: Option<&str>) -> Vec<Finding> {
        match check {
            CheckType::Storage => self.scan_storage(region),
            CheckType::Iam => self.scan_iam(region),
            CheckType::Networking => self.scan_networking(region),
            CheckType::Compute => self.scan_compute(region),
            CheckType::AuditLogging => self.scan_audit_logging(region),
        }
    }

    /// Runs the requested categories (default: [`CheckType::DEFAULT`]) for
    /// every configured region, in canonical category order. Account-wide
    /// categories repeat per region; see [`crate::scanner::dedup_findings`].
    pub fn scan_all(&mut self, check_types: Option<&[CheckType]>) -> Vec<Finding> {
        let requested = check_types.unwrap_or(&CheckType::DEFAULT);
        let regions: Vec<Option<String>> = if self.regions().is_empty() {
            vec![None]
        } else {
            self.regions().iter().cloned().map(Some).collect()
        };

        let mut findings = Vec::new();
        for region in &regions {
            for check in CheckType::ALL {
                if !requested.contains(&check) {
                    continue;
                }
                findings.extend(self.scan(check, region.as_deref()));
            }
        }
        findings
    }

    /// Common regions for display when none are configured.
    pub fn default_regions(kind: ProviderKind) -> &'static [&'static str] {
        match kind {
            ProviderKind::Aws => &["us-east-1", "us-west-2", "eu-west-1", "ap-southeast-1"],
            ProviderKind::Azure => &[
                "eastus",
                "eastus2",
                "westus",
                "westus2",
                "westeurope",
                "northeurope",
                "southeastasia",
            ],
            ProviderKind::Gcp => &[
                "us-central1",
                "us-east1",
                "us-west1",
                "europe-west1",
                "asia-east1",
                "asia-southeast1",
            ],
        }
    }
}

/// Builds the synthetic finding reported when one check could not enumerate
/// its resources. The id is stable per provider, check and region.
pub(crate) fn scan_error_finding(
    provider: ProviderKind,
    check: CheckType,
    region: Option<&str>,
    region_label: &str,
    err: &anyhow::Error,
) -> Finding {
    warn!(
        provider = provider.as_str(),
        check = check.as_str(),
        region = region_label,
        "scan error: {err:#}"
    );
    let mut finding_id = format!("{provider}-scan-error-{}", check.as_str().replace('_', "-"));
    if let Some(region) = region {
        finding_id.push('-');
        finding_id.push_str(region);
    }
    Finding::new(
        provider,
        finding_id,
        SCAN_ERROR_TYPE,
        Severity::Info,
        format!("Error scanning {} {}", provider.label(), check.label()),
        format!(
            "Error occurred while scanning {}: {err:#}",
            check.label()
        ),
        provider.as_str(),
        region_label,
    )
}

/// Same as [`scan_error_finding`] but with a caller chosen id and title, for
/// checks that report specific failure modes.
pub(crate) fn custom_scan_error(
    provider: ProviderKind,
    finding_id: String,
    title: &str,
    description: String,
    resource: &str,
    region_label: &str,
) -> Finding {
    warn!(
        provider = provider.as_str(),
        region = region_label,
        "scan error: {description}"
    );
    Finding::new(
        provider,
        finding_id,
        SCAN_ERROR_TYPE,
        Severity::Info,
        title,
        description,
        resource,
        region_label,
    )
}

/// Private configuration directory for one provider instance, removed on
/// drop. Keeps vendor CLI logins of different instances apart.
#[derive(Debug)]
pub(crate) struct SessionDir {
    path: PathBuf,
}

impl SessionDir {
    pub(crate) fn create(kind: ProviderKind) -> Result<Self> {
        static DIR_SEQ: AtomicU64 = AtomicU64::new(0);

        let seq = DIR_SEQ.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "netsec-cloud-{kind}-{}-{seq}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&path);

        let mut builder = std::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder
            .create(&path)
            .with_context(|| format!("failed to create session directory: {}", path.display()))?;
        Ok(Self { path })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SessionDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

/// True when `location` belongs to `region`; an absent region accepts all.
pub(crate) fn in_region(location: Option<&str>, region: Option<&str>) -> bool {
    let Some(region) = region else {
        return true;
    };
    let Some(location) = location else {
        return false;
    };
    let location = location.to_ascii_lowercase();
    let region = region.to_ascii_lowercase();
    location == region || location.starts_with(&format!("{region}-"))
}
