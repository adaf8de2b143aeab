use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::compliance::Framework;
use crate::core::{CheckType, ProviderKind};
use crate::providers::Credentials;

#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub ui: UiConfig,
    pub scan: ScanConfig,
    pub compliance: ComplianceConfig,
    pub logs: LogsConfig,
    pub providers: BTreeMap<String, ProviderDefaults>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UiConfig {
    pub color: bool,
    pub max_table_rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanConfig {
    pub checks: Vec<CheckType>,
    pub command_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComplianceConfig {
    pub default_framework: Framework,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapping_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogsConfig {
    pub enabled: bool,
}

/// Non-secret per-provider defaults from the `[providers.<name>]` tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderDefaults {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificate_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_file: Option<PathBuf>,
}

impl ProviderDefaults {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            profile: self.profile.clone(),
            region: self.region.clone(),
            subscription_id: self.subscription_id.clone(),
            tenant_id: self.tenant_id.clone(),
            client_id: self.client_id.clone(),
            client_certificate_file: self.client_certificate_file.clone(),
            project_id: self.project_id.clone(),
            service_account_file: self.service_account_file.clone(),
            ..Credentials::default()
        }
    }
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            ui: UiConfig {
                color: true,
                max_table_rows: 20,
            },
            scan: ScanConfig {
                checks: CheckType::DEFAULT.to_vec(),
                command_timeout_secs: 120,
            },
            compliance: ComplianceConfig {
                default_framework: Framework::Cis,
                mapping_file: None,
            },
            logs: LogsConfig { enabled: true },
            providers: BTreeMap::new(),
            config_path: None,
        }
    }
}

impl EffectiveConfig {
    pub fn provider_defaults(&self, kind: ProviderKind) -> ProviderDefaults {
        self.providers
            .get(kind.as_str())
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    ui: Option<RawUiConfig>,
    scan: Option<RawScanConfig>,
    compliance: Option<RawComplianceConfig>,
    logs: Option<RawLogsConfig>,
    providers: Option<BTreeMap<String, ProviderDefaults>>,
}

#[derive(Debug, Deserialize)]
struct RawUiConfig {
    color: Option<bool>,
    max_table_rows: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawScanConfig {
    checks: Option<Vec<CheckType>>,
    command_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawComplianceConfig {
    default_framework: Option<Framework>,
    mapping_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RawLogsConfig {
    enabled: Option<bool>,
}

pub fn default_config_path(home_dir: &Path) -> PathBuf {
    home_dir.join(".config/netsec-cloud/config.toml")
}

/// Defaults, then the config file (explicit path, `NETSEC_CLOUD_CONFIG`, or
/// the default location), then environment overrides.
pub fn load(config_path: Option<&Path>, home_dir: &Path) -> Result<EffectiveConfig> {
    let mut cfg = EffectiveConfig::default();

    let path = config_path
        .map(ToOwned::to_owned)
        .or_else(|| std::env::var_os("NETSEC_CLOUD_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| default_config_path(home_dir));

    if path.exists() {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let raw: RawConfig = toml::from_str(&s)
            .with_context(|| format!("failed to parse config file (TOML): {}", path.display()))?;
        apply_raw_config(&mut cfg, raw)
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        cfg.config_path = Some(path.display().to_string());
    } else if config_path.is_some() {
        anyhow::bail!("config file not found: {}", path.display());
    }

    apply_env_overrides(&mut cfg)?;

    Ok(cfg)
}

fn apply_raw_config(cfg: &mut EffectiveConfig, raw: RawConfig) -> Result<()> {
    if let Some(ui) = raw.ui {
        if let Some(color) = ui.color {
            cfg.ui.color = color;
        }
        if let Some(max_table_rows) = ui.max_table_rows {
            cfg.ui.max_table_rows = max_table_rows;
        }
    }

    if let Some(scan) = raw.scan {
        if let Some(checks) = scan.checks {
            cfg.scan.checks = checks;
        }
        if let Some(secs) = scan.command_timeout_secs {
            cfg.scan.command_timeout_secs = secs;
        }
    }

    if let Some(compliance) = raw.compliance {
        if let Some(framework) = compliance.default_framework {
            cfg.compliance.default_framework = framework;
        }
        if compliance.mapping_file.is_some() {
            cfg.compliance.mapping_file = compliance.mapping_file;
        }
    }

    if let Some(logs) = raw.logs {
        if let Some(enabled) = logs.enabled {
            cfg.logs.enabled = enabled;
        }
    }

    if let Some(providers) = raw.providers {
        for (name, defaults) in providers {
            let kind = name
                .parse::<ProviderKind>()
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("[providers.{name}]"))?;
            cfg.providers.insert(kind.as_str().to_string(), defaults);
        }
    }

    Ok(())
}

fn apply_env_overrides(cfg: &mut EffectiveConfig) -> Result<()> {
    if let Ok(v) = std::env::var("NETSEC_CLOUD_UI_COLOR") {
        cfg.ui.color = parse_bool(&v).with_context(|| "NETSEC_CLOUD_UI_COLOR")?;
    }
    if let Ok(v) = std::env::var("NETSEC_CLOUD_UI_MAX_TABLE_ROWS") {
        cfg.ui.max_table_rows = v
            .trim()
            .parse::<usize>()
            .with_context(|| "NETSEC_CLOUD_UI_MAX_TABLE_ROWS")?;
    }
    if let Ok(v) = std::env::var("NETSEC_CLOUD_SCAN_CHECKS") {
        let checks = CheckType::parse_list(&v)
            .map_err(anyhow::Error::msg)
            .with_context(|| "NETSEC_CLOUD_SCAN_CHECKS")?;
        if !checks.is_empty() {
            cfg.scan.checks = checks;
        }
    }
    if let Ok(v) = std::env::var("NETSEC_CLOUD_SCAN_COMMAND_TIMEOUT_SECS") {
        cfg.scan.command_timeout_secs = v
            .trim()
            .parse::<u64>()
            .with_context(|| "NETSEC_CLOUD_SCAN_COMMAND_TIMEOUT_SECS")?;
    }
    if let Ok(v) = std::env::var("NETSEC_CLOUD_COMPLIANCE_DEFAULT_FRAMEWORK") {
        cfg.compliance.default_framework = v
            .parse::<Framework>()
            .map_err(anyhow::Error::msg)
            .with_context(|| "NETSEC_CLOUD_COMPLIANCE_DEFAULT_FRAMEWORK")?;
    }
    if let Ok(v) = std::env::var("NETSEC_CLOUD_LOGS_ENABLED") {
        cfg.logs.enabled = parse_bool(&v).with_context(|| "NETSEC_CLOUD_LOGS_ENABLED")?;
    }

    Ok(())
}

fn parse_bool(s: &str) -> Result<bool> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow::anyhow!(
            "invalid boolean: {s} (expected true|false|1|0|yes|no|on|off)"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_values_override_defaults() {
        let raw: RawConfig = toml::from_str(
            r#"
[ui]
max_table_rows = 5

[scan]
checks = ["iam", "audit_logging"]

[compliance]
default_framework = "pci_dss"

[providers.aws]
regions = ["us-east-1", "eu-west-1"]
profile = "security-audit"

[providers.gcp]
project_id = "demo-project"
"#,
        )
        .expect("parse");
        let mut cfg = EffectiveConfig::default();
        apply_raw_config(&mut cfg, raw).expect("apply");

        assert!(cfg.ui.color);
        assert_eq!(cfg.ui.max_table_rows, 5);
        assert_eq!(cfg.scan.checks, vec![CheckType::Iam, CheckType::AuditLogging]);
        assert_eq!(cfg.scan.command_timeout_secs, 120);
        assert_eq!(cfg.compliance.default_framework, Framework::PciDss);

        let aws = cfg.provider_defaults(ProviderKind::Aws);
        assert_eq!(aws.regions.len(), 2);
        assert_eq!(aws.credentials().profile.as_deref(), Some("security-audit"));
        assert_eq!(
            cfg.provider_defaults(ProviderKind::Gcp).project_id.as_deref(),
            Some("demo-project")
        );
        assert_eq!(cfg.provider_defaults(ProviderKind::Azure), ProviderDefaults::default());
    }

    #[test]
    fn secrets_are_not_accepted_in_provider_tables() {
        let parsed = toml::from_str::<RawConfig>(
            r#"
[providers.aws]
secret_access_key = "nope"
"#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn unknown_provider_table_is_rejected() {
        let raw: RawConfig =
            toml::from_str("[providers.oracle]\nregions = []\n").expect("parse");
        let mut cfg = EffectiveConfig::default();
        let err = apply_raw_config(&mut cfg, raw).expect_err("unknown provider");
        assert!(format!("{err:#}").contains("oracle"));
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool(" Yes ").expect("yes"));
        assert!(!parse_bool("off").expect("off"));
        assert!(parse_bool("maybe").is_err());
    }
}
