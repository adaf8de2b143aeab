use std::collections::BTreeMap;
use std::io;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::compliance::{
    ComplianceMapper, ComplianceReport, ComplianceSummary, Framework, MappingConfig,
};
use crate::config::EffectiveConfig;
use crate::core::{CheckType, Finding, ProviderKind, SCHEMA_VERSION, ScanReport, now_rfc3339};
use crate::platform::{CommandRunner, SystemCommandRunner};
use crate::providers::{CloudProvider, Credentials};
use crate::scanner::CloudScanner;
use crate::ui::{ScanView, UiConfig};

#[derive(Debug, Parser)]
#[command(
    name = "netsec-cloud",
    version,
    about = "Scan AWS, Azure and GCP accounts for security misconfigurations and map them to compliance controls"
)]
pub struct Cli {
    #[arg(long, global = true)]
    pub json: bool,
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,
    #[arg(long, global = true)]
    pub verbose: bool,
    #[arg(long, global = true)]
    pub quiet: bool,
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Per-command timeout for vendor CLI calls, in seconds.
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan one provider (aws, azure, gcp) or several (multi).
    Scan(ScanArgs),
    Compliance(ComplianceArgs),
    /// List supported providers.
    Providers,
    Completion(CompletionArgs),
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// aws | azure | gcp | multi
    pub provider: String,
    #[command(flatten)]
    pub target: ScanTarget,
    #[arg(long, value_enum, default_value_t = ScanView::Summary)]
    pub format: ScanView,
}

#[derive(Debug, Clone, Default, Args)]
pub struct ScanTarget {
    /// JSON credentials file; keyed by provider name for `multi`.
    #[arg(long)]
    pub credentials: Option<PathBuf>,
    /// Comma separated regions. With `multi`, prefix each with its provider
    /// (aws=us-east-1,azure=eastus).
    #[arg(long, value_delimiter = ',')]
    pub regions: Vec<String>,
    /// Comma separated check types (storage,iam,networking,compute,audit_logging).
    #[arg(long)]
    pub checks: Option<String>,
    /// Providers to include with `multi` (default: all).
    #[arg(long, value_delimiter = ',')]
    pub providers: Vec<String>,
}

#[derive(Debug, Args)]
pub struct ComplianceArgs {
    #[command(subcommand)]
    pub command: ComplianceCommand,
}

#[derive(Debug, Subcommand)]
pub enum ComplianceCommand {
    /// List supported frameworks.
    Frameworks,
    /// List the controls of a framework.
    Controls { framework: String },
    /// Scan and map the findings to a framework.
    Check {
        provider: String,
        #[arg(long)]
        framework: Option<String>,
        #[command(flatten)]
        target: ScanTarget,
    },
    /// Map findings saved by `scan --json` to a framework.
    Map {
        #[arg(long)]
        findings: PathBuf,
        #[arg(long)]
        framework: Option<String>,
    },
}

#[derive(Debug, Args)]
pub struct CompletionArgs {
    pub shell: String,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[arg(long)]
    pub show: bool,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    let stdout_is_tty = io::stdout().is_terminal();
    let stderr_is_tty = io::stderr().is_terminal();

    let home_dir = crate::platform::effective_home_dir()?;

    let cfg = crate::config::load(cli.config.as_deref(), &home_dir)
        .map_err(crate::exit::invalid_args_err)?;

    let timeout_secs = cli.timeout.unwrap_or(cfg.scan.command_timeout_secs);
    if timeout_secs == 0 {
        return Err(crate::exit::invalid_args(
            "--timeout must be greater than 0",
        ));
    }

    let color = stdout_is_tty && cfg.ui.color && !cli.no_color;

    let ui_cfg = UiConfig {
        color,
        stdout_is_tty,
        stderr_is_tty,
        max_table_rows: cfg.ui.max_table_rows,
        quiet: cli.quiet,
        verbose: cli.verbose,
    };

    let show_progress = ui_cfg.stderr_is_tty && !cli.quiet && !cli.json;
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner::new(Duration::from_secs(
        timeout_secs,
    )));

    match cli.command {
        Commands::Scan(args) => {
            let plan = plan_scan(&args.provider, &args.target, &cfg)?;
            let outcome = execute_scan(&plan, runner, show_progress);
            record_run(&home_dir, &cfg, "scan", &plan, &outcome, None);
            ensure_authenticated(&plan, &outcome, &ui_cfg)?;

            if cli.json {
                write_json(&outcome.report)?;
            } else {
                crate::ui::print_scan_report(&outcome.report, &ui_cfg, args.format);
            }
        }
        Commands::Compliance(args) => match args.command {
            ComplianceCommand::Frameworks => {
                let frameworks: Vec<_> = Framework::ALL.iter().map(|f| f.info()).collect();
                if cli.json {
                    write_json(&frameworks)?;
                } else {
                    crate::ui::print_frameworks(&frameworks, &ui_cfg);
                }
            }
            ComplianceCommand::Controls { framework } => {
                let framework = parse_framework(&framework)?;
                let mapper = build_mapper(&cfg)?;
                let controls = mapper.get_framework_controls(framework);
                if cli.json {
                    write_json(&ControlsListing {
                        framework,
                        controls: &controls,
                    })?;
                } else {
                    crate::ui::print_controls(framework, &controls, &ui_cfg);
                }
            }
            ComplianceCommand::Check {
                provider,
                framework,
                target,
            } => {
                let framework = resolve_framework(framework.as_deref(), &cfg)?;
                let mapper = build_mapper(&cfg)?;
                let plan = plan_scan(&provider, &target, &cfg)?;
                let outcome = execute_scan(&plan, runner, show_progress);
                record_run(
                    &home_dir,
                    &cfg,
                    "compliance check",
                    &plan,
                    &outcome,
                    Some(framework),
                );
                ensure_authenticated(&plan, &outcome, &ui_cfg)?;

                let report = compliance_report(
                    &mapper,
                    framework,
                    outcome.registered.clone(),
                    &outcome.report.all_findings(),
                );
                if cli.json {
                    write_json(&report)?;
                } else {
                    crate::ui::print_compliance_report(&report, &ui_cfg);
                }
            }
            ComplianceCommand::Map {
                findings,
                framework,
            } => {
                let framework = resolve_framework(framework.as_deref(), &cfg)?;
                let mapper = build_mapper(&cfg)?;
                let findings = read_findings(&findings)?;
                let mut providers: Vec<String> = findings
                    .iter()
                    .map(|f| f.provider.as_str().to_string())
                    .collect();
                providers.sort();
                providers.dedup();

                let report = compliance_report(&mapper, framework, providers, &findings);
                if cli.json {
                    write_json(&report)?;
                } else {
                    crate::ui::print_compliance_report(&report, &ui_cfg);
                }
            }
        },
        Commands::Providers => {
            if cli.json {
                let listing: Vec<ProviderListing> = ProviderKind::ALL
                    .iter()
                    .map(|kind| ProviderListing {
                        name: *kind,
                        display_name: kind.display_name(),
                        default_regions: CloudProvider::default_regions(*kind),
                        configured_regions: cfg.provider_defaults(*kind).regions,
                    })
                    .collect();
                write_json(&listing)?;
            } else {
                crate::ui::print_providers(&ui_cfg);
            }
        }
        Commands::Completion(args) => {
            let shell = parse_shell(&args.shell)?;
            let mut cmd = Cli::command();
            let mut out = std::io::stdout().lock();
            clap_complete::generate(shell, &mut cmd, "netsec-cloud", &mut out);
        }
        Commands::Config(args) => {
            if args.show {
                if cli.json {
                    write_json(&cfg)?;
                } else {
                    println!(
                        "{}",
                        toml::to_string_pretty(&cfg).context("failed to render config (TOML)")?
                    );
                }
            } else if !ui_cfg.quiet {
                eprintln!("config: use `netsec-cloud config --show`");
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

#[derive(Debug, Serialize)]
struct ControlsListing<'a> {
    framework: Framework,
    controls: &'a [crate::compliance::ControlInfo],
}

#[derive(Debug, Serialize)]
struct ProviderListing {
    name: ProviderKind,
    display_name: &'static str,
    default_regions: &'static [&'static str],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    configured_regions: Vec<String>,
}

/// Resolved inputs of one scan run.
#[derive(Debug, Clone)]
struct ScanPlan {
    kinds: Vec<ProviderKind>,
    credentials: BTreeMap<ProviderKind, Credentials>,
    regions: BTreeMap<ProviderKind, Vec<String>>,
    checks: Vec<CheckType>,
    credentials_file: Option<PathBuf>,
}

#[derive(Debug)]
struct ScanOutcome {
    started_at: OffsetDateTime,
    finished_at: OffsetDateTime,
    registered: Vec<String>,
    report: ScanReport,
}

fn plan_scan(provider: &str, target: &ScanTarget, cfg: &EffectiveConfig) -> Result<ScanPlan> {
    let provider = provider.trim().to_ascii_lowercase();
    let multi = provider == "multi";

    let kinds: Vec<ProviderKind> = if multi {
        if target.providers.is_empty() {
            ProviderKind::ALL.to_vec()
        } else {
            let mut kinds = Vec::new();
            for name in &target.providers {
                let kind = parse_provider(name)?;
                if !kinds.contains(&kind) {
                    kinds.push(kind);
                }
            }
            kinds
        }
    } else {
        if !target.providers.is_empty() {
            return Err(crate::exit::invalid_args(
                "--providers is only valid with `multi`",
            ));
        }
        vec![parse_provider(&provider)?]
    };

    let single = if multi { None } else { kinds.first().copied() };
    let mut flag_regions = split_regions(&target.regions, &kinds, single)?;
    let mut supplied = match &target.credentials {
        Some(path) => read_credentials(path, single)?,
        None => BTreeMap::new(),
    };

    let checks = match &target.checks {
        Some(s) => {
            let checks = CheckType::parse_list(s).map_err(crate::exit::invalid_args)?;
            if checks.is_empty() {
                cfg.scan.checks.clone()
            } else {
                checks
            }
        }
        None => cfg.scan.checks.clone(),
    };

    let mut credentials = BTreeMap::new();
    let mut regions = BTreeMap::new();
    for kind in &kinds {
        let defaults = cfg.provider_defaults(*kind);
        let creds = supplied
            .remove(kind)
            .unwrap_or_default()
            .or_defaults(&defaults.credentials());
        credentials.insert(*kind, creds);

        let kind_regions = flag_regions
            .remove(kind)
            .unwrap_or_else(|| defaults.regions.clone());
        regions.insert(*kind, kind_regions);
    }

    Ok(ScanPlan {
        kinds,
        credentials,
        regions,
        checks,
        credentials_file: target.credentials.clone(),
    })
}

/// Groups `--regions` entries by provider. Region names differ per cloud
/// (`us-east-1`, `eastus`, `us-central1`), so with `multi` every entry must
/// be written as `provider=region`. A single provider also accepts bare names.
fn split_regions(
    entries: &[String],
    kinds: &[ProviderKind],
    single: Option<ProviderKind>,
) -> Result<BTreeMap<ProviderKind, Vec<String>>> {
    let mut out: BTreeMap<ProviderKind, Vec<String>> = BTreeMap::new();
    for entry in entries {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (kind, region) = match (entry.split_once('='), single) {
            (Some((name, region)), _) => (parse_provider(name)?, region.trim()),
            (None, Some(kind)) => (kind, entry),
            (None, None) => {
                return Err(crate::exit::invalid_args(format!(
                    "region `{entry}` needs a provider prefix with `multi` (for example aws={entry})"
                )));
            }
        };
        if !kinds.contains(&kind) {
            return Err(crate::exit::invalid_args(format!(
                "region `{entry}` is for {kind}, which is not being scanned"
            )));
        }
        if region.is_empty() {
            return Err(crate::exit::invalid_args(format!(
                "region `{entry}` has an empty region name"
            )));
        }
        let list = out.entry(kind).or_default();
        if !list.iter().any(|r| r == region) {
            list.push(region.to_string());
        }
    }
    Ok(out)
}

fn parse_provider(name: &str) -> Result<ProviderKind> {
    name.parse::<ProviderKind>().map_err(|_| {
        crate::exit::invalid_args(format!(
            "unsupported provider: {} (expected aws|azure|gcp|multi)",
            name.trim()
        ))
    })
}

fn read_credentials(
    path: &Path,
    single: Option<ProviderKind>,
) -> Result<BTreeMap<ProviderKind, Credentials>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read credentials file: {}", path.display()))
        .map_err(crate::exit::invalid_args_err)?;
    parse_credentials(&text, single)
        .with_context(|| format!("invalid credentials file: {}", path.display()))
        .map_err(crate::exit::invalid_args_err)
}

/// A single provider takes a flat credentials object; `multi` takes one
/// object per provider name.
fn parse_credentials(
    text: &str,
    single: Option<ProviderKind>,
) -> Result<BTreeMap<ProviderKind, Credentials>> {
    let mut out = BTreeMap::new();
    if let Some(kind) = single {
        let creds: Credentials = serde_json::from_str(text).context("failed to parse JSON")?;
        out.insert(kind, creds);
        return Ok(out);
    }

    let by_name: BTreeMap<String, Credentials> =
        serde_json::from_str(text).context("failed to parse JSON")?;
    for (name, creds) in by_name {
        let kind = name
            .parse::<ProviderKind>()
            .map_err(anyhow::Error::msg)?;
        out.insert(kind, creds);
    }
    Ok(out)
}

fn execute_scan(
    plan: &ScanPlan,
    runner: Arc<dyn CommandRunner>,
    show_progress: bool,
) -> ScanOutcome {
    let started_at = OffsetDateTime::now_utc();
    let mut scanner = CloudScanner::with_runner(runner);

    for kind in &plan.kinds {
        let creds = plan.credentials.get(kind).cloned().unwrap_or_default();
        let regions = plan.regions.get(kind).cloned().unwrap_or_default();
        let pb = spinner(
            show_progress,
            format!("Authenticating with {}...", kind.display_name()),
        );
        let ok = scanner.add_provider(kind.as_str(), creds, regions);
        if let Some(pb) = pb {
            pb.finish_and_clear();
        }
        debug!(provider = kind.as_str(), authenticated = ok, "provider registration");
    }

    let registered = scanner.list_providers();
    let findings = if registered.is_empty() {
        BTreeMap::new()
    } else {
        let pb = spinner(
            show_progress,
            format!("Scanning {}...", registered.join(", ")),
        );
        let mut findings = scanner.scan(Some(&plan.checks[..]), None);
        if let Some(pb) = pb {
            pb.finish_and_clear();
        }
        for list in findings.values_mut() {
            crate::scanner::dedup_findings(list);
        }
        findings
    };

    let summary = scanner.get_summary(&findings);
    ScanOutcome {
        started_at,
        finished_at: OffsetDateTime::now_utc(),
        registered,
        report: ScanReport {
            schema_version: SCHEMA_VERSION.to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            generated_at: now_rfc3339(),
            check_types: plan.checks.clone(),
            findings,
            summary,
        },
    }
}

fn spinner(enabled: bool, message: String) -> Option<indicatif::ProgressBar> {
    if !enabled {
        return None;
    }
    let pb = indicatif::ProgressBar::new_spinner();
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(120));
    Some(pb)
}

fn ensure_authenticated(plan: &ScanPlan, outcome: &ScanOutcome, ui_cfg: &UiConfig) -> Result<()> {
    let failed: Vec<&str> = plan
        .kinds
        .iter()
        .map(|k| k.as_str())
        .filter(|name| !outcome.registered.iter().any(|r| r == name))
        .collect();

    if outcome.registered.is_empty() {
        return Err(crate::exit::auth_failed(format!(
            "authentication failed for: {}",
            failed.join(", ")
        )));
    }
    if !failed.is_empty() {
        warn!(providers = %failed.join(","), "authentication failed; continuing with the rest");
        if !ui_cfg.quiet {
            eprintln!(
                "warning: authentication failed for {}; scanned {} only",
                failed.join(", "),
                outcome.registered.join(", ")
            );
        }
    }
    Ok(())
}

fn record_run(
    home_dir: &Path,
    cfg: &EffectiveConfig,
    command: &'static str,
    plan: &ScanPlan,
    outcome: &ScanOutcome,
    framework: Option<Framework>,
) {
    if !cfg.logs.enabled {
        return;
    }
    let requested: Vec<String> = plan.kinds.iter().map(|k| k.as_str().to_string()).collect();
    let run = crate::logs::ScanRun {
        command,
        started_at: outcome.started_at,
        finished_at: outcome.finished_at,
        requested_providers: &requested,
        registered_providers: &outcome.registered,
        check_types: &plan.checks,
        credentials_file: plan.credentials_file.as_deref(),
        framework,
        findings: &outcome.report.findings,
        summary: &outcome.report.summary,
    };
    match crate::logs::write_scan_log(home_dir, &run) {
        Ok(path) => debug!(path = %path.display(), "run log written"),
        Err(err) => warn!("failed to write run log: {err:#}"),
    }
}

fn parse_framework(name: &str) -> Result<Framework> {
    name.parse::<Framework>().map_err(crate::exit::invalid_args)
}

fn resolve_framework(name: Option<&str>, cfg: &EffectiveConfig) -> Result<Framework> {
    match name {
        Some(name) => parse_framework(name),
        None => Ok(cfg.compliance.default_framework),
    }
}

fn build_mapper(cfg: &EffectiveConfig) -> Result<ComplianceMapper> {
    let mut mapping = MappingConfig::builtin();
    if let Some(path) = &cfg.compliance.mapping_file {
        let extra = load_mapping_file(path).map_err(crate::exit::invalid_args_err)?;
        mapping = mapping.merge(extra);
    }
    Ok(ComplianceMapper::new(mapping))
}

fn load_mapping_file(path: &Path) -> Result<MappingConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read mapping file: {}", path.display()))?;
    MappingConfig::from_toml_str(&text)
        .with_context(|| format!("invalid mapping file: {}", path.display()))
}

fn compliance_report(
    mapper: &ComplianceMapper,
    framework: Framework,
    providers: Vec<String>,
    findings: &[Finding],
) -> ComplianceReport {
    let controls = mapper.map_findings_to_framework(findings, framework);
    let summary = ComplianceSummary::from_results(&controls);
    ComplianceReport {
        schema_version: SCHEMA_VERSION.to_string(),
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        generated_at: now_rfc3339(),
        providers,
        framework,
        findings_count: findings.len(),
        controls,
        summary,
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FindingsInput {
    Report(ScanReport),
    Findings(Vec<Finding>),
}

fn read_findings(path: &Path) -> Result<Vec<Finding>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read findings file: {}", path.display()))
        .map_err(crate::exit::invalid_args_err)?;
    parse_findings(&text)
        .with_context(|| format!("invalid findings file: {}", path.display()))
        .map_err(crate::exit::invalid_args_err)
}

fn parse_findings(text: &str) -> Result<Vec<Finding>> {
    let input: FindingsInput = serde_json::from_str(text)
        .context("expected a scan report or an array of findings (JSON)")?;
    Ok(match input {
        FindingsInput::Report(report) => report.all_findings(),
        FindingsInput::Findings(findings) => findings,
    })
}

fn write_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    use std::io::Write;

    let buf = serde_json::to_vec_pretty(value)?;

    let mut stdout = std::io::stdout().lock();
    match stdout.write_all(&buf) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => return Ok(()),
        Err(err) => return Err(err.into()),
    }
    match stdout.write_all(b"\n") {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn parse_shell(s: &str) -> Result<clap_complete::Shell> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "bash" => Ok(clap_complete::Shell::Bash),
        "zsh" => Ok(clap_complete::Shell::Zsh),
        "fish" => Ok(clap_complete::Shell::Fish),
        other => Err(crate::exit::invalid_args(format!(
            "unsupported shell: {other} (expected bash|zsh|fish)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Severity;
    use crate::platform::testing::ScriptedRunner;

    fn target() -> ScanTarget {
        ScanTarget::default()
    }

    #[test]
    fn unsupported_provider_is_invalid_args() {
        let err = plan_scan("digitalocean", &target(), &EffectiveConfig::default())
            .expect_err("unsupported");
        assert_eq!(crate::exit::exit_code(&err), 2);
        assert!(err.to_string().contains("digitalocean"));
    }

    #[test]
    fn multi_defaults_to_every_provider_and_dedups_selection() {
        let cfg = EffectiveConfig::default();
        let plan = plan_scan("multi", &target(), &cfg).expect("plan");
        assert_eq!(plan.kinds, ProviderKind::ALL.to_vec());

        let mut t = target();
        t.providers = vec!["gcp".to_string(), "GCP".to_string(), "aws".to_string()];
        let plan = plan_scan("multi", &t, &cfg).expect("plan");
        assert_eq!(plan.kinds, vec![ProviderKind::Gcp, ProviderKind::Aws]);
    }

    #[test]
    fn providers_flag_requires_multi() {
        let mut t = target();
        t.providers = vec!["aws".to_string()];
        let err = plan_scan("aws", &t, &EffectiveConfig::default()).expect_err("invalid");
        assert_eq!(crate::exit::exit_code(&err), 2);
    }

    #[test]
    fn regions_and_checks_fall_back_to_config() {
        let mut cfg = EffectiveConfig::default();
        cfg.providers.insert(
            "aws".to_string(),
            crate::config::ProviderDefaults {
                regions: vec!["eu-west-1".to_string()],
                profile: Some("audit".to_string()),
                ..Default::default()
            },
        );
        let plan = plan_scan("aws", &target(), &cfg).expect("plan");
        assert_eq!(plan.regions[&ProviderKind::Aws], vec!["eu-west-1".to_string()]);
        assert_eq!(plan.checks, CheckType::DEFAULT.to_vec());
        assert_eq!(
            plan.credentials[&ProviderKind::Aws].profile.as_deref(),
            Some("audit")
        );

        let mut t = target();
        t.regions = vec!["us-west-2".to_string()];
        t.checks = Some("audit_logging".to_string());
        let plan = plan_scan("aws", &t, &cfg).expect("plan");
        assert_eq!(plan.regions[&ProviderKind::Aws], vec!["us-west-2".to_string()]);
        assert_eq!(plan.checks, vec![CheckType::AuditLogging]);
    }

    #[test]
    fn multi_regions_are_routed_to_their_provider() {
        let mut cfg = EffectiveConfig::default();
        cfg.providers.insert(
            "gcp".to_string(),
            crate::config::ProviderDefaults {
                regions: vec!["europe-west1".to_string()],
                ..Default::default()
            },
        );
        let mut t = target();
        t.regions = vec![
            "aws=us-east-1".to_string(),
            "azure=eastus".to_string(),
            "aws=eu-west-1".to_string(),
            "AWS=us-east-1".to_string(),
        ];
        let plan = plan_scan("multi", &t, &cfg).expect("plan");
        assert_eq!(
            plan.regions[&ProviderKind::Aws],
            vec!["us-east-1".to_string(), "eu-west-1".to_string()]
        );
        assert_eq!(plan.regions[&ProviderKind::Azure], vec!["eastus".to_string()]);
        assert_eq!(plan.regions[&ProviderKind::Gcp], vec!["europe-west1".to_string()]);
    }

    #[test]
    fn unqualified_or_foreign_regions_are_invalid_args() {
        let mut t = target();
        t.regions = vec!["us-east-1".to_string()];
        let err = plan_scan("multi", &t, &EffectiveConfig::default()).expect_err("bare region");
        assert_eq!(crate::exit::exit_code(&err), 2);
        assert!(err.to_string().contains("aws=us-east-1"));

        t.regions = vec!["azure=eastus".to_string()];
        let err = plan_scan("aws", &t, &EffectiveConfig::default()).expect_err("foreign");
        assert_eq!(crate::exit::exit_code(&err), 2);

        t.providers = vec!["aws".to_string()];
        let err = plan_scan("multi", &t, &EffectiveConfig::default()).expect_err("not scanned");
        assert_eq!(crate::exit::exit_code(&err), 2);

        let mut t = target();
        t.regions = vec!["aws=".to_string()];
        let err = plan_scan("aws", &t, &EffectiveConfig::default()).expect_err("empty");
        assert_eq!(crate::exit::exit_code(&err), 2);

        t.regions = vec!["aws=us-west-2".to_string()];
        let plan = plan_scan("aws", &t, &EffectiveConfig::default()).expect("qualified single");
        assert_eq!(plan.regions[&ProviderKind::Aws], vec!["us-west-2".to_string()]);
    }

    #[test]
    fn multi_region_scan_reports_account_wide_findings_once() {
        let runner = ScriptedRunner::new()
            .ok("aws sts get-caller-identity", r#"{"Account":"123456789012"}"#)
            .ok("aws s3api list-buckets", r#"{"Buckets":[{"Name":"logs"}]}"#)
            .ok(
                "aws s3api get-bucket-acl",
                r#"{"Grants":[{"Grantee":{"Type":"Group","URI":"http://acs.amazonaws.com/groups/global/AllUsers"},"Permission":"READ"}]}"#,
            )
            .ok("aws s3api get-bucket-encryption", r#"{"ServerSideEncryptionConfiguration":{"Rules":[]}}"#)
            .ok("aws s3api get-bucket-versioning", r#"{"Status":"Enabled"}"#)
            .ok("az group list", "[]")
            .ok(
                "az storage account list",
                r#"[{"name":"pub","id":"/subscriptions/s/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/pub","location":"eastus","allowBlobPublicAccess":true,"encryption":{"services":{"blob":{"enabled":true}}}}]"#,
            );
        let mut t = target();
        t.providers = vec!["aws".to_string(), "azure".to_string()];
        t.regions = vec![
            "aws=us-east-1".to_string(),
            "aws=eu-west-1".to_string(),
            "azure=eastus".to_string(),
        ];
        t.checks = Some("storage".to_string());
        let plan = plan_scan("multi", &t, &EffectiveConfig::default()).expect("plan");

        let outcome = execute_scan(&plan, Arc::new(runner), false);
        let ids = |name: &str| -> Vec<String> {
            outcome.report.findings[name]
                .iter()
                .map(|f| f.finding_id.clone())
                .collect()
        };
        assert_eq!(ids("aws"), vec!["aws-s3-public-logs".to_string()]);
        assert_eq!(ids("azure"), vec!["azure-storage-public-pub".to_string()]);
        assert_eq!(outcome.report.summary.total_findings, 2);
    }

    #[test]
    fn bad_check_name_is_invalid_args() {
        let mut t = target();
        t.checks = Some("storage,dns".to_string());
        let err = plan_scan("aws", &t, &EffectiveConfig::default()).expect_err("invalid");
        assert_eq!(crate::exit::exit_code(&err), 2);
    }

    #[test]
    fn multi_credentials_are_keyed_by_provider() {
        let parsed = parse_credentials(
            r#"{"azure":{"subscription_id":"sub"},"gcp":{"project_id":"p"}}"#,
            None,
        )
        .expect("parse");
        assert_eq!(parsed[&ProviderKind::Azure].subscription_id.as_deref(), Some("sub"));
        assert_eq!(parsed[&ProviderKind::Gcp].project_id.as_deref(), Some("p"));

        assert!(parse_credentials(r#"{"oracle":{}}"#, None).is_err());

        let single = parse_credentials(r#"{"project_id":"p"}"#, Some(ProviderKind::Gcp))
            .expect("single");
        assert_eq!(single.keys().collect::<Vec<_>>(), vec![&ProviderKind::Gcp]);
    }

    #[test]
    fn scan_outcome_reports_registered_providers_only() {
        let runner = ScriptedRunner::new()
            .ok("aws sts get-caller-identity", r#"{"Account":"123456789012"}"#)
            .ok("aws s3api list-buckets", r#"{"Buckets":[]}"#)
            .fail("gcloud", "ERROR: (gcloud) You do not currently have an active account");
        let mut t = target();
        t.providers = vec!["aws".to_string(), "gcp".to_string()];
        t.checks = Some("storage".to_string());
        let plan = plan_scan("multi", &t, &EffectiveConfig::default()).expect("plan");

        let outcome = execute_scan(&plan, Arc::new(runner), false);
        assert_eq!(outcome.registered, vec!["aws".to_string()]);
        assert_eq!(outcome.report.findings.len(), 1);
        assert_eq!(outcome.report.summary.total_findings, 0);
        assert_eq!(outcome.report.check_types, vec![CheckType::Storage]);

        let ui_cfg = UiConfig {
            color: false,
            stdout_is_tty: false,
            stderr_is_tty: false,
            max_table_rows: 10,
            quiet: true,
            verbose: false,
        };
        ensure_authenticated(&plan, &outcome, &ui_cfg).expect("partial success");
    }

    #[test]
    fn all_authentication_failures_exit_with_auth_code() {
        let runner = ScriptedRunner::new().fail("aws sts", "InvalidClientTokenId");
        let plan = plan_scan("aws", &target(), &EffectiveConfig::default()).expect("plan");
        let outcome = execute_scan(&plan, Arc::new(runner), false);
        assert!(outcome.report.findings.is_empty());

        let ui_cfg = UiConfig {
            color: false,
            stdout_is_tty: false,
            stderr_is_tty: false,
            max_table_rows: 10,
            quiet: true,
            verbose: false,
        };
        let err = ensure_authenticated(&plan, &outcome, &ui_cfg).expect_err("auth");
        assert_eq!(crate::exit::exit_code(&err), 20);
    }

    #[test]
    fn findings_file_accepts_report_or_array() {
        let finding = Finding::new(
            ProviderKind::Aws,
            "aws-iam-root-access-keys",
            "iam_root_access_keys",
            Severity::Critical,
            "t",
            "d",
            "root",
            "global",
        );
        let array = serde_json::to_string(&vec![finding.clone()]).expect("json");
        assert_eq!(parse_findings(&array).expect("array"), vec![finding.clone()]);

        let mut by_provider = BTreeMap::new();
        by_provider.insert("aws".to_string(), vec![finding.clone()]);
        let report = ScanReport {
            schema_version: SCHEMA_VERSION.to_string(),
            tool_version: "0".to_string(),
            generated_at: "now".to_string(),
            check_types: CheckType::DEFAULT.to_vec(),
            summary: crate::scanner::summarize(&by_provider),
            findings: by_provider,
        };
        let text = serde_json::to_string(&report).expect("json");
        assert_eq!(parse_findings(&text).expect("report"), vec![finding]);

        assert!(parse_findings(r#"{"nope":1}"#).is_err());
    }

    #[test]
    fn compliance_report_counts_failed_controls() {
        let findings = vec![Finding::new(
            ProviderKind::Gcp,
            "gcp-fw-open-allow-ssh",
            "firewall_open_rule",
            Severity::High,
            "t",
            "d",
            "r",
            "global",
        )];
        let report = compliance_report(
            &ComplianceMapper::default(),
            Framework::Cis,
            vec!["gcp".to_string()],
            &findings,
        );
        assert_eq!(report.findings_count, 1);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.controls[0].control_id, "3.7");
    }

    #[test]
    fn parse_shell_rejects_unknown() {
        assert!(parse_shell("zsh").is_ok());
        let err = parse_shell("tcsh").expect_err("unknown");
        assert_eq!(crate::exit::exit_code(&err), 2);
    }
}
