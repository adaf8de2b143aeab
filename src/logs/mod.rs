use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::compliance::Framework;
use crate::core::{CheckType, Finding, SCHEMA_VERSION, ScanSummary};

const MAX_ERROR_DETAIL_BYTES: usize = 4 * 1024;

/// Everything a scan-style command records about one run.
#[derive(Debug)]
pub struct ScanRun<'a> {
    pub command: &'static str,
    pub started_at: OffsetDateTime,
    pub finished_at: OffsetDateTime,
    pub requested_providers: &'a [String],
    pub registered_providers: &'a [String],
    pub check_types: &'a [CheckType],
    pub credentials_file: Option<&'a Path>,
    pub framework: Option<Framework>,
    pub findings: &'a BTreeMap<String, Vec<Finding>>,
    pub summary: &'a ScanSummary,
}

#[derive(Debug, Serialize)]
struct ScanRunLog {
    schema_version: &'static str,
    tool_version: String,
    command: &'static str,
    started_at: String,
    finished_at: String,
    status: &'static str,
    requested_providers: Vec<String>,
    registered_providers: Vec<String>,
    check_types: Vec<CheckType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    credentials_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    framework: Option<Framework>,
    summary: ScanSummary,
    scan_errors: Vec<ScanErrorEntry>,
}

#[derive(Debug, Serialize)]
struct ScanErrorEntry {
    provider: String,
    finding_id: String,
    region: String,
    detail: String,
}

pub fn logs_dir(home_dir: &Path) -> PathBuf {
    home_dir.join(".config/netsec-cloud/logs")
}

pub fn write_scan_log(home_dir: &Path, run: &ScanRun<'_>) -> Result<PathBuf> {
    let dir = logs_dir(home_dir);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create log directory: {}", dir.display()))?;

    let pid = std::process::id();
    let ts = run.finished_at.unix_timestamp_nanos();
    let file_name = format!("{}-{pid}-{ts}.json", run.command.replace(' ', "-"));
    let path = dir.join(file_name);

    let scan_errors: Vec<ScanErrorEntry> = run
        .findings
        .iter()
        .flat_map(|(provider, list)| {
            list.iter()
                .filter(|f| f.is_scan_error())
                .map(move |f| ScanErrorEntry {
                    provider: provider.clone(),
                    finding_id: f.finding_id.clone(),
                    region: f.region.clone(),
                    detail: truncate_string(&f.description, MAX_ERROR_DETAIL_BYTES),
                })
        })
        .collect();

    let status = run_status(run.registered_providers, &scan_errors);

    let log = ScanRunLog {
        schema_version: SCHEMA_VERSION,
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        command: run.command,
        started_at: run
            .started_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string()),
        finished_at: run
            .finished_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string()),
        status,
        requested_providers: run.requested_providers.to_vec(),
        registered_providers: run.registered_providers.to_vec(),
        check_types: run.check_types.to_vec(),
        credentials_file: run.credentials_file.map(|p| mask_home(p, home_dir)),
        framework: run.framework,
        summary: run.summary.clone(),
        scan_errors,
    };

    let buf = serde_json::to_vec_pretty(&log).context("failed to serialize run log (JSON)")?;
    std::fs::write(&path, buf)
        .with_context(|| format!("failed to write run log: {}", path.display()))?;
    Ok(path)
}

fn run_status(registered: &[String], scan_errors: &[ScanErrorEntry]) -> &'static str {
    if registered.is_empty() {
        "auth_failed"
    } else if scan_errors.is_empty() {
        "ok"
    } else {
        "partial_error"
    }
}

fn mask_home(path: &Path, home_dir: &Path) -> String {
    let Ok(stripped) = path.strip_prefix(home_dir) else {
        return path.display().to_string();
    };
    let stripped = stripped.display().to_string();
    if stripped.is_empty() {
        "~".to_string()
    } else {
        format!("~/{stripped}")
    }
}

fn truncate_string(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut idx = max_bytes;
    while idx > 0 && !s.is_char_boundary(idx) {
        idx = idx.saturating_sub(1);
    }
    let head = &s[..idx];
    format!("{head}\n...(truncated, total={} bytes)", s.len())
}
