use anyhow::Error;
use std::io::{self, Write};
use unicode_width::UnicodeWidthChar;

use crate::compliance::{ComplianceReport, ControlInfo, Framework, FrameworkInfo};
use crate::core::{Finding, ProviderKind, ScanReport, Severity};
use crate::providers::CloudProvider;

#[derive(Debug, Clone)]
pub struct UiConfig {
    pub color: bool,
    pub stdout_is_tty: bool,
    pub stderr_is_tty: bool,
    pub max_table_rows: usize,
    pub quiet: bool,
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ScanView {
    Summary,
    Table,
}

pub fn eprintln_error(err: &Error) {
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "error:");
    let _ = writeln!(stderr, "  {err}");

    let mut causes = err.chain().skip(1).peekable();
    if causes.peek().is_some() {
        let _ = writeln!(stderr, "caused by:");
        for cause in causes {
            let _ = writeln!(stderr, "  - {cause}");
        }
    }

    let _ = writeln!(stderr, "next:");
    let _ = writeln!(stderr, "  - re-run with `--verbose` for diagnostic logs");
    let _ = writeln!(
        stderr,
        "  - see `netsec-cloud --help` for available commands and options"
    );
}

pub fn print_scan_report(report: &ScanReport, cfg: &UiConfig, view: ScanView) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    write_scan_report(&mut out, report, cfg, view);
}

fn write_scan_report(out: &mut dyn Write, report: &ScanReport, cfg: &UiConfig, view: ScanView) {
    let summary = &report.summary;
    let _ = writeln!(out, "Total findings: {}", summary.total_findings);

    let severities: Vec<String> = Severity::ALL
        .iter()
        .rev()
        .map(|s| {
            let n = summary.by_severity.get(s).copied().unwrap_or(0);
            format!("{}={n}", format_severity(*s, cfg.color && n > 0))
        })
        .collect();
    let _ = writeln!(out, "By severity: {}", severities.join("  "));

    if !summary.by_provider.is_empty() {
        let providers: Vec<String> = summary
            .by_provider
            .iter()
            .map(|(p, n)| format!("{p}={n}"))
            .collect();
        let _ = writeln!(out, "By provider: {}", providers.join("  "));
    }

    let mut findings: Vec<&Finding> = report
        .findings
        .values()
        .flatten()
        .filter(|f| !f.is_scan_error())
        .collect();
    findings.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.provider.cmp(&b.provider))
            .then_with(|| a.finding_id.cmp(&b.finding_id))
    });

    match view {
        ScanView::Summary => {
            if !summary.by_type.is_empty() {
                let _ = writeln!(out);
                let _ = writeln!(out, "By type:");
                let type_w = summary
                    .by_type
                    .keys()
                    .map(|t| visible_width_ansi(t))
                    .max()
                    .unwrap_or(0);
                for (finding_type, n) in &summary.by_type {
                    let _ = writeln!(out, "  {}  {n}", pad_end_display(finding_type, type_w));
                }
            }
        }
        ScanView::Table => {
            let rows = cfg.max_table_rows.min(findings.len());
            let _ = writeln!(out);
            if findings.len() > rows {
                let _ = writeln!(out, "Findings ({rows} shown / {} total):", findings.len());
            } else {
                let _ = writeln!(out, "Findings ({rows}):");
            }
            write_findings_table(out, &findings, rows, cfg.color);
        }
    }

    let errors: Vec<&Finding> = report
        .findings
        .values()
        .flatten()
        .filter(|f| f.is_scan_error())
        .collect();
    if !errors.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Scan errors ({}):", errors.len());
        for f in errors {
            let detail = if cfg.verbose {
                f.description.clone()
            } else {
                truncate_middle(&f.description, 160)
            };
            let _ = writeln!(out, "- {} [{}]", f.title, f.region);
            let _ = writeln!(out, "  - {detail}");
        }
    }
}

fn write_findings_table(out: &mut dyn Write, findings: &[&Finding], rows: usize, color: bool) {
    let label_sev = "SEVERITY";
    let label_provider = "PROVIDER";
    let label_region = "REGION";
    let label_title = "TITLE";

    let sev_w = visible_width_ansi(label_sev);
    let provider_w = visible_width_ansi(label_provider);
    let region_w = findings
        .iter()
        .take(rows)
        .map(|f| visible_width_ansi(&truncate_middle(&f.region, 24)))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_region));
    let title_w = visible_width_ansi(label_title);

    let _ = writeln!(
        out,
        "{}  {}  {}  {}",
        pad_end_display(label_sev, sev_w),
        pad_end_display(label_provider, provider_w),
        pad_end_display(label_region, region_w),
        label_title
    );
    let _ = writeln!(
        out,
        "{}  {}  {}  {}",
        "-".repeat(sev_w),
        "-".repeat(provider_w),
        "-".repeat(region_w),
        "-".repeat(title_w)
    );

    for finding in findings.iter().take(rows) {
        let sev = pad_end_ansi(&format_severity(finding.severity, color), sev_w);
        let provider = pad_end_display(finding.provider.as_str(), provider_w);
        let region = pad_end_display(&truncate_middle(&finding.region, 24), region_w);
        let _ = writeln!(out, "{sev}  {provider}  {region}  {}", finding.title);
    }
}

pub fn print_compliance_report(report: &ComplianceReport, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    write_compliance_report(&mut out, report, cfg);
}

fn write_compliance_report(out: &mut dyn Write, report: &ComplianceReport, cfg: &UiConfig) {
    let info = report.framework.info();
    let _ = writeln!(
        out,
        "{} ({}): {} findings, {} failed controls",
        info.display_name,
        report.framework,
        report.findings_count,
        report.summary.failed
    );
    if !report.providers.is_empty() {
        let _ = writeln!(out, "Providers: {}", report.providers.join(", "));
    }

    if report.controls.is_empty() {
        let _ = writeln!(out, "No mapped control failed.");
        return;
    }

    let id_w = report
        .controls
        .iter()
        .map(|c| visible_width_ansi(&c.control_id))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi("CONTROL"));
    let sev_w = visible_width_ansi("SEVERITY");
    let count_w = visible_width_ansi("FINDINGS");

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{}  {}  {}  TITLE",
        pad_end_display("CONTROL", id_w),
        pad_end_display("SEVERITY", sev_w),
        pad_start_display("FINDINGS", count_w)
    );
    let _ = writeln!(
        out,
        "{}  {}  {}  {}",
        "-".repeat(id_w),
        "-".repeat(sev_w),
        "-".repeat(count_w),
        "-".repeat(5)
    );
    for control in report.controls.iter().take(cfg.max_table_rows.max(1)) {
        let _ = writeln!(
            out,
            "{}  {}  {}  {}",
            pad_end_display(&control.control_id, id_w),
            pad_end_ansi(&format_severity(control.severity, cfg.color), sev_w),
            pad_start_display(&control.finding_count.to_string(), count_w),
            control.control_title
        );
        if cfg.verbose {
            let _ = writeln!(out, "    {}", control.finding_ids.join(", "));
        }
    }
    let shown = report.controls.len().min(cfg.max_table_rows.max(1));
    if report.controls.len() > shown {
        let _ = writeln!(out, "...({} more)", report.controls.len() - shown);
    }
}

pub fn print_frameworks(frameworks: &[FrameworkInfo], cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    let name_w = frameworks
        .iter()
        .map(|f| visible_width_ansi(f.name.as_str()))
        .max()
        .unwrap_or(0);
    for f in frameworks {
        let providers: Vec<&str> = f.supported_providers.iter().map(|p| p.as_str()).collect();
        let _ = writeln!(
            out,
            "{}  {} [{}]",
            pad_end_display(f.name.as_str(), name_w),
            f.display_name,
            providers.join(",")
        );
        if cfg.verbose {
            let _ = writeln!(out, "  {}", f.description);
        }
    }
}

pub fn print_controls(framework: Framework, controls: &[ControlInfo], cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    let _ = writeln!(
        out,
        "{} controls ({}):",
        framework.info().display_name,
        controls.len()
    );
    let id_w = controls
        .iter()
        .map(|c| visible_width_ansi(&c.control_id))
        .max()
        .unwrap_or(0);
    for c in controls {
        if c.title == c.control_id {
            let _ = writeln!(out, "  {}", c.control_id);
        } else {
            let _ = writeln!(out, "  {}  {}", pad_end_display(&c.control_id, id_w), c.title);
        }
    }
}

pub fn print_providers(cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    for kind in ProviderKind::ALL {
        let _ = writeln!(
            out,
            "{:<6} {} (default regions: {})",
            kind.as_str(),
            kind.display_name(),
            CloudProvider::default_regions(kind).join(",")
        );
    }
}

fn format_severity(severity: Severity, color: bool) -> String {
    let s = severity.as_str();
    if !color {
        return s.to_string();
    }

    let code = match severity {
        Severity::Info => "90",
        Severity::Low => "32",
        Severity::Medium => "33",
        Severity::High => "31",
        Severity::Critical => "1;31",
    };
    format!("\x1b[{code}m{s}\x1b[0m")
}

fn truncate_middle(s: &str, max_chars: usize) -> String {
    let len = s.chars().count();
    if len <= max_chars {
        return s.to_string();
    }

    let keep = max_chars.saturating_sub(3);
    let left = keep / 2;
    let right = keep.saturating_sub(left);

    let prefix: String = s.chars().take(left).collect();
    let suffix: String = s
        .chars()
        .rev()
        .take(right)
        .collect::<String>()
        .chars()
        .rev()
        .collect();

    format!("{prefix}...{suffix}")
}

fn pad_end_ansi(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{s}{}", " ".repeat(width - w))
}

fn pad_end_display(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{s}{}", " ".repeat(width - w))
}

fn pad_start_display(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{}{}", " ".repeat(width - w), s)
}

fn visible_width_ansi(s: &str) -> usize {
    let mut width: usize = 0;
    let mut chars = s.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\x1b' && chars.peek() == Some(&'[') {
            let _ = chars.next();
            for ch2 in chars.by_ref() {
                if ch2 == 'm' {
                    break;
                }
            }
            continue;
        }
        width = width.saturating_add(UnicodeWidthChar::width(ch).unwrap_or(0));
    }
    width
}
