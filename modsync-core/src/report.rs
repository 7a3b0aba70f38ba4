//! Human-readable lines for a discrepancy report. The display layer decides how to render them.

use std::fmt;

use crate::compare::DiscrepancyReport;
use crate::module::ModuleDescriptor;
use crate::snapshot::CompatibilitySnapshot;
use crate::version::VersionOrdering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportLine {
    pub severity: Severity,
    pub text: String,
}

impl ReportLine {
    fn new(severity: Severity, text: impl Into<String>) -> Self {
        Self {
            severity,
            text: text.into(),
        }
    }
}

impl fmt::Display for ReportLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        write!(f, "[{tag}] {}", self.text)
    }
}

/// Lines in display order: base version, version string, missing, too low, too high, extra.
pub fn format_report(
    report: &DiscrepancyReport,
    server: &CompatibilitySnapshot,
    client: &CompatibilitySnapshot,
) -> Vec<ReportLine> {
    let mut out = Vec::new();

    match report.base_version_mismatch {
        VersionOrdering::Equal => {}
        VersionOrdering::Lower => {
            out.push(ReportLine::new(
                Severity::Error,
                format!(
                    "Base version mismatch: host runs {}, you run {}",
                    server.base_version(),
                    client.base_version()
                ),
            ));
            out.push(ReportLine::new(
                Severity::Info,
                format!("Update to {} to join", server.base_version()),
            ));
        }
        VersionOrdering::Higher => {
            out.push(ReportLine::new(
                Severity::Error,
                format!(
                    "Base version mismatch: host runs {}, you run {}",
                    server.base_version(),
                    client.base_version()
                ),
            ));
            out.push(ReportLine::new(
                Severity::Info,
                "The host has to update before you can join",
            ));
        }
    }

    if report.version_string_mismatch {
        out.push(ReportLine::new(
            Severity::Warning,
            format!(
                "Build mismatch: host reports {:?}, you report {:?}",
                server.version_string(),
                client.version_string()
            ),
        ));
    }

    section(
        &mut out,
        "Missing modules required by the host:",
        &report.missing_on_joiner,
        |m| format!("{} {}", m.name, m.version.display_at(m.strictness)),
    );
    section(
        &mut out,
        "Modules older than the host's:",
        &report.too_low_on_joiner,
        |m| version_pair(m, client),
    );
    section(
        &mut out,
        "Modules newer than the host's:",
        &report.too_high_on_joiner,
        |m| version_pair(m, client),
    );
    section(
        &mut out,
        "Modules the host does not have:",
        &report.extra_on_joiner,
        |m| format!("{} {} (remove or disable it to join)", m.name, m.version),
    );

    out
}

fn section(
    out: &mut Vec<ReportLine>,
    header: &str,
    modules: &[ModuleDescriptor],
    line: impl Fn(&ModuleDescriptor) -> String,
) {
    if modules.is_empty() {
        return;
    }
    out.push(ReportLine::new(Severity::Error, header));
    for m in modules {
        out.push(ReportLine::new(Severity::Error, format!("  {}", line(m))));
    }
}

fn version_pair(host: &ModuleDescriptor, client: &CompatibilitySnapshot) -> String {
    let theirs = client
        .module(&host.name)
        .map(|m| m.version.to_string())
        .unwrap_or_else(|| "?".to_string());
    format!(
        "{}: host requires {}, you have {}",
        host.name,
        host.version.display_at(host.strictness),
        theirs
    )
}
