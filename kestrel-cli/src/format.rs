//! Output formats and diagnostic printing

use anyhow::{bail, Result};
use colored::*;
use kestrel_checker::{RenderedDiagnostic, Severity};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" | "human" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => bail!("Unknown format: {}", s),
        }
    }
}

/// Diagnostics of one analysed unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitReport {
    pub module: String,
    pub path: String,
    pub diagnostics: Vec<RenderedDiagnostic>,
}

impl UnitReport {
    pub fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.severity == Severity::Error).count()
    }
}

pub fn severity_label(severity: Severity) -> ColoredString {
    match severity {
        Severity::Error => "error".red().bold(),
        Severity::Warning => "warning".yellow().bold(),
        Severity::Info => "info".blue().bold(),
    }
}

/// One line per diagnostic: `path:start..end: severity[CODE]: message`.
pub fn format_text(report: &UnitReport) -> Vec<String> {
    report
        .diagnostics
        .iter()
        .map(|d| {
            format!(
                "{}:{}..{}: {}[{}]: {}",
                report.path,
                d.range.start.as_u32(),
                d.range.end.as_u32(),
                severity_label(d.severity),
                d.code,
                d.message
            )
        })
        .collect()
}

pub fn format_json(reports: &[UnitReport]) -> Result<String> {
    Ok(serde_json::to_string_pretty(reports)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_syntax::{FileId, Span};

    fn report() -> UnitReport {
        UnitReport {
            module: "app".to_string(),
            path: "main.kt".to_string(),
            diagnostics: vec![RenderedDiagnostic {
                severity: Severity::Error,
                code: "UNRESOLVED_REFERENCE".to_string(),
                message: "Unresolved reference: nope".to_string(),
                range: Span::from_offsets(FileId::new(0), 4, 8),
            }],
        }
    }

    #[test]
    fn test_text_lines() {
        colored::control::set_override(false);
        let lines = format_text(&report());
        assert_eq!(lines, vec!["main.kt:4..8: error[UNRESOLVED_REFERENCE]: Unresolved reference: nope"]);
    }

    #[test]
    fn test_json_is_structured() {
        let json = format_json(&[report()]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["diagnostics"][0]["code"], "UNRESOLVED_REFERENCE");
        assert_eq!(report().error_count(), 1);
    }

    #[test]
    fn test_unknown_format() {
        assert!(OutputFormat::from_str("xml").is_err());
        assert_eq!(OutputFormat::from_str("JSON").unwrap(), OutputFormat::Json);
    }
}
