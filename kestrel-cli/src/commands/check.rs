//! Analysis of source units

use super::{load_project, module_named, ExitStatus};
use crate::format::{format_json, format_text, OutputFormat, UnitReport};
use anyhow::{Context, Result};
use colored::*;
use kestrel_checker::{render, ModuleId, ModuleKind, Project};
use std::path::Path;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub async fn check_command(manifest: &Path, module: Option<&str>, format: OutputFormat) -> Result<ExitStatus> {
    let project = load_project(manifest)?;
    let reports = analyse(&project, module).await?;

    match format {
        OutputFormat::Json => println!("{}", format_json(&reports)?),
        OutputFormat::Text => {
            for report in &reports {
                for line in format_text(report) {
                    println!("{}", line);
                }
            }
        }
    }

    let errors: usize = reports.iter().map(UnitReport::error_count).sum();
    let units = reports.iter().filter(|r| r.module != PROJECT_REPORT).count();
    if format == OutputFormat::Text {
        let summary = format!("{} units checked, {} errors", units, errors);
        if errors == 0 {
            eprintln!("{} {}", "Success:".green().bold(), summary);
        } else {
            eprintln!("{} {}", "Failed:".red().bold(), summary);
        }
    }
    Ok(if errors == 0 { ExitStatus::Clean } else { ExitStatus::Errors })
}

const PROJECT_REPORT: &str = "<project>";

/// Every selected unit, each analysed in its own session on the blocking pool.
pub async fn analyse(project: &Project, module: Option<&str>) -> Result<Vec<UnitReport>> {
    let modules: Vec<ModuleId> = match module {
        Some(name) => vec![module_named(project, name)?],
        None => project
            .module_ids()
            .into_iter()
            .filter(|m| {
                matches!(
                    project.module_kind(*m),
                    Some(ModuleKind::Source | ModuleKind::NotUnderContentRoot)
                )
            })
            .collect(),
    };

    let mut reports = Vec::new();
    let table = project.table()?;
    let configuration: Vec<_> = project
        .database()
        .cycle_diagnostics()
        .into_iter()
        .chain(project.database().missing_dependency_diagnostics())
        .map(|d| render(&d, table.as_ref()))
        .collect();
    if !configuration.is_empty() {
        reports.push(UnitReport {
            module: PROJECT_REPORT.to_string(),
            path: project.name().to_string(),
            diagnostics: configuration,
        });
    }

    let mut tasks: Vec<(String, String, JoinHandle<Result<UnitReport>>)> = Vec::new();
    for module in modules {
        let name = project.module_name(module).unwrap_or_default().to_string();
        for unit in project.units(module) {
            let session = project.session(module)?;
            let module_name = name.clone();
            let path = unit.path().to_string();
            debug!("scheduling {} in {}", path, session.id());
            let task = tokio::task::spawn_blocking(move || {
                let _guard = session.enter();
                let diagnostics = session
                    .rendered_diagnostics(unit.id())
                    .with_context(|| format!("Failed to analyse {}", unit.path()))?;
                Ok(UnitReport {
                    module: module_name,
                    path: unit.path().to_string(),
                    diagnostics,
                })
            });
            tasks.push((name.clone(), path, task));
        }
    }

    for (module, path, task) in tasks {
        let report = task
            .await
            .with_context(|| format!("Analysis of {} in `{}` panicked", path, module))??;
        info!("{}: {} diagnostics", report.path, report.diagnostics.len());
        reports.push(report);
    }
    Ok(reports)
}
