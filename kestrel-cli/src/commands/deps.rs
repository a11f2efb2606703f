//! Module dependency report

use super::{load_project, module_named, ExitStatus};
use anyhow::Result;
use colored::*;
use kestrel_checker::{ModuleGraph, Project};
use std::path::Path;

pub async fn deps_command(manifest: &Path, module: &str) -> Result<ExitStatus> {
    let project = load_project(manifest)?;
    let report = dependency_report(&project, module)?;

    println!("{}", "Visible modules:".bold());
    for name in &report.visible {
        println!("  {}", name);
    }
    println!("{}", "dependsOn closure:".bold());
    for name in &report.depends_on {
        println!("  {}", name);
    }
    if !report.cycles.is_empty() {
        println!("{}", "Cycles:".yellow().bold());
        for cycle in &report.cycles {
            println!("  {}", cycle.join(" -> "));
        }
    }
    Ok(ExitStatus::Clean)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyReport {
    pub visible: Vec<String>,
    pub depends_on: Vec<String>,
    /// Every dependsOn cycle of the project.
    pub cycles: Vec<Vec<String>>,
}

pub fn dependency_report(project: &Project, module: &str) -> Result<DependencyReport> {
    let module = module_named(project, module)?;
    let db = project.database();
    let name = |id| project.module_name(id).unwrap_or("?").to_string();
    Ok(DependencyReport {
        visible: db.visible_module_names(module),
        depends_on: db.transitive_depends_on(module).iter().map(|m| name(*m)).collect(),
        cycles: db
            .depends_on_cycles()
            .iter()
            .map(|cycle| cycle.iter().map(|m| name(*m)).collect())
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_checker::{AnalysisConfig, ModuleKind};

    #[test]
    fn test_report_follows_depends_on_only() {
        let mut project = Project::new("demo", AnalysisConfig::default()).unwrap();
        let common = project.add_module("common", ModuleKind::Source).unwrap();
        let shared = project.add_module("shared", ModuleKind::Source).unwrap();
        let jvm = project.add_module("jvm", ModuleKind::Source).unwrap();
        let util = project.add_module("util", ModuleKind::Source).unwrap();
        project.add_depends_on(jvm, "shared").unwrap();
        project.add_depends_on(shared, "common").unwrap();
        project.add_depends_on(common, "shared").unwrap();
        project.add_dependency(jvm, "util").unwrap();
        project.add_dependency(util, "common").unwrap();

        let report = dependency_report(&project, "jvm").unwrap();
        assert_eq!(report.visible, vec!["jvm", "util", "shared", "common", "<builtins>"]);
        assert_eq!(report.depends_on, vec!["shared", "common"]);
        assert_eq!(report.cycles, vec![vec!["common".to_string(), "shared".to_string()]]);
    }
}
