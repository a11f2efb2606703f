//! Supertype listing

use super::{load_project, module_named, ExitStatus};
use anyhow::{Context, Result};
use colored::*;
use kestrel_checker::Project;
use std::path::Path;

pub async fn supertypes_command(manifest: &Path, module: &str, class: &str, approximate: bool) -> Result<ExitStatus> {
    let project = load_project(manifest)?;
    let (name, supertypes) = supertypes_of(&project, module, class, approximate)?;
    println!("{}", name.bold());
    for supertype in supertypes {
        println!("  {}", supertype.cyan());
    }
    Ok(ExitStatus::Clean)
}

/// The class's rendered name and every supertype, breadth-first.
pub fn supertypes_of(project: &Project, module: &str, class: &str, approximate: bool) -> Result<(String, Vec<String>)> {
    let module = module_named(project, module)?;
    let session = project.session(module)?;
    let _guard = session.enter();
    let handle = session
        .class(class)?
        .with_context(|| format!("No class `{}` is visible from the module", class))?;
    let rendered = handle
        .all_supertypes(approximate)?
        .iter()
        .map(|ty| handle.render(ty))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((handle.name()?, rendered))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_checker::{AnalysisConfig, ModuleKind};
    use kestrel_syntax::builder::SourceBuilder;

    #[test]
    fn test_supertypes_in_breadth_first_order() {
        let mut project = Project::new("demo", AnalysisConfig::default()).unwrap();
        let app = project.add_module("app", ModuleKind::Source).unwrap();
        project
            .add_unit(
                app,
                SourceBuilder::new("a.kt")
                    .package("app")
                    .interface("Shape", |c| c)
                    .class("Base", |c| c.open().supertype("Shape"))
                    .class("Square", |c| c.supertype("Base"))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let (name, supertypes) = supertypes_of(&project, "app", "app.Square", false).unwrap();
        assert_eq!(name, "app.Square");
        assert_eq!(supertypes, vec!["Base", "Shape"]);
        assert!(supertypes_of(&project, "app", "app.Circle", false).is_err());
    }
}
