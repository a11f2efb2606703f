//! Analysis settings and the project manifest.

use crate::lifetime::AccessPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Settings that change how analysis behaves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Widen local and anonymous classes in public supertype queries.
    pub approximate_local_types: bool,
    pub access_policy: AccessPolicy,
    /// Report warnings with error severity.
    pub warnings_as_errors: bool,
    pub report_deprecations: bool,
    /// Packages star-imported into every unit.
    pub default_imports: Vec<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            approximate_local_types: true,
            access_policy: AccessPolicy::AnalysisScope,
            warnings_as_errors: false,
            report_deprecations: true,
            default_imports: vec!["kestrel".to_string()],
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for import in &self.default_imports {
            let well_formed = !import.is_empty()
                && import
                    .split('.')
                    .all(|segment| !segment.is_empty() && segment.chars().all(|c| c.is_alphanumeric() || c == '_'));
            if !well_formed {
                return Err(ConfigError::Invalid {
                    field: "default_imports".to_string(),
                    message: format!("`{}` is not a package name", import),
                });
            }
        }
        Ok(())
    }

    /// Merge with another configuration (other takes precedence where it differs from the default)
    pub fn merge(&mut self, other: AnalysisConfig) {
        let defaults = AnalysisConfig::default();
        if other.approximate_local_types != defaults.approximate_local_types {
            self.approximate_local_types = other.approximate_local_types;
        }
        if other.access_policy != defaults.access_policy {
            self.access_policy = other.access_policy;
        }
        if other.warnings_as_errors {
            self.warnings_as_errors = true;
        }
        if other.report_deprecations != defaults.report_deprecations {
            self.report_deprecations = other.report_deprecations;
        }
        for import in other.default_imports {
            if !self.default_imports.contains(&import) {
                self.default_imports.push(import);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModuleKindConfig {
    #[default]
    Source,
    Library,
    NotUnderContentRoot,
}

/// One `[[module]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleManifest {
    pub name: String,
    #[serde(default)]
    pub kind: ModuleKindConfig,
    /// Declaration trees (JSON) of a source module.
    #[serde(default)]
    pub sources: Vec<PathBuf>,
    /// Serialized library description of a library module.
    #[serde(default)]
    pub metadata: Option<PathBuf>,
    #[serde(default)]
    pub attached_sources: Vec<PathBuf>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub friends: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl ModuleManifest {
    pub fn source(name: &str) -> Self {
        Self::with_kind(name, ModuleKindConfig::Source)
    }

    pub fn with_kind(name: &str, kind: ModuleKindConfig) -> Self {
        ModuleManifest {
            name: name.to_string(),
            kind,
            sources: Vec::new(),
            metadata: None,
            attached_sources: Vec::new(),
            dependencies: Vec::new(),
            friends: Vec::new(),
            depends_on: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectManifest {
    pub name: String,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default, rename = "module")]
    pub modules: Vec<ModuleManifest>,
}

impl ProjectManifest {
    /// Load a manifest from TOML; relative paths are resolved against the manifest's directory.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e,
        })?;
        let mut manifest: ProjectManifest = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e,
        })?;
        if let Some(base) = path.parent() {
            manifest.resolve_paths(base);
        }
        Ok(manifest)
    }

    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize { error: e })?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e,
        })
    }

    pub fn resolve_paths(&mut self, base: &Path) {
        let absolute = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        for module in &mut self.modules {
            module.sources.iter_mut().for_each(absolute);
            module.attached_sources.iter_mut().for_each(absolute);
            if let Some(metadata) = module.metadata.as_mut() {
                absolute(metadata);
            }
        }
    }

    pub fn module(&self, name: &str) -> Option<&ModuleManifest> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// Structural checks only; unknown dependency names are reported by the module graph.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.analysis.validate()?;
        let mut seen = HashSet::new();
        for module in &self.modules {
            if module.name.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field: "module.name".to_string(),
                    message: "module names must not be empty".to_string(),
                });
            }
            if !seen.insert(module.name.as_str()) {
                return Err(ConfigError::Invalid {
                    field: "module.name".to_string(),
                    message: format!("module `{}` is declared twice", module.name),
                });
            }
            if module.kind != ModuleKindConfig::Library && module.metadata.is_some() {
                return Err(ConfigError::Invalid {
                    field: format!("module.{}.metadata", module.name),
                    message: "only library modules carry metadata".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error for {path:?}: {error}")]
    Io { path: PathBuf, error: std::io::Error },

    #[error("Parse error for {path:?}: {error}")]
    Parse { path: PathBuf, error: toml::de::Error },

    #[error("Serialization error: {error}")]
    Serialize { error: toml::ser::Error },

    #[error("Invalid configuration for {field}: {message}")]
    Invalid { field: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MANIFEST: &str = r#"
name = "demo"

[analysis]
access_policy = "interactive"
warnings_as_errors = true

[[module]]
name = "stdlib-ext"
kind = "library"
metadata = "lib/ext.json"

[[module]]
name = "common"
sources = ["common/a.json"]

[[module]]
name = "jvm"
sources = ["jvm/b.json"]
depends_on = ["common"]
dependencies = ["stdlib-ext"]
"#;

    #[test]
    fn test_load_manifest_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kestrel.toml");
        std::fs::File::create(&path).unwrap().write_all(MANIFEST.as_bytes()).unwrap();

        let manifest = ProjectManifest::from_file(&path).unwrap();
        assert_eq!(manifest.name, "demo");
        assert_eq!(manifest.modules.len(), 3);
        assert_eq!(manifest.analysis.access_policy, AccessPolicy::Interactive);
        assert!(manifest.analysis.warnings_as_errors);
        assert!(manifest.analysis.report_deprecations);
        assert_eq!(manifest.analysis.default_imports, vec!["kestrel".to_string()]);

        let jvm = manifest.module("jvm").unwrap();
        assert_eq!(jvm.depends_on, vec!["common".to_string()]);
        assert_eq!(jvm.sources[0], dir.path().join("jvm/b.json"));
        assert_eq!(
            manifest.module("stdlib-ext").unwrap().metadata.as_deref(),
            Some(dir.path().join("lib/ext.json").as_path())
        );
        manifest.validate().unwrap();
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "name = ").unwrap();
        let error = ProjectManifest::from_file(&path).unwrap_err();
        assert!(matches!(error, ConfigError::Parse { .. }));
        assert!(error.to_string().contains("broken.toml"));
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let manifest = ProjectManifest {
            name: "dup".to_string(),
            analysis: AnalysisConfig::default(),
            modules: vec![ModuleManifest::source("a"), ModuleManifest::source("a")],
        };
        assert!(matches!(manifest.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_validate_default_imports() {
        let config = AnalysisConfig {
            default_imports: vec!["kestrel..io".to_string()],
            ..AnalysisConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_prefers_non_defaults() {
        let mut base = AnalysisConfig::default();
        base.merge(AnalysisConfig {
            approximate_local_types: false,
            default_imports: vec!["kestrel".to_string(), "kestrel.collections".to_string()],
            ..AnalysisConfig::default()
        });
        assert!(!base.approximate_local_types);
        assert!(base.report_deprecations);
        assert_eq!(base.default_imports.len(), 2);
    }
}
