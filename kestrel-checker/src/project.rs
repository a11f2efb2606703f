//! Projects: registered modules, their units and metadata, and the symbol
//! table built from them.
//!
//! The module graph lives in the salsa [`ModuleDatabase`]. Each module owns a
//! [`ModificationTracker`]; a structure tracker moves on every change to the
//! module set, the edges or the configuration. A built [`SymbolTable`] is
//! cached until the next mutation, and sessions opened on an older table
//! observe the tracker movement and become invalid.

use crate::builtins::{builtin_metadata, BUILTINS_MODULE_NAME};
use crate::config::{AnalysisConfig, ConfigError, ModuleKindConfig, ModuleManifest, ProjectManifest};
use crate::error::ConfigurationError;
use crate::lifetime::{CompositeTracker, ModificationTracker, SessionRegistry};
use crate::modules::{ModuleData, ModuleDatabase, ModuleGraph, ModuleKind};
use crate::providers::{BinaryMetadata, JsonLibraryMetadata, LibrarySymbolProvider, SourceSymbolProvider, SymbolProvider};
use crate::symbol_table::{ModuleEntry, SymbolTable};
use crate::symbols::ModuleId;
use kestrel_syntax::{FileId, SourceTree, SourceUnit, SyntaxError};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("cannot load {path}: {error}")]
    Load { path: String, error: SyntaxError },

    #[error("builtin library is malformed: {0}")]
    Builtins(SyntaxError),
}

struct RegisteredModule {
    name: String,
    kind: ModuleKind,
    dependencies: Vec<String>,
    friends: Vec<String>,
    depends_on: Vec<String>,
    units: Vec<Arc<SourceUnit>>,
    metadata: Option<Arc<dyn BinaryMetadata>>,
    tracker: Arc<ModificationTracker>,
}

impl RegisteredModule {
    fn new(name: &str, kind: ModuleKind) -> Self {
        RegisteredModule {
            name: name.to_string(),
            kind,
            dependencies: Vec::new(),
            friends: Vec::new(),
            depends_on: Vec::new(),
            units: Vec::new(),
            metadata: None,
            tracker: Arc::new(ModificationTracker::new()),
        }
    }
}

pub struct Project {
    name: String,
    config: Arc<AnalysisConfig>,
    database: ModuleDatabase,
    /// Indexed by `ModuleId`; the builtins are module 0.
    modules: Vec<RegisteredModule>,
    structure: Arc<ModificationTracker>,
    registry: Arc<SessionRegistry>,
    next_file: u32,
    generation: u64,
    table: OnceCell<Arc<SymbolTable>>,
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("name", &self.name)
            .field("modules", &self.modules.len())
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl Project {
    /// An empty project with the builtin library registered.
    pub fn new(name: &str, config: AnalysisConfig) -> Result<Self, ProjectError> {
        config.validate()?;
        let builtins = builtin_metadata().map_err(ProjectError::Builtins)?;
        let mut project = Project {
            name: name.to_string(),
            config: Arc::new(config),
            database: ModuleDatabase::new(),
            modules: Vec::new(),
            structure: Arc::new(ModificationTracker::new()),
            registry: Arc::new(SessionRegistry::new()),
            next_file: 0,
            generation: 0,
            table: OnceCell::new(),
        };
        let id = project.add_module(BUILTINS_MODULE_NAME, ModuleKind::Library { attached_sources: false })?;
        project.set_metadata(id, Arc::new(builtins))?;
        Ok(project)
    }

    /// Load and validate a TOML manifest, then every unit and library it names.
    pub fn load(path: &Path) -> Result<Self, ProjectError> {
        let manifest = ProjectManifest::from_file(path)?;
        Self::from_manifest(&manifest)
    }

    pub fn from_manifest(manifest: &ProjectManifest) -> Result<Self, ProjectError> {
        manifest.validate()?;
        let mut project = Project::new(&manifest.name, manifest.analysis.clone())?;
        let ids = manifest
            .modules
            .iter()
            .map(|m| project.add_module(&m.name, module_kind(m)))
            .collect::<Result<Vec<_>, _>>()?;
        for (id, module) in ids.into_iter().zip(&manifest.modules) {
            for dependency in &module.dependencies {
                project.add_dependency(id, dependency)?;
            }
            for friend in &module.friends {
                project.add_friend(id, friend)?;
            }
            for target in &module.depends_on {
                project.add_depends_on(id, target)?;
            }
            for source in module.sources.iter().chain(&module.attached_sources) {
                let file = project.allocate_file();
                let unit = SourceUnit::load(file, source).map_err(|error| ProjectError::Load {
                    path: source.display().to_string(),
                    error,
                })?;
                project.insert_unit(id, unit)?;
            }
            if let Some(metadata) = &module.metadata {
                let library = JsonLibraryMetadata::load(metadata).map_err(|error| ProjectError::Load {
                    path: metadata.display().to_string(),
                    error,
                })?;
                project.set_metadata(id, Arc::new(library))?;
            }
        }
        info!(
            "loaded project `{}` with {} modules",
            project.name,
            project.modules.len() - 1
        );
        Ok(project)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn database(&self) -> &ModuleDatabase {
        &self.database
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Every registered module, builtins first.
    pub fn module_ids(&self) -> Vec<ModuleId> {
        (0..self.modules.len() as u32).map(ModuleId).collect()
    }

    pub fn module_by_name(&self, name: &str) -> Option<ModuleId> {
        self.modules
            .iter()
            .position(|m| m.name == name)
            .map(|index| ModuleId(index as u32))
    }

    pub fn module_name(&self, module: ModuleId) -> Option<&str> {
        self.modules.get(module.0 as usize).map(|m| m.name.as_str())
    }

    pub fn module_kind(&self, module: ModuleId) -> Option<&ModuleKind> {
        self.modules.get(module.0 as usize).map(|m| &m.kind)
    }

    pub fn units(&self, module: ModuleId) -> Vec<Arc<SourceUnit>> {
        self.modules
            .get(module.0 as usize)
            .map(|m| m.units.clone())
            .unwrap_or_default()
    }

    pub fn add_module(&mut self, name: &str, kind: ModuleKind) -> Result<ModuleId, ConfigurationError> {
        if self.module_by_name(name).is_some() {
            return Err(ConfigurationError::DuplicateModule(name.to_string()));
        }
        let id = ModuleId(self.modules.len() as u32);
        self.modules.push(RegisteredModule::new(name, kind));
        debug!("registered module `{}` as {}", name, id);
        self.structure_changed();
        Ok(id)
    }

    pub fn add_dependency(&mut self, module: ModuleId, target: &str) -> Result<(), ConfigurationError> {
        self.module_mut(module)?.dependencies.push(target.to_string());
        self.structure_changed();
        Ok(())
    }

    pub fn add_friend(&mut self, module: ModuleId, target: &str) -> Result<(), ConfigurationError> {
        self.module_mut(module)?.friends.push(target.to_string());
        self.structure_changed();
        Ok(())
    }

    pub fn add_depends_on(&mut self, module: ModuleId, target: &str) -> Result<(), ConfigurationError> {
        self.module_mut(module)?.depends_on.push(target.to_string());
        self.structure_changed();
        Ok(())
    }

    /// Register binary metadata for a library module.
    pub fn set_metadata(&mut self, module: ModuleId, metadata: Arc<dyn BinaryMetadata>) -> Result<(), ConfigurationError> {
        let entry = self.module_mut(module)?;
        entry.metadata = Some(metadata);
        entry.tracker.increment();
        self.sync_module_graph();
        self.invalidate_table();
        Ok(())
    }

    /// Add a declaration tree to a module and return its unit id.
    pub fn add_unit(&mut self, module: ModuleId, tree: SourceTree) -> Result<FileId, ConfigurationError> {
        let file = self.allocate_file();
        self.insert_unit(module, SourceUnit::new(file, tree))?;
        Ok(file)
    }

    /// Replace a unit's tree. Returns `false` when the content is unchanged,
    /// in which case nothing is invalidated.
    pub fn update_unit(&mut self, file: FileId, tree: SourceTree) -> Result<bool, ConfigurationError> {
        let (index, position) = self
            .modules
            .iter()
            .enumerate()
            .find_map(|(index, m)| m.units.iter().position(|u| u.id() == file).map(|p| (index, p)))
            .ok_or(ConfigurationError::UnknownUnit(file))?;
        let module = &mut self.modules[index];
        if module.units[position].same_content(&tree) {
            debug!("unit {} unchanged", file);
            return Ok(false);
        }
        module.units[position] = Arc::new(SourceUnit::new(file, tree));
        let count = module.tracker.increment();
        debug!("unit {} of `{}` updated (modification {})", file, module.name, count);
        self.invalidate_table();
        Ok(true)
    }

    /// Change the analysis settings; invalidates every session.
    pub fn configure(&mut self, f: impl FnOnce(&mut AnalysisConfig)) {
        let mut config = (*self.config).clone();
        f(&mut config);
        self.config = Arc::new(config);
        self.structure_changed();
    }

    /// Trackers whose movement invalidates sessions of `module`: its visible
    /// modules plus the project structure.
    pub fn tracker_for(&self, module: ModuleId) -> CompositeTracker {
        let mut trackers = vec![self.structure.clone()];
        for visible in self.database.visible_modules(module).iter() {
            if let Some(entry) = self.modules.get(visible.0 as usize) {
                trackers.push(entry.tracker.clone());
            }
        }
        CompositeTracker::new(trackers)
    }

    /// The symbol table of the current generation.
    pub fn table(&self) -> Result<Arc<SymbolTable>, ConfigurationError> {
        self.table.get_or_try_init(|| self.build_table()).cloned()
    }

    fn module_mut(&mut self, module: ModuleId) -> Result<&mut RegisteredModule, ConfigurationError> {
        self.modules
            .get_mut(module.0 as usize)
            .ok_or(ConfigurationError::UnknownModule(module))
    }

    fn allocate_file(&mut self) -> FileId {
        let file = FileId::new(self.next_file);
        self.next_file += 1;
        file
    }

    fn insert_unit(&mut self, module: ModuleId, unit: SourceUnit) -> Result<(), ConfigurationError> {
        let entry = self.module_mut(module)?;
        entry.units.push(Arc::new(unit));
        entry.tracker.increment();
        self.invalidate_table();
        Ok(())
    }

    fn structure_changed(&mut self) {
        self.structure.increment();
        self.sync_module_graph();
        self.invalidate_table();
    }

    fn invalidate_table(&mut self) {
        if self.table.take().is_some() {
            self.generation += 1;
        }
    }

    /// Push the current module records into the salsa inputs.
    fn sync_module_graph(&mut self) {
        let resolve = |names: &[String], unknown: &mut Vec<String>| -> Vec<ModuleId> {
            let mut ids = Vec::new();
            for name in names {
                match self.module_by_name(name) {
                    Some(id) => ids.push(id),
                    None => unknown.push(name.clone()),
                }
            }
            ids
        };
        let mut records = Vec::with_capacity(self.modules.len());
        for module in &self.modules {
            let mut data = ModuleData::new(&module.name, module.kind.clone());
            let mut unknown = Vec::new();
            data.dependencies = resolve(&module.dependencies, &mut unknown);
            data.friends = resolve(&module.friends, &mut unknown);
            data.depends_on = resolve(&module.depends_on, &mut unknown);
            data.unknown_dependencies = unknown;
            data.has_metadata = module.metadata.is_some();
            records.push(Arc::new(data));
        }
        for (index, data) in records.into_iter().enumerate() {
            let id = ModuleId(index as u32);
            if !self.database.module_ids().contains(&id) || *self.database.module_data(id) != *data {
                self.database.set_module_data(id, data);
            }
        }
        let ids = self.module_ids();
        if *self.database.module_ids() != ids {
            self.database.set_module_ids(Arc::new(ids));
        }
    }

    fn build_table(&self) -> Result<Arc<SymbolTable>, ConfigurationError> {
        let mut entries = HashMap::new();
        let mut units = HashMap::new();
        for (index, module) in self.modules.iter().enumerate() {
            let id = ModuleId(index as u32);
            let provider: Arc<dyn SymbolProvider> = match (&module.kind, &module.metadata) {
                (ModuleKind::Library { .. }, Some(metadata)) => Arc::new(LibrarySymbolProvider::new(id, metadata.clone())),
                _ => Arc::new(SourceSymbolProvider::new(id, &module.units)),
            };
            for unit in &module.units {
                units.insert(unit.id(), (id, unit.clone()));
            }
            entries.insert(
                id,
                ModuleEntry {
                    data: self.database.module_data(id),
                    provider,
                    visible: self.database.visible_modules(id),
                    failure: self.database.module_failure(id),
                },
            );
        }
        for diagnostic in self
            .database
            .cycle_diagnostics()
            .into_iter()
            .chain(self.database.missing_dependency_diagnostics())
        {
            tracing::warn!("{}: {:?}", diagnostic.kind, diagnostic.parameters);
        }
        let table = SymbolTable::new(self.generation, self.config.clone(), entries, units)?;
        Ok(Arc::new(table))
    }
}

fn module_kind(manifest: &ModuleManifest) -> ModuleKind {
    match manifest.kind {
        ModuleKindConfig::Source => ModuleKind::Source,
        ModuleKindConfig::Library => ModuleKind::Library {
            attached_sources: !manifest.attached_sources.is_empty(),
        },
        ModuleKindConfig::NotUnderContentRoot => ModuleKind::NotUnderContentRoot,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::project_with;
    use kestrel_syntax::builder::{expr, SourceBuilder};
    use std::io::Write;

    #[test]
    fn test_tables_are_cached_per_generation() {
        let (mut project, module) = project_with(vec![SourceBuilder::new("a.kt").package("app")]);
        let first = project.table().unwrap();
        assert!(Arc::ptr_eq(&first, &project.table().unwrap()));

        let file = project.units(module)[0].id();
        let same = SourceBuilder::new("a.kt").package("app").build().unwrap();
        assert!(!project.update_unit(file, same).unwrap());
        assert!(Arc::ptr_eq(&first, &project.table().unwrap()));

        let changed = SourceBuilder::new("a.kt")
            .package("app")
            .function("f", |f| f.body(expr::int(1)))
            .build()
            .unwrap();
        assert!(project.update_unit(file, changed).unwrap());
        let second = project.table().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.generation() > first.generation());
    }

    #[test]
    fn test_trackers_cover_visible_modules() {
        let mut project = Project::new("p", AnalysisConfig::default()).unwrap();
        let lib = project.add_module("lib", ModuleKind::Source).unwrap();
        let app = project.add_module("app", ModuleKind::Source).unwrap();
        let other = project.add_module("other", ModuleKind::Source).unwrap();
        project.add_dependency(app, "lib").unwrap();
        let lib_file = project
            .add_unit(lib, SourceBuilder::new("l.kt").package("lib").build().unwrap())
            .unwrap();
        let other_file = project
            .add_unit(other, SourceBuilder::new("o.kt").package("other").build().unwrap())
            .unwrap();

        let tracker = project.tracker_for(app);
        let before = tracker.count();
        let edited = SourceBuilder::new("o.kt")
            .package("other")
            .function("g", |f| f)
            .build()
            .unwrap();
        project.update_unit(other_file, edited).unwrap();
        assert_eq!(tracker.count(), before);

        let edited = SourceBuilder::new("l.kt").package("lib").function("h", |f| f).build().unwrap();
        project.update_unit(lib_file, edited).unwrap();
        assert!(tracker.count() > before);
    }

    #[test]
    fn test_duplicate_and_unknown_modules() {
        let mut project = Project::new("p", AnalysisConfig::default()).unwrap();
        project.add_module("app", ModuleKind::Source).unwrap();
        assert_eq!(
            project.add_module("app", ModuleKind::Source),
            Err(ConfigurationError::DuplicateModule("app".to_string()))
        );
        assert!(project.add_dependency(ModuleId(42), "app").is_err());
    }

    #[test]
    fn test_library_without_metadata_fails() {
        let mut project = Project::new("p", AnalysisConfig::default()).unwrap();
        let lib = project
            .add_module("lib", ModuleKind::Library { attached_sources: false })
            .unwrap();
        let table = project.table().unwrap();
        assert!(matches!(
            table.module_failure(lib),
            Some(ConfigurationError::MissingMetadata { .. })
        ));
    }

    #[test]
    fn test_load_manifest_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let tree = SourceBuilder::new("main.kt")
            .package("app")
            .function("main", |f| f.body(expr::call("helper", vec![])))
            .build()
            .unwrap();
        let mut source = std::fs::File::create(dir.path().join("main.json")).unwrap();
        source.write_all(serde_json::to_string(&tree).unwrap().as_bytes()).unwrap();
        let library = r#"{
            "callables": [
                { "package": "util", "name": "helper", "kind": "Function", "return_type": "Int" }
            ]
        }"#;
        std::fs::write(dir.path().join("util.json"), library).unwrap();
        let manifest = r#"
            name = "demo"

            [analysis]
            warnings_as_errors = true

            [[module]]
            name = "util"
            kind = "library"
            metadata = "util.json"

            [[module]]
            name = "app"
            sources = ["main.json"]
            dependencies = ["util"]
        "#;
        let path = dir.path().join("kestrel.toml");
        std::fs::write(&path, manifest).unwrap();

        let project = Project::load(&path).unwrap();
        assert_eq!(project.name(), "demo");
        assert!(project.config().warnings_as_errors);
        let app = project.module_by_name("app").unwrap();
        assert_eq!(project.units(app).len(), 1);
        assert_eq!(
            project.database().visible_module_names(app),
            vec!["app".to_string(), "util".to_string(), BUILTINS_MODULE_NAME.to_string()]
        );
        let table = project.table().unwrap();
        assert!(table.module_failure(app).is_none());
    }
}
