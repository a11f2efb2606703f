//! Module graph and dependency resolution.
//!
//! Module records are salsa inputs; visibility and the `dependsOn` closure are
//! derived queries, so editing one module's edges only recomputes what reads
//! them. Only `dependsOn` edges are followed transitively; regular and friend
//! dependencies contribute their direct targets alone.

use crate::diagnostics::{Diagnostic, DiagnosticArg, DiagnosticKind};
use crate::error::ConfigurationError;
use crate::symbols::ModuleId;
use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    Source,
    Library { attached_sources: bool },
    NotUnderContentRoot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyEdge {
    Regular,
    Friend,
    DependsOn,
}

/// A module as registered with the project.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleData {
    pub name: String,
    pub kind: ModuleKind,
    pub dependencies: Vec<ModuleId>,
    pub friends: Vec<ModuleId>,
    pub depends_on: Vec<ModuleId>,
    /// Dependency names that matched no module.
    pub unknown_dependencies: Vec<String>,
    /// Library modules only: whether binary metadata was registered.
    pub has_metadata: bool,
}

impl ModuleData {
    pub fn new(name: &str, kind: ModuleKind) -> Self {
        ModuleData {
            name: name.to_string(),
            kind,
            dependencies: Vec::new(),
            friends: Vec::new(),
            depends_on: Vec::new(),
            unknown_dependencies: Vec::new(),
            has_metadata: true,
        }
    }

    pub fn edges(&self) -> impl Iterator<Item = (ModuleId, DependencyEdge)> + '_ {
        self.dependencies
            .iter()
            .map(|m| (*m, DependencyEdge::Regular))
            .chain(self.friends.iter().map(|m| (*m, DependencyEdge::Friend)))
            .chain(self.depends_on.iter().map(|m| (*m, DependencyEdge::DependsOn)))
    }
}

#[salsa::query_group(ModuleGraphStorage)]
pub trait ModuleGraph: salsa::Database {
    #[salsa::input]
    fn module_data(&self, module: ModuleId) -> Arc<ModuleData>;

    /// Every registered module, builtins first.
    #[salsa::input]
    fn module_ids(&self) -> Arc<Vec<ModuleId>>;

    fn transitive_depends_on(&self, module: ModuleId) -> Arc<Vec<ModuleId>>;

    fn visible_modules(&self, module: ModuleId) -> Arc<Vec<ModuleId>>;

    fn depends_on_cycles(&self) -> Arc<Vec<Vec<ModuleId>>>;

    fn module_failure(&self, module: ModuleId) -> Option<ConfigurationError>;
}

#[salsa::database(ModuleGraphStorage)]
#[derive(Default)]
pub struct ModuleDatabase {
    storage: salsa::Storage<Self>,
}

impl salsa::Database for ModuleDatabase {}

impl std::fmt::Debug for ModuleDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleDatabase").finish_non_exhaustive()
    }
}

impl ModuleDatabase {
    pub fn new() -> Self {
        let mut db = Self::default();
        db.set_module_ids(Arc::new(Vec::new()));
        db
    }

    /// Names of modules a module may see, in visibility order.
    pub fn visible_module_names(&self, module: ModuleId) -> Vec<String> {
        self.visible_modules(module)
            .iter()
            .map(|m| self.module_data(*m).name.clone())
            .collect()
    }

    /// Configuration diagnostics for every `dependsOn` cycle.
    pub fn cycle_diagnostics(&self) -> Vec<Diagnostic> {
        self.depends_on_cycles()
            .iter()
            .map(|cycle| {
                let names: Vec<String> = cycle.iter().map(|m| self.module_data(*m).name.clone()).collect();
                Diagnostic::configuration(DiagnosticKind::DependsOnCycle, vec![DiagnosticArg::Text(names.join(" -> "))])
            })
            .collect()
    }

    pub fn missing_dependency_diagnostics(&self) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        for module in self.module_ids().iter() {
            let data = self.module_data(*module);
            for missing in &data.unknown_dependencies {
                diagnostics.push(Diagnostic::configuration(
                    DiagnosticKind::MissingDependency,
                    vec![DiagnosticArg::Text(data.name.clone()), DiagnosticArg::Text(missing.clone())],
                ));
            }
        }
        diagnostics
    }
}

/// Breadth-first closure over `dependsOn` edges starting from `direct`.
///
/// Duplicates are dropped and cycles are tolerated; the result is in BFS order.
pub fn compute_transitive_dependencies<F>(direct: &[ModuleId], depends_on: F) -> Vec<ModuleId>
where
    F: Fn(ModuleId) -> Vec<ModuleId>,
{
    let mut visited: HashSet<ModuleId> = HashSet::new();
    let mut order = Vec::new();
    let mut queue: VecDeque<ModuleId> = direct.iter().copied().collect();
    while let Some(module) = queue.pop_front() {
        if !visited.insert(module) {
            continue;
        }
        order.push(module);
        for next in depends_on(module) {
            if !visited.contains(&next) {
                queue.push_back(next);
            }
        }
    }
    order
}

fn transitive_depends_on(db: &dyn ModuleGraph, module: ModuleId) -> Arc<Vec<ModuleId>> {
    let data = db.module_data(module);
    let closure = compute_transitive_dependencies(&data.depends_on, |m| db.module_data(m).depends_on.clone());
    Arc::new(closure.into_iter().filter(|m| *m != module).collect())
}

fn visible_modules(db: &dyn ModuleGraph, module: ModuleId) -> Arc<Vec<ModuleId>> {
    let data = db.module_data(module);
    let mut visible = vec![module];
    let not_under_root = data.kind == ModuleKind::NotUnderContentRoot;
    if !not_under_root {
        let transitive = db.transitive_depends_on(module);
        let candidates = data
            .dependencies
            .iter()
            .chain(data.friends.iter())
            .copied()
            .chain(transitive.iter().copied());
        for candidate in candidates {
            if !visible.contains(&candidate) {
                visible.push(candidate);
            }
        }
    }
    if !visible.contains(&ModuleId::BUILTINS) {
        visible.push(ModuleId::BUILTINS);
    }
    Arc::new(visible)
}

fn depends_on_cycles(db: &dyn ModuleGraph) -> Arc<Vec<Vec<ModuleId>>> {
    let mut graph: DiGraphMap<ModuleId, ()> = DiGraphMap::new();
    for module in db.module_ids().iter() {
        graph.add_node(*module);
        for target in &db.module_data(*module).depends_on {
            graph.add_edge(*module, *target, ());
        }
    }
    let mut cycles: Vec<Vec<ModuleId>> = tarjan_scc(&graph)
        .into_iter()
        .filter(|component| component.len() > 1 || graph.contains_edge(component[0], component[0]))
        .map(|mut component| {
            component.sort();
            component
        })
        .collect();
    cycles.sort();
    for cycle in &cycles {
        warn!("dependsOn cycle between {:?}", cycle);
    }
    Arc::new(cycles)
}

fn module_failure(db: &dyn ModuleGraph, module: ModuleId) -> Option<ConfigurationError> {
    let data = db.module_data(module);
    if let Some(dependency) = data.unknown_dependencies.first() {
        return Some(ConfigurationError::UnknownDependency {
            module: data.name.clone(),
            dependency: dependency.clone(),
        });
    }
    if matches!(data.kind, ModuleKind::Library { .. }) && !data.has_metadata {
        return Some(ConfigurationError::MissingMetadata {
            module: data.name.clone(),
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn module(db: &mut ModuleDatabase, id: u32, name: &str, f: impl FnOnce(&mut ModuleData)) -> ModuleId {
        let id = ModuleId(id);
        let mut data = ModuleData::new(name, ModuleKind::Source);
        f(&mut data);
        db.set_module_data(id, Arc::new(data));
        let mut ids = (*db.module_ids()).clone();
        ids.push(id);
        db.set_module_ids(Arc::new(ids));
        id
    }

    fn with_builtins() -> ModuleDatabase {
        let mut db = ModuleDatabase::new();
        module(&mut db, 0, "<builtins>", |d| d.kind = ModuleKind::Library { attached_sources: false });
        db
    }

    #[test]
    fn test_only_depends_on_is_transitive() {
        let mut db = with_builtins();
        let lib = module(&mut db, 1, "lib", |_| {});
        let common = module(&mut db, 2, "common", |d| d.dependencies = vec![ModuleId(1)]);
        let shared = module(&mut db, 3, "shared", |d| d.depends_on = vec![ModuleId(2)]);
        let jvm = module(&mut db, 4, "jvm", |d| d.depends_on = vec![ModuleId(3)]);

        assert_eq!(*db.transitive_depends_on(jvm), vec![shared, common]);
        let visible = db.visible_modules(jvm);
        assert_eq!(*visible, vec![jvm, shared, common, ModuleId::BUILTINS]);
        assert!(!visible.contains(&lib));
        assert!(db.visible_modules(common).contains(&lib));
    }

    #[test]
    fn test_cycles_are_tolerated_and_reported() {
        let mut db = with_builtins();
        let a = module(&mut db, 1, "a", |d| d.depends_on = vec![ModuleId(2)]);
        let b = module(&mut db, 2, "b", |d| d.depends_on = vec![ModuleId(1)]);
        module(&mut db, 3, "c", |d| d.depends_on = vec![ModuleId(3)]);

        assert_eq!(*db.transitive_depends_on(a), vec![b]);
        assert_eq!(*db.depends_on_cycles(), vec![vec![a, b], vec![ModuleId(3)]]);
        let diagnostics = db.cycle_diagnostics();
        assert_eq!(diagnostics.len(), 2);
        assert!(diagnostics.iter().all(|d| d.kind == DiagnosticKind::DependsOnCycle && d.unit.is_none()));
    }

    #[test]
    fn test_not_under_content_root_sees_only_itself() {
        let mut db = with_builtins();
        module(&mut db, 1, "lib", |_| {});
        let scratch = module(&mut db, 2, "scratch", |d| {
            d.kind = ModuleKind::NotUnderContentRoot;
            d.dependencies = vec![ModuleId(1)];
        });
        assert_eq!(*db.visible_modules(scratch), vec![scratch, ModuleId::BUILTINS]);
    }

    #[test]
    fn test_failures() {
        let mut db = with_builtins();
        let broken = module(&mut db, 1, "broken", |d| d.unknown_dependencies = vec!["ghost".to_string()]);
        let lib = module(&mut db, 2, "lib", |d| {
            d.kind = ModuleKind::Library { attached_sources: true };
            d.has_metadata = false;
        });
        assert_eq!(
            db.module_failure(broken),
            Some(ConfigurationError::UnknownDependency {
                module: "broken".to_string(),
                dependency: "ghost".to_string()
            })
        );
        assert!(matches!(db.module_failure(lib), Some(ConfigurationError::MissingMetadata { .. })));
        assert_eq!(db.module_failure(ModuleId::BUILTINS), None);
        assert_eq!(db.missing_dependency_diagnostics().len(), 1);
    }

    #[test]
    fn test_edits_recompute_closure() {
        let mut db = with_builtins();
        let a = module(&mut db, 1, "a", |_| {});
        let b = module(&mut db, 2, "b", |_| {});
        assert!(db.transitive_depends_on(a).is_empty());

        let mut data = (*db.module_data(a)).clone();
        data.depends_on.push(b);
        db.set_module_data(a, Arc::new(data));
        assert_eq!(*db.transitive_depends_on(a), vec![b]);
    }

    #[test]
    fn test_random_graphs_close_without_duplicates() {
        let mut rng = StdRng::seed_from_u64(0x6b65_7374);
        for _ in 0..50 {
            let count = rng.gen_range(2..12u32);
            let edges: Vec<Vec<ModuleId>> = (0..count)
                .map(|_| {
                    (0..rng.gen_range(0..4))
                        .map(|_| ModuleId(rng.gen_range(0..count)))
                        .collect()
                })
                .collect();
            let closure = compute_transitive_dependencies(&edges[0], |m| edges[m.0 as usize].clone());
            let unique: HashSet<_> = closure.iter().collect();
            assert_eq!(unique.len(), closure.len());
            assert!(closure.len() <= count as usize);
        }
    }
}
