//! Lexical scopes and classifier lookup.
//!
//! A [`ScopeChain`] is a persistent stack of levels on top of the file scope of
//! one unit. Pushing a level shares the tail with the parent chain, so body
//! resolution can fork scopes for lambdas and blocks without copying.

use crate::symbols::{ClassId, ModuleId, TypeParamId};
use crate::types::Type;
use kestrel_syntax::{FileId, ImportDirective, QualifiedName, SourceUnit, Span, Symbol};
use std::collections::HashMap;
use std::sync::Arc;

/// A local value visible in a block or lambda body.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalVariable {
    pub name: Symbol,
    pub ty: Type,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum ScopeLevel {
    TypeParameters(Vec<(Symbol, TypeParamId)>),
    /// Inside the body of a class. `receiver` is `None` where `this` of the
    /// class is not available (the body of a nested, non-inner class).
    Class { class: ClassId, receiver: Option<Type> },
    /// Extension receiver of a function, property or lambda.
    Receiver(Type),
    Local(LocalVariable),
    LocalClass { name: Symbol, class: ClassId },
}

/// Imports of one unit, split the way lookup consults them.
#[derive(Debug, Clone, Default)]
pub struct ImportScope {
    explicit: HashMap<Symbol, Vec<QualifiedName>>,
    star: Vec<QualifiedName>,
}

impl ImportScope {
    pub fn new(imports: &[ImportDirective]) -> Self {
        let mut scope = ImportScope::default();
        for import in imports {
            if import.star {
                if !scope.star.contains(&import.path) {
                    scope.star.push(import.path.clone());
                }
            } else if let Some(name) = import.imported_name() {
                scope.explicit.entry(name).or_default().push(import.path.clone());
            }
        }
        scope
    }

    /// Fully qualified targets imported under `name`.
    pub fn explicit(&self, name: Symbol) -> &[QualifiedName] {
        self.explicit.get(&name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn star_packages(&self) -> &[QualifiedName] {
        &self.star
    }
}

#[derive(Debug, Clone)]
pub struct ScopeChain {
    pub module: ModuleId,
    pub unit: Option<FileId>,
    pub package: QualifiedName,
    pub imports: Arc<ImportScope>,
    levels: im::Vector<Arc<ScopeLevel>>,
}

impl ScopeChain {
    pub fn new(module: ModuleId, unit: Option<FileId>, package: QualifiedName, imports: Arc<ImportScope>) -> Self {
        ScopeChain {
            module,
            unit,
            package,
            imports,
            levels: im::Vector::new(),
        }
    }

    /// File scope of a source unit.
    pub fn for_unit(module: ModuleId, unit: &SourceUnit) -> Self {
        ScopeChain::new(
            module,
            Some(unit.id()),
            unit.package().clone(),
            Arc::new(ImportScope::new(unit.imports())),
        )
    }

    /// Scope of library signatures: their package and nothing imported.
    pub fn for_library(module: ModuleId, package: QualifiedName) -> Self {
        ScopeChain::new(module, None, package, Arc::new(ImportScope::default()))
    }

    pub fn push(&self, level: ScopeLevel) -> ScopeChain {
        let mut chain = self.clone();
        chain.levels.push_back(Arc::new(level));
        chain
    }

    pub fn with_local(&self, name: Symbol, ty: Type, span: Span) -> ScopeChain {
        self.push(ScopeLevel::Local(LocalVariable { name, ty, span }))
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Levels from the innermost outwards.
    pub fn innermost_first(&self) -> impl Iterator<Item = &ScopeLevel> {
        self.levels.iter().rev().map(|level| level.as_ref())
    }

    pub fn local(&self, name: Symbol) -> Option<&LocalVariable> {
        self.innermost_first().find_map(|level| match level {
            ScopeLevel::Local(local) if local.name == name => Some(local),
            _ => None,
        })
    }

    pub fn type_parameter(&self, name: Symbol) -> Option<TypeParamId> {
        self.innermost_first().find_map(|level| match level {
            ScopeLevel::TypeParameters(parameters) => {
                parameters.iter().find(|(n, _)| *n == name).map(|(_, id)| *id)
            }
            _ => None,
        })
    }

    /// Implicit receivers, innermost first, each with the class whose body provides it.
    pub fn implicit_receivers(&self) -> Vec<(Type, Option<ClassId>)> {
        self.innermost_first()
            .filter_map(|level| match level {
                ScopeLevel::Class {
                    class,
                    receiver: Some(receiver),
                } => Some((receiver.clone(), Some(*class))),
                ScopeLevel::Receiver(receiver) => Some((receiver.clone(), None)),
                _ => None,
            })
            .collect()
    }

    /// Classes whose bodies enclose this scope, innermost first.
    pub fn enclosing_classes(&self) -> Vec<ClassId> {
        self.innermost_first()
            .filter_map(|level| match level {
                ScopeLevel::Class { class, .. } => Some(*class),
                _ => None,
            })
            .collect()
    }

    pub fn is_inside(&self, class: ClassId) -> bool {
        self.enclosing_classes().contains(&class)
    }
}
