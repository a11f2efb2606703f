//! Analysis sessions.
//!
//! A session pins one symbol-table generation for a use-site module. Every
//! read goes through [`AnalysisSession::check`]: the validity token must still
//! match the trackers of the module's visible set, and the session must be
//! entered on the calling thread.

use crate::body::ResolvedReference;
use crate::checker::{UnitAnalysis, UnitChecker};
use crate::diagnostics::{render, RenderedDiagnostic};
use crate::error::{ConfigurationError, ResolutionError, ResolutionResult};
use crate::lifetime::{AccessPolicy, SessionAccessError, SessionId, SessionRegistry, ValidityToken};
use crate::project::Project;
use crate::providers::DeclarationRef;
use crate::symbol_table::SymbolTable;
use crate::symbols::{CallableId, CallableSymbol, ClassId, ClassifierSymbol, ModuleId};
use crate::types::{ErrorKind, Type};
use kestrel_syntax::{ExprId, FileId, QualifiedName};
use std::sync::Arc;
use tracing::{debug, trace};

pub struct AnalysisSession {
    id: SessionId,
    module: ModuleId,
    table: Arc<SymbolTable>,
    token: ValidityToken,
    registry: Arc<SessionRegistry>,
    policy: AccessPolicy,
}

impl std::fmt::Debug for AnalysisSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisSession")
            .field("id", &self.id)
            .field("module", &self.module)
            .field("generation", &self.table.generation())
            .finish_non_exhaustive()
    }
}

impl Project {
    /// Open a session for `module` over the current table generation.
    pub fn session(&self, module: ModuleId) -> Result<AnalysisSession, ConfigurationError> {
        if self.module_name(module).is_none() {
            return Err(ConfigurationError::UnknownModule(module));
        }
        let table = self.table()?;
        let id = self.registry().allocate_id();
        let token = ValidityToken::new(id, self.tracker_for(module));
        debug!("created {} for {} at generation {}", id, module, table.generation());
        Ok(AnalysisSession {
            id,
            module,
            policy: table.config().access_policy,
            table,
            token,
            registry: self.registry().clone(),
        })
    }
}

/// Keeps a session on the calling thread's stack until dropped.
#[must_use]
pub struct SessionGuard<'s> {
    session: &'s AnalysisSession,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.session.registry.pop(self.session.id);
        trace!("left {}", self.session.id);
    }
}

impl AnalysisSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn module(&self) -> ModuleId {
        self.module
    }

    /// Enter the session on the calling thread. Sessions nest.
    pub fn enter(&self) -> SessionGuard<'_> {
        self.registry.push(self.id);
        trace!("entered {}", self.id);
        SessionGuard { session: self }
    }

    pub fn is_valid(&self) -> bool {
        self.token.is_valid()
    }

    pub fn invalidate(&self) {
        debug!("{} invalidated explicitly", self.id);
        self.token.invalidate();
    }

    /// Validity first, then accessibility from the calling thread.
    pub fn check(&self) -> Result<(), SessionAccessError> {
        self.token.check()?;
        self.registry.check_accessible(self.id, self.policy)
    }

    /// The table behind this session, after an access check.
    pub fn table(&self) -> Result<&SymbolTable, SessionAccessError> {
        self.check()?;
        Ok(&self.table)
    }

    /// A classifier visible from the session's module, by qualified name.
    pub fn class(&self, name: &str) -> ResolutionResult<Option<ClassHandle<'_>>> {
        self.check()?;
        if let Some(failure) = self.table.module_failure(self.module) {
            return Err(failure.clone().into());
        }
        let qualified = QualifiedName::parse(name);
        let found = self
            .table
            .visible_modules(self.module)
            .iter()
            .filter_map(|module| self.table.provider_of(*module))
            .find_map(|provider| provider.classifier(&qualified));
        Ok(found.map(|id| ClassHandle { session: self, id }))
    }

    pub fn class_by_id(&self, id: ClassId) -> ClassHandle<'_> {
        ClassHandle { session: self, id }
    }

    pub fn callable_by_id(&self, id: CallableId) -> CallableHandle<'_> {
        CallableHandle { session: self, id }
    }

    pub fn check_unit(&self, unit: FileId) -> ResolutionResult<UnitAnalysis> {
        self.check()?;
        UnitChecker::new(&self.table, &self.token).check_unit(unit)
    }

    /// Diagnostics of a unit projected to text.
    pub fn rendered_diagnostics(&self, unit: FileId) -> ResolutionResult<Vec<RenderedDiagnostic>> {
        let analysis = self.check_unit(unit)?;
        Ok(analysis
            .diagnostics()
            .map(|diagnostic| render(diagnostic, self.table.as_ref()))
            .collect())
    }

    /// The type recorded for an expression by its owner's body resolution.
    pub fn resolved_type_of(&self, unit: FileId, expr: ExprId) -> ResolutionResult<Option<Type>> {
        self.with_owner_body(unit, expr, |body| body.type_of(expr).cloned())
    }

    /// What a name or call expression refers to.
    pub fn resolved_symbol_of(&self, unit: FileId, expr: ExprId) -> ResolutionResult<Option<ResolvedReference>> {
        self.with_owner_body(unit, expr, |body| body.reference_of(expr))
    }

    fn with_owner_body<T>(
        &self,
        unit: FileId,
        expr: ExprId,
        mut read: impl FnMut(&crate::body::BodyResolution) -> Option<T>,
    ) -> ResolutionResult<Option<T>> {
        self.check()?;
        let source = self.table.unit(unit).ok_or(ConfigurationError::UnknownUnit(unit))?;
        let module = self
            .table
            .module_of_unit(unit)
            .ok_or(ConfigurationError::UnknownUnit(unit))?;
        let provider = self
            .table
            .provider_of(module)
            .ok_or(ConfigurationError::UnknownModule(module))?;
        let Some(owner) = source.owner_of(expr) else {
            return Ok(None);
        };
        let candidates: Vec<Arc<CallableSymbol>> = match provider.declaration_at(owner) {
            Some(DeclarationRef::Callable(id)) => self.table.callable(id).into_iter().collect(),
            // Primary constructors share their class's span.
            Some(DeclarationRef::Class(id)) => self
                .table
                .class(id)
                .map(|class| class.constructors.iter().filter_map(|c| self.table.callable(*c)).collect())
                .unwrap_or_default(),
            None => Vec::new(),
        };
        for callable in candidates {
            self.token.check()?;
            match self.table.callable_body(&callable) {
                Ok(Some(body)) => {
                    if let Some(found) = read(&body) {
                        return Ok(Some(found));
                    }
                }
                Ok(None) => {}
                Err(error) => trace!("{} has no body result: {}", callable.name, error),
            }
        }
        Ok(None)
    }
}

/// A classifier read through a session.
#[derive(Clone, Copy)]
pub struct ClassHandle<'s> {
    session: &'s AnalysisSession,
    id: ClassId,
}

impl<'s> ClassHandle<'s> {
    pub fn id(&self) -> ClassId {
        self.id
    }

    pub fn symbol(&self) -> Result<Arc<ClassifierSymbol>, ResolutionError> {
        self.session.check()?;
        self.session
            .table
            .class(self.id)
            .ok_or_else(|| ConfigurationError::UnknownModule(self.id.module).into())
    }

    pub fn name(&self) -> Result<String, ResolutionError> {
        Ok(self.symbol()?.qualified_name.to_string())
    }

    pub fn default_type(&self) -> Result<Type, ResolutionError> {
        let symbol = self.symbol()?;
        Ok(self.session.table.default_type(&symbol))
    }

    /// Every supertype, breadth-first. The session token interrupts the walk.
    pub fn all_supertypes(&self, approximate: bool) -> Result<Vec<Type>, ResolutionError> {
        let ty = self.default_type()?;
        Ok(self.session.table.all_supertypes(&ty, approximate, &self.session.token)?)
    }

    pub fn render(&self, ty: &Type) -> Result<String, SessionAccessError> {
        Ok(self.session.table()?.render(ty))
    }
}

/// A callable read through a session.
#[derive(Clone, Copy)]
pub struct CallableHandle<'s> {
    session: &'s AnalysisSession,
    id: CallableId,
}

impl<'s> CallableHandle<'s> {
    pub fn id(&self) -> CallableId {
        self.id
    }

    pub fn symbol(&self) -> Result<Arc<CallableSymbol>, ResolutionError> {
        self.session.check()?;
        self.session
            .table
            .callable(self.id)
            .ok_or_else(|| ConfigurationError::UnknownModule(self.id.module).into())
    }

    /// Declared or inferred; an error type when inference recursed.
    pub fn return_type(&self) -> Result<Type, ResolutionError> {
        let symbol = self.symbol()?;
        let table = &self.session.table;
        Ok(table
            .callable_return_type(&symbol)
            .unwrap_or(Type::Error(ErrorKind::Recursive)))
    }
}
