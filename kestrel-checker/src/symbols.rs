//! Symbols and the per-module arenas that own them.
//!
//! Symbols are created `Raw` by a [`crate::providers::SymbolProvider`] and are
//! filled in lazily: each phase publishes its result into a write-once cell on
//! the symbol and then raises the symbol's [`Phase`]. Everything refers to
//! other symbols by arena id.

use crate::body::BodyResolution;
use crate::diagnostics::Diagnostic;
use crate::types::Type;
use bitflags::bitflags;
use dashmap::DashMap;
use kestrel_syntax::{
    ClassDecl, ClassKind, ConstructorDecl, Deprecated, Expr, FileId, FunctionDecl, Modality, PropertyDecl,
    QualifiedName, Span, Symbol, TypeRef, Variance, Visibility,
};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(pub u32);

impl ModuleId {
    /// The builtin library module, visible from every module.
    pub const BUILTINS: ModuleId = ModuleId(0);
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name {
            pub module: ModuleId,
            pub index: u32,
        }

        impl $name {
            pub const fn new(module: ModuleId, index: u32) -> Self {
                $name { module, index }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}:{}", $prefix, self.module.0, self.index)
            }
        }
    };
}

arena_id!(
    /// Handle of a classifier in its module's arena.
    ClassId,
    "class"
);
arena_id!(
    /// Handle of a function, property or constructor.
    CallableId,
    "callable"
);
arena_id!(
    /// Handle of a declared type parameter.
    TypeParamId,
    "tparam"
);

/// Resolution phase of a symbol. Only ever increases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Phase {
    Raw = 0,
    SupertypesResolved = 1,
    StatusResolved = 2,
    TypesResolved = 3,
    BodyResolved = 4,
}

impl Phase {
    fn from_u8(value: u8) -> Phase {
        match value {
            0 => Phase::Raw,
            1 => Phase::SupertypesResolved,
            2 => Phase::StatusResolved,
            3 => Phase::TypesResolved,
            _ => Phase::BodyResolved,
        }
    }

    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Raw => Some(Phase::SupertypesResolved),
            Phase::SupertypesResolved => Some(Phase::StatusResolved),
            Phase::StatusResolved => Some(Phase::TypesResolved),
            Phase::TypesResolved => Some(Phase::BodyResolved),
            Phase::BodyResolved => None,
        }
    }
}

/// Atomic phase marker.
#[derive(Debug, Default)]
pub struct PhaseCell(AtomicU8);

impl PhaseCell {
    pub fn get(&self) -> Phase {
        Phase::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Raise the phase to at least `phase`; never lowers it.
    pub fn advance_to(&self, phase: Phase) {
        self.0.fetch_max(phase as u8, Ordering::AcqRel);
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClassFlags: u8 {
        const INNER = 0x01;
        const DATA = 0x02;
        const LOCAL = 0x04;
        const ANONYMOUS = 0x08;
        const FUN = 0x10;
        const EXPECT = 0x20;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CallableFlags: u16 {
        const OVERRIDE = 0x001;
        const SUSPEND = 0x002;
        const OPERATOR = 0x004;
        const INFIX = 0x008;
        const INLINE = 0x010;
        const VAR = 0x020;
        const HAS_BODY = 0x040;
        const EXPECT = 0x080;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeParamOwner {
    Class(ClassId),
    Callable(CallableId),
}

#[derive(Debug)]
pub struct TypeParameterSymbol {
    pub id: TypeParamId,
    pub name: Symbol,
    pub variance: Variance,
    pub reified: bool,
    pub owner: TypeParamOwner,
    pub bound_refs: Vec<TypeRef>,
    pub(crate) bounds: OnceCell<ResolvedBounds>,
}

/// Explicit upper bounds after name resolution; empty means `Any?`.
#[derive(Debug, Clone, Default)]
pub struct ResolvedBounds {
    pub types: Vec<Type>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone)]
pub enum ClassOrigin {
    Source { unit: FileId, declaration: Arc<ClassDecl> },
    Library,
}

#[derive(Debug)]
pub struct ClassifierSymbol {
    pub id: ClassId,
    pub name: Symbol,
    pub package: QualifiedName,
    pub qualified_name: QualifiedName,
    pub kind: ClassKind,
    pub declared_modality: Modality,
    pub declared_visibility: Visibility,
    pub flags: ClassFlags,
    /// Own type parameters; see [`crate::symbol_table::SymbolTable::class_type_parameters`] for the full list.
    pub type_parameters: Vec<TypeParamId>,
    pub outer: Option<ClassId>,
    /// Function or property whose body declares this local class.
    pub enclosing_callable: Option<CallableId>,
    pub members: Vec<CallableId>,
    pub constructors: Vec<CallableId>,
    pub nested: Vec<ClassId>,
    pub declared_deprecation: Option<Deprecated>,
    pub origin: ClassOrigin,
    pub(crate) phase: PhaseCell,
    pub(crate) supertypes: OnceCell<ResolvedSupertypes>,
    pub(crate) status: OnceCell<ClassStatus>,
    /// Declaration checks, published at `BodyResolved`.
    pub(crate) checks: OnceCell<Vec<Diagnostic>>,
}

#[derive(Debug, Clone, Default)]
pub struct ResolvedSupertypes {
    pub types: Vec<Type>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone)]
pub struct ClassStatus {
    pub visibility: Visibility,
    pub modality: Modality,
}

impl ClassifierSymbol {
    pub fn phase(&self) -> Phase {
        self.phase.get()
    }

    pub fn is_interface(&self) -> bool {
        self.kind == ClassKind::Interface
    }

    pub fn is_inner(&self) -> bool {
        self.flags.contains(ClassFlags::INNER)
    }

    pub fn is_local(&self) -> bool {
        self.flags.intersects(ClassFlags::LOCAL | ClassFlags::ANONYMOUS)
    }

    pub fn source_unit(&self) -> Option<FileId> {
        match &self.origin {
            ClassOrigin::Source { unit, .. } => Some(*unit),
            ClassOrigin::Library => None,
        }
    }

    pub fn declaration(&self) -> Option<&Arc<ClassDecl>> {
        match &self.origin {
            ClassOrigin::Source { declaration, .. } => Some(declaration),
            ClassOrigin::Library => None,
        }
    }

    /// Published supertypes, available from `SupertypesResolved` on.
    pub fn resolved_supertypes(&self) -> Option<&ResolvedSupertypes> {
        self.supertypes.get()
    }

    pub fn resolved_status(&self) -> Option<&ClassStatus> {
        self.status.get()
    }

    pub fn check_diagnostics(&self) -> &[Diagnostic] {
        self.checks.get().map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallableKind {
    Function,
    Property,
    Constructor,
}

#[derive(Debug, Clone)]
pub struct ValueParameterDecl {
    pub name: Symbol,
    pub type_ref: TypeRef,
    pub has_default: bool,
    pub is_vararg: bool,
    pub span: Span,
}

/// The syntax a source callable was created from.
#[derive(Debug, Clone)]
pub enum SourceCallable {
    Function(Arc<FunctionDecl>),
    Property(Arc<PropertyDecl>),
    /// Declared or implicit primary constructor of the class.
    PrimaryConstructor(Arc<ClassDecl>),
    Constructor(Arc<ConstructorDecl>),
    /// A `val` parameter of a primary constructor.
    ParameterProperty { class: Arc<ClassDecl>, index: usize },
}

impl SourceCallable {
    pub fn span(&self) -> Span {
        match self {
            SourceCallable::Function(f) => f.span,
            SourceCallable::Property(p) => p.span,
            SourceCallable::PrimaryConstructor(c) => c.span,
            SourceCallable::Constructor(c) => c.span,
            SourceCallable::ParameterProperty { class, index } => class
                .primary_constructor
                .as_ref()
                .and_then(|params| params.get(*index))
                .map(|p| p.span)
                .unwrap_or(class.span),
        }
    }

    pub fn name_span(&self) -> Span {
        match self {
            SourceCallable::Function(f) => f.name_span,
            SourceCallable::Property(p) => p.name_span,
            SourceCallable::PrimaryConstructor(c) => c.name_span,
            other => other.span(),
        }
    }

    /// Function body or property initializer.
    pub fn body(&self) -> Option<&Expr> {
        match self {
            SourceCallable::Function(f) => f.body.as_ref(),
            SourceCallable::Property(p) => p.initializer.as_ref(),
            _ => None,
        }
    }

    /// Default-value expressions of the value parameters.
    pub fn default_values(&self) -> Vec<&Expr> {
        let parameters = match self {
            SourceCallable::Function(f) => &f.parameters[..],
            SourceCallable::PrimaryConstructor(c) => c.primary_constructor.as_deref().unwrap_or(&[]),
            SourceCallable::Constructor(c) => &c.parameters[..],
            _ => &[],
        };
        parameters.iter().filter_map(|p| p.default_value.as_ref()).collect()
    }
}

#[derive(Debug, Clone)]
pub enum CallableOrigin {
    Source { unit: FileId, declaration: SourceCallable },
    Library,
}

#[derive(Debug)]
pub struct CallableSymbol {
    pub id: CallableId,
    pub name: Symbol,
    pub kind: CallableKind,
    pub containing_class: Option<ClassId>,
    pub package: QualifiedName,
    pub declared_visibility: Visibility,
    pub declared_modality: Option<Modality>,
    pub flags: CallableFlags,
    pub type_parameters: Vec<TypeParamId>,
    pub parameters: Vec<ValueParameterDecl>,
    pub receiver_ref: Option<TypeRef>,
    pub return_ref: Option<TypeRef>,
    pub declared_deprecation: Option<Deprecated>,
    pub origin: CallableOrigin,
    pub(crate) phase: PhaseCell,
    pub(crate) header: OnceCell<CallableHeader>,
    pub(crate) status: OnceCell<CallableStatus>,
    pub(crate) signature: OnceCell<ResolvedSignature>,
    pub(crate) body: OnceCell<Arc<BodyResolution>>,
}

/// Receiver and value-parameter types; resolved by name lookup only.
#[derive(Debug, Clone)]
pub struct CallableHeader {
    pub receiver: Option<Type>,
    pub parameters: Vec<Type>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone)]
pub struct CallableStatus {
    pub visibility: Visibility,
    pub modality: Modality,
}

/// Return type, published at `TypesResolved`.
#[derive(Debug, Clone)]
pub struct ResolvedSignature {
    pub return_type: Type,
    pub diagnostics: Vec<Diagnostic>,
}

impl CallableSymbol {
    pub fn phase(&self) -> Phase {
        self.phase.get()
    }

    pub fn is_extension(&self) -> bool {
        self.receiver_ref.is_some()
    }

    pub fn is_top_level(&self) -> bool {
        self.containing_class.is_none()
    }

    pub fn is_generic(&self) -> bool {
        !self.type_parameters.is_empty()
    }

    pub fn has_vararg(&self) -> bool {
        self.parameters.iter().any(|p| p.is_vararg)
    }

    pub fn source_unit(&self) -> Option<FileId> {
        match &self.origin {
            CallableOrigin::Source { unit, .. } => Some(*unit),
            CallableOrigin::Library => None,
        }
    }

    pub fn source(&self) -> Option<&SourceCallable> {
        match &self.origin {
            CallableOrigin::Source { declaration, .. } => Some(declaration),
            CallableOrigin::Library => None,
        }
    }

    pub fn resolved_header(&self) -> Option<&CallableHeader> {
        self.header.get()
    }

    pub fn resolved_signature(&self) -> Option<&ResolvedSignature> {
        self.signature.get()
    }

    pub fn resolved_body(&self) -> Option<&Arc<BodyResolution>> {
        self.body.get()
    }
}

/// Append-only arena addressed by index.
///
/// Indices are reserved before the entry is inserted so that an entry can
/// refer to children that refer back to it.
#[derive(Debug)]
pub struct Arena<T> {
    entries: DashMap<u32, Arc<T>>,
    next: AtomicU32,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Arena {
            entries: DashMap::new(),
            next: AtomicU32::new(0),
        }
    }
}

impl<T> Arena<T> {
    pub fn reserve(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    pub fn insert(&self, index: u32, value: T) -> Arc<T> {
        let value = Arc::new(value);
        self.entries.insert(index, value.clone());
        value
    }

    pub fn get(&self, index: u32) -> Option<Arc<T>> {
        self.entries.get(&index).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserted indices in ascending order.
    pub fn indices(&self) -> Vec<u32> {
        let mut indices: Vec<u32> = self.entries.iter().map(|entry| *entry.key()).collect();
        indices.sort_unstable();
        indices
    }
}

/// All symbols declared by one module.
#[derive(Debug)]
pub struct ModuleSymbols {
    pub module: ModuleId,
    pub classes: Arena<ClassifierSymbol>,
    pub callables: Arena<CallableSymbol>,
    pub type_parameters: Arena<TypeParameterSymbol>,
}

impl ModuleSymbols {
    pub fn new(module: ModuleId) -> Self {
        ModuleSymbols {
            module,
            classes: Arena::default(),
            callables: Arena::default(),
            type_parameters: Arena::default(),
        }
    }

    pub fn class(&self, id: ClassId) -> Option<Arc<ClassifierSymbol>> {
        if id.module != self.module {
            return None;
        }
        self.classes.get(id.index)
    }

    pub fn callable(&self, id: CallableId) -> Option<Arc<CallableSymbol>> {
        if id.module != self.module {
            return None;
        }
        self.callables.get(id.index)
    }

    pub fn type_parameter(&self, id: TypeParamId) -> Option<Arc<TypeParameterSymbol>> {
        if id.module != self.module {
            return None;
        }
        self.type_parameters.get(id.index)
    }

    pub fn reserve_class(&self) -> ClassId {
        ClassId::new(self.module, self.classes.reserve())
    }

    pub fn reserve_callable(&self) -> CallableId {
        CallableId::new(self.module, self.callables.reserve())
    }

    pub fn reserve_type_parameter(&self) -> TypeParamId {
        TypeParamId::new(self.module, self.type_parameters.reserve())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_cell_is_monotonic() {
        let cell = PhaseCell::default();
        assert_eq!(cell.get(), Phase::Raw);
        cell.advance_to(Phase::StatusResolved);
        assert_eq!(cell.get(), Phase::StatusResolved);
        cell.advance_to(Phase::SupertypesResolved);
        assert_eq!(cell.get(), Phase::StatusResolved);
        cell.advance_to(Phase::BodyResolved);
        assert_eq!(cell.get(), Phase::BodyResolved);
        assert_eq!(Phase::BodyResolved.next(), None);
    }

    #[test]
    fn test_arena_reserve_then_insert() {
        let arena: Arena<String> = Arena::default();
        let first = arena.reserve();
        let second = arena.reserve();
        assert!(arena.get(first).is_none());
        arena.insert(second, "b".to_string());
        arena.insert(first, "a".to_string());
        assert_eq!(arena.indices(), vec![first, second]);
        assert_eq!(arena.get(first).as_deref().map(String::as_str), Some("a"));
    }

    #[test]
    fn test_ids_are_module_scoped() {
        let symbols = ModuleSymbols::new(ModuleId(3));
        let id = symbols.reserve_class();
        assert_eq!(id.module, ModuleId(3));
        assert!(symbols.class(ClassId::new(ModuleId(4), id.index)).is_none());
        assert_eq!(id.to_string(), "class3:0");
    }
}
