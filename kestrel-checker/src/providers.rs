//! Symbol providers: where a module's symbols come from.
//!
//! Source modules index their declaration trees eagerly into `Raw` symbols.
//! Library modules ask a [`BinaryMetadata`] collaborator and materialize
//! classifiers and callables the first time they are looked up.

use crate::symbols::*;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use kestrel_syntax::{
    ClassDecl, ClassKind, Declaration, Expr, FileId, FunctionDecl, Modality, Modifiers, ParameterDecl,
    PropertyDecl, QualifiedName, SourceUnit, Span, Symbol, TypeParameterDecl, TypeRef,
};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace};

/// A declaration located by its span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclarationRef {
    Class(ClassId),
    Callable(CallableId),
}

pub trait SymbolProvider: Send + Sync + fmt::Debug {
    fn module(&self) -> ModuleId;

    fn symbols(&self) -> &Arc<ModuleSymbols>;

    /// Top-level or nested classifier by fully qualified name (`pkg.Outer.Inner`).
    fn classifier(&self, name: &QualifiedName) -> Option<ClassId>;

    /// Top-level functions, properties and nothing else.
    fn top_level_callables(&self, package: &QualifiedName, name: Symbol) -> Vec<CallableId>;

    /// Declared supertype references of a classifier of this module.
    fn supertype_refs(&self, class: &ClassifierSymbol) -> Vec<TypeRef>;

    fn declaration_at(&self, _span: Span) -> Option<DeclarationRef> {
        None
    }

    /// Classes declared in the body of `callable`.
    fn local_classes(&self, _callable: CallableId) -> Vec<ClassId> {
        Vec::new()
    }

    fn units(&self) -> Vec<FileId> {
        Vec::new()
    }
}

fn class_flags(modifiers: &Modifiers, kind: ClassKind) -> ClassFlags {
    let mut flags = ClassFlags::empty();
    flags.set(ClassFlags::INNER, modifiers.is_inner);
    flags.set(ClassFlags::DATA, modifiers.is_data);
    flags.set(ClassFlags::FUN, modifiers.is_fun && kind == ClassKind::Interface);
    flags.set(ClassFlags::EXPECT, modifiers.is_expect);
    flags
}

fn callable_flags(modifiers: &Modifiers) -> CallableFlags {
    let mut flags = CallableFlags::empty();
    flags.set(CallableFlags::OVERRIDE, modifiers.is_override);
    flags.set(CallableFlags::SUSPEND, modifiers.is_suspend);
    flags.set(CallableFlags::OPERATOR, modifiers.is_operator);
    flags.set(CallableFlags::INFIX, modifiers.is_infix);
    flags.set(CallableFlags::INLINE, modifiers.is_inline);
    flags.set(CallableFlags::EXPECT, modifiers.is_expect);
    flags
}

fn default_class_modality(kind: ClassKind) -> Modality {
    match kind {
        ClassKind::Interface => Modality::Abstract,
        _ => Modality::Final,
    }
}

fn value_parameters(parameters: &[ParameterDecl]) -> Vec<ValueParameterDecl> {
    parameters
        .iter()
        .map(|p| ValueParameterDecl {
            name: p.name,
            type_ref: p.type_ref.clone(),
            has_default: p.default_value.is_some(),
            is_vararg: p.is_vararg,
            span: p.span,
        })
        .collect()
}

/// Creates symbols in one module's arenas.
struct SymbolFactory<'a> {
    symbols: &'a ModuleSymbols,
}

impl SymbolFactory<'_> {
    fn type_parameters(&self, decls: &[TypeParameterDecl], owner: TypeParamOwner) -> Vec<TypeParamId> {
        decls
            .iter()
            .map(|decl| {
                let id = self.symbols.reserve_type_parameter();
                self.symbols.type_parameters.insert(
                    id.index,
                    TypeParameterSymbol {
                        id,
                        name: decl.name,
                        variance: decl.variance,
                        reified: decl.reified,
                        owner,
                        bound_refs: decl.bounds.clone(),
                        bounds: OnceCell::new(),
                    },
                );
                id
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn callable(
        &self,
        id: CallableId,
        name: Symbol,
        kind: CallableKind,
        containing_class: Option<ClassId>,
        package: &QualifiedName,
        modifiers: &Modifiers,
        type_parameters: &[TypeParameterDecl],
        parameters: Vec<ValueParameterDecl>,
        receiver_ref: Option<TypeRef>,
        return_ref: Option<TypeRef>,
        extra_flags: CallableFlags,
        origin: CallableOrigin,
    ) -> CallableId {
        let type_parameters = self.type_parameters(type_parameters, TypeParamOwner::Callable(id));
        self.symbols.callables.insert(
            id.index,
            CallableSymbol {
                id,
                name,
                kind,
                containing_class,
                package: package.clone(),
                declared_visibility: modifiers.visibility.unwrap_or_default(),
                declared_modality: modifiers.modality,
                flags: callable_flags(modifiers) | extra_flags,
                type_parameters,
                parameters,
                receiver_ref,
                return_ref,
                declared_deprecation: modifiers.deprecated.clone(),
                origin,
                phase: PhaseCell::default(),
                header: OnceCell::new(),
                status: OnceCell::new(),
                signature: OnceCell::new(),
                body: OnceCell::new(),
            },
        );
        id
    }
}

/// Index built while walking the declaration trees of a source module.
#[derive(Debug, Default)]
struct SourceIndex {
    classes: HashMap<QualifiedName, ClassId>,
    top_level: HashMap<(QualifiedName, Symbol), Vec<CallableId>>,
    by_span: HashMap<Span, DeclarationRef>,
    local_classes: HashMap<CallableId, Vec<ClassId>>,
    packages: HashSet<QualifiedName>,
    units: Vec<FileId>,
}

/// Symbols of a source module, created eagerly in declaration order.
#[derive(Debug)]
pub struct SourceSymbolProvider {
    symbols: Arc<ModuleSymbols>,
    index: SourceIndex,
}

impl SourceSymbolProvider {
    pub fn new(module: ModuleId, units: &[Arc<SourceUnit>]) -> Self {
        let symbols = Arc::new(ModuleSymbols::new(module));
        let mut indexer = SourceIndexer {
            factory: SymbolFactory { symbols: &symbols },
            index: SourceIndex::default(),
            unit: FileId::new(0),
            package: QualifiedName::root(),
        };
        for unit in units {
            indexer.index_unit(unit);
        }
        let index = indexer.index;
        debug!(
            "indexed module {}: {} classes, {} callables",
            module,
            symbols.classes.len(),
            symbols.callables.len()
        );
        SourceSymbolProvider { symbols, index }
    }

    pub fn has_package(&self, package: &QualifiedName) -> bool {
        self.index.packages.contains(package)
    }
}

struct SourceIndexer<'a> {
    factory: SymbolFactory<'a>,
    index: SourceIndex,
    unit: FileId,
    package: QualifiedName,
}

impl SourceIndexer<'_> {
    fn index_unit(&mut self, unit: &SourceUnit) {
        self.unit = unit.id();
        self.package = unit.package().clone();
        self.index.units.push(unit.id());
        self.index.packages.insert(self.package.clone());
        for declaration in unit.declarations() {
            match declaration {
                Declaration::Class(class) => {
                    let fq_name = self.package.child(class.name);
                    let id = self.class(class, fq_name.clone(), None, None, ClassFlags::empty());
                    self.index.classes.entry(fq_name).or_insert(id);
                }
                Declaration::Function(function) => {
                    let id = self.function(function, None);
                    self.index
                        .top_level
                        .entry((self.package.clone(), function.name))
                        .or_default()
                        .push(id);
                }
                Declaration::Property(property) => {
                    let id = self.property(property, None);
                    self.index
                        .top_level
                        .entry((self.package.clone(), property.name))
                        .or_default()
                        .push(id);
                }
            }
        }
    }

    fn origin(&self, declaration: SourceCallable) -> CallableOrigin {
        CallableOrigin::Source {
            unit: self.unit,
            declaration,
        }
    }

    fn class(
        &mut self,
        decl: &Arc<ClassDecl>,
        qualified_name: QualifiedName,
        outer: Option<ClassId>,
        enclosing_callable: Option<CallableId>,
        extra_flags: ClassFlags,
    ) -> ClassId {
        let symbols = self.factory.symbols;
        let id = symbols.reserve_class();
        self.index.by_span.insert(decl.span, DeclarationRef::Class(id));
        let type_parameters = self.factory.type_parameters(&decl.type_parameters, TypeParamOwner::Class(id));
        let package = self.package.clone();

        let mut constructors = Vec::new();
        let mut members = Vec::new();
        let constructible = matches!(decl.kind, ClassKind::Class);
        if constructible && (decl.primary_constructor.is_some() || decl.constructors.is_empty()) {
            let parameters = decl.primary_constructor.as_deref().unwrap_or(&[]);
            let ctor = symbols.reserve_callable();
            self.factory.callable(
                ctor,
                decl.name,
                CallableKind::Constructor,
                Some(id),
                &package,
                &Modifiers::default(),
                &[],
                value_parameters(parameters),
                None,
                None,
                CallableFlags::empty(),
                self.origin(SourceCallable::PrimaryConstructor(decl.clone())),
            );
            constructors.push(ctor);
            for (index, parameter) in parameters.iter().enumerate() {
                if !parameter.is_property {
                    continue;
                }
                let property = symbols.reserve_callable();
                self.factory.callable(
                    property,
                    parameter.name,
                    CallableKind::Property,
                    Some(id),
                    &package,
                    &Modifiers::default(),
                    &[],
                    Vec::new(),
                    None,
                    Some(parameter.type_ref.clone()),
                    CallableFlags::HAS_BODY,
                    self.origin(SourceCallable::ParameterProperty {
                        class: decl.clone(),
                        index,
                    }),
                );
                members.push(property);
            }
        }
        if constructible {
            for constructor in &decl.constructors {
                let ctor = symbols.reserve_callable();
                self.factory.callable(
                    ctor,
                    decl.name,
                    CallableKind::Constructor,
                    Some(id),
                    &package,
                    &constructor.modifiers,
                    &[],
                    value_parameters(&constructor.parameters),
                    None,
                    None,
                    CallableFlags::empty(),
                    self.origin(SourceCallable::Constructor(constructor.clone())),
                );
                self.index.by_span.insert(constructor.span, DeclarationRef::Callable(ctor));
                constructors.push(ctor);
            }
        }

        let mut nested = Vec::new();
        for member in &decl.members {
            match member {
                Declaration::Class(class) => {
                    let fq_name = qualified_name.child(class.name);
                    let local = extra_flags & ClassFlags::LOCAL;
                    let nested_id = self.class(class, fq_name.clone(), Some(id), None, local);
                    if local.is_empty() {
                        self.index.classes.entry(fq_name).or_insert(nested_id);
                    }
                    nested.push(nested_id);
                }
                Declaration::Function(function) => members.push(self.function(function, Some(id))),
                Declaration::Property(property) => members.push(self.property(property, Some(id))),
            }
        }

        symbols.classes.insert(
            id.index,
            ClassifierSymbol {
                id,
                name: decl.name,
                package,
                qualified_name,
                kind: decl.kind,
                declared_modality: decl.modifiers.modality.unwrap_or_else(|| default_class_modality(decl.kind)),
                declared_visibility: decl.modifiers.visibility.unwrap_or_default(),
                flags: class_flags(&decl.modifiers, decl.kind) | extra_flags,
                type_parameters,
                outer,
                enclosing_callable,
                members,
                constructors,
                nested,
                declared_deprecation: decl.modifiers.deprecated.clone(),
                origin: ClassOrigin::Source {
                    unit: self.unit,
                    declaration: decl.clone(),
                },
                phase: PhaseCell::default(),
                supertypes: OnceCell::new(),
                status: OnceCell::new(),
                checks: OnceCell::new(),
            },
        );
        trace!("created {} for {}", id, decl.name);
        id
    }

    fn function(&mut self, decl: &Arc<FunctionDecl>, containing_class: Option<ClassId>) -> CallableId {
        let id = self.factory.symbols.reserve_callable();
        self.index.by_span.insert(decl.span, DeclarationRef::Callable(id));
        let mut flags = CallableFlags::empty();
        flags.set(CallableFlags::HAS_BODY, decl.body.is_some());
        let package = self.package.clone();
        self.factory.callable(
            id,
            decl.name,
            CallableKind::Function,
            containing_class,
            &package,
            &decl.modifiers,
            &decl.type_parameters,
            value_parameters(&decl.parameters),
            decl.receiver.clone(),
            decl.return_type.clone(),
            flags,
            self.origin(SourceCallable::Function(decl.clone())),
        );
        if let Some(body) = &decl.body {
            self.local_classes(id, body);
        }
        for default in decl.parameters.iter().filter_map(|p| p.default_value.as_ref()) {
            self.local_classes(id, default);
        }
        id
    }

    fn property(&mut self, decl: &Arc<PropertyDecl>, containing_class: Option<ClassId>) -> CallableId {
        let id = self.factory.symbols.reserve_callable();
        self.index.by_span.insert(decl.span, DeclarationRef::Callable(id));
        let mut flags = CallableFlags::empty();
        flags.set(CallableFlags::VAR, decl.is_var);
        flags.set(CallableFlags::HAS_BODY, decl.initializer.is_some());
        let package = self.package.clone();
        self.factory.callable(
            id,
            decl.name,
            CallableKind::Property,
            containing_class,
            &package,
            &decl.modifiers,
            &decl.type_parameters,
            Vec::new(),
            decl.receiver.clone(),
            decl.type_ref.clone(),
            flags,
            self.origin(SourceCallable::Property(decl.clone())),
        );
        if let Some(initializer) = &decl.initializer {
            self.local_classes(id, initializer);
        }
        id
    }

    fn local_classes(&mut self, callable: CallableId, body: &Expr) {
        for class in body.local_classes() {
            let qualified_name = QualifiedName::single(class.name);
            let id = self.class(class, qualified_name, None, Some(callable), ClassFlags::LOCAL);
            self.index.local_classes.entry(callable).or_default().push(id);
        }
    }
}

impl SymbolProvider for SourceSymbolProvider {
    fn module(&self) -> ModuleId {
        self.symbols.module
    }

    fn symbols(&self) -> &Arc<ModuleSymbols> {
        &self.symbols
    }

    fn classifier(&self, name: &QualifiedName) -> Option<ClassId> {
        self.index.classes.get(name).copied()
    }

    fn top_level_callables(&self, package: &QualifiedName, name: Symbol) -> Vec<CallableId> {
        self.index
            .top_level
            .get(&(package.clone(), name))
            .cloned()
            .unwrap_or_default()
    }

    fn supertype_refs(&self, class: &ClassifierSymbol) -> Vec<TypeRef> {
        class
            .declaration()
            .map(|decl| decl.supertypes.clone())
            .unwrap_or_default()
    }

    fn declaration_at(&self, span: Span) -> Option<DeclarationRef> {
        self.index.by_span.get(&span).copied()
    }

    fn local_classes(&self, callable: CallableId) -> Vec<ClassId> {
        self.index.local_classes.get(&callable).cloned().unwrap_or_default()
    }

    fn units(&self) -> Vec<FileId> {
        self.index.units.clone()
    }
}

/// A type as stored in binary metadata: the textual type-reference form.
pub type SerializedType = TypeRef;

/// Opaque handle a metadata collaborator hands out for a classifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassifierHandle(pub QualifiedName);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedParameter {
    pub name: Symbol,
    #[serde(rename = "type")]
    pub type_ref: SerializedType,
    #[serde(default)]
    pub has_default: bool,
    #[serde(default)]
    pub vararg: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedCallable {
    pub name: Symbol,
    pub kind: CallableKind,
    #[serde(default)]
    pub modifiers: Modifiers,
    #[serde(default)]
    pub type_parameters: Vec<TypeParameterDecl>,
    #[serde(default)]
    pub receiver: Option<SerializedType>,
    #[serde(default)]
    pub parameters: Vec<SerializedParameter>,
    /// Absent for constructors.
    #[serde(default)]
    pub return_type: Option<SerializedType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedClassifier {
    pub name: QualifiedName,
    #[serde(default)]
    pub kind: ClassKind,
    #[serde(default)]
    pub modifiers: Modifiers,
    #[serde(default)]
    pub type_parameters: Vec<TypeParameterDecl>,
    #[serde(default)]
    pub members: Vec<SerializedCallable>,
    #[serde(default)]
    pub constructors: Vec<SerializedCallable>,
}

impl SerializedClassifier {
    pub fn handle(&self) -> ClassifierHandle {
        ClassifierHandle(self.name.clone())
    }
}

/// The binary-deserialization collaborator of library modules.
pub trait BinaryMetadata: Send + Sync {
    fn classifier_by_qualified_name(&self, name: &str) -> Option<SerializedClassifier>;

    fn supertypes_of(&self, handle: &ClassifierHandle) -> Vec<SerializedType>;

    fn top_level_callables(&self, package: &str, name: &str) -> Vec<SerializedCallable>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryClassifier {
    #[serde(flatten)]
    pub classifier: SerializedClassifier,
    #[serde(default)]
    pub supertypes: Vec<SerializedType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryCallable {
    pub package: QualifiedName,
    #[serde(flatten)]
    pub callable: SerializedCallable,
}

/// Serialized description of a library, as shipped next to its binaries.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LibraryDescription {
    #[serde(default)]
    pub classifiers: Vec<LibraryClassifier>,
    #[serde(default)]
    pub callables: Vec<LibraryCallable>,
}

/// [`BinaryMetadata`] over a [`LibraryDescription`] loaded from JSON.
#[derive(Debug, Clone)]
pub struct JsonLibraryMetadata {
    description: LibraryDescription,
    classifiers: HashMap<String, usize>,
}

impl JsonLibraryMetadata {
    pub fn from_description(description: LibraryDescription) -> Self {
        let classifiers = description
            .classifiers
            .iter()
            .enumerate()
            .map(|(index, c)| (c.classifier.name.to_string(), index))
            .collect();
        JsonLibraryMetadata {
            description,
            classifiers,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::from_description(serde_json::from_str(json)?))
    }

    pub fn load(path: &Path) -> Result<Self, kestrel_syntax::SyntaxError> {
        let text = std::fs::read_to_string(path).map_err(|error| kestrel_syntax::SyntaxError::Io {
            path: path.display().to_string(),
            error,
        })?;
        Ok(Self::from_json(&text)?)
    }

    pub fn description(&self) -> &LibraryDescription {
        &self.description
    }
}

impl BinaryMetadata for JsonLibraryMetadata {
    fn classifier_by_qualified_name(&self, name: &str) -> Option<SerializedClassifier> {
        let index = *self.classifiers.get(name)?;
        Some(self.description.classifiers[index].classifier.clone())
    }

    fn supertypes_of(&self, handle: &ClassifierHandle) -> Vec<SerializedType> {
        self.classifiers
            .get(&handle.0.to_string())
            .map(|index| self.description.classifiers[*index].supertypes.clone())
            .unwrap_or_default()
    }

    fn top_level_callables(&self, package: &str, name: &str) -> Vec<SerializedCallable> {
        self.description
            .callables
            .iter()
            .filter(|c| c.callable.name.as_str() == name && c.package.to_string() == package)
            .map(|c| c.callable.clone())
            .collect()
    }
}

/// Symbols of a library module, deserialized on first lookup.
pub struct LibrarySymbolProvider {
    symbols: Arc<ModuleSymbols>,
    metadata: Arc<dyn BinaryMetadata>,
    classes: DashMap<QualifiedName, Option<ClassId>>,
    callables: DashMap<(QualifiedName, Symbol), Vec<CallableId>>,
    handles: DashMap<ClassId, ClassifierHandle>,
}

impl fmt::Debug for LibrarySymbolProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibrarySymbolProvider")
            .field("module", &self.symbols.module)
            .field("materialized", &self.classes.len())
            .finish()
    }
}

impl LibrarySymbolProvider {
    pub fn new(module: ModuleId, metadata: Arc<dyn BinaryMetadata>) -> Self {
        LibrarySymbolProvider {
            symbols: Arc::new(ModuleSymbols::new(module)),
            metadata,
            classes: DashMap::new(),
            callables: DashMap::new(),
            handles: DashMap::new(),
        }
    }

    fn materialize_class(&self, serialized: SerializedClassifier) -> ClassId {
        let factory = SymbolFactory { symbols: &self.symbols };
        let id = self.symbols.reserve_class();
        let type_parameters = factory.type_parameters(&serialized.type_parameters, TypeParamOwner::Class(id));
        let package = serialized.name.parent();
        let members = serialized
            .members
            .iter()
            .map(|member| self.materialize_callable(member, Some(id), &package))
            .collect();
        let constructors = serialized
            .constructors
            .iter()
            .map(|ctor| self.materialize_callable(ctor, Some(id), &package))
            .collect();
        let name = serialized.name.last().unwrap_or_else(|| Symbol::intern("<anonymous>"));
        self.handles.insert(id, serialized.handle());
        self.symbols.classes.insert(
            id.index,
            ClassifierSymbol {
                id,
                name,
                package,
                qualified_name: serialized.name.clone(),
                kind: serialized.kind,
                declared_modality: serialized
                    .modifiers
                    .modality
                    .unwrap_or_else(|| default_class_modality(serialized.kind)),
                declared_visibility: serialized.modifiers.visibility.unwrap_or_default(),
                flags: class_flags(&serialized.modifiers, serialized.kind),
                type_parameters,
                outer: None,
                enclosing_callable: None,
                members,
                constructors,
                nested: Vec::new(),
                declared_deprecation: serialized.modifiers.deprecated.clone(),
                origin: ClassOrigin::Library,
                phase: PhaseCell::default(),
                supertypes: OnceCell::new(),
                status: OnceCell::new(),
                checks: OnceCell::new(),
            },
        );
        debug!("deserialized {} as {}", serialized.name, id);
        id
    }

    fn materialize_callable(
        &self,
        serialized: &SerializedCallable,
        containing_class: Option<ClassId>,
        package: &QualifiedName,
    ) -> CallableId {
        let factory = SymbolFactory { symbols: &self.symbols };
        let id = self.symbols.reserve_callable();
        let parameters = serialized
            .parameters
            .iter()
            .map(|p| ValueParameterDecl {
                name: p.name,
                type_ref: p.type_ref.clone(),
                has_default: p.has_default,
                is_vararg: p.vararg,
                span: Span::DUMMY,
            })
            .collect();
        let mut modifiers = serialized.modifiers.clone();
        if modifiers.modality.is_none() && containing_class.is_some() && serialized.kind != CallableKind::Constructor {
            modifiers.modality = Some(Modality::Final);
        }
        factory.callable(
            id,
            serialized.name,
            serialized.kind,
            containing_class,
            package,
            &modifiers,
            &serialized.type_parameters,
            parameters,
            serialized.receiver.clone(),
            serialized.return_type.clone(),
            CallableFlags::empty(),
            CallableOrigin::Library,
        );
        id
    }
}

impl SymbolProvider for LibrarySymbolProvider {
    fn module(&self) -> ModuleId {
        self.symbols.module
    }

    fn symbols(&self) -> &Arc<ModuleSymbols> {
        &self.symbols
    }

    fn classifier(&self, name: &QualifiedName) -> Option<ClassId> {
        if let Some(known) = self.classes.get(name) {
            return *known;
        }
        match self.classes.entry(name.clone()) {
            Entry::Occupied(entry) => *entry.get(),
            Entry::Vacant(entry) => {
                let created = self
                    .metadata
                    .classifier_by_qualified_name(&name.to_string())
                    .map(|serialized| self.materialize_class(serialized));
                *entry.insert(created)
            }
        }
    }

    fn top_level_callables(&self, package: &QualifiedName, name: Symbol) -> Vec<CallableId> {
        let key = (package.clone(), name);
        if let Some(known) = self.callables.get(&key) {
            return known.clone();
        }
        match self.callables.entry(key) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let created: Vec<CallableId> = self
                    .metadata
                    .top_level_callables(&package.to_string(), name.as_str())
                    .iter()
                    .map(|serialized| self.materialize_callable(serialized, None, package))
                    .collect();
                entry.insert(created).clone()
            }
        }
    }

    fn supertype_refs(&self, class: &ClassifierSymbol) -> Vec<TypeRef> {
        match self.handles.get(&class.id) {
            Some(handle) => self.metadata.supertypes_of(handle.value()),
            None => Vec::new(),
        }
    }
}

pub(crate) fn is_object_like(kind: ClassKind) -> bool {
    matches!(kind, ClassKind::Object | ClassKind::Enum)
}
