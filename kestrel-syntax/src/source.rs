//! Source units: a normalized declaration tree plus lookup indices.

use crate::error::{Result, SyntaxError};
use crate::span::{FileId, Span};
use crate::symbol::QualifiedName;
use crate::tree::*;
use crate::type_ref::TypeRef;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// An immutable, normalized source unit.
///
/// Normalization stamps every span with the unit's [`FileId`], replaces missing
/// spans with synthetic nested ranges and numbers expressions in pre-order.
#[derive(Debug, Clone)]
pub struct SourceUnit {
    id: FileId,
    tree: SourceTree,
    fingerprint: [u8; 32],
    expression_owners: HashMap<ExprId, Span>,
    expression_count: u32,
}

impl SourceUnit {
    pub fn new(id: FileId, tree: SourceTree) -> Self {
        let fingerprint = fingerprint_of(&tree);
        let mut normalizer = Normalizer::new(id, &tree);
        let mut tree = tree;
        normalizer.normalize(&mut tree);
        debug!(
            "normalized source unit {} ({} expressions)",
            tree.path, normalizer.next_expr
        );
        SourceUnit {
            id,
            tree,
            fingerprint,
            expression_owners: normalizer.owners,
            expression_count: normalizer.next_expr,
        }
    }

    pub fn from_json(id: FileId, json: &str) -> Result<Self> {
        let tree: SourceTree = serde_json::from_str(json)?;
        Ok(SourceUnit::new(id, tree))
    }

    pub fn load(id: FileId, path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|error| SyntaxError::Io {
            path: path.display().to_string(),
            error,
        })?;
        let mut tree: SourceTree = serde_json::from_str(&text)?;
        if tree.path.is_empty() {
            tree.path = path.display().to_string();
        }
        Ok(SourceUnit::new(id, tree))
    }

    pub fn id(&self) -> FileId {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.tree.path
    }

    pub fn package(&self) -> &QualifiedName {
        &self.tree.package
    }

    pub fn imports(&self) -> &[ImportDirective] {
        &self.tree.imports
    }

    pub fn declarations(&self) -> &[Declaration] {
        &self.tree.declarations
    }

    pub fn tree(&self) -> &SourceTree {
        &self.tree
    }

    pub fn expression_count(&self) -> u32 {
        self.expression_count
    }

    /// SHA-256 of the tree as it was submitted, before normalization.
    pub fn fingerprint(&self) -> &[u8; 32] {
        &self.fingerprint
    }

    pub fn fingerprint_hex(&self) -> String {
        hex::encode(self.fingerprint)
    }

    /// Whether `tree` would produce the same unit as this one.
    pub fn same_content(&self, tree: &SourceTree) -> bool {
        fingerprint_of(tree) == self.fingerprint
    }

    /// The innermost declaration whose span contains `range`.
    ///
    /// Local classes declared in function bodies are found as well.
    pub fn declaration_at(&self, range: Span) -> Option<Declaration> {
        if range.file != self.id {
            return None;
        }
        innermost(&self.tree.declarations, &range)
    }

    /// Span of the declaration owning an expression.
    pub fn owner_of(&self, expr: ExprId) -> Option<Span> {
        self.expression_owners.get(&expr).copied()
    }
}

fn innermost(declarations: &[Declaration], range: &Span) -> Option<Declaration> {
    for declaration in declarations {
        if !declaration.span().contains(range) {
            continue;
        }
        let nested = match declaration {
            Declaration::Class(class) => innermost(&class.members, range),
            Declaration::Function(function) => function
                .body
                .as_ref()
                .and_then(|body| innermost_local(body, range)),
            Declaration::Property(property) => property
                .initializer
                .as_ref()
                .and_then(|init| innermost_local(init, range)),
        };
        return nested.or_else(|| Some(declaration.clone()));
    }
    None
}

fn innermost_local(body: &Expr, range: &Span) -> Option<Declaration> {
    let locals: Vec<Declaration> = body
        .local_classes()
        .into_iter()
        .map(|class| Declaration::Class(class.clone()))
        .collect();
    innermost(&locals, range)
}

fn fingerprint_of(tree: &SourceTree) -> [u8; 32] {
    let mut hasher = Sha256::new();
    match serde_json::to_vec(tree) {
        Ok(bytes) => hasher.update(&bytes),
        // Trees always serialize; hash the debug form if that ever changes.
        Err(_) => hasher.update(format!("{:?}", tree).as_bytes()),
    }
    hasher.finalize().into()
}

struct Normalizer {
    file: FileId,
    next_offset: u32,
    next_expr: u32,
    owners: HashMap<ExprId, Span>,
    pending: Vec<Vec<ExprId>>,
}

impl Normalizer {
    fn new(file: FileId, tree: &SourceTree) -> Self {
        // Synthetic offsets start past every explicit span so they never collide.
        let max_end = serde_json::to_value(tree)
            .ok()
            .map(|value| max_offset(&value))
            .unwrap_or(0);
        Normalizer {
            file,
            next_offset: max_end + 1,
            next_expr: 0,
            owners: HashMap::new(),
            pending: Vec::new(),
        }
    }

    fn tick(&mut self) -> u32 {
        let offset = self.next_offset;
        self.next_offset += 1;
        offset
    }

    fn leaf(&mut self, span: &mut Span) {
        if span.is_dummy() {
            let start = self.tick();
            *span = Span::from_offsets(self.file, start, start + 1);
        } else {
            *span = span.with_file(self.file);
        }
    }

    fn close(&mut self, span: &mut Span, start: u32) {
        if span.is_dummy() {
            let end = self.tick();
            *span = Span::from_offsets(self.file, start, end + 1);
        } else {
            *span = span.with_file(self.file);
        }
    }

    fn type_ref(&mut self, type_ref: &mut TypeRef) {
        let mut span = type_ref.span;
        self.leaf(&mut span);
        type_ref.span = Span::DUMMY;
        type_ref.fill_spans(span);
    }

    fn normalize(&mut self, tree: &mut SourceTree) {
        for import in &mut tree.imports {
            self.leaf(&mut import.span);
        }
        for declaration in &mut tree.declarations {
            self.declaration(declaration);
        }
    }

    fn declaration(&mut self, declaration: &mut Declaration) {
        match declaration {
            Declaration::Class(class) => self.class(Arc::make_mut(class)),
            Declaration::Function(function) => self.function(Arc::make_mut(function)),
            Declaration::Property(property) => self.property(Arc::make_mut(property)),
        }
    }

    fn begin_owner(&mut self) -> u32 {
        self.pending.push(Vec::new());
        self.tick()
    }

    fn end_owner(&mut self, span: &mut Span, start: u32) {
        self.close(span, start);
        let owned = self.pending.pop().unwrap_or_default();
        for expr in owned {
            self.owners.insert(expr, *span);
        }
    }

    fn class(&mut self, class: &mut ClassDecl) {
        let start = self.begin_owner();
        self.leaf(&mut class.name_span);
        self.type_parameters(&mut class.type_parameters);
        for supertype in &mut class.supertypes {
            self.type_ref(supertype);
        }
        if let Some(parameters) = &mut class.primary_constructor {
            self.parameters(parameters);
        }
        for member in &mut class.members {
            self.declaration(member);
        }
        for constructor in &mut class.constructors {
            let constructor = Arc::make_mut(constructor);
            let ctor_start = self.begin_owner();
            self.parameters(&mut constructor.parameters);
            self.end_owner(&mut constructor.span, ctor_start);
        }
        self.end_owner(&mut class.span, start);
    }

    fn function(&mut self, function: &mut FunctionDecl) {
        let start = self.begin_owner();
        self.leaf(&mut function.name_span);
        self.type_parameters(&mut function.type_parameters);
        if let Some(receiver) = &mut function.receiver {
            self.type_ref(receiver);
        }
        self.parameters(&mut function.parameters);
        if let Some(return_type) = &mut function.return_type {
            self.type_ref(return_type);
        }
        if let Some(body) = &mut function.body {
            self.expr(body);
        }
        self.end_owner(&mut function.span, start);
    }

    fn property(&mut self, property: &mut PropertyDecl) {
        let start = self.begin_owner();
        self.leaf(&mut property.name_span);
        self.type_parameters(&mut property.type_parameters);
        if let Some(receiver) = &mut property.receiver {
            self.type_ref(receiver);
        }
        if let Some(type_ref) = &mut property.type_ref {
            self.type_ref(type_ref);
        }
        if let Some(initializer) = &mut property.initializer {
            self.expr(initializer);
        }
        self.end_owner(&mut property.span, start);
    }

    fn type_parameters(&mut self, parameters: &mut [TypeParameterDecl]) {
        for parameter in parameters {
            self.leaf(&mut parameter.span);
            for bound in &mut parameter.bounds {
                self.type_ref(bound);
            }
        }
    }

    fn parameters(&mut self, parameters: &mut [ParameterDecl]) {
        for parameter in parameters {
            let start = self.tick();
            self.type_ref(&mut parameter.type_ref);
            if let Some(default) = &mut parameter.default_value {
                self.expr(default);
            }
            self.close(&mut parameter.span, start);
        }
    }

    fn expr(&mut self, expr: &mut Expr) {
        expr.id = ExprId(self.next_expr);
        self.next_expr += 1;
        if let Some(owned) = self.pending.last_mut() {
            owned.push(expr.id);
        }
        let start = self.tick();
        match &mut expr.kind {
            ExprKind::Literal { .. } | ExprKind::Name { .. } | ExprKind::This => {}
            ExprKind::Call(call) => {
                if let Some(receiver) = &mut call.receiver {
                    self.expr(receiver);
                }
                self.leaf(&mut call.callee_span);
                for type_argument in &mut call.type_arguments {
                    self.type_ref(type_argument);
                }
                for argument in &mut call.arguments {
                    self.expr(argument);
                }
                if let Some(lambda) = &mut call.trailing_lambda {
                    self.expr(lambda);
                }
            }
            ExprKind::Member {
                receiver, name_span, ..
            } => {
                self.expr(receiver);
                self.leaf(name_span);
            }
            ExprKind::Lambda(lambda) => {
                for parameter in lambda.parameters.iter_mut().flatten() {
                    if let Some(type_ref) = &mut parameter.type_ref {
                        self.type_ref(type_ref);
                    }
                }
                self.expr(&mut lambda.body);
            }
            ExprKind::Block { statements } => {
                for statement in statements {
                    match statement {
                        Statement::Local(local) => {
                            let local_start = self.tick();
                            if let Some(type_ref) = &mut local.type_ref {
                                self.type_ref(type_ref);
                            }
                            self.expr(&mut local.initializer);
                            self.close(&mut local.span, local_start);
                        }
                        Statement::Class(class) => self.class(Arc::make_mut(class)),
                        Statement::Expression(expr) => self.expr(expr),
                    }
                }
            }
            ExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.expr(condition);
                self.expr(then_branch);
                if let Some(else_branch) = else_branch {
                    self.expr(else_branch);
                }
            }
        }
        self.close(&mut expr.span, start);
    }
}

fn max_offset(value: &serde_json::Value) -> u32 {
    match value {
        serde_json::Value::Object(map) => {
            let own = match (map.get("start"), map.get("end")) {
                (Some(_), Some(end)) => end.as_u64().unwrap_or(0) as u32,
                _ => 0,
            };
            map.values().map(max_offset).fold(own, u32::max)
        }
        serde_json::Value::Array(items) => items.iter().map(max_offset).fold(0, u32::max),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{expr, SourceBuilder};

    fn sample() -> SourceTree {
        SourceBuilder::new("sample.kt")
            .package("app")
            .class("Outer", |c| {
                c.function("inner", |f| f.returns("Int").body(expr::int(1)))
            })
            .function("main", |f| {
                f.body(expr::block(vec![expr::stmt(expr::call("println", vec![expr::string("hi")]))]))
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_normalization_assigns_nested_spans() {
        let unit = SourceUnit::new(FileId::new(7), sample());
        let outer = &unit.declarations()[0];
        let Declaration::Class(class) = outer else { panic!("expected class") };
        assert_eq!(class.span.file, FileId::new(7));
        let member_span = class.members[0].span();
        assert!(class.span.contains(&member_span));
        assert!(!unit.declarations()[1].span().contains(&member_span));
    }

    #[test]
    fn test_declaration_at_finds_innermost() {
        let unit = SourceUnit::new(FileId::new(1), sample());
        let Declaration::Class(class) = &unit.declarations()[0] else { panic!("expected class") };
        let member = &class.members[0];
        let found = unit.declaration_at(member.name_span()).unwrap();
        assert_eq!(found.name().as_str(), "inner");
        let found = unit.declaration_at(class.name_span).unwrap();
        assert_eq!(found.name().as_str(), "Outer");
        assert!(unit.declaration_at(Span::from_offsets(FileId::new(2), 0, 1)).is_none());
    }

    #[test]
    fn test_expression_ids_and_owners() {
        let unit = SourceUnit::new(FileId::new(1), sample());
        assert_eq!(unit.expression_count(), 4);
        let main_span = unit.declarations()[1].span();
        assert_eq!(unit.owner_of(ExprId(1)), Some(main_span));
        assert_eq!(unit.owner_of(ExprId(3)), Some(main_span));
        assert!(unit.owner_of(ExprId(9)).is_none());
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let unit = SourceUnit::new(FileId::new(1), sample());
        assert!(unit.same_content(&sample()));
        let mut changed = sample();
        changed.package = QualifiedName::parse("other");
        assert!(!unit.same_content(&changed));
        assert_eq!(unit.fingerprint_hex().len(), 64);
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unit.json");
        std::fs::write(&path, serde_json::to_string(&sample()).unwrap()).unwrap();
        let unit = SourceUnit::load(FileId::new(3), &path).unwrap();
        assert_eq!(unit.declarations().len(), 2);
        assert!(SourceUnit::load(FileId::new(3), &dir.path().join("missing.json")).is_err());
    }
}
