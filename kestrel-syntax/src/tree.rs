//! The immutable declaration tree consumed by the analyzer.
//!
//! Trees are produced by an external parser (or by [`crate::builder`]) and
//! exchanged as JSON. Declarations are reference counted so that symbols can
//! keep a handle on the syntax they were created from without copying it.

use crate::span::Span;
use crate::symbol::{QualifiedName, Symbol};
use crate::type_ref::TypeRef;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassKind {
    #[default]
    Class,
    Interface,
    Object,
    Enum,
    Annotation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Private,
    Protected,
    Internal,
    #[default]
    Public,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    #[default]
    Final,
    Open,
    Abstract,
    Sealed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variance {
    #[default]
    Invariant,
    In,
    Out,
}

/// Ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeprecationLevel {
    Warning,
    Error,
    Hidden,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Deprecated {
    pub level: DeprecationLevel,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Modifiers {
    pub visibility: Option<Visibility>,
    pub modality: Option<Modality>,
    pub is_inner: bool,
    pub is_data: bool,
    pub is_fun: bool,
    pub is_expect: bool,
    pub is_override: bool,
    pub is_suspend: bool,
    pub is_operator: bool,
    pub is_infix: bool,
    pub is_inline: bool,
    pub deprecated: Option<Deprecated>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportDirective {
    pub path: QualifiedName,
    #[serde(default)]
    pub star: bool,
    #[serde(default)]
    pub alias: Option<Symbol>,
    #[serde(default)]
    pub span: Span,
}

impl ImportDirective {
    /// The name this import introduces, for non-star imports.
    pub fn imported_name(&self) -> Option<Symbol> {
        if self.star {
            None
        } else {
            self.alias.or_else(|| self.path.last())
        }
    }
}

/// A whole source unit as produced by the parser.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SourceTree {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub package: QualifiedName,
    #[serde(default)]
    pub imports: Vec<ImportDirective>,
    #[serde(default)]
    pub declarations: Vec<Declaration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "declaration", rename_all = "snake_case")]
pub enum Declaration {
    Class(Arc<ClassDecl>),
    Function(Arc<FunctionDecl>),
    Property(Arc<PropertyDecl>),
}

impl Declaration {
    pub fn name(&self) -> Symbol {
        match self {
            Declaration::Class(c) => c.name,
            Declaration::Function(f) => f.name,
            Declaration::Property(p) => p.name,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Declaration::Class(c) => c.span,
            Declaration::Function(f) => f.span,
            Declaration::Property(p) => p.span,
        }
    }

    pub fn name_span(&self) -> Span {
        match self {
            Declaration::Class(c) => c.name_span,
            Declaration::Function(f) => f.name_span,
            Declaration::Property(p) => p.name_span,
        }
    }

    pub fn modifiers(&self) -> &Modifiers {
        match self {
            Declaration::Class(c) => &c.modifiers,
            Declaration::Function(f) => &f.modifiers,
            Declaration::Property(p) => &p.modifiers,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDecl {
    pub name: Symbol,
    #[serde(default)]
    pub kind: ClassKind,
    #[serde(default)]
    pub modifiers: Modifiers,
    #[serde(default)]
    pub type_parameters: Vec<TypeParameterDecl>,
    #[serde(default)]
    pub supertypes: Vec<TypeRef>,
    /// `None` when the class declares no primary constructor.
    #[serde(default)]
    pub primary_constructor: Option<Vec<ParameterDecl>>,
    #[serde(default)]
    pub constructors: Vec<Arc<ConstructorDecl>>,
    #[serde(default)]
    pub members: Vec<Declaration>,
    #[serde(default)]
    pub span: Span,
    #[serde(default)]
    pub name_span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstructorDecl {
    #[serde(default)]
    pub modifiers: Modifiers,
    #[serde(default)]
    pub parameters: Vec<ParameterDecl>,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeParameterDecl {
    pub name: Symbol,
    #[serde(default)]
    pub variance: Variance,
    #[serde(default)]
    pub bounds: Vec<TypeRef>,
    #[serde(default)]
    pub reified: bool,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: Symbol,
    #[serde(default)]
    pub modifiers: Modifiers,
    #[serde(default)]
    pub type_parameters: Vec<TypeParameterDecl>,
    #[serde(default)]
    pub receiver: Option<TypeRef>,
    #[serde(default)]
    pub parameters: Vec<ParameterDecl>,
    #[serde(default)]
    pub return_type: Option<TypeRef>,
    #[serde(default)]
    pub body: Option<Expr>,
    #[serde(default)]
    pub span: Span,
    #[serde(default)]
    pub name_span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDecl {
    pub name: Symbol,
    #[serde(default)]
    pub modifiers: Modifiers,
    #[serde(default)]
    pub is_var: bool,
    #[serde(default)]
    pub type_parameters: Vec<TypeParameterDecl>,
    #[serde(default)]
    pub receiver: Option<TypeRef>,
    #[serde(default, rename = "type")]
    pub type_ref: Option<TypeRef>,
    #[serde(default)]
    pub initializer: Option<Expr>,
    #[serde(default)]
    pub span: Span,
    #[serde(default)]
    pub name_span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDecl {
    pub name: Symbol,
    #[serde(rename = "type")]
    pub type_ref: TypeRef,
    #[serde(default)]
    pub default_value: Option<Expr>,
    #[serde(default)]
    pub is_vararg: bool,
    /// Primary-constructor parameters declared `val`/`var` become properties.
    #[serde(default)]
    pub is_property: bool,
    #[serde(default)]
    pub span: Span,
}

/// Identifier of an expression node, unique within its source unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ExprId(pub u32);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    #[serde(default)]
    pub id: ExprId,
    #[serde(flatten)]
    pub kind: ExprKind,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "expr", rename_all = "snake_case")]
pub enum ExprKind {
    Literal {
        value: Literal,
    },
    Name {
        name: Symbol,
    },
    Call(CallExpr),
    Member {
        receiver: Box<Expr>,
        #[serde(default)]
        safe: bool,
        name: Symbol,
        #[serde(default)]
        name_span: Span,
    },
    Lambda(LambdaExpr),
    Block {
        statements: Vec<Statement>,
    },
    If {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        #[serde(default)]
        else_branch: Option<Box<Expr>>,
    },
    This,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallExpr {
    #[serde(default)]
    pub receiver: Option<Box<Expr>>,
    #[serde(default)]
    pub safe: bool,
    pub callee: Symbol,
    #[serde(default)]
    pub callee_span: Span,
    #[serde(default)]
    pub type_arguments: Vec<TypeRef>,
    #[serde(default)]
    pub arguments: Vec<Expr>,
    #[serde(default)]
    pub trailing_lambda: Option<Box<Expr>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LambdaExpr {
    /// `None` means no parameter list was written, so `it` is implied.
    #[serde(default)]
    pub parameters: Option<Vec<LambdaParameter>>,
    pub body: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LambdaParameter {
    pub name: Symbol,
    #[serde(default, rename = "type")]
    pub type_ref: Option<TypeRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    Int(i64),
    Long(i64),
    Double(f64),
    String(String),
    Char(char),
    Boolean(bool),
    Null,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "statement", rename_all = "snake_case")]
pub enum Statement {
    Local(LocalDecl),
    Class(Arc<ClassDecl>),
    Expression(Expr),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalDecl {
    pub name: Symbol,
    #[serde(default)]
    pub is_var: bool,
    #[serde(default, rename = "type")]
    pub type_ref: Option<TypeRef>,
    pub initializer: Expr,
    #[serde(default)]
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Expr {
            id: ExprId::default(),
            kind,
            span: Span::DUMMY,
        }
    }

    /// Direct sub-expressions in evaluation order, excluding local class bodies.
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Literal { .. } | ExprKind::Name { .. } | ExprKind::This => Vec::new(),
            ExprKind::Call(call) => {
                let mut children = Vec::with_capacity(call.arguments.len() + 2);
                if let Some(receiver) = &call.receiver {
                    children.push(receiver.as_ref());
                }
                children.extend(call.arguments.iter());
                if let Some(lambda) = &call.trailing_lambda {
                    children.push(lambda.as_ref());
                }
                children
            }
            ExprKind::Member { receiver, .. } => vec![receiver.as_ref()],
            ExprKind::Lambda(lambda) => vec![lambda.body.as_ref()],
            ExprKind::Block { statements } => statements
                .iter()
                .filter_map(|statement| match statement {
                    Statement::Local(local) => Some(&local.initializer),
                    Statement::Expression(expr) => Some(expr),
                    Statement::Class(_) => None,
                })
                .collect(),
            ExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let mut children = vec![condition.as_ref(), then_branch.as_ref()];
                if let Some(else_branch) = else_branch {
                    children.push(else_branch.as_ref());
                }
                children
            }
        }
    }

    /// Local classes declared directly in this expression's blocks.
    pub fn local_classes(&self) -> Vec<&Arc<ClassDecl>> {
        let mut found = Vec::new();
        self.collect_local_classes(&mut found);
        found
    }

    fn collect_local_classes<'a>(&'a self, found: &mut Vec<&'a Arc<ClassDecl>>) {
        if let ExprKind::Block { statements } = &self.kind {
            for statement in statements {
                if let Statement::Class(class) = statement {
                    found.push(class);
                }
            }
        }
        for child in self.children() {
            child.collect_local_classes(found);
        }
    }
}

impl ClassDecl {
    /// Declared members that are classes.
    pub fn nested_classes(&self) -> impl Iterator<Item = &Arc<ClassDecl>> {
        self.members.iter().filter_map(|member| match member {
            Declaration::Class(class) => Some(class),
            _ => None,
        })
    }
}

impl FunctionDecl {
    pub fn has_block_body(&self) -> bool {
        matches!(self.body.as_ref().map(|b| &b.kind), Some(ExprKind::Block { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_minimal_tree() {
        let json = r#"{
            "path": "main.kt",
            "package": "app",
            "imports": [{ "path": "lib.util", "star": true }],
            "declarations": [
                { "declaration": "class", "name": "Base", "supertypes": ["Comparable<Base>"],
                  "modifiers": { "modality": "open" } },
                { "declaration": "function", "name": "f",
                  "parameters": [{ "name": "x", "type": "Int" }],
                  "body": { "expr": "call", "callee": "g", "arguments": [{ "expr": "name", "name": "x" }] } }
            ]
        }"#;
        let tree: SourceTree = serde_json::from_str(json).unwrap();
        assert_eq!(tree.package.to_string(), "app");
        assert!(tree.imports[0].star);
        assert_eq!(tree.declarations.len(), 2);
        match &tree.declarations[0] {
            Declaration::Class(class) => {
                assert_eq!(class.name.as_str(), "Base");
                assert_eq!(class.modifiers.modality, Some(Modality::Open));
                assert_eq!(class.supertypes[0].to_string(), "Comparable<Base>");
            }
            other => panic!("unexpected {:?}", other),
        }
        match &tree.declarations[1] {
            Declaration::Function(function) => {
                let body = function.body.as_ref().unwrap();
                assert_eq!(body.children().len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_imported_name() {
        let import = ImportDirective {
            path: QualifiedName::parse("lib.Thing"),
            star: false,
            alias: Some(Symbol::intern("Other")),
            span: Span::DUMMY,
        };
        assert_eq!(import.imported_name(), Some(Symbol::intern("Other")));
    }

    #[test]
    fn test_deprecation_levels_are_ordered() {
        assert!(DeprecationLevel::Warning < DeprecationLevel::Error);
        assert!(DeprecationLevel::Error < DeprecationLevel::Hidden);
    }
}
