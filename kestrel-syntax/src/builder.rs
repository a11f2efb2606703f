//! Fluent construction of declaration trees without a parser.
//!
//! Type references are given as text and parsed with [`TypeRef::parse`]; the
//! first parse failure is remembered and reported by `build()`. Spans are left
//! empty and assigned when the tree becomes a [`crate::SourceUnit`].

use crate::error::{Result, SyntaxError};
use crate::span::Span;
use crate::symbol::{QualifiedName, Symbol};
use crate::tree::*;
use crate::type_ref::TypeRef;
use std::sync::Arc;

#[derive(Default)]
struct Errors(Vec<SyntaxError>);

impl Errors {
    fn parse(&mut self, text: &str) -> TypeRef {
        match TypeRef::parse(text) {
            Ok(type_ref) => type_ref,
            Err(error) => {
                self.0.push(error);
                TypeRef::named("<error>", Vec::new())
            }
        }
    }

    fn absorb(&mut self, other: Errors) {
        self.0.extend(other.0);
    }

    fn into_result<T>(self, value: T) -> Result<T> {
        match self.0.into_iter().next() {
            Some(error) => Err(error),
            None => Ok(value),
        }
    }
}

/// Builder for a whole source unit.
pub struct SourceBuilder {
    tree: SourceTree,
    errors: Errors,
}

impl SourceBuilder {
    pub fn new(path: &str) -> Self {
        SourceBuilder {
            tree: SourceTree {
                path: path.to_string(),
                ..SourceTree::default()
            },
            errors: Errors::default(),
        }
    }

    pub fn package(mut self, package: &str) -> Self {
        self.tree.package = QualifiedName::parse(package);
        self
    }

    pub fn import(self, path: &str) -> Self {
        self.push_import(path, false, None)
    }

    pub fn import_as(self, path: &str, alias: &str) -> Self {
        self.push_import(path, false, Some(Symbol::intern(alias)))
    }

    pub fn star_import(self, package: &str) -> Self {
        self.push_import(package, true, None)
    }

    fn push_import(mut self, path: &str, star: bool, alias: Option<Symbol>) -> Self {
        self.tree.imports.push(ImportDirective {
            path: QualifiedName::parse(path),
            star,
            alias,
            span: Span::DUMMY,
        });
        self
    }

    pub fn class(mut self, name: &str, f: impl FnOnce(ClassBuilder) -> ClassBuilder) -> Self {
        let (class, errors) = f(ClassBuilder::new(name, ClassKind::Class)).finish_parts();
        self.errors.absorb(errors);
        self.tree.declarations.push(Declaration::Class(Arc::new(class)));
        self
    }

    pub fn interface(self, name: &str, f: impl FnOnce(ClassBuilder) -> ClassBuilder) -> Self {
        self.class(name, |c| f(c.kind(ClassKind::Interface)))
    }

    pub fn object(self, name: &str, f: impl FnOnce(ClassBuilder) -> ClassBuilder) -> Self {
        self.class(name, |c| f(c.kind(ClassKind::Object)))
    }

    pub fn function(mut self, name: &str, f: impl FnOnce(FunctionBuilder) -> FunctionBuilder) -> Self {
        let (function, errors) = f(FunctionBuilder::new(name)).finish_parts();
        self.errors.absorb(errors);
        self.tree.declarations.push(Declaration::Function(Arc::new(function)));
        self
    }

    pub fn property(mut self, name: &str, f: impl FnOnce(PropertyBuilder) -> PropertyBuilder) -> Self {
        let (property, errors) = f(PropertyBuilder::new(name)).finish_parts();
        self.errors.absorb(errors);
        self.tree.declarations.push(Declaration::Property(Arc::new(property)));
        self
    }

    pub fn build(self) -> Result<SourceTree> {
        self.errors.into_result(self.tree)
    }
}

fn deprecated(level: DeprecationLevel, message: &str) -> Option<Deprecated> {
    Some(Deprecated {
        level,
        message: message.to_string(),
    })
}

fn type_parameter(errors: &mut Errors, name: &str, variance: Variance, bounds: &[&str]) -> TypeParameterDecl {
    TypeParameterDecl {
        name: Symbol::intern(name),
        variance,
        bounds: bounds.iter().map(|b| errors.parse(b)).collect(),
        reified: false,
        span: Span::DUMMY,
    }
}

fn parameter(errors: &mut Errors, name: &str, ty: &str, default_value: Option<Expr>, is_vararg: bool) -> ParameterDecl {
    ParameterDecl {
        name: Symbol::intern(name),
        type_ref: errors.parse(ty),
        default_value,
        is_vararg,
        is_property: false,
        span: Span::DUMMY,
    }
}

pub struct ClassBuilder {
    class: ClassDecl,
    errors: Errors,
}

impl ClassBuilder {
    fn new(name: &str, kind: ClassKind) -> Self {
        ClassBuilder {
            class: ClassDecl {
                name: Symbol::intern(name),
                kind,
                modifiers: Modifiers::default(),
                type_parameters: Vec::new(),
                supertypes: Vec::new(),
                primary_constructor: None,
                constructors: Vec::new(),
                members: Vec::new(),
                span: Span::DUMMY,
                name_span: Span::DUMMY,
            },
            errors: Errors::default(),
        }
    }

    pub fn kind(mut self, kind: ClassKind) -> Self {
        self.class.kind = kind;
        self
    }

    pub fn open(mut self) -> Self {
        self.class.modifiers.modality = Some(Modality::Open);
        self
    }

    pub fn abstract_(mut self) -> Self {
        self.class.modifiers.modality = Some(Modality::Abstract);
        self
    }

    pub fn sealed(mut self) -> Self {
        self.class.modifiers.modality = Some(Modality::Sealed);
        self
    }

    pub fn inner(mut self) -> Self {
        self.class.modifiers.is_inner = true;
        self
    }

    pub fn data(mut self) -> Self {
        self.class.modifiers.is_data = true;
        self
    }

    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.class.modifiers.visibility = Some(visibility);
        self
    }

    pub fn private(self) -> Self {
        self.visibility(Visibility::Private)
    }

    pub fn internal(self) -> Self {
        self.visibility(Visibility::Internal)
    }

    pub fn deprecated(mut self, level: DeprecationLevel, message: &str) -> Self {
        self.class.modifiers.deprecated = deprecated(level, message);
        self
    }

    pub fn type_parameter(self, name: &str) -> Self {
        self.type_parameter_with(name, Variance::Invariant, &[])
    }

    pub fn type_parameter_with(mut self, name: &str, variance: Variance, bounds: &[&str]) -> Self {
        let parameter = type_parameter(&mut self.errors, name, variance, bounds);
        self.class.type_parameters.push(parameter);
        self
    }

    pub fn supertype(mut self, text: &str) -> Self {
        let supertype = self.errors.parse(text);
        self.class.supertypes.push(supertype);
        self
    }

    /// Adds a primary-constructor parameter, creating the constructor if needed.
    pub fn param(mut self, name: &str, ty: &str) -> Self {
        let parameter = parameter(&mut self.errors, name, ty, None, false);
        self.class.primary_constructor.get_or_insert_with(Vec::new).push(parameter);
        self
    }

    /// A `val` primary-constructor parameter, which also declares a property.
    pub fn val_param(mut self, name: &str, ty: &str) -> Self {
        let mut parameter = parameter(&mut self.errors, name, ty, None, false);
        parameter.is_property = true;
        self.class.primary_constructor.get_or_insert_with(Vec::new).push(parameter);
        self
    }

    /// Declares an empty primary constructor.
    pub fn primary_constructor(mut self) -> Self {
        self.class.primary_constructor.get_or_insert_with(Vec::new);
        self
    }

    pub fn secondary_constructor(mut self, f: impl FnOnce(FunctionBuilder) -> FunctionBuilder) -> Self {
        let (function, errors) = f(FunctionBuilder::new("<init>")).finish_parts();
        self.errors.absorb(errors);
        self.class.constructors.push(Arc::new(ConstructorDecl {
            modifiers: function.modifiers,
            parameters: function.parameters,
            span: Span::DUMMY,
        }));
        self
    }

    pub fn function(mut self, name: &str, f: impl FnOnce(FunctionBuilder) -> FunctionBuilder) -> Self {
        let (function, errors) = f(FunctionBuilder::new(name)).finish_parts();
        self.errors.absorb(errors);
        self.class.members.push(Declaration::Function(Arc::new(function)));
        self
    }

    pub fn property(mut self, name: &str, f: impl FnOnce(PropertyBuilder) -> PropertyBuilder) -> Self {
        let (property, errors) = f(PropertyBuilder::new(name)).finish_parts();
        self.errors.absorb(errors);
        self.class.members.push(Declaration::Property(Arc::new(property)));
        self
    }

    pub fn class(mut self, name: &str, f: impl FnOnce(ClassBuilder) -> ClassBuilder) -> Self {
        let (class, errors) = f(ClassBuilder::new(name, ClassKind::Class)).finish_parts();
        self.errors.absorb(errors);
        self.class.members.push(Declaration::Class(Arc::new(class)));
        self
    }

    pub fn interface(self, name: &str, f: impl FnOnce(ClassBuilder) -> ClassBuilder) -> Self {
        self.class(name, |c| f(c.kind(ClassKind::Interface)))
    }

    fn finish_parts(self) -> (ClassDecl, Errors) {
        (self.class, self.errors)
    }

    pub fn finish(self) -> Result<ClassDecl> {
        self.errors.into_result(self.class)
    }
}

pub struct FunctionBuilder {
    function: FunctionDecl,
    errors: Errors,
}

impl FunctionBuilder {
    fn new(name: &str) -> Self {
        FunctionBuilder {
            function: FunctionDecl {
                name: Symbol::intern(name),
                modifiers: Modifiers::default(),
                type_parameters: Vec::new(),
                receiver: None,
                parameters: Vec::new(),
                return_type: None,
                body: None,
                span: Span::DUMMY,
                name_span: Span::DUMMY,
            },
            errors: Errors::default(),
        }
    }

    pub fn type_parameter(self, name: &str) -> Self {
        self.type_parameter_bounded(name, &[])
    }

    pub fn type_parameter_bounded(mut self, name: &str, bounds: &[&str]) -> Self {
        let parameter = type_parameter(&mut self.errors, name, Variance::Invariant, bounds);
        self.function.type_parameters.push(parameter);
        self
    }

    pub fn reified(mut self) -> Self {
        if let Some(last) = self.function.type_parameters.last_mut() {
            last.reified = true;
        }
        self
    }

    pub fn receiver(mut self, ty: &str) -> Self {
        self.function.receiver = Some(self.errors.parse(ty));
        self
    }

    pub fn param(mut self, name: &str, ty: &str) -> Self {
        let parameter = parameter(&mut self.errors, name, ty, None, false);
        self.function.parameters.push(parameter);
        self
    }

    pub fn param_default(mut self, name: &str, ty: &str, default: Expr) -> Self {
        let parameter = parameter(&mut self.errors, name, ty, Some(default), false);
        self.function.parameters.push(parameter);
        self
    }

    pub fn vararg(mut self, name: &str, ty: &str) -> Self {
        let parameter = parameter(&mut self.errors, name, ty, None, true);
        self.function.parameters.push(parameter);
        self
    }

    pub fn returns(mut self, ty: &str) -> Self {
        self.function.return_type = Some(self.errors.parse(ty));
        self
    }

    pub fn body(mut self, body: Expr) -> Self {
        self.function.body = Some(body);
        self
    }

    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.function.modifiers.visibility = Some(visibility);
        self
    }

    pub fn private(self) -> Self {
        self.visibility(Visibility::Private)
    }

    pub fn protected(self) -> Self {
        self.visibility(Visibility::Protected)
    }

    pub fn internal(self) -> Self {
        self.visibility(Visibility::Internal)
    }

    pub fn open(mut self) -> Self {
        self.function.modifiers.modality = Some(Modality::Open);
        self
    }

    pub fn abstract_(mut self) -> Self {
        self.function.modifiers.modality = Some(Modality::Abstract);
        self
    }

    pub fn override_(mut self) -> Self {
        self.function.modifiers.is_override = true;
        self
    }

    pub fn suspend(mut self) -> Self {
        self.function.modifiers.is_suspend = true;
        self
    }

    pub fn operator(mut self) -> Self {
        self.function.modifiers.is_operator = true;
        self
    }

    pub fn infix(mut self) -> Self {
        self.function.modifiers.is_infix = true;
        self
    }

    pub fn inline(mut self) -> Self {
        self.function.modifiers.is_inline = true;
        self
    }

    pub fn deprecated(mut self, level: DeprecationLevel, message: &str) -> Self {
        self.function.modifiers.deprecated = deprecated(level, message);
        self
    }

    fn finish_parts(self) -> (FunctionDecl, Errors) {
        (self.function, self.errors)
    }
}

pub struct PropertyBuilder {
    property: PropertyDecl,
    errors: Errors,
}

impl PropertyBuilder {
    fn new(name: &str) -> Self {
        PropertyBuilder {
            property: PropertyDecl {
                name: Symbol::intern(name),
                modifiers: Modifiers::default(),
                is_var: false,
                type_parameters: Vec::new(),
                receiver: None,
                type_ref: None,
                initializer: None,
                span: Span::DUMMY,
                name_span: Span::DUMMY,
            },
            errors: Errors::default(),
        }
    }

    pub fn ty(mut self, ty: &str) -> Self {
        self.property.type_ref = Some(self.errors.parse(ty));
        self
    }

    pub fn var(mut self) -> Self {
        self.property.is_var = true;
        self
    }

    pub fn receiver(mut self, ty: &str) -> Self {
        self.property.receiver = Some(self.errors.parse(ty));
        self
    }

    pub fn initializer(mut self, initializer: Expr) -> Self {
        self.property.initializer = Some(initializer);
        self
    }

    pub fn private(mut self) -> Self {
        self.property.modifiers.visibility = Some(Visibility::Private);
        self
    }

    pub fn override_(mut self) -> Self {
        self.property.modifiers.is_override = true;
        self
    }

    pub fn open(mut self) -> Self {
        self.property.modifiers.modality = Some(Modality::Open);
        self
    }

    pub fn deprecated(mut self, level: DeprecationLevel, message: &str) -> Self {
        self.property.modifiers.deprecated = deprecated(level, message);
        self
    }

    fn finish_parts(self) -> (PropertyDecl, Errors) {
        (self.property, self.errors)
    }
}

/// Expression constructors.
pub mod expr {
    use super::*;

    fn literal(value: Literal) -> Expr {
        Expr::new(ExprKind::Literal { value })
    }

    pub fn int(value: i64) -> Expr {
        literal(Literal::Int(value))
    }

    pub fn long(value: i64) -> Expr {
        literal(Literal::Long(value))
    }

    pub fn double(value: f64) -> Expr {
        literal(Literal::Double(value))
    }

    pub fn string(value: &str) -> Expr {
        literal(Literal::String(value.to_string()))
    }

    pub fn char(value: char) -> Expr {
        literal(Literal::Char(value))
    }

    pub fn boolean(value: bool) -> Expr {
        literal(Literal::Boolean(value))
    }

    pub fn null() -> Expr {
        literal(Literal::Null)
    }

    pub fn name(name: &str) -> Expr {
        Expr::new(ExprKind::Name {
            name: Symbol::intern(name),
        })
    }

    pub fn this() -> Expr {
        Expr::new(ExprKind::This)
    }

    fn call_expr(receiver: Option<Expr>, safe: bool, callee: &str, arguments: Vec<Expr>) -> Expr {
        Expr::new(ExprKind::Call(CallExpr {
            receiver: receiver.map(Box::new),
            safe,
            callee: Symbol::intern(callee),
            callee_span: Span::DUMMY,
            type_arguments: Vec::new(),
            arguments,
            trailing_lambda: None,
        }))
    }

    pub fn call(callee: &str, arguments: Vec<Expr>) -> Expr {
        call_expr(None, false, callee, arguments)
    }

    pub fn call_on(receiver: Expr, callee: &str, arguments: Vec<Expr>) -> Expr {
        call_expr(Some(receiver), false, callee, arguments)
    }

    pub fn safe_call(receiver: Expr, callee: &str, arguments: Vec<Expr>) -> Expr {
        call_expr(Some(receiver), true, callee, arguments)
    }

    /// Attach explicit type arguments to a call expression.
    pub fn with_type_arguments(mut call: Expr, type_arguments: Vec<TypeRef>) -> Expr {
        if let ExprKind::Call(inner) = &mut call.kind {
            inner.type_arguments = type_arguments;
        }
        call
    }

    /// Attach a trailing lambda to a call expression.
    pub fn with_trailing_lambda(mut call: Expr, lambda: Expr) -> Expr {
        if let ExprKind::Call(inner) = &mut call.kind {
            inner.trailing_lambda = Some(Box::new(lambda));
        }
        call
    }

    pub fn member(receiver: Expr, name: &str) -> Expr {
        Expr::new(ExprKind::Member {
            receiver: Box::new(receiver),
            safe: false,
            name: Symbol::intern(name),
            name_span: Span::DUMMY,
        })
    }

    pub fn safe_member(receiver: Expr, name: &str) -> Expr {
        Expr::new(ExprKind::Member {
            receiver: Box::new(receiver),
            safe: true,
            name: Symbol::intern(name),
            name_span: Span::DUMMY,
        })
    }

    /// A lambda with an implicit `it` parameter.
    pub fn lambda_it(body: Expr) -> Expr {
        Expr::new(ExprKind::Lambda(LambdaExpr {
            parameters: None,
            body: Box::new(body),
        }))
    }

    pub fn lambda(parameters: &[&str], body: Expr) -> Expr {
        Expr::new(ExprKind::Lambda(LambdaExpr {
            parameters: Some(
                parameters
                    .iter()
                    .map(|name| LambdaParameter {
                        name: Symbol::intern(name),
                        type_ref: None,
                    })
                    .collect(),
            ),
            body: Box::new(body),
        }))
    }

    pub fn typed_lambda(parameters: Vec<(&str, TypeRef)>, body: Expr) -> Expr {
        Expr::new(ExprKind::Lambda(LambdaExpr {
            parameters: Some(
                parameters
                    .into_iter()
                    .map(|(name, type_ref)| LambdaParameter {
                        name: Symbol::intern(name),
                        type_ref: Some(type_ref),
                    })
                    .collect(),
            ),
            body: Box::new(body),
        }))
    }

    pub fn block(statements: Vec<Statement>) -> Expr {
        Expr::new(ExprKind::Block { statements })
    }

    pub fn if_(condition: Expr, then_branch: Expr, else_branch: Option<Expr>) -> Expr {
        Expr::new(ExprKind::If {
            condition: Box::new(condition),
            then_branch: Box::new(then_branch),
            else_branch: else_branch.map(Box::new),
        })
    }

    pub fn stmt(expr: Expr) -> Statement {
        Statement::Expression(expr)
    }

    pub fn local(name: &str, type_ref: Option<TypeRef>, initializer: Expr) -> Statement {
        Statement::Local(LocalDecl {
            name: Symbol::intern(name),
            is_var: false,
            type_ref,
            initializer,
            span: Span::DUMMY,
        })
    }

    pub fn local_class(name: &str, f: impl FnOnce(ClassBuilder) -> ClassBuilder) -> Result<Statement> {
        let class = f(ClassBuilder::new(name, ClassKind::Class)).finish()?;
        Ok(Statement::Class(Arc::new(class)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_class_hierarchy() {
        let tree = SourceBuilder::new("shapes.kt")
            .package("geo")
            .import("kestrel.collections.List")
            .interface("Shape", |c| c.function("area", |f| f.returns("Double").abstract_()))
            .class("Square", |c| {
                c.val_param("side", "Double")
                    .supertype("Shape")
                    .function("area", |f| {
                        f.override_()
                            .returns("Double")
                            .body(expr::call_on(expr::name("side"), "times", vec![expr::name("side")]))
                    })
            })
            .build()
            .unwrap();

        assert_eq!(tree.declarations.len(), 2);
        let Declaration::Class(square) = &tree.declarations[1] else { panic!("expected class") };
        assert_eq!(square.supertypes[0].to_string(), "Shape");
        let ctor = square.primary_constructor.as_ref().unwrap();
        assert!(ctor[0].is_property);
    }

    #[test]
    fn test_build_reports_bad_type() {
        let result = SourceBuilder::new("bad.kt")
            .function("f", |f| f.param("x", "List<"))
            .build();
        assert!(matches!(result, Err(SyntaxError::TypeReference { .. })));
    }

    #[test]
    fn test_trailing_lambda_attachment() {
        let call = expr::with_trailing_lambda(
            expr::call("run", vec![]),
            expr::lambda_it(expr::name("it")),
        );
        let ExprKind::Call(inner) = &call.kind else { panic!("expected call") };
        assert!(inner.trailing_lambda.is_some());
        assert_eq!(call.children().len(), 1);
    }
}
