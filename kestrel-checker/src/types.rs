//! Type representation
//!
//! Types are immutable values compared by structure. They never own symbols:
//! classifiers and type parameters are referenced by arena id, so a type
//! parameter's (possibly F-bounded) bounds are looked up on the symbol rather
//! than expanded into the type.

use crate::symbols::{ClassId, TypeParamId};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use kestrel_syntax::Variance;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Nominal {
        classifier: ClassId,
        arguments: Vec<TypeProjection>,
        nullable: bool,
    },
    Function {
        parameters: Vec<Type>,
        receiver: Option<Box<Type>>,
        return_type: Box<Type>,
        context_receivers: Vec<Type>,
        is_suspend: bool,
        nullable: bool,
    },
    Intersection(IntersectionType),
    /// Platform type whose nullability is not known.
    Flexible { lower: Box<Type>, upper: Box<Type> },
    TypeParameter { parameter: TypeParamId, nullable: bool },
    /// Placeholder produced after a reported error.
    Error(ErrorKind),
}

/// An intersection of at least two types; build with [`Type::intersection`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntersectionType {
    conjuncts: Vec<Type>,
}

impl IntersectionType {
    pub fn conjuncts(&self) -> &[Type] {
        &self.conjuncts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Unresolved,
    Recursive,
    Inapplicable,
    Ambiguous,
    Uninferred,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeProjection {
    Invariant(Type),
    In(Type),
    Out(Type),
    Star,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Nullability {
    NotNull,
    Nullable,
    Unknown,
}

impl TypeProjection {
    pub fn type_arg(&self) -> Option<&Type> {
        match self {
            TypeProjection::Invariant(t) | TypeProjection::In(t) | TypeProjection::Out(t) => Some(t),
            TypeProjection::Star => None,
        }
    }

    /// The variance written at the use site, if any.
    pub fn projection_variance(&self) -> Option<Variance> {
        match self {
            TypeProjection::Invariant(_) => Some(Variance::Invariant),
            TypeProjection::In(_) => Some(Variance::In),
            TypeProjection::Out(_) => Some(Variance::Out),
            TypeProjection::Star => None,
        }
    }

    pub fn map(&self, f: impl FnOnce(&Type) -> Type) -> TypeProjection {
        match self {
            TypeProjection::Invariant(t) => TypeProjection::Invariant(f(t)),
            TypeProjection::In(t) => TypeProjection::In(f(t)),
            TypeProjection::Out(t) => TypeProjection::Out(f(t)),
            TypeProjection::Star => TypeProjection::Star,
        }
    }
}

impl Type {
    pub fn nominal(classifier: ClassId, arguments: Vec<TypeProjection>) -> Type {
        Type::Nominal {
            classifier,
            arguments,
            nullable: false,
        }
    }

    /// A nominal type whose arguments are all invariant.
    pub fn simple(classifier: ClassId, arguments: Vec<Type>) -> Type {
        Type::nominal(classifier, arguments.into_iter().map(TypeProjection::Invariant).collect())
    }

    pub fn parameter(parameter: TypeParamId) -> Type {
        Type::TypeParameter {
            parameter,
            nullable: false,
        }
    }

    pub fn function(parameters: Vec<Type>, return_type: Type) -> Type {
        Type::Function {
            parameters,
            receiver: None,
            return_type: Box::new(return_type),
            context_receivers: Vec::new(),
            is_suspend: false,
            nullable: false,
        }
    }

    pub fn flexible(lower: Type, upper: Type) -> Type {
        Type::Flexible {
            lower: Box::new(lower),
            upper: Box::new(upper),
        }
    }

    /// Build a normalized intersection.
    ///
    /// Nested intersections are flattened and duplicates removed; fewer than
    /// two remaining members collapse to that member. An empty input yields an
    /// internal error type.
    pub fn intersection(types: impl IntoIterator<Item = Type>) -> Type {
        let mut conjuncts: Vec<Type> = Vec::new();
        for t in types {
            match t {
                Type::Intersection(inner) => {
                    for c in inner.conjuncts {
                        if !conjuncts.contains(&c) {
                            conjuncts.push(c);
                        }
                    }
                }
                other => {
                    if !conjuncts.contains(&other) {
                        conjuncts.push(other);
                    }
                }
            }
        }
        match conjuncts.len() {
            0 => Type::Error(ErrorKind::Internal),
            1 => conjuncts.remove(0),
            _ => Type::Intersection(IntersectionType { conjuncts }),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Type::Error(_))
    }

    /// True when an error type occurs anywhere inside this type.
    pub fn contains_error(&self) -> bool {
        match self {
            Type::Error(_) => true,
            Type::Nominal { arguments, .. } => arguments
                .iter()
                .filter_map(TypeProjection::type_arg)
                .any(Type::contains_error),
            Type::Function {
                parameters,
                receiver,
                return_type,
                context_receivers,
                ..
            } => {
                parameters.iter().any(Type::contains_error)
                    || context_receivers.iter().any(Type::contains_error)
                    || receiver.as_deref().is_some_and(Type::contains_error)
                    || return_type.contains_error()
            }
            Type::Intersection(i) => i.conjuncts.iter().any(Type::contains_error),
            Type::Flexible { lower, upper } => lower.contains_error() || upper.contains_error(),
            Type::TypeParameter { .. } => false,
        }
    }

    pub fn classifier(&self) -> Option<ClassId> {
        match self {
            Type::Nominal { classifier, .. } => Some(*classifier),
            Type::Flexible { lower, .. } => lower.classifier(),
            _ => None,
        }
    }

    pub fn arguments(&self) -> &[TypeProjection] {
        match self {
            Type::Nominal { arguments, .. } => arguments,
            Type::Flexible { lower, .. } => lower.arguments(),
            _ => &[],
        }
    }

    /// Whether the type is written with `?` (all conjuncts for intersections).
    pub fn is_marked_nullable(&self) -> bool {
        match self {
            Type::Nominal { nullable, .. }
            | Type::Function { nullable, .. }
            | Type::TypeParameter { nullable, .. } => *nullable,
            Type::Intersection(i) => i.conjuncts.iter().all(Type::is_marked_nullable),
            Type::Flexible { upper, .. } => upper.is_marked_nullable(),
            Type::Error(_) => false,
        }
    }

    pub fn nullability(&self) -> Nullability {
        match self {
            Type::Flexible { lower, upper } => {
                if lower.is_marked_nullable() == upper.is_marked_nullable() {
                    if upper.is_marked_nullable() {
                        Nullability::Nullable
                    } else {
                        Nullability::NotNull
                    }
                } else {
                    Nullability::Unknown
                }
            }
            other if other.is_marked_nullable() => Nullability::Nullable,
            _ => Nullability::NotNull,
        }
    }

    /// Same type with the given nullability; intersections apply it to every conjunct.
    pub fn with_nullability(&self, nullable: bool) -> Type {
        match self {
            Type::Nominal {
                classifier,
                arguments,
                ..
            } => Type::Nominal {
                classifier: *classifier,
                arguments: arguments.clone(),
                nullable,
            },
            Type::Function {
                parameters,
                receiver,
                return_type,
                context_receivers,
                is_suspend,
                ..
            } => Type::Function {
                parameters: parameters.clone(),
                receiver: receiver.clone(),
                return_type: return_type.clone(),
                context_receivers: context_receivers.clone(),
                is_suspend: *is_suspend,
                nullable,
            },
            Type::Intersection(i) => Type::Intersection(IntersectionType {
                conjuncts: i.conjuncts.iter().map(|c| c.with_nullability(nullable)).collect(),
            }),
            Type::Flexible { lower, upper } => {
                Type::flexible(lower.with_nullability(nullable), upper.with_nullability(nullable))
            }
            Type::TypeParameter { parameter, .. } => Type::TypeParameter {
                parameter: *parameter,
                nullable,
            },
            Type::Error(kind) => Type::Error(*kind),
        }
    }

    pub fn make_nullable(&self) -> Type {
        self.with_nullability(true)
    }

    pub fn make_not_null(&self) -> Type {
        self.with_nullability(false)
    }

    /// Parameters, receiver and context receivers together.
    pub fn function_arity(&self) -> Option<usize> {
        match self {
            Type::Function {
                parameters,
                receiver,
                context_receivers,
                ..
            } => Some(parameters.len() + context_receivers.len() + usize::from(receiver.is_some())),
            _ => None,
        }
    }

    pub fn mentions_parameter(&self, parameter: TypeParamId) -> bool {
        match self {
            Type::TypeParameter { parameter: p, .. } => *p == parameter,
            Type::Nominal { arguments, .. } => arguments
                .iter()
                .filter_map(TypeProjection::type_arg)
                .any(|t| t.mentions_parameter(parameter)),
            Type::Function {
                parameters,
                receiver,
                return_type,
                context_receivers,
                ..
            } => {
                parameters.iter().chain(context_receivers.iter()).any(|t| t.mentions_parameter(parameter))
                    || receiver.as_deref().is_some_and(|r| r.mentions_parameter(parameter))
                    || return_type.mentions_parameter(parameter)
            }
            Type::Intersection(i) => i.conjuncts.iter().any(|t| t.mentions_parameter(parameter)),
            Type::Flexible { lower, upper } => {
                lower.mentions_parameter(parameter) || upper.mentions_parameter(parameter)
            }
            Type::Error(_) => false,
        }
    }

    pub fn apply_subst(&self, subst: &Substitution) -> Type {
        if subst.is_empty() {
            return self.clone();
        }
        match self {
            Type::TypeParameter { parameter, nullable } => match subst.lookup(*parameter) {
                Some(replacement) if *nullable => replacement.make_nullable(),
                Some(replacement) => replacement.clone(),
                None => self.clone(),
            },
            Type::Nominal {
                classifier,
                arguments,
                nullable,
            } => Type::Nominal {
                classifier: *classifier,
                arguments: arguments.iter().map(|a| a.map(|t| t.apply_subst(subst))).collect(),
                nullable: *nullable,
            },
            Type::Function {
                parameters,
                receiver,
                return_type,
                context_receivers,
                is_suspend,
                nullable,
            } => Type::Function {
                parameters: parameters.iter().map(|t| t.apply_subst(subst)).collect(),
                receiver: receiver.as_ref().map(|r| Box::new(r.apply_subst(subst))),
                return_type: Box::new(return_type.apply_subst(subst)),
                context_receivers: context_receivers.iter().map(|t| t.apply_subst(subst)).collect(),
                is_suspend: *is_suspend,
                nullable: *nullable,
            },
            Type::Intersection(i) => Type::intersection(i.conjuncts.iter().map(|c| c.apply_subst(subst))),
            Type::Flexible { lower, upper } => Type::flexible(lower.apply_subst(subst), upper.apply_subst(subst)),
            Type::Error(_) => self.clone(),
        }
    }

    pub fn display<'a>(&'a self, names: &'a dyn NameRenderer) -> TypeDisplay<'a> {
        TypeDisplay { ty: self, names }
    }
}

/// Structural substitution of type parameters.
pub fn substitute(ty: &Type, subst: &Substitution) -> Type {
    ty.apply_subst(subst)
}

/// A mapping from type parameters to types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Substitution {
    types: im::HashMap<TypeParamId, Type>,
}

impl Substitution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pairs each parameter with the corresponding argument; star projections are skipped.
    pub fn from_arguments(parameters: &[TypeParamId], arguments: &[TypeProjection]) -> Self {
        let mut subst = Substitution::new();
        for (parameter, argument) in parameters.iter().zip(arguments) {
            if let Some(t) = argument.type_arg() {
                subst.insert(*parameter, t.clone());
            }
        }
        subst
    }

    pub fn identity(parameters: &[TypeParamId]) -> Self {
        let mut subst = Substitution::new();
        for parameter in parameters {
            subst.insert(*parameter, Type::parameter(*parameter));
        }
        subst
    }

    pub fn insert(&mut self, parameter: TypeParamId, ty: Type) {
        self.types.insert(parameter, ty);
    }

    pub fn lookup(&self, parameter: TypeParamId) -> Option<&Type> {
        self.types.get(&parameter)
    }

    pub fn contains(&self, parameter: TypeParamId) -> bool {
        self.types.contains_key(&parameter)
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// `self` applied after `other`: `compose(a, b)(t) == a(b(t))`.
    pub fn compose(&self, other: &Substitution) -> Substitution {
        let mut types = self.types.clone();
        for (parameter, ty) in other.types.iter() {
            types.insert(*parameter, ty.apply_subst(self));
        }
        Substitution { types }
    }
}

/// Resolves ids to printable names.
pub trait NameRenderer {
    fn class_name(&self, class: ClassId) -> String;
    fn type_parameter_name(&self, parameter: TypeParamId) -> String;
}

pub struct TypeDisplay<'a> {
    ty: &'a Type,
    names: &'a dyn NameRenderer,
}

impl fmt::Display for TypeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.names;
        match self.ty {
            Type::Nominal {
                classifier,
                arguments,
                nullable,
            } => {
                f.write_str(&names.class_name(*classifier))?;
                if !arguments.is_empty() {
                    f.write_str("<")?;
                    for (i, argument) in arguments.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        match argument {
                            TypeProjection::Invariant(t) => write!(f, "{}", t.display(names))?,
                            TypeProjection::In(t) => write!(f, "in {}", t.display(names))?,
                            TypeProjection::Out(t) => write!(f, "out {}", t.display(names))?,
                            TypeProjection::Star => f.write_str("*")?,
                        }
                    }
                    f.write_str(">")?;
                }
                if *nullable {
                    f.write_str("?")?;
                }
                Ok(())
            }
            Type::Function {
                parameters,
                receiver,
                return_type,
                is_suspend,
                nullable,
                ..
            } => {
                if *nullable {
                    f.write_str("(")?;
                }
                if *is_suspend {
                    f.write_str("suspend ")?;
                }
                if let Some(receiver) = receiver {
                    write!(f, "{}.", receiver.display(names))?;
                }
                f.write_str("(")?;
                for (i, p) in parameters.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", p.display(names))?;
                }
                write!(f, ") -> {}", return_type.display(names))?;
                if *nullable {
                    f.write_str(")?")?;
                }
                Ok(())
            }
            Type::Intersection(i) => {
                for (index, c) in i.conjuncts.iter().enumerate() {
                    if index > 0 {
                        f.write_str(" & ")?;
                    }
                    write!(f, "{}", c.display(names))?;
                }
                Ok(())
            }
            Type::Flexible { lower, .. } => write!(f, "{}!", lower.make_not_null().display(names)),
            Type::TypeParameter { parameter, nullable } => {
                f.write_str(&names.type_parameter_name(*parameter))?;
                if *nullable {
                    f.write_str("?")?;
                }
                Ok(())
            }
            Type::Error(kind) => write!(f, "<error: {:?}>", kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::ModuleId;

    fn class(index: u32) -> ClassId {
        ClassId::new(ModuleId(1), index)
    }

    fn param(index: u32) -> TypeParamId {
        TypeParamId::new(ModuleId(1), index)
    }

    struct Names;

    impl NameRenderer for Names {
        fn class_name(&self, class: ClassId) -> String {
            format!("C{}", class.index)
        }
        fn type_parameter_name(&self, parameter: TypeParamId) -> String {
            format!("T{}", parameter.index)
        }
    }

    #[test]
    fn test_intersection_normalization() {
        let a = Type::simple(class(0), vec![]);
        let b = Type::simple(class(1), vec![]);
        let c = Type::simple(class(2), vec![]);

        assert_eq!(Type::intersection(vec![a.clone()]), a);
        assert_eq!(Type::intersection(vec![a.clone(), a.clone()]), a);

        let ab = Type::intersection(vec![a.clone(), b.clone()]);
        let nested = Type::intersection(vec![ab.clone(), c.clone(), b.clone()]);
        match &nested {
            Type::Intersection(i) => assert_eq!(i.conjuncts(), &[a.clone(), b.clone(), c.clone()]),
            other => panic!("unexpected {:?}", other),
        }
        assert!(Type::intersection(Vec::new()).is_error());
    }

    #[test]
    fn test_nullable_intersection_marks_every_conjunct() {
        let ab = Type::intersection(vec![Type::simple(class(0), vec![]), Type::simple(class(1), vec![])]);
        let nullable = ab.make_nullable();
        let Type::Intersection(i) = &nullable else { panic!("expected intersection") };
        assert!(i.conjuncts().iter().all(Type::is_marked_nullable));
        assert_eq!(nullable.nullability(), Nullability::Nullable);
    }

    #[test]
    fn test_flexible_nullability() {
        let lower = Type::simple(class(0), vec![]);
        let flexible = Type::flexible(lower.clone(), lower.make_nullable());
        assert_eq!(flexible.nullability(), Nullability::Unknown);
        let both = Type::flexible(lower.clone(), lower.clone());
        assert_eq!(both.nullability(), Nullability::NotNull);
    }

    #[test]
    fn test_substitution_replaces_parameters() {
        let t = param(0);
        let list_of_t = Type::simple(class(5), vec![Type::TypeParameter { parameter: t, nullable: true }]);
        let mut subst = Substitution::new();
        subst.insert(t, Type::simple(class(1), vec![]));

        let result = substitute(&list_of_t, &subst);
        assert_eq!(result, Type::simple(class(5), vec![Type::simple(class(1), vec![]).make_nullable()]));

        let unrelated = Type::parameter(param(9));
        assert_eq!(substitute(&unrelated, &subst), unrelated);
    }

    #[test]
    fn test_identity_substitution_is_noop() {
        let t = param(0);
        let u = param(1);
        let samples = vec![
            Type::simple(class(0), vec![Type::parameter(t), Type::parameter(u).make_nullable()]),
            Type::function(vec![Type::parameter(t)], Type::parameter(u)),
            Type::intersection(vec![Type::parameter(t), Type::simple(class(2), vec![])]),
            Type::flexible(Type::parameter(t), Type::parameter(t).make_nullable()),
            Type::nominal(class(3), vec![TypeProjection::Star, TypeProjection::Out(Type::parameter(u))]),
            Type::Error(ErrorKind::Unresolved),
        ];
        let identity = Substitution::identity(&[t, u]);
        for sample in samples {
            assert_eq!(substitute(&sample, &identity), sample);
        }
    }

    #[test]
    fn test_substitution_renormalizes_intersections() {
        let t = param(0);
        let a = Type::simple(class(0), vec![]);
        let both = Type::intersection(vec![Type::parameter(t), a.clone()]);
        let mut subst = Substitution::new();
        subst.insert(t, a.clone());
        assert_eq!(substitute(&both, &subst), a);
    }

    #[test]
    fn test_compose() {
        let t = param(0);
        let u = param(1);
        let mut first = Substitution::new();
        first.insert(t, Type::parameter(u));
        let mut second = Substitution::new();
        second.insert(u, Type::simple(class(1), vec![]));
        let composed = second.compose(&first);
        assert_eq!(
            substitute(&Type::parameter(t), &composed),
            Type::simple(class(1), vec![])
        );
    }

    #[test]
    fn test_display() {
        let ty = Type::nominal(
            class(0),
            vec![TypeProjection::Out(Type::parameter(param(1))), TypeProjection::Star],
        )
        .make_nullable();
        assert_eq!(ty.display(&Names).to_string(), "C0<out T1, *>?");
        let f = Type::function(vec![Type::simple(class(2), vec![])], Type::simple(class(3), vec![]));
        assert_eq!(f.display(&Names).to_string(), "(C2) -> C3");
        assert_eq!(f.function_arity(), Some(1));
    }
}
