//! Subtyping, common supertypes and bound checks.

use crate::diagnostics::{DiagnosticArg, DiagnosticKind, DiagnosticReporter, ElementRanges};
use crate::lifetime::NoCheckpoint;
use crate::symbol_table::SymbolTable;
use crate::symbols::ClassId;
use crate::types::{Type, TypeProjection, Variance};
use kestrel_syntax::{TypeRef, TypeRefKind};

const LUB_DEPTH: usize = 3;

impl SymbolTable {
    /// Whether values of `ty` may be `null`.
    pub fn is_nullable(&self, ty: &Type) -> bool {
        match ty {
            Type::TypeParameter { parameter, nullable } => {
                *nullable || self.type_parameter_bounds(*parameter).iter().all(|b| self.is_nullable(b))
            }
            Type::Intersection(i) => i.conjuncts().iter().all(|c| self.is_nullable(c)),
            Type::Flexible { upper, .. } => self.is_nullable(upper),
            other => other.is_marked_nullable(),
        }
    }

    pub fn is_subtype(&self, sub: &Type, sup: &Type) -> bool {
        if sub.is_error() || sup.is_error() || sub == sup {
            return true;
        }
        if let Type::Flexible { lower, .. } = sub {
            return self.is_subtype(lower, sup);
        }
        if let Type::Flexible { upper, .. } = sup {
            return self.is_subtype(sub, upper);
        }
        if self.is_nothing(sub) {
            return !sub.is_marked_nullable() || sup.is_marked_nullable();
        }
        if sup.is_marked_nullable() && self.is_any(sup) {
            return true;
        }
        if sub.is_marked_nullable() && !sup.is_marked_nullable() {
            return false;
        }
        let sub = sub.make_not_null();
        let sup = sup.make_not_null();
        if sub == sup {
            return true;
        }
        match (&sub, &sup) {
            (_, Type::Intersection(i)) => i.conjuncts().iter().all(|c| self.is_subtype(&sub, c)),
            (Type::Intersection(i), _) => i.conjuncts().iter().any(|c| self.is_subtype(c, &sup)),
            (_, Type::Nominal { classifier, .. }) if *classifier == self.builtins().any => !self.is_nullable(&sub),
            (Type::TypeParameter { parameter, .. }, _) => {
                let bounds = self.type_parameter_bounds(*parameter);
                if bounds.is_empty() {
                    return false;
                }
                bounds.iter().any(|b| self.is_subtype(b, &sup))
            }
            (_, Type::TypeParameter { .. }) => false,
            (
                Type::Function {
                    parameters: sub_params,
                    receiver: sub_receiver,
                    return_type: sub_return,
                    ..
                },
                Type::Function {
                    parameters: sup_params,
                    receiver: sup_receiver,
                    return_type: sup_return,
                    ..
                },
            ) => {
                if sub_params.len() != sup_params.len() || sub_receiver.is_some() != sup_receiver.is_some() {
                    return false;
                }
                let receivers_ok = match (sub_receiver, sup_receiver) {
                    (Some(a), Some(b)) => self.is_subtype(b, a),
                    _ => true,
                };
                receivers_ok
                    && sub_params.iter().zip(sup_params).all(|(a, b)| self.is_subtype(b, a))
                    && self.is_subtype(sub_return, sup_return)
            }
            (Type::Nominal { .. }, Type::Nominal { classifier, arguments, .. }) => {
                match self.find_supertype_of_class(&sub, *classifier) {
                    Some(found) => self.arguments_conform(*classifier, found.arguments(), arguments),
                    None => false,
                }
            }
            _ => false,
        }
    }

    pub fn is_equal_type(&self, a: &Type, b: &Type) -> bool {
        self.is_subtype(a, b) && self.is_subtype(b, a)
    }

    fn arguments_conform(&self, class: ClassId, sub: &[TypeProjection], sup: &[TypeProjection]) -> bool {
        let Some(symbol) = self.class(class) else {
            return false;
        };
        let parameters = self.class_type_parameters(&symbol);
        for (index, (a, b)) in sub.iter().zip(sup).enumerate() {
            let Some(parameter) = parameters.get(index).and_then(|p| self.type_parameter(*p)) else {
                return false;
            };
            let upper = self.upper_bound(parameter.id);
            let effective = match (b, parameter.variance) {
                (TypeProjection::Star, _) => continue,
                (TypeProjection::Out(t), _) | (TypeProjection::Invariant(t), Variance::Out) => (Variance::Out, t),
                (TypeProjection::In(t), _) | (TypeProjection::Invariant(t), Variance::In) => (Variance::In, t),
                (TypeProjection::Invariant(t), Variance::Invariant) => (Variance::Invariant, t),
            };
            let ok = match effective {
                (Variance::Out, t) => match a {
                    TypeProjection::Invariant(u) | TypeProjection::Out(u) => self.is_subtype(u, t),
                    TypeProjection::Star => self.is_subtype(&upper, t),
                    TypeProjection::In(_) => self.is_any(t) && t.is_marked_nullable(),
                },
                (Variance::In, t) => match a {
                    TypeProjection::Invariant(u) | TypeProjection::In(u) => self.is_subtype(t, u),
                    TypeProjection::Star | TypeProjection::Out(_) => self.is_nothing(t),
                },
                (Variance::Invariant, t) => match a {
                    TypeProjection::Invariant(u) => self.is_equal_type(u, t),
                    _ => t.is_error(),
                },
            };
            if !ok {
                return false;
            }
        }
        true
    }

    /// Whether some non-trivial type could be a subtype of both `a` and `b`.
    ///
    /// Used to decide whether two types can describe the same value. Errors and
    /// `Nothing` are compatible with everything, and two nullable types always
    /// share `Nothing?`.
    pub fn has_common_subtype(&self, a: &Type, b: &Type) -> bool {
        if a.is_error() || b.is_error() || self.is_nothing(a) || self.is_nothing(b) || a == b {
            return true;
        }
        if self.is_nullable(a) && self.is_nullable(b) {
            return true;
        }
        match (a, b) {
            (Type::Flexible { upper, .. }, _) => self.has_common_subtype(upper, b),
            (_, Type::Flexible { upper, .. }) => self.has_common_subtype(a, upper),
            (Type::Intersection(i), _) => i.conjuncts().iter().all(|c| self.has_common_subtype(c, b)),
            (_, Type::Intersection(i)) => i.conjuncts().iter().all(|c| self.has_common_subtype(a, c)),
            (Type::TypeParameter { parameter, .. }, other) | (other, Type::TypeParameter { parameter, .. }) => self
                .type_parameter_bounds(*parameter)
                .iter()
                .all(|bound| self.has_common_subtype(bound, other)),
            (Type::Function { .. }, Type::Function { .. }) => a.function_arity() == b.function_arity(),
            (Type::Function { .. }, Type::Nominal { classifier, .. })
            | (Type::Nominal { classifier, .. }, Type::Function { .. }) => {
                *classifier == self.builtins().any || self.class(*classifier).is_some_and(|c| c.is_interface())
            }
            (Type::Nominal { classifier: x, .. }, Type::Nominal { classifier: y, .. }) => {
                self.nominal_common_subtype(a, *x, b, *y)
            }
            _ => false,
        }
    }

    fn nominal_common_subtype(&self, a: &Type, x: ClassId, b: &Type, y: ClassId) -> bool {
        let (sub, sup, sup_class) = if self.is_subclass(x, y) {
            (a, b, y)
        } else if self.is_subclass(y, x) {
            (b, a, x)
        } else {
            let (Some(first), Some(second)) = (self.class(x), self.class(y)) else {
                return true;
            };
            let open = |c: &crate::symbols::ClassifierSymbol| {
                c.is_interface() || self.class_status(c).modality != kestrel_syntax::Modality::Final
            };
            return (first.is_interface() && open(&second)) || (second.is_interface() && open(&first));
        };
        let Some(view) = self.find_supertype_of_class(&sub.make_not_null(), sup_class) else {
            return true;
        };
        view.arguments()
            .iter()
            .zip(sup.arguments())
            .all(|(p, q)| match (p.type_arg(), q.type_arg()) {
                (Some(p), Some(q)) => self.has_common_subtype(p, q),
                _ => true,
            })
    }

    /// Least common supertype found along the first type's supertype walk.
    ///
    /// `Nothing` contributes nothing but its nullability; an empty input is `Nothing`.
    pub fn common_supertype(&self, types: &[Type]) -> Type {
        self.common_supertype_at(types, 0)
    }

    fn common_supertype_at(&self, types: &[Type], depth: usize) -> Type {
        let nullable = types.iter().any(|t| self.is_nullable(t));
        let relevant: Vec<Type> = types
            .iter()
            .filter(|t| !self.is_nothing(t))
            .map(|t| if t.is_marked_nullable() { t.make_not_null() } else { t.clone() })
            .collect();
        let Some(first) = relevant.first() else {
            return self.nothing_type().with_nullability(nullable);
        };
        if let Some(error) = relevant.iter().find(|t| t.is_error()) {
            return error.clone();
        }
        if relevant.iter().all(|t| self.is_subtype(t, first)) {
            return first.clone().with_nullability(nullable || first.is_marked_nullable());
        }
        let mut candidates = vec![first.clone()];
        candidates.extend(self.all_supertypes(first, false, &NoCheckpoint).unwrap_or_default());
        for candidate in candidates {
            let candidate = candidate.make_not_null();
            if relevant.iter().all(|t| self.is_subtype(t, &candidate)) {
                return candidate.with_nullability(nullable);
            }
            if depth >= LUB_DEPTH {
                continue;
            }
            if let Some(merged) = self.merge_arguments(&candidate, &relevant, depth) {
                return merged.with_nullability(nullable);
            }
        }
        self.any_type().with_nullability(nullable)
    }

    /// `candidate`'s classifier with arguments merged across the supertypes of `types`.
    fn merge_arguments(&self, candidate: &Type, types: &[Type], depth: usize) -> Option<Type> {
        let class = candidate.classifier()?;
        let symbol = self.class(class)?;
        let parameters = self.class_type_parameters(&symbol);
        if parameters.is_empty() {
            return None;
        }
        let views: Vec<Type> = types
            .iter()
            .map(|t| self.find_supertype_of_class(t, class))
            .collect::<Option<Vec<Type>>>()?;
        let mut arguments = Vec::with_capacity(parameters.len());
        for (index, parameter) in parameters.iter().enumerate() {
            let column: Vec<&TypeProjection> = views.iter().filter_map(|v| v.arguments().get(index)).collect();
            if column.len() != views.len() {
                return None;
            }
            if column.iter().all(|a| *a == column[0]) {
                arguments.push(column[0].clone());
                continue;
            }
            let variance = self.type_parameter(*parameter).map(|p| p.variance).unwrap_or_default();
            let projected: Option<Vec<Type>> = column.iter().map(|a| a.type_arg().cloned()).collect();
            let argument = match (variance, projected) {
                (Variance::Out, Some(args)) => TypeProjection::Invariant(self.common_supertype_at(&args, depth + 1)),
                (Variance::Invariant, Some(args)) => TypeProjection::Out(self.common_supertype_at(&args, depth + 1)),
                _ => TypeProjection::Star,
            };
            arguments.push(argument);
        }
        let merged = Type::nominal(class, arguments);
        types.iter().all(|t| self.is_subtype(t, &merged)).then_some(merged)
    }

    /// Report `UPPER_BOUND_VIOLATED` for type arguments outside their parameter's bounds.
    pub fn check_type_bounds(&self, type_ref: &TypeRef, ty: &Type, reporter: &mut DiagnosticReporter) {
        match (&type_ref.kind, ty) {
            (
                TypeRefKind::Named { arguments: refs, .. },
                Type::Nominal {
                    classifier, arguments, ..
                },
            ) => {
                let Some(class) = self.class(*classifier) else {
                    return;
                };
                let parameters = self.class_type_parameters(&class);
                let subst = self.class_substitution(*classifier, arguments);
                for (index, (parameter, argument)) in parameters.iter().zip(arguments).enumerate() {
                    let argument_ref = refs.get(index).and_then(|r| r.type_ref());
                    let Some(argument_type) = argument.type_arg() else {
                        continue;
                    };
                    let span = argument_ref.map(|r| r.span).unwrap_or(type_ref.span);
                    for bound in self.type_parameter_bounds(*parameter) {
                        let bound = bound.apply_subst(&subst);
                        if !self.is_subtype(argument_type, &bound) {
                            reporter.report_default(
                                DiagnosticKind::UpperBoundViolated,
                                &ElementRanges::new(span),
                                vec![DiagnosticArg::Type(bound), DiagnosticArg::Type(argument_type.clone())],
                            );
                        }
                    }
                    if let Some(argument_ref) = argument_ref {
                        self.check_type_bounds(argument_ref, argument_type, reporter);
                    }
                }
            }
            (
                TypeRefKind::Function {
                    receiver: receiver_ref,
                    parameters: parameter_refs,
                    return_type: return_ref,
                    ..
                },
                Type::Function {
                    receiver,
                    parameters,
                    return_type,
                    ..
                },
            ) => {
                if let (Some(r), Some(t)) = (receiver_ref, receiver) {
                    self.check_type_bounds(r, t, reporter);
                }
                for (r, t) in parameter_refs.iter().zip(parameters) {
                    self.check_type_bounds(r, t, reporter);
                }
                self.check_type_bounds(return_ref, return_type, reporter);
            }
            (TypeRefKind::Intersection(refs), Type::Intersection(i)) if refs.len() == i.conjuncts().len() => {
                for (r, t) in refs.iter().zip(i.conjuncts()) {
                    self.check_type_bounds(r, t, reporter);
                }
            }
            _ => {}
        }
    }
}
