//! Supertype traversal.
//!
//! Direct supertypes are the declared supertypes with the class's type
//! arguments substituted in and the receiver's nullability carried over.
//! `Any` is the implicit root and never appears as a supertype. The
//! transitive walk is breadth-first and visits every classifier once, so
//! cyclic hierarchies terminate.

use crate::lifetime::{Checkpoint, NoCheckpoint, SessionAccessError};
use crate::symbol_table::SymbolTable;
use crate::symbols::{ClassId, ClassifierSymbol, TypeParamId};
use crate::types::{Substitution, Type, TypeProjection};
use std::collections::{HashSet, VecDeque};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum VisitKey {
    Class(ClassId),
    Parameter(TypeParamId),
    Other(Type),
}

fn visit_key(ty: &Type) -> VisitKey {
    match ty {
        Type::Nominal { classifier, .. } => VisitKey::Class(*classifier),
        Type::Flexible { lower, .. } => visit_key(lower),
        Type::TypeParameter { parameter, .. } => VisitKey::Parameter(*parameter),
        other => VisitKey::Other(other.make_not_null()),
    }
}

impl SymbolTable {
    /// Substitution from a class's type parameters to the arguments of `ty`.
    ///
    /// Star projections are replaced by the parameter's upper bound.
    pub fn class_substitution(&self, class: ClassId, arguments: &[TypeProjection]) -> Substitution {
        let Some(symbol) = self.class(class) else {
            return Substitution::new();
        };
        let parameters = self.class_type_parameters(&symbol);
        let mut subst = Substitution::new();
        for (parameter, argument) in parameters.iter().zip(arguments) {
            let ty = match argument.type_arg() {
                Some(t) => t.clone(),
                None => self.upper_bound(*parameter),
            };
            subst.insert(*parameter, ty);
        }
        subst
    }

    pub fn direct_supertypes(&self, ty: &Type) -> Vec<Type> {
        match ty {
            Type::Nominal {
                classifier,
                arguments,
                nullable,
            } => {
                let Some(class) = self.class(*classifier) else {
                    return Vec::new();
                };
                let subst = self.class_substitution(*classifier, arguments);
                self.class_supertypes(&class)
                    .iter()
                    .filter(|t| !self.is_any(t))
                    .map(|t| t.apply_subst(&subst).with_nullability(*nullable || t.is_marked_nullable()))
                    .collect()
            }
            Type::Flexible { lower, .. } => self
                .direct_supertypes(lower)
                .into_iter()
                .map(|t| {
                    let upper = t.make_nullable();
                    Type::flexible(t.make_not_null(), upper)
                })
                .collect(),
            Type::Intersection(intersection) => intersection.conjuncts().to_vec(),
            Type::TypeParameter { parameter, nullable } => self
                .type_parameter_bounds(*parameter)
                .into_iter()
                .filter(|b| !self.is_any(b))
                .map(|b| if *nullable { b.make_nullable() } else { b })
                .collect(),
            Type::Function { .. } | Type::Error(_) => Vec::new(),
        }
    }

    /// Every supertype of `ty` in breadth-first order, each classifier once.
    ///
    /// `ty` itself is never reported, even when the hierarchy cycles back to
    /// it. With `approximate`, local and anonymous classes are walked through
    /// but left out of the result.
    pub fn all_supertypes(
        &self,
        ty: &Type,
        approximate: bool,
        checkpoint: &dyn Checkpoint,
    ) -> Result<Vec<Type>, SessionAccessError> {
        let mut visited: HashSet<VisitKey> = HashSet::new();
        visited.insert(visit_key(&ty.make_not_null()));
        let mut queue: VecDeque<Type> = self.direct_supertypes(ty).into();
        let mut result = Vec::new();
        while let Some(next) = queue.pop_front() {
            checkpoint.checkpoint()?;
            if !visited.insert(visit_key(&next)) {
                continue;
            }
            let hidden = approximate
                && next
                    .classifier()
                    .and_then(|id| self.class(id))
                    .is_some_and(|c| c.is_local());
            queue.extend(self.direct_supertypes(&next));
            if !hidden {
                result.push(next);
            }
        }
        Ok(result)
    }

    /// Whether `class` can reach itself through its declared supertypes.
    pub fn is_on_supertype_cycle(&self, class: &ClassifierSymbol) -> bool {
        let own = self.default_type(class);
        self.direct_supertypes(&own).iter().any(|direct| {
            direct.classifier() == Some(class.id)
                || self
                    .all_supertypes(direct, false, &NoCheckpoint)
                    .is_ok_and(|all| all.iter().any(|t| t.classifier() == Some(class.id)))
        })
    }

    /// The supertype of `ty` whose classifier is `target`, substituted along the path.
    pub fn find_supertype_of_class(&self, ty: &Type, target: ClassId) -> Option<Type> {
        if ty.classifier() == Some(target) {
            return Some(ty.clone());
        }
        self.all_supertypes(ty, false, &NoCheckpoint)
            .ok()?
            .into_iter()
            .find(|t| t.classifier() == Some(target))
    }

    pub fn is_subclass(&self, sub: ClassId, sup: ClassId) -> bool {
        if sub == sup || sup == self.builtins().any {
            return true;
        }
        let Some(class) = self.class(sub) else {
            return false;
        };
        self.find_supertype_of_class(&self.default_type(&class), sup).is_some()
    }

    /// Replace local and anonymous classes by their first non-local supertype.
    pub fn approximate_local_types(&self, ty: &Type) -> Type {
        match ty {
            Type::Nominal {
                classifier,
                arguments,
                nullable,
            } => {
                let local = self.class(*classifier).is_some_and(|c| c.is_local());
                if local {
                    let replacement = self
                        .all_supertypes(&ty.make_not_null(), true, &NoCheckpoint)
                        .ok()
                        .and_then(|all| all.into_iter().next())
                        .unwrap_or_else(|| self.any_type());
                    return replacement.with_nullability(*nullable);
                }
                Type::Nominal {
                    classifier: *classifier,
                    arguments: arguments.iter().map(|a| self.approximate_argument(a)).collect(),
                    nullable: *nullable,
                }
            }
            Type::Function {
                parameters,
                receiver,
                return_type,
                context_receivers,
                is_suspend,
                nullable,
            } => Type::Function {
                parameters: parameters.iter().map(|t| self.approximate_local_types(t)).collect(),
                receiver: receiver.as_ref().map(|r| Box::new(self.approximate_local_types(r))),
                return_type: Box::new(self.approximate_local_types(return_type)),
                context_receivers: context_receivers
                    .iter()
                    .map(|t| self.approximate_local_types(t))
                    .collect(),
                is_suspend: *is_suspend,
                nullable: *nullable,
            },
            Type::Intersection(i) => Type::intersection(i.conjuncts().iter().map(|t| self.approximate_local_types(t))),
            Type::Flexible { lower, upper } => {
                Type::flexible(self.approximate_local_types(lower), self.approximate_local_types(upper))
            }
            Type::TypeParameter { .. } | Type::Error(_) => ty.clone(),
        }
    }

    /// An invariant argument that had to be widened becomes an `out` projection.
    fn approximate_argument(&self, argument: &TypeProjection) -> TypeProjection {
        match argument {
            TypeProjection::Invariant(t) => {
                let approximated = self.approximate_local_types(t);
                if &approximated == t {
                    TypeProjection::Invariant(approximated)
                } else {
                    TypeProjection::Out(approximated)
                }
            }
            other => other.map(|t| self.approximate_local_types(t)),
        }
    }
}
