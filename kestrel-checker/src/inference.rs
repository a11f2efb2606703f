//! Constraint collection and solving for generic calls.
//!
//! The variables are the type parameters of one candidate. Subtype
//! constraints are decomposed structurally until a variable stands alone on
//! one side; each variable then gets its equality constraint, else the common
//! supertype of its lower bounds, else the intersection of its upper bounds,
//! else its declared bound.

use crate::symbol_table::SymbolTable;
use crate::symbols::TypeParamId;
use crate::types::{Substitution, Type, TypeProjection, Variance};
use std::collections::HashMap;
use tracing::trace;

#[derive(Debug, Clone, Default)]
struct Bounds {
    lower: Vec<Type>,
    upper: Vec<Type>,
    equal: Vec<Type>,
}

impl Bounds {
    fn is_empty(&self) -> bool {
        self.lower.is_empty() && self.upper.is_empty() && self.equal.is_empty()
    }
}

pub struct ConstraintSystem<'t> {
    table: &'t SymbolTable,
    variables: Vec<TypeParamId>,
    bounds: HashMap<TypeParamId, Bounds>,
}

impl<'t> ConstraintSystem<'t> {
    pub fn new(table: &'t SymbolTable, variables: Vec<TypeParamId>) -> Self {
        ConstraintSystem {
            table,
            variables,
            bounds: HashMap::new(),
        }
    }

    pub fn variables(&self) -> &[TypeParamId] {
        &self.variables
    }

    fn variable(&self, ty: &Type) -> Option<(TypeParamId, bool)> {
        match ty {
            Type::TypeParameter { parameter, nullable } if self.variables.contains(parameter) => {
                Some((*parameter, *nullable))
            }
            _ => None,
        }
    }

    fn mentions_variables(&self, ty: &Type) -> bool {
        self.variables.iter().any(|v| ty.mentions_parameter(*v))
    }

    /// Whether any constraint mentions `variable`.
    pub fn is_constrained(&self, variable: TypeParamId) -> bool {
        self.bounds.get(&variable).is_some_and(|b| !b.is_empty())
    }

    pub fn add_subtype(&mut self, sub: &Type, sup: &Type) {
        if sub.contains_error() || sup.contains_error() {
            return;
        }
        if let Some((variable, nullable)) = self.variable(sup) {
            let lower = if nullable { sub.make_not_null() } else { sub.clone() };
            if self.table.is_nothing(&lower) && nullable {
                return;
            }
            self.bounds.entry(variable).or_default().lower.push(lower);
            return;
        }
        if let Some((variable, nullable)) = self.variable(sub) {
            let upper = if nullable && sup.is_marked_nullable() {
                sup.make_not_null()
            } else {
                sup.clone()
            };
            self.bounds.entry(variable).or_default().upper.push(upper);
            return;
        }
        if !self.mentions_variables(sup) && !self.mentions_variables(sub) {
            return;
        }
        match (sub, sup) {
            (Type::Flexible { lower, .. }, _) => self.add_subtype(lower, sup),
            (_, Type::Flexible { upper, .. }) => self.add_subtype(sub, upper),
            (_, Type::Intersection(i)) => {
                for conjunct in i.conjuncts() {
                    self.add_subtype(sub, conjunct);
                }
            }
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
                for (a, b) in sub_params.iter().zip(sup_params) {
                    self.add_subtype(b, a);
                }
                if let (Some(a), Some(b)) = (sub_receiver, sup_receiver) {
                    self.add_subtype(b, a);
                }
                self.add_subtype(sub_return, sup_return);
            }
            (Type::Nominal { .. }, Type::Nominal { classifier, arguments, .. }) => {
                let Some(view) = self.table.find_supertype_of_class(&sub.make_not_null(), *classifier) else {
                    return;
                };
                self.add_argument_constraints(*classifier, view.arguments(), arguments);
            }
            _ => {}
        }
    }

    fn add_argument_constraints(
        &mut self,
        class: crate::symbols::ClassId,
        sub: &[TypeProjection],
        sup: &[TypeProjection],
    ) {
        let Some(symbol) = self.table.class(class) else {
            return;
        };
        let parameters = self.table.class_type_parameters(&symbol);
        for (index, (a, b)) in sub.iter().zip(sup).enumerate() {
            let declared = parameters
                .get(index)
                .and_then(|p| self.table.type_parameter(*p))
                .map(|p| p.variance)
                .unwrap_or_default();
            let (Some(a_type), Some(b_type)) = (a.type_arg(), b.type_arg()) else {
                continue;
            };
            let variance = match b {
                TypeProjection::Out(_) => Variance::Out,
                TypeProjection::In(_) => Variance::In,
                _ => declared,
            };
            match variance {
                Variance::Out => self.add_subtype(a_type, b_type),
                Variance::In => self.add_subtype(b_type, a_type),
                Variance::Invariant => self.add_equality(a_type, b_type),
            }
        }
    }

    pub fn add_equality(&mut self, a: &Type, b: &Type) {
        if a.contains_error() || b.contains_error() {
            return;
        }
        if let Some((variable, _)) = self.variable(a) {
            self.bounds.entry(variable).or_default().equal.push(b.clone());
            return;
        }
        if let Some((variable, _)) = self.variable(b) {
            self.bounds.entry(variable).or_default().equal.push(a.clone());
            return;
        }
        match (a, b) {
            (
                Type::Nominal {
                    classifier: x,
                    arguments: xs,
                    ..
                },
                Type::Nominal {
                    classifier: y,
                    arguments: ys,
                    ..
                },
            ) if x == y => {
                for (p, q) in xs.iter().zip(ys) {
                    if let (Some(p), Some(q)) = (p.type_arg(), q.type_arg()) {
                        self.add_equality(p, q);
                    }
                }
            }
            (Type::Function { .. }, Type::Function { .. }) => {
                self.add_subtype(a, b);
                self.add_subtype(b, a);
            }
            _ => {}
        }
    }

    /// A solution for every variable.
    pub fn solve(&self) -> Substitution {
        let mut solution = Substitution::new();
        for variable in &self.variables {
            let bounds = self.bounds.get(variable).cloned().unwrap_or_default();
            let chosen = if let Some(equal) = bounds.equal.first() {
                equal.clone()
            } else if !bounds.lower.is_empty() {
                self.table.common_supertype(&bounds.lower)
            } else if !bounds.upper.is_empty() {
                Type::intersection(bounds.upper.iter().cloned())
            } else {
                self.table.upper_bound(*variable)
            };
            solution.insert(*variable, chosen);
        }
        for _ in 0..self.variables.len() {
            let next = self.resubstitute(&solution);
            if next == solution {
                break;
            }
            solution = next;
        }
        trace!("solved {} variables", self.variables.len());
        solution
    }

    fn resubstitute(&self, solution: &Substitution) -> Substitution {
        let mut next = Substitution::new();
        for variable in &self.variables {
            if let Some(ty) = solution.lookup(*variable) {
                let substituted = if ty.mentions_parameter(*variable) {
                    ty.clone()
                } else {
                    ty.apply_subst(solution)
                };
                next.insert(*variable, substituted);
            }
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{project_with, top_level};
    use kestrel_syntax::builder::SourceBuilder;

    #[test]
    fn test_lower_bounds_join() {
        let (project, module) = project_with(vec![SourceBuilder::new("a.kt")
            .package("app")
            .function("pair", |f| f.type_parameter("T").param("a", "T").param("b", "T").returns("T"))]);
        let table = project.table().unwrap();
        let pair = top_level(&table, module, "app", "pair");
        let t = pair.type_parameters[0];
        let mut system = ConstraintSystem::new(&table, vec![t]);
        system.add_subtype(&table.builtin_type(table.builtins().int), &Type::parameter(t));
        system.add_subtype(&table.builtin_type(table.builtins().double), &Type::parameter(t));
        system.add_subtype(&table.nothing_type().make_nullable(), &Type::parameter(t));
        let solution = system.solve();
        assert_eq!(table.render(solution.lookup(t).unwrap()), "Number?");
    }

    #[test]
    fn test_structural_decomposition() {
        let (project, module) = project_with(vec![SourceBuilder::new("a.kt")
            .package("app")
            .function("first", |f| f.type_parameter("E").param("items", "List<E>").returns("E"))
            .function("fill", |f| f.type_parameter("E").param("items", "Array<E>").returns("E"))
            .function("apply", |f| f.type_parameter("R").param("f", "(Int) -> R").returns("R"))]);
        let table = project.table().unwrap();
        let int = table.builtin_type(table.builtins().int);

        let first = top_level(&table, module, "app", "first");
        let e = first.type_parameters[0];
        let mut system = ConstraintSystem::new(&table, vec![e]);
        let list_of_int = table.resolve_type_ref(
            &kestrel_syntax::TypeRef::parse("List<Int>").unwrap(),
            &table.callable_header_scope(&first),
            &mut crate::diagnostics::DiagnosticReporter::new(),
        );
        system.add_subtype(&list_of_int, &table.callable_header(&first).parameters[0]);
        assert_eq!(system.solve().lookup(e), Some(&int));

        let fill = top_level(&table, module, "app", "fill");
        let e = fill.type_parameters[0];
        let mut system = ConstraintSystem::new(&table, vec![e]);
        system.add_subtype(&table.array_of(int.clone()), &table.callable_header(&fill).parameters[0]);
        assert!(system.is_constrained(e));
        assert_eq!(system.solve().lookup(e), Some(&int));

        let apply = top_level(&table, module, "app", "apply");
        let r = apply.type_parameters[0];
        let mut system = ConstraintSystem::new(&table, vec![r]);
        let lambda = Type::function(vec![int.clone()], table.builtin_type(table.builtins().string));
        system.add_subtype(&lambda, &table.callable_header(&apply).parameters[0]);
        assert_eq!(table.render(system.solve().lookup(r).unwrap()), "String");
    }

    #[test]
    fn test_unconstrained_variable_takes_its_bound() {
        let (project, module) = project_with(vec![SourceBuilder::new("a.kt")
            .package("app")
            .function("make", |f| f.type_parameter_bounded("T", &["Number"]).returns("T"))
            .function("any", |f| f.type_parameter("T").returns("T"))]);
        let table = project.table().unwrap();
        let make = top_level(&table, module, "app", "make");
        let t = make.type_parameters[0];
        let system = ConstraintSystem::new(&table, vec![t]);
        assert!(!system.is_constrained(t));
        assert_eq!(table.render(system.solve().lookup(t).unwrap()), "Number");

        let any = top_level(&table, module, "app", "any");
        let t = any.type_parameters[0];
        let mut system = ConstraintSystem::new(&table, vec![t]);
        system.add_subtype(&Type::parameter(t), &table.builtin_type(table.builtins().string));
        assert_eq!(table.render(system.solve().lookup(t).unwrap()), "String");
    }
}
