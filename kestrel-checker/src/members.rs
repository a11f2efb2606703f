//! Member scopes, overriding, visibility and deprecation.
//!
//! A class's member scope lists its own members first and then inherited
//! members in breadth-first supertype order. An inherited member is hidden
//! when a member already in the scope has the same name, kind and parameter
//! types as seen from the class.

use crate::scope::ScopeChain;
use crate::symbol_table::SymbolTable;
use crate::symbols::{CallableId, CallableKind, CallableSymbol, ClassId, ClassifierSymbol, ModuleId};
use crate::types::{Substitution, Type};
use kestrel_syntax::{Deprecated, FileId, Symbol, Visibility};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::trace;

/// A member reachable from a class, with the supertype it is inherited through.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberEntry {
    pub callable: CallableId,
    /// The declaring class as a supertype of the scope's class, in terms of
    /// the scope class's own type parameters.
    pub owner: Type,
}

#[derive(Debug, Clone)]
pub struct MemberScope {
    pub class: ClassId,
    by_name: HashMap<Symbol, Vec<MemberEntry>>,
}

impl MemberScope {
    pub fn named(&self, name: Symbol) -> &[MemberEntry] {
        self.by_name.get(&name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn names(&self) -> impl Iterator<Item = Symbol> + '_ {
        self.by_name.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.by_name.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl SymbolTable {
    /// Substitution that maps a member's declaring-class parameters for a member seen through `owner`.
    pub fn owner_substitution(&self, owner: &Type) -> Substitution {
        match owner.classifier() {
            Some(class) => self.class_substitution(class, owner.arguments()),
            None => Substitution::new(),
        }
    }

    /// Receiver and parameter types of a member as seen through `owner`.
    fn viewed_signature(&self, callable: &CallableSymbol, owner: &Type) -> (Option<Type>, Vec<Type>) {
        let subst = self.owner_substitution(owner);
        let header = self.callable_header(callable);
        (
            header.receiver.as_ref().map(|r| r.apply_subst(&subst)),
            header.parameters.iter().map(|p| p.apply_subst(&subst)).collect(),
        )
    }

    fn same_signature(&self, a: &(Option<Type>, Vec<Type>), b: &(Option<Type>, Vec<Type>)) -> bool {
        let receivers = match (&a.0, &b.0) {
            (Some(x), Some(y)) => self.is_equal_type(x, y),
            (None, None) => true,
            _ => false,
        };
        receivers && a.1.len() == b.1.len() && a.1.iter().zip(&b.1).all(|(x, y)| self.is_equal_type(x, y))
    }

    /// Whether `member` seen through `owner` overrides `other` seen through `other_owner`.
    fn overrides(&self, member: &CallableSymbol, owner: &Type, other: &CallableSymbol, other_owner: &Type) -> bool {
        if member.name != other.name || member.kind != other.kind || member.kind == CallableKind::Constructor {
            return false;
        }
        let mine = self.viewed_signature(member, owner);
        let theirs = self.viewed_signature(other, other_owner);
        self.same_signature(&mine, &theirs)
    }

    pub fn member_scope(&self, class: ClassId) -> Arc<MemberScope> {
        if let Some(scope) = self.member_scopes.get(&class) {
            return scope.clone();
        }
        let scope = Arc::new(self.build_member_scope(class));
        self.member_scopes.entry(class).or_insert(scope).clone()
    }

    fn build_member_scope(&self, class: ClassId) -> MemberScope {
        let mut by_name: HashMap<Symbol, Vec<MemberEntry>> = HashMap::new();
        let Some(symbol) = self.class(class) else {
            return MemberScope { class, by_name };
        };
        let self_type = self.default_type(&symbol);
        for member in symbol.members.iter().filter_map(|id| self.callable(*id)) {
            by_name.entry(member.name).or_default().push(MemberEntry {
                callable: member.id,
                owner: self_type.clone(),
            });
        }
        let mut supertypes = self
            .all_supertypes(&self_type, false, &crate::lifetime::NoCheckpoint)
            .unwrap_or_default();
        if class != self.builtins().any && !supertypes.iter().any(|t| self.is_any(t)) {
            supertypes.push(self.any_type());
        }
        for supertype in supertypes {
            let Some(declaring) = supertype.classifier().filter(|c| *c != class).and_then(|c| self.class(c)) else {
                continue;
            };
            let owner = supertype.make_not_null();
            for inherited in declaring.members.iter().filter_map(|id| self.callable(*id)) {
                let hidden = by_name.get(&inherited.name).is_some_and(|entries| {
                    entries.iter().any(|entry| {
                        self.callable(entry.callable)
                            .is_some_and(|present| self.overrides(&present, &entry.owner, &inherited, &owner))
                    })
                });
                if !hidden {
                    by_name.entry(inherited.name).or_default().push(MemberEntry {
                        callable: inherited.id,
                        owner: owner.clone(),
                    });
                }
            }
        }
        trace!("member scope of {} built", class);
        MemberScope { class, by_name }
    }

    /// Members of direct supertypes that `callable` overrides.
    pub fn overridden_symbols(&self, callable: &CallableSymbol) -> Arc<Vec<CallableId>> {
        if let Some(known) = self.overridden.get(&callable.id) {
            return known.clone();
        }
        let mut found = Vec::new();
        if let Some(class) = callable.containing_class.and_then(|id| self.class(id)) {
            let self_type = self.default_type(&class);
            for supertype in self.direct_supertypes(&self_type) {
                let Some(super_class) = supertype.classifier().filter(|c| *c != class.id) else {
                    continue;
                };
                let supertype = supertype.make_not_null();
                let view = self.owner_substitution(&supertype);
                for entry in self.member_scope(super_class).named(callable.name) {
                    let Some(candidate) = self.callable(entry.callable) else {
                        continue;
                    };
                    let owner = entry.owner.apply_subst(&view);
                    if self.overrides(callable, &self_type, &candidate, &owner) && !found.contains(&candidate.id) {
                        found.push(candidate.id);
                    }
                }
            }
        }
        let found = Arc::new(found);
        self.overridden.entry(callable.id).or_insert(found).clone()
    }

    /// Declared deprecation, or the weakest one when every overridden member is deprecated.
    pub fn deprecation_of(&self, callable: &CallableSymbol) -> Option<Deprecated> {
        self.deprecation_visiting(callable, &mut HashSet::new())
    }

    fn deprecation_visiting(&self, callable: &CallableSymbol, visiting: &mut HashSet<CallableId>) -> Option<Deprecated> {
        if let Some(declared) = &callable.declared_deprecation {
            return Some(declared.clone());
        }
        if callable.kind == CallableKind::Constructor {
            return callable
                .containing_class
                .and_then(|id| self.class(id))
                .and_then(|class| class.declared_deprecation.clone());
        }
        if !visiting.insert(callable.id) {
            return None;
        }
        let overridden = self.overridden_symbols(callable);
        if overridden.is_empty() {
            return None;
        }
        let mut weakest: Option<Deprecated> = None;
        for id in overridden.iter() {
            let inherited = self
                .callable(*id)
                .and_then(|symbol| self.deprecation_visiting(&symbol, visiting))?;
            if weakest.as_ref().map_or(true, |w| inherited.level < w.level) {
                weakest = Some(inherited);
            }
        }
        weakest
    }

    pub fn class_deprecation(&self, class: &ClassifierSymbol) -> Option<Deprecated> {
        class.declared_deprecation.clone()
    }

    fn internal_visible(&self, declaring: ModuleId, from: ModuleId) -> bool {
        if declaring == from {
            return true;
        }
        match self.module(from) {
            Some(entry) => entry.data.friends.contains(&declaring) || entry.data.depends_on.contains(&declaring),
            None => false,
        }
    }

    fn visibility_allows(
        &self,
        visibility: Visibility,
        container: Option<ClassId>,
        unit: Option<FileId>,
        module: ModuleId,
        scope: &ScopeChain,
    ) -> bool {
        match visibility {
            Visibility::Public => true,
            Visibility::Internal => self.internal_visible(module, scope.module),
            Visibility::Private => match container {
                Some(class) => scope.is_inside(class),
                None => unit.is_some() && scope.unit == unit,
            },
            Visibility::Protected => match container {
                Some(class) => scope
                    .enclosing_classes()
                    .iter()
                    .any(|enclosing| self.is_subclass(*enclosing, class)),
                None => false,
            },
        }
    }

    pub fn is_class_visible(&self, class: &ClassifierSymbol, scope: &ScopeChain) -> bool {
        let own = self.visibility_allows(
            class.declared_visibility,
            class.outer,
            class.source_unit(),
            class.id.module,
            scope,
        );
        own && class
            .outer
            .and_then(|id| self.class(id))
            .map_or(true, |outer| self.is_class_visible(&outer, scope))
    }

    pub fn is_callable_visible(&self, callable: &CallableSymbol, scope: &ScopeChain) -> bool {
        let own = self.visibility_allows(
            callable.declared_visibility,
            callable.containing_class,
            callable.source_unit(),
            callable.id.module,
            scope,
        );
        own && callable
            .containing_class
            .and_then(|id| self.class(id))
            .map_or(true, |class| self.is_class_visible(&class, scope))
    }
}
