//! End-to-end behaviour through the public API.

use kestrel::builder::{expr, SourceBuilder};
use kestrel::checker::types::{substitute, Substitution};
use kestrel::checker::{DiagnosticKind, ResolvedReference};
use kestrel::syntax::{Declaration, DeprecationLevel, ExprId};
use kestrel::{AnalysisConfig, AnalysisSession, ModuleId, ModuleKind, Project, SessionAccessError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

fn project(units: Vec<SourceBuilder>) -> (Project, ModuleId) {
    let mut project = Project::new("e2e", AnalysisConfig::default()).unwrap();
    let module = project.add_module("app", ModuleKind::Source).unwrap();
    for unit in units {
        project.add_unit(module, unit.build().unwrap()).unwrap();
    }
    (project, module)
}

/// Id of the body expression of the top-level function `name`.
fn body_of(project: &Project, module: ModuleId, name: &str) -> (kestrel::FileId, ExprId) {
    for unit in project.units(module) {
        for declaration in unit.declarations() {
            if let Declaration::Function(f) = declaration {
                if f.name.as_str() == name {
                    return (unit.id(), f.body.as_ref().unwrap().id);
                }
            }
        }
    }
    panic!("no function {}", name)
}

/// Rendered parameter types of the callable an expression resolved to.
fn target_parameters(session: &AnalysisSession, reference: Option<ResolvedReference>) -> Vec<String> {
    let Some(ResolvedReference::Callable(id)) = reference else {
        panic!("expected a callable, got {:?}", reference);
    };
    let symbol = session.callable_by_id(id).symbol().unwrap();
    let table = session.table().unwrap();
    table
        .callable_header(&symbol)
        .parameters
        .iter()
        .map(|t| table.render(t))
        .collect()
}

#[test]
fn supertype_closure_terminates_on_random_cyclic_graphs() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for round in 0..20 {
        let count = rng.gen_range(2..12);
        let mut builder = SourceBuilder::new("graph.kt").package("g");
        for i in 0..count {
            let parents: Vec<usize> = (0..rng.gen_range(0..3)).map(|_| rng.gen_range(0..count)).collect();
            builder = builder.interface(&format!("C{}", i), |mut c| {
                for parent in parents {
                    c = c.supertype(&format!("C{}", parent));
                }
                c
            });
        }
        let (project, module) = project(vec![builder]);
        let session = project.session(module).unwrap();
        let _guard = session.enter();
        for i in 0..count {
            let class = session.class(&format!("g.C{}", i)).unwrap().unwrap();
            let supertypes = class.all_supertypes(false).unwrap();
            let unique: HashSet<_> = supertypes.iter().map(|t| t.classifier()).collect();
            assert_eq!(unique.len(), supertypes.len(), "round {} class C{}", round, i);
            assert!(!unique.contains(&Some(class.id())), "round {} class C{} lists itself", round, i);
            assert!(supertypes.len() <= count);
        }
        let unit = project.units(module)[0].id();
        session.check_unit(unit).unwrap();
    }
}

#[test]
fn identity_substitution_changes_nothing() {
    let (project, module) = project(vec![SourceBuilder::new("a.kt")
        .package("app")
        .class("Pair", |c| c.type_parameter("A").type_parameter("B"))
        .class("Holder", |c| c.type_parameter("T").val_param("pair", "Pair<T, List<T>>?"))]);
    let session = project.session(module).unwrap();
    let _guard = session.enter();
    for name in ["app.Pair", "app.Holder"] {
        let class = session.class(name).unwrap().unwrap();
        let symbol = class.symbol().unwrap();
        let ty = class.default_type().unwrap();
        let identity = Substitution::identity(&symbol.type_parameters);
        assert_eq!(substitute(&ty, &identity), ty);
        assert_eq!(substitute(&ty.make_nullable(), &identity), ty.make_nullable());
    }
}

#[test]
fn phases_only_move_forward() {
    let (project, module) = project(vec![SourceBuilder::new("a.kt")
        .package("app")
        .class("Base", |c| c.open())
        .class("Derived", |c| c.supertype("Base").function("size", |f| f.returns("Int").body(expr::int(1))))]);
    let session = project.session(module).unwrap();
    let _guard = session.enter();
    let derived = session.class("app.Derived").unwrap().unwrap();
    let before = derived.symbol().unwrap().phase();
    derived.all_supertypes(false).unwrap();
    let after_supertypes = derived.symbol().unwrap().phase();
    session.check_unit(project.units(module)[0].id()).unwrap();
    let after_check = derived.symbol().unwrap().phase();
    assert!(before <= after_supertypes);
    assert!(after_supertypes <= after_check);
    assert_eq!(after_check, kestrel::checker::Phase::BodyResolved);
}

#[test]
fn most_specific_overload_wins_in_either_order() {
    for reversed in [false, true] {
        let mut builder = SourceBuilder::new("a.kt").package("app");
        let mut overloads = vec!["Int", "Number"];
        if reversed {
            overloads.reverse();
        }
        for parameter in overloads {
            builder = builder.function("f", |f| f.param("x", parameter).returns("Unit"));
        }
        builder = builder.function("g", |f| f.body(expr::call("f", vec![expr::int(1)])));
        let (project, module) = project(vec![builder]);
        let (unit, call) = body_of(&project, module, "g");
        let session = project.session(module).unwrap();
        let _guard = session.enter();
        let target = session.resolved_symbol_of(unit, call).unwrap();
        assert_eq!(target_parameters(&session, target), vec!["Int"]);
    }
}

#[test]
fn string_overload_beats_any() {
    let (project, module) = project(vec![SourceBuilder::new("a.kt")
        .package("app")
        .function("f", |f| f.param("x", "Any").returns("Int"))
        .function("f", |f| f.param("x", "String").returns("String"))
        .function("g", |f| f.body(expr::call("f", vec![expr::string("s")])))]);
    let (unit, call) = body_of(&project, module, "g");
    let session = project.session(module).unwrap();
    let _guard = session.enter();
    let target = session.resolved_symbol_of(unit, call).unwrap();
    assert_eq!(target_parameters(&session, target), vec!["String"]);
    let ty = session.resolved_type_of(unit, call).unwrap().unwrap();
    assert_eq!(session.table().unwrap().render(&ty), "String");
}

#[test]
fn modification_invalidates_open_sessions() {
    let (mut project, module) = project(vec![SourceBuilder::new("a.kt").package("app").class("A", |c| c)]);
    let session = project.session(module).unwrap();
    let file = project.units(module)[0].id();
    project
        .update_unit(file, SourceBuilder::new("a.kt").package("app").class("B", |c| c).build().unwrap())
        .unwrap();

    let _guard = session.enter();
    match session.class("app.A") {
        Err(kestrel::ResolutionError::Session(error @ SessionAccessError::Invalid { .. })) => {
            assert!(!error.reason().is_empty());
            assert!(!error.to_string().is_empty());
        }
        other => panic!("expected an invalid session, got {:?}", other.map(|c| c.map(|c| c.id()))),
    }

    let fresh = project.session(module).unwrap();
    let _fresh_guard = fresh.enter();
    assert!(fresh.class("app.B").unwrap().is_some());
}

#[test]
fn one_unresolved_reference_among_ten_declarations() {
    let mut builder = SourceBuilder::new("a.kt").package("app");
    for i in 0..9 {
        builder = builder.function(&format!("ok{}", i), |f| f.returns("Int").body(expr::int(i)));
    }
    builder = builder.function("broken", |f| f.returns("Int").body(expr::call("nowhere", vec![])));
    let (project, module) = project(vec![builder]);
    let session = project.session(module).unwrap();
    let _guard = session.enter();
    let analysis = session.check_unit(project.units(module)[0].id()).unwrap();

    assert_eq!(analysis.declarations.len(), 10);
    let unresolved: Vec<_> = analysis
        .diagnostics()
        .filter(|d| d.kind == DiagnosticKind::UnresolvedReference)
        .collect();
    assert_eq!(unresolved.len(), 1);
    assert_eq!(analysis.declarations.iter().filter(|d| d.is_clean()).count(), 9);
}

#[test]
fn implicit_root_is_not_materialised() {
    let (project, module) = project(vec![SourceBuilder::new("a.kt")
        .package("app")
        .class("Base", |c| c.open())
        .class("Derived", |c| c.supertype("Base").supertype("Comparable<Base>"))]);
    let session = project.session(module).unwrap();
    let _guard = session.enter();
    let derived = session.class("app.Derived").unwrap().unwrap();
    let rendered: HashSet<String> = derived
        .all_supertypes(false)
        .unwrap()
        .iter()
        .map(|t| derived.render(t).unwrap())
        .collect();
    let expected: HashSet<String> = ["Base", "Comparable<Base>"].iter().map(|s| s.to_string()).collect();
    assert_eq!(rendered, expected);
}

#[test]
fn hidden_members_are_unresolved() {
    let (project, module) = project(vec![SourceBuilder::new("a.kt")
        .package("app")
        .class("Api", |c| {
            c.function("gone", |f| f.deprecated(DeprecationLevel::Hidden, "removed").returns("Int"))
                .function("old", |f| f.deprecated(DeprecationLevel::Warning, "use new").returns("Int"))
        })
        .function("hidden", |f| f.param("api", "Api").body(expr::call_on(expr::name("api"), "gone", vec![])))
        .function("warned", |f| f.param("api", "Api").body(expr::call_on(expr::name("api"), "old", vec![])))]);
    let session = project.session(module).unwrap();
    let _guard = session.enter();
    let analysis = session.check_unit(project.units(module)[0].id()).unwrap();
    let kinds: Vec<DiagnosticKind> = analysis.diagnostics().map(|d| d.kind).collect();
    assert_eq!(kinds, vec![DiagnosticKind::UnresolvedReference, DiagnosticKind::Deprecation]);

    let (unit, call) = body_of(&project, module, "hidden");
    assert_eq!(session.resolved_symbol_of(unit, call).unwrap(), None);
}

#[test]
fn manifest_projects_check_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let tree = SourceBuilder::new("main.kt")
        .package("app")
        .function("main", |f| f.body(expr::call("missing", vec![])))
        .build()
        .unwrap();
    std::fs::write(dir.path().join("main.json"), serde_json::to_string(&tree).unwrap()).unwrap();
    std::fs::write(
        dir.path().join("kestrel.toml"),
        "name = \"disk\"\n\n[[module]]\nname = \"app\"\nsources = [\"main.json\"]\n",
    )
    .unwrap();

    let results = kestrel::check_project(&dir.path().join("kestrel.toml")).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].error_count(), 1);
}
