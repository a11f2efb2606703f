//! Built-in library
//!
//! The `kestrel` package every module sees: the root and bottom types, the
//! primitive classes, and a few collection and top-level helpers. It is served
//! through the same metadata path as any other library.

use crate::providers::{
    JsonLibraryMetadata, LibraryCallable, LibraryClassifier, LibraryDescription, SerializedCallable,
    SerializedClassifier, SerializedParameter,
};
use crate::symbols::CallableKind;
use kestrel_syntax::{
    ClassKind, Modality, Modifiers, QualifiedName, Span, Symbol, SyntaxError, TypeParameterDecl, TypeRef, Variance,
};

pub const BUILTINS_MODULE_NAME: &str = "<builtins>";
pub const BUILTINS_PACKAGE: &str = "kestrel";

/// Simple names of the classifiers every analysis needs.
pub const CORE_CLASSES: [&str; 10] = [
    "Any", "Nothing", "Unit", "Number", "Int", "Long", "Double", "Char", "String", "Boolean",
];

struct LibraryBuilder {
    package: QualifiedName,
    description: LibraryDescription,
}

struct ClassSpec {
    classifier: SerializedClassifier,
    supertypes: Vec<TypeRef>,
}

impl ClassSpec {
    fn supertype(mut self, text: &str) -> Result<Self, SyntaxError> {
        self.supertypes.push(TypeRef::parse(text)?);
        Ok(self)
    }

    fn type_parameter(mut self, name: &str, variance: Variance) -> Self {
        self.classifier.type_parameters.push(TypeParameterDecl {
            name: Symbol::intern(name),
            variance,
            bounds: Vec::new(),
            reified: false,
            span: Span::DUMMY,
        });
        self
    }

    fn member(mut self, member: SerializedCallable) -> Self {
        self.classifier.members.push(member);
        self
    }

    fn constructor(mut self, parameters: Vec<SerializedParameter>) -> Self {
        let name = self.classifier.name.last().unwrap_or_else(|| Symbol::intern("<anonymous>"));
        self.classifier.constructors.push(SerializedCallable {
            name,
            kind: CallableKind::Constructor,
            modifiers: Modifiers::default(),
            type_parameters: Vec::new(),
            receiver: None,
            parameters,
            return_type: None,
        });
        self
    }
}

fn parameter(name: &str, text: &str) -> Result<SerializedParameter, SyntaxError> {
    Ok(SerializedParameter {
        name: Symbol::intern(name),
        type_ref: TypeRef::parse(text)?,
        has_default: false,
        vararg: false,
    })
}

fn vararg(name: &str, text: &str) -> Result<SerializedParameter, SyntaxError> {
    Ok(SerializedParameter {
        vararg: true,
        ..parameter(name, text)?
    })
}

fn callable(
    kind: CallableKind,
    name: &str,
    parameters: Vec<SerializedParameter>,
    returns: &str,
    modality: Option<Modality>,
) -> Result<SerializedCallable, SyntaxError> {
    Ok(SerializedCallable {
        name: Symbol::intern(name),
        kind,
        modifiers: Modifiers {
            modality,
            ..Modifiers::default()
        },
        type_parameters: Vec::new(),
        receiver: None,
        parameters,
        return_type: Some(TypeRef::parse(returns)?),
    })
}

fn function(name: &str, parameters: Vec<SerializedParameter>, returns: &str) -> Result<SerializedCallable, SyntaxError> {
    callable(CallableKind::Function, name, parameters, returns, None)
}

fn operator(name: &str, parameters: Vec<SerializedParameter>, returns: &str) -> Result<SerializedCallable, SyntaxError> {
    let mut f = function(name, parameters, returns)?;
    f.modifiers.is_operator = true;
    Ok(f)
}

fn open(mut callable: SerializedCallable) -> SerializedCallable {
    callable.modifiers.modality = Some(Modality::Open);
    callable
}

fn property(name: &str, returns: &str) -> Result<SerializedCallable, SyntaxError> {
    callable(CallableKind::Property, name, Vec::new(), returns, None)
}

fn generic(mut callable: SerializedCallable, parameters: &[&str]) -> SerializedCallable {
    callable.type_parameters = parameters
        .iter()
        .map(|name| TypeParameterDecl {
            name: Symbol::intern(name),
            variance: Variance::Invariant,
            bounds: Vec::new(),
            reified: false,
            span: Span::DUMMY,
        })
        .collect();
    callable
}

impl LibraryBuilder {
    fn new(package: &str) -> Self {
        LibraryBuilder {
            package: QualifiedName::parse(package),
            description: LibraryDescription::default(),
        }
    }

    fn class(&self, name: &str, kind: ClassKind, modality: Option<Modality>) -> ClassSpec {
        ClassSpec {
            classifier: SerializedClassifier {
                name: self.package.child(Symbol::intern(name)),
                kind,
                modifiers: Modifiers {
                    modality,
                    ..Modifiers::default()
                },
                type_parameters: Vec::new(),
                members: Vec::new(),
                constructors: Vec::new(),
            },
            supertypes: Vec::new(),
        }
    }

    fn add(&mut self, spec: ClassSpec) {
        self.description.classifiers.push(LibraryClassifier {
            classifier: spec.classifier,
            supertypes: spec.supertypes,
        });
    }

    fn top_level(&mut self, callable: SerializedCallable) {
        self.description.callables.push(LibraryCallable {
            package: self.package.clone(),
            callable,
        });
    }
}

/// Description of the builtin `kestrel` package.
pub fn builtin_library() -> Result<LibraryDescription, SyntaxError> {
    use ClassKind::*;
    let mut lib = LibraryBuilder::new(BUILTINS_PACKAGE);

    let any = lib
        .class("Any", Class, Some(Modality::Open))
        .constructor(Vec::new())
        .member(open(operator("equals", vec![parameter("other", "Any?")?], "Boolean")?))
        .member(callable(CallableKind::Function, "hashCode", Vec::new(), "Int", Some(Modality::Open))?)
        .member(callable(CallableKind::Function, "toString", Vec::new(), "String", Some(Modality::Open))?);
    lib.add(any);
    lib.add(lib.class("Nothing", Class, None));
    lib.add(lib.class("Unit", Object, None));

    let number = lib
        .class("Number", Class, Some(Modality::Abstract))
        .member(callable(CallableKind::Function, "toInt", Vec::new(), "Int", Some(Modality::Abstract))?)
        .member(callable(CallableKind::Function, "toDouble", Vec::new(), "Double", Some(Modality::Abstract))?);
    lib.add(number);

    for numeric in ["Int", "Long", "Double"] {
        let spec = lib
            .class(numeric, Class, None)
            .supertype("Number")?
            .supertype(&format!("Comparable<{}>", numeric))?
            .member(operator("plus", vec![parameter("other", numeric)?], numeric)?)
            .member(operator("minus", vec![parameter("other", numeric)?], numeric)?)
            .member(operator("times", vec![parameter("other", numeric)?], numeric)?)
            .member(operator("compareTo", vec![parameter("other", numeric)?], "Int")?)
            .member(function("toInt", Vec::new(), "Int")?)
            .member(function("toDouble", Vec::new(), "Double")?);
        lib.add(spec);
    }

    let char_class = lib
        .class("Char", Class, None)
        .supertype("Comparable<Char>")?
        .member(operator("compareTo", vec![parameter("other", "Char")?], "Int")?);
    lib.add(char_class);

    let string = lib
        .class("String", Class, None)
        .supertype("Comparable<String>")?
        .supertype("CharSequence")?
        .member(operator("plus", vec![parameter("other", "Any?")?], "String")?)
        .member(operator("compareTo", vec![parameter("other", "String")?], "Int")?)
        .member(property("length", "Int")?);
    lib.add(string);

    let boolean = lib
        .class("Boolean", Class, None)
        .member(operator("not", Vec::new(), "Boolean")?)
        .member(function("and", vec![parameter("other", "Boolean")?], "Boolean")?);
    lib.add(boolean);

    let comparable = lib
        .class("Comparable", Interface, None)
        .type_parameter("T", Variance::In)
        .member(callable(
            CallableKind::Function,
            "compareTo",
            vec![parameter("other", "T")?],
            "Int",
            Some(Modality::Abstract),
        )?);
    lib.add(comparable);

    let char_sequence = lib
        .class("CharSequence", Interface, None)
        .member(callable(CallableKind::Property, "length", Vec::new(), "Int", Some(Modality::Abstract))?);
    lib.add(char_sequence);

    let array = lib
        .class("Array", Class, None)
        .type_parameter("T", Variance::Invariant)
        .member(property("size", "Int")?)
        .member(operator("get", vec![parameter("index", "Int")?], "T")?);
    lib.add(array);

    let list = lib
        .class("List", Interface, None)
        .type_parameter("E", Variance::Out)
        .member(callable(CallableKind::Property, "size", Vec::new(), "Int", Some(Modality::Abstract))?)
        .member(callable(
            CallableKind::Function,
            "get",
            vec![parameter("index", "Int")?],
            "E",
            Some(Modality::Abstract),
        )?);
    lib.add(list);

    lib.top_level(function("println", vec![parameter("message", "Any?")?], "Unit")?);
    lib.top_level(function("error", vec![parameter("message", "Any")?], "Nothing")?);
    lib.top_level(generic(function("listOf", vec![vararg("elements", "T")?], "List<T>")?, &["T"]));
    lib.top_level(generic(function("emptyList", Vec::new(), "List<T>")?, &["T"]));
    lib.top_level(generic(function("arrayOf", vec![vararg("elements", "T")?], "Array<T>")?, &["T"]));
    lib.top_level(generic(function("maxOf", vec![parameter("a", "T")?, parameter("b", "T")?], "T")?, &["T"]));

    Ok(lib.description)
}

pub fn builtin_metadata() -> Result<JsonLibraryMetadata, SyntaxError> {
    Ok(JsonLibraryMetadata::from_description(builtin_library()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::BinaryMetadata;

    #[test]
    fn test_core_classes_exist() {
        let metadata = builtin_metadata().unwrap();
        for name in CORE_CLASSES {
            let qualified = format!("{}.{}", BUILTINS_PACKAGE, name);
            assert!(metadata.classifier_by_qualified_name(&qualified).is_some(), "{}", qualified);
        }
    }

    #[test]
    fn test_int_supertypes() {
        let metadata = builtin_metadata().unwrap();
        let int = metadata.classifier_by_qualified_name("kestrel.Int").unwrap();
        let supertypes: Vec<String> = metadata
            .supertypes_of(&int.handle())
            .iter()
            .map(|t| t.to_string())
            .collect();
        assert_eq!(supertypes, vec!["Number".to_string(), "Comparable<Int>".to_string()]);
        assert!(metadata.supertypes_of(&metadata.classifier_by_qualified_name("kestrel.Any").unwrap().handle()).is_empty());
    }

    #[test]
    fn test_top_level_helpers() {
        let metadata = builtin_metadata().unwrap();
        let list_of = metadata.top_level_callables("kestrel", "listOf");
        assert_eq!(list_of.len(), 1);
        assert!(list_of[0].parameters[0].vararg);
        assert_eq!(list_of[0].type_parameters.len(), 1);
        assert!(metadata.top_level_callables("kestrel", "nope").is_empty());
    }

    #[test]
    fn test_description_survives_json() {
        let description = builtin_library().unwrap();
        let json = serde_json::to_string(&description).unwrap();
        let back = JsonLibraryMetadata::from_json(&json).unwrap();
        assert_eq!(back.description(), &description);
    }
}
