//! Diagnostic records and reporting
//!
//! Diagnostics are immutable once reported. Reporting never fails and never
//! stops resolution; callers that want to stop on the first error inspect the
//! collected list themselves.

use crate::symbols::{CallableId, ClassId};
use crate::types::{NameRenderer, Type};
use kestrel_syntax::{FileId, Span, Symbol};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Which part of an element a diagnostic is reported on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositioningStrategy {
    Default,
    DeclarationName,
    DeclarationSignature,
    ReferenceName,
    SupertypeList,
    Operator,
}

/// The sub-ranges of a syntax element that positioning strategies choose from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ElementRanges {
    pub element: Span,
    pub name: Option<Span>,
    pub signature: Option<Span>,
    pub reference: Option<Span>,
    pub supertypes: Option<Span>,
    pub operator: Option<Span>,
}

impl ElementRanges {
    pub fn new(element: Span) -> Self {
        ElementRanges {
            element,
            ..ElementRanges::default()
        }
    }

    pub fn with_name(mut self, name: Span) -> Self {
        self.name = Some(name);
        self
    }

    pub fn with_signature(mut self, signature: Span) -> Self {
        self.signature = Some(signature);
        self
    }

    pub fn with_reference(mut self, reference: Span) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_supertypes(mut self, supertypes: Span) -> Self {
        self.supertypes = Some(supertypes);
        self
    }

    pub fn with_operator(mut self, operator: Span) -> Self {
        self.operator = Some(operator);
        self
    }
}

impl PositioningStrategy {
    /// Pick a range, falling back to the whole element.
    pub fn apply(self, ranges: &ElementRanges) -> Span {
        let chosen = match self {
            PositioningStrategy::Default => None,
            PositioningStrategy::DeclarationName => ranges.name,
            PositioningStrategy::DeclarationSignature => ranges.signature.or(ranges.name),
            PositioningStrategy::ReferenceName => ranges.reference.or(ranges.name),
            PositioningStrategy::SupertypeList => ranges.supertypes.or(ranges.name),
            PositioningStrategy::Operator => ranges.operator.or(ranges.reference),
        };
        chosen.unwrap_or(ranges.element)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticKind {
    UnresolvedReference,
    NoneApplicable,
    OverloadResolutionAmbiguity,
    TypeMismatch,
    TooManyArguments,
    NoValueForParameter,
    WrongNumberOfTypeArguments,
    UpperBoundViolated,
    CyclicInheritance,
    FinalSupertype,
    SupertypeNotAClassOrInterface,
    Deprecation,
    DeprecationError,
    InvisibleReference,
    UnsafeCall,
    RecursiveTypeProblem,
    DependsOnCycle,
    MissingDependency,
    InternalError,
}

/// Defaults attached to a diagnostic kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticFactory {
    pub name: &'static str,
    pub severity: Severity,
    pub positioning: PositioningStrategy,
}

impl DiagnosticKind {
    pub const ALL: [DiagnosticKind; 19] = [
        DiagnosticKind::UnresolvedReference,
        DiagnosticKind::NoneApplicable,
        DiagnosticKind::OverloadResolutionAmbiguity,
        DiagnosticKind::TypeMismatch,
        DiagnosticKind::TooManyArguments,
        DiagnosticKind::NoValueForParameter,
        DiagnosticKind::WrongNumberOfTypeArguments,
        DiagnosticKind::UpperBoundViolated,
        DiagnosticKind::CyclicInheritance,
        DiagnosticKind::FinalSupertype,
        DiagnosticKind::SupertypeNotAClassOrInterface,
        DiagnosticKind::Deprecation,
        DiagnosticKind::DeprecationError,
        DiagnosticKind::InvisibleReference,
        DiagnosticKind::UnsafeCall,
        DiagnosticKind::RecursiveTypeProblem,
        DiagnosticKind::DependsOnCycle,
        DiagnosticKind::MissingDependency,
        DiagnosticKind::InternalError,
    ];

    pub fn factory(self) -> DiagnosticFactory {
        use DiagnosticKind::*;
        use PositioningStrategy as P;
        use Severity::*;
        let (name, severity, positioning) = match self {
            UnresolvedReference => ("UNRESOLVED_REFERENCE", Error, P::ReferenceName),
            NoneApplicable => ("NONE_APPLICABLE", Error, P::ReferenceName),
            OverloadResolutionAmbiguity => ("OVERLOAD_RESOLUTION_AMBIGUITY", Error, P::ReferenceName),
            TypeMismatch => ("TYPE_MISMATCH", Error, P::Default),
            TooManyArguments => ("TOO_MANY_ARGUMENTS", Error, P::Default),
            NoValueForParameter => ("NO_VALUE_FOR_PARAMETER", Error, P::ReferenceName),
            WrongNumberOfTypeArguments => ("WRONG_NUMBER_OF_TYPE_ARGUMENTS", Error, P::Default),
            UpperBoundViolated => ("UPPER_BOUND_VIOLATED", Error, P::Default),
            CyclicInheritance => ("CYCLIC_INHERITANCE_HIERARCHY", Error, P::SupertypeList),
            FinalSupertype => ("FINAL_SUPERTYPE", Error, P::Default),
            SupertypeNotAClassOrInterface => ("SUPERTYPE_NOT_A_CLASS_OR_INTERFACE", Error, P::Default),
            Deprecation => ("DEPRECATION", Warning, P::ReferenceName),
            DeprecationError => ("DEPRECATION_ERROR", Error, P::ReferenceName),
            InvisibleReference => ("INVISIBLE_REFERENCE", Error, P::ReferenceName),
            UnsafeCall => ("UNSAFE_CALL", Error, P::Operator),
            RecursiveTypeProblem => ("TYPECHECKER_HAS_RUN_INTO_RECURSIVE_PROBLEM", Error, P::DeclarationName),
            DependsOnCycle => ("DEPENDS_ON_CYCLE", Error, P::Default),
            MissingDependency => ("MISSING_DEPENDENCY", Error, P::Default),
            InternalError => ("INTERNAL_ERROR", Error, P::DeclarationSignature),
        };
        DiagnosticFactory {
            name,
            severity,
            positioning,
        }
    }

    pub fn name(self) -> &'static str {
        self.factory().name
    }

    /// Kinds that represent an unresolved reference of some sort.
    pub fn is_unresolved(self) -> bool {
        matches!(
            self,
            DiagnosticKind::UnresolvedReference
                | DiagnosticKind::NoneApplicable
                | DiagnosticKind::InvisibleReference
                | DiagnosticKind::OverloadResolutionAmbiguity
        )
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed diagnostic parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticArg {
    Type(Type),
    Callable(CallableId),
    Class(ClassId),
    Name(Symbol),
    Count(usize),
    Text(String),
    Candidates(Vec<CallableId>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub positioning: PositioningStrategy,
    pub parameters: Vec<DiagnosticArg>,
    pub range: Span,
    /// `None` for project configuration diagnostics.
    pub unit: Option<FileId>,
}

impl Diagnostic {
    pub fn new(
        kind: DiagnosticKind,
        severity: Severity,
        positioning: PositioningStrategy,
        ranges: &ElementRanges,
        parameters: Vec<DiagnosticArg>,
    ) -> Self {
        let range = positioning.apply(ranges);
        Diagnostic {
            kind,
            severity,
            positioning,
            parameters,
            range,
            unit: Some(range.file),
        }
    }

    /// A diagnostic about project configuration rather than a source unit.
    pub fn configuration(kind: DiagnosticKind, parameters: Vec<DiagnosticArg>) -> Self {
        let factory = kind.factory();
        Diagnostic {
            kind,
            severity: factory.severity,
            positioning: PositioningStrategy::Default,
            parameters,
            range: Span::DUMMY,
            unit: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Collects diagnostics in report order.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticReporter {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(
        &mut self,
        kind: DiagnosticKind,
        severity: Severity,
        positioning: PositioningStrategy,
        ranges: &ElementRanges,
        parameters: Vec<DiagnosticArg>,
    ) {
        self.diagnostics
            .push(Diagnostic::new(kind, severity, positioning, ranges, parameters));
    }

    /// Report with the kind's default severity and positioning.
    pub fn report_default(&mut self, kind: DiagnosticKind, ranges: &ElementRanges, parameters: Vec<DiagnosticArg>) {
        let factory = kind.factory();
        self.report(kind, factory.severity, factory.positioning, ranges, parameters);
    }

    /// Report on an exact range.
    pub fn report_at(&mut self, kind: DiagnosticKind, range: Span, parameters: Vec<DiagnosticArg>) {
        let factory = kind.factory();
        self.report(kind, factory.severity, PositioningStrategy::Default, &ElementRanges::new(range), parameters);
    }

    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        self.diagnostics.extend(diagnostics);
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }
}

/// Names for everything a diagnostic parameter can mention.
pub trait SymbolRenderer: NameRenderer {
    fn callable_name(&self, callable: CallableId) -> String;
}

/// A diagnostic projected to text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedDiagnostic {
    pub severity: Severity,
    pub code: String,
    pub message: String,
    pub range: Span,
}

impl fmt::Display for RenderedDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}] {}: {}", self.severity, self.code, self.range, self.message)
    }
}

pub fn render(diagnostic: &Diagnostic, names: &dyn SymbolRenderer) -> RenderedDiagnostic {
    let args: Vec<String> = diagnostic.parameters.iter().map(|arg| render_arg(arg, names)).collect();
    let arg = |i: usize| args.get(i).cloned().unwrap_or_else(|| "?".to_string());
    let message = match diagnostic.kind {
        DiagnosticKind::UnresolvedReference => format!("Unresolved reference: {}", arg(0)),
        DiagnosticKind::NoneApplicable => {
            format!("None of the following candidates is applicable: {}", arg(0))
        }
        DiagnosticKind::OverloadResolutionAmbiguity => {
            format!("Overload resolution ambiguity between candidates: {}", arg(0))
        }
        DiagnosticKind::TypeMismatch => format!("Type mismatch: inferred type is {} but {} was expected", arg(1), arg(0)),
        DiagnosticKind::TooManyArguments => format!("Too many arguments for {}", arg(0)),
        DiagnosticKind::NoValueForParameter => format!("No value passed for parameter '{}'", arg(0)),
        DiagnosticKind::WrongNumberOfTypeArguments => {
            format!("{} type arguments expected for {}", arg(0), arg(1))
        }
        DiagnosticKind::UpperBoundViolated => {
            format!("Type argument is not within its bounds: {} is not a subtype of {}", arg(1), arg(0))
        }
        DiagnosticKind::CyclicInheritance => format!("There's a cycle in the inheritance hierarchy for {}", arg(0)),
        DiagnosticKind::FinalSupertype => format!("This type is final, so it cannot be inherited from: {}", arg(0)),
        DiagnosticKind::SupertypeNotAClassOrInterface => {
            format!("Only classes and interfaces may serve as supertypes: {}", arg(0))
        }
        DiagnosticKind::Deprecation | DiagnosticKind::DeprecationError => {
            let detail = arg(1);
            if detail.is_empty() {
                format!("'{}' is deprecated", arg(0))
            } else {
                format!("'{}' is deprecated. {}", arg(0), detail)
            }
        }
        DiagnosticKind::InvisibleReference => format!("Cannot access '{}': it is {}", arg(0), arg(1)),
        DiagnosticKind::UnsafeCall => format!(
            "Only safe (?.) calls are allowed on a nullable receiver of type {}",
            arg(0)
        ),
        DiagnosticKind::RecursiveTypeProblem => {
            format!("Type checking has run into a recursive problem while resolving {}", arg(0))
        }
        DiagnosticKind::DependsOnCycle => format!("dependsOn cycle between modules: {}", arg(0)),
        DiagnosticKind::MissingDependency => format!("Module {} depends on unknown module {}", arg(0), arg(1)),
        DiagnosticKind::InternalError => format!("Internal error during {}: {}", arg(0), arg(1)),
    };
    RenderedDiagnostic {
        severity: diagnostic.severity,
        code: diagnostic.kind.name().to_string(),
        message,
        range: diagnostic.range,
    }
}

fn render_arg(arg: &DiagnosticArg, names: &dyn SymbolRenderer) -> String {
    match arg {
        DiagnosticArg::Type(t) => t.display(names).to_string(),
        DiagnosticArg::Callable(c) => names.callable_name(*c),
        DiagnosticArg::Class(c) => names.class_name(*c),
        DiagnosticArg::Name(n) => n.to_string(),
        DiagnosticArg::Count(n) => n.to_string(),
        DiagnosticArg::Text(t) => t.clone(),
        DiagnosticArg::Candidates(candidates) => candidates
            .iter()
            .map(|c| names.callable_name(*c))
            .collect::<Vec<_>>()
            .join(", "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::{ModuleId, TypeParamId};

    struct Names;

    impl NameRenderer for Names {
        fn class_name(&self, class: ClassId) -> String {
            format!("C{}", class.index)
        }
        fn type_parameter_name(&self, parameter: TypeParamId) -> String {
            format!("T{}", parameter.index)
        }
    }

    impl SymbolRenderer for Names {
        fn callable_name(&self, callable: CallableId) -> String {
            format!("f{}", callable.index)
        }
    }

    fn span(start: u32, end: u32) -> Span {
        Span::from_offsets(FileId::new(1), start, end)
    }

    #[test]
    fn test_positioning_strategies() {
        let ranges = ElementRanges::new(span(0, 50))
            .with_name(span(4, 8))
            .with_supertypes(span(10, 20));
        assert_eq!(PositioningStrategy::Default.apply(&ranges), span(0, 50));
        assert_eq!(PositioningStrategy::DeclarationName.apply(&ranges), span(4, 8));
        assert_eq!(PositioningStrategy::DeclarationSignature.apply(&ranges), span(4, 8));
        assert_eq!(PositioningStrategy::SupertypeList.apply(&ranges), span(10, 20));
        assert_eq!(PositioningStrategy::Operator.apply(&ranges), span(0, 50));
    }

    #[test]
    fn test_reporter_keeps_order_and_defaults() {
        let mut reporter = DiagnosticReporter::new();
        assert!(!reporter.has_errors());

        let ranges = ElementRanges::new(span(0, 10)).with_reference(span(2, 3));
        reporter.report_default(DiagnosticKind::Deprecation, &ranges, vec![DiagnosticArg::Name(Symbol::intern("old"))]);
        assert!(!reporter.has_errors());
        reporter.report_default(
            DiagnosticKind::UnresolvedReference,
            &ranges,
            vec![DiagnosticArg::Name(Symbol::intern("missing"))],
        );
        assert!(reporter.has_errors());

        let kinds: Vec<_> = reporter.diagnostics().iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![DiagnosticKind::Deprecation, DiagnosticKind::UnresolvedReference]);
        assert_eq!(reporter.diagnostics()[1].range, span(2, 3));
        assert_eq!(reporter.diagnostics()[0].severity, Severity::Warning);
    }

    #[test]
    fn test_every_kind_has_a_factory() {
        for kind in DiagnosticKind::ALL {
            let factory = kind.factory();
            assert!(!factory.name.is_empty());
        }
        assert!(Severity::Info < Severity::Warning && Severity::Warning < Severity::Error);
    }

    #[test]
    fn test_render_messages() {
        let diagnostic = Diagnostic::new(
            DiagnosticKind::TypeMismatch,
            Severity::Error,
            PositioningStrategy::Default,
            &ElementRanges::new(span(1, 2)),
            vec![
                DiagnosticArg::Type(Type::simple(ClassId::new(ModuleId(0), 3), vec![])),
                DiagnosticArg::Type(Type::simple(ClassId::new(ModuleId(0), 4), vec![])),
            ],
        );
        let rendered = render(&diagnostic, &Names);
        assert_eq!(rendered.code, "TYPE_MISMATCH");
        assert_eq!(rendered.message, "Type mismatch: inferred type is C4 but C3 was expected");

        let ambiguity = Diagnostic::configuration(
            DiagnosticKind::OverloadResolutionAmbiguity,
            vec![DiagnosticArg::Candidates(vec![
                CallableId::new(ModuleId(1), 0),
                CallableId::new(ModuleId(1), 1),
            ])],
        );
        assert!(render(&ambiguity, &Names).message.ends_with("f0, f1"));
        assert_eq!(ambiguity.unit, None);
    }
}
