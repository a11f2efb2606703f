//! Unresolved type references.
//!
//! A [`TypeRef`] is the syntactic form of a type as written in a declaration:
//! names are not yet bound to classifiers. Type references are exchanged as
//! text (`Map<String, List<out Int>?>`, `suspend Int.(String) -> Unit`,
//! `(A & B)?`), so the small parser in this module is also what reads them back
//! from serialized trees and library metadata.

use crate::error::{Result, SyntaxError};
use crate::span::Span;
use crate::symbol::{QualifiedName, Symbol};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TypeRef {
    pub kind: TypeRefKind,
    pub nullable: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRefKind {
    Named {
        name: QualifiedName,
        arguments: Vec<TypeArgumentRef>,
    },
    Function {
        context_receivers: Vec<TypeRef>,
        receiver: Option<Box<TypeRef>>,
        parameters: Vec<TypeRef>,
        return_type: Box<TypeRef>,
        is_suspend: bool,
    },
    Intersection(Vec<TypeRef>),
}

/// A use-site type argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeArgumentRef {
    Invariant(TypeRef),
    In(TypeRef),
    Out(TypeRef),
    Star,
}

impl TypeArgumentRef {
    pub fn type_ref(&self) -> Option<&TypeRef> {
        match self {
            TypeArgumentRef::Invariant(t) | TypeArgumentRef::In(t) | TypeArgumentRef::Out(t) => Some(t),
            TypeArgumentRef::Star => None,
        }
    }

    fn type_ref_mut(&mut self) -> Option<&mut TypeRef> {
        match self {
            TypeArgumentRef::Invariant(t) | TypeArgumentRef::In(t) | TypeArgumentRef::Out(t) => Some(t),
            TypeArgumentRef::Star => None,
        }
    }
}

impl TypeRef {
    pub fn named(name: &str, arguments: Vec<TypeArgumentRef>) -> Self {
        TypeRef {
            kind: TypeRefKind::Named {
                name: QualifiedName::parse(name),
                arguments,
            },
            nullable: false,
            span: Span::DUMMY,
        }
    }

    /// Parse the textual form of a type reference.
    pub fn parse(text: &str) -> Result<TypeRef> {
        let tokens = tokenize(text)?;
        let mut parser = TypeRefParser {
            text,
            tokens,
            position: 0,
        };
        let parsed = parser.parse_type()?;
        match parser.peek() {
            None => Ok(parsed),
            Some(token) => Err(parser.error_at(token.column, "unexpected trailing input")),
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// The simple name of a named reference.
    pub fn simple_name(&self) -> Option<Symbol> {
        match &self.kind {
            TypeRefKind::Named { name, .. } => name.last(),
            _ => None,
        }
    }

    /// Assign `span` to this reference and every nested reference lacking one.
    pub fn fill_spans(&mut self, span: Span) {
        if self.span.is_dummy() {
            self.span = span;
        }
        let span = self.span;
        match &mut self.kind {
            TypeRefKind::Named { arguments, .. } => {
                for argument in arguments.iter_mut().filter_map(TypeArgumentRef::type_ref_mut) {
                    argument.fill_spans(span);
                }
            }
            TypeRefKind::Function {
                context_receivers,
                receiver,
                parameters,
                return_type,
                ..
            } => {
                for t in context_receivers.iter_mut().chain(parameters.iter_mut()) {
                    t.fill_spans(span);
                }
                if let Some(receiver) = receiver {
                    receiver.fill_spans(span);
                }
                return_type.fill_spans(span);
            }
            TypeRefKind::Intersection(conjuncts) => {
                for t in conjuncts {
                    t.fill_spans(span);
                }
            }
        }
    }
}

impl TryFrom<String> for TypeRef {
    type Error = SyntaxError;

    fn try_from(text: String) -> Result<Self> {
        TypeRef::parse(&text)
    }
}

impl From<TypeRef> for String {
    fn from(type_ref: TypeRef) -> String {
        type_ref.to_string()
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TypeRefKind::Named { name, arguments } => {
                write!(f, "{}", name)?;
                if !arguments.is_empty() {
                    f.write_str("<")?;
                    for (i, argument) in arguments.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{}", argument)?;
                    }
                    f.write_str(">")?;
                }
                if self.nullable {
                    f.write_str("?")?;
                }
                Ok(())
            }
            TypeRefKind::Function {
                context_receivers,
                receiver,
                parameters,
                return_type,
                is_suspend,
            } => {
                if self.nullable {
                    f.write_str("(")?;
                }
                if *is_suspend {
                    f.write_str("suspend ")?;
                }
                if !context_receivers.is_empty() {
                    f.write_str("context(")?;
                    write_list(f, context_receivers)?;
                    f.write_str(") ")?;
                }
                if let Some(receiver) = receiver {
                    if matches!(receiver.kind, TypeRefKind::Named { .. }) {
                        write!(f, "{}.", receiver)?;
                    } else {
                        write!(f, "({}).", receiver)?;
                    }
                }
                f.write_str("(")?;
                write_list(f, parameters)?;
                write!(f, ") -> {}", return_type)?;
                if self.nullable {
                    f.write_str(")?")?;
                }
                Ok(())
            }
            TypeRefKind::Intersection(conjuncts) => {
                if self.nullable {
                    f.write_str("(")?;
                }
                for (i, conjunct) in conjuncts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" & ")?;
                    }
                    write!(f, "{}", conjunct)?;
                }
                if self.nullable {
                    f.write_str(")?")?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for TypeArgumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeArgumentRef::Invariant(t) => write!(f, "{}", t),
            TypeArgumentRef::In(t) => write!(f, "in {}", t),
            TypeArgumentRef::Out(t) => write!(f, "out {}", t),
            TypeArgumentRef::Star => f.write_str("*"),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, types: &[TypeRef]) -> fmt::Result {
    for (i, t) in types.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", t)?;
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Dot,
    Comma,
    Lt,
    Gt,
    LParen,
    RParen,
    Arrow,
    Question,
    Amp,
    Star,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    column: usize,
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some((column, c)) = chars.next() {
        let tok = match c {
            c if c.is_whitespace() => continue,
            '.' => Tok::Dot,
            ',' => Tok::Comma,
            '<' => Tok::Lt,
            '>' => Tok::Gt,
            '(' => Tok::LParen,
            ')' => Tok::RParen,
            '?' => Tok::Question,
            '&' => Tok::Amp,
            '*' => Tok::Star,
            '-' => match chars.next() {
                Some((_, '>')) => Tok::Arrow,
                _ => return Err(SyntaxError::type_reference(text, column, "expected `->`")),
            },
            c if c.is_alphabetic() || c == '_' || c == '`' => {
                let mut ident = String::new();
                if c != '`' {
                    ident.push(c);
                }
                while let Some(&(_, next)) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' {
                        ident.push(next);
                        chars.next();
                    } else if next == '`' {
                        chars.next();
                        break;
                    } else {
                        break;
                    }
                }
                Tok::Ident(ident)
            }
            other => {
                return Err(SyntaxError::type_reference(
                    text,
                    column,
                    format!("unexpected character `{}`", other),
                ))
            }
        };
        tokens.push(Token { tok, column });
    }
    Ok(tokens)
}

struct TypeRefParser<'a> {
    text: &'a str,
    tokens: Vec<Token>,
    position: usize,
}

impl<'a> TypeRefParser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn peek_tok(&self, offset: usize) -> Option<&Tok> {
        self.tokens.get(self.position + offset).map(|t| &t.tok)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn column(&self) -> usize {
        self.peek().map(|t| t.column).unwrap_or(self.text.len())
    }

    fn error_at(&self, column: usize, message: &str) -> SyntaxError {
        SyntaxError::type_reference(self.text, column, message)
    }

    fn expect(&mut self, expected: Tok, what: &str) -> Result<()> {
        match self.bump() {
            Some(token) if token.tok == expected => Ok(()),
            Some(token) => Err(self.error_at(token.column, &format!("expected {}", what))),
            None => Err(self.error_at(self.text.len(), &format!("expected {}, found end of input", what))),
        }
    }

    fn parse_type(&mut self) -> Result<TypeRef> {
        let first = self.parse_nullable()?;
        if self.peek_tok(0) != Some(&Tok::Amp) {
            return Ok(first);
        }
        let mut conjuncts = vec![first];
        while self.peek_tok(0) == Some(&Tok::Amp) {
            self.bump();
            conjuncts.push(self.parse_nullable()?);
        }
        Ok(TypeRef {
            kind: TypeRefKind::Intersection(conjuncts),
            nullable: false,
            span: Span::DUMMY,
        })
    }

    fn parse_nullable(&mut self) -> Result<TypeRef> {
        let is_suspend = matches!(self.peek_tok(0), Some(Tok::Ident(s)) if s == "suspend")
            && matches!(self.peek_tok(1), Some(Tok::LParen) | Some(Tok::Ident(_)));
        if is_suspend {
            self.bump();
        }

        let mut context_receivers = Vec::new();
        if matches!(self.peek_tok(0), Some(Tok::Ident(s)) if s == "context")
            && self.peek_tok(1) == Some(&Tok::LParen)
        {
            self.bump();
            self.bump();
            context_receivers = self.parse_type_list(Tok::RParen)?;
        }

        let mut result = self.parse_primary()?;

        // `Receiver.(Params) -> Return`
        if self.peek_tok(0) == Some(&Tok::Dot) && self.peek_tok(1) == Some(&Tok::LParen) {
            self.bump();
            self.bump();
            let parameters = self.parse_type_list(Tok::RParen)?;
            result = self.finish_function(Some(result), parameters, context_receivers, is_suspend)?;
        } else if let TypeRefKind::Function {
            context_receivers: existing,
            is_suspend: suspend,
            ..
        } = &mut result.kind
        {
            if !context_receivers.is_empty() {
                *existing = context_receivers;
            }
            *suspend |= is_suspend;
        } else if is_suspend || !context_receivers.is_empty() {
            return Err(self.error_at(self.column(), "modifiers are only allowed on function types"));
        }

        while self.peek_tok(0) == Some(&Tok::Question) {
            self.bump();
            result.nullable = true;
        }
        Ok(result)
    }

    fn parse_primary(&mut self) -> Result<TypeRef> {
        match self.peek_tok(0) {
            Some(Tok::LParen) => {
                self.bump();
                let inner = self.parse_type_list(Tok::RParen)?;
                if self.peek_tok(0) == Some(&Tok::Arrow) {
                    return self.finish_function(None, inner, Vec::new(), false);
                }
                let mut inner = inner.into_iter();
                match (inner.next(), inner.next()) {
                    (Some(single), None) => Ok(single),
                    _ => Err(self.error_at(self.column(), "expected `->` after parameter list")),
                }
            }
            Some(Tok::Ident(_)) => self.parse_named(),
            _ => Err(self.error_at(self.column(), "expected a type")),
        }
    }

    fn finish_function(
        &mut self,
        receiver: Option<TypeRef>,
        parameters: Vec<TypeRef>,
        context_receivers: Vec<TypeRef>,
        is_suspend: bool,
    ) -> Result<TypeRef> {
        self.expect(Tok::Arrow, "`->`")?;
        let return_type = self.parse_type()?;
        Ok(TypeRef {
            kind: TypeRefKind::Function {
                context_receivers,
                receiver: receiver.map(Box::new),
                parameters,
                return_type: Box::new(return_type),
                is_suspend,
            },
            nullable: false,
            span: Span::DUMMY,
        })
    }

    /// Comma separated types up to and including `close`.
    fn parse_type_list(&mut self, close: Tok) -> Result<Vec<TypeRef>> {
        let mut types = Vec::new();
        if self.peek_tok(0) == Some(&close) {
            self.bump();
            return Ok(types);
        }
        loop {
            types.push(self.parse_type()?);
            match self.bump() {
                Some(Token { tok: Tok::Comma, .. }) => continue,
                Some(token) if token.tok == close => return Ok(types),
                Some(token) => return Err(self.error_at(token.column, "expected `,` or closing delimiter")),
                None => return Err(self.error_at(self.text.len(), "unterminated list")),
            }
        }
    }

    fn parse_named(&mut self) -> Result<TypeRef> {
        let mut segments = Vec::new();
        loop {
            match self.bump() {
                Some(Token { tok: Tok::Ident(name), .. }) => segments.push(Symbol::intern(&name)),
                Some(token) => return Err(self.error_at(token.column, "expected an identifier")),
                None => return Err(self.error_at(self.text.len(), "expected an identifier")),
            }
            let continues = self.peek_tok(0) == Some(&Tok::Dot) && matches!(self.peek_tok(1), Some(Tok::Ident(_)));
            if !continues {
                break;
            }
            self.bump();
        }

        let mut arguments = Vec::new();
        if self.peek_tok(0) == Some(&Tok::Lt) {
            self.bump();
            loop {
                arguments.push(self.parse_argument()?);
                match self.bump() {
                    Some(Token { tok: Tok::Comma, .. }) => continue,
                    Some(Token { tok: Tok::Gt, .. }) => break,
                    Some(token) => return Err(self.error_at(token.column, "expected `,` or `>`")),
                    None => return Err(self.error_at(self.text.len(), "unterminated type argument list")),
                }
            }
        }

        Ok(TypeRef {
            kind: TypeRefKind::Named {
                name: QualifiedName::new(segments),
                arguments,
            },
            nullable: false,
            span: Span::DUMMY,
        })
    }

    fn parse_argument(&mut self) -> Result<TypeArgumentRef> {
        if self.peek_tok(0) == Some(&Tok::Star) {
            self.bump();
            return Ok(TypeArgumentRef::Star);
        }
        let variance = match self.peek_tok(0) {
            Some(Tok::Ident(s)) if (s == "in" || s == "out") && self.starts_type(1) => Some(s.clone()),
            _ => None,
        };
        if variance.is_some() {
            self.bump();
        }
        let argument = self.parse_type()?;
        Ok(match variance.as_deref() {
            Some("in") => TypeArgumentRef::In(argument),
            Some(_) => TypeArgumentRef::Out(argument),
            None => TypeArgumentRef::Invariant(argument),
        })
    }

    fn starts_type(&self, offset: usize) -> bool {
        matches!(self.peek_tok(offset), Some(Tok::Ident(_)) | Some(Tok::LParen))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(text: &str) -> String {
        TypeRef::parse(text).unwrap().to_string()
    }

    #[test]
    fn test_parse_nested_generic() {
        let parsed = TypeRef::parse("Map<String, List<Int>?>").unwrap();
        match &parsed.kind {
            TypeRefKind::Named { name, arguments } => {
                assert_eq!(name.to_string(), "Map");
                assert_eq!(arguments.len(), 2);
                let inner = arguments[1].type_ref().unwrap();
                assert!(inner.nullable);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!parsed.nullable);
    }

    #[test]
    fn test_parse_projections() {
        assert_eq!(round_trip("Array<out Number>"), "Array<out Number>");
        assert_eq!(round_trip("Comparable<in T>"), "Comparable<in T>");
        assert_eq!(round_trip("List<*>"), "List<*>");
        // a type literally named `in` is still a plain argument
        assert_eq!(round_trip("Box<out>"), "Box<out>");
    }

    #[test]
    fn test_parse_function_types() {
        assert_eq!(round_trip("(Int, String) -> Unit"), "(Int, String) -> Unit");
        assert_eq!(round_trip("suspend Int.(String) -> Boolean"), "suspend Int.(String) -> Boolean");
        assert_eq!(round_trip("((Int) -> Unit)?"), "((Int) -> Unit)?");
        assert_eq!(round_trip("() -> (Int) -> Int"), "() -> (Int) -> Int");
        assert_eq!(round_trip("context(Logger) () -> Unit"), "context(Logger) () -> Unit");
    }

    #[test]
    fn test_parse_intersection() {
        let parsed = TypeRef::parse("Comparable<T> & CharSequence").unwrap();
        assert!(matches!(&parsed.kind, TypeRefKind::Intersection(c) if c.len() == 2));
        assert_eq!(round_trip("(A & B)?"), "(A & B)?");
    }

    #[test]
    fn test_parse_qualified_names() {
        assert_eq!(round_trip("kestrel.collections.List<kestrel.Int>"), "kestrel.collections.List<kestrel.Int>");
    }

    #[test]
    fn test_parse_errors() {
        assert!(TypeRef::parse("Map<String").is_err());
        assert!(TypeRef::parse("(Int, String)").is_err());
        assert!(TypeRef::parse("Int -").is_err());
        assert!(TypeRef::parse("suspend Int").is_err());
        assert!(TypeRef::parse("").is_err());
        match TypeRef::parse("List<%>") {
            Err(SyntaxError::TypeReference { column, .. }) => assert_eq!(column, 5),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_serde_uses_text_form() {
        let parsed = TypeRef::parse("List<String?>").unwrap();
        let json = serde_json::to_string(&parsed).unwrap();
        assert_eq!(json, "\"List<String?>\"");
        let back: TypeRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, parsed);
    }
}
