//! Symbol interning for identifiers and qualified names
//!
//! Names are interned once into a global table so that comparisons between
//! identifiers are integer comparisons. Interned strings live for the rest of
//! the process.

#![allow(non_snake_case)]

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, OnceLock, PoisonError};

/// Interned string symbol
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

impl Symbol {
    /// Intern a string and return its symbol
    pub fn intern(s: &str) -> Self {
        GlobalInterner::get().with_mut(|interner| interner.intern(s))
    }

    /// Get the string representation of this symbol
    pub fn as_str(self) -> &'static str {
        GlobalInterner::get().with(|interner| interner.resolve(self))
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}`", self.as_str())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Symbol::intern(s)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Symbol::intern(&s)
    }
}

// Symbols travel as text so that serialized trees stay valid across processes.
impl Serialize for Symbol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Symbol {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(Symbol::intern(&text))
    }
}

struct SymbolInterner {
    symbols: Vec<&'static str>,
    indices: HashMap<&'static str, u32>,
}

impl SymbolInterner {
    fn new() -> Self {
        SymbolInterner {
            symbols: Vec::new(),
            indices: HashMap::new(),
        }
    }

    fn intern(&mut self, s: &str) -> Symbol {
        if let Some(&index) = self.indices.get(s) {
            return Symbol(index);
        }
        let index = self.symbols.len() as u32;
        let leaked: &'static str = Box::leak(s.to_owned().into_boxed_str());
        self.symbols.push(leaked);
        self.indices.insert(leaked, index);
        Symbol(index)
    }

    fn resolve(&self, symbol: Symbol) -> &'static str {
        self.symbols.get(symbol.0 as usize).copied().unwrap_or("<unknown>")
    }
}

struct GlobalInterner {
    inner: Mutex<SymbolInterner>,
}

static INTERNER: OnceLock<GlobalInterner> = OnceLock::new();

impl GlobalInterner {
    fn get() -> &'static GlobalInterner {
        INTERNER.get_or_init(|| GlobalInterner {
            inner: Mutex::new(SymbolInterner::new()),
        })
    }

    fn with_mut<R>(&self, f: impl FnOnce(&mut SymbolInterner) -> R) -> R {
        f(&mut self.inner.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn with<R>(&self, f: impl FnOnce(&SymbolInterner) -> R) -> R {
        f(&self.inner.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Commonly used symbols (pre-interned)
pub mod symbols {
    use super::Symbol;
    use std::sync::OnceLock;

    macro_rules! define_symbols {
        ($($name:ident = $value:literal),* $(,)?) => {
            $(
                pub fn $name() -> Symbol {
                    static SYMBOL: OnceLock<Symbol> = OnceLock::new();
                    *SYMBOL.get_or_init(|| Symbol::intern($value))
                }
            )*
        };
    }

    define_symbols! {
        // Root package of the builtin library
        KESTREL = "kestrel",

        // Builtin classifiers
        ANY = "Any",
        NOTHING = "Nothing",
        UNIT = "Unit",
        NUMBER = "Number",
        INT = "Int",
        LONG = "Long",
        DOUBLE = "Double",
        CHAR = "Char",
        STRING = "String",
        BOOLEAN = "Boolean",
        CHAR_SEQUENCE = "CharSequence",
        COMPARABLE = "Comparable",
        ARRAY = "Array",
        LIST = "List",

        // Well-known members
        EQUALS = "equals",
        HASH_CODE = "hashCode",
        TO_STRING = "toString",
        INVOKE = "invoke",
        COMPARE_TO = "compareTo",
        PLUS = "plus",
        IT = "it",
        THIS = "this",
        CONSTRUCTOR = "<init>",
    }
}

/// A dotted name such as `kestrel.collections.List`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct QualifiedName {
    segments: Vec<Symbol>,
}

impl QualifiedName {
    /// The root package.
    pub fn root() -> Self {
        QualifiedName { segments: Vec::new() }
    }

    pub fn new(segments: Vec<Symbol>) -> Self {
        QualifiedName { segments }
    }

    /// Parse a dotted string; empty segments are dropped.
    pub fn parse(text: &str) -> Self {
        QualifiedName {
            segments: text
                .split('.')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(Symbol::intern)
                .collect(),
        }
    }

    pub fn single(name: Symbol) -> Self {
        QualifiedName { segments: vec![name] }
    }

    pub fn segments(&self) -> &[Symbol] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Last segment, the simple name.
    pub fn last(&self) -> Option<Symbol> {
        self.segments.last().copied()
    }

    pub fn first(&self) -> Option<Symbol> {
        self.segments.first().copied()
    }

    /// Everything but the last segment.
    pub fn parent(&self) -> QualifiedName {
        let mut segments = self.segments.clone();
        segments.pop();
        QualifiedName { segments }
    }

    pub fn child(&self, name: Symbol) -> QualifiedName {
        let mut segments = self.segments.clone();
        segments.push(name);
        QualifiedName { segments }
    }

    /// Concatenate two names.
    pub fn join(&self, other: &QualifiedName) -> QualifiedName {
        let mut segments = self.segments.clone();
        segments.extend_from_slice(&other.segments);
        QualifiedName { segments }
    }

    pub fn starts_with(&self, prefix: &QualifiedName) -> bool {
        self.segments.starts_with(&prefix.segments)
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(segment.as_str())?;
        }
        Ok(())
    }
}

impl fmt::Debug for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QualifiedName({})", self)
    }
}

impl From<&str> for QualifiedName {
    fn from(text: &str) -> Self {
        QualifiedName::parse(text)
    }
}

impl Serialize for QualifiedName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for QualifiedName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(QualifiedName::parse(&text))
    }
}
