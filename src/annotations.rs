//! Annotation expressions
//!
//! The core treats a field's annotation as an opaque type expression; the
//! only interpretation it performs is structural marker matching (class-var,
//! init-var, keyword-only), which must work for both evaluated and
//! string/forward-reference spellings (`ClassVar[int]`, `ta.ClassVar[int]`,
//! `"InitVar[str]"`).

use serde::{Deserialize, Serialize};

use crate::value::TypeRef;

/// An opaque type expression attached to a field declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub expr: String,
}

/// Structural classification of an annotation's outermost marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnMarker {
    /// `KW_ONLY` — all subsequent fields in the class become keyword-only
    KwOnly,
    /// `ClassVar[...]` with the inner expression
    ClassVar(Annotation),
    /// `InitVar[...]` with the inner expression
    InitVar(Annotation),
}

impl Annotation {
    pub fn new(expr: impl Into<String>) -> Self {
        Self { expr: expr.into() }
    }

    /// Strip quoting from forward-reference spellings
    fn unquoted(&self) -> &str {
        self.expr
            .trim()
            .trim_matches(|c| c == '"' || c == '\'')
            .trim()
    }

    /// Match the outermost structural marker, if any. Accepts dotted alias
    /// prefixes (`ta.ClassVar[...]`, `dc.KW_ONLY`).
    pub fn marker(&self) -> Option<AnnMarker> {
        let s = self.unquoted();
        let last = s.split('[').next().unwrap_or(s);
        let head = last.rsplit('.').next().unwrap_or(last).trim();
        match head {
            "KW_ONLY" => Some(AnnMarker::KwOnly),
            "ClassVar" => Some(AnnMarker::ClassVar(self.inner(s))),
            "InitVar" => Some(AnnMarker::InitVar(self.inner(s))),
            _ => None,
        }
    }

    fn inner(&self, s: &str) -> Annotation {
        match (s.find('['), s.rfind(']')) {
            (Some(a), Some(b)) if b > a => Annotation::new(s[a + 1..b].trim()),
            _ => Annotation::new("Any"),
        }
    }

    pub fn is_kw_only(&self) -> bool {
        matches!(self.marker(), Some(AnnMarker::KwOnly))
    }

    /// Replace type-variable tokens (whole identifiers only) per the given
    /// substitution table; used to concretize annotations declared on
    /// generic ancestors.
    pub fn substitute(&self, table: &[(String, String)]) -> Annotation {
        let mut out = String::with_capacity(self.expr.len());
        let mut ident = String::new();
        let flush = |ident: &mut String, out: &mut String| {
            if ident.is_empty() {
                return;
            }
            match table.iter().find(|(k, _)| k == ident) {
                Some((_, v)) => out.push_str(v),
                None => out.push_str(ident),
            }
            ident.clear();
        };
        for c in self.expr.chars() {
            if c.is_alphanumeric() || c == '_' {
                ident.push(c);
            } else {
                flush(&mut ident, &mut out);
                out.push(c);
            }
        }
        flush(&mut ident, &mut out);
        Annotation::new(out)
    }

    /// Best-effort runtime type for annotation-driven checks and coercion;
    /// `None` when the expression names no builtin.
    pub fn builtin_type(&self) -> Option<TypeRef> {
        match self.unquoted() {
            "bool" => Some(TypeRef::Bool),
            "int" => Some(TypeRef::Int),
            "float" => Some(TypeRef::Float),
            "str" => Some(TypeRef::Str),
            "tuple" => Some(TypeRef::Tuple),
            "list" => Some(TypeRef::List),
            "dict" | "map" => Some(TypeRef::Map),
            "None" | "NoneType" => Some(TypeRef::None),
            _ => None,
        }
    }
}

impl From<&str> for Annotation {
    fn from(s: &str) -> Self {
        Annotation::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_classification() {
        assert_eq!(Annotation::new("KW_ONLY").marker(), Some(AnnMarker::KwOnly));
        assert_eq!(
            Annotation::new("dc.KW_ONLY").marker(),
            Some(AnnMarker::KwOnly)
        );
        assert_eq!(
            Annotation::new("ClassVar[int]").marker(),
            Some(AnnMarker::ClassVar(Annotation::new("int")))
        );
        assert_eq!(
            Annotation::new("ta.ClassVar[list[str]]").marker(),
            Some(AnnMarker::ClassVar(Annotation::new("list[str]")))
        );
        assert_eq!(
            Annotation::new("'InitVar[str]'").marker(),
            Some(AnnMarker::InitVar(Annotation::new("str")))
        );
        assert_eq!(Annotation::new("int").marker(), None);
    }

    #[test]
    fn test_substitute_whole_idents_only() {
        let ann = Annotation::new("dict[T, TT]");
        let out = ann.substitute(&[("T".into(), "int".into())]);
        assert_eq!(out.expr, "dict[int, TT]");
    }

    #[test]
    fn test_builtin_type() {
        assert_eq!(Annotation::new("int").builtin_type(), Some(TypeRef::Int));
        assert_eq!(Annotation::new("Foo").builtin_type(), None);
    }
}
