use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SprigError;
use crate::symbols::Symbol;
use crate::value::Value;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub line: usize,
    pub col: usize,
    pub index: usize,
}

/// One node of reader output. Spans are diagnostic only and never take part in
/// structural comparisons made by the compiler (see [`Datum::same_shape`]).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Datum {
    pub kind: DatumKind,
    pub span: Span,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DatumKind {
    Nil,
    Bool(bool),
    Char(char),
    Int(i64),
    Float(f64),
    Str(String),
    Regex(String),
    Keyword(String),
    Symbol(String),
    List(Vec<Datum>),
    Vector(Vec<Datum>),
    Map(Vec<(Datum, Datum)>),
    Set(Vec<Datum>),
}

/// The closed set of syntax tags forms are dispatched on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FormTag {
    Nil,
    False,
    True,
    Char,
    Number,
    String,
    Regex,
    Symbol,
    Keyword,
    Map,
    Vector,
    Set,
    SExpression,
}

impl FormTag {
    pub fn classify(datum: &Datum) -> FormTag {
        match &datum.kind {
            DatumKind::Nil => FormTag::Nil,
            DatumKind::Bool(false) => FormTag::False,
            DatumKind::Bool(true) => FormTag::True,
            DatumKind::Char(_) => FormTag::Char,
            DatumKind::Int(_) | DatumKind::Float(_) => FormTag::Number,
            DatumKind::Str(_) => FormTag::String,
            DatumKind::Regex(_) => FormTag::Regex,
            DatumKind::Keyword(_) => FormTag::Keyword,
            DatumKind::Symbol(_) => FormTag::Symbol,
            DatumKind::List(_) => FormTag::SExpression,
            DatumKind::Vector(_) => FormTag::Vector,
            DatumKind::Map(_) => FormTag::Map,
            DatumKind::Set(_) => FormTag::Set,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FormTag::Nil => "nil",
            FormTag::False => "false",
            FormTag::True => "true",
            FormTag::Char => "char",
            FormTag::Number => "number",
            FormTag::String => "string",
            FormTag::Regex => "regex",
            FormTag::Symbol => "symbol",
            FormTag::Keyword => "keyword",
            FormTag::Map => "map",
            FormTag::Vector => "vector",
            FormTag::Set => "set",
            FormTag::SExpression => "s-expression",
        }
    }
}

impl Datum {
    pub fn new(kind: DatumKind, span: Span) -> Self {
        Self {
            kind,
            span,
            type_hint: None,
            flags: Vec::new(),
        }
    }

    pub fn symbol(name: impl Into<String>, span: Span) -> Self {
        Datum::new(DatumKind::Symbol(name.into()), span)
    }

    pub fn list(items: Vec<Datum>, span: Span) -> Self {
        Datum::new(DatumKind::List(items), span)
    }

    pub fn nil(span: Span) -> Self {
        Datum::new(DatumKind::Nil, span)
    }

    pub fn tag(&self) -> FormTag {
        FormTag::classify(self)
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match &self.kind {
            DatumKind::Symbol(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Datum]> {
        match &self.kind {
            DatumKind::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[Datum]> {
        match &self.kind {
            DatumKind::Vector(items) => Some(items),
            _ => None,
        }
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    pub fn with_hint(mut self, hint: Option<String>) -> Self {
        self.type_hint = hint;
        self
    }

    /// Structural equality ignoring spans and metadata.
    pub fn same_shape(&self, other: &Datum) -> bool {
        match (&self.kind, &other.kind) {
            (DatumKind::List(a), DatumKind::List(b))
            | (DatumKind::Vector(a), DatumKind::Vector(b))
            | (DatumKind::Set(a), DatumKind::Set(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_shape(y))
            }
            (DatumKind::Map(a), DatumKind::Map(b)) => {
                a.len() == b.len()
                    && a
                        .iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka.same_shape(kb) && va.same_shape(vb))
            }
            (a, b) => a == b,
        }
    }

    pub fn syntax_error(&self, message: impl Into<String>) -> SprigError {
        SprigError::syntax(message).with_span(self.span)
    }

    pub fn compile_error(&self, message: impl Into<String>) -> SprigError {
        SprigError::compile(message).with_span(self.span)
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn seq(f: &mut fmt::Formatter<'_>, open: &str, items: &[Datum], close: &str) -> fmt::Result {
            write!(f, "{}", open)?;
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    write!(f, " ")?;
                }
                write!(f, "{}", item)?;
            }
            write!(f, "{}", close)
        }
        match &self.kind {
            DatumKind::Nil => write!(f, "nil"),
            DatumKind::Bool(b) => write!(f, "{}", b),
            DatumKind::Char(c) => write!(f, "\\{}", c),
            DatumKind::Int(n) => write!(f, "{}", n),
            DatumKind::Float(n) => write!(f, "{:?}", n),
            DatumKind::Str(s) => write!(f, "{:?}", s),
            DatumKind::Regex(s) => write!(f, "#\"{}\"", s),
            DatumKind::Keyword(k) => write!(f, ":{}", k),
            DatumKind::Symbol(s) => write!(f, "{}", s),
            DatumKind::List(items) => seq(f, "(", items, ")"),
            DatumKind::Vector(items) => seq(f, "[", items, "]"),
            DatumKind::Set(items) => seq(f, "#{", items, "}"),
            DatumKind::Map(entries) => {
                write!(f, "{{")?;
                for (idx, (k, v)) in entries.iter().enumerate() {
                    if idx > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{} {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Converts a quoted datum into the runtime value it denotes.
pub fn datum_to_value(datum: &Datum) -> Value {
    match &datum.kind {
        DatumKind::Nil => Value::Nil,
        DatumKind::Bool(b) => Value::Bool(*b),
        DatumKind::Char(c) => Value::Char(*c),
        DatumKind::Int(n) => Value::Int(*n),
        DatumKind::Float(n) => Value::Float(*n),
        DatumKind::Str(s) => Value::string(s),
        DatumKind::Regex(s) => Value::regex(s).unwrap_or(Value::Nil),
        DatumKind::Keyword(k) => Value::Keyword(Symbol::parse(k)),
        DatumKind::Symbol(s) => Value::Symbol(Symbol::parse(s)),
        DatumKind::List(items) => Value::List(items.iter().map(datum_to_value).collect()),
        DatumKind::Vector(items) => Value::Vector(items.iter().map(datum_to_value).collect()),
        DatumKind::Set(items) => Value::Set(items.iter().map(datum_to_value).collect()),
        DatumKind::Map(entries) => Value::Map(
            entries
                .iter()
                .map(|(k, v)| (datum_to_value(k), datum_to_value(v)))
                .collect(),
        ),
    }
}

/// Converts a macro result back into code. Values with no reader syntax are
/// rejected.
pub fn datum_from_value(value: &Value, span: Span) -> Result<Datum, SprigError> {
    let kind = match value {
        Value::Nil => DatumKind::Nil,
        Value::Bool(b) => DatumKind::Bool(*b),
        Value::Char(c) => DatumKind::Char(*c),
        Value::Int(n) => DatumKind::Int(*n),
        Value::Float(n) => DatumKind::Float(*n),
        Value::Str(s) => DatumKind::Str(s.to_string()),
        Value::Regex(re) => DatumKind::Regex(re.as_str().to_string()),
        Value::Keyword(k) => DatumKind::Keyword(k.to_string()),
        Value::Symbol(s) => DatumKind::Symbol(s.to_string()),
        Value::List(items) => DatumKind::List(
            items
                .iter()
                .map(|v| datum_from_value(v, span))
                .collect::<Result<_, _>>()?,
        ),
        Value::Vector(items) => DatumKind::Vector(
            items
                .iter()
                .map(|v| datum_from_value(v, span))
                .collect::<Result<_, _>>()?,
        ),
        Value::Set(items) => DatumKind::Set(
            items
                .iter()
                .map(|v| datum_from_value(v, span))
                .collect::<Result<_, _>>()?,
        ),
        Value::Map(map) => DatumKind::Map(
            map.iter()
                .map(|(k, v)| Ok((datum_from_value(k, span)?, datum_from_value(v, span)?)))
                .collect::<Result<_, SprigError>>()?,
        ),
        other => {
            return Err(SprigError::syntax(format!(
                "cannot embed {} in code",
                other.type_name()
            ))
            .with_span(span))
        }
    };
    Ok(Datum::new(kind, span))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(kind: DatumKind) -> Datum {
        Datum::new(kind, Span::default())
    }

    #[test]
    fn classification_is_total_and_stable() {
        let cases = [
            (d(DatumKind::Nil), FormTag::Nil),
            (d(DatumKind::Bool(false)), FormTag::False),
            (d(DatumKind::Bool(true)), FormTag::True),
            (d(DatumKind::Char('a')), FormTag::Char),
            (d(DatumKind::Int(1)), FormTag::Number),
            (d(DatumKind::Float(1.5)), FormTag::Number),
            (d(DatumKind::Str("s".into())), FormTag::String),
            (d(DatumKind::Regex("a+".into())), FormTag::Regex),
            (d(DatumKind::Keyword("k".into())), FormTag::Keyword),
            (d(DatumKind::Symbol("x".into())), FormTag::Symbol),
            (d(DatumKind::List(vec![])), FormTag::SExpression),
            (d(DatumKind::Vector(vec![])), FormTag::Vector),
            (d(DatumKind::Map(vec![])), FormTag::Map),
            (d(DatumKind::Set(vec![])), FormTag::Set),
        ];
        for (datum, tag) in cases {
            assert_eq!(FormTag::classify(&datum), tag);
            assert_eq!(FormTag::classify(&datum.clone()), tag);
        }
    }

    #[test]
    fn same_shape_ignores_spans() {
        let a = Datum::symbol("x", Span { line: 1, col: 1, index: 0 });
        let b = Datum::symbol("x", Span { line: 7, col: 2, index: 40 });
        assert!(a.same_shape(&b));
        assert!(!a.same_shape(&Datum::symbol("y", Span::default())));
    }

    #[test]
    fn functions_cannot_be_embedded_in_code() {
        let err = datum_from_value(&Value::Intrinsic(crate::value::Intrinsic::If), Span::default())
            .unwrap_err();
        assert!(matches!(err, SprigError::Syntax(_)));
    }
}
