use std::fmt;

use crate::ast::Span;
use crate::value::Value;
use thiserror::Error;

pub const ERROR_TAG: &str = "\x1b[31m[ERROR]\x1b[0m";
pub const WARN_TAG: &str = "\x1b[33m[WARN]\x1b[0m";

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ErrorContext {
    pub span: Option<Span>,
    pub source: Option<String>,
}

impl ErrorContext {
    fn set_span(&mut self, span: Span) {
        if self.span.is_none() {
            self.span = Some(span);
        }
    }

    fn set_source(&mut self, source: Option<String>) {
        if self.source.is_none() {
            self.source = source;
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ErrorData {
    pub message: String,
    pub context: ErrorContext,
}

impl ErrorData {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }
}

impl fmt::Display for ErrorData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(span) = self.context.span {
            match &self.context.source {
                Some(source) => write!(f, " ({}:{}:{})", source, span.line, span.col)?,
                None => write!(f, " (at {}:{})", span.line, span.col)?,
            }
        }
        Ok(())
    }
}

#[derive(Error, Debug, Clone)]
pub enum SprigError {
    #[error("Syntax error: {0}")]
    Syntax(ErrorData),

    #[error("Compile error: {0}")]
    Compile(ErrorData),

    #[error("Unable to resolve symbol: {0}")]
    UnboundSymbol(ErrorData),

    #[error("Linkage error: {0}")]
    Linkage(ErrorData),

    #[error("Internal compiler error: {0}")]
    Internal(ErrorData),

    #[error("Class format error: {0}")]
    ClassFormat(ErrorData),

    #[error("Runtime error: {0}")]
    Runtime(ErrorData),

    #[error("Arity mismatch: {0}")]
    Arity(ErrorData),

    #[error("Thrown: {0}")]
    Thrown(Value, ErrorContext),
}

impl SprigError {
    pub fn syntax(message: impl Into<String>) -> Self {
        SprigError::Syntax(ErrorData::new(message))
    }

    pub fn compile(message: impl Into<String>) -> Self {
        SprigError::Compile(ErrorData::new(message))
    }

    pub fn unbound(name: impl Into<String>) -> Self {
        SprigError::UnboundSymbol(ErrorData::new(name))
    }

    pub fn linkage(message: impl Into<String>) -> Self {
        SprigError::Linkage(ErrorData::new(message))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        SprigError::Internal(ErrorData::new(message))
    }

    pub fn class_format(message: impl Into<String>) -> Self {
        SprigError::ClassFormat(ErrorData::new(message))
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        SprigError::Runtime(ErrorData::new(message))
    }

    pub fn arity(message: impl Into<String>) -> Self {
        SprigError::Arity(ErrorData::new(message))
    }

    pub fn thrown(value: Value) -> Self {
        SprigError::Thrown(value, ErrorContext::default())
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.context_mut().set_span(span);
        self
    }

    pub fn with_source(mut self, source: Option<String>) -> Self {
        self.context_mut().set_source(source);
        self
    }

    pub fn span(&self) -> Option<Span> {
        self.context_ref().span
    }

    pub fn message(&self) -> String {
        match self {
            SprigError::Thrown(value, _) => value.to_string(),
            other => other.data().map(|d| d.message.clone()).unwrap_or_default(),
        }
    }

    /// Errors a user-level `try` may intercept. Internal errors always escape.
    pub fn is_catchable(&self) -> bool {
        !matches!(
            self,
            SprigError::Internal(_)
                | SprigError::Syntax(_)
                | SprigError::Compile(_)
                | SprigError::UnboundSymbol(_)
                | SprigError::ClassFormat(_)
        )
    }

    fn data(&self) -> Option<&ErrorData> {
        match self {
            SprigError::Syntax(data)
            | SprigError::Compile(data)
            | SprigError::UnboundSymbol(data)
            | SprigError::Linkage(data)
            | SprigError::Internal(data)
            | SprigError::ClassFormat(data)
            | SprigError::Runtime(data)
            | SprigError::Arity(data) => Some(data),
            SprigError::Thrown(..) => None,
        }
    }

    fn context_ref(&self) -> &ErrorContext {
        match self {
            SprigError::Syntax(data)
            | SprigError::Compile(data)
            | SprigError::UnboundSymbol(data)
            | SprigError::Linkage(data)
            | SprigError::Internal(data)
            | SprigError::ClassFormat(data)
            | SprigError::Runtime(data)
            | SprigError::Arity(data) => &data.context,
            SprigError::Thrown(_, context) => context,
        }
    }

    fn context_mut(&mut self) -> &mut ErrorContext {
        match self {
            SprigError::Syntax(data)
            | SprigError::Compile(data)
            | SprigError::UnboundSymbol(data)
            | SprigError::Linkage(data)
            | SprigError::Internal(data)
            | SprigError::ClassFormat(data)
            | SprigError::Runtime(data)
            | SprigError::Arity(data) => &mut data.context,
            SprigError::Thrown(_, context) => context,
        }
    }
}

pub fn format_error(err: &SprigError) -> String {
    format!("{} {}", ERROR_TAG, err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_span_wins() {
        let err = SprigError::compile("bad")
            .with_span(Span { line: 2, col: 3, index: 10 })
            .with_span(Span { line: 9, col: 9, index: 99 });
        assert_eq!(err.span().map(|s| s.line), Some(2));
        assert_eq!(err.to_string(), "Compile error: bad (at 2:3)");
    }

    #[test]
    fn compile_errors_are_not_catchable() {
        assert!(!SprigError::compile("x").is_catchable());
        assert!(!SprigError::internal("x").is_catchable());
        assert!(SprigError::linkage("x").is_catchable());
        assert!(SprigError::thrown(Value::Nil).is_catchable());
    }
}
