use std::fmt;
use std::sync::Arc;

pub const CORE_NS: &str = "sprig.core";
pub const USER_NS: &str = "user";

/// A possibly namespace-qualified name, shared by symbols and keywords.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol {
    pub ns: Option<Arc<str>>,
    pub name: Arc<str>,
}

impl Symbol {
    pub fn new(ns: Option<&str>, name: &str) -> Self {
        Self {
            ns: ns.map(Arc::from),
            name: Arc::from(name),
        }
    }

    pub fn simple(name: &str) -> Self {
        Symbol::new(None, name)
    }

    /// Splits `ns/name`. A lone `/` and names starting with `/` stay unqualified.
    pub fn parse(text: &str) -> Self {
        match split_qualified(text) {
            (Some(ns), name) => Symbol::new(Some(ns), name),
            (None, name) => Symbol::simple(name),
        }
    }

    pub fn is_qualified(&self) -> bool {
        self.ns.is_some()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ns {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

pub fn split_qualified(text: &str) -> (Option<&str>, &str) {
    if text == "/" {
        return (None, text);
    }
    match text.find('/') {
        Some(idx) if idx > 0 && idx + 1 < text.len() => (Some(&text[..idx]), &text[idx + 1..]),
        _ => (None, text),
    }
}

/// Dotted names such as `lang.String` or `sprig.core` may denote classes or
/// namespaces.
pub fn looks_dotted(name: &str) -> bool {
    name.len() > 1 && name.contains('.') && !name.starts_with('.') && !name.ends_with('.')
}

/// Turns a source name into something usable inside a generated class or
/// field name.
pub fn munge(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        match ch {
            '-' => out.push('_'),
            '?' => out.push_str("_QMARK_"),
            '!' => out.push_str("_BANG_"),
            '*' => out.push_str("_STAR_"),
            '+' => out.push_str("_PLUS_"),
            '>' => out.push_str("_GT_"),
            '<' => out.push_str("_LT_"),
            '=' => out.push_str("_EQ_"),
            '/' => out.push_str("_SLASH_"),
            '.' => out.push('_'),
            c => out.push(c),
        }
    }
    out
}

pub fn simple_class_name(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) => &name[idx + 1..],
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_handles_division_symbol() {
        assert_eq!(Symbol::parse("/").name.as_ref(), "/");
        assert!(!Symbol::parse("/").is_qualified());
        let sym = Symbol::parse("sprig.core/+");
        assert_eq!(sym.ns.as_deref(), Some("sprig.core"));
        assert_eq!(sym.name.as_ref(), "+");
    }

    #[test]
    fn munge_is_identifier_safe() {
        assert_eq!(munge("even?"), "even_QMARK_");
        assert_eq!(munge("set-x!"), "set_x_BANG_");
    }

    #[test]
    fn dotted_detection() {
        assert!(looks_dotted("lang.String"));
        assert!(!looks_dotted("String."));
        assert!(!looks_dotted(".foo"));
        assert!(!looks_dotted("x"));
    }
}
