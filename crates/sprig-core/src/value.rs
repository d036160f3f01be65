use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use im::{HashMap, HashSet, Vector};
use regex::Regex;

use crate::error::SprigError;
use crate::host::ClassInfo;
use crate::namespaces::{Namespace, Var};
use crate::runtime::Runtime;
use crate::symbols::Symbol;
use crate::types::Ty;

pub type NativeImpl = Arc<dyn Fn(&Runtime, &[Value]) -> Result<Value, SprigError> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Arity {
    pub min: usize,
    pub max: Option<usize>,
}

impl Arity {
    pub const fn exact(n: usize) -> Self {
        Arity { min: n, max: Some(n) }
    }

    pub const fn at_least(n: usize) -> Self {
        Arity { min: n, max: None }
    }

    pub const fn range(min: usize, max: usize) -> Self {
        Arity { min, max: Some(max) }
    }

    pub fn accepts(&self, n: usize) -> bool {
        n >= self.min && self.max.map_or(true, |max| n <= max)
    }
}

pub struct NativeFn {
    pub name: String,
    pub arity: Arity,
    pub ret: Ty,
    pub func: NativeImpl,
}

impl NativeFn {
    pub fn new(name: impl Into<String>, arity: Arity, ret: Ty, func: NativeImpl) -> Self {
        Self {
            name: name.into(),
            arity,
            ret,
            func,
        }
    }

    pub fn call(&self, rt: &Runtime, args: &[Value]) -> Result<Value, SprigError> {
        if !self.arity.accepts(args.len()) {
            return Err(SprigError::arity(format!(
                "wrong number of args ({}) passed to {}",
                args.len(),
                self.name
            )));
        }
        (self.func)(rt, args)
    }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#<native {}>", self.name)
    }
}

/// An object of a host or generated class. Field order follows
/// [`ClassInfo::layout`].
pub struct Instance {
    pub class: Arc<ClassInfo>,
    pub fields: Mutex<Vec<Value>>,
}

impl Instance {
    pub fn new(class: Arc<ClassInfo>) -> Self {
        let slots = class.layout.len();
        Self {
            class,
            fields: Mutex::new(vec![Value::Nil; slots]),
        }
    }

    pub fn get_field(&self, name: &str) -> Result<Value, SprigError> {
        let idx = self.field_index(name)?;
        let fields = self.fields.lock().map_err(|_| poisoned())?;
        Ok(fields[idx].clone())
    }

    pub fn set_field(&self, name: &str, value: Value) -> Result<(), SprigError> {
        let idx = self.field_index(name)?;
        let mut fields = self.fields.lock().map_err(|_| poisoned())?;
        fields[idx] = value;
        Ok(())
    }

    fn field_index(&self, name: &str) -> Result<usize, SprigError> {
        self.class.field_slot(name).ok_or_else(|| {
            SprigError::linkage(format!("no field {} on {}", name, self.class.name))
        })
    }
}

fn poisoned() -> SprigError {
    SprigError::internal("instance field lock poisoned")
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#<{}>", self.class.name)
    }
}

#[derive(Clone, Debug)]
pub struct RegexValue(pub Arc<Regex>);

impl RegexValue {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

/// Special forms are ordinary bindings in `sprig.core` whose value is one of
/// these markers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    Quote,
    SyntaxQuote,
    Unquote,
    UnquoteSplicing,
    If,
    Do,
    Let,
    Loop,
    Recur,
    Case,
    Fn,
    Def,
    Defmacro,
    SetBang,
    Var,
    Deftype,
    Defprotocol,
    Proxy,
    New,
    Dot,
    Throw,
    Try,
    Ns,
    InNs,
    Import,
    InstanceCheck,
}

impl Intrinsic {
    pub const ALL: [Intrinsic; 26] = [
        Intrinsic::Quote,
        Intrinsic::SyntaxQuote,
        Intrinsic::Unquote,
        Intrinsic::UnquoteSplicing,
        Intrinsic::If,
        Intrinsic::Do,
        Intrinsic::Let,
        Intrinsic::Loop,
        Intrinsic::Recur,
        Intrinsic::Case,
        Intrinsic::Fn,
        Intrinsic::Def,
        Intrinsic::Defmacro,
        Intrinsic::SetBang,
        Intrinsic::Var,
        Intrinsic::Deftype,
        Intrinsic::Defprotocol,
        Intrinsic::Proxy,
        Intrinsic::New,
        Intrinsic::Dot,
        Intrinsic::Throw,
        Intrinsic::Try,
        Intrinsic::Ns,
        Intrinsic::InNs,
        Intrinsic::Import,
        Intrinsic::InstanceCheck,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Intrinsic::Quote => "quote",
            Intrinsic::SyntaxQuote => "syntax-quote",
            Intrinsic::Unquote => "unquote",
            Intrinsic::UnquoteSplicing => "unquote-splicing",
            Intrinsic::If => "if",
            Intrinsic::Do => "do",
            Intrinsic::Let => "let",
            Intrinsic::Loop => "loop",
            Intrinsic::Recur => "recur",
            Intrinsic::Case => "case",
            Intrinsic::Fn => "fn",
            Intrinsic::Def => "def",
            Intrinsic::Defmacro => "defmacro",
            Intrinsic::SetBang => "set!",
            Intrinsic::Var => "var",
            Intrinsic::Deftype => "deftype",
            Intrinsic::Defprotocol => "defprotocol",
            Intrinsic::Proxy => "proxy",
            Intrinsic::New => "new",
            Intrinsic::Dot => ".",
            Intrinsic::Throw => "throw",
            Intrinsic::Try => "try",
            Intrinsic::Ns => "ns",
            Intrinsic::InNs => "in-ns",
            Intrinsic::Import => "import",
            Intrinsic::InstanceCheck => "instance?",
        }
    }

    pub fn from_name(name: &str) -> Option<Intrinsic> {
        Intrinsic::ALL.iter().copied().find(|i| i.name() == name)
    }
}

#[derive(Clone, Debug)]
pub enum Value {
    Nil,
    Bool(bool),
    Char(char),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Regex(RegexValue),
    Keyword(Symbol),
    Symbol(Symbol),
    List(Vector<Value>),
    Vector(Vector<Value>),
    Map(HashMap<Value, Value>),
    Set(HashSet<Value>),
    Native(Arc<NativeFn>),
    Object(Arc<Instance>),
    Class(Arc<ClassInfo>),
    Namespace(Arc<Namespace>),
    Var(Arc<Var>),
    Intrinsic(Intrinsic),
}

impl Value {
    pub fn string(s: &str) -> Value {
        Value::Str(Arc::from(s))
    }

    pub fn regex(pattern: &str) -> Result<Value, SprigError> {
        let re = Regex::new(pattern)
            .map_err(|err| SprigError::syntax(format!("invalid regex {:?}: {}", pattern, err)))?;
        Ok(Value::Regex(RegexValue(Arc::new(re))))
    }

    pub fn keyword(name: &str) -> Value {
        Value::Keyword(Symbol::parse(name))
    }

    pub fn symbol(name: &str) -> Value {
        Value::Symbol(Symbol::parse(name))
    }

    pub fn list(items: impl IntoIterator<Item = Value>) -> Value {
        Value::List(items.into_iter().collect())
    }

    pub fn vector(items: impl IntoIterator<Item = Value>) -> Value {
        Value::Vector(items.into_iter().collect())
    }

    pub fn native(
        name: &str,
        arity: Arity,
        ret: Ty,
        func: impl Fn(&Runtime, &[Value]) -> Result<Value, SprigError> + Send + Sync + 'static,
    ) -> Value {
        Value::Native(Arc::new(NativeFn::new(name, arity, ret, Arc::new(func))))
    }

    pub fn truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Elements of anything sequential, `nil` being empty.
    pub fn seq_items(&self) -> Option<Vec<Value>> {
        match self {
            Value::Nil => Some(Vec::new()),
            Value::List(items) | Value::Vector(items) => Some(items.iter().cloned().collect()),
            Value::Set(items) => Some(items.iter().cloned().collect()),
            Value::Map(map) => Some(
                map.iter()
                    .map(|(k, v)| Value::vector([k.clone(), v.clone()]))
                    .collect(),
            ),
            Value::Str(s) => Some(s.chars().map(Value::Char).collect()),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Char(_) => "char",
            Value::Int(_) => "long",
            Value::Float(_) => "double",
            Value::Str(_) => "string",
            Value::Regex(_) => "regex",
            Value::Keyword(_) => "keyword",
            Value::Symbol(_) => "symbol",
            Value::List(_) => "list",
            Value::Vector(_) => "vector",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
            Value::Native(_) => "native function",
            Value::Object(_) => "object",
            Value::Class(_) => "class",
            Value::Namespace(_) => "namespace",
            Value::Var(_) => "var",
            Value::Intrinsic(_) => "special form",
        }
    }

    /// Runtime class of the value; `None` for nil.
    pub fn class_name(&self) -> Option<&str> {
        use crate::host::names;
        Some(match self {
            Value::Nil => return None,
            Value::Bool(_) => names::BOOLEAN,
            Value::Char(_) => names::CHARACTER,
            Value::Int(_) => names::LONG,
            Value::Float(_) => names::DOUBLE,
            Value::Str(_) => names::STRING,
            Value::Regex(_) => names::PATTERN,
            Value::Keyword(_) => names::KEYWORD,
            Value::Symbol(_) => names::SYMBOL,
            Value::List(_) => names::LIST,
            Value::Vector(_) => names::VECTOR,
            Value::Map(_) => names::MAP,
            Value::Set(_) => names::SET,
            Value::Native(_) => names::NATIVE_FN,
            Value::Object(inst) => inst.class.name.as_str(),
            Value::Class(_) => names::CLASS,
            Value::Namespace(_) => names::NAMESPACE,
            Value::Var(_) => names::VAR,
            Value::Intrinsic(_) => names::SPECIAL_FORM,
        })
    }

    /// Deterministic 32-bit hash following the JVM conventions for the
    /// corresponding boxed types, so collisions are predictable.
    pub fn hash_code(&self) -> i32 {
        match self {
            Value::Nil => 0,
            Value::Bool(true) => 1231,
            Value::Bool(false) => 1237,
            Value::Char(c) => *c as i32,
            Value::Int(n) => (*n ^ ((*n as u64) >> 32) as i64) as i32,
            Value::Float(n) => {
                let n = if *n == 0.0 { 0.0 } else { *n };
                let bits = n.to_bits();
                (bits ^ (bits >> 32)) as i32
            }
            Value::Str(s) => string_hash(s),
            Value::Regex(re) => string_hash(re.as_str()),
            Value::Symbol(sym) => symbol_hash(sym),
            Value::Keyword(sym) => symbol_hash(sym).wrapping_add(0x9e37_79b9_u32 as i32),
            Value::List(items) | Value::Vector(items) => items
                .iter()
                .fold(1i32, |h, v| h.wrapping_mul(31).wrapping_add(v.hash_code())),
            Value::Map(map) => map
                .iter()
                .fold(0i32, |h, (k, v)| h.wrapping_add(k.hash_code() ^ v.hash_code())),
            Value::Set(set) => set.iter().fold(0i32, |h, v| h.wrapping_add(v.hash_code())),
            Value::Native(f) => Arc::as_ptr(f) as *const u8 as usize as i32,
            Value::Object(inst) => Arc::as_ptr(inst) as *const u8 as usize as i32,
            Value::Var(var) => Arc::as_ptr(var) as *const u8 as usize as i32,
            Value::Class(class) => string_hash(&class.name),
            Value::Namespace(ns) => string_hash(&ns.name),
            Value::Intrinsic(i) => string_hash(i.name()),
        }
    }

    /// `str` rendering: strings and chars bare, nil empty.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Nil => String::new(),
            Value::Str(s) => s.to_string(),
            Value::Char(c) => c.to_string(),
            other => other.to_string(),
        }
    }
}

pub fn string_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(unit as i32))
}

fn symbol_hash(sym: &Symbol) -> i32 {
    let ns = sym.ns.as_deref().map(string_hash).unwrap_or(0);
    string_hash(&sym.name).wrapping_mul(31).wrapping_add(ns)
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Regex(a), Value::Regex(b)) => a.as_str() == b.as_str(),
            (Value::Keyword(a), Value::Keyword(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::List(a) | Value::Vector(a), Value::List(b) | Value::Vector(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => a == b,
            (Value::Native(a), Value::Native(b)) => Arc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Var(a), Value::Var(b)) => Arc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => a.name == b.name,
            (Value::Namespace(a), Value::Namespace(b)) => a.name == b.name,
            (Value::Intrinsic(a), Value::Intrinsic(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_i32(self.hash_code());
    }
}

fn write_seq(f: &mut fmt::Formatter<'_>, open: &str, items: impl Iterator<Item = String>, close: &str) -> fmt::Result {
    let parts: Vec<String> = items.collect();
    write!(f, "{}{}{}", open, parts.join(" "), close)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Char(c) => match c {
                '\n' => write!(f, "\\newline"),
                ' ' => write!(f, "\\space"),
                '\t' => write!(f, "\\tab"),
                c => write!(f, "\\{}", c),
            },
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{:?}", n),
            Value::Str(s) => write!(f, "{:?}", s.as_ref()),
            Value::Regex(re) => write!(f, "#\"{}\"", re.as_str()),
            Value::Keyword(k) => write!(f, ":{}", k),
            Value::Symbol(s) => write!(f, "{}", s),
            Value::List(items) => write_seq(f, "(", items.iter().map(|v| v.to_string()), ")"),
            Value::Vector(items) => write_seq(f, "[", items.iter().map(|v| v.to_string()), "]"),
            Value::Set(items) => {
                let mut parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                parts.sort();
                write_seq(f, "#{", parts.into_iter(), "}")
            }
            Value::Map(map) => {
                let mut parts: Vec<String> = map.iter().map(|(k, v)| format!("{} {}", k, v)).collect();
                parts.sort();
                write!(f, "{{{}}}", parts.join(", "))
            }
            Value::Native(func) => write!(f, "#<fn {}>", func.name),
            Value::Object(inst) => match inst.class.name.as_str() {
                crate::host::names::TUPLE => {
                    let items = inst.get_field("items").unwrap_or(Value::Nil);
                    write!(f, "#<Tuple {}>", items)
                }
                name => {
                    if let Ok(Value::Str(msg)) = inst.get_field("message") {
                        write!(f, "#<{} {}>", name, msg)
                    } else {
                        write!(f, "#<{}>", name)
                    }
                }
            },
            Value::Class(class) => write!(f, "{}", class.name),
            Value::Namespace(ns) => write!(f, "#<Namespace {}>", ns.name),
            Value::Var(var) => write!(f, "#'{}/{}", var.ns, var.name),
            Value::Intrinsic(i) => write!(f, "#<special-form {}>", i.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!Value::Nil.truthy());
        assert!(!Value::Bool(false).truthy());
        assert!(Value::Int(0).truthy());
        assert!(Value::string("").truthy());
        assert!(Value::vector([]).truthy());
    }

    #[test]
    fn string_hashes_match_jvm() {
        assert_eq!(Value::string("Aa").hash_code(), Value::string("BB").hash_code());
        assert_eq!(Value::string("hello").hash_code(), 99162322);
        assert_eq!(Value::Int(1).hash_code(), 1);
        assert_eq!(Value::Bool(true).hash_code(), 1231);
    }

    #[test]
    fn sequential_collections_compare_structurally() {
        let list = Value::list([Value::Int(1), Value::Int(2)]);
        let vector = Value::vector([Value::Int(1), Value::Int(2)]);
        assert_eq!(list, vector);
        assert_eq!(list.hash_code(), vector.hash_code());
        assert_ne!(Value::Int(1), Value::Float(1.0));
    }

    #[test]
    fn printing_is_readable() {
        let v = Value::vector([Value::string("a"), Value::keyword("k"), Value::Char('x'), Value::Nil]);
        assert_eq!(v.to_string(), "[\"a\" :k \\x nil]");
        assert_eq!(Value::string("a").to_display_string(), "a");
    }

    #[test]
    fn intrinsic_names_round_trip() {
        for intrinsic in Intrinsic::ALL {
            assert_eq!(Intrinsic::from_name(intrinsic.name()), Some(intrinsic));
        }
    }
}
