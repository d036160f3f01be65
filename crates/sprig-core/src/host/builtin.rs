use once_cell::sync::Lazy;

use super::names::*;
use super::{ClassInfo, ClassRegistry, HostClassBuilder};
use crate::error::SprigError;
use crate::types::{Prim, Ty};
use crate::value::Value;

/// Simple names resolvable in every namespace without an explicit import.
pub static DEFAULT_IMPORTS: Lazy<Vec<(&'static str, &'static str)>> = Lazy::new(|| {
    [
        OBJECT, NUMBER, LONG, DOUBLE, BOOLEAN, CHARACTER, STRING, KEYWORD, SYMBOL, PATTERN, LIST,
        VECTOR, MAP, SET, FN, NATIVE_FN, CLASS, NAMESPACE, VAR, MATH, TUPLE, EXCEPTION,
        LINKAGE_ERROR, ARITY_ERROR, CLASS_CAST,
    ]
    .iter()
    .map(|full| (crate::symbols::simple_class_name(full), *full))
    .collect()
});

fn long() -> Ty {
    Ty::Prim(Prim::Long)
}

fn double() -> Ty {
    Ty::Prim(Prim::Double)
}

fn boolean() -> Ty {
    Ty::Prim(Prim::Boolean)
}

fn obj() -> Ty {
    Ty::object()
}

fn this_of(this: Option<&Value>) -> Result<&Value, SprigError> {
    this.ok_or_else(|| SprigError::internal("instance method invoked without receiver"))
}

fn this_str(this: Option<&Value>) -> Result<&str, SprigError> {
    match this_of(this)? {
        Value::Str(s) => Ok(s),
        other => Err(type_error(STRING, other)),
    }
}

pub(crate) fn type_error(expected: &str, actual: &Value) -> SprigError {
    SprigError::runtime(format!(
        "expected {}, got {}",
        expected,
        actual.class_name().unwrap_or("nil")
    ))
}

fn arg_long(args: &[Value], idx: usize) -> Result<i64, SprigError> {
    match args.get(idx) {
        Some(Value::Int(n)) => Ok(*n),
        Some(other) => Err(type_error(LONG, other)),
        None => Err(SprigError::arity("missing argument")),
    }
}

fn arg_double(args: &[Value], idx: usize) -> Result<f64, SprigError> {
    match args.get(idx) {
        Some(Value::Float(n)) => Ok(*n),
        Some(Value::Int(n)) => Ok(*n as f64),
        Some(other) => Err(type_error(DOUBLE, other)),
        None => Err(SprigError::arity("missing argument")),
    }
}

fn arg_str(args: &[Value], idx: usize) -> Result<&str, SprigError> {
    match args.get(idx) {
        Some(Value::Str(s)) => Ok(s),
        Some(other) => Err(type_error(STRING, other)),
        None => Err(SprigError::arity("missing argument")),
    }
}

fn char_index(s: &str, idx: i64) -> Result<usize, SprigError> {
    let len = s.chars().count() as i64;
    if idx < 0 || idx > len {
        return Err(SprigError::runtime(format!("string index out of range: {}", idx)));
    }
    Ok(idx as usize)
}

fn substring(s: &str, start: i64, end: i64) -> Result<Value, SprigError> {
    let start = char_index(s, start)?;
    let end = char_index(s, end)?;
    if start > end {
        return Err(SprigError::runtime(format!("begin {} > end {}", start, end)));
    }
    Ok(Value::string(&s.chars().skip(start).take(end - start).collect::<String>()))
}

fn index_of(haystack: &str, needle: &str) -> Value {
    match haystack.find(needle) {
        Some(byte_idx) => Value::Int(haystack[..byte_idx].chars().count() as i64),
        None => Value::Int(-1),
    }
}

fn count_of(value: &Value) -> Result<Value, SprigError> {
    match value {
        Value::List(items) | Value::Vector(items) => Ok(Value::Int(items.len() as i64)),
        Value::Map(map) => Ok(Value::Int(map.len() as i64)),
        Value::Set(set) => Ok(Value::Int(set.len() as i64)),
        other => Err(type_error("collection", other)),
    }
}

fn object_class() -> ClassInfo {
    HostClassBuilder::new(OBJECT)
        .constructor(vec![], false, |_, _, _| Ok(Value::Nil))
        .method("toString", vec![], Ty::string(), |_, this, _| {
            Ok(Value::string(&this_of(this)?.to_display_string()))
        })
        .method("hashCode", vec![], long(), |_, this, _| {
            Ok(Value::Int(this_of(this)?.hash_code() as i64))
        })
        .method("equals", vec![obj()], boolean(), |_, this, args| {
            Ok(Value::Bool(Some(this_of(this)?) == args.first()))
        })
        .build()
}

fn number_classes() -> Vec<ClassInfo> {
    vec![
        HostClassBuilder::new(NUMBER)
            .abstract_class()
            .method("longValue", vec![], long(), |_, this, _| match this_of(this)? {
                Value::Int(n) => Ok(Value::Int(*n)),
                Value::Float(n) => Ok(Value::Int(*n as i64)),
                other => Err(type_error(NUMBER, other)),
            })
            .method("doubleValue", vec![], double(), |_, this, _| match this_of(this)? {
                Value::Int(n) => Ok(Value::Float(*n as f64)),
                Value::Float(n) => Ok(Value::Float(*n)),
                other => Err(type_error(NUMBER, other)),
            })
            .build(),
        HostClassBuilder::new(LONG)
            .extends(NUMBER)
            .final_class()
            .constant("MAX_VALUE", long(), Value::Int(i64::MAX))
            .constant("MIN_VALUE", long(), Value::Int(i64::MIN))
            .method("compareTo", vec![Ty::class(LONG)], long(), |_, this, args| {
                let a = match this_of(this)? {
                    Value::Int(n) => *n,
                    other => return Err(type_error(LONG, other)),
                };
                Ok(Value::Int(a.cmp(&arg_long(args, 0)?) as i64))
            })
            .static_method("valueOf", vec![long()], Ty::class(LONG), |_, _, args| {
                Ok(Value::Int(arg_long(args, 0)?))
            })
            .static_method("parseLong", vec![Ty::string()], long(), |_, _, args| {
                let s = arg_str(args, 0)?;
                s.trim()
                    .parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| SprigError::runtime(format!("for input string: {:?}", s)))
            })
            .build(),
        HostClassBuilder::new(DOUBLE)
            .extends(NUMBER)
            .final_class()
            .method("isNaN", vec![], boolean(), |_, this, _| match this_of(this)? {
                Value::Float(n) => Ok(Value::Bool(n.is_nan())),
                other => Err(type_error(DOUBLE, other)),
            })
            .static_method("parseDouble", vec![Ty::string()], double(), |_, _, args| {
                let s = arg_str(args, 0)?;
                s.trim()
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| SprigError::runtime(format!("for input string: {:?}", s)))
            })
            .build(),
        HostClassBuilder::new(MATH)
            .final_class()
            .constant("PI", double(), Value::Float(std::f64::consts::PI))
            .static_method("abs", vec![long()], long(), |_, _, args| {
                Ok(Value::Int(arg_long(args, 0)?.wrapping_abs()))
            })
            .static_method("abs", vec![double()], double(), |_, _, args| {
                Ok(Value::Float(arg_double(args, 0)?.abs()))
            })
            .static_method("max", vec![long(), long()], long(), |_, _, args| {
                Ok(Value::Int(arg_long(args, 0)?.max(arg_long(args, 1)?)))
            })
            .static_method("max", vec![double(), double()], double(), |_, _, args| {
                Ok(Value::Float(arg_double(args, 0)?.max(arg_double(args, 1)?)))
            })
            .static_method("min", vec![long(), long()], long(), |_, _, args| {
                Ok(Value::Int(arg_long(args, 0)?.min(arg_long(args, 1)?)))
            })
            .static_method("min", vec![double(), double()], double(), |_, _, args| {
                Ok(Value::Float(arg_double(args, 0)?.min(arg_double(args, 1)?)))
            })
            .static_method("sqrt", vec![double()], double(), |_, _, args| {
                Ok(Value::Float(arg_double(args, 0)?.sqrt()))
            })
            .build(),
    ]
}

fn string_class() -> ClassInfo {
    HostClassBuilder::new(STRING)
        .final_class()
        .method("toString", vec![], Ty::string(), |_, this, _| {
            Ok(Value::string(this_str(this)?))
        })
        .method("length", vec![], long(), |_, this, _| {
            Ok(Value::Int(this_str(this)?.chars().count() as i64))
        })
        .method("toUpperCase", vec![], Ty::string(), |_, this, _| {
            Ok(Value::string(&this_str(this)?.to_uppercase()))
        })
        .method("toLowerCase", vec![], Ty::string(), |_, this, _| {
            Ok(Value::string(&this_str(this)?.to_lowercase()))
        })
        .method("trim", vec![], Ty::string(), |_, this, _| {
            Ok(Value::string(this_str(this)?.trim()))
        })
        .method("substring", vec![long()], Ty::string(), |_, this, args| {
            let s = this_str(this)?;
            substring(s, arg_long(args, 0)?, s.chars().count() as i64)
        })
        .method("substring", vec![long(), long()], Ty::string(), |_, this, args| {
            substring(this_str(this)?, arg_long(args, 0)?, arg_long(args, 1)?)
        })
        .method("indexOf", vec![Ty::string()], long(), |_, this, args| {
            Ok(index_of(this_str(this)?, arg_str(args, 0)?))
        })
        .method("indexOf", vec![Ty::Prim(Prim::Char)], long(), |_, this, args| match args.first() {
            Some(Value::Char(c)) => Ok(index_of(this_str(this)?, &c.to_string())),
            Some(other) => Err(type_error(CHARACTER, other)),
            None => Err(SprigError::arity("missing argument")),
        })
        .method("charAt", vec![long()], Ty::Prim(Prim::Char), |_, this, args| {
            let idx = arg_long(args, 0)?;
            this_str(this)?
                .chars()
                .nth(idx.max(0) as usize)
                .filter(|_| idx >= 0)
                .map(Value::Char)
                .ok_or_else(|| SprigError::runtime(format!("string index out of range: {}", idx)))
        })
        .method("contains", vec![Ty::string()], boolean(), |_, this, args| {
            Ok(Value::Bool(this_str(this)?.contains(arg_str(args, 0)?)))
        })
        .method("startsWith", vec![Ty::string()], boolean(), |_, this, args| {
            Ok(Value::Bool(this_str(this)?.starts_with(arg_str(args, 0)?)))
        })
        .method("concat", vec![Ty::string()], Ty::string(), |_, this, args| {
            Ok(Value::string(&format!("{}{}", this_str(this)?, arg_str(args, 0)?)))
        })
        .build()
}

fn name_classes() -> Vec<ClassInfo> {
    vec![
        HostClassBuilder::new(BOOLEAN).final_class().build(),
        HostClassBuilder::new(CHARACTER)
            .final_class()
            .static_method("isDigit", vec![Ty::Prim(Prim::Char)], boolean(), |_, _, args| {
                match args.first() {
                    Some(Value::Char(c)) => Ok(Value::Bool(c.is_ascii_digit())),
                    Some(other) => Err(type_error(CHARACTER, other)),
                    None => Err(SprigError::arity("missing argument")),
                }
            })
            .build(),
        HostClassBuilder::new(KEYWORD)
            .final_class()
            .method("getName", vec![], Ty::string(), |_, this, _| match this_of(this)? {
                Value::Keyword(k) => Ok(Value::string(&k.name)),
                other => Err(type_error(KEYWORD, other)),
            })
            .build(),
        HostClassBuilder::new(SYMBOL)
            .final_class()
            .method("getName", vec![], Ty::string(), |_, this, _| match this_of(this)? {
                Value::Symbol(s) => Ok(Value::string(&s.name)),
                other => Err(type_error(SYMBOL, other)),
            })
            .method("getNamespace", vec![], Ty::string(), |_, this, _| match this_of(this)? {
                Value::Symbol(s) => Ok(s.ns.as_deref().map(Value::string).unwrap_or(Value::Nil)),
                other => Err(type_error(SYMBOL, other)),
            })
            .build(),
        HostClassBuilder::new(PATTERN)
            .final_class()
            .method("pattern", vec![], Ty::string(), |_, this, _| match this_of(this)? {
                Value::Regex(re) => Ok(Value::string(re.as_str())),
                other => Err(type_error(PATTERN, other)),
            })
            .method("matches", vec![Ty::string()], boolean(), |_, this, args| match this_of(this)? {
                Value::Regex(re) => Ok(Value::Bool(re.0.is_match(arg_str(args, 0)?))),
                other => Err(type_error(PATTERN, other)),
            })
            .build(),
    ]
}

fn collection_classes() -> Vec<ClassInfo> {
    let counted = |name: &str| {
        HostClassBuilder::new(name)
            .final_class()
            .method("count", vec![], long(), |_, this, _| count_of(this_of(this)?))
    };
    vec![
        counted(LIST).build(),
        counted(VECTOR)
            .method("nth", vec![long()], obj(), |_, this, args| match this_of(this)? {
                Value::Vector(items) => {
                    let idx = arg_long(args, 0)?;
                    usize::try_from(idx)
                        .ok()
                        .and_then(|i| items.get(i).cloned())
                        .ok_or_else(|| SprigError::runtime(format!("index out of bounds: {}", idx)))
                }
                other => Err(type_error(VECTOR, other)),
            })
            .build(),
        counted(MAP)
            .method("get", vec![obj()], obj(), |_, this, args| match this_of(this)? {
                Value::Map(map) => Ok(args.first().and_then(|k| map.get(k).cloned()).unwrap_or(Value::Nil)),
                other => Err(type_error(MAP, other)),
            })
            .build(),
        counted(SET)
            .method("contains", vec![obj()], boolean(), |_, this, args| match this_of(this)? {
                Value::Set(set) => Ok(Value::Bool(args.first().is_some_and(|k| set.contains(k)))),
                other => Err(type_error(SET, other)),
            })
            .build(),
    ]
}

fn runtime_classes() -> Vec<ClassInfo> {
    vec![
        HostClassBuilder::new(FN)
            .interface()
            .abstract_method(INVOKE, vec![Ty::class(VECTOR)], obj(), true)
            .build(),
        HostClassBuilder::new(NATIVE_FN).final_class().implements(FN).build(),
        HostClassBuilder::new(CLASS)
            .final_class()
            .method("getName", vec![], Ty::string(), |_, this, _| match this_of(this)? {
                Value::Class(c) => Ok(Value::string(&c.name)),
                other => Err(type_error(CLASS, other)),
            })
            .build(),
        HostClassBuilder::new(NAMESPACE)
            .final_class()
            .method("getName", vec![], Ty::string(), |_, this, _| match this_of(this)? {
                Value::Namespace(ns) => Ok(Value::string(&ns.name)),
                other => Err(type_error(NAMESPACE, other)),
            })
            .build(),
        HostClassBuilder::new(VAR)
            .final_class()
            .method("deref", vec![], obj(), |_, this, _| match this_of(this)? {
                Value::Var(var) => var.deref_value(),
                other => Err(type_error(VAR, other)),
            })
            .method("isBound", vec![], boolean(), |_, this, _| match this_of(this)? {
                Value::Var(var) => Ok(Value::Bool(var.is_bound())),
                other => Err(type_error(VAR, other)),
            })
            .build(),
        HostClassBuilder::new(SPECIAL_FORM).final_class().build(),
        HostClassBuilder::new(TUPLE)
            .field("items", Ty::class(VECTOR))
            .constructor(vec![Ty::class(VECTOR)], true, |_, this, args| {
                let items = match args.first() {
                    Some(v @ Value::Vector(_)) => v.clone(),
                    Some(Value::List(items)) => Value::Vector(items.clone()),
                    _ => Value::vector([]),
                };
                set_field(this, "items", items)
            })
            .method("size", vec![], long(), |_, this, _| count_of(&get_field(this, "items")?))
            .method("get", vec![long()], obj(), |_, this, args| {
                let idx = arg_long(args, 0)?;
                match get_field(this, "items")? {
                    Value::Vector(items) => usize::try_from(idx)
                        .ok()
                        .and_then(|i| items.get(i).cloned())
                        .ok_or_else(|| SprigError::runtime(format!("index out of bounds: {}", idx))),
                    other => Err(type_error(VECTOR, &other)),
                }
            })
            .build(),
    ]
}

fn exception_classes() -> Vec<ClassInfo> {
    let mut out = vec![HostClassBuilder::new(EXCEPTION)
        .field("message", Ty::string())
        .constructor(vec![], false, |_, _, _| Ok(Value::Nil))
        .constructor(vec![Ty::string()], false, |_, this, args| {
            set_field(this, "message", args.first().cloned().unwrap_or(Value::Nil))
        })
        .method("getMessage", vec![], Ty::string(), |_, this, _| get_field(this, "message"))
        .build()];
    for name in [LINKAGE_ERROR, ARITY_ERROR, CLASS_CAST] {
        out.push(
            HostClassBuilder::new(name)
                .extends(EXCEPTION)
                .constructor(vec![Ty::string()], false, |_, this, args| {
                    set_field(this, "message", args.first().cloned().unwrap_or(Value::Nil))
                })
                .build(),
        );
    }
    out
}

fn get_field(this: Option<&Value>, name: &str) -> Result<Value, SprigError> {
    match this_of(this)? {
        Value::Object(inst) => inst.get_field(name),
        other => Err(type_error("object", other)),
    }
}

fn set_field(this: Option<&Value>, name: &str, value: Value) -> Result<Value, SprigError> {
    match this_of(this)? {
        Value::Object(inst) => {
            inst.set_field(name, value)?;
            Ok(Value::Nil)
        }
        other => Err(type_error("object", other)),
    }
}

/// Registers every built-in class, parents before children.
pub fn install(registry: &ClassRegistry) {
    let mut classes = vec![object_class()];
    classes.extend(number_classes());
    classes.push(string_class());
    classes.extend(name_classes());
    classes.extend(collection_classes());
    classes.extend(runtime_classes());
    classes.extend(exception_classes());
    for class in classes {
        let name = class.name.clone();
        if let Err(err) = registry.register(class) {
            tracing::error!(class = %name, error = %err, "failed to register host class");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_imports_use_simple_names() {
        assert!(DEFAULT_IMPORTS.contains(&("String", STRING)));
        assert!(DEFAULT_IMPORTS.contains(&("Math", MATH)));
    }

    #[test]
    fn every_builtin_registers() {
        let reg = ClassRegistry::with_builtins();
        for (_, full) in DEFAULT_IMPORTS.iter() {
            assert!(reg.contains(full), "{}", full);
        }
    }
}
