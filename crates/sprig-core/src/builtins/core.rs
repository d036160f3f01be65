use std::cmp::Ordering;

use crate::builtins::{def_builtin, err};
use crate::error::SprigError;
use crate::host::names;
use crate::namespaces::Namespace;
use crate::runtime::Runtime;
use crate::types::{Prim, Ty};
use crate::value::{Arity, Value};

enum Num {
    Int(i64),
    Float(f64),
}

fn as_number(value: &Value, op: &str) -> Result<Num, SprigError> {
    match value {
        Value::Int(n) => Ok(Num::Int(*n)),
        Value::Float(n) => Ok(Num::Float(*n)),
        other => err(format!(
            "{} expects numbers, got {}",
            op,
            other.class_name().unwrap_or("nil")
        )),
    }
}

fn to_float(n: &Num) -> f64 {
    match n {
        Num::Int(i) => *i as f64,
        Num::Float(f) => *f,
    }
}

fn overflow(op: &str) -> SprigError {
    SprigError::runtime(format!("integer overflow in {}", op))
}

fn arith(
    op: &str,
    a: &Value,
    b: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, SprigError> {
    match (as_number(a, op)?, as_number(b, op)?) {
        (Num::Int(x), Num::Int(y)) => int_op(x, y).map(Value::Int).ok_or_else(|| overflow(op)),
        (x, y) => Ok(Value::Float(float_op(to_float(&x), to_float(&y)))),
    }
}

fn fold_arith(
    op: &str,
    args: &[Value],
    identity: i64,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, SprigError> {
    let mut acc = Value::Int(identity);
    for arg in args {
        acc = arith(op, &acc, arg, int_op, float_op)?;
    }
    Ok(acc)
}

fn divide(a: &Value, b: &Value) -> Result<Value, SprigError> {
    match (as_number(a, "/")?, as_number(b, "/")?) {
        (_, Num::Int(0)) => err("Divide by zero"),
        (Num::Int(x), Num::Int(y)) => match x.checked_rem(y) {
            Some(0) => x.checked_div(y).map(Value::Int).ok_or_else(|| overflow("/")),
            Some(_) => Ok(Value::Float(x as f64 / y as f64)),
            None => Err(overflow("/")),
        },
        (x, y) => Ok(Value::Float(to_float(&x) / to_float(&y))),
    }
}

fn modulo(a: &Value, b: &Value) -> Result<Value, SprigError> {
    match (as_number(a, "mod")?, as_number(b, "mod")?) {
        (_, Num::Int(0)) => err("Divide by zero"),
        (Num::Int(x), Num::Int(y)) => x.checked_rem_euclid(y).map(Value::Int).ok_or_else(|| overflow("mod")),
        (x, y) => Ok(Value::Float(to_float(&x).rem_euclid(to_float(&y)))),
    }
}

fn compare(op: &str, a: &Value, b: &Value) -> Result<Ordering, SprigError> {
    match (as_number(a, op)?, as_number(b, op)?) {
        (Num::Int(x), Num::Int(y)) => Ok(x.cmp(&y)),
        (x, y) => to_float(&x)
            .partial_cmp(&to_float(&y))
            .ok_or_else(|| SprigError::runtime(format!("{} cannot order NaN", op))),
    }
}

fn chain(op: &str, args: &[Value], accept: fn(Ordering) -> bool) -> Result<Value, SprigError> {
    for pair in args.windows(2) {
        if !accept(compare(op, &pair[0], &pair[1])?) {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn numeric_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => (*x as f64) == *y,
        _ => a == b,
    }
}

fn boolean() -> Ty {
    Ty::Prim(Prim::Boolean)
}

fn print_str(rt: &Runtime, args: &[Value], readable: bool) -> Result<String, SprigError> {
    let parts = args
        .iter()
        .map(|v| rt.display_string(v, readable))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(parts.join(" "))
}

pub(crate) fn install(ns: &Namespace) {
    def_builtin!(ns, "+", Arity::at_least(0), Ty::Any, |_, args| {
        fold_arith("+", args, 0, i64::checked_add, |x, y| x + y)
    });
    def_builtin!(ns, "*", Arity::at_least(0), Ty::Any, |_, args| {
        fold_arith("*", args, 1, i64::checked_mul, |x, y| x * y)
    });
    def_builtin!(ns, "-", Arity::at_least(1), Ty::Any, |_, args| match args {
        [only] => arith("-", &Value::Int(0), only, i64::checked_sub, |x, y| x - y),
        [first, rest @ ..] => {
            let mut acc = first.clone();
            for arg in rest {
                acc = arith("-", &acc, arg, i64::checked_sub, |x, y| x - y)?;
            }
            Ok(acc)
        }
        [] => err("- needs an argument"),
    });
    def_builtin!(ns, "/", Arity::at_least(1), Ty::Any, |_, args| match args {
        [only] => divide(&Value::Int(1), only),
        [first, rest @ ..] => {
            let mut acc = first.clone();
            for arg in rest {
                acc = divide(&acc, arg)?;
            }
            Ok(acc)
        }
        [] => err("/ needs an argument"),
    });
    def_builtin!(ns, "mod", Arity::exact(2), Ty::Any, |_, args| modulo(&args[0], &args[1]));
    def_builtin!(ns, "inc", Arity::exact(1), Ty::Any, |_, args| {
        arith("inc", &args[0], &Value::Int(1), i64::checked_add, |x, y| x + y)
    });
    def_builtin!(ns, "dec", Arity::exact(1), Ty::Any, |_, args| {
        arith("dec", &args[0], &Value::Int(1), i64::checked_sub, |x, y| x - y)
    });

    def_builtin!(ns, "<", Arity::at_least(1), boolean(), |_, args| chain("<", args, Ordering::is_lt));
    def_builtin!(ns, ">", Arity::at_least(1), boolean(), |_, args| chain(">", args, Ordering::is_gt));
    def_builtin!(ns, "<=", Arity::at_least(1), boolean(), |_, args| chain("<=", args, Ordering::is_le));
    def_builtin!(ns, ">=", Arity::at_least(1), boolean(), |_, args| chain(">=", args, Ordering::is_ge));
    def_builtin!(ns, "=", Arity::at_least(1), boolean(), |_, args| {
        Ok(Value::Bool(args.windows(2).all(|pair| numeric_eq(&pair[0], &pair[1]))))
    });
    def_builtin!(ns, "not=", Arity::at_least(1), boolean(), |_, args| {
        Ok(Value::Bool(!args.windows(2).all(|pair| numeric_eq(&pair[0], &pair[1]))))
    });
    def_builtin!(ns, "identical?", Arity::exact(2), boolean(), |_, args| {
        Ok(Value::Bool(match (&args[0], &args[1]) {
            (Value::Object(a), Value::Object(b)) => std::sync::Arc::ptr_eq(a, b),
            (a, b) => a == b,
        }))
    });
    def_builtin!(ns, "not", Arity::exact(1), boolean(), |_, args| Ok(Value::Bool(!args[0].truthy())));
    def_builtin!(ns, "nil?", Arity::exact(1), boolean(), |_, args| Ok(Value::Bool(args[0].is_nil())));
    def_builtin!(ns, "zero?", Arity::exact(1), boolean(), |_, args| {
        Ok(Value::Bool(match as_number(&args[0], "zero?")? {
            Num::Int(n) => n == 0,
            Num::Float(n) => n == 0.0,
        }))
    });
    def_builtin!(ns, "even?", Arity::exact(1), boolean(), |_, args| match &args[0] {
        Value::Int(n) => Ok(Value::Bool(n % 2 == 0)),
        other => err(format!("even? expects a long, got {}", other.type_name())),
    });
    def_builtin!(ns, "odd?", Arity::exact(1), boolean(), |_, args| match &args[0] {
        Value::Int(n) => Ok(Value::Bool(n % 2 != 0)),
        other => err(format!("odd? expects a long, got {}", other.type_name())),
    });

    def_builtin!(ns, "str", Arity::at_least(0), Ty::string(), |rt, args| {
        let text = args
            .iter()
            .map(|v| rt.display_string(v, false))
            .collect::<Result<String, _>>()?;
        Ok(Value::string(&text))
    });
    def_builtin!(ns, "pr-str", Arity::at_least(0), Ty::string(), |rt, args| {
        Ok(Value::string(&print_str(rt, args, true)?))
    });
    def_builtin!(ns, "println", Arity::at_least(0), Ty::Any, |rt, args| {
        println!("{}", print_str(rt, args, false)?);
        Ok(Value::Nil)
    });
    def_builtin!(ns, "prn", Arity::at_least(0), Ty::Any, |rt, args| {
        println!("{}", print_str(rt, args, true)?);
        Ok(Value::Nil)
    });

    def_builtin!(ns, "identity", Arity::exact(1), Ty::Any, |_, args| Ok(args[0].clone()));
    def_builtin!(ns, "class", Arity::exact(1), Ty::class(names::CLASS), |rt, args| {
        match args[0].class_name() {
            Some(name) => rt
                .classes
                .get(name)
                .map(Value::Class)
                .ok_or_else(|| SprigError::linkage(format!("class {} not found", name))),
            None => Ok(Value::Nil),
        }
    });
    def_builtin!(ns, "gensym", Arity::range(0, 1), Ty::class(names::SYMBOL), |rt, args| {
        let prefix = match args.first() {
            Some(Value::Str(s)) => s.to_string(),
            Some(Value::Symbol(s)) => s.name.to_string(),
            Some(other) => return err(format!("gensym prefix must be a string, got {}", other.type_name())),
            None => "G".to_string(),
        };
        Ok(Value::symbol(&rt.gensym(&prefix)))
    });
    def_builtin!(ns, "symbol", Arity::exact(1), Ty::class(names::SYMBOL), |_, args| match &args[0] {
        Value::Str(s) => Ok(Value::symbol(s)),
        sym @ Value::Symbol(_) => Ok(sym.clone()),
        other => err(format!("cannot make a symbol from {}", other.type_name())),
    });
    def_builtin!(ns, "keyword", Arity::exact(1), Ty::class(names::KEYWORD), |_, args| match &args[0] {
        Value::Str(s) => Ok(Value::keyword(s)),
        Value::Symbol(s) => Ok(Value::Keyword(s.clone())),
        kw @ Value::Keyword(_) => Ok(kw.clone()),
        other => err(format!("cannot make a keyword from {}", other.type_name())),
    });
    def_builtin!(ns, "name", Arity::exact(1), Ty::string(), |_, args| match &args[0] {
        Value::Str(s) => Ok(Value::Str(s.clone())),
        Value::Symbol(s) | Value::Keyword(s) => Ok(Value::string(&s.name)),
        other => err(format!("{} has no name", other.type_name())),
    });
    def_builtin!(ns, "ex-message", Arity::exact(1), Ty::Any, |_, args| match &args[0] {
        Value::Object(inst) if inst.class.layout.iter().any(|f| f == "message") => inst.get_field("message"),
        _ => Ok(Value::Nil),
    });
    def_builtin!(ns, "apply", Arity::at_least(2), Ty::Any, |rt, args| {
        let (f, rest) = args.split_first().ok_or_else(|| SprigError::arity("apply needs a function"))?;
        let (last, middle) = rest.split_last().ok_or_else(|| SprigError::arity("apply needs arguments"))?;
        let mut call_args = middle.to_vec();
        call_args.extend(
            last.seq_items()
                .ok_or_else(|| SprigError::runtime(format!("apply cannot spread {}", last.type_name())))?,
        );
        rt.apply(f, &call_args)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_arithmetic_widens_to_double() -> Result<(), SprigError> {
        assert_eq!(arith("+", &Value::Int(1), &Value::Float(0.5), i64::checked_add, |x, y| x + y)?, Value::Float(1.5));
        assert_eq!(divide(&Value::Int(6), &Value::Int(3))?, Value::Int(2));
        assert_eq!(divide(&Value::Int(1), &Value::Int(2))?, Value::Float(0.5));
        assert!(divide(&Value::Int(1), &Value::Int(0)).is_err());
        Ok(())
    }

    #[test]
    fn overflow_is_reported() {
        let res = arith("+", &Value::Int(i64::MAX), &Value::Int(1), i64::checked_add, |x, y| x + y);
        assert!(matches!(res, Err(SprigError::Runtime(_))));
    }

    #[test]
    fn min_long_by_minus_one_overflows() {
        let (min, neg) = (Value::Int(i64::MIN), Value::Int(-1));
        assert!(matches!(divide(&min, &neg), Err(SprigError::Runtime(_))));
        assert!(matches!(modulo(&min, &neg), Err(SprigError::Runtime(_))));
    }

    #[test]
    fn modulo_of_positive_divisor_is_non_negative() -> Result<(), SprigError> {
        assert_eq!(modulo(&Value::Int(-7), &Value::Int(3))?, Value::Int(2));
        assert_eq!(modulo(&Value::Int(i64::MIN), &Value::Int(2))?, Value::Int(0));
        assert_eq!(divide(&Value::Int(i64::MIN), &Value::Int(2))?, Value::Int(i64::MIN / 2));
        assert!(modulo(&Value::Int(1), &Value::Int(0)).is_err());
        Ok(())
    }

    #[test]
    fn comparison_chains() -> Result<(), SprigError> {
        let args = [Value::Int(1), Value::Float(2.5), Value::Int(3)];
        assert_eq!(chain("<", &args, Ordering::is_lt)?, Value::Bool(true));
        assert_eq!(chain(">", &args, Ordering::is_gt)?, Value::Bool(false));
        assert!(numeric_eq(&Value::Int(2), &Value::Float(2.0)));
        Ok(())
    }
}
