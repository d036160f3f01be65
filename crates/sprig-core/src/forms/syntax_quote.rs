use std::collections::HashMap;

use im::{HashMap as ImMap, HashSet as ImSet};

use crate::ast::{datum_to_value, Datum, DatumKind};
use crate::compiler::state::CompilerState;
use crate::error::SprigError;
use crate::symbols::{split_qualified, Symbol};
use crate::value::Value;
use crate::vm::bytecode::{CollKind, Constant, Instruction};

use super::macros::DERIVED_FORMS;
use super::{box_top, collection_parts, compile_form, constant_of, evaluate_form, DeferredCompilation};

/// Names kept verbatim: they are read by the compiler rather than resolved.
const RESERVED: &[&str] = &["&", "catch", "finally", "recur"];

/// `(unquote x)` or `(unquote-splicing x)`: the inner form and whether it
/// splices.
fn unquoted(datum: &Datum) -> Option<(&Datum, bool)> {
    match datum.as_list()? {
        [head, inner] => match head.as_symbol()? {
            "unquote" => Some((inner, false)),
            "unquote-splicing" => Some((inner, true)),
            _ => None,
        },
        _ => None,
    }
}

fn has_unquote(datum: &Datum) -> bool {
    if unquoted(datum).is_some() {
        return true;
    }
    match &datum.kind {
        DatumKind::List(items) | DatumKind::Vector(items) | DatumKind::Set(items) => items.iter().any(has_unquote),
        DatumKind::Map(pairs) => pairs.iter().any(|(k, v)| has_unquote(k) || has_unquote(v)),
        _ => false,
    }
}

fn auto_gensym(state: &mut CompilerState, name: &str) -> Result<String, SprigError> {
    let next = state.rt.next_id();
    let env = state
        .gensym_envs
        .last_mut()
        .ok_or_else(|| SprigError::compile(format!("Gensym literal {} not in syntax-quote", name)))?;
    let base = &name[..name.len() - 1];
    Ok(env
        .entry(name.to_string())
        .or_insert_with(|| format!("{}__{}__auto__", base, next))
        .clone())
}

/// The name a template symbol stands for.
pub fn qualify(state: &mut CompilerState, name: &str) -> Result<String, SprigError> {
    if name.len() > 1 && name.ends_with('#') && !name.contains('/') {
        return auto_gensym(state, name);
    }
    if RESERVED.contains(&name) || DERIVED_FORMS.contains(&name) {
        return Ok(name.to_string());
    }
    if name.len() > 1 && (name.starts_with('.') || name.ends_with('.')) {
        return Ok(name.to_string());
    }
    let ns = state.rt.current_ns();
    if let (Some(qualifier), member) = split_qualified(name) {
        return Ok(match ns.resolve_alias(qualifier) {
            Some(full) => format!("{}/{}", full, member),
            None => name.to_string(),
        });
    }
    if let Some(var) = ns.resolve(name) {
        return Ok(if matches!(var.deref_value(), Ok(Value::Intrinsic(_))) {
            name.to_string()
        } else {
            var.qualified_name()
        });
    }
    if let Some(class) = state.rt.resolve_class(name) {
        return Ok(class.name.clone());
    }
    Ok(format!("{}/{}", ns.name, name))
}

/// The template with every symbol qualified, for templates with nothing to
/// evaluate.
fn qualify_datum(state: &mut CompilerState, datum: &Datum) -> Result<Datum, SprigError> {
    let kind = match &datum.kind {
        DatumKind::Symbol(name) => DatumKind::Symbol(qualify(state, name)?),
        DatumKind::List(items) => DatumKind::List(qualify_all(state, items)?),
        DatumKind::Vector(items) => DatumKind::Vector(qualify_all(state, items)?),
        DatumKind::Set(items) => DatumKind::Set(qualify_all(state, items)?),
        DatumKind::Map(pairs) => DatumKind::Map(
            pairs
                .iter()
                .map(|(k, v)| Ok((qualify_datum(state, k)?, qualify_datum(state, v)?)))
                .collect::<Result<_, SprigError>>()?,
        ),
        other => other.clone(),
    };
    let mut out = datum.clone();
    out.kind = kind;
    Ok(out)
}

fn qualify_all(state: &mut CompilerState, items: &[Datum]) -> Result<Vec<Datum>, SprigError> {
    items.iter().map(|d| qualify_datum(state, d)).collect()
}

/// Runs `f` with a fresh auto-gensym table.
fn with_gensyms<T>(state: &mut CompilerState, f: impl FnOnce(&mut CompilerState) -> Result<T, SprigError>) -> Result<T, SprigError> {
    state.gensym_envs.push(HashMap::new());
    let result = f(state);
    state.gensym_envs.pop();
    result
}

fn template<'a>(datum: &Datum, args: &'a [Datum]) -> Result<&'a Datum, SprigError> {
    match args {
        [template] => Ok(template),
        _ => Err(datum.syntax_error("syntax-quote takes exactly one argument")),
    }
}

pub fn compile(state: &mut CompilerState, datum: &Datum, args: &[Datum]) -> Result<(), SprigError> {
    let template = template(datum, args)?;
    with_gensyms(state, |s| {
        let (unit, splice) = compile_element(s, template)?;
        if splice {
            return Err(template.compile_error("unquote-splicing used outside of a collection"));
        }
        unit.compile(s)
    })
}

pub fn evaluate(state: &mut CompilerState, datum: &Datum, args: &[Datum]) -> Result<Value, SprigError> {
    let template = template(datum, args)?;
    with_gensyms(state, |s| {
        let (value, splice) = evaluate_element(s, template)?;
        if splice {
            return Err(template.compile_error("unquote-splicing used outside of a collection"));
        }
        Ok(value)
    })
}

/// Analyzes one template element. Symbols and gensyms are resolved now, so
/// the emitted code only loads constants and the unquoted forms.
pub fn compile_element<'a>(state: &mut CompilerState, datum: &'a Datum) -> Result<(DeferredCompilation<'a>, bool), SprigError> {
    if let Some((inner, splice)) = unquoted(datum) {
        return Ok((DeferredCompilation::new(datum, None, move |s| compile_form(s, inner)), splice));
    }
    if !has_unquote(datum) {
        let constant = match &datum.kind {
            DatumKind::Symbol(name) => Constant::Symbol(qualify(state, name)?),
            DatumKind::List(_) | DatumKind::Vector(_) | DatumKind::Set(_) | DatumKind::Map(_) => {
                Constant::Quoted(qualify_datum(state, datum)?)
            }
            _ => constant_of(datum).ok_or_else(|| SprigError::internal(format!("{} is not a literal", datum)))?,
        };
        return Ok((DeferredCompilation::constant(datum, constant), false));
    }
    let (kind, items, count) =
        collection_parts(datum).ok_or_else(|| SprigError::internal("unquote inside a non-collection"))?;
    let mut units = Vec::with_capacity(items.len());
    for item in items {
        units.push(compile_element(state, item)?);
    }
    let splices: Vec<bool> = units.iter().map(|(_, splice)| *splice).collect();
    if kind == CollKind::Map && splices.contains(&true) {
        return Err(datum.compile_error("unquote-splicing is not supported inside a map"));
    }
    let emit = move |s: &mut CompilerState| {
        s.with_tail(false, |s| {
            for (unit, _) in units {
                unit.compile(s)?;
                box_top(s)?;
            }
            Ok(())
        })?;
        if splices.contains(&true) {
            s.emit(Instruction::BuildSpliced { kind, splices })
        } else {
            s.emit(Instruction::MakeCollection { kind, count })
        }
    };
    Ok((DeferredCompilation::new(datum, None, emit), false))
}

fn spliced(value: Value, datum: &Datum) -> Result<Vec<Value>, SprigError> {
    value
        .seq_items()
        .ok_or_else(|| datum.compile_error(format!("Cannot splice a {} into a template", value.type_name())))
}

fn evaluate_items(state: &mut CompilerState, items: &[Datum]) -> Result<Vec<Value>, SprigError> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match evaluate_element(state, item)? {
            (value, true) => out.extend(spliced(value, item)?),
            (value, false) => out.push(value),
        }
    }
    Ok(out)
}

/// Interprets one template element; the flag marks values to splice into
/// the enclosing collection.
pub fn evaluate_element(state: &mut CompilerState, datum: &Datum) -> Result<(Value, bool), SprigError> {
    if let Some((inner, splice)) = unquoted(datum) {
        let value = state.with_tail(false, |s| evaluate_form(s, inner))?;
        return Ok((value, splice));
    }
    let value = match &datum.kind {
        DatumKind::Symbol(name) => Value::Symbol(Symbol::parse(&qualify(state, name)?)),
        DatumKind::List(items) => Value::list(evaluate_items(state, items)?),
        DatumKind::Vector(items) => Value::vector(evaluate_items(state, items)?),
        DatumKind::Set(items) => Value::Set(evaluate_items(state, items)?.into_iter().collect::<ImSet<_>>()),
        DatumKind::Map(pairs) => {
            let mut map = ImMap::new();
            for (k, v) in pairs {
                let (key, key_splice) = evaluate_element(state, k)?;
                let (value, value_splice) = evaluate_element(state, v)?;
                if key_splice || value_splice {
                    return Err(datum.compile_error("unquote-splicing is not supported inside a map"));
                }
                map.insert(key, value);
            }
            Value::Map(map)
        }
        _ => datum_to_value(datum),
    };
    Ok((value, false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_str;
    use crate::runtime::Runtime;

    fn expand(state: &mut CompilerState, src: &str) -> Result<String, SprigError> {
        let datum = read_str(src)?.remove(0);
        let items = datum.as_list().unwrap_or(&[]);
        Ok(evaluate(state, &datum, &items[1..])?.to_string())
    }

    #[test]
    fn symbols_are_qualified() -> Result<(), SprigError> {
        let rt = Runtime::new();
        let mut state = CompilerState::new(&rt);
        assert_eq!(expand(&mut state, "`(inc x)")?, "(sprig.core/inc user/x)");
        assert_eq!(expand(&mut state, "`(if a b)")?, "(if user/a user/b)");
        Ok(())
    }

    #[test]
    fn gensyms_are_shared_within_one_template() -> Result<(), SprigError> {
        let rt = Runtime::new();
        let mut state = CompilerState::new(&rt);
        let text = expand(&mut state, "`(let [t# 1] t#)")?;
        let value = read_str(&text)?.remove(0);
        let items = value.as_list().unwrap_or(&[]);
        let bound = items[1].as_vector().and_then(|v| v[0].as_symbol()).map(str::to_string);
        assert_eq!(bound.as_deref(), items[2].as_symbol());
        assert!(bound.unwrap_or_default().ends_with("__auto__"));
        Ok(())
    }

    #[test]
    fn gensym_outside_template_fails() {
        let rt = Runtime::new();
        let mut state = CompilerState::new(&rt);
        assert!(qualify(&mut state, "x#").is_err());
    }

    #[test]
    fn templates_without_unquotes_fold() -> Result<(), SprigError> {
        let rt = Runtime::new();
        let mut state = CompilerState::new(&rt);
        let datum = read_str("(a [b 1])")?.remove(0);
        let (unit, splice) = with_gensyms(&mut state, |s| compile_element(s, &datum))?;
        assert!(!splice);
        assert!(matches!(unit.ldc_form, Some(Constant::Quoted(_))));
        Ok(())
    }
}
