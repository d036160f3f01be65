use im::{HashMap, HashSet, Vector};

use crate::builtins::{def_builtin, err};
use crate::error::SprigError;
use crate::host::names;
use crate::namespaces::Namespace;
use crate::types::{Prim, Ty};
use crate::value::{Arity, Value};

fn items_of(value: &Value, op: &str) -> Result<Vec<Value>, SprigError> {
    value
        .seq_items()
        .ok_or_else(|| SprigError::runtime(format!("{} cannot iterate {}", op, value.type_name())))
}

fn map_from_pairs(args: &[Value]) -> Result<Value, SprigError> {
    if args.len() % 2 != 0 {
        return err("hash-map needs an even number of arguments");
    }
    Ok(Value::Map(
        args.chunks(2)
            .map(|kv| (kv[0].clone(), kv[1].clone()))
            .collect::<HashMap<_, _>>(),
    ))
}

fn conj_one(coll: Value, item: Value) -> Result<Value, SprigError> {
    Ok(match coll {
        Value::Nil => Value::list([item]),
        Value::List(mut items) => {
            items.push_front(item);
            Value::List(items)
        }
        Value::Vector(mut items) => {
            items.push_back(item);
            Value::Vector(items)
        }
        Value::Set(mut items) => {
            items.insert(item);
            Value::Set(items)
        }
        Value::Map(mut map) => match item {
            Value::Vector(pair) if pair.len() == 2 => {
                map.insert(pair[0].clone(), pair[1].clone());
                Value::Map(map)
            }
            other => return err(format!("cannot conj {} onto a map", other.type_name())),
        },
        other => return err(format!("cannot conj onto {}", other.type_name())),
    })
}

pub(crate) fn install(ns: &Namespace) {
    def_builtin!(ns, "list", Arity::at_least(0), Ty::class(names::LIST), |_, args| {
        Ok(Value::list(args.iter().cloned()))
    });
    def_builtin!(ns, "vector", Arity::at_least(0), Ty::class(names::VECTOR), |_, args| {
        Ok(Value::vector(args.iter().cloned()))
    });
    def_builtin!(ns, "hash-map", Arity::at_least(0), Ty::class(names::MAP), |_, args| map_from_pairs(args));
    def_builtin!(ns, "hash-set", Arity::at_least(0), Ty::class(names::SET), |_, args| {
        Ok(Value::Set(args.iter().cloned().collect::<HashSet<_>>()))
    });
    def_builtin!(ns, "vec", Arity::exact(1), Ty::class(names::VECTOR), |_, args| {
        Ok(Value::vector(items_of(&args[0], "vec")?))
    });
    def_builtin!(ns, "seq", Arity::exact(1), Ty::Any, |_, args| {
        let items = items_of(&args[0], "seq")?;
        Ok(if items.is_empty() { Value::Nil } else { Value::list(items) })
    });
    def_builtin!(ns, "count", Arity::exact(1), Ty::Prim(Prim::Long), |_, args| {
        Ok(Value::Int(items_of(&args[0], "count")?.len() as i64))
    });
    def_builtin!(ns, "empty?", Arity::exact(1), Ty::Prim(Prim::Boolean), |_, args| {
        Ok(Value::Bool(items_of(&args[0], "empty?")?.is_empty()))
    });
    def_builtin!(ns, "first", Arity::exact(1), Ty::Any, |_, args| {
        Ok(items_of(&args[0], "first")?.into_iter().next().unwrap_or(Value::Nil))
    });
    def_builtin!(ns, "second", Arity::exact(1), Ty::Any, |_, args| {
        Ok(items_of(&args[0], "second")?.into_iter().nth(1).unwrap_or(Value::Nil))
    });
    def_builtin!(ns, "rest", Arity::exact(1), Ty::class(names::LIST), |_, args| {
        Ok(Value::list(items_of(&args[0], "rest")?.into_iter().skip(1)))
    });
    def_builtin!(ns, "next", Arity::exact(1), Ty::Any, |_, args| {
        let items = items_of(&args[0], "next")?;
        Ok(if items.len() > 1 { Value::list(items.into_iter().skip(1)) } else { Value::Nil })
    });
    def_builtin!(ns, "nth", Arity::range(2, 3), Ty::Any, |_, args| {
        let items = items_of(&args[0], "nth")?;
        let idx = args[1]
            .as_int()
            .ok_or_else(|| SprigError::runtime("nth index must be a long"))?;
        match usize::try_from(idx).ok().and_then(|i| items.get(i).cloned()) {
            Some(v) => Ok(v),
            None => match args.get(2) {
                Some(default) => Ok(default.clone()),
                None => err(format!("index out of bounds: {}", idx)),
            },
        }
    });
    def_builtin!(ns, "cons", Arity::exact(2), Ty::class(names::LIST), |_, args| {
        let mut items: Vector<Value> = items_of(&args[1], "cons")?.into_iter().collect();
        items.push_front(args[0].clone());
        Ok(Value::List(items))
    });
    def_builtin!(ns, "conj", Arity::at_least(1), Ty::Any, |_, args| {
        let (coll, items) = args.split_first().ok_or_else(|| SprigError::arity("conj needs a collection"))?;
        items.iter().try_fold(coll.clone(), |acc, item| conj_one(acc, item.clone()))
    });
    def_builtin!(ns, "concat", Arity::at_least(0), Ty::class(names::LIST), |_, args| {
        let mut out = Vec::new();
        for arg in args {
            out.extend(items_of(arg, "concat")?);
        }
        Ok(Value::list(out))
    });
    def_builtin!(ns, "list*", Arity::at_least(1), Ty::class(names::LIST), |_, args| {
        let (last, init) = args.split_last().ok_or_else(|| SprigError::arity("list* needs arguments"))?;
        let mut out = init.to_vec();
        out.extend(items_of(last, "list*")?);
        Ok(Value::list(out))
    });
    def_builtin!(ns, "get", Arity::range(2, 3), Ty::Any, |_, args| {
        let default = args.get(2).cloned().unwrap_or(Value::Nil);
        Ok(match &args[0] {
            Value::Map(map) => map.get(&args[1]).cloned().unwrap_or(default),
            Value::Set(set) if set.contains(&args[1]) => args[1].clone(),
            Value::Vector(items) => args[1]
                .as_int()
                .and_then(|i| usize::try_from(i).ok())
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(default),
            _ => default,
        })
    });
    def_builtin!(ns, "assoc", Arity::at_least(3), Ty::Any, |_, args| {
        let (target, pairs) = args.split_first().ok_or_else(|| SprigError::arity("assoc needs a map"))?;
        if pairs.len() % 2 != 0 {
            return err("assoc needs key/value pairs");
        }
        let mut map = match target {
            Value::Map(map) => map.clone(),
            Value::Nil => HashMap::new(),
            other => return err(format!("cannot assoc onto {}", other.type_name())),
        };
        for kv in pairs.chunks(2) {
            map.insert(kv[0].clone(), kv[1].clone());
        }
        Ok(Value::Map(map))
    });
    def_builtin!(ns, "contains?", Arity::exact(2), Ty::Prim(Prim::Boolean), |_, args| {
        Ok(Value::Bool(match &args[0] {
            Value::Map(map) => map.contains_key(&args[1]),
            Value::Set(set) => set.contains(&args[1]),
            Value::Vector(items) => args[1]
                .as_int()
                .map_or(false, |i| i >= 0 && (i as usize) < items.len()),
            _ => false,
        }))
    });
    def_builtin!(ns, "map", Arity::exact(2), Ty::class(names::LIST), |rt, args| {
        let items = items_of(&args[1], "map")?;
        let mapped = items
            .iter()
            .map(|item| rt.apply(&args[0], std::slice::from_ref(item)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Value::list(mapped))
    });
    def_builtin!(ns, "filter", Arity::exact(2), Ty::class(names::LIST), |rt, args| {
        let mut out = Vec::new();
        for item in items_of(&args[1], "filter")? {
            if rt.apply(&args[0], std::slice::from_ref(&item))?.truthy() {
                out.push(item);
            }
        }
        Ok(Value::list(out))
    });
    def_builtin!(ns, "reduce", Arity::range(2, 3), Ty::Any, |rt, args| {
        let (init, items) = match args {
            [_, coll] => {
                let mut items = items_of(coll, "reduce")?.into_iter();
                match items.next() {
                    Some(first) => (first, items.collect::<Vec<_>>()),
                    None => return rt.apply(&args[0], &[]),
                }
            }
            [_, init, coll] => (init.clone(), items_of(coll, "reduce")?),
            _ => return Err(SprigError::arity("reduce takes two or three arguments")),
        };
        items
            .into_iter()
            .try_fold(init, |acc, item| rt.apply(&args[0], &[acc, item]))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conj_follows_collection_kind() -> Result<(), SprigError> {
        let list = conj_one(Value::list([Value::Int(2)]), Value::Int(1))?;
        assert_eq!(list, Value::list([Value::Int(1), Value::Int(2)]));
        let vector = conj_one(Value::vector([Value::Int(1)]), Value::Int(2))?;
        assert_eq!(vector, Value::vector([Value::Int(1), Value::Int(2)]));
        assert!(conj_one(Value::Int(1), Value::Int(2)).is_err());
        Ok(())
    }

    #[test]
    fn odd_map_arguments_fail() {
        assert!(map_from_pairs(&[Value::keyword("a")]).is_err());
    }
}
