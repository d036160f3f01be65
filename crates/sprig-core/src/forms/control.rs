use std::collections::BTreeMap;

use crate::ast::{datum_to_value, Datum, DatumKind, Span};
use crate::compiler::loops::LoopTarget;
use crate::compiler::scopes::{Binding, VarScope};
use crate::compiler::stack::StackRecord;
use crate::compiler::state::CompilerState;
use crate::emit::code::Hole;
use crate::emit::coerce::{coerce, compatible, to_boxed};
use crate::error::SprigError;
use crate::host::names;
use crate::link::{CallSiteSpec, SiteKind};
use crate::symbols::CORE_NS;
use crate::types::{Prim, Ty};
use crate::value::Value;
use crate::vm::bytecode::{Constant, Instruction, LabelId};

use super::{
    box_top, compile_body, compile_form, constant_of, emit_constant, evaluate_body, evaluate_form, pop_value,
    resolve_hint, settle, top_type,
};

/// A branch whose value still needs converting to the type all branches
/// agree on.
struct Arm {
    ty: Option<Ty>,
    hole: Hole,
}

fn close_arm(state: &mut CompilerState, end: LabelId) -> Result<Arm, SprigError> {
    let ty = top_type(state)?;
    let hole = state.code()?.hole();
    state.emit(Instruction::Goto(end))?;
    Ok(Arm { ty, hole })
}

/// Unifies the arm types and fills each arm's conversion. `None` when no arm
/// completes normally.
fn join_arms(state: &mut CompilerState, arms: Vec<Arm>) -> Result<Option<Ty>, SprigError> {
    let reg = &state.rt.classes;
    let joined = arms
        .iter()
        .filter_map(|arm| arm.ty.clone())
        .reduce(|a, b| Ty::unify(&a, &b, reg));
    if let Some(target) = &joined {
        for arm in &arms {
            if let Some(ty) = &arm.ty {
                let code = coerce(ty, target, &state.rt.classes)?;
                state.code()?.fill_hole(arm.hole, code);
            }
        }
    }
    Ok(joined)
}

/// Leaves a boolean on the stack for `IfFalse`.
fn emit_test(state: &mut CompilerState) -> Result<(), SprigError> {
    match top_type(state)? {
        Some(Ty::Prim(Prim::Boolean)) | None => Ok(()),
        Some(ty) => {
            state.emit_all(to_boxed(&ty))?;
            state.emit(Instruction::Truthy)
        }
    }
}

fn if_parts<'a>(datum: &Datum, args: &'a [Datum]) -> Result<(&'a Datum, &'a Datum, Option<&'a Datum>), SprigError> {
    match args {
        [test, then] => Ok((test, then, None)),
        [test, then, otherwise] => Ok((test, then, Some(otherwise))),
        [] | [_] => Err(datum.syntax_error("Too few arguments to if")),
        _ => Err(datum.syntax_error("Too many arguments to if")),
    }
}

pub fn compile_if(state: &mut CompilerState, datum: &Datum, args: &[Datum]) -> Result<(), SprigError> {
    let (test, then, otherwise) = if_parts(datum, args)?;
    state.with_tail(false, |s| compile_form(s, test))?;
    if state.is_unreachable() {
        return Ok(());
    }
    emit_test(state)?;
    let else_label = state.code()?.new_label();
    let end = state.code()?.new_label();
    state.emit(Instruction::IfFalse(else_label))?;
    let base = state.stack()?.snapshot();

    compile_form(state, then)?;
    let then_arm = close_arm(state, end)?;

    state.method()?.stack.restore(base.clone());
    state.code()?.place(else_label);
    match otherwise {
        Some(form) => compile_form(state, form)?,
        None => emit_constant(state, Constant::Nil)?,
    }
    let else_arm = close_arm(state, end)?;
    state.code()?.place(end);

    let result = join_arms(state, vec![then_arm, else_arm])?;
    settle(state, base, result)
}

pub fn evaluate_if(state: &mut CompilerState, datum: &Datum, args: &[Datum]) -> Result<Value, SprigError> {
    let (test, then, otherwise) = if_parts(datum, args)?;
    let test = state.with_tail(false, |s| evaluate_form(s, test))?;
    match (test.truthy(), otherwise) {
        (true, _) => evaluate_form(state, then),
        (false, Some(form)) => evaluate_form(state, form),
        (false, None) => Ok(Value::Nil),
    }
}

/// Splits `(let [bindings*] body*)`.
pub(super) fn binding_parts<'a>(
    form: &str,
    datum: &Datum,
    args: &'a [Datum],
) -> Result<(Vec<(&'a Datum, &'a str, &'a Datum)>, &'a [Datum]), SprigError> {
    let (bindings, body) = args
        .split_first()
        .ok_or_else(|| datum.syntax_error(format!("{} requires a binding vector", form)))?;
    let items = bindings
        .as_vector()
        .ok_or_else(|| bindings.syntax_error(format!("{} requires a vector for its binding", form)))?;
    if items.len() % 2 != 0 {
        return Err(bindings.syntax_error(format!("{} requires an even number of forms in binding vector", form)));
    }
    let pairs = items
        .chunks(2)
        .map(|pair| match pair[0].as_symbol() {
            Some(name) if !name.contains('/') => Ok((&pair[0], name, &pair[1])),
            _ => Err(pair[0].syntax_error(format!("Unsupported binding form: {}", pair[0]))),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((pairs, body))
}

/// The type a local takes: the hint when it can be imposed on the inferred
/// type, otherwise the inferred type with a warning.
fn local_type(state: &mut CompilerState, target: &Datum, name: &str) -> Result<Ty, SprigError> {
    let Some(inferred) = top_type(state)? else {
        return match &target.type_hint {
            Some(hint) => resolve_hint(state, hint),
            None => Ok(Ty::Any),
        };
    };
    let Some(hint) = &target.type_hint else {
        return Ok(inferred);
    };
    let hinted = resolve_hint(state, hint)?;
    if hint_applies(state, target, name, &hinted, &inferred) {
        let code = coerce(&inferred, &hinted, &state.rt.classes)?;
        state.emit_all(code)?;
        Ok(hinted)
    } else {
        Ok(inferred)
    }
}

/// Whether `hinted` can be imposed on `inferred`; a mismatch is reported
/// against the binding.
fn hint_applies(state: &CompilerState, target: &Datum, name: &str, hinted: &Ty, inferred: &Ty) -> bool {
    if compatible(hinted, inferred, &state.rt.classes) {
        return true;
    }
    if state.rt.options.warn_on_hint_mismatch {
        let hint = target.type_hint.as_deref().unwrap_or_default();
        state.warn(
            Some(target.span),
            format!("type hint {} of {} does not match its inferred type {}", hint, name, inferred),
        );
    }
    false
}

pub fn compile_let(state: &mut CompilerState, datum: &Datum, args: &[Datum]) -> Result<(), SprigError> {
    let (pairs, body) = binding_parts("let", datum, args)?;
    state.with_scope(VarScope::MethodLet, |s| {
        let mut described = Vec::with_capacity(pairs.len());
        for (target, name, init) in pairs {
            s.with_tail(false, |s| compile_form(s, init))?;
            let ty = local_type(s, target, name)?;
            let slot = s.code()?.alloc_slot();
            s.emit(Instruction::Store { slot, ty: ty.clone() })?;
            let from = s.code()?.here();
            s.scopes.bind(Binding::local(name, ty.clone(), slot))?;
            described.push((name, slot, ty, from));
        }
        compile_body(s, body)?;
        let end = s.code()?.here();
        for (name, slot, ty, from) in described {
            s.code()?.describe_local(name, slot, ty, from, end);
        }
        Ok(())
    })
}

pub fn evaluate_let(state: &mut CompilerState, datum: &Datum, args: &[Datum]) -> Result<Value, SprigError> {
    let (pairs, body) = binding_parts("let", datum, args)?;
    state.with_scope(VarScope::NamespaceLet, |s| {
        for (target, name, init) in pairs {
            if let Some(hint) = &target.type_hint {
                let hinted = resolve_hint(s, hint)?;
                if let Some(literal) = constant_of(init) {
                    hint_applies(s, target, name, &hinted, &literal.ty());
                }
            }
            let value = s.with_tail(false, |s| evaluate_form(s, init))?;
            s.scopes.bind(Binding::valued(name, value))?;
        }
        evaluate_body(s, body)
    })
}

/// Loop locals are boxed so every `recur` can store into them unchanged.
pub fn compile_loop(state: &mut CompilerState, datum: &Datum, args: &[Datum]) -> Result<(), SprigError> {
    let (pairs, body) = binding_parts("loop", datum, args)?;
    state.with_scope(VarScope::MethodLet, |s| {
        let mut slots = Vec::with_capacity(pairs.len());
        for (_, name, init) in &pairs {
            s.with_tail(false, |s| compile_form(s, init))?;
            box_top(s)?;
            let slot = s.code()?.alloc_slot();
            s.emit(Instruction::Store { slot, ty: Ty::Any })?;
            s.scopes.bind(Binding::local(name, Ty::Any, slot))?;
            slots.push((slot, Ty::Any));
        }
        let head = s.code()?.here();
        let depth = s.loops.len();
        let try_depth = s.try_depth();
        s.loops.push(LoopTarget::Compiled {
            head,
            slots: slots.clone(),
            try_depth,
        });
        let result = s.with_tail(true, |s| compile_body(s, body));
        s.loops.truncate(depth);
        result?;
        let end = s.code()?.here();
        for ((_, name, _), (slot, ty)) in pairs.iter().zip(slots) {
            s.code()?.describe_local(name, slot, ty, head, end);
        }
        Ok(())
    })
}

pub fn evaluate_loop(state: &mut CompilerState, datum: &Datum, args: &[Datum]) -> Result<Value, SprigError> {
    let (pairs, body) = binding_parts("loop", datum, args)?;
    state.with_scope(VarScope::NamespaceLet, |s| {
        for (_, name, init) in &pairs {
            let value = s.with_tail(false, |s| evaluate_form(s, init))?;
            s.scopes.bind(Binding::valued(name, value))?;
        }
        let depth = s.loops.len();
        let try_depth = s.try_depth();
        s.loops.push(LoopTarget::Evaluated {
            arity: pairs.len(),
            try_depth,
        });
        let result = loop {
            let value = match s.with_tail(true, |s| evaluate_body(s, body)) {
                Ok(value) => value,
                Err(err) => break Err(err),
            };
            match s.recur_signal.take() {
                Some(values) => {
                    if let Err(err) = s.scopes.rebind_top(values) {
                        break Err(err);
                    }
                }
                None => break Ok(value),
            }
        };
        s.loops.truncate(depth);
        s.recur_signal = None;
        result
    })
}

/// A `case` test constant with the value its hash is computed from.
struct CaseKey {
    constant: Constant,
    value: Value,
    branch: usize,
}

fn case_constant(key: &Datum) -> Result<Constant, SprigError> {
    match &key.kind {
        DatumKind::Symbol(name) => Ok(Constant::Symbol(name.clone())),
        DatumKind::Regex(_) => Err(key.compile_error(format!("case does not support regex test constants: {}", key))),
        DatumKind::List(items) if items.is_empty() => Ok(Constant::Quoted(key.clone())),
        _ => constant_of(key)
            .ok_or_else(|| key.compile_error(format!("case test constants must be literals: {}", key))),
    }
}

struct CaseClauses<'a> {
    keys: Vec<CaseKey>,
    branches: Vec<&'a Datum>,
    default: Option<&'a Datum>,
}

fn case_clauses<'a>(datum: &Datum, clauses: &'a [Datum]) -> Result<CaseClauses<'a>, SprigError> {
    let (pairs, default) = if clauses.len() % 2 == 1 {
        (&clauses[..clauses.len() - 1], clauses.last())
    } else {
        (clauses, None)
    };
    let mut keys: Vec<CaseKey> = Vec::new();
    let mut branches = Vec::with_capacity(pairs.len() / 2);
    for (branch, pair) in pairs.chunks(2).enumerate() {
        let group: Vec<&Datum> = match &pair[0].kind {
            DatumKind::List(items) if !items.is_empty() => items.iter().collect(),
            _ => vec![&pair[0]],
        };
        for key in group {
            let constant = case_constant(key)?;
            let value = datum_to_value(key);
            if keys.iter().any(|k| k.value == value) {
                return Err(datum.compile_error(format!("Duplicate case test constant: {}", key)));
            }
            keys.push(CaseKey { constant, value, branch });
        }
        branches.push(&pair[1]);
    }
    Ok(CaseClauses { keys, branches, default })
}

fn no_match_message(value: &Value) -> String {
    format!("No matching clause: {}", value.to_display_string())
}

/// `case` hashes the value once, switches on the hash, confirms the match
/// with equivalence tests inside the bucket, then switches again on the
/// branch index so each branch body is emitted exactly once.
pub fn compile_case(state: &mut CompilerState, datum: &Datum, args: &[Datum]) -> Result<(), SprigError> {
    let (expr, clauses) = args
        .split_first()
        .ok_or_else(|| datum.syntax_error("case requires an expression"))?;
    let clauses = case_clauses(datum, clauses)?;
    state.with_tail(false, |s| compile_form(s, expr))?;
    if state.is_unreachable() {
        return Ok(());
    }
    box_top(state)?;
    let temp = state.code()?.alloc_slot();
    state.emit(Instruction::Store { slot: temp, ty: Ty::Any })?;
    let base = state.stack()?.snapshot();
    let default_label = state.code()?.new_label();
    let end = state.code()?.new_label();
    let branch_labels: Vec<LabelId> = clauses
        .branches
        .iter()
        .map(|_| state.code().map(|c| c.new_label()))
        .collect::<Result<_, _>>()?;

    if !clauses.keys.is_empty() {
        let mut buckets: BTreeMap<i64, Vec<&CaseKey>> = BTreeMap::new();
        for key in &clauses.keys {
            buckets.entry(i64::from(key.value.hash_code())).or_default().push(key);
        }
        let bucket_labels: Vec<LabelId> = buckets
            .keys()
            .map(|_| state.code().map(|c| c.new_label()))
            .collect::<Result<_, _>>()?;
        let dispatch = state.code()?.new_label();
        state.emit(Instruction::Load { slot: temp, ty: Ty::Any })?;
        state.emit(Instruction::HashCode)?;
        state.emit(Instruction::LookupSwitch {
            keys: buckets.keys().copied().collect(),
            targets: bucket_labels.clone(),
            default: default_label,
        })?;
        for (bucket, label) in buckets.values().zip(bucket_labels) {
            state.method()?.stack.restore(base.clone());
            state.code()?.place(label);
            for key in bucket {
                let next = state.code()?.new_label();
                state.emit(Instruction::Load { slot: temp, ty: Ty::Any })?;
                state.emit(Instruction::Const(key.constant.clone()))?;
                state.emit_all(to_boxed(&key.constant.ty()))?;
                state.emit(Instruction::Equiv)?;
                state.emit(Instruction::IfFalse(next))?;
                state.emit(Instruction::Const(Constant::Long(key.branch as i64)))?;
                state.emit(Instruction::Goto(dispatch))?;
                state.method()?.stack.restore(base.clone());
                state.code()?.place(next);
            }
            state.emit(Instruction::Goto(default_label))?;
        }
        let method = state.method()?;
        method.stack.restore(base.clone());
        method.stack.push(Ty::Prim(Prim::Long), false);
        method.code.place(dispatch);
        state.emit(Instruction::TableSwitch {
            low: 0,
            targets: branch_labels.clone(),
            default: default_label,
        })?;
    }

    let mut arms = Vec::with_capacity(clauses.branches.len() + 1);
    for (branch, label) in clauses.branches.iter().zip(&branch_labels) {
        state.method()?.stack.restore(base.clone());
        state.code()?.place(*label);
        compile_form(state, branch)?;
        arms.push(close_arm(state, end)?);
    }
    state.method()?.stack.restore(base.clone());
    state.code()?.place(default_label);
    match clauses.default {
        Some(form) => compile_form(state, form)?,
        None => emit_no_match(state, temp, datum.span)?,
    }
    arms.push(close_arm(state, end)?);
    state.code()?.place(end);
    state.code()?.free_slot(temp);

    let result = join_arms(state, arms)?;
    settle(state, base, result)
}

/// Throws `lang.Exception` naming the unmatched value.
fn emit_no_match(state: &mut CompilerState, temp: u16, span: Span) -> Result<(), SprigError> {
    emit_constant(state, Constant::Str("No matching clause: ".to_string()))?;
    state.emit(Instruction::Load { slot: temp, ty: Ty::Any })?;
    let spec = CallSiteSpec::new(
        SiteKind::GlobalCall {
            ns: CORE_NS.to_string(),
            name: "str".to_string(),
        },
        vec![Ty::string(), Ty::Any],
        Ty::string(),
    )
    .with_span(span);
    let idx = state.add_call_site(spec)?;
    state.emit(Instruction::InvokeDynamic(idx))?;
    state.emit(Instruction::NewInstance {
        class: names::EXCEPTION.to_string(),
        params: vec![Ty::string()],
    })?;
    state.emit(Instruction::Throw)
}

pub fn evaluate_case(state: &mut CompilerState, datum: &Datum, args: &[Datum]) -> Result<Value, SprigError> {
    let (expr, clauses) = args
        .split_first()
        .ok_or_else(|| datum.syntax_error("case requires an expression"))?;
    let clauses = case_clauses(datum, clauses)?;
    let value = state.with_tail(false, |s| evaluate_form(s, expr))?;
    match clauses.keys.iter().find(|k| k.value == value) {
        Some(key) => evaluate_form(state, clauses.branches[key.branch]),
        None => match clauses.default {
            Some(form) => evaluate_form(state, form),
            None => {
                let exception = state.rt.make_exception(names::EXCEPTION, &no_match_message(&value))?;
                Err(SprigError::thrown(exception))
            }
        },
    }
}

pub fn compile_throw(state: &mut CompilerState, datum: &Datum, args: &[Datum]) -> Result<(), SprigError> {
    let [value] = args else {
        return Err(datum.syntax_error("throw takes exactly one argument"));
    };
    state.with_tail(false, |s| compile_form(s, value))?;
    box_top(state)?;
    state.emit(Instruction::Throw)
}

pub fn evaluate_throw(state: &mut CompilerState, datum: &Datum, args: &[Datum]) -> Result<Value, SprigError> {
    let [value] = args else {
        return Err(datum.syntax_error("throw takes exactly one argument"));
    };
    match state.with_tail(false, |s| evaluate_form(s, value))? {
        Value::Nil => Err(SprigError::runtime("Cannot throw nil")),
        thrown => Err(SprigError::thrown(thrown)),
    }
}

struct Catch<'a> {
    class: String,
    name: &'a str,
    body: &'a [Datum],
}

struct TryParts<'a> {
    body: &'a [Datum],
    catches: Vec<Catch<'a>>,
    finally: Option<&'a [Datum]>,
}

fn clause_head(datum: &Datum) -> Option<&str> {
    datum
        .as_list()
        .and_then(|items| items.first())
        .and_then(Datum::as_symbol)
        .filter(|head| *head == "catch" || *head == "finally")
}

fn try_parts<'a>(state: &CompilerState, args: &'a [Datum]) -> Result<TryParts<'a>, SprigError> {
    let split = args.iter().position(|d| clause_head(d).is_some()).unwrap_or(args.len());
    let (body, clauses) = args.split_at(split);
    let mut parts = TryParts {
        body,
        catches: Vec::new(),
        finally: None,
    };
    for (idx, clause) in clauses.iter().enumerate() {
        let items = clause.as_list().unwrap_or(&[]);
        match clause_head(clause) {
            Some("catch") if parts.finally.is_none() => {
                let [_, class, name, body @ ..] = items else {
                    return Err(clause.syntax_error("catch requires a class and a binding name"));
                };
                let class_name = class
                    .as_symbol()
                    .ok_or_else(|| class.syntax_error(format!("Unable to resolve classname: {}", class)))?;
                let class = state
                    .rt
                    .resolve_class(class_name)
                    .ok_or_else(|| class.compile_error(format!("Unable to resolve classname: {}", class_name)))?;
                let name = name
                    .as_symbol()
                    .filter(|n| !n.contains('/'))
                    .ok_or_else(|| name.syntax_error(format!("Bad binding form, expected symbol, got: {}", name)))?;
                parts.catches.push(Catch {
                    class: class.name.clone(),
                    name,
                    body,
                });
            }
            Some("finally") if idx + 1 == clauses.len() => parts.finally = Some(&items[1..]),
            Some("finally") => return Err(clause.syntax_error("finally clause must be last in try expression")),
            _ => {
                return Err(clause.syntax_error(
                    "Only catch or finally clause can follow catch in try expression",
                ))
            }
        }
    }
    Ok(parts)
}

fn inline_finally(state: &mut CompilerState, finally: Option<&[Datum]>) -> Result<(), SprigError> {
    if let Some(body) = finally {
        state.with_tail(false, |s| compile_body(s, body))?;
        pop_value(state)?;
    }
    Ok(())
}

/// `try` stores its value in a local so every exit leaves the stack as it
/// found it. Handlers are registered in clause order, with the catch-all
/// running `finally` for exceptional exits last.
pub fn compile_try(state: &mut CompilerState, _datum: &Datum, args: &[Datum]) -> Result<(), SprigError> {
    let parts = try_parts(state, args)?;
    if state.is_unreachable() {
        return Ok(());
    }
    let base = state.stack()?.snapshot();
    let base_depth = state.stack()?.depth();
    let result = state.code()?.alloc_slot();
    let after = state.code()?.new_label();

    state.method()?.try_depth += 1;
    let regions = try_regions(state, &parts, &base, base_depth, result, after);
    state.method()?.try_depth -= 1;
    let reachable = regions?;

    state.method()?.stack.restore(base);
    if reachable {
        state.code()?.place(after);
        state.emit(Instruction::Load { slot: result, ty: Ty::Any })?;
    } else {
        state.method()?.stack.push_unreachable();
    }
    state.code()?.free_slot(result);
    Ok(())
}

/// Emits the body, catch and finally regions; true when some region falls
/// through to `after`.
fn try_regions(
    state: &mut CompilerState,
    parts: &TryParts<'_>,
    base: &[StackRecord],
    base_depth: u16,
    result: u16,
    after: LabelId,
) -> Result<bool, SprigError> {
    let mut reachable = false;
    let start = state.code()?.here();
    compile_body(state, parts.body)?;
    box_top(state)?;
    state.emit(Instruction::Store { slot: result, ty: Ty::Any })?;
    let end = state.code()?.here();
    if !state.is_unreachable() {
        inline_finally(state, parts.finally)?;
        state.emit(Instruction::Goto(after))?;
        reachable = true;
    }

    let mut catch_regions = Vec::with_capacity(parts.catches.len());
    for catch in &parts.catches {
        let handler = state.code()?.new_label();
        state
            .code()?
            .add_handler(start, end, handler, Some(catch.class.clone()), base_depth);
        let method = state.method()?;
        method.stack.restore(base.to_vec());
        method.stack.push(Ty::Class(catch.class.clone()), false);
        method.code.place(handler);
        state.with_scope(VarScope::MethodLet, |s| {
            let ty = Ty::Class(catch.class.clone());
            let slot = s.code()?.alloc_slot();
            s.emit(Instruction::Store { slot, ty: ty.clone() })?;
            let from = s.code()?.here();
            s.scopes.bind(Binding::local(catch.name, ty.clone(), slot))?;
            compile_body(s, catch.body)?;
            box_top(s)?;
            s.emit(Instruction::Store { slot: result, ty: Ty::Any })?;
            let to = s.code()?.here();
            s.code()?.describe_local(catch.name, slot, ty, from, to);
            catch_regions.push((handler, to));
            Ok(())
        })?;
        if !state.is_unreachable() {
            inline_finally(state, parts.finally)?;
            state.emit(Instruction::Goto(after))?;
            reachable = true;
        }
    }

    if parts.finally.is_some() {
        let handler = state.code()?.new_label();
        state.code()?.add_handler(start, end, handler, None, base_depth);
        for (from, to) in &catch_regions {
            state.code()?.add_handler(*from, *to, handler, None, base_depth);
        }
        let method = state.method()?;
        method.stack.restore(base.to_vec());
        method.stack.push(Ty::Any, false);
        method.code.place(handler);
        let pending = state.code()?.alloc_slot();
        state.emit(Instruction::Store { slot: pending, ty: Ty::Any })?;
        inline_finally(state, parts.finally)?;
        state.emit(Instruction::Load { slot: pending, ty: Ty::Any })?;
        state.emit(Instruction::Throw)?;
        state.code()?.free_slot(pending);
    }
    Ok(reachable)
}

pub fn evaluate_try(state: &mut CompilerState, _datum: &Datum, args: &[Datum]) -> Result<Value, SprigError> {
    let parts = try_parts(state, args)?;
    state.eval_try_depth += 1;
    let outcome = evaluate_protected(state, &parts);
    state.eval_try_depth -= 1;
    if let Some(body) = parts.finally {
        state.with_tail(false, |s| evaluate_body(s, body))?;
    }
    outcome
}

fn evaluate_protected(state: &mut CompilerState, parts: &TryParts<'_>) -> Result<Value, SprigError> {
    let err = match evaluate_body(state, parts.body) {
        Ok(value) => return Ok(value),
        Err(err) if err.is_catchable() && !parts.catches.is_empty() => err,
        Err(err) => return Err(err),
    };
    let exception = state.rt.error_to_exception(&err)?;
    let Some(catch) = parts
        .catches
        .iter()
        .find(|c| state.rt.classes.instance_of(&exception, &c.class))
    else {
        return Err(err);
    };
    state.with_scope(VarScope::NamespaceLet, |s| {
        s.scopes.bind(Binding::valued(catch.name, exception))?;
        evaluate_body(s, catch.body)
    })
}
