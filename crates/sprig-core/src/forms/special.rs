use tracing::debug;

use crate::ast::{datum_to_value, Datum, DatumKind};
use crate::compiler::loops::{compile_recur, evaluate_recur};
use crate::compiler::scopes::{Resolution, Slot, VarScope};
use crate::compiler::state::CompilerState;
use crate::emit::coerce::coerce;
use crate::error::SprigError;
use crate::namespaces::{Var, VarFlags};
use crate::symbols::split_qualified;
use crate::types::Ty;
use crate::value::{Intrinsic, Value};
use crate::vm::bytecode::{Constant, Instruction};

use super::{
    box_top, classes, compile_body, compile_form, constant_of, control, emit_constant, evaluate_body,
    evaluate_form, interop, pop_value, syntax_quote,
};

fn args_of(datum: &Datum) -> &[Datum] {
    datum.as_list().map_or(&[], |items| &items[1..])
}

pub fn compile(state: &mut CompilerState, intrinsic: Intrinsic, datum: &Datum) -> Result<(), SprigError> {
    let args = args_of(datum);
    match intrinsic {
        Intrinsic::Quote => {
            let constant = quoted_constant(datum)?;
            emit_constant(state, constant)
        }
        Intrinsic::SyntaxQuote => syntax_quote::compile(state, datum, args),
        Intrinsic::Unquote | Intrinsic::UnquoteSplicing => Err(outside_syntax_quote(intrinsic, datum)),
        Intrinsic::If => control::compile_if(state, datum, args),
        Intrinsic::Do => compile_body(state, args),
        Intrinsic::Let => control::compile_let(state, datum, args),
        Intrinsic::Loop => control::compile_loop(state, datum, args),
        Intrinsic::Recur => compile_recur(state, datum, args),
        Intrinsic::Case => control::compile_case(state, datum, args),
        Intrinsic::Throw => control::compile_throw(state, datum, args),
        Intrinsic::Try => control::compile_try(state, datum, args),
        Intrinsic::Fn => classes::compile_fn(state, datum, args),
        Intrinsic::Deftype => classes::compile_deftype(state, datum, args),
        Intrinsic::Defprotocol => classes::compile_defprotocol(state, datum, args),
        Intrinsic::Proxy => classes::compile_proxy(state, datum, args),
        Intrinsic::New => interop::compile_new(state, datum, args),
        Intrinsic::Dot => interop::compile_dot(state, datum, args),
        Intrinsic::InstanceCheck => interop::compile_instance_check(state, datum, args),
        Intrinsic::Def => compile_def(state, datum, args),
        Intrinsic::Defmacro => compile_form(state, &macro_definition(datum, args)?),
        Intrinsic::SetBang => compile_set(state, datum, args),
        Intrinsic::Var => {
            let var = the_var(state, datum, args)?;
            state.emit(Instruction::VarRef {
                ns: var.ns.clone(),
                name: var.name.clone(),
            })
        }
        Intrinsic::Ns => compile_ns(state, datum, args),
        Intrinsic::InNs => {
            let name = in_ns_target(datum, args)?;
            state.rt.set_current_ns(&name);
            state.emit(Instruction::SwitchNs(name))
        }
        Intrinsic::Import => compile_import(state, datum, args),
    }
}

pub fn evaluate(state: &mut CompilerState, intrinsic: Intrinsic, datum: &Datum) -> Result<Value, SprigError> {
    let args = args_of(datum);
    match intrinsic {
        Intrinsic::Quote => match args {
            [quoted] => Ok(datum_to_value(quoted)),
            _ => Err(datum.syntax_error("quote takes exactly one argument")),
        },
        Intrinsic::SyntaxQuote => syntax_quote::evaluate(state, datum, args),
        Intrinsic::Unquote | Intrinsic::UnquoteSplicing => Err(outside_syntax_quote(intrinsic, datum)),
        Intrinsic::If => control::evaluate_if(state, datum, args),
        Intrinsic::Do => evaluate_body(state, args),
        Intrinsic::Let => control::evaluate_let(state, datum, args),
        Intrinsic::Loop => control::evaluate_loop(state, datum, args),
        Intrinsic::Recur => evaluate_recur(state, datum, args),
        Intrinsic::Case => control::evaluate_case(state, datum, args),
        Intrinsic::Throw => control::evaluate_throw(state, datum, args),
        Intrinsic::Try => control::evaluate_try(state, datum, args),
        Intrinsic::Fn => classes::evaluate_fn(state, datum, args),
        Intrinsic::Deftype => classes::evaluate_deftype(state, datum, args),
        Intrinsic::Defprotocol => classes::evaluate_defprotocol(state, datum, args),
        Intrinsic::Proxy => classes::evaluate_proxy(state, datum, args),
        Intrinsic::New => interop::evaluate_new(state, datum, args),
        Intrinsic::Dot => interop::evaluate_dot(state, datum, args),
        Intrinsic::InstanceCheck => interop::evaluate_instance_check(state, datum, args),
        Intrinsic::Def => evaluate_def(state, datum, args),
        Intrinsic::Defmacro => evaluate_form(state, &macro_definition(datum, args)?),
        Intrinsic::SetBang => evaluate_set(state, datum, args),
        Intrinsic::Var => the_var(state, datum, args).map(Value::Var),
        Intrinsic::Ns => evaluate_ns(state, datum, args),
        Intrinsic::InNs => {
            let name = in_ns_target(datum, args)?;
            Ok(Value::Namespace(state.rt.set_current_ns(&name)))
        }
        Intrinsic::Import => evaluate_import(state, datum, args),
    }
}

fn outside_syntax_quote(intrinsic: Intrinsic, datum: &Datum) -> SprigError {
    datum.compile_error(format!("{} used outside of syntax-quote", intrinsic.name()))
}

/// The constant a `(quote x)` form loads.
pub fn quoted_constant(datum: &Datum) -> Result<Constant, SprigError> {
    let [quoted] = args_of(datum) else {
        return Err(datum.syntax_error("quote takes exactly one argument"));
    };
    Ok(match &quoted.kind {
        DatumKind::Symbol(name) => Constant::Symbol(name.clone()),
        DatumKind::List(_) | DatumKind::Vector(_) | DatumKind::Map(_) | DatumKind::Set(_) => {
            Constant::Quoted(quoted.clone())
        }
        _ => constant_of(quoted).ok_or_else(|| SprigError::internal("unquotable literal"))?,
    })
}

/// Splits `(def name doc? init?)`.
fn def_parts<'a>(datum: &Datum, args: &'a [Datum]) -> Result<(&'a Datum, &'a str, Option<&'a Datum>), SprigError> {
    let (target, init) = match args {
        [target] => (target, None),
        [target, init] => (target, Some(init)),
        [target, doc, init] if matches!(doc.kind, DatumKind::Str(_)) => (target, Some(init)),
        [] => return Err(datum.syntax_error("Too few arguments to def")),
        _ => return Err(datum.syntax_error("Too many arguments to def")),
    };
    let name = target
        .as_symbol()
        .ok_or_else(|| target.syntax_error("First argument to def must be a Symbol"))?;
    Ok((target, name, init))
}

/// Interns the var a `def` names; qualified names must point into the
/// current namespace.
fn def_var(state: &CompilerState, target: &Datum, name: &str) -> Result<std::sync::Arc<Var>, SprigError> {
    let ns = state.rt.current_ns();
    let simple = match split_qualified(name) {
        (Some(qualifier), simple) if qualifier == ns.name => simple,
        (Some(_), _) => return Err(target.compile_error("Can't create defs outside of current ns")),
        (None, simple) => simple,
    };
    Ok(ns.intern(simple))
}

fn compile_def(state: &mut CompilerState, datum: &Datum, args: &[Datum]) -> Result<(), SprigError> {
    let (target, name, init) = def_parts(datum, args)?;
    let var = def_var(state, target, name)?;
    let flags = VarFlags::from_meta(&target.flags);
    if let Some(init) = init {
        state.with_tail(false, |s| compile_form(s, init))?;
        box_top(state)?;
    }
    debug!(var = %var.qualified_name(), ?flags, "compiled def");
    state.emit(Instruction::DefVar {
        ns: var.ns.clone(),
        name: var.name.clone(),
        flags,
        init: init.is_some(),
    })
}

fn evaluate_def(state: &mut CompilerState, datum: &Datum, args: &[Datum]) -> Result<Value, SprigError> {
    let (target, name, init) = def_parts(datum, args)?;
    let var = def_var(state, target, name)?;
    let flags = VarFlags::from_meta(&target.flags);
    let value = match init {
        Some(init) => Some(state.with_tail(false, |s| evaluate_form(s, init))?),
        None => None,
    };
    var.define(value, flags);
    Ok(Value::Var(var))
}

/// `(defmacro name doc? & fn-tail)` as `(def ^:macro name (fn name & fn-tail))`.
fn macro_definition(datum: &Datum, args: &[Datum]) -> Result<Datum, SprigError> {
    let span = datum.span;
    let (target, mut rest) = args
        .split_first()
        .ok_or_else(|| datum.syntax_error("defmacro requires a name"))?;
    let name = target
        .as_symbol()
        .ok_or_else(|| target.syntax_error("First argument to defmacro must be a symbol"))?;
    if let [doc, more @ ..] = rest {
        if matches!(doc.kind, DatumKind::Str(_)) && !more.is_empty() {
            rest = more;
        }
    }
    let mut flagged = target.clone();
    if !flagged.has_flag("macro") {
        flagged.flags.push("macro".to_string());
    }
    let mut fn_form = vec![Datum::symbol("fn", span), Datum::symbol(name, target.span)];
    fn_form.extend(rest.iter().cloned());
    Ok(Datum::list(
        vec![Datum::symbol("def", span), flagged, Datum::list(fn_form, span)],
        span,
    ))
}

fn set_parts<'a>(datum: &Datum, args: &'a [Datum]) -> Result<(&'a Datum, &'a str, &'a Datum), SprigError> {
    let [target, value] = args else {
        return Err(datum.syntax_error("Malformed assignment, expecting (set! target val)"));
    };
    let name = target
        .as_symbol()
        .ok_or_else(|| target.compile_error(format!("Invalid assignment target: {}", target)))?;
    Ok((target, name, value))
}

fn assignable_var(var: &Var, target: &Datum) -> Result<(), SprigError> {
    if var.flags().is_final {
        return Err(target.compile_error(format!("Cannot set! final var: #'{}", var.qualified_name())));
    }
    Ok(())
}

fn compile_set(state: &mut CompilerState, datum: &Datum, args: &[Datum]) -> Result<(), SprigError> {
    let (target, name, value) = set_parts(datum, args)?;
    let resolved = state
        .scopes
        .lookup(&state.rt, name, state.level())?
        .ok_or_else(|| super::unbound(name))?;
    match resolved {
        Resolution::Var(var) => {
            assignable_var(&var, target)?;
            state.with_tail(false, |s| compile_form(s, value))?;
            box_top(state)?;
            state.emit(Instruction::SetVar {
                ns: var.ns.clone(),
                name: var.name.clone(),
            })
        }
        Resolution::Local {
            scope: VarScope::Field,
            binding,
        } if binding.mutable => {
            let Slot::Field(field) = &binding.slot else {
                return Err(SprigError::internal(format!("mutable field {} has no field slot", name)));
            };
            let owner = state.current_class()?.file.name.clone();
            state.emit(Instruction::Load {
                slot: 0,
                ty: Ty::Class(owner.clone()),
            })?;
            state.with_tail(false, |s| compile_form(s, value))?;
            if let Some(top) = state.stack()?.top_type().cloned() {
                let code = coerce(&top, &binding.ty, &state.rt.classes).map_err(|err| err.with_span(value.span))?;
                state.emit_all(code)?;
            }
            let temp = state.code()?.alloc_slot();
            state.emit(Instruction::Store {
                slot: temp,
                ty: binding.ty.clone(),
            })?;
            state.emit(Instruction::Load {
                slot: temp,
                ty: binding.ty.clone(),
            })?;
            state.emit(Instruction::PutField {
                owner,
                name: field.clone(),
                ty: binding.ty.clone(),
            })?;
            state.emit(Instruction::Load {
                slot: temp,
                ty: binding.ty.clone(),
            })?;
            state.code()?.free_slot(temp);
            Ok(())
        }
        Resolution::Local { .. } => Err(target.compile_error(format!("Cannot assign to non-mutable: {}", name))),
        _ => Err(target.compile_error(format!("Invalid assignment target: {}", name))),
    }
}

fn evaluate_set(state: &mut CompilerState, datum: &Datum, args: &[Datum]) -> Result<Value, SprigError> {
    let (target, name, value) = set_parts(datum, args)?;
    let resolved = state
        .scopes
        .lookup(&state.rt, name, state.level())?
        .ok_or_else(|| super::unbound(name))?;
    match resolved {
        Resolution::Var(var) => {
            assignable_var(&var, target)?;
            let value = state.with_tail(false, |s| evaluate_form(s, value))?;
            var.bind_root(value.clone());
            Ok(value)
        }
        Resolution::Local { .. } => Err(target.compile_error(format!("Cannot assign to non-mutable: {}", name))),
        _ => Err(target.compile_error(format!("Invalid assignment target: {}", name))),
    }
}

fn the_var(state: &CompilerState, datum: &Datum, args: &[Datum]) -> Result<std::sync::Arc<Var>, SprigError> {
    let [target] = args else {
        return Err(datum.syntax_error("var takes exactly one argument"));
    };
    let name = target
        .as_symbol()
        .ok_or_else(|| target.syntax_error(format!("var requires a symbol, got: {}", target)))?;
    match state.scopes.lookup(&state.rt, name, state.level())? {
        Some(Resolution::Var(var)) => Ok(var),
        _ => Err(target.compile_error(format!("Unable to resolve var: {} in this context", name))),
    }
}

/// Accepts `name` and `(quote name)`.
fn symbol_arg(datum: &Datum) -> Option<&str> {
    if let Some(name) = datum.as_symbol() {
        return Some(name);
    }
    match datum.as_list() {
        Some([head, quoted]) if head.as_symbol() == Some("quote") => quoted.as_symbol(),
        _ => None,
    }
}

fn in_ns_target(datum: &Datum, args: &[Datum]) -> Result<String, SprigError> {
    match args {
        [target] => symbol_arg(target)
            .map(str::to_string)
            .ok_or_else(|| target.syntax_error(format!("in-ns requires a symbol, got: {}", target))),
        _ => Err(datum.syntax_error("in-ns takes exactly one argument")),
    }
}

/// Full class names named by one import spec: `a.b.C`, or `(a.b C D)`.
fn import_names(spec: &Datum) -> Result<Vec<String>, SprigError> {
    if let Some(name) = symbol_arg(spec) {
        return Ok(vec![name.to_string()]);
    }
    let items = match &spec.kind {
        DatumKind::List(items) | DatumKind::Vector(items) => match items.as_slice() {
            [head, quoted] if head.as_symbol() == Some("quote") => match &quoted.kind {
                DatumKind::List(inner) | DatumKind::Vector(inner) => inner.as_slice(),
                _ => items.as_slice(),
            },
            _ => items.as_slice(),
        },
        _ => return Err(spec.syntax_error(format!("Bad import spec: {}", spec))),
    };
    let (package, classes) = items
        .split_first()
        .ok_or_else(|| spec.syntax_error("Empty import spec"))?;
    let package = package
        .as_symbol()
        .ok_or_else(|| package.syntax_error(format!("Bad import package: {}", package)))?;
    classes
        .iter()
        .map(|class| {
            class
                .as_symbol()
                .map(|simple| format!("{}.{}", package, simple))
                .ok_or_else(|| class.syntax_error(format!("Bad import class: {}", class)))
        })
        .collect()
}

fn import_all(state: &CompilerState, specs: &[Datum]) -> Result<Vec<String>, SprigError> {
    let mut imported = Vec::new();
    for spec in specs {
        for full in import_names(spec)? {
            state
                .rt
                .import_class(&full)
                .map_err(|err| err.with_span(spec.span))?;
            imported.push(full);
        }
    }
    Ok(imported)
}

fn compile_import(state: &mut CompilerState, _datum: &Datum, args: &[Datum]) -> Result<(), SprigError> {
    let imported = import_all(state, args)?;
    if imported.is_empty() {
        return emit_constant(state, Constant::Nil);
    }
    let last = imported.len() - 1;
    for (idx, full) in imported.into_iter().enumerate() {
        state.emit(Instruction::Import(full))?;
        if idx != last {
            pop_value(state)?;
        }
    }
    Ok(())
}

fn evaluate_import(state: &mut CompilerState, _datum: &Datum, args: &[Datum]) -> Result<Value, SprigError> {
    let imported = import_all(state, args)?;
    match imported.last() {
        Some(full) => state.rt.import_class(full).map(Value::Class),
        None => Ok(Value::Nil),
    }
}

/// A parsed `(ns name (:import ...) (:require ...))`.
struct NsForm {
    name: String,
    imports: Vec<Datum>,
    requires: Vec<(String, Option<String>)>,
}

fn ns_form(datum: &Datum, args: &[Datum]) -> Result<NsForm, SprigError> {
    let (name, clauses) = args
        .split_first()
        .ok_or_else(|| datum.syntax_error("ns requires a name"))?;
    let name = name
        .as_symbol()
        .ok_or_else(|| name.syntax_error(format!("ns name must be a symbol, got: {}", name)))?;
    let mut form = NsForm {
        name: name.to_string(),
        imports: Vec::new(),
        requires: Vec::new(),
    };
    for clause in clauses {
        if matches!(clause.kind, DatumKind::Str(_)) {
            continue;
        }
        let items = clause
            .as_list()
            .filter(|items| !items.is_empty())
            .ok_or_else(|| clause.syntax_error(format!("Bad ns clause: {}", clause)))?;
        match &items[0].kind {
            DatumKind::Keyword(k) if k == "import" => form.imports.extend(items[1..].iter().cloned()),
            DatumKind::Keyword(k) if k == "require" => {
                for spec in &items[1..] {
                    form.requires.push(require_spec(spec)?);
                }
            }
            _ => return Err(clause.syntax_error(format!("Unsupported ns clause: {}", items[0]))),
        }
    }
    Ok(form)
}

/// `a.b` or `[a.b :as alias]`.
fn require_spec(spec: &Datum) -> Result<(String, Option<String>), SprigError> {
    if let Some(name) = symbol_arg(spec) {
        return Ok((name.to_string(), None));
    }
    match spec.as_vector() {
        Some([name, key, alias]) if matches!(&key.kind, DatumKind::Keyword(k) if k == "as") => {
            match (name.as_symbol(), alias.as_symbol()) {
                (Some(name), Some(alias)) => Ok((name.to_string(), Some(alias.to_string()))),
                _ => Err(spec.syntax_error(format!("Bad require spec: {}", spec))),
            }
        }
        Some([name]) => name
            .as_symbol()
            .map(|n| (n.to_string(), None))
            .ok_or_else(|| spec.syntax_error(format!("Bad require spec: {}", spec))),
        _ => Err(spec.syntax_error(format!("Bad require spec: {}", spec))),
    }
}

/// Switches namespace and applies imports and aliases at compile time, so
/// later forms resolve against them.
fn enter_ns(state: &CompilerState, datum: &Datum, form: &NsForm) -> Result<Vec<String>, SprigError> {
    let ns = state.rt.set_current_ns(&form.name);
    for (target, alias) in &form.requires {
        if state.rt.namespaces.get(target).is_none() {
            return Err(datum.compile_error(format!("Could not locate namespace: {}", target)));
        }
        if let Some(alias) = alias {
            ns.add_alias(alias, target);
        }
    }
    import_all(state, &form.imports)
}

fn compile_ns(state: &mut CompilerState, datum: &Datum, args: &[Datum]) -> Result<(), SprigError> {
    let form = ns_form(datum, args)?;
    let imported = enter_ns(state, datum, &form)?;
    state.emit(Instruction::SwitchNs(form.name))?;
    for full in imported {
        state.emit(Instruction::Import(full))?;
        pop_value(state)?;
    }
    Ok(())
}

fn evaluate_ns(state: &mut CompilerState, datum: &Datum, args: &[Datum]) -> Result<Value, SprigError> {
    let form = ns_form(datum, args)?;
    enter_ns(state, datum, &form)?;
    Ok(Value::Namespace(state.rt.current_ns()))
}
