use std::sync::Arc;

use crate::ast::Datum;
use crate::compiler::scopes::Resolution;
use crate::compiler::state::CompilerState;
use crate::emit::coerce::coerce;
use crate::error::SprigError;
use crate::host::overload::{arity_candidates, resolve_static, Candidate, StaticResolution};
use crate::host::ClassInfo;
use crate::link::{CallSiteSpec, SiteKind};
use crate::types::Ty;
use crate::value::Value;
use crate::vm::bytecode::Instruction;

use super::{box_top, compile_form, evaluate_form};

/// Resolves a class named by a symbol in operator position.
fn class_arg(state: &CompilerState, datum: &Datum) -> Result<Arc<ClassInfo>, SprigError> {
    let name = datum
        .as_symbol()
        .ok_or_else(|| datum.syntax_error(format!("Expected a class name, got: {}", datum)))?;
    if let Some(class) = state.rt.resolve_class(name) {
        return Ok(class);
    }
    match state.scopes.lookup(&state.rt, name, state.level())? {
        Some(Resolution::Class(class)) => Ok(class),
        _ => Err(datum.compile_error(format!("Unable to resolve classname: {}", name))),
    }
}

/// The class a `.` target names statically, if it names one at all.
fn static_target(state: &CompilerState, target: &Datum) -> Result<Option<Arc<ClassInfo>>, SprigError> {
    let Some(name) = target.as_symbol() else {
        return Ok(None);
    };
    Ok(match state.scopes.lookup(&state.rt, name, state.level())? {
        Some(Resolution::Class(class)) => Some(class),
        _ => None,
    })
}

fn compile_args(state: &mut CompilerState, args: &[Datum]) -> Result<(), SprigError> {
    state.with_tail(false, |s| args.iter().try_for_each(|arg| compile_form(s, arg)))
}

fn evaluate_args(state: &mut CompilerState, args: &[Datum]) -> Result<Vec<Value>, SprigError> {
    state.with_tail(false, |s| args.iter().map(|arg| evaluate_form(s, arg)).collect())
}

fn emit_site(state: &mut CompilerState, kind: SiteKind, arg_types: Vec<Ty>, ret: Ty, datum: &Datum) -> Result<(), SprigError> {
    let spec = CallSiteSpec::new(kind, arg_types, ret).with_span(datum.span);
    let idx = state.add_call_site(spec)?;
    state.emit(Instruction::InvokeDynamic(idx))
}

/// Methods returning nothing still leave `nil` behind.
fn value_type(ret: &Ty) -> Ty {
    if *ret == Ty::Void {
        Ty::Any
    } else {
        ret.clone()
    }
}

fn new_parts<'a>(state: &CompilerState, datum: &Datum, args: &'a [Datum]) -> Result<(Arc<ClassInfo>, &'a [Datum]), SprigError> {
    let (class, ctor_args) = args
        .split_first()
        .ok_or_else(|| datum.syntax_error("new requires a class name"))?;
    let class = class_arg(state, class)?;
    if class.flags.is_interface || class.flags.is_abstract {
        return Err(datum.compile_error(format!(
            "Cannot instantiate abstract class or interface: {}",
            class.name
        )));
    }
    Ok((class, ctor_args))
}

pub fn compile_new(state: &mut CompilerState, datum: &Datum, args: &[Datum]) -> Result<(), SprigError> {
    let (class, ctor_args) = new_parts(state, datum, args)?;
    compile_args(state, ctor_args)?;
    if state.is_unreachable() {
        return Ok(());
    }
    let arg_types = state.stack()?.top_types(ctor_args.len())?;
    let candidates: Vec<Candidate> = class
        .constructors
        .iter()
        .map(|ctor| (class.clone(), ctor.clone()))
        .collect();
    match resolve_static(&candidates, &arg_types, &state.rt.classes) {
        StaticResolution::Unique((_, ctor)) if !ctor.is_varargs && direct_fit(state, &arg_types, &ctor.params) => {
            state.emit(Instruction::NewInstance {
                class: class.name.clone(),
                params: ctor.params.clone(),
            })
        }
        StaticResolution::NoMatch
            if arity_candidates(&candidates, arg_types.len()).is_empty() || !arg_types.contains(&Ty::Any) =>
        {
            Err(datum.compile_error(format!(
                "No matching ctor found for class {} taking {} args",
                class.name,
                arg_types.len()
            )))
        }
        _ => emit_site(
            state,
            SiteKind::Constructor {
                class: class.name.clone(),
            },
            arg_types,
            Ty::Class(class.name.clone()),
            datum,
        ),
    }
}

/// Arguments already have exactly the representation the parameters take.
fn direct_fit(state: &CompilerState, args: &[Ty], params: &[Ty]) -> bool {
    args.len() == params.len()
        && args
            .iter()
            .zip(params)
            .all(|(arg, param)| matches!(coerce(arg, param, &state.rt.classes), Ok(code) if code.is_empty()))
}

pub fn evaluate_new(state: &mut CompilerState, datum: &Datum, args: &[Datum]) -> Result<Value, SprigError> {
    let (class, ctor_args) = new_parts(state, datum, args)?;
    let values = evaluate_args(state, ctor_args)?;
    state.rt.instantiate(&class, values)
}

/// A parsed member access: `(. target member args*)` or
/// `(. target (member args*))`.
struct Member<'a> {
    target: &'a Datum,
    name: &'a str,
    field: Option<&'a str>,
    args: &'a [Datum],
}

fn member_parts<'a>(datum: &Datum, args: &'a [Datum]) -> Result<Member<'a>, SprigError> {
    let [target, member, rest @ ..] = args else {
        return Err(datum.syntax_error("Malformed member expression, expecting (. target member ...)"));
    };
    let (name, args) = match member.as_list() {
        Some([head, inner @ ..]) if rest.is_empty() => (head, inner),
        _ => (member, rest),
    };
    let name = name
        .as_symbol()
        .ok_or_else(|| name.syntax_error(format!("Malformed member expression: {}", name)))?;
    let field = name.strip_prefix('-').filter(|f| !f.is_empty());
    if field.is_some() && !args.is_empty() {
        return Err(datum.syntax_error(format!("Field access {} takes no arguments", name)));
    }
    Ok(Member { target, name, field, args })
}

pub fn compile_dot(state: &mut CompilerState, datum: &Datum, args: &[Datum]) -> Result<(), SprigError> {
    let member = member_parts(datum, args)?;
    match static_target(state, member.target)? {
        Some(class) => compile_static_member(state, datum, &class, &member),
        None => compile_instance_member(state, datum, &member),
    }
}

fn compile_static_member(
    state: &mut CompilerState,
    datum: &Datum,
    class: &Arc<ClassInfo>,
    member: &Member<'_>,
) -> Result<(), SprigError> {
    let field_name = member.field.or(if member.args.is_empty() { Some(member.name) } else { None });
    if let Some(field_name) = field_name {
        if let Some((owner, field)) = state
            .rt
            .classes
            .find_field(&class.name, field_name)
            .filter(|(_, f)| f.is_static)
        {
            return state.emit(Instruction::GetStatic {
                owner: owner.name.clone(),
                name: field.name.clone(),
                ty: field.ty.clone(),
            });
        }
        if member.field.is_some() {
            return Err(datum.compile_error(format!("No such static field: {}/{}", class.name, field_name)));
        }
    }
    let candidates = state.rt.classes.find_methods(&class.name, member.name, true);
    compile_args(state, member.args)?;
    if state.is_unreachable() {
        return Ok(());
    }
    let arg_types = state.stack()?.top_types(member.args.len())?;
    let ret = match resolve_static(&candidates, &arg_types, &state.rt.classes) {
        StaticResolution::Unique((_, method)) => value_type(&method.ret),
        StaticResolution::Ambiguous(_) => Ty::Any,
        StaticResolution::NoMatch => {
            return Err(datum.compile_error(format!(
                "No matching method {} found taking {} args for class {}",
                member.name,
                arg_types.len(),
                class.name
            )))
        }
    };
    emit_site(
        state,
        SiteKind::StaticMethod {
            class: class.name.clone(),
            name: member.name.to_string(),
        },
        arg_types,
        ret,
        datum,
    )
}

fn compile_instance_member(state: &mut CompilerState, datum: &Datum, member: &Member<'_>) -> Result<(), SprigError> {
    state.with_tail(false, |s| compile_form(s, member.target))?;
    box_top(state)?;
    let receiver = state.stack()?.top_type().cloned();
    if let Some(field) = member.field {
        if state.is_unreachable() {
            return Ok(());
        }
        let ret = receiver
            .as_ref()
            .and_then(Ty::class_name)
            .and_then(|class| state.rt.classes.find_field(class, field))
            .filter(|(_, f)| !f.is_static)
            .map_or(Ty::Any, |(_, f)| f.ty);
        let arg_types = state.stack()?.top_types(1)?;
        return emit_site(
            state,
            SiteKind::InstanceField {
                name: field.to_string(),
            },
            arg_types,
            ret,
            datum,
        );
    }
    compile_args(state, member.args)?;
    if state.is_unreachable() {
        return Ok(());
    }
    let arg_types = state.stack()?.top_types(member.args.len() + 1)?;
    let ret = match receiver.as_ref().and_then(Ty::class_name) {
        Some(class) => {
            let candidates = state.rt.classes.find_methods(class, member.name, false);
            match resolve_static(&candidates, &arg_types[1..], &state.rt.classes) {
                StaticResolution::Unique((_, method)) => value_type(&method.ret),
                _ => Ty::Any,
            }
        }
        None => Ty::Any,
    };
    emit_site(
        state,
        SiteKind::InstanceMethod {
            name: member.name.to_string(),
        },
        arg_types,
        ret,
        datum,
    )
}

pub fn evaluate_dot(state: &mut CompilerState, datum: &Datum, args: &[Datum]) -> Result<Value, SprigError> {
    let member = member_parts(datum, args)?;
    if let Some(class) = static_target(state, member.target)? {
        let field_name = member.field.or(if member.args.is_empty() { Some(member.name) } else { None });
        if let Some(field_name) = field_name {
            if let Some((_, field)) = state
                .rt
                .classes
                .find_field(&class.name, field_name)
                .filter(|(_, f)| f.is_static)
            {
                return field
                    .constant
                    .ok_or_else(|| SprigError::linkage(format!("static field {}/{} has no value", class.name, field_name)));
            }
            if member.field.is_some() {
                return Err(datum.compile_error(format!("No such static field: {}/{}", class.name, field_name)));
            }
        }
        let values = evaluate_args(state, member.args)?;
        return state.rt.call_static(&class.name, member.name, values);
    }
    let receiver = state.with_tail(false, |s| evaluate_form(s, member.target))?;
    if let Some(field) = member.field {
        return match &receiver {
            Value::Object(instance) => instance.get_field(field),
            other => Err(SprigError::linkage(format!(
                "no field {} on {}",
                field,
                other.class_name().unwrap_or("nil")
            ))),
        };
    }
    let values = evaluate_args(state, member.args)?;
    state.rt.call_instance(&receiver, member.name, values)
}

fn instance_check_parts<'a>(state: &CompilerState, datum: &Datum, args: &'a [Datum]) -> Result<(Arc<ClassInfo>, &'a Datum), SprigError> {
    let [class, value] = args else {
        return Err(datum.syntax_error("instance? takes a class and a value"));
    };
    Ok((class_arg(state, class)?, value))
}

pub fn compile_instance_check(state: &mut CompilerState, datum: &Datum, args: &[Datum]) -> Result<(), SprigError> {
    let (class, value) = instance_check_parts(state, datum, args)?;
    state.with_tail(false, |s| compile_form(s, value))?;
    box_top(state)?;
    state.emit(Instruction::InstanceOf(class.name.clone()))
}

pub fn evaluate_instance_check(state: &mut CompilerState, datum: &Datum, args: &[Datum]) -> Result<Value, SprigError> {
    let (class, value) = instance_check_parts(state, datum, args)?;
    let value = state.with_tail(false, |s| evaluate_form(s, value))?;
    Ok(Value::Bool(state.rt.classes.instance_of(&value, &class.name)))
}
