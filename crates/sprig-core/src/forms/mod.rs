use std::sync::Arc;

use im::{HashMap, HashSet};

use crate::ast::{datum_to_value, Datum, DatumKind, FormTag};
use crate::compiler::scopes::{Binding, Resolution, Slot, VarScope};
use crate::compiler::stack::StackRecord;
use crate::compiler::state::CompilerState;
use crate::emit::coerce::to_boxed;
use crate::error::SprigError;
use crate::link::{CallSiteSpec, SiteKind};
use crate::namespaces::Var;
use crate::types::Ty;
use crate::value::{Intrinsic, Value};
use crate::vm::bytecode::{CollKind, Constant, Instruction};

mod classes;
mod control;
mod interop;
mod macros;
mod special;
pub mod syntax_quote;

pub use macros::{desugar, macroexpand};

/// The closed set of form kinds.
#[derive(Clone, Copy, Debug)]
pub enum Form<'a> {
    /// nil, booleans, characters, numbers, strings, regexes and keywords.
    Literal(&'a Datum),
    Symbol(&'a Datum),
    /// Vector, map and set literals.
    Collection(&'a Datum),
    SExpr(&'a Datum),
}

pub fn dispatch(datum: &Datum) -> Form<'_> {
    match FormTag::classify(datum) {
        FormTag::Symbol => Form::Symbol(datum),
        FormTag::Vector | FormTag::Map | FormTag::Set => Form::Collection(datum),
        FormTag::SExpression => Form::SExpr(datum),
        FormTag::Nil
        | FormTag::False
        | FormTag::True
        | FormTag::Char
        | FormTag::Number
        | FormTag::String
        | FormTag::Regex
        | FormTag::Keyword => Form::Literal(datum),
    }
}

type EmitFn<'a> = Box<dyn FnOnce(&mut CompilerState) -> Result<(), SprigError> + 'a>;

/// A form analyzed for compilation whose code has not been emitted yet.
pub struct DeferredCompilation<'a> {
    pub form_type: FormTag,
    pub reference: &'a Datum,
    /// The constant the form folds to, when it is one.
    pub ldc_form: Option<Constant>,
    emit: EmitFn<'a>,
}

impl<'a> DeferredCompilation<'a> {
    fn new(
        reference: &'a Datum,
        ldc_form: Option<Constant>,
        emit: impl FnOnce(&mut CompilerState) -> Result<(), SprigError> + 'a,
    ) -> Self {
        Self {
            form_type: FormTag::classify(reference),
            reference,
            ldc_form,
            emit: Box::new(emit),
        }
    }

    fn constant(reference: &'a Datum, constant: Constant) -> Self {
        let emitted = constant.clone();
        Self::new(reference, Some(constant), move |s| emit_constant(s, emitted))
    }

    /// Emits the form. It must leave exactly one more value on the operand
    /// stack, or leave the rest of the method unreachable.
    pub fn compile(self, state: &mut CompilerState) -> Result<(), SprigError> {
        let before = state.stack()?.len();
        let span = self.reference.span;
        (self.emit)(state).map_err(|err| err.with_span(span))?;
        let stack = state.stack()?;
        if stack.is_unreachable() || stack.len() == before + 1 {
            Ok(())
        } else {
            Err(SprigError::internal(format!(
                "{} form left {} values instead of one",
                self.form_type.name(),
                stack.len() as isize - before as isize
            ))
            .with_span(span))
        }
    }
}

impl<'a> Form<'a> {
    pub fn datum(&self) -> &'a Datum {
        match *self {
            Form::Literal(d) | Form::Symbol(d) | Form::Collection(d) | Form::SExpr(d) => d,
        }
    }

    pub fn evaluate_form(&self, state: &mut CompilerState) -> Result<Value, SprigError> {
        let result = match *self {
            Form::Literal(d) => Ok(datum_to_value(d)),
            Form::Symbol(d) => evaluate_symbol(state, d),
            Form::Collection(d) => evaluate_collection(state, d),
            Form::SExpr(d) => evaluate_sexpr(state, d),
        };
        result.map_err(|err| err.with_span(self.datum().span))
    }

    pub fn compile_form(&self, state: &mut CompilerState) -> Result<DeferredCompilation<'a>, SprigError> {
        let result = match *self {
            Form::Literal(d) => literal_constant(d).map(|c| DeferredCompilation::constant(d, c)),
            Form::Symbol(d) => Ok(DeferredCompilation::new(d, None, move |s| compile_symbol(s, d))),
            Form::Collection(d) => Ok(match constant_of(d) {
                Some(c) => DeferredCompilation::constant(d, c),
                None => DeferredCompilation::new(d, None, move |s| compile_collection(s, d)),
            }),
            Form::SExpr(d) => compile_sexpr(state, d),
        };
        result.map_err(|err| err.with_span(self.datum().span))
    }

    /// Evaluates the form as an element of a syntax-quote template; the flag
    /// is set when the result must be spliced into the enclosing sequence.
    pub fn macro_evaluate_form(&self, state: &mut CompilerState) -> Result<(Value, bool), SprigError> {
        syntax_quote::evaluate_element(state, self.datum())
    }

    pub fn macro_compile_form(&self, state: &mut CompilerState) -> Result<(DeferredCompilation<'a>, bool), SprigError> {
        syntax_quote::compile_element(state, self.datum())
    }
}

pub fn compile_form(state: &mut CompilerState, datum: &Datum) -> Result<(), SprigError> {
    dispatch(datum).compile_form(state)?.compile(state)
}

pub fn evaluate_form(state: &mut CompilerState, datum: &Datum) -> Result<Value, SprigError> {
    dispatch(datum).evaluate_form(state)
}

/// Compiles `forms` in sequence, keeping only the last value. Only the last
/// form inherits tail position.
pub fn compile_body(state: &mut CompilerState, forms: &[Datum]) -> Result<(), SprigError> {
    let Some((last, init)) = forms.split_last() else {
        return emit_constant(state, Constant::Nil);
    };
    for form in init {
        state.with_tail(false, |s| compile_form(s, form))?;
        pop_value(state)?;
    }
    compile_form(state, last)
}

pub fn evaluate_body(state: &mut CompilerState, forms: &[Datum]) -> Result<Value, SprigError> {
    let Some((last, init)) = forms.split_last() else {
        return Ok(Value::Nil);
    };
    for form in init {
        state.with_tail(false, |s| evaluate_form(s, form))?;
    }
    evaluate_form(state, last)
}

/// Discards the top value with a pop of the matching width.
pub fn pop_value(state: &mut CompilerState) -> Result<(), SprigError> {
    match state.stack()?.top_type().map(Ty::width) {
        Some(1) => state.emit(Instruction::Pop),
        Some(2) => state.emit(Instruction::Pop2),
        _ => Ok(()),
    }
}

pub fn box_top(state: &mut CompilerState) -> Result<(), SprigError> {
    match state.stack()?.top_type().cloned() {
        Some(ty) => state.emit_all(to_boxed(&ty)),
        None => Ok(()),
    }
}

pub fn top_type(state: &CompilerState) -> Result<Option<Ty>, SprigError> {
    Ok(state.stack()?.top_type().cloned())
}

/// Resets the stack to `base` plus the form's result: a value of `result`,
/// or unreachable when no path produced one.
pub fn settle(state: &mut CompilerState, base: Vec<StackRecord>, result: Option<Ty>) -> Result<(), SprigError> {
    let method = state.method()?;
    let dead = base.iter().any(|r| *r == StackRecord::Unreachable);
    method.stack.restore(base);
    if dead {
        return Ok(());
    }
    match result {
        Some(ty) => method.stack.push(ty, false),
        None => method.stack.push_unreachable(),
    }
    Ok(())
}

pub fn emit_constant(state: &mut CompilerState, constant: Constant) -> Result<(), SprigError> {
    state.emit(Instruction::Const(constant))?;
    state.method()?.stack.mark_constant();
    Ok(())
}

/// Resolves a type hint: a primitive name, or a class visible from the
/// current namespace.
pub fn resolve_hint(state: &CompilerState, hint: &str) -> Result<Ty, SprigError> {
    if let Some(ty) = Ty::primitive_hint(hint) {
        return Ok(ty);
    }
    state
        .rt
        .resolve_class(hint)
        .map(|class| Ty::Class(class.name.clone()))
        .ok_or_else(|| SprigError::compile(format!("Unable to resolve classname: {}", hint)))
}

pub fn unbound(name: &str) -> SprigError {
    SprigError::unbound(format!("Unable to resolve symbol: {} in this context", name))
}

fn literal_constant(datum: &Datum) -> Result<Constant, SprigError> {
    constant_of(datum).ok_or_else(|| SprigError::internal(format!("{} is not a literal", datum)))
}

/// The constant a datum folds to without evaluation, if any. Collections
/// fold when every element does.
pub fn constant_of(datum: &Datum) -> Option<Constant> {
    Some(match &datum.kind {
        DatumKind::Nil => Constant::Nil,
        DatumKind::Bool(b) => Constant::Bool(*b),
        DatumKind::Char(c) => Constant::Char(*c),
        DatumKind::Int(n) => Constant::Long(*n),
        DatumKind::Float(n) => Constant::Double(*n),
        DatumKind::Str(s) => Constant::Str(s.clone()),
        DatumKind::Regex(r) => Constant::Regex(r.clone()),
        DatumKind::Keyword(k) => Constant::Keyword(k.clone()),
        DatumKind::Symbol(_) | DatumKind::List(_) => return None,
        DatumKind::Vector(items) | DatumKind::Set(items) => {
            if items.iter().all(|d| constant_of(d).is_some()) {
                Constant::Quoted(datum.clone())
            } else {
                return None;
            }
        }
        DatumKind::Map(pairs) => {
            if pairs.iter().all(|(k, v)| constant_of(k).is_some() && constant_of(v).is_some()) {
                Constant::Quoted(datum.clone())
            } else {
                return None;
            }
        }
    })
}

fn collection_parts(datum: &Datum) -> Option<(CollKind, Vec<&Datum>, u16)> {
    Some(match &datum.kind {
        DatumKind::Vector(items) => (CollKind::Vector, items.iter().collect(), items.len() as u16),
        DatumKind::Set(items) => (CollKind::Set, items.iter().collect(), items.len() as u16),
        DatumKind::List(items) => (CollKind::List, items.iter().collect(), items.len() as u16),
        DatumKind::Map(pairs) => (
            CollKind::Map,
            pairs.iter().flat_map(|(k, v)| [k, v]).collect(),
            pairs.len() as u16,
        ),
        _ => return None,
    })
}

fn compile_collection(state: &mut CompilerState, datum: &Datum) -> Result<(), SprigError> {
    let (kind, items, count) =
        collection_parts(datum).ok_or_else(|| SprigError::internal("collection form without items"))?;
    state.with_tail(false, |s| {
        for item in items {
            compile_form(s, item)?;
            box_top(s)?;
        }
        Ok(())
    })?;
    state.emit(Instruction::MakeCollection { kind, count })
}

fn evaluate_collection(state: &mut CompilerState, datum: &Datum) -> Result<Value, SprigError> {
    let mut eval = |d: &Datum| state.with_tail(false, |s| evaluate_form(s, d));
    Ok(match &datum.kind {
        DatumKind::Vector(items) => Value::vector(items.iter().map(&mut eval).collect::<Result<Vec<_>, _>>()?),
        DatumKind::Set(items) => Value::Set(
            items
                .iter()
                .map(&mut eval)
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .collect::<HashSet<_>>(),
        ),
        DatumKind::Map(pairs) => {
            let mut map = HashMap::new();
            for (k, v) in pairs {
                let key = eval(k)?;
                let value = eval(v)?;
                map.insert(key, value);
            }
            Value::Map(map)
        }
        _ => return Err(SprigError::internal("collection form without items")),
    })
}

fn load_binding(state: &mut CompilerState, binding: &Binding) -> Result<(), SprigError> {
    match &binding.slot {
        Slot::Local(slot) => state.emit(Instruction::Load {
            slot: *slot,
            ty: binding.ty.clone(),
        }),
        Slot::This => state.emit(Instruction::Load {
            slot: 0,
            ty: binding.ty.clone(),
        }),
        Slot::Field(name) => {
            let owner = state.current_class()?.file.name.clone();
            state.emit(Instruction::Load {
                slot: 0,
                ty: Ty::Class(owner.clone()),
            })?;
            state.emit(Instruction::GetField {
                owner,
                name: name.clone(),
                ty: binding.ty.clone(),
            })
        }
        Slot::None => Err(SprigError::internal(format!(
            "{} has no storage in compiled code",
            binding.name
        ))),
    }
}

/// Loads a binding the current class captured from an enclosing method.
fn load_capture(state: &mut CompilerState, binding: &Binding) -> Result<(), SprigError> {
    let record = state.capture(&binding.name, &binding.ty)?;
    let owner = state.current_class()?.file.name.clone();
    state.emit(Instruction::Load {
        slot: 0,
        ty: Ty::Class(owner.clone()),
    })?;
    state.emit(Instruction::GetField {
        owner,
        name: record.field,
        ty: record.ty,
    })
}

fn check_var_value(var: &Var) -> Result<(), SprigError> {
    let snapshot = var.snapshot();
    if snapshot.flags.is_macro {
        return Err(SprigError::compile(format!(
            "Can't take value of a macro: #'{}",
            var.qualified_name()
        )));
    }
    if let Some(Value::Intrinsic(intrinsic)) = snapshot.value {
        return Err(SprigError::compile(format!(
            "Can't take value of special form: {}",
            intrinsic.name()
        )));
    }
    Ok(())
}

pub fn compile_symbol(state: &mut CompilerState, datum: &Datum) -> Result<(), SprigError> {
    let name = datum
        .as_symbol()
        .ok_or_else(|| SprigError::internal("symbol form without a name"))?;
    compile_symbol_named(state, name, datum)
}

/// Emits the load of whatever `name` resolves to from the current method.
pub fn compile_symbol_named(state: &mut CompilerState, name: &str, datum: &Datum) -> Result<(), SprigError> {
    let resolved = state
        .scopes
        .lookup(&state.rt, name, state.level())?
        .ok_or_else(|| unbound(name))?;
    match resolved {
        Resolution::Local {
            scope: VarScope::Closure,
            binding,
        } => load_capture(state, &binding),
        Resolution::Local { binding, .. } => load_binding(state, &binding),
        Resolution::Var(var) => {
            check_var_value(&var)?;
            let spec = CallSiteSpec::new(
                SiteKind::GlobalValue {
                    ns: var.ns.clone(),
                    name: var.name.clone(),
                },
                Vec::new(),
                Ty::Any,
            )
            .with_span(datum.span);
            let idx = state.add_call_site(spec)?;
            state.emit(Instruction::InvokeDynamic(idx))
        }
        Resolution::Namespace(ns) => emit_constant(state, Constant::Namespace(ns.name.clone())),
        Resolution::Class(class) => emit_constant(state, Constant::Class(class.name.clone())),
        Resolution::StaticField { class, field } => state.emit(Instruction::GetStatic {
            owner: class.name.clone(),
            name: field.name.clone(),
            ty: field.ty.clone(),
        }),
    }
}

pub fn evaluate_symbol(state: &mut CompilerState, datum: &Datum) -> Result<Value, SprigError> {
    let name = datum
        .as_symbol()
        .ok_or_else(|| SprigError::internal("symbol form without a name"))?;
    let resolved = state
        .scopes
        .lookup(&state.rt, name, state.level())?
        .ok_or_else(|| unbound(name))?;
    match resolved {
        Resolution::Local { binding, .. } => binding
            .value
            .ok_or_else(|| SprigError::internal(format!("{} has no interpreted value", name))),
        Resolution::Var(var) => {
            check_var_value(&var)?;
            var.deref_value()
        }
        Resolution::Namespace(ns) => Ok(Value::Namespace(ns)),
        Resolution::Class(class) => Ok(Value::Class(class)),
        Resolution::StaticField { class, field } => field
            .constant
            .ok_or_else(|| SprigError::linkage(format!("no static field {}/{}", class.name, field.name))),
    }
}

enum Call {
    Special(Intrinsic),
    Global(Arc<Var>),
    Invoke,
}

fn classify_call(state: &CompilerState, head: &Datum) -> Result<Call, SprigError> {
    let Some(name) = head.as_symbol() else {
        return Ok(Call::Invoke);
    };
    match state.scopes.lookup(&state.rt, name, state.level())? {
        Some(Resolution::Var(var)) => match var.snapshot().value {
            Some(Value::Intrinsic(intrinsic)) => Ok(Call::Special(intrinsic)),
            _ => Ok(Call::Global(var)),
        },
        Some(_) => Ok(Call::Invoke),
        None => Err(unbound(name).with_span(head.span)),
    }
}

fn compile_sexpr<'a>(state: &mut CompilerState, datum: &'a Datum) -> Result<DeferredCompilation<'a>, SprigError> {
    let items = datum
        .as_list()
        .ok_or_else(|| SprigError::internal("s-expression without items"))?;
    if items.is_empty() {
        return Ok(DeferredCompilation::constant(datum, Constant::Quoted(datum.clone())));
    }
    let (expanded, _) = macroexpand(state, datum)?;
    if !expanded.same_shape(datum) {
        return Ok(DeferredCompilation::new(datum, None, move |s| compile_form(s, &expanded)));
    }
    Ok(match classify_call(state, &items[0])? {
        Call::Special(Intrinsic::Quote) => DeferredCompilation::constant(datum, special::quoted_constant(datum)?),
        Call::Special(intrinsic) => DeferredCompilation::new(datum, None, move |s| special::compile(s, intrinsic, datum)),
        Call::Global(var) => DeferredCompilation::new(datum, None, move |s| compile_global_call(s, datum, &var)),
        Call::Invoke => DeferredCompilation::new(datum, None, move |s| compile_invoke(s, datum)),
    })
}

fn compile_args(state: &mut CompilerState, args: &[Datum]) -> Result<(), SprigError> {
    state.with_tail(false, |s| args.iter().try_for_each(|arg| compile_form(s, arg)))
}

/// A call through a global binding. A final var bound to a native lends its
/// declared return type to the call site.
fn compile_global_call(state: &mut CompilerState, datum: &Datum, var: &Arc<Var>) -> Result<(), SprigError> {
    let items = datum.as_list().unwrap_or(&[]);
    let args = &items[1..];
    compile_args(state, args)?;
    if state.is_unreachable() {
        return Ok(());
    }
    let arg_types = state.stack()?.top_types(args.len())?;
    let snapshot = var.snapshot();
    let ret = match (&snapshot.value, snapshot.flags.is_final) {
        (Some(Value::Native(native)), true) if native.ret != Ty::Void => native.ret.clone(),
        _ => Ty::Any,
    };
    let spec = CallSiteSpec::new(
        SiteKind::GlobalCall {
            ns: var.ns.clone(),
            name: var.name.clone(),
        },
        arg_types,
        ret,
    )
    .with_span(datum.span);
    let idx = state.add_call_site(spec)?;
    state.emit(Instruction::InvokeDynamic(idx))
}

/// A call on a callee only known at run time; the callee is argument zero.
fn compile_invoke(state: &mut CompilerState, datum: &Datum) -> Result<(), SprigError> {
    let items = datum.as_list().unwrap_or(&[]);
    let constant = match &items[0].kind {
        DatumKind::Keyword(k) => Some(Constant::Keyword(k.clone())),
        _ => None,
    };
    compile_args(state, items)?;
    if state.is_unreachable() {
        return Ok(());
    }
    let arg_types = state.stack()?.top_types(items.len())?;
    let spec = CallSiteSpec::new(SiteKind::Invoke, arg_types, Ty::Any)
        .with_constant(constant)
        .with_span(datum.span);
    let idx = state.add_call_site(spec)?;
    state.emit(Instruction::InvokeDynamic(idx))
}

fn evaluate_args(state: &mut CompilerState, args: &[Datum]) -> Result<Vec<Value>, SprigError> {
    state.with_tail(false, |s| args.iter().map(|arg| evaluate_form(s, arg)).collect())
}

fn evaluate_sexpr(state: &mut CompilerState, datum: &Datum) -> Result<Value, SprigError> {
    let items = datum
        .as_list()
        .ok_or_else(|| SprigError::internal("s-expression without items"))?;
    if items.is_empty() {
        return Ok(Value::list([]));
    }
    let (expanded, _) = macroexpand(state, datum)?;
    if !expanded.same_shape(datum) {
        return evaluate_form(state, &expanded);
    }
    match classify_call(state, &items[0])? {
        Call::Special(intrinsic) => special::evaluate(state, intrinsic, datum),
        Call::Global(var) => {
            check_var_value(&var)?;
            let callee = var.deref_value()?;
            let args = evaluate_args(state, &items[1..])?;
            state.rt.apply(&callee, &args)
        }
        Call::Invoke => {
            let callee = state.with_tail(false, |s| evaluate_form(s, &items[0]))?;
            let args = evaluate_args(state, &items[1..])?;
            state.rt.apply(&callee, &args)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Span;
    use crate::reader::Reader;

    fn read(src: &str) -> Datum {
        Reader::new(src).read_all().expect("readable")[0].clone()
    }

    #[test]
    fn dispatch_follows_the_tag() {
        assert!(matches!(dispatch(&read("42")), Form::Literal(_)));
        assert!(matches!(dispatch(&read(":k")), Form::Literal(_)));
        assert!(matches!(dispatch(&read("x")), Form::Symbol(_)));
        assert!(matches!(dispatch(&read("[1 x]")), Form::Collection(_)));
        assert!(matches!(dispatch(&read("#{1}")), Form::Collection(_)));
        assert!(matches!(dispatch(&read("(f 1)")), Form::SExpr(_)));
    }

    #[test]
    fn constant_collections_fold() {
        assert!(matches!(constant_of(&read("[1 [2 :a] {\"k\" 3}]")), Some(Constant::Quoted(_))));
        assert!(constant_of(&read("[1 x]")).is_none());
        assert!(constant_of(&read("(1 2)")).is_none());
        assert_eq!(constant_of(&Datum::nil(Span::default())), Some(Constant::Nil));
    }
}
