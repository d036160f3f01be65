use crate::ast::Datum;
use crate::compiler::loops::LoopTarget;
use crate::compiler::scopes::{Binding, Slot, VarScope};
use crate::compiler::stack::MethodStack;
use crate::compiler::state::{CompilerState, MethodContext};
use crate::emit::class_file::MethodDef;
use crate::emit::code::CodeBuffer;
use crate::emit::coerce::coerce;
use crate::error::SprigError;
use crate::forms::compile_body;
use crate::types::Ty;
use crate::vm::bytecode::Instruction;

/// An instance field the body sees as a local.
#[derive(Clone, Debug)]
pub struct FieldBinding {
    pub name: String,
    pub ty: Ty,
    pub mutable: bool,
}

pub struct MethodPlan<'a> {
    pub name: String,
    pub params: Vec<Ty>,
    pub param_names: Vec<String>,
    pub ret: Ty,
    pub is_static: bool,
    pub is_varargs: bool,
    /// Name bound to the receiver: a fn's own name, or `this`.
    pub receiver_name: Option<String>,
    pub fields: Vec<FieldBinding>,
    /// The parameters form a recur target.
    pub recur: bool,
    pub body: &'a [Datum],
}

impl<'a> MethodPlan<'a> {
    pub fn new(name: &str, body: &'a [Datum]) -> Self {
        Self {
            name: name.to_string(),
            params: Vec::new(),
            param_names: Vec::new(),
            ret: Ty::Any,
            is_static: false,
            is_varargs: false,
            receiver_name: None,
            fields: Vec::new(),
            recur: true,
            body,
        }
    }
}

/// Compiles `plan` as a method of the class at `owner`, appending the
/// finished definition to that class.
pub fn build_method(state: &mut CompilerState, owner: usize, plan: MethodPlan<'_>) -> Result<(), SprigError> {
    let first = u16::from(!plan.is_static);
    let reserved = plan.params.len() as u16 + first;
    let class_name = state
        .classes
        .get(owner)
        .map(|c| c.file.name.clone())
        .ok_or_else(|| SprigError::internal("method owner out of range"))?;
    let context = MethodContext {
        code: CodeBuffer::new(reserved),
        stack: MethodStack::new(),
        try_depth: 0,
        owner,
    };
    let ((), method) = state.with_method(context, |s| {
        s.with_scope(VarScope::Field, |s| {
            for field in &plan.fields {
                s.scopes.bind(Binding {
                    name: field.name.clone(),
                    ty: field.ty.clone(),
                    slot: Slot::Field(field.name.clone()),
                    value: None,
                    mutable: field.mutable,
                })?;
            }
            if let Some(name) = &plan.receiver_name {
                s.scopes.bind(Binding {
                    name: name.clone(),
                    ty: Ty::Class(class_name.clone()),
                    slot: Slot::This,
                    value: None,
                    mutable: false,
                })?;
            }
            s.with_scope(VarScope::MethodParam, |s| {
                let start = s.code()?.here();
                let mut slots = Vec::with_capacity(plan.params.len());
                for (i, (name, ty)) in plan.param_names.iter().zip(&plan.params).enumerate() {
                    let slot = first + i as u16;
                    s.scopes.bind(Binding::local(name, ty.clone(), slot))?;
                    slots.push((slot, ty.clone()));
                }
                if plan.recur {
                    s.loops.push(LoopTarget::Compiled {
                        head: start,
                        slots: slots.clone(),
                        try_depth: 0,
                    });
                }
                s.with_tail(true, |s| compile_body(s, plan.body))?;
                if let Some(top) = s.stack()?.top_type().cloned() {
                    let code = coerce(&top, &plan.ret, &s.rt.classes).map_err(|err| {
                        SprigError::compile(format!("{}.{}: {}", class_name, plan.name, err.message()))
                    })?;
                    s.emit_all(code)?;
                    s.emit(Instruction::Return(plan.ret.clone()))?;
                }
                let end = s.code()?.here();
                for ((slot, ty), name) in slots.iter().zip(&plan.param_names) {
                    s.code()?.describe_local(name, *slot, ty.clone(), start, end);
                }
                Ok(())
            })
        })
    })?;
    let code = method.code.finish(method.stack.max())?;
    let class = state
        .classes
        .get_mut(owner)
        .ok_or_else(|| SprigError::internal("method owner out of range"))?;
    class.file.methods.push(MethodDef {
        name: plan.name,
        params: plan.params,
        param_names: plan.param_names,
        ret: plan.ret,
        is_static: plan.is_static,
        is_varargs: plan.is_varargs,
        code: Some(code),
    });
    Ok(())
}

/// Declares a method without a body.
pub fn abstract_method(name: &str, params: Vec<Ty>, ret: Ty) -> MethodDef {
    MethodDef {
        name: name.to_string(),
        param_names: (0..params.len()).map(|i| format!("p{}", i)).collect(),
        params,
        ret,
        is_static: false,
        is_varargs: false,
        code: None,
    }
}
