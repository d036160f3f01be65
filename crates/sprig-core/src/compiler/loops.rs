use super::state::CompilerState;
use crate::ast::Datum;
use crate::emit::coerce::{coerce, to_boxed};
use crate::error::SprigError;
use crate::forms::{compile_form, evaluate_form};
use crate::types::Ty;
use crate::value::Value;
use crate::vm::bytecode::{Instruction, LabelId};

/// Where a `recur` jumps back to. Compiled targets rebind local slots of the
/// given types; interpreted ones rebind the loop frame through `recur_signal`.
#[derive(Clone, Debug, PartialEq)]
pub enum LoopTarget {
    Compiled { head: LabelId, slots: Vec<(u16, Ty)>, try_depth: usize },
    Evaluated { arity: usize, try_depth: usize },
}

impl LoopTarget {
    pub fn arity(&self) -> usize {
        match self {
            LoopTarget::Compiled { slots, .. } => slots.len(),
            LoopTarget::Evaluated { arity, .. } => *arity,
        }
    }

    fn try_depth(&self) -> usize {
        match self {
            LoopTarget::Compiled { try_depth, .. } | LoopTarget::Evaluated { try_depth, .. } => *try_depth,
        }
    }
}

fn target_for(state: &CompilerState, form: &Datum, argc: usize) -> Result<LoopTarget, SprigError> {
    let target = state
        .loops
        .last()
        .cloned()
        .ok_or_else(|| form.compile_error("recur outside of a loop or fn"))?;
    if !state.tail {
        return Err(form.compile_error("Can only recur from tail position"));
    }
    if target.arity() != argc {
        return Err(form.compile_error(format!(
            "Mismatched argument count to recur, expected: {} args, got: {}",
            target.arity(),
            argc
        )));
    }
    if target.try_depth() != state.try_depth() {
        return Err(form.compile_error("Cannot recur across try"));
    }
    Ok(target)
}

/// `(recur args...)` inside a method: evaluate every argument before any
/// slot is overwritten, then jump to the loop head.
pub fn compile_recur(state: &mut CompilerState, form: &Datum, args: &[Datum]) -> Result<(), SprigError> {
    let target = target_for(state, form, args.len())?;
    let LoopTarget::Compiled { head, slots, .. } = target else {
        return Err(SprigError::internal("interpreted loop target in compiled code"));
    };
    state.with_tail(false, |s| {
        for (arg, (_, ty)) in args.iter().zip(&slots) {
            compile_form(s, arg)?;
            if let Some(top) = s.stack()?.top_type().cloned() {
                let code = if *ty == Ty::Any { to_boxed(&top) } else { coerce(&top, ty, &s.rt.classes)? };
                s.emit_all(code)?;
            }
        }
        Ok(())
    })?;
    for (slot, ty) in slots.iter().rev() {
        state.emit(Instruction::Store { slot: *slot, ty: ty.clone() })?;
    }
    state.emit(Instruction::Goto(head))
}

/// Interpreted `recur`: the values are handed to the enclosing `loop`, which
/// rebinds its frame and runs the body again.
pub fn evaluate_recur(state: &mut CompilerState, form: &Datum, args: &[Datum]) -> Result<Value, SprigError> {
    target_for(state, form, args.len())?;
    let values = state.with_tail(false, |s| {
        args.iter().map(|arg| evaluate_form(s, arg)).collect::<Result<Vec<_>, _>>()
    })?;
    state.recur_signal = Some(values);
    Ok(Value::Nil)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::stack::MethodStack;
    use crate::compiler::state::{ClassContext, ClassMode, MethodContext};
    use crate::emit::class_file::ClassFile;
    use crate::emit::code::CodeBuffer;
    use crate::host::names;
    use crate::reader::read_str;
    use crate::runtime::Runtime;

    #[test]
    fn recur_stores_the_last_argument_first() -> Result<(), SprigError> {
        let rt = Runtime::new();
        let mut state = CompilerState::new(&rt);
        let form = read_str("(recur 1 2 3)")?.remove(0);
        let args = form.as_list().map(|items| items[1..].to_vec()).unwrap_or_default();
        let file = ClassFile::new("user$recur_order", names::OBJECT);
        let (code, _) = state.with_class(ClassContext::new(file, ClassMode::AnonClass), |s, owner| {
            let method = MethodContext {
                code: CodeBuffer::new(3),
                stack: MethodStack::new(),
                try_depth: 0,
                owner,
            };
            let ((), method) = s.with_method(method, |s| {
                let head = s.code()?.here();
                s.loops.push(LoopTarget::Compiled {
                    head,
                    slots: vec![(0, Ty::Any), (1, Ty::Any), (2, Ty::Any)],
                    try_depth: 0,
                });
                s.with_tail(true, |s| compile_recur(s, &form, &args))
            })?;
            method.code.finish(8)
        })?;
        let stores: Vec<u16> = code
            .instructions
            .iter()
            .filter_map(|ins| match ins {
                Instruction::Store { slot, .. } => Some(*slot),
                _ => None,
            })
            .collect();
        assert_eq!(stores, vec![2, 1, 0]);
        assert!(matches!(code.instructions.last(), Some(Instruction::Goto(_))));
        Ok(())
    }
}
