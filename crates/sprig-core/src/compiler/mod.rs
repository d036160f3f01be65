pub mod loops;
pub mod scopes;
pub mod stack;
pub mod state;

use std::sync::Arc;

use tracing::debug;

use crate::ast::{Datum, Span};
use crate::emit::class_builder::{finish_class, CtorPlan};
use crate::emit::class_file::ClassFile;
use crate::emit::method_builder::{build_method, MethodPlan};
use crate::error::SprigError;
use crate::forms::{evaluate_form, macroexpand};
use crate::host::names;
use crate::runtime::Runtime;
use crate::symbols::munge;
use crate::value::{Intrinsic, Value};

use self::scopes::Resolution;
use self::state::{ClassContext, ClassMode, CompilerState};

const RUN: &str = "run";

/// A warning raised while compiling.
#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostic {
    pub span: Option<Span>,
    pub message: String,
}

/// Interprets one top-level form.
pub fn evaluate_toplevel(rt: &Arc<Runtime>, datum: &Datum) -> Result<Value, SprigError> {
    let mut state = CompilerState::new(rt);
    evaluate_form(&mut state, datum)
}

fn is_do(state: &CompilerState, head: &Datum) -> Result<bool, SprigError> {
    let Some(name) = head.as_symbol() else {
        return Ok(false);
    };
    Ok(match state.scopes.lookup(&state.rt, name, state.level())? {
        Some(Resolution::Var(var)) => matches!(var.deref_value(), Ok(Value::Intrinsic(Intrinsic::Do))),
        _ => false,
    })
}

/// Compiles one top-level form into a fresh class and runs it. A top-level
/// `do` is split so macros its earlier forms define apply to the later ones.
pub fn compile_toplevel(rt: &Arc<Runtime>, datum: &Datum) -> Result<Value, SprigError> {
    let mut state = CompilerState::new(rt);
    let (expanded, _) = macroexpand(&mut state, datum)?;
    if let Some([head, rest @ ..]) = expanded.as_list() {
        if is_do(&state, head)? {
            let mut last = Value::Nil;
            for form in rest {
                last = compile_toplevel(rt, form)?;
            }
            return Ok(last);
        }
    }

    let class_name = format!("{}$eval__{}", munge(&rt.current_ns().name), rt.next_id());
    let mut file = ClassFile::new(&class_name, names::OBJECT);
    file.flags.is_final = true;
    file.source = rt.options.source_name.clone();
    let body = std::slice::from_ref(&expanded);
    let ((), class) = state.with_class(ClassContext::new(file, ClassMode::AnonClass), |s, owner| {
        let mut plan = MethodPlan::new(RUN, body);
        plan.is_static = true;
        plan.recur = false;
        build_method(s, owner, plan)
    })?;
    let (info, _) = finish_class(rt, class, CtorPlan::None)?;
    let run = info
        .methods
        .iter()
        .find(|m| m.name == RUN && m.is_static)
        .cloned()
        .ok_or_else(|| SprigError::internal(format!("{} has no run method", info.name)))?;
    debug!(class = %info.name, "running top-level form");
    rt.invoke_method(&info, &run, None, Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_str;

    fn compile(rt: &Arc<Runtime>, src: &str) -> Result<Value, SprigError> {
        let mut last = Value::Nil;
        for datum in read_str(src)? {
            last = compile_toplevel(rt, &datum)?;
        }
        Ok(last)
    }

    #[test]
    fn constants_run_through_a_class() -> Result<(), SprigError> {
        let rt = Runtime::new();
        assert_eq!(compile(&rt, "42")?, Value::Int(42));
        assert!(rt.classes.class_names().iter().any(|n| n.starts_with("user$eval__")));
        Ok(())
    }

    #[test]
    fn toplevel_do_is_split() -> Result<(), SprigError> {
        let rt = Runtime::new();
        let value = compile(&rt, "(do (defmacro twice [x] (list 'do x x)) (twice 3))")?;
        assert_eq!(value, Value::Int(3));
        Ok(())
    }

    #[test]
    fn interpreted_and_compiled_agree() -> Result<(), SprigError> {
        let rt = Runtime::new();
        let datum = read_str("(let [a 1 b 2] (if (< a b) :lt :ge))")?.remove(0);
        assert_eq!(evaluate_toplevel(&rt, &datum)?, compile_toplevel(&rt, &datum)?);
        Ok(())
    }
}
