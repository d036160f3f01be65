use std::sync::Arc;

use super::{pack_rest, prepare_call, select_invoke, CallSiteSpec, GuardedHandle, Handle, Linker, ShapeKey};
use crate::error::SprigError;
use crate::host::names;
use crate::runtime::Runtime;
use crate::value::Value;
use crate::vm::bytecode::Constant;

/// Links calls whose callee is only known at run time. Argument zero is the
/// callee; the rest are passed through.
pub struct InvokeLinker;

fn split(args: &[Value]) -> Result<(&Value, &[Value]), SprigError> {
    args.split_first()
        .ok_or_else(|| SprigError::internal("invoke site without a receiver"))
}

/// Identity of a callee for guarding: natives by pointer, keywords by value,
/// everything else by runtime class.
fn same_callee(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(x), Value::Object(y)) => Arc::ptr_eq(&x.class, &y.class),
        (Value::Native(x), Value::Native(y)) => Arc::ptr_eq(x, y),
        (Value::Keyword(x), Value::Keyword(y)) => x == y,
        (Value::Native(_) | Value::Keyword(_) | Value::Object(_), _) => false,
        (x, y) => x.class_name().is_some() && x.class_name() == y.class_name(),
    }
}

impl Linker for InvokeLinker {
    fn name(&self) -> &'static str {
        "invoke"
    }

    /// A keyword literal in call position is looked up directly.
    fn link_static(&self, _rt: &Runtime, spec: &CallSiteSpec) -> Result<Option<Handle>, SprigError> {
        match &spec.constant {
            Some(Constant::Keyword(name)) => {
                let key = Value::keyword(name);
                Ok(Some(Arc::new(move |rt: &Runtime, args: &[Value]| {
                    let (_, rest) = split(args)?;
                    let mut call = Vec::with_capacity(rest.len() + 1);
                    call.push(key.clone());
                    call.extend(rest.iter().cloned());
                    rt.apply(&call[0], &call[1..])
                })))
            }
            _ => Ok(None),
        }
    }

    fn link_guarded(
        &self,
        rt: &Runtime,
        _spec: &CallSiteSpec,
        args: &[Value],
    ) -> Result<Option<GuardedHandle>, SprigError> {
        let (callee, rest) = split(args)?;
        let expected = callee.clone();
        let guard = Arc::new(move |args: &[Value]| args.first().is_some_and(|c| same_callee(c, &expected)));
        let handle: Handle = match callee {
            Value::Native(_) => {
                let prepared = prepare_call(rt, callee, rest.len())?;
                Arc::new(move |rt: &Runtime, args: &[Value]| {
                    let (_, rest) = split(args)?;
                    prepared(rt, rest)
                })
            }
            // the class fixes the invoke method; the receiver differs per call
            Value::Object(inst) if rt.classes.is_subclass(&inst.class.name, names::FN) => {
                let class = inst.class.clone();
                let method = select_invoke(&class, rest.len())?;
                Arc::new(move |rt: &Runtime, args: &[Value]| {
                    let (callee, rest) = split(args)?;
                    rt.invoke_method(&class, &method, Some(callee), pack_rest(&method, rest.to_vec()))
                })
            }
            Value::Nil => return Err(SprigError::runtime("cannot call nil")),
            _ => Arc::new(|rt: &Runtime, args: &[Value]| {
                let (callee, rest) = split(args)?;
                rt.apply(callee, rest)
            }),
        };
        Ok(Some(GuardedHandle { guard, handle }))
    }

    fn shape_key(&self, _spec: &CallSiteSpec, args: &[Value]) -> Option<ShapeKey> {
        let callee = args.first()?;
        Some(vec![match callee {
            Value::Native(native) => format!("native:{:p}", Arc::as_ptr(native)),
            Value::Object(inst) => format!("class:{}", inst.class.name),
            Value::Keyword(k) => format!("keyword:{}", k),
            other => format!("value:{}", other.class_name()?),
        }])
    }

    fn link_generic(&self, _spec: &CallSiteSpec) -> Handle {
        Arc::new(|rt: &Runtime, args: &[Value]| {
            let (callee, rest) = split(args)?;
            rt.apply(callee, rest)
        })
    }
}
