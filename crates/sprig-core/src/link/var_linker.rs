use std::sync::Arc;

use tracing::debug;

use super::{prepare_call, CallSiteSpec, GuardedHandle, Handle, Linker, SiteKind};
use crate::error::SprigError;
use crate::namespaces::Var;
use crate::runtime::Runtime;
use crate::value::Value;

/// Links reads of and calls through global bindings.
///
/// A final, bound var is linked statically: the site keeps the value it saw
/// even if the var is later rebound. Every other var is guarded by its switch
/// point, so a rebinding sends the site back through relinking.
pub struct VarLinker;

fn site_var(rt: &Runtime, spec: &CallSiteSpec) -> Result<(Arc<Var>, bool), SprigError> {
    let (ns, name, is_call) = match &spec.kind {
        SiteKind::GlobalValue { ns, name } => (ns, name, false),
        SiteKind::GlobalCall { ns, name } => (ns, name, true),
        other => return Err(SprigError::internal(format!("var linker given {:?}", other))),
    };
    let var = rt
        .find_var(ns, name)
        .ok_or_else(|| SprigError::linkage(format!("no var {}/{}", ns, name)))?;
    Ok((var, is_call))
}

fn bound_value(var: &Var, value: Option<Value>) -> Result<Value, SprigError> {
    value.ok_or_else(|| SprigError::runtime(format!("var {} is unbound", var.qualified_name())))
}

impl Linker for VarLinker {
    fn name(&self) -> &'static str {
        "var"
    }

    fn link_static(&self, rt: &Runtime, spec: &CallSiteSpec) -> Result<Option<Handle>, SprigError> {
        let (var, is_call) = site_var(rt, spec)?;
        let snapshot = var.snapshot();
        let Some(value) = snapshot.value.filter(|_| snapshot.flags.is_final) else {
            return Ok(None);
        };
        debug!(var = %var.qualified_name(), "static link");
        if is_call {
            let argc = spec.arg_types.len();
            Ok(Some(prepare_call(rt, &value, argc)?))
        } else {
            Ok(Some(Arc::new(move |_: &Runtime, _: &[Value]| Ok(value.clone()))))
        }
    }

    fn link_guarded(
        &self,
        rt: &Runtime,
        spec: &CallSiteSpec,
        _args: &[Value],
    ) -> Result<Option<GuardedHandle>, SprigError> {
        let (var, is_call) = site_var(rt, spec)?;
        let snapshot = var.snapshot();
        let value = bound_value(&var, snapshot.value)?;
        let switch_point = snapshot.switch_point;
        let handle: Handle = if is_call {
            prepare_call(rt, &value, spec.arg_types.len())?
        } else {
            Arc::new(move |_: &Runtime, _: &[Value]| Ok(value.clone()))
        };
        Ok(Some(GuardedHandle {
            guard: Arc::new(move |_: &[Value]| switch_point.is_valid()),
            handle,
        }))
    }

    fn link_generic(&self, spec: &CallSiteSpec) -> Handle {
        let spec = spec.clone();
        Arc::new(move |rt: &Runtime, args: &[Value]| {
            let (var, is_call) = site_var(rt, &spec)?;
            let value = var.deref_value()?;
            if is_call {
                rt.apply(&value, args)
            } else {
                Ok(value)
            }
        })
    }
}
