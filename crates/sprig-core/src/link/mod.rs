use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ast::Span;
use crate::error::SprigError;
use crate::host::{names, ClassInfo, MethodInfo};
use crate::runtime::Runtime;
use crate::types::Ty;
use crate::value::Value;
use crate::vm::bytecode::Constant;

pub mod callsite;
pub mod interop_linker;
pub mod invoke_linker;
pub mod switch_point;
pub mod var_linker;

pub use callsite::{CallSite, Dispatch, Stage};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SiteKind {
    /// Reads a global binding.
    GlobalValue { ns: String, name: String },
    /// Calls the value of a global binding with every stack argument.
    GlobalCall { ns: String, name: String },
    /// Calls a runtime value; the receiver is argument zero.
    Invoke,
    InstanceMethod { name: String },
    StaticMethod { class: String, name: String },
    InstanceField { name: String },
    /// Constructor overload left open at compile time.
    Constructor { class: String },
}

/// Everything the linker learns about a call site from the compiler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallSiteSpec {
    pub kind: SiteKind,
    pub arg_types: Vec<Ty>,
    pub ret: Ty,
    /// Bit `i` set when argument `i` is statically `Any`.
    pub any_mask: u64,
    /// Receiver known at compile time, for constant-callee specialisation.
    pub constant: Option<Constant>,
    pub span: Option<Span>,
}

impl CallSiteSpec {
    pub fn new(kind: SiteKind, arg_types: Vec<Ty>, ret: Ty) -> Self {
        let any_mask = any_mask(&arg_types);
        Self {
            kind,
            arg_types,
            ret,
            any_mask,
            constant: None,
            span: None,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_constant(mut self, constant: Option<Constant>) -> Self {
        self.constant = constant;
        self
    }

    pub fn is_any(&self, idx: usize) -> bool {
        idx < 64 && self.any_mask & (1 << idx) != 0
    }

    pub fn describe(&self) -> String {
        match &self.kind {
            SiteKind::GlobalValue { ns, name } => format!("{}/{}", ns, name),
            SiteKind::GlobalCall { ns, name } => format!("({}/{} ...)", ns, name),
            SiteKind::Invoke => "(<fn> ...)".to_string(),
            SiteKind::InstanceMethod { name } => format!(".{}", name),
            SiteKind::StaticMethod { class, name } => format!("{}/{}", class, name),
            SiteKind::InstanceField { name } => format!(".-{}", name),
            SiteKind::Constructor { class } => format!("new {}", class),
        }
    }
}

pub fn any_mask(types: &[Ty]) -> u64 {
    types
        .iter()
        .take(64)
        .enumerate()
        .filter(|(_, t)| **t == Ty::Any)
        .fold(0u64, |mask, (i, _)| mask | (1 << i))
}

pub type Handle = Arc<dyn Fn(&Runtime, &[Value]) -> Result<Value, SprigError> + Send + Sync>;
pub type Guard = Arc<dyn Fn(&[Value]) -> bool + Send + Sync>;

/// Cache key for megamorphic tables: the runtime classes an entry was
/// specialised for.
pub type ShapeKey = Vec<String>;

#[derive(Clone)]
pub struct GuardedHandle {
    pub guard: Guard,
    pub handle: Handle,
}

/// Produces targets for one kind of call site. Every stage but the generic
/// one may decline by returning `None`; the site then moves on.
pub trait Linker: Send + Sync {
    fn name(&self) -> &'static str;

    /// Unguarded target, only when the callee can never change.
    fn link_static(&self, _rt: &Runtime, _spec: &CallSiteSpec) -> Result<Option<Handle>, SprigError> {
        Ok(None)
    }

    fn link_guarded(
        &self,
        rt: &Runtime,
        spec: &CallSiteSpec,
        args: &[Value],
    ) -> Result<Option<GuardedHandle>, SprigError>;

    /// `None` when this linker cannot key targets by argument shape.
    fn shape_key(&self, _spec: &CallSiteSpec, _args: &[Value]) -> Option<ShapeKey> {
        None
    }

    fn link_generic(&self, spec: &CallSiteSpec) -> Handle;
}

pub fn linker_for(kind: &SiteKind) -> Arc<dyn Linker> {
    match kind {
        SiteKind::GlobalValue { .. } | SiteKind::GlobalCall { .. } => Arc::new(var_linker::VarLinker),
        SiteKind::Invoke => Arc::new(invoke_linker::InvokeLinker),
        SiteKind::InstanceMethod { .. }
        | SiteKind::StaticMethod { .. }
        | SiteKind::InstanceField { .. }
        | SiteKind::Constructor { .. } => Arc::new(interop_linker::InteropLinker),
    }
}

/// Resolves how a callable value will be invoked with `argc` arguments, so
/// the lookup happens once at link time.
pub fn prepare_call(rt: &Runtime, callee: &Value, argc: usize) -> Result<Handle, SprigError> {
    match callee {
        Value::Native(native) => {
            if !native.arity.accepts(argc) {
                return Err(SprigError::arity(format!(
                    "wrong number of args ({}) passed to {}",
                    argc, native.name
                )));
            }
            let native = native.clone();
            Ok(Arc::new(move |rt: &Runtime, args: &[Value]| native.call(rt, args)))
        }
        Value::Object(inst) if rt.classes.is_subclass(&inst.class.name, names::FN) => {
            let class = inst.class.clone();
            let method = select_invoke(&class, argc)?;
            let receiver = callee.clone();
            Ok(Arc::new(move |rt: &Runtime, args: &[Value]| {
                let args = pack_rest(&method, args.to_vec());
                rt.invoke_method(&class, &method, Some(&receiver), args)
            }))
        }
        other => {
            let callee = other.clone();
            Ok(Arc::new(move |rt: &Runtime, args: &[Value]| rt.apply(&callee, args)))
        }
    }
}

/// Picks the `invoke` method of a function class for `argc` arguments,
/// preferring a fixed arity over the variadic one.
pub fn select_invoke(class: &Arc<ClassInfo>, argc: usize) -> Result<Arc<MethodInfo>, SprigError> {
    let invokes = || class.methods.iter().filter(|m| m.name == names::INVOKE && !m.is_abstract());
    if let Some(m) = invokes().find(|m| !m.is_varargs && m.params.len() == argc) {
        return Ok(m.clone());
    }
    if let Some(m) = invokes().find(|m| m.is_varargs && argc + 1 >= m.params.len()) {
        return Ok(m.clone());
    }
    Err(SprigError::arity(format!(
        "wrong number of args ({}) passed to {}",
        argc, class.name
    )))
}

/// Collects the arguments past the fixed parameters of a variadic function
/// into a list.
pub fn pack_rest(method: &MethodInfo, mut args: Vec<Value>) -> Vec<Value> {
    if !method.is_varargs {
        return args;
    }
    let fixed = method.params.len().saturating_sub(1);
    let rest = args.split_off(fixed.min(args.len()));
    args.push(if rest.is_empty() { Value::Nil } else { Value::list(rest) });
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_mask_marks_unknown_arguments() {
        let mask = any_mask(&[Ty::Any, Ty::string(), Ty::Any]);
        assert_eq!(mask, 0b101);
        let spec = CallSiteSpec::new(SiteKind::Invoke, vec![Ty::Any, Ty::string()], Ty::Any);
        assert!(spec.is_any(0));
        assert!(!spec.is_any(1));
    }
}
