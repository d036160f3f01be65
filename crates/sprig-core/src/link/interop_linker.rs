use std::sync::Arc;

use tracing::debug;

use super::{CallSiteSpec, GuardedHandle, Handle, Linker, ShapeKey, SiteKind};
use crate::error::SprigError;
use crate::host::overload::{prepare_args, resolve_dynamic, resolve_static, Candidate, StaticResolution};
use crate::host::{ClassInfo, MethodInfo};
use crate::runtime::Runtime;
use crate::value::Value;

/// Links host interop: instance and static method calls and instance field
/// reads. Overloads are resolved against the runtime argument classes and
/// the chosen method is guarded on exactly the classes that decided it.
pub struct InteropLinker;

fn receiver_class(receiver: &Value, spec: &CallSiteSpec) -> Result<String, SprigError> {
    receiver
        .class_name()
        .map(str::to_string)
        .ok_or_else(|| SprigError::runtime(format!("cannot call {} on nil", spec.describe())))
}

fn split(args: &[Value]) -> Result<(&Value, &[Value]), SprigError> {
    args.split_first()
        .ok_or_else(|| SprigError::internal("instance site without a receiver"))
}

fn class_of(value: &Value) -> Option<String> {
    value.class_name().map(str::to_string)
}

/// Guard accepting argument lists whose classes at the contended positions
/// (offset by `skip` leading values) match the ones seen at link time.
fn shape_guard(receiver: Option<String>, contended: Vec<bool>, seen: &[Value], skip: usize) -> super::Guard {
    let expected: Vec<(usize, Option<String>)> = contended
        .iter()
        .enumerate()
        .filter(|(_, c)| **c)
        .map(|(i, _)| (i + skip, seen.get(i + skip).and_then(class_of)))
        .collect();
    Arc::new(move |args: &[Value]| {
        if let Some(class) = &receiver {
            if args.first().and_then(Value::class_name) != Some(class.as_str()) {
                return false;
            }
        }
        expected
            .iter()
            .all(|(i, class)| args.get(*i).and_then(Value::class_name) == class.as_deref())
    })
}

fn invoke_handle(class: Arc<ClassInfo>, method: Arc<MethodInfo>, has_receiver: bool) -> Handle {
    Arc::new(move |rt: &Runtime, args: &[Value]| {
        let (this, rest) = if has_receiver {
            let (this, rest) = split(args)?;
            (Some(this), rest)
        } else {
            (None, args)
        };
        let args = prepare_args(&method, rest.to_vec(), &rt.classes);
        rt.invoke_method(&class, &method, this, args)
    })
}

fn resolve_instance(rt: &Runtime, spec: &CallSiteSpec, name: &str, args: &[Value]) -> Result<(Candidate, Vec<bool>), SprigError> {
    let (receiver, rest) = split(args)?;
    let class = receiver_class(receiver, spec)?;
    let candidates = rt.classes.find_methods(&class, name, false);
    if candidates.is_empty() {
        return Err(SprigError::linkage(format!("no method {} on {}", name, class)));
    }
    let res = resolve_dynamic(&candidates, rest, &rt.classes, &format!("{}.{}", class, name))?;
    Ok((res.candidate, res.contended))
}

fn resolve_static_call(rt: &Runtime, class: &str, name: &str, args: &[Value]) -> Result<(Candidate, Vec<bool>), SprigError> {
    let candidates = rt.classes.find_methods(class, name, true);
    if candidates.is_empty() {
        return Err(SprigError::linkage(format!("no static method {}/{}", class, name)));
    }
    let res = resolve_dynamic(&candidates, args, &rt.classes, &format!("{}/{}", class, name))?;
    Ok((res.candidate, res.contended))
}

fn resolve_constructor(rt: &Runtime, class: &str, args: &[Value]) -> Result<(Arc<ClassInfo>, Candidate, Vec<bool>), SprigError> {
    let info = rt
        .classes
        .get(class)
        .ok_or_else(|| SprigError::linkage(format!("class {} not found", class)))?;
    let candidates: Vec<Candidate> = info
        .constructors
        .iter()
        .map(|c| (info.clone(), c.clone()))
        .collect();
    if candidates.is_empty() {
        return Err(SprigError::linkage(format!("no constructor for {}", class)));
    }
    let res = resolve_dynamic(&candidates, args, &rt.classes, &format!("new {}", class))?;
    Ok((info, res.candidate, res.contended))
}

fn construct_handle(method: Arc<MethodInfo>) -> Handle {
    Arc::new(move |rt: &Runtime, args: &[Value]| {
        let args = prepare_args(&method, args.to_vec(), &rt.classes);
        rt.new_instance(&method.owner, &method.params, args)
    })
}

fn read_field(receiver: &Value, name: &str) -> Result<Value, SprigError> {
    match receiver {
        Value::Object(inst) => inst.get_field(name),
        Value::Nil => Err(SprigError::runtime(format!("cannot read field {} of nil", name))),
        other => Err(SprigError::linkage(format!(
            "no field {} on {}",
            name,
            other.class_name().unwrap_or("nil")
        ))),
    }
}

impl Linker for InteropLinker {
    fn name(&self) -> &'static str {
        "interop"
    }

    /// Static methods whose overload is already decided by the compile-time
    /// argument types need no guard at all.
    fn link_static(&self, rt: &Runtime, spec: &CallSiteSpec) -> Result<Option<Handle>, SprigError> {
        let SiteKind::StaticMethod { class, name } = &spec.kind else {
            return Ok(None);
        };
        let candidates = rt.classes.find_methods(class, name, true);
        match resolve_static(&candidates, &spec.arg_types, &rt.classes) {
            StaticResolution::Unique((owner, method)) => {
                debug!(method = %method.signature(), "static link");
                Ok(Some(invoke_handle(owner, method, false)))
            }
            StaticResolution::Ambiguous(_) | StaticResolution::NoMatch => Ok(None),
        }
    }

    fn link_guarded(
        &self,
        rt: &Runtime,
        spec: &CallSiteSpec,
        args: &[Value],
    ) -> Result<Option<GuardedHandle>, SprigError> {
        match &spec.kind {
            SiteKind::InstanceMethod { name } => {
                let ((owner, method), contended) = resolve_instance(rt, spec, name, args)?;
                let receiver = args.first().and_then(class_of);
                Ok(Some(GuardedHandle {
                    guard: shape_guard(receiver, contended, args, 1),
                    handle: invoke_handle(owner, method, true),
                }))
            }
            SiteKind::StaticMethod { class, name } => {
                let ((owner, method), contended) = resolve_static_call(rt, class, name, args)?;
                Ok(Some(GuardedHandle {
                    guard: shape_guard(None, contended, args, 0),
                    handle: invoke_handle(owner, method, false),
                }))
            }
            SiteKind::InstanceField { name } => {
                let (receiver, _) = split(args)?;
                let class = receiver_class(receiver, spec)?;
                match rt.classes.find_field(&class, name) {
                    Some((_, field)) if !field.is_static => {}
                    _ => return Err(SprigError::linkage(format!("no field {} on {}", name, class))),
                }
                let name = name.clone();
                Ok(Some(GuardedHandle {
                    guard: shape_guard(Some(class), Vec::new(), args, 1),
                    handle: Arc::new(move |_: &Runtime, args: &[Value]| {
                        let (receiver, _) = split(args)?;
                        read_field(receiver, &name)
                    }),
                }))
            }
            SiteKind::Constructor { class } => {
                let (_, (_, ctor), contended) = resolve_constructor(rt, class, args)?;
                Ok(Some(GuardedHandle {
                    guard: shape_guard(None, contended, args, 0),
                    handle: construct_handle(ctor),
                }))
            }
            other => Err(SprigError::internal(format!("interop linker given {:?}", other))),
        }
    }

    fn shape_key(&self, spec: &CallSiteSpec, args: &[Value]) -> Option<ShapeKey> {
        let classes = args.iter().map(|a| a.class_name().unwrap_or("nil").to_string());
        match &spec.kind {
            SiteKind::InstanceField { .. } => Some(classes.take(1).collect()),
            _ => Some(classes.collect()),
        }
    }

    fn link_generic(&self, spec: &CallSiteSpec) -> Handle {
        let spec = spec.clone();
        Arc::new(move |rt: &Runtime, args: &[Value]| match &spec.kind {
            SiteKind::InstanceMethod { name } => {
                let ((owner, method), _) = resolve_instance(rt, &spec, name, args)?;
                invoke_handle(owner, method, true)(rt, args)
            }
            SiteKind::StaticMethod { class, name } => {
                let ((owner, method), _) = resolve_static_call(rt, class, name, args)?;
                invoke_handle(owner, method, false)(rt, args)
            }
            SiteKind::InstanceField { name } => {
                let (receiver, _) = split(args)?;
                read_field(receiver, name)
            }
            SiteKind::Constructor { class } => {
                let (_, (_, ctor), _) = resolve_constructor(rt, class, args)?;
                construct_handle(ctor)(rt, args)
            }
            other => Err(SprigError::internal(format!("interop linker given {:?}", other))),
        })
    }
}
