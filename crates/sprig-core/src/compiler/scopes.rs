use std::sync::Arc;

use crate::error::SprigError;
use crate::host::{ClassInfo, FieldInfo};
use crate::namespaces::{Namespace, Var};
use crate::runtime::Runtime;
use crate::symbols::{looks_dotted, split_qualified};
use crate::types::Ty;
use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VarScope {
    MethodParam,
    MethodLet,
    Field,
    /// Bound by an enclosing method; reaching it means capturing it.
    Closure,
    /// Interpreted-mode local holding its value directly.
    NamespaceLet,
    Namespace,
    JavaClassLiteral,
    Literal,
}

/// Where a lexical binding lives at run time.
#[derive(Clone, Debug, PartialEq)]
pub enum Slot {
    Local(u16),
    /// The receiver of the current method.
    This,
    /// Instance field of the class being built.
    Field(String),
    None,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Binding {
    pub name: String,
    pub ty: Ty,
    pub slot: Slot,
    pub value: Option<Value>,
    pub mutable: bool,
}

impl Binding {
    pub fn local(name: &str, ty: Ty, slot: u16) -> Self {
        Self {
            name: name.to_string(),
            ty,
            slot: Slot::Local(slot),
            value: None,
            mutable: false,
        }
    }

    pub fn valued(name: &str, value: Value) -> Self {
        Self {
            name: name.to_string(),
            ty: Ty::Any,
            slot: Slot::None,
            value: Some(value),
            mutable: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub kind: VarScope,
    /// Number of open method contexts when the frame was pushed.
    pub level: usize,
    pub bindings: Vec<Binding>,
}

impl Frame {
    fn find(&self, name: &str) -> Option<&Binding> {
        self.bindings.iter().rev().find(|b| b.name == name)
    }
}

#[derive(Clone)]
pub enum Resolution {
    Local { scope: VarScope, binding: Binding },
    Var(Arc<Var>),
    Namespace(Arc<Namespace>),
    Class(Arc<ClassInfo>),
    StaticField { class: Arc<ClassInfo>, field: FieldInfo },
}

impl Resolution {
    pub fn scope(&self) -> VarScope {
        match self {
            Resolution::Local { scope, .. } => *scope,
            Resolution::Var(_) => VarScope::Namespace,
            Resolution::Namespace(_) => VarScope::Literal,
            Resolution::Class(_) | Resolution::StaticField { .. } => VarScope::JavaClassLiteral,
        }
    }
}

enum Qualifier {
    Namespace(Arc<Namespace>),
    Class(Arc<ClassInfo>),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Scopes {
    frames: Vec<Frame>,
}

impl Scopes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: VarScope, level: usize) -> usize {
        self.frames.push(Frame {
            kind,
            level,
            bindings: Vec::new(),
        });
        self.frames.len()
    }

    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    pub fn truncate(&mut self, depth: usize) -> Vec<Frame> {
        if depth >= self.frames.len() {
            return Vec::new();
        }
        self.frames.split_off(depth)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn bind(&mut self, binding: Binding) -> Result<(), SprigError> {
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| SprigError::internal("binding without an open scope"))?;
        frame.bindings.push(binding);
        Ok(())
    }

    pub fn top(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// Replaces the values of the top frame's bindings, in declaration order.
    pub fn rebind_top(&mut self, values: Vec<Value>) -> Result<(), SprigError> {
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| SprigError::internal("rebinding without an open scope"))?;
        if frame.bindings.len() != values.len() {
            return Err(SprigError::internal("loop rebinding arity mismatch"));
        }
        for (binding, value) in frame.bindings.iter_mut().zip(values) {
            binding.value = Some(value);
        }
        Ok(())
    }

    /// Names visible through the lexical chain, innermost binding first.
    pub fn visible_names(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for frame in self.frames.iter().rev() {
            for binding in frame.bindings.iter().rev() {
                if !out.contains(&binding.name) {
                    out.push(binding.name.clone());
                }
            }
        }
        out
    }

    fn lexical(&self, name: &str, level: usize) -> Option<Resolution> {
        self.frames.iter().rev().find_map(|frame| {
            frame.find(name).map(|binding| Resolution::Local {
                scope: if frame.level < level { VarScope::Closure } else { frame.kind },
                binding: binding.clone(),
            })
        })
    }

    fn qualifier(&self, rt: &Runtime, name: &str, level: usize) -> Result<Qualifier, SprigError> {
        let ns = rt.current_ns();
        if let Some(target) = ns.resolve_alias(name) {
            if let Some(found) = rt.namespaces.get(&target) {
                return Ok(Qualifier::Namespace(found));
            }
        }
        if let Some(found) = rt.namespaces.get(name) {
            return Ok(Qualifier::Namespace(found));
        }
        if let Some(class) = rt.resolve_class(name) {
            return Ok(Qualifier::Class(class));
        }
        let held = match self.lookup(rt, name, level)? {
            Some(Resolution::Local { binding, .. }) => binding.value,
            Some(Resolution::Var(var)) => var.snapshot().value,
            _ => None,
        };
        match held {
            Some(Value::Namespace(found)) => Ok(Qualifier::Namespace(found)),
            Some(Value::Class(class)) => Ok(Qualifier::Class(class)),
            _ => Err(SprigError::compile(format!("No such namespace: {}", name))),
        }
    }

    /// Resolves `name` as seen from a method nested `level` deep. `Ok(None)`
    /// means unbound; a qualifier that names nothing is a hard error.
    pub fn lookup(&self, rt: &Runtime, name: &str, level: usize) -> Result<Option<Resolution>, SprigError> {
        if let (Some(qualifier), simple) = split_qualified(name) {
            return Ok(match self.qualifier(rt, qualifier, level)? {
                Qualifier::Namespace(ns) => ns
                    .resolve(simple)
                    .filter(|var| var.ns == ns.name)
                    .map(Resolution::Var),
                Qualifier::Class(class) => rt
                    .classes
                    .find_field(&class.name, simple)
                    .filter(|(_, field)| field.is_static)
                    .map(|(owner, field)| Resolution::StaticField { class: owner, field }),
            });
        }
        if let Some(found) = self.lexical(name, level) {
            return Ok(Some(found));
        }
        let ns = rt.current_ns();
        if let Some(var) = ns.resolve(name) {
            return Ok(Some(Resolution::Var(var)));
        }
        if let Some(full) = ns.resolve_import(name) {
            if let Some(class) = rt.classes.get(&full) {
                return Ok(Some(Resolution::Class(class)));
            }
        }
        if looks_dotted(name) {
            if let Some(found) = rt.namespaces.get(name) {
                return Ok(Some(Resolution::Namespace(found)));
            }
            if let Some(class) = rt.classes.get(name) {
                return Ok(Some(Resolution::Class(class)));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::names;
    use crate::symbols::CORE_NS;

    #[test]
    fn inner_frames_shadow_outer_ones() -> Result<(), SprigError> {
        let rt = Runtime::new();
        let mut scopes = Scopes::new();
        scopes.push(VarScope::MethodLet, 1);
        scopes.bind(Binding::local("x", Ty::Any, 1))?;
        scopes.push(VarScope::MethodLet, 1);
        scopes.bind(Binding::local("x", Ty::string(), 2))?;
        match scopes.lookup(&rt, "x", 1)? {
            Some(Resolution::Local { scope, binding }) => {
                assert_eq!(scope, VarScope::MethodLet);
                assert_eq!(binding.slot, Slot::Local(2));
            }
            other => panic!("unexpected {:?}", other.map(|r| r.scope())),
        }
        Ok(())
    }

    #[test]
    fn crossing_a_method_boundary_is_a_closure() -> Result<(), SprigError> {
        let rt = Runtime::new();
        let mut scopes = Scopes::new();
        scopes.push(VarScope::MethodParam, 1);
        scopes.bind(Binding::local("n", Ty::Any, 0))?;
        scopes.push(VarScope::MethodParam, 2);
        let found = scopes.lookup(&rt, "n", 2)?.map(|r| r.scope());
        assert_eq!(found, Some(VarScope::Closure));
        Ok(())
    }

    #[test]
    fn falls_back_to_globals_and_literals() -> Result<(), SprigError> {
        let rt = Runtime::new();
        let scopes = Scopes::new();
        assert_eq!(scopes.lookup(&rt, "+", 0)?.map(|r| r.scope()), Some(VarScope::Namespace));
        assert_eq!(scopes.lookup(&rt, "String", 0)?.map(|r| r.scope()), Some(VarScope::JavaClassLiteral));
        assert_eq!(scopes.lookup(&rt, CORE_NS, 0)?.map(|r| r.scope()), Some(VarScope::Literal));
        assert_eq!(scopes.lookup(&rt, names::MATH, 0)?.map(|r| r.scope()), Some(VarScope::JavaClassLiteral));
        assert!(scopes.lookup(&rt, "no-such-thing", 0)?.is_none());
        Ok(())
    }

    #[test]
    fn qualified_names() -> Result<(), SprigError> {
        let rt = Runtime::new();
        let scopes = Scopes::new();
        assert!(matches!(scopes.lookup(&rt, "sprig.core/inc", 0)?, Some(Resolution::Var(_))));
        assert!(matches!(
            scopes.lookup(&rt, "Math/PI", 0)?,
            Some(Resolution::StaticField { .. })
        ));
        assert!(scopes.lookup(&rt, "sprig.core/missing", 0)?.is_none());
        assert!(matches!(scopes.lookup(&rt, "nowhere/x", 0), Err(SprigError::Compile(_))));
        Ok(())
    }
}
