use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SprigError;
use crate::link::switch_point::SwitchPoint;
use crate::value::Value;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarFlags {
    pub is_final: bool,
    pub is_macro: bool,
    pub is_dynamic: bool,
    pub is_private: bool,
}

impl VarFlags {
    pub fn from_meta(flags: &[String]) -> Self {
        let has = |name: &str| flags.iter().any(|f| f == name);
        Self {
            is_final: has("final") || has("const"),
            is_macro: has("macro"),
            is_dynamic: has("dynamic"),
            is_private: has("private"),
        }
    }
}

struct VarState {
    root: Option<Value>,
    flags: VarFlags,
    switch_point: Arc<SwitchPoint>,
}

/// A namespace-level binding. Every rebinding publishes the new root and then
/// invalidates the switch point call sites were guarded by.
pub struct Var {
    pub ns: String,
    pub name: String,
    state: RwLock<VarState>,
}

pub struct VarSnapshot {
    pub value: Option<Value>,
    pub flags: VarFlags,
    pub switch_point: Arc<SwitchPoint>,
}

impl Var {
    pub fn new(ns: &str, name: &str) -> Self {
        Self {
            ns: ns.to_string(),
            name: name.to_string(),
            state: RwLock::new(VarState {
                root: None,
                flags: VarFlags::default(),
                switch_point: Arc::new(SwitchPoint::new()),
            }),
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.ns, self.name)
    }

    pub fn bind_root(&self, value: Value) {
        self.rebind(Some(value), None);
    }

    pub fn define(&self, value: Option<Value>, flags: VarFlags) {
        self.rebind(value, Some(flags));
    }

    fn rebind(&self, value: Option<Value>, flags: Option<VarFlags>) {
        let stale = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if value.is_some() {
                state.root = value;
            }
            if let Some(flags) = flags {
                state.flags = flags;
            }
            std::mem::replace(&mut state.switch_point, Arc::new(SwitchPoint::new()))
        };
        stale.invalidate();
        debug!(var = %self.qualified_name(), "var rebound");
    }

    pub fn snapshot(&self) -> VarSnapshot {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        VarSnapshot {
            value: state.root.clone(),
            flags: state.flags,
            switch_point: state.switch_point.clone(),
        }
    }

    pub fn flags(&self) -> VarFlags {
        self.state.read().unwrap_or_else(PoisonError::into_inner).flags
    }

    pub fn is_bound(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .root
            .is_some()
    }

    pub fn deref_value(&self) -> Result<Value, SprigError> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .root
            .clone()
            .ok_or_else(|| SprigError::runtime(format!("var {} is unbound", self.qualified_name())))
    }
}

impl fmt::Debug for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#'{}", self.qualified_name())
    }
}

pub struct Namespace {
    pub name: String,
    mappings: RwLock<HashMap<String, Arc<Var>>>,
    imports: RwLock<HashMap<String, String>>,
    aliases: RwLock<HashMap<String, String>>,
}

impl Namespace {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            mappings: RwLock::new(HashMap::new()),
            imports: RwLock::new(HashMap::new()),
            aliases: RwLock::new(HashMap::new()),
        }
    }

    /// Returns this namespace's own var for `name`, replacing a referred one.
    pub fn intern(&self, name: &str) -> Arc<Var> {
        let mut mappings = self.mappings.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(var) = mappings.get(name) {
            if var.ns == self.name {
                return var.clone();
            }
        }
        let var = Arc::new(Var::new(&self.name, name));
        mappings.insert(name.to_string(), var.clone());
        var
    }

    pub fn refer(&self, var: Arc<Var>) {
        self.mappings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(var.name.clone())
            .or_insert(var);
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<Var>> {
        self.mappings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn own_vars(&self) -> Vec<Arc<Var>> {
        let mappings = self.mappings.read().unwrap_or_else(PoisonError::into_inner);
        let mut vars: Vec<Arc<Var>> = mappings
            .values()
            .filter(|v| v.ns == self.name)
            .cloned()
            .collect();
        vars.sort_by(|a, b| a.name.cmp(&b.name));
        vars
    }

    pub fn import(&self, simple: &str, full: &str) {
        self.imports
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(simple.to_string(), full.to_string());
    }

    pub fn resolve_import(&self, simple: &str) -> Option<String> {
        self.imports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(simple)
            .cloned()
    }

    pub fn add_alias(&self, alias: &str, target: &str) {
        self.aliases
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(alias.to_string(), target.to_string());
    }

    pub fn resolve_alias(&self, alias: &str) -> Option<String> {
        self.aliases
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(alias)
            .cloned()
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#<Namespace {}>", self.name)
    }
}

#[derive(Default)]
pub struct NamespaceStore {
    namespaces: RwLock<HashMap<String, Arc<Namespace>>>,
}

impl NamespaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Namespace>> {
        self.namespaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Returns the namespace, creating it if needed. The flag reports creation.
    pub fn ensure(&self, name: &str) -> (Arc<Namespace>, bool) {
        let mut namespaces = self.namespaces.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(ns) = namespaces.get(name) {
            return (ns.clone(), false);
        }
        let ns = Arc::new(Namespace::new(name));
        namespaces.insert(name.to_string(), ns.clone());
        (ns, true)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .namespaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebinding_invalidates_previous_switch_point() {
        let var = Var::new("user", "x");
        var.bind_root(Value::Int(1));
        let first = var.snapshot();
        assert!(first.switch_point.is_valid());
        var.bind_root(Value::Int(2));
        assert!(!first.switch_point.is_valid());
        let second = var.snapshot();
        assert!(second.switch_point.is_valid());
        assert_eq!(second.value, Some(Value::Int(2)));
    }

    #[test]
    fn intern_shadows_referred_vars() {
        let core = Namespace::new("sprig.core");
        let user = Namespace::new("user");
        let core_inc = core.intern("inc");
        user.refer(core_inc.clone());
        assert!(Arc::ptr_eq(&user.resolve("inc").expect("referred"), &core_inc));
        let own = user.intern("inc");
        assert_eq!(own.ns, "user");
        assert!(!Arc::ptr_eq(&own, &core_inc));
    }

    #[test]
    fn meta_flags() {
        let flags = VarFlags::from_meta(&["final".to_string(), "private".to_string()]);
        assert!(flags.is_final && flags.is_private && !flags.is_macro);
    }
}
