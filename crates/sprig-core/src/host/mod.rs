use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::emit::class_file::ClassFile;
use crate::error::SprigError;
use crate::link::callsite::CallSite;
use crate::runtime::Runtime;
use crate::types::Ty;
use crate::value::Value;

pub mod builtin;
pub mod names;
pub mod overload;

pub type HostMethod =
    Arc<dyn Fn(&Runtime, Option<&Value>, &[Value]) -> Result<Value, SprigError> + Send + Sync>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassFlags {
    pub is_final: bool,
    pub is_interface: bool,
    pub is_abstract: bool,
}

#[derive(Clone, Debug)]
pub struct FieldInfo {
    pub name: String,
    pub ty: Ty,
    pub is_static: bool,
    pub mutable: bool,
    pub constant: Option<Value>,
}

#[derive(Clone)]
pub enum MethodBody {
    Native(HostMethod),
    /// Index into the owning class file's method table.
    Code(usize),
    Abstract,
}

#[derive(Clone)]
pub struct MethodInfo {
    pub owner: String,
    pub name: String,
    pub params: Vec<Ty>,
    pub ret: Ty,
    pub is_static: bool,
    pub is_varargs: bool,
    pub body: MethodBody,
}

impl MethodInfo {
    pub fn is_abstract(&self) -> bool {
        matches!(self.body, MethodBody::Abstract)
    }

    pub fn accepts_arity(&self, n: usize) -> bool {
        if self.is_varargs {
            n + 1 >= self.params.len()
        } else {
            n == self.params.len()
        }
    }

    pub fn signature(&self) -> String {
        let params: Vec<String> = self.params.iter().map(|p| p.to_string()).collect();
        format!(
            "{}.{}({}{})",
            self.owner,
            self.name,
            params.join(", "),
            if self.is_varargs { "..." } else { "" }
        )
    }
}

impl fmt::Debug for MethodInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.signature(), self.ret)
    }
}

pub struct LoadedCode {
    pub file: ClassFile,
    pub call_sites: Vec<Arc<CallSite>>,
}

pub enum ClassOrigin {
    Host,
    Loaded(LoadedCode),
}

pub struct ClassInfo {
    pub name: String,
    pub superclass: Option<String>,
    pub interfaces: Vec<String>,
    pub flags: ClassFlags,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<Arc<MethodInfo>>,
    pub constructors: Vec<Arc<MethodInfo>>,
    /// Instance field names, inherited fields first.
    pub layout: Vec<String>,
    pub origin: ClassOrigin,
}

impl ClassInfo {
    pub fn field_slot(&self, name: &str) -> Option<usize> {
        self.layout.iter().rposition(|f| f == name)
    }

    pub fn loaded(&self) -> Option<&LoadedCode> {
        match &self.origin {
            ClassOrigin::Loaded(code) => Some(code),
            ClassOrigin::Host => None,
        }
    }

    pub fn declared_field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }
}

impl fmt::Debug for ClassInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassInfo")
            .field("name", &self.name)
            .field("superclass", &self.superclass)
            .field("interfaces", &self.interfaces)
            .field("methods", &self.methods)
            .finish()
    }
}

#[derive(Default)]
pub struct ClassRegistry {
    classes: RwLock<HashMap<String, Arc<ClassInfo>>>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let registry = Self::new();
        builtin::install(&registry);
        registry
    }

    pub fn get(&self, name: &str) -> Option<Arc<ClassInfo>> {
        self.classes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Registers a class, computing its instance layout from the superclass.
    /// A later registration under the same name replaces the earlier one;
    /// existing instances keep their original descriptor.
    pub fn register(&self, mut info: ClassInfo) -> Result<Arc<ClassInfo>, SprigError> {
        let mut layout = match &info.superclass {
            Some(sup) => self
                .get(sup)
                .ok_or_else(|| SprigError::linkage(format!("unknown superclass {} of {}", sup, info.name)))?
                .layout
                .clone(),
            None => Vec::new(),
        };
        for iface in &info.interfaces {
            if !self.contains(iface) {
                return Err(SprigError::linkage(format!(
                    "unknown interface {} of {}",
                    iface, info.name
                )));
            }
        }
        layout.extend(
            info.fields
                .iter()
                .filter(|f| !f.is_static)
                .map(|f| f.name.clone()),
        );
        info.layout = layout;
        let info = Arc::new(info);
        debug!(class = %info.name, fields = info.layout.len(), "registered class");
        self.classes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(info.name.clone(), info.clone());
        Ok(info)
    }

    /// Puts back the class a failed definition displaced, or forgets the
    /// name when there was none.
    pub fn reinstate(&self, name: &str, previous: Option<Arc<ClassInfo>>) {
        let mut classes = self.classes.write().unwrap_or_else(PoisonError::into_inner);
        match previous {
            Some(class) => {
                classes.insert(name.to_string(), class);
            }
            None => {
                classes.remove(name);
            }
        }
    }

    /// Reflexive subtype test over superclasses and interfaces. Every class is
    /// a subclass of `lang.Object`.
    pub fn is_subclass(&self, sub: &str, sup: &str) -> bool {
        if sub == sup {
            return true;
        }
        if sup == names::OBJECT {
            return true;
        }
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([sub.to_string()]);
        while let Some(name) = queue.pop_front() {
            if !seen.insert(name.clone()) {
                continue;
            }
            let Some(info) = self.get(&name) else {
                continue;
            };
            for parent in info.superclass.iter().chain(info.interfaces.iter()) {
                if parent == sup {
                    return true;
                }
                queue.push_back(parent.clone());
            }
        }
        false
    }

    pub fn instance_of(&self, value: &Value, class: &str) -> bool {
        match value.class_name() {
            Some(name) => self.is_subclass(name, class),
            None => false,
        }
    }

    /// Methods named `name` visible on `class`, most-derived first. Overridden
    /// signatures appear once.
    pub fn find_methods(
        &self,
        class: &str,
        name: &str,
        want_static: bool,
    ) -> Vec<(Arc<ClassInfo>, Arc<MethodInfo>)> {
        let mut found: Vec<(Arc<ClassInfo>, Arc<MethodInfo>)> = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([class.to_string()]);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current.clone()) {
                continue;
            }
            let Some(info) = self.get(&current) else {
                continue;
            };
            for method in info.methods.iter().filter(|m| m.name == name && m.is_static == want_static) {
                let overridden = found
                    .iter()
                    .any(|(_, m)| m.params == method.params && m.is_varargs == method.is_varargs);
                if !overridden {
                    found.push((info.clone(), method.clone()));
                }
            }
            if want_static {
                continue;
            }
            if let Some(sup) = &info.superclass {
                queue.push_back(sup.clone());
            }
            queue.extend(info.interfaces.iter().cloned());
        }
        found
    }

    pub fn find_field(&self, class: &str, name: &str) -> Option<(Arc<ClassInfo>, FieldInfo)> {
        let mut current = Some(class.to_string());
        while let Some(class_name) = current {
            let info = self.get(&class_name)?;
            if let Some(field) = info.declared_field(name) {
                return Some((info.clone(), field.clone()));
            }
            current = info.superclass.clone();
        }
        None
    }

    pub fn class_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .classes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

/// Fluent construction of host class descriptors.
pub struct HostClassBuilder {
    info: ClassInfo,
}

impl HostClassBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            info: ClassInfo {
                name: name.to_string(),
                superclass: if name == names::OBJECT {
                    None
                } else {
                    Some(names::OBJECT.to_string())
                },
                interfaces: Vec::new(),
                flags: ClassFlags::default(),
                fields: Vec::new(),
                methods: Vec::new(),
                constructors: Vec::new(),
                layout: Vec::new(),
                origin: ClassOrigin::Host,
            },
        }
    }

    pub fn extends(mut self, superclass: &str) -> Self {
        self.info.superclass = Some(superclass.to_string());
        self
    }

    pub fn implements(mut self, iface: &str) -> Self {
        self.info.interfaces.push(iface.to_string());
        self
    }

    pub fn final_class(mut self) -> Self {
        self.info.flags.is_final = true;
        self
    }

    pub fn interface(mut self) -> Self {
        self.info.flags.is_interface = true;
        self.info.flags.is_abstract = true;
        self
    }

    pub fn abstract_class(mut self) -> Self {
        self.info.flags.is_abstract = true;
        self
    }

    pub fn field(mut self, name: &str, ty: Ty) -> Self {
        self.info.fields.push(FieldInfo {
            name: name.to_string(),
            ty,
            is_static: false,
            mutable: true,
            constant: None,
        });
        self
    }

    pub fn constant(mut self, name: &str, ty: Ty, value: Value) -> Self {
        self.info.fields.push(FieldInfo {
            name: name.to_string(),
            ty,
            is_static: true,
            mutable: false,
            constant: Some(value),
        });
        self
    }

    fn push_method(mut self, name: &str, params: Vec<Ty>, ret: Ty, is_static: bool, is_varargs: bool, body: MethodBody) -> Self {
        let method = Arc::new(MethodInfo {
            owner: self.info.name.clone(),
            name: name.to_string(),
            params,
            ret,
            is_static,
            is_varargs,
            body,
        });
        if name == names::INIT {
            self.info.constructors.push(method);
        } else {
            self.info.methods.push(method);
        }
        self
    }

    pub fn method(
        self,
        name: &str,
        params: Vec<Ty>,
        ret: Ty,
        f: impl Fn(&Runtime, Option<&Value>, &[Value]) -> Result<Value, SprigError> + Send + Sync + 'static,
    ) -> Self {
        self.push_method(name, params, ret, false, false, MethodBody::Native(Arc::new(f)))
    }

    pub fn static_method(
        self,
        name: &str,
        params: Vec<Ty>,
        ret: Ty,
        f: impl Fn(&Runtime, Option<&Value>, &[Value]) -> Result<Value, SprigError> + Send + Sync + 'static,
    ) -> Self {
        self.push_method(name, params, ret, true, false, MethodBody::Native(Arc::new(f)))
    }

    pub fn abstract_method(self, name: &str, params: Vec<Ty>, ret: Ty, is_varargs: bool) -> Self {
        self.push_method(name, params, ret, false, is_varargs, MethodBody::Abstract)
    }

    pub fn constructor(
        self,
        params: Vec<Ty>,
        is_varargs: bool,
        f: impl Fn(&Runtime, Option<&Value>, &[Value]) -> Result<Value, SprigError> + Send + Sync + 'static,
    ) -> Self {
        self.push_method(names::INIT, params, Ty::Void, false, is_varargs, MethodBody::Native(Arc::new(f)))
    }

    pub fn build(self) -> ClassInfo {
        self.info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subclass_walks_interfaces() {
        let reg = ClassRegistry::with_builtins();
        assert!(reg.is_subclass(names::LONG, names::NUMBER));
        assert!(reg.is_subclass(names::NATIVE_FN, names::FN));
        assert!(reg.is_subclass(names::LINKAGE_ERROR, names::EXCEPTION));
        assert!(!reg.is_subclass(names::STRING, names::NUMBER));
        assert!(reg.is_subclass(names::STRING, names::OBJECT));
    }

    #[test]
    fn overloads_are_listed_once() {
        let reg = ClassRegistry::with_builtins();
        let subs = reg.find_methods(names::STRING, "substring", false);
        assert_eq!(subs.len(), 2);
        let to_string = reg.find_methods(names::STRING, "toString", false);
        assert_eq!(to_string.len(), 1);
        assert_eq!(to_string[0].0.name, names::STRING);
    }

    #[test]
    fn layouts_include_inherited_fields() {
        let reg = ClassRegistry::with_builtins();
        let err = reg.get(names::LINKAGE_ERROR).expect("class");
        assert_eq!(err.layout, vec!["message".to_string()]);
    }
}
