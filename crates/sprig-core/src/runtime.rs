use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::debug;

use crate::builtins;
use crate::compiler::{self, Diagnostic};
use crate::emit::class_file::ClassFile;
use crate::error::SprigError;
use crate::host::builtin::DEFAULT_IMPORTS;
use crate::host::overload::{prepare_args, resolve_dynamic, Candidate};
use crate::host::{names, ClassInfo, ClassOrigin, ClassRegistry, FieldInfo, LoadedCode, MethodBody, MethodInfo};
use crate::link::{linker_for, pack_rest, select_invoke, CallSite};
use crate::namespaces::{Namespace, NamespaceStore, Var};
use crate::options::CompilerOptions;
use crate::reader::{Reader, ReaderOptions};
use crate::symbols::{simple_class_name, CORE_NS, USER_NS};
use crate::types::Ty;
use crate::value::{Instance, Value};
use crate::vm;
use crate::vm::bytecode::Constant;

/// One compilation session: the class registry, the namespaces and the
/// counters synthetic names are drawn from. Independent runtimes never share
/// state, so names generated in one are deterministic regardless of others.
pub struct Runtime {
    pub options: CompilerOptions,
    pub classes: ClassRegistry,
    pub namespaces: NamespaceStore,
    current_ns: RwLock<Arc<Namespace>>,
    counter: AtomicUsize,
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl Runtime {
    pub fn new() -> Arc<Self> {
        Self::with_options(CompilerOptions::default())
    }

    pub fn with_options(options: CompilerOptions) -> Arc<Self> {
        let namespaces = NamespaceStore::new();
        let (user, _) = namespaces.ensure(USER_NS);
        let rt = Arc::new(Runtime {
            options,
            classes: ClassRegistry::with_builtins(),
            namespaces,
            current_ns: RwLock::new(user.clone()),
            counter: AtomicUsize::new(0),
            diagnostics: Mutex::new(Vec::new()),
        });
        builtins::install(&rt);
        rt.prepare_namespace(&user);
        rt
    }

    pub fn current_ns(&self) -> Arc<Namespace> {
        self.current_ns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Makes `name` current, creating it (with `sprig.core` referred and the
    /// default imports in place) on first use.
    pub fn set_current_ns(&self, name: &str) -> Arc<Namespace> {
        let (ns, created) = self.namespaces.ensure(name);
        if created {
            self.prepare_namespace(&ns);
        }
        *self.current_ns.write().unwrap_or_else(PoisonError::into_inner) = ns.clone();
        debug!(ns = %name, "switched namespace");
        ns
    }

    fn prepare_namespace(&self, ns: &Namespace) {
        if ns.name == CORE_NS {
            return;
        }
        if let Some(core) = self.namespaces.get(CORE_NS) {
            for var in core.own_vars() {
                ns.refer(var);
            }
        }
        for (simple, full) in DEFAULT_IMPORTS.iter() {
            ns.import(simple, full);
        }
    }

    pub fn find_var(&self, ns: &str, name: &str) -> Option<Arc<Var>> {
        self.namespaces.get(ns)?.resolve(name)
    }

    /// Resolves a class name as written in source: an import of the current
    /// namespace first, then a fully qualified name.
    pub fn resolve_class(&self, name: &str) -> Option<Arc<ClassInfo>> {
        if let Some(full) = self.current_ns().resolve_import(name) {
            if let Some(class) = self.classes.get(&full) {
                return Some(class);
            }
        }
        self.classes.get(name)
    }

    pub fn import_class(&self, full: &str) -> Result<Arc<ClassInfo>, SprigError> {
        let class = self
            .classes
            .get(full)
            .ok_or_else(|| SprigError::linkage(format!("class {} not found", full)))?;
        self.current_ns().import(simple_class_name(full), full);
        Ok(class)
    }

    pub fn next_id(&self) -> usize {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn gensym(&self, prefix: &str) -> String {
        format!("{}__{}", prefix, self.next_id())
    }

    pub fn report(&self, diagnostic: Diagnostic) {
        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(diagnostic);
    }

    /// Warnings collected so far, oldest first.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn read(&self, src: &str) -> Result<Vec<crate::ast::Datum>, SprigError> {
        let options = ReaderOptions {
            source_name: self.options.source_name.clone(),
        };
        Reader::new_with_options(src, options).read_all()
    }

    /// Interprets every top-level form, returning the last value.
    pub fn eval_str(self: &Arc<Self>, src: &str) -> Result<Value, SprigError> {
        let mut last = Value::Nil;
        for datum in self.read(src)? {
            last = compiler::evaluate_toplevel(self, &datum)
                .map_err(|err| err.with_source(self.options.source_name.clone()))?;
        }
        Ok(last)
    }

    /// Compiles every top-level form into a class of its own, defines it and
    /// runs it, returning the last value.
    pub fn compile_str(self: &Arc<Self>, src: &str) -> Result<Value, SprigError> {
        let mut last = Value::Nil;
        for datum in self.read(src)? {
            last = compiler::compile_toplevel(self, &datum)
                .map_err(|err| err.with_source(self.options.source_name.clone()))?;
        }
        Ok(last)
    }

    /// Calls any callable value.
    pub fn apply(&self, callee: &Value, args: &[Value]) -> Result<Value, SprigError> {
        match callee {
            Value::Native(native) => native.call(self, args),
            Value::Object(inst) if self.classes.is_subclass(&inst.class.name, names::FN) => {
                let method = select_invoke(&inst.class, args.len())?;
                self.invoke_method(&inst.class, &method, Some(callee), pack_rest(&method, args.to_vec()))
            }
            Value::Keyword(_) => match args {
                [Value::Map(map)] => Ok(map.get(callee).cloned().unwrap_or(Value::Nil)),
                [Value::Map(map), default] => Ok(map.get(callee).cloned().unwrap_or_else(|| default.clone())),
                [_] => Ok(Value::Nil),
                [_, default] => Ok(default.clone()),
                _ => Err(SprigError::arity(format!(
                    "wrong number of args ({}) passed to {}",
                    args.len(),
                    callee
                ))),
            },
            Value::Map(map) => match args {
                [key] => Ok(map.get(key).cloned().unwrap_or(Value::Nil)),
                [key, default] => Ok(map.get(key).cloned().unwrap_or_else(|| default.clone())),
                _ => Err(SprigError::arity("a map takes one or two arguments")),
            },
            Value::Vector(items) => match args {
                [Value::Int(idx)] => usize::try_from(*idx)
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .ok_or_else(|| SprigError::runtime(format!("index out of bounds: {}", idx))),
                _ => Err(SprigError::runtime("a vector takes one integer argument")),
            },
            Value::Set(items) => match args {
                [key] => Ok(if items.contains(key) { key.clone() } else { Value::Nil }),
                _ => Err(SprigError::arity("a set takes one argument")),
            },
            Value::Var(var) => self.apply(&var.deref_value()?, args),
            other => Err(SprigError::runtime(format!(
                "{} cannot be called",
                other.class_name().unwrap_or("nil")
            ))),
        }
    }

    /// Runs `method` of `class`. `this` is the receiver of instance methods
    /// and constructors.
    pub fn invoke_method(
        &self,
        class: &Arc<ClassInfo>,
        method: &MethodInfo,
        this: Option<&Value>,
        args: Vec<Value>,
    ) -> Result<Value, SprigError> {
        match &method.body {
            MethodBody::Native(f) => f(self, this, &args),
            MethodBody::Code(idx) => {
                let mut locals = Vec::with_capacity(args.len() + 1);
                if !method.is_static {
                    let receiver = this.ok_or_else(|| {
                        SprigError::internal(format!("{} invoked without receiver", method.signature()))
                    })?;
                    locals.push(receiver.clone());
                }
                locals.extend(args);
                vm::execute(self, class, *idx, locals)
            }
            MethodBody::Abstract => Err(SprigError::runtime(format!(
                "abstract method {} has no implementation",
                method.signature()
            ))),
        }
    }

    /// Allocates an instance and runs the constructor with exactly `params`.
    pub fn new_instance(&self, class_name: &str, params: &[Ty], args: Vec<Value>) -> Result<Value, SprigError> {
        let class = self
            .classes
            .get(class_name)
            .ok_or_else(|| SprigError::linkage(format!("class {} not found", class_name)))?;
        if class.flags.is_abstract {
            return Err(SprigError::runtime(format!("cannot instantiate {}", class.name)));
        }
        let ctor = class
            .constructors
            .iter()
            .find(|c| c.params == params)
            .cloned()
            .ok_or_else(|| SprigError::linkage(format!("no constructor {}({:?})", class.name, params)))?;
        let object = Value::Object(Arc::new(Instance::new(class.clone())));
        self.invoke_method(&class, &ctor, Some(&object), args)?;
        Ok(object)
    }

    /// Constructor call resolved against the runtime argument classes.
    pub fn instantiate(&self, class: &Arc<ClassInfo>, args: Vec<Value>) -> Result<Value, SprigError> {
        let candidates: Vec<Candidate> = class
            .constructors
            .iter()
            .map(|c| (class.clone(), c.clone()))
            .collect();
        let res = resolve_dynamic(&candidates, &args, &self.classes, &format!("new {}", class.name))?;
        let (_, ctor) = res.candidate;
        let args = prepare_args(&ctor, args, &self.classes);
        self.new_instance(&class.name, &ctor.params, args)
    }

    pub fn call_static(&self, class: &str, name: &str, args: Vec<Value>) -> Result<Value, SprigError> {
        let candidates = self.classes.find_methods(class, name, true);
        if candidates.is_empty() {
            return Err(SprigError::linkage(format!("no static method {}/{}", class, name)));
        }
        let res = resolve_dynamic(&candidates, &args, &self.classes, &format!("{}/{}", class, name))?;
        let (owner, method) = res.candidate;
        let args = prepare_args(&method, args, &self.classes);
        self.invoke_method(&owner, &method, None, args)
    }

    pub fn call_instance(&self, receiver: &Value, name: &str, args: Vec<Value>) -> Result<Value, SprigError> {
        let class = receiver
            .class_name()
            .ok_or_else(|| SprigError::runtime(format!("cannot call .{} on nil", name)))?;
        let candidates = self.classes.find_methods(class, name, false);
        if candidates.is_empty() {
            return Err(SprigError::linkage(format!("no method {} on {}", name, class)));
        }
        let res = resolve_dynamic(&candidates, &args, &self.classes, &format!("{}.{}", class, name))?;
        let (owner, method) = res.candidate;
        let args = prepare_args(&method, args, &self.classes);
        self.invoke_method(&owner, &method, Some(receiver), args)
    }

    /// Text for `str` and the printing natives. Instances of classes that
    /// override `toString` print through it, also inside collections.
    pub fn display_string(&self, value: &Value, readable: bool) -> Result<String, SprigError> {
        match value {
            Value::Object(_) => match self.overridden_to_string(value)? {
                Some(text) => Ok(text),
                None if readable => Ok(value.to_string()),
                None => Ok(value.to_display_string()),
            },
            Value::List(items) => self.display_items("(", items.iter(), ")"),
            Value::Vector(items) => self.display_items("[", items.iter(), "]"),
            Value::Set(items) => {
                let mut parts = items
                    .iter()
                    .map(|item| self.display_string(item, true))
                    .collect::<Result<Vec<_>, _>>()?;
                parts.sort();
                Ok(format!("#{{{}}}", parts.join(" ")))
            }
            Value::Map(map) => {
                let mut parts = Vec::with_capacity(map.len());
                for (k, v) in map.iter() {
                    parts.push(format!("{} {}", self.display_string(k, true)?, self.display_string(v, true)?));
                }
                parts.sort();
                Ok(format!("{{{}}}", parts.join(", ")))
            }
            other if readable => Ok(other.to_string()),
            other => Ok(other.to_display_string()),
        }
    }

    fn display_items<'v>(
        &self,
        open: &str,
        items: impl Iterator<Item = &'v Value>,
        close: &str,
    ) -> Result<String, SprigError> {
        let parts = items
            .map(|item| self.display_string(item, true))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(format!("{}{}{}", open, parts.join(" "), close))
    }

    /// The result of a `toString` declared below `lang.Object`, if any.
    fn overridden_to_string(&self, value: &Value) -> Result<Option<String>, SprigError> {
        let Some(class) = value.class_name() else {
            return Ok(None);
        };
        let found = self
            .classes
            .find_methods(class, "toString", false)
            .into_iter()
            .find(|(_, method)| method.params.is_empty() && !method.is_abstract());
        match found {
            Some((owner, method)) if owner.name != names::OBJECT => {
                let text = self.invoke_method(&owner, &method, Some(value), Vec::new())?;
                Ok(Some(text.to_display_string()))
            }
            _ => Ok(None),
        }
    }

    /// Decodes, verifies and registers a generated class, bootstrapping one
    /// call site per recorded site spec.
    pub fn define_class(&self, bytes: &[u8]) -> Result<Arc<ClassInfo>, SprigError> {
        let file = ClassFile::from_bytes(bytes)?;
        if self.options.verify_classes {
            vm::verify_class(&file)?;
        }
        let fields = file
            .fields
            .iter()
            .map(|f| FieldInfo {
                name: f.name.clone(),
                ty: f.ty.clone(),
                is_static: f.is_static,
                mutable: f.mutable,
                constant: f.constant.as_ref().and_then(constant_value),
            })
            .collect();
        let mut methods = Vec::new();
        let mut constructors = Vec::new();
        for (idx, def) in file.methods.iter().enumerate() {
            let method = Arc::new(MethodInfo {
                owner: file.name.clone(),
                name: def.name.clone(),
                params: def.params.clone(),
                ret: def.ret.clone(),
                is_static: def.is_static,
                is_varargs: def.is_varargs,
                body: if def.code.is_some() { MethodBody::Code(idx) } else { MethodBody::Abstract },
            });
            if def.name == names::INIT {
                constructors.push(method);
            } else {
                methods.push(method);
            }
        }
        let call_sites = file
            .call_sites
            .iter()
            .map(|spec| Arc::new(CallSite::new(spec.clone(), linker_for(&spec.kind), self.options.call_sites)))
            .collect();
        let info = ClassInfo {
            name: file.name.clone(),
            superclass: Some(file.superclass.clone()),
            interfaces: file.interfaces.clone(),
            flags: file.flags,
            fields,
            methods,
            constructors,
            layout: Vec::new(),
            origin: ClassOrigin::Loaded(LoadedCode { file, call_sites }),
        };
        let class = self.classes.register(info)?;
        debug!(class = %class.name, bytes = bytes.len(), "defined class");
        Ok(class)
    }

    /// Call sites of a generated class, in the order the compiler emitted them.
    pub fn call_sites(&self, class_name: &str) -> Vec<Arc<CallSite>> {
        self.classes
            .get(class_name)
            .and_then(|class| class.loaded().map(|code| code.call_sites.clone()))
            .unwrap_or_default()
    }

    pub fn make_exception(&self, class: &str, message: &str) -> Result<Value, SprigError> {
        self.new_instance(class, &[Ty::string()], vec![Value::string(message)])
    }

    /// The value a `catch` clause sees for a catchable error.
    pub fn error_to_exception(&self, err: &SprigError) -> Result<Value, SprigError> {
        let class = match err {
            SprigError::Thrown(value, _) => return Ok(value.clone()),
            SprigError::Linkage(_) => names::LINKAGE_ERROR,
            SprigError::Arity(_) => names::ARITY_ERROR,
            SprigError::Runtime(_) => names::EXCEPTION,
            other => return Err(other.clone()),
        };
        self.make_exception(class, &err.message())
    }
}

fn constant_value(c: &Constant) -> Option<Value> {
    Some(match c {
        Constant::Nil => Value::Nil,
        Constant::Bool(b) => Value::Bool(*b),
        Constant::Char(ch) => Value::Char(*ch),
        Constant::Long(n) => Value::Int(*n),
        Constant::Double(n) => Value::Float(*n),
        Constant::Str(s) => Value::string(s),
        Constant::Keyword(k) => Value::keyword(k),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_namespace_sees_core() {
        let rt = Runtime::new();
        assert_eq!(rt.current_ns().name, USER_NS);
        assert!(rt.find_var(USER_NS, "+").is_some());
        assert!(rt.resolve_class("String").is_some());
    }

    #[test]
    fn gensyms_are_per_session() {
        let a = Runtime::new();
        let b = Runtime::new();
        assert_eq!(a.gensym("x"), b.gensym("x"));
        assert_ne!(a.gensym("x"), a.gensym("x"));
    }

    #[test]
    fn errors_become_exception_instances() -> Result<(), SprigError> {
        let rt = Runtime::new();
        let exc = rt.error_to_exception(&SprigError::linkage("nope"))?;
        assert!(rt.classes.instance_of(&exc, names::EXCEPTION));
        assert_eq!(exc.class_name(), Some(names::LINKAGE_ERROR));
        assert!(rt.error_to_exception(&SprigError::internal("bug")).is_err());
        Ok(())
    }

    #[test]
    fn keywords_and_maps_are_callable() -> Result<(), SprigError> {
        let rt = Runtime::new();
        let map = Value::Map([(Value::keyword("a"), Value::Int(1))].into_iter().collect());
        assert_eq!(rt.apply(&Value::keyword("a"), &[map.clone()])?, Value::Int(1));
        assert_eq!(rt.apply(&map, &[Value::keyword("b"), Value::Int(9)])?, Value::Int(9));
        Ok(())
    }
}
