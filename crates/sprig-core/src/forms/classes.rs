use std::sync::Arc;

use tracing::debug;

use crate::ast::{Datum, DatumKind};
use crate::compiler::state::{ClassContext, ClassMode, ClosureRecord, CompilerState, InterpretedFn};
use crate::emit::class_builder::{finish_class, CtorPlan};
use crate::emit::class_file::{ClassFile, FieldDef};
use crate::emit::coerce::coerce;
use crate::emit::method_builder::{abstract_method, build_method, FieldBinding, MethodPlan};
use crate::error::SprigError;
use crate::host::overload::{prepare_args, reconcile_varargs, VarargsPlan};
use crate::host::{names, ClassFlags, ClassInfo, ClassOrigin, FieldInfo, MethodBody, MethodInfo};
use crate::namespaces::VarFlags;
use crate::symbols::munge;
use crate::types::Ty;
use crate::value::{Arity, Value};
use crate::vm::bytecode::{CollKind, Instruction};

use super::{box_top, compile_form, compile_symbol_named, evaluate_form, evaluate_symbol, resolve_hint, top_type};

fn param_name<'a>(param: &'a Datum) -> Result<&'a str, SprigError> {
    let name = param
        .as_symbol()
        .ok_or_else(|| param.syntax_error(format!("Unsupported binding form: {}", param)))?;
    if name.contains('/') {
        return Err(param.syntax_error(format!("Can't use qualified name as parameter: {}", name)));
    }
    Ok(name)
}

/// The captured bindings, loaded from the enclosing method in constructor
/// order.
fn load_captures(state: &mut CompilerState, captures: &[ClosureRecord], datum: &Datum) -> Result<(), SprigError> {
    state.with_tail(false, |s| {
        captures
            .iter()
            .try_for_each(|record| compile_symbol_named(s, &record.name, datum))
    })
}

fn capture_values(state: &mut CompilerState, captures: &[ClosureRecord], datum: &Datum) -> Result<Vec<Value>, SprigError> {
    captures
        .iter()
        .map(|record| evaluate_symbol(state, &Datum::symbol(record.name.clone(), datum.span)))
        .collect()
}

fn capture_types(captures: &[ClosureRecord]) -> Vec<Ty> {
    captures.iter().map(|record| record.ty.clone()).collect()
}

fn new_class_file(state: &CompilerState, name: &str, superclass: &str) -> ClassFile {
    let mut file = ClassFile::new(name, superclass);
    file.source = state.rt.options.source_name.clone();
    file
}

// fn

struct FnArity<'a> {
    names: Vec<String>,
    variadic: bool,
    body: &'a [Datum],
}

impl FnArity<'_> {
    fn required(&self) -> usize {
        self.names.len() - usize::from(self.variadic)
    }
}

fn fn_arity<'a>(params: &'a Datum, body: &'a [Datum]) -> Result<FnArity<'a>, SprigError> {
    let items = params
        .as_vector()
        .ok_or_else(|| params.syntax_error(format!("Parameter declaration {} should be a vector", params)))?;
    let mut names = Vec::with_capacity(items.len());
    let mut variadic = false;
    let mut iter = items.iter();
    while let Some(param) = iter.next() {
        if param.as_symbol() == Some("&") {
            let rest = iter
                .next()
                .ok_or_else(|| params.syntax_error("Missing parameter name after &"))?;
            if iter.next().is_some() {
                return Err(params.syntax_error("Only one parameter may follow &"));
            }
            names.push(param_name(rest)?.to_string());
            variadic = true;
            break;
        }
        names.push(param_name(param)?.to_string());
    }
    Ok(FnArity { names, variadic, body })
}

fn fn_parts<'a>(datum: &Datum, args: &'a [Datum]) -> Result<(Option<&'a str>, Vec<FnArity<'a>>), SprigError> {
    let (name, rest) = match args.split_first() {
        Some((first, rest)) if first.as_symbol().is_some() => (first.as_symbol(), rest),
        _ => (None, args),
    };
    let arities = match rest.split_first() {
        Some((params, body)) if params.as_vector().is_some() => vec![fn_arity(params, body)?],
        Some(_) => rest
            .iter()
            .map(|clause| match clause.as_list() {
                Some([params, body @ ..]) => fn_arity(params, body),
                _ => Err(clause.syntax_error(format!("Invalid fn arity: {}", clause))),
            })
            .collect::<Result<Vec<_>, _>>()?,
        None => return Err(datum.syntax_error("fn requires a parameter vector")),
    };
    check_arities(datum, &arities)?;
    Ok((name, arities))
}

fn check_arities(datum: &Datum, arities: &[FnArity<'_>]) -> Result<(), SprigError> {
    let variadic: Vec<&FnArity<'_>> = arities.iter().filter(|a| a.variadic).collect();
    if variadic.len() > 1 {
        return Err(datum.syntax_error("Can't have more than 1 variadic overload"));
    }
    let mut fixed: Vec<usize> = arities.iter().filter(|a| !a.variadic).map(|a| a.names.len()).collect();
    fixed.sort_unstable();
    if fixed.windows(2).any(|w| w[0] == w[1]) {
        return Err(datum.syntax_error("Can't have 2 overloads with same arity"));
    }
    if let (Some(v), Some(&longest)) = (variadic.first(), fixed.last()) {
        if longest > v.required() {
            return Err(datum.syntax_error(
                "Can't have fixed arity function with more params than variadic function",
            ));
        }
    }
    Ok(())
}

/// Emits the closure class: one `invoke` per arity, captures as constructor
/// parameters.
fn define_fn(state: &mut CompilerState, datum: &Datum, args: &[Datum]) -> Result<(Arc<ClassInfo>, Vec<ClosureRecord>), SprigError> {
    let (name, arities) = fn_parts(datum, args)?;
    let ns = state.rt.current_ns().name.clone();
    let class_name = format!(
        "{}${}__{}",
        munge(&ns),
        name.map(munge).unwrap_or_else(|| "fn".to_string()),
        state.rt.next_id()
    );
    let mut file = new_class_file(state, &class_name, names::OBJECT);
    file.interfaces.push(names::FN.to_string());
    file.flags.is_final = true;
    let ((), class) = state.with_class(ClassContext::new(file, ClassMode::Closure), |s, owner| {
        for arity in &arities {
            let mut plan = MethodPlan::new(names::INVOKE, arity.body);
            plan.params = vec![Ty::Any; arity.names.len()];
            plan.param_names = arity.names.clone();
            plan.is_varargs = arity.variadic;
            plan.receiver_name = name.map(str::to_string);
            build_method(s, owner, plan)?;
        }
        Ok(())
    })?;
    let (info, captures) = finish_class(&state.rt, class, CtorPlan::Captures)?;
    debug!(class = %info.name, arities = arities.len(), captures = captures.len(), "fn class");
    Ok((info, captures))
}

pub fn compile_fn(state: &mut CompilerState, datum: &Datum, args: &[Datum]) -> Result<(), SprigError> {
    let (info, captures) = define_fn(state, datum, args)?;
    load_captures(state, &captures, datum)?;
    state.emit(Instruction::NewInstance {
        class: info.name.clone(),
        params: capture_types(&captures),
    })
}

pub fn evaluate_fn(state: &mut CompilerState, datum: &Datum, args: &[Datum]) -> Result<Value, SprigError> {
    let ns = state.rt.current_ns().name.clone();
    let locals = state.scopes.visible_names();
    let cached = state.fn_classes.get(&datum.span).and_then(|defined| {
        defined
            .iter()
            .find(|f| f.ns == ns && f.locals == locals && f.form == *datum)
            .map(|f| (f.class.clone(), f.captures.clone()))
    });
    let (info, captures) = match cached {
        Some(found) => found,
        None => {
            let (info, captures) = define_fn(state, datum, args)?;
            state.fn_classes.entry(datum.span).or_default().push(InterpretedFn {
                form: datum.clone(),
                ns,
                locals,
                class: info.clone(),
                captures: captures.clone(),
            });
            (info, captures)
        }
    };
    let values = capture_values(state, &captures, datum)?;
    state.rt.new_instance(&info.name, &capture_types(&captures), values)
}

// deftype

struct TypeMethod<'a> {
    name: &'a str,
    this: String,
    params: Vec<String>,
    body: &'a [Datum],
}

fn type_method<'a>(spec: &'a Datum) -> Result<TypeMethod<'a>, SprigError> {
    let Some([name, params, body @ ..]) = spec.as_list() else {
        return Err(spec.syntax_error(format!("Invalid method definition: {}", spec)));
    };
    let name = name
        .as_symbol()
        .ok_or_else(|| name.syntax_error("Method name must be a symbol"))?;
    let params = params
        .as_vector()
        .ok_or_else(|| params.syntax_error(format!("Parameter declaration {} should be a vector", params)))?;
    let (this, rest) = params
        .split_first()
        .ok_or_else(|| spec.syntax_error(format!("Method {} must take at least one arg (this)", name)))?;
    Ok(TypeMethod {
        name,
        this: param_name(this)?.to_string(),
        params: rest.iter().map(|p| param_name(p).map(str::to_string)).collect::<Result<_, _>>()?,
        body,
    })
}

/// Interfaces named by the leading symbols of a class body and the method
/// definitions after them.
fn class_specs<'a>(
    state: &CompilerState,
    specs: &'a [Datum],
) -> Result<(Vec<Arc<ClassInfo>>, Vec<TypeMethod<'a>>), SprigError> {
    let mut interfaces = Vec::new();
    let mut methods = Vec::new();
    for spec in specs {
        if let Some(name) = spec.as_symbol() {
            let class = state
                .rt
                .resolve_class(name)
                .ok_or_else(|| spec.compile_error(format!("Unable to resolve classname: {}", name)))?;
            if class.name == names::OBJECT {
                continue;
            }
            if !class.flags.is_interface {
                return Err(spec.compile_error(format!("{} is not an interface", class.name)));
            }
            interfaces.push(class);
        } else {
            methods.push(type_method(spec)?);
        }
    }
    Ok((interfaces, methods))
}

/// The declared signature a method definition implements, searching the
/// given classes in order.
fn declared_signature(state: &CompilerState, owners: &[String], name: &str, arity: usize) -> Option<Arc<MethodInfo>> {
    owners.iter().find_map(|owner| {
        state
            .rt
            .classes
            .find_methods(owner, name, false)
            .into_iter()
            .map(|(_, method)| method)
            .find(|method| !method.is_varargs && method.params.len() == arity)
    })
}

fn signature_plan<'a>(state: &CompilerState, owners: &[String], method: &TypeMethod<'a>) -> MethodPlan<'a> {
    let mut plan = MethodPlan::new(method.name, method.body);
    match declared_signature(state, owners, method.name, method.params.len()) {
        Some(declared) => {
            plan.params = declared.params.clone();
            plan.ret = declared.ret.clone();
        }
        None => plan.params = vec![Ty::Any; method.params.len()],
    }
    plan.param_names = method.params.clone();
    plan
}

fn type_name(state: &CompilerState, name: &Datum) -> Result<String, SprigError> {
    let simple = name
        .as_symbol()
        .filter(|n| !n.contains('/') && !n.contains('.'))
        .ok_or_else(|| name.syntax_error(format!("Invalid type name: {}", name)))?;
    Ok(format!("{}.{}", munge(&state.rt.current_ns().name), simple))
}

fn define_type(state: &mut CompilerState, datum: &Datum, args: &[Datum]) -> Result<Arc<ClassInfo>, SprigError> {
    let [name, fields, specs @ ..] = args else {
        return Err(datum.syntax_error("deftype requires a name and a field vector"));
    };
    let full = type_name(state, name)?;
    let fields = fields
        .as_vector()
        .ok_or_else(|| fields.syntax_error("deftype fields must be a vector"))?;
    let mut bindings = Vec::with_capacity(fields.len());
    for field in fields {
        let ty = match &field.type_hint {
            Some(hint) => resolve_hint(state, hint)?,
            None => Ty::Any,
        };
        bindings.push(FieldBinding {
            name: param_name(field)?.to_string(),
            ty,
            mutable: field.has_flag("mutable"),
        });
    }
    let (interfaces, methods) = class_specs(state, specs)?;

    let mut file = new_class_file(state, &full, names::OBJECT);
    file.interfaces = interfaces.iter().map(|i| i.name.clone()).collect();
    file.flags.is_final = true;
    file.fields = bindings
        .iter()
        .map(|b| FieldDef {
            name: b.name.clone(),
            ty: b.ty.clone(),
            is_static: false,
            mutable: b.mutable,
            constant: None,
        })
        .collect();
    let mut owners = file.interfaces.clone();
    owners.push(names::OBJECT.to_string());

    let previous = state.rt.classes.get(&full);
    declare_type(state, &full, &file.interfaces, &bindings)?;
    let built = state
        .with_class(ClassContext::new(file, ClassMode::DefType), |s, owner| {
            for method in &methods {
                let mut plan = signature_plan(s, &owners, method);
                plan.receiver_name = Some(method.this.clone());
                plan.fields = bindings.clone();
                build_method(s, owner, plan)?;
            }
            Ok(())
        })
        .and_then(|((), class)| {
            let own = bindings.iter().map(|b| (b.name.clone(), b.ty.clone())).collect();
            finish_class(&state.rt, class, CtorPlan::Fields(own))
        });
    let info = match built {
        Ok((info, _)) => info,
        Err(err) => {
            state.rt.classes.reinstate(&full, previous);
            return Err(err);
        }
    };
    state.rt.import_class(&info.name)?;
    debug!(class = %info.name, fields = info.fields.len(), "deftype");
    Ok(info)
}

/// Registers the type's name, fields and field constructor ahead of its
/// method bodies so they can construct and name the type. The finished class
/// replaces it.
fn declare_type(
    state: &CompilerState,
    full: &str,
    interfaces: &[String],
    bindings: &[FieldBinding],
) -> Result<(), SprigError> {
    let ctor = MethodInfo {
        owner: full.to_string(),
        name: names::INIT.to_string(),
        params: bindings.iter().map(|b| b.ty.clone()).collect(),
        ret: Ty::Void,
        is_static: false,
        is_varargs: false,
        body: MethodBody::Abstract,
    };
    state.rt.classes.register(ClassInfo {
        name: full.to_string(),
        superclass: Some(names::OBJECT.to_string()),
        interfaces: interfaces.to_vec(),
        flags: ClassFlags {
            is_final: true,
            ..ClassFlags::default()
        },
        fields: bindings
            .iter()
            .map(|b| FieldInfo {
                name: b.name.clone(),
                ty: b.ty.clone(),
                is_static: false,
                mutable: b.mutable,
                constant: None,
            })
            .collect(),
        methods: Vec::new(),
        constructors: vec![Arc::new(ctor)],
        layout: Vec::new(),
        origin: ClassOrigin::Host,
    })?;
    state.rt.import_class(full)?;
    Ok(())
}

pub fn compile_deftype(state: &mut CompilerState, datum: &Datum, args: &[Datum]) -> Result<(), SprigError> {
    let info = define_type(state, datum, args)?;
    state.emit(Instruction::Import(info.name.clone()))
}

pub fn evaluate_deftype(state: &mut CompilerState, datum: &Datum, args: &[Datum]) -> Result<Value, SprigError> {
    define_type(state, datum, args).map(Value::Class)
}

// defprotocol

/// `(name [this args*]+ doc?)`: the method name and each declared arity,
/// counted without the receiver.
fn protocol_method(spec: &Datum) -> Result<(&str, Vec<usize>), SprigError> {
    let Some([name, sigs @ ..]) = spec.as_list() else {
        return Err(spec.syntax_error(format!("Invalid protocol method: {}", spec)));
    };
    let name = name
        .as_symbol()
        .ok_or_else(|| name.syntax_error("Protocol method name must be a symbol"))?;
    let mut arities = Vec::new();
    for sig in sigs {
        match sig.as_vector() {
            Some([]) => {
                return Err(sig.syntax_error(format!("Protocol method {} must take at least one arg", name)))
            }
            Some(params) => arities.push(params.len() - 1),
            None if matches!(sig.kind, DatumKind::Str(_)) => {}
            None => return Err(sig.syntax_error(format!("Invalid signature for {}: {}", name, sig))),
        }
    }
    if arities.is_empty() {
        return Err(spec.syntax_error(format!("Protocol method {} declares no signature", name)));
    }
    Ok((name, arities))
}

fn dispatcher(name: &str) -> Value {
    let method = name.to_string();
    Value::native(name, Arity::at_least(1), Ty::Any, move |rt, args| {
        let (receiver, rest) = args
            .split_first()
            .ok_or_else(|| SprigError::arity(format!("{} requires a receiver", method)))?;
        rt.call_instance(receiver, &method, rest.to_vec())
    })
}

fn define_protocol(state: &mut CompilerState, datum: &Datum, args: &[Datum]) -> Result<Arc<ClassInfo>, SprigError> {
    let (name, specs) = args
        .split_first()
        .ok_or_else(|| datum.syntax_error("defprotocol requires a name"))?;
    let full = type_name(state, name)?;
    let mut file = new_class_file(state, &full, names::OBJECT);
    file.flags.is_interface = true;
    file.flags.is_abstract = true;
    let mut method_names = Vec::new();
    for spec in specs.iter().filter(|s| !matches!(s.kind, DatumKind::Str(_))) {
        let (method, arities) = protocol_method(spec)?;
        for arity in arities {
            file.methods.push(abstract_method(method, vec![Ty::Any; arity], Ty::Any));
        }
        method_names.push(method);
    }
    let (info, _) = finish_class(&state.rt, ClassContext::new(file, ClassMode::DefType), CtorPlan::None)?;
    state.rt.import_class(&info.name)?;
    let ns = state.rt.current_ns();
    for method in method_names {
        ns.intern(method).define(Some(dispatcher(method)), VarFlags::default());
    }
    debug!(protocol = %info.name, methods = info.methods.len(), "defprotocol");
    Ok(info)
}

pub fn compile_defprotocol(state: &mut CompilerState, datum: &Datum, args: &[Datum]) -> Result<(), SprigError> {
    let info = define_protocol(state, datum, args)?;
    state.emit(Instruction::Import(info.name.clone()))
}

pub fn evaluate_defprotocol(state: &mut CompilerState, datum: &Datum, args: &[Datum]) -> Result<Value, SprigError> {
    define_protocol(state, datum, args).map(Value::Class)
}

// proxy

struct ProxyClass {
    info: Arc<ClassInfo>,
    ctor: Arc<MethodInfo>,
    captures: Vec<ClosureRecord>,
}

fn super_ctor(superclass: &ClassInfo, argc: usize, datum: &Datum) -> Result<Arc<MethodInfo>, SprigError> {
    let fixed = superclass
        .constructors
        .iter()
        .find(|c| !c.is_varargs && c.params.len() == argc);
    fixed
        .or_else(|| superclass.constructors.iter().find(|c| c.accepts_arity(argc)))
        .cloned()
        .ok_or_else(|| {
            datum.compile_error(format!(
                "No matching ctor found for proxy superclass {} taking {} args",
                superclass.name, argc
            ))
        })
}

fn define_proxy(state: &mut CompilerState, datum: &Datum, args: &[Datum]) -> Result<ProxyClass, SprigError> {
    let [classes, ctor_args, specs @ ..] = args else {
        return Err(datum.syntax_error("proxy requires a class vector and an argument vector"));
    };
    let classes = classes
        .as_vector()
        .ok_or_else(|| classes.syntax_error("proxy classes must be a vector"))?;
    let ctor_args = ctor_args
        .as_vector()
        .ok_or_else(|| ctor_args.syntax_error("proxy constructor arguments must be a vector"))?;
    let mut resolved = Vec::with_capacity(classes.len());
    for class in classes {
        let name = class
            .as_symbol()
            .ok_or_else(|| class.syntax_error(format!("Expected a class name, got: {}", class)))?;
        resolved.push(
            state
                .rt
                .resolve_class(name)
                .ok_or_else(|| class.compile_error(format!("Unable to resolve classname: {}", name)))?,
        );
    }
    let superclass = if resolved.first().is_some_and(|c| !c.flags.is_interface) {
        resolved.remove(0)
    } else {
        state
            .rt
            .resolve_class(names::OBJECT)
            .ok_or_else(|| SprigError::internal("lang.Object is not registered"))?
    };
    if superclass.flags.is_final {
        return Err(datum.compile_error(format!("Cannot proxy final class {}", superclass.name)));
    }
    if let Some(class) = resolved.iter().find(|c| !c.flags.is_interface) {
        return Err(datum.compile_error(format!("{} is not an interface", class.name)));
    }
    let ctor = super_ctor(&superclass, ctor_args.len(), datum)?;
    let methods = specs
        .iter()
        .map(|spec| match spec.as_list() {
            Some([name, params, body @ ..]) => Ok(TypeMethod {
                name: name
                    .as_symbol()
                    .ok_or_else(|| name.syntax_error("Method name must be a symbol"))?,
                this: "this".to_string(),
                params: params
                    .as_vector()
                    .ok_or_else(|| params.syntax_error("Parameter declaration should be a vector"))?
                    .iter()
                    .map(|p| param_name(p).map(str::to_string))
                    .collect::<Result<_, _>>()?,
                body,
            }),
            _ => Err(spec.syntax_error(format!("Invalid method definition: {}", spec))),
        })
        .collect::<Result<Vec<_>, SprigError>>()?;

    let class_name = format!("{}$proxy__{}", munge(&state.rt.current_ns().name), state.rt.next_id());
    let mut file = new_class_file(state, &class_name, &superclass.name);
    file.interfaces = resolved.iter().map(|i| i.name.clone()).collect();
    file.flags.is_final = true;
    let mut owners = vec![superclass.name.clone()];
    owners.extend(file.interfaces.iter().cloned());

    let ((), class) = state.with_class(ClassContext::new(file, ClassMode::AnonClass), |s, owner| {
        for method in &methods {
            let mut plan = signature_plan(s, &owners, method);
            plan.receiver_name = Some(method.this.clone());
            build_method(s, owner, plan)?;
        }
        Ok(())
    })?;
    let (info, captures) = finish_class(
        &state.rt,
        class,
        CtorPlan::Super {
            params: ctor.params.clone(),
        },
    )?;
    debug!(class = %info.name, superclass = %superclass.name, "proxy");
    Ok(ProxyClass { info, ctor, captures })
}

/// Pushes the superclass constructor arguments, packing a variadic tail
/// into a vector.
fn compile_super_args(state: &mut CompilerState, ctor: &MethodInfo, args: &[Datum]) -> Result<(), SprigError> {
    let fixed = if ctor.is_varargs { ctor.params.len() - 1 } else { ctor.params.len() };
    state.with_tail(false, |s| {
        for (arg, param) in args.iter().zip(&ctor.params).take(fixed) {
            compile_form(s, arg)?;
            if let Some(top) = top_type(s)? {
                let code = coerce(&top, param, &s.rt.classes).map_err(|err| err.with_span(arg.span))?;
                s.emit_all(code)?;
            }
        }
        if !ctor.is_varargs {
            return Ok(());
        }
        let tail = &args[fixed.min(args.len())..];
        for arg in tail {
            compile_form(s, arg)?;
            box_top(s)?;
        }
        if s.is_unreachable() {
            return Ok(());
        }
        let mut probe = ctor.params[..fixed].to_vec();
        probe.extend(s.stack()?.top_types(tail.len())?);
        match reconcile_varargs(ctor, &probe, &s.rt.classes) {
            VarargsPlan::Direct => {
                let last = top_type(s)?.unwrap_or(Ty::Any);
                let code = coerce(&last, &Ty::class(names::VECTOR), &s.rt.classes)?;
                s.emit_all(code)
            }
            VarargsPlan::WrapTail { count, .. } => s.emit(Instruction::MakeCollection {
                kind: CollKind::Vector,
                count: count as u16,
            }),
        }
    })
}

pub fn compile_proxy(state: &mut CompilerState, datum: &Datum, args: &[Datum]) -> Result<(), SprigError> {
    let proxy = define_proxy(state, datum, args)?;
    let ctor_args = args.get(1).and_then(Datum::as_vector).unwrap_or(&[]);
    compile_super_args(state, &proxy.ctor, ctor_args)?;
    load_captures(state, &proxy.captures, datum)?;
    let mut params = proxy.ctor.params.clone();
    params.extend(capture_types(&proxy.captures));
    state.emit(Instruction::NewInstance {
        class: proxy.info.name.clone(),
        params,
    })
}

pub fn evaluate_proxy(state: &mut CompilerState, datum: &Datum, args: &[Datum]) -> Result<Value, SprigError> {
    let proxy = define_proxy(state, datum, args)?;
    let ctor_args = args.get(1).and_then(Datum::as_vector).unwrap_or(&[]);
    let values = state.with_tail(false, |s| ctor_args.iter().map(|arg| evaluate_form(s, arg)).collect::<Result<Vec<_>, _>>())?;
    let mut values = prepare_args(&proxy.ctor, values, &state.rt.classes);
    values.extend(capture_values(state, &proxy.captures, datum)?);
    let mut params = proxy.ctor.params.clone();
    params.extend(capture_types(&proxy.captures));
    state.rt.new_instance(&proxy.info.name, &params, values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_str;
    use crate::runtime::Runtime;

    fn parts(src: &str) -> Result<usize, SprigError> {
        let datum = read_str(src)?.remove(0);
        let items = datum.as_list().unwrap_or(&[]);
        fn_parts(&datum, &items[1..]).map(|(_, arities)| arities.len())
    }

    #[test]
    fn single_and_multi_arity_shapes() -> Result<(), SprigError> {
        assert_eq!(parts("(fn [x] x)")?, 1);
        assert_eq!(parts("(fn f ([] 0) ([x] x) ([x & more] more))")?, 3);
        Ok(())
    }

    #[test]
    fn arity_conflicts_are_rejected() {
        assert!(parts("(fn ([x] 1) ([y] 2))").is_err());
        assert!(parts("(fn ([& a] 1) ([x & b] 2))").is_err());
        assert!(parts("(fn ([a b] 1) ([x & r] 2))").is_err());
        assert!(parts("(fn [x & a b] 1)").is_err());
    }

    #[test]
    fn rest_parameter_counts_as_one() -> Result<(), SprigError> {
        let datum = read_str("[a & more]")?.remove(0);
        let arity = fn_arity(&datum, &[])?;
        assert!(arity.variadic);
        assert_eq!(arity.names, vec!["a".to_string(), "more".to_string()]);
        assert_eq!(arity.required(), 1);
        Ok(())
    }

    #[test]
    fn fn_classes_implement_fn() -> Result<(), SprigError> {
        let rt = Runtime::new();
        let mut state = CompilerState::new(&rt);
        let datum = read_str("(fn add [a b] a)")?.remove(0);
        let items = datum.as_list().unwrap_or(&[]);
        let (info, captures) = define_fn(&mut state, &datum, &items[1..])?;
        assert!(info.name.starts_with("user$add__"));
        assert!(info.interfaces.contains(&names::FN.to_string()));
        assert!(captures.is_empty());
        assert_eq!(info.methods.iter().filter(|m| m.name == names::INVOKE).count(), 1);
        Ok(())
    }
}
