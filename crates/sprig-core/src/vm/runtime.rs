use std::sync::Arc;

use im::{HashMap, HashSet, Vector};

use super::bytecode::{CollKind, Code, Constant, Instruction, LabelId};
use crate::ast::datum_to_value;
use crate::error::SprigError;
use crate::host::{names, ClassInfo, LoadedCode};
use crate::runtime::Runtime;
use crate::types::{Prim, Ty};
use crate::value::Value;

/// Runs method `method_idx` of a loaded class. `locals` holds the receiver
/// (for instance methods) followed by the arguments.
pub fn execute(rt: &Runtime, class: &Arc<ClassInfo>, method_idx: usize, locals: Vec<Value>) -> Result<Value, SprigError> {
    let loaded = class
        .loaded()
        .ok_or_else(|| SprigError::internal(format!("{} has no generated code", class.name)))?;
    let method = loaded
        .file
        .methods
        .get(method_idx)
        .ok_or_else(|| SprigError::internal(format!("{} has no method #{}", class.name, method_idx)))?;
    let code = method
        .code
        .as_ref()
        .ok_or_else(|| SprigError::runtime(format!("{}.{} is abstract", class.name, method.name)))?;
    let mut slots = locals;
    slots.resize(code.max_locals.max(slots.len() as u16) as usize, Value::Nil);
    let mut vm = Vm {
        rt,
        loaded,
        code,
        pc: 0,
        stack: Vec::with_capacity(code.max_stack as usize),
        locals: slots,
    };
    vm.run()
}

struct Vm<'a> {
    rt: &'a Runtime,
    loaded: &'a LoadedCode,
    code: &'a Code,
    pc: usize,
    stack: Vec<Value>,
    locals: Vec<Value>,
}

enum Step {
    Next,
    Jump(LabelId),
    Return(Value),
}

impl<'a> Vm<'a> {
    fn push(&mut self, value: Value, ty: &Ty) {
        match ty.width() {
            0 => {}
            1 => self.stack.push(value),
            _ => {
                self.stack.push(value);
                self.stack.push(Value::Nil);
            }
        }
    }

    fn pop_slot(&mut self) -> Result<Value, SprigError> {
        self.stack
            .pop()
            .ok_or_else(|| SprigError::internal("operand stack underflow"))
    }

    fn pop(&mut self, ty: &Ty) -> Result<Value, SprigError> {
        match ty.width() {
            0 => Ok(Value::Nil),
            1 => self.pop_slot(),
            _ => {
                self.pop_slot()?;
                self.pop_slot()
            }
        }
    }

    fn pop_many(&mut self, types: &[Ty]) -> Result<Vec<Value>, SprigError> {
        let mut out = Vec::with_capacity(types.len());
        for ty in types.iter().rev() {
            out.push(self.pop(ty)?);
        }
        out.reverse();
        Ok(out)
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, SprigError> {
        if n > self.stack.len() {
            return Err(SprigError::internal("operand stack underflow"));
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    fn run(&mut self) -> Result<Value, SprigError> {
        let code = self.code;
        loop {
            let ins = code
                .instructions
                .get(self.pc)
                .ok_or_else(|| SprigError::internal(format!("pc {} past end of code", self.pc)))?;
            match self.step(ins) {
                Ok(Step::Next) => self.pc += 1,
                Ok(Step::Jump(label)) => self.pc = self.target(label)?,
                Ok(Step::Return(value)) => return Ok(value),
                Err(err) => self.unwind(err)?,
            }
        }
    }

    fn target(&self, label: LabelId) -> Result<usize, SprigError> {
        self.code
            .label_pc(label)
            .ok_or_else(|| SprigError::internal(format!("unplaced label L{}", label.0)))
    }

    /// Transfers control to the innermost matching handler, or re-raises.
    fn unwind(&mut self, err: SprigError) -> Result<(), SprigError> {
        if !err.is_catchable() {
            return Err(err);
        }
        let exception = self.rt.error_to_exception(&err)?;
        let pc = self.pc;
        let code = self.code;
        let handler = code.handlers.iter().find(|h| {
            h.start <= pc
                && pc < h.end
                && h.catch
                    .as_deref()
                    .map_or(true, |class| self.rt.classes.instance_of(&exception, class))
        });
        match handler {
            Some(h) => {
                self.stack.truncate(h.stack_depth as usize);
                self.stack.push(exception);
                self.pc = h.target;
                Ok(())
            }
            None => Err(err),
        }
    }

    fn class_cast(&self, value: &Value, expected: &str) -> SprigError {
        let message = format!(
            "{} cannot be cast to {}",
            value.class_name().unwrap_or("nil"),
            expected
        );
        match self.rt.make_exception(names::CLASS_CAST, &message) {
            Ok(exception) => SprigError::thrown(exception),
            Err(err) => err,
        }
    }

    fn unbox(&self, value: Value, prim: Prim) -> Result<Value, SprigError> {
        match (prim, value) {
            (Prim::Long, v @ Value::Int(_))
            | (Prim::Double, v @ Value::Float(_))
            | (Prim::Boolean, v @ Value::Bool(_))
            | (Prim::Char, v @ Value::Char(_)) => Ok(v),
            (Prim::Double, Value::Int(n)) => Ok(Value::Float(n as f64)),
            (prim, other) => Err(self.class_cast(&other, prim.name())),
        }
    }

    /// Checks a call-site result against the type the compiler assumed.
    fn conform(&self, value: Value, ty: &Ty) -> Result<Value, SprigError> {
        match ty {
            Ty::Prim(p) => self.unbox(value, *p),
            Ty::Class(class) if !value.is_nil() && !self.rt.classes.instance_of(&value, class) => {
                Err(self.class_cast(&value, class))
            }
            _ => Ok(value),
        }
    }

    fn constant(&self, c: &Constant) -> Result<Value, SprigError> {
        Ok(match c {
            Constant::Nil => Value::Nil,
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Char(ch) => Value::Char(*ch),
            Constant::Long(n) => Value::Int(*n),
            Constant::Double(n) => Value::Float(*n),
            Constant::Str(s) => Value::string(s),
            Constant::Keyword(k) => Value::keyword(k),
            Constant::Symbol(s) => Value::symbol(s),
            Constant::Regex(r) => Value::regex(r)?,
            Constant::Class(name) => Value::Class(
                self.rt
                    .classes
                    .get(name)
                    .ok_or_else(|| SprigError::linkage(format!("class {} not found", name)))?,
            ),
            Constant::Namespace(name) => Value::Namespace(
                self.rt
                    .namespaces
                    .get(name)
                    .ok_or_else(|| SprigError::runtime(format!("no namespace {}", name)))?,
            ),
            Constant::Quoted(datum) => datum_to_value(datum),
        })
    }

    fn step(&mut self, ins: &Instruction) -> Result<Step, SprigError> {
        use Instruction::*;
        match ins {
            Nop => {}
            Const(c) => {
                let value = self.constant(c)?;
                self.push(value, &c.ty());
            }
            Load { slot, ty } => {
                let value = self.locals[*slot as usize].clone();
                self.push(value, ty);
            }
            Store { slot, ty } => {
                let value = self.pop(ty)?;
                self.locals[*slot as usize] = value;
            }
            GetField { name, ty, .. } => {
                let value = match self.pop_slot()? {
                    Value::Object(inst) => inst.get_field(name)?,
                    other => return Err(self.class_cast(&other, "object")),
                };
                self.push(value, ty);
            }
            PutField { name, ty, .. } => {
                let value = self.pop(ty)?;
                match self.pop_slot()? {
                    Value::Object(inst) => inst.set_field(name, value)?,
                    other => return Err(self.class_cast(&other, "object")),
                }
            }
            GetStatic { owner, name, ty } => {
                let value = self
                    .rt
                    .classes
                    .find_field(owner, name)
                    .and_then(|(_, field)| field.constant)
                    .ok_or_else(|| SprigError::linkage(format!("no static field {}/{}", owner, name)))?;
                self.push(value, ty);
            }
            VarRef { ns, name } => {
                let var = self
                    .rt
                    .find_var(ns, name)
                    .ok_or_else(|| SprigError::runtime(format!("no var {}/{}", ns, name)))?;
                self.stack.push(Value::Var(var));
            }
            DefVar { ns, name, flags, init } => {
                let value = if *init { Some(self.pop_slot()?) } else { None };
                let (namespace, _) = self.rt.namespaces.ensure(ns);
                let var = namespace.intern(name);
                var.define(value, *flags);
                self.stack.push(Value::Var(var));
            }
            SetVar { ns, name } => {
                let value = self.pop_slot()?;
                let var = self
                    .rt
                    .find_var(ns, name)
                    .ok_or_else(|| SprigError::runtime(format!("no var {}/{}", ns, name)))?;
                var.bind_root(value.clone());
                self.stack.push(value);
            }
            InvokeDynamic(idx) => {
                let site = self
                    .loaded
                    .call_sites
                    .get(*idx as usize)
                    .ok_or_else(|| SprigError::internal(format!("missing call site {}", idx)))?
                    .clone();
                let args = self.pop_many(&site.spec.arg_types)?;
                let result = site.invoke(self.rt, &args).map_err(|err| match site.spec.span {
                    Some(span) => err.with_span(span),
                    None => err,
                })?;
                let ret = site.spec.ret.clone();
                let result = self.conform(result, &ret)?;
                self.push(result, &ret);
            }
            InvokeSuper { owner, params } => {
                let args = self.pop_many(params)?;
                let receiver = self.pop_slot()?;
                let class = self
                    .rt
                    .classes
                    .get(owner)
                    .ok_or_else(|| SprigError::linkage(format!("class {} not found", owner)))?;
                let ctor = class
                    .constructors
                    .iter()
                    .find(|c| &c.params == params)
                    .cloned()
                    .ok_or_else(|| SprigError::linkage(format!("no constructor {}({:?})", owner, params)))?;
                self.rt.invoke_method(&class, &ctor, Some(&receiver), args)?;
            }
            NewInstance { class, params } => {
                let args = self.pop_many(params)?;
                let object = self.rt.new_instance(class, params, args)?;
                self.stack.push(object);
            }
            Box(p) => {
                let value = self.pop(&Ty::Prim(*p))?;
                self.stack.push(value);
            }
            Unbox(p) => {
                let value = self.pop_slot()?;
                let value = self.unbox(value, *p)?;
                self.push(value, &Ty::Prim(*p));
            }
            Convert { from, to } => {
                let value = self.pop(&Ty::Prim(*from))?;
                let converted = match (to, value) {
                    (Prim::Double, Value::Int(n)) => Value::Float(n as f64),
                    (Prim::Long, Value::Float(n)) => Value::Int(n as i64),
                    (_, v) => v,
                };
                self.push(converted, &Ty::Prim(*to));
            }
            CheckCast(class) => {
                let value = self.pop_slot()?;
                if !value.is_nil() && !self.rt.classes.instance_of(&value, class) {
                    return Err(self.class_cast(&value, class));
                }
                self.stack.push(value);
            }
            Truthy => {
                let value = self.pop_slot()?;
                self.stack.push(Value::Bool(value.truthy()));
            }
            HashCode => {
                let value = self.pop_slot()?;
                self.push(Value::Int(value.hash_code() as i64), &Ty::Prim(Prim::Long));
            }
            Equiv => {
                let b = self.pop_slot()?;
                let a = self.pop_slot()?;
                self.stack.push(Value::Bool(a == b));
            }
            InstanceOf(class) => {
                let value = self.pop_slot()?;
                self.stack.push(Value::Bool(self.rt.classes.instance_of(&value, class)));
            }
            IfFalse(label) => match self.pop_slot()? {
                Value::Bool(false) => return Ok(Step::Jump(*label)),
                Value::Bool(true) => {}
                other => return Err(SprigError::internal(format!("branch on non-boolean {}", other))),
            },
            Goto(label) => return Ok(Step::Jump(*label)),
            LookupSwitch { keys, targets, default } => {
                let key = self.pop_switch_key()?;
                let target = keys
                    .iter()
                    .position(|k| *k == key)
                    .and_then(|i| targets.get(i))
                    .unwrap_or(default);
                return Ok(Step::Jump(*target));
            }
            TableSwitch { low, targets, default } => {
                let key = self.pop_switch_key()?;
                let target = key
                    .checked_sub(*low)
                    .and_then(|i| usize::try_from(i).ok())
                    .and_then(|i| targets.get(i))
                    .unwrap_or(default);
                return Ok(Step::Jump(*target));
            }
            MakeCollection { kind, count } => {
                let n = match kind {
                    CollKind::Map => *count as usize * 2,
                    _ => *count as usize,
                };
                let items = self.pop_n(n)?;
                self.stack.push(build_collection(*kind, items)?);
            }
            BuildSpliced { kind, splices } => {
                let parts = self.pop_n(splices.len())?;
                let mut items = Vec::new();
                for (part, spliced) in parts.into_iter().zip(splices) {
                    if *spliced {
                        let elements = part.seq_items().ok_or_else(|| {
                            SprigError::runtime(format!("cannot splice {}", part.type_name()))
                        })?;
                        items.extend(elements);
                    } else {
                        items.push(part);
                    }
                }
                self.stack.push(build_collection(*kind, items)?);
            }
            SwitchNs(name) => {
                let ns = self.rt.set_current_ns(name);
                self.stack.push(Value::Namespace(ns));
            }
            Import(full) => {
                let class = self.rt.import_class(full)?;
                self.stack.push(Value::Class(class));
            }
            Pop => {
                self.pop_slot()?;
            }
            Pop2 => {
                self.pop_n(2)?;
            }
            Dup => {
                let top = self
                    .stack
                    .last()
                    .cloned()
                    .ok_or_else(|| SprigError::internal("operand stack underflow"))?;
                self.stack.push(top);
            }
            Throw => {
                let value = self.pop_slot()?;
                if value.is_nil() {
                    return Err(SprigError::runtime("Cannot throw nil"));
                }
                return Err(SprigError::thrown(value));
            }
            Return(ty) => {
                let value = self.pop(ty)?;
                return Ok(Step::Return(value));
            }
        }
        Ok(Step::Next)
    }

    fn pop_switch_key(&mut self) -> Result<i64, SprigError> {
        match self.pop(&Ty::Prim(Prim::Long))? {
            Value::Int(n) => Ok(n),
            other => Err(SprigError::internal(format!("switch on non-long {}", other))),
        }
    }
}

fn build_collection(kind: CollKind, items: Vec<Value>) -> Result<Value, SprigError> {
    Ok(match kind {
        CollKind::List => Value::List(items.into_iter().collect::<Vector<_>>()),
        CollKind::Vector => Value::Vector(items.into_iter().collect::<Vector<_>>()),
        CollKind::Set => Value::Set(items.into_iter().collect::<HashSet<_>>()),
        CollKind::Map => {
            if items.len() % 2 != 0 {
                return Err(SprigError::runtime("map literal needs an even number of forms"));
            }
            let mut map = HashMap::new();
            let mut iter = items.into_iter();
            while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
                map.insert(k, v);
            }
            Value::Map(map)
        }
    })
}
