use std::sync::Arc;

use tracing::debug;

use crate::compiler::stack::MethodStack;
use crate::compiler::state::{ClassContext, ClosureRecord};
use crate::emit::class_file::{FieldDef, MethodDef};
use crate::emit::code::CodeBuffer;
use crate::error::SprigError;
use crate::host::{names, ClassInfo};
use crate::runtime::Runtime;
use crate::types::Ty;
use crate::vm::bytecode::{Code, Instruction};

/// How the generated constructor initializes the instance.
#[derive(Clone, Debug)]
pub enum CtorPlan {
    /// No constructor: the class only has static methods.
    None,
    /// Superclass no-arg constructor, then the captured bindings.
    Captures,
    /// Declared fields taken in order from the arguments.
    Fields(Vec<(String, Ty)>),
    /// The given superclass constructor receives the leading arguments;
    /// captured bindings follow them.
    Super { params: Vec<Ty> },
}

fn straight_line(reserved: u16, code: Vec<Instruction>) -> Result<Code, SprigError> {
    let mut buf = CodeBuffer::new(reserved);
    let mut stack = MethodStack::new();
    for ins in code {
        stack.apply(&ins.stack_effect(&[])?)?;
        buf.push(ins);
    }
    buf.finish(stack.max())
}

fn constructor(class: &ClassContext, plan: &CtorPlan) -> Result<Option<MethodDef>, SprigError> {
    let owner = class.file.name.clone();
    let (super_params, own): (Vec<Ty>, Vec<(String, Ty)>) = match plan {
        CtorPlan::None => return Ok(None),
        CtorPlan::Captures => (Vec::new(), Vec::new()),
        CtorPlan::Fields(fields) => (Vec::new(), fields.clone()),
        CtorPlan::Super { params } => (params.clone(), Vec::new()),
    };
    let captured = class.closures.iter().map(|c| (c.field.clone(), c.ty.clone()));
    let stored: Vec<(String, Ty)> = own.into_iter().chain(captured).collect();

    let mut code = vec![Instruction::Load { slot: 0, ty: Ty::class(&owner) }];
    for (i, ty) in super_params.iter().enumerate() {
        code.push(Instruction::Load { slot: 1 + i as u16, ty: ty.clone() });
    }
    code.push(Instruction::InvokeSuper {
        owner: class.file.superclass.clone(),
        params: super_params.clone(),
    });
    let base = 1 + super_params.len() as u16;
    for (i, (name, ty)) in stored.iter().enumerate() {
        code.push(Instruction::Load { slot: 0, ty: Ty::class(&owner) });
        code.push(Instruction::Load { slot: base + i as u16, ty: ty.clone() });
        code.push(Instruction::PutField {
            owner: owner.clone(),
            name: name.clone(),
            ty: ty.clone(),
        });
    }
    code.push(Instruction::Return(Ty::Void));

    let mut params = super_params;
    params.extend(stored.iter().map(|(_, ty)| ty.clone()));
    let mut param_names: Vec<String> = (0..params.len() - stored.len()).map(|i| format!("arg{}", i)).collect();
    param_names.extend(stored.iter().map(|(name, _)| name.clone()));
    let body = straight_line(params.len() as u16 + 1, code)?;
    Ok(Some(MethodDef {
        name: names::INIT.to_string(),
        params,
        param_names,
        ret: Ty::Void,
        is_static: false,
        is_varargs: false,
        code: Some(body),
    }))
}

/// Adds capture fields and the constructor, then defines the class. The
/// captures are returned in constructor order so the caller can supply them.
pub fn finish_class(
    rt: &Runtime,
    mut class: ClassContext,
    plan: CtorPlan,
) -> Result<(Arc<ClassInfo>, Vec<ClosureRecord>), SprigError> {
    if let CtorPlan::Fields(fields) = &plan {
        for (name, ty) in fields {
            if !class.file.fields.iter().any(|f| &f.name == name) {
                class.file.fields.push(FieldDef {
                    name: name.clone(),
                    ty: ty.clone(),
                    is_static: false,
                    mutable: false,
                    constant: None,
                });
            }
        }
    }
    for record in &class.closures {
        class.file.fields.push(FieldDef {
            name: record.field.clone(),
            ty: record.ty.clone(),
            is_static: false,
            mutable: false,
            constant: None,
        });
    }
    if let Some(ctor) = constructor(&class, &plan)? {
        class.file.methods.push(ctor);
    }
    debug!(
        class = %class.file.name,
        methods = class.file.methods.len(),
        captures = class.closures.len(),
        "finished class"
    );
    let bytes = class.file.to_bytes()?;
    let info = rt.define_class(&bytes)?;
    Ok((info, class.closures))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::state::ClassMode;
    use crate::emit::class_file::ClassFile;
    use crate::value::Value;

    #[test]
    fn captures_become_constructor_parameters() -> Result<(), SprigError> {
        let rt = Runtime::new();
        let mut class = ClassContext::new(ClassFile::new("user$fn__t1", names::OBJECT), ClassMode::Closure);
        class.closures.push(ClosureRecord {
            name: "x".into(),
            field: "x".into(),
            ty: Ty::Any,
        });
        let (info, captures) = finish_class(&rt, class, CtorPlan::Captures)?;
        assert_eq!(captures.len(), 1);
        assert_eq!(info.constructors.len(), 1);
        assert_eq!(info.constructors[0].params, vec![Ty::Any]);
        let obj = rt.new_instance(&info.name, &[Ty::Any], vec![Value::Int(5)])?;
        match obj {
            Value::Object(inst) => assert_eq!(inst.get_field("x")?, Value::Int(5)),
            other => panic!("unexpected {}", other),
        }
        Ok(())
    }

    #[test]
    fn declared_fields_are_initialized_in_order() -> Result<(), SprigError> {
        let rt = Runtime::new();
        let class = ClassContext::new(ClassFile::new("user.Point", names::OBJECT), ClassMode::DefType);
        let fields = vec![("x".to_string(), Ty::Any), ("y".to_string(), Ty::Any)];
        let (info, _) = finish_class(&rt, class, CtorPlan::Fields(fields))?;
        let obj = rt.new_instance(&info.name, &[Ty::Any, Ty::Any], vec![Value::Int(1), Value::Int(2)])?;
        match obj {
            Value::Object(inst) => assert_eq!(inst.get_field("y")?, Value::Int(2)),
            other => panic!("unexpected {}", other),
        }
        Ok(())
    }
}
