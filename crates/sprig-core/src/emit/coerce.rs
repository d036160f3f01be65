use crate::error::SprigError;
use crate::host::{names, ClassRegistry};
use crate::types::{Prim, Ty};
use crate::vm::bytecode::{Constant, Instruction};

fn default_constant(p: Prim) -> Constant {
    match p {
        Prim::Boolean => Constant::Bool(false),
        Prim::Char => Constant::Char('\0'),
        Prim::Long => Constant::Long(0),
        Prim::Double => Constant::Double(0.0),
    }
}

fn pop_for(ty: &Ty) -> Vec<Instruction> {
    match ty.width() {
        0 => vec![],
        1 => vec![Instruction::Pop],
        _ => vec![Instruction::Pop2],
    }
}

/// Instructions turning a value of type `from` on top of the stack into one
/// of type `to`. Conversions that can never succeed are compile errors.
pub fn coerce(from: &Ty, to: &Ty, reg: &ClassRegistry) -> Result<Vec<Instruction>, SprigError> {
    if from == to {
        return Ok(vec![]);
    }
    let fail = || SprigError::compile(format!("cannot convert {} to {}", from, to));
    Ok(match (from, to) {
        (_, Ty::Void) => pop_for(from),
        (Ty::Void, Ty::Prim(p)) => vec![Instruction::Const(default_constant(*p))],
        (Ty::Void, _) => vec![Instruction::Const(Constant::Nil)],
        (Ty::Prim(p), Ty::Prim(q)) => match (p, q) {
            (Prim::Long, Prim::Double) | (Prim::Double, Prim::Long) => {
                vec![Instruction::Convert { from: *p, to: *q }]
            }
            _ => return Err(fail()),
        },
        (Ty::Prim(p), Ty::Any) => vec![Instruction::Box(*p)],
        (Ty::Prim(p), Ty::Class(_)) => {
            let wrapper = Ty::class(p.wrapper());
            if to.is_assignable_from(&wrapper, reg) {
                vec![Instruction::Box(*p)]
            } else if *p == Prim::Long && to.class_name() == Some(names::DOUBLE) {
                vec![Instruction::Convert { from: Prim::Long, to: Prim::Double }, Instruction::Box(Prim::Double)]
            } else {
                return Err(fail());
            }
        }
        (Ty::Any | Ty::Class(_), Ty::Prim(q)) => {
            if from.is_reference() && !unboxable(from, *q, reg) {
                return Err(fail());
            }
            vec![Instruction::Unbox(*q)]
        }
        (Ty::Any | Ty::Class(_), Ty::Any) => vec![],
        (Ty::Any | Ty::Class(_), Ty::Class(name)) => {
            if to.is_assignable_from(from, reg) {
                vec![]
            } else if from == &Ty::Any || Ty::is_assignable_from(from, to, reg) {
                vec![Instruction::CheckCast(name.clone())]
            } else {
                return Err(fail());
            }
        }
    })
}

/// A reference of static type `from` may hold a boxed `q` at run time.
fn unboxable(from: &Ty, q: Prim, reg: &ClassRegistry) -> bool {
    match from {
        Ty::Any => true,
        Ty::Class(name) => {
            reg.is_subclass(q.wrapper(), name) || (q == Prim::Double && name == names::LONG)
        }
        _ => false,
    }
}

/// Whether a user hint of type `hint` may be imposed on a value inferred as
/// `inferred`.
pub fn compatible(hint: &Ty, inferred: &Ty, reg: &ClassRegistry) -> bool {
    coerce(inferred, hint, reg).is_ok() && *hint != Ty::Void
}

/// Conversion for a slot that must stay boxed, such as a loop variable.
pub fn to_boxed(from: &Ty) -> Vec<Instruction> {
    match from {
        Ty::Prim(p) => vec![Instruction::Box(*p)],
        Ty::Void => vec![Instruction::Const(Constant::Nil)],
        _ => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_box_into_references() -> Result<(), SprigError> {
        let reg = ClassRegistry::with_builtins();
        let long = Ty::Prim(Prim::Long);
        assert_eq!(coerce(&long, &Ty::Any, &reg)?, vec![Instruction::Box(Prim::Long)]);
        assert_eq!(coerce(&long, &Ty::class(names::NUMBER), &reg)?, vec![Instruction::Box(Prim::Long)]);
        assert_eq!(coerce(&Ty::Any, &long, &reg)?, vec![Instruction::Unbox(Prim::Long)]);
        assert_eq!(
            coerce(&long, &Ty::Prim(Prim::Double), &reg)?,
            vec![Instruction::Convert { from: Prim::Long, to: Prim::Double }]
        );
        Ok(())
    }

    #[test]
    fn downcasts_are_checked() -> Result<(), SprigError> {
        let reg = ClassRegistry::with_builtins();
        assert_eq!(
            coerce(&Ty::Any, &Ty::string(), &reg)?,
            vec![Instruction::CheckCast(names::STRING.to_string())]
        );
        assert_eq!(coerce(&Ty::string(), &Ty::object(), &reg)?, vec![]);
        assert!(coerce(&Ty::string(), &Ty::class(names::LONG), &reg).is_err());
        Ok(())
    }

    #[test]
    fn hint_compatibility() {
        let reg = ClassRegistry::with_builtins();
        assert!(compatible(&Ty::Prim(Prim::Long), &Ty::Any, &reg));
        assert!(compatible(&Ty::string(), &Ty::Any, &reg));
        assert!(!compatible(&Ty::string(), &Ty::Prim(Prim::Long), &reg));
        assert!(!compatible(&Ty::Prim(Prim::Boolean), &Ty::string(), &reg));
    }

    #[test]
    fn void_results_become_nil() -> Result<(), SprigError> {
        let reg = ClassRegistry::with_builtins();
        assert_eq!(coerce(&Ty::Void, &Ty::Any, &reg)?, vec![Instruction::Const(Constant::Nil)]);
        assert_eq!(coerce(&Ty::Prim(Prim::Double), &Ty::Void, &reg)?, vec![Instruction::Pop2]);
        Ok(())
    }
}
