use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ast::Datum;
use crate::error::SprigError;
use crate::host::names;
use crate::link::CallSiteSpec;
use crate::namespaces::VarFlags;
use crate::types::{Prim, Ty};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LabelId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollKind {
    List,
    Vector,
    Map,
    Set,
}

impl CollKind {
    pub fn class_name(self) -> &'static str {
        match self {
            CollKind::List => names::LIST,
            CollKind::Vector => names::VECTOR,
            CollKind::Map => names::MAP,
            CollKind::Set => names::SET,
        }
    }
}

/// Constant-pool entries. `Quoted` carries literal data that is rebuilt into a
/// value when the instruction runs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Nil,
    Bool(bool),
    Char(char),
    Long(i64),
    Double(f64),
    Str(String),
    Keyword(String),
    Symbol(String),
    Regex(String),
    Class(String),
    Namespace(String),
    Quoted(Datum),
}

impl Constant {
    pub fn ty(&self) -> Ty {
        match self {
            Constant::Nil => Ty::Any,
            Constant::Bool(_) => Ty::Prim(Prim::Boolean),
            Constant::Char(_) => Ty::Prim(Prim::Char),
            Constant::Long(_) => Ty::Prim(Prim::Long),
            Constant::Double(_) => Ty::Prim(Prim::Double),
            Constant::Str(_) => Ty::string(),
            Constant::Keyword(_) => Ty::class(names::KEYWORD),
            Constant::Symbol(_) => Ty::class(names::SYMBOL),
            Constant::Regex(_) => Ty::class(names::PATTERN),
            Constant::Class(_) => Ty::class(names::CLASS),
            Constant::Namespace(_) => Ty::class(names::NAMESPACE),
            Constant::Quoted(datum) => match &datum.kind {
                crate::ast::DatumKind::List(_) => Ty::class(names::LIST),
                crate::ast::DatumKind::Vector(_) => Ty::class(names::VECTOR),
                crate::ast::DatumKind::Map(_) => Ty::class(names::MAP),
                crate::ast::DatumKind::Set(_) => Ty::class(names::SET),
                _ => Ty::Any,
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    Nop,
    Const(Constant),
    Load { slot: u16, ty: Ty },
    Store { slot: u16, ty: Ty },
    GetField { owner: String, name: String, ty: Ty },
    PutField { owner: String, name: String, ty: Ty },
    GetStatic { owner: String, name: String, ty: Ty },
    /// Pushes the var object itself.
    VarRef { ns: String, name: String },
    /// Binds the var, popping the root value when `init` is set; pushes the var.
    DefVar { ns: String, name: String, flags: VarFlags, init: bool },
    /// Rebinds an existing var, leaving the value on the stack.
    SetVar { ns: String, name: String },
    InvokeDynamic(u32),
    /// Runs a superclass constructor on the receiver below the arguments.
    InvokeSuper { owner: String, params: Vec<Ty> },
    NewInstance { class: String, params: Vec<Ty> },
    Box(Prim),
    Unbox(Prim),
    Convert { from: Prim, to: Prim },
    CheckCast(String),
    Truthy,
    HashCode,
    Equiv,
    InstanceOf(String),
    IfFalse(LabelId),
    Goto(LabelId),
    LookupSwitch { keys: Vec<i64>, targets: Vec<LabelId>, default: LabelId },
    TableSwitch { low: i64, targets: Vec<LabelId>, default: LabelId },
    MakeCollection { kind: CollKind, count: u16 },
    /// Builds a collection from stack items; flagged items are sequences
    /// whose elements are spliced in.
    BuildSpliced { kind: CollKind, splices: Vec<bool> },
    SwitchNs(String),
    Import(String),
    Pop,
    Pop2,
    Dup,
    Throw,
    Return(Ty),
}

/// Operand-stack behaviour of one instruction. Shared by the compiler's
/// type stack and the verifier so the two cannot disagree.
#[derive(Clone, Debug, PartialEq)]
pub enum StackEffect {
    Ops { pops: Vec<Ty>, push: Option<Ty> },
    DupTop,
}

impl StackEffect {
    fn ops(pops: Vec<Ty>, push: Option<Ty>) -> Self {
        StackEffect::Ops { pops, push }
    }
}

fn long() -> Ty {
    Ty::Prim(Prim::Long)
}

fn boolean() -> Ty {
    Ty::Prim(Prim::Boolean)
}

impl Instruction {
    pub fn stack_effect(&self, sites: &[CallSiteSpec]) -> Result<StackEffect, SprigError> {
        use Instruction::*;
        Ok(match self {
            Nop | Goto(_) => StackEffect::ops(vec![], None),
            Const(c) => StackEffect::ops(vec![], Some(c.ty())),
            Load { ty, .. } => StackEffect::ops(vec![], Some(ty.clone())),
            Store { ty, .. } => StackEffect::ops(vec![ty.clone()], None),
            GetField { ty, .. } => StackEffect::ops(vec![Ty::Any], Some(ty.clone())),
            PutField { ty, .. } => StackEffect::ops(vec![Ty::Any, ty.clone()], None),
            GetStatic { ty, .. } => StackEffect::ops(vec![], Some(ty.clone())),
            VarRef { .. } => StackEffect::ops(vec![], Some(Ty::class(names::VAR))),
            DefVar { init, .. } => StackEffect::ops(
                if *init { vec![Ty::Any] } else { vec![] },
                Some(Ty::class(names::VAR)),
            ),
            SetVar { .. } => StackEffect::ops(vec![Ty::Any], Some(Ty::Any)),
            InvokeDynamic(idx) => {
                let spec = sites.get(*idx as usize).ok_or_else(|| {
                    SprigError::class_format(format!("call site {} out of range", idx))
                })?;
                let push = if spec.ret == Ty::Void { None } else { Some(spec.ret.clone()) };
                StackEffect::ops(spec.arg_types.clone(), push)
            }
            InvokeSuper { params, .. } => {
                let mut pops = vec![Ty::Any];
                pops.extend(params.iter().cloned());
                StackEffect::ops(pops, None)
            }
            NewInstance { class, params } => {
                StackEffect::ops(params.clone(), Some(Ty::Class(class.clone())))
            }
            Box(p) => StackEffect::ops(vec![Ty::Prim(*p)], Some(Ty::class(p.wrapper()))),
            Unbox(p) => StackEffect::ops(vec![Ty::Any], Some(Ty::Prim(*p))),
            Convert { from, to } => StackEffect::ops(vec![Ty::Prim(*from)], Some(Ty::Prim(*to))),
            CheckCast(class) => StackEffect::ops(vec![Ty::Any], Some(Ty::Class(class.clone()))),
            Truthy => StackEffect::ops(vec![Ty::Any], Some(boolean())),
            HashCode => StackEffect::ops(vec![Ty::Any], Some(long())),
            Equiv => StackEffect::ops(vec![Ty::Any, Ty::Any], Some(boolean())),
            InstanceOf(_) => StackEffect::ops(vec![Ty::Any], Some(boolean())),
            IfFalse(_) => StackEffect::ops(vec![boolean()], None),
            LookupSwitch { .. } | TableSwitch { .. } => StackEffect::ops(vec![long()], None),
            MakeCollection { kind, count } => {
                let n = match kind {
                    CollKind::Map => *count as usize * 2,
                    _ => *count as usize,
                };
                StackEffect::ops(vec![Ty::Any; n], Some(Ty::class(kind.class_name())))
            }
            BuildSpliced { kind, splices } => StackEffect::ops(
                vec![Ty::Any; splices.len()],
                Some(Ty::class(kind.class_name())),
            ),
            SwitchNs(_) => StackEffect::ops(vec![], Some(Ty::class(names::NAMESPACE))),
            Import(_) => StackEffect::ops(vec![], Some(Ty::class(names::CLASS))),
            Pop => StackEffect::ops(vec![Ty::Any], None),
            Pop2 => StackEffect::ops(vec![long()], None),
            Dup => StackEffect::DupTop,
            Throw => StackEffect::ops(vec![Ty::Any], None),
            Return(ty) => StackEffect::ops(
                if *ty == Ty::Void { vec![] } else { vec![ty.clone()] },
                None,
            ),
        })
    }

    /// Control never continues to the next instruction.
    pub fn ends_block(&self) -> bool {
        matches!(
            self,
            Instruction::Goto(_)
                | Instruction::LookupSwitch { .. }
                | Instruction::TableSwitch { .. }
                | Instruction::Throw
                | Instruction::Return(_)
        )
    }

    pub fn branch_targets(&self) -> Vec<LabelId> {
        match self {
            Instruction::IfFalse(l) | Instruction::Goto(l) => vec![*l],
            Instruction::LookupSwitch { targets, default, .. }
            | Instruction::TableSwitch { targets, default, .. } => {
                let mut out = targets.clone();
                out.push(*default);
                out
            }
            _ => Vec::new(),
        }
    }

    pub fn local_slot(&self) -> Option<u16> {
        match self {
            Instruction::Load { slot, .. } | Instruction::Store { slot, .. } => Some(*slot),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Const(c) => write!(f, "const {:?}", c),
            Instruction::Load { slot, ty } => write!(f, "load {} {}", slot, ty),
            Instruction::Store { slot, ty } => write!(f, "store {} {}", slot, ty),
            Instruction::InvokeDynamic(idx) => write!(f, "invokedynamic #{}", idx),
            Instruction::IfFalse(l) => write!(f, "iffalse L{}", l.0),
            Instruction::Goto(l) => write!(f, "goto L{}", l.0),
            other => write!(f, "{:?}", other),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Handler {
    pub start: usize,
    pub end: usize,
    pub target: usize,
    /// `None` catches everything catchable.
    pub catch: Option<String>,
    /// Operand-stack depth, in slots, the handler expects below the exception.
    pub stack_depth: u16,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalVar {
    pub name: String,
    pub slot: u16,
    pub ty: Ty,
    pub start: usize,
    pub end: usize,
}

/// A finished method body. Branches refer to labels, `labels[id]` being the
/// instruction index the label was placed at.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Code {
    pub instructions: Vec<Instruction>,
    pub labels: Vec<usize>,
    pub handlers: Vec<Handler>,
    pub local_vars: Vec<LocalVar>,
    pub max_stack: u16,
    pub max_locals: u16,
}

impl Code {
    pub fn label_pc(&self, label: LabelId) -> Option<usize> {
        self.labels.get(label.0 as usize).copied()
    }

    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        for (pc, ins) in self.instructions.iter().enumerate() {
            for (id, _) in self.labels.iter().enumerate().filter(|(_, at)| **at == pc) {
                out.push_str(&format!("L{}:\n", id));
            }
            out.push_str(&format!("  {:4} {}\n", pc, ins));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_constants_push_wide_types() -> Result<(), SprigError> {
        let effect = Instruction::Const(Constant::Long(1)).stack_effect(&[])?;
        assert_eq!(effect, StackEffect::Ops { pops: vec![], push: Some(long()) });
        let effect = Instruction::MakeCollection { kind: CollKind::Map, count: 2 }.stack_effect(&[])?;
        match effect {
            StackEffect::Ops { pops, .. } => assert_eq!(pops.len(), 4),
            other => panic!("unexpected {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn missing_call_site_is_a_format_error() {
        let err = Instruction::InvokeDynamic(3).stack_effect(&[]).unwrap_err();
        assert!(matches!(err, SprigError::ClassFormat(_)));
    }

    #[test]
    fn terminators() {
        assert!(Instruction::Throw.ends_block());
        assert!(Instruction::Goto(LabelId(0)).ends_block());
        assert!(!Instruction::IfFalse(LabelId(0)).ends_block());
        let switch = Instruction::TableSwitch {
            low: 0,
            targets: vec![LabelId(1), LabelId(2)],
            default: LabelId(3),
        };
        assert_eq!(switch.branch_targets().len(), 3);
    }
}
