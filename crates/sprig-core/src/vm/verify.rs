//! Structural verification of method bodies before a class is defined.
//!
//! The check is depth-only: every reachable instruction is visited with the
//! operand-stack depth (in slots) it would see, and every path into an
//! instruction must agree on that depth.

use std::collections::VecDeque;

use thiserror::Error;

use super::bytecode::{Code, Instruction, LabelId, StackEffect};
use crate::emit::class_file::{ClassFile, MethodDef};
use crate::error::SprigError;
use crate::link::CallSiteSpec;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VerifyError {
    #[error("{method}: stack underflow at {pc}")]
    Underflow { method: String, pc: usize },
    #[error("{method}: inconsistent stack depth at {pc} ({expected} vs {found})")]
    DepthMismatch { method: String, pc: usize, expected: u16, found: u16 },
    #[error("{method}: branch to unplaced label L{label} at {pc}")]
    BadLabel { method: String, pc: usize, label: u32 },
    #[error("{method}: local slot {slot} out of range at {pc}")]
    BadLocal { method: String, pc: usize, slot: u16 },
    #[error("{method}: control falls off the end of the code")]
    FallOff { method: String },
    #[error("{method}: needs {needed} stack slots, declares {declared}")]
    StackOverflow { method: String, needed: u16, declared: u16 },
    #[error("{method}: bad exception handler {index}")]
    BadHandler { method: String, index: usize },
    #[error("{method}: {message}")]
    Malformed { method: String, message: String },
}

impl From<VerifyError> for SprigError {
    fn from(err: VerifyError) -> Self {
        SprigError::class_format(err.to_string())
    }
}

pub fn verify_class(class: &ClassFile) -> Result<(), VerifyError> {
    for method in &class.methods {
        if let Some(code) = &method.code {
            let name = format!("{}.{}", class.name, method.name);
            let max = max_stack(&name, method, code, &class.call_sites)?;
            if max > code.max_stack {
                return Err(VerifyError::StackOverflow {
                    method: name,
                    needed: max,
                    declared: code.max_stack,
                });
            }
        }
    }
    Ok(())
}

fn effect_delta(ins: &Instruction, sites: &[CallSiteSpec], depth: u16) -> Option<(u16, u16)> {
    // (slots popped, slots pushed)
    match ins.stack_effect(sites).ok()? {
        StackEffect::DupTop => (depth >= 1).then_some((0, 1)),
        StackEffect::Ops { pops, push } => {
            let popped: u16 = pops.iter().map(|t| t.width()).sum();
            Some((popped, push.map(|t| t.width()).unwrap_or(0)))
        }
    }
}

/// Computes the deepest operand stack any reachable path needs.
pub fn max_stack(name: &str, method: &MethodDef, code: &Code, sites: &[CallSiteSpec]) -> Result<u16, VerifyError> {
    let len = code.instructions.len();
    let malformed = |message: String| VerifyError::Malformed {
        method: name.to_string(),
        message,
    };
    let locals_needed = method.params.len() as u16 + u16::from(!method.is_static);
    if code.max_locals < locals_needed {
        return Err(malformed(format!(
            "max_locals {} below {} parameter slots",
            code.max_locals, locals_needed
        )));
    }
    let target_pc = |pc: usize, label: LabelId| -> Result<usize, VerifyError> {
        code.label_pc(label)
            .filter(|t| *t <= len)
            .ok_or(VerifyError::BadLabel {
                method: name.to_string(),
                pc,
                label: label.0,
            })
    };
    for (index, h) in code.handlers.iter().enumerate() {
        if h.start > h.end || h.end > len || h.target >= len {
            return Err(VerifyError::BadHandler {
                method: name.to_string(),
                index,
            });
        }
    }

    let mut depth_at: Vec<Option<u16>> = vec![None; len + 1];
    let mut queue = VecDeque::new();
    let mut max = 0u16;
    let enqueue = |pc: usize, depth: u16, depth_at: &mut Vec<Option<u16>>, queue: &mut VecDeque<usize>| {
        match depth_at[pc] {
            Some(expected) if expected != depth => Err(VerifyError::DepthMismatch {
                method: name.to_string(),
                pc,
                expected,
                found: depth,
            }),
            Some(_) => Ok(()),
            None => {
                depth_at[pc] = Some(depth);
                queue.push_back(pc);
                Ok(())
            }
        }
    };
    enqueue(0, 0, &mut depth_at, &mut queue)?;
    while let Some(pc) = queue.pop_front() {
        let depth = depth_at[pc].unwrap_or(0);
        max = max.max(depth);
        if pc == len {
            return Err(VerifyError::FallOff {
                method: name.to_string(),
            });
        }
        for h in code.handlers.iter().filter(|h| h.start <= pc && pc < h.end) {
            if depth < h.stack_depth {
                return Err(VerifyError::DepthMismatch {
                    method: name.to_string(),
                    pc,
                    expected: h.stack_depth,
                    found: depth,
                });
            }
            max = max.max(h.stack_depth + 1);
            enqueue(h.target, h.stack_depth + 1, &mut depth_at, &mut queue)?;
        }
        let ins = &code.instructions[pc];
        if let Some(slot) = ins.local_slot() {
            if slot >= code.max_locals {
                return Err(VerifyError::BadLocal {
                    method: name.to_string(),
                    pc,
                    slot,
                });
            }
        }
        let (popped, pushed) = effect_delta(ins, sites, depth)
            .ok_or_else(|| malformed(format!("no stack effect for {} at {}", ins, pc)))?;
        if popped > depth {
            return Err(VerifyError::Underflow {
                method: name.to_string(),
                pc,
            });
        }
        let after = depth - popped + pushed;
        max = max.max(after);
        for label in ins.branch_targets() {
            let target = target_pc(pc, label)?;
            enqueue(target, after, &mut depth_at, &mut queue)?;
        }
        if !ins.ends_block() {
            enqueue(pc + 1, after, &mut depth_at, &mut queue)?;
        }
    }
    Ok(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Prim, Ty};
    use crate::vm::bytecode::Constant;

    fn method(code: Code) -> ClassFile {
        let mut class = ClassFile::new("t$Verify", crate::host::names::OBJECT);
        class.methods.push(MethodDef {
            name: "run".into(),
            params: vec![],
            param_names: vec![],
            ret: Ty::Any,
            is_static: true,
            is_varargs: false,
            code: Some(code),
        });
        class
    }

    #[test]
    fn wide_values_take_two_slots() {
        let code = Code {
            instructions: vec![
                Instruction::Const(Constant::Long(1)),
                Instruction::Box(Prim::Long),
                Instruction::Return(Ty::Any),
            ],
            max_stack: 1,
            ..Code::default()
        };
        assert!(matches!(
            verify_class(&method(code)),
            Err(VerifyError::StackOverflow { needed: 2, .. })
        ));
    }

    #[test]
    fn merge_points_must_agree() {
        let code = Code {
            instructions: vec![
                Instruction::Const(Constant::Bool(true)),
                Instruction::IfFalse(LabelId(0)),
                Instruction::Const(Constant::Nil),
                Instruction::Const(Constant::Nil),
                Instruction::Const(Constant::Nil),
                Instruction::Return(Ty::Any),
            ],
            labels: vec![4],
            max_stack: 4,
            ..Code::default()
        };
        assert!(matches!(
            verify_class(&method(code)),
            Err(VerifyError::DepthMismatch { .. })
        ));
    }

    #[test]
    fn falling_off_the_end_is_rejected() {
        let code = Code {
            instructions: vec![Instruction::Const(Constant::Nil), Instruction::Pop],
            max_stack: 1,
            ..Code::default()
        };
        assert!(matches!(verify_class(&method(code)), Err(VerifyError::FallOff { .. })));
    }

    #[test]
    fn well_formed_code_passes() {
        let code = Code {
            instructions: vec![
                Instruction::Const(Constant::Str("x".into())),
                Instruction::Dup,
                Instruction::Pop,
                Instruction::Return(Ty::string()),
            ],
            max_stack: 2,
            ..Code::default()
        };
        assert_eq!(verify_class(&method(code)), Ok(()));
    }
}
