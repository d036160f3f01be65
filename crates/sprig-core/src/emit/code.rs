use crate::error::SprigError;
use crate::types::Ty;
use crate::vm::bytecode::{Code, Handler, Instruction, LabelId, LocalVar};

/// A reserved position filled in after later code is known, such as the
/// conversion at the end of an `if` branch once both branch types are in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Hole(usize);

enum Item {
    Ins(Instruction),
    Label(LabelId),
    Hole(Hole),
}

struct PendingHandler {
    start: LabelId,
    end: LabelId,
    target: LabelId,
    catch: Option<String>,
    stack_depth: u16,
}

struct PendingLocal {
    name: String,
    slot: u16,
    ty: Ty,
    start: LabelId,
    end: LabelId,
}

#[derive(Default)]
pub struct CodeBuffer {
    items: Vec<Item>,
    labels: u32,
    holes: Vec<Vec<Instruction>>,
    handlers: Vec<PendingHandler>,
    locals: Vec<PendingLocal>,
    next_slot: u16,
    free_slots: Vec<u16>,
    /// Set after an instruction that never falls through; cleared by a label.
    dead: bool,
}

impl CodeBuffer {
    /// `reserved` slots (receiver and parameters) are never reused.
    pub fn new(reserved: u16) -> Self {
        Self {
            next_slot: reserved,
            ..Self::default()
        }
    }

    pub fn push(&mut self, ins: Instruction) {
        self.dead = ins.ends_block();
        self.items.push(Item::Ins(ins));
    }

    pub fn is_dead(&self) -> bool {
        self.dead
    }

    pub fn new_label(&mut self) -> LabelId {
        let id = LabelId(self.labels);
        self.labels += 1;
        id
    }

    pub fn place(&mut self, label: LabelId) {
        self.dead = false;
        self.items.push(Item::Label(label));
    }

    pub fn here(&mut self) -> LabelId {
        let label = self.new_label();
        self.place(label);
        label
    }

    pub fn hole(&mut self) -> Hole {
        let hole = Hole(self.holes.len());
        self.holes.push(Vec::new());
        self.items.push(Item::Hole(hole));
        hole
    }

    pub fn fill_hole(&mut self, hole: Hole, code: Vec<Instruction>) {
        if let Some(slot) = self.holes.get_mut(hole.0) {
            *slot = code;
        }
    }

    pub fn add_handler(&mut self, start: LabelId, end: LabelId, target: LabelId, catch: Option<String>, stack_depth: u16) {
        self.handlers.push(PendingHandler {
            start,
            end,
            target,
            catch,
            stack_depth,
        });
    }

    pub fn alloc_slot(&mut self) -> u16 {
        if let Some(slot) = self.free_slots.pop() {
            return slot;
        }
        let slot = self.next_slot;
        self.next_slot += 1;
        slot
    }

    /// Returns a slot to the pool once its binding is out of scope.
    pub fn free_slot(&mut self, slot: u16) {
        if !self.free_slots.contains(&slot) {
            self.free_slots.push(slot);
        }
    }

    pub fn describe_local(&mut self, name: &str, slot: u16, ty: Ty, start: LabelId, end: LabelId) {
        self.locals.push(PendingLocal {
            name: name.to_string(),
            slot,
            ty,
            start,
            end,
        });
    }

    pub fn finish(self, max_stack: u16) -> Result<Code, SprigError> {
        let mut labels = vec![usize::MAX; self.labels as usize];
        let mut instructions = Vec::with_capacity(self.items.len());
        let mut holes = self.holes;
        for item in self.items {
            match item {
                Item::Ins(ins) => instructions.push(ins),
                Item::Label(id) => labels[id.0 as usize] = instructions.len(),
                Item::Hole(hole) => instructions.append(&mut holes[hole.0]),
            }
        }
        let pc = |label: LabelId| -> Result<usize, SprigError> {
            labels
                .get(label.0 as usize)
                .copied()
                .filter(|pc| *pc != usize::MAX)
                .ok_or_else(|| SprigError::internal(format!("label L{} never placed", label.0)))
        };
        for ins in &instructions {
            for target in ins.branch_targets() {
                pc(target)?;
            }
        }
        let handlers = self
            .handlers
            .iter()
            .map(|h| {
                Ok(Handler {
                    start: pc(h.start)?,
                    end: pc(h.end)?,
                    target: pc(h.target)?,
                    catch: h.catch.clone(),
                    stack_depth: h.stack_depth,
                })
            })
            .collect::<Result<Vec<_>, SprigError>>()?;
        let local_vars = self
            .locals
            .iter()
            .map(|l| {
                Ok(LocalVar {
                    name: l.name.clone(),
                    slot: l.slot,
                    ty: l.ty.clone(),
                    start: pc(l.start)?,
                    end: pc(l.end)?,
                })
            })
            .collect::<Result<Vec<_>, SprigError>>()?;
        Ok(Code {
            instructions,
            labels,
            handlers,
            local_vars,
            max_stack,
            max_locals: self.next_slot,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::bytecode::Constant;

    #[test]
    fn holes_expand_in_place() -> Result<(), SprigError> {
        let mut buf = CodeBuffer::new(0);
        buf.push(Instruction::Const(Constant::Long(1)));
        let hole = buf.hole();
        let end = buf.new_label();
        buf.place(end);
        buf.push(Instruction::Return(Ty::Any));
        buf.fill_hole(hole, vec![Instruction::Box(crate::types::Prim::Long)]);
        let code = buf.finish(2)?;
        assert_eq!(code.instructions.len(), 3);
        assert_eq!(code.label_pc(end), Some(2));
        Ok(())
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut buf = CodeBuffer::new(2);
        let a = buf.alloc_slot();
        let b = buf.alloc_slot();
        assert_eq!((a, b), (2, 3));
        buf.free_slot(a);
        assert_eq!(buf.alloc_slot(), 2);
        assert_eq!(buf.alloc_slot(), 4);
    }

    #[test]
    fn unplaced_labels_are_internal_errors() {
        let mut buf = CodeBuffer::new(0);
        let label = buf.new_label();
        buf.push(Instruction::Goto(label));
        assert!(matches!(buf.finish(0), Err(SprigError::Internal(_))));
    }
}
