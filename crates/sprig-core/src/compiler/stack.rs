use crate::error::SprigError;
use crate::types::Ty;
use crate::vm::bytecode::StackEffect;

#[derive(Clone, Debug, PartialEq)]
pub enum StackRecord {
    Typed { ty: Ty, is_constant: bool },
    /// Control never reaches this point, e.g. after `recur` or `throw`.
    Unreachable,
}

impl StackRecord {
    pub fn typed(ty: Ty) -> Self {
        StackRecord::Typed { ty, is_constant: false }
    }

    pub fn width(&self) -> u16 {
        match self {
            StackRecord::Typed { ty, .. } => ty.width(),
            StackRecord::Unreachable => 0,
        }
    }
}

/// One record per logical value; depth is measured in machine slots so it can
/// be compared with what the interpreter sees.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MethodStack {
    records: Vec<StackRecord>,
    max: u16,
}

impl MethodStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, ty: Ty, is_constant: bool) {
        self.records.push(StackRecord::Typed { ty, is_constant });
        self.max = self.max.max(self.depth());
    }

    pub fn push_unreachable(&mut self) {
        self.records.push(StackRecord::Unreachable);
    }

    pub fn pop(&mut self) -> Result<StackRecord, SprigError> {
        self.records
            .pop()
            .ok_or_else(|| SprigError::internal("compile-time operand stack underflow"))
    }

    pub fn peek(&self) -> Option<&StackRecord> {
        self.records.last()
    }

    /// Static type of the top value; `None` when empty or unreachable.
    pub fn top_type(&self) -> Option<&Ty> {
        match self.records.last() {
            Some(StackRecord::Typed { ty, .. }) => Some(ty),
            _ => None,
        }
    }

    pub fn top_is_constant(&self) -> bool {
        matches!(self.records.last(), Some(StackRecord::Typed { is_constant: true, .. }))
    }

    /// Types of the top `n` values, deepest first.
    pub fn top_types(&self, n: usize) -> Result<Vec<Ty>, SprigError> {
        if n > self.records.len() {
            return Err(SprigError::internal("compile-time operand stack underflow"));
        }
        self.records[self.records.len() - n..]
            .iter()
            .map(|r| match r {
                StackRecord::Typed { ty, .. } => Ok(ty.clone()),
                StackRecord::Unreachable => Err(SprigError::internal("unreachable value used as operand")),
            })
            .collect()
    }

    pub fn is_unreachable(&self) -> bool {
        self.records.iter().any(|r| *r == StackRecord::Unreachable)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Depth in machine slots.
    pub fn depth(&self) -> u16 {
        self.records.iter().map(StackRecord::width).sum()
    }

    pub fn max(&self) -> u16 {
        self.max
    }

    pub fn snapshot(&self) -> Vec<StackRecord> {
        self.records.clone()
    }

    pub fn restore(&mut self, records: Vec<StackRecord>) {
        self.records = records;
        self.max = self.max.max(self.depth());
    }

    /// Flags the top value as a folded constant.
    pub fn mark_constant(&mut self) {
        if let Some(StackRecord::Typed { is_constant, .. }) = self.records.last_mut() {
            *is_constant = true;
        }
    }

    pub fn replace_top(&mut self, ty: Ty) -> Result<(), SprigError> {
        self.pop()?;
        self.push(ty, false);
        Ok(())
    }

    /// Applies one instruction's effect. Widths must agree exactly; a
    /// mismatch means the emitted code would corrupt the machine stack.
    pub fn apply(&mut self, effect: &StackEffect) -> Result<(), SprigError> {
        if self.is_unreachable() {
            return Ok(());
        }
        match effect {
            StackEffect::DupTop => {
                let top = self
                    .peek()
                    .cloned()
                    .ok_or_else(|| SprigError::internal("dup on empty stack"))?;
                if top.width() != 1 {
                    return Err(SprigError::internal("dup of a wide value"));
                }
                self.records.push(top);
                self.max = self.max.max(self.depth());
            }
            StackEffect::Ops { pops, push } => {
                for expected in pops.iter().rev() {
                    let record = self.pop()?;
                    if record.width() != expected.width() {
                        return Err(SprigError::internal(format!(
                            "operand width mismatch: expected {}, found {:?}",
                            expected, record
                        )));
                    }
                }
                if let Some(ty) = push {
                    self.push(ty.clone(), false);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Prim;

    #[test]
    fn depth_counts_wide_values_twice() {
        let mut stack = MethodStack::new();
        stack.push(Ty::Prim(Prim::Long), true);
        stack.push(Ty::Any, false);
        assert_eq!(stack.len(), 2);
        assert_eq!(stack.depth(), 3);
        assert_eq!(stack.max(), 3);
        assert!(!stack.top_is_constant());
    }

    #[test]
    fn width_mismatch_is_internal() {
        let mut stack = MethodStack::new();
        stack.push(Ty::Prim(Prim::Double), false);
        let effect = StackEffect::Ops { pops: vec![Ty::Any], push: None };
        assert!(matches!(stack.apply(&effect), Err(SprigError::Internal(_))));
    }

    #[test]
    fn unreachable_absorbs_effects() -> Result<(), SprigError> {
        let mut stack = MethodStack::new();
        stack.push_unreachable();
        stack.apply(&StackEffect::Ops { pops: vec![Ty::Any, Ty::Any], push: Some(Ty::Any) })?;
        assert!(stack.is_unreachable());
        assert_eq!(stack.depth(), 0);
        Ok(())
    }

    #[test]
    fn snapshots_restore_exactly() {
        let mut stack = MethodStack::new();
        stack.push(Ty::string(), false);
        let saved = stack.snapshot();
        stack.push(Ty::Prim(Prim::Long), false);
        stack.push_unreachable();
        stack.restore(saved);
        assert_eq!(stack.top_type(), Some(&Ty::string()));
        assert_eq!(stack.depth(), 1);
    }
}
