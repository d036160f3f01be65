use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use super::loops::LoopTarget;
use super::scopes::{Frame, Scopes, Slot, VarScope};
use super::stack::MethodStack;
use super::Diagnostic;
use crate::ast::{Datum, Span};
use crate::emit::class_file::ClassFile;
use crate::emit::code::CodeBuffer;
use crate::error::{SprigError, WARN_TAG};
use crate::host::ClassInfo;
use crate::link::CallSiteSpec;
use crate::runtime::Runtime;
use crate::symbols::munge;
use crate::types::Ty;
use crate::value::Value;
use crate::vm::bytecode::Instruction;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClassMode {
    DefType,
    Closure,
    AnonClass,
}

/// A lexical binding an inner class captured as a constructor-initialized
/// field.
#[derive(Clone, Debug, PartialEq)]
pub struct ClosureRecord {
    pub name: String,
    pub field: String,
    pub ty: Ty,
}

pub struct ClassContext {
    pub file: ClassFile,
    pub mode: ClassMode,
    pub closures: Vec<ClosureRecord>,
}

impl ClassContext {
    pub fn new(file: ClassFile, mode: ClassMode) -> Self {
        Self {
            file,
            mode,
            closures: Vec::new(),
        }
    }
}

pub struct MethodContext {
    pub code: CodeBuffer,
    pub stack: MethodStack,
    pub try_depth: usize,
    /// Index into `CompilerState::classes` of the class owning this method.
    pub owner: usize,
}

/// A `fn` class defined while interpreting, reused when the same form is
/// evaluated again with the same names in scope.
pub struct InterpretedFn {
    pub form: Datum,
    pub ns: String,
    pub locals: Vec<String>,
    pub class: Arc<ClassInfo>,
    pub captures: Vec<ClosureRecord>,
}

pub struct CompilerState {
    pub rt: Arc<Runtime>,
    pub scopes: Scopes,
    pub classes: Vec<ClassContext>,
    pub methods: Vec<MethodContext>,
    pub loops: Vec<LoopTarget>,
    /// The form being compiled is in tail position of its method.
    pub tail: bool,
    /// Set by an interpreted `recur`; consumed by the enclosing loop.
    pub recur_signal: Option<Vec<Value>>,
    /// `x#` names generated inside each open syntax-quote.
    pub gensym_envs: Vec<HashMap<String, String>>,
    pub eval_try_depth: usize,
    pub fn_classes: HashMap<Span, Vec<InterpretedFn>>,
}

impl CompilerState {
    pub fn new(rt: &Arc<Runtime>) -> Self {
        Self {
            rt: rt.clone(),
            scopes: Scopes::new(),
            classes: Vec::new(),
            methods: Vec::new(),
            loops: Vec::new(),
            tail: false,
            recur_signal: None,
            gensym_envs: Vec::new(),
            eval_try_depth: 0,
            fn_classes: HashMap::new(),
        }
    }

    /// Method nesting depth; zero while interpreting.
    pub fn level(&self) -> usize {
        self.methods.len()
    }

    pub fn is_compiling(&self) -> bool {
        !self.methods.is_empty()
    }

    pub fn method(&mut self) -> Result<&mut MethodContext, SprigError> {
        self.methods
            .last_mut()
            .ok_or_else(|| SprigError::internal("no method is being emitted"))
    }

    pub fn stack(&self) -> Result<&MethodStack, SprigError> {
        self.methods
            .last()
            .map(|m| &m.stack)
            .ok_or_else(|| SprigError::internal("no method is being emitted"))
    }

    pub fn code(&mut self) -> Result<&mut CodeBuffer, SprigError> {
        Ok(&mut self.method()?.code)
    }

    /// The class owning the method currently being emitted.
    pub fn current_class(&mut self) -> Result<&mut ClassContext, SprigError> {
        let owner = self
            .methods
            .last()
            .map(|m| m.owner)
            .or_else(|| self.classes.len().checked_sub(1))
            .ok_or_else(|| SprigError::internal("no class is being emitted"))?;
        self.classes
            .get_mut(owner)
            .ok_or_else(|| SprigError::internal("method owner out of range"))
    }

    pub fn try_depth(&self) -> usize {
        self.methods.last().map_or(self.eval_try_depth, |m| m.try_depth)
    }

    pub fn is_unreachable(&self) -> bool {
        self.methods.last().map_or(false, |m| m.stack.is_unreachable())
    }

    /// Appends `ins` to the current method, tracking its stack effect.
    /// Nothing is emitted once control cannot reach this point.
    pub fn emit(&mut self, ins: Instruction) -> Result<(), SprigError> {
        let Some(method) = self.methods.last_mut() else {
            return Err(SprigError::internal("emit outside of a method"));
        };
        if method.stack.is_unreachable() {
            return Ok(());
        }
        let sites = self
            .classes
            .get(method.owner)
            .map(|c| c.file.call_sites.as_slice())
            .unwrap_or(&[]);
        let effect = ins.stack_effect(sites)?;
        method.stack.apply(&effect)?;
        let ends = ins.ends_block();
        method.code.push(ins);
        if ends {
            method.stack.push_unreachable();
        }
        Ok(())
    }

    pub fn emit_all(&mut self, code: Vec<Instruction>) -> Result<(), SprigError> {
        code.into_iter().try_for_each(|ins| self.emit(ins))
    }

    pub fn add_call_site(&mut self, spec: CallSiteSpec) -> Result<u32, SprigError> {
        let sites = &mut self.current_class()?.file.call_sites;
        sites.push(spec);
        Ok(sites.len() as u32 - 1)
    }

    /// Records `name` as captured by the current class, reusing an earlier
    /// capture of the same binding.
    pub fn capture(&mut self, name: &str, ty: &Ty) -> Result<ClosureRecord, SprigError> {
        let class = self.current_class()?;
        if class.mode == ClassMode::DefType {
            return Err(SprigError::compile(format!(
                "{}: deftype methods cannot close over local {}",
                class.file.name, name
            )));
        }
        if let Some(found) = class.closures.iter().find(|c| c.name == name) {
            return Ok(found.clone());
        }
        let base = munge(name);
        let mut field = base.clone();
        let mut n = 1;
        while class.closures.iter().any(|c| c.field == field) || class.file.fields.iter().any(|f| f.name == field) {
            field = format!("{}_{}", base, n);
            n += 1;
        }
        let record = ClosureRecord {
            name: name.to_string(),
            field,
            ty: ty.clone(),
        };
        class.closures.push(record.clone());
        Ok(record)
    }

    pub fn with_tail<T>(&mut self, tail: bool, f: impl FnOnce(&mut Self) -> Result<T, SprigError>) -> Result<T, SprigError> {
        let saved = std::mem::replace(&mut self.tail, tail);
        let result = f(self);
        self.tail = saved;
        result
    }

    /// Runs `f` inside a fresh lexical frame. The frame and everything pushed
    /// above it are gone afterwards, whether `f` succeeded or not; local
    /// slots they held are returned to the current method.
    pub fn with_scope<T>(
        &mut self,
        kind: VarScope,
        f: impl FnOnce(&mut Self) -> Result<T, SprigError>,
    ) -> Result<T, SprigError> {
        let depth = self.scopes.depth();
        let level = self.level();
        self.scopes.push(kind, level);
        let result = f(self);
        let dropped = self.scopes.truncate(depth);
        self.release_slots(&dropped, level);
        result
    }

    fn release_slots(&mut self, frames: &[Frame], level: usize) {
        if level == 0 || self.level() != level {
            return;
        }
        let Some(method) = self.methods.last_mut() else {
            return;
        };
        for frame in frames.iter().filter(|f| f.kind == VarScope::MethodLet && f.level == level) {
            for binding in &frame.bindings {
                if let Slot::Local(slot) = binding.slot {
                    method.code.free_slot(slot);
                }
            }
        }
    }

    /// Emits into a new method of the class at `owner`, then hands back its
    /// finished context. Loop targets and tail position never leak across the
    /// method boundary.
    pub fn with_method<T>(
        &mut self,
        method: MethodContext,
        f: impl FnOnce(&mut Self) -> Result<T, SprigError>,
    ) -> Result<(T, MethodContext), SprigError> {
        let depth = self.methods.len();
        let loops = std::mem::take(&mut self.loops);
        let tail = self.tail;
        self.methods.push(method);
        let result = f(self);
        self.loops = loops;
        self.tail = tail;
        let mut popped = self.methods.split_off(depth);
        let value = result?;
        let method = popped
            .pop()
            .ok_or_else(|| SprigError::internal("method context lost"))?;
        Ok((value, method))
    }

    /// Emits a class; its context is returned for finishing once `f` is done.
    pub fn with_class<T>(
        &mut self,
        class: ClassContext,
        f: impl FnOnce(&mut Self, usize) -> Result<T, SprigError>,
    ) -> Result<(T, ClassContext), SprigError> {
        let depth = self.classes.len();
        self.classes.push(class);
        let result = f(self, depth);
        let mut popped = self.classes.split_off(depth);
        let value = result?;
        let class = popped
            .pop()
            .ok_or_else(|| SprigError::internal("class context lost"))?;
        Ok((value, class))
    }

    pub fn warn(&self, span: Option<Span>, message: impl Into<String>) {
        let message = message.into();
        warn!(?span, "{}", message);
        if self.rt.options.print_warnings {
            match span {
                Some(s) => eprintln!("{} {}:{}: {}", WARN_TAG, s.line, s.col, message),
                None => eprintln!("{} {}", WARN_TAG, message),
            }
        }
        self.rt.report(Diagnostic { span, message });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Prim;
    use crate::vm::bytecode::Constant;

    fn state_with_method() -> CompilerState {
        let rt = Runtime::new();
        let mut state = CompilerState::new(&rt);
        state
            .classes
            .push(ClassContext::new(ClassFile::new("user$test", "lang.Object"), ClassMode::Closure));
        state.methods.push(MethodContext {
            code: CodeBuffer::new(0),
            stack: MethodStack::new(),
            try_depth: 0,
            owner: 0,
        });
        state
    }

    #[test]
    fn emit_tracks_the_type_stack() -> Result<(), SprigError> {
        let mut state = state_with_method();
        state.emit(Instruction::Const(Constant::Long(1)))?;
        assert_eq!(state.stack()?.top_type(), Some(&Ty::Prim(Prim::Long)));
        state.emit(Instruction::Box(Prim::Long))?;
        state.emit(Instruction::Throw)?;
        assert!(state.is_unreachable());
        state.emit(Instruction::Const(Constant::Nil))?;
        assert_eq!(state.stack()?.len(), 1);
        Ok(())
    }

    #[test]
    fn scopes_unwind_on_error() {
        let mut state = state_with_method();
        let depth = state.scopes.depth();
        let result: Result<(), SprigError> = state.with_scope(VarScope::MethodLet, |s| {
            s.with_scope(VarScope::MethodLet, |_| Err(SprigError::compile("boom")))
        });
        assert!(result.is_err());
        assert_eq!(state.scopes.depth(), depth);
    }

    #[test]
    fn captures_are_deduplicated() -> Result<(), SprigError> {
        let mut state = state_with_method();
        let a = state.capture("x", &Ty::Any)?;
        let b = state.capture("x", &Ty::Any)?;
        assert_eq!(a, b);
        let c = state.capture("x?", &Ty::Any)?;
        assert_ne!(a.field, c.field);
        Ok(())
    }

    #[test]
    fn deftype_methods_cannot_capture() {
        let mut state = state_with_method();
        state.classes[0].mode = ClassMode::DefType;
        assert!(matches!(state.capture("x", &Ty::Any), Err(SprigError::Compile(_))));
    }
}
