mod common;

use std::sync::Arc;

use sprig_core::ast::Datum;
use sprig_core::compiler::stack::MethodStack;
use sprig_core::compiler::state::{ClassContext, ClassMode, CompilerState, MethodContext};
use sprig_core::emit::class_file::ClassFile;
use sprig_core::emit::code::CodeBuffer;
use sprig_core::forms::dispatch;
use sprig_core::host::names;
use sprig_core::reader::read_str;
use sprig_core::types::Ty;
use sprig_core::{Runtime, SprigError, Value};

/// Runs `f` inside a fresh method of a throwaway class.
fn in_method<T>(
    rt: &Arc<Runtime>,
    f: impl FnOnce(&mut CompilerState) -> Result<T, SprigError>,
) -> Result<T, SprigError> {
    let mut state = CompilerState::new(rt);
    let file = ClassFile::new("user$probe", names::OBJECT);
    let (value, _) = state.with_class(ClassContext::new(file, ClassMode::AnonClass), |s, owner| {
        let method = MethodContext {
            code: CodeBuffer::new(0),
            stack: MethodStack::new(),
            try_depth: 0,
            owner,
        };
        s.with_method(method, f).map(|(value, _)| value)
    })?;
    Ok(value)
}

/// Depth delta of compiling `datum`, or `None` when it ends unreachable.
fn depth_delta(rt: &Arc<Runtime>, datum: &Datum) -> Result<Option<usize>, SprigError> {
    in_method(rt, |s| {
        let before = s.stack()?.len();
        let unit = dispatch(datum).compile_form(s)?;
        unit.compile(s)?;
        let stack = s.stack()?;
        Ok(if stack.is_unreachable() { None } else { Some(stack.len() - before) })
    })
}

/// Deterministic generator of well-formed forms.
struct Gen(u64);

impl Gen {
    fn next(&mut self, bound: u64) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 33) % bound
    }

    fn form(&mut self, depth: u32, locals: &mut Vec<String>) -> String {
        let leaf = depth == 0 || self.next(4) == 0;
        if leaf {
            return match self.next(7) {
                0 => self.next(100).to_string(),
                1 => format!("{}.5", self.next(10)),
                2 => "\"s\"".to_string(),
                3 => "nil".to_string(),
                4 => "true".to_string(),
                5 => ":k".to_string(),
                _ => match locals.last() {
                    Some(name) => name.clone(),
                    None => "1".to_string(),
                },
            };
        }
        let d = depth - 1;
        match self.next(9) {
            0 => format!("(if {} {} {})", self.form(d, locals), self.form(d, locals), self.form(d, locals)),
            1 => format!("(do {} {})", self.form(d, locals), self.form(d, locals)),
            2 => {
                let name = format!("v{}", locals.len());
                let init = self.form(d, locals);
                locals.push(name.clone());
                let body = self.form(d, locals);
                locals.pop();
                format!("(let [{} {}] {})", name, init, body)
            }
            3 => format!("(+ {} {})", self.next(50), self.next(50)),
            4 => format!("[{} {}]", self.form(d, locals), self.form(d, locals)),
            5 => format!("(case {} 1 {} 2 {} {})", self.next(3), self.form(d, locals), self.form(d, locals), self.form(d, locals)),
            6 => format!("(loop [i 0] (if (< i 2) (recur (inc i)) {}))", self.form(d, locals)),
            7 => format!("(if {} (throw (new Exception \"x\")) {})", self.form(d, locals), self.form(d, locals)),
            _ => format!("(try {} (catch Exception e {}))", self.form(d, locals), self.form(d, locals)),
        }
    }
}

#[test]
fn every_generated_form_leaves_one_value() -> Result<(), SprigError> {
    let rt = common::runtime();
    let mut gen = Gen(0x5eed);
    for _ in 0..200 {
        let src = gen.form(4, &mut Vec::new());
        let datum = read_str(&src)?.remove(0);
        match depth_delta(&rt, &datum) {
            Ok(delta) => assert!(delta.is_none() || delta == Some(1), "{} left {:?}", src, delta),
            Err(err) => panic!("{} failed: {}", src, err),
        }
    }
    Ok(())
}

#[test]
fn throw_leaves_the_stack_unreachable() -> Result<(), SprigError> {
    let rt = common::runtime();
    let datum = read_str("(throw (new Exception \"boom\"))")?.remove(0);
    assert_eq!(depth_delta(&rt, &datum)?, None);
    Ok(())
}

#[test]
fn if_with_string_branches_is_a_non_constant_string() -> Result<(), SprigError> {
    let rt = common::runtime();
    let datum = read_str("(if (< 1 2) \"less\" \"more\")")?.remove(0);
    let (ty, constant) = in_method(&rt, |s| {
        dispatch(&datum).compile_form(s)?.compile(s)?;
        let stack = s.stack()?;
        Ok((stack.top_type().cloned(), stack.top_is_constant()))
    })?;
    assert_eq!(ty, Some(Ty::string()));
    assert!(!constant);
    assert_eq!(common::eval("(if (< 1 2) \"less\" \"more\")")?, Value::string("less"));
    assert_eq!(common::compile_run("(if (< 1 2) \"less\" \"more\")")?, Value::string("less"));
    Ok(())
}

#[test]
fn literals_fold_to_constants() -> Result<(), SprigError> {
    let rt = common::runtime();
    for src in ["42", "\"s\"", "[1 2 {:a 3}]", ":kw"] {
        let datum = read_str(src)?.remove(0);
        let unit = in_method(&rt, |s| dispatch(&datum).compile_form(s).map(|u| u.ldc_form.is_some()))?;
        assert!(unit, "{} should fold", src);
    }
    Ok(())
}

#[test]
fn discarded_wide_values_are_popped() {
    common::assert_modes_agree("(do 1 2.5 (+ 1 2) \"end\")");
    common::assert_modes_agree("(let [a 1 b 2.0] a b)");
}
