mod common;

use sprig_core::compiler::state::CompilerState;
use sprig_core::forms::macroexpand;
use sprig_core::reader::read_str;
use sprig_core::{SprigError, Value};

const MACROS: &str = "
(defmacro my-when [c & body] `(if ~c (do ~@body)))
(defmacro my-unless [c & body] `(my-when (not ~c) ~@body))
(defmacro swap-args [f a b] (list f b a))
(defmacro forever [] '(forever))
(defmacro grow [& xs] `(grow 1 ~@xs))
";

#[test]
fn macros_expand_to_a_fixed_point() -> Result<(), SprigError> {
    let rt = common::runtime();
    rt.eval_str(MACROS)?;
    let mut state = CompilerState::new(&rt);
    let datum = read_str("(my-unless false 1 2)")?.remove(0);
    let (expanded, steps) = macroexpand(&mut state, &datum)?;
    assert_eq!(steps, 2);
    assert_eq!(expanded.as_list().and_then(|l| l.first()).and_then(|h| h.as_symbol()), Some("if"));
    Ok(())
}

#[test]
fn non_macro_forms_are_unchanged() -> Result<(), SprigError> {
    let rt = common::runtime();
    let mut state = CompilerState::new(&rt);
    for src in ["(+ 1 2)", "42", "[a b]", "(if a b c)"] {
        let datum = read_str(src)?.remove(0);
        let (expanded, steps) = macroexpand(&mut state, &datum)?;
        assert_eq!(steps, 0, "{}", src);
        assert!(expanded.same_shape(&datum), "{}", src);
    }
    Ok(())
}

#[test]
fn self_reproducing_expansion_stops() -> Result<(), SprigError> {
    let rt = common::runtime();
    rt.eval_str(MACROS)?;
    let mut state = CompilerState::new(&rt);
    let datum = read_str("(forever)")?.remove(0);
    let (_, steps) = macroexpand(&mut state, &datum)?;
    assert!(steps <= 1);
    Ok(())
}

#[test]
fn growing_expansion_is_bounded() -> Result<(), SprigError> {
    let rt = common::runtime();
    rt.eval_str(MACROS)?;
    let mut state = CompilerState::new(&rt);
    let datum = read_str("(grow)")?.remove(0);
    assert!(matches!(macroexpand(&mut state, &datum), Err(SprigError::Compile(_))));
    Ok(())
}

#[test]
fn macros_run_in_both_modes() -> Result<(), SprigError> {
    for src in ["(my-unless false 1 2 3)", "(my-when false 1)", "(swap-args - 1 10)"] {
        let program = format!("{}\n{}", MACROS, src);
        common::assert_modes_agree(&program);
    }
    assert_eq!(common::compile_run(&format!("{}\n(swap-args - 1 10)", MACROS))?, Value::Int(9));
    Ok(())
}

#[test]
fn derived_forms() {
    for src in [
        "(and 1 2 3)",
        "(and 1 nil 3)",
        "(or nil false :x)",
        "(or)",
        "(cond false 1 nil 2 :else 3)",
        "(when-not false :ran)",
        "(-> 5 (- 2) inc)",
        "(->> 5 (- 2) inc)",
        "(do (defn- helper [x] (* x 2)) (helper 21))",
        "(comment anything at all)",
    ] {
        common::assert_modes_agree(src);
    }
}

#[test]
fn syntax_quote_templates() {
    common::assert_modes_agree("(let [x 1 xs [2 3]] `(a ~x ~@xs [~x] {:k ~x}))");
    common::assert_modes_agree("`(plain list of symbols)");
    common::assert_modes_agree("(let [xs nil] `(~@xs))");
}

#[test]
fn unquote_outside_syntax_quote_fails() {
    common::assert_both_fail("(unquote x)", |e| matches!(e, SprigError::Compile(_)));
}
