mod common;

use sprig_core::host::names;
use sprig_core::{SprigError, Value};

#[test]
fn closures_capture_enclosing_locals() {
    for src in [
        "(let [x 2 f (fn [y] (+ x y))] (f 3))",
        "(let [a 1] (let [f (fn [] (fn [] a))] ((f))))",
        "(let [n 10 add (fn [m] (+ n m))] [(add 1) (add 2)])",
        "(((fn [x] (fn [y] [x y])) :outer) :inner)",
    ] {
        common::assert_modes_agree(src);
    }
}

#[test]
fn named_fns_call_themselves() {
    common::assert_modes_agree("(let [f (fn fact [n] (if (< n 2) 1 (* n (fact (dec n)))))] (f 10))");
}

#[test]
fn arities_and_rest_arguments() -> Result<(), SprigError> {
    let src = "(defn arity
                 ([] :none)
                 ([a] [:one a])
                 ([a b & more] [:many a b more]))
               [(arity) (arity 1) (arity 1 2) (arity 1 2 3 4)]";
    common::assert_modes_agree(src);
    assert_eq!(
        common::compile_run(src)?.to_string(),
        "[:none [:one 1] [:many 1 2 nil] [:many 1 2 (3 4)]]"
    );
    Ok(())
}

#[test]
fn wrong_arity_is_a_runtime_error() {
    for result in [common::eval("((fn [a] a))"), common::compile_run("((fn [a] a))")] {
        assert!(result.is_err());
    }
}

#[test]
fn fn_values_are_classes_implementing_fn() -> Result<(), SprigError> {
    let rt = common::runtime();
    let f = rt.compile_str("(fn [x] x)")?;
    assert!(rt.classes.instance_of(&f, names::FN));
    assert_eq!(rt.apply(&f, &[Value::Int(7)])?, Value::Int(7));
    Ok(())
}

const SHAPES: &str = "
(defprotocol Shape
  (area [this])
  (scale [this k]))
(deftype Rect [w h]
  Shape
  (area [this] (* w h))
  (scale [this k] (Rect. (* w k) (* h k))))
(deftype Circle [r]
  Shape
  (area [this] (* 3 r r))
  (scale [this k] (Circle. (* r k))))
";

#[test]
fn protocols_dispatch_on_the_receiver() -> Result<(), SprigError> {
    let src = format!("{} [(area (Rect. 3 4)) (area (Circle. 2)) (area (scale (Rect. 1 2) 3))]", SHAPES);
    common::assert_modes_agree(&src);
    assert_eq!(common::compile_run(&src)?.to_string(), "[12 12 18]");
    Ok(())
}

#[test]
fn deftype_fields_are_readable_and_mutable_fields_assignable() -> Result<(), SprigError> {
    let src = "
(defprotocol Counter (tick [this]))
(deftype Clicks [^:mutable n]
  Counter
  (tick [this] (set! n (inc n)) n))
(let [c (Clicks. 0)] (tick c) (tick c) [(tick c) (.-n c)])";
    common::assert_modes_agree(src);
    assert_eq!(common::compile_run(src)?.to_string(), "[3 3]");
    Ok(())
}

#[test]
fn immutable_fields_reject_set() {
    let src = "
(defprotocol P (poke [this]))
(deftype Frozen [n] P (poke [this] (set! n 1)))";
    common::assert_both_fail(src, |e| matches!(e, SprigError::Compile(_)));
}

#[test]
fn deftype_methods_cannot_close_over_locals() {
    let src = "
(defprotocol Q (q [this]))
(let [outer 1] (deftype Leaky [] Q (q [this] outer)))";
    common::assert_both_fail(src, |e| matches!(e, SprigError::Compile(_)));
}

#[test]
fn proxies_override_superclass_methods() -> Result<(), SprigError> {
    let src = "(let [suffix \"!\"
                     e (proxy [Exception] [\"boom\"]
                         (getMessage [] (str \"wrapped \" suffix)))]
                 [(.getMessage e) (instance? Exception e)])";
    common::assert_modes_agree(src);
    assert_eq!(common::compile_run(src)?.to_string(), "[\"wrapped !\" true]");
    Ok(())
}

#[test]
fn thrown_proxies_are_caught_by_superclass() {
    common::assert_modes_agree(
        "(try (throw (proxy [Exception] [\"inner\"])) (catch Exception e (.getMessage e)))",
    );
}

#[test]
fn deftype_methods_construct_their_own_type() -> Result<(), SprigError> {
    let src = "
(defprotocol Moves (shift [this d]))
(deftype Pos [x] Moves (shift [this d] (Pos. (+ x d))))
(.-x (shift (shift (Pos. 1) 2) 3))";
    common::assert_modes_agree(src);
    assert_eq!(common::compile_run(src)?, Value::Int(6));
    Ok(())
}

#[test]
fn failed_deftype_leaves_no_class_behind() {
    for compiled in [false, true] {
        let rt = common::runtime();
        let src = "(deftype Broken [x] Object (toString [this] no-such-local))";
        let result = if compiled { rt.compile_str(src) } else { rt.eval_str(src) };
        assert!(matches!(result, Err(SprigError::UnboundSymbol(_))));
        assert!(!rt.classes.contains("user.Broken"));
    }
}

#[test]
fn str_prints_through_overridden_to_string() -> Result<(), SprigError> {
    let src = "(let [t (proxy [Object] [] (toString [] \"hi\"))] [(str t) (.toString t) (str [t])])";
    common::assert_modes_agree(src);
    assert_eq!(common::compile_run(src)?.to_string(), "[\"hi\" \"hi\" \"[hi]\"]");

    let src = "(do (deftype Label [n] Object (toString [this] (str \"L\" n))) [(str (Label. 1)) (pr-str {:k (Label. 2)})])";
    common::assert_modes_agree(src);
    assert_eq!(common::compile_run(src)?.to_string(), "[\"L1\" \"{:k L2}\"]");
    Ok(())
}

#[test]
fn interpreted_fn_forms_define_one_class() -> Result<(), SprigError> {
    let rt = common::runtime();
    let before = rt.classes.class_names().len();
    let value = rt.eval_str("(loop [i 0 acc 0] (if (< i 50) (recur (inc i) (+ acc ((fn [] i)))) acc))")?;
    assert_eq!(value, Value::Int(1225));
    assert_eq!(rt.classes.class_names().len(), before + 1);
    Ok(())
}
