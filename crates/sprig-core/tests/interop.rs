mod common;

use sprig_core::{SprigError, Value};

#[test]
fn instance_methods_and_fields() {
    for src in [
        "(.length \"hello\")",
        "(.toUpperCase \"abc\")",
        "(. \"abc\" (substring 1))",
        "(.substring \"abcdef\" 1 3)",
        "(.-items (Tuple. 1 2 3))",
        "(.size (new Tuple :a :b))",
        "(let [t (Tuple. 4 5)] (.get t 1))",
    ] {
        common::assert_modes_agree(src);
    }
}

#[test]
fn static_members() -> Result<(), SprigError> {
    for src in ["(Math/abs -5)", "(Math/abs -2.5)", "(Math/max 1 2)", "(Math/max 1.5 0.5)", "Math/PI", "(. Math sqrt 16.0)"] {
        common::assert_modes_agree(src);
    }
    assert_eq!(common::compile_run("(Math/max 3 9)")?, Value::Int(9));
    Ok(())
}

#[test]
fn instance_checks() {
    for src in [
        "(instance? String \"s\")",
        "(instance? String 1)",
        "(instance? Exception (new Exception \"x\"))",
    ] {
        common::assert_modes_agree(src);
    }
}

#[test]
fn unknown_classes_fail_at_compile_time() {
    common::assert_both_fail("(new NoSuchClass)", |e| matches!(e, SprigError::Compile(_)));
}

#[test]
fn try_catch_finally() -> Result<(), SprigError> {
    for src in [
        "(try (throw (Exception. \"boom\")) (catch Exception e (.getMessage e)))",
        "(try (/ 1 0) (catch Exception e :caught))",
        "(try 1 (catch Exception e 2))",
        "(do (def hits 0) (try :body (finally (set! hits (inc hits)))) hits)",
        "(do (def hits 0) (try (try (throw (Exception. \"x\")) (finally (set! hits 10))) (catch Exception e hits)))",
    ] {
        common::assert_modes_agree(src);
    }
    assert_eq!(
        common::compile_run("(do (def hits 0) (try :body (finally (set! hits (inc hits)))) hits)")?,
        Value::Int(1)
    );
    Ok(())
}

#[test]
fn throwing_nil_fails() {
    common::assert_both_fail("(throw nil)", |e| !matches!(e, SprigError::Thrown(..)));
}
