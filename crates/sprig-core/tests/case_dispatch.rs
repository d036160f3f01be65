mod common;

use sprig_core::value::string_hash;
use sprig_core::SprigError;

const PICK: &str = r#"
(defn pick [x]
  (case x
    "Aa" 1
    "BB" 2
    "C" 3
    :k 4
    10 5
    \c 6
    (sym other) 7
    :none))
"#;

#[test]
fn colliding_labels_resolve_by_equality() {
    assert_eq!(string_hash("Aa"), string_hash("BB"));
    let src = format!(
        "{} [(pick \"Aa\") (pick \"BB\") (pick \"C\") (pick :k) (pick 10) (pick \\c) (pick 'sym) (pick 'other) (pick \"zz\") (pick 11)]",
        PICK
    );
    common::assert_modes_agree(&src);
    let value = common::compile_run(&src).unwrap_or_else(|e| panic!("{}", e));
    assert_eq!(value.to_string(), "[1 2 3 4 5 6 7 7 :none :none]");
}

#[test]
fn dense_integer_labels() {
    let src = "(defn digit [n] (case n 0 :zero 1 :one 2 :two 3 :three 4 :four :many))
               [(digit 0) (digit 2) (digit 4) (digit 9)]";
    common::assert_modes_agree(src);
    let value = common::eval(src).unwrap_or_else(|e| panic!("{}", e));
    assert_eq!(value.to_string(), "[:zero :two :four :many]");
}

#[test]
fn no_default_throws() {
    for result in [common::eval("(case 5 1 :a 2 :b)"), common::compile_run("(case 5 1 :a 2 :b)")] {
        match result {
            Err(err @ SprigError::Thrown(..)) => assert!(err.message().contains("No matching clause: 5")),
            other => panic!("unexpected {:?}", other),
        }
    }
}

#[test]
fn duplicate_labels_are_rejected() {
    common::assert_both_fail("(case 1 1 :a 1 :b)", |e| matches!(e, SprigError::Compile(_)));
}

#[test]
fn case_result_can_be_caught() {
    common::assert_modes_agree("(try (case :x :y 1) (catch Exception e (.getMessage e)))");
}
