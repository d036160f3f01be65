mod common;

use sprig_core::{SprigError, Value};

#[test]
fn counting_loop_reaches_three() -> Result<(), SprigError> {
    let src = "(loop [a 0] (if (= a 3) a (recur (+ a 1))))";
    assert_eq!(common::eval(src)?, Value::Int(3));
    assert_eq!(common::compile_run(src)?, Value::Int(3));
    Ok(())
}

#[test]
fn recur_rebinds_every_slot_simultaneously() {
    common::assert_modes_agree("(loop [a 1 b 2 n 0] (if (= n 3) [a b] (recur b a (inc n))))");
    common::assert_modes_agree("(loop [i 0 acc []] (if (< i 4) (recur (inc i) (conj acc i)) acc))");
}

#[test]
fn fn_arities_are_recur_targets() {
    common::assert_modes_agree("((fn [n acc] (if (= n 0) acc (recur (dec n) (+ acc n)))) 10 0)");
}

#[test]
fn recur_with_wrong_arity_is_rejected() {
    common::assert_both_fail("(loop [a 0 b 1] (recur 1))", |e| {
        matches!(e, SprigError::Compile(_) | SprigError::Syntax(_))
    });
}

#[test]
fn recur_outside_a_loop_is_rejected() {
    common::assert_both_fail("(recur 1)", |e| matches!(e, SprigError::Compile(_) | SprigError::Syntax(_)));
}

#[test]
fn recur_outside_tail_position_is_rejected() {
    let src = "(loop [a 0] (+ 1 (recur (inc a))))";
    assert!(matches!(common::compile_run(src), Err(SprigError::Compile(_))));
    let src = "(loop [a 0] (do (recur 1) 2))";
    assert!(matches!(common::compile_run(src), Err(SprigError::Compile(_))));
}

#[test]
fn recur_across_try_is_rejected() {
    let src = "(loop [a 0] (try (recur (inc a)) (catch Exception e 0)))";
    match common::compile_run(src) {
        Err(SprigError::Compile(data)) => assert!(data.message.contains("try"), "{}", data.message),
        other => panic!("unexpected {:?}", other),
    }
}
