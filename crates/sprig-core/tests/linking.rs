mod common;

use sprig_core::link::callsite::Stage;
use sprig_core::options::{CallSiteThresholds, CompilerOptions};
use sprig_core::{Runtime, SprigError, Value};

#[test]
fn non_final_redefinition_is_observed() -> Result<(), SprigError> {
    let rt = common::runtime();
    rt.compile_str("(def x 1) (defn read-x [] x)")?;
    assert_eq!(rt.compile_str("(read-x)")?, Value::Int(1));
    rt.compile_str("(def x 2)")?;
    assert_eq!(rt.compile_str("(read-x)")?, Value::Int(2));

    let class = common::class_with_prefix(&rt, "user$read_x__").expect("fn class");
    let sites = rt.call_sites(&class);
    assert!(!sites[0].is_statically_linked());
    assert!(sites[0].relink_count() >= 1);
    Ok(())
}

#[test]
fn final_binding_keeps_the_linked_value() -> Result<(), SprigError> {
    let rt = common::runtime();
    rt.compile_str("(def ^:final k 1) (defn read-k [] k)")?;
    assert_eq!(rt.compile_str("(read-k)")?, Value::Int(1));
    rt.compile_str("(def ^:final k 2)")?;
    assert_eq!(rt.compile_str("(read-k)")?, Value::Int(1));

    let class = common::class_with_prefix(&rt, "user$read_k__").expect("fn class");
    assert!(rt.call_sites(&class)[0].is_statically_linked());
    Ok(())
}

#[test]
fn redefined_functions_are_called_through_their_new_value() -> Result<(), SprigError> {
    let rt = common::runtime();
    rt.compile_str("(defn greet [] :hello) (defn run [] (greet))")?;
    assert_eq!(rt.compile_str("(run)")?, Value::keyword("hello"));
    rt.compile_str("(defn greet [] :bye)")?;
    assert_eq!(rt.compile_str("(run)")?, Value::keyword("bye"));
    Ok(())
}

#[test]
fn polymorphic_receivers_walk_the_stages() -> Result<(), SprigError> {
    let rt = common::runtime();
    rt.compile_str("(defn size [x] (.count x))")?;
    assert_eq!(rt.compile_str("(size [1 2 3])")?, Value::Int(3));
    assert_eq!(rt.compile_str("(size '(1 2))")?, Value::Int(2));
    assert_eq!(rt.compile_str("(size {:a 1})")?, Value::Int(1));
    assert_eq!(rt.compile_str("(size #{1 2 3 4})")?, Value::Int(4));
    let class = common::class_with_prefix(&rt, "user$size__").expect("fn class");
    let site = &rt.call_sites(&class)[0];
    assert!(site.stage() >= Stage::Monomorphic, "{:?}", site.stage());
    Ok(())
}

#[test]
fn disabled_stages_fall_back_to_generic_dispatch() -> Result<(), SprigError> {
    let options = CompilerOptions {
        call_sites: CallSiteThresholds::unoptimized(),
        ..CompilerOptions::default()
    };
    let rt = Runtime::with_options(options);
    rt.compile_str("(defn size [x] (.count x))")?;
    assert_eq!(rt.compile_str("(size [1 2])")?, Value::Int(2));
    assert_eq!(rt.compile_str("(size \"abc\")").is_err(), true);
    let class = common::class_with_prefix(&rt, "user$size__").expect("fn class");
    assert_eq!(rt.call_sites(&class)[0].stage(), Stage::Unoptimized);
    Ok(())
}

#[test]
fn linkage_failures_are_deferred_until_called() -> Result<(), SprigError> {
    let rt = common::runtime();
    rt.compile_str("(defn broken [x] (.noSuchMethod x))")?;
    match rt.compile_str("(broken 1)") {
        Err(SprigError::Linkage(_)) => {}
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(
        rt.compile_str("(try (broken 1) (catch Exception e :caught))")?,
        Value::keyword("caught")
    );
    Ok(())
}
