#![allow(dead_code)]

use std::sync::Arc;

use sprig_core::{Runtime, SprigError, Value};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn runtime() -> Arc<Runtime> {
    init_tracing();
    Runtime::new()
}

pub fn eval(src: &str) -> Result<Value, SprigError> {
    runtime().eval_str(src)
}

pub fn compile_run(src: &str) -> Result<Value, SprigError> {
    runtime().compile_str(src)
}

/// Both execution modes produce the same printed value.
pub fn assert_modes_agree(src: &str) {
    let interpreted = eval(src).unwrap_or_else(|e| panic!("eval {}: {}", src, e));
    let compiled = compile_run(src).unwrap_or_else(|e| panic!("compile {}: {}", src, e));
    assert_eq!(interpreted.to_string(), compiled.to_string(), "{}", src);
}

/// Both modes reject `src` with the same kind of error.
pub fn assert_both_fail(src: &str, check: impl Fn(&SprigError) -> bool) {
    match eval(src) {
        Ok(v) => panic!("eval {} succeeded with {}", src, v),
        Err(e) => assert!(check(&e), "eval {}: unexpected {:?}", src, e),
    }
    match compile_run(src) {
        Ok(v) => panic!("compile {} succeeded with {}", src, v),
        Err(e) => assert!(check(&e), "compile {}: unexpected {:?}", src, e),
    }
}

pub fn class_with_prefix(rt: &Runtime, prefix: &str) -> Option<String> {
    rt.classes.class_names().into_iter().find(|n| n.starts_with(prefix))
}
