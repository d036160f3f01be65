pub mod ast;
pub mod builtins;
pub mod compiler;
pub mod emit;
pub mod error;
pub mod forms;
pub mod host;
pub mod link;
pub mod namespaces;
pub mod options;
pub mod reader;
pub mod runtime;
pub mod symbols;
pub mod types;
pub mod value;
pub mod vm;

use std::sync::Arc;

pub use error::SprigError;
pub use options::CompilerOptions;
pub use runtime::Runtime;
pub use value::Value;

/// Interprets `src` in a fresh runtime, returning the last value.
pub fn eval_source(src: &str, options: Option<CompilerOptions>) -> Result<Value, SprigError> {
    runtime_for(options).eval_str(src)
}

/// Compiles and runs every top-level form of `src` in a fresh runtime,
/// returning the last value.
pub fn compile_source(src: &str, options: Option<CompilerOptions>) -> Result<Value, SprigError> {
    runtime_for(options).compile_str(src)
}

fn runtime_for(options: Option<CompilerOptions>) -> Arc<Runtime> {
    match options {
        Some(options) => Runtime::with_options(options),
        None => Runtime::new(),
    }
}
