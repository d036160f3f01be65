pub mod bytecode;
pub mod runtime;
pub mod verify;

pub use runtime::execute;
pub use verify::{verify_class, VerifyError};
