use crate::error::SprigError;
use crate::namespaces::{Namespace, VarFlags};
use crate::runtime::Runtime;
use crate::symbols::CORE_NS;
use crate::value::{Intrinsic, Value};

mod core;
mod seq;

/// Binds a native function as a final var of `$ns`.
macro_rules! def_builtin {
    ($ns:expr, $name:expr, $arity:expr, $ret:expr, |$rt:pat_param, $args:ident| $body:expr) => {
        $crate::builtins::define_native(
            $ns,
            $crate::value::Value::native(
                $name,
                $arity,
                $ret,
                move |$rt: &$crate::runtime::Runtime,
                      $args: &[$crate::value::Value]|
                      -> Result<$crate::value::Value, $crate::error::SprigError> { $body },
            ),
        );
    };
}

pub(crate) use def_builtin;

pub fn err<T>(msg: impl Into<String>) -> Result<T, SprigError> {
    Err(SprigError::runtime(msg))
}

pub(crate) fn final_flags() -> VarFlags {
    VarFlags {
        is_final: true,
        ..VarFlags::default()
    }
}

pub fn define_native(ns: &Namespace, value: Value) {
    if let Value::Native(native) = &value {
        let var = ns.intern(&native.name);
        var.define(Some(value.clone()), final_flags());
    }
}

/// Populates `sprig.core`: special-form markers first, then natives.
pub fn install(rt: &Runtime) {
    let (core_ns, _) = rt.namespaces.ensure(CORE_NS);
    for intrinsic in Intrinsic::ALL {
        core_ns
            .intern(intrinsic.name())
            .define(Some(Value::Intrinsic(intrinsic)), final_flags());
    }
    core::install(&core_ns);
    seq::install(&core_ns);
}
