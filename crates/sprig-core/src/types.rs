use std::fmt;

use serde::{Deserialize, Serialize};

use crate::host::{names, ClassRegistry};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Prim {
    Boolean,
    Char,
    Long,
    Double,
}

impl Prim {
    pub fn wrapper(self) -> &'static str {
        match self {
            Prim::Boolean => names::BOOLEAN,
            Prim::Char => names::CHARACTER,
            Prim::Long => names::LONG,
            Prim::Double => names::DOUBLE,
        }
    }

    pub fn from_wrapper(name: &str) -> Option<Prim> {
        match name {
            names::BOOLEAN => Some(Prim::Boolean),
            names::CHARACTER => Some(Prim::Char),
            names::LONG => Some(Prim::Long),
            names::DOUBLE => Some(Prim::Double),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Prim::Boolean => "boolean",
            Prim::Char => "char",
            Prim::Long => "long",
            Prim::Double => "double",
        }
    }
}

/// Static type of a value on the operand stack or in a local slot. `Any` is
/// the escape type: statically unknown, resolved at run time.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ty {
    Any,
    Void,
    Prim(Prim),
    Class(String),
}

impl Ty {
    pub fn class(name: &str) -> Ty {
        Ty::Class(name.to_string())
    }

    pub fn object() -> Ty {
        Ty::class(names::OBJECT)
    }

    pub fn string() -> Ty {
        Ty::class(names::STRING)
    }

    /// Operand-stack slots the value occupies.
    pub fn width(&self) -> u16 {
        match self {
            Ty::Void => 0,
            Ty::Prim(Prim::Long) | Ty::Prim(Prim::Double) => 2,
            _ => 1,
        }
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, Ty::Prim(_))
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Ty::Any | Ty::Class(_))
    }

    pub fn boxed(&self) -> Ty {
        match self {
            Ty::Prim(p) => Ty::class(p.wrapper()),
            other => other.clone(),
        }
    }

    pub fn unboxed(&self) -> Option<Prim> {
        match self {
            Ty::Prim(p) => Some(*p),
            Ty::Class(name) => Prim::from_wrapper(name),
            _ => None,
        }
    }

    pub fn class_name(&self) -> Option<&str> {
        match self {
            Ty::Class(name) => Some(name),
            _ => None,
        }
    }

    /// Whether a value of type `other` may be stored where `self` is expected
    /// without conversion. Boxing and widening do not count.
    pub fn is_assignable_from(&self, other: &Ty, registry: &ClassRegistry) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (_, Ty::Void) | (Ty::Void, _) => false,
            (Ty::Any, Ty::Class(_)) => true,
            (Ty::Any, Ty::Prim(_)) => false,
            (Ty::Class(name), Ty::Any) => name == names::OBJECT,
            (Ty::Class(sup), Ty::Class(sub)) => registry.is_subclass(sub, sup),
            _ => false,
        }
    }

    /// Common type of two control-flow branches.
    pub fn unify(a: &Ty, b: &Ty, registry: &ClassRegistry) -> Ty {
        if a == b {
            a.clone()
        } else if a.is_assignable_from(b, registry) {
            a.clone()
        } else if b.is_assignable_from(a, registry) {
            b.clone()
        } else {
            Ty::Any
        }
    }

    pub fn primitive_hint(name: &str) -> Option<Ty> {
        match name {
            "long" | "int" | "short" | "byte" => Some(Ty::Prim(Prim::Long)),
            "double" | "float" => Some(Ty::Prim(Prim::Double)),
            "boolean" => Some(Ty::Prim(Prim::Boolean)),
            "char" => Some(Ty::Prim(Prim::Char)),
            "void" => Some(Ty::Void),
            _ => None,
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Any => write!(f, "Any"),
            Ty::Void => write!(f, "void"),
            Ty::Prim(p) => write!(f, "{}", p.name()),
            Ty::Class(name) => write!(f, "{}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unify_follows_assignability() {
        let reg = ClassRegistry::with_builtins();
        let long = Ty::Prim(Prim::Long);
        let boxed_long = Ty::class(names::LONG);
        let number = Ty::class(names::NUMBER);
        let string = Ty::string();

        assert_eq!(Ty::unify(&long, &long, &reg), long);
        assert_eq!(Ty::unify(&number, &boxed_long, &reg), number);
        assert_eq!(Ty::unify(&boxed_long, &number, &reg), number);
        assert_eq!(Ty::unify(&long, &boxed_long, &reg), Ty::Any);
        assert_eq!(Ty::unify(&string, &boxed_long, &reg), Ty::Any);
        assert_eq!(Ty::unify(&Ty::object(), &string, &reg), Ty::object());
        assert_eq!(Ty::unify(&Ty::Any, &string, &reg), Ty::Any);
        assert_eq!(Ty::unify(&long, &Ty::Prim(Prim::Double), &reg), Ty::Any);
    }

    #[test]
    fn widths() {
        assert_eq!(Ty::Prim(Prim::Long).width(), 2);
        assert_eq!(Ty::Prim(Prim::Double).width(), 2);
        assert_eq!(Ty::Prim(Prim::Boolean).width(), 1);
        assert_eq!(Ty::Void.width(), 0);
        assert_eq!(Ty::Any.width(), 1);
    }

    #[test]
    fn boxing_maps_to_wrappers() {
        assert_eq!(Ty::Prim(Prim::Char).boxed(), Ty::class(names::CHARACTER));
        assert_eq!(Ty::class(names::DOUBLE).unboxed(), Some(Prim::Double));
        assert_eq!(Ty::string().unboxed(), None);
    }
}
