mod common;

use sprig_core::host::names;
use sprig_core::types::{Prim, Ty};
use sprig_core::SprigError;

fn samples() -> Vec<Ty> {
    vec![
        Ty::Prim(Prim::Long),
        Ty::Prim(Prim::Double),
        Ty::Prim(Prim::Boolean),
        Ty::class(names::LONG),
        Ty::class(names::NUMBER),
        Ty::class(names::STRING),
        Ty::class(names::KEYWORD),
        Ty::class(names::EXCEPTION),
        Ty::class(names::LINKAGE_ERROR),
        Ty::object(),
        Ty::Any,
    ]
}

#[test]
fn unify_follows_assignability() {
    let rt = common::runtime();
    let reg = &rt.classes;
    for a in samples() {
        for b in samples() {
            let unified = Ty::unify(&a, &b, reg);
            let expected = if a == b || a.is_assignable_from(&b, reg) {
                a.clone()
            } else if b.is_assignable_from(&a, reg) {
                b.clone()
            } else {
                Ty::Any
            };
            assert_eq!(unified, expected, "unify({:?}, {:?})", a, b);
        }
    }
}

#[test]
fn concrete_pairs() {
    let rt = common::runtime();
    let reg = &rt.classes;
    let long = Ty::Prim(Prim::Long);
    assert_eq!(Ty::unify(&long, &long, reg), long);
    assert_eq!(Ty::unify(&Ty::object(), &Ty::string(), reg), Ty::object());
    assert_eq!(Ty::unify(&Ty::string(), &Ty::object(), reg), Ty::object());
    assert_eq!(
        Ty::unify(&Ty::class(names::LINKAGE_ERROR), &Ty::class(names::EXCEPTION), reg),
        Ty::class(names::EXCEPTION)
    );
    assert_eq!(Ty::unify(&Ty::string(), &Ty::class(names::KEYWORD), reg), Ty::Any);
}

#[test]
fn mixed_branches_produce_the_same_values() -> Result<(), SprigError> {
    for src in [
        "(if true 1 2)",
        "(if false 1 2.5)",
        "(if nil 1 \"one\")",
        "(if :k \"s\" :other)",
        "(if (< 2 1) 10)",
        "(let [x (if true 1 2.0)] x)",
    ] {
        common::assert_modes_agree(src);
    }
    Ok(())
}
