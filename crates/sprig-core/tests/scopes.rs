mod common;

use sprig_core::compiler::scopes::{Binding, Resolution, Scopes, VarScope};
use sprig_core::types::Ty;
use sprig_core::{SprigError, Value};

fn resolutions(scopes: &Scopes, rt: &sprig_core::Runtime, names: &[&str]) -> Result<Vec<Option<VarScope>>, SprigError> {
    names
        .iter()
        .map(|name| Ok(scopes.lookup(rt, name, 1)?.map(|r: Resolution| r.scope())))
        .collect()
}

#[test]
fn nested_scopes_round_trip() -> Result<(), SprigError> {
    let rt = common::runtime();
    let probes = ["a", "b", "x0", "x3", "inc", "String"];
    for k in 0..12usize {
        let mut scopes = Scopes::new();
        scopes.push(VarScope::MethodParam, 1);
        scopes.bind(Binding::local("a", Ty::Any, 1))?;
        scopes.bind(Binding::local("b", Ty::string(), 2))?;
        let before = scopes.clone();
        let visible = scopes.visible_names();
        let resolved = resolutions(&scopes, &rt, &probes)?;

        let depth = scopes.depth();
        for i in 0..k {
            scopes.push(VarScope::MethodLet, 1);
            scopes.bind(Binding::local(&format!("x{}", i), Ty::Any, 3 + i as u16))?;
            if i % 2 == 0 {
                scopes.bind(Binding::local("a", Ty::string(), 40 + i as u16))?;
            }
        }
        let dropped = scopes.truncate(depth);
        assert_eq!(dropped.len(), k);

        assert_eq!(scopes, before, "k = {}", k);
        assert_eq!(scopes.visible_names(), visible);
        assert_eq!(resolutions(&scopes, &rt, &probes)?, resolved);
    }
    Ok(())
}

#[test]
fn shadowing_disappears_with_its_frame() -> Result<(), SprigError> {
    let rt = common::runtime();
    let mut scopes = Scopes::new();
    scopes.push(VarScope::MethodLet, 1);
    scopes.bind(Binding::local("inc", Ty::Any, 1))?;
    assert_eq!(scopes.lookup(&rt, "inc", 1)?.map(|r| r.scope()), Some(VarScope::MethodLet));
    scopes.pop();
    assert_eq!(scopes.lookup(&rt, "inc", 1)?.map(|r| r.scope()), Some(VarScope::Namespace));
    Ok(())
}

#[test]
fn let_bindings_do_not_leak() {
    common::assert_both_fail("(do (let [hidden 1] hidden) hidden)", |e| {
        matches!(e, SprigError::UnboundSymbol(_))
    });
}

#[test]
fn mismatched_let_hint_warns_and_keeps_inferred_type() -> Result<(), SprigError> {
    for compiled in [false, true] {
        let rt = common::runtime();
        let src = "(let [^String s 1] (+ s 1))";
        let value = if compiled { rt.compile_str(src)? } else { rt.eval_str(src)? };
        assert_eq!(value, Value::Int(2));
        let warned = rt
            .diagnostics()
            .iter()
            .any(|d| d.message == "type hint String of s does not match its inferred type long");
        assert!(warned, "no hint warning when compiled={}", compiled);
    }
    Ok(())
}

#[test]
fn matching_let_hint_is_silent() -> Result<(), SprigError> {
    for compiled in [false, true] {
        let rt = common::runtime();
        let src = "(let [^String s \"abc\"] (.length s))";
        let value = if compiled { rt.compile_str(src)? } else { rt.eval_str(src)? };
        assert_eq!(value, Value::Int(3));
        assert!(rt.diagnostics().is_empty());
    }
    Ok(())
}
