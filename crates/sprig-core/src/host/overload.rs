//! Two-phase overload resolution.
//!
//! The static phase sees only compile-time types and fails closed: as soon as
//! a statically unknown argument leaves more than one candidate standing, it
//! answers `Ambiguous` and the call is left to the dynamic phase, which picks
//! by runtime classes and reports which parameters actually need a guard.

use std::cmp::Ordering;
use std::sync::Arc;

use super::{names, ClassInfo, ClassRegistry, MethodInfo};
use crate::error::SprigError;
use crate::types::{Prim, Ty};
use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Fit {
    Exact,
    Convertible,
    Unknown,
}

pub type Candidate = (Arc<ClassInfo>, Arc<MethodInfo>);

#[derive(Clone, Debug)]
pub enum StaticResolution {
    Unique(Candidate),
    Ambiguous(Vec<Candidate>),
    NoMatch,
}

#[derive(Clone, Debug)]
pub struct DynamicResolution {
    pub candidate: Candidate,
    /// `true` where candidates of this arity disagree on the parameter type,
    /// so a cached choice must re-check that argument's class.
    pub contended: Vec<bool>,
}

/// How the argument list must be reshaped to call a variadic method.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VarargsPlan {
    Direct,
    /// Collect `count` trailing arguments (possibly none) into a vector.
    WrapTail { fixed: usize, count: usize },
}

fn param_at(method: &MethodInfo, idx: usize) -> Ty {
    if method.is_varargs && idx + 1 >= method.params.len() {
        Ty::Any
    } else {
        method.params.get(idx).cloned().unwrap_or(Ty::Any)
    }
}

fn static_fit(param: &Ty, arg: &Ty, reg: &ClassRegistry) -> Option<Fit> {
    if param == arg {
        return Some(Fit::Exact);
    }
    match (param, arg) {
        (_, Ty::Void) => None,
        (Ty::Any, _) => Some(Fit::Exact),
        (Ty::Class(name), Ty::Any) if name == names::OBJECT => Some(Fit::Exact),
        (_, Ty::Any) => Some(Fit::Unknown),
        (Ty::Class(_), Ty::Class(_)) => {
            if param.is_assignable_from(arg, reg) {
                Some(Fit::Exact)
            } else if arg.is_assignable_from(param, reg) {
                // the argument's static type is a supertype: might fit at run time
                Some(Fit::Unknown)
            } else {
                None
            }
        }
        (Ty::Class(_), Ty::Prim(p)) => {
            if param.is_assignable_from(&Ty::class(p.wrapper()), reg) {
                Some(Fit::Convertible)
            } else {
                None
            }
        }
        (Ty::Prim(p), Ty::Class(name)) => {
            if Prim::from_wrapper(name) == Some(*p) {
                Some(Fit::Convertible)
            } else if *p == Prim::Double && name == names::LONG {
                Some(Fit::Convertible)
            } else if reg.is_subclass(p.wrapper(), name) {
                Some(Fit::Unknown)
            } else {
                None
            }
        }
        (Ty::Prim(Prim::Double), Ty::Prim(Prim::Long)) => Some(Fit::Convertible),
        _ => None,
    }
}

fn runtime_fit(param: &Ty, arg: &Value, reg: &ClassRegistry) -> Option<Fit> {
    match (param, arg.class_name()) {
        (Ty::Any, _) => Some(Fit::Exact),
        (Ty::Void, _) => None,
        (Ty::Prim(_), None) => None,
        (Ty::Class(_), None) => Some(Fit::Convertible),
        (Ty::Prim(p), Some(class)) => {
            if p.wrapper() == class {
                Some(Fit::Exact)
            } else if *p == Prim::Double && class == names::LONG {
                Some(Fit::Convertible)
            } else {
                None
            }
        }
        (Ty::Class(name), Some(class)) => {
            if name == class {
                Some(Fit::Exact)
            } else if reg.is_subclass(class, name) {
                Some(Fit::Convertible)
            } else {
                None
            }
        }
    }
}

/// `a` is at least as specific as `b` when each of its parameters could be
/// passed where `b`'s is expected.
fn at_least_as_specific(a: &MethodInfo, b: &MethodInfo, arity: usize, reg: &ClassRegistry) -> bool {
    (0..arity).all(|i| {
        let pa = param_at(a, i);
        let pb = param_at(b, i);
        pa == pb
            || matches!(static_fit(&pb, &pa, reg), Some(Fit::Exact) | Some(Fit::Convertible))
    })
}

fn pick_most_specific(
    fits: Vec<(Candidate, Fit)>,
    arity: usize,
    reg: &ClassRegistry,
) -> Result<Candidate, Vec<Candidate>> {
    let Some(best_fit) = fits.iter().map(|(_, f)| *f).min() else {
        return Err(Vec::new());
    };
    let best: Vec<Candidate> = fits
        .into_iter()
        .filter(|(_, f)| *f == best_fit)
        .map(|(c, _)| c)
        .collect();
    let winners: Vec<&Candidate> = best
        .iter()
        .filter(|(_, m)| {
            best.iter()
                .all(|(_, other)| Arc::ptr_eq(m, other) || at_least_as_specific(m, other, arity, reg))
        })
        .collect();
    match winners.as_slice() {
        [only] => Ok((*only).clone()),
        _ => Err(best),
    }
}

pub fn arity_candidates(candidates: &[Candidate], arity: usize) -> Vec<Candidate> {
    candidates
        .iter()
        .filter(|(_, m)| m.accepts_arity(arity))
        .cloned()
        .collect()
}

/// Compile-time phase over static argument types.
pub fn resolve_static(candidates: &[Candidate], args: &[Ty], reg: &ClassRegistry) -> StaticResolution {
    let by_arity = arity_candidates(candidates, args.len());
    let mut fits = Vec::new();
    for cand in by_arity {
        let per_arg: Option<Vec<Fit>> = args
            .iter()
            .enumerate()
            .map(|(i, arg)| static_fit(&param_at(&cand.1, i), arg, reg))
            .collect();
        if let Some(per_arg) = per_arg {
            let worst = per_arg.into_iter().max().unwrap_or(Fit::Exact);
            fits.push((cand, worst));
        }
    }
    match fits.len() {
        0 => StaticResolution::NoMatch,
        1 => StaticResolution::Unique(fits.remove(0).0),
        _ => {
            if fits.iter().any(|(_, f)| *f == Fit::Unknown) {
                return StaticResolution::Ambiguous(fits.into_iter().map(|(c, _)| c).collect());
            }
            match pick_most_specific(fits, args.len(), reg) {
                Ok(c) => StaticResolution::Unique(c),
                Err(tied) => StaticResolution::Ambiguous(tied),
            }
        }
    }
}

/// Run-time phase over actual argument values.
pub fn resolve_dynamic(
    candidates: &[Candidate],
    args: &[Value],
    reg: &ClassRegistry,
    what: &str,
) -> Result<DynamicResolution, SprigError> {
    let by_arity = arity_candidates(candidates, args.len());
    let contended = contended_params(&by_arity, args.len());
    let mut fits = Vec::new();
    for cand in &by_arity {
        let per_arg: Option<Vec<Fit>> = args
            .iter()
            .enumerate()
            .map(|(i, arg)| runtime_fit(&param_at(&cand.1, i), arg, reg))
            .collect();
        if let Some(per_arg) = per_arg {
            let worst = per_arg.into_iter().max().unwrap_or(Fit::Exact);
            fits.push((cand.clone(), worst));
        }
    }
    if fits.is_empty() {
        let classes: Vec<&str> = args.iter().map(|a| a.class_name().unwrap_or("nil")).collect();
        return Err(SprigError::linkage(format!(
            "no method {} matching ({})",
            what,
            classes.join(", ")
        )));
    }
    let candidate = pick_most_specific(fits, args.len(), reg).map_err(|tied| {
        let sigs: Vec<String> = tied.iter().map(|(_, m)| m.signature()).collect();
        SprigError::linkage(format!("ambiguous call to {}: {}", what, sigs.join(" | ")))
    })?;
    Ok(DynamicResolution { candidate, contended })
}

pub fn contended_params(candidates: &[Candidate], arity: usize) -> Vec<bool> {
    (0..arity)
        .map(|i| {
            let mut types = candidates.iter().map(|(_, m)| param_at(m, i));
            match types.next() {
                Some(first) => types.any(|t| t != first),
                None => false,
            }
        })
        .collect()
}

pub fn reconcile_varargs(method: &MethodInfo, arg_types: &[Ty], reg: &ClassRegistry) -> VarargsPlan {
    if !method.is_varargs {
        return VarargsPlan::Direct;
    }
    let fixed = method.params.len().saturating_sub(1);
    if arg_types.len() == method.params.len() {
        let vector = Ty::class(names::VECTOR);
        if let Some(last) = arg_types.last() {
            if vector.is_assignable_from(last, reg) {
                return VarargsPlan::Direct;
            }
        }
    }
    VarargsPlan::WrapTail {
        fixed,
        count: arg_types.len().saturating_sub(fixed),
    }
}

/// Applies a [`VarargsPlan`] to runtime arguments.
pub fn pack_varargs(plan: &VarargsPlan, mut args: Vec<Value>) -> Vec<Value> {
    match plan {
        VarargsPlan::Direct => args,
        VarargsPlan::WrapTail { fixed, .. } => {
            let tail = args.split_off((*fixed).min(args.len()));
            args.push(Value::vector(tail));
            args
        }
    }
}

/// Widens a run-time argument to what the chosen parameter expects.
pub fn coerce_arg(value: Value, param: &Ty) -> Value {
    match (param, value) {
        (Ty::Prim(Prim::Double), Value::Int(n)) => Value::Float(n as f64),
        (_, value) => value,
    }
}

/// Reshapes and widens run-time arguments for `method`.
pub fn prepare_args(method: &MethodInfo, args: Vec<Value>, reg: &ClassRegistry) -> Vec<Value> {
    let types: Vec<Ty> = args
        .iter()
        .map(|a| a.class_name().map(Ty::class).unwrap_or(Ty::Any))
        .collect();
    let plan = reconcile_varargs(method, &types, reg);
    pack_varargs(&plan, args)
        .into_iter()
        .enumerate()
        .map(|(i, v)| coerce_arg(v, &param_at(method, i)))
        .collect()
}

pub fn compare_specificity(a: &MethodInfo, b: &MethodInfo, arity: usize, reg: &ClassRegistry) -> Ordering {
    match (at_least_as_specific(a, b, arity, reg), at_least_as_specific(b, a, arity, reg)) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Prim;

    fn reg() -> ClassRegistry {
        ClassRegistry::with_builtins()
    }

    #[test]
    fn static_phase_picks_exact_overload() {
        let reg = reg();
        let abs = reg.find_methods(names::MATH, "abs", true);
        match resolve_static(&abs, &[Ty::Prim(Prim::Long)], &reg) {
            StaticResolution::Unique((_, m)) => assert_eq!(m.params, vec![Ty::Prim(Prim::Long)]),
            other => panic!("expected unique, got {:?}", other),
        }
    }

    #[test]
    fn static_phase_fails_closed_on_any() {
        let reg = reg();
        let abs = reg.find_methods(names::MATH, "abs", true);
        assert!(matches!(
            resolve_static(&abs, &[Ty::Any], &reg),
            StaticResolution::Ambiguous(ref c) if c.len() == 2
        ));
    }

    #[test]
    fn static_phase_reports_no_match() {
        let reg = reg();
        let abs = reg.find_methods(names::MATH, "abs", true);
        assert!(matches!(
            resolve_static(&abs, &[Ty::string()], &reg),
            StaticResolution::NoMatch
        ));
    }

    #[test]
    fn dynamic_phase_uses_runtime_classes() -> Result<(), SprigError> {
        let reg = reg();
        let abs = reg.find_methods(names::MATH, "abs", true);
        let res = resolve_dynamic(&abs, &[Value::Float(-2.0)], &reg, "abs")?;
        assert_eq!(res.candidate.1.params, vec![Ty::Prim(Prim::Double)]);
        assert_eq!(res.contended, vec![true]);
        let res = resolve_dynamic(&abs, &[Value::Int(-2)], &reg, "abs")?;
        assert_eq!(res.candidate.1.params, vec![Ty::Prim(Prim::Long)]);
        Ok(())
    }

    #[test]
    fn dynamic_phase_reports_linkage_errors() {
        let reg = reg();
        let abs = reg.find_methods(names::MATH, "abs", true);
        let err = resolve_dynamic(&abs, &[Value::string("x")], &reg, "abs").unwrap_err();
        assert!(matches!(err, SprigError::Linkage(_)));
    }

    #[test]
    fn uncontended_params_need_no_guard() {
        let reg = reg();
        let subs = reg.find_methods(names::STRING, "substring", false);
        let two = arity_candidates(&subs, 2);
        assert_eq!(contended_params(&two, 2), vec![false, false]);
        let index_of = reg.find_methods(names::STRING, "indexOf", false);
        assert_eq!(contended_params(&index_of, 1), vec![true]);
    }

    #[test]
    fn varargs_wrap_excess_and_deficient_tails() {
        let reg = reg();
        let tuple = reg.get(names::TUPLE).expect("tuple");
        let ctor = &tuple.constructors[0];
        assert_eq!(
            reconcile_varargs(ctor, &[Ty::Any, Ty::Any, Ty::Any], &reg),
            VarargsPlan::WrapTail { fixed: 0, count: 3 }
        );
        assert_eq!(
            reconcile_varargs(ctor, &[], &reg),
            VarargsPlan::WrapTail { fixed: 0, count: 0 }
        );
        assert_eq!(
            reconcile_varargs(ctor, &[Ty::class(names::VECTOR)], &reg),
            VarargsPlan::Direct
        );
        let packed = pack_varargs(
            &VarargsPlan::WrapTail { fixed: 0, count: 2 },
            vec![Value::Int(1), Value::Int(2)],
        );
        assert_eq!(packed, vec![Value::vector([Value::Int(1), Value::Int(2)])]);
    }
}
