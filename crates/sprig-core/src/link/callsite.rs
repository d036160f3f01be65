//! Inline-cache call sites.
//!
//! A site starts `Cold` and moves through `Monomorphic`, `Polymorphic` and
//! `Megamorphic` to the terminal `Unoptimized` stage. Every relink spends one
//! unit of the current stage's budget; a stage whose budget is spent, disabled
//! (threshold at or below zero) or that cannot produce a target hands over to
//! the next stage within the same relink.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::debug;

use super::{CallSiteSpec, GuardedHandle, Handle, Linker, ShapeKey};
use crate::error::SprigError;
use crate::options::CallSiteThresholds;
use crate::runtime::Runtime;
use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Cold,
    Monomorphic,
    Polymorphic,
    Megamorphic,
    Unoptimized,
}

impl Stage {
    fn next(self) -> Stage {
        match self {
            Stage::Cold => Stage::Monomorphic,
            Stage::Monomorphic => Stage::Polymorphic,
            Stage::Polymorphic => Stage::Megamorphic,
            Stage::Megamorphic | Stage::Unoptimized => Stage::Unoptimized,
        }
    }
}

pub enum Dispatch {
    Done(Value),
    Relink,
}

type TargetFn = Arc<dyn Fn(&Runtime, &[Value]) -> Result<Dispatch, SprigError> + Send + Sync>;

/// The currently installed dispatch code of a site.
pub struct Target {
    pub stage: Stage,
    /// Linked without any guard.
    pub is_static: bool,
    run: TargetFn,
}

impl Target {
    fn new(stage: Stage, is_static: bool, run: TargetFn) -> Arc<Self> {
        Arc::new(Self { stage, is_static, run })
    }

    fn cold() -> Arc<Self> {
        Target::new(Stage::Cold, false, Arc::new(|_: &Runtime, _: &[Value]| Ok(Dispatch::Relink)))
    }

    fn unguarded(stage: Stage, handle: Handle, is_static: bool) -> Arc<Self> {
        Target::new(stage, is_static, Arc::new(move |rt: &Runtime, args: &[Value]| Ok(Dispatch::Done(handle(rt, args)?))))
    }

    fn chain(stage: Stage, entries: im::Vector<GuardedHandle>) -> Arc<Self> {
        Target::new(
            stage,
            false,
            Arc::new(move |rt: &Runtime, args: &[Value]| {
                for entry in entries.iter() {
                    if (entry.guard)(args) {
                        return Ok(Dispatch::Done((entry.handle)(rt, args)?));
                    }
                }
                Ok(Dispatch::Relink)
            }),
        )
    }

    fn table(linker: Arc<dyn Linker>, spec: Arc<CallSiteSpec>, table: im::HashMap<ShapeKey, GuardedHandle>) -> Arc<Self> {
        Target::new(
            Stage::Megamorphic,
            false,
            Arc::new(move |rt: &Runtime, args: &[Value]| {
                let Some(key) = linker.shape_key(&spec, args) else {
                    return Ok(Dispatch::Relink);
                };
                match table.get(&key) {
                    Some(entry) if (entry.guard)(args) => Ok(Dispatch::Done((entry.handle)(rt, args)?)),
                    _ => Ok(Dispatch::Relink),
                }
            }),
        )
    }
}

struct SiteState {
    stage: Stage,
    relinks: i32,
    total_relinks: usize,
    chain: im::Vector<GuardedHandle>,
    table: im::HashMap<ShapeKey, GuardedHandle>,
}

pub struct CallSite {
    pub spec: Arc<CallSiteSpec>,
    linker: Arc<dyn Linker>,
    thresholds: CallSiteThresholds,
    state: Mutex<SiteState>,
    target: RwLock<Arc<Target>>,
}

impl fmt::Debug for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#<CallSite {} {:?}>", self.spec.describe(), self.stage())
    }
}

impl CallSite {
    pub fn new(spec: CallSiteSpec, linker: Arc<dyn Linker>, thresholds: CallSiteThresholds) -> Self {
        Self {
            spec: Arc::new(spec),
            linker,
            thresholds,
            state: Mutex::new(SiteState {
                stage: Stage::Cold,
                relinks: 0,
                total_relinks: 0,
                chain: im::Vector::new(),
                table: im::HashMap::new(),
            }),
            target: RwLock::new(Target::cold()),
        }
    }

    pub fn stage(&self) -> Stage {
        self.current().stage
    }

    pub fn is_statically_linked(&self) -> bool {
        self.current().is_static
    }

    pub fn relink_count(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).total_relinks
    }

    fn current(&self) -> Arc<Target> {
        self.target.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn invoke(&self, rt: &Runtime, args: &[Value]) -> Result<Value, SprigError> {
        loop {
            let target = self.current();
            match (target.run)(rt, args)? {
                Dispatch::Done(value) => return Ok(value),
                Dispatch::Relink => self.relink(rt, args, &target)?,
            }
        }
    }

    fn install(&self, target: Arc<Target>) {
        debug!(site = %self.spec.describe(), stage = ?target.stage, linker = self.linker.name(), "call site linked");
        *self.target.write().unwrap_or_else(PoisonError::into_inner) = target;
    }

    fn budget(&self, stage: Stage) -> i32 {
        match stage {
            Stage::Monomorphic => self.thresholds.monomorphic,
            Stage::Polymorphic => self.thresholds.polymorphic,
            Stage::Megamorphic => self.thresholds.megamorphic,
            Stage::Cold | Stage::Unoptimized => 0,
        }
    }

    fn relink(&self, rt: &Runtime, args: &[Value], failed: &Arc<Target>) -> Result<(), SprigError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !Arc::ptr_eq(&self.current(), failed) {
            // another thread already replaced the target that sent us here
            return Ok(());
        }
        state.total_relinks += 1;
        loop {
            let stage = state.stage;
            if stage == Stage::Cold {
                state.stage = Stage::Monomorphic;
                state.relinks = 0;
                if let Some(handle) = self.linker.link_static(rt, &self.spec)? {
                    self.install(Target::unguarded(Stage::Monomorphic, handle, true));
                    return Ok(());
                }
                continue;
            }
            if stage == Stage::Unoptimized {
                self.install(Target::unguarded(Stage::Unoptimized, self.linker.link_generic(&self.spec), false));
                return Ok(());
            }
            let budget = self.budget(stage);
            let key = match stage {
                Stage::Megamorphic => self.linker.shape_key(&self.spec, args),
                _ => None,
            };
            let usable = budget > 0
                && state.relinks < budget
                && (stage != Stage::Megamorphic || key.is_some());
            if !usable {
                state.stage = stage.next();
                state.relinks = 0;
                continue;
            }
            state.relinks += 1;
            let Some(entry) = self.linker.link_guarded(rt, &self.spec, args)? else {
                state.stage = stage.next();
                state.relinks = 0;
                continue;
            };
            let target = match (stage, key) {
                (Stage::Monomorphic, _) => {
                    state.chain = im::Vector::unit(entry.clone());
                    Target::chain(Stage::Monomorphic, state.chain.clone())
                }
                (Stage::Polymorphic, _) => {
                    state.chain.push_front(entry);
                    while state.chain.len() > budget as usize {
                        state.chain.pop_back();
                    }
                    Target::chain(Stage::Polymorphic, state.chain.clone())
                }
                (_, Some(key)) => {
                    state.table.insert(key, entry);
                    Target::table(self.linker.clone(), self.spec.clone(), state.table.clone())
                }
                (_, None) => return Err(SprigError::internal("megamorphic relink without a shape key")),
            };
            self.install(target);
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{GuardedHandle, SiteKind};
    use crate::types::Ty;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Guards on the first argument's value; counts how often it was asked.
    struct EchoLinker {
        guarded: AtomicUsize,
        with_static: bool,
        with_keys: bool,
    }

    impl Linker for EchoLinker {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn link_static(&self, _rt: &Runtime, _spec: &CallSiteSpec) -> Result<Option<Handle>, SprigError> {
            if self.with_static {
                Ok(Some(Arc::new(|_: &Runtime, _: &[Value]| Ok(Value::keyword("static")))))
            } else {
                Ok(None)
            }
        }

        fn link_guarded(&self, _rt: &Runtime, _spec: &CallSiteSpec, args: &[Value]) -> Result<Option<GuardedHandle>, SprigError> {
            self.guarded.fetch_add(1, Ordering::SeqCst);
            let seen = args[0].clone();
            let expect = seen.clone();
            Ok(Some(GuardedHandle {
                guard: Arc::new(move |args: &[Value]| args[0] == expect),
                handle: Arc::new(move |_: &Runtime, _: &[Value]| Ok(seen.clone())),
            }))
        }

        fn shape_key(&self, _spec: &CallSiteSpec, args: &[Value]) -> Option<ShapeKey> {
            self.with_keys.then(|| vec![args[0].to_string()])
        }

        fn link_generic(&self, _spec: &CallSiteSpec) -> Handle {
            Arc::new(|_: &Runtime, args: &[Value]| Ok(Value::vector([Value::keyword("generic"), args[0].clone()])))
        }
    }

    fn site(thresholds: CallSiteThresholds, with_static: bool, with_keys: bool) -> CallSite {
        let linker = Arc::new(EchoLinker {
            guarded: AtomicUsize::new(0),
            with_static,
            with_keys,
        });
        CallSite::new(CallSiteSpec::new(SiteKind::Invoke, vec![Ty::Any], Ty::Any), linker, thresholds)
    }

    fn thresholds(mono: i32, poly: i32, mega: i32) -> CallSiteThresholds {
        CallSiteThresholds {
            monomorphic: mono,
            polymorphic: poly,
            megamorphic: mega,
        }
    }

    #[test]
    fn cold_site_prefers_static_link() -> Result<(), SprigError> {
        let rt = Runtime::new();
        let site = site(thresholds(4, 8, 64), true, false);
        assert_eq!(site.stage(), Stage::Cold);
        assert_eq!(site.invoke(&rt, &[Value::Int(1)])?, Value::keyword("static"));
        assert!(site.is_statically_linked());
        assert_eq!(site.invoke(&rt, &[Value::Int(2)])?, Value::keyword("static"));
        assert_eq!(site.relink_count(), 1);
        Ok(())
    }

    #[test]
    fn stages_advance_as_budgets_are_spent() -> Result<(), SprigError> {
        let rt = Runtime::new();
        let site = site(thresholds(1, 2, 2), false, true);
        site.invoke(&rt, &[Value::Int(1)])?;
        assert_eq!(site.stage(), Stage::Monomorphic);
        site.invoke(&rt, &[Value::Int(2)])?;
        assert_eq!(site.stage(), Stage::Polymorphic);
        site.invoke(&rt, &[Value::Int(3)])?;
        assert_eq!(site.stage(), Stage::Polymorphic);
        site.invoke(&rt, &[Value::Int(4)])?;
        assert_eq!(site.stage(), Stage::Megamorphic);
        site.invoke(&rt, &[Value::Int(5)])?;
        assert_eq!(site.stage(), Stage::Megamorphic);
        assert_eq!(site.invoke(&rt, &[Value::Int(4)])?, Value::Int(4));
        let out = site.invoke(&rt, &[Value::Int(6)])?;
        assert_eq!(site.stage(), Stage::Unoptimized);
        assert_eq!(out, Value::vector([Value::keyword("generic"), Value::Int(6)]));
        Ok(())
    }

    #[test]
    fn disabled_stages_are_skipped_in_one_relink() -> Result<(), SprigError> {
        let rt = Runtime::new();
        let site = site(CallSiteThresholds::unoptimized(), false, true);
        site.invoke(&rt, &[Value::Int(1)])?;
        assert_eq!(site.stage(), Stage::Unoptimized);
        assert_eq!(site.relink_count(), 1);
        Ok(())
    }

    #[test]
    fn megamorphic_needs_shape_keys() -> Result<(), SprigError> {
        let rt = Runtime::new();
        let site = site(thresholds(1, 0, 8), false, false);
        site.invoke(&rt, &[Value::Int(1)])?;
        assert_eq!(site.stage(), Stage::Monomorphic);
        site.invoke(&rt, &[Value::Int(2)])?;
        assert_eq!(site.stage(), Stage::Unoptimized);
        Ok(())
    }

    #[test]
    fn polymorphic_chain_keeps_earlier_entries() -> Result<(), SprigError> {
        let rt = Runtime::new();
        let site = site(thresholds(1, 4, 0), false, false);
        for n in [1, 2, 3] {
            site.invoke(&rt, &[Value::Int(n)])?;
        }
        let before = site.relink_count();
        for n in [1, 2, 3] {
            assert_eq!(site.invoke(&rt, &[Value::Int(n)])?, Value::Int(n));
        }
        assert_eq!(site.relink_count(), before);
        Ok(())
    }
}
