//! Scoped patching of the symbol table.
//!
//! A [`PatchScope`] owns every patch it installs and reverts all of them when
//! it ends, whether through [`PatchScope::close`], an early `?`, or a panic
//! unwinding through the scope body. Patches are process-wide, so at most one
//! scope may be active at a time.

use std::sync::atomic::{AtomicBool, Ordering};

use itertools::Itertools;

use super::context;
use crate::internal::*;

static SCOPE_ACTIVE: AtomicBool = AtomicBool::new(false);

/// The callable a patch scope installs over an original: it exposes the
/// original to the rewrite context for the duration of the invocation, then
/// delegates to the replacement.
struct Patched {
    original: Arc<dyn Callable>,
    replacement: Arc<dyn Callable>,
}

impl Callable for Patched {
    fn call(&self, session: &mut TraceSession, inputs: TVec<TValue>) -> PortResult<TVec<TValue>> {
        context::push_original(self.original.clone())?;
        let result = self.replacement.call(session, inputs);
        context::pop_original();
        result
    }
}

#[derive(Debug)]
struct PatchRecord {
    name: QualifiedName,
    original: Arc<dyn Callable>,
}

/// The bounded lifetime during which rewrites are installed.
///
/// Opening computes the winning replacement for every qualified name the
/// registry has a matching entry for, captures the live callable into an
/// owned record, and installs the replacement in its place. Closing restores
/// every record in reverse installation order, unconditionally attempting
/// all restorations and reporting failures collectively.
#[derive(Debug)]
pub struct PatchScope {
    records: Vec<PatchRecord>,
    closed: bool,
}

impl PatchScope {
    /// Installs every applicable rewrite. Fails fast with
    /// [`ExportError::ScopeReentry`] if a scope is already active anywhere in
    /// the process, and with [`ExportError::Resolution`] if an active name
    /// has no live callable to patch (anything already installed is rolled
    /// back before returning).
    pub fn open(registry: &RewriteRegistry, config: &DeployConfig) -> PortResult<PatchScope> {
        if SCOPE_ACTIVE.swap(true, Ordering::SeqCst) {
            return Err(ExportError::ScopeReentry.into());
        }
        context::activate(config.clone());
        let mut scope = PatchScope { records: vec![], closed: false };
        match scope.install_all(registry, config) {
            Ok(()) => Ok(scope),
            Err(e) => {
                for (name, failure) in scope.release() {
                    log::error!("rolling back `{name}' after failed open: {failure:?}");
                }
                Err(e)
            }
        }
    }

    /// Opens against the process-wide default registry.
    pub fn open_default(config: &DeployConfig) -> PortResult<PatchScope> {
        crate::rewrite::with_default_registry(|registry| PatchScope::open(registry, config))
    }

    fn install_all(
        &mut self,
        registry: &RewriteRegistry,
        config: &DeployConfig,
    ) -> PortResult<()> {
        for name in registry.active_names(config) {
            let Some(replacement) = registry.resolve_active(&name, config)? else {
                continue;
            };
            let original = symbols::resolve(&name)
                .with_context(|| format!("patching `{name}'"))?;
            let patched: Arc<dyn Callable> =
                Arc::new(Patched { original: original.clone(), replacement });
            symbols::install(&name, patched)?;
            log::debug!("patched {name}");
            self.records.push(PatchRecord { name, original });
        }
        Ok(())
    }

    /// How many qualified names this scope has patched.
    pub fn patched(&self) -> usize {
        self.records.len()
    }

    /// Reverts everything and ends the scope, reporting restoration failures
    /// collectively after all records have been attempted.
    pub fn close(mut self) -> PortResult<()> {
        let failures = self.release();
        if failures.is_empty() {
            Ok(())
        } else {
            bail!(
                "failed to restore {} symbol(s) on scope exit: {}",
                failures.len(),
                failures.iter().map(|(name, e)| format!("`{name}': {e}")).join("; ")
            )
        }
    }

    /// Restores records in reverse installation order, never aborting early.
    fn release(&mut self) -> Vec<(QualifiedName, anyhow::Error)> {
        let mut failures = vec![];
        while let Some(record) = self.records.pop() {
            if let Err(e) = symbols::install(&record.name, record.original.clone()) {
                failures.push((record.name, e));
            }
        }
        self.closed = true;
        context::deactivate();
        SCOPE_ACTIVE.store(false, Ordering::SeqCst);
        failures
    }
}

impl Drop for PatchScope {
    fn drop(&mut self) {
        if !self.closed {
            for (name, e) in self.release() {
                log::error!("failed to restore `{name}' on scope exit: {e:?}");
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tensor::tensor0;
    use lazy_static::lazy_static;
    use std::sync::{Mutex, MutexGuard};

    lazy_static! {
        // patches are process-wide: scope tests must not overlap
        static ref EXCLUSIVE: Mutex<()> = Mutex::new(());
    }

    fn serialize() -> MutexGuard<'static, ()> {
        EXCLUSIVE.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn name(s: &str) -> QualifiedName {
        QualifiedName::new(s).unwrap()
    }

    fn constant(value: f32) -> Arc<dyn Callable> {
        callable(move |_, _| Ok(tvec![Arc::new(tensor0(value))]))
    }

    fn call_value(n: &QualifiedName) -> f32 {
        let mut session = TraceSession::new();
        let out = symbols::call(n, &mut session, tvec![]).unwrap();
        out[0][ndarray::IxDyn(&[])]
    }

    #[test]
    fn close_restores_the_pre_scope_callables() {
        let _guard = serialize();
        let n = name("t.scope.restore");
        symbols::register(n.clone(), constant(1.0));
        let before = symbols::resolve(&n).unwrap();

        let mut registry = RewriteRegistry::new();
        registry.register(n.clone(), Guard::any(), constant(2.0));
        let cfg = DeployConfig::new(Backend::Onnxruntime);

        let scope = PatchScope::open(&registry, &cfg).unwrap();
        assert_eq!(scope.patched(), 1);
        assert_eq!(call_value(&n), 2.0);
        scope.close().unwrap();

        assert_eq!(call_value(&n), 1.0);
        assert!(Arc::ptr_eq(&before, &symbols::resolve(&n).unwrap()));
    }

    #[test]
    fn an_error_inside_the_scope_body_does_not_leak_patches() {
        let _guard = serialize();
        let n = name("t.scope.early_exit");
        symbols::register(n.clone(), constant(1.0));
        let mut registry = RewriteRegistry::new();
        registry.register(n.clone(), Guard::any(), constant(2.0));
        let cfg = DeployConfig::new(Backend::Onnxruntime);

        let body = || -> PortResult<()> {
            let _scope = PatchScope::open(&registry, &cfg)?;
            bail!("tracing blew up")
        };
        assert!(body().is_err());
        assert_eq!(call_value(&n), 1.0);
    }

    #[test]
    fn a_panic_inside_the_scope_body_does_not_leak_patches() {
        let _guard = serialize();
        let n = name("t.scope.panic");
        symbols::register(n.clone(), constant(1.0));
        let mut registry = RewriteRegistry::new();
        registry.register(n.clone(), Guard::any(), constant(2.0));
        let cfg = DeployConfig::new(Backend::Onnxruntime);

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _scope = PatchScope::open(&registry, &cfg).unwrap();
            panic!("tracing blew up");
        }));
        assert!(outcome.is_err());
        assert_eq!(call_value(&n), 1.0);
        // the guard flag must have been released too
        PatchScope::open(&registry, &cfg).unwrap().close().unwrap();
    }

    #[test]
    fn nested_scopes_are_rejected_until_the_first_closes() {
        let _guard = serialize();
        let n = name("t.scope.reentry");
        symbols::register(n.clone(), constant(1.0));
        let mut registry = RewriteRegistry::new();
        registry.register(n.clone(), Guard::any(), constant(2.0));
        let cfg = DeployConfig::new(Backend::Onnxruntime);

        let scope = PatchScope::open(&registry, &cfg).unwrap();
        let err = PatchScope::open(&registry, &cfg).unwrap_err();
        assert_eq!(err.downcast_ref::<ExportError>(), Some(&ExportError::ScopeReentry));
        scope.close().unwrap();
        PatchScope::open(&registry, &cfg).unwrap().close().unwrap();
    }

    #[test]
    fn open_rolls_back_when_a_name_does_not_resolve() {
        let _guard = serialize();
        let good = name("t.scope.rollback.good");
        let missing = name("t.scope.rollback.missing");
        symbols::register(good.clone(), constant(1.0));
        let mut registry = RewriteRegistry::new();
        registry.register(good.clone(), Guard::any(), constant(2.0));
        registry.register(missing.clone(), Guard::any(), constant(3.0));
        let cfg = DeployConfig::new(Backend::Onnxruntime);

        let err = PatchScope::open(&registry, &cfg).unwrap_err();
        assert!(err.to_string().contains("patching"));
        assert_eq!(call_value(&good), 1.0);
        // the failed open must not leave the guard flag set
        let mut small = RewriteRegistry::new();
        small.register(good.clone(), Guard::any(), constant(2.0));
        PatchScope::open(&small, &cfg).unwrap().close().unwrap();
    }

    #[test]
    fn restoration_failures_are_collected_not_aborting() {
        let _guard = serialize();
        let kept = name("t.scope.collect.kept");
        let doomed = name("t.scope.collect.doomed");
        symbols::register(kept.clone(), constant(1.0));
        symbols::register(doomed.clone(), constant(1.0));
        let mut registry = RewriteRegistry::new();
        registry.register(kept.clone(), Guard::any(), constant(2.0));
        registry.register(doomed.clone(), Guard::any(), constant(2.0));
        let cfg = DeployConfig::new(Backend::Onnxruntime);

        let scope = PatchScope::open(&registry, &cfg).unwrap();
        symbols::unregister(&doomed);
        let err = scope.close().unwrap_err();
        assert!(err.to_string().contains("t.scope.collect.doomed"));
        // the other record was still restored
        assert_eq!(call_value(&kept), 1.0);
        // and the scope is really over
        let err = RewriteContext::current().unwrap_err();
        assert_eq!(
            err.downcast_ref::<ExportError>(),
            Some(&ExportError::ContextUnavailable("no active patch scope"))
        );
    }

    #[test]
    fn context_reports_the_config_passed_to_open() {
        let _guard = serialize();
        let err = RewriteContext::current().unwrap_err();
        assert_eq!(
            err.downcast_ref::<ExportError>(),
            Some(&ExportError::ContextUnavailable("no active patch scope"))
        );

        let cfg = DeployConfig::new(Backend::Tensorrt)
            .with_opset(13)
            .with_dynamic_axis("input", 0, "batch");
        let registry = RewriteRegistry::new();
        let scope = PatchScope::open(&registry, &cfg).unwrap();
        let ctx = RewriteContext::current().unwrap();
        assert_eq!(ctx.config(), &cfg);
        // outside a replacement invocation there is no original
        let err = ctx.original().unwrap_err();
        assert_eq!(
            err.downcast_ref::<ExportError>(),
            Some(&ExportError::ContextUnavailable("no replacement invocation in flight"))
        );
        scope.close().unwrap();
    }

    #[test]
    fn a_replacement_can_delegate_to_the_original() {
        let _guard = serialize();
        let n = name("t.scope.delegate");
        symbols::register(n.clone(), constant(10.0));
        let mut registry = RewriteRegistry::new();
        registry.register(
            n.clone(),
            Guard::any(),
            callable(|session, inputs| {
                let ctx = RewriteContext::current()?;
                let out = ctx.original()?.call(session, inputs)?;
                Ok(tvec![Arc::new(out[0].mapv(|x| x + 1.0))])
            }),
        );
        let cfg = DeployConfig::new(Backend::Onnxruntime);
        let scope = PatchScope::open(&registry, &cfg).unwrap();
        assert_eq!(call_value(&n), 11.0);
        scope.close().unwrap();
        assert_eq!(call_value(&n), 10.0);
    }
}
