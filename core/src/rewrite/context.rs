//! The context visible to running replacements.
//!
//! While a patch scope is active, [`RewriteContext::current`] exposes the
//! active deployment configuration; from inside a replacement body it also
//! exposes the original callable the replacement stands in for, so a rewrite
//! can delegate part of the work to the original logic.

use std::sync::Mutex;

use lazy_static::lazy_static;

use crate::internal::*;

struct ActiveState {
    config: DeployConfig,
    /// Innermost replacement invocation last: the delegation stack.
    originals: Vec<Arc<dyn Callable>>,
}

lazy_static! {
    static ref ACTIVE: Mutex<Option<ActiveState>> = Mutex::new(None);
}

fn state() -> std::sync::MutexGuard<'static, Option<ActiveState>> {
    ACTIVE.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn activate(config: DeployConfig) {
    *state() = Some(ActiveState { config, originals: vec![] });
}

pub(crate) fn deactivate() {
    *state() = None;
}

pub(crate) fn push_original(original: Arc<dyn Callable>) -> PortResult<()> {
    match state().as_mut() {
        Some(active) => {
            active.originals.push(original);
            Ok(())
        }
        None => Err(ExportError::ContextUnavailable("no active patch scope").into()),
    }
}

pub(crate) fn pop_original() {
    if let Some(active) = state().as_mut() {
        active.originals.pop();
    }
}

/// A read-only snapshot of the rewrite machinery's state, taken where the
/// caller stands: the active configuration, and the original callable when
/// taken from inside a replacement invocation.
#[derive(Debug)]
pub struct RewriteContext {
    config: DeployConfig,
    original: Option<Arc<dyn Callable>>,
}

impl RewriteContext {
    pub fn current() -> PortResult<RewriteContext> {
        match state().as_ref() {
            Some(active) => Ok(RewriteContext {
                config: active.config.clone(),
                original: active.originals.last().cloned(),
            }),
            None => Err(ExportError::ContextUnavailable("no active patch scope").into()),
        }
    }

    /// The exact configuration the active patch scope was opened with.
    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    /// The callable the currently executing replacement stands in for.
    pub fn original(&self) -> PortResult<Arc<dyn Callable>> {
        self.original.clone().ok_or_else(|| {
            ExportError::ContextUnavailable("no replacement invocation in flight").into()
        })
    }
}
