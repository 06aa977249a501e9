//! The process-wide symbol table.
//!
//! Model code invokes its rewritable pieces through [`call`] rather than
//! directly, so the callable actually run is looked up at call time. An
//! active [`PatchScope`](crate::rewrite::PatchScope) swaps entries of this
//! table; everything else only reads it.

use std::collections::HashMap;
use std::sync::Mutex;

use lazy_static::lazy_static;

use crate::internal::*;

/// Anything the symbol table can hold: a piece of a model's forward
/// computation operating on traced values.
pub trait Callable: Send + Sync {
    fn call(&self, session: &mut TraceSession, inputs: TVec<TValue>) -> PortResult<TVec<TValue>>;
}

impl<F> Callable for F
where
    F: Fn(&mut TraceSession, TVec<TValue>) -> PortResult<TVec<TValue>> + Send + Sync,
{
    fn call(&self, session: &mut TraceSession, inputs: TVec<TValue>) -> PortResult<TVec<TValue>> {
        self(session, inputs)
    }
}

impl std::fmt::Debug for dyn Callable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<callable>")
    }
}

/// Wraps a closure as a shareable [`Callable`].
pub fn callable<F>(f: F) -> Arc<dyn Callable>
where
    F: Fn(&mut TraceSession, TVec<TValue>) -> PortResult<TVec<TValue>> + Send + Sync + 'static,
{
    Arc::new(f)
}

lazy_static! {
    static ref SYMBOLS: Mutex<HashMap<QualifiedName, Arc<dyn Callable>>> =
        Mutex::new(HashMap::new());
}

fn table() -> std::sync::MutexGuard<'static, HashMap<QualifiedName, Arc<dyn Callable>>> {
    SYMBOLS.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Registers (or re-registers) a callable under `name`. Meant to run during
/// the explicit initialization phase, before any patch scope opens.
pub fn register(name: QualifiedName, callable: Arc<dyn Callable>) {
    if table().insert(name.clone(), callable).is_some() {
        log::debug!("re-registered symbol {name}");
    }
}

/// Resolves `name` to the currently live callable.
pub fn resolve(name: &QualifiedName) -> PortResult<Arc<dyn Callable>> {
    table()
        .get(name)
        .cloned()
        .ok_or_else(|| ExportError::Resolution(name.to_string()).into())
}

/// Swaps in `callable` for `name`, handing back the previous occupant.
/// Only the patch scope uses this.
pub(crate) fn install(
    name: &QualifiedName,
    callable: Arc<dyn Callable>,
) -> PortResult<Arc<dyn Callable>> {
    let mut table = table();
    let slot = table
        .get_mut(name)
        .ok_or_else(|| anyhow::Error::from(ExportError::Resolution(name.to_string())))?;
    Ok(std::mem::replace(slot, callable))
}

#[cfg(test)]
pub(crate) fn unregister(name: &QualifiedName) {
    table().remove(name);
}

/// Resolves `name` and invokes it, recording the invocation in the session's
/// op log.
pub fn call(
    name: &QualifiedName,
    session: &mut TraceSession,
    inputs: TVec<TValue>,
) -> PortResult<TVec<TValue>> {
    let callable = resolve(name)?;
    let input_shapes: TVec<TVec<usize>> = inputs.iter().map(|t| shape_of(t)).collect();
    let outputs = callable
        .call(session, inputs)
        .with_context(|| format!("invoking `{name}'"))?;
    session.record_op(name.clone(), input_shapes, outputs.iter().map(|t| shape_of(t)).collect());
    Ok(outputs)
}
