//! Boundary marking.
//!
//! Wrapping a callable with [`mark`] declares it a boundary producer: every
//! execution inside a trace session records its declared inputs before
//! delegation and its declared outputs after, under a fresh group id, so the
//! traced computation can later be sliced into named subgraphs.

use crate::internal::*;
use crate::trace::BoundaryRole;

struct Marked {
    inner: Arc<dyn Callable>,
    subgraph: String,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

impl Callable for Marked {
    fn call(&self, session: &mut TraceSession, inputs: TVec<TValue>) -> PortResult<TVec<TValue>> {
        ensure!(
            inputs.len() == self.input_names.len(),
            "boundary `{}' declares {} input(s), got {}",
            self.subgraph,
            self.input_names.len(),
            inputs.len()
        );
        let group = session.begin_group();
        for (name, value) in self.input_names.iter().zip(&inputs) {
            session.record_boundary(
                name.as_str(),
                BoundaryRole::Input,
                value.clone(),
                &self.subgraph,
                group,
            );
        }
        let outputs = self.inner.call(session, inputs)?;
        ensure!(
            outputs.len() == self.output_names.len(),
            "boundary `{}' declares {} output(s), got {}",
            self.subgraph,
            self.output_names.len(),
            outputs.len()
        );
        for (name, value) in self.output_names.iter().zip(&outputs) {
            session.record_boundary(
                name.as_str(),
                BoundaryRole::Output,
                value.clone(),
                &self.subgraph,
                group,
            );
        }
        Ok(outputs)
    }
}

/// Declares `inner` a boundary producer identified by its qualified name.
pub fn mark_default(
    inner: Arc<dyn Callable>,
    name: &QualifiedName,
    input_names: &[&str],
    output_names: &[&str],
) -> Arc<dyn Callable> {
    mark(inner, name.as_str(), input_names, output_names)
}

/// Declares `inner` a boundary producer under a caller-chosen `subgraph`
/// identifier, with fixed ordered input and output names.
pub fn mark(
    inner: Arc<dyn Callable>,
    subgraph: impl Into<String>,
    input_names: &[&str],
    output_names: &[&str],
) -> Arc<dyn Callable> {
    Arc::new(Marked {
        inner,
        subgraph: subgraph.into(),
        input_names: input_names.iter().map(|s| s.to_string()).collect(),
        output_names: output_names.iter().map(|s| s.to_string()).collect(),
    })
}
