//! The narrow seam to engine backends.
//!
//! Real engines (ONNX runtimes, TensorRT builders) live outside this crate;
//! they are reached exclusively through [`Runtime::prepare`] and
//! [`Runnable::run`]. The [`ReferenceRuntime`] replays the reference model
//! and stands in wherever a workflow needs a backend without an engine.

use std::fmt::Debug;
use std::path::Path;

use crate::internal::*;

pub trait Runtime: Debug {
    fn name(&self) -> &'static str;
    /// Loads a previously exported artifact into something runnable.
    fn prepare(&self, artifact: &Path) -> PortResult<Box<dyn Runnable>>;
}

pub trait Runnable: Send + Sync {
    fn run(&self, inputs: TVec<TValue>) -> PortResult<TVec<TValue>>;
}

/// Replays the unmodified reference model. The artifact path is ignored.
pub struct ReferenceRuntime {
    model: Arc<dyn ForwardModel>,
}

impl Debug for ReferenceRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "ReferenceRuntime({})", self.model.name())
    }
}

impl ReferenceRuntime {
    pub fn new(model: Arc<dyn ForwardModel>) -> ReferenceRuntime {
        ReferenceRuntime { model }
    }
}

impl Runtime for ReferenceRuntime {
    fn name(&self) -> &'static str {
        "reference"
    }

    fn prepare(&self, artifact: &Path) -> PortResult<Box<dyn Runnable>> {
        log::debug!("reference runtime ignores artifact {}", artifact.display());
        Ok(Box::new(ReferenceRunnable { model: self.model.clone() }))
    }
}

struct ReferenceRunnable {
    model: Arc<dyn ForwardModel>,
}

impl Runnable for ReferenceRunnable {
    fn run(&self, mut inputs: TVec<TValue>) -> PortResult<TVec<TValue>> {
        ensure!(inputs.len() == 1, "reference runtime expects a single input tensor");
        let mut session = TraceSession::new();
        self.model.forward(&mut session, inputs.remove(0))
    }
}
