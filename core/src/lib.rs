//! # modelport-core
//!
//! Export-time interception core for deploying trained vision models to
//! inference backends.
//!
//! The crate revolves around three mechanisms:
//!
//! * a [rewrite registry](rewrite::RewriteRegistry) holding guarded
//!   replacement implementations for qualified names, and a
//!   [patch scope](rewrite::PatchScope) that installs the winning
//!   replacements for the duration of a trace and restores the originals on
//!   exit, no matter how the scope ends;
//! * [boundary marking](mark::mark), which tags tensors flowing through a
//!   traced computation as named subgraph inputs and outputs so one trace can
//!   be sliced into several exported graphs;
//! * the [task contract](task::Task), one implementation per supported model
//!   family, keeping the export, test and profile workflows family-agnostic.
//!
//! Model families and their registered rewrites live in `modelport-vision`;
//! this crate only provides the machinery.

#[macro_use]
mod macros;

pub mod config;
pub mod errors;
pub mod export;
pub mod mark;
pub mod path;
pub mod rewrite;
pub mod runtime;
pub mod symbols;
pub mod task;
pub mod tensor;
pub mod trace;

pub use anyhow;
pub use ndarray;

/// A SmallVec instantiation with 4 embeddable values.
///
/// Used about everywhere in modelport for node inputs and outputs, and for
/// tensor dimensions.
pub type TVec<T> = smallvec::SmallVec<[T; 4]>;

pub mod prelude {
    pub use crate::config::{Backend, DeployConfig, ModelConfig};
    pub use crate::errors::{ExportError, PortResult};
    pub use crate::mark::mark;
    pub use crate::path::QualifiedName;
    pub use crate::rewrite::{Guard, PatchScope, RewriteContext, RewriteRegistry};
    pub use crate::task::{
        ForwardModel, InputMeta, Predictions, RawInput, StructuredInput, Task, TaskKind,
        TaskOutput,
    };
    pub use crate::tensor::{TValue, Tensor};
    pub use crate::trace::{Boundary, BoundaryRole, Trace, TraceSession};
    pub use crate::tvec;
    pub use crate::TVec;
}

pub mod internal {
    pub use crate::prelude::*;
    pub use crate::runtime::{Runnable, Runtime};
    pub use crate::symbols::{self, callable, Callable};
    pub use crate::tensor::{format_shape, shape_of};
    pub use anyhow::{bail, ensure, Context as _};
    pub use ndarray as port_ndarray;
    pub use std::sync::Arc;
}
