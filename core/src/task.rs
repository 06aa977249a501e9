//! The task contract: the uniform lifecycle every supported model family
//! implements so the export, test and profile workflows stay
//! family-agnostic.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::internal::*;
use crate::runtime::Runnable;

/// The closed set of supported model families. Adding a family is a source
/// change, not a runtime registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    Detection,
    PoseEstimation,
    Segmentation,
}

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::Detection => "detection",
            TaskKind::PoseEstimation => "pose-estimation",
            TaskKind::Segmentation => "segmentation",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for TaskKind {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> PortResult<TaskKind> {
        match s {
            "detection" => Ok(TaskKind::Detection),
            "pose-estimation" => Ok(TaskKind::PoseEstimation),
            "segmentation" => Ok(TaskKind::Segmentation),
            _ => bail!("unknown task family `{s}'"),
        }
    }
}

/// What a workflow hands a task to build input from: either an image on disk
/// or pixels already in memory (H x W x C, RGB).
#[derive(Debug, Clone)]
pub enum RawInput {
    Path(std::path::PathBuf),
    Pixels(Array3<f32>),
}

/// Closed metadata describing how a raw input was coerced: everything
/// post-processing needs to map predictions back to the original image.
#[derive(Debug, Clone, PartialEq)]
pub struct InputMeta {
    /// Original (height, width) in pixels.
    pub original_size: [usize; 2],
    /// (height, width) after resizing to the model input.
    pub resized_size: [usize; 2],
    /// original / resized, per (x, y).
    pub scale: [f32; 2],
    pub normalized: bool,
}

/// The structured input a family's models consume: named tensors plus the
/// coercion metadata.
#[derive(Debug, Clone)]
pub struct StructuredInput {
    pub tensors: BTreeMap<String, TValue>,
    pub meta: InputMeta,
}

impl StructuredInput {
    pub fn tensor(&self, name: &str) -> PortResult<&TValue> {
        self.tensors
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("structured input carries no tensor `{name}'"))
    }
}

/// Raw forward outputs, tagged with the family that produced them.
#[derive(Debug, Clone)]
pub struct Predictions {
    pub family: TaskKind,
    pub outputs: TVec<TValue>,
}

/// Post-processed, family-specific results.
#[derive(Debug, Clone)]
pub enum TaskOutput {
    /// Boxes as (N, 5) `[x0, y0, x1, y1, score]` plus (N,) labels.
    Detections { dets: Tensor, labels: Tensor },
    /// Keypoints as (K, 3) `[x, y, score]`.
    Keypoints { keypoints: Tensor },
    /// Per-pixel class indices.
    SegmentationMap { mask: ndarray::Array2<u32> },
}

/// A reference model: the unmodified forward computation, invoked through
/// the symbol table so an active patch scope can substitute pieces of it.
pub trait ForwardModel: Send + Sync {
    fn name(&self) -> &str;
    fn forward(&self, session: &mut TraceSession, input: TValue) -> PortResult<TVec<TValue>>;
}

/// The capability set each model family implements.
///
/// Tasks are consumers of the rewrite machinery, never owners: an export
/// workflow opens the patch scope itself and then traces through the model,
/// independent of task identity.
pub trait Task: Send + Sync {
    fn kind(&self) -> TaskKind;

    /// Stable model name used for backend artifact lookup.
    fn describe_model(&self) -> String;

    /// Coerces a raw input into the family's structure. Deterministic; fails
    /// with [`ExportError::Input`] when the raw input cannot be read, and
    /// leaves no partial structure behind.
    fn build_input(
        &self,
        raw: &RawInput,
        target_shape: Option<[usize; 2]>,
    ) -> PortResult<(StructuredInput, TValue)>;

    /// Runs the unmodified reference model: the correctness oracle.
    fn run_reference(
        &self,
        model: &dyn ForwardModel,
        input: &StructuredInput,
    ) -> PortResult<Predictions>;

    /// Runs a backend-prepared artifact against the same structured input
    /// contract as [`Task::run_reference`].
    fn run_backend(
        &self,
        runnable: &dyn Runnable,
        input: &StructuredInput,
    ) -> PortResult<Predictions>;

    /// Pure transform from raw predictions to family-specific results.
    fn post_process(&self, predictions: &Predictions, meta: &InputMeta)
        -> PortResult<TaskOutput>;

    /// Best-effort rendering of results; optional.
    fn visualize(&self, _image: &RawInput, _result: &TaskOutput, _path: &Path) -> PortResult<()> {
        Err(ExportError::Unsupported("visualize").into())
    }

    /// Serializable preprocessing descriptor for a downstream SDK.
    fn get_preprocess(&self) -> PortResult<serde_json::Value> {
        Err(ExportError::Unsupported("get_preprocess").into())
    }

    /// Serializable postprocessing descriptor for a downstream SDK.
    fn get_postprocess(&self) -> PortResult<serde_json::Value> {
        Err(ExportError::Unsupported("get_postprocess").into())
    }
}
