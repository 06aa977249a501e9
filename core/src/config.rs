use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::internal::*;
use crate::task::TaskKind;

/// The inference engines an export can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Onnxruntime,
    Tensorrt,
    Ncnn,
    Openvino,
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Onnxruntime => "onnxruntime",
            Backend::Tensorrt => "tensorrt",
            Backend::Ncnn => "ncnn",
            Backend::Openvino => "openvino",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Backend {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> PortResult<Backend> {
        match s {
            "onnxruntime" => Ok(Backend::Onnxruntime),
            "tensorrt" => Ok(Backend::Tensorrt),
            "ncnn" => Ok(Backend::Ncnn),
            "openvino" => Ok(Backend::Openvino),
            _ => bail!("unknown backend `{s}'"),
        }
    }
}

fn default_opset() -> i64 {
    11
}

/// The immutable snapshot of backend, IR version and shape policy governing
/// one export invocation.
///
/// `dynamic_axes` follows the ONNX convention: input or output name, to axis
/// index, to a symbolic axis label. Any key-value pair the deployment
/// document carries beyond the known fields lands in `custom` and is passed
/// through untouched for backend-specific rewrites to consult.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployConfig {
    pub backend: Backend,
    #[serde(default = "default_opset")]
    pub opset_version: i64,
    /// Target spatial size as (width, height), if the export is static.
    #[serde(default)]
    pub input_shape: Option<[usize; 2]>,
    #[serde(default)]
    pub input_names: Vec<String>,
    #[serde(default)]
    pub output_names: Vec<String>,
    #[serde(default)]
    pub dynamic_axes: BTreeMap<String, BTreeMap<usize, String>>,
    #[serde(flatten)]
    pub custom: BTreeMap<String, String>,
}

impl DeployConfig {
    pub fn new(backend: Backend) -> DeployConfig {
        DeployConfig {
            backend,
            opset_version: default_opset(),
            input_shape: None,
            input_names: vec![],
            output_names: vec![],
            dynamic_axes: BTreeMap::new(),
            custom: BTreeMap::new(),
        }
    }

    pub fn with_opset(mut self, opset_version: i64) -> DeployConfig {
        self.opset_version = opset_version;
        self
    }

    pub fn with_input_shape(mut self, width: usize, height: usize) -> DeployConfig {
        self.input_shape = Some([width, height]);
        self
    }

    pub fn with_dynamic_axis(
        mut self,
        input: impl Into<String>,
        axis: usize,
        label: impl Into<String>,
    ) -> DeployConfig {
        self.dynamic_axes.entry(input.into()).or_default().insert(axis, label.into());
        self
    }

    pub fn with_custom(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> DeployConfig {
        self.custom.insert(key.into(), value.into());
        self
    }

    /// The name the primary model input is exported under.
    pub fn primary_input(&self) -> &str {
        self.input_names.first().map(|s| s.as_str()).unwrap_or("input")
    }

    /// True if the batch axis (axis 0) of `input` is declared dynamic.
    pub fn is_dynamic_batch(&self, input: &str) -> bool {
        self.dynamic_axes.get(input).is_some_and(|axes| axes.contains_key(&0))
    }

    /// True if the spatial axes (axes 2 and 3) of `input` are both declared
    /// dynamic.
    pub fn is_dynamic_shape(&self, input: &str) -> bool {
        self.dynamic_axes
            .get(input)
            .is_some_and(|axes| axes.contains_key(&2) && axes.contains_key(&3))
    }

    pub fn custom_value(&self, key: &str) -> Option<&str> {
        self.custom.get(key).map(|s| s.as_str())
    }
}

fn default_mean() -> [f32; 3] {
    [123.675, 116.28, 103.53]
}

fn default_std() -> [f32; 3] {
    [58.395, 57.12, 57.375]
}

fn default_input_size() -> [usize; 2] {
    [224, 224]
}

fn default_num_classes() -> usize {
    80
}

fn default_num_joints() -> usize {
    17
}

fn default_score_threshold() -> f32 {
    0.3
}

/// The model-side configuration a task is built from: which family, which
/// concrete model, and the handful of knobs pre- and post-processing need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub task: TaskKind,
    pub name: String,
    #[serde(default = "default_input_size")]
    pub input_size: [usize; 2],
    #[serde(default = "default_mean")]
    pub mean: [f32; 3],
    #[serde(default = "default_std")]
    pub std: [f32; 3],
    #[serde(default = "default_num_classes")]
    pub num_classes: usize,
    #[serde(default = "default_num_joints")]
    pub num_joints: usize,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
}
