//! The pose estimation family: a top-down heatmap head.
//!
//! The reference `inference_model` runs the multi-stage forward, keeps the
//! last stage and converts it out of the graph; the rewrite runs forward
//! directly so the heatmaps stay traceable tensors.

use lazy_static::lazy_static;
use ndarray::{Array2, Array4};

use modelport_core::internal::*;
use modelport_core::tensor::tensor1;

use crate::input::build_image_input;

const HEATMAP_STRIDE: usize = 4;
const NUM_STAGES: usize = 2;

lazy_static! {
    pub static ref FORWARD: QualifiedName =
        QualifiedName::new("vision.pose.TopdownHeatmapHead.forward").unwrap();
    pub static ref INFERENCE: QualifiedName =
        QualifiedName::new("vision.pose.TopdownHeatmapHead.inference_model").unwrap();
    static ref TO_NUMPY: QualifiedName =
        QualifiedName::new("vision.pose.TopdownHeatmapHead.to_numpy").unwrap();
}

fn stage_heatmaps(input: &Tensor, num_joints: usize) -> PortResult<TVec<Tensor>> {
    let shape = input.shape();
    ensure!(shape.len() == 4, "expected NCHW input, got {}", format_shape(shape));
    let (n, c, h, w) = (shape[0], shape[1], shape[2], shape[3]);
    ensure!(
        h >= HEATMAP_STRIDE && w >= HEATMAP_STRIDE,
        "input {}x{} smaller than stride {HEATMAP_STRIDE}",
        h,
        w
    );
    let (hh, hw) = (h / HEATMAP_STRIDE, w / HEATMAP_STRIDE);
    let mut base = Array2::zeros((hh, hw));
    for y in 0..hh {
        for x in 0..hw {
            let mut acc = 0.0;
            for b in 0..n {
                for ch in 0..c {
                    for dy in 0..HEATMAP_STRIDE {
                        for dx in 0..HEATMAP_STRIDE {
                            acc += input[[b, ch, y * HEATMAP_STRIDE + dy, x * HEATMAP_STRIDE + dx]];
                        }
                    }
                }
            }
            base[(y, x)] = acc / (n * c * HEATMAP_STRIDE * HEATMAP_STRIDE) as f32;
        }
    }
    let mut stages = tvec![];
    for stage in 0..NUM_STAGES {
        let sharpen = 1.0 + stage as f32 * 0.5;
        stages.push(
            Array4::from_shape_fn((n, num_joints, hh, hw), |(_, k, y, x)| {
                base[(y, x)] * (k + 1) as f32 / num_joints as f32 * sharpen
            })
            .into_dyn(),
        );
    }
    Ok(stages)
}

pub fn register_symbols() {
    symbols::register(
        FORWARD.clone(),
        callable(|_, inputs| {
            ensure!(inputs.len() == 1, "forward takes one input");
            let stages = stage_heatmaps(&inputs[0], default_joints())?;
            Ok(stages.into_iter().map(Arc::new).collect())
        }),
    );
    symbols::register(
        INFERENCE.clone(),
        callable(|session, inputs| {
            let stages = symbols::call(&FORWARD, session, inputs)?;
            let Some(last) = stages.last().cloned() else { bail!("forward produced no stages") };
            // host-side conversion: fine for evaluation, fatal for tracing
            session.record_op(TO_NUMPY.clone(), tvec![shape_of(&last)], tvec![shape_of(&last)]);
            Ok(tvec![last])
        }),
    );
}

pub fn register_rewrites(registry: &mut RewriteRegistry) {
    // run forward directly and keep the last stage a tensor
    registry.register(
        INFERENCE.clone(),
        Guard::any(),
        callable(|session, inputs| {
            let stages = symbols::call(&FORWARD, session, inputs)?;
            let Some(last) = stages.last().cloned() else { bail!("forward produced no stages") };
            Ok(tvec![last])
        }),
    );
}

pub(crate) fn default_joints() -> usize {
    17
}

pub struct TopdownHeatmapHead {
    name: String,
}

impl TopdownHeatmapHead {
    pub fn new(name: &str) -> TopdownHeatmapHead {
        TopdownHeatmapHead { name: name.to_string() }
    }
}

impl ForwardModel for TopdownHeatmapHead {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, session: &mut TraceSession, input: TValue) -> PortResult<TVec<TValue>> {
        symbols::call(&INFERENCE, session, tvec![input])
    }
}

pub struct PoseTask {
    config: ModelConfig,
}

impl PoseTask {
    pub fn new(config: ModelConfig) -> PoseTask {
        PoseTask { config }
    }
}

impl Task for PoseTask {
    fn kind(&self) -> TaskKind {
        TaskKind::PoseEstimation
    }

    fn describe_model(&self) -> String {
        self.config.name.to_lowercase()
    }

    fn build_input(
        &self,
        raw: &RawInput,
        target_shape: Option<[usize; 2]>,
    ) -> PortResult<(StructuredInput, TValue)> {
        let [w, h] = target_shape.unwrap_or(self.config.input_size);
        let (mut structured, primary) =
            build_image_input(raw, [h, w], &self.config.mean, &self.config.std)?;
        // a whole-image person box, the way single-person inference seeds it
        let [oh, ow] = structured.meta.original_size;
        structured.tensors.insert(
            "bbox".to_string(),
            Arc::new(tensor1(&[0.0, 0.0, ow as f32, oh as f32, 1.0])),
        );
        Ok((structured, primary))
    }

    fn run_reference(
        &self,
        model: &dyn ForwardModel,
        input: &StructuredInput,
    ) -> PortResult<Predictions> {
        let mut session = TraceSession::new();
        let outputs = model.forward(&mut session, input.tensor("input")?.clone())?;
        Ok(Predictions { family: TaskKind::PoseEstimation, outputs })
    }

    fn run_backend(
        &self,
        runnable: &dyn Runnable,
        input: &StructuredInput,
    ) -> PortResult<Predictions> {
        let outputs = runnable.run(tvec![input.tensor("input")?.clone()])?;
        Ok(Predictions { family: TaskKind::PoseEstimation, outputs })
    }

    /// Decodes each joint's heatmap argmax back into original-image
    /// coordinates.
    fn post_process(
        &self,
        predictions: &Predictions,
        meta: &InputMeta,
    ) -> PortResult<TaskOutput> {
        ensure!(predictions.outputs.len() == 1, "pose predicts one heatmap tensor");
        let heatmaps = &predictions.outputs[0];
        let shape = heatmaps.shape();
        ensure!(shape.len() == 4, "heatmaps must be (N, K, h, w)");
        let (k, hh, hw) = (shape[1], shape[2], shape[3]);
        ensure!(
            k == self.config.num_joints,
            "model config declares {} joint(s), heatmaps carry {k}",
            self.config.num_joints
        );
        let [rh, rw] = meta.resized_size;
        let stride_x = rw as f32 / hw as f32;
        let stride_y = rh as f32 / hh as f32;
        let mut keypoints = Array2::zeros((k, 3));
        for joint in 0..k {
            let mut best = (0usize, 0usize, f32::NEG_INFINITY);
            for y in 0..hh {
                for x in 0..hw {
                    let v = heatmaps[[0, joint, y, x]];
                    if v > best.2 {
                        best = (x, y, v);
                    }
                }
            }
            keypoints[(joint, 0)] = best.0 as f32 * stride_x * meta.scale[0];
            keypoints[(joint, 1)] = best.1 as f32 * stride_y * meta.scale[1];
            keypoints[(joint, 2)] = best.2;
        }
        Ok(TaskOutput::Keypoints { keypoints: keypoints.into_dyn() })
    }
}
