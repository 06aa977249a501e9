//! The detection family: a DETR-flavoured transformer detector.
//!
//! The reference pipeline is `extract_feat` then `pre_transformer` then the
//! boundary-marked `DetrHead.predict`. Rewrites keep the traced graph
//! export-friendly: the forward rewrite materializes the input shape as a
//! traced value when the export is dynamic (and checks it against the
//! declared static shape otherwise), and the TensorRT variant additionally
//! clamps box coordinates into the valid range.

use lazy_static::lazy_static;
use ndarray::{Array2, Array3, Array4, Dimension};

use modelport_core::internal::*;
use modelport_core::tensor::tensor1;

use crate::input::build_image_input;

const STRIDE: usize = 16;
const FEAT_CHANNELS: usize = 8;
const NUM_QUERIES: usize = 10;
const NUM_CLASSES: usize = 80;

lazy_static! {
    pub static ref FORWARD: QualifiedName =
        QualifiedName::new("vision.detection.DetectionTransformer.forward").unwrap();
    pub static ref EXTRACT_FEAT: QualifiedName =
        QualifiedName::new("vision.detection.DetectionTransformer.extract_feat").unwrap();
    pub static ref PRE_TRANSFORMER: QualifiedName =
        QualifiedName::new("vision.detection.DetectionTransformer.pre_transformer").unwrap();
    pub static ref PREDICT: QualifiedName =
        QualifiedName::new("vision.detection.DetrHead.predict").unwrap();
    static ref SHAPE_OF: QualifiedName =
        QualifiedName::new("vision.detection.DetectionTransformer.shape_of").unwrap();
    static ref BUILD_MASKS: QualifiedName =
        QualifiedName::new("vision.detection.DetectionTransformer.build_masks").unwrap();
    static ref CLAMP: QualifiedName =
        QualifiedName::new("vision.detection.DetrHead.clamp_boxes").unwrap();
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn extract_feat(input: &Tensor) -> PortResult<Tensor> {
    let shape = input.shape();
    ensure!(shape.len() == 4, "expected NCHW input, got {}", format_shape(shape));
    let (n, c, h, w) = (shape[0], shape[1], shape[2], shape[3]);
    ensure!(h >= STRIDE && w >= STRIDE, "input {}x{} smaller than stride {STRIDE}", h, w);
    let (fh, fw) = (h / STRIDE, w / STRIDE);
    let mut patch = Array3::zeros((n, fh, fw));
    for b in 0..n {
        for y in 0..fh {
            for x in 0..fw {
                let mut acc = 0.0;
                for ch in 0..c {
                    for dy in 0..STRIDE {
                        for dx in 0..STRIDE {
                            acc += input[[b, ch, y * STRIDE + dy, x * STRIDE + dx]];
                        }
                    }
                }
                patch[(b, y, x)] = acc / (c * STRIDE * STRIDE) as f32;
            }
        }
    }
    Ok(Array4::from_shape_fn((n, FEAT_CHANNELS, fh, fw), |(b, f, y, x)| {
        patch[(b, y, x)] * (f + 1) as f32 / FEAT_CHANNELS as f32
    })
    .into_dyn())
}

fn positional_encoding(position: usize) -> f32 {
    (position as f32 * 0.1).sin() * 0.05
}

fn pre_transformer(feat: &Tensor) -> PortResult<Tensor> {
    let shape = feat.shape();
    ensure!(shape.len() == 4, "expected NFHW features, got {}", format_shape(shape));
    let (n, f, h, w) = (shape[0], shape[1], shape[2], shape[3]);
    Ok(Array3::from_shape_fn((n, h * w, f), |(b, p, ch)| {
        feat[[b, ch, p / w, p % w]] + positional_encoding(p)
    })
    .into_dyn())
}

fn predict(memory: &Tensor) -> PortResult<(Tensor, Tensor)> {
    let shape = memory.shape();
    ensure!(shape.len() == 3, "expected NPF memory, got {}", format_shape(shape));
    let n = shape[0];
    let m = memory.mean().unwrap_or(0.0);
    let mut dets = Array3::zeros((n, NUM_QUERIES, 5));
    let mut labels = Array2::zeros((n, NUM_QUERIES));
    for b in 0..n {
        for q in 0..NUM_QUERIES {
            let center = (q as f32 + 0.5) / NUM_QUERIES as f32;
            let score = sigmoid(m + q as f32 / NUM_QUERIES as f32);
            dets[(b, q, 0)] = center - 0.1;
            dets[(b, q, 1)] = center - 0.1;
            dets[(b, q, 2)] = center + 0.1;
            dets[(b, q, 3)] = center + 0.1;
            dets[(b, q, 4)] = score;
            labels[(b, q)] = (q * 7 % NUM_CLASSES) as f32;
        }
    }
    Ok((dets.into_dyn(), labels.into_dyn()))
}

/// Installs the family's callables. The predict step is registered as a
/// boundary producer so the head can be sliced out of the traced graph.
pub fn register_symbols() {
    symbols::register(
        EXTRACT_FEAT.clone(),
        callable(|_, inputs| {
            ensure!(inputs.len() == 1, "extract_feat takes one input");
            Ok(tvec![Arc::new(extract_feat(&inputs[0])?)])
        }),
    );
    symbols::register(
        PRE_TRANSFORMER.clone(),
        callable(|_, inputs| {
            ensure!(inputs.len() == 1, "pre_transformer takes one input");
            Ok(tvec![Arc::new(pre_transformer(&inputs[0])?)])
        }),
    );
    symbols::register(
        PREDICT.clone(),
        mark(
            callable(|_, inputs| {
                let (dets, labels) = predict(&inputs[0])?;
                Ok(tvec![Arc::new(dets), Arc::new(labels)])
            }),
            "detr_predict",
            &["input"],
            &["dets", "labels"],
        ),
    );
    symbols::register(
        FORWARD.clone(),
        callable(|session, inputs| {
            ensure!(inputs.len() == 1, "forward takes one input");
            let feat = symbols::call(&EXTRACT_FEAT, session, inputs)?;
            let memory = symbols::call(&PRE_TRANSFORMER, session, feat)?;
            symbols::call(&PREDICT, session, memory)
        }),
    );
}

/// The forward rewrite for every backend, plus narrower variants.
pub fn register_rewrites(registry: &mut RewriteRegistry) {
    registry.register(
        FORWARD.clone(),
        Guard::any(),
        callable(|session, inputs| {
            let ctx = RewriteContext::current()?;
            let config = ctx.config().clone();
            let shape = shape_of(&inputs[0]);
            if config.is_dynamic_shape(config.primary_input()) {
                // carry the input shape as a traced value instead of burning
                // in constants
                session.record_op(SHAPE_OF.clone(), tvec![shape.clone()], tvec![tvec![2]]);
            } else if let Some([w, h]) = config.input_shape {
                ensure!(
                    shape[2] == h && shape[3] == w,
                    "static export declared {h}x{w}, traced {}x{}",
                    shape[2],
                    shape[3]
                );
            }
            ctx.original()?.call(session, inputs)
        }),
    );
    registry.register(
        FORWARD.clone(),
        Guard::for_backend(Backend::Tensorrt),
        callable(|session, inputs| {
            let ctx = RewriteContext::current()?;
            let outputs = ctx.original()?.call(session, inputs)?;
            let mut dets = (*outputs[0]).clone();
            for (ix, v) in dets.indexed_iter_mut() {
                if ix[ix.ndim() - 1] < 4 {
                    *v = v.clamp(0.0, 1.0);
                }
            }
            let dets: TValue = Arc::new(dets);
            session.record_op(
                CLAMP.clone(),
                tvec![shape_of(&outputs[0])],
                tvec![shape_of(&dets)],
            );
            Ok(tvec![dets, outputs[1].clone()])
        }),
    );
    registry.register(
        PRE_TRANSFORMER.clone(),
        Guard::any(),
        callable(|session, inputs| {
            let ctx = RewriteContext::current()?;
            if ctx.config().is_dynamic_shape(ctx.config().primary_input()) {
                // the mask is built from the traced shape rather than baked-in
                // dimensions
                let shape = shape_of(&inputs[0]);
                session.record_op(
                    BUILD_MASKS.clone(),
                    tvec![shape.clone()],
                    tvec![tvec![shape[0], shape[2], shape[3]]],
                );
            }
            ctx.original()?.call(session, inputs)
        }),
    );
}

/// The reference detector. Forward goes through the symbol table, so an
/// active patch scope substitutes the registered rewrites.
pub struct DetectionTransformer {
    name: String,
}

impl DetectionTransformer {
    pub fn new(name: &str) -> DetectionTransformer {
        DetectionTransformer { name: name.to_string() }
    }
}

impl ForwardModel for DetectionTransformer {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, session: &mut TraceSession, input: TValue) -> PortResult<TVec<TValue>> {
        symbols::call(&FORWARD, session, tvec![input])
    }
}

pub struct DetectionTask {
    config: ModelConfig,
}

impl DetectionTask {
    pub fn new(config: ModelConfig) -> DetectionTask {
        DetectionTask { config }
    }
}

impl Task for DetectionTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Detection
    }

    fn describe_model(&self) -> String {
        self.config.name.to_lowercase()
    }

    fn build_input(
        &self,
        raw: &RawInput,
        target_shape: Option<[usize; 2]>,
    ) -> PortResult<(StructuredInput, TValue)> {
        // target shapes are declared (width, height)
        let [w, h] = target_shape.unwrap_or(self.config.input_size);
        build_image_input(raw, [h, w], &self.config.mean, &self.config.std)
    }

    fn run_reference(
        &self,
        model: &dyn ForwardModel,
        input: &StructuredInput,
    ) -> PortResult<Predictions> {
        let mut session = TraceSession::new();
        let outputs = model.forward(&mut session, input.tensor("input")?.clone())?;
        Ok(Predictions { family: TaskKind::Detection, outputs })
    }

    fn run_backend(
        &self,
        runnable: &dyn Runnable,
        input: &StructuredInput,
    ) -> PortResult<Predictions> {
        let outputs = runnable.run(tvec![input.tensor("input")?.clone()])?;
        Ok(Predictions { family: TaskKind::Detection, outputs })
    }

    fn post_process(
        &self,
        predictions: &Predictions,
        meta: &InputMeta,
    ) -> PortResult<TaskOutput> {
        ensure!(predictions.outputs.len() == 2, "detection predicts dets and labels");
        let dets = &predictions.outputs[0];
        let labels = &predictions.outputs[1];
        let shape = dets.shape();
        ensure!(shape.len() == 3 && shape[2] == 5, "dets must be (N, Q, 5)");
        ensure!(
            labels.iter().all(|l| (*l as usize) < self.config.num_classes),
            "label out of range for {} class(es)",
            self.config.num_classes
        );
        let [oh, ow] = meta.original_size;
        let mut kept_dets = vec![];
        let mut kept_labels = vec![];
        for b in 0..shape[0] {
            for q in 0..shape[1] {
                let score = dets[[b, q, 4]];
                if score < self.config.score_threshold {
                    continue;
                }
                kept_dets.push([
                    dets[[b, q, 0]] * ow as f32,
                    dets[[b, q, 1]] * oh as f32,
                    dets[[b, q, 2]] * ow as f32,
                    dets[[b, q, 3]] * oh as f32,
                    score,
                ]);
                kept_labels.push(labels[[b, q]]);
            }
        }
        let count = kept_dets.len();
        let dets = Array2::from_shape_fn((count, 5), |(i, j)| kept_dets[i][j]).into_dyn();
        let labels = tensor1(&kept_labels);
        Ok(TaskOutput::Detections { dets, labels })
    }
}
