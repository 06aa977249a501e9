//! The semantic segmentation family: an encode-decode segmentor.
//!
//! The decode head is boundary-marked so it can be sliced out of the traced
//! graph. The forward rewrite folds the class argmax into the exported
//! graph, so backends emit a segmentation map directly instead of raw
//! logits.

use lazy_static::lazy_static;
use ndarray::{Array2, Array4};
use serde_json::json;

use modelport_core::internal::*;

use crate::input::build_image_input;

const STRIDE: usize = 8;
const NUM_CLASSES: usize = 19;

lazy_static! {
    pub static ref FORWARD: QualifiedName =
        QualifiedName::new("vision.segmentation.EncoderDecoder.forward").unwrap();
    pub static ref EXTRACT_FEAT: QualifiedName =
        QualifiedName::new("vision.segmentation.EncoderDecoder.extract_feat").unwrap();
    pub static ref DECODE: QualifiedName =
        QualifiedName::new("vision.segmentation.DecodeHead.predict").unwrap();
    static ref ARGMAX: QualifiedName =
        QualifiedName::new("vision.segmentation.EncoderDecoder.argmax").unwrap();
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
    let mut feat = Array4::zeros((n, 1, fh, fw));
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
                feat[(b, 0, y, x)] = acc / (c * STRIDE * STRIDE) as f32;
            }
        }
    }
    Ok(feat.into_dyn())
}

/// Upsamples features back to input resolution and scores every class:
/// the class closest to the (squashed) feature response wins.
fn decode(feat: &Tensor) -> PortResult<Tensor> {
    let shape = feat.shape();
    ensure!(shape.len() == 4 && shape[1] == 1, "expected N1hw features");
    let (n, fh, fw) = (shape[0], shape[2], shape[3]);
    let (h, w) = (fh * STRIDE, fw * STRIDE);
    Ok(Array4::from_shape_fn((n, NUM_CLASSES, h, w), |(b, cls, y, x)| {
        let p = sigmoid(feat[[b, 0, y / STRIDE, x / STRIDE]]);
        let target = p * (NUM_CLASSES - 1) as f32;
        -(target - cls as f32) * (target - cls as f32)
    })
    .into_dyn())
}

fn argmax_map(logits: &Tensor) -> PortResult<Tensor> {
    let shape = logits.shape();
    ensure!(shape.len() == 4, "expected NCHW logits");
    let (n, c, h, w) = (shape[0], shape[1], shape[2], shape[3]);
    let mut map = Array4::zeros((n, 1, h, w));
    for b in 0..n {
        for y in 0..h {
            for x in 0..w {
                let mut best = (0usize, f32::NEG_INFINITY);
                for cls in 0..c {
                    let v = logits[[b, cls, y, x]];
                    if v > best.1 {
                        best = (cls, v);
                    }
                }
                map[(b, 0, y, x)] = best.0 as f32;
            }
        }
    }
    Ok(map.into_dyn())
}

pub fn register_symbols() {
    symbols::register(
        EXTRACT_FEAT.clone(),
        callable(|_, inputs| {
            ensure!(inputs.len() == 1, "extract_feat takes one input");
            Ok(tvec![Arc::new(extract_feat(&inputs[0])?)])
        }),
    );
    symbols::register(
        DECODE.clone(),
        mark(
            callable(|_, inputs| Ok(tvec![Arc::new(decode(&inputs[0])?)])),
            "seg_maps",
            &["feat"],
            &["seg_logits"],
        ),
    );
    symbols::register(
        FORWARD.clone(),
        callable(|session, inputs| {
            ensure!(inputs.len() == 1, "forward takes one input");
            let feat = symbols::call(&EXTRACT_FEAT, session, inputs)?;
            symbols::call(&DECODE, session, feat)
        }),
    );
}

pub fn register_rewrites(registry: &mut RewriteRegistry) {
    // emit class indices instead of raw logits
    registry.register(
        FORWARD.clone(),
        Guard::any(),
        callable(|session, inputs| {
            let ctx = RewriteContext::current()?;
            let logits = ctx.original()?.call(session, inputs)?;
            let map: TValue = Arc::new(argmax_map(&logits[0])?);
            session.record_op(
                ARGMAX.clone(),
                tvec![shape_of(&logits[0])],
                tvec![shape_of(&map)],
            );
            Ok(tvec![map])
        }),
    );
}

pub struct EncoderDecoder {
    name: String,
}

impl EncoderDecoder {
    pub fn new(name: &str) -> EncoderDecoder {
        EncoderDecoder { name: name.to_string() }
    }
}

impl ForwardModel for EncoderDecoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, session: &mut TraceSession, input: TValue) -> PortResult<TVec<TValue>> {
        symbols::call(&FORWARD, session, tvec![input])
    }
}

pub struct SegmentationTask {
    config: ModelConfig,
}

impl SegmentationTask {
    pub fn new(config: ModelConfig) -> SegmentationTask {
        SegmentationTask { config }
    }
}

impl Task for SegmentationTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Segmentation
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
        build_image_input(raw, [h, w], &self.config.mean, &self.config.std)
    }

    fn run_reference(
        &self,
        model: &dyn ForwardModel,
        input: &StructuredInput,
    ) -> PortResult<Predictions> {
        let mut session = TraceSession::new();
        let outputs = model.forward(&mut session, input.tensor("input")?.clone())?;
        Ok(Predictions { family: TaskKind::Segmentation, outputs })
    }

    fn run_backend(
        &self,
        runnable: &dyn Runnable,
        input: &StructuredInput,
    ) -> PortResult<Predictions> {
        let outputs = runnable.run(tvec![input.tensor("input")?.clone()])?;
        Ok(Predictions { family: TaskKind::Segmentation, outputs })
    }

    /// Accepts both raw logits (reference) and pre-argmaxed maps (exported
    /// graphs) and resizes the class map back to the original image.
    fn post_process(
        &self,
        predictions: &Predictions,
        meta: &InputMeta,
    ) -> PortResult<TaskOutput> {
        ensure!(predictions.outputs.len() == 1, "segmentation predicts one tensor");
        let output = &predictions.outputs[0];
        let shape = output.shape();
        ensure!(shape.len() == 4, "expected NCHW output");
        let map = if shape[1] == 1 { (**output).clone() } else { argmax_map(output)? };
        let (h, w) = (map.shape()[2], map.shape()[3]);
        let [oh, ow] = meta.original_size;
        let mask = Array2::from_shape_fn((oh, ow), |(y, x)| {
            let sy = (y * h / oh).min(h - 1);
            let sx = (x * w / ow).min(w - 1);
            map[[0, 0, sy, sx]] as u32
        });
        Ok(TaskOutput::SegmentationMap { mask })
    }

    fn visualize(
        &self,
        _image: &RawInput,
        result: &TaskOutput,
        path: &std::path::Path,
    ) -> PortResult<()> {
        let TaskOutput::SegmentationMap { mask } = result else {
            bail!("segmentation visualizes segmentation maps")
        };
        let (h, w) = mask.dim();
        let mut img = image::GrayImage::new(w as u32, h as u32);
        for ((y, x), cls) in mask.indexed_iter() {
            let level = (cls * 255 / (NUM_CLASSES as u32 - 1)).min(255) as u8;
            img.put_pixel(x as u32, y as u32, image::Luma([level]));
        }
        img.save(path).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    fn get_preprocess(&self) -> PortResult<serde_json::Value> {
        let [w, h] = self.config.input_size;
        Ok(json!([
            { "type": "LoadImageFromFile" },
            { "type": "Resize", "size": [w, h], "keep_ratio": false },
            { "type": "Normalize", "mean": self.config.mean, "std": self.config.std },
            { "type": "ImageToTensor", "keys": ["img"] },
        ]))
    }

    fn get_postprocess(&self) -> PortResult<serde_json::Value> {
        Ok(json!({
            "type": "decode_head",
            "num_classes": self.config.num_classes,
            "model": self.describe_model(),
        }))
    }
}
