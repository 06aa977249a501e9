//! Deterministic synthetic inputs for workflows driven without a real
//! image, and small formatting helpers.

use ndarray::Array3;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use modelport_core::internal::*;

const SEED: u64 = 0x6d70_7274;

/// A reproducible random image sized for the model: same seed, same pixels,
/// run after run.
pub fn synthetic_input(model: &ModelConfig, deploy: &DeployConfig) -> RawInput {
    let [w, h] = deploy.input_shape.unwrap_or(model.input_size);
    let mut rng = SmallRng::seed_from_u64(SEED);
    let pixels = Array3::from_shape_fn((h, w, 3), |_| rng.gen_range(0.0..255.0));
    RawInput::Pixels(pixels)
}

/// `1x3x224x224 f32` style display for a traced value.
pub fn format_value(value: &TValue) -> String {
    format!("{} f32", format_shape(value.shape()))
}

#[cfg(test)]
mod test {
    use super::*;

    fn config() -> (ModelConfig, DeployConfig) {
        let model: ModelConfig = serde_json::from_str(
            r#"{ "task": "detection", "name": "DETR", "input_size": [32, 16] }"#,
        )
        .unwrap();
        let deploy = DeployConfig::new(Backend::Onnxruntime);
        (model, deploy)
    }

    #[test]
    fn synthetic_inputs_are_reproducible() {
        let (model, deploy) = config();
        let RawInput::Pixels(a) = synthetic_input(&model, &deploy) else { panic!() };
        let RawInput::Pixels(b) = synthetic_input(&model, &deploy) else { panic!() };
        assert_eq!(a, b);
        // input_size is (width, height)
        assert_eq!(a.dim(), (16, 32, 3));
    }

    #[test]
    fn deploy_shape_overrides_the_model_shape() {
        let (model, deploy) = config();
        let deploy = deploy.with_input_shape(64, 48);
        let RawInput::Pixels(a) = synthetic_input(&model, &deploy) else { panic!() };
        assert_eq!(a.dim(), (48, 64, 3));
    }
}
