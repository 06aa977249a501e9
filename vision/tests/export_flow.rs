//! End-to-end flows: configuration-driven rewrite selection, tracing with
//! boundaries through the real model families, and input coercion failures.

use lazy_static::lazy_static;
use std::sync::{Mutex, MutexGuard};

use modelport_core::internal::*;

lazy_static! {
    // patches are process-wide: tests opening scopes must not overlap
    static ref EXCLUSIVE: Mutex<()> = Mutex::new(());
}

fn serialize() -> MutexGuard<'static, ()> {
    EXCLUSIVE.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn input_tensor(h: usize, w: usize, value: f32) -> TValue {
    Arc::new(ndarray::Array4::from_elem((1, 3, h, w), value).into_dyn())
}

#[test]
fn dynamic_batch_config_selects_the_guarded_replacement() {
    let _guard = serialize();
    let name = QualifiedName::new("e2e.encoder.forward").unwrap();
    symbols::register(name.clone(), callable(|_, inputs| Ok(inputs)));

    let mut registry = RewriteRegistry::new();
    registry.register(
        name.clone(),
        Guard::any().with_dynamic_batch(true),
        callable(|_, inputs| Ok(tvec![Arc::new(inputs[0].mapv(|x| x + 100.0))])),
    );

    let dynamic = DeployConfig::new(Backend::Onnxruntime).with_dynamic_axis("input", 0, "batch");
    assert!(dynamic.is_dynamic_batch("input"));

    let scope = PatchScope::open(&registry, &dynamic).unwrap();
    let mut session = TraceSession::new();
    let out = symbols::call(&name, &mut session, tvec![input_tensor(4, 4, 1.0)]).unwrap();
    assert_eq!(out[0][[0, 0, 0, 0]], 101.0);
    scope.close().unwrap();

    // a static config leaves the original in place
    let static_ = DeployConfig::new(Backend::Onnxruntime);
    assert!(!static_.is_dynamic_batch("input"));
    let scope = PatchScope::open(&registry, &static_).unwrap();
    assert_eq!(scope.patched(), 0);
    let mut session = TraceSession::new();
    let out = symbols::call(&name, &mut session, tvec![input_tensor(4, 4, 1.0)]).unwrap();
    assert_eq!(out[0][[0, 0, 0, 0]], 1.0);
    scope.close().unwrap();
}

#[test]
fn a_full_trace_carries_boundaries_and_survives_the_scope() {
    let _guard = serialize();
    modelport_vision::init();
    let model_cfg = ModelConfig {
        task: TaskKind::Detection,
        name: "DETR".into(),
        input_size: [64, 64],
        mean: [0.0; 3],
        std: [1.0; 3],
        num_classes: 80,
        num_joints: 17,
        score_threshold: 0.3,
    };
    let model = modelport_vision::build_model(&model_cfg);
    let task = modelport_vision::build_task(&model_cfg);

    let raw = RawInput::Pixels(ndarray::Array3::from_elem((128, 128, 3), 64.0));
    let (structured, primary) = task.build_input(&raw, Some([64, 64])).unwrap();
    assert_eq!(primary.shape(), [1, 3, 64, 64]);

    let deploy = DeployConfig::new(Backend::Onnxruntime)
        .with_input_shape(64, 64)
        .with_dynamic_axis("input", 0, "batch");
    let scope = PatchScope::open_default(&deploy).unwrap();
    let mut session = TraceSession::new();
    let outputs = model.forward(&mut session, primary).unwrap();
    let trace = session.finish();
    scope.close().unwrap();

    let specs = trace.subgraphs();
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].id, "detr_predict");
    assert_eq!(specs[0].input_names, ["input"]);
    assert_eq!(specs[0].output_names, ["dets", "labels"]);

    // the reference path still works after the scope closed, and the task
    // can post-process either side
    let reference = task.run_reference(&*model, &structured).unwrap();
    let processed = task.post_process(&reference, &structured.meta).unwrap();
    match processed {
        TaskOutput::Detections { dets, .. } => assert_eq!(dets.shape()[1], 5),
        _ => panic!("wrong output family"),
    }
    assert_eq!(outputs.len(), 2);
}

#[test]
fn reference_and_backend_agree_through_the_runtime_seam() {
    let _guard = serialize();
    modelport_vision::init();
    let model_cfg = ModelConfig {
        task: TaskKind::Segmentation,
        name: "EncoderDecoder".into(),
        input_size: [32, 32],
        mean: [0.0; 3],
        std: [1.0; 3],
        num_classes: 19,
        num_joints: 17,
        score_threshold: 0.3,
    };
    let model = modelport_vision::build_model(&model_cfg);
    let task = modelport_vision::build_task(&model_cfg);
    let raw = RawInput::Pixels(ndarray::Array3::from_elem((32, 32, 3), 100.0));
    let (structured, _) = task.build_input(&raw, None).unwrap();

    let runtime = modelport_core::runtime::ReferenceRuntime::new(model.clone());
    let runnable =
        modelport_core::runtime::Runtime::prepare(&runtime, std::path::Path::new("unused"))
            .unwrap();

    let reference = task.run_reference(&*model, &structured).unwrap();
    let backend = task.run_backend(&*runnable, &structured).unwrap();
    assert_eq!(reference.outputs[0], backend.outputs[0]);

    let a = task.post_process(&reference, &structured.meta).unwrap();
    let b = task.post_process(&backend, &structured.meta).unwrap();
    match (a, b) {
        (TaskOutput::SegmentationMap { mask: ma }, TaskOutput::SegmentationMap { mask: mb }) => {
            assert_eq!(ma, mb)
        }
        _ => panic!("wrong output family"),
    }
}

#[test]
fn malformed_raw_input_fails_without_partial_structure() {
    let model_cfg = ModelConfig {
        task: TaskKind::Detection,
        name: "DETR".into(),
        input_size: [64, 64],
        mean: [0.0; 3],
        std: [1.0; 3],
        num_classes: 80,
        num_joints: 17,
        score_threshold: 0.3,
    };
    let task = modelport_vision::build_task(&model_cfg);
    let raw = RawInput::Path("/definitely/not/an/image.jpg".into());
    let err = task.build_input(&raw, None).unwrap_err();
    assert!(matches!(err.downcast_ref::<ExportError>(), Some(ExportError::Input(_))));
}
