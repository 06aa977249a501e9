//! # modelport-vision
//!
//! The supported model families: detection, pose estimation and semantic
//! segmentation. Each family contributes a reference forward model wired
//! through the symbol table, the rewrites that make it export-friendly, and
//! a [`Task`](modelport_core::task::Task) implementation.
//!
//! Nothing registers itself at load time: call [`init`] once, before any
//! patch scope opens, to populate the symbol table and the default rewrite
//! registry in a fixed, reproducible order.

use std::sync::Once;

use modelport_core::internal::*;
use modelport_core::rewrite::with_default_registry;

pub mod detection;
pub mod input;
pub mod pose;
pub mod segmentation;

/// Registers every family's symbols and rewrites, exactly once per process.
/// Subsequent calls are no-ops.
pub fn init() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        register_symbols();
        with_default_registry(register_rewrites);
        log::debug!("model families initialized");
    });
}

/// Populates the symbol table. Idempotent: re-registration replaces.
pub fn register_symbols() {
    detection::register_symbols();
    pose::register_symbols();
    segmentation::register_symbols();
}

/// Registers every family's rewrites into `registry`, in a fixed order so
/// tie-breaking by recency is reproducible.
pub fn register_rewrites(registry: &mut RewriteRegistry) {
    detection::register_rewrites(registry);
    pose::register_rewrites(registry);
    segmentation::register_rewrites(registry);
}

/// Builds the task implementation for the family named by `config`.
pub fn build_task(config: &ModelConfig) -> Box<dyn Task> {
    match config.task {
        TaskKind::Detection => Box::new(detection::DetectionTask::new(config.clone())),
        TaskKind::PoseEstimation => Box::new(pose::PoseTask::new(config.clone())),
        TaskKind::Segmentation => Box::new(segmentation::SegmentationTask::new(config.clone())),
    }
}

/// Builds the reference forward model for the family named by `config`.
pub fn build_model(config: &ModelConfig) -> Arc<dyn ForwardModel> {
    match config.task {
        TaskKind::Detection => Arc::new(detection::DetectionTransformer::new(&config.name)),
        TaskKind::PoseEstimation => Arc::new(pose::TopdownHeatmapHead::new(&config.name)),
        TaskKind::Segmentation => Arc::new(segmentation::EncoderDecoder::new(&config.name)),
    }
}
