//! Drives the installed binary through the export and test workflows with
//! the shipped configuration documents.

use std::path::Path;
use std::process::Command;

fn config(name: &str) -> String {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../configs")
        .join(name)
        .to_string_lossy()
        .into_owned()
}

fn modelport() -> Command {
    Command::new(env!("CARGO_BIN_EXE_modelport"))
}

#[test]
fn export_publishes_full_and_sliced_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let status = modelport()
        .args([
            "export",
            "--model-config",
            &config("detection_model.json"),
            "--deploy-config",
            &config("onnxruntime_dynamic.json"),
            "--output-dir",
        ])
        .arg(dir.path())
        .arg("--partition")
        .status()
        .unwrap();
    assert!(status.success());
    assert!(dir.path().join("detr.json").exists());
    assert!(dir.path().join("detr-detr_predict.json").exists());
    // no stray partial files
    for entry in fs_err::read_dir(dir.path()).unwrap() {
        let name = entry.unwrap().file_name();
        assert!(!name.to_string_lossy().ends_with(".partial"));
    }
}

#[test]
fn test_verb_accepts_the_reference_backend() {
    let status = modelport()
        .args([
            "test",
            "--model-config",
            &config("segmentation_model.json"),
            "--deploy-config",
            &config("tensorrt_static.json"),
        ])
        .status()
        .unwrap();
    assert!(status.success());
}

#[test]
fn unknown_verb_exits_non_zero() {
    let output = modelport().arg("deploy").output().unwrap();
    assert!(!output.status.success());
}

#[test]
fn version_flag_reports_the_crate_version() {
    let output = modelport().arg("--version").output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn missing_config_fails_cleanly() {
    let output = modelport()
        .args([
            "export",
            "--model-config",
            "/nonexistent/model.json",
            "--deploy-config",
            &config("onnxruntime_dynamic.json"),
        ])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error"));
}
