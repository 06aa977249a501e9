//! Everything a workflow needs, loaded once from the command line: the two
//! configuration documents, the task and reference model built from them,
//! and the optional input image.

use std::path::Path;

use modelport_core::internal::*;

/// Declares the arguments every verb shares.
pub fn common_args(command: clap::Command<'static>) -> clap::Command<'static> {
    command
        .arg(
            clap::Arg::new("model-config")
                .long("model-config")
                .short('m')
                .takes_value(true)
                .required(true)
                .help("Path to the model configuration document"),
        )
        .arg(
            clap::Arg::new("deploy-config")
                .long("deploy-config")
                .short('d')
                .takes_value(true)
                .required(true)
                .help("Path to the deployment configuration document"),
        )
        .arg(
            clap::Arg::new("input")
                .long("input")
                .short('i')
                .takes_value(true)
                .help("Input image (synthetic input is generated when omitted)"),
        )
}

pub struct Parameters {
    pub model_config: ModelConfig,
    pub deploy_config: DeployConfig,
    pub task: Box<dyn Task>,
    pub model: Arc<dyn ForwardModel>,
    pub input: Option<RawInput>,
}

impl Parameters {
    /// Loads configs, initializes the model families, and builds the task
    /// and reference model.
    pub fn from_matches(matches: &clap::ArgMatches) -> PortResult<Parameters> {
        let model_path = matches.value_of("model-config").context("--model-config is required")?;
        let deploy_path =
            matches.value_of("deploy-config").context("--deploy-config is required")?;
        let model_config = load_model_config(model_path.as_ref())?;
        let deploy_config = load_deploy_config(deploy_path.as_ref())?;
        modelport_vision::init();
        let task = modelport_vision::build_task(&model_config);
        let model = modelport_vision::build_model(&model_config);
        let input = matches.value_of("input").map(|p| RawInput::Path(p.into()));
        debug!(
            "loaded {} task targeting {} (opset {})",
            model_config.task, deploy_config.backend, deploy_config.opset_version
        );
        Ok(Parameters { model_config, deploy_config, task, model, input })
    }

    /// The raw input to drive the workflow with: the user's image, or a
    /// deterministic synthetic one shaped for the model.
    pub fn raw_input(&self) -> RawInput {
        match &self.input {
            Some(input) => input.clone(),
            None => crate::tensor::synthetic_input(&self.model_config, &self.deploy_config),
        }
    }
}

pub fn load_model_config(path: &Path) -> PortResult<ModelConfig> {
    let text = fs_err::read_to_string(path)?;
    serde_json::from_str(&text)
        .with_context(|| format!("parsing model config {}", path.display()))
}

pub fn load_deploy_config(path: &Path) -> PortResult<DeployConfig> {
    let text = fs_err::read_to_string(path)?;
    serde_json::from_str(&text)
        .with_context(|| format!("parsing deployment config {}", path.display()))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_both_documents() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("model.json");
        let deploy_path = dir.path().join("deploy.json");
        fs_err::File::create(&model_path)
            .unwrap()
            .write_all(br#"{ "task": "segmentation", "name": "EncoderDecoder" }"#)
            .unwrap();
        fs_err::File::create(&deploy_path)
            .unwrap()
            .write_all(
                br#"{ "backend": "onnxruntime", "dynamic_axes": { "input": { "0": "batch" } } }"#,
            )
            .unwrap();

        let model = load_model_config(&model_path).unwrap();
        assert_eq!(model.task, TaskKind::Segmentation);
        assert_eq!(model.input_size, [224, 224]);
        let deploy = load_deploy_config(&deploy_path).unwrap();
        assert!(deploy.is_dynamic_batch("input"));
        assert!(load_model_config(&dir.path().join("missing.json")).is_err());
    }
}
