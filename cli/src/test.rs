//! The test workflow: the backend artifact against the reference model, one
//! output at a time, within a tolerance.

use modelport_core::internal::*;
use modelport_core::runtime::{ReferenceRuntime, Runtime};
use modelport_libcli::params::{common_args, Parameters};
use modelport_libcli::tensor::format_value;
use modelport_libcli::terminal;

use crate::command::Command;

pub struct Test;

impl Command for Test {
    fn name(&self) -> &'static str {
        "test"
    }

    fn add_subcommand(&self, command: clap::Command<'static>) -> clap::Command<'static> {
        common_args(command)
            .about("Compare backend execution against the reference model")
            .arg(
                clap::Arg::new("artifact")
                    .long("artifact")
                    .takes_value(true)
                    .help("Previously exported artifact to hand to the runtime"),
            )
            .arg(
                clap::Arg::new("tolerance")
                    .long("tolerance")
                    .takes_value(true)
                    .default_value("1e-5")
                    .help("Maximum tolerated absolute difference per element"),
            )
    }

    fn run(&self, matches: &clap::ArgMatches) -> PortResult<()> {
        let params = Parameters::from_matches(matches)?;
        let tolerance: f32 = matches
            .value_of("tolerance")
            .unwrap_or("1e-5")
            .parse()
            .context("parsing --tolerance")?;
        let (structured, _) =
            params.task.build_input(&params.raw_input(), params.deploy_config.input_shape)?;

        let runtime = ReferenceRuntime::new(params.model.clone());
        let artifact = matches.value_of("artifact").unwrap_or("unused");
        let runnable = runtime.prepare(artifact.as_ref())?;

        let reference = params.task.run_reference(&*params.model, &structured)?;
        let backend = params.task.run_backend(&*runnable, &structured)?;
        ensure!(
            reference.outputs.len() == backend.outputs.len(),
            "reference produced {} output(s), backend {}",
            reference.outputs.len(),
            backend.outputs.len()
        );

        let mut worst = 0f32;
        for (ix, (r, b)) in reference.outputs.iter().zip(&backend.outputs).enumerate() {
            ensure!(
                r.shape() == b.shape(),
                "output #{ix} shape mismatch: {} vs {}",
                format_value(r),
                format_value(b)
            );
            let max_diff = r
                .iter()
                .zip(b.iter())
                .map(|(x, y)| (x - y).abs())
                .fold(0f32, f32::max);
            worst = worst.max(max_diff);
            let label = format!("output #{ix} {} max abs diff {max_diff:.2e}", format_value(r));
            if max_diff <= tolerance {
                println!("{}", terminal::pass(&label));
            } else {
                println!("{}", terminal::fail(&label));
            }
        }
        ensure!(
            worst <= tolerance,
            "backend disagrees with reference: max abs diff {worst:.2e} > {tolerance:.2e}"
        );

        // the oracle's post-processing must accept the backend outputs too
        let result = params.task.post_process(&backend, &structured.meta)?;
        match &result {
            TaskOutput::Detections { dets, .. } => {
                println!("{} detection(s)", dets.shape()[0])
            }
            TaskOutput::Keypoints { keypoints } => {
                println!("{} keypoint(s)", keypoints.shape()[0])
            }
            TaskOutput::SegmentationMap { mask } => {
                println!("{}x{} segmentation map", mask.dim().0, mask.dim().1)
            }
        }
        Ok(())
    }
}
