//! The export workflow: trace the model under an open patch scope, close the
//! scope, then publish artifacts. Publication happens strictly after the
//! scope has closed cleanly, so a failed trace never leaves an artifact.

use std::path::PathBuf;

use modelport_core::export::publish;
use modelport_core::internal::*;
use modelport_libcli::export::JsonGraphExporter;
use modelport_libcli::params::{common_args, Parameters};

use crate::command::Command;

pub struct Export;

impl Command for Export {
    fn name(&self) -> &'static str {
        "export"
    }

    fn add_subcommand(&self, command: clap::Command<'static>) -> clap::Command<'static> {
        common_args(command)
            .about("Trace the model with export rewrites applied and publish the graph")
            .arg(
                clap::Arg::new("output-dir")
                    .long("output-dir")
                    .short('o')
                    .takes_value(true)
                    .default_value(".")
                    .help("Directory the artifacts are published into"),
            )
            .arg(
                clap::Arg::new("partition")
                    .long("partition")
                    .help("Additionally publish one sliced artifact per marked subgraph"),
            )
    }

    fn run(&self, matches: &clap::ArgMatches) -> PortResult<()> {
        let params = Parameters::from_matches(matches)?;
        let output_dir = PathBuf::from(matches.value_of("output-dir").unwrap_or("."));
        let (_, primary) =
            params.task.build_input(&params.raw_input(), params.deploy_config.input_shape)?;
        info!(
            "tracing {} for {}",
            params.task.describe_model(),
            params.deploy_config.backend
        );

        let scope = PatchScope::open_default(&params.deploy_config)?;
        debug!("patched {} symbol(s)", scope.patched());
        let mut session = TraceSession::new();
        let trace = match params.model.forward(&mut session, primary) {
            Ok(_) => session.finish(),
            Err(e) => {
                // the scope still unwinds and restores on the error path
                drop(scope);
                return Err(e.context("tracing the forward computation"));
            }
        };
        scope.close()?;

        let model_name = params.task.describe_model();
        let target = output_dir.join(format!("{model_name}.json"));
        publish(&JsonGraphExporter::full(), &trace, &target)?;
        println!("exported {}", target.display());

        if matches.is_present("partition") {
            for spec in trace.subgraphs() {
                let target = output_dir.join(format!("{model_name}-{}.json", spec.id));
                publish(&JsonGraphExporter::sliced(&spec.id), &trace, &target)?;
                println!("exported {}", target.display());
            }
        }
        Ok(())
    }
}
