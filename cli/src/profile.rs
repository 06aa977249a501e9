//! The profile workflow: a time- and iteration-bounded loop over the
//! reference execution, with an optional criterion harness.

use std::time::{Duration, Instant};

use modelport_core::internal::*;
use modelport_core::runtime::{ReferenceRuntime, Runtime};
use modelport_libcli::params::{common_args, Parameters};
use modelport_libcli::terminal;

use crate::command::Command;

const DEFAULT_MAX_ITERS: u64 = 1000;
const DEFAULT_MAX_TIME_MS: u64 = 5000;

pub struct BenchLimits {
    pub max_iters: u64,
    pub max_time: Duration,
}

impl BenchLimits {
    fn from_matches(matches: &clap::ArgMatches) -> PortResult<BenchLimits> {
        let max_iters = matches
            .value_of("max-iters")
            .map(str::parse)
            .transpose()
            .context("parsing --max-iters")?
            .unwrap_or(DEFAULT_MAX_ITERS);
        let max_time = matches
            .value_of("max-time-ms")
            .map(str::parse)
            .transpose()
            .context("parsing --max-time-ms")?
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(DEFAULT_MAX_TIME_MS));
        Ok(BenchLimits { max_iters, max_time })
    }
}

pub struct Profile;

impl Command for Profile {
    fn name(&self) -> &'static str {
        "profile"
    }

    fn add_subcommand(&self, command: clap::Command<'static>) -> clap::Command<'static> {
        common_args(command)
            .about("Time the model's forward execution")
            .arg(
                clap::Arg::new("max-iters")
                    .long("max-iters")
                    .takes_value(true)
                    .help("Maximum number of iterations"),
            )
            .arg(
                clap::Arg::new("max-time-ms")
                    .long("max-time-ms")
                    .takes_value(true)
                    .help("Maximum wall time in milliseconds"),
            )
            .arg(
                clap::Arg::new("criterion")
                    .long("criterion")
                    .help("Run the criterion harness instead of the simple loop"),
            )
    }

    fn run(&self, matches: &clap::ArgMatches) -> PortResult<()> {
        let params = Parameters::from_matches(matches)?;
        let limits = BenchLimits::from_matches(matches)?;
        let (structured, _) =
            params.task.build_input(&params.raw_input(), params.deploy_config.input_shape)?;
        let input = structured.tensor("input")?.clone();

        let runtime = ReferenceRuntime::new(params.model.clone());
        let runnable = runtime.prepare("unused".as_ref())?;

        if matches.is_present("criterion") {
            let mut crit = criterion::Criterion::default();
            let mut group = crit.benchmark_group("net");
            group.bench_function("run", |b| {
                b.iter(|| runnable.run(tvec![input.clone()]))
            });
            group.finish();
            return Ok(());
        }

        // one untimed run to warm caches up
        runnable.run(tvec![input.clone()])?;
        info!("starting bench itself");
        let mut iters = 0;
        let start = Instant::now();
        while iters < limits.max_iters && start.elapsed() < limits.max_time {
            runnable.run(tvec![input.clone()])?;
            iters += 1;
        }
        let dur = Duration::from_secs_f64(start.elapsed().as_secs_f64() / iters as f64);
        println!("Bench ran {} times, {}.", iters, terminal::dur_avg(dur));
        Ok(())
    }
}
