#[macro_use]
extern crate log;

use std::process;

mod command;
mod export;
mod profile;
mod test;

use command::Command;

/// Entrypoint for the command-line interface.
fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let commands = command::registry();
    let mut app = clap::Command::new("modelport")
        .version(clap::crate_version!())
        .about("Deploy vision models to inference backend engines")
        .subcommand_required(true)
        .arg_required_else_help(true);
    for cmd in &commands {
        app = app.subcommand(cmd.add_subcommand(clap::Command::new(cmd.name())));
    }
    // unknown verbs get clap's usage message and a non-zero exit
    let matches = app.get_matches();

    let Some((verb, sub_matches)) = matches.subcommand() else {
        process::exit(1);
    };
    let Some(cmd) = commands.iter().find(|c| c.name() == verb) else {
        process::exit(1);
    };
    info!("running `{verb}'");
    if let Err(e) = cmd.run(sub_matches) {
        error!("{e:?}");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
