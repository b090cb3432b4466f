use clap::Parser;

use obsctl::{run_subcommand, Interrupted, Obsctl};

fn main() -> std::process::ExitCode {
    // parse handles --help and --version itself, exiting 0.
    let cli = Obsctl::parse();
    match run_subcommand(cli) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) if err.is::<Interrupted>() => std::process::ExitCode::from(130),
        Err(_) => std::process::ExitCode::FAILURE,
    }
}
