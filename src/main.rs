use clap::Parser;
use std::process::ExitCode;
use stepc::Cli;

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(err) = cli.run() {
        eprintln!("ERROR: {err:#}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
