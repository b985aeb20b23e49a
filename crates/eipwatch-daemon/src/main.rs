//! eipwatch binary

use clap::Parser;
use eipwatch_daemon::{Cli, Settings, daemon};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // --help and --version are not failures
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let settings = match Settings::from_cli(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("eipwatch: {e}");
            return ExitCode::FAILURE;
        }
    };

    if settings.dry_run {
        return match settings.to_printable_yaml() {
            Ok(yaml) => {
                print!("{yaml}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("eipwatch: {e}");
                ExitCode::FAILURE
            }
        };
    }

    common::logging::init(
        &settings.log_level,
        settings.log_format,
        settings.log_destination,
    );

    tracing::info!(version = env!("CARGO_PKG_VERSION"), mode = ?settings.mode, "eipwatch starting");

    match daemon::run(&settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("eipwatch failed: {e:#}");
            eprintln!("eipwatch: {e:#}");
            ExitCode::FAILURE
        }
    }
}
