use clap::Parser;
use image_sync::cli::{Args, Runner};
use image_sync::logging::init_tracing;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose, args.log_format.into());

    let runner = match Runner::new(args) {
        Ok(runner) => runner,
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    // Dropping the batch on Ctrl-C cancels transfers and tools; cleanup still runs
    tokio::select! {
        result = runner.run() => match result {
            Ok(_) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!("{}", e);
                ExitCode::FAILURE
            }
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, cancelling batch");
            ExitCode::from(130)
        }
    }
}
