use clap::Parser;
use std::process::ExitCode;
use talksense::{describe, run, AlreadyReported, Cli};
use talksense_core::telemetry;
use tokio::runtime::Runtime;

fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing(telemetry::default_filter())?;

    let cli = Cli::parse();
    let runtime = Runtime::new()?;
    match runtime.block_on(run(cli)) {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) => {
            tracing::debug!(error = ?err, "command failed");
            if !err.is::<AlreadyReported>() {
                eprintln!("{}", describe(&err));
            }
            Ok(ExitCode::FAILURE)
        }
    }
}
