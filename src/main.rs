//! kn-quickstart CLI

use clap::Parser;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kn_quickstart::setup::SetupOutcome;
use kn_quickstart::Cli;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    match cli.run().await {
        Ok(SetupOutcome::Completed { .. })
        | Ok(SetupOutcome::Reused)
        | Ok(SetupOutcome::InstallationSkipped)
        | Ok(SetupOutcome::Stopped) => {}
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}
