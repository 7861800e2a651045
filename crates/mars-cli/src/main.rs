use anyhow::Result;
use clap::Parser;
use mars_cli::Cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "mars_core=debug,mars_cli=debug".into())
    } else {
        // Only warnings and errors unless asked
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "mars_core=warn,mars_cli=warn".into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    mars_cli::run(cli)
}
