use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    let cli = crawlsync::cli::Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    crawlsync::logging::init(default_level).context("init logging")?;
    tracing::debug!(?cli, "parsed cli");

    crawlsync::commands::run(cli).await
}
