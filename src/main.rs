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
    dbd_harvest::logging::init().context("init logging")?;

    let cli = dbd_harvest::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    let config = dbd_harvest::config::Config::from_env().context("load config")?;
    tracing::debug!(?config, "loaded config");

    match cli.command {
        dbd_harvest::cli::Command::Ingest(args) => {
            dbd_harvest::ingest::run(&config, args)
                .await
                .context("ingest")?;
        }
        dbd_harvest::cli::Command::Watch(args) => {
            dbd_harvest::monitor::run(&config, args)
                .await
                .context("watch")?;
        }
        dbd_harvest::cli::Command::Export(args) => {
            dbd_harvest::report::export(&config, args).context("export")?;
        }
        dbd_harvest::cli::Command::Report { command } => {
            dbd_harvest::report::run(&config, command).context("report")?;
        }
    }

    Ok(())
}
