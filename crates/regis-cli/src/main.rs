use anyhow::Context;
use clap::Parser;

mod cli;
mod commands;
mod output;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("regis error: {error:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    init_tracing(cli.quiet, cli.verbose)?;

    let flags = cli.global_flags();
    let mut config =
        regis_config::RegisConfig::load_with_dotenv().context("failed to load regis config")?;

    // `verify` reports the break itself instead of halting on open.
    if matches!(cli.command, cli::Commands::Verify(_)) {
        config.ledger.verify_on_open = false;
    }
    if let Some(database) = &flags.database {
        config.database.path.clone_from(database);
    }

    let service = regis_store::service::RegisService::open(config)
        .await
        .context("failed to open regis store")?;
    if let Some(halt) = service.halted() {
        tracing::warn!(seq = halt.seq, reason = %halt.reason, "store opened read-only");
    }

    commands::dispatch(cli.command, &service, &flags).await
}

fn init_tracing(quiet: bool, verbose: bool) -> anyhow::Result<()> {
    let level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "warn"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_env("REGIS_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}
