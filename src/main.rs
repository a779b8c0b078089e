#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

use chainwatch::chain::EvmChainClient;
use chainwatch::config::Config;
use chainwatch::executor::ScriptExecutor;
use chainwatch::ledger::ExecutionLedger;
use chainwatch::poller::EventPoller;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "chainwatch", version, about = "Unattended agent that executes on-chain triggered commands")]
struct Cli {
    /// Directory holding config.toml and agent state (default: ~/.chainwatch)
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Override the RPC endpoint URL
    #[arg(long)]
    rpc_url: Option<String>,

    /// Override the watched contract address
    #[arg(long)]
    contract_address: Option<String>,

    /// Override the log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config_dir {
        Some(dir) => Config::load_or_init_at(dir)?,
        None => Config::load_or_init()?,
    };
    config.apply_env_overrides();
    if let Some(url) = cli.rpc_url {
        config.rpc_url = url;
    }
    if let Some(addr) = cli.contract_address {
        config.contract_address = addr;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    config.validate()?;

    init_logging(&config)?;

    tracing::info!(
        version = VERSION,
        client_id = %config.client_id,
        network = %config.network,
        os = std::env::consts::OS,
        arch = std::env::consts::ARCH,
        "chainwatch agent starting"
    );

    let ledger = Arc::new(
        ExecutionLedger::open(config.ledger_path()).context("failed to open execution ledger")?,
    );
    if ledger.is_first_run() {
        tracing::info!("fresh storage location, first run");
    }

    let executor = Arc::new(
        ScriptExecutor::new(config.execution_timeout(), config.max_retry_attempts)
            .context("failed to create script executor")?,
    );

    let contract = EvmChainClient::parse_contract_address(&config.contract_address)?;
    let chain = EvmChainClient::connect(&config.rpc_url, contract)?;

    let mut poller = EventPoller::new(
        chain,
        Arc::clone(&ledger),
        config.polling_interval(),
        config.mark_executed_on_handler_failure,
    )
    .await?;

    let handler_executor = Arc::clone(&executor);
    poller.set_handler(Box::new(move |command| {
        let executor = Arc::clone(&handler_executor);
        Box::pin(async move {
            tracing::info!(
                command_id = %command.id,
                kind = ?command.kind,
                payload_len = command.payload.len(),
                "processing new command"
            );

            let outcome = executor.execute(&command).await;
            if outcome.succeeded {
                tracing::info!(
                    command_id = %outcome.command_id,
                    duration_ms = outcome.duration.as_millis(),
                    output = %truncate(&outcome.output, 200),
                    "command executed successfully"
                );
                return Ok(());
            }

            tracing::error!(
                command_id = %outcome.command_id,
                duration_ms = outcome.duration.as_millis(),
                error = outcome.error.as_deref().unwrap_or("unknown"),
                "command execution failed"
            );
            anyhow::bail!(
                "command {} failed: {}",
                outcome.command_id,
                outcome.error.as_deref().unwrap_or("unknown")
            )
        })
    }));

    // Catch up on anything triggered while the agent was down, before the
    // periodic loop starts.
    if let Err(e) = poller.check_latest_unexecuted().await {
        tracing::warn!(error = %e, "startup catch-up check failed");
    }

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            signal_token.cancel();
        }
    });

    tracing::info!("agent running, press ctrl-c to stop");
    poller.run(shutdown).await?;

    tracing::info!("shutdown complete");
    Ok(())
}

fn init_logging(config: &Config) -> Result<()> {
    let level: Level = config
        .log_level
        .parse()
        .unwrap_or(Level::INFO);

    let builder = tracing_subscriber::fmt().with_max_level(level);

    match &config.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {path}"))?;
            builder
                .with_writer(std::io::stdout.and(std::sync::Mutex::new(file)))
                .with_ansi(false)
                .init();
        }
        None => builder.init(),
    }
    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut cut = max_len;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &s[..cut])
}
