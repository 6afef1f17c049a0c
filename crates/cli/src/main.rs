use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    ferry_channels::{ChannelRegistry, RemoteReceiver},
    ferry_config::FerryConfig,
    ferry_slack::{AccountExit, SlackAccountConfig, SlackPlugin},
    tokio::sync::mpsc,
    tracing::{error, info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "ferry", about = "Ferry: Slack chat bridge", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery in ./ and ~/.config/ferry/).
    #[arg(long, short, global = true, env = "FERRY_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start every configured account and print gateway messages as JSON
    /// lines (default when no subcommand is provided).
    Run,
    /// Validate the configuration and list the accounts it defines.
    Check,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr; stdout carries the message stream.
    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn load(cli: &Cli) -> anyhow::Result<FerryConfig> {
    match &cli.config {
        Some(path) => ferry_config::load_config(path),
        None => Ok(ferry_config::discover_and_load()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "ferry starting");

    let config = load(&cli)?;
    match cli.command {
        None | Some(Commands::Run) => run(config).await,
        Some(Commands::Check) => check(&config),
    }
}

fn check(config: &FerryConfig) -> anyhow::Result<()> {
    if config.slack.is_empty() {
        println!("No slack accounts configured.");
        return Ok(());
    }
    for account_id in config.slack.keys() {
        let Some(value) = config.account_config("slack", account_id) else {
            continue;
        };
        let account: SlackAccountConfig = serde_json::from_value(value)
            .map_err(|e| anyhow::anyhow!("slack.{account_id}: {e}"))?;
        let mode = match &account.incoming_webhook_bind {
            Some(bind) => format!("webhook receiver on {bind}"),
            None if account.token().is_empty() => {
                anyhow::bail!("slack.{account_id}: token or incoming_webhook_bind is required")
            },
            None => "live session".to_string(),
        };
        println!("  slack.{account_id}: {mode}");
    }
    Ok(())
}

async fn run(config: FerryConfig) -> anyhow::Result<()> {
    if config.slack.is_empty() {
        anyhow::bail!("no slack accounts configured");
    }

    let (remote_tx, remote_rx) = mpsc::channel(config.general.remote_buffer.max(1));
    let (exit_tx, mut exit_rx) = mpsc::unbounded_channel();
    let gateway = tokio::spawn(print_messages(remote_rx));

    let mut registry = ChannelRegistry::new();
    registry.register(Box::new(
        SlackPlugin::new()
            .with_remote(remote_tx)
            .with_exit_notifier(exit_tx),
    ));
    info!(plugins = ?registry.list(), "bridge plugins registered");
    let Some(slack) = registry.get_mut("slack") else {
        anyhow::bail!("slack plugin not registered");
    };

    let mut running = 0usize;
    for account_id in config.slack.keys() {
        let Some(value) = config.account_config("slack", account_id) else {
            continue;
        };
        match slack.start_account(account_id, value).await {
            Ok(()) => running += 1,
            Err(e) => error!(account_id = %account_id, error = %e, "failed to start slack account"),
        }
    }
    if running == 0 {
        anyhow::bail!("no slack account could be started");
    }

    let result = supervise(&mut exit_rx, running).await;

    for account_id in config.slack.keys() {
        if let Err(e) = slack.stop_account(account_id).await {
            warn!(account_id = %account_id, error = %e, "failed to stop slack account");
        }
    }
    drop(registry);
    let _ = gateway.await;
    result
}

/// Wait for Ctrl-C or for every account to end. A fatal account error
/// ends the process with that error.
async fn supervise(
    exits: &mut mpsc::UnboundedReceiver<AccountExit>,
    mut running: usize,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, stopping accounts");
                return Ok(());
            },
            exit = exits.recv() => {
                let Some(AccountExit { account_id, error }) = exit else {
                    return Ok(());
                };
                running = running.saturating_sub(1);
                match error {
                    Some(e) if e.is_fatal() => {
                        return Err(anyhow::anyhow!("slack.{account_id}: {e}"));
                    },
                    Some(e) => warn!(account_id = %account_id, error = %e, "slack account ended"),
                    None => info!(account_id = %account_id, "slack account ended"),
                }
                if running == 0 {
                    return Ok(());
                }
            },
        }
    }
}

/// Stand-in gateway: one JSON document per line on stdout.
async fn print_messages(mut messages: RemoteReceiver) {
    while let Some(msg) = messages.recv().await {
        match serde_json::to_string(&msg) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(id = %msg.id, error = %e, "failed to encode message"),
        }
    }
}
