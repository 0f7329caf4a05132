//! Bridge Chat - operator CLI for serving-bridge
//!
//! Runs one chat turn against a serving endpoint and prints the canonical
//! events as JSON lines, or mints a database credential lease to check that
//! issuance works.
//!
//! # Usage
//!
//! ```bash
//! # Run a turn with the transcript in a JSON file
//! BRIDGE_PAT=dapi... bridge-chat run --transcript chat.json
//!
//! # Force the OBO transport with a forwarded user token
//! BRIDGE_OBO_TOKEN=eyJ... bridge-chat run --transcript chat.json --mode obo
//!
//! # Check database credential issuance
//! BRIDGE_SP_TOKEN=... bridge-chat lease
//! ```
//!
//! Events go to stdout, logs go to stderr. Set `RUST_LOG` to change verbosity.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use bridge_core::config::default_config_path;
use bridge_core::{
    load_config_from_path, AuthModeSetting, AvailableCredentials, BearerToken, BridgeConfig,
    CanonicalEvent, ConfigOverrides, HttpCredentialIssuer, LeaseManager, Message,
    TransportSelector, TurnDriver, TurnStatus,
};

/// Capacity of the channel between the turn driver and the printer
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Bridge Chat - stream agent turns from the command line
#[derive(Parser, Debug)]
#[command(name = "bridge-chat")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "BRIDGE_CONFIG", value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// What to do
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one turn and print canonical events as JSON lines
    Run(RunArgs),
    /// Mint a database credential lease and print its expiry
    Lease(LeaseArgs),
}

/// Arguments of `run`
#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// JSON file holding the transcript as an array of messages
    #[arg(short, long, value_name = "FILE")]
    pub transcript: PathBuf,

    /// Auth mode: obo, pat or auto
    #[arg(short, long, value_name = "MODE")]
    pub mode: Option<AuthModeSetting>,

    /// Workspace base URL
    #[arg(long, value_name = "URL")]
    pub host: Option<String>,

    /// Serving endpoint name
    #[arg(long, value_name = "NAME")]
    pub endpoint: Option<String>,

    /// Most recent turns kept in the outbound history
    #[arg(long, value_name = "N")]
    pub max_turns: Option<usize>,

    /// Character budget of the outbound history
    #[arg(long, value_name = "N")]
    pub max_chars: Option<usize>,

    /// Idle timeout between stream reads in milliseconds
    #[arg(long, value_name = "MS")]
    pub idle_timeout_ms: Option<u64>,

    /// Forwarded user token for the OBO transport
    #[arg(long, env = "BRIDGE_OBO_TOKEN", hide_env_values = true)]
    pub obo_token: Option<String>,

    /// Personal access token for the chat-completions transport
    #[arg(long, env = "BRIDGE_PAT", hide_env_values = true)]
    pub pat: Option<String>,
}

/// Arguments of `lease`
#[derive(clap::Args, Debug)]
pub struct LeaseArgs {
    /// Database instance name (overrides the config file)
    #[arg(long, value_name = "NAME")]
    pub instance: Option<String>,

    /// Service principal token used to mint credentials
    #[arg(long, env = "BRIDGE_SP_TOKEN", hide_env_values = true)]
    pub sp_token: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("bridge_core=info".parse()?)
                .add_directive("bridge_chat=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let config_path = args.config.clone().or_else(default_config_path);
    let config = load_config_from_path(config_path)
        .context("Failed to load bridge configuration")?;
    info!(source = %config.source(), "Loaded configuration");

    match args.command {
        Command::Run(run_args) => run_turn(config, run_args).await,
        Command::Lease(lease_args) => mint_lease(config, lease_args).await,
    }
}

/// Run one turn and stream its events to stdout
async fn run_turn(mut config: BridgeConfig, args: RunArgs) -> Result<()> {
    let mut overrides = ConfigOverrides::new();
    if let Some(mode) = args.mode {
        overrides = overrides.with_auth_mode(mode);
    }
    if let Some(host) = args.host {
        overrides = overrides.with_host(host);
    }
    if let Some(name) = args.endpoint {
        overrides = overrides.with_endpoint_name(name);
    }
    if let Some(turns) = args.max_turns {
        overrides = overrides.with_max_turns(turns);
    }
    if let Some(chars) = args.max_chars {
        overrides = overrides.with_max_chars(chars);
    }
    if let Some(ms) = args.idle_timeout_ms {
        overrides = overrides.with_idle_timeout_ms(ms);
    }
    overrides.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let transcript = load_transcript(&args.transcript)?;
    let endpoint = config.endpoint().context("Endpoint is not configured")?;

    let credentials = AvailableCredentials {
        obo: args.obo_token.map(BearerToken::new),
        pat: args.pat.map(BearerToken::new),
    };
    let selector = TransportSelector::new(config.auth_mode, &config.stream)
        .context("Failed to build HTTP client")?;
    let bound = selector
        .bind(endpoint, credentials)
        .context("No usable transport for the configured auth mode")?;

    info!(
        session = %bound.session().id(),
        mode = %bound.session().mode(),
        messages = transcript.len(),
        "Starting turn"
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling turn");
            signal_cancel.cancel();
        }
    });

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let driver = TurnDriver::new(config.history);

    let turn = async {
        let outcome = driver.run(&bound, &transcript, &tx, &cancel).await;
        drop(tx);
        outcome
    };
    let (outcome, printed) = tokio::join!(turn, print_events(rx));
    let outcome = outcome.context("Turn could not start")?;
    printed?;

    info!(
        status = %outcome.status,
        events = outcome.events_delivered,
        finish_reason = outcome.finish_reason.as_deref().unwrap_or("-"),
        "Turn finished"
    );
    if !outcome.open_tool_calls.is_empty() {
        warn!(calls = ?outcome.open_tool_calls, "Tool calls left without a result");
    }

    match outcome.status {
        TurnStatus::Completed => Ok(()),
        TurnStatus::Failed => bail!("Turn failed"),
        TurnStatus::Cancelled => bail!("Turn cancelled"),
    }
}

/// Print each event as one JSON line
async fn print_events(mut rx: mpsc::Receiver<CanonicalEvent>) -> Result<()> {
    while let Some(event) = rx.recv().await {
        let line = serde_json::to_string(&event).context("Failed to encode event")?;
        println!("{line}");
    }
    Ok(())
}

/// Mint one lease and report when it expires
async fn mint_lease(config: BridgeConfig, args: LeaseArgs) -> Result<()> {
    config.validate().context("Invalid configuration")?;

    let host = config
        .host
        .as_deref()
        .context("Workspace host is not configured")?;
    let instance = args
        .instance
        .or_else(|| config.db_instance.clone())
        .context("Database instance is not configured")?;

    let issuer = HttpCredentialIssuer::new(
        host,
        &instance,
        BearerToken::new(args.sp_token),
        config.credential_request_timeout,
    )
    .context("Failed to build credential issuer")?;
    let manager = LeaseManager::new(Arc::new(issuer), config.refresh_margin);

    let lease = manager
        .current_value()
        .await
        .with_context(|| format!("Failed to obtain a credential for '{instance}'"))?;

    println!(
        "{}",
        serde_json::json!({
            "instance": instance,
            "expires_at": lease.expires_at.to_rfc3339(),
            "stale": lease.stale,
        })
    );
    Ok(())
}

/// Read a transcript file holding a JSON array of messages
fn load_transcript(path: &Path) -> Result<Vec<Message>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read transcript {}", path.display()))?;
    let messages: Vec<Message> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse transcript {}", path.display()))?;
    if messages.is_empty() {
        bail!("Transcript {} has no messages", path.display());
    }
    Ok(messages)
}
