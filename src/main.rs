//! Crashpoint
//!
//! Watches a crash-game table and verifies every round as it ends, or
//! audits a single round offline from its revealed seed.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crashpoint::{
    core::growth::duration,
    core::hash::hex_divisible,
    proof::crash::{crash_digest, INSTANT_CRASH_MODULUS},
    proof::verify::{check_chain, verdict_for},
    ClientConfig, GameEvent, ProtocolClient, VERSION,
};

#[derive(Parser, Debug)]
#[command(name = "crashpoint", version, about = "Crash game session client and verifier")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow the table and verify each round (default).
    Watch {
        /// WebSocket endpoint (overrides CRASHPOINT_URL).
        #[arg(long)]
        url: Option<String>,
    },
    /// Verify one round offline.
    Verify {
        /// Revealed server seed (hex).
        #[arg(long)]
        seed: String,
        /// Reported crash multiplier (x100).
        #[arg(long)]
        crash: Option<u64>,
        /// Commitment published before the round (the previous round's seed).
        #[arg(long)]
        previous: Option<String>,
        /// Client seed (overrides CRASHPOINT_CLIENT_SEED).
        #[arg(long)]
        client_seed: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let args = Args::parse();
    let mut config = ClientConfig::from_env();

    match args.command.unwrap_or(Command::Watch { url: None }) {
        Command::Watch { url } => {
            if let Some(url) = url {
                config.url = url;
            }
            watch(config).await
        }
        Command::Verify {
            seed,
            crash,
            previous,
            client_seed,
        } => verify(
            &seed,
            client_seed.as_deref().unwrap_or(&config.client_seed),
            crash,
            previous.as_deref(),
        ),
    }
}

async fn watch(config: ClientConfig) -> Result<()> {
    info!("Crashpoint v{}", VERSION);
    info!("Table: {}", config.url);
    if !config.token.is_configured() {
        info!("No join token configured, watching anonymously");
    }

    let client = Arc::new(ProtocolClient::new(config));
    let mut events = client.subscribe();

    // Log domain events
    let logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!("Event log lagged by {}", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let runner = {
        let client = client.clone();
        tokio::spawn(async move { client.run().await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!("Shutting down");
    client.shutdown();

    runner.await.context("Client task panicked")??;
    logger.abort();
    Ok(())
}

fn log_event(event: &GameEvent) {
    match event {
        GameEvent::Join(info) => info!(
            "Joined round {} ({:?}) as {:?}, balance {:?}",
            info.game_id, info.state, info.username, info.balance
        ),
        GameEvent::GameStarting {
            game_id,
            time_till_start,
            ..
        } => info!("Round {} starting in {} ms", game_id, time_till_start),
        GameEvent::GameStarted { game_id, bets, .. } => {
            info!("Round {} started with {} bets", game_id, bets.len())
        }
        GameEvent::GameCrash(summary) => {
            let verification = &summary.verification;
            if summary.verdict().is_ok() {
                info!(
                    "Round {} crashed at {:.2}x, verified ({:?})",
                    summary.game_id,
                    summary.crash as f64 / 100.0,
                    verification.chain
                );
            } else {
                error!(
                    "Round {} crashed at {:.2}x but seed gives {:.2}x: SCAM",
                    summary.game_id,
                    summary.crash as f64 / 100.0,
                    verification.computed as f64 / 100.0
                );
            }
        }
        GameEvent::CashedOut {
            username,
            stopped_at,
            ..
        } => info!("{} cashed out at {:.2}x", username, *stopped_at as f64 / 100.0),
        GameEvent::Disconnected { reason } => warn!("Disconnected: {}", reason),
        GameEvent::GameTick { .. } | GameEvent::PlayerBet { .. } => {}
    }
}

fn verify(seed: &str, client_seed: &str, crash: Option<u64>, previous: Option<&str>) -> Result<()> {
    if seed.is_empty() || !seed.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!("seed must be a hex string");
    }

    let digest = crash_digest(seed, client_seed);
    let computed = crashpoint::crash_point(seed, client_seed);

    println!("digest:   {}", digest);
    println!("instant:  {}", hex_divisible(&digest, INSTANT_CRASH_MODULUS));
    println!("crash:    {:.2}x ({})", computed as f64 / 100.0, computed);
    println!("duration: {} ms", duration(computed));

    if let Some(reported) = crash {
        println!("verdict:  {:?}", verdict_for(computed, reported));
    }
    if previous.is_some() {
        println!("chain:    {:?}", check_chain(seed, previous));
    }
    Ok(())
}
