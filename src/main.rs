//! Demo CLI: feed intent JSON files through the engine against the scripted
//! mock bridge. The real deployment embeds [`voxpilot::Agent`] behind a
//! voice front end and a concrete browser transport.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use voxpilot::{Agent, MockBridge, SessionId, VoxConfig};

#[derive(Parser)]
#[command(name = "voxpilot", version, about = "Voice-driven browser agent core")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an intent record (JSON file) through the engine
    Run {
        /// Path to the raw intent JSON
        intent: PathBuf,
        /// Session to run under; a fresh session is opened when omitted
        #[arg(long)]
        session: Option<String>,
        /// Print session stats after the run
        #[arg(long)]
        stats: bool,
    },
    /// List live sessions, optionally sweeping idle ones
    Sessions {
        #[arg(long)]
        sweep: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = VoxConfig::load().unwrap_or_else(|err| {
        warn!(error = %err, "config load failed; using defaults");
        VoxConfig::default()
    });
    let agent = Agent::new(Arc::new(MockBridge::new()), config);

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            intent,
            session,
            stats,
        } => {
            let raw = std::fs::read_to_string(&intent)
                .with_context(|| format!("reading {}", intent.display()))?;
            let record: serde_json::Value =
                serde_json::from_str(&raw).context("intent file is not JSON")?;
            let session = session.map(SessionId).unwrap_or_default();

            let response = agent.submit_intent(&session, &record).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);

            if stats {
                let stats = agent.session_stats(&session).await?;
                println!("{}", serde_json::to_string_pretty(&stats)?);
                let turns = agent.recent_turns(&session, 5).await;
                println!("{}", serde_json::to_string_pretty(&turns)?);
            }
        }
        Commands::Sessions { sweep } => {
            if sweep {
                let swept = agent.sweep_idle().await;
                println!("swept {} idle session(s)", swept.len());
            }
            let sessions = agent.session_list().await;
            if sessions.is_empty() {
                println!("no live sessions");
            }
            for ctx in sessions {
                let idle = (Utc::now() - ctx.last_active_at)
                    .to_std()
                    .unwrap_or_default();
                println!(
                    "{}  state={:?}  workflows={}  idle={}",
                    ctx.id,
                    ctx.state,
                    ctx.history.len(),
                    humantime::format_duration(idle)
                );
            }
        }
    }
    Ok(())
}
