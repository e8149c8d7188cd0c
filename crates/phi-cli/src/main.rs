//! phi - demo topologies on top of phi-core
//!
//! ```text
//! phi lb --workers 100 --work-ms 1000
//! phi ping-pong --rounds 5
//! phi max-num --players 8
//! phi --json router
//! ```

mod demo;
mod lb;
mod max_num;
mod ping_pong;
mod router;

use std::time::Duration;

use anyhow::{Result, ensure};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::demo::report;

#[derive(Parser, Debug)]
#[command(name = "phi")]
#[command(about = "Run the phi actor runtime demos", long_about = None)]
struct Cli {
    /// Print the demo summary as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Give up if the demo has not finished after this many seconds
    #[arg(long, global = true, default_value = "30")]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load balancer: one task scaled across many workers
    Lb {
        /// Number of workers (and requests)
        #[arg(long, default_value = "100")]
        workers: usize,

        /// Simulated work per request, in milliseconds
        #[arg(long, default_value = "1000")]
        work_ms: u64,
    },

    /// Ping-pong between two tasks using request/response
    PingPong {
        #[arg(long, default_value = "5")]
        rounds: u32,

        /// Pause before each ping and pong, in milliseconds
        #[arg(long, default_value = "500")]
        delay_ms: u64,
    },

    /// Players on a ring agree on the largest of their numbers
    MaxNum {
        #[arg(long, default_value = "8")]
        players: usize,

        /// Numbers are drawn from 0..max
        #[arg(long, default_value = "1000")]
        max: u64,
    },

    /// Route three kinds of message to three destinations
    Router,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,phi_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    ensure!(cli.timeout_secs > 0, "--timeout-secs must be at least 1");
    let timeout = Duration::from_secs(cli.timeout_secs);

    match cli.command {
        Command::Lb { workers, work_ms } => {
            ensure!(workers > 0, "--workers must be at least 1");
            let summary = lb::run(workers, Duration::from_millis(work_ms), timeout).await?;
            report(&summary, cli.json)
        }
        Command::PingPong { rounds, delay_ms } => {
            let summary = ping_pong::run(rounds, Duration::from_millis(delay_ms), timeout).await?;
            report(&summary, cli.json)
        }
        Command::MaxNum { players, max } => {
            let summary = max_num::run(players, max, timeout).await?;
            report(&summary, cli.json)
        }
        Command::Router => {
            let summary = router::run(timeout).await?;
            report(&summary, cli.json)
        }
    }
}
