//! Session transport core for a console remote-play streaming client.
//!
//! The `discover` and `wakeup` verbs below exercise the same discovery
//! primitives a full streaming client uses to find and wake a console
//! before handing off to [`session::Session`].

mod congestion;
mod ctrl;
mod discovery;
mod error;
mod feedback;
mod log_sniffer;
mod models;
mod orientation;
mod registration;
mod session;
mod stop_pipe;
mod transport;
mod audio_sender;

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use discovery::{probe_host, wakeup as send_wakeup};
use models::connect_info::Target;

#[derive(Parser)]
#[command(name = "takion-stream")]
#[command(about = "Session transport core for a console remote-play streaming client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe a host for a discovery response
    Discover {
        /// Host to probe
        #[arg(short, long)]
        host: String,

        /// Discovery probe timeout in milliseconds
        #[arg(long, default_value = "2000")]
        timeout_ms: u64,

        /// Target is a PlayStation 4 (default probes the PS5 port)
        #[arg(long, conflicts_with = "ps5")]
        ps4: bool,

        /// Target is a PlayStation 5
        #[arg(long, conflicts_with = "ps4")]
        ps5: bool,
    },

    /// Send a wakeup packet to a console
    Wakeup {
        /// Host to send the wakeup packet to
        #[arg(short, long)]
        host: String,

        /// Remote Play registration key, up to 8 hex digits
        #[arg(short, long)]
        registkey: String,

        /// Target is a PlayStation 4
        #[arg(long, conflicts_with = "ps5")]
        ps4: bool,

        /// Target is a PlayStation 5 (default)
        #[arg(long, conflicts_with = "ps4")]
        ps5: bool,
    },
}

fn resolve_target(ps4: bool, ps5: bool, default_ps5: bool) -> Target {
    if ps4 {
        Target::Ps4
    } else if ps5 {
        Target::Ps5
    } else if default_ps5 {
        Target::Ps5
    } else {
        Target::Ps4
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Discover { host, timeout_ms, ps4, ps5 } => {
            let target = resolve_target(ps4, ps5, true);
            let port = target.discovery_port();
            match probe_host(&host, port, Duration::from_millis(timeout_ms)).await {
                Ok(Some(discovered)) => {
                    println!("{discovered:#?}");
                    Ok(())
                }
                Ok(None) => bail!("no discovery response from {host} within {timeout_ms}ms"),
                Err(e) => Err(e).context("discovery probe failed"),
            }
        }
        Commands::Wakeup { host, registkey, ps4, ps5 } => {
            let target = resolve_target(ps4, ps5, true);
            let credential = discovery::parse_registkey(&registkey).context("invalid registration key")?;
            send_wakeup(&host, target, credential).await.context("failed to send wakeup packet")?;
            Ok(())
        }
    }
}
