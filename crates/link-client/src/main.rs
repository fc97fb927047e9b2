//! Link client entry point.
//!
//! Listens for link servers on the LAN multicast group, keeps track of the
//! devices they control, and keeps this client registered with each server
//! until Ctrl+C.
//!
//! # Usage
//!
//! ```text
//! link-client [OPTIONS]
//!
//! Options:
//!   --config <PATH>   TOML configuration file [default: link-client.toml]
//!   --group  <ADDR>   Multicast group, overrides the file
//!   --port   <PORT>   Multicast port, overrides the file
//!   --debug           Log at debug level regardless of RUST_LOG
//!   --print-config    Print the effective configuration and exit
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable               | Description              |
//! |------------------------|--------------------------|
//! | `LINK_CONFIG`          | Configuration file path  |
//! | `LINK_MULTICAST_GROUP` | Multicast group address  |
//! | `LINK_MULTICAST_PORT`  | Multicast port           |
//! | `RUST_LOG`             | `tracing` filter         |

use std::net::Ipv4Addr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use link_client::infrastructure::storage::config::{load_config, AppConfig};
use link_client::infrastructure::ui_bridge::LinkControl;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Link control client.
#[derive(Debug, Parser)]
#[command(
    name = "link-client",
    about = "Discovers link servers on the LAN and tracks their devices",
    version
)]
struct Cli {
    /// TOML configuration file.  A missing file means all defaults.
    #[arg(long, default_value = "link-client.toml", env = "LINK_CONFIG")]
    config: PathBuf,

    /// Multicast group the servers broadcast to.
    #[arg(long, env = "LINK_MULTICAST_GROUP")]
    group: Option<Ipv4Addr>,

    /// UDP port of the multicast group.
    #[arg(long, env = "LINK_MULTICAST_PORT")]
    port: Option<u16>,

    /// Log at debug level.
    #[arg(long)]
    debug: bool,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    /// Applies command-line overrides on top of the file settings.
    fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(group) = self.group {
            config.discovery.multicast_group = group;
        }
        if let Some(port) = self.port {
            config.discovery.multicast_port = port;
        }
        if self.debug {
            config.client.log_level = "debug".to_string();
        }
    }

    fn log_filter(&self, config: &AppConfig) -> EnvFilter {
        if self.debug {
            return EnvFilter::new("debug");
        }
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.client.log_level))
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    cli.apply_overrides(&mut config);

    tracing_subscriber::fmt()
        .with_env_filter(cli.log_filter(&config))
        .init();

    if cli.print_config {
        print!(
            "{}",
            toml::to_string_pretty(&config).context("failed to render configuration")?
        );
        return Ok(());
    }

    config.validate().context("invalid configuration")?;

    let control = LinkControl::start(&config)
        .await
        .context("failed to start discovery")?;
    control
        .registry()
        .subscribe(|event| info!("server registry: {event:?}"));

    info!("link client running, press Ctrl+C to stop");
    let signal = tokio::signal::ctrl_c().await;
    control.shutdown().await;
    signal.context("failed to listen for Ctrl+C")?;

    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
