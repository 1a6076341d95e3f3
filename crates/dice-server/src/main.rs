//! Liar's Dice server: entry point.
//!
//! Loads the configuration, installs logging, binds the TLS listener and
//! serves WebSocket connections until Ctrl+C.
//!
//! # Usage
//!
//! ```text
//! liars-dice-server [OPTIONS]
//!
//! Options:
//!   --config       <PATH>  TOML configuration file
//!   --bind         <IP>    Interface to listen on        [default: 0.0.0.0]
//!   --port         <PORT>  TCP port                      [default: 443]
//!   --cert         <PATH>  PEM certificate chain         [default: assets/pem/cert.pem]
//!   --key          <PATH>  PEM private key               [default: assets/pem/key.pem]
//!   --dh-params    <PATH>  PEM DH parameters             [default: assets/pem/dh.pem]
//!   --idle-timeout <SECS>  Close idle connections after  [default: 300]
//!   --log-level    <LVL>   tracing filter when RUST_LOG is unset [default: info]
//! ```
//!
//! # Precedence
//!
//! Built-in defaults, then the `--config` file, then flags.  Every flag can
//! also be set through the environment variable named in the table below.
//!
//! | Variable            | Flag             |
//! |---------------------|------------------|
//! | `DICE_CONFIG`       | `--config`       |
//! | `DICE_BIND`         | `--bind`         |
//! | `DICE_PORT`         | `--port`         |
//! | `DICE_CERT`         | `--cert`         |
//! | `DICE_KEY`          | `--key`          |
//! | `DICE_DH_PARAMS`    | `--dh-params`    |
//! | `DICE_IDLE_TIMEOUT` | `--idle-timeout` |
//! | `DICE_LOG_LEVEL`    | `--log-level`    |

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use liars_dice_core::GreetingDispatcher;
use liars_dice_server::domain::ServerConfig;
use liars_dice_server::infrastructure::{load_config, Acceptor, FileConfig};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// TLS-secured WebSocket server for Liar's Dice.
#[derive(Debug, Parser)]
#[command(name = "liars-dice-server", version)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, env = "DICE_CONFIG")]
    config: Option<PathBuf>,

    /// IP address to listen on.  `0.0.0.0` accepts every IPv4 interface.
    #[arg(long, env = "DICE_BIND")]
    bind: Option<IpAddr>,

    /// TCP port to listen on.
    #[arg(long, env = "DICE_PORT")]
    port: Option<u16>,

    /// PEM certificate chain, leaf first.
    #[arg(long, env = "DICE_CERT")]
    cert: Option<PathBuf>,

    /// PEM private key (unencrypted).
    #[arg(long, env = "DICE_KEY")]
    key: Option<PathBuf>,

    /// PEM DH parameters file.
    #[arg(long, env = "DICE_DH_PARAMS")]
    dh_params: Option<PathBuf>,

    /// Seconds without traffic before a connection is closed.
    #[arg(long, env = "DICE_IDLE_TIMEOUT")]
    idle_timeout: Option<u64>,

    /// `tracing` filter used when `RUST_LOG` is unset.
    #[arg(long, env = "DICE_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    /// Overlays the flags that were given onto `base`.
    fn apply_to(&self, mut base: ServerConfig) -> ServerConfig {
        let ip = self.bind.unwrap_or_else(|| base.bind_addr.ip());
        let port = self.port.unwrap_or_else(|| base.bind_addr.port());
        base.bind_addr = SocketAddr::new(ip, port);

        if let Some(cert) = &self.cert {
            base.cert_path.clone_from(cert);
        }
        if let Some(key) = &self.key {
            base.key_path.clone_from(key);
        }
        if let Some(dh) = &self.dh_params {
            base.dh_params_path = Some(dh.clone());
        }
        if let Some(secs) = self.idle_timeout {
            base.idle_timeout = Duration::from_secs(secs);
        }
        base
    }

    fn load_file(&self) -> anyhow::Result<FileConfig> {
        match &self.config {
            Some(path) => load_config(path)
                .with_context(|| format!("failed to load config file {}", path.display())),
            None => Ok(FileConfig::default()),
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Runs every connection on one thread: the reactor is single-threaded, and
/// sessions are tasks on it.
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let file = cli.load_file()?;

    // ── Logging setup ─────────────────────────────────────────────────────────
    //
    // `RUST_LOG` wins; otherwise the flag, then the file.
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| file.logging.level.clone());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = cli.apply_to(
        file.apply_to(ServerConfig::default())
            .context("invalid configuration file")?,
    );
    info!(
        bind = %config.bind_addr,
        cert = %config.cert_path.display(),
        idle_timeout = ?config.idle_timeout,
        "Liar's Dice server starting"
    );

    let dispatcher = Arc::new(GreetingDispatcher::new(config.greeting.clone()));
    let acceptor = Acceptor::from_config(config, dispatcher).context("failed to start server")?;
    let handle = acceptor.handle();

    // ── Graceful shutdown ─────────────────────────────────────────────────────
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                handle.shutdown();
            }
            Err(e) => tracing::error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    acceptor.run().await;

    info!("Liar's Dice server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
