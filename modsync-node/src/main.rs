// modsync-node: hosts or joins a session and runs the module compatibility handshake over TCP.

mod config;
mod manifest;
mod transport;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use modsync_core::{Negotiator, NegotiatorConfig, ReportLine, Severity};
use tracing_subscriber::EnvFilter;

use crate::manifest::ManifestModules;
use crate::transport::JoinOutcome;

#[derive(Parser)]
#[command(name = "modsync-node", version, about)]
struct Cli {
    /// Config file (default: ~/.config/modsync/config.toml, then /etc/modsync/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Accept joiners and refuse the ones whose modules do not match
    Host {
        /// Listen port (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Connect to a host and report what is incompatible
    Join {
        /// Host address, e.g. 192.168.1.10:2456
        addr: SocketAddr,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cfg = config::load(cli.config.as_deref())?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cli.command, cfg))
}

async fn run(command: Command, cfg: config::Config) -> anyhow::Result<()> {
    let modules = Arc::new(ManifestModules::from_config(&cfg)?);
    let handshake_timeout = Duration::from_secs(cfg.handshake_timeout_secs);

    match command {
        Command::Host { port } => {
            let port = port.unwrap_or(cfg.port);
            let config = NegotiatorConfig {
                max_snapshot_bytes: cfg.max_snapshot_bytes,
                ..NegotiatorConfig::host()
            };
            let negotiator = Arc::new(Negotiator::new(config, modules));
            let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
                .await
                .with_context(|| format!("binding port {port}"))?;
            tokio::select! {
                res = transport::run_host(listener, negotiator, handshake_timeout) => res?,
                res = shutdown_signal() => res?,
            }
            tracing::info!("host stopped");
            Ok(())
        }
        Command::Join { addr } => {
            let config = NegotiatorConfig {
                max_snapshot_bytes: cfg.max_snapshot_bytes,
                ..NegotiatorConfig::joiner(cfg.display_name.clone())
            };
            let negotiator = Arc::new(Negotiator::new(config, modules));
            let outcome = transport::join(addr, negotiator, handshake_timeout)
                .await
                .with_context(|| format!("joining {addr}"))?;
            match outcome {
                JoinOutcome::Admitted(report) => {
                    if report.version_string_mismatch {
                        tracing::warn!("admitted, but the host reports a different build");
                    }
                    println!("joined {addr}");
                    Ok(())
                }
                JoinOutcome::Refused { status, failure } => {
                    let lines = failure.map(|f| f.lines()).unwrap_or_default();
                    print_report(&lines);
                    anyhow::bail!("could not join {addr}: {status}")
                }
            }
        }
    }
}

fn print_report(lines: &[ReportLine]) {
    for line in lines {
        match line.severity {
            Severity::Error | Severity::Warning => eprintln!("{line}"),
            Severity::Info => println!("{line}"),
        }
    }
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
