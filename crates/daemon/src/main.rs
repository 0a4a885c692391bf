//! ShellBridge Daemon
//!
//! Runs the shell bridge, or talks to a running one over its control socket.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use daemon::config::Config;
use daemon::ipc::{get_socket_path, IpcClient, IpcResponse, IpcSessionInfo};
use daemon::Bridge;
use tracing_subscriber::EnvFilter;

/// ShellBridge - share one local shell with browser viewers.
#[derive(Parser, Debug)]
#[command(name = "shellbridge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the daemon in the foreground
    Start {
        /// Address for the viewer WebSocket listener
        #[arg(long, value_name = "ADDR")]
        listen: Option<String>,
    },

    /// Spawn a shell, replacing the current one
    Spawn {
        /// Working directory (defaults to the current directory)
        #[arg(long, value_name = "DIR")]
        cwd: Option<PathBuf>,

        /// Terminal columns
        #[arg(long)]
        cols: Option<u16>,

        /// Terminal rows
        #[arg(long)]
        rows: Option<u16>,
    },

    /// Show the current session
    Status,

    /// Resize the current session
    Resize {
        /// Terminal columns
        #[arg(long)]
        cols: u16,

        /// Terminal rows
        #[arg(long)]
        rows: u16,
    },

    /// Kill the current session
    Kill,

    /// Stop the running daemon
    Stop,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    config.apply_env_overrides();

    init_tracing(&config, cli.verbose);
    if let Some(path) = &cli.config {
        tracing::debug!("Using config file: {:?}", path);
    }

    match cli.command {
        Commands::Start { listen } => {
            if let Some(addr) = listen {
                config.network.listen_addr = addr;
            }
            run_daemon(config).await
        }
        Commands::Spawn { cwd, cols, rows } => {
            let cwd = absolute_cwd(cwd)?;
            match connect().await?.spawn(cwd, cols, rows).await? {
                IpcResponse::Spawned { session_id } => {
                    println!("{session_id}");
                    Ok(())
                }
                other => fail(other),
            }
        }
        Commands::Status => match connect().await?.info().await? {
            IpcResponse::Info { session: Some(info) } => {
                print_session(&info);
                Ok(())
            }
            IpcResponse::Info { session: None } => {
                println!("No active session");
                Ok(())
            }
            other => fail(other),
        },
        Commands::Resize { cols, rows } => match connect().await?.resize(cols, rows).await? {
            IpcResponse::Resized => Ok(()),
            other => fail(other),
        },
        Commands::Kill => match connect().await?.kill().await? {
            IpcResponse::Killed {
                session_id: Some(id),
            } => {
                println!("Killed session {id}");
                Ok(())
            }
            IpcResponse::Killed { session_id: None } => {
                println!("No active session");
                Ok(())
            }
            other => fail(other),
        },
        Commands::Stop => match connect().await?.stop().await? {
            IpcResponse::Stopping => {
                println!("Daemon is stopping");
                Ok(())
            }
            other => fail(other),
        },
    }
}

/// `RUST_LOG` wins; otherwise `--verbose` or the configured level.
fn init_tracing(config: &Config, verbose: bool) {
    let level = if verbose {
        "debug"
    } else {
        config.daemon.log_level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run_daemon(config: Config) -> anyhow::Result<()> {
    let mut bridge = Bridge::new(config)?;
    bridge.start().await?;

    let shutdown = bridge.shutdown_token();
    tokio::select! {
        result = wait_for_shutdown_signal() => result?,
        _ = shutdown.cancelled() => {}
    }

    bridge.stop().await
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
        _ = sigint.recv() => tracing::info!("Received SIGINT"),
    }
    Ok(())
}

async fn connect() -> anyhow::Result<IpcClient> {
    let socket_path = get_socket_path();
    IpcClient::connect(&socket_path).await.with_context(|| {
        format!(
            "Daemon is not running (no control socket at {})",
            socket_path.display()
        )
    })
}

/// Relative paths are resolved here since the daemon has its own cwd.
fn absolute_cwd(cwd: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let here = std::env::current_dir().context("Failed to read current directory")?;
    Ok(match cwd {
        Some(path) => resolve_against(&here, path),
        None => here,
    })
}

fn resolve_against(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

fn print_session(info: &IpcSessionInfo) {
    println!("Session: {}", info.id);
    println!("  Cwd:     {}", info.cwd.display());
    println!("  Size:    {}x{}", info.cols, info.rows);
    println!("  Viewers: {}", info.viewers);
    if let Some(pid) = info.pid {
        println!("  PID:     {pid}");
    }
}

fn fail(response: IpcResponse) -> anyhow::Result<()> {
    match response {
        IpcResponse::Error { message } => anyhow::bail!("Daemon error: {message}"),
        other => anyhow::bail!("Unexpected response from daemon: {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_with_listen() {
        let cli = Cli::try_parse_from(["shellbridge", "start", "--listen", "0.0.0.0:9000"]).unwrap();
        match cli.command {
            Commands::Start { listen } => assert_eq!(listen.as_deref(), Some("0.0.0.0:9000")),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_spawn_args() {
        let cli = Cli::try_parse_from([
            "shellbridge",
            "spawn",
            "--cwd",
            "/tmp/proj",
            "--cols",
            "120",
        ])
        .unwrap();
        match cli.command {
            Commands::Spawn { cwd, cols, rows } => {
                assert_eq!(cwd, Some(PathBuf::from("/tmp/proj")));
                assert_eq!(cols, Some(120));
                assert_eq!(rows, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_resize_requires_both_dimensions() {
        assert!(Cli::try_parse_from(["shellbridge", "resize", "--cols", "80"]).is_err());
        assert!(Cli::try_parse_from(["shellbridge", "resize", "--cols", "80", "--rows", "24"]).is_ok());
    }

    #[test]
    fn test_global_flags() {
        let cli =
            Cli::try_parse_from(["shellbridge", "status", "--verbose", "--config", "/etc/sb.toml"])
                .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/sb.toml")));
        assert!(matches!(cli.command, Commands::Status));
    }

    #[test]
    fn test_simple_commands() {
        for (arg, expected) in [("kill", "Kill"), ("stop", "Stop"), ("status", "Status")] {
            let cli = Cli::try_parse_from(["shellbridge", arg]).unwrap();
            assert_eq!(format!("{:?}", cli.command), expected);
        }
    }

    #[test]
    fn test_missing_subcommand_rejected() {
        assert!(Cli::try_parse_from(["shellbridge"]).is_err());
    }

    #[test]
    fn test_resolve_against() {
        let base = Path::new("/home/user");
        assert_eq!(
            resolve_against(base, PathBuf::from("proj")),
            PathBuf::from("/home/user/proj")
        );
        assert_eq!(
            resolve_against(base, PathBuf::from("/srv")),
            PathBuf::from("/srv")
        );
    }

    #[test]
    fn test_fail_surfaces_daemon_message() {
        let err = fail(IpcResponse::Error {
            message: "no active session".to_string(),
        })
        .unwrap_err();
        assert!(err.to_string().contains("no active session"));
    }
}
