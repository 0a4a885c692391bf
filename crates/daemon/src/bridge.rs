//! Daemon wiring.
//!
//! [`Bridge`] owns the one [`SessionManager`] for the process and exposes it
//! two ways: the WebSocket listener for viewers and the Unix control socket
//! for whoever decides when a shell should exist.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::ipc::{get_socket_path, IpcConnection, IpcError, IpcRequest, IpcResponse, IpcServer};
use crate::network::WsServer;
use crate::session::{PtySpawner, SessionManager, ShellSpawner};

/// Lifecycle of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// Not started, or fully stopped.
    Stopped,
    /// Binding listeners.
    Starting,
    /// Accepting viewers and control requests.
    Running,
    /// Tearing down.
    ShuttingDown,
}

/// Top-level daemon object.
pub struct Bridge<S: ShellSpawner = PtySpawner> {
    config: Config,
    socket_path: PathBuf,
    state: Arc<RwLock<BridgeState>>,
    manager: Arc<SessionManager<S>>,
    shutdown_token: CancellationToken,
    ws_addr: Option<SocketAddr>,
}

impl Bridge<PtySpawner> {
    /// Creates a bridge that spawns real shells and uses the standard socket path.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_spawner(config, PtySpawner, get_socket_path())
    }
}

impl<S: ShellSpawner> Bridge<S> {
    /// Creates a bridge with an explicit spawner and control socket path.
    pub fn with_spawner(config: Config, spawner: S, socket_path: PathBuf) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        let manager = Arc::new(SessionManager::new(spawner, config.session_settings()));

        Ok(Self {
            config,
            socket_path,
            state: Arc::new(RwLock::new(BridgeState::Stopped)),
            manager,
            shutdown_token: CancellationToken::new(),
            ws_addr: None,
        })
    }

    /// Returns the current state.
    pub async fn state(&self) -> BridgeState {
        *self.state.read().await
    }

    /// The session manager shared by both surfaces.
    pub fn manager(&self) -> &Arc<SessionManager<S>> {
        &self.manager
    }

    /// Address the WebSocket listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.ws_addr
    }

    /// Path of the control socket.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Token cancelled when the bridge stops, including on an IPC `Stop`.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Binds both listeners and starts their accept loops.
    pub async fn start(&mut self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != BridgeState::Stopped {
                anyhow::bail!("Bridge is already running");
            }
            *state = BridgeState::Starting;
        }

        info!("Starting shell bridge...");

        if let Err(e) = self.bind_and_serve().await {
            *self.state.write().await = BridgeState::Stopped;
            return Err(e);
        }

        *self.state.write().await = BridgeState::Running;
        Ok(())
    }

    async fn bind_and_serve(&mut self) -> Result<()> {
        // Control socket first: it doubles as the single-instance check.
        let ipc_server = IpcServer::bind(&self.socket_path).await.with_context(|| {
            format!("Failed to bind control socket at {}", self.socket_path.display())
        })?;

        let listen_addr = self.config.listen_addr()?;
        let ws_server = WsServer::bind(listen_addr)
            .await
            .with_context(|| format!("Failed to bind WebSocket listener on {listen_addr}"))?;
        let ws_addr = ws_server.local_addr()?;
        self.ws_addr = Some(ws_addr);

        tokio::spawn(ws_server.run(Arc::clone(&self.manager), self.shutdown_token.clone()));
        tokio::spawn(Self::ipc_loop(
            ipc_server,
            Arc::clone(&self.manager),
            self.shutdown_token.clone(),
        ));

        info!(
            listen_addr = %ws_addr,
            socket = %self.socket_path.display(),
            "Shell bridge started"
        );
        Ok(())
    }

    /// Stops accepting connections and kills the session.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == BridgeState::Stopped || *state == BridgeState::ShuttingDown {
                return Ok(());
            }
            *state = BridgeState::ShuttingDown;
        }

        info!("Stopping shell bridge...");
        self.shutdown_token.cancel();
        self.manager.shutdown().await;

        *self.state.write().await = BridgeState::Stopped;
        info!("Shell bridge stopped");
        Ok(())
    }

    /// Answers one control request.
    pub async fn handle_request(&self, request: IpcRequest) -> IpcResponse {
        dispatch(&self.manager, &self.shutdown_token, request).await
    }

    async fn ipc_loop(
        server: IpcServer,
        manager: Arc<SessionManager<S>>,
        shutdown_token: CancellationToken,
    ) {
        loop {
            let accepted = tokio::select! {
                _ = shutdown_token.cancelled() => break,
                accepted = server.accept() => accepted,
            };

            match accepted {
                Ok(conn) => {
                    let manager = Arc::clone(&manager);
                    let shutdown_token = shutdown_token.clone();
                    tokio::spawn(async move {
                        serve_control(conn, &manager, &shutdown_token).await;
                    });
                }
                Err(e) => warn!(error = %e, "Failed to accept control connection"),
            }
        }

        debug!("Control socket closed");
    }
}

async fn serve_control<S: ShellSpawner>(
    mut conn: IpcConnection,
    manager: &SessionManager<S>,
    shutdown_token: &CancellationToken,
) {
    loop {
        let request = match conn.read_request().await {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(IpcError::Json(e)) => {
                debug!(error = %e, "Bad control request");
                if conn.send_response(&error(e.to_string())).await.is_err() {
                    break;
                }
                continue;
            }
            Err(e) => {
                debug!(error = %e, "Control connection failed");
                break;
            }
        };

        let response = dispatch(manager, shutdown_token, request).await;
        if let Err(e) = conn.send_response(&response).await {
            debug!(error = %e, "Failed to send control response");
            break;
        }
    }
}

fn error(message: impl Into<String>) -> IpcResponse {
    IpcResponse::Error {
        message: message.into(),
    }
}

async fn dispatch<S: ShellSpawner>(
    manager: &SessionManager<S>,
    shutdown_token: &CancellationToken,
    request: IpcRequest,
) -> IpcResponse {
    debug!(?request, "Control request");

    match request {
        IpcRequest::Ping => IpcResponse::Pong,
        IpcRequest::Spawn { cwd, cols, rows } => {
            let settings = manager.settings();
            let cols = cols.unwrap_or(settings.default_cols);
            let rows = rows.unwrap_or(settings.default_rows);
            if cols == 0 || rows == 0 {
                return error(format!("invalid terminal size {cols}x{rows}"));
            }
            if !cwd.is_dir() {
                return error(format!("not a directory: {}", cwd.display()));
            }

            match manager.spawn(cwd, cols, rows).await {
                Ok(session_id) => IpcResponse::Spawned { session_id },
                Err(e) => error(e.to_string()),
            }
        }
        IpcRequest::Info => IpcResponse::Info {
            session: manager.info().await.map(Into::into),
        },
        IpcRequest::Resize { cols, rows } => {
            if cols == 0 || rows == 0 {
                return error(format!("invalid terminal size {cols}x{rows}"));
            }
            if manager.resize(cols, rows).await {
                IpcResponse::Resized
            } else {
                error("no active session")
            }
        }
        IpcRequest::Kill => IpcResponse::Killed {
            session_id: manager.kill().await,
        },
        IpcRequest::Stop => {
            info!("Stop requested over control socket");
            shutdown_token.cancel();
            IpcResponse::Stopping
        }
    }
}
