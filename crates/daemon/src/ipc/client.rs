//! CLI side of the control socket.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use super::messages::{IpcRequest, IpcResponse};
use super::server::IpcError;

/// Default timeout for client operations.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// A client for talking to a running daemon.
pub struct IpcClient {
    reader: BufReader<tokio::io::ReadHalf<UnixStream>>,
    writer: tokio::io::WriteHalf<UnixStream>,
    timeout: Duration,
}

impl IpcClient {
    /// Connect to the daemon at the specified socket path.
    ///
    /// Fails when no daemon is listening.
    pub async fn connect(path: &Path) -> Result<Self, IpcError> {
        Self::connect_with_timeout(path, DEFAULT_TIMEOUT).await
    }

    /// Connect with a custom per-operation timeout.
    pub async fn connect_with_timeout(path: &Path, timeout: Duration) -> Result<Self, IpcError> {
        let stream = tokio::time::timeout(timeout, UnixStream::connect(path))
            .await
            .map_err(|_| IpcError::Timeout)??;

        let (read_half, write_half) = tokio::io::split(stream);

        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            timeout,
        })
    }

    /// Set the timeout for operations.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Send a request and wait for its response.
    pub async fn send(&mut self, request: IpcRequest) -> Result<IpcResponse, IpcError> {
        tokio::time::timeout(self.timeout, self.round_trip(&request))
            .await
            .map_err(|_| IpcError::Timeout)?
    }

    async fn round_trip(&mut self, request: &IpcRequest) -> Result<IpcResponse, IpcError> {
        let mut json = serde_json::to_string(request)?;
        json.push('\n');

        self.writer.write_all(json.as_bytes()).await?;
        self.writer.flush().await?;

        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Err(IpcError::Disconnected);
        }

        Ok(serde_json::from_str(line.trim())?)
    }

    /// Returns `true` if the daemon answers with `Pong`.
    pub async fn ping(&mut self) -> Result<bool, IpcError> {
        let response = self.send(IpcRequest::Ping).await?;
        Ok(matches!(response, IpcResponse::Pong))
    }

    /// Spawn a shell in `cwd`.
    pub async fn spawn(
        &mut self,
        cwd: PathBuf,
        cols: Option<u16>,
        rows: Option<u16>,
    ) -> Result<IpcResponse, IpcError> {
        self.send(IpcRequest::Spawn { cwd, cols, rows }).await
    }

    /// Describe the current session.
    pub async fn info(&mut self) -> Result<IpcResponse, IpcError> {
        self.send(IpcRequest::Info).await
    }

    /// Resize the current session.
    pub async fn resize(&mut self, cols: u16, rows: u16) -> Result<IpcResponse, IpcError> {
        self.send(IpcRequest::Resize { cols, rows }).await
    }

    /// Kill the current session.
    pub async fn kill(&mut self) -> Result<IpcResponse, IpcError> {
        self.send(IpcRequest::Kill).await
    }

    /// Ask the daemon to stop.
    pub async fn stop(&mut self) -> Result<IpcResponse, IpcError> {
        self.send(IpcRequest::Stop).await
    }
}
