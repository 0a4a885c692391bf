//! Shell process adapter.
//!
//! This module wraps spawning an interactive shell behind a pseudo-terminal.
//! The adapter exposes a [`ShellHandle`] for input, resize, and termination,
//! and delivers output chunks followed by a single exit notification as
//! [`ShellEvent`]s on a channel.
//!
//! PTY reads and writes both block, so each runs on its own thread. Writing
//! only queues the bytes; a program that stops reading its terminal stalls
//! the writer thread, never the caller.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Unique identifier for a session.
pub type SessionId = String;

/// Terminal type advertised to the shell.
pub const TERM: &str = "xterm-256color";

/// Buffer size for reading from PTY.
const READ_BUFFER_SIZE: usize = 4096;

/// Errors that can occur during session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// No usable shell executable was found.
    #[error("no usable shell found (tried override, $SHELL, /bin/bash, /bin/sh)")]
    NoShell,

    /// The shell process has already exited.
    #[error("shell process already terminated")]
    AlreadyTerminated,

    /// Failed to spawn the PTY.
    #[error("failed to spawn PTY: {0}")]
    SpawnFailed(String),

    /// Failed to write to the PTY.
    #[error("failed to write to PTY: {0}")]
    WriteFailed(String),

    /// Failed to resize the PTY.
    #[error("failed to resize PTY: {0}")]
    ResizeFailed(String),

    /// Failed to signal the shell process.
    #[error("failed to kill shell: {0}")]
    KillFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Asynchronous notifications from a running shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEvent {
    /// A chunk of raw output, in production order.
    Output(Vec<u8>),
    /// The process terminated. `None` when the status could not be collected.
    /// Always the last event on the channel.
    Exited(Option<i32>),
}

/// Parameters for spawning a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    /// Shell executable.
    pub shell: PathBuf,
    /// Working directory.
    pub cwd: PathBuf,
    /// Initial width in columns.
    pub cols: u16,
    /// Initial height in rows.
    pub rows: u16,
}

/// Control surface of a spawned shell.
pub trait ShellHandle: Send + Sync + 'static {
    /// Process ID of the shell, if known.
    fn pid(&self) -> Option<u32>;

    /// Writes raw input to the shell.
    fn write(&self, data: &[u8]) -> Result<(), SessionError>;

    /// Changes the terminal dimensions.
    fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError>;

    /// Requests graceful termination (SIGTERM).
    fn terminate(&self) -> Result<(), SessionError>;

    /// Forcefully kills the process (SIGKILL).
    fn force_kill(&self) -> Result<(), SessionError>;

    /// Returns whether the process is still running.
    fn is_alive(&self) -> bool;
}

/// Something that can start shells.
///
/// The session manager is generic over this so tests can drive it with an
/// in-memory shell.
pub trait ShellSpawner: Send + Sync + 'static {
    /// Handle type produced by this spawner.
    type Handle: ShellHandle;

    /// Spawns a shell and returns its handle plus the event stream.
    fn spawn(
        &self,
        request: &SpawnRequest,
    ) -> Result<(Self::Handle, mpsc::UnboundedReceiver<ShellEvent>), SessionError>;
}

/// Spawns login shells on the host's native PTY system.
#[derive(Debug, Clone, Copy, Default)]
pub struct PtySpawner;

impl ShellSpawner for PtySpawner {
    type Handle = PtyShell;

    fn spawn(
        &self,
        request: &SpawnRequest,
    ) -> Result<(PtyShell, mpsc::UnboundedReceiver<ShellEvent>), SessionError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows: request.rows,
                cols: request.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&request.shell);
        cmd.arg("-l");
        cmd.cwd(&request.cwd);
        cmd.env("TERM", TERM);

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        // The child holds its own copy of the slave; ours must go so the
        // master sees EOF once the shell exits.
        drop(pair.slave);

        let pid = child.process_id();

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let running = Arc::new(AtomicBool::new(true));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (input_tx, input_rx) = mpsc::unbounded_channel();

        start_read_loop(reader, child, Arc::clone(&running), events_tx)?;
        start_write_loop(writer, input_rx)?;

        tracing::debug!(
            shell = %request.shell.display(),
            cwd = %request.cwd.display(),
            pid = ?pid,
            "Spawned PTY shell"
        );

        let shell = PtyShell {
            master: Mutex::new(pair.master),
            input: input_tx,
            running,
            pid,
        };

        Ok((shell, events_rx))
    }
}

/// Reads PTY output on a dedicated thread until EOF, then reaps the child.
///
/// Output and exit are sent from the same thread, so the exit event always
/// follows the last output chunk.
fn start_read_loop(
    mut reader: Box<dyn Read + Send>,
    mut child: Box<dyn Child + Send + Sync>,
    running: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<ShellEvent>,
) -> Result<(), SessionError> {
    std::thread::Builder::new()
        .name("pty-reader".to_string())
        .spawn(move || {
            let mut buffer = [0u8; READ_BUFFER_SIZE];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        // Keep draining even with nobody listening so the
                        // shell never blocks on a full PTY buffer.
                        let _ = events.send(ShellEvent::Output(buffer[..n].to_vec()));
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        // EIO is how Linux reports a closed slave.
                        tracing::trace!(error = %e, "PTY read ended");
                        break;
                    }
                }
            }

            let code = match child.wait() {
                Ok(status) => Some(status.exit_code() as i32),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to collect shell exit status");
                    None
                }
            };

            running.store(false, Ordering::SeqCst);
            tracing::debug!(exit_code = ?code, "PTY shell exited");
            let _ = events.send(ShellEvent::Exited(code));
        })
        .map(|_| ())
        .map_err(|e| SessionError::SpawnFailed(format!("failed to start PTY reader: {e}")))
}

/// Feeds queued input to the PTY until the queue closes or a write fails.
fn start_write_loop(
    mut writer: Box<dyn Write + Send>,
    mut input: mpsc::UnboundedReceiver<Vec<u8>>,
) -> Result<(), SessionError> {
    std::thread::Builder::new()
        .name("pty-writer".to_string())
        .spawn(move || {
            while let Some(data) = input.blocking_recv() {
                if let Err(e) = writer.write_all(&data).and_then(|()| writer.flush()) {
                    tracing::debug!(error = %e, "PTY write failed, input closed");
                    break;
                }
            }
        })
        .map(|_| ())
        .map_err(|e| SessionError::SpawnFailed(format!("failed to start PTY writer: {e}")))
}

/// A shell running behind a native PTY.
pub struct PtyShell {
    /// The PTY master handle, used for resizing.
    master: Mutex<Box<dyn MasterPty + Send>>,

    /// Input queue drained by the writer thread.
    input: mpsc::UnboundedSender<Vec<u8>>,

    /// Cleared by the reader thread once the child has been reaped.
    running: Arc<AtomicBool>,

    /// Process ID.
    pid: Option<u32>,
}

impl PtyShell {
    fn signal(&self, signal: Signal) -> Result<(), SessionError> {
        // Once reaped the pid may belong to someone else.
        if !self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let pid = self
            .pid
            .ok_or_else(|| SessionError::KillFailed("process id unavailable".to_string()))?;

        match kill(Pid::from_raw(pid as i32), signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(SessionError::KillFailed(e.to_string())),
        }
    }
}

impl ShellHandle for PtyShell {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn write(&self, data: &[u8]) -> Result<(), SessionError> {
        if !self.is_alive() {
            return Err(SessionError::AlreadyTerminated);
        }

        self.input
            .send(data.to_vec())
            .map_err(|_| SessionError::WriteFailed("PTY writer has stopped".to_string()))
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError> {
        if !self.is_alive() {
            return Err(SessionError::AlreadyTerminated);
        }

        let master = self
            .master
            .lock()
            .map_err(|_| SessionError::ResizeFailed("master lock poisoned".to_string()))?;
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::ResizeFailed(e.to_string()))
    }

    fn terminate(&self) -> Result<(), SessionError> {
        self.signal(Signal::SIGTERM)
    }

    fn force_kill(&self) -> Result<(), SessionError> {
        self.signal(Signal::SIGKILL)
    }

    fn is_alive(&self) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        match self.pid {
            Some(pid) => kill(Pid::from_raw(pid as i32), None).is_ok(),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn request(cwd: PathBuf) -> SpawnRequest {
        SpawnRequest {
            shell: PathBuf::from("/bin/sh"),
            cwd,
            cols: 80,
            rows: 24,
        }
    }

    async fn collect_until(
        rx: &mut mpsc::UnboundedReceiver<ShellEvent>,
        marker: &str,
    ) -> bool {
        let mut seen = Vec::new();
        for _ in 0..50 {
            match timeout(Duration::from_millis(100), rx.recv()).await {
                Ok(Some(ShellEvent::Output(data))) => {
                    seen.extend_from_slice(&data);
                    if String::from_utf8_lossy(&seen).contains(marker) {
                        return true;
                    }
                }
                Ok(Some(ShellEvent::Exited(_))) | Ok(None) => return false,
                Err(_) => {}
            }
        }
        false
    }

    #[tokio::test]
    async fn test_pty_spawn_and_echo() {
        let (shell, mut rx) = PtySpawner.spawn(&request(std::env::temp_dir())).unwrap();
        assert!(shell.is_alive());
        assert!(shell.pid().is_some());

        shell.write(b"echo pty_marker_$((40+2))\n").unwrap();
        assert!(collect_until(&mut rx, "pty_marker_42").await);

        let _ = shell.force_kill();
    }

    #[tokio::test]
    async fn test_pty_sets_term_and_cwd() {
        let dir = tempfile::TempDir::new().unwrap();
        let (shell, mut rx) = PtySpawner.spawn(&request(dir.path().to_path_buf())).unwrap();

        shell.write(b"echo \"term=$TERM\"; pwd\n").unwrap();
        assert!(collect_until(&mut rx, "term=xterm-256color").await);

        let _ = shell.force_kill();
    }

    #[tokio::test]
    async fn test_pty_exit_code_reported_last() {
        let (shell, mut rx) = PtySpawner.spawn(&request(std::env::temp_dir())).unwrap();
        shell.write(b"exit 7\n").unwrap();

        let mut exit = None;
        for _ in 0..50 {
            match timeout(Duration::from_millis(100), rx.recv()).await {
                Ok(Some(ShellEvent::Exited(code))) => {
                    exit = Some(code);
                    break;
                }
                Ok(Some(ShellEvent::Output(_))) | Err(_) => {}
                Ok(None) => break,
            }
        }

        assert_eq!(exit, Some(Some(7)));
        assert!(!shell.is_alive());
        assert!(matches!(
            shell.write(b"echo nope\n"),
            Err(SessionError::AlreadyTerminated)
        ));
        // The channel closes after the exit event.
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_pty_write_returns_while_terminal_is_not_read() {
        let (shell, mut rx) = PtySpawner.spawn(&request(std::env::temp_dir())).unwrap();
        shell
            .write(b"stty raw -echo; echo stalled_$((40+2)); sleep 20\n")
            .unwrap();
        assert!(collect_until(&mut rx, "stalled_42").await);

        // Far more than the line discipline buffers while nobody reads.
        let started = std::time::Instant::now();
        shell.write(&vec![b'a'; 1 << 20]).unwrap();
        shell.write(b"more").unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));

        let _ = shell.force_kill();
    }

    #[tokio::test]
    async fn test_pty_resize() {
        let (shell, _rx) = PtySpawner.spawn(&request(std::env::temp_dir())).unwrap();
        assert!(shell.resize(120, 40).is_ok());
        let _ = shell.force_kill();
    }

    #[tokio::test]
    async fn test_pty_force_kill() {
        let (shell, mut rx) = PtySpawner.spawn(&request(std::env::temp_dir())).unwrap();
        shell.force_kill().unwrap();

        let mut exited = false;
        for _ in 0..50 {
            match timeout(Duration::from_millis(100), rx.recv()).await {
                Ok(Some(ShellEvent::Exited(_))) => {
                    exited = true;
                    break;
                }
                Ok(None) => break,
                _ => {}
            }
        }
        assert!(exited);
        assert!(!shell.is_alive());
        // Signalling a reaped process is not an error.
        assert!(shell.force_kill().is_ok());
    }
}
