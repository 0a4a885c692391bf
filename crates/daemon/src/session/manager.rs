//! Session manager owning the single active shell session.
//!
//! The manager holds at most one [`Session`] at a time. Spawning replaces
//! whatever was running. Viewers attach and detach freely; the shell outlives
//! any one of them. When the last viewer leaves, an orphan timer is armed and
//! the session is reclaimed if nobody comes back within the grace period.
//!
//! Every session gets a fresh generation number. The event pump and the
//! orphan timer both capture the generation they were created for and
//! re-check it under the lock before acting, so events from a killed or
//! replaced shell never reach the viewers of its successor.
//!
//! All state sits behind one async mutex; every public operation and every
//! background task takes it for the duration of a short, non-blocking
//! critical section.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use protocol::{decode_inbound, Frame, Inbound};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::pty::{
    PtySpawner, SessionError, SessionId, ShellEvent, ShellHandle, ShellSpawner, SpawnRequest,
};
use super::shell::resolve_shell;
use super::viewer::{ViewerChannel, ViewerId};

/// Default terminal width.
pub const DEFAULT_COLS: u16 = 80;

/// Default terminal height.
pub const DEFAULT_ROWS: u16 = 24;

/// How long a session may sit with zero viewers before it is killed.
pub const DEFAULT_ORPHAN_GRACE: Duration = Duration::from_secs(5);

/// Delay between SIGTERM and the SIGKILL escalation check.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);

/// Tunables for the session manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Shell override, tried before `$SHELL`.
    pub shell: Option<PathBuf>,
    /// Width used by [`SessionManager::spawn_default`].
    pub default_cols: u16,
    /// Height used by [`SessionManager::spawn_default`].
    pub default_rows: u16,
    /// Orphan reclaim grace period.
    pub orphan_grace: Duration,
    /// SIGTERM to SIGKILL escalation delay.
    pub kill_grace: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            shell: None,
            default_cols: DEFAULT_COLS,
            default_rows: DEFAULT_ROWS,
            orphan_grace: DEFAULT_ORPHAN_GRACE,
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }
}

/// Snapshot of the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Session identifier.
    pub id: SessionId,
    /// Working directory the shell was started in.
    pub cwd: PathBuf,
    /// Last-known terminal columns.
    pub cols: u16,
    /// Last-known terminal rows.
    pub rows: u16,
    /// Number of attached viewers.
    pub viewers: usize,
    /// Process ID of the shell.
    pub pid: Option<u32>,
}

/// The live shell and everything attached to it.
struct Session<H> {
    id: SessionId,
    generation: u64,
    cwd: PathBuf,
    handle: Arc<H>,
    viewers: HashMap<ViewerId, Arc<dyn ViewerChannel>>,
    cols: u16,
    rows: u16,
    orphan_timer: Option<JoinHandle<()>>,
}

impl<H: ShellHandle> Session<H> {
    /// Sends raw output to every viewer. Failures are per-viewer and never
    /// remove anyone from the set.
    fn broadcast_output(&self, data: &[u8]) -> usize {
        let mut delivered = 0;
        for viewer in self.viewers.values() {
            match viewer.send_binary(data) {
                Ok(()) => delivered += 1,
                Err(e) => tracing::debug!(session_id = %self.id, error = %e, "Output not delivered"),
            }
        }
        delivered
    }

    fn broadcast_control(&self, text: &str) -> usize {
        let mut delivered = 0;
        for viewer in self.viewers.values() {
            match viewer.send_text(text) {
                Ok(()) => delivered += 1,
                Err(e) => tracing::debug!(session_id = %self.id, error = %e, "Control frame not delivered"),
            }
        }
        delivered
    }

    fn cancel_orphan_timer(&mut self) -> bool {
        match self.orphan_timer.take() {
            Some(timer) => {
                timer.abort();
                true
            }
            None => false,
        }
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            cwd: self.cwd.clone(),
            cols: self.cols,
            rows: self.rows,
            viewers: self.viewers.len(),
            pid: self.handle.pid(),
        }
    }
}

struct ManagerState<H> {
    current: Option<Session<H>>,
    last_generation: u64,
}

impl<H: ShellHandle> ManagerState<H> {
    /// Returns the current session only if it is the given generation.
    fn current_if(&mut self, generation: u64) -> Option<&mut Session<H>> {
        self.current
            .as_mut()
            .filter(|session| session.generation == generation)
    }

    /// Clears the current slot and starts two-phase termination.
    ///
    /// The slot is empty when this returns; the process itself gets SIGTERM
    /// now and SIGKILL after `kill_grace` if it is still alive by then. The
    /// returned handle resolves once that escalation check has run.
    fn kill_current(&mut self, kill_grace: Duration) -> Option<(SessionId, JoinHandle<()>)> {
        let mut session = self.current.take()?;
        session.cancel_orphan_timer();

        if let Err(e) = session.handle.terminate() {
            tracing::debug!(session_id = %session.id, error = %e, "SIGTERM failed");
        }

        let handle = Arc::clone(&session.handle);
        let session_id = session.id.clone();
        let escalation = tokio::spawn(async move {
            tokio::time::sleep(kill_grace).await;
            if handle.is_alive() {
                tracing::info!(session_id = %session_id, "Shell ignored SIGTERM, sending SIGKILL");
                if let Err(e) = handle.force_kill() {
                    tracing::warn!(session_id = %session_id, error = %e, "SIGKILL failed");
                }
            }
        });

        tracing::info!(
            session_id = %session.id,
            generation = session.generation,
            "Killed session"
        );

        Some((session.id, escalation))
    }
}

/// Owner of the single active shell session.
///
/// Construct one per process and share it behind an `Arc`.
pub struct SessionManager<S: ShellSpawner = PtySpawner> {
    spawner: S,
    settings: SessionSettings,
    state: Arc<Mutex<ManagerState<S::Handle>>>,
}

impl SessionManager<PtySpawner> {
    /// Creates a manager that spawns real PTY shells.
    pub fn native(settings: SessionSettings) -> Self {
        Self::new(PtySpawner, settings)
    }
}

impl<S: ShellSpawner> SessionManager<S> {
    /// Creates a manager backed by the given spawner.
    pub fn new(spawner: S, settings: SessionSettings) -> Self {
        Self {
            spawner,
            settings,
            state: Arc::new(Mutex::new(ManagerState {
                current: None,
                last_generation: 0,
            })),
        }
    }

    /// Returns the manager's settings.
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Spawns a new shell in `cwd`, replacing any current session.
    ///
    /// The new session starts with no viewers and no orphan timer. Fails only
    /// if no shell can be found or the spawn itself fails; in that case there
    /// is no current session afterwards.
    pub async fn spawn(
        &self,
        cwd: impl Into<PathBuf>,
        cols: u16,
        rows: u16,
    ) -> Result<SessionId, SessionError> {
        let cwd = cwd.into();
        let mut state = self.state.lock().await;

        if state.current.is_some() {
            tracing::debug!("Replacing current session");
            state.kill_current(self.settings.kill_grace);
        }

        let shell = resolve_shell(self.settings.shell.as_deref())?;
        let request = SpawnRequest {
            shell,
            cwd: cwd.clone(),
            cols,
            rows,
        };
        let (handle, events) = self.spawner.spawn(&request)?;

        state.last_generation += 1;
        let generation = state.last_generation;
        let id = Uuid::new_v4().to_string();

        tracing::info!(
            session_id = %id,
            generation,
            cwd = %cwd.display(),
            shell = %request.shell.display(),
            cols,
            rows,
            pid = ?handle.pid(),
            "Spawned session"
        );

        state.current = Some(Session {
            id: id.clone(),
            generation,
            cwd,
            handle: Arc::new(handle),
            viewers: HashMap::new(),
            cols,
            rows,
            orphan_timer: None,
        });

        self.start_event_pump(generation, events);

        Ok(id)
    }

    /// Spawns with the configured default dimensions.
    pub async fn spawn_default(&self, cwd: impl Into<PathBuf>) -> Result<SessionId, SessionError> {
        self.spawn(cwd, self.settings.default_cols, self.settings.default_rows)
            .await
    }

    /// Returns a snapshot of the current session, if any.
    pub async fn info(&self) -> Option<SessionInfo> {
        let state = self.state.lock().await;
        state.current.as_ref().map(Session::info)
    }

    /// Returns the current session's id, if any.
    pub async fn current_id(&self) -> Option<SessionId> {
        let state = self.state.lock().await;
        state.current.as_ref().map(|session| session.id.clone())
    }

    /// Returns whether an orphan timer is currently armed.
    pub async fn orphan_timer_armed(&self) -> bool {
        let state = self.state.lock().await;
        state
            .current
            .as_ref()
            .is_some_and(|session| session.orphan_timer.is_some())
    }

    /// Attaches a viewer to the current session.
    ///
    /// Cancels a pending orphan timer. Returns `false` if there is no session.
    pub async fn attach(&self, viewer: Arc<dyn ViewerChannel>) -> bool {
        let mut state = self.state.lock().await;
        let Some(session) = state.current.as_mut() else {
            tracing::debug!(viewer_id = viewer.id(), "Attach ignored: no session");
            return false;
        };

        if session.cancel_orphan_timer() {
            tracing::debug!(session_id = %session.id, "Orphan timer cancelled");
        }

        let viewer_id = viewer.id();
        session.viewers.insert(viewer_id, viewer);

        tracing::debug!(
            session_id = %session.id,
            viewer_id,
            viewers = session.viewers.len(),
            "Viewer attached"
        );
        true
    }

    /// Attaches a viewer only if `session_id` names the current session.
    pub async fn attach_to(&self, session_id: &str, viewer: Arc<dyn ViewerChannel>) -> bool {
        let mut state = self.state.lock().await;
        let Some(session) = state.current.as_mut().filter(|s| s.id == session_id) else {
            tracing::debug!(session_id, viewer_id = viewer.id(), "Attach ignored: unknown session");
            return false;
        };

        session.cancel_orphan_timer();
        let viewer_id = viewer.id();
        session.viewers.insert(viewer_id, viewer);

        tracing::debug!(
            session_id = %session.id,
            viewer_id,
            viewers = session.viewers.len(),
            "Viewer attached"
        );
        true
    }

    /// Detaches a viewer from the current session.
    ///
    /// Arms the orphan timer when the viewer set becomes empty.
    pub async fn detach(&self, viewer_id: ViewerId) {
        let mut state = self.state.lock().await;
        let Some(session) = state.current.as_mut() else {
            return;
        };

        session.viewers.remove(&viewer_id);
        tracing::debug!(
            session_id = %session.id,
            viewer_id,
            viewers = session.viewers.len(),
            "Viewer detached"
        );

        if session.viewers.is_empty() && session.orphan_timer.is_none() {
            tracing::debug!(
                session_id = %session.id,
                grace_ms = self.settings.orphan_grace.as_millis() as u64,
                "No viewers left, orphan timer armed"
            );
            session.orphan_timer = Some(self.arm_orphan_timer(session.generation));
        }
    }

    /// Kills the current session. No-op if there is none.
    ///
    /// Returns the id of the killed session.
    pub async fn kill(&self) -> Option<SessionId> {
        let mut state = self.state.lock().await;
        state
            .kill_current(self.settings.kill_grace)
            .map(|(id, _escalation)| id)
    }

    /// Records new dimensions and resizes the terminal.
    ///
    /// The stored size is updated even if the terminal refuses the resize.
    /// Returns `false` if there is no session.
    pub async fn resize(&self, cols: u16, rows: u16) -> bool {
        let mut state = self.state.lock().await;
        let Some(session) = state.current.as_mut() else {
            return false;
        };

        session.cols = cols;
        session.rows = rows;

        if let Err(e) = session.handle.resize(cols, rows) {
            tracing::debug!(session_id = %session.id, error = %e, "Resize failed");
        }
        true
    }

    /// Writes raw input to the current shell. Errors are logged and dropped.
    ///
    /// The shell is written to after the lock is released.
    pub async fn write(&self, data: &[u8]) {
        let target = {
            let state = self.state.lock().await;
            state
                .current
                .as_ref()
                .map(|session| (session.id.clone(), Arc::clone(&session.handle)))
        };
        let Some((session_id, handle)) = target else {
            return;
        };

        if let Err(e) = handle.write(data) {
            tracing::debug!(session_id = %session_id, error = %e, "Input not delivered");
        }
    }

    /// Routes one inbound frame from a viewer.
    ///
    /// Binary frames are input. Text frames must be a well-formed `input` or
    /// `resize` control message; anything else is dropped without effect.
    pub async fn route_message(&self, frame: &Frame) {
        match decode_inbound(frame) {
            Some(Inbound::Input(data)) => self.write(&data).await,
            Some(Inbound::Resize { cols, rows }) => {
                self.resize(cols, rows).await;
            }
            None => tracing::trace!(len = frame.len(), "Ignoring unrecognized viewer frame"),
        }
    }

    /// Kills the session on daemon shutdown and waits out the SIGKILL
    /// escalation so the shell cannot outlive the daemon.
    pub async fn shutdown(&self) {
        let killed = {
            let mut state = self.state.lock().await;
            state.kill_current(self.settings.kill_grace)
        };

        if let Some((id, escalation)) = killed {
            if let Err(e) = escalation.await {
                tracing::debug!(session_id = %id, error = %e, "Kill escalation task failed");
            }
            tracing::info!(session_id = %id, "Session stopped for shutdown");
        }
    }

    /// Forwards shell events for one generation until the stream ends or the
    /// generation stops being current.
    fn start_event_pump(&self, generation: u64, mut events: mpsc::UnboundedReceiver<ShellEvent>) {
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let mut state = state.lock().await;
                let Some(session) = state.current_if(generation) else {
                    tracing::trace!(generation, "Session superseded, event pump stopping");
                    break;
                };

                match event {
                    ShellEvent::Output(data) => {
                        session.broadcast_output(&data);
                    }
                    ShellEvent::Exited(code) => {
                        let frame = Frame::exit(code);
                        if let Frame::Text(text) = &frame {
                            session.broadcast_control(text);
                        }

                        tracing::info!(
                            session_id = %session.id,
                            generation,
                            exit_code = ?code,
                            "Shell exited"
                        );

                        session.cancel_orphan_timer();
                        state.current = None;
                        break;
                    }
                }
            }
        });
    }

    fn arm_orphan_timer(&self, generation: u64) -> JoinHandle<()> {
        let state = Arc::clone(&self.state);
        let grace = self.settings.orphan_grace;
        let kill_grace = self.settings.kill_grace;

        tokio::spawn(async move {
            tokio::time::sleep(grace).await;

            let mut state = state.lock().await;
            let Some(session) = state.current_if(generation) else {
                return;
            };
            if !session.viewers.is_empty() {
                return;
            }

            // This task is the timer; drop its own handle rather than abort it.
            session.orphan_timer.take();
            tracing::info!(
                session_id = %session.id,
                "No viewers reconnected, killing orphaned session"
            );
            state.kill_current(kill_grace);
        })
    }
}
