//! In-memory shell for exercising the session manager without a real PTY.
//!
//! [`MockSpawner`] records every spawn and hands out [`MockShell`] handles
//! that tests use both ways: to inspect what the manager did (writes,
//! resizes, signals) and to play the process side (emit output, exit).

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use super::pty::{SessionError, ShellEvent, ShellHandle, ShellSpawner, SpawnRequest};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

static NEXT_PID: AtomicU32 = AtomicU32::new(40_000);

/// Behaviour knobs for shells produced by a [`MockSpawner`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MockBehavior {
    /// `resize` returns an error.
    pub fail_resize: bool,
    /// `spawn` itself fails.
    pub fail_spawn: bool,
    /// SIGTERM is ignored, like an interactive bash.
    pub ignore_terminate: bool,
}

struct MockShellState {
    request: SpawnRequest,
    pid: u32,
    behavior: MockBehavior,
    events: Mutex<Option<mpsc::UnboundedSender<ShellEvent>>>,
    writes: Mutex<Vec<Vec<u8>>>,
    resizes: Mutex<Vec<(u16, u16)>>,
    alive: AtomicBool,
    terminated: AtomicBool,
    force_killed: AtomicBool,
}

/// A fake shell process. Cloning shares the same process.
#[derive(Clone)]
pub struct MockShell {
    state: Arc<MockShellState>,
}

impl MockShell {
    /// The request the manager spawned this shell with.
    pub fn request(&self) -> &SpawnRequest {
        &self.state.request
    }

    /// Emits a chunk of output as if the process printed it.
    pub fn emit_output(&self, data: &[u8]) {
        if let Some(tx) = lock(&self.state.events).as_ref() {
            let _ = tx.send(ShellEvent::Output(data.to_vec()));
        }
    }

    /// Terminates the process with the given status and closes the stream.
    pub fn exit(&self, code: Option<i32>) {
        self.state.alive.store(false, Ordering::SeqCst);
        if let Some(tx) = lock(&self.state.events).take() {
            let _ = tx.send(ShellEvent::Exited(code));
        }
    }

    /// Everything written to the shell so far.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        lock(&self.state.writes).clone()
    }

    /// All resize calls, including failed ones.
    pub fn resizes(&self) -> Vec<(u16, u16)> {
        lock(&self.state.resizes).clone()
    }

    /// Whether SIGTERM was requested.
    pub fn was_terminated(&self) -> bool {
        self.state.terminated.load(Ordering::SeqCst)
    }

    /// Whether SIGKILL was requested.
    pub fn was_force_killed(&self) -> bool {
        self.state.force_killed.load(Ordering::SeqCst)
    }
}

impl ShellHandle for MockShell {
    fn pid(&self) -> Option<u32> {
        Some(self.state.pid)
    }

    fn write(&self, data: &[u8]) -> Result<(), SessionError> {
        if !self.is_alive() {
            return Err(SessionError::AlreadyTerminated);
        }
        lock(&self.state.writes).push(data.to_vec());
        Ok(())
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError> {
        lock(&self.state.resizes).push((cols, rows));
        if self.state.behavior.fail_resize {
            return Err(SessionError::ResizeFailed("mock resize failure".to_string()));
        }
        Ok(())
    }

    fn terminate(&self) -> Result<(), SessionError> {
        self.state.terminated.store(true, Ordering::SeqCst);
        if !self.state.behavior.ignore_terminate {
            self.exit(Some(143));
        }
        Ok(())
    }

    fn force_kill(&self) -> Result<(), SessionError> {
        self.state.force_killed.store(true, Ordering::SeqCst);
        self.exit(Some(137));
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.state.alive.load(Ordering::SeqCst)
    }
}

/// Spawner producing [`MockShell`]s.
#[derive(Clone, Default)]
pub struct MockSpawner {
    behavior: MockBehavior,
    spawned: Arc<Mutex<Vec<MockShell>>>,
}

impl MockSpawner {
    /// Creates a spawner with default behaviour.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a spawner whose shells behave as described.
    pub fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            spawned: Arc::default(),
        }
    }

    /// All shells spawned so far, oldest first.
    pub fn shells(&self) -> Vec<MockShell> {
        lock(&self.spawned).clone()
    }

    /// The most recently spawned shell.
    pub fn last(&self) -> Option<MockShell> {
        lock(&self.spawned).last().cloned()
    }
}

impl ShellSpawner for MockSpawner {
    type Handle = MockShell;

    fn spawn(
        &self,
        request: &SpawnRequest,
    ) -> Result<(MockShell, mpsc::UnboundedReceiver<ShellEvent>), SessionError> {
        if self.behavior.fail_spawn {
            return Err(SessionError::SpawnFailed("mock spawn failure".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let shell = MockShell {
            state: Arc::new(MockShellState {
                request: request.clone(),
                pid: NEXT_PID.fetch_add(1, Ordering::Relaxed),
                behavior: self.behavior,
                events: Mutex::new(Some(tx)),
                writes: Mutex::default(),
                resizes: Mutex::default(),
                alive: AtomicBool::new(true),
                terminated: AtomicBool::new(false),
                force_killed: AtomicBool::new(false),
            }),
        };

        lock(&self.spawned).push(shell.clone());
        Ok((shell, rx))
    }
}
