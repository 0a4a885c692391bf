//! Interactive shell resolution.
//!
//! The shell is picked from a fixed fallback chain so that spawning never
//! depends on a single path being present:
//!
//! 1. The configured override (`session.shell` in the config file)
//! 2. The `$SHELL` environment variable
//! 3. `/bin/bash`
//! 4. `/bin/sh`
//!
//! A candidate is accepted only if it exists on disk.

use std::path::{Path, PathBuf};

use super::pty::SessionError;

/// Environment variable naming the user's preferred shell.
pub const SHELL_ENV: &str = "SHELL";

/// Platform default shell.
pub const PRIMARY_SHELL: &str = "/bin/bash";

/// Last-resort shell.
pub const FALLBACK_SHELL: &str = "/bin/sh";

/// Resolves the shell executable to spawn.
///
/// Returns [`SessionError::NoShell`] when no candidate exists.
pub fn resolve_shell(configured: Option<&Path>) -> Result<PathBuf, SessionError> {
    let from_env = std::env::var_os(SHELL_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from);

    let overrides = [configured.map(Path::to_path_buf), from_env];
    let defaults = [Path::new(PRIMARY_SHELL), Path::new(FALLBACK_SHELL)];

    pick_shell(&overrides, &defaults).ok_or(SessionError::NoShell)
}

fn pick_shell(overrides: &[Option<PathBuf>], defaults: &[&Path]) -> Option<PathBuf> {
    overrides
        .iter()
        .flatten()
        .map(PathBuf::as_path)
        .chain(defaults.iter().copied())
        .find(|candidate| candidate.is_file())
        .map(Path::to_path_buf)
}
