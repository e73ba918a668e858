//! Helpers shared by all three terminal-manager policy variants.
//!
//! Grounded on `terminado`'s `TermManagerBase` (`make_term_env`,
//! `new_terminal`): the environment-construction logic now lives on
//! `ManagerConfig::term_env` (see `config.rs`) since it needs no other
//! manager state, leaving this module with just the spawn step every
//! variant shares.

use std::sync::Arc;

use crate::config::ManagerConfig;
use crate::error::ManagerError;
use crate::pty::PtySession;

/// Spawns a fresh `PtySession` using the manager's configured shell,
/// environment, and working directory at the default 24x80 geometry
/// (clients narrow it down via `resize_to_smallest` once attached).
pub(crate) fn spawn_session(config: &ManagerConfig) -> Result<Arc<PtySession>, ManagerError> {
    let env = config.term_env(24, 80);
    PtySession::spawn(&config.shell_command, &env, config.cwd.as_deref()).map_err(ManagerError::from)
}
