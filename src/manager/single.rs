//! A single shared PTY session for every acquisition.
//!
//! Grounded on `terminado`'s `SingleTermManager`: the first acquisition
//! lazily spawns the shared terminal; every later acquisition returns the
//! same handle; `kill_all` clears the slot so the next acquisition
//! re-spawns rather than reusing a dead session.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;

use crate::config::ManagerConfig;
use crate::error::ManagerError;
use crate::manager::core::spawn_session;
use crate::pty::PtySession;

/// All connections share one terminal.
pub struct SingleTerminalManager {
    config: ManagerConfig,
    terminal: AsyncMutex<Option<Arc<PtySession>>>,
}

impl SingleTerminalManager {
    pub fn new(config: ManagerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            terminal: AsyncMutex::new(None),
        })
    }

    /// Returns the shared session, spawning it on first use.
    pub async fn get_terminal(self: &Arc<Self>) -> Result<Arc<PtySession>, ManagerError> {
        let mut slot = self.terminal.lock().await;
        if let Some(session) = slot.as_ref() {
            return Ok(Arc::clone(session));
        }

        let session = spawn_session(&self.config)?;
        *slot = Some(Arc::clone(&session));
        drop(slot);

        let this = Arc::clone(self);
        session.start_reading(move |dead| {
            let this = Arc::clone(&this);
            tokio::spawn(async move { this.on_eof(dead).await });
        });

        Ok(session)
    }

    async fn on_eof(&self, session: Arc<PtySession>) {
        session.notify_died().await;
        let mut slot = self.terminal.lock().await;
        if slot.as_ref().is_some_and(|s| s.id() == session.id()) {
            *slot = None;
        }
    }

    /// Client disconnects do not affect the shared session; it outlives any
    /// single viewer.
    pub fn client_disconnected(&self, _session: &Arc<PtySession>) {}

    /// Forcefully terminates the shared session, if any, and clears the
    /// slot so the next acquisition spawns a fresh one.
    pub async fn shutdown(&self) {
        let session = self.terminal.lock().await.take();
        if let Some(session) = session {
            let step_delay = Duration::from_millis(self.config.terminate_step_delay_ms);
            session.terminate(true, step_delay).await;
        }
    }
}
