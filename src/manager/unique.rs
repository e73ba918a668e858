//! One PTY session per acquisition.
//!
//! Grounded on `terminado`'s `UniqueTermManager`: every `get_terminal` call
//! spawns a new session, and `client_disconnected` sends SIGHUP rather than
//! waiting for the session to idle out, since nothing else will ever
//! reattach to it.

use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::Signal;
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;

use crate::config::ManagerConfig;
use crate::error::ManagerError;
use crate::manager::core::spawn_session;
use crate::pty::PtySession;

/// Gives each acquiring client its own process, never shared.
pub struct UniqueTerminalManager {
    config: ManagerConfig,
    sessions: AsyncMutex<Vec<Arc<PtySession>>>,
}

impl UniqueTerminalManager {
    pub fn new(config: ManagerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            sessions: AsyncMutex::new(Vec::new()),
        })
    }

    /// Always spawns a new session, subject to the configured cap on the
    /// number of simultaneously live unique sessions.
    pub async fn get_terminal(self: &Arc<Self>) -> Result<Arc<PtySession>, ManagerError> {
        {
            let sessions = self.sessions.lock().await;
            if let Some(max) = self.config.max_terminals {
                if sessions.len() >= max {
                    return Err(ManagerError::CapacityExceeded { max });
                }
            }
        }

        let session = spawn_session(&self.config)?;
        self.sessions.lock().await.push(Arc::clone(&session));

        let this = Arc::clone(self);
        session.start_reading(move |dead| {
            let this = Arc::clone(&this);
            tokio::spawn(async move { this.on_eof(dead).await });
        });

        Ok(session)
    }

    async fn on_eof(&self, session: Arc<PtySession>) {
        session.notify_died().await;
        let mut sessions = self.sessions.lock().await;
        sessions.retain(|s| s.id() != session.id());
    }

    /// Sends SIGHUP to the session a client just detached from; it has no
    /// other clients by construction, so this is effectively a kill.
    pub fn client_disconnected(&self, session: &Arc<PtySession>) {
        if let Err(e) = session.kill(Signal::SIGHUP) {
            info!(session_id = %session.id(), error = %e, "SIGHUP on disconnect failed (already dead?)");
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Forcefully terminates every live session.
    pub async fn shutdown(&self) {
        let sessions: Vec<_> = self.sessions.lock().await.clone();
        let step_delay = Duration::from_millis(self.config.terminate_step_delay_ms);
        futures::future::join_all(sessions.iter().map(|s| s.terminate(true, step_delay))).await;
        self.sessions.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ManagerConfig {
        ManagerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            shell_command: vec!["/bin/sh".to_string(), "-c".to_string(), "cat".to_string()],
            term_type: "xterm".to_string(),
            server_url: None,
            cwd: None,
            max_terminals: Some(2),
            poll_interval_ms: 10,
            terminate_step_delay_ms: 20,
        }
    }

    #[tokio::test]
    async fn each_acquisition_gets_a_distinct_session() {
        let mgr = UniqueTerminalManager::new(test_config());
        let a = mgr.get_terminal().await.unwrap();
        let b = mgr.get_terminal().await.unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(mgr.session_count().await, 2);
        mgr.shutdown().await;
    }

    #[tokio::test]
    async fn capacity_is_enforced() {
        let mgr = UniqueTerminalManager::new(test_config());
        let _a = mgr.get_terminal().await.unwrap();
        let _b = mgr.get_terminal().await.unwrap();
        let err = mgr.get_terminal().await.unwrap_err();
        assert!(err.is_capacity_exceeded());
        mgr.shutdown().await;
    }

    #[tokio::test]
    async fn disconnect_sends_hup_and_session_dies() {
        let mut cfg = test_config();
        cfg.max_terminals = None;
        let mgr = UniqueTerminalManager::new(cfg);
        let session = mgr.get_terminal().await.unwrap();
        assert!(session.is_alive());
        mgr.client_disconnected(&session);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(mgr.session_count().await, 0);
    }
}
