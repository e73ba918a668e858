//! PTY sessions keyed by name, shared between every client of the same name.
//!
//! Grounded on `terminado`'s `NamedTermManager`: `get_terminal` creates a
//! session on first reference to a name and reuses it thereafter,
//! `_next_available_name`'s `"%d"` template becomes the plain integer
//! allocator below, and `on_eof` drops the name's entry exactly as the
//! original's does.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;

use crate::config::ManagerConfig;
use crate::error::ManagerError;
use crate::manager::core::spawn_session;
use crate::pty::PtySession;

/// Terminals are shared between every websocket connected to the same name.
pub struct NamedTerminalManager {
    config: ManagerConfig,
    by_name: AsyncMutex<HashMap<String, Arc<PtySession>>>,
}

impl NamedTerminalManager {
    pub fn new(config: ManagerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            by_name: AsyncMutex::new(HashMap::new()),
        })
    }

    /// Returns the session registered under `name`, spawning one (subject
    /// to the configured cap) if this is the first reference to it.
    pub async fn get_terminal(self: &Arc<Self>, name: &str) -> Result<Arc<PtySession>, ManagerError> {
        {
            let map = self.by_name.lock().await;
            if let Some(session) = map.get(name) {
                return Ok(Arc::clone(session));
            }
            if let Some(max) = self.config.max_terminals {
                if map.len() >= max {
                    return Err(ManagerError::CapacityExceeded { max });
                }
            }
        }

        let session = spawn_session(&self.config)?;
        session.set_name(name.to_string()).await;
        self.by_name
            .lock()
            .await
            .insert(name.to_string(), Arc::clone(&session));

        let this = Arc::clone(self);
        session.start_reading(move |dead| {
            let this = Arc::clone(&this);
            tokio::spawn(async move { this.on_eof(dead).await });
        });

        Ok(session)
    }

    /// Allocates the lowest unused positive-integer name, spawns a session
    /// under it, and returns both.
    pub async fn new_named_terminal(self: &Arc<Self>) -> Result<(String, Arc<PtySession>), ManagerError> {
        let name = self.next_available_name().await;
        let session = self.get_terminal(&name).await?;
        Ok((name, session))
    }

    async fn next_available_name(&self) -> String {
        let map = self.by_name.lock().await;
        let mut n: u64 = 1;
        loop {
            let candidate = n.to_string();
            if !map.contains_key(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    async fn on_eof(&self, session: Arc<PtySession>) {
        session.notify_died().await;
        if let Some(name) = session.name().await {
            let mut map = self.by_name.lock().await;
            if map.get(&name).is_some_and(|s| s.id() == session.id()) {
                map.remove(&name);
            }
        }
    }

    /// Named sessions outlive their clients; disconnecting does not kill.
    pub fn client_disconnected(&self, _session: &Arc<PtySession>) {}

    pub async fn terminal_count(&self) -> usize {
        self.by_name.lock().await.len()
    }

    /// Forcefully terminates every named session and clears the registry.
    pub async fn shutdown(&self) {
        let sessions: Vec<_> = self.by_name.lock().await.values().cloned().collect();
        let step_delay = Duration::from_millis(self.config.terminate_step_delay_ms);
        futures::future::join_all(sessions.iter().map(|s| s.terminate(true, step_delay))).await;
        self.by_name.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(max: Option<usize>) -> ManagerConfig {
        ManagerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            shell_command: vec!["/bin/sh".to_string(), "-c".to_string(), "cat".to_string()],
            term_type: "xterm".to_string(),
            server_url: None,
            cwd: None,
            max_terminals: max,
            poll_interval_ms: 10,
            terminate_step_delay_ms: 20,
        }
    }

    #[tokio::test]
    async fn same_name_shares_a_session() {
        let mgr = NamedTerminalManager::new(test_config(None));
        let a = mgr.get_terminal("alice").await.unwrap();
        let b = mgr.get_terminal("alice").await.unwrap();
        assert_eq!(a.id(), b.id());
        let c = mgr.get_terminal("bob").await.unwrap();
        assert_ne!(a.id(), c.id());
        mgr.shutdown().await;
    }

    #[tokio::test]
    async fn capacity_cap_is_enforced_per_distinct_name() {
        let mgr = NamedTerminalManager::new(test_config(Some(1)));
        let _a = mgr.get_terminal("alice").await.unwrap();
        // Re-acquiring the same name never counts against the cap.
        let _a2 = mgr.get_terminal("alice").await.unwrap();
        let err = mgr.get_terminal("bob").await.unwrap_err();
        assert!(err.is_capacity_exceeded());
        mgr.shutdown().await;
    }

    #[tokio::test]
    async fn next_available_name_fills_gaps() {
        let mgr = NamedTerminalManager::new(test_config(None));
        let (n1, _) = mgr.new_named_terminal().await.unwrap();
        let (n2, _) = mgr.new_named_terminal().await.unwrap();
        assert_eq!(n1, "1");
        assert_eq!(n2, "2");
        mgr.by_name.lock().await.remove("1");
        let (n3, _) = mgr.new_named_terminal().await.unwrap();
        assert_eq!(n3, "1");
        mgr.shutdown().await;
    }
}
