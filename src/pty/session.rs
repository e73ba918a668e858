//! A single PTY-backed child process and the clients attached to it.
//!
//! Grounded on `cco`'s `TerminalSession` (shell detection, chunked writes
//! with `WouldBlock` retry, non-blocking reads, idempotent close via
//! `Option::take`) and on `pyxshell.py`'s `PtyProcess`/`pty_write` for the
//! retry/back-off constants and the "EOF is routine, not an error" framing.
//! Departs from the teacher's raw-fd-`dup()` workaround (see DESIGN.md):
//! the `Box<dyn MasterPty + Send>` is kept alive for the life of the
//! session so `resize()` is real rather than a documented no-op.

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::{sleep, Duration};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::client::{ClientHandle, ServerFrame};
use crate::error::SessionError;
use crate::pty::terminator::{TerminateOutcome, SEQUENCE};
use crate::util::Utf8Incrementor;

const REPLAY_CAP: usize = 10;
const WRITE_CHUNK: usize = 4096;
const WRITE_MAX_RETRIES: u32 = 50;
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(10);
const READ_CHUNK: usize = 65536;

/// An event produced by a session's dedicated blocking reader thread.
pub enum ReadEvent {
    Data(Vec<u8>),
    Eof,
}

/// Attached clients and the replay buffer, behind one lock so a concurrent
/// attach and PTY read can never interleave: an attach always sees either
/// the buffer state from strictly before or strictly after a given read,
/// never a torn mix of the two.
#[derive(Default)]
struct SessionState {
    clients: Vec<ClientHandle>,
    read_buffer: VecDeque<String>,
}

/// One PTY-backed child process plus its attached clients and replay buffer.
pub struct PtySession {
    id: Uuid,
    name: AsyncMutex<Option<String>>,
    master: AsyncMutex<Box<dyn MasterPty + Send>>,
    writer: AsyncMutex<Box<dyn Write + Send>>,
    child: AsyncMutex<Option<Box<dyn Child + Send + Sync>>>,
    state: AsyncMutex<SessionState>,
    current_size: AsyncMutex<(u16, u16)>,
    alive: AtomicBool,
    pid: u32,
    spawned_at: DateTime<Utc>,
}

impl std::fmt::Debug for PtySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtySession")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("alive", &self.alive.load(Ordering::Relaxed))
            .field("spawned_at", &self.spawned_at)
            .finish_non_exhaustive()
    }
}

impl PtySession {
    /// Forks `command` behind a freshly allocated PTY with the given
    /// environment and working directory, returning a ready-to-read
    /// session. Does not start the reader task; call `start_reading`.
    pub fn spawn(
        command: &[String],
        env: &HashMap<String, String>,
        cwd: Option<&Path>,
    ) -> Result<Arc<Self>, SessionError> {
        if command.is_empty() {
            return Err(SessionError::Spawn("empty shell command".into()));
        }
        let id = Uuid::new_v4();
        trace!(session_id = %id, "opening pty pair");

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: 24,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::Spawn(format!("failed to open pty: {e}")))?;

        let mut cmd = CommandBuilder::new(&command[0]);
        cmd.args(&command[1..]);
        for (k, v) in env {
            cmd.env(k, v);
        }
        // A configured cwd that doesn't exist falls back to home exactly
        // like an absent cwd does; `CommandBuilder` has no post-fork hook to
        // retry the chdir once `spawn_command` has already committed to it.
        let resolved_cwd = cwd
            .filter(|dir| dir.is_dir())
            .map(Path::to_path_buf)
            .or_else(dirs::home_dir);
        if let Some(dir) = resolved_cwd {
            cmd.cwd(dir);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::Spawn(format!("failed to spawn shell: {e}")))?;
        drop(pair.slave);

        let pid = child.process_id().unwrap_or(0);
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::Spawn(format!("failed to take pty writer: {e}")))?;

        info!(session_id = %id, pid, "terminal session spawned");

        Ok(Arc::new(Self {
            id,
            name: AsyncMutex::new(None),
            master: AsyncMutex::new(pair.master),
            writer: AsyncMutex::new(writer),
            child: AsyncMutex::new(Some(child)),
            state: AsyncMutex::new(SessionState::default()),
            current_size: AsyncMutex::new((24, 80)),
            alive: AtomicBool::new(true),
            pid,
            spawned_at: Utc::now(),
        }))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn spawned_at(&self) -> DateTime<Utc> {
        self.spawned_at
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub async fn name(&self) -> Option<String> {
        self.name.lock().await.clone()
    }

    pub async fn set_name(&self, name: String) {
        *self.name.lock().await = Some(name);
    }

    /// Starts the dedicated blocking reader thread plus the async consumer
    /// task that decodes, buffers, and fans out its output. `on_eof` is
    /// invoked exactly once, after the child has been reaped, so the
    /// manager can remove the session from its policy-specific state.
    pub fn start_reading<F>(self: &Arc<Self>, on_eof: F)
    where
        F: FnOnce(Arc<Self>) + Send + 'static,
    {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let reader = { this.master.lock().await.try_clone_reader() };
            match reader {
                Ok(r) => this.spawn_reader_and_consumer(r, on_eof),
                Err(e) => {
                    warn!(session_id = %this.id, error = %e, "failed to clone pty reader");
                    on_eof(this);
                }
            }
        });
    }

    fn spawn_reader_and_consumer<F>(
        self: &Arc<Self>,
        mut reader: Box<dyn std::io::Read + Send>,
        on_eof: F,
    ) where
        F: FnOnce(Arc<Self>) + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<ReadEvent>();
        let session_id = self.id;

        std::thread::Builder::new()
            .name(format!("pty-reader-{session_id}"))
            .spawn(move || {
                let mut buf = vec![0u8; READ_CHUNK];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => {
                            let _ = tx.send(ReadEvent::Eof);
                            break;
                        }
                        Ok(n) => {
                            if tx.send(ReadEvent::Data(buf[..n].to_vec())).is_err() {
                                break;
                            }
                        }
                        Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(_) => {
                            let _ = tx.send(ReadEvent::Eof);
                            break;
                        }
                    }
                }
            })
            .expect("failed to spawn pty reader thread");

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut decoder = Utf8Incrementor::new();
            while let Some(event) = rx.recv().await {
                match event {
                    ReadEvent::Data(bytes) => {
                        let text = decoder.decode(&bytes);
                        if !text.is_empty() {
                            this.buffer_and_fanout(text).await;
                        }
                    }
                    ReadEvent::Eof => {
                        let tail = decoder.finish();
                        if !tail.is_empty() {
                            this.buffer_and_fanout(tail).await;
                        }
                        this.reap().await;
                        on_eof(Arc::clone(&this));
                        break;
                    }
                }
            }
        });
    }

    async fn reap(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let mut child = self.child.lock().await;
        if let Some(c) = child.as_mut() {
            match c.try_wait() {
                Ok(Some(status)) => debug!(session_id = %self.id, ?status, "child reaped at eof"),
                Ok(None) => {
                    // EOF on the master but the child hasn't been reported
                    // dead yet; a blocking wait here is bounded because EOF
                    // only happens after the slave side is fully closed.
                    let _ = c.wait();
                }
                Err(e) => warn!(session_id = %self.id, error = %e, "try_wait failed at eof"),
            }
        }
        *child = None;
    }

    /// Buffers a decoded chunk and fans it out to every attached client
    /// under a single lock acquisition, so a concurrent `attach` can never
    /// observe the buffer update without the matching fan-out (or vice
    /// versa) and a newly attached client can never see a chunk twice or
    /// miss it.
    async fn buffer_and_fanout(&self, chunk: String) {
        let mut state = self.state.lock().await;
        if state.read_buffer.len() >= REPLAY_CAP {
            state.read_buffer.pop_front();
        }
        state.read_buffer.push_back(chunk.clone());
        for client in state.clients.iter() {
            client.send(ServerFrame::stdout(chunk.clone()));
        }
    }

    /// Attaches a client, replaying buffered output as a single concatenated
    /// `stdout` frame before the caller sends `setup`. Snapshotting the
    /// replay and registering the client happen under one lock acquisition
    /// so a PTY read can't land in between and be both replayed and fanned
    /// out to the same client.
    pub async fn attach(&self, handle: ClientHandle) {
        let mut state = self.state.lock().await;
        let replay: String = state.read_buffer.iter().cloned().collect();
        if !replay.is_empty() {
            handle.send(ServerFrame::stdout(replay));
        }
        state.clients.push(handle);
    }

    /// Detaches a client by id. Returns true if a client was removed.
    pub async fn detach(&self, client_id: Uuid) -> bool {
        let mut state = self.state.lock().await;
        let before = state.clients.len();
        state.clients.retain(|c| c.id() != client_id);
        state.clients.len() != before
    }

    pub async fn client_count(&self) -> usize {
        self.state.lock().await.clients.len()
    }

    /// Drains every attached client and sends each a `disconnect` frame so
    /// its WebSocket loop can close the transport, even if that client has
    /// been otherwise idle. Called exactly once by a manager's `on_eof`
    /// hook, after the child has already been reaped.
    pub async fn notify_died(&self) {
        let clients: Vec<ClientHandle> = self.state.lock().await.clients.drain(..).collect();
        for client in &clients {
            client.send(ServerFrame::disconnect());
        }
    }

    /// Writes `input` to the PTY master in 4096-byte chunks, retrying on
    /// `WouldBlock` up to 50 times with a 10ms back-off.
    pub async fn write(&self, input: &[u8]) -> Result<(), SessionError> {
        if !self.is_alive() {
            return Err(SessionError::Dead);
        }
        let mut writer = self.writer.lock().await;
        let mut offset = 0;
        while offset < input.len() {
            let end = (offset + WRITE_CHUNK).min(input.len());
            let chunk = &input[offset..end];
            let mut retries = 0;
            loop {
                match writer.write(chunk) {
                    Ok(0) => return Err(SessionError::Write("write returned 0 bytes".into())),
                    Ok(n) => {
                        offset += n;
                        break;
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        retries += 1;
                        if retries > WRITE_MAX_RETRIES {
                            return Err(SessionError::Write(
                                "pty write blocked past retry budget".into(),
                            ));
                        }
                        sleep(WRITE_RETRY_DELAY).await;
                    }
                    Err(e) => return Err(SessionError::Write(e.to_string())),
                }
            }
        }
        let _ = writer.flush();
        Ok(())
    }

    /// Recomputes the PTY window size as the component-wise minimum of
    /// every attached client's last-reported `(rows, cols)`, ignoring
    /// clients that have not reported. A no-op when no client has
    /// reported, or when the computed size matches the current one.
    pub async fn resize_to_smallest(&self) -> Result<(), SessionError> {
        let min = {
            let state = self.state.lock().await;
            let mut min: Option<(u16, u16)> = None;
            for client in state.clients.iter() {
                if let Some((rows, cols)) = client.reported_size() {
                    min = Some(match min {
                        Some((r, c)) => (r.min(rows), c.min(cols)),
                        None => (rows, cols),
                    });
                }
            }
            min
        };

        let Some((rows, cols)) = min else {
            return Ok(());
        };
        let mut current = self.current_size.lock().await;
        if *current == (rows, cols) {
            return Ok(());
        }
        self.master
            .lock()
            .await
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::Resize(e.to_string()))?;
        *current = (rows, cols);
        Ok(())
    }

    /// Sends `signal` to the child process directly, without escalation.
    pub fn kill(&self, sig: Signal) -> Result<(), SessionError> {
        if self.pid == 0 {
            return Err(SessionError::Dead);
        }
        signal::kill(Pid::from_raw(self.pid as i32), sig)
            .map_err(|e| SessionError::Write(format!("kill failed: {e}")))
    }

    /// Drives the HUP -> CONT -> INT -> TERM -> (KILL if `force`) escalation,
    /// waiting `step_delay` after each signal before checking whether the
    /// child has exited. Returns once the child is confirmed dead or the
    /// sequence (including the forced KILL, if requested) is exhausted.
    pub async fn terminate(&self, force: bool, step_delay: Duration) -> TerminateOutcome {
        if !self.is_alive() {
            return TerminateOutcome::Dead;
        }
        for step in SEQUENCE {
            if self.kill(step.signal()).is_err() {
                // Already gone; treat as success.
                self.alive.store(false, Ordering::SeqCst);
                return TerminateOutcome::Dead;
            }
            sleep(step_delay).await;
            if self.poll_dead().await {
                return TerminateOutcome::Dead;
            }
        }
        if force {
            let _ = self.kill(Signal::SIGKILL);
            sleep(step_delay).await;
            if self.poll_dead().await {
                return TerminateOutcome::Dead;
            }
        }
        TerminateOutcome::StillAlive
    }

    async fn poll_dead(&self) -> bool {
        let mut child = self.child.lock().await;
        let dead = match child.as_mut() {
            Some(c) => matches!(c.try_wait(), Ok(Some(_))),
            None => true,
        };
        if dead {
            self.alive.store(false, Ordering::SeqCst);
        }
        dead
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn spawn_and_write_and_read() {
        let session = PtySession::spawn(&sh("cat"), &HashMap::new(), None).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        session.start_reading(move |_s| {
            let _ = tx.send(());
        });
        session.write(b"hello\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let replay: String = session.state.lock().await.read_buffer.iter().cloned().collect();
        assert!(replay.contains("hello"));
        session.terminate(true, Duration::from_millis(20)).await;
        let _ = rx.recv().await;
    }

    #[tokio::test]
    async fn notify_died_drains_clients_and_sends_disconnect() {
        let session = PtySession::spawn(&sh("cat"), &HashMap::new(), None).unwrap();
        let mut client = crate::client::ClientSession::new();
        let handle = client.handle();
        session.attach(handle).await;
        assert_eq!(session.client_count().await, 1);

        session.notify_died().await;
        assert_eq!(session.client_count().await, 0);

        let frame = client.recv().await.unwrap();
        assert_eq!(frame.to_json(), r#"["disconnect",1]"#);
        session.terminate(true, Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let err = PtySession::spawn(&[], &HashMap::new(), None).unwrap_err();
        assert!(matches!(err, SessionError::Spawn(_)));
    }

    #[tokio::test]
    async fn resize_is_noop_with_no_reporting_clients() {
        let session = PtySession::spawn(&sh("cat"), &HashMap::new(), None).unwrap();
        session.resize_to_smallest().await.unwrap();
        session.terminate(true, Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn terminate_reaps_a_live_child() {
        let session = PtySession::spawn(&sh("sleep 30"), &HashMap::new(), None).unwrap();
        let outcome = session.terminate(true, Duration::from_millis(50)).await;
        assert_eq!(outcome, TerminateOutcome::Dead);
        assert!(!session.is_alive());
    }
}
