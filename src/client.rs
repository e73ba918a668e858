//! Per-WebSocket client state: JSON framing, fan-out target, resize reports.
//!
//! Grounded on `terminado`'s `TermSocket` (open/on_message/on_pty_read/on_pty_died):
//! the attach/replay/setup sequence in `open`, the `stdin`/`set_size` message
//! handling in `on_message`, and the `disconnect` teardown in `on_pty_died`
//! all mirror it, adapted from Tornado's synchronous `write_message` to an
//! mpsc channel drained by a dedicated WebSocket-write task (the same
//! split-socket-plus-background-task shape used for the terminal handler
//! this module's server wiring is grounded on).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Frames the server sends to a browser client.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Setup(&'static str, Value),
    Stdout(&'static str, String),
    Disconnect(&'static str, u8),
}

impl ServerFrame {
    pub fn setup() -> Self {
        ServerFrame::Setup("setup", Value::Object(Default::default()))
    }

    pub fn stdout(text: String) -> Self {
        ServerFrame::Stdout("stdout", text)
    }

    pub fn disconnect() -> Self {
        ServerFrame::Disconnect("disconnect", 1)
    }

    /// Renders this frame as the JSON text sent over the wire.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "[]".to_string())
    }
}

/// A message received from a browser client, already shape-validated.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawClientFrame {
    Stdin(String, String),
    SetSize(String, u16, u16),
    Other(Value),
}

/// A parsed, validated client-to-server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Stdin(String),
    SetSize { rows: u16, cols: u16 },
    Unknown,
}

/// Parses one WebSocket text frame into a `ClientFrame`.
///
/// Unknown commands and malformed frames are not treated as fatal: the
/// caller should silently ignore them rather than disconnect the client.
pub fn parse_client_frame(text: &str) -> Option<ClientFrame> {
    let raw: RawClientFrame = serde_json::from_str(text).ok()?;
    match raw {
        RawClientFrame::Stdin(cmd, text) if cmd == "stdin" => Some(ClientFrame::Stdin(text)),
        RawClientFrame::SetSize(cmd, rows, cols) if cmd == "set_size" => {
            Some(ClientFrame::SetSize { rows, cols })
        }
        _ => Some(ClientFrame::Unknown),
    }
}

/// A lightweight, cloneable reference to an attached client, held by the
/// `PtySession` it is attached to. Cloning shares the same outgoing channel
/// and reported size; it does not duplicate the client.
#[derive(Clone)]
pub struct ClientHandle {
    id: Uuid,
    sender: mpsc::UnboundedSender<ServerFrame>,
    size: std::sync::Arc<StdMutex<Option<(u16, u16)>>>,
}

impl ClientHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Delivers a frame to this client's WebSocket write task. Errors are
    /// swallowed: a closed channel just means the client already
    /// disconnected and will be reaped on the next `on_close`.
    pub fn send(&self, frame: ServerFrame) {
        let _ = self.sender.send(frame);
    }

    pub fn reported_size(&self) -> Option<(u16, u16)> {
        *self.size.lock().expect("client size mutex poisoned")
    }

    pub fn set_reported_size(&self, rows: u16, cols: u16) {
        *self.size.lock().expect("client size mutex poisoned") = Some((rows, cols));
    }
}

impl PartialEq for ClientHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// Owns the receiving half of a client's outgoing channel and the handle
/// registered with a `PtySession`. Constructed once per WebSocket.
pub struct ClientSession {
    handle: ClientHandle,
    receiver: mpsc::UnboundedReceiver<ServerFrame>,
}

static NEXT_CLIENT_SEQ: AtomicU64 = AtomicU64::new(0);

impl ClientSession {
    /// Creates a fresh, unattached client session. `open()` against a
    /// `TerminalManager` is performed by the caller (the WebSocket route
    /// handler), which then attaches `handle()` to the acquired session.
    pub fn new() -> Self {
        let _ = NEXT_CLIENT_SEQ.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            handle: ClientHandle {
                id: Uuid::new_v4(),
                sender,
                size: std::sync::Arc::new(StdMutex::new(None)),
            },
            receiver,
        }
    }

    pub fn handle(&self) -> ClientHandle {
        self.handle.clone()
    }

    /// Awaits the next frame destined for this client's WebSocket.
    pub async fn recv(&mut self) -> Option<ServerFrame> {
        self.receiver.recv().await
    }
}

impl Default for ClientSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stdin_frame() {
        let frame = parse_client_frame(r#"["stdin", "ls\n"]"#).unwrap();
        assert_eq!(frame, ClientFrame::Stdin("ls\n".to_string()));
    }

    #[test]
    fn parses_set_size_frame() {
        let frame = parse_client_frame(r#"["set_size", 24, 80]"#).unwrap();
        assert_eq!(frame, ClientFrame::SetSize { rows: 24, cols: 80 });
    }

    #[test]
    fn unknown_command_is_lenient() {
        let frame = parse_client_frame(r#"["kill_term"]"#).unwrap();
        assert_eq!(frame, ClientFrame::Unknown);
    }

    #[test]
    fn malformed_json_returns_none() {
        assert!(parse_client_frame("not json").is_none());
    }

    #[test]
    fn setup_frame_serializes_expected_shape() {
        let json = ServerFrame::setup().to_json();
        assert_eq!(json, r#"["setup",{}]"#);
    }

    #[test]
    fn disconnect_frame_serializes_expected_shape() {
        let json = ServerFrame::disconnect().to_json();
        assert_eq!(json, r#"["disconnect",1]"#);
    }

    #[tokio::test]
    async fn client_handle_delivers_to_session_receiver() {
        let mut session = ClientSession::new();
        let handle = session.handle();
        handle.send(ServerFrame::stdout("hi".into()));
        let received = session.recv().await.unwrap();
        assert_eq!(received.to_json(), r#"["stdout","hi"]"#);
    }

    #[test]
    fn reported_size_round_trips() {
        let session = ClientSession::new();
        let handle = session.handle();
        assert_eq!(handle.reported_size(), None);
        handle.set_reported_size(24, 80);
        assert_eq!(handle.reported_size(), Some((24, 80)));
    }
}
