//! Error types for PTY sessions, terminal managers, and configuration loading.

use thiserror::Error;

/// Errors that can occur spawning, writing to, or reading a PTY session.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The child process could not be forked/exec'd.
    #[error("failed to spawn PTY child: {0}")]
    Spawn(String),

    /// A write to the PTY master did not complete.
    #[error("write to terminal failed: {0}")]
    Write(String),

    /// A resize ioctl failed.
    #[error("failed to resize terminal: {0}")]
    Resize(String),

    /// The session's master fd is gone; the caller tried to use a dead session.
    #[error("terminal session is no longer alive")]
    Dead,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// True for errors where retrying the same call is reasonable.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    /// True when the session has already gone away.
    pub fn is_dead(&self) -> bool {
        matches!(self, Self::Dead)
    }
}

/// Errors surfaced by a `TerminalManager` when acquiring or releasing a session.
#[derive(Error, Debug)]
pub enum ManagerError {
    /// Underlying session-level failure during acquisition.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// The manager's admission cap would be exceeded.
    #[error("terminal capacity exceeded (max {max})")]
    CapacityExceeded {
        /// The configured cap that was hit.
        max: usize,
    },

    /// A named lookup referenced a name that does not exist.
    #[error("no such terminal: {0}")]
    NoSuchTerminal(String),

    /// A named operation was attempted with no name supplied.
    #[error("a terminal name is required for this operation")]
    NameRequired,
}

impl ManagerError {
    /// True if retrying with a different name/slot could succeed.
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }

    /// True if the error means "no such terminal".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NoSuchTerminal(_))
    }
}

/// Errors surfaced while loading configuration at startup. Always fatal.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The TOML config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path that failed to read.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The TOML config file could not be parsed.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path that failed to parse.
        path: String,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },

    /// A CLI flag or config value was invalid.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors surfaced by the WebSocket handshake layer before a socket is upgraded.
#[derive(Error, Debug)]
pub enum HandshakeError {
    /// The `Origin` header was missing or did not match `Host`.
    #[error("origin mismatch")]
    OriginMismatch,
}

impl axum::response::IntoResponse for HandshakeError {
    fn into_response(self) -> axum::response::Response {
        match self {
            HandshakeError::OriginMismatch => {
                (axum::http::StatusCode::NOT_FOUND, "not found").into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_error_classification() {
        let err = SessionError::Dead;
        assert!(err.is_dead());
        assert!(!err.is_recoverable());

        let err = SessionError::Io(std::io::Error::new(std::io::ErrorKind::WouldBlock, "x"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn manager_error_classification() {
        let err = ManagerError::CapacityExceeded { max: 3 };
        assert!(err.is_capacity_exceeded());
        assert_eq!(err.to_string(), "terminal capacity exceeded (max 3)");

        let err = ManagerError::NoSuchTerminal("foo".into());
        assert!(err.is_not_found());
    }
}
