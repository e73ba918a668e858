//! WebSocket handshake and frame-bound validation.
//!
//! Origin checking is grounded on `terminado`'s `TermSocket.origin_check`
//! (Origin header's netloc must equal Host, case-insensitively; an absent
//! Origin is rejected outright). The size/dimension validators follow the
//! shape of this codebase's own `security` module (`validate_message_size`,
//! `validate_terminal_dimensions`), trimmed to just the two checks this
//! system's wire protocol needs: the connection-tracker / localhost-only
//! pieces of that module have no counterpart here, since nothing in this
//! system's scope restricts callers to localhost.

use axum::http::HeaderMap;
use tracing::warn;

use crate::error::HandshakeError;

const MAX_MESSAGE_BYTES: usize = 64 * 1024;
const MIN_DIMENSION: u16 = 1;
const MAX_DIMENSION: u16 = 1000;

/// Extracts the host portion of a `Origin` or `Host` header value, dropping
/// scheme and port, and lower-casing it for comparison.
fn netloc(value: &str) -> String {
    let without_scheme = value.split("://").last().unwrap_or(value);
    let host_only = without_scheme.split('/').next().unwrap_or(without_scheme);
    host_only.to_lowercase()
}

/// Rejects the handshake unless `Origin` is present and its host matches
/// the request's `Host` header.
pub fn check_origin(headers: &HeaderMap) -> Result<(), HandshakeError> {
    let origin = headers
        .get("origin")
        .and_then(|v| v.to_str().ok())
        .ok_or(HandshakeError::OriginMismatch)?;
    let host = headers
        .get("host")
        .and_then(|v| v.to_str().ok())
        .ok_or(HandshakeError::OriginMismatch)?;

    if netloc(origin) == netloc(host) {
        Ok(())
    } else {
        warn!(origin, host, "websocket origin mismatch");
        Err(HandshakeError::OriginMismatch)
    }
}

/// Bounds an incoming WebSocket text frame to a sane size before it is
/// handed to the JSON parser.
pub fn validate_message_size(data: &[u8]) -> Result<(), String> {
    if data.len() > MAX_MESSAGE_BYTES {
        Err(format!(
            "message size {} exceeds maximum allowed size {}",
            data.len(),
            MAX_MESSAGE_BYTES
        ))
    } else {
        Ok(())
    }
}

/// Bounds a client-reported `set_size` to a sane terminal geometry.
pub fn validate_terminal_dimensions(rows: u16, cols: u16) -> Result<(), String> {
    if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&rows) {
        return Err(format!(
            "invalid rows {rows}: must be between {MIN_DIMENSION} and {MAX_DIMENSION}"
        ));
    }
    if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&cols) {
        return Err(format!(
            "invalid cols {cols}: must be between {MIN_DIMENSION} and {MAX_DIMENSION}"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(origin: Option<&str>, host: Option<&str>) -> HeaderMap {
        let mut h = HeaderMap::new();
        if let Some(o) = origin {
            h.insert("origin", HeaderValue::from_str(o).unwrap());
        }
        if let Some(hh) = host {
            h.insert("host", HeaderValue::from_str(hh).unwrap());
        }
        h
    }

    #[test]
    fn matching_origin_and_host_pass() {
        let h = headers(Some("http://example.com:8700"), Some("example.com:8700"));
        assert!(check_origin(&h).is_ok());
    }

    #[test]
    fn mismatched_origin_is_rejected() {
        let h = headers(Some("http://evil.com"), Some("example.com:8700"));
        assert!(check_origin(&h).is_err());
    }

    #[test]
    fn missing_origin_is_rejected() {
        let h = headers(None, Some("example.com:8700"));
        assert!(check_origin(&h).is_err());
    }

    #[test]
    fn message_size_bounds() {
        assert!(validate_message_size(&vec![0u8; 100]).is_ok());
        assert!(validate_message_size(&vec![0u8; MAX_MESSAGE_BYTES + 1]).is_err());
    }

    #[test]
    fn dimension_bounds() {
        assert!(validate_terminal_dimensions(24, 80).is_ok());
        assert!(validate_terminal_dimensions(0, 80).is_err());
        assert!(validate_terminal_dimensions(24, 1001).is_err());
    }
}
