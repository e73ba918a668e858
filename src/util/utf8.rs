//! Stateful UTF-8 decoding across PTY read-chunk boundaries.
//!
//! A raw `read()` on a PTY master can split a multi-byte UTF-8 character
//! across two calls. `Utf8Incrementor` buffers a trailing incomplete
//! sequence and prepends it to the next chunk, so callers always get
//! complete, valid `String`s to hand to clients. Genuinely invalid byte
//! sequences are replaced with `U+FFFD` rather than dropped silently.
const REPLACEMENT: char = '\u{FFFD}';

/// Incremental UTF-8 decoder holding at most 3 pending bytes between calls.
#[derive(Debug, Default)]
pub struct Utf8Incrementor {
    pending: Vec<u8>,
}

impl Utf8Incrementor {
    /// Creates a decoder with no buffered state.
    pub fn new() -> Self {
        Self { pending: Vec::new() }
    }

    /// Decodes `bytes`, combining them with any sequence left over from the
    /// previous call. Returns a `String` containing only complete
    /// characters; an incomplete trailing sequence (up to 3 bytes) is kept
    /// for the next call.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        if self.pending.is_empty() {
            self.decode_fresh(bytes)
        } else {
            let mut combined = std::mem::take(&mut self.pending);
            combined.extend_from_slice(bytes);
            self.decode_fresh(&combined)
        }
    }

    fn decode_fresh(&mut self, bytes: &[u8]) -> String {
        let mut out = String::new();
        let mut rest = bytes;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    out.push_str(unsafe { std::str::from_utf8_unchecked(&rest[..valid_up_to]) });
                    match e.error_len() {
                        Some(bad_len) => {
                            // Genuinely invalid bytes: emit replacement and resync past them.
                            out.push(REPLACEMENT);
                            rest = &rest[valid_up_to + bad_len..];
                        }
                        None => {
                            // Trailing bytes form the start of a valid sequence
                            // that was simply cut short by the read boundary.
                            self.pending = rest[valid_up_to..].to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flushes any buffered incomplete sequence as replacement characters.
    /// Used when a session is torn down so a dangling partial char is not lost silently.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            self.pending.clear();
            REPLACEMENT.to_string()
        }
    }
}
