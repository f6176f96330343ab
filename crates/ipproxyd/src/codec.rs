//! Newline-delimited JSON framing

use bytes::{Buf, BytesMut};
use serde_json::json;
use thiserror::Error;

/// Maximum line length (1MB) - prevents memory exhaustion from unterminated input
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("line too long ({0} bytes buffered)")]
    TooLong(usize),

    #[error("line is not valid UTF-8")]
    InvalidUtf8,
}

/// Splits a byte stream into lines
///
/// After an oversized line is reported, the rest of it is dropped up to the
/// next newline so its tail is not mistaken for a new line.
#[derive(Debug, Default)]
pub struct LineDecoder {
    discarding: bool,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next complete line from `buf`
    ///
    /// Returns `Ok(None)` until a newline arrives. The newline and an optional
    /// preceding `\r` are stripped.
    pub fn next_line(&mut self, buf: &mut BytesMut) -> Result<Option<String>, CodecError> {
        loop {
            let newline = buf.iter().position(|&b| b == b'\n');

            if self.discarding {
                match newline {
                    Some(pos) => {
                        buf.advance(pos + 1);
                        self.discarding = false;
                        continue;
                    }
                    None => {
                        buf.clear();
                        return Ok(None);
                    }
                }
            }

            return match newline {
                Some(pos) if pos > MAX_LINE_LENGTH => {
                    buf.advance(pos + 1);
                    Err(CodecError::TooLong(pos))
                }
                Some(pos) => {
                    let line = buf.split_to(pos);
                    buf.advance(1);
                    decode(&line).map(Some)
                }
                None if buf.len() > MAX_LINE_LENGTH => {
                    let buffered = buf.len();
                    buf.clear();
                    self.discarding = true;
                    Err(CodecError::TooLong(buffered))
                }
                None => Ok(None),
            };
        }
    }

    /// Take whatever is left in `buf` once the peer has stopped sending
    pub fn finish(&mut self, buf: &mut BytesMut) -> Result<Option<String>, CodecError> {
        if std::mem::take(&mut self.discarding) || buf.is_empty() {
            buf.clear();
            return Ok(None);
        }
        let line = buf.split();
        decode(&line).map(Some)
    }
}

fn decode(line: &[u8]) -> Result<String, CodecError> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8(line.to_vec()).map_err(|_| CodecError::InvalidUtf8)
}

/// Error reply line
pub fn error_line(message: &str) -> Vec<u8> {
    let mut line = json!({ "error": message }).to_string().into_bytes();
    line.push(b'\n');
    line
}
