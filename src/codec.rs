//! Server-sent-events framing for chat completion chunks.

use crate::error::{Error, Result};
use crate::io_struct::Chunk;
use bytes::Bytes;
use serde_json::Value;

pub const DONE: &[u8] = b"data: [DONE]\n\n";

pub fn encode_chunk(chunk: &Chunk) -> Result<Bytes> {
    let json = serde_json::to_string(chunk)
        .map_err(|e| Error::protocol(format!("failed to encode chunk: {}", e)))?;
    Ok(Bytes::from(format!("data: {}\n\n", json)))
}

#[derive(Debug, PartialEq)]
pub enum Frame {
    Chunk(Chunk),
    Done,
}

/// Longest line accepted from an upstream body, newline excluded.
pub const MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

/// Incremental decoder for an upstream `text/event-stream` body. Bytes may be
/// split anywhere, including inside a UTF-8 sequence.
#[derive(Debug)]
pub struct SseDecoder {
    buf: Vec<u8>,
    // prefix of `buf` already known to hold no newline
    scanned: usize,
    max_line: usize,
    done: bool,
    failed: Option<Error>,
}

impl Default for SseDecoder {
    fn default() -> Self {
        SseDecoder {
            buf: Vec::new(),
            scanned: 0,
            max_line: MAX_LINE_BYTES,
            done: false,
            failed: None,
        }
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(mut self, max_line: usize) -> Self {
        self.max_line = max_line;
        self
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Decodes every complete line in `bytes`. When a line fails after others
    /// in the same call decoded fine, those frames are returned first and the
    /// error is reported by the next `feed` or `finish`.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Frame>> {
        if let Some(e) = self.failed.take() {
            return Err(e);
        }
        let mut frames = Vec::new();
        if self.done {
            return Ok(frames);
        }
        self.buf.extend_from_slice(bytes);

        let mut start = 0;
        let mut failure = None;
        while let Some(offset) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset + 1;
            self.scanned = end;
            if end - start - 1 > self.max_line {
                failure = Some(self.too_long());
                break;
            }
            let decoded = self.decode_line(&self.buf[start..end]);
            start = end;
            match decoded {
                Ok(Some(Frame::Done)) => {
                    frames.push(Frame::Done);
                    self.done = true;
                    break;
                }
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => {}
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if failure.is_none() && !self.done {
            self.buf.drain(..start);
            self.scanned = self.buf.len();
            if self.buf.len() > self.max_line {
                failure = Some(self.too_long());
            }
        }
        if self.done || failure.is_some() {
            self.done = true;
            self.buf.clear();
            self.scanned = 0;
        }
        match failure {
            Some(e) if frames.is_empty() => Err(e),
            Some(e) => {
                self.failed = Some(e);
                Ok(frames)
            }
            None => Ok(frames),
        }
    }

    fn too_long(&self) -> Error {
        Error::protocol(format!(
            "stream line exceeds {} bytes",
            self.max_line
        ))
    }

    /// Flushes a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Result<Option<Frame>> {
        if let Some(e) = self.failed.take() {
            return Err(e);
        }
        if self.done || self.buf.is_empty() {
            return Ok(None);
        }
        let line = std::mem::take(&mut self.buf);
        self.scanned = 0;
        let frame = self.decode_line(&line)?;
        if frame == Some(Frame::Done) {
            self.done = true;
        }
        Ok(frame)
    }

    fn decode_line(&self, line: &[u8]) -> Result<Option<Frame>> {
        let line = std::str::from_utf8(line)
            .map_err(|e| Error::protocol(format!("invalid UTF-8 in stream: {}", e)))?
            .trim_end_matches(['\r', '\n']);
        let Some(data) = line.strip_prefix("data:") else {
            // blank separators, `event:`, `id:`, `retry:` and `:` comments
            return Ok(None);
        };
        let data = data.trim();
        if data.is_empty() {
            return Ok(None);
        }
        if data == "[DONE]" {
            return Ok(Some(Frame::Done));
        }
        let value: Value = serde_json::from_str(data)
            .map_err(|e| Error::protocol(format!("malformed chunk: {}", e)))?;
        if let Some(err) = value.get("error") {
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string());
            return Err(Error::provider(message));
        }
        let chunk = serde_json::from_value(value)
            .map_err(|e| Error::protocol(format!("malformed chunk: {}", e)))?;
        Ok(Some(Frame::Chunk(chunk)))
    }
}
