//! Content-Length framing for LSP messages.
//!
//! `Content-Length: <n>\r\n\r\n<n bytes of JSON>`. The decoder is
//! incremental: bytes may arrive in chunks of any size, and partial headers
//! or bodies stay buffered until the rest shows up.
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace};

use crate::error::LspError;
use crate::message::Message;

/// Largest header section accepted before the `\r\n\r\n` terminator.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Largest body accepted, to keep a broken peer from exhausting memory.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

const READ_CHUNK: usize = 8 * 1024;

/// Errors that make the incoming byte stream unusable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    /// No header terminator within [`MAX_HEADER_BYTES`].
    #[error("header exceeds {limit} bytes without a terminator")]
    HeaderTooLong {
        /// The header limit in bytes.
        limit: usize,
    },

    /// A header line is not `Name: value` or not UTF-8.
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// The header section has no Content-Length.
    #[error("missing Content-Length header")]
    MissingContentLength,

    /// Content-Length is not a decimal number.
    #[error("invalid Content-Length: {0}")]
    InvalidContentLength(String),

    /// Declared body length above [`MAX_MESSAGE_SIZE`].
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Declared size.
        size: usize,
        /// Allowed maximum.
        max: usize,
    },

    /// The body is not valid JSON.
    #[error("invalid message body: {0}")]
    InvalidBody(String),

    /// The stream ended in the middle of a frame.
    #[error("stream ended mid-frame with {buffered} bytes buffered")]
    UnexpectedEof {
        /// Bytes left in the buffer.
        buffered: usize,
    },

    /// The decoder already failed; a new one is needed for a new stream.
    #[error("decoder stopped after an earlier framing error")]
    Terminated,
}

/// Frame a message with its Content-Length header.
pub fn encode(message: &Message) -> Vec<u8> {
    encode_value(&message.to_value())
}

/// Frame an arbitrary JSON body.
pub fn encode_value(body: &Value) -> Vec<u8> {
    let body = body.to_string();
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    let mut bytes = Vec::with_capacity(header.len() + body.len());
    bytes.extend_from_slice(header.as_bytes());
    bytes.extend_from_slice(body.as_bytes());
    bytes
}

/// Incremental decoder turning a byte stream into JSON bodies.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    /// Body length of the frame whose header has been consumed.
    body_len: Option<usize>,
    failed: bool,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the stream.
    pub fn push(&mut self, bytes: &[u8]) {
        if !self.failed {
            self.buf.extend_from_slice(bytes);
        }
    }

    /// True when no partial frame is buffered.
    pub fn is_idle(&self) -> bool {
        self.buf.is_empty() && self.body_len.is_none()
    }

    /// Number of buffered bytes not yet returned as frames.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete frame, or `None` if more bytes are needed.
    pub fn next_frame(&mut self) -> Result<Option<Value>, FramingError> {
        if self.failed {
            return Err(FramingError::Terminated);
        }
        let result = self.try_next();
        if result.is_err() {
            self.failed = true;
            self.buf.clear();
            self.body_len = None;
        }
        result
    }

    fn try_next(&mut self) -> Result<Option<Value>, FramingError> {
        let len = match self.body_len {
            Some(len) => len,
            None => {
                let Some(end) = find_terminator(&self.buf) else {
                    if self.buf.len() > MAX_HEADER_BYTES {
                        return Err(FramingError::HeaderTooLong {
                            limit: MAX_HEADER_BYTES,
                        });
                    }
                    return Ok(None);
                };
                if end > MAX_HEADER_BYTES {
                    return Err(FramingError::HeaderTooLong {
                        limit: MAX_HEADER_BYTES,
                    });
                }
                let len = parse_headers(&self.buf[..end])?;
                self.buf.drain(..end + HEADER_TERMINATOR.len());
                self.body_len = Some(len);
                len
            }
        };

        if self.buf.len() < len {
            trace!(
                need = len - self.buf.len(),
                "incomplete body, waiting for more bytes"
            );
            return Ok(None);
        }

        let body: Vec<u8> = self.buf.drain(..len).collect();
        self.body_len = None;
        let value = serde_json::from_slice(&body)
            .map_err(|e| FramingError::InvalidBody(e.to_string()))?;
        trace!(bytes = len, "decoded frame");
        Ok(Some(value))
    }
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
}

/// Parse the header section and return the body length.
fn parse_headers(raw: &[u8]) -> Result<usize, FramingError> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| FramingError::MalformedHeader("header is not UTF-8".into()))?;

    let mut content_length = None;
    for line in text.split("\r\n") {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FramingError::MalformedHeader(line.to_string()))?;
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("Content-Length") {
            let len = value
                .parse::<usize>()
                .map_err(|_| FramingError::InvalidContentLength(value.to_string()))?;
            if len > MAX_MESSAGE_SIZE {
                return Err(FramingError::MessageTooLarge {
                    size: len,
                    max: MAX_MESSAGE_SIZE,
                });
            }
            content_length = Some(len);
        } else if !name.eq_ignore_ascii_case("Content-Type") {
            debug!(header = name, "ignoring unknown header");
        }
    }
    content_length.ok_or(FramingError::MissingContentLength)
}

/// Reads frames from an async byte source.
pub struct MessageReader<R> {
    reader: R,
    decoder: FrameDecoder,
    chunk: Vec<u8>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    /// Wrap a reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            decoder: FrameDecoder::new(),
            chunk: vec![0; READ_CHUNK],
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` on EOF between frames. EOF inside a frame is
    /// [`FramingError::UnexpectedEof`].
    pub async fn read_frame(&mut self) -> Result<Option<Value>, LspError> {
        loop {
            if let Some(frame) = self.decoder.next_frame()? {
                return Ok(Some(frame));
            }
            let n = self.reader.read(&mut self.chunk).await?;
            if n == 0 {
                if self.decoder.is_idle() {
                    return Ok(None);
                }
                return Err(FramingError::UnexpectedEof {
                    buffered: self.decoder.buffered(),
                }
                .into());
            }
            self.decoder.push(&self.chunk[..n]);
        }
    }
}
