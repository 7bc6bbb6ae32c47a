//! RESP reply frame reader
//!
//! Decodes one self-delimited frame at a time: scalar replies carry their
//! payload, array replies carry only the declared child count. Blocking
//! commands report their timeout as a `*-1` marker frame.

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

use crate::RespError;

/// Default maximum bulk payload size: 512MB (prevents memory overflow attacks)
pub const DEFAULT_MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum declared array length accepted from the server.
const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// One decoded reply frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Status reply: `+OK\r\n`
    Status(Bytes),
    /// Error reply: `-ERR message\r\n`
    Error(Bytes),
    /// Integer reply, kept as its decimal text: `:123\r\n`
    Integer(Bytes),
    /// Bulk reply: `$5\r\nhello\r\n`
    Bulk(Bytes),
    /// Null bulk reply: `$-1\r\n`
    NullBulk,
    /// Array header: `*3\r\n`, followed by `len` child frames
    Array { len: usize },
    /// Timeout marker of blocking commands: `*-1\r\n`
    Timeout,
}

/// Buffered frame reader over an async byte stream.
pub struct ReplyReader<R> {
    reader: BufReader<R>,
    line: Vec<u8>,
    max_bulk: usize,
}

impl<R: AsyncRead + Unpin> ReplyReader<R> {
    /// Creates a new reader (using the default bulk size limit).
    pub fn new(inner: R) -> Self {
        Self::with_max_bulk(inner, DEFAULT_MAX_BULK_SIZE)
    }

    /// Creates a new reader with an explicit bulk size limit.
    pub fn with_max_bulk(inner: R, max_bulk: usize) -> Self {
        Self {
            reader: BufReader::new(inner),
            line: Vec::with_capacity(64),
            max_bulk,
        }
    }

    /// Reads the next frame, dispatching on the type byte of its first line.
    pub async fn read_reply(&mut self) -> Result<Reply, RespError> {
        self.line.clear();
        let n = self.reader.read_until(b'\n', &mut self.line).await?;
        if n == 0 {
            return Err(RespError::UnexpectedEof);
        }
        if self.line.len() < 3 || !self.line.ends_with(b"\r\n") {
            return Err(RespError::InvalidFormat(format!(
                "unterminated line: {:?}",
                String::from_utf8_lossy(&self.line)
            )));
        }
        let content = &self.line[1..self.line.len() - 2];
        match self.line[0] {
            b'+' => Ok(Reply::Status(Bytes::copy_from_slice(content))),
            b'-' => Ok(Reply::Error(Bytes::copy_from_slice(content))),
            b':' => Ok(Reply::Integer(Bytes::copy_from_slice(content))),
            b'$' => {
                let len = parse_length(content)?;
                if len == -1 {
                    return Ok(Reply::NullBulk);
                }
                if len < 0 {
                    return Err(RespError::InvalidFormat(format!(
                        "invalid bulk length: {}",
                        len
                    )));
                }
                self.read_bulk(len as usize).await
            }
            b'*' => {
                let len = parse_length(content)?;
                if len == -1 {
                    return Ok(Reply::Timeout);
                }
                if len < 0 {
                    return Err(RespError::InvalidFormat(format!(
                        "invalid array length: {}",
                        len
                    )));
                }
                if len as usize > MAX_ARRAY_LEN {
                    return Err(RespError::InvalidFormat(format!(
                        "array too large: {} elements",
                        len
                    )));
                }
                Ok(Reply::Array { len: len as usize })
            }
            other => Err(RespError::InvalidType(other)),
        }
    }

    async fn read_bulk(&mut self, len: usize) -> Result<Reply, RespError> {
        if len > self.max_bulk {
            return Err(RespError::FrameTooLarge(len, self.max_bulk));
        }
        // Payload plus the trailing CRLF; read_exact loops over partial reads.
        let mut buffer = vec![0u8; len + 2];
        self.reader.read_exact(&mut buffer).await?;
        if &buffer[len..] != b"\r\n" {
            return Err(RespError::InvalidFormat(
                "expected CRLF after bulk payload".to_string(),
            ));
        }
        buffer.truncate(len);
        Ok(Reply::Bulk(Bytes::from(buffer)))
    }
}

fn parse_length(content: &[u8]) -> Result<i64, RespError> {
    let text = std::str::from_utf8(content)
        .map_err(|_| RespError::InvalidFormat("non-numeric length".to_string()))?;
    text.parse::<i64>()
        .map_err(|_| RespError::InvalidFormat(format!("invalid length: {:?}", text)))
}
