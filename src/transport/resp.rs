//! Redis RESP (Redis Serialization Protocol) parsing and generation

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::str;

/// RESP data types
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// Simple String (+OK\r\n)
    SimpleString(String),
    /// Error (-ERR message\r\n)
    Error(String),
    /// Integer (:123\r\n)
    Integer(i64),
    /// Bulk String ($5\r\nhello\r\n)
    BulkString(Option<Bytes>), // None represents NULL
    /// Array (*2\r\n$5\r\nhello\r\n$5\r\nworld\r\n)
    Array(Option<Vec<RespValue>>), // None represents NULL array
}

impl RespValue {
    pub fn bulk(text: &str) -> Self {
        RespValue::BulkString(Some(Bytes::copy_from_slice(text.as_bytes())))
    }

    /// Textual content of a string-like reply
    pub fn as_text(&self) -> Option<String> {
        match self {
            RespValue::SimpleString(s) => Some(s.clone()),
            RespValue::BulkString(Some(data)) => Some(String::from_utf8_lossy(data).into_owned()),
            RespValue::Integer(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Elements of a non-null array reply
    pub fn as_array(&self) -> Option<&[RespValue]> {
        match self {
            RespValue::Array(Some(elements)) => Some(elements),
            _ => None,
        }
    }
}

/// RESP parser for reading Redis protocol messages
pub struct RespParser;

/// RESP encoder for writing Redis protocol messages
pub struct RespEncoder;

/// Parse error types
#[derive(Debug, thiserror::Error)]
pub enum RespParseError {
    #[error("Invalid RESP format: {0}")]
    InvalidFormat(String),
    #[error("Invalid UTF-8: {0}")]
    InvalidUtf8(#[from] str::Utf8Error),
    #[error("Invalid integer: {0}")]
    InvalidInteger(#[from] std::num::ParseIntError),
}

impl RespParser {
    /// Parse one RESP value from the front of `buf`.
    ///
    /// Returns `Ok(None)` and leaves `buf` untouched when the frame is not complete yet.
    pub fn parse(buf: &mut BytesMut) -> Result<Option<RespValue>, RespParseError> {
        match Self::decode(buf, 0)? {
            Some((value, consumed)) => {
                buf.advance(consumed);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Decode the value starting at `pos`; yields the value and the offset just past it
    fn decode(buf: &[u8], pos: usize) -> Result<Option<(RespValue, usize)>, RespParseError> {
        let Some((line, next)) = Self::read_line(buf, pos) else {
            return Ok(None);
        };
        if line.is_empty() {
            return Err(RespParseError::InvalidFormat("Empty RESP line".to_string()));
        }
        let body = &line[1..];

        match line[0] {
            b'+' => Ok(Some((
                RespValue::SimpleString(str::from_utf8(body)?.to_string()),
                next,
            ))),
            b'-' => Ok(Some((RespValue::Error(str::from_utf8(body)?.to_string()), next))),
            b':' => Ok(Some((RespValue::Integer(str::from_utf8(body)?.parse()?), next))),
            b'$' => {
                let size: i64 = str::from_utf8(body)?.parse()?;
                if size == -1 {
                    return Ok(Some((RespValue::BulkString(None), next)));
                }
                let size = usize::try_from(size).map_err(|_| {
                    RespParseError::InvalidFormat("Invalid bulk string size".to_string())
                })?;
                if buf.len() < next + size + 2 {
                    return Ok(None);
                }
                if &buf[next + size..next + size + 2] != b"\r\n" {
                    return Err(RespParseError::InvalidFormat(
                        "Missing \\r\\n after bulk string".to_string(),
                    ));
                }
                let content = Bytes::copy_from_slice(&buf[next..next + size]);
                Ok(Some((RespValue::BulkString(Some(content)), next + size + 2)))
            }
            b'*' => {
                let size: i64 = str::from_utf8(body)?.parse()?;
                if size == -1 {
                    return Ok(Some((RespValue::Array(None), next)));
                }
                let size = usize::try_from(size)
                    .map_err(|_| RespParseError::InvalidFormat("Invalid array size".to_string()))?;

                let mut elements = Vec::with_capacity(size.min(64));
                let mut cursor = next;
                for _ in 0..size {
                    match Self::decode(buf, cursor)? {
                        Some((element, after)) => {
                            elements.push(element);
                            cursor = after;
                        }
                        None => return Ok(None),
                    }
                }
                Ok(Some((RespValue::Array(Some(elements)), cursor)))
            }
            other => Err(RespParseError::InvalidFormat(format!(
                "Unknown RESP type: {}",
                other as char
            ))),
        }
    }

    /// Line starting at `pos` without its \r\n, plus the offset after the terminator
    fn read_line(buf: &[u8], pos: usize) -> Option<(&[u8], usize)> {
        let rest = buf.get(pos..)?;
        rest.windows(2)
            .position(|w| w == b"\r\n")
            .map(|end| (&rest[..end], pos + end + 2))
    }
}

impl RespEncoder {
    /// Encode a RESP value to bytes
    pub fn encode(value: &RespValue) -> Bytes {
        let mut buf = BytesMut::new();
        Self::encode_into(&mut buf, value);
        buf.freeze()
    }

    /// Encode a RESP value into an existing buffer
    pub fn encode_into(buf: &mut BytesMut, value: &RespValue) {
        match value {
            RespValue::SimpleString(s) => {
                buf.put_u8(b'+');
                buf.extend_from_slice(s.as_bytes());
                buf.put_slice(b"\r\n");
            }
            RespValue::Error(s) => {
                buf.put_u8(b'-');
                buf.extend_from_slice(s.as_bytes());
                buf.put_slice(b"\r\n");
            }
            RespValue::Integer(n) => {
                buf.put_u8(b':');
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.put_slice(b"\r\n");
            }
            RespValue::BulkString(Some(data)) => {
                buf.put_u8(b'$');
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.put_slice(b"\r\n");
                buf.extend_from_slice(data);
                buf.put_slice(b"\r\n");
            }
            RespValue::BulkString(None) => {
                buf.extend_from_slice(b"$-1\r\n");
            }
            RespValue::Array(Some(elements)) => {
                buf.put_u8(b'*');
                buf.extend_from_slice(elements.len().to_string().as_bytes());
                buf.put_slice(b"\r\n");
                for element in elements {
                    Self::encode_into(buf, element);
                }
            }
            RespValue::Array(None) => {
                buf.extend_from_slice(b"*-1\r\n");
            }
        }
    }

    /// Build a command array from its words, e.g. `["CONFIG", "GET", "databases"]`
    pub fn command(args: &[&str]) -> RespValue {
        RespValue::Array(Some(args.iter().map(|arg| RespValue::bulk(arg)).collect()))
    }
}
