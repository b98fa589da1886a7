//! Message framing over any byte stream.
//!
//! Encoding is `Message::encode`; this module adds the read side and the
//! blocking write helper. Reads are generic over `BufRead` so the same code
//! drives sockets, in-memory buffers in tests, and the client's receive loop.

use super::file::receive_file;
use super::message::Message;
use super::{attr, BLOCK_SIZE};
use crate::error::{PublishError, Result};
use std::io::{self, BufRead, Read, Write};
use std::path::PathBuf;

/// Largest control body accepted (16 MB). File payloads are streamed to
/// disk and are not subject to this limit.
pub const MAX_BODY_SIZE: u64 = 16 * 1024 * 1024;

/// Outcome of reading one message.
#[derive(Debug)]
pub enum Incoming {
    /// A control message, body already read
    Message(Message),
    /// A file-bearing message whose payload was written to `stored`
    File { message: Message, stored: PathBuf },
    /// The peer closed the connection (zero header lines)
    Closed,
}

impl Incoming {
    pub fn is_closed(&self) -> bool {
        matches!(self, Incoming::Closed)
    }
}

/// Reads messages, routing file payloads under `file_root`.
#[derive(Debug, Clone)]
pub struct Decoder {
    file_root: PathBuf,
    block_size: usize,
}

impl Decoder {
    pub fn new(file_root: impl Into<PathBuf>) -> Self {
        Self {
            file_root: file_root.into(),
            block_size: BLOCK_SIZE,
        }
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    pub fn file_root(&self) -> &std::path::Path {
        &self.file_root
    }

    /// Read the next message. File payloads land at `file_root/<path>`,
    /// where `<path>` is the `path` header (or `file` when absent).
    pub fn decode<R: BufRead>(&self, reader: &mut R) -> Result<Incoming> {
        let mut message = match read_headers(reader)? {
            Some(m) => m,
            None => return Ok(Incoming::Closed),
        };

        let length = message.content_length()?;

        if message.is_file() {
            let rel = message
                .find_value(attr::FILE_PATH)
                .filter(|p| !p.is_empty())
                .or_else(|| message.find_value(attr::FILE))
                .unwrap_or_default()
                .to_string();
            let stored = receive_file(
                reader,
                &self.file_root,
                &rel,
                length.unwrap_or(0),
                self.block_size,
            )?;
            return Ok(Incoming::File { message, stored });
        }

        if let Some(len) = length {
            let body = read_body(reader, len, self.block_size)?;
            message.set_decoded_body(body);
        }
        Ok(Incoming::Message(message))
    }
}

/// Read one message with a throwaway [`Decoder`].
pub fn read_message<R: BufRead>(reader: &mut R, file_root: &std::path::Path) -> Result<Incoming> {
    Decoder::new(file_root).decode(reader)
}

/// Read header lines up to the first line of length <= 1.
///
/// Returns `None` when no attribute was read: the peer hung up. A reset on
/// the very first read is treated the same way.
pub fn read_headers<R: BufRead>(reader: &mut R) -> Result<Option<Message>> {
    let mut message = Message::new();
    let mut count = 0usize;
    let mut line = Vec::with_capacity(128);

    loop {
        line.clear();
        let n = match reader.read_until(b'\n', &mut line) {
            Ok(n) => n,
            Err(e) if count == 0 && is_hangup(&e) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if n == 0 {
            break;
        }
        if line.ends_with(b"\r\n") {
            line.truncate(line.len() - 2);
            line.push(b'\n');
        }
        if line.len() <= 1 {
            break;
        }

        let text = String::from_utf8_lossy(&line);
        let (name, value) = Message::parse_attribute(&text)?;
        message.add_attribute(name, value);
        count += 1;
    }

    if count == 0 {
        Ok(None)
    } else {
        Ok(Some(message))
    }
}

/// Read exactly `len` bytes of body in `block_size` chunks.
pub fn read_body<R: Read>(reader: &mut R, len: u64, block_size: usize) -> Result<String> {
    if len > MAX_BODY_SIZE {
        return Err(PublishError::InvalidContentLength {
            value: len.to_string(),
        });
    }

    let mut body = Vec::with_capacity(len as usize);
    let mut block = vec![0u8; block_size.max(1)];
    let mut remaining = len as usize;
    while remaining > 0 {
        let chunk = remaining.min(block.len());
        reader.read_exact(&mut block[..chunk])?;
        body.extend_from_slice(&block[..chunk]);
        remaining -= chunk;
    }

    String::from_utf8(body).map_err(|_| PublishError::BodyNotUtf8)
}

/// Write the whole encoded message and flush.
pub fn write_message<W: Write>(writer: &mut W, message: &Message) -> Result<()> {
    writer.write_all(&message.encode())?;
    writer.flush()?;
    Ok(())
}

fn is_hangup(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn decode_bytes(bytes: &[u8], root: &std::path::Path) -> Incoming {
        let mut cursor = Cursor::new(bytes.to_vec());
        Decoder::new(root).decode(&mut cursor).unwrap()
    }

    #[test]
    fn test_round_trip_without_body() {
        let tmp = TempDir::new().unwrap();
        let msg = Message::new().with_attribute("Command", "Publish");

        match decode_bytes(&msg.encode(), tmp.path()) {
            Incoming::Message(decoded) => {
                assert_eq!(decoded.attributes(), msg.attributes());
                assert_eq!(decoded.body(), "");
            }
            other => panic!("expected message, got {:?}", other),
        }
    }

    #[test]
    fn test_round_trip_with_body() {
        let tmp = TempDir::new().unwrap();
        let msg = Message::new().with_body("hello");

        match decode_bytes(&msg.encode(), tmp.path()) {
            Incoming::Message(decoded) => assert_eq!(decoded.body(), "hello"),
            other => panic!("expected message, got {:?}", other),
        }
    }

    #[test]
    fn test_body_spanning_blocks() {
        let tmp = TempDir::new().unwrap();
        let body = "x".repeat(5000);
        let msg = Message::new().with_body(body.clone());

        let mut cursor = Cursor::new(msg.encode().to_vec());
        let decoded = Decoder::new(tmp.path())
            .with_block_size(16)
            .decode(&mut cursor)
            .unwrap();
        match decoded {
            Incoming::Message(m) => assert_eq!(m.body(), body),
            other => panic!("expected message, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_attributes_is_closed() {
        let tmp = TempDir::new().unwrap();
        assert!(decode_bytes(b"", tmp.path()).is_closed());
        assert!(decode_bytes(b"\n", tmp.path()).is_closed());
    }

    #[test]
    fn test_consecutive_messages_stay_framed() {
        let tmp = TempDir::new().unwrap();
        let mut bytes = Message::new().with_body("one").encode().to_vec();
        bytes.extend_from_slice(&Message::new().with_body("two").encode());

        let decoder = Decoder::new(tmp.path());
        let mut cursor = Cursor::new(bytes);
        for expected in ["one", "two"] {
            match decoder.decode(&mut cursor).unwrap() {
                Incoming::Message(m) => assert_eq!(m.body(), expected),
                other => panic!("expected message, got {:?}", other),
            }
        }
        assert!(decoder.decode(&mut cursor).unwrap().is_closed());
    }

    #[test]
    fn test_crlf_headers() {
        let tmp = TempDir::new().unwrap();
        let incoming = decode_bytes(b"Command: Publish\r\n\r\n", tmp.path());
        match incoming {
            Incoming::Message(m) => assert_eq!(m.find_value("Command"), Some("Publish")),
            other => panic!("expected message, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_header_is_error() {
        let tmp = TempDir::new().unwrap();
        let mut cursor = Cursor::new(b"garbage line\n\n".to_vec());
        let err = Decoder::new(tmp.path()).decode(&mut cursor).unwrap_err();
        assert!(matches!(err, PublishError::MalformedHeader { .. }));
    }

    #[test]
    fn test_truncated_body_is_error() {
        let tmp = TempDir::new().unwrap();
        let mut cursor = Cursor::new(b"content-length: 10\n\nshort".to_vec());
        assert!(Decoder::new(tmp.path()).decode(&mut cursor).is_err());
    }

    #[test]
    fn test_oversized_body_rejected() {
        let mut cursor = Cursor::new(Vec::new());
        let err = read_body(&mut cursor, MAX_BODY_SIZE + 1, BLOCK_SIZE).unwrap_err();
        assert!(matches!(err, PublishError::InvalidContentLength { .. }));
    }

    #[test]
    fn test_file_message_written_under_root() {
        let tmp = TempDir::new().unwrap();
        let mut bytes = Message::new()
            .with_attribute(attr::FILE, "a.cpp")
            .with_attribute(attr::FILE_PATH, "src/a.cpp")
            .with_attribute(attr::CONTENT_LENGTH, "4")
            .encode()
            .to_vec();
        bytes.extend_from_slice(b"int;");

        match decode_bytes(&bytes, tmp.path()) {
            Incoming::File { message, stored } => {
                assert_eq!(stored, tmp.path().join("src/a.cpp"));
                assert_eq!(std::fs::read(&stored).unwrap(), b"int;");
                assert_eq!(message.body(), "");
            }
            other => panic!("expected file, got {:?}", other),
        }
    }
}
