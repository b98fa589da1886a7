//! Wire protocol for codepub.
//!
//! A message is a block of `Name: Value` header lines terminated by an empty
//! line, optionally followed by a body whose exact size is declared by a
//! `content-length` header.
//!
//! ```text
//! POST: Message
//! mode: oneway
//! toAddr: 127.0.0.1:8080
//! fromAddr: 127.0.0.1:8081
//! Command: GetFileDirs
//! Path: src
//! NoParent: NoParent
//!
//! ```
//!
//! Body framing has two disjoint modes, selected by the `file` header:
//! - control body: `content-length` bytes of UTF-8 become `Message::body`
//! - file body: `content-length` raw bytes are streamed to disk under a
//!   caller-supplied root, never buffered into the message
//!
//! Payloads always travel in `BLOCK_SIZE` chunks. There is no multiplexing:
//! a file payload must be fully written before the next message.

pub mod codec;
pub mod file;
pub mod message;

pub use codec::{
    read_body, read_headers, read_message, write_message, Decoder, Incoming, MAX_BODY_SIZE,
};
pub use file::{drain, receive_file, send_file};
pub use message::{CommandKind, ContentKind, Message};

/// Chunk size for bodies and file payloads
pub const BLOCK_SIZE: usize = 2048;

/// Extension of published pages (without the dot)
pub const PAGE_EXTENSION: &str = "htm";

/// Body value that terminates a session, and the queue sentinel's name
pub const QUIT: &str = "quit";

/// Header names
pub mod attr {
    pub const POST: &str = "POST";
    pub const MODE: &str = "mode";
    pub const TO_ADDR: &str = "toAddr";
    pub const FROM_ADDR: &str = "fromAddr";
    pub const COMMAND: &str = "Command";
    pub const PATH: &str = "Path";
    pub const NO_PARENT: &str = "NoParent";
    pub const CONTENT: &str = "Content";
    pub const CONTENT_LENGTH: &str = "content-length";
    pub const FILE: &str = "file";
    pub const FILE_PATH: &str = "path";
    pub const OPEN: &str = "open";
}

/// Fixed header values
pub mod value {
    pub const POST_MARKER: &str = "Message";
    pub const ONEWAY: &str = "oneway";
    pub const NO_PARENT: &str = "NoParent";
    pub const TRUE: &str = "true";
    pub const FALSE: &str = "false";
}
