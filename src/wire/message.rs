//! The wire message: ordered header attributes plus an optional text body.

use crate::error::{PublishError, Result};
use crate::wire::{attr, value, QUIT};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Ordered `(name, value)` headers and a body.
///
/// Duplicate names are kept; lookups return the first match. The body is
/// empty for file-bearing messages, whose payload goes straight to disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    attributes: Vec<(String, String)>,
    body: String,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a command/response message with the fixed header shape:
    /// method marker, `mode: oneway`, `toAddr`, `fromAddr`.
    pub fn command(to_addr: &str, from_addr: &str) -> Self {
        let mut msg = Self::new();
        msg.add_attribute(attr::POST, value::POST_MARKER);
        msg.add_attribute(attr::MODE, value::ONEWAY);
        msg.add_attribute(attr::TO_ADDR, to_addr);
        msg.add_attribute(attr::FROM_ADDR, from_addr);
        msg
    }

    /// A bare message whose body is the session terminator.
    pub fn quit(to_addr: &str, from_addr: &str) -> Self {
        Self::command(to_addr, from_addr).with_body(QUIT)
    }

    pub fn add_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.push((name.into(), value.into()));
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_attribute(name, value);
        self
    }

    /// Set the body. A non-empty body also gets its `content-length` header.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.set_body(body);
        self
    }

    pub fn set_body(&mut self, body: impl Into<String>) {
        self.body = body.into();
        self.attributes.retain(|(n, _)| n != attr::CONTENT_LENGTH);
        if !self.body.is_empty() {
            let len = self.body.len().to_string();
            self.add_attribute(attr::CONTENT_LENGTH, len);
        }
    }

    /// Body as decoded from the wire; does not touch headers.
    pub(crate) fn set_decoded_body(&mut self, body: String) {
        self.body = body;
    }

    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    /// First value for `name`.
    pub fn find_value(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn is_quit(&self) -> bool {
        self.body == QUIT
    }

    /// File-bearing messages carry a non-empty `file` header.
    pub fn is_file(&self) -> bool {
        self.find_value(attr::FILE).is_some_and(|f| !f.is_empty())
    }

    pub fn command_kind(&self) -> Option<CommandKind> {
        self.find_value(attr::COMMAND).and_then(CommandKind::parse)
    }

    pub fn content_kind(&self) -> Option<ContentKind> {
        self.find_value(attr::CONTENT).and_then(ContentKind::parse)
    }

    /// Declared payload size, if any.
    pub fn content_length(&self) -> Result<Option<u64>> {
        match self.find_value(attr::CONTENT_LENGTH) {
            None => Ok(None),
            Some(v) => v
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|_| PublishError::InvalidContentLength {
                    value: v.to_string(),
                }),
        }
    }

    /// Parse one header line (`Name: Value`, trailing line break optional).
    pub fn parse_attribute(line: &str) -> Result<(String, String)> {
        let line = line.trim_end_matches(['\n', '\r']);
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| PublishError::MalformedHeader {
                line: line.to_string(),
            })?;
        let name = name.trim();
        if name.is_empty() {
            return Err(PublishError::MalformedHeader {
                line: line.to_string(),
            });
        }
        Ok((name.to_string(), value.trim_start().to_string()))
    }

    /// Serialize headers, the terminating empty line, then the body.
    pub fn encode(&self) -> Bytes {
        let header_len: usize = self
            .attributes
            .iter()
            .map(|(n, v)| n.len() + v.len() + 3)
            .sum();
        let mut buf = BytesMut::with_capacity(header_len + 1 + self.body.len());

        for (name, value) in &self.attributes {
            buf.put_slice(name.as_bytes());
            buf.put_slice(b": ");
            buf.put_slice(value.as_bytes());
            buf.put_u8(b'\n');
        }
        buf.put_u8(b'\n');
        buf.put_slice(self.body.as_bytes());

        buf.freeze()
    }

    /// Multi-line rendering used for debug logging of traffic.
    pub fn to_indented_string(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.attributes {
            out.push_str("    ");
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push('\n');
        }
        if !self.body.is_empty() {
            out.push_str("    | ");
            out.push_str(&self.body);
            out.push('\n');
        }
        out
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_indented_string())
    }
}

/// Values of the `Command` header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    GetFileDirs,
    Upload,
    OpenFile,
    DelFile,
    DelDir,
    Publish,
    DownloadCssJs,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetFileDirs => "GetFileDirs",
            Self::Upload => "Upload",
            Self::OpenFile => "OpenFile",
            Self::DelFile => "DelFile",
            Self::DelDir => "DelDir",
            Self::Publish => "Publish",
            Self::DownloadCssJs => "DownloadCssJs",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "GetFileDirs" => Some(Self::GetFileDirs),
            "Upload" => Some(Self::Upload),
            "OpenFile" => Some(Self::OpenFile),
            "DelFile" => Some(Self::DelFile),
            "DelDir" => Some(Self::DelDir),
            "Publish" => Some(Self::Publish),
            "DownloadCssJs" => Some(Self::DownloadCssJs),
            _ => None,
        }
    }
}

/// Values of the `Content` header on responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    FileDirs,
    File,
    DelFile,
    DelDir,
    Published,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileDirs => "FileDirs",
            Self::File => "File",
            Self::DelFile => "DelFile",
            Self::DelDir => "DelDir",
            Self::Published => "Published",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "FileDirs" => Some(Self::FileDirs),
            "File" => Some(Self::File),
            "DelFile" => Some(Self::DelFile),
            "DelDir" => Some(Self::DelDir),
            "Published" => Some(Self::Published),
            _ => None,
        }
    }
}
