//! Client side of one connection: commands out, replies in.
//!
//! The two directions are separate types so they can run on separate
//! threads ([`super::channel`]); [`ClientSession`] bundles both for callers
//! that want simple request/reply use on one thread.

use super::command::Command;
use super::opener::{FileOpener, NoopOpener, SystemOpener};
use crate::config::Config;
use crate::error::Result;
use crate::transport::{ReadHalf, Session, ShutdownHandle, WriteHalf};
use crate::wire::{attr, value, ContentKind, Decoder, Incoming, Message};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Decoded server response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reply {
    FileDirs { listing: String },
    DelFile { status: String },
    DelDir { status: String },
    Published { status: String },
    /// A downloaded file: its wire path and where it landed locally
    File {
        path: String,
        local: PathBuf,
        open: bool,
    },
    /// A message with no recognised `Content`
    Invalid,
    /// The peer ended the session with a `quit` body
    Quit,
    /// The peer closed the connection
    Closed,
}

impl Reply {
    /// Replies after which nothing more will arrive.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Reply::Quit | Reply::Closed)
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::FileDirs { listing } => write!(f, "FileDirs,{}", listing),
            Reply::DelFile { status } => write!(f, "DelFile,{}", status),
            Reply::DelDir { status } => write!(f, "DelDir,{}", status),
            Reply::Published { status } => write!(f, "Published,{}", status),
            Reply::File { path, .. } => write!(f, "File,{}", path),
            Reply::Invalid => f.write_str("Invalid"),
            Reply::Quit => f.write_str("quit"),
            Reply::Closed => f.write_str("closed"),
        }
    }
}

/// Where downloads go and what happens to pages marked `open`.
#[derive(Clone)]
pub struct ClientOptions {
    pub staging_dir: PathBuf,
    pub page_extension: String,
    pub block_size: usize,
    pub opener: Arc<dyn FileOpener>,
}

impl ClientOptions {
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            page_extension: crate::wire::PAGE_EXTENSION.to_string(),
            block_size: crate::wire::BLOCK_SIZE,
            opener: Arc::new(NoopOpener),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let opener: Arc<dyn FileOpener> = if config.client.open_pages {
            Arc::new(SystemOpener)
        } else {
            Arc::new(NoopOpener)
        };
        Self {
            staging_dir: crate::paths::expand_tilde(&config.client.staging_dir),
            page_extension: config.transfer.page_extension.clone(),
            block_size: config.transfer.block_size,
            opener,
        }
    }

    pub fn with_opener(mut self, opener: Arc<dyn FileOpener>) -> Self {
        self.opener = opener;
        self
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("staging_dir", &self.staging_dir)
            .field("page_extension", &self.page_extension)
            .field("block_size", &self.block_size)
            .finish_non_exhaustive()
    }
}

/// Sending half: encodes commands and streams uploads.
pub struct CommandSender {
    writer: WriteHalf,
    to_addr: String,
    from_addr: String,
    block_size: usize,
}

impl CommandSender {
    /// Send one command. Uploads stream the local file; quit sends the
    /// `quit` body and half-closes so outstanding replies still arrive.
    pub fn send(&mut self, command: &Command) -> Result<()> {
        match command {
            Command::Upload { local, remote } => {
                let header = Message::command(&self.to_addr, &self.from_addr);
                let sent = self
                    .writer
                    .send_file(local, remote, header, self.block_size)?;
                info!("Uploaded {} as {} ({} bytes)", local.display(), remote, sent);
                Ok(())
            }
            Command::Quit => {
                self.writer
                    .send_message(&Message::quit(&self.to_addr, &self.from_addr))?;
                self.writer.finish()
            }
            other => match other.to_message(&self.to_addr, &self.from_addr) {
                Some(msg) => self.writer.send_message(&msg),
                None => Ok(()),
            },
        }
    }

    pub fn shutdown_handle(&self) -> Result<ShutdownHandle> {
        self.writer.shutdown_handle()
    }

    pub fn shutdown(&self) {
        self.writer.shutdown();
    }
}

/// Receiving half: decodes replies, stores downloads, opens pages.
pub struct ReplyReceiver {
    reader: ReadHalf,
    decoder: Decoder,
    page_extension: String,
    opener: Arc<dyn FileOpener>,
}

impl ReplyReceiver {
    /// Read the next reply. Download failures that leave the stream framed
    /// come back as errors and the caller may keep reading.
    pub fn recv(&mut self) -> Result<Reply> {
        let incoming = self.reader.recv(&self.decoder)?;
        Ok(match incoming {
            Incoming::Closed => Reply::Closed,
            Incoming::Message(msg) => classify(&msg),
            Incoming::File { message, stored } => {
                let reply = self.file_reply(&message, stored);
                if let Reply::File {
                    local, open: true, ..
                } = &reply
                {
                    self.open_page(local);
                }
                reply
            }
        })
    }

    fn file_reply(&self, msg: &Message, stored: PathBuf) -> Reply {
        let path = msg
            .find_value(attr::FILE_PATH)
            .or_else(|| msg.find_value(attr::FILE))
            .unwrap_or_default()
            .to_string();
        let open = msg.find_value(attr::OPEN) == Some(value::TRUE);
        Reply::File {
            path,
            local: stored,
            open,
        }
    }

    fn open_page(&self, local: &Path) {
        let is_page = local
            .extension()
            .is_some_and(|e| e.to_string_lossy() == self.page_extension);
        if !is_page {
            debug!("Not opening {}: not a page", local.display());
            return;
        }
        if let Err(e) = self.opener.open(local) {
            warn!("Could not open {}: {}", local.display(), e);
        }
    }
}

/// Map a control message to a reply by its `Content` header.
fn classify(msg: &Message) -> Reply {
    if msg.is_quit() {
        return Reply::Quit;
    }
    let body = msg.body().to_string();
    match msg.content_kind() {
        Some(ContentKind::FileDirs) => Reply::FileDirs { listing: body },
        Some(ContentKind::DelFile) => Reply::DelFile { status: body },
        Some(ContentKind::DelDir) => Reply::DelDir { status: body },
        Some(ContentKind::Published) => Reply::Published { status: body },
        // File content without a payload
        Some(ContentKind::File) | None => Reply::Invalid,
    }
}

/// Both halves of a client connection.
pub struct ClientSession {
    sender: CommandSender,
    receiver: ReplyReceiver,
}

impl ClientSession {
    /// Wrap a connected session. Creates the staging directory.
    pub fn new(session: Session, options: ClientOptions) -> Result<Self> {
        std::fs::create_dir_all(&options.staging_dir)?;
        let to_addr = session.peer_addr().to_string();
        let from_addr = session.local_addr().to_string();
        let (reader, writer) = session.into_split();

        Ok(Self {
            sender: CommandSender {
                writer,
                to_addr,
                from_addr,
                block_size: options.block_size,
            },
            receiver: ReplyReceiver {
                reader,
                decoder: Decoder::new(&options.staging_dir).with_block_size(options.block_size),
                page_extension: options.page_extension,
                opener: options.opener,
            },
        })
    }

    pub fn send(&mut self, command: &Command) -> Result<()> {
        self.sender.send(command)
    }

    pub fn recv(&mut self) -> Result<Reply> {
        self.receiver.recv()
    }

    pub fn into_split(self) -> (CommandSender, ReplyReceiver) {
        (self.sender, self.receiver)
    }
}
