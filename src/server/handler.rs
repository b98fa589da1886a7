//! Per-connection command loop.

use super::listing::list_dir;
use super::ServerContext;
use crate::error::{PublishError, Result};
use crate::paths::normalize_remote;
use crate::publish::{INDEX_PAGE, SCRIPT_ASSET, STYLE_ASSET};
use crate::transport::Session;
use crate::wire::{attr, value, CommandKind, ContentKind, Decoder, Incoming, Message};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reply body for a successful republish
pub const PUBLISH_OK: &str = "Publish OK";

/// Normalized `OpenFile` path that asks for the index page plus every page
const INDEX_SENTINEL: &str = "index";

/// Serves one accepted connection until the peer quits or hangs up.
pub struct ConnectionHandler {
    ctx: Arc<ServerContext>,
    session: Session,
    decoder: Decoder,
    local: String,
}

impl ConnectionHandler {
    pub fn new(ctx: Arc<ServerContext>, session: Session) -> Self {
        let decoder = Decoder::new(ctx.store.root()).with_block_size(ctx.block_size);
        let local = session.local_addr().to_string();
        Self {
            ctx,
            session,
            decoder,
            local,
        }
    }

    pub fn run(mut self) {
        let peer = self.session.peer_addr();
        info!("Serving {}", peer);

        loop {
            match self.session.recv(&self.decoder) {
                Ok(Incoming::Closed) => break,
                Ok(Incoming::Message(msg)) => {
                    if msg.is_quit() {
                        debug!("{} sent quit", peer);
                        break;
                    }
                    if let Err(e) = self.dispatch(&msg) {
                        if e.breaks_framing() {
                            warn!("Dropping {}: {}", peer, e);
                            break;
                        }
                        warn!("Command from {} failed: {}", peer, e);
                    }
                }
                Ok(Incoming::File { stored, .. }) => {
                    info!("Stored upload {} from {}", stored.display(), peer);
                }
                Err(e) if e.breaks_framing() => {
                    warn!("Dropping {}: {}", peer, e);
                    break;
                }
                Err(e) => warn!("Upload from {} rejected: {}", peer, e),
            }
        }

        self.session.shutdown();
        info!("Connection to {} closed", peer);
    }

    /// Handle one command. Unknown or missing commands are ignored.
    pub fn dispatch(&mut self, msg: &Message) -> Result<()> {
        let Some(command) = msg.command_kind() else {
            debug!("Ignoring message without a known command");
            return Ok(());
        };
        let reply_to = msg.find_value(attr::FROM_ADDR).unwrap_or_default().to_string();
        let path = msg.find_value(attr::PATH).unwrap_or_default().to_string();

        match command {
            CommandKind::GetFileDirs => {
                let no_parent = msg.find_value(attr::NO_PARENT) == Some(value::NO_PARENT);
                let graph = self.ctx.graph.snapshot();
                let body = match list_dir(&self.ctx.store, &path, no_parent, &graph) {
                    Ok(body) => body,
                    Err(e) => {
                        warn!("Cannot list {:?}: {}", path, e);
                        String::new()
                    }
                };
                self.reply(&reply_to, ContentKind::FileDirs, body)
            }
            CommandKind::OpenFile => self.open_file(&reply_to, &path),
            CommandKind::DownloadCssJs => {
                for asset in [STYLE_ASSET, SCRIPT_ASSET] {
                    self.send_page(&reply_to, asset, false)?;
                }
                Ok(())
            }
            CommandKind::DelFile => {
                let body = match self.ctx.store.delete_file(&path) {
                    Ok(report) => report.file_ack(),
                    Err(e) => {
                        warn!("DelFile {:?} refused: {}", path, e);
                        format!("File Delete failed: {}", e)
                    }
                };
                self.reply(&reply_to, ContentKind::DelFile, body)
            }
            CommandKind::DelDir => {
                let body = match self.ctx.store.delete_dir(&path) {
                    Ok(report) => report.dir_ack(),
                    Err(e) => {
                        warn!("DelDir {:?} refused: {}", path, e);
                        format!("Dir Delete failed: {}", e)
                    }
                };
                self.reply(&reply_to, ContentKind::DelDir, body)
            }
            CommandKind::Publish => {
                let body = match self.ctx.republish() {
                    Ok(()) => PUBLISH_OK.to_string(),
                    Err(e) => {
                        warn!("Publish failed: {}", e);
                        format!("Publish failed: {}", e)
                    }
                };
                self.reply(&reply_to, ContentKind::Published, body)
            }
            // Uploads arrive as file-bearing messages, not commands.
            CommandKind::Upload => Ok(()),
        }
    }

    /// Send the pages a client needs to render `path`: the page itself
    /// (opened) and the pages of everything it depends on (not opened).
    fn open_file(&mut self, reply_to: &str, path: &str) -> Result<()> {
        let key = normalize_remote(path);
        let graph = self.ctx.graph.snapshot();

        if key == INDEX_SENTINEL {
            self.send_page(reply_to, INDEX_PAGE, true)?;
            for file in graph.files() {
                let page = self.ctx.store.page_of(file);
                self.send_page(reply_to, &page, false)?;
            }
            return Ok(());
        }

        let connected = graph.connected_set_from(&key);
        debug!("{} pulls {} pages", key, connected.len());

        // requested page first so the client can show it while the rest load
        let page = self.ctx.store.page_of(&key);
        self.send_page(reply_to, &page, true)?;
        for file in connected.iter().filter(|f| **f != key) {
            let page = self.ctx.store.page_of(file);
            self.send_page(reply_to, &page, false)?;
        }
        Ok(())
    }

    /// Stream one root-relative file. A missing file is skipped with a
    /// warning; anything that breaks framing is returned.
    fn send_page(&mut self, reply_to: &str, rel: &str, open: bool) -> Result<()> {
        let local = match self.ctx.store.resolve(rel) {
            Ok(p) => p,
            Err(e) => {
                warn!("Not sending {:?}: {}", rel, e);
                return Ok(());
            }
        };
        let header = Message::command(reply_to, &self.local)
            .with_attribute(attr::CONTENT, ContentKind::File.as_str())
            .with_attribute(
                attr::OPEN,
                if open { value::TRUE } else { value::FALSE },
            );

        match self
            .session
            .send_file(&local, rel, header, self.ctx.block_size)
        {
            Ok(_) => Ok(()),
            Err(PublishError::FileNotFound { path }) => {
                warn!("Not sending {}: file not found", path.display());
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn reply(&mut self, reply_to: &str, content: ContentKind, body: String) -> Result<()> {
        self.session.send_message(&reply_message(reply_to, &self.local, content, body))
    }
}

/// Acknowledgement carrying `content`; the body and its length go last.
fn reply_message(to: &str, from: &str, content: ContentKind, body: String) -> Message {
    Message::command(to, from)
        .with_attribute(attr::CONTENT, content.as_str())
        .with_body(body)
}
