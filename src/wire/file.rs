//! File payload transfer.
//!
//! A file travels as one file-bearing header block (`file`, `path`,
//! `content-length`, plus whatever the caller put in the header) followed
//! by exactly `content-length` raw bytes, written in `block_size` chunks.
//! Nothing else may be written on the stream until the payload is done.

use super::attr;
use super::message::Message;
use crate::error::{PublishError, Result};
use crate::paths::resolve_under;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Stream `local` to `writer` as `remote_path`.
///
/// `header` carries any extra attributes (`Content`, `open`, the command
/// header shape); this adds `file`, `path` and `content-length`. Returns the
/// number of payload bytes sent.
///
/// A missing file fails before anything is written. A file that shrinks
/// while being sent yields `PartialTransfer`; the stream is then out of
/// frame and must be closed by the caller.
pub fn send_file<W: Write>(
    writer: &mut W,
    local: &Path,
    remote_path: &str,
    header: Message,
    block_size: usize,
) -> Result<u64> {
    let mut file = match File::open(local) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(PublishError::FileNotFound {
                path: local.to_path_buf(),
            })
        }
        Err(e) => return Err(e.into()),
    };
    let declared = file.metadata()?.len();

    let name = local
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| remote_path.to_string());
    let header = header
        .with_attribute(attr::FILE, name)
        .with_attribute(attr::FILE_PATH, remote_path)
        .with_attribute(attr::CONTENT_LENGTH, declared.to_string());

    writer.write_all(&header.encode())?;

    let mut block = vec![0u8; block_size.max(1)];
    let mut source = (&mut file).take(declared);
    let mut sent = 0u64;
    loop {
        let n = fill_block(&mut source, &mut block)?;
        if n == 0 {
            break;
        }
        writer.write_all(&block[..n])?;
        sent += n as u64;
    }
    writer.flush()?;

    if sent != declared {
        return Err(PublishError::PartialTransfer {
            path: local.to_path_buf(),
            declared,
            sent,
        });
    }

    debug!("Sent {} ({} bytes) as {}", local.display(), sent, remote_path);
    Ok(sent)
}

/// Receive a `len`-byte payload into `root/<rel>`.
///
/// The bytes go to a temp file beside the target and are renamed into place
/// only once all of them arrived. If the path is unsafe or the file cannot be
/// written, the remaining payload is drained so the stream stays framed, and
/// the error is returned.
pub fn receive_file<R: Read>(
    reader: &mut R,
    root: &Path,
    rel: &str,
    len: u64,
    block_size: usize,
) -> Result<PathBuf> {
    let target = match resolve_under(root, rel) {
        Ok(t) => t,
        Err(e) => {
            warn!("Rejecting file payload for {:?}: {}", rel, e);
            drain(reader, len)?;
            return Err(e);
        }
    };

    let mut temp = match open_temp(&target) {
        Ok(t) => Some(t),
        Err(e) => {
            warn!("Cannot store {}: {}", target.display(), e);
            drain(reader, len)?;
            return Err(PublishError::ReceiveFile {
                path: rel.to_string(),
                source: e,
            });
        }
    };

    let mut block = vec![0u8; block_size.max(1)];
    let mut remaining = len;
    let mut write_error = None;
    while remaining > 0 {
        let chunk = remaining.min(block.len() as u64) as usize;
        reader.read_exact(&mut block[..chunk])?;
        remaining -= chunk as u64;

        if let Some(t) = temp.as_mut() {
            if let Err(e) = t.write_all(&block[..chunk]) {
                // Keep consuming so the next message starts on a header line.
                write_error = Some(e);
                temp = None;
            }
        }
    }

    if let Some(source) = write_error {
        return Err(PublishError::ReceiveFile {
            path: rel.to_string(),
            source,
        });
    }

    let temp = match temp {
        Some(t) => t,
        None => {
            return Err(PublishError::ReceiveFile {
                path: rel.to_string(),
                source: io::Error::other("temp file lost"),
            })
        }
    };
    temp.as_file().sync_all()?;
    temp.persist(&target)
        .map_err(|e| PublishError::ReceiveFile {
            path: rel.to_string(),
            source: e.error,
        })?;

    debug!("Received {} ({} bytes)", target.display(), len);
    Ok(target)
}

/// Consume and discard exactly `len` bytes.
pub fn drain<R: Read>(reader: &mut R, len: u64) -> Result<()> {
    let copied = io::copy(&mut reader.by_ref().take(len), &mut io::sink())?;
    if copied != len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("stream ended after {} of {} payload bytes", copied, len),
        )
        .into());
    }
    Ok(())
}

fn open_temp(target: &Path) -> io::Result<NamedTempFile> {
    let parent = target
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no parent directory"))?;
    fs::create_dir_all(parent)?;
    NamedTempFile::new_in(parent)
}

/// Read until `block` is full or the source is exhausted.
fn fill_block<R: Read>(source: &mut R, block: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < block.len() {
        match source.read(&mut block[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
