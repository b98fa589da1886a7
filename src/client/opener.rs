//! Handing downloaded pages to something that can show them.

use parking_lot::Mutex;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// Opens a local file for the user.
pub trait FileOpener: Send + Sync {
    fn open(&self, path: &Path) -> io::Result<()>;
}

/// The desktop's default handler (`xdg-open`, `open`, or `start`).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemOpener;

impl FileOpener for SystemOpener {
    fn open(&self, path: &Path) -> io::Result<()> {
        let mut cmd = system_command(path);
        debug!("Opening {} with {:?}", path.display(), cmd);
        // Detached; the viewer outlives us.
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(|_| ())
    }
}

#[cfg(target_os = "windows")]
fn system_command(path: &Path) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.args(["/C", "start", ""]).arg(path);
    cmd
}

#[cfg(target_os = "macos")]
fn system_command(path: &Path) -> Command {
    let mut cmd = Command::new("open");
    cmd.arg(path);
    cmd
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn system_command(path: &Path) -> Command {
    let mut cmd = Command::new("xdg-open");
    cmd.arg(path);
    cmd
}

/// Does nothing. Used when `client.open_pages` is off.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopOpener;

impl FileOpener for NoopOpener {
    fn open(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }
}

/// Remembers what it was asked to open.
#[derive(Debug, Default)]
pub struct RecordingOpener {
    opened: Mutex<Vec<PathBuf>>,
}

impl RecordingOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opened(&self) -> Vec<PathBuf> {
        self.opened.lock().clone()
    }
}

impl FileOpener for RecordingOpener {
    fn open(&self, path: &Path) -> io::Result<()> {
        self.opened.lock().push(path.to_path_buf());
        Ok(())
    }
}
