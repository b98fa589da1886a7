//! Server-side file mutations under the repository root.

use crate::error::{PublishError, Result};
use crate::paths::{normalize_remote, page_name, resolve_dir_under, resolve_under};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Acknowledgement body for a successful file delete
pub const FILE_DELETE_OK: &str = "File Delete OK";
/// Acknowledgement body for a clean directory delete
pub const DIR_DELETE_OK: &str = "Dir Delete OK";

/// What a delete removed and what it could not.
#[derive(Debug, Default)]
pub struct DeleteReport {
    pub files_removed: usize,
    pub dirs_removed: usize,
    pub failures: Vec<(PathBuf, io::Error)>,
}

impl DeleteReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, path: &Path, e: io::Error) {
        warn!("Failed to delete {}: {}", path.display(), e);
        self.failures.push((path.to_path_buf(), e));
    }

    /// Reply body for a directory delete
    pub fn dir_ack(&self) -> String {
        if self.is_clean() {
            DIR_DELETE_OK.to_string()
        } else {
            format!("Dir Delete incomplete: {} failed", self.failures.len())
        }
    }

    /// Reply body for a file delete
    pub fn file_ack(&self) -> String {
        if self.is_clean() {
            FILE_DELETE_OK.to_string()
        } else {
            format!("File Delete incomplete: {} failed", self.failures.len())
        }
    }
}

/// Root directory plus the published-page naming rule.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    extension: String,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn resolve(&self, rel: &str) -> Result<PathBuf> {
        resolve_under(&self.root, rel)
    }

    /// Root-relative page path of a source key.
    pub fn page_of(&self, source: &str) -> String {
        page_name(&normalize_remote(source), &self.extension)
    }

    /// Delete `rel` and its published page. Missing files are not failures.
    pub fn delete_file(&self, rel: &str) -> Result<DeleteReport> {
        let source = self.resolve(rel)?;
        let page = self.resolve(&self.page_of(rel))?;

        let mut report = DeleteReport::default();
        for path in [source, page] {
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!("Deleted {}", path.display());
                    report.files_removed += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => report.fail(&path, e),
            }
        }
        Ok(report)
    }

    /// Delete the directory `rel` and everything below it.
    ///
    /// Iterative post-order walk with an explicit stack: a directory's files
    /// go first, then its subdirectories, then the directory itself. Entries
    /// that cannot be removed are collected in the report and the walk
    /// carries on. The root itself cannot be deleted.
    pub fn delete_dir(&self, rel: &str) -> Result<DeleteReport> {
        let top = resolve_dir_under(&self.root, rel)?;
        if top == self.root {
            return Err(PublishError::UnsafePath {
                path: rel.to_string(),
                reason: "refusing to delete the root",
            });
        }

        let mut report = DeleteReport::default();
        if !top.is_dir() {
            report.fail(
                &top,
                io::Error::new(io::ErrorKind::NotFound, "not a directory"),
            );
            return Ok(report);
        }

        // (dir, children already queued)
        let mut stack: Vec<(PathBuf, bool)> = vec![(top, false)];
        while let Some((dir, expanded)) = stack.pop() {
            if expanded {
                match fs::remove_dir(&dir) {
                    Ok(()) => report.dirs_removed += 1,
                    Err(e) => report.fail(&dir, e),
                }
                continue;
            }

            stack.push((dir.clone(), true));
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    report.fail(&dir, e);
                    continue;
                }
            };

            let mut subdirs = Vec::new();
            for entry in entries {
                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => {
                        report.fail(&dir, e);
                        continue;
                    }
                };
                let path = entry.path();
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                if is_dir {
                    subdirs.push(path);
                } else {
                    match fs::remove_file(&path) {
                        Ok(()) => report.files_removed += 1,
                        Err(e) => report.fail(&path, e),
                    }
                }
            }
            stack.extend(subdirs.into_iter().map(|d| (d, false)));
        }

        debug!(
            "Removed {} files and {} directories under {}",
            report.files_removed, report.dirs_removed, rel
        );
        Ok(report)
    }
}
