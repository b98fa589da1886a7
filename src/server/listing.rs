//! `GetFileDirs` listings.
//!
//! Body format: one `name;date;kind,` entry per item (note the trailing
//! comma), files first, then directories. `kind` is `f` or `d`. A file's
//! name is its page name with the page extension stripped, which is the
//! source file's name.

use super::store::FileStore;
use crate::error::Result;
use crate::graph::DependencyGraph;
use crate::paths::{normalize_remote, resolve_dir_under, source_name};
use chrono::{DateTime, Local};
use std::fs;
use std::time::SystemTime;
use tracing::warn;

pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Kind of a listing entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum EntryKind {
    File,
    Dir,
}

impl EntryKind {
    pub fn as_char(&self) -> char {
        match self {
            Self::File => 'f',
            Self::Dir => 'd',
        }
    }
}

/// One decoded listing entry
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ListingEntry {
    pub name: String,
    pub date: String,
    pub kind: EntryKind,
}

/// List published pages and subdirectories directly under `rel`.
///
/// With `no_parent`, a page is listed only when its source has no outgoing
/// dependencies in `graph`.
pub fn list_dir(
    store: &FileStore,
    rel: &str,
    no_parent: bool,
    graph: &DependencyGraph,
) -> Result<String> {
    let dir = resolve_dir_under(store.root(), rel)?;
    let prefix = normalize_remote(rel);

    let mut files = Vec::new();
    let mut dirs = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Skipping entry in {}: {}", dir.display(), e);
                continue;
            }
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(_) => continue,
        };
        let date = format_date(meta.modified().ok());

        if meta.is_dir() {
            dirs.push(ListingEntry {
                name,
                date,
                kind: EntryKind::Dir,
            });
            continue;
        }

        let Some(source) = source_name(&name, store.extension()) else {
            continue;
        };
        if no_parent {
            let key = if prefix.is_empty() {
                source.to_string()
            } else {
                format!("{}/{}", prefix, source)
            };
            if graph.has_dependencies(&key) {
                continue;
            }
        }
        files.push(ListingEntry {
            name: source.to_string(),
            date,
            kind: EntryKind::File,
        });
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    dirs.sort_by(|a, b| a.name.cmp(&b.name));

    let mut body = String::new();
    for entry in files.iter().chain(dirs.iter()) {
        body.push_str(&entry.name);
        body.push(';');
        body.push_str(&entry.date);
        body.push(';');
        body.push(entry.kind.as_char());
        body.push(',');
    }
    Ok(body)
}

/// Split a listing body back into entries. Malformed entries are skipped.
pub fn parse_listing(body: &str) -> Vec<ListingEntry> {
    body.split(',')
        .filter(|e| !e.is_empty())
        .filter_map(|e| {
            let mut parts = e.rsplitn(3, ';');
            let kind = match parts.next()? {
                "f" => EntryKind::File,
                "d" => EntryKind::Dir,
                _ => return None,
            };
            let date = parts.next()?.to_string();
            let name = parts.next()?.to_string();
            Some(ListingEntry { name, date, kind })
        })
        .collect()
}

fn format_date(time: Option<SystemTime>) -> String {
    match time {
        Some(t) => DateTime::<Local>::from(t).format(DATE_FORMAT).to_string(),
        None => String::new(),
    }
}
