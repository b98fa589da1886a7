//! Source analysis: discovery, type table, dependency graph.
//!
//! The server's publish pipeline calls into this through the [`Analyzer`]
//! trait so the token-level analysis here can be swapped for a real parser.

pub mod scanner;
pub mod types;

pub use scanner::{Scanner, Token};
pub use types::{Scope, ScopeTable, TypeEntry, TypeKind, TypeTable, GLOBAL_NAMESPACE};

use crate::error::{PublishError, Result};
use crate::graph::DependencyGraph;
use crate::paths::relative_key;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Everything the publisher needs from one analysis run.
#[derive(Debug, Default)]
pub struct Analysis {
    /// Analyzed files, relative to the root, sorted
    pub files: Vec<String>,
    pub types: TypeTable,
    pub scopes: ScopeTable,
    pub graph: DependencyGraph,
}

/// Produces type and dependency facts for a set of source files.
pub trait Analyzer: Send + Sync {
    /// `files` are relative to `root`.
    fn analyze(&self, root: &Path, files: &[String]) -> Result<Analysis>;
}

/// Token-matching analyzer.
///
/// A file depends on the file defining a type when the type's name appears
/// among its tokens and the type is either global or its namespace name
/// appears as well.
#[derive(Debug, Clone)]
pub struct TokenAnalyzer {
    scanner: Scanner,
}

impl TokenAnalyzer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            scanner: Scanner::new()?,
        })
    }
}

impl Analyzer for TokenAnalyzer {
    fn analyze(&self, root: &Path, files: &[String]) -> Result<Analysis> {
        let mut analysis = Analysis::default();
        let mut token_sets: Vec<(String, HashSet<String>)> = Vec::new();

        for file in files {
            let bytes = match fs::read(root.join(file)) {
                Ok(b) => b,
                Err(e) => {
                    warn!("Can't open {}: {}", file, e);
                    continue;
                }
            };
            let source = String::from_utf8_lossy(&bytes);
            let tokens = self.scanner.tokenize(&source);

            let facts = types::extract(file, &tokens);
            analysis.types.extend(facts.types);
            for scope in facts.scopes {
                analysis.scopes.add(file, scope);
            }

            let idents: HashSet<String> = tokens
                .into_iter()
                .filter(Token::is_ident)
                .map(|t| t.text)
                .collect();
            analysis.graph.add_node(file.clone());
            analysis.files.push(file.clone());
            token_sets.push((file.clone(), idents));
        }

        analysis.types.sort_by_file();
        debug!("Type table holds {} entries", analysis.types.len());

        for (file, idents) in &token_sets {
            for entry in analysis.types.iter() {
                if !idents.contains(&entry.name) {
                    continue;
                }
                if entry.namespace == GLOBAL_NAMESPACE || idents.contains(&entry.namespace) {
                    analysis.graph.add_edge(file, &entry.file);
                }
            }
        }

        analysis.files.sort();
        info!(
            "Analyzed {} files: {} types, {} dependencies",
            analysis.files.len(),
            analysis.types.len(),
            analysis.graph.edge_count()
        );
        Ok(analysis)
    }
}

/// Find source files under `root` whose names match any of `patterns`.
/// Returned paths are relative to `root`, `/`-separated and sorted. Hidden
/// entries are skipped.
pub fn discover_sources(root: &Path, patterns: &[String]) -> Result<Vec<String>> {
    let compiled = patterns
        .iter()
        .map(|p| {
            glob::Pattern::new(p).map_err(|source| PublishError::Pattern {
                pattern: p.clone(),
                source,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    if !root.is_dir() {
        return Err(PublishError::Analysis {
            message: format!("{} is not a directory", root.display()),
        });
    }

    let walker = ignore::WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !compiled.iter().any(|p| p.matches(&name)) {
            continue;
        }
        if let Some(key) = relative_key(root, entry.path()) {
            files.push(key);
        }
    }

    files.sort();
    Ok(files)
}
