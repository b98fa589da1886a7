//! Analysis-and-publish pipeline.
//!
//! `PublishPipeline::run` discovers sources under the root, analyzes them,
//! writes the pages, and hands back the fresh dependency graph. It never
//! touches the shared graph itself; the caller swaps the result in.

pub mod html;

pub use html::HtmlPublisher;

use crate::analysis::{discover_sources, Analysis, Analyzer, TokenAnalyzer};
use crate::config::ServerSettings;
use crate::error::Result;
use crate::graph::DependencyGraph;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

/// Shared stylesheet at the root
pub const STYLE_ASSET: &str = "template.css";
/// Shared script at the root
pub const SCRIPT_ASSET: &str = "template.js";
/// Page listing every published file
pub const INDEX_PAGE: &str = "index.htm";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishSummary {
    pub pages: usize,
    pub skipped: usize,
}

/// Renders analysis results to disk.
pub trait Publisher: Send + Sync {
    fn publish(&self, root: &Path, analysis: &Analysis) -> Result<PublishSummary>;
}

/// Result of one pipeline run.
#[derive(Debug)]
pub struct PublishOutcome {
    pub graph: DependencyGraph,
    pub summary: PublishSummary,
    pub files: usize,
    pub types: usize,
}

pub struct PublishPipeline {
    root: PathBuf,
    patterns: Vec<String>,
    analyzer: Box<dyn Analyzer>,
    publisher: Box<dyn Publisher>,
}

impl PublishPipeline {
    pub fn new(
        root: impl Into<PathBuf>,
        patterns: Vec<String>,
        analyzer: Box<dyn Analyzer>,
        publisher: Box<dyn Publisher>,
    ) -> Self {
        Self {
            root: root.into(),
            patterns,
            analyzer,
            publisher,
        }
    }

    /// Token analyzer and HTML publisher over the server's root.
    pub fn from_settings(settings: &ServerSettings, page_extension: &str) -> Result<Self> {
        Ok(Self::new(
            settings.root.clone(),
            settings.patterns.clone(),
            Box::new(TokenAnalyzer::new()?),
            Box::new(HtmlPublisher::new(page_extension)),
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run(&self) -> Result<PublishOutcome> {
        let start = Instant::now();
        let files = discover_sources(&self.root, &self.patterns)?;
        let analysis = self.analyzer.analyze(&self.root, &files)?;
        let summary = self.publisher.publish(&self.root, &analysis)?;

        info!(
            "Published {} pages from {} in {:.2?}",
            summary.pages,
            self.root.display(),
            start.elapsed()
        );

        Ok(PublishOutcome {
            files: analysis.files.len(),
            types: analysis.types.len(),
            graph: analysis.graph,
            summary,
        })
    }
}

impl std::fmt::Debug for PublishPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishPipeline")
            .field("root", &self.root)
            .field("patterns", &self.patterns)
            .finish_non_exhaustive()
    }
}
