//! codepub - remote code publisher.
//!
//! A server keeps a repository of C++ sources, analyzes their type
//! dependencies, and publishes one HTML page per file. Clients browse the
//! repository, upload and delete files, trigger republishing, and fetch a
//! page together with the pages of everything it depends on.
//!
//! Layers, bottom up:
//! - [`wire`]: message framing and file payload transfer
//! - [`transport`]: blocking TCP sessions with connect retry
//! - [`graph`]: the file dependency graph and its shared handle
//! - [`queue`]: the blocking queue between callers and background loops
//! - [`analysis`] and [`publish`]: the pipeline that rebuilds the graph and
//!   the pages
//! - [`server`] and [`client`]: the two ends of the protocol

pub mod analysis;
pub mod client;
pub mod config;
pub mod error;
pub mod graph;
pub mod logging;
pub mod paths;
pub mod publish;
pub mod queue;
pub mod server;
pub mod transport;
pub mod wire;

pub use client::{Channel, ClientOptions, ClientSession, Command, Reply};
pub use config::Config;
pub use error::{PublishError, Result};
pub use graph::{DependencyGraph, GraphHandle};
pub use publish::PublishPipeline;
pub use server::{start_server, start_server_with, ServerConfig, ServerHandle};
pub use wire::Message;
