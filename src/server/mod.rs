//! TCP server: accept loop, worker pool, shared state.
//!
//! Architecture:
//! - **Acceptor thread**: non-blocking `accept()` loop that checks the
//!   `keep_running` flag between polls. Each accepted stream is offered to
//!   a bounded [`BlockingQueue`]; when the queue is full the connection is
//!   closed right away (admission control).
//! - **Workers**: a fixed number of threads, each dequeuing one connection at
//!   a time and running a [`ConnectionHandler`] on it to completion. A worker
//!   exits on [`Envelope::Quit`].
//! - **Shared state** ([`ServerContext`]): the file store, the current
//!   dependency graph behind a [`GraphHandle`], and the publish pipeline.
//!   Republishing is serialized; readers never wait for it.
//!
//! Shutdown: `ServerHandle::stop` clears `keep_running`; the acceptor then
//! shuts down every live connection, posts one `Quit` per worker, and the
//! handle joins everything.

pub mod handler;
pub mod listing;
pub mod store;

pub use handler::ConnectionHandler;
pub use listing::{list_dir, parse_listing, EntryKind, ListingEntry};
pub use store::{DeleteReport, FileStore};

use crate::config::Config;
use crate::error::{PublishError, Result};
use crate::graph::{DependencyGraph, GraphHandle};
use crate::paths::expand_tilde;
use crate::publish::PublishPipeline;
use crate::queue::{BlockingQueue, Envelope};
use crate::transport::Session;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Settings for one server instance.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub root: PathBuf,
    pub workers: usize,
    pub backlog: usize,
    pub publish_on_start: bool,
    pub patterns: Vec<String>,
    pub read_timeout: Option<Duration>,
    pub block_size: usize,
    pub page_extension: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ServerConfig {
    fn from(config: &Config) -> Self {
        let s = &config.server;
        Self {
            host: s.host.clone(),
            port: s.port,
            root: expand_tilde(&s.root),
            workers: s.workers,
            backlog: s.backlog,
            publish_on_start: s.publish_on_start,
            patterns: s.patterns.clone(),
            read_timeout: s.read_timeout(),
            block_size: config.transfer.block_size,
            page_extension: config.transfer.page_extension.clone(),
        }
    }
}

/// State shared by every connection.
pub struct ServerContext {
    pub store: FileStore,
    pub graph: GraphHandle,
    pub block_size: usize,
    pipeline: PublishPipeline,
    publish_lock: Mutex<()>,
}

impl ServerContext {
    pub fn new(store: FileStore, pipeline: PublishPipeline, block_size: usize) -> Self {
        Self {
            store,
            graph: GraphHandle::new(DependencyGraph::new()),
            block_size,
            pipeline,
            publish_lock: Mutex::new(()),
        }
    }

    /// Rerun the pipeline and swap in the new graph. Concurrent calls run
    /// one after another; readers keep the snapshot they already hold.
    pub fn republish(&self) -> Result<()> {
        let _guard = self.publish_lock.lock();
        let outcome = self.pipeline.run()?;
        info!(
            "Republished: {} files, {} types, {} edges",
            outcome.files,
            outcome.types,
            outcome.graph.edge_count()
        );
        self.graph.replace(outcome.graph);
        Ok(())
    }
}

/// Live connections, so shutdown can unblock handlers stuck in a read.
#[derive(Default)]
struct ConnectionRegistry {
    next_id: AtomicU64,
    streams: Mutex<HashMap<u64, TcpStream>>,
}

impl ConnectionRegistry {
    fn register(&self, stream: &TcpStream) -> Option<u64> {
        let clone = stream.try_clone().ok()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.streams.lock().insert(id, clone);
        Some(id)
    }

    fn unregister(&self, id: u64) {
        self.streams.lock().remove(&id);
    }

    fn shutdown_all(&self) {
        for (_, stream) in self.streams.lock().drain() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

/// Handle returned by [`start_server`].
pub struct ServerHandle {
    keep_running: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
    context: Arc<ServerContext>,
}

impl ServerHandle {
    pub fn context(&self) -> &Arc<ServerContext> {
        &self.context
    }

    pub fn graph(&self) -> &GraphHandle {
        &self.context.graph
    }

    /// Signal the server to stop and wait for all threads.
    pub fn stop(mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        self.join();
    }

    /// Block until the server stops on its own (it normally doesn't).
    pub fn wait(mut self) {
        self.join();
    }

    fn join(&mut self) {
        if let Some(acceptor) = self.acceptor.take() {
            let _ = acceptor.join();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// Start the server with the default analysis pipeline. Returns the handle
/// and the bound address (useful with port 0).
pub fn start_server(config: ServerConfig) -> Result<(ServerHandle, SocketAddr)> {
    let settings = crate::config::ServerSettings {
        root: config.root.clone(),
        patterns: config.patterns.clone(),
        ..Default::default()
    };
    let pipeline = PublishPipeline::from_settings(&settings, &config.page_extension)?;
    start_server_with(config, pipeline)
}

/// Start the server with a caller-supplied pipeline.
pub fn start_server_with(
    config: ServerConfig,
    pipeline: PublishPipeline,
) -> Result<(ServerHandle, SocketAddr)> {
    if config.workers == 0 {
        return Err(PublishError::Config("server needs at least one worker".into()));
    }
    std::fs::create_dir_all(&config.root)?;

    let store = FileStore::new(&config.root, &config.page_extension);
    let context = Arc::new(ServerContext::new(store, pipeline, config.block_size));
    if config.publish_on_start {
        context.republish()?;
    }

    let listener = TcpListener::bind((config.host.as_str(), config.port))?;
    let addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;
    info!(
        "Serving {} on {} with {} workers",
        config.root.display(),
        addr,
        config.workers
    );

    let queue: BlockingQueue<Envelope<TcpStream>> = BlockingQueue::bounded(config.backlog.max(1));
    let registry = Arc::new(ConnectionRegistry::default());
    let keep_running = Arc::new(AtomicBool::new(true));

    let workers = (0..config.workers)
        .map(|n| {
            let queue = queue.clone();
            let context = context.clone();
            let registry = registry.clone();
            let keep_running = keep_running.clone();
            let read_timeout = config.read_timeout;
            thread::Builder::new()
                .name(format!("codepub-worker-{}", n))
                .spawn(move || worker_loop(queue, context, registry, keep_running, read_timeout))
        })
        .collect::<std::io::Result<Vec<_>>>()?;

    let acceptor = {
        let keep_running = keep_running.clone();
        let worker_count = config.workers;
        let backlog = config.backlog;
        thread::Builder::new()
            .name("codepub-acceptor".into())
            .spawn(move || {
                accept_loop(&listener, &queue, &keep_running, backlog);
                registry.shutdown_all();
                for _ in 0..worker_count {
                    queue.enqueue(Envelope::Quit);
                }
            })?
    };

    Ok((
        ServerHandle {
            keep_running,
            acceptor: Some(acceptor),
            workers,
            context,
        },
        addr,
    ))
}

fn accept_loop(
    listener: &TcpListener,
    queue: &BlockingQueue<Envelope<TcpStream>>,
    keep_running: &AtomicBool,
    backlog: usize,
) {
    while keep_running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nonblocking(false) {
                    warn!("Dropping {}: {}", peer, e);
                    continue;
                }
                if let Err(rejected) = queue.try_enqueue(Envelope::Item(stream)) {
                    warn!("{}", PublishError::AtCapacity { backlog });
                    if let Envelope::Item(stream) = rejected {
                        let _ = stream.shutdown(Shutdown::Both);
                    }
                } else {
                    debug!("Queued connection from {}", peer);
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                error!("Accept failed: {}", e);
                break;
            }
        }
    }
    debug!("Acceptor stopping");
}

fn worker_loop(
    queue: BlockingQueue<Envelope<TcpStream>>,
    context: Arc<ServerContext>,
    registry: Arc<ConnectionRegistry>,
    keep_running: Arc<AtomicBool>,
    read_timeout: Option<Duration>,
) {
    loop {
        let stream = match queue.dequeue() {
            Envelope::Item(stream) => stream,
            Envelope::Quit => break,
        };

        // Register before checking the flag: either the acceptor's
        // shutdown_all sees this stream or we see the cleared flag.
        let id = registry.register(&stream);
        if !keep_running.load(Ordering::SeqCst) {
            let _ = stream.shutdown(Shutdown::Both);
            if let Some(id) = id {
                registry.unregister(id);
            }
            continue;
        }
        let session = match Session::new(stream) {
            Ok(s) => s,
            Err(e) => {
                warn!("Could not set up connection: {}", e);
                if let Some(id) = id {
                    registry.unregister(id);
                }
                continue;
            }
        };
        if let Err(e) = session.set_read_timeout(read_timeout) {
            warn!("Could not set read timeout: {}", e);
        }

        ConnectionHandler::new(context.clone(), session).run();
        if let Some(id) = id {
            registry.unregister(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    fn test_config(root: &std::path::Path) -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            root: root.to_path_buf(),
            workers: 2,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn smoke_test_start_and_stop() {
        let tmp = TempDir::new().unwrap();
        let (handle, addr) = start_server(test_config(tmp.path())).unwrap();
        assert_ne!(addr.port(), 0);

        let stream = TcpStream::connect(addr).unwrap();
        drop(stream);
        handle.stop();
    }

    #[test]
    fn test_stop_unblocks_idle_connection() {
        let tmp = TempDir::new().unwrap();
        let (handle, addr) = start_server(test_config(tmp.path())).unwrap();

        let mut idle = TcpStream::connect(addr).unwrap();
        thread::sleep(Duration::from_millis(200));
        handle.stop();

        let mut buf = [0u8; 1];
        assert_eq!(idle.read(&mut buf).unwrap_or(0), 0);
    }

    #[test]
    fn test_backlog_full_rejects() {
        let tmp = TempDir::new().unwrap();
        let config = ServerConfig {
            workers: 1,
            backlog: 1,
            ..test_config(tmp.path())
        };
        let (handle, addr) = start_server(config).unwrap();

        // Occupies the only worker
        let _busy = TcpStream::connect(addr).unwrap();
        thread::sleep(Duration::from_millis(200));
        // Waits in the queue
        let _queued = TcpStream::connect(addr).unwrap();
        thread::sleep(Duration::from_millis(200));
        // No room left
        let mut rejected = TcpStream::connect(addr).unwrap();
        rejected
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();

        let mut buf = [0u8; 1];
        assert_eq!(rejected.read(&mut buf).unwrap_or(0), 0);
        handle.stop();
    }

    #[test]
    fn test_zero_workers_is_config_error() {
        let tmp = TempDir::new().unwrap();
        let config = ServerConfig {
            workers: 0,
            ..test_config(tmp.path())
        };
        assert!(matches!(
            start_server(config),
            Err(PublishError::Config(_))
        ));
    }
}
