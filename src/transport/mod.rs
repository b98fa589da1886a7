//! Blocking TCP session.
//!
//! A `Session` owns one connected stream with buffered read and write
//! sides. Reads go through the wire decoder; writes are whole-buffer
//! blocking writes. The two sides can be split so a receive loop and a send
//! loop each own one half on their own thread; shutting down the write half
//! also unblocks a read pending on the other half.

use crate::config::RetrySettings;
use crate::error::{PublishError, Result};
use crate::wire::{self, Decoder, Incoming, Message};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// Connect backoff. `multiplier == 1.0` with no attempt budget is the plain
/// fixed-interval retry-forever loop.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(s: &RetrySettings) -> Self {
        Self {
            initial_delay: Duration::from_millis(s.initial_delay_ms),
            max_delay: Duration::from_millis(s.max_delay_ms.max(s.initial_delay_ms)),
            multiplier: s.multiplier.max(1.0),
            max_attempts: s.max_attempts,
        }
    }
}

impl RetryPolicy {
    /// Fixed interval, unbounded attempts.
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial_delay: interval,
            max_delay: interval,
            multiplier: 1.0,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Delay after the `attempt`-th failure (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exp);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

/// Shared flag checked between connect attempts.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Connect to `addr`, retrying per `policy` until success, the attempt
/// budget runs out, or `cancel` is raised.
pub fn connect(addr: &str, policy: &RetryPolicy, cancel: &CancelFlag) -> Result<Session> {
    let mut attempts = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(PublishError::ConnectCancelled {
                addr: addr.to_string(),
            });
        }

        attempts += 1;
        match TcpStream::connect(addr) {
            Ok(stream) => {
                info!("Connected to {} after {} attempt(s)", addr, attempts);
                return Session::new(stream);
            }
            Err(e) => {
                debug!("Connect attempt {} to {} failed: {}", attempts, addr, e);
                if policy.exhausted(attempts) {
                    return Err(PublishError::ConnectTimeout {
                        addr: addr.to_string(),
                        attempts,
                    });
                }
                sleep_unless_cancelled(policy.delay_for(attempts), cancel);
            }
        }
    }
}

fn sleep_unless_cancelled(total: Duration, cancel: &CancelFlag) {
    let step = Duration::from_millis(10);
    let mut waited = Duration::ZERO;
    while waited < total && !cancel.is_cancelled() {
        let slice = step.min(total - waited);
        thread::sleep(slice);
        waited += slice;
    }
}

/// A connected duplex stream.
pub struct Session {
    reader: ReadHalf,
    writer: WriteHalf,
}

impl Session {
    pub fn new(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let local = stream.local_addr()?;
        let read_stream = stream.try_clone()?;
        Ok(Self {
            reader: ReadHalf {
                inner: BufReader::new(read_stream),
                peer,
            },
            writer: WriteHalf {
                inner: BufWriter::new(stream),
                peer,
                local,
            },
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.writer.peer
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.writer.local
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.reader.inner.get_ref().set_read_timeout(timeout)?;
        Ok(())
    }

    pub fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.send(bytes)
    }

    pub fn send_message(&mut self, message: &Message) -> Result<()> {
        self.writer.send_message(message)
    }

    pub fn send_file(
        &mut self,
        local: &Path,
        remote_path: &str,
        header: Message,
        block_size: usize,
    ) -> Result<u64> {
        self.writer.send_file(local, remote_path, header, block_size)
    }

    pub fn recv_line(&mut self, delimiter: u8) -> Result<Option<String>> {
        self.reader.recv_line(delimiter)
    }

    pub fn recv_exact(&mut self, n: usize) -> Result<Vec<u8>> {
        self.reader.recv_exact(n)
    }

    pub fn recv(&mut self, decoder: &Decoder) -> Result<Incoming> {
        self.reader.recv(decoder)
    }

    /// Shut down both directions; a blocked read on either half returns.
    pub fn shutdown(&self) {
        self.writer.shutdown();
    }

    pub fn into_split(self) -> (ReadHalf, WriteHalf) {
        (self.reader, self.writer)
    }
}

/// Receiving side of a session.
pub struct ReadHalf {
    inner: BufReader<TcpStream>,
    peer: SocketAddr,
}

impl ReadHalf {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Read up to and including `delimiter`; `None` at end of stream.
    pub fn recv_line(&mut self, delimiter: u8) -> Result<Option<String>> {
        let mut buf = Vec::new();
        let n = self.inner.read_until(delimiter, &mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }

    /// Read exactly `n` bytes, `BLOCK_SIZE` at a time.
    pub fn recv_exact(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(n);
        let mut block = [0u8; wire::BLOCK_SIZE];
        while buf.len() < n {
            let want = (n - buf.len()).min(wire::BLOCK_SIZE);
            self.inner.read_exact(&mut block[..want])?;
            buf.extend_from_slice(&block[..want]);
        }
        Ok(buf)
    }

    pub fn recv(&mut self, decoder: &Decoder) -> Result<Incoming> {
        let incoming = decoder.decode(&mut self.inner)?;
        match &incoming {
            Incoming::Message(m) | Incoming::File { message: m, .. } => {
                debug!("Received from {}:\n{}", self.peer, m.to_indented_string());
            }
            Incoming::Closed => debug!("{} closed the connection", self.peer),
        }
        Ok(incoming)
    }
}

/// Sending side of a session.
pub struct WriteHalf {
    inner: BufWriter<TcpStream>,
    peer: SocketAddr,
    local: SocketAddr,
}

impl WriteHalf {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes)?;
        self.inner.flush()?;
        Ok(())
    }

    pub fn send_message(&mut self, message: &Message) -> Result<()> {
        debug!("Sending to {}:\n{}", self.peer, message.to_indented_string());
        wire::write_message(&mut self.inner, message)
    }

    pub fn send_file(
        &mut self,
        local: &Path,
        remote_path: &str,
        header: Message,
        block_size: usize,
    ) -> Result<u64> {
        wire::send_file(&mut self.inner, local, remote_path, header, block_size)
    }

    pub fn shutdown(&self) {
        shutdown_stream(self.inner.get_ref(), Shutdown::Both, self.peer);
    }

    /// Half-close: the peer sees end of stream, replies can still arrive.
    pub fn finish(&mut self) -> Result<()> {
        self.inner.flush()?;
        shutdown_stream(self.inner.get_ref(), Shutdown::Write, self.peer);
        Ok(())
    }

    /// A handle that can tear the connection down from another thread.
    pub fn shutdown_handle(&self) -> Result<ShutdownHandle> {
        Ok(ShutdownHandle {
            stream: self.inner.get_ref().try_clone()?,
            peer: self.peer,
        })
    }
}

/// Detached closer for a connection owned by some other thread.
#[derive(Debug)]
pub struct ShutdownHandle {
    stream: TcpStream,
    peer: SocketAddr,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        shutdown_stream(&self.stream, Shutdown::Both, self.peer);
    }
}

fn shutdown_stream(stream: &TcpStream, how: Shutdown, peer: SocketAddr) {
    match stream.shutdown(how) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotConnected => {}
        Err(e) => debug!("Shutdown of connection to {} failed: {}", peer, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::time::Instant;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::from(&RetrySettings {
            initial_delay_ms: 100,
            max_delay_ms: 500,
            multiplier: 2.0,
            max_attempts: None,
        });
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(40), Duration::from_millis(500));
    }

    #[test]
    fn test_fixed_policy() {
        let policy = RetryPolicy::fixed(Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), policy.delay_for(7));
        assert!(policy.max_attempts.is_none());
    }

    /// Bind then drop a listener so the port is very likely refused.
    fn dead_addr() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr.to_string()
    }

    #[test]
    fn test_connect_gives_up_after_budget() {
        let policy = RetryPolicy::fixed(Duration::from_millis(5)).with_max_attempts(3);
        match connect(&dead_addr(), &policy, &CancelFlag::new()) {
            Err(PublishError::ConnectTimeout { attempts, .. }) => assert_eq!(attempts, 3),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("connect to a closed port succeeded"),
        }
    }

    #[test]
    fn test_connect_cancelled() {
        let cancel = CancelFlag::new();
        let remote = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            remote.cancel();
        });

        let start = Instant::now();
        let result = connect(
            &dead_addr(),
            &RetryPolicy::fixed(Duration::from_millis(20)),
            &cancel,
        );
        canceller.join().unwrap();

        assert!(matches!(result, Err(PublishError::ConnectCancelled { .. })));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_line_and_exact_reads() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut session = Session::new(stream).unwrap();
            session.send(b"Command: Publish\nhello").unwrap();
        });

        let mut session = connect(&addr, &RetryPolicy::default(), &CancelFlag::new()).unwrap();
        assert_eq!(
            session.recv_line(b'\n').unwrap().as_deref(),
            Some("Command: Publish\n")
        );
        assert_eq!(session.recv_exact(5).unwrap(), b"hello");
        server.join().unwrap();
        assert_eq!(session.recv_line(b'\n').unwrap(), None);
    }

    #[test]
    fn test_exact_read_spans_blocks() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let payload: Vec<u8> = (0..wire::BLOCK_SIZE * 2 + 17).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut session = Session::new(stream).unwrap();
            session.send(&payload).unwrap();
        });

        let mut session = connect(&addr, &RetryPolicy::default(), &CancelFlag::new()).unwrap();
        assert_eq!(session.recv_exact(expected.len()).unwrap(), expected);
        server.join().unwrap();
        assert!(session.recv_exact(1).is_err());
    }

    #[test]
    fn test_shutdown_unblocks_reader() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let _server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_secs(2));
            drop(stream);
        });

        let session = connect(&addr, &RetryPolicy::default(), &CancelFlag::new()).unwrap();
        let (mut reader, writer) = session.into_split();
        let decoder = Decoder::new(std::env::temp_dir());
        let waiter = thread::spawn(move || reader.recv(&decoder).map(|i| i.is_closed()));

        thread::sleep(Duration::from_millis(50));
        writer.shutdown();
        assert!(waiter.join().unwrap().unwrap());
    }

    #[test]
    fn test_finish_lets_replies_through() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut session = Session::new(stream).unwrap();
            // Wait for the client's half-close before answering.
            assert_eq!(session.recv_line(b'\n').unwrap(), None);
            session.send(b"late reply\n").unwrap();
        });

        let session = connect(&addr, &RetryPolicy::default(), &CancelFlag::new()).unwrap();
        let (mut reader, mut writer) = session.into_split();
        writer.finish().unwrap();
        assert_eq!(
            reader.recv_line(b'\n').unwrap().as_deref(),
            Some("late reply\n")
        );
        server.join().unwrap();
    }
}
