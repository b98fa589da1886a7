//! Background client channel.
//!
//! Three threads cooperate:
//! - **connect**: runs the retry loop, then hands each half of the session
//!   to its loop and exits
//! - **send loop**: dequeues commands and writes them
//! - **receive loop**: reads replies and queues them for the caller
//!
//! The caller talks to the loops only through two [`BlockingQueue`]s.
//! [`Envelope::Quit`] stops the send loop; the receive loop stops when the
//! connection closes, then posts `Quit` on the reply queue so a caller
//! blocked in [`Channel::recv`] wakes up.

use super::command::Command;
use super::session::{ClientOptions, ClientSession, CommandSender, Reply, ReplyReceiver};
use crate::error::{PublishError, Result};
use crate::queue::{BlockingQueue, Envelope};
use crate::transport::{self, CancelFlag, RetryPolicy, ShutdownHandle};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Handle to a running client connection.
pub struct Channel {
    commands: BlockingQueue<Envelope<Command>>,
    replies: BlockingQueue<Envelope<Reply>>,
    cancel: CancelFlag,
    closer: Arc<Mutex<Option<ShutdownHandle>>>,
    connect_error: Arc<Mutex<Option<PublishError>>>,
    threads: Vec<JoinHandle<()>>,
}

impl Channel {
    /// Start connecting to `addr` in the background. Commands posted before
    /// the connection is up are held and sent in order once it is.
    pub fn open(addr: impl Into<String>, policy: RetryPolicy, options: ClientOptions) -> Result<Self> {
        let addr = addr.into();
        let commands = BlockingQueue::new();
        let replies = BlockingQueue::new();
        let cancel = CancelFlag::new();
        let closer = Arc::new(Mutex::new(None));
        let connect_error = Arc::new(Mutex::new(None));

        // One-shot hand-off of each half from the connect thread.
        let sender_slot: BlockingQueue<Envelope<CommandSender>> = BlockingQueue::new();
        let receiver_slot: BlockingQueue<Envelope<ReplyReceiver>> = BlockingQueue::new();

        let connect = {
            let cancel = cancel.clone();
            let closer = closer.clone();
            let connect_error = connect_error.clone();
            let sender_slot = sender_slot.clone();
            let receiver_slot = receiver_slot.clone();
            thread::Builder::new()
                .name("codepub-connect".into())
                .spawn(move || {
                    match establish(&addr, &policy, &cancel, options) {
                        Ok((sender, receiver, handle)) => {
                            *closer.lock() = Some(handle);
                            sender_slot.enqueue(Envelope::Item(sender));
                            receiver_slot.enqueue(Envelope::Item(receiver));
                        }
                        Err(e) => {
                            error!("Could not connect: {}", e);
                            *connect_error.lock() = Some(e);
                            sender_slot.enqueue(Envelope::Quit);
                            receiver_slot.enqueue(Envelope::Quit);
                        }
                    }
                })?
        };

        let send = {
            let commands = commands.clone();
            thread::Builder::new()
                .name("codepub-send".into())
                .spawn(move || {
                    if let Envelope::Item(sender) = sender_slot.dequeue() {
                        send_loop(sender, &commands);
                    }
                })?
        };

        let recv = {
            let replies = replies.clone();
            thread::Builder::new()
                .name("codepub-recv".into())
                .spawn(move || {
                    if let Envelope::Item(receiver) = receiver_slot.dequeue() {
                        recv_loop(receiver, &replies);
                    }
                    replies.enqueue(Envelope::Quit);
                })?
        };

        Ok(Self {
            commands,
            replies,
            cancel,
            closer,
            connect_error,
            threads: vec![connect, send, recv],
        })
    }

    /// Queue a command for the send loop.
    pub fn send(&self, command: Command) {
        match command {
            Command::Quit => self.commands.enqueue(Envelope::Quit),
            c => self.commands.enqueue(Envelope::Item(c)),
        }
    }

    /// Queue a command given as text. Unparseable text is dropped.
    pub fn post(&self, text: &str) {
        match Command::parse(text) {
            Some(command) => self.send(command),
            None => debug!("Dropping unrecognised command {:?}", text),
        }
    }

    /// Next reply, blocking. `None` once the connection is gone.
    pub fn recv(&self) -> Option<Reply> {
        match self.replies.dequeue() {
            Envelope::Item(reply) => Some(reply),
            Envelope::Quit => {
                // keep later callers from blocking forever
                self.replies.enqueue(Envelope::Quit);
                None
            }
        }
    }

    /// Like [`recv`](Self::recv) but gives up after `timeout`. The outer
    /// `None` means nothing arrived in time.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Option<Reply>> {
        match self.replies.dequeue_timeout(timeout)? {
            Envelope::Item(reply) => Some(Some(reply)),
            Envelope::Quit => {
                self.replies.enqueue(Envelope::Quit);
                Some(None)
            }
        }
    }

    /// Why the connect thread gave up, if it did.
    pub fn connect_error(&self) -> Option<String> {
        self.connect_error.lock().as_ref().map(ToString::to_string)
    }

    /// Send `quit`, wait for the server to finish answering everything
    /// already sent, and return those answers. Fails if the connection was
    /// never made.
    pub fn close(mut self) -> Result<Vec<Reply>> {
        self.commands.enqueue(Envelope::Quit);
        self.join();
        if let Some(e) = self.connect_error.lock().take() {
            return Err(e);
        }
        let mut rest = Vec::new();
        while let Some(Envelope::Item(reply)) = self.replies.try_dequeue() {
            rest.push(reply);
        }
        Ok(rest)
    }

    /// Stop now: abandon a pending connect and drop the connection.
    pub fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.closer.lock().take() {
            handle.shutdown();
        }
        self.commands.enqueue(Envelope::Quit);
        self.join();
    }

    fn join(&mut self) {
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("Client thread panicked");
            }
        }
    }
}

fn establish(
    addr: &str,
    policy: &RetryPolicy,
    cancel: &CancelFlag,
    options: ClientOptions,
) -> Result<(CommandSender, ReplyReceiver, ShutdownHandle)> {
    let session = transport::connect(addr, policy, cancel)?;
    let client = ClientSession::new(session, options)?;
    let (sender, receiver) = client.into_split();
    let handle = sender.shutdown_handle()?;
    Ok((sender, receiver, handle))
}

fn send_loop(mut sender: CommandSender, commands: &BlockingQueue<Envelope<Command>>) {
    loop {
        let command = match commands.dequeue() {
            Envelope::Item(c) => c,
            Envelope::Quit => {
                if let Err(e) = sender.send(&Command::Quit) {
                    debug!("Could not send quit: {}", e);
                    sender.shutdown();
                }
                break;
            }
        };
        // A failed send is logged; later commands are still attempted.
        if let Err(e) = sender.send(&command) {
            warn!("Sending {:?} failed: {}", command.kind(), e);
        }
    }
    debug!("Send loop stopping");
}

fn recv_loop(mut receiver: ReplyReceiver, replies: &BlockingQueue<Envelope<Reply>>) {
    loop {
        match receiver.recv() {
            Ok(reply) => {
                let done = reply.is_terminal();
                replies.enqueue(Envelope::Item(reply));
                if done {
                    break;
                }
            }
            Err(e) if e.breaks_framing() => {
                warn!("Receive failed: {}", e);
                replies.enqueue(Envelope::Item(Reply::Closed));
                break;
            }
            Err(e) => warn!("Discarding reply: {}", e),
        }
    }
    debug!("Receive loop stopping");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Session;
    use crate::wire::{attr, Decoder, Incoming, Message};
    use std::net::TcpListener;
    use tempfile::TempDir;

    /// Echo server: answers every command with a `Published` reply naming it.
    fn echo_server() -> (String, thread::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut session = Session::new(stream).unwrap();
            let decoder = Decoder::new(std::env::temp_dir());
            let mut seen = Vec::new();
            loop {
                match session.recv(&decoder).unwrap() {
                    Incoming::Message(m) if m.is_quit() => break,
                    Incoming::Message(m) => {
                        let cmd = m.find_value(attr::COMMAND).unwrap_or("?").to_string();
                        let reply = Message::command("c", "s")
                            .with_attribute(attr::CONTENT, "Published")
                            .with_body(cmd.clone());
                        session.send_message(&reply).unwrap();
                        seen.push(cmd);
                    }
                    Incoming::File { .. } => seen.push("file".into()),
                    Incoming::Closed => break,
                }
            }
            seen
        });
        (addr, handle)
    }

    #[test]
    fn test_commands_flow_in_order_and_close_drains() {
        let staging = TempDir::new().unwrap();
        let (addr, server) = echo_server();
        let channel = Channel::open(
            addr,
            RetryPolicy::default(),
            ClientOptions::new(staging.path()),
        )
        .unwrap();

        channel.post("Publish");
        channel.post("not a command");
        channel.post("DelFile,a.h");
        assert_eq!(
            channel.recv(),
            Some(Reply::Published {
                status: "Publish".into()
            })
        );

        let rest = channel.close().unwrap();
        assert_eq!(
            rest,
            vec![
                Reply::Published {
                    status: "DelFile".into()
                },
                Reply::Closed
            ]
        );
        assert_eq!(server.join().unwrap(), vec!["Publish", "DelFile"]);
    }

    #[test]
    fn test_commands_queued_before_connect_are_sent() {
        let staging = TempDir::new().unwrap();
        // Reserve a port, start listening on it a little later.
        let probe = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);

        let channel = Channel::open(
            addr.to_string(),
            RetryPolicy::fixed(Duration::from_millis(20)),
            ClientOptions::new(staging.path()),
        )
        .unwrap();
        channel.send(Command::Publish);

        thread::sleep(Duration::from_millis(100));
        let listener = TcpListener::bind(addr).unwrap();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut session = Session::new(stream).unwrap();
            let decoder = Decoder::new(std::env::temp_dir());
            match session.recv(&decoder).unwrap() {
                Incoming::Message(m) => m.find_value(attr::COMMAND).map(str::to_string),
                _ => None,
            }
        });

        assert_eq!(server.join().unwrap().as_deref(), Some("Publish"));
        channel.stop();
    }

    #[test]
    fn test_connect_failure_ends_replies() {
        let staging = TempDir::new().unwrap();
        let probe = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = probe.local_addr().unwrap().to_string();
        drop(probe);

        let channel = Channel::open(
            addr,
            RetryPolicy::fixed(Duration::from_millis(5)).with_max_attempts(2),
            ClientOptions::new(staging.path()),
        )
        .unwrap();
        assert_eq!(channel.recv(), None);
        assert_eq!(channel.recv(), None);
        assert!(channel
            .connect_error()
            .is_some_and(|reason| reason.contains("2 attempts")));
        assert!(matches!(
            channel.close(),
            Err(PublishError::ConnectTimeout { attempts: 2, .. })
        ));
    }

    #[test]
    fn test_stop_cancels_pending_connect() {
        let staging = TempDir::new().unwrap();
        let probe = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = probe.local_addr().unwrap().to_string();
        drop(probe);

        let channel = Channel::open(
            addr,
            RetryPolicy::fixed(Duration::from_millis(20)),
            ClientOptions::new(staging.path()),
        )
        .unwrap();
        thread::sleep(Duration::from_millis(50));
        // Returns only if the retry loop noticed the cancel.
        channel.stop();
    }
}
