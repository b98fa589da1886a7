//! Client controller: turns commands into wire messages and replies back
//! into [`Reply`] values.
//!
//! [`ClientSession`] is the synchronous form. [`Channel`] runs the same
//! session on background threads behind two blocking queues.

pub mod channel;
pub mod command;
pub mod opener;
pub mod session;

pub use channel::Channel;
pub use command::Command;
pub use opener::{FileOpener, NoopOpener, RecordingOpener, SystemOpener};
pub use session::{ClientOptions, ClientSession, CommandSender, Reply, ReplyReceiver};
