//! Client commands and their wire encoding.
//!
//! Commands arrive as comma-separated strings (`GetFileDirs,src,NoParent`,
//! `OpenFile,src/a.cpp`, `Publish`). A string that names no known command,
//! or carries the wrong number of arguments, parses to `None` and is
//! dropped by the caller.

use crate::wire::{attr, value, CommandKind, Message, QUIT};
use std::path::PathBuf;

/// One request the client can make.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    GetFileDirs { path: String, no_parent: bool },
    Upload { local: PathBuf, remote: String },
    OpenFile { path: String },
    DelFile { path: String },
    DelDir { path: String },
    Publish,
    DownloadCssJs,
    /// End the session
    Quit,
}

impl Command {
    pub fn parse(text: &str) -> Option<Self> {
        let args: Vec<&str> = text.trim().split(',').map(str::trim).collect();
        let name = *args.first()?;
        if name == QUIT && args.len() == 1 {
            return Some(Command::Quit);
        }

        match (CommandKind::parse(name)?, args.len()) {
            (CommandKind::GetFileDirs, 3) => Some(Command::GetFileDirs {
                path: args[1].to_string(),
                no_parent: args[2] == value::NO_PARENT,
            }),
            (CommandKind::Upload, 3) => Some(Command::Upload {
                local: PathBuf::from(args[1]),
                remote: args[2].to_string(),
            }),
            (CommandKind::OpenFile, 2) => Some(Command::OpenFile {
                path: args[1].to_string(),
            }),
            (CommandKind::DelFile, 2) => Some(Command::DelFile {
                path: args[1].to_string(),
            }),
            (CommandKind::DelDir, 2) => Some(Command::DelDir {
                path: args[1].to_string(),
            }),
            (CommandKind::Publish, 1) => Some(Command::Publish),
            (CommandKind::DownloadCssJs, 1) => Some(Command::DownloadCssJs),
            _ => None,
        }
    }

    pub fn kind(&self) -> Option<CommandKind> {
        Some(match self {
            Command::GetFileDirs { .. } => CommandKind::GetFileDirs,
            Command::Upload { .. } => CommandKind::Upload,
            Command::OpenFile { .. } => CommandKind::OpenFile,
            Command::DelFile { .. } => CommandKind::DelFile,
            Command::DelDir { .. } => CommandKind::DelDir,
            Command::Publish => CommandKind::Publish,
            Command::DownloadCssJs => CommandKind::DownloadCssJs,
            Command::Quit => return None,
        })
    }

    /// Control message for this command. `None` for uploads, which go out
    /// through the file-send path, and for quit.
    pub fn to_message(&self, to_addr: &str, from_addr: &str) -> Option<Message> {
        let kind = self.kind()?;
        let msg = Message::command(to_addr, from_addr).with_attribute(attr::COMMAND, kind.as_str());
        match self {
            Command::GetFileDirs { path, no_parent } => Some(
                msg.with_attribute(attr::PATH, path.as_str())
                    .with_attribute(
                        attr::NO_PARENT,
                        if *no_parent { value::NO_PARENT } else { "" },
                    ),
            ),
            Command::OpenFile { path } | Command::DelFile { path } | Command::DelDir { path } => {
                Some(msg.with_attribute(attr::PATH, path.as_str()))
            }
            Command::Publish | Command::DownloadCssJs => Some(msg),
            Command::Upload { .. } | Command::Quit => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_table() {
        assert_eq!(
            Command::parse("GetFileDirs,src,NoParent"),
            Some(Command::GetFileDirs {
                path: "src".into(),
                no_parent: true
            })
        );
        assert_eq!(
            Command::parse("GetFileDirs,.,"),
            Some(Command::GetFileDirs {
                path: ".".into(),
                no_parent: false
            })
        );
        assert_eq!(
            Command::parse("Upload,/tmp/a.cpp,src/a.cpp"),
            Some(Command::Upload {
                local: PathBuf::from("/tmp/a.cpp"),
                remote: "src/a.cpp".into()
            })
        );
        assert_eq!(
            Command::parse("DelDir,lib"),
            Some(Command::DelDir { path: "lib".into() })
        );
        assert_eq!(Command::parse("Publish"), Some(Command::Publish));
        assert_eq!(Command::parse("DownloadCssJs"), Some(Command::DownloadCssJs));
        assert_eq!(Command::parse("quit"), Some(Command::Quit));
    }

    #[test]
    fn test_wrong_arity_and_unknown_are_dropped() {
        for bad in [
            "",
            "GetFileDirs,src",
            "Upload,a.cpp",
            "OpenFile",
            "OpenFile,a,b",
            "DelFile",
            "Frobnicate,x",
            "quit,now",
            "Publish,x",
            "DownloadCssJs,a,b",
        ] {
            assert_eq!(Command::parse(bad), None, "{bad:?} should be dropped");
        }
    }

    #[test]
    fn test_message_shape() {
        let msg = Command::OpenFile {
            path: "src/a.cpp".into(),
        }
        .to_message("127.0.0.1:8080", "127.0.0.1:50000")
        .unwrap();

        let names: Vec<&str> = msg.attributes().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec!["POST", "mode", "toAddr", "fromAddr", "Command", "Path"]
        );
        assert_eq!(msg.command_kind(), Some(CommandKind::OpenFile));
        assert_eq!(msg.find_value(attr::PATH), Some("src/a.cpp"));
        assert_eq!(msg.body(), "");
    }

    #[test]
    fn test_no_parent_flag_on_wire() {
        let set = Command::parse("GetFileDirs,.,NoParent")
            .unwrap()
            .to_message("a", "b")
            .unwrap();
        assert_eq!(set.find_value(attr::NO_PARENT), Some(value::NO_PARENT));

        let unset = Command::parse("GetFileDirs,.,")
            .unwrap()
            .to_message("a", "b")
            .unwrap();
        assert_ne!(unset.find_value(attr::NO_PARENT), Some(value::NO_PARENT));
    }

    #[test]
    fn test_upload_and_quit_have_no_control_message() {
        assert!(Command::Quit.to_message("a", "b").is_none());
        assert!(Command::parse("Upload,x,y")
            .unwrap()
            .to_message("a", "b")
            .is_none());
    }
}
