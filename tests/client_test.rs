//! Client channel against a real server.

use codepub::client::{Channel, ClientOptions, Command, RecordingOpener, Reply};
use codepub::server::{start_server, ServerConfig};
use codepub::transport::RetryPolicy;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn repo() -> TempDir {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("shape.h"), "class Shape {\n  int sides;\n};\n").unwrap();
    fs::write(
        tmp.path().join("main.cpp"),
        "int main() {\n  Shape s;\n  return 0;\n}\n",
    )
    .unwrap();
    tmp
}

fn server_config(root: &std::path::Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        root: root.to_path_buf(),
        workers: 2,
        publish_on_start: true,
        ..ServerConfig::default()
    }
}

#[test]
fn test_channel_open_file_opens_only_requested_page() {
    let repo = repo();
    let staging = TempDir::new().unwrap();
    let (handle, addr) = start_server(server_config(repo.path())).unwrap();

    let opener = Arc::new(RecordingOpener::new());
    let options = ClientOptions::new(staging.path()).with_opener(opener.clone());
    let channel = Channel::open(addr.to_string(), RetryPolicy::default(), options).unwrap();

    channel.post("OpenFile,main.cpp");
    let replies = channel.close().unwrap();

    let paths: Vec<&str> = replies
        .iter()
        .filter_map(|r| match r {
            Reply::File { path, .. } => Some(path.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(paths, vec!["main.cpp.htm", "shape.h.htm"]);
    assert_eq!(replies.last(), Some(&Reply::Closed));
    assert_eq!(opener.opened(), vec![staging.path().join("main.cpp.htm")]);
    handle.stop();
}

#[test]
fn test_channel_round_trips_in_order() {
    let repo = repo();
    let staging = TempDir::new().unwrap();
    let (handle, addr) = start_server(server_config(repo.path())).unwrap();

    let channel = Channel::open(
        addr.to_string(),
        RetryPolicy::default(),
        ClientOptions::new(staging.path()),
    )
    .unwrap();

    channel.post("GetFileDirs,.,NoParent");
    channel.post("DelFile,main.cpp,extra");
    channel.send(Command::DelFile {
        path: "main.cpp".into(),
    });
    channel.post("Publish");

    match channel.recv_timeout(Duration::from_secs(10)) {
        Some(Some(Reply::FileDirs { listing })) => {
            assert!(listing.contains("shape.h;"));
            assert!(!listing.contains("main.cpp"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(
        channel.recv(),
        Some(Reply::DelFile {
            status: "File Delete OK".into()
        })
    );
    assert_eq!(
        channel.recv(),
        Some(Reply::Published {
            status: "Publish OK".into()
        })
    );
    assert!(!handle.graph().snapshot().contains("main.cpp"));

    assert_eq!(channel.close().unwrap(), vec![Reply::Closed]);
    handle.stop();
}

#[test]
fn test_server_stop_closes_client_channel() {
    let repo = repo();
    let staging = TempDir::new().unwrap();
    let (handle, addr) = start_server(server_config(repo.path())).unwrap();

    let channel = Channel::open(
        addr.to_string(),
        RetryPolicy::default(),
        ClientOptions::new(staging.path()),
    )
    .unwrap();
    channel.post("DownloadCssJs");
    assert!(matches!(channel.recv(), Some(Reply::File { .. })));
    assert!(matches!(channel.recv(), Some(Reply::File { .. })));

    handle.stop();
    assert_eq!(channel.recv(), Some(Reply::Closed));
    assert_eq!(channel.recv(), None);
    channel.stop();
}
