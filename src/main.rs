//! codepub binary
//!
//! ```bash
//! codepub serve --root ./repo --publish
//! codepub ls src --no-parent
//! codepub open src/parser.cpp
//! codepub upload ./parser.cpp src/parser.cpp
//! codepub republish
//! ```

use anyhow::{bail, ensure, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use codepub::client::{Channel, ClientOptions, Command, Reply};
use codepub::config::Config;
use codepub::logging::init_tracing;
use codepub::paths::expand_tilde;
use codepub::publish::PublishPipeline;
use codepub::server::{parse_listing, start_server, EntryKind, ServerConfig};
use codepub::transport::RetryPolicy;

/// Connect attempts for one-shot commands when the config sets no budget
const ONE_SHOT_ATTEMPTS: u32 = 30;

#[derive(Parser, Debug)]
#[command(name = "codepub")]
#[command(about = "Publish C++ sources as linked HTML pages and browse them remotely")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file (default: ~/.config/codepub/config.toml)
    #[arg(long, global = true, env = "CODEPUB_CONFIG")]
    config: Option<PathBuf>,

    /// Server host
    #[arg(long, global = true)]
    host: Option<String>,

    /// Server port
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Print replies as JSON lines
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run the server
    Serve {
        /// Repository root
        #[arg(long)]
        root: Option<PathBuf>,
        /// Connection worker threads
        #[arg(long)]
        workers: Option<usize>,
        /// Publish once before accepting connections
        #[arg(long)]
        publish: bool,
    },
    /// Analyze and publish a repository locally
    Publish {
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// List a remote directory
    Ls {
        #[arg(default_value = ".")]
        path: String,
        /// Only files that depend on nothing
        #[arg(long)]
        no_parent: bool,
    },
    /// Fetch a page and everything it depends on, then open it
    Open { path: String },
    /// Upload a local file
    Upload { local: PathBuf, remote: String },
    /// Delete a remote file and its page
    Rm { path: String },
    /// Delete a remote directory tree
    Rmdir { path: String },
    /// Rerun the server's publish pipeline
    Republish,
    /// Fetch the shared stylesheet and script
    Assets,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load config")?;
    if let Some(host) = &cli.host {
        config.server.host = host.clone();
        config.client.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
        config.client.port = port;
    }

    match cli.command {
        Cmd::Serve {
            root,
            workers,
            publish,
        } => {
            if let Some(root) = root {
                config.server.root = root;
            }
            if let Some(workers) = workers {
                ensure!(workers > 0, "--workers must be at least 1");
                config.server.workers = workers;
            }
            config.server.publish_on_start |= publish;
            serve(&config)
        }
        Cmd::Publish { root } => {
            if let Some(root) = root {
                config.server.root = root;
            }
            publish_locally(&config)
        }
        Cmd::Ls { path, no_parent } => {
            run_one_shot(&config, Command::GetFileDirs { path, no_parent }, cli.json)
        }
        Cmd::Open { path } => run_one_shot(&config, Command::OpenFile { path }, cli.json),
        Cmd::Upload { local, remote } => {
            ensure!(local.is_file(), "{} is not a file", local.display());
            run_one_shot(&config, Command::Upload { local, remote }, cli.json)
        }
        Cmd::Rm { path } => run_one_shot(&config, Command::DelFile { path }, cli.json),
        Cmd::Rmdir { path } => run_one_shot(&config, Command::DelDir { path }, cli.json),
        Cmd::Republish => run_one_shot(&config, Command::Publish, cli.json),
        Cmd::Assets => run_one_shot(&config, Command::DownloadCssJs, cli.json),
    }
}

fn serve(config: &Config) -> Result<()> {
    let server_config = ServerConfig::from(config);
    let root = server_config.root.clone();
    let (handle, addr) = start_server(server_config)
        .with_context(|| format!("Failed to start server on {}", config.server.host))?;

    println!(
        "{} {} on {}",
        "Serving".green().bold(),
        root.display(),
        addr.to_string().cyan()
    );
    handle.wait();
    Ok(())
}

fn publish_locally(config: &Config) -> Result<()> {
    let mut settings = config.server.clone();
    settings.root = expand_tilde(&settings.root);
    let pipeline = PublishPipeline::from_settings(&settings, &config.transfer.page_extension)
        .context("Failed to set up the publish pipeline")?;
    let outcome = pipeline
        .run()
        .with_context(|| format!("Failed to publish {}", settings.root.display()))?;

    println!(
        "{} {} pages ({} files, {} types, {} dependencies)",
        "Published".green().bold(),
        outcome.summary.pages,
        outcome.files,
        outcome.types,
        outcome.graph.edge_count()
    );
    if outcome.summary.skipped > 0 {
        println!("{} {} files skipped", "!".yellow(), outcome.summary.skipped);
    }
    Ok(())
}

/// Send one command, let the server answer, print what came back.
fn run_one_shot(config: &Config, command: Command, json: bool) -> Result<()> {
    let addr = config.client.addr();
    let mut policy = RetryPolicy::from(&config.client.retry);
    if policy.max_attempts.is_none() {
        policy = policy.with_max_attempts(ONE_SHOT_ATTEMPTS);
    }

    let is_upload = matches!(command, Command::Upload { .. });
    let channel = Channel::open(addr.clone(), policy, ClientOptions::from_config(config))
        .context("Failed to start client threads")?;
    channel.send(command);
    let replies = channel
        .close()
        .with_context(|| format!("Cannot reach {}", addr))?;
    if replies.is_empty() {
        bail!("Connection to {} closed without a reply", addr);
    }

    let mut printed = 0;
    for reply in replies.iter().filter(|r| !r.is_terminal()) {
        print_reply(reply, json)?;
        printed += 1;
    }
    if printed == 0 && is_upload {
        println!("{} to {}", "Uploaded".green().bold(), addr);
    }
    Ok(())
}

fn print_reply(reply: &Reply, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(reply)?);
        return Ok(());
    }

    match reply {
        Reply::FileDirs { listing } => {
            for entry in parse_listing(listing) {
                match entry.kind {
                    EntryKind::Dir => {
                        println!("{}  {}/", entry.date.dimmed(), entry.name.blue().bold())
                    }
                    EntryKind::File => println!("{}  {}", entry.date.dimmed(), entry.name),
                }
            }
        }
        Reply::DelFile { status } | Reply::DelDir { status } | Reply::Published { status } => {
            if status.ends_with("OK") {
                println!("{}", status.green());
            } else {
                println!("{}", status.red());
            }
        }
        Reply::File { path, local, open } => {
            let marker = if *open { "*".green() } else { " ".normal() };
            println!("{} {} -> {}", marker, path, local.display());
        }
        other => println!("{}", other.to_string().yellow()),
    }
    Ok(())
}
