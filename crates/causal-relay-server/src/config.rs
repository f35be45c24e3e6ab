//! Server configuration: command line and environment over an optional TOML file.

use anyhow::Context;
use causal_relay_core::ParticipantId;
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 12345;
pub const DEFAULT_NAME: &str = "server";
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 2000;

#[derive(Debug, Default, Parser)]
#[command(name = "causal-relay-server")]
#[command(about = "Relay chat messages and files between clients, stamped with vector clocks")]
pub struct Args {
    /// TOML file with defaults for the options below.
    #[arg(long, env = "RELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long, env = "RELAY_HOST")]
    pub host: Option<String>,

    #[arg(short, long, env = "RELAY_PORT")]
    pub port: Option<u16>,

    /// Directory files are sent from and received into.
    #[arg(long, env = "RELAY_FILES_DIR")]
    pub files_dir: Option<PathBuf>,

    /// Participant id used for the server's own clock entry.
    #[arg(long, env = "RELAY_NAME")]
    pub name: Option<String>,

    /// How long connected clients get to close after shutdown is announced.
    #[arg(long)]
    pub shutdown_grace_ms: Option<u64>,
}

/// Contents of the `--config` file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub files_dir: Option<PathBuf>,
    pub name: Option<ParticipantId>,
    pub shutdown_grace_ms: Option<u64>,
}

impl FileConfig {
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub files_dir: PathBuf,
    pub name: ParticipantId,
    pub shutdown_grace: Duration,
}

impl ServerConfig {
    pub fn load(args: Args) -> anyhow::Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::read(path)?,
            None => FileConfig::default(),
        };
        Self::from_parts(args, file)
    }

    /// Merge flags over file values over defaults.
    pub fn from_parts(args: Args, file: FileConfig) -> anyhow::Result<Self> {
        let name = match (args.name, file.name) {
            (Some(name), _) => name
                .parse::<ParticipantId>()
                .with_context(|| format!("invalid server name {name:?}"))?,
            (None, Some(name)) => name,
            (None, None) => ParticipantId::new(DEFAULT_NAME)?,
        };
        let grace = args
            .shutdown_grace_ms
            .or(file.shutdown_grace_ms)
            .unwrap_or(DEFAULT_SHUTDOWN_GRACE_MS);

        Ok(Self {
            host: args
                .host
                .or(file.host)
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: args.port.or(file.port).unwrap_or(DEFAULT_PORT),
            files_dir: args
                .files_dir
                .or(file.files_dir)
                .unwrap_or_else(|| PathBuf::from(".")),
            name,
            shutdown_grace: Duration::from_millis(grace),
        })
    }
}
