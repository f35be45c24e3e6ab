//! Client configuration from flags and environment.

use anyhow::Context;
use causal_relay_core::ParticipantId;
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "causal-relay-client")]
#[command(about = "Chat and share files through a causal relay server")]
pub struct Args {
    #[arg(long, env = "RELAY_HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[arg(short, long, env = "RELAY_PORT", default_value_t = 12345)]
    pub port: u16,

    /// Username to claim. Asked for on stdin when not given.
    #[arg(short, long, env = "RELAY_USER")]
    pub name: Option<String>,

    /// Directory files are sent from and received into.
    #[arg(long, env = "RELAY_FILES_DIR", default_value = ".")]
    pub files_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub name: Option<ParticipantId>,
    pub files_dir: PathBuf,
}

impl TryFrom<Args> for ClientConfig {
    type Error = anyhow::Error;

    fn try_from(args: Args) -> anyhow::Result<Self> {
        let name = args
            .name
            .map(|name| {
                name.parse::<ParticipantId>()
                    .with_context(|| format!("invalid username {name:?}"))
            })
            .transpose()?;
        Ok(Self {
            host: args.host,
            port: args.port,
            name,
            files_dir: args.files_dir,
        })
    }
}
