use causal_relay_client::config::{Args, ClientConfig};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("causal_relay_client=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ClientConfig::try_from(Args::parse())?;
    causal_relay_client::run(config).await
}
