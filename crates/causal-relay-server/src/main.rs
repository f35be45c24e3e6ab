use causal_relay_server::config::{Args, ServerConfig};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("causal_relay_server=info".parse()?)
                .add_directive("causal_relay_core=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ServerConfig::load(Args::parse())?;
    tracing::info!("Starting relay '{}' on {}:{}", config.name, config.host, config.port);
    causal_relay_server::run(config).await
}
