use tracing_subscriber::EnvFilter;

use warp_daemon::{config, server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("warp_daemon=info".parse()?)
                .add_directive("libwarp=info".parse()?),
        )
        .init();

    let config = config::DaemonConfig::load()?;
    server::run(config).await
}
