//! termmuxd — PTY-backed terminal multiplexer served over WebSockets.

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = termmux::config::load()?;
    termmux::server::run(config).await
}
