mod app;
mod cli;
mod config;
mod error;
mod github;
mod server;
mod usage;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = cli::Cli::parse();
    let mut config = config::AppConfig::load(cli.config_path.as_deref())?;
    if let Some(addr) = cli.listen_addr {
        config.server.listen_addr = addr;
    }
    let app = app::App::new(config)?;
    app.run().await
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}
