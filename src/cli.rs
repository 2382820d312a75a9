use clap::Parser;
use std::path::PathBuf;

/// Command-line interface for the metrics server.
#[derive(Debug, Parser)]
#[command(author, version, about = "Developer activity and usage metrics service", long_about = None)]
pub struct Cli {
    /// Path to a TOML configuration file (defaults to ./pulse-metrics.toml if present).
    #[arg(long, value_name = "FILE")]
    pub config_path: Option<PathBuf>,
    /// Address to listen on, overriding the configuration file and environment.
    #[arg(long, value_name = "ADDR")]
    pub listen_addr: Option<String>,
}
