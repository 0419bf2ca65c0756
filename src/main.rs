//! Scribe server - main entry point.

use std::path::PathBuf;

use clap::Parser;
use scribe::config::ScribeConfig;

/// Real-time collaborative text editing server.
#[derive(Parser, Debug)]
#[command(name = "scribe", version, about)]
struct Cli {
    /// Path to a JSON configuration file.
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Listen address, overriding config and environment.
    #[arg(long)]
    bind_addr: Option<std::net::SocketAddr>,

    /// Log level when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Use the relaxed development configuration as the base.
    #[arg(long)]
    dev: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let base = match (&cli.config, cli.dev) {
        (Some(path), _) => ScribeConfig::from_file(path)?,
        (None, true) => ScribeConfig::development(),
        (None, false) => ScribeConfig::default(),
    };

    let mut config = base.apply_env()?;
    if let Some(addr) = cli.bind_addr {
        config.server.bind_addr = addr;
    }
    if config.observability.log_level == "info" {
        config.observability.log_level = cli.log_level;
    }

    scribe::run(config).await?;
    Ok(())
}
