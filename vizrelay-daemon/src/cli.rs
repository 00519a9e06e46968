//! Command-line arguments

use clap::Parser;
use std::path::PathBuf;

/// Flags override values from the config file
#[derive(Parser, Debug, Default, Clone)]
#[command(name = "vizrelay")]
#[command(about = "WebSocket relay for music visualizer frequency frames", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Config file (default: <config dir>/vizrelay/config.toml)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// TCP port to listen on
    #[arg(long, short = 'p', env = "PORT")]
    pub port: Option<u16>,

    /// Address to bind
    #[arg(long, env = "VIZRELAY_BIND")]
    pub bind: Option<String>,

    /// Maximum concurrent viewers
    #[arg(long, env = "VIZRELAY_MAX_VIEWERS")]
    pub max_viewers: Option<usize>,

    /// Seconds between liveness probes
    #[arg(long, env = "VIZRELAY_HEARTBEAT_SECS")]
    pub heartbeat_secs: Option<u64>,

    /// Seconds between statistics reports
    #[arg(long, env = "VIZRELAY_STATS_SECS")]
    pub stats_secs: Option<u64>,

    /// Write the effective configuration to the config path and exit
    #[arg(long)]
    pub write_default_config: bool,
}
