use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "aurora", version, about = "Runs the aurora account and session store")]
pub struct Args {
    /// Path to the TOML store configuration
    #[arg(short, long, env = "AURORA_CONFIG", default_value = "aurora.toml")]
    pub config: PathBuf,

    /// Default log level; RUST_LOG directives take precedence
    #[arg(long, default_value = "info")]
    pub log_level: tracing::Level,

    /// Also write daily-rotated log files into this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}
