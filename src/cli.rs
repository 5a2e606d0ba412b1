use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "dbguard")]
#[command(version)]
#[command(about = "Database connection supervisor with health monitoring and alerting", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Directory holding default.toml and <environment>.toml
    #[arg(short, long, env = "DBGUARD_CONFIG_DIR", default_value = "config")]
    pub config_dir: PathBuf,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Connect, monitor and alert until interrupted
    Run,
    /// Validate configuration and print a redacted summary
    CheckConfig,
    /// Connect once, ping, and exit
    Probe,
}
