use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;

/// orez is a single-binary PostgreSQL + CDC stack for local development.
#[derive(Parser, Debug)]
#[command(name = "orez", version)]
pub struct Cli {
    /// Path to the configuration file. Default: "orez.toml"
    #[arg(short, long, default_value = "orez.toml")]
    pub config: PathBuf,
    /// Data directory holding instance storage and the consumer replica.
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,
    /// PostgreSQL-compatible listener port.
    #[arg(long)]
    pub pg_port: Option<u16>,
    /// Consumer subprocess port.
    #[arg(long)]
    pub consumer_port: Option<u16>,
    /// Don't launch the consumer subprocess.
    #[arg(long)]
    pub skip_consumer: bool,
    /// Log level, e.g. "debug" or "orez=debug,info".
    #[arg(long)]
    pub log_level: Option<String>,
    /// Subcommand.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the backend (default).
    Run,

    /// Check the configuration file for errors.
    Configcheck,
}

impl Cli {
    /// Overlay command-line flags onto the loaded configuration.
    pub fn apply(&self, mut config: Config) -> Config {
        if let Some(data_dir) = &self.data_dir {
            config.data_dir = data_dir.clone();
        }
        if let Some(pg_port) = self.pg_port {
            config.pg_port = pg_port;
        }
        if let Some(consumer_port) = self.consumer_port {
            config.consumer_port = consumer_port;
        }
        if self.skip_consumer {
            config.skip_consumer = true;
        }
        if let Some(log_level) = &self.log_level {
            config.log_level = log_level.clone();
        }
        config
    }
}
