//! Command-line interface for the HA controller.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// High-availability coordination controller for an active/standby NameNode pair.
#[derive(Parser)]
#[command(name = "namenode-ha")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "NAMENODE_HA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "NAMENODE_HA_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Run the controller for the local node
    Run {
        /// Unit name of the local node (overrides the config file)
        #[arg(short, long, env = "NAMENODE_HA_UNIT")]
        unit: Option<String>,

        /// Directory for node-local state (overrides the config file)
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },

    /// Check whether a NameNode port answers
    Probe {
        /// Host to probe
        host: String,

        /// Port to probe
        #[arg(default_value_t = 8020)]
        port: u16,

        /// Connect timeout in milliseconds
        #[arg(long, default_value_t = 2000)]
        timeout_ms: u64,
    },

    /// Show the status verdict of a running controller
    Status {
        /// Status server address
        #[arg(short, long, default_value = "127.0.0.1:9464")]
        addr: String,

        /// Print the full health document
        #[arg(long)]
        health: bool,
    },

    /// Show version information
    Version,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
