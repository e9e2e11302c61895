//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Magic API proxy - scope-restricted credential exchange and enforcement
#[derive(Parser, Debug)]
#[command(name = "magicproxy")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "MAGICPROXY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "MAGICPROXY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "MAGICPROXY_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "MAGICPROXY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "MAGICPROXY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the proxy server (default)
    Serve,

    /// Generate a self-signed certificate and private key for local use
    Keygen {
        /// Directory to write private.pem and certificate.pem into
        #[arg(short, long, default_value = "keys")]
        out_dir: PathBuf,

        /// Certificate common name
        #[arg(long, default_value = "magicproxy")]
        common_name: String,
    },
}
