//! Magic API Proxy - scope-restricted credential exchange and enforcement

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use rcgen::{CertificateParams, DnType, KeyPair};
use tracing::error;

use magicproxy::{
    cli::{Cli, Command},
    config::Config,
    gateway::Proxy,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let mut cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command.take() {
        Some(Command::Keygen {
            out_dir,
            common_name,
        }) => run_keygen(&out_dir, &common_name),
        Some(Command::Serve) | None => run_server(cli).await,
    }
}

/// Run the proxy server
async fn run_server(cli: Cli) -> ExitCode {
    // Load configuration
    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            // Apply CLI overrides
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Key load failure is fatal: never serve live traffic without keys
    let proxy = match Proxy::new(config) {
        Ok(p) => p,
        Err(e) => {
            error!("Failed to create proxy: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = proxy.run().await {
        error!("Proxy error: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Generate a self-signed certificate + private key pair for local use
fn run_keygen(out_dir: &Path, common_name: &str) -> ExitCode {
    match generate_key_pair(out_dir, common_name) {
        Ok(()) => {
            println!("Wrote {}", out_dir.join("private.pem").display());
            println!("Wrote {}", out_dir.join("certificate.pem").display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Keygen failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn generate_key_pair(out_dir: &Path, common_name: &str) -> magicproxy::Result<()> {
    use magicproxy::Error;

    let key_pair =
        KeyPair::generate().map_err(|e| Error::KeyLoad(format!("key generation failed: {e}")))?;

    let mut params = CertificateParams::new(Vec::new())
        .map_err(|e| Error::KeyLoad(format!("certificate params: {e}")))?;
    params
        .distinguished_name
        .push(DnType::CommonName, common_name);

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| Error::KeyLoad(format!("self-signing failed: {e}")))?;

    std::fs::create_dir_all(out_dir)?;
    std::fs::write(out_dir.join("private.pem"), key_pair.serialize_pem())?;
    std::fs::write(out_dir.join("certificate.pem"), cert.pem())?;
    Ok(())
}
