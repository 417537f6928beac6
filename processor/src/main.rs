//! CoreBank Ledger Binary
//!
//! Assembles the ledger core and runs its background scheduler until a
//! shutdown signal arrives. The API layer in front of this binary is a
//! separate deployment.

use rand::RngCore;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use corebank_processor::{LedgerCore, ProcessorConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting CoreBank ledger");

    // Load configuration
    let config = ProcessorConfig::from_env();
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let master_key = load_master_key()?;

    let core = LedgerCore::new(config, master_key);
    core.start();

    info!("CoreBank ledger running");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    core.stop();

    info!("CoreBank ledger shutdown complete");
    Ok(())
}

/// Master key from the environment (hex), or an ephemeral one for
/// development runs.
fn load_master_key() -> anyhow::Result<[u8; 32]> {
    match std::env::var("COREBANK_MASTER_KEY") {
        Ok(hex) => {
            let bytes = decode_hex(&hex)
                .ok_or_else(|| anyhow::anyhow!("COREBANK_MASTER_KEY must be 64 hex chars"))?;
            Ok(bytes)
        }
        Err(_) => {
            let mut key = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut key);
            info!("No master key configured; generated an ephemeral one");
            Ok(key)
        }
    }
}

fn decode_hex(hex: &str) -> Option<[u8; 32]> {
    let hex = hex.trim();
    if hex.len() != 64 {
        return None;
    }
    let mut out = [0u8; 32];
    for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
        let s = std::str::from_utf8(chunk).ok()?;
        out[i] = u8::from_str_radix(s, 16).ok()?;
    }
    Some(out)
}
