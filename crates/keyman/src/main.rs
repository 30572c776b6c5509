//! `keyman` binary entry point.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise the telemetry pipeline (OTEL + tracing).
//! 3. Resolve IAM credentials and build the KMS-backed [`KeyManager`].
//! 4. Start per-key initialisation and wait for every key to report.
//! 5. Run a bulk-cipher round trip under each ready key.
//! 6. Exit non-zero if any configured key is unavailable.

use std::time::Duration;

use anyhow::{bail, Result};
use tracing::{error, info, warn};

use keyman::config::Config;
use keyman::crypto;
use keyman::dek::KeyManager;

const CANARY: &str = "keyman canary";

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    keyman::telemetry::init_telemetry(cfg.otlp_endpoint(), &cfg.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        registry = %cfg.registry_path,
        "keyman starting"
    );

    let outcome = run(&cfg).await;
    opentelemetry::global::shutdown_tracer_provider();
    outcome
}

async fn run(cfg: &Config) -> Result<()> {
    // -----------------------------------------------------------------------
    // 3. Key manager
    // -----------------------------------------------------------------------
    let manager = KeyManager::from_config(cfg).await.map_err(|e| {
        error!(error = %e, "{}", e.description());
        e
    })?;

    // -----------------------------------------------------------------------
    // 4. Key initialisation
    // -----------------------------------------------------------------------
    let events = manager.start().await.map_err(|e| {
        error!(error = %e, "{}", e.description());
        e
    })?;
    let summary = events
        .collect_within(Duration::from_secs(cfg.init_timeout_secs))
        .await;

    // -----------------------------------------------------------------------
    // 5. Canary round trip
    // -----------------------------------------------------------------------
    for key_id in &summary.ready {
        let key = manager.key(key_id).await?;
        let sealed = crypto::encrypt(CANARY.as_bytes(), key.as_bytes())?;
        let opened = crypto::decrypt_to_string(&sealed, key.as_bytes())?;
        if opened != CANARY {
            bail!("canary round trip under key {key_id} returned different plaintext");
        }
        info!(key_id = %key_id, "data key verified");
    }

    // -----------------------------------------------------------------------
    // 6. Report
    // -----------------------------------------------------------------------
    for (key_id, err) in &summary.failed {
        warn!(key_id = %key_id, error = %err, "{}", err.description());
    }
    for key_id in &summary.pending {
        warn!(
            key_id = %key_id,
            timeout_secs = cfg.init_timeout_secs,
            "data key did not become ready in time"
        );
    }

    info!(
        ready = summary.ready.len(),
        failed = summary.failed.len(),
        pending = summary.pending.len(),
        "key initialisation finished"
    );
    if !summary.all_ready() {
        bail!(
            "{} of {} master keys unavailable",
            summary.failed.len() + summary.pending.len(),
            summary.ready.len() + summary.failed.len() + summary.pending.len()
        );
    }
    Ok(())
}
