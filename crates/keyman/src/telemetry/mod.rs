//! Tracing setup: structured JSON logs, plus span export over OTLP when a
//! collector endpoint is configured.
//!
//! # Telemetry invariants
//!
//! - **No key material** (plaintext DEKs, IAM secrets) may appear in any span
//!   attribute or log field. Types that hold it redact their `Debug` output.
//! - Log level is configurable via `LOG_LEVEL` (default: `info`) and
//!   overridden by `RUST_LOG` when present.

pub mod init;

pub use init::init_telemetry;
