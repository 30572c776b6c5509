//! `keyman`: envelope-encryption key lifecycle manager.
//!
//! One data encryption key (DEK) per KMS master key. Wrapped DEKs are kept in
//! a local JSON registry; plaintext DEKs live only in memory. Bulk data is
//! sealed with AES-256-GCM under a key derived from a DEK.
//!
//! - [`dek::KeyManager`]: startup, per-key unwrap-or-generate, readiness events
//! - [`crypto`]: the bulk cipher
//! - [`registry::RegistryStore`]: the on-disk registry
//! - [`kms::KmsGateway`]: the remote KMS seam

pub mod aws;
pub mod config;
pub mod crypto;
pub mod dek;
pub mod kms;
pub mod registry;
pub mod telemetry;
