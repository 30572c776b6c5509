//! Configuration loading and validation for the key manager.
//!
//! All values are read from environment variables at startup. The process will
//! exit with a clear error message if any required variable is missing or invalid.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::aws::{CredentialSource, IamCredentials};
use crate::kms::MasterKeyParams;
use crate::registry::CorruptPolicy;

/// Validated key manager configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Comma-separated master key ids to provision data keys for. When empty,
    /// a default master key is looked up in the registry or created.
    #[serde(default)]
    pub master_key_ids: String,

    /// Path of a JSON credentials file (`accessKeyId`, `secretAccessKey`).
    #[serde(default)]
    pub credentials_file: Option<String>,

    /// Static access key id, used when no credentials file is configured.
    #[serde(default)]
    pub aws_access_key_id: Option<String>,

    /// Static secret access key, paired with `aws_access_key_id`.
    #[serde(default)]
    pub aws_secret_access_key: Option<String>,

    /// Region of the KMS account.
    #[serde(default = "default_region")]
    pub aws_region: String,

    /// Optional KMS endpoint override.
    #[serde(default)]
    pub kms_endpoint_url: Option<String>,

    /// Location of the key registry file.
    #[serde(default = "default_registry_path")]
    pub registry_path: String,

    /// What to do with a registry file that cannot be parsed.
    #[serde(default)]
    pub registry_corrupt_policy: CorruptPolicy,

    /// Description given to master keys created by the manager.
    #[serde(default = "default_master_key_description")]
    pub master_key_description: String,

    /// Upper bound (seconds) the binary waits for all keys to settle.
    #[serde(default = "default_init_timeout")]
    pub init_timeout_secs: u64,

    /// OTLP collector endpoint. Spans are only exported when set.
    #[serde(default)]
    pub otel_exporter_otlp_endpoint: Option<String>,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_region() -> String {
    "us-east-1".into()
}
fn default_registry_path() -> String {
    "cmk.json".into()
}
fn default_master_key_description() -> String {
    "GDT".into()
}
fn default_init_timeout() -> u64 {
    60
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any variable cannot be parsed or fails validation.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Configured master key ids, trimmed, de-duplicated, in order.
    pub fn master_key_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for id in self.master_key_ids.split(',').map(str::trim) {
            if !id.is_empty() && !ids.iter().any(|seen| seen == id) {
                ids.push(id.to_owned());
            }
        }
        ids
    }

    /// The credential source selected by this configuration.
    ///
    /// A credentials file wins over static keys.
    ///
    /// # Errors
    ///
    /// Returns an error if neither source is configured.
    pub fn credential_source(&self) -> Result<CredentialSource> {
        if let Some(path) = non_empty(&self.credentials_file) {
            return Ok(CredentialSource::File(PathBuf::from(path)));
        }
        match (
            non_empty(&self.aws_access_key_id),
            non_empty(&self.aws_secret_access_key),
        ) {
            (Some(id), Some(secret)) => Ok(CredentialSource::Static(IamCredentials::new(id, secret))),
            _ => anyhow::bail!(
                "either CREDENTIALS_FILE or both AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY must be set"
            ),
        }
    }

    /// Parameters for master keys created by the manager.
    pub fn master_key_params(&self) -> MasterKeyParams {
        MasterKeyParams {
            description: self.master_key_description.clone(),
            ..MasterKeyParams::default()
        }
    }

    /// KMS endpoint override, if any.
    pub fn kms_endpoint(&self) -> Option<&str> {
        non_empty(&self.kms_endpoint_url)
    }

    /// OTLP endpoint, if span export is enabled.
    pub fn otlp_endpoint(&self) -> Option<&str> {
        non_empty(&self.otel_exporter_otlp_endpoint)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.registry_path, "REGISTRY_PATH")?;
        ensure_non_empty(&self.aws_region, "AWS_REGION")?;
        self.credential_source()?;

        if self.init_timeout_secs == 0 {
            anyhow::bail!("INIT_TIMEOUT_SECS must be > 0");
        }
        Ok(())
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            master_key_ids: "".into(),
            credentials_file: Some("/etc/keyman/awsConfig.json".into()),
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_region: default_region(),
            kms_endpoint_url: None,
            registry_path: default_registry_path(),
            registry_corrupt_policy: CorruptPolicy::default(),
            master_key_description: default_master_key_description(),
            init_timeout_secs: default_init_timeout(),
            otel_exporter_otlp_endpoint: None,
            log_level: default_log_level(),
        }
    }

    #[test]
    fn defaults_are_correct() {
        assert_eq!(default_region(), "us-east-1");
        assert_eq!(default_registry_path(), "cmk.json");
        assert_eq!(default_master_key_description(), "GDT");
        assert_eq!(default_init_timeout(), 60);
        assert_eq!(default_log_level(), "info");
        assert_eq!(CorruptPolicy::default(), CorruptPolicy::Fail);
    }

    #[test]
    fn master_key_ids_are_split_and_deduplicated() {
        let mut cfg = base_config();
        cfg.master_key_ids = " id-A, id-B ,,id-A ".into();
        assert_eq!(cfg.master_key_ids(), vec!["id-A", "id-B"]);

        cfg.master_key_ids = "".into();
        assert!(cfg.master_key_ids().is_empty());
    }

    #[test]
    fn credentials_file_wins() {
        let mut cfg = base_config();
        cfg.aws_access_key_id = Some("AKIAEXAMPLE".into());
        cfg.aws_secret_access_key = Some("s3cr3t".into());
        assert!(matches!(
            cfg.credential_source().unwrap(),
            CredentialSource::File(_)
        ));
    }

    #[test]
    fn static_credentials_need_both_halves() {
        let mut cfg = base_config();
        cfg.credentials_file = None;
        cfg.aws_access_key_id = Some("AKIAEXAMPLE".into());
        assert!(cfg.validate().is_err());

        cfg.aws_secret_access_key = Some("s3cr3t".into());
        assert!(matches!(
            cfg.credential_source().unwrap(),
            CredentialSource::Static(_)
        ));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_registry_path() {
        let mut cfg = base_config();
        cfg.registry_path = " ".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let mut cfg = base_config();
        cfg.init_timeout_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn blank_optionals_are_ignored() {
        let mut cfg = base_config();
        cfg.kms_endpoint_url = Some("".into());
        cfg.otel_exporter_otlp_endpoint = Some("  ".into());
        assert_eq!(cfg.kms_endpoint(), None);
        assert_eq!(cfg.otlp_endpoint(), None);
        assert_eq!(cfg.master_key_params().description, "GDT");
    }
}
