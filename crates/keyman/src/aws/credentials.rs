//! Credential supplier: resolves IAM access keys for the KMS client.

use std::path::PathBuf;

use common::KeyError;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Errors produced while resolving credentials.
#[derive(Debug, Error)]
pub enum CredentialsError {
    /// The credentials file is missing or unreadable.
    #[error("cannot read credentials file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The credentials file is not the expected JSON shape.
    #[error("credentials file {path} is malformed: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A required field is empty.
    #[error("credential field {0} is empty")]
    EmptyField(&'static str),
}

impl From<CredentialsError> for KeyError {
    fn from(err: CredentialsError) -> Self {
        KeyError::CredentialsUnavailable(err.to_string())
    }
}

/// IAM access key pair, optionally pinned to a region.
///
/// The file form is `{"accessKeyId": "...", "secretAccessKey": "...", "region": "..."}`;
/// `region` may be omitted.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IamCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default)]
    pub region: Option<String>,
}

impl IamCredentials {
    /// Build credentials from explicit values.
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            region: None,
        }
    }

    fn validate(self) -> Result<Self, CredentialsError> {
        if self.access_key_id.trim().is_empty() {
            return Err(CredentialsError::EmptyField("accessKeyId"));
        }
        if self.secret_access_key.trim().is_empty() {
            return Err(CredentialsError::EmptyField("secretAccessKey"));
        }
        Ok(self)
    }
}

impl std::fmt::Debug for IamCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IamCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field("region", &self.region)
            .finish()
    }
}

/// Where credentials come from.
#[derive(Debug, Clone)]
pub enum CredentialSource {
    /// JSON credentials file on the local filesystem.
    File(PathBuf),
    /// Values supplied directly (e.g. from the environment).
    Static(IamCredentials),
}

impl CredentialSource {
    /// Resolve the credentials, failing fast on an unreadable or malformed source.
    ///
    /// # Errors
    ///
    /// Returns a [`CredentialsError`] describing why no usable credentials
    /// could be produced.
    pub async fn resolve(&self) -> Result<IamCredentials, CredentialsError> {
        match self {
            CredentialSource::Static(creds) => creds.clone().validate(),
            CredentialSource::File(path) => {
                let raw = tokio::fs::read(path)
                    .await
                    .map_err(|source| CredentialsError::Unreadable {
                        path: path.clone(),
                        source,
                    })?;
                let creds: IamCredentials =
                    serde_json::from_slice(&raw).map_err(|source| CredentialsError::Malformed {
                        path: path.clone(),
                        source,
                    })?;
                debug!(path = %path.display(), "credentials loaded from file");
                creds.validate()
            }
        }
    }
}
