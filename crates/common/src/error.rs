//! Common error types shared across crates.

use thiserror::Error;

/// Error taxonomy of the key lifecycle manager.
///
/// Fatal variants abort initialisation of the whole manager; per-key variants
/// are delivered through the key event channel and leave sibling keys untouched:
/// - [`KeyError::CredentialsUnavailable`] → fatal
/// - [`KeyError::RegistryCorrupt`] / [`KeyError::Registry`] → fatal
/// - [`KeyError::MasterKeyCreation`] → fatal
/// - [`KeyError::KeyDecryption`] / [`KeyError::RemoteGeneration`] /
///   [`KeyError::Persistence`] → scoped to one master key id
#[derive(Debug, Clone, Error)]
pub enum KeyError {
    /// IAM credentials could not be resolved; no keys can be processed.
    #[error("credentials unavailable: {0}")]
    CredentialsUnavailable(String),

    /// The registry file exists but cannot be parsed.
    #[error("key registry {path} is corrupt: {detail}")]
    RegistryCorrupt { path: String, detail: String },

    /// The registry file could not be read or written.
    #[error("key registry I/O failure: {0}")]
    Registry(String),

    /// No master key id was configured and a new one could not be created.
    #[error("failed to create master key: {0}")]
    MasterKeyCreation(String),

    /// A stored data key could not be unwrapped by KMS.
    #[error("key decryption error for key id {key_id}: {detail}")]
    KeyDecryption { key_id: String, detail: String },

    /// KMS failed to generate a new data key.
    #[error("remote generation error for key id {key_id}: {detail}")]
    RemoteGeneration { key_id: String, detail: String },

    /// A freshly generated data key could not be written to the registry.
    #[error("failed to persist data key for key id {key_id}: {detail}")]
    Persistence { key_id: String, detail: String },
}

impl KeyError {
    /// Short, stable description of the error class.
    pub fn description(&self) -> &'static str {
        match self {
            KeyError::CredentialsUnavailable(_) => "Credentials Unavailable",
            KeyError::RegistryCorrupt { .. } => "Registry Corrupt",
            KeyError::Registry(_) => "Registry Error",
            KeyError::MasterKeyCreation(_) => "Master Key Creation Error",
            KeyError::KeyDecryption { .. } => "Key Decryption Error",
            KeyError::RemoteGeneration { .. } => "Remote Generation Error",
            KeyError::Persistence { .. } => "Key Persistence Error",
        }
    }

    /// Returns `true` if this error leaves the whole manager unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            KeyError::CredentialsUnavailable(_)
                | KeyError::RegistryCorrupt { .. }
                | KeyError::Registry(_)
                | KeyError::MasterKeyCreation(_)
        )
    }

    /// The master key id this error is scoped to, if any.
    pub fn key_id(&self) -> Option<&str> {
        match self {
            KeyError::KeyDecryption { key_id, .. }
            | KeyError::RemoteGeneration { key_id, .. }
            | KeyError::Persistence { key_id, .. } => Some(key_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(KeyError::CredentialsUnavailable("x".into()).is_fatal());
        assert!(KeyError::RegistryCorrupt {
            path: "cmk.json".into(),
            detail: "x".into()
        }
        .is_fatal());
        assert!(!KeyError::KeyDecryption {
            key_id: "id-A".into(),
            detail: "x".into()
        }
        .is_fatal());
        assert!(!KeyError::RemoteGeneration {
            key_id: "id-A".into(),
            detail: "x".into()
        }
        .is_fatal());
    }

    #[test]
    fn per_key_errors_carry_key_id() {
        let e = KeyError::Persistence {
            key_id: "id-B".into(),
            detail: "disk full".into(),
        };
        assert_eq!(e.key_id(), Some("id-B"));
        assert_eq!(KeyError::Registry("x".into()).key_id(), None);
    }

    #[test]
    fn display_includes_detail() {
        let e = KeyError::KeyDecryption {
            key_id: "id-A".into(),
            detail: "AccessDeniedException".into(),
        };
        assert_eq!(e.description(), "Key Decryption Error");
        assert!(e.to_string().contains("id-A"));
        assert!(e.to_string().contains("AccessDeniedException"));
    }
}
