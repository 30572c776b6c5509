//! Remote KMS gateway: the operations the key manager needs from a cloud KMS.
//!
//! The gateway is an explicit value handed to the key manager; there is no
//! process-wide client. Calls are not retried and carry no timeout of their
//! own.

pub mod aws;

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_kms::types::{KeyUsageType, OriginType};
use thiserror::Error;
use zeroize::Zeroizing;

#[cfg(test)]
use mockall::automock;

pub use aws::AwsKmsGateway;

/// Largest payload KMS accepts for direct encryption.
pub const MAX_DIRECT_PAYLOAD: usize = 4096;

/// Key/value pairs bound to a direct KMS encryption.
pub type EncryptionContext = HashMap<String, String>;

/// Errors produced by the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The KMS service rejected or failed the call.
    #[error("KMS {operation} failed: {detail}")]
    Service {
        operation: &'static str,
        detail: String,
    },

    /// A successful response lacked a field the caller needs.
    #[error("KMS {operation} response contained no {field}")]
    MissingField {
        operation: &'static str,
        field: &'static str,
    },

    /// Direct encryption payload exceeds [`MAX_DIRECT_PAYLOAD`].
    #[error("payload of {0} bytes exceeds the {MAX_DIRECT_PAYLOAD}-byte KMS limit")]
    PayloadTooLarge(usize),
}

/// Parameters for creating a new master key.
#[derive(Debug, Clone, PartialEq)]
pub struct MasterKeyParams {
    pub description: String,
    pub key_usage: KeyUsageType,
    pub origin: OriginType,
}

impl Default for MasterKeyParams {
    fn default() -> Self {
        Self {
            description: "GDT".into(),
            key_usage: KeyUsageType::EncryptDecrypt,
            origin: OriginType::AwsKms,
        }
    }
}

/// A freshly generated data key: plaintext for memory, ciphertext for disk.
pub struct DataKey {
    pub plaintext: Zeroizing<Vec<u8>>,
    pub ciphertext_blob: Vec<u8>,
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataKey")
            .field("plaintext", &"[REDACTED]")
            .field("ciphertext_len", &self.ciphertext_blob.len())
            .finish()
    }
}

/// Remote key management operations.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KmsGateway: Send + Sync {
    /// Create a master key and return its id.
    async fn create_master_key(&self, params: MasterKeyParams) -> Result<String, GatewayError>;

    /// Generate an AES-256 data key wrapped under `key_id`.
    async fn generate_data_key(&self, key_id: String) -> Result<DataKey, GatewayError>;

    /// Unwrap a ciphertext blob. The master key is identified by the blob.
    async fn decrypt(
        &self,
        ciphertext_blob: Vec<u8>,
        context: Option<EncryptionContext>,
    ) -> Result<Zeroizing<Vec<u8>>, GatewayError>;

    /// Encrypt a small payload directly under `key_id`.
    async fn encrypt(
        &self,
        key_id: String,
        plaintext: Vec<u8>,
        context: Option<EncryptionContext>,
    ) -> Result<Vec<u8>, GatewayError>;
}
