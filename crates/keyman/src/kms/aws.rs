//! [`KmsGateway`] backed by the AWS KMS SDK client.

use async_trait::async_trait;
use aws_sdk_kms::error::DisplayErrorContext;
use aws_sdk_kms::primitives::Blob;
use aws_sdk_kms::types::DataKeySpec;
use tracing::{debug, instrument, warn};
use zeroize::Zeroizing;

use super::{DataKey, EncryptionContext, GatewayError, KmsGateway, MasterKeyParams};
use crate::aws::AwsClients;

/// AWS KMS implementation of [`KmsGateway`].
#[derive(Clone)]
pub struct AwsKmsGateway {
    client: aws_sdk_kms::Client,
}

impl AwsKmsGateway {
    /// Wrap the KMS client from an initialised [`AwsClients`] bundle.
    pub fn new(clients: &AwsClients) -> Self {
        Self {
            client: clients.kms.clone(),
        }
    }
}

fn service_error<E>(operation: &'static str, err: E) -> GatewayError
where
    E: std::error::Error,
{
    let detail = DisplayErrorContext(&err).to_string();
    warn!(operation, error = %detail, "KMS call failed");
    GatewayError::Service { operation, detail }
}

#[async_trait]
impl KmsGateway for AwsKmsGateway {
    #[instrument(skip(self, params), fields(kms = "aws"))]
    async fn create_master_key(&self, params: MasterKeyParams) -> Result<String, GatewayError> {
        let res = self
            .client
            .create_key()
            .description(params.description)
            .key_usage(params.key_usage)
            .origin(params.origin)
            .send()
            .await
            .map_err(|e| service_error("CreateKey", e))?;

        let Some(meta) = res.key_metadata else {
            return Err(GatewayError::MissingField {
                operation: "CreateKey",
                field: "key metadata",
            });
        };
        debug!(key_id = %meta.key_id, "created master key");
        Ok(meta.key_id)
    }

    #[instrument(skip(self), fields(kms = "aws"))]
    async fn generate_data_key(&self, key_id: String) -> Result<DataKey, GatewayError> {
        let res = self
            .client
            .generate_data_key()
            .key_id(key_id)
            .key_spec(DataKeySpec::Aes256)
            .send()
            .await
            .map_err(|e| service_error("GenerateDataKey", e))?;

        let plaintext = res.plaintext.ok_or(GatewayError::MissingField {
            operation: "GenerateDataKey",
            field: "plaintext",
        })?;
        let ciphertext_blob = res.ciphertext_blob.ok_or(GatewayError::MissingField {
            operation: "GenerateDataKey",
            field: "ciphertext blob",
        })?;

        Ok(DataKey {
            plaintext: Zeroizing::new(plaintext.into_inner()),
            ciphertext_blob: ciphertext_blob.into_inner(),
        })
    }

    #[instrument(skip_all, fields(kms = "aws"))]
    async fn decrypt(
        &self,
        ciphertext_blob: Vec<u8>,
        context: Option<EncryptionContext>,
    ) -> Result<Zeroizing<Vec<u8>>, GatewayError> {
        let res = self
            .client
            .decrypt()
            .ciphertext_blob(Blob::new(ciphertext_blob))
            .set_encryption_context(context)
            .send()
            .await
            .map_err(|e| service_error("Decrypt", e))?;

        res.plaintext
            .map(|blob| Zeroizing::new(blob.into_inner()))
            .ok_or(GatewayError::MissingField {
                operation: "Decrypt",
                field: "plaintext",
            })
    }

    #[instrument(skip(self, plaintext, context), fields(kms = "aws"))]
    async fn encrypt(
        &self,
        key_id: String,
        plaintext: Vec<u8>,
        context: Option<EncryptionContext>,
    ) -> Result<Vec<u8>, GatewayError> {
        let res = self
            .client
            .encrypt()
            .key_id(key_id)
            .plaintext(Blob::new(plaintext))
            .set_encryption_context(context)
            .send()
            .await
            .map_err(|e| service_error("Encrypt", e))?;

        res.ciphertext_blob
            .map(Blob::into_inner)
            .ok_or(GatewayError::MissingField {
                operation: "Encrypt",
                field: "ciphertext blob",
            })
    }
}
