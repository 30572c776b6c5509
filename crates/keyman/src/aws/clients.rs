//! AWS SDK client bundle built from resolved IAM credentials.

use aws_config::BehaviorVersion;
use aws_sdk_kms::config::{Credentials, Region};
use tracing::info;

use super::IamCredentials;

/// Bundle of AWS SDK clients sharing one resolved configuration.
#[derive(Clone)]
pub struct AwsClients {
    /// KMS client used to wrap and unwrap data keys.
    pub kms: aws_sdk_kms::Client,
}

impl AwsClients {
    /// Initialise the KMS client.
    ///
    /// A region pinned in `creds` wins over `default_region`. When
    /// `endpoint_url` is set the client targets it instead of the public AWS
    /// endpoint (useful for local KMS emulators).
    pub async fn init(
        creds: &IamCredentials,
        default_region: &str,
        endpoint_url: Option<&str>,
    ) -> Self {
        let region = creds
            .region
            .clone()
            .unwrap_or_else(|| default_region.to_owned());

        let provider = Credentials::new(
            creds.access_key_id.clone(),
            creds.secret_access_key.clone(),
            None,
            None,
            "keyman-iam",
        );

        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.clone()))
            .credentials_provider(provider)
            .load()
            .await;

        let mut builder = aws_sdk_kms::config::Builder::from(&config);
        if let Some(url) = endpoint_url {
            builder = builder.endpoint_url(url);
        }

        info!(region = %region, custom_endpoint = endpoint_url.is_some(), "KMS client initialised");
        Self {
            kms: aws_sdk_kms::Client::from_conf(builder.build()),
        }
    }
}
