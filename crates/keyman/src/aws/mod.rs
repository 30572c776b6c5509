//! AWS credential resolution and SDK client initialisation.
//!
//! Credentials are resolved once, either from a JSON credentials file or from
//! static values, and fed straight into the KMS client. Nothing here is
//! process-global: each key manager owns its own [`AwsClients`].

pub mod clients;
pub mod credentials;

pub use clients::AwsClients;
pub use credentials::{CredentialSource, IamCredentials};
