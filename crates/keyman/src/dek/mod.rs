//! DEK (Data Encryption Key) lifecycle: look up, unwrap or generate, cache, notify.
//!
//! # Lifecycle
//!
//! 1. [`KeyManager::from_config`] resolves IAM credentials and builds the KMS
//!    gateway. Failure here is fatal; no partially built manager is returned.
//! 2. [`KeyManager::start`] loads the key registry (a missing file is an empty
//!    registry) and, for each configured master key id, spawns one task:
//!    - id present in the registry: unwrap its stored ciphertext via KMS;
//!    - id absent: ask KMS for a new data key, persist the ciphertext to the
//!      registry, then cache the plaintext and announce it.
//! 3. Each task reports exactly one [`KeyEvent`] on the returned [`KeyEvents`]
//!    channel. Tasks complete independently and in any order.
//!
//! # Security invariants
//!
//! - Plaintext data keys live only in [`DekCache`] and in the [`DekBytes`]
//!   copies handed to consumers. They are **never** written to the registry,
//!   logged, or included in traces.
//! - A registry entry whose unwrap fails is never replaced by a freshly
//!   generated key; the old ciphertext stays on disk untouched.
//! - A generated key is cached and announced only after its ciphertext is on
//!   disk, so nothing is ever encrypted under a key that cannot be recovered.
//! - An id that gained a registry entry while its key was being generated
//!   keeps that entry; the new key is discarded and the stored one unwrapped.

pub mod events;
pub mod store;

pub use events::{InitSummary, KeyEvent, KeyEvents};
pub use store::{DekBytes, DekCache, DekError, ReadinessState, DEK_LEN};

use std::collections::BTreeMap;
use std::sync::Arc;

use common::{KeyError, RegistryDocument, RegistryEntry};
use tokio::sync::{mpsc, Mutex};
use tracing::{info, instrument, warn};
use zeroize::Zeroizing;

use crate::aws::AwsClients;
use crate::config::Config;
use crate::kms::{
    AwsKmsGateway, EncryptionContext, GatewayError, KmsGateway, MasterKeyParams,
    MAX_DIRECT_PAYLOAD,
};
use crate::registry::{RegistryError, RegistryStore};

/// Registry entry holding the master key id used when none is configured.
pub const DEFAULT_MASTER_KEY_ENTRY: &str = "defaultMasterKeyId";

/// Envelope-encryption key lifecycle manager.
///
/// Cheap to clone; clones share the cache, the registry and the gateway.
#[derive(Clone)]
pub struct KeyManager {
    inner: Arc<Inner>,
}

struct Inner {
    gateway: Arc<dyn KmsGateway>,
    registry: Mutex<RegistryStore>,
    cache: DekCache,
    master_key_ids: Vec<String>,
    master_key_params: MasterKeyParams,
}

impl KeyManager {
    /// Assemble a manager from an already-built gateway and registry store.
    ///
    /// Duplicate master key ids are dropped, keeping the first occurrence.
    pub fn new(
        gateway: Arc<dyn KmsGateway>,
        registry: RegistryStore,
        master_key_ids: Vec<String>,
        master_key_params: MasterKeyParams,
    ) -> Self {
        let mut unique: Vec<String> = Vec::with_capacity(master_key_ids.len());
        for id in master_key_ids {
            if !unique.contains(&id) {
                unique.push(id);
            }
        }
        let master_key_ids = unique;

        Self {
            inner: Arc::new(Inner {
                gateway,
                registry: Mutex::new(registry),
                cache: DekCache::new(),
                master_key_ids,
                master_key_params,
            }),
        }
    }

    /// Resolve credentials, build the AWS KMS gateway and the registry store.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::CredentialsUnavailable`] if no usable credentials
    /// can be resolved.
    pub async fn from_config(cfg: &Config) -> Result<Self, KeyError> {
        let source = cfg
            .credential_source()
            .map_err(|e| KeyError::CredentialsUnavailable(e.to_string()))?;
        let creds = source.resolve().await?;
        let clients = AwsClients::init(&creds, &cfg.aws_region, cfg.kms_endpoint()).await;

        Ok(Self::new(
            Arc::new(AwsKmsGateway::new(&clients)),
            RegistryStore::new(&cfg.registry_path, cfg.registry_corrupt_policy),
            cfg.master_key_ids(),
            cfg.master_key_params(),
        ))
    }

    /// Load the registry and schedule one unwrap-or-generate task per master key id.
    ///
    /// Returns as soon as the tasks are spawned. Calling `start` again re-reads
    /// the registry and re-announces every id; ids persisted by an earlier run
    /// are unwrapped rather than regenerated.
    ///
    /// # Errors
    ///
    /// Fails with a fatal [`KeyError`] if the registry cannot be loaded or no
    /// master key id is configured and a default one cannot be created.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<KeyEvents, KeyError> {
        let document = {
            let mut registry = self.inner.registry.lock().await;
            registry.load().await?.clone()
        };
        let key_ids = self.resolve_master_key_ids(&document).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        for key_id in &key_ids {
            self.inner.cache.mark_pending(key_id).await;

            let inner = Arc::clone(&self.inner);
            let tx = tx.clone();
            let key_id = key_id.clone();
            match document.get(&key_id).cloned() {
                Some(entry) => {
                    info!(key_id = %key_id, "stored data key found; unwrapping via KMS");
                    tokio::spawn(async move {
                        let event = inner.unwrap_stored(key_id, entry).await;
                        let _ = tx.send(event);
                    });
                }
                None => {
                    info!(key_id = %key_id, "no stored data key; generating a new one");
                    tokio::spawn(async move {
                        let event = inner.generate_new(key_id).await;
                        let _ = tx.send(event);
                    });
                }
            }
        }

        Ok(KeyEvents::new(rx, key_ids))
    }

    /// Borrow a copy of the plaintext data key for `key_id`.
    ///
    /// # Errors
    ///
    /// Returns a [`DekError`] unless the id is ready.
    pub async fn key(&self, key_id: &str) -> Result<DekBytes, DekError> {
        self.inner.cache.get(key_id).await
    }

    /// Readiness of `key_id`.
    pub async fn state(&self, key_id: &str) -> ReadinessState {
        self.inner.cache.state(key_id).await
    }

    /// Ids with a cached data key, sorted.
    pub async fn ready_key_ids(&self) -> Vec<String> {
        self.inner.cache.ready_ids().await
    }

    /// Store auxiliary named values in the registry file next to the wrapped keys.
    ///
    /// The file is rewritten and read back before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Registry`] if the file cannot be written or verified.
    pub async fn save_item(&self, items: BTreeMap<String, serde_json::Value>) -> Result<(), KeyError> {
        let entries: RegistryDocument = items
            .into_iter()
            .map(|(name, value)| (name, RegistryEntry::Item(value)))
            .collect();
        self.inner.persist(entries).await.map_err(KeyError::from)
    }

    /// Snapshot of the registry as last loaded or saved.
    pub async fn registry_snapshot(&self) -> RegistryDocument {
        self.inner.registry.lock().await.entries().clone()
    }

    /// Encrypt a small payload (at most [`MAX_DIRECT_PAYLOAD`] bytes) directly
    /// under a master key, bypassing the data keys.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PayloadTooLarge`] without calling KMS for
    /// oversized payloads, or the KMS failure.
    pub async fn encrypt_small(
        &self,
        key_id: &str,
        plaintext: &[u8],
        context: Option<EncryptionContext>,
    ) -> Result<Vec<u8>, GatewayError> {
        if plaintext.len() > MAX_DIRECT_PAYLOAD {
            return Err(GatewayError::PayloadTooLarge(plaintext.len()));
        }
        self.inner
            .gateway
            .encrypt(key_id.to_owned(), plaintext.to_vec(), context)
            .await
    }

    /// Decrypt a payload produced by [`KeyManager::encrypt_small`]. The context
    /// must match the one used for encryption.
    ///
    /// # Errors
    ///
    /// Returns the KMS failure.
    pub async fn decrypt_small(
        &self,
        ciphertext_blob: &[u8],
        context: Option<EncryptionContext>,
    ) -> Result<Zeroizing<Vec<u8>>, GatewayError> {
        self.inner
            .gateway
            .decrypt(ciphertext_blob.to_vec(), context)
            .await
    }

    async fn resolve_master_key_ids(
        &self,
        document: &RegistryDocument,
    ) -> Result<Vec<String>, KeyError> {
        if !self.inner.master_key_ids.is_empty() {
            return Ok(self.inner.master_key_ids.clone());
        }

        if let Some(key_id) = document
            .get(DEFAULT_MASTER_KEY_ENTRY)
            .and_then(RegistryEntry::as_str)
            .filter(|id| !id.trim().is_empty())
        {
            info!(key_id = %key_id, "using default master key recorded in registry");
            return Ok(vec![key_id.to_owned()]);
        }

        let key_id = self
            .inner
            .gateway
            .create_master_key(self.inner.master_key_params.clone())
            .await
            .map_err(|e| KeyError::MasterKeyCreation(e.to_string()))?;
        info!(key_id = %key_id, "created default master key");

        self.save_item(BTreeMap::from([(
            DEFAULT_MASTER_KEY_ENTRY.to_owned(),
            serde_json::Value::String(key_id.clone()),
        )]))
        .await?;
        Ok(vec![key_id])
    }
}

enum Persisted {
    Saved,
    AlreadyStored(RegistryEntry),
}

impl Inner {
    async fn unwrap_stored(&self, key_id: String, entry: RegistryEntry) -> KeyEvent {
        let decryption_error = |detail: String| KeyError::KeyDecryption {
            key_id: key_id.clone(),
            detail,
        };

        let Some(ciphertext) = entry.as_wrapped_key() else {
            let error = decryption_error("registry entry is not a wrapped key blob".into());
            return self.fail(key_id, error).await;
        };

        let plaintext = match self.gateway.decrypt(ciphertext.to_vec(), None).await {
            Ok(p) => p,
            Err(e) => {
                let error = decryption_error(e.to_string());
                return self.fail(key_id, error).await;
            }
        };

        match self.cache.store(&key_id, &plaintext[..]).await {
            Ok(key) => {
                info!(key_id = %key_id, "data key ready");
                KeyEvent::Ready { key_id, key }
            }
            Err(e) => {
                let error = decryption_error(e.to_string());
                self.fail(key_id, error).await
            }
        }
    }

    async fn generate_new(&self, key_id: String) -> KeyEvent {
        let generation_error = |detail: String| KeyError::RemoteGeneration {
            key_id: key_id.clone(),
            detail,
        };

        let data_key = match self.gateway.generate_data_key(key_id.clone()).await {
            Ok(k) => k,
            Err(e) => {
                let error = generation_error(e.to_string());
                return self.fail(key_id, error).await;
            }
        };

        // The slot stays pending until the ciphertext is durable.
        let fresh = match DekBytes::from_slice(&data_key.plaintext[..]) {
            Ok(k) => k,
            Err(e) => {
                let error = generation_error(e.to_string());
                return self.fail(key_id, error).await;
            }
        };

        match self.persist_new_key(&key_id, data_key.ciphertext_blob).await {
            Ok(Persisted::Saved) => {}
            Ok(Persisted::AlreadyStored(entry)) => {
                drop(fresh);
                info!(key_id = %key_id, "registry already holds a data key; discarding the new one");
                return self.unwrap_stored(key_id, entry).await;
            }
            Err(e) => {
                let error = KeyError::Persistence {
                    key_id: key_id.clone(),
                    detail: e.to_string(),
                };
                return self.fail(key_id, error).await;
            }
        }

        match self.cache.store(&key_id, fresh.as_bytes()).await {
            Ok(key) => {
                info!(key_id = %key_id, "new data key generated, persisted and ready");
                KeyEvent::Ready { key_id, key }
            }
            Err(e) => {
                let error = generation_error(e.to_string());
                self.fail(key_id, error).await
            }
        }
    }

    /// Write a freshly wrapped key unless the registry already has an entry
    /// under `key_id`. The check and the write happen under one lock.
    async fn persist_new_key(
        &self,
        key_id: &str,
        ciphertext_blob: Vec<u8>,
    ) -> Result<Persisted, RegistryError> {
        let mut registry = self.registry.lock().await;
        if let Some(existing) = registry.entries().get(key_id) {
            return Ok(Persisted::AlreadyStored(existing.clone()));
        }
        let entry = RegistryDocument::from([(
            key_id.to_owned(),
            RegistryEntry::wrapped_key(ciphertext_blob),
        )]);
        registry.save(entry).await?;
        Ok(Persisted::Saved)
    }

    async fn persist(&self, entries: RegistryDocument) -> Result<(), RegistryError> {
        self.registry.lock().await.save(entries).await
    }

    async fn fail(&self, key_id: String, error: KeyError) -> KeyEvent {
        self.cache.mark_failed(&key_id).await;
        warn!(key_id = %key_id, error = %error, "{}", error.description());
        KeyEvent::Failed { key_id, error }
    }
}
