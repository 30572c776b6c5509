//! [`DekCache`]: in-memory cache of plaintext data keys, one per master key id.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;
use zeroize::Zeroize;

/// Byte length of an AES-256 data key.
pub const DEK_LEN: usize = 32;

/// Errors produced by the DEK cache.
#[derive(Debug, Error)]
pub enum DekError {
    /// The id was never scheduled, or has not finished initialising.
    #[error("data key for {0} is not ready")]
    NotReady(String),

    /// Initialisation of this id failed.
    #[error("data key for {0} failed to initialise")]
    Failed(String),

    /// The plaintext key material has an unexpected length.
    #[error("data key has invalid length: expected {DEK_LEN} bytes, got {0}")]
    InvalidLength(usize),
}

/// Readiness of a single master key id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    /// Not part of any initialisation run.
    Absent,
    /// Remote decrypt or generate call in flight.
    Pending,
    /// Plaintext cached and announced.
    Ready,
    /// Initialisation failed for this id only.
    Failed,
}

/// Fixed-size key buffer that holds exactly [`DEK_LEN`] bytes.
///
/// The memory is zeroed when the value is dropped.
#[derive(Clone)]
pub struct DekBytes(Box<[u8; DEK_LEN]>);

impl DekBytes {
    /// Copy `bytes` into a new key buffer.
    ///
    /// # Errors
    ///
    /// Returns [`DekError::InvalidLength`] unless `bytes` is [`DEK_LEN`] long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DekError> {
        if bytes.len() != DEK_LEN {
            return Err(DekError::InvalidLength(bytes.len()));
        }
        let mut buf = Box::new([0u8; DEK_LEN]);
        buf.copy_from_slice(bytes);
        Ok(Self(buf))
    }

    /// Borrow the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; DEK_LEN] {
        &self.0
    }
}

impl Drop for DekBytes {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for DekBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DekBytes([REDACTED])")
    }
}

#[derive(Debug)]
enum Slot {
    Pending,
    Ready(DekBytes),
    Failed,
}

/// Thread-safe map of master key id → plaintext data key.
///
/// Cloning is cheap; all clones share the same map.
#[derive(Clone, Debug, Default)]
pub struct DekCache {
    inner: Arc<RwLock<HashMap<String, Slot>>>,
}

impl DekCache {
    /// Create a new, empty [`DekCache`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `key_id` as in flight. Any previously cached key is dropped.
    pub async fn mark_pending(&self, key_id: &str) {
        self.inner
            .write()
            .await
            .insert(key_id.to_owned(), Slot::Pending);
    }

    /// Cache the plaintext for `key_id` and return a copy of it.
    ///
    /// # Errors
    ///
    /// Returns [`DekError::InvalidLength`] if `key_bytes` is not [`DEK_LEN`]
    /// bytes; the slot is left untouched.
    pub async fn store(&self, key_id: &str, key_bytes: &[u8]) -> Result<DekBytes, DekError> {
        let dek = DekBytes::from_slice(key_bytes)?;
        self.inner
            .write()
            .await
            .insert(key_id.to_owned(), Slot::Ready(dek.clone()));
        Ok(dek)
    }

    /// Mark `key_id` as failed, evicting any cached plaintext.
    pub async fn mark_failed(&self, key_id: &str) {
        self.inner
            .write()
            .await
            .insert(key_id.to_owned(), Slot::Failed);
    }

    /// Current readiness of `key_id`.
    pub async fn state(&self, key_id: &str) -> ReadinessState {
        match self.inner.read().await.get(key_id) {
            None => ReadinessState::Absent,
            Some(Slot::Pending) => ReadinessState::Pending,
            Some(Slot::Ready(_)) => ReadinessState::Ready,
            Some(Slot::Failed) => ReadinessState::Failed,
        }
    }

    /// Borrow a clone of the data key for `key_id`.
    ///
    /// # Errors
    ///
    /// Returns [`DekError::NotReady`] for absent or pending ids and
    /// [`DekError::Failed`] for failed ones.
    pub async fn get(&self, key_id: &str) -> Result<DekBytes, DekError> {
        match self.inner.read().await.get(key_id) {
            Some(Slot::Ready(dek)) => Ok(dek.clone()),
            Some(Slot::Failed) => Err(DekError::Failed(key_id.to_owned())),
            Some(Slot::Pending) | None => Err(DekError::NotReady(key_id.to_owned())),
        }
    }

    /// Ids whose data key is currently cached, sorted.
    pub async fn ready_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .read()
            .await
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}
