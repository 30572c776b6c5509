//! Key registry: the durable map of master key id → wrapped data key.
//!
//! # Persistence model
//!
//! - One JSON file holds the whole registry. It is read wholesale on load and
//!   rewritten wholesale on every save; there are no partial or append writes.
//! - Only ciphertext blobs and auxiliary items are ever written. Plaintext
//!   key material never reaches this module.
//! - There is no cross-process locking. Two managers pointed at the same file
//!   can overwrite each other's entries; run a single writer per file.

pub mod store;

pub use store::{CorruptPolicy, RegistryError, RegistryStore};
