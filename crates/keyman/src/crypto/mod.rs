//! AES-256-GCM bulk data encryption keyed by a data encryption key.
//!
//! This module is intentionally free of AWS dependencies. It consumes the
//! plaintext DEK served by the key manager and never persists it.
//!
//! # Ciphertext format
//!
//! ```text
//! base64( salt[64] || iv[16] || tag[16] || ciphertext )
//! ```
//!
//! The working AES key is derived per message with PBKDF2-HMAC-SHA512 from
//! the DEK and the random salt.

pub mod cipher;

pub use cipher::{decrypt, decrypt_to_string, encrypt, CipherError, EncodedBlob};
