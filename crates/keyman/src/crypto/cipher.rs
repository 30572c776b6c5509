//! AES-256-GCM encryption and decryption of arbitrary payloads.
//!
//! Every call to [`encrypt`] draws a fresh salt and IV from the OS CSPRNG, so
//! encrypting the same plaintext twice under the same DEK yields different
//! output. Decryption verifies the GCM tag before releasing any plaintext.

use aes_gcm::{
    aead::{consts::U16, rand_core::RngCore, AeadInPlace, KeyInit, OsRng},
    aes::Aes256,
    AesGcm, Nonce, Tag,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::Sha512;
use thiserror::Error;
use zeroize::Zeroizing;

/// Byte length of the PBKDF2 salt prepended to every blob.
pub const SALT_LEN: usize = 64;

/// Byte length of the GCM initialisation vector.
pub const IV_LEN: usize = 16;

/// Byte length of the GCM authentication tag.
pub const TAG_LEN: usize = 16;

/// Byte length of the derived working key (AES-256).
pub const DERIVED_KEY_LEN: usize = 32;

/// PBKDF2-HMAC-SHA512 iteration count.
pub const PBKDF2_ROUNDS: u32 = 2145;

const HEADER_LEN: usize = SALT_LEN + IV_LEN + TAG_LEN;

/// AES-256-GCM with a 128-bit nonce.
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// Errors produced by the cipher layer.
#[derive(Debug, Error)]
pub enum CipherError {
    /// The key passed in was empty.
    #[error("encryption key must not be empty")]
    EmptyKey,

    /// The encoded blob is not base64 or is too short to hold the header.
    #[error("invalid encoded blob format")]
    InvalidFormat,

    /// GCM tag verification failed: tampered data or wrong key.
    #[error("authentication tag mismatch")]
    AuthenticationTagMismatch,

    /// Decrypted bytes are not valid UTF-8.
    #[error("decrypted data is not valid UTF-8")]
    InvalidUtf8,

    /// The AEAD primitive refused to encrypt.
    #[error("aead encryption failed")]
    AeadFailure,
}

/// A parsed encrypted blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBlob {
    pub salt: [u8; SALT_LEN],
    pub iv: [u8; IV_LEN],
    pub tag: [u8; TAG_LEN],
    pub ciphertext: Vec<u8>,
}

impl EncodedBlob {
    /// Encode as `base64(salt || iv || tag || ciphertext)`.
    pub fn to_string_repr(&self) -> String {
        let mut raw = Vec::with_capacity(HEADER_LEN + self.ciphertext.len());
        raw.extend_from_slice(&self.salt);
        raw.extend_from_slice(&self.iv);
        raw.extend_from_slice(&self.tag);
        raw.extend_from_slice(&self.ciphertext);
        STANDARD.encode(raw)
    }

    /// Parse the base64 text form, slicing the fixed-width header.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::InvalidFormat`] if `s` is not base64 or decodes
    /// to fewer than the 96 header bytes.
    pub fn from_str(s: &str) -> Result<Self, CipherError> {
        let raw = STANDARD
            .decode(s.trim())
            .map_err(|_| CipherError::InvalidFormat)?;
        if raw.len() < HEADER_LEN {
            return Err(CipherError::InvalidFormat);
        }
        let (salt, rest) = raw.split_at(SALT_LEN);
        let (iv, rest) = rest.split_at(IV_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);

        let mut blob = Self {
            salt: [0u8; SALT_LEN],
            iv: [0u8; IV_LEN],
            tag: [0u8; TAG_LEN],
            ciphertext: ciphertext.to_vec(),
        };
        blob.salt.copy_from_slice(salt);
        blob.iv.copy_from_slice(iv);
        blob.tag.copy_from_slice(tag);
        Ok(blob)
    }
}

/// Encrypt `plaintext` under `key` and return the base64 text form.
///
/// # Errors
///
/// Returns [`CipherError::EmptyKey`] if `key` is empty.
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<String, CipherError> {
    seal(plaintext, key).map(|blob| blob.to_string_repr())
}

/// Encrypt `plaintext` under `key`, returning the parsed blob.
///
/// # Errors
///
/// Returns [`CipherError::EmptyKey`] if `key` is empty.
pub fn seal(plaintext: &[u8], key: &[u8]) -> Result<EncodedBlob, CipherError> {
    let mut salt = [0u8; SALT_LEN];
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut iv);

    let cipher = build_cipher(key, &salt)?;
    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::<U16>::from_slice(&iv), b"", &mut buffer)
        .map_err(|_| CipherError::AeadFailure)?;

    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(&tag);
    Ok(EncodedBlob {
        salt,
        iv,
        tag: tag_bytes,
        ciphertext: buffer,
    })
}

/// Decrypt a base64 blob produced by [`encrypt`].
///
/// # Errors
///
/// Returns [`CipherError::InvalidFormat`] for malformed input and
/// [`CipherError::AuthenticationTagMismatch`] if the blob was altered or `key`
/// is wrong. No plaintext is returned in either case.
pub fn decrypt(encoded: &str, key: &[u8]) -> Result<Vec<u8>, CipherError> {
    let blob = EncodedBlob::from_str(encoded)?;
    open(&blob, key)
}

/// Decrypt a base64 blob and interpret the plaintext as UTF-8.
///
/// # Errors
///
/// As [`decrypt`], plus [`CipherError::InvalidUtf8`].
pub fn decrypt_to_string(encoded: &str, key: &[u8]) -> Result<String, CipherError> {
    String::from_utf8(decrypt(encoded, key)?).map_err(|_| CipherError::InvalidUtf8)
}

/// Decrypt an already-parsed blob.
///
/// # Errors
///
/// See [`decrypt`].
pub fn open(blob: &EncodedBlob, key: &[u8]) -> Result<Vec<u8>, CipherError> {
    let cipher = build_cipher(key, &blob.salt)?;
    let mut buffer = blob.ciphertext.clone();
    cipher
        .decrypt_in_place_detached(
            Nonce::<U16>::from_slice(&blob.iv),
            b"",
            &mut buffer,
            Tag::from_slice(&blob.tag),
        )
        .map_err(|_| CipherError::AuthenticationTagMismatch)?;
    Ok(buffer)
}

fn build_cipher(key: &[u8], salt: &[u8]) -> Result<Aes256Gcm16, CipherError> {
    if key.is_empty() {
        return Err(CipherError::EmptyKey);
    }
    let mut derived = Zeroizing::new([0u8; DERIVED_KEY_LEN]);
    pbkdf2::pbkdf2_hmac::<Sha512>(key, salt, PBKDF2_ROUNDS, &mut derived[..]);
    Aes256Gcm16::new_from_slice(&derived[..]).map_err(|_| CipherError::EmptyKey)
}
