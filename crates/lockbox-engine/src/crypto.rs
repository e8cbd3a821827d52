//! Store and profile key handling.
//!
//! A store key (derived from the store's key method) wraps one profile key
//! per profile. A profile key holds a value key for ChaCha20-Poly1305
//! encryption of record fields and an index key for keyed Blake3 lookup
//! hashes of categories and names.

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use lockbox_core::KeyMethod;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Nonce size for ChaCha20-Poly1305.
const NONCE_LEN: usize = 12;

/// Salt size for Argon2i derivation.
pub const SALT_LEN: usize = 16;

/// Plaintext sealed with the store key to detect a wrong key on open.
const KEY_CHECK: &[u8] = b"lockbox-store-key-check-v1";

const RAW_KEY_CONTEXT: &str = "lockbox 2024 raw store key";

/// A 256-bit symmetric key for ChaCha20-Poly1305.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    /// Generate a new random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Encrypt under a fresh random nonce. The output is `nonce || ciphertext`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| EngineError::Encryption(e.to_string()))?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| EngineError::Encryption(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt the output of [`seal`](Self::seal).
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_LEN {
            return Err(EngineError::Encryption("Ciphertext too short".into()));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);

        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| EngineError::Encryption(e.to_string()))?;

        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| EngineError::Encryption("Error decrypting store data".into()))
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// The key protecting profile keys. `None` for stores provisioned with
/// [`KeyMethod::None`], in which case profile keys are stored unwrapped.
#[derive(Debug, Clone)]
pub struct StoreKey(Option<EncryptionKey>);

impl StoreKey {
    /// Derive the store key for `method`.
    ///
    /// `salt` is required for [`KeyMethod::Argon2i`] and ignored otherwise.
    pub fn derive(method: KeyMethod, pass_key: Option<&str>, salt: Option<&[u8]>) -> Result<Self> {
        match method {
            KeyMethod::None => Ok(Self(None)),
            KeyMethod::Raw => {
                let pass_key = pass_key
                    .filter(|k| !k.is_empty())
                    .ok_or_else(|| EngineError::Input("Raw key method requires a pass key".into()))?;
                Ok(Self(Some(parse_raw_key(pass_key)?)))
            }
            KeyMethod::Argon2i => {
                let pass_key = pass_key.ok_or_else(|| {
                    EngineError::Input("Argon2i key method requires a pass key".into())
                })?;
                let salt = salt.ok_or_else(|| {
                    EngineError::Unexpected("Missing key derivation salt".into())
                })?;
                Ok(Self(Some(derive_argon2i(pass_key.as_bytes(), salt)?)))
            }
        }
    }

    /// Protect `plaintext` with this key (or pass it through when unkeyed).
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        match &self.0 {
            Some(key) => key.seal(plaintext),
            None => Ok(plaintext.to_vec()),
        }
    }

    /// Reverse [`seal`](Self::seal).
    pub fn open(&self, wrapped: &[u8]) -> Result<Vec<u8>> {
        match &self.0 {
            Some(key) => key.open(wrapped),
            None => Ok(wrapped.to_vec()),
        }
    }

    /// The key-check blob stored alongside the configuration.
    pub fn key_check(&self) -> Result<Vec<u8>> {
        self.seal(KEY_CHECK)
    }

    /// Verify a key-check blob produced by the same store key.
    pub fn verify(&self, check: &[u8]) -> Result<()> {
        match self.open(check) {
            Ok(plain) if plain == KEY_CHECK => Ok(()),
            _ => Err(EngineError::Encryption("Store key mismatch".into())),
        }
    }

    /// Wrap a profile key for storage.
    pub fn wrap_profile_key(&self, key: &ProfileKey) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(key, &mut buf)
            .map_err(|e| EngineError::Serialization(e.to_string()))?;
        self.seal(&buf)
    }

    /// Unwrap a stored profile key.
    pub fn unwrap_profile_key(&self, wrapped: &[u8]) -> Result<ProfileKey> {
        let buf = self.open(wrapped)?;
        ciborium::from_reader(&buf[..]).map_err(|e| EngineError::Serialization(e.to_string()))
    }
}

/// Per-profile key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileKey {
    value_key: EncryptionKey,
    index_key: [u8; 32],
}

impl ProfileKey {
    /// Generate fresh profile key material.
    pub fn generate() -> Self {
        let mut index_key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut index_key);
        Self {
            value_key: EncryptionKey::generate(),
            index_key,
        }
    }

    /// Lookup hash of a category or name. `domain` separates the two.
    pub fn index_hash(&self, domain: &str, value: &str) -> Vec<u8> {
        let mut hasher = blake3::Hasher::new_keyed(&self.index_key);
        hasher.update(domain.as_bytes());
        hasher.update(&[0]);
        hasher.update(value.as_bytes());
        hasher.finalize().as_bytes().to_vec()
    }

    /// Encrypt a record field.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.value_key.seal(plaintext)
    }

    /// Decrypt a record field.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.value_key.open(ciphertext)
    }

    /// Decrypt a record field that holds UTF-8 text.
    pub fn decrypt_text(&self, ciphertext: &[u8]) -> Result<String> {
        String::from_utf8(self.decrypt(ciphertext)?)
            .map_err(|e| EngineError::Serialization(e.to_string()))
    }
}

/// Parse a hex-encoded raw store key.
pub fn parse_raw_key(encoded: &str) -> Result<EncryptionKey> {
    let bytes = hex::decode(encoded.trim())
        .map_err(|_| EngineError::Input("Invalid raw key: expected hex".into()))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| EngineError::Input("Invalid raw key: expected 32 bytes".into()))?;
    Ok(EncryptionKey::from_bytes(bytes))
}

/// Produce a raw store key, deterministically from `seed` when given.
pub fn generate_raw_key(seed: Option<&[u8]>) -> String {
    let bytes = match seed {
        Some(seed) if !seed.is_empty() => blake3::derive_key(RAW_KEY_CONTEXT, seed),
        _ => *EncryptionKey::generate().as_bytes(),
    };
    hex::encode(bytes)
}

/// Fresh random salt for Argon2i derivation.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

fn derive_argon2i(password: &[u8], salt: &[u8]) -> Result<EncryptionKey> {
    let params = Params::new(
        Params::DEFAULT_M_COST,
        Params::DEFAULT_T_COST,
        Params::DEFAULT_P_COST,
        Some(32),
    )
    .map_err(|e| EngineError::Unexpected(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2i, Version::V0x13, params);

    let mut out = [0u8; 32];
    argon2
        .hash_password_into(password, salt, &mut out)
        .map_err(|e| EngineError::Encryption(e.to_string()))?;
    Ok(EncryptionKey::from_bytes(out))
}
