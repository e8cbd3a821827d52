//! Local key material.
//!
//! Keys are opaque to the client: it only ever sees a handle, the algorithm
//! name and the public bytes.

use chacha20poly1305::{aead::KeyInit, ChaCha20Poly1305};
use ed25519_dalek::SigningKey;
use lockbox_core::KeyAlg;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use crate::error::{EngineError, Result};

const THUMBPRINT_CONTEXT: &str = "lockbox 2024 symmetric key thumbprint";

/// A key held by the engine.
#[derive(Clone, Serialize, Deserialize)]
pub struct LocalKey {
    alg: String,
    secret: Vec<u8>,
    #[serde(skip)]
    ephemeral: bool,
}

impl std::fmt::Debug for LocalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKey")
            .field("alg", &self.alg)
            .field("ephemeral", &self.ephemeral)
            .finish_non_exhaustive()
    }
}

impl LocalKey {
    /// Generate a new random key.
    pub fn generate(alg: &str, ephemeral: bool) -> Result<Self> {
        let parsed = KeyAlg::parse(alg)
            .ok_or_else(|| EngineError::Input(format!("Unknown key algorithm: {}", alg)))?;

        let secret = match parsed {
            KeyAlg::Ed25519 => SigningKey::generate(&mut OsRng).to_bytes().to_vec(),
            KeyAlg::X25519 => StaticSecret::random_from_rng(OsRng).to_bytes().to_vec(),
            KeyAlg::C20P => ChaCha20Poly1305::generate_key(&mut OsRng).to_vec(),
            other => {
                return Err(EngineError::Unsupported(format!(
                    "Unsupported key algorithm: {}",
                    other
                )))
            }
        };

        Ok(Self {
            alg: parsed.as_str().to_owned(),
            secret,
            ephemeral,
        })
    }

    /// The algorithm name.
    pub fn algorithm(&self) -> &str {
        &self.alg
    }

    /// The public half of an asymmetric key.
    pub fn public_bytes(&self) -> Result<Vec<u8>> {
        match KeyAlg::parse(&self.alg) {
            Some(KeyAlg::Ed25519) => {
                let signing = SigningKey::from_bytes(&self.secret_array()?);
                Ok(signing.verifying_key().to_bytes().to_vec())
            }
            Some(KeyAlg::X25519) => {
                let secret = StaticSecret::from(self.secret_array()?);
                Ok(X25519PublicKey::from(&secret).as_bytes().to_vec())
            }
            _ => Err(EngineError::Unsupported(format!(
                "Key algorithm {} has no public component",
                self.alg
            ))),
        }
    }

    /// Hex thumbprint used to look keys up by identity.
    pub fn thumbprint(&self) -> Result<String> {
        let digest = match self.public_bytes() {
            Ok(public) => blake3::hash(&public),
            Err(EngineError::Unsupported(_)) => {
                blake3::Hash::from(blake3::derive_key(THUMBPRINT_CONTEXT, &self.secret))
            }
            Err(err) => return Err(err),
        };
        Ok(digest.to_hex().to_string())
    }

    fn secret_array(&self) -> Result<[u8; 32]> {
        self.secret
            .as_slice()
            .try_into()
            .map_err(|_| EngineError::Unexpected("Invalid key length".into()))
    }
}

/// The value of a key record: the key itself plus its metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredKey {
    pub key: LocalKey,
    pub metadata: Option<String>,
}

impl StoredKey {
    /// Encode with CBOR.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| EngineError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Decode a stored key record value.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let stored: Self =
            ciborium::from_reader(bytes).map_err(|e| EngineError::Serialization(e.to_string()))?;
        if KeyAlg::parse(&stored.key.alg).is_none() {
            return Err(EngineError::Serialization(format!(
                "Unknown stored key algorithm: {}",
                stored.key.alg
            )));
        }
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_supported() {
        for alg in ["ed25519", "x25519", "c20p"] {
            let key = LocalKey::generate(alg, false).unwrap();
            assert_eq!(key.algorithm(), alg);
        }
    }

    #[test]
    fn test_generate_unsupported_and_unknown() {
        assert!(matches!(
            LocalKey::generate("p256", false),
            Err(EngineError::Unsupported(_))
        ));
        assert!(matches!(
            LocalKey::generate("rsa", false),
            Err(EngineError::Input(_))
        ));
    }

    #[test]
    fn test_public_bytes() {
        let ed = LocalKey::generate("ed25519", true).unwrap();
        assert_eq!(ed.public_bytes().unwrap().len(), 32);

        let sym = LocalKey::generate("c20p", true).unwrap();
        assert!(matches!(sym.public_bytes(), Err(EngineError::Unsupported(_))));
        assert_eq!(sym.thumbprint().unwrap().len(), 64);
    }

    #[test]
    fn test_stored_key_preserves_identity() {
        let key = LocalKey::generate("x25519", false).unwrap();
        let stored = StoredKey {
            key: key.clone(),
            metadata: Some("meta".into()),
        };
        let restored = StoredKey::decode(&stored.encode().unwrap()).unwrap();
        assert_eq!(restored.metadata.as_deref(), Some("meta"));
        assert_eq!(restored.key.public_bytes().unwrap(), key.public_bytes().unwrap());
        assert_eq!(restored.key.thumbprint().unwrap(), key.thumbprint().unwrap());
    }

    #[test]
    fn test_stored_key_rejects_garbage() {
        assert!(matches!(
            StoredKey::decode(b"not cbor"),
            Err(EngineError::Serialization(_))
        ));
    }
}
