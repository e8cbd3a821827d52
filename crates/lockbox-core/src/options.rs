//! Enumerations passed across the engine boundary in their wire form.

use std::fmt;

/// Supported methods for generating or referencing a store wrapping key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KeyMethod {
    /// Derive the wrapping key from a passphrase with Argon2i.
    Argon2i,
    /// Wrap with an externally managed raw key.
    Raw,
    /// No wrapping key in effect.
    #[default]
    None,
}

impl KeyMethod {
    /// Wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Argon2i => "kdf:argon2i",
            Self::Raw => "raw",
            Self::None => "none",
        }
    }

    /// Parse the wire representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "kdf:argon2i" => Some(Self::Argon2i),
            "raw" => Some(Self::Raw),
            "none" => Some(Self::None),
            _ => None,
        }
    }

    /// Whether this method needs a pass key.
    pub fn requires_pass_key(self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for KeyMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The write operations carried by the engine's single update primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum UpdateOperation {
    /// The record must not exist yet.
    Insert = 0,
    /// The record must exist; value and tags are replaced.
    Replace = 1,
    /// The record must exist; it is deleted.
    Remove = 2,
}

impl UpdateOperation {
    /// Convert to u8 for the wire.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Try to parse from u8.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Insert),
            1 => Some(Self::Replace),
            2 => Some(Self::Remove),
            _ => None,
        }
    }
}

/// Key algorithms understood at the boundary.
///
/// The set of algorithms an engine actually implements may be smaller; an
/// unimplemented algorithm is reported by the engine as `Unsupported`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAlg {
    A128Gcm,
    A256Gcm,
    A128CbcHs256,
    A256CbcHs512,
    A128Kw,
    A256Kw,
    Bls12381G1,
    Bls12381G2,
    Bls12381G1G2,
    C20P,
    XC20P,
    Ed25519,
    X25519,
    K256,
    P256,
}

impl KeyAlg {
    const ALL: [KeyAlg; 15] = [
        Self::A128Gcm,
        Self::A256Gcm,
        Self::A128CbcHs256,
        Self::A256CbcHs512,
        Self::A128Kw,
        Self::A256Kw,
        Self::Bls12381G1,
        Self::Bls12381G2,
        Self::Bls12381G1G2,
        Self::C20P,
        Self::XC20P,
        Self::Ed25519,
        Self::X25519,
        Self::K256,
        Self::P256,
    ];

    /// Wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A128Gcm => "a128gcm",
            Self::A256Gcm => "a256gcm",
            Self::A128CbcHs256 => "a128cbchs256",
            Self::A256CbcHs512 => "a256cbchs512",
            Self::A128Kw => "a128kw",
            Self::A256Kw => "a256kw",
            Self::Bls12381G1 => "bls12381g1",
            Self::Bls12381G2 => "bls12381g2",
            Self::Bls12381G1G2 => "bls12381g1g2",
            Self::C20P => "c20p",
            Self::XC20P => "xc20p",
            Self::Ed25519 => "ed25519",
            Self::X25519 => "x25519",
            Self::K256 => "k256",
            Self::P256 => "p256",
        }
    }

    /// Parse the wire representation.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|alg| alg.as_str() == s)
    }
}

impl fmt::Display for KeyAlg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log levels used by the engine's diagnostic callbacks.
pub mod log_level {
    /// Logging disabled.
    pub const OFF: i32 = 0;
    pub const ERROR: i32 = 1;
    pub const WARN: i32 = 2;
    pub const INFO: i32 = 3;
    pub const DEBUG: i32 = 4;
    pub const TRACE: i32 = 5;
    /// Passed to `set_max_log_level` to leave the current level unchanged.
    pub const UNCHANGED: i32 = -1;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_method_wire_names() {
        for method in [KeyMethod::Argon2i, KeyMethod::Raw, KeyMethod::None] {
            assert_eq!(KeyMethod::parse(method.as_str()), Some(method));
        }
        assert_eq!(KeyMethod::parse("kdf:scrypt"), None);
        assert!(!KeyMethod::None.requires_pass_key());
    }

    #[test]
    fn test_update_operation_tags() {
        assert_eq!(UpdateOperation::Insert.to_u8(), 0);
        assert_eq!(UpdateOperation::from_u8(2), Some(UpdateOperation::Remove));
        assert_eq!(UpdateOperation::from_u8(3), None);
    }

    #[test]
    fn test_key_alg_wire_names() {
        for alg in KeyAlg::ALL {
            assert_eq!(KeyAlg::parse(alg.as_str()), Some(alg));
        }
        assert_eq!(KeyAlg::parse("rsa"), None);
    }
}
