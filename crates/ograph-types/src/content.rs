use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// 64-bit content key of a data buffer.
///
/// Two buffers with bit-identical content always produce the same key, which
/// is what lets the saver store shared payloads once. The zero key is reserved
/// for "no buffer" and is never produced by [`ContentKey::of`].
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentKey(u64);

impl ContentKey {
    /// Compute the key of a byte block.
    pub fn of(data: &[u8]) -> Self {
        ContentHasher::BUFFER.key(data)
    }

    /// Wrap a raw stored value.
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// The null key.
    pub const fn null() -> Self {
        Self(0)
    }

    /// Returns `true` for the null key.
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Raw value as stored on disk.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Hex-encoded representation (16 characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_be_bytes())
    }

    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        let arr: [u8; 8] = bytes.as_slice().try_into().map_err(|_| TypeError::InvalidLength {
            expected: 8,
            actual: bytes.len(),
        })?;
        Ok(Self(u64::from_be_bytes(arr)))
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentKey({})", self.to_hex())
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Domain-separated BLAKE3 hasher truncated to 64 bits.
///
/// The domain tag keeps buffer keys and property fingerprints from colliding
/// with each other even when they hash identical bytes.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for data buffer content.
    pub const BUFFER: Self = Self {
        domain: "ograph-buffer-v1",
    };
    /// Hasher for property fingerprints.
    pub const PROPERTY: Self = Self {
        domain: "ograph-property-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        let digest = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest.as_bytes()[..8]);
        u64::from_le_bytes(head)
    }

    /// Hash into a non-null content key.
    pub fn key(&self, data: &[u8]) -> ContentKey {
        ContentKey(self.hash(data).max(1))
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}

/// Structural fingerprint of a `(class, type, property)` triple.
pub fn property_fingerprint(class: &str, type_name: &str, property: &str) -> u64 {
    let mut text = String::with_capacity(class.len() + type_name.len() + property.len() + 2);
    text.push_str(class);
    text.push('\0');
    text.push_str(type_name);
    text.push('\0');
    text.push_str(property);
    ContentHasher::PROPERTY.hash(text.as_bytes())
}
