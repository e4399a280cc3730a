//! 32-byte Keccak-256 digest.
//!
//! Every node of the state trie is addressed by the hash of its encoded bytes,
//! so [`H256`] doubles as the storage key for trie nodes and contract code.

use crate::{Error, Result};
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;

/// Size of a hash in bytes
pub const HASH_SIZE: usize = 32;

/// Root hash of an empty Merkle Patricia Trie, `keccak256(rlp(""))`.
pub const EMPTY_TRIE_ROOT: H256 = H256([
    0x56, 0xe8, 0x1f, 0x17, 0x1b, 0xcc, 0x55, 0xa6, 0xff, 0x83, 0x45, 0xe6, 0x92, 0xc0, 0xf8, 0x6e,
    0x5b, 0x48, 0xe0, 0x1b, 0x99, 0x6c, 0xad, 0xc0, 0x01, 0x62, 0x2f, 0xb5, 0xe3, 0x63, 0xb4, 0x21,
]);

/// Code hash of an account without code, `keccak256("")`.
pub const EMPTY_CODE_HASH: H256 = H256([
    0xc5, 0xd2, 0x46, 0x01, 0x86, 0xf7, 0x23, 0x3c, 0x92, 0x7e, 0x7d, 0xb2, 0xdc, 0xc7, 0x03, 0xc0,
    0xe5, 0x00, 0xb6, 0x53, 0xca, 0x82, 0x27, 0x3b, 0x7b, 0xfa, 0xd8, 0x04, 0x5d, 0x85, 0xa4, 0x70,
]);

/// Keccak-256 digest of a trie node, code blob or block header.
///
/// # Example
///
/// ```rust
/// use protocore_types::H256;
///
/// let hash = H256::keccak256(b"node bytes");
/// let parsed: H256 = hash.to_hex().parse().unwrap();
/// assert_eq!(hash, parsed);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct H256([u8; HASH_SIZE]);

impl H256 {
    /// The all-zero hash.
    pub const ZERO: Self = Self([0u8; HASH_SIZE]);

    /// Copy a digest out of `slice`, which must be exactly 32 bytes
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        let bytes: [u8; HASH_SIZE] = slice.try_into().map_err(|_| Error::InvalidLength {
            expected: HASH_SIZE,
            actual: slice.len(),
        })?;
        Ok(Self(bytes))
    }

    /// Keccak-256 of `data`, the key a trie node or code blob is stored under
    pub fn keccak256(data: &[u8]) -> Self {
        let mut out = [0u8; HASH_SIZE];
        out.copy_from_slice(&Keccak256::digest(data));
        Self(out)
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether every byte is zero
    pub fn is_zero(&self) -> bool {
        self == &Self::ZERO
    }

    /// Parses a hash from hex, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);

        if s.len() != HASH_SIZE * 2 {
            return Err(Error::InvalidHash(format!(
                "expected 64 hex characters, got {}",
                s.len()
            )));
        }

        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes)
    }

    /// `0x`-prefixed lowercase hex
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for H256 {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl AsRef<[u8]> for H256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for H256 {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for H256 {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl Encodable for H256 {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.encoder().encode_value(&self.0);
    }
}

impl Decodable for H256 {
    fn decode(rlp: &Rlp<'_>) -> std::result::Result<Self, DecoderError> {
        rlp.decoder().decode_value(|bytes| {
            bytes
                .try_into()
                .map(Self)
                .map_err(|_| DecoderError::RlpInvalidLength)
        })
    }
}
