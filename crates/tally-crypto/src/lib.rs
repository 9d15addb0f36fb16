// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TALLY - CRYPTOGRAPHY MODULE
//
// Fixed-width fingerprints for transaction ids, Merkle roots and block hashes.
// - SHA3-256 by default, SHA-256 available through `DigestAlgorithm`
// - Hex-encoded output (64 lower-case chars)
// - Pluggable credential capability for optional transaction signatures
//
// The keyed-digest credential is a placeholder: it proves nothing about
// authorship to anyone who does not already hold the key.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use digest::Digest;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sha3::Sha3_256;
use subtle::ConstantTimeEq;

/// Hex-encoded 32-byte digest.
pub type Hash = String;

/// Width of every digest in bytes.
pub const DIGEST_BYTES: usize = 32;

/// Width of every hex-encoded digest in characters.
pub const DIGEST_HEX_LEN: usize = DIGEST_BYTES * 2;

/// A deterministic fixed-width fingerprint function.
///
/// Implementations must map equal inputs to equal outputs. Collision
/// resistance is whatever the underlying function offers; callers only
/// rely on determinism and width.
pub trait DigestAlgorithm {
    /// Short name used in logs and config.
    const NAME: &'static str;

    fn digest_bytes(data: &[u8]) -> [u8; DIGEST_BYTES];
}

/// SHA3-256 (NIST FIPS 202). The default everywhere in the ledger.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha3;

impl DigestAlgorithm for Sha3 {
    const NAME: &'static str = "sha3-256";

    fn digest_bytes(data: &[u8]) -> [u8; DIGEST_BYTES] {
        Sha3_256::digest(data).into()
    }
}

/// SHA-256, kept as a drop-in alternative.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha2;

impl DigestAlgorithm for Sha2 {
    const NAME: &'static str = "sha-256";

    fn digest_bytes(data: &[u8]) -> [u8; DIGEST_BYTES] {
        Sha256::digest(data).into()
    }
}

/// Digest `data` with the default algorithm and hex-encode it.
pub fn digest(data: &[u8]) -> Hash {
    digest_with::<Sha3>(data)
}

/// Digest `data` with an explicit algorithm and hex-encode it.
pub fn digest_with<A: DigestAlgorithm>(data: &[u8]) -> Hash {
    hex::encode(A::digest_bytes(data))
}

/// Incremental input builder for structured digests.
///
/// Strings are written length-prefixed (u64 LE) and integers little-endian,
/// so adjacent fields can never be re-split into a colliding encoding.
#[derive(Debug, Default, Clone)]
pub struct DigestInput {
    buf: Vec<u8>,
}

impl DigestInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn str(mut self, value: &str) -> Self {
        self.buf
            .extend_from_slice(&(value.len() as u64).to_le_bytes());
        self.buf.extend_from_slice(value.as_bytes());
        self
    }

    pub fn u64(mut self, value: u64) -> Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn u128(mut self, value: u128) -> Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Optional strings carry a presence byte ahead of the value.
    pub fn opt_str(mut self, value: Option<&str>) -> Self {
        match value {
            Some(v) => {
                self.buf.push(1);
                self.str(v)
            }
            None => {
                self.buf.push(0);
                self
            }
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn finish(self) -> Hash {
        digest(&self.buf)
    }
}

/// True if `value` looks like a hex digest produced by this module.
pub fn is_digest_hex(value: &str) -> bool {
    value.len() == DIGEST_HEX_LEN && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Opaque signing capability attached to transactions.
///
/// The ledger never interprets signatures; it only carries them. Anything
/// implementing this trait can be substituted, including a real scheme.
pub trait Credential: Send + Sync {
    /// Identifier of the key holder, for logs.
    fn holder(&self) -> &str;

    fn sign(&self, message: &[u8]) -> String;

    fn verify(&self, message: &[u8], signature: &str) -> bool;
}

/// Placeholder credential: signature = digest(key ‖ message).
///
/// Only a holder of the same key can verify, so this is an integrity tag,
/// not a public-key signature.
#[derive(Clone, Serialize, Deserialize)]
pub struct KeyedDigestCredential {
    holder: String,
    key: Vec<u8>,
}

impl std::fmt::Debug for KeyedDigestCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedDigestCredential")
            .field("holder", &self.holder)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl KeyedDigestCredential {
    pub fn new(holder: impl Into<String>, key: impl Into<Vec<u8>>) -> Self {
        Self {
            holder: holder.into(),
            key: key.into(),
        }
    }

    fn tag(&self, message: &[u8]) -> [u8; DIGEST_BYTES] {
        let mut input = Vec::with_capacity(self.key.len() + message.len() + 8);
        input.extend_from_slice(&(self.key.len() as u64).to_le_bytes());
        input.extend_from_slice(&self.key);
        input.extend_from_slice(message);
        Sha3::digest_bytes(&input)
    }
}

impl Credential for KeyedDigestCredential {
    fn holder(&self) -> &str {
        &self.holder
    }

    fn sign(&self, message: &[u8]) -> String {
        hex::encode(self.tag(message))
    }

    fn verify(&self, message: &[u8], signature: &str) -> bool {
        let provided = match hex::decode(signature) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        if provided.len() != DIGEST_BYTES {
            return false;
        }
        let expected = self.tag(message);
        expected[..].ct_eq(&provided[..]).into()
    }
}
