//! Content identifiers: BLAKE3 digests truncated to 128 bits
//!
//! Every persisted entity (atom, composition, relation, content blob) is
//! keyed by a [`Digest`]: the first 16 bytes of a BLAKE3 hash of the
//! entity's canonical byte encoding. Digests double as seed material for
//! the geometry kernel (`geometry::hash_to_point` splits one into two
//! uniforms).
//!
//! ## Discipline
//! - **Order-sensitive and pure.** `hash(bytes)` is a function of the byte
//!   sequence alone; no process state leaks in.
//! - **Contexted hashing is a distinct domain.** `hash_with_context`
//!   absorbs the payload, then a separator tag, then a big-endian length
//!   prefix, then the context bytes. A contexted hash with an empty
//!   context therefore differs from the plain hash of the same payload.
//! - **Codepoint hashing is little-endian.** `hash_codepoint` encodes the
//!   scalar as exactly four little-endian bytes before hashing, so the id
//!   of U+0041 is stable across platforms.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::fmt;

/// Number of bytes in a [`Digest`].
pub const DIGEST_LEN: usize = 16;

/// Highest valid Unicode scalar boundary accepted by [`Digest::hash_codepoint`].
pub const MAX_CODEPOINT: u32 = 0x10FFFF;

/// Errors surfaced by digest construction and decoding.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HashError {
    /// Input to `from_hex` was not valid hex or had the wrong length.
    #[error("invalid hex digest: {0}")]
    InvalidHex(String),
    /// Codepoint beyond the Unicode codespace.
    #[error("codepoint {0:#X} exceeds U+10FFFF")]
    InvalidCodepoint(u32),
}

/// A 128-bit content identifier (BLAKE3, truncated).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest(pub [u8; DIGEST_LEN]);

impl Digest {
    /// Hash an arbitrary byte sequence.
    pub fn hash(bytes: &[u8]) -> Self {
        let full = blake3::hash(bytes);
        let mut out = [0u8; DIGEST_LEN];
        out.copy_from_slice(&full.as_bytes()[..DIGEST_LEN]);
        Digest(out)
    }

    /// Hash the little-endian 4-byte encoding of a Unicode codepoint.
    ///
    /// Rejects scalars beyond U+10FFFF; surrogates are allowed (the atom
    /// table is dense over the full 21-bit codespace, surrogate rows
    /// included).
    pub fn hash_codepoint(cp: u32) -> Result<Self, HashError> {
        if cp > MAX_CODEPOINT {
            return Err(HashError::InvalidCodepoint(cp));
        }
        Ok(Self::hash(&cp.to_le_bytes()))
    }

    /// Hash a payload bound to a context.
    ///
    /// The context is framed with a separator tag and a length prefix, so
    /// `hash_with_context(p, b"")` is distinguishable from `hash(p)` and
    /// from any split of the payload into the context.
    pub fn hash_with_context(payload: &[u8], context: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(payload);
        hasher.update(b":ctx:");
        hasher.update(&(context.len() as u64).to_be_bytes());
        hasher.update(context);
        let full = hasher.finalize();
        let mut out = [0u8; DIGEST_LEN];
        out.copy_from_slice(&full.as_bytes()[..DIGEST_LEN]);
        Digest(out)
    }

    /// Hash a sequence of digests in order (composition over atom ids,
    /// relation over composition ids).
    pub fn hash_sequence(parts: &[Digest]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for p in parts {
            hasher.update(&p.0);
        }
        let full = hasher.finalize();
        let mut out = [0u8; DIGEST_LEN];
        out.copy_from_slice(&full.as_bytes()[..DIGEST_LEN]);
        Digest(out)
    }

    /// Lowercase hex rendering (32 chars).
    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 32-char hex string back into a digest.
    pub fn from_hex(s: &str) -> Result<Self, HashError> {
        let bytes = hex::decode(s).map_err(|_| HashError::InvalidHex(s.to_owned()))?;
        if bytes.len() != DIGEST_LEN {
            return Err(HashError::InvalidHex(s.to_owned()));
        }
        let mut out = [0u8; DIGEST_LEN];
        out.copy_from_slice(&bytes);
        Ok(Digest(out))
    }

    /// Raw bytes of the digest.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Split into two 8-byte halves (seed material for geometric projection).
    #[inline]
    pub fn halves(&self) -> (u64, u64) {
        let mut lo = [0u8; 8];
        let mut hi = [0u8; 8];
        lo.copy_from_slice(&self.0[..8]);
        hi.copy_from_slice(&self.0[8..]);
        (u64::from_be_bytes(lo), u64::from_be_bytes(hi))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

// ============================================================================
// Tests
// ============================================================================
