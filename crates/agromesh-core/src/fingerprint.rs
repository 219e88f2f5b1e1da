//! Origination fingerprints.
//!
//! A fingerprint identifies one origination event: the originating node's
//! address and its sequence number at that moment. It is computed once by
//! the originator and carried unchanged through every relay hop, so two
//! copies of the same flood arriving by different paths are byte-identical.
//! Relays never recompute it.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::wire::{NodeAddress, FINGERPRINT_LEN};

/// SHA-256 of `address ++ decimal(sequence)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Fingerprint(pub [u8; FINGERPRINT_LEN]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    /// First 8 bytes in hex, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl From<[u8; FINGERPRINT_LEN]> for Fingerprint {
    fn from(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }
}

/// Derive the fingerprint for a packet this node is about to originate.
///
/// `src` must be the originating node's own address and `seq` its current
/// sequence value. Address "cn0001" with sequence 7 hashes the bytes "cn00017".
pub fn generate(src: &NodeAddress, seq: u8) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(src.as_bytes());
    hasher.update(seq.to_string().as_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; FINGERPRINT_LEN];
    out.copy_from_slice(&digest);
    Fingerprint(out)
}
