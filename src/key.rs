//! The 256-bit XOR keyspace. Peers and lookup targets are hashed into it,
//! so every node derives the same key for the same input; distance is
//! bitwise XOR read as a big-endian unsigned integer, smaller = closer.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::peer::PeerId;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key([u8; 32]);

impl Key {
    pub const BITS: u32 = 256;

    pub fn from_peer(peer: &PeerId) -> Self {
        Key(Sha256::digest(peer.as_bytes()).into())
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Key(Sha256::digest(bytes).into())
    }

    #[cfg(test)]
    pub(crate) fn new(raw: [u8; 32]) -> Self {
        Key(raw)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn distance(&self, other: &Key) -> Distance {
        let mut xor = [0u8; 32];
        for (i, d) in xor.iter_mut().enumerate() {
            *d = self.0[i] ^ other.0[i];
        }
        Distance(xor)
    }

    pub fn common_prefix_len(&self, other: &Key) -> u32 {
        for (i, (a, b)) in self.0.iter().zip(other.0.iter()).enumerate() {
            let xor = a ^ b;
            if xor != 0 {
                return i as u32 * 8 + xor.leading_zeros();
            }
        }
        Self::BITS
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

/// Byte-wise lexicographic ordering, i.e. big-endian numeric order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Distance([u8; 32]);

impl fmt::Debug for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Distance({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}
