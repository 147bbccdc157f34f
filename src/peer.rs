//! Peer identities and the per-peer record kept in a bucket.

use std::fmt;
use std::time::Instant;

use rand::Rng as _;

use crate::key::Key;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId([u8; 32]);

impl PeerId {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::rng().fill(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub id: PeerId,
    pub key: Key,
    /// `None` means never queried; staleness comparisons treat that as
    /// infinitely old.
    pub last_successful_outbound_query: Option<Instant>,
}

impl PeerRecord {
    pub fn new(id: PeerId, last_successful_outbound_query: Option<Instant>) -> Self {
        Self {
            id,
            key: Key::from_peer(&id),
            last_successful_outbound_query,
        }
    }

    pub fn age_nanos(&self, now: Instant) -> f64 {
        match self.last_successful_outbound_query {
            Some(at) => now.saturating_duration_since(at).as_nanos() as f64,
            None => f64::INFINITY,
        }
    }
}
