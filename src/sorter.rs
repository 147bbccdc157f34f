use crate::bucket::Bucket;
use crate::key::{Distance, Key};
use crate::peer::PeerId;

/// Distances are computed as candidates are appended, so the caller can
/// drop any lock over the table before the final sort runs.
pub(crate) struct DistanceSorter {
    target: Key,
    peers: Vec<(PeerId, Distance)>,
}

impl DistanceSorter {
    pub fn new(target: Key, capacity: usize) -> Self {
        Self {
            target,
            peers: Vec::with_capacity(capacity),
        }
    }

    pub fn append_bucket(&mut self, bucket: &Bucket) {
        for record in bucket.records() {
            self.peers.push((record.id, record.key.distance(&self.target)));
        }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn into_sorted(mut self, count: usize) -> Vec<PeerId> {
        self.peers.sort_unstable_by(|a, b| a.1.cmp(&b.1));
        self.peers.truncate(count);
        self.peers.into_iter().map(|(id, _)| id).collect()
    }
}
