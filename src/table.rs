//! The k-bucket routing table.
//!
//! Peers are grouped into buckets by the length of the key prefix they
//! share with the local node. The table starts with a single wildcard
//! bucket; as peers accumulate, the wildcard bucket unfolds so that every
//! bucket before the last holds exactly the peers at one prefix depth.
//!
//! Admission is gated on latency, bucket capacity, and staleness: a full
//! bucket admits a new peer only by evicting a member whose last
//! successful outbound query is older than the configured threshold. A
//! background task probes peers that are due for a liveness check and
//! evicts the unreachable ones, re-checking connectedness under the write
//! lock so a peer that reconnected mid-probe is not lost.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bucket::Bucket;
use crate::config::{ConnectednessFn, PeerCallback, ProbeFn, TableConfig};
use crate::error::TableError;
use crate::key::Key;
use crate::metrics::LatencyMetrics;
use crate::peer::{PeerId, PeerRecord};
use crate::sorter::DistanceSorter;

/// Deadline for a single liveness probe.
const PROBE_DEADLINE: Duration = Duration::from_secs(10);

/// Highest common prefix length tracked for refresh bookkeeping. Prefixes
/// deeper than this are so sparsely populated that refreshing them is not
/// worthwhile, and the cap keeps the bookkeeping map bounded.
const MAX_TRACKED_CPL: u32 = 15;

/// Refresh state of one common prefix length, as reported by
/// [`RoutingTable::tracked_cpls_for_refresh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CplRefresh {
    pub cpl: u32,
    /// `None` if this prefix length has never been refreshed.
    pub last_refreshed_at: Option<Instant>,
}

/// A Kademlia routing table.
///
/// The table is shared between any number of concurrent callers and one
/// background liveness task; a readers-writer lock serialises access to
/// the bucket structure. Mutations and lookups never perform I/O while
/// holding the lock.
///
/// Constructed via [`RoutingTable::new`], which spawns the liveness task
/// and therefore must run inside a Tokio runtime. Call
/// [`close`](RoutingTable::close) to stop the task.
pub struct RoutingTable {
    local: Key,
    bucket_size: usize,
    max_latency: Duration,
    max_last_successful_outbound_threshold: f64,
    refresh_interval: Duration,
    metrics: Arc<dyn LatencyMetrics>,
    probe: ProbeFn,
    is_connected: ConnectednessFn,
    on_peer_added: PeerCallback,
    on_peer_removed: PeerCallback,
    buckets: RwLock<Vec<Bucket>>,
    cpl_refreshed_at: RwLock<HashMap<u32, Instant>>,
    shutdown: CancellationToken,
}

impl RoutingTable {
    /// Creates the table and spawns its background liveness task.
    ///
    /// Fails with [`TableError::MissingProbe`] or
    /// [`TableError::MissingConnectedness`] if the corresponding config
    /// entry is absent.
    pub fn new(config: TableConfig) -> Result<Arc<Self>, TableError> {
        let probe = config.probe.ok_or(TableError::MissingProbe)?;
        let is_connected = config.is_connected.ok_or(TableError::MissingConnectedness)?;
        let on_peer_added = config
            .on_peer_added
            .unwrap_or_else(|| Arc::new(|_: &PeerId| {}));
        let on_peer_removed = config
            .on_peer_removed
            .unwrap_or_else(|| Arc::new(|_: &PeerId| {}));

        let table = Arc::new(Self {
            local: Key::from_peer(&config.local_id),
            bucket_size: config.bucket_size,
            max_latency: config.max_latency,
            max_last_successful_outbound_threshold: config
                .max_last_successful_outbound_threshold,
            refresh_interval: config.refresh_interval,
            metrics: config.metrics,
            probe,
            is_connected,
            on_peer_added,
            on_peer_removed,
            buckets: RwLock::new(vec![Bucket::new()]),
            cpl_refreshed_at: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        });

        info!(
            local = %config.local_id,
            bucket_size = config.bucket_size,
            "routing table created"
        );

        tokio::spawn(Arc::clone(&table).liveness_loop());

        Ok(table)
    }

    /// Tries to add a peer to the table.
    ///
    /// Returns `Ok(true)` if the peer was newly admitted and `Ok(false)`
    /// if it was already present (no mutation, no callback). A peer that
    /// was involved in a successful DHT query (`query_peer`) is recorded
    /// with a fresh last-successful-outbound-query timestamp; a peer we
    /// merely connected to is recorded without one, making it the first
    /// eviction candidate under capacity pressure.
    ///
    /// Fails with [`TableError::RejectedHighLatency`] if the peer's
    /// latency EWMA exceeds the configured maximum, and with
    /// [`TableError::RejectedNoCapacity`] if its bucket is full and holds
    /// no peer stale enough to evict.
    pub fn try_add_peer(&self, peer: PeerId, query_peer: bool) -> Result<bool, TableError> {
        let mut buckets = self.buckets.write();
        self.add_peer_locked(&mut buckets, peer, query_peer)
    }

    fn add_peer_locked(
        &self,
        buckets: &mut Vec<Bucket>,
        peer: PeerId,
        query_peer: bool,
    ) -> Result<bool, TableError> {
        let last_query = query_peer.then(Instant::now);
        let key = Key::from_peer(&peer);

        // The local peer never belongs in its own table.
        if key == self.local {
            return Ok(false);
        }

        let index = self.bucket_index(buckets.len(), &key);
        let bucket = &mut buckets[index];

        if bucket.get(&peer).is_some() {
            return Ok(false);
        }

        if self.metrics.latency_ewma(&peer) > self.max_latency {
            return Err(TableError::RejectedHighLatency);
        }

        if bucket.len() < self.bucket_size {
            bucket.push_front(PeerRecord {
                id: peer,
                key,
                last_successful_outbound_query: last_query,
            });
            (self.on_peer_added)(&peer);
            return Ok(true);
        }

        if index == buckets.len() - 1 {
            // The bucket is full but it is the wildcard bucket: unfold it
            // and re-resolve, the peer may now have a dedicated bucket.
            self.next_bucket(buckets);
            let index = self.bucket_index(buckets.len(), &key);
            let bucket = &mut buckets[index];

            if bucket.len() < self.bucket_size {
                bucket.push_front(PeerRecord {
                    id: peer,
                    key,
                    last_successful_outbound_query: last_query,
                });
                (self.on_peer_added)(&peer);
                return Ok(true);
            }
        }

        // Full bucket: evict the first member whose last successful
        // outbound query is older than the threshold. Iteration order is
        // the tie-break; staleness is a cutoff, not a ranking.
        let index = self.bucket_index(buckets.len(), &key);
        let bucket = &mut buckets[index];
        let now = Instant::now();
        let stale = bucket
            .records()
            .find(|r| r.age_nanos(now) > self.max_last_successful_outbound_threshold)
            .map(|r| r.id);

        if let Some(stale_id) = stale {
            bucket.remove(&stale_id);
            (self.on_peer_removed)(&stale_id);
            bucket.push_front(PeerRecord {
                id: peer,
                key,
                last_successful_outbound_query: last_query,
            });
            (self.on_peer_added)(&peer);
            return Ok(true);
        }

        Err(TableError::RejectedNoCapacity)
    }

    /// Splits the wildcard bucket, appending the records that share more
    /// bits with the local key as the new wildcard. Repeats while the new
    /// wildcard still overflows, which can manufacture a chain of empty
    /// buckets when every record belongs to a much deeper prefix.
    fn next_bucket(&self, buckets: &mut Vec<Bucket>) {
        loop {
            let depth = (buckets.len() - 1) as u32;
            let last = buckets.len() - 1;
            let new_bucket = buckets[last].split(depth, &self.local);
            let overflowing = new_bucket.len() >= self.bucket_size;
            buckets.push(new_bucket);
            if !overflowing {
                return;
            }
        }
    }

    /// Overwrites the peer's last-successful-outbound-query timestamp.
    /// Returns whether the peer was present. Callers are expected to only
    /// advance the timestamp; no monotonicity check is made.
    pub fn update_last_successful_outbound_query(&self, peer: &PeerId, at: Instant) -> bool {
        let mut buckets = self.buckets.write();
        let index = self.bucket_index(buckets.len(), &Key::from_peer(peer));

        if let Some(record) = buckets[index].get_mut(peer) {
            record.last_successful_outbound_query = Some(at);
            return true;
        }
        false
    }

    /// Removes a peer the caller knows to be useless for queries, e.g.
    /// one that stopped supporting the DHT protocol. Fires the removal
    /// callback only if the peer was present.
    pub fn remove_peer(&self, peer: &PeerId) {
        let mut buckets = self.buckets.write();
        self.remove_peer_locked(&mut buckets, peer, &Key::from_peer(peer));
    }

    fn remove_peer_locked(&self, buckets: &mut Vec<Bucket>, peer: &PeerId, key: &Key) {
        let index = self.bucket_index(buckets.len(), key);
        if buckets[index].remove(peer) {
            (self.on_peer_removed)(peer);
        }
    }

    /// Looks up a peer by id, returning it only on an exact match among
    /// the nearest peers to its key.
    pub fn find(&self, peer: &PeerId) -> Option<PeerId> {
        self.nearest_peers(&Key::from_peer(peer), 1)
            .into_iter()
            .next()
            .filter(|found| found == peer)
    }

    /// The single peer nearest to the target key, if the table is
    /// non-empty.
    pub fn nearest_peer(&self, target: &Key) -> Option<PeerId> {
        let peers = self.nearest_peers(target, 1);
        if peers.is_empty() {
            debug!(size = self.size(), "nearest peer lookup on empty table");
        }
        peers.into_iter().next()
    }

    /// The `count` peers nearest to the target key, ordered by ascending
    /// XOR distance.
    pub fn nearest_peers(&self, target: &Key, count: usize) -> Vec<PeerId> {
        let buckets = self.buckets.read();

        // Peers in the bucket at the shared prefix length also share that
        // prefix with the target, plus at least one more bit: both the
        // target and every member differ from the local key at that bit.
        let cpl = (self.local.common_prefix_len(target) as usize).min(buckets.len() - 1);

        let mut sorter = DistanceSorter::new(*target, count + self.bucket_size);
        sorter.append_bucket(&buckets[cpl]);

        // Buckets to the right share exactly cpl bits with the target, so
        // their true ordering is not monotonic in bucket index. Pulling
        // them bucket-by-bucket is an accepted approximation.
        for i in cpl + 1..buckets.len() {
            if sorter.len() >= count {
                break;
            }
            sorter.append_bucket(&buckets[i]);
        }

        // Buckets to the left each share one fewer bit than the last.
        for i in (0..cpl).rev() {
            if sorter.len() >= count {
                break;
            }
            sorter.append_bucket(&buckets[i]);
        }
        drop(buckets);

        sorter.into_sorted(count)
    }

    /// Total number of peers across all buckets.
    pub fn size(&self) -> usize {
        self.buckets.read().iter().map(|b| b.len()).sum()
    }

    /// Ids of every peer in the table, bucket by bucket.
    pub fn list_peers(&self) -> Vec<PeerId> {
        self.buckets
            .read()
            .iter()
            .flat_map(|b| b.peer_ids())
            .collect()
    }

    /// Number of buckets. Grows as the wildcard bucket unfolds and never
    /// shrinks.
    pub fn num_buckets(&self) -> usize {
        self.buckets.read().len()
    }

    /// Records that the owning DHT refreshed the given common prefix
    /// length at `at`. Prefix lengths beyond the tracked maximum are
    /// ignored.
    pub fn reset_cpl_refreshed_at(&self, cpl: u32, at: Instant) {
        if cpl > MAX_TRACKED_CPL {
            return;
        }
        self.cpl_refreshed_at.write().insert(cpl, at);
    }

    /// Refresh state for every common prefix length the owning DHT should
    /// consider, from zero up to the deepest populated bucket or tracked
    /// entry.
    pub fn tracked_cpls_for_refresh(&self) -> Vec<CplRefresh> {
        let highest_bucket = (self.buckets.read().len() - 1) as u32;
        let refreshed = self.cpl_refreshed_at.read();
        let highest_tracked = refreshed.keys().copied().max().unwrap_or(0);
        let max_cpl = highest_bucket.max(highest_tracked).min(MAX_TRACKED_CPL);

        (0..=max_cpl)
            .map(|cpl| CplRefresh {
                cpl,
                last_refreshed_at: refreshed.get(&cpl).copied(),
            })
            .collect()
    }

    /// Stops the background liveness task. Safe to call multiple times;
    /// the table should not be used afterwards.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    fn bucket_index(&self, num_buckets: usize, key: &Key) -> usize {
        (key.common_prefix_len(&self.local) as usize).min(num_buckets - 1)
    }

    async fn liveness_loop(self: Arc<Self>) {
        let mut ticker = interval(self.refresh_interval / 3);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick of an interval completes immediately; consume it
        // so probing starts one full period after construction.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.probe_due_peers().await,
                _ = self.shutdown.cancelled() => return,
            }
        }
    }

    async fn probe_due_peers(&self) {
        let snapshot: Vec<PeerRecord> = {
            let buckets = self.buckets.read();
            buckets.iter().flat_map(|b| b.records().cloned()).collect()
        };

        let due_after = (self.refresh_interval / 3).as_nanos() as f64;
        for record in snapshot {
            if record.age_nanos(Instant::now()) <= due_after {
                continue;
            }

            let reachable = tokio::select! {
                probed = timeout(PROBE_DEADLINE, (self.probe)(record.id)) => {
                    probed.unwrap_or(false)
                }
                _ = self.shutdown.cancelled() => return,
            };
            if reachable {
                continue;
            }

            debug!(peer = %record.id, "probe failed, evicting if disconnected");

            // The peer may have reconnected between the snapshot and this
            // point, in which case its re-admission was a no-op; re-check
            // connectedness under the exclusive lock before removing.
            let mut buckets = self.buckets.write();
            if !(self.is_connected)(&record.id) {
                self.remove_peer_locked(&mut buckets, &record.id, &record.key);
            }
        }
    }
}

impl fmt::Display for RoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "routing table, bucket size = {}, max latency = {:?}",
            self.bucket_size, self.max_latency
        )?;
        let buckets = self.buckets.read();
        for (i, bucket) in buckets.iter().enumerate() {
            writeln!(f, "  bucket {}:", i)?;
            for record in bucket.records() {
                writeln!(
                    f,
                    "    {} {:?}",
                    record.id,
                    self.metrics.latency_ewma(&record.id)
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
impl RoutingTable {
    pub(crate) fn bucket_peer_ids(&self) -> Vec<Vec<PeerId>> {
        self.buckets.read().iter().map(|b| b.peer_ids()).collect()
    }

    pub(crate) fn local_key(&self) -> Key {
        self.local
    }
}
