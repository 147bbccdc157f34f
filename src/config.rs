//! Routing table configuration.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::metrics::LatencyMetrics;
use crate::peer::PeerId;

/// Reachability probe invoked by the background liveness loop.
///
/// Resolves to `true` if the peer answered. The table runs the returned
/// future under its own deadline and drops it on shutdown, so
/// implementations do not need their own timeout.
pub type ProbeFn = Arc<dyn Fn(PeerId) -> BoxFuture<'static, bool> + Send + Sync>;

/// Reports whether the owning node currently holds a connection to a peer.
pub type ConnectednessFn = Arc<dyn Fn(&PeerId) -> bool + Send + Sync>;

/// Notification hook fired while the table lock is held; must not block.
pub type PeerCallback = Arc<dyn Fn(&PeerId) + Send + Sync>;

/// Everything a [`RoutingTable`](crate::RoutingTable) needs at construction.
///
/// `probe` and `is_connected` are required; construction fails without
/// them. The callbacks default to no-ops when left as `None`.
pub struct TableConfig {
    /// Uniform capacity `k` of every bucket.
    pub bucket_size: usize,
    /// The owning node's identity. Its key is never admitted to the table.
    pub local_id: PeerId,
    /// Admission cutoff: peers with a higher latency EWMA are refused.
    pub max_latency: Duration,
    /// Latency oracle consulted on every admission attempt.
    pub metrics: Arc<dyn LatencyMetrics>,
    /// Staleness cutoff in nanoseconds. A peer whose last successful
    /// outbound query is older than this may be evicted from a full bucket
    /// to admit a new peer.
    pub max_last_successful_outbound_threshold: f64,
    /// Interval between routing table refreshes by the owning DHT. The
    /// liveness loop ticks and probes at a third of this.
    pub refresh_interval: Duration,
    /// Reachability probe, required.
    pub probe: Option<ProbeFn>,
    /// Connectedness oracle, required.
    pub is_connected: Option<ConnectednessFn>,
    /// Fired after a peer is admitted.
    pub on_peer_added: Option<PeerCallback>,
    /// Fired after a peer is removed.
    pub on_peer_removed: Option<PeerCallback>,
}
