//! ktable - a Kademlia k-bucket routing table
//!
//! This library maintains a bounded, XOR-distance-organised view of the
//! peers a DHT node knows about. It decides which peers are worth keeping,
//! answers "the k peers closest to this key" lookups that drive iterative
//! DHT queries, and evicts peers that stop responding.
//!
//! # Modules
//!
//! - [`key`] - 256-bit keyspace, XOR distance, common prefix length
//! - [`peer`] - Peer identities and per-peer records
//! - [`table`] - The routing table: admission, eviction, nearest-k lookup,
//!   background liveness probing
//! - [`metrics`] - Latency oracle consulted at admission time
//! - [`config`] - Construction-time configuration bundle
//! - [`error`] - Error type
//!
//! # Getting Started
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use ktable::{LatencyMetrics, PeerId, ProbeFn, RoutingTable, TableConfig};
//!
//! struct NoMetrics;
//!
//! impl LatencyMetrics for NoMetrics {
//!     fn latency_ewma(&self, _peer: &PeerId) -> Duration {
//!         Duration::ZERO
//!     }
//! }
//!
//! # async fn example() -> Result<(), ktable::TableError> {
//! let probe: ProbeFn = Arc::new(|_peer| Box::pin(async { true }));
//!
//! let table = RoutingTable::new(TableConfig {
//!     bucket_size: 20,
//!     local_id: PeerId::random(),
//!     max_latency: Duration::from_millis(250),
//!     metrics: Arc::new(NoMetrics),
//!     max_last_successful_outbound_threshold: 3_600_000_000_000.0,
//!     refresh_interval: Duration::from_secs(600),
//!     probe: Some(probe),
//!     is_connected: Some(Arc::new(|_peer| false)),
//!     on_peer_added: None,
//!     on_peer_removed: None,
//! })?;
//!
//! let peer = PeerId::random();
//! if table.try_add_peer(peer, true)? {
//!     let nearest = table.nearest_peers(&ktable::Key::from_peer(&peer), 20);
//!     assert_eq!(nearest[0], peer);
//! }
//!
//! table.close();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod key;
pub mod metrics;
pub mod peer;
pub mod table;

mod bucket;
mod sorter;

pub use config::{ConnectednessFn, PeerCallback, ProbeFn, TableConfig};
pub use error::TableError;
pub use key::{Distance, Key};
pub use metrics::LatencyMetrics;
pub use peer::{PeerId, PeerRecord};
pub use table::{CplRefresh, RoutingTable};
