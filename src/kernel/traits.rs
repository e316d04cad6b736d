//! Narrow seams between the table logic (C4/C5) and the concrete map
//! backing (C3). Production code runs against [`kernel::aya_backed`],
//! tests run against an in-memory fake — the table logic never notices
//! the difference.

use std::os::fd::OwnedFd;

use crate::destination::DestinationCounters;
use crate::error::Result;
use crate::kernel::abi::{BindingKeyAbi, BindingValueAbi, DestinationKeyAbi, DestinationValueAbi};

/// The `bindings` LPM-trie map (§4.3, §4.5).
pub trait BindingsMap {
    /// Exact-key lookup (used to detect "is this literally the same
    /// binding, not just a less-specific prefix the trie also matches").
    fn get_exact(&self, key: &BindingKeyAbi) -> Result<Option<BindingValueAbi>>;

    /// Longest-prefix-match lookup, mirroring what the kernel datapath
    /// does for an inbound packet. Returns the matching key (which may
    /// have a shorter prefix length than `key`) and its value.
    fn lookup_lpm(&self, key: &BindingKeyAbi) -> Result<Option<(BindingKeyAbi, BindingValueAbi)>>;

    fn insert(&mut self, key: BindingKeyAbi, value: BindingValueAbi) -> Result<()>;
    fn remove(&mut self, key: &BindingKeyAbi) -> Result<()>;
    fn iter(&self) -> Result<Vec<(BindingKeyAbi, BindingValueAbi)>>;
}

/// The `sockets` map: destination ID → kernel socket reference.
pub trait SocketsMap {
    /// Installs `fd` under `id`, replacing any existing entry
    /// atomically (I5: no gap during which the map has no socket for
    /// the ID). Returns `true` if no socket was previously present.
    fn insert(&mut self, id: u32, fd: OwnedFd) -> Result<bool>;
    fn remove(&mut self, id: u32) -> Result<()>;
    fn contains(&self, id: u32) -> Result<bool>;
    /// A stable per-socket cookie for display/identification, if installed.
    fn cookie(&self, id: u32) -> Result<Option<u64>>;
}

/// The `destination_metrics` per-CPU map.
pub trait MetricsMap {
    fn zero(&mut self, id: u32) -> Result<()>;
    fn read(&self, id: u32) -> Result<DestinationCounters>;
    fn read_all(&self) -> Result<Vec<(u32, DestinationCounters)>>;
}

/// The pinned, userspace-managed `destinations` hash map.
pub trait DestinationsMap {
    fn get(&self, key: &DestinationKeyAbi) -> Result<Option<DestinationValueAbi>>;
    fn insert(&mut self, key: DestinationKeyAbi, value: DestinationValueAbi) -> Result<()>;
    fn remove(&mut self, key: &DestinationKeyAbi) -> Result<()>;
    fn iter(&self) -> Result<Vec<(DestinationKeyAbi, DestinationValueAbi)>>;
}

/// The bundle of four maps a loaded/opened state directory provides.
pub trait MapSet {
    type Bindings: BindingsMap;
    type Sockets: SocketsMap;
    type Metrics: MetricsMap;
    type Destinations: DestinationsMap;

    fn bindings(&mut self) -> &mut Self::Bindings;
    fn sockets(&mut self) -> &mut Self::Sockets;
    fn metrics(&mut self) -> &mut Self::Metrics;
    fn destinations(&mut self) -> &mut Self::Destinations;
}
