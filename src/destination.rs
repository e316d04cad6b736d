//! `Destination` identity and the small integer that indexes it.

use std::fmt;

use crate::label::Label;
use crate::protocol::{Domain, Protocol};

/// A `(label, domain, protocol)` tuple; the key under which at most one
/// socket may be installed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Destination {
    pub label: Label,
    pub domain: Domain,
    pub protocol: Protocol,
}

impl Destination {
    pub fn new(label: Label, domain: Domain, protocol: Protocol) -> Self {
        Self { label, domain, protocol }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.label, self.protocol, self.domain)
    }
}

/// Small unsigned integer bounded by the socket-map capacity (default
/// 512). Never handed to a caller without the lock that guarantees the
/// backing record still exists (§9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct DestinationId(pub u32);

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<DestinationId> for u32 {
    fn from(value: DestinationId) -> Self {
        value.0
    }
}

impl From<u32> for DestinationId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// `(ID, ref-count)` plus whatever the destination table layer tracks
/// about an installed socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationRecord {
    pub id: DestinationId,
    pub refcount: u32,
    pub socket_installed: bool,
}

impl DestinationRecord {
    pub fn is_in_use(&self) -> bool {
        self.refcount > 0 || self.socket_installed
    }
}

/// Per-CPU counters aggregated across CPUs (§4.4/§6).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DestinationCounters {
    pub lookups: u64,
    pub misses: u64,
    pub error_bad_socket: u64,
}
