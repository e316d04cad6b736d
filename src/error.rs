//! Error taxonomy for the dispatcher control plane.
//!
//! One sum type, one variant per distinguishable failure kind from the
//! design's error-handling section, so callers (and tests) can match on
//! `Error` instead of parsing strings.

use std::path::PathBuf;

/// Errors returned by every operation in this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("state directory {0:?} is already loaded")]
    AlreadyLoaded(PathBuf),

    #[error("state directory {0:?} is not loaded")]
    NotLoaded(PathBuf),

    #[error("invalid label: {0}")]
    InvalidLabel(#[from] InvalidLabel),

    #[error("invalid prefix: {0}")]
    InvalidPrefix(#[from] InvalidPrefix),

    #[error("invalid binding: {0}")]
    InvalidBinding(String),

    #[error("duplicate binding for ({protocol:?}, {prefix}, port {port}) in replacement set")]
    DuplicateBinding {
        protocol: crate::protocol::Protocol,
        prefix: crate::prefix::Prefix,
        port: u16,
    },

    #[error("binding not found")]
    BindingNotFound,

    #[error("file descriptor is not a socket")]
    NotSocket(#[source] std::io::Error),

    #[error("socket domain is neither AF_INET nor AF_INET6")]
    BadSocketDomain,

    #[error("socket type is neither SOCK_STREAM nor SOCK_DGRAM")]
    BadSocketType,

    #[error("socket protocol does not match its type (stream must be TCP, datagram must be UDP)")]
    BadSocketProtocol,

    #[error("socket is in an invalid state: {0}")]
    BadSocketState(&'static str),

    #[error("destination ID space exhausted (capacity {capacity})")]
    IdExhausted { capacity: u32 },

    #[error("destination refcount overflowed")]
    RefcountOverflow,

    #[error("destination refcount underflowed (released more than acquired)")]
    RefcountUnderflow,

    #[error("kernel operation failed: {0}")]
    Kernel(#[from] KernelError),

    #[error("on-disk state is corrupt: {0}")]
    StateCorrupt(String),

    #[error("could not acquire state directory lock: {0}")]
    Lock(#[source] std::io::Error),

    #[error("invalid namespace path {path:?}: {source}")]
    InvalidNamespace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid state root {0:?}: must be an existing directory")]
    InvalidStateRoot(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Reasons a [`crate::label::Label`] failed to construct.
#[derive(Debug, thiserror::Error)]
pub enum InvalidLabel {
    #[error("label must not be empty")]
    Empty,
    #[error("label is {len} bytes, exceeding the 255-byte maximum")]
    TooLong { len: usize },
    #[error("label contains a NUL byte at offset {offset}")]
    ContainsNul { offset: usize },
}

/// Reasons a [`crate::prefix::Prefix`] failed to construct.
#[derive(Debug, thiserror::Error)]
pub enum InvalidPrefix {
    #[error("{0} is an IPv4-mapped IPv6 address and is forbidden at the control-plane boundary")]
    V4MappedV6(std::net::Ipv6Addr),
    #[error("prefix length {len} exceeds the maximum of {max} bits for this address family")]
    LengthOutOfRange { len: u8, max: u8 },
}

/// Failures surfaced by the eBPF loader/map layer (§4.3).
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("failed to load classifier program: {0}")]
    Load(#[source] aya::EbpfError),
    #[error("failed to attach classifier program: {0}")]
    Attach(String),
    #[error("failed to pin kernel object at {path:?}: {source}")]
    Pin {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to load pinned object from {path:?}: {source}")]
    LoadPinned {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("pinned program content hash does not match the in-code classifier blob")]
    HashMismatch,
    #[error("pinned link does not reference the pinned program")]
    LinkProgramMismatch,
    #[error("map operation failed: {0}")]
    Map(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
