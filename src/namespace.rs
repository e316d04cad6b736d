//! C1: resolving a network namespace and a state root to a stable
//! identity and a per-namespace state directory (§4.1).
//!
//! Stat'ing `/proc/<pid>/ns/net` to get a namespace's device/inode
//! identity is the same move the teacher uses to open a namespace
//! handle before `setns` (`utils/download_container.rs`); here we only
//! need the inode, not the fd itself.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// A resolved `(namespace inode, state directory)` pair.
#[derive(Debug, Clone)]
pub struct NamespaceHandle {
    inode: u64,
    state_dir: PathBuf,
}

impl NamespaceHandle {
    /// `namespace_path` is a path whose inode identifies the namespace —
    /// typically `/proc/self/ns/net` or `/proc/<pid>/ns/net`, but tests
    /// may pass any file since only its inode is observed.
    pub fn resolve(namespace_path: &Path, state_root: &Path) -> Result<Self> {
        let meta = fs::metadata(namespace_path).map_err(|source| Error::InvalidNamespace {
            path: namespace_path.to_path_buf(),
            source,
        })?;

        let root_meta = fs::metadata(state_root).map_err(|_| {
            Error::InvalidStateRoot(state_root.to_path_buf())
        })?;
        if !root_meta.is_dir() {
            return Err(Error::InvalidStateRoot(state_root.to_path_buf()));
        }

        use std::os::unix::fs::MetadataExt;
        let inode = meta.ino();
        let state_dir = state_root.join(format!("{inode}_dispatcher"));

        Ok(Self { inode, state_dir })
    }

    /// Convenience for the common case: the calling process's own
    /// network namespace.
    pub fn current(state_root: &Path) -> Result<Self> {
        Self::resolve(Path::new("/proc/self/ns/net"), state_root)
    }

    pub fn inode(&self) -> u64 {
        self.inode
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }
}
