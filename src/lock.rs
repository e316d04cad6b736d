//! C2: the state directory's advisory exclusive/shared lock (§4.2).
//!
//! Mirrors the RAII shape the teacher uses for kernel-resource cleanup
//! (open a descriptor, act, restore on `Drop`): a guard holds the
//! locked directory descriptor and releases the lock when dropped.

use std::fs::File;
use std::os::fd::AsFd;
use std::path::Path;

use nix::fcntl::{Flock, FlockArg};

use crate::error::{Error, Result};

/// A held lock on a state directory. Unlocks on drop.
pub struct StateDirLock {
    // `Flock` wraps the file and releases the lock (LOCK_UN) when it's
    // dropped, so there's no explicit unlock method to forget to call.
    _inner: Flock<File>,
}

impl StateDirLock {
    /// Blocks until an exclusive lock on `dir` is held. Concurrent
    /// shared locks are excluded once this returns.
    pub fn lock_exclusive(dir: &Path) -> Result<Self> {
        let file = open_dir(dir)?;
        let inner = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| Error::Lock(std::io::Error::from(errno)))?;
        Ok(Self { _inner: inner })
    }

    /// Blocks until a shared lock on `dir` is held. Any number of
    /// readers may hold a shared lock simultaneously; an exclusive
    /// lock excludes all of them.
    pub fn lock_shared(dir: &Path) -> Result<Self> {
        let file = open_dir(dir)?;
        let inner = Flock::lock(file, FlockArg::LockShared)
            .map_err(|(_, errno)| Error::Lock(std::io::Error::from(errno)))?;
        Ok(Self { _inner: inner })
    }

    /// Non-blocking exclusive lock attempt, for tests that need to
    /// observe lock contention without a second thread.
    pub fn try_lock_exclusive(dir: &Path) -> Result<Option<Self>> {
        let file = open_dir(dir)?;
        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(inner) => Ok(Some(Self { _inner: inner })),
            Err((_, nix::errno::Errno::EWOULDBLOCK)) => Ok(None),
            Err((_, errno)) => Err(Error::Lock(std::io::Error::from(errno))),
        }
    }

    /// Raw fd of the locked directory, for callers that need to pass
    /// it to another syscall (e.g. `openat`-relative map pinning).
    pub fn as_fd(&self) -> impl AsFd + '_ {
        self._inner.as_fd()
    }
}

fn open_dir(dir: &Path) -> Result<File> {
    File::open(dir).map_err(Error::Io)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_lock_excludes_a_second_exclusive_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let _held = StateDirLock::lock_exclusive(dir.path()).unwrap();
        let second = StateDirLock::try_lock_exclusive(dir.path()).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _held = StateDirLock::lock_exclusive(dir.path()).unwrap();
        }
        let second = StateDirLock::try_lock_exclusive(dir.path()).unwrap();
        assert!(second.is_some());
    }

    #[test]
    fn shared_locks_do_not_exclude_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let a = StateDirLock::lock_shared(dir.path()).unwrap();
        let b = StateDirLock::lock_shared(dir.path()).unwrap();
        drop(a);
        drop(b);
    }
}
