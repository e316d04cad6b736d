//! C7: the Dispatcher Facade — the one type most callers touch.
//! Composes C1 (namespace resolution), C3 (kernel life-cycle), C4/C5
//! (the two tables) into `create`/`open`/`unload`/`upgrade` and the
//! binding/destination/metrics operations (§4.7), following the
//! teacher's `Command`-trait convention of one small struct per
//! capability composed behind a single entry point.

use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};

use crate::binding::Binding;
use crate::binding_table::BindingTable;
use crate::dest_table::DestinationTable;
use crate::destination::{Destination, DestinationCounters, DestinationRecord};
use crate::error::{Error, Result};
use crate::kernel::layout::{StateDirLayout, DEFAULT_SOCKET_CAPACITY};
use crate::kernel::traits::MapSet;
use crate::label::Label;
use crate::namespace::NamespaceHandle;
use crate::socket_reg;

/// An opened dispatcher session. `M` is `kernel::aya_backed::AyaMapSet`
/// in production and `kernel::mock::MockMapSet` in tests.
///
/// Mutating operations require the session to have been opened
/// exclusively (`read_only: false` at [`Dispatcher::open`]); calling one
/// against a read-only session is a `Lock` error rather than silently
/// downgrading, since the read-only open skipped the hash-consistency
/// check a writer must not skip (§4.3, §6 `read-only` option).
pub struct Dispatcher<M: MapSet> {
    maps: M,
    capacity: u32,
    state_dir: PathBuf,
    writable: bool,
}

impl<M: MapSet> Dispatcher<M> {
    /// For tests and any caller that already has a constructed `MapSet`
    /// (e.g. [`crate::kernel::mock::MockMapSet`]) and doesn't need the
    /// namespace/lock machinery wired in.
    pub fn from_maps(maps: M, capacity: u32, writable: bool) -> Self {
        Self { maps, capacity, state_dir: PathBuf::new(), writable }
    }

    pub fn add_binding(&mut self, binding: &Binding) -> Result<()> {
        self.require_writable()?;
        BindingTable::new(&mut self.maps, self.capacity).add(binding)
    }

    pub fn remove_binding(&mut self, binding: &Binding) -> Result<()> {
        self.require_writable()?;
        BindingTable::new(&mut self.maps, self.capacity).remove(binding)
    }

    pub fn replace_bindings(&mut self, new_set: &[Binding]) -> Result<(Vec<Binding>, Vec<Binding>)> {
        self.require_writable()?;
        BindingTable::new(&mut self.maps, self.capacity).replace(new_set)
    }

    pub fn list_bindings(&mut self) -> Result<Vec<Binding>> {
        let mut bindings = BindingTable::new(&mut self.maps, self.capacity).list()?;
        crate::binding::sort_for_display(&mut bindings);
        Ok(bindings)
    }

    /// Validates `fd` against `label`, then registers it (applying
    /// reuseport de-dup against anything else in `batch`).
    pub fn register_socket(&mut self, fd: OwnedFd, label: Label) -> Result<bool> {
        self.require_writable()?;
        let validated = socket_reg::validate(fd, label)?;
        DestinationTable::new(&mut self.maps, self.capacity).add_socket(&validated.destination, validated.fd)
    }

    /// Registers every fd in `batch`, de-duplicating reuseport groups
    /// within the batch first (§4.6).
    pub fn register_sockets(&mut self, batch: Vec<(OwnedFd, Label)>) -> Result<Vec<bool>> {
        self.require_writable()?;
        let validated: Vec<_> = batch
            .into_iter()
            .map(|(fd, label)| socket_reg::validate(fd, label))
            .collect::<Result<_>>()?;
        let deduped = socket_reg::dedup_reuseport(validated);
        deduped
            .into_iter()
            .map(|v| DestinationTable::new(&mut self.maps, self.capacity).add_socket(&v.destination, v.fd))
            .collect()
    }

    pub fn unregister_socket(&mut self, destination: &Destination) -> Result<()> {
        self.require_writable()?;
        DestinationTable::new(&mut self.maps, self.capacity).remove_socket(destination)
    }

    pub fn list_destinations(&mut self) -> Result<Vec<(Destination, DestinationRecord)>> {
        DestinationTable::new(&mut self.maps, self.capacity).list()
    }

    pub fn metrics(&mut self) -> Result<Vec<(Destination, DestinationCounters)>> {
        DestinationTable::new(&mut self.maps, self.capacity).metrics()
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    fn require_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(Error::Lock(std::io::Error::other(
                "dispatcher was opened read-only",
            )))
        }
    }
}

#[cfg(target_os = "linux")]
impl Dispatcher<crate::kernel::aya_backed::AyaMapSet> {
    /// §4.3 Create: load, pin, and attach the classifier for the
    /// namespace identified by `netns_path`, rooted at `state_root`.
    pub fn create(netns_path: &Path, state_root: &Path) -> Result<Self> {
        let handle = NamespaceHandle::resolve(netns_path, state_root)?;
        let layout = StateDirLayout::new(handle.state_dir());
        let maps = crate::kernel::aya_backed::create(&layout, netns_path)?;
        Ok(Self {
            maps,
            capacity: DEFAULT_SOCKET_CAPACITY,
            state_dir: layout.root,
            writable: true,
        })
    }

    /// §4.3 Open. `read_only` selects shared-lock mode and skips the
    /// program-hash consistency check, per §6's `read-only` option.
    pub fn open(netns_path: &Path, state_root: &Path, read_only: bool) -> Result<Self> {
        let handle = NamespaceHandle::resolve(netns_path, state_root)?;
        let layout = StateDirLayout::new(handle.state_dir());
        let maps = crate::kernel::aya_backed::open(&layout, !read_only)?;
        Ok(Self {
            maps,
            capacity: DEFAULT_SOCKET_CAPACITY,
            state_dir: layout.root,
            writable: !read_only,
        })
    }

    pub fn upgrade(netns_path: &Path, state_root: &Path) -> Result<()> {
        let handle = NamespaceHandle::resolve(netns_path, state_root)?;
        let layout = StateDirLayout::new(handle.state_dir());
        crate::kernel::aya_backed::upgrade(&layout)
    }

    pub fn unload(netns_path: &Path, state_root: &Path) -> Result<()> {
        let handle = NamespaceHandle::resolve(netns_path, state_root)?;
        let layout = StateDirLayout::new(handle.state_dir());
        crate::kernel::aya_backed::unload(&layout)
    }
}
