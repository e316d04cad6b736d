//! C4: the destination table — `Acquire`/`Release`/`AddSocket`/
//! `RemoveSocket`/`List`/`Metrics`, plus the lowest-free-ID allocation
//! algorithm (§4.4).

use std::os::fd::OwnedFd;

use crate::destination::{Destination, DestinationCounters, DestinationId, DestinationRecord};
use crate::error::{Error, Result};
use crate::kernel::abi::{DestinationKeyAbi, DestinationValueAbi};
use crate::kernel::traits::{DestinationsMap, MapSet, MetricsMap, SocketsMap};
use crate::label::MAX_LABEL_LEN;

fn key_for(destination: &Destination) -> DestinationKeyAbi {
    let mut label = [0u8; MAX_LABEL_LEN];
    let bytes = destination.label.as_str().as_bytes();
    label[..bytes.len()].copy_from_slice(bytes);
    DestinationKeyAbi {
        label,
        domain: destination.domain.as_u8(),
        protocol: destination.protocol.as_u8(),
    }
}

/// Operates on the `destinations`, `sockets`, and `destination_metrics`
/// maps of a [`MapSet`]. Holds no state of its own — every call is a
/// direct map round trip, matching the fact that multiple processes can
/// observe the same on-disk tables (§5).
pub struct DestinationTable<'a, M: MapSet> {
    maps: &'a mut M,
    capacity: u32,
}

impl<'a, M: MapSet> DestinationTable<'a, M> {
    pub fn new(maps: &'a mut M, capacity: u32) -> Self {
        Self { maps, capacity }
    }

    /// If a record exists, increments its ref-count and returns its ID.
    /// Otherwise allocates the lowest free ID, zeroes its metrics, and
    /// inserts a fresh record with ref-count 1.
    pub fn acquire(&mut self, destination: &Destination) -> Result<DestinationId> {
        let key = key_for(destination);

        if let Some(existing) = self.maps.destinations().get(&key)? {
            let refcount = existing
                .refcount
                .checked_add(1)
                .ok_or(Error::RefcountOverflow)?;
            self.maps.destinations().insert(
                key,
                DestinationValueAbi { id: existing.id, refcount },
            )?;
            return Ok(DestinationId(existing.id));
        }

        let id = self.allocate_id()?;
        self.maps.metrics().zero(id)?;
        self.maps
            .destinations()
            .insert(key, DestinationValueAbi { id, refcount: 1 })?;
        Ok(DestinationId(id))
    }

    /// Decrements ref-count by destination identity; deletes the record
    /// (freeing the ID) once both ref-count and installed-socket are 0.
    pub fn release(&mut self, destination: &Destination) -> Result<()> {
        let key = key_for(destination);
        let Some(existing) = self.maps.destinations().get(&key)? else {
            return Err(Error::RefcountUnderflow);
        };
        self.release_record(key, existing)
    }

    /// Decrements ref-count by ID, scanning the table for the owning
    /// record. Used where only the small integer ID is on hand (e.g.
    /// after reading it back out of a binding entry).
    pub fn release_by_id(&mut self, id: DestinationId) -> Result<()> {
        let (key, value) = self
            .maps
            .destinations()
            .iter()?
            .into_iter()
            .find(|(_, v)| v.id == id.0)
            .ok_or(Error::RefcountUnderflow)?;
        self.release_record(key, value)
    }

    fn release_record(&mut self, key: DestinationKeyAbi, value: DestinationValueAbi) -> Result<()> {
        let refcount = value
            .refcount
            .checked_sub(1)
            .ok_or(Error::RefcountUnderflow)?;

        let socket_installed = self.maps.sockets().contains(value.id)?;

        if refcount == 0 && !socket_installed {
            self.maps.destinations().remove(&key)?;
        } else {
            self.maps
                .destinations()
                .insert(key, DestinationValueAbi { id: value.id, refcount })?;
        }
        Ok(())
    }

    pub fn has_id(&mut self, destination: &Destination, id: DestinationId) -> Result<bool> {
        let key = key_for(destination);
        Ok(self
            .maps
            .destinations()
            .get(&key)?
            .is_some_and(|v| v.id == id.0))
    }

    /// Installs `fd` under `destination`'s ID, creating a ref-count-0
    /// record first if none exists. Returns `true` if no socket was
    /// previously present for this destination.
    pub fn add_socket(&mut self, destination: &Destination, fd: OwnedFd) -> Result<bool> {
        let key = key_for(destination);

        let id = match self.maps.destinations().get(&key)? {
            Some(existing) => existing.id,
            None => {
                let id = self.allocate_id()?;
                self.maps.metrics().zero(id)?;
                self.maps
                    .destinations()
                    .insert(key, DestinationValueAbi { id, refcount: 0 })?;
                id
            }
        };

        self.maps.sockets().insert(id, fd)
    }

    /// Removes the installed socket for `destination`; deletes the
    /// destination record too if its ref-count is also 0.
    pub fn remove_socket(&mut self, destination: &Destination) -> Result<()> {
        let key = key_for(destination);
        let Some(existing) = self.maps.destinations().get(&key)? else {
            return Ok(());
        };

        self.maps.sockets().remove(existing.id)?;

        if existing.refcount == 0 {
            self.maps.destinations().remove(&key)?;
        }
        Ok(())
    }

    pub fn list(&mut self) -> Result<Vec<(Destination, DestinationRecord)>> {
        let mut out = Vec::new();
        for (key, value) in self.maps.destinations().iter()? {
            let destination = decode_destination(&key)?;
            let socket_installed = self.maps.sockets().contains(value.id)?;
            out.push((
                destination,
                DestinationRecord {
                    id: DestinationId(value.id),
                    refcount: value.refcount,
                    socket_installed,
                },
            ));
        }
        Ok(out)
    }

    pub fn metrics(&mut self) -> Result<Vec<(Destination, DestinationCounters)>> {
        let mut out = Vec::new();
        for (key, value) in self.maps.destinations().iter()? {
            let destination = decode_destination(&key)?;
            let counters = self.maps.metrics().read(value.id)?;
            out.push((destination, counters));
        }
        Ok(out)
    }

    /// Enumerate in-use IDs (refcount > 0 or socket installed), sort
    /// ascending, and return the smallest integer not present — the
    /// deterministic lowest-free-ID rule that makes reuse safe (I3).
    fn allocate_id(&mut self) -> Result<u32> {
        let mut in_use: Vec<u32> = Vec::new();
        for (_, value) in self.maps.destinations().iter()? {
            if value.refcount > 0 || self.maps.sockets().contains(value.id)? {
                in_use.push(value.id);
            }
        }
        in_use.sort_unstable();

        let mut candidate = 0u32;
        for id in in_use {
            if id == candidate {
                candidate += 1;
            } else if id > candidate {
                break;
            }
        }

        if candidate >= self.capacity {
            return Err(Error::IdExhausted { capacity: self.capacity });
        }
        Ok(candidate)
    }
}

fn decode_destination(key: &DestinationKeyAbi) -> Result<Destination> {
    let label = crate::label::Label::from_fixed_bytes(&key.label)?;
    let domain = crate::protocol::Domain::try_from(key.domain)
        .map_err(|d| Error::StateCorrupt(format!("unknown domain byte {d}")))?;
    let protocol = crate::protocol::Protocol::try_from(key.protocol)
        .map_err(|p| Error::StateCorrupt(format!("unknown protocol byte {p}")))?;
    Ok(Destination::new(label, domain, protocol))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::mock::MockMapSet;
    use crate::label::Label;
    use crate::protocol::{Domain, Protocol};
    use std::os::fd::OwnedFd;

    fn dest(label: &str) -> Destination {
        Destination::new(Label::new(label).unwrap(), Domain::V4, Protocol::Tcp)
    }

    fn dummy_fd() -> OwnedFd {
        std::net::UdpSocket::bind("127.0.0.1:0").unwrap().into()
    }

    #[test]
    fn acquire_allocates_lowest_free_id() {
        let mut maps = MockMapSet::default();
        let mut table = DestinationTable::new(&mut maps, 512);

        let foo = table.acquire(&dest("foo")).unwrap();
        assert_eq!(foo, DestinationId(0));

        let bar = table.acquire(&dest("bar")).unwrap();
        assert_eq!(bar, DestinationId(1));
    }

    #[test]
    fn acquire_twice_increments_refcount_and_reuses_id() {
        let mut maps = MockMapSet::default();
        let mut table = DestinationTable::new(&mut maps, 512);

        let first = table.acquire(&dest("foo")).unwrap();
        let second = table.acquire(&dest("foo")).unwrap();
        assert_eq!(first, second);

        let list = table.list().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].1.refcount, 2);
    }

    #[test]
    fn release_frees_id_for_reuse() {
        let mut maps = MockMapSet::default();
        let mut table = DestinationTable::new(&mut maps, 512);

        let foo = table.acquire(&dest("foo")).unwrap();
        assert_eq!(foo, DestinationId(0));
        table.release(&dest("foo")).unwrap();

        let bar = table.acquire(&dest("bar")).unwrap();
        assert_eq!(bar, DestinationId(0), "freed ID 0 should be reused");
    }

    #[test]
    fn metrics_reset_on_id_reuse() {
        let mut maps = MockMapSet::default();
        let mut table = DestinationTable::new(&mut maps, 512);

        let foo = table.acquire(&dest("foo")).unwrap();
        table.maps.metrics().zero(foo.0).unwrap();
        // simulate accrued traffic
        table
            .maps
            .metrics
            .entries
            .insert(foo.0, DestinationCounters { lookups: 42, misses: 1, error_bad_socket: 0 });
        table.release(&dest("foo")).unwrap();

        let bar = table.acquire(&dest("bar")).unwrap();
        assert_eq!(bar.0, foo.0);
        let counters = table.maps.metrics().read(bar.0).unwrap();
        assert_eq!(counters, DestinationCounters::default());
    }

    #[test]
    fn release_underflow_is_an_error() {
        let mut maps = MockMapSet::default();
        let mut table = DestinationTable::new(&mut maps, 512);
        assert!(matches!(table.release(&dest("foo")), Err(Error::RefcountUnderflow)));
    }

    #[test]
    fn add_socket_creates_ref_count_zero_record() {
        let mut maps = MockMapSet::default();
        let mut table = DestinationTable::new(&mut maps, 512);

        let created = table.add_socket(&dest("foo"), dummy_fd()).unwrap();
        assert!(created);

        let list = table.list().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].1.refcount, 0);
        assert!(list[0].1.socket_installed);
    }

    #[test]
    fn add_socket_replacement_reports_not_created() {
        let mut maps = MockMapSet::default();
        let mut table = DestinationTable::new(&mut maps, 512);

        assert!(table.add_socket(&dest("foo"), dummy_fd()).unwrap());
        assert!(!table.add_socket(&dest("foo"), dummy_fd()).unwrap());
    }

    #[test]
    fn remove_socket_deletes_record_when_unreferenced() {
        let mut maps = MockMapSet::default();
        let mut table = DestinationTable::new(&mut maps, 512);

        table.add_socket(&dest("foo"), dummy_fd()).unwrap();
        table.remove_socket(&dest("foo")).unwrap();

        assert!(table.list().unwrap().is_empty());
    }

    #[test]
    fn remove_socket_keeps_record_when_still_referenced() {
        let mut maps = MockMapSet::default();
        let mut table = DestinationTable::new(&mut maps, 512);

        table.acquire(&dest("foo")).unwrap();
        table.add_socket(&dest("foo"), dummy_fd()).unwrap();
        table.remove_socket(&dest("foo")).unwrap();

        let list = table.list().unwrap();
        assert_eq!(list.len(), 1);
        assert!(!list[0].1.socket_installed);
        assert_eq!(list[0].1.refcount, 1);
    }

    #[test]
    fn id_exhaustion_is_reported() {
        let mut maps = MockMapSet::default();
        let mut table = DestinationTable::new(&mut maps, 1);

        table.acquire(&dest("foo")).unwrap();
        assert!(matches!(
            table.acquire(&dest("bar")),
            Err(Error::IdExhausted { capacity: 1 })
        ));
    }
}
