//! In-memory map fakes used only by the test suite, so the destination
//! and binding table logic (C4/C5) can be exercised without a real
//! kernel attachment. [`MockMapSet::bindings`]'s LPM lookup implements
//! the same longest-prefix-match semantics the kernel trie provides,
//! just as an O(n) scan instead of a hardware-accelerated trie.

use std::collections::HashMap;
use std::os::fd::{AsRawFd, OwnedFd};

use crate::destination::DestinationCounters;
use crate::error::Result;
use crate::kernel::abi::{BindingKeyAbi, BindingValueAbi, DestinationKeyAbi, DestinationValueAbi};
use crate::kernel::traits::{BindingsMap, DestinationsMap, MapSet, MetricsMap, SocketsMap};

#[derive(Default)]
pub struct MockBindingsMap {
    pub(crate) entries: HashMap<BindingKeyAbi, BindingValueAbi>,
}

impl BindingsMap for MockBindingsMap {
    fn get_exact(&self, key: &BindingKeyAbi) -> Result<Option<BindingValueAbi>> {
        Ok(self.entries.get(key).copied())
    }

    fn lookup_lpm(&self, key: &BindingKeyAbi) -> Result<Option<(BindingKeyAbi, BindingValueAbi)>> {
        // Longest-prefix-match: among entries whose (protocol, masked ip,
        // port-or-wildcard) matches, the deepest prefix_len wins; ties
        // broken by port specificity (nonzero beats the port-0 wildcard),
        // mirroring the kernel trie's key layout (protocol+port are part
        // of the fixed header bits ahead of the prefix bits).
        let best = self
            .entries
            .iter()
            .filter(|(candidate, _)| {
                candidate.protocol == key.protocol
                    && (candidate.port == key.port || candidate.port == 0)
                    && ip_matches(candidate, key)
            })
            .max_by_key(|(candidate, _)| (candidate.prefix_len, candidate.port != 0));

        Ok(best.map(|(k, v)| (*k, *v)))
    }

    fn insert(&mut self, key: BindingKeyAbi, value: BindingValueAbi) -> Result<()> {
        self.entries.insert(key, value);
        Ok(())
    }

    fn remove(&mut self, key: &BindingKeyAbi) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn iter(&self) -> Result<Vec<(BindingKeyAbi, BindingValueAbi)>> {
        Ok(self.entries.iter().map(|(k, v)| (*k, *v)).collect())
    }
}

fn ip_matches(candidate: &BindingKeyAbi, key: &BindingKeyAbi) -> bool {
    let bits = candidate.prefix_len.min(128) as usize;
    let full_bytes = bits / 8;
    let rem_bits = bits % 8;

    if candidate.ip[..full_bytes] != key.ip[..full_bytes] {
        return false;
    }
    if rem_bits == 0 {
        return true;
    }
    let mask = 0xffu8 << (8 - rem_bits);
    (candidate.ip[full_bytes] & mask) == (key.ip[full_bytes] & mask)
}

#[derive(Default)]
pub struct MockSocketsMap {
    pub(crate) entries: HashMap<u32, OwnedFd>,
}

impl SocketsMap for MockSocketsMap {
    fn insert(&mut self, id: u32, fd: OwnedFd) -> Result<bool> {
        let created = self.entries.insert(id, fd).is_none();
        Ok(created)
    }

    fn remove(&mut self, id: u32) -> Result<()> {
        self.entries.remove(&id);
        Ok(())
    }

    fn contains(&self, id: u32) -> Result<bool> {
        Ok(self.entries.contains_key(&id))
    }

    fn cookie(&self, id: u32) -> Result<Option<u64>> {
        Ok(self.entries.get(&id).map(|fd| fd.as_raw_fd() as u64))
    }
}

#[derive(Default)]
pub struct MockMetricsMap {
    pub(crate) entries: HashMap<u32, DestinationCounters>,
}

impl MetricsMap for MockMetricsMap {
    fn zero(&mut self, id: u32) -> Result<()> {
        self.entries.insert(id, DestinationCounters::default());
        Ok(())
    }

    fn read(&self, id: u32) -> Result<DestinationCounters> {
        Ok(self.entries.get(&id).copied().unwrap_or_default())
    }

    fn read_all(&self) -> Result<Vec<(u32, DestinationCounters)>> {
        Ok(self.entries.iter().map(|(k, v)| (*k, *v)).collect())
    }
}

#[derive(Default)]
pub struct MockDestinationsMap {
    pub(crate) entries: HashMap<DestinationKeyAbi, DestinationValueAbi>,
}

impl DestinationsMap for MockDestinationsMap {
    fn get(&self, key: &DestinationKeyAbi) -> Result<Option<DestinationValueAbi>> {
        Ok(self.entries.get(key).copied())
    }

    fn insert(&mut self, key: DestinationKeyAbi, value: DestinationValueAbi) -> Result<()> {
        self.entries.insert(key, value);
        Ok(())
    }

    fn remove(&mut self, key: &DestinationKeyAbi) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn iter(&self) -> Result<Vec<(DestinationKeyAbi, DestinationValueAbi)>> {
        Ok(self.entries.iter().map(|(k, v)| (*k, *v)).collect())
    }
}

#[derive(Default)]
pub struct MockMapSet {
    pub bindings: MockBindingsMap,
    pub sockets: MockSocketsMap,
    pub metrics: MockMetricsMap,
    pub destinations: MockDestinationsMap,
}

impl MapSet for MockMapSet {
    type Bindings = MockBindingsMap;
    type Sockets = MockSocketsMap;
    type Metrics = MockMetricsMap;
    type Destinations = MockDestinationsMap;

    fn bindings(&mut self) -> &mut Self::Bindings {
        &mut self.bindings
    }

    fn sockets(&mut self) -> &mut Self::Sockets {
        &mut self.sockets
    }

    fn metrics(&mut self) -> &mut Self::Metrics {
        &mut self.metrics
    }

    fn destinations(&mut self) -> &mut Self::Destinations {
        &mut self.destinations
    }
}
