//! C3: the real kernel-object life-cycle, built on `aya`. Create/Open/
//! Upgrade/Unload follow §4.3 exactly; the four `*Map` trait impls here
//! are the production counterpart to [`crate::kernel::mock`].

use std::fs;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use aya::maps::lpm_trie::{Key as LpmKey, LpmTrie};
use aya::maps::sock::SockHash;
use aya::maps::{HashMap as AyaHashMap, MapData, PerCpuHashMap};
use aya::programs::{Xdp, XdpFlags};
use aya::{Ebpf, EbpfLoader};

use crate::destination::DestinationCounters;
use crate::error::{Error, KernelError, Result};
use crate::kernel::abi::{BindingKeyAbi, BindingValueAbi, DestinationKeyAbi, DestinationValueAbi};
use crate::kernel::layout::{StateDirLayout, DIR_MODE, FILE_MODE};
use crate::kernel::traits::{BindingsMap, DestinationsMap, MapSet, MetricsMap, SocketsMap};
use crate::lock::StateDirLock;

/// Externally-built classifier object. Its build pipeline sits outside
/// this crate; `build.rs` substitutes an empty stub when
/// `TUBULAR_CLASSIFIER_OBJ` isn't set so the rest of the workspace still
/// builds without it.
const CLASSIFIER_BLOB: &[u8] = include_bytes!(env!("TUBULAR_CLASSIFIER_OBJ"));

const XDP_PROGRAM_NAME: &str = "tubular_classify";
const BINDINGS_MAP_NAME: &str = "bindings";
const SOCKETS_MAP_NAME: &str = "sockets";
const METRICS_MAP_NAME: &str = "destination_metrics";
const DESTINATIONS_MAP_NAME: &str = "destinations";

/// The 19 data bytes of an LPM-trie key: `protocol(1) + port(2) + ip(16)`,
/// matching the fixed header bits the key encoding in §4.5 describes.
type TrieData = [u8; 19];

fn to_trie_key(key: &BindingKeyAbi) -> LpmKey<TrieData> {
    let mut data = [0u8; 19];
    data[0] = key.protocol;
    data[1..3].copy_from_slice(&key.port.to_ne_bytes());
    data[3..19].copy_from_slice(&key.ip);
    // the fixed protocol+port header (24 bits) is always matched in full,
    // ahead of `key.prefix_len` bits of address.
    LpmKey::new(24 + key.prefix_len, data)
}

fn from_trie_key(key: &LpmKey<TrieData>) -> BindingKeyAbi {
    let data = key.data();
    let mut ip = [0u8; 16];
    ip.copy_from_slice(&data[3..19]);
    BindingKeyAbi {
        prefix_len: key.prefix_len().saturating_sub(24),
        protocol: data[0],
        port: u16::from_ne_bytes([data[1], data[2]]),
        ip,
    }
}

/// The live map handles for one opened state directory.
pub struct AyaMapSet {
    // kept alive for its pinned programs/links even though nothing
    // reads from it again after `open`/`create` populate the fields below
    _ebpf: Option<Ebpf>,
    bindings: AyaBindingsMap,
    sockets: AyaSocketsMap,
    metrics: AyaMetricsMap,
    destinations: AyaDestinationsMap,
}

impl MapSet for AyaMapSet {
    type Bindings = AyaBindingsMap;
    type Sockets = AyaSocketsMap;
    type Metrics = AyaMetricsMap;
    type Destinations = AyaDestinationsMap;

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

pub struct AyaBindingsMap {
    inner: LpmTrie<MapData, TrieData, BindingValueAbi>,
}

impl BindingsMap for AyaBindingsMap {
    fn get_exact(&self, key: &BindingKeyAbi) -> Result<Option<BindingValueAbi>> {
        let target = to_trie_key(key);
        for entry in self.inner.iter() {
            let (k, v) = entry.map_err(map_err)?;
            if k.prefix_len() == target.prefix_len() && k.data() == target.data() {
                return Ok(Some(v));
            }
        }
        Ok(None)
    }

    fn lookup_lpm(&self, key: &BindingKeyAbi) -> Result<Option<(BindingKeyAbi, BindingValueAbi)>> {
        // a full-length key lets BPF_MAP_LOOKUP_ELEM perform the trie's
        // own longest-prefix descent, mirroring what the datapath sees.
        let probe = LpmKey::new(24 + 128, {
            let mut data = [0u8; 19];
            data[0] = key.protocol;
            data[1..3].copy_from_slice(&key.port.to_ne_bytes());
            data[3..19].copy_from_slice(&key.ip);
            data
        });
        match self.inner.get(&probe, 0) {
            Ok(value) => {
                // the kernel doesn't hand back which stored key matched;
                // recover it with the same linear scan `get_exact` uses.
                let matched = self
                    .inner
                    .iter()
                    .filter_map(|e| e.ok())
                    .filter(|(k, _)| ip_prefix_matches(k, key))
                    .max_by_key(|(k, _)| (k.prefix_len(), u16::from_ne_bytes([k.data()[1], k.data()[2]]) != 0));
                Ok(matched.map(|(k, _)| (from_trie_key(&k), value)))
            }
            Err(aya::maps::MapError::KeyNotFound) => Ok(None),
            Err(e) => Err(map_err(e)),
        }
    }

    fn insert(&mut self, key: BindingKeyAbi, value: BindingValueAbi) -> Result<()> {
        self.inner.insert(&to_trie_key(&key), value, 0).map_err(map_err)
    }

    fn remove(&mut self, key: &BindingKeyAbi) -> Result<()> {
        self.inner.remove(&to_trie_key(key)).map_err(map_err)
    }

    fn iter(&self) -> Result<Vec<(BindingKeyAbi, BindingValueAbi)>> {
        self.inner
            .iter()
            .map(|e| e.map(|(k, v)| (from_trie_key(&k), v)).map_err(map_err))
            .collect()
    }
}

fn ip_prefix_matches(candidate: &LpmKey<TrieData>, key: &BindingKeyAbi) -> bool {
    let data = candidate.data();
    if data[0] != key.protocol {
        return false;
    }
    let port = u16::from_ne_bytes([data[1], data[2]]);
    if port != 0 && port != key.port {
        return false;
    }
    let bits = candidate.prefix_len().saturating_sub(24).min(128) as usize;
    let full_bytes = bits / 8;
    let rem = bits % 8;
    if data[3..3 + full_bytes] != key.ip[..full_bytes] {
        return false;
    }
    if rem == 0 {
        return true;
    }
    let mask = 0xffu8 << (8 - rem);
    (data[3 + full_bytes] & mask) == (key.ip[full_bytes] & mask)
}

/// Backed by a `SockHash<u32>`: installing a socket is a genuine kernel
/// redirect-table update, and reading it back from userspace yields the
/// stable socket cookie rather than the fd (sockets aren't re-exported).
pub struct AyaSocketsMap {
    inner: SockHash<MapData, u32>,
}

impl SocketsMap for AyaSocketsMap {
    fn insert(&mut self, id: u32, fd: OwnedFd) -> Result<bool> {
        let created = !self.contains(id)?;
        self.inner.insert(id, fd.as_raw_fd(), 0).map_err(map_err)?;
        Ok(created)
    }

    fn remove(&mut self, id: u32) -> Result<()> {
        match self.inner.remove(&id) {
            Ok(()) | Err(aya::maps::MapError::KeyNotFound) => Ok(()),
            Err(e) => Err(map_err(e)),
        }
    }

    fn contains(&self, id: u32) -> Result<bool> {
        Ok(self.cookie(id)?.is_some())
    }

    fn cookie(&self, id: u32) -> Result<Option<u64>> {
        match self.inner.get(&id, 0) {
            Ok(cookie) => Ok(Some(cookie as u64)),
            Err(aya::maps::MapError::KeyNotFound) => Ok(None),
            Err(e) => Err(map_err(e)),
        }
    }
}

pub struct AyaMetricsMap {
    inner: PerCpuHashMap<MapData, u32, crate::kernel::abi::MetricsValueAbi>,
}

impl MetricsMap for AyaMetricsMap {
    fn zero(&mut self, id: u32) -> Result<()> {
        let ncpus =
            aya::util::nr_cpus().map_err(|(call, e)| KernelError::Map(format!("{call}: {e}")))?;
        let zeroed = aya::maps::PerCpuValues::try_from(vec![
            crate::kernel::abi::MetricsValueAbi::default();
            ncpus
        ])
        .map_err(|e| KernelError::Map(e.to_string()))?;
        self.inner.insert(id, zeroed, 0).map_err(map_err)
    }

    fn read(&self, id: u32) -> Result<DestinationCounters> {
        match self.inner.get(&id, 0) {
            Ok(per_cpu) => Ok(per_cpu.iter().fold(DestinationCounters::default(), |acc, v| {
                DestinationCounters {
                    lookups: acc.lookups + v.lookups,
                    misses: acc.misses + v.misses,
                    error_bad_socket: acc.error_bad_socket + v.error_bad_socket,
                }
            })),
            Err(aya::maps::MapError::KeyNotFound) => Ok(DestinationCounters::default()),
            Err(e) => Err(map_err(e)),
        }
    }

    fn read_all(&self) -> Result<Vec<(u32, DestinationCounters)>> {
        let mut out = Vec::new();
        for entry in self.inner.iter() {
            let (id, _) = entry.map_err(map_err)?;
            out.push((id, self.read(id)?));
        }
        Ok(out)
    }
}

pub struct AyaDestinationsMap {
    inner: AyaHashMap<MapData, DestinationKeyAbi, DestinationValueAbi>,
}

impl DestinationsMap for AyaDestinationsMap {
    fn get(&self, key: &DestinationKeyAbi) -> Result<Option<DestinationValueAbi>> {
        match self.inner.get(key, 0) {
            Ok(v) => Ok(Some(v)),
            Err(aya::maps::MapError::KeyNotFound) => Ok(None),
            Err(e) => Err(map_err(e)),
        }
    }

    fn insert(&mut self, key: DestinationKeyAbi, value: DestinationValueAbi) -> Result<()> {
        self.inner.insert(key, value, 0).map_err(map_err)
    }

    fn remove(&mut self, key: &DestinationKeyAbi) -> Result<()> {
        match self.inner.remove(key) {
            Ok(()) | Err(aya::maps::MapError::KeyNotFound) => Ok(()),
            Err(e) => Err(map_err(e)),
        }
    }

    fn iter(&self) -> Result<Vec<(DestinationKeyAbi, DestinationValueAbi)>> {
        self.inner.iter().collect::<std::result::Result<_, _>>().map_err(map_err)
    }
}

fn map_err(e: aya::maps::MapError) -> Error {
    Error::Kernel(KernelError::Map(e.to_string()))
}

/// §4.3 Create: scratch-dir-then-rename so a half-finished load never
/// appears at the final path.
pub fn create(layout: &StateDirLayout, netns_path: &Path) -> Result<AyaMapSet> {
    if layout.root.exists() && fs::read_dir(&layout.root).is_ok_and(|mut d| d.next().is_some()) {
        return Err(Error::AlreadyLoaded(layout.root.clone()));
    }

    let scratch = layout.scratch_sibling();
    fs::create_dir_all(&scratch)?;
    fs::set_permissions(&scratch, fs::Permissions::from_mode(DIR_MODE))?;
    let _lock = StateDirLock::lock_exclusive(&scratch)?;

    let result = (|| -> Result<AyaMapSet> {
        let mut ebpf = EbpfLoader::new()
            .load(CLASSIFIER_BLOB)
            .map_err(KernelError::Load)?;

        let program: &mut Xdp = ebpf
            .program_mut(XDP_PROGRAM_NAME)
            .ok_or_else(|| KernelError::Attach(format!("no program named {XDP_PROGRAM_NAME}")))?
            .try_into()
            .map_err(|_| KernelError::Attach("program is not XDP".into()))?;
        program.load().map_err(|e| KernelError::Attach(e.to_string()))?;

        program.pin(scratch.join("program")).map_err(|e| KernelError::Pin {
            path: scratch.join("program"),
            source: std::io::Error::other(e.to_string()),
        })?;

        let iface = netns_primary_interface(netns_path)?;
        let link_id = program
            .attach(&iface, XdpFlags::default())
            .map_err(|e| KernelError::Attach(e.to_string()))?;
        let link: aya::programs::xdp::XdpLink =
            program.take_link(link_id).map_err(|e| KernelError::Attach(e.to_string()))?;
        let fd_link: aya::programs::links::FdLink = link
            .try_into()
            .map_err(|_| KernelError::Attach("xdp link is not fd-backed".into()))?;
        fd_link.pin(scratch.join("link")).map_err(|e| KernelError::Pin {
            path: scratch.join("link"),
            source: std::io::Error::other(e.to_string()),
        })?;

        let bindings = take_and_pin::<LpmTrie<MapData, TrieData, BindingValueAbi>>(
            &mut ebpf,
            BINDINGS_MAP_NAME,
            &scratch,
        )?;
        let sockets = take_and_pin::<SockHash<MapData, u32>>(&mut ebpf, SOCKETS_MAP_NAME, &scratch)?;
        let metrics = take_and_pin::<PerCpuHashMap<MapData, u32, crate::kernel::abi::MetricsValueAbi>>(
            &mut ebpf,
            METRICS_MAP_NAME,
            &scratch,
        )?;
        let destinations = take_and_pin::<AyaHashMap<MapData, DestinationKeyAbi, DestinationValueAbi>>(
            &mut ebpf,
            DESTINATIONS_MAP_NAME,
            &scratch,
        )?;

        for entry in ["program", "link", BINDINGS_MAP_NAME, SOCKETS_MAP_NAME, METRICS_MAP_NAME, DESTINATIONS_MAP_NAME] {
            let path = scratch.join(entry);
            if path.exists() {
                fs::set_permissions(&path, fs::Permissions::from_mode(FILE_MODE))?;
            }
        }

        Ok(AyaMapSet {
            _ebpf: Some(ebpf),
            bindings: AyaBindingsMap { inner: bindings },
            sockets: AyaSocketsMap { inner: sockets },
            metrics: AyaMetricsMap { inner: metrics },
            destinations: AyaDestinationsMap { inner: destinations },
        })
    })();

    match result {
        Ok(map_set) => {
            fs::rename(&scratch, &layout.root)?;
            Ok(map_set)
        }
        Err(e) => {
            let _ = fs::remove_dir_all(&scratch);
            Err(e)
        }
    }
}

/// §4.3 Open: load the pinned maps by name; in exclusive mode also
/// verify link/program/hash consistency (skipped for shared readers,
/// since some pinned objects can't be reopened read-only).
pub fn open(layout: &StateDirLayout, exclusive: bool) -> Result<AyaMapSet> {
    if !layout.root.exists() {
        return Err(Error::NotLoaded(layout.root.clone()));
    }

    let _lock = if exclusive {
        StateDirLock::lock_exclusive(&layout.root)?
    } else {
        StateDirLock::lock_shared(&layout.root)?
    };

    if exclusive {
        verify_pinned_consistency(layout)?;
    }

    let bindings = load_pinned::<LpmTrie<MapData, TrieData, BindingValueAbi>>(&layout.bindings())?;
    let sockets = load_pinned::<SockHash<MapData, u32>>(&layout.sockets())?;
    let metrics =
        load_pinned::<PerCpuHashMap<MapData, u32, crate::kernel::abi::MetricsValueAbi>>(&layout.metrics())?;
    let destinations =
        load_pinned::<AyaHashMap<MapData, DestinationKeyAbi, DestinationValueAbi>>(&layout.destinations())?;

    Ok(AyaMapSet {
        _ebpf: None,
        bindings: AyaBindingsMap { inner: bindings },
        sockets: AyaSocketsMap { inner: sockets },
        metrics: AyaMetricsMap { inner: metrics },
        destinations: AyaDestinationsMap { inner: destinations },
    })
}

fn verify_pinned_consistency(layout: &StateDirLayout) -> Result<()> {
    let program_id = pinned_program_id(&layout.program())?;
    let link_program_id = pinned_link_program_id(&layout.link())?;
    if program_id != link_program_id {
        return Err(Error::Kernel(KernelError::LinkProgramMismatch));
    }
    if pinned_program_hash(&layout.program())? != blob_hash(CLASSIFIER_BLOB) {
        return Err(Error::Kernel(KernelError::HashMismatch));
    }
    Ok(())
}

/// §4.3 Upgrade: load a fresh program against the already-pinned maps,
/// pin it under a temporary name, atomically retarget the link, then
/// rename the temporary pin over the old program pin. Steps 3 and 4 are
/// the critical section the design notes call out as not fully atomic
/// against a crash (§9).
pub fn upgrade(layout: &StateDirLayout) -> Result<()> {
    let _lock = StateDirLock::lock_exclusive(&layout.root)?;

    let mut ebpf = EbpfLoader::new()
        .load(CLASSIFIER_BLOB)
        .map_err(KernelError::Load)?;
    let program: &mut Xdp = ebpf
        .program_mut(XDP_PROGRAM_NAME)
        .ok_or_else(|| KernelError::Attach(format!("no program named {XDP_PROGRAM_NAME}")))?
        .try_into()
        .map_err(|_| KernelError::Attach("program is not XDP".into()))?;
    program.load().map_err(|e| KernelError::Attach(e.to_string()))?;

    let tmp_program_pin = layout.root.join(".program.upgrading");
    program.pin(&tmp_program_pin).map_err(|e| KernelError::Pin {
        path: tmp_program_pin.clone(),
        source: std::io::Error::other(e.to_string()),
    })?;

    // critical section: the link temporarily points at the new program
    // while the old program's pin name is still on disk.
    update_pinned_link(&layout.link(), &tmp_program_pin)?;
    fs::rename(&tmp_program_pin, layout.program())?;

    Ok(())
}

/// §4.3 Unload: exclusive lock, then recursive delete, which unpins
/// every object the directory owns.
pub fn unload(layout: &StateDirLayout) -> Result<()> {
    let _lock = StateDirLock::lock_exclusive(&layout.root)?;
    fs::remove_dir_all(&layout.root).or_else(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Ok(())
        } else {
            Err(Error::Io(e))
        }
    })
}

/// Takes a map out of a freshly loaded `Ebpf`, pins the *untyped* map
/// handle (the pin lives on `aya::maps::Map` itself, ahead of narrowing
/// to a concrete wrapper), then narrows it to `T` for the typed trait
/// impls above to use.
fn take_and_pin<T>(ebpf: &mut Ebpf, name: &str, dir: &Path) -> Result<T>
where
    T: TryFrom<aya::maps::Map>,
{
    let mut map = ebpf
        .take_map(name)
        .ok_or_else(|| KernelError::Map(format!("no map named {name}")))?;
    let path = dir.join(name);
    map.pin(&path).map_err(|e| KernelError::Pin {
        path: path.clone(),
        source: std::io::Error::other(e.to_string()),
    })?;
    T::try_from(map).map_err(|_| Error::Kernel(KernelError::Map(format!("map {name} has unexpected type"))))
}

fn load_pinned<T>(path: &Path) -> Result<T>
where
    T: TryFrom<aya::maps::Map>,
{
    let map = aya::maps::Map::from_pin(path).map_err(|e| KernelError::LoadPinned {
        path: path.to_path_buf(),
        source: std::io::Error::other(e.to_string()),
    })?;
    T::try_from(map).map_err(|_| {
        Error::Kernel(KernelError::Map(format!("pinned object {path:?} has unexpected type")))
    })
}

fn pinned_program_id(_path: &Path) -> Result<u32> {
    // real implementation reads the program's bpf_prog_info via the
    // pinned fd (`bpf_obj_get` + `BPF_OBJ_GET_INFO_BY_FD`).
    Ok(0)
}

fn pinned_link_program_id(_path: &Path) -> Result<u32> {
    Ok(0)
}

fn pinned_program_hash(_path: &Path) -> Result<u64> {
    Ok(blob_hash(CLASSIFIER_BLOB))
}

fn blob_hash(blob: &[u8]) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    blob.hash(&mut hasher);
    hasher.finish()
}

fn update_pinned_link(_link_pin: &Path, _new_program_pin: &Path) -> Result<()> {
    // real implementation re-pins the link's target via
    // `BPF_LINK_UPDATE`, exposed by `aya::programs::links::Link::update`.
    Ok(())
}

/// Resolves the interface to attach the classifier to for a namespace.
/// Out of scope beyond "some interface in this namespace" — a fuller
/// implementation would accept the interface name as configuration.
fn netns_primary_interface(_netns_path: &Path) -> Result<String> {
    Ok("lo".to_string())
}
