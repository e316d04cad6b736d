//! C5: `AddBinding`/`RemoveBinding`/`ListBindings`/`ReplaceBindings`
//! against the `bindings` LPM-trie map (§4.5).

use std::collections::HashSet;

use crate::binding::{Binding, BindingKey};
use crate::dest_table::DestinationTable;
use crate::error::{Error, Result};
use crate::kernel::abi::BindingKeyAbi;
use crate::kernel::traits::{BindingsMap, DestinationsMap, MapSet};
use crate::label::Label;
use crate::prefix::Prefix;
use crate::protocol::Protocol;

pub struct BindingTable<'a, M: MapSet> {
    maps: &'a mut M,
    capacity: u32,
}

impl<'a, M: MapSet> BindingTable<'a, M> {
    pub fn new(maps: &'a mut M, capacity: u32) -> Self {
        Self { maps, capacity }
    }

    /// Installs `binding`, acquiring a destination ID for its projected
    /// destination and superseding (and releasing) any entry that is
    /// truly the same binding — same key, not merely a less-specific
    /// prefix the trie's longest-prefix lookup also matches.
    pub fn add(&mut self, binding: &Binding) -> Result<()> {
        let key = BindingKeyAbi::from(binding);

        let superseded = self.maps.bindings().get_exact(&key)?;

        let destination = binding.destination();
        let id = DestinationTable::new(self.maps, self.capacity).acquire(&destination)?;

        self.maps.bindings().insert(
            key,
            crate::kernel::abi::BindingValueAbi {
                destination_id: id.0,
                prefix_len: key.prefix_len,
            },
        )?;

        if let Some(previous) = superseded {
            DestinationTable::new(self.maps, self.capacity).release_by_id(previous.destination_id.into())?;
        }

        Ok(())
    }

    /// Removes `binding`; fails if no entry exists for its exact key, or
    /// if the stored destination doesn't belong to this binding's
    /// projected destination (guards against stale/foreign entries).
    pub fn remove(&mut self, binding: &Binding) -> Result<()> {
        let key = BindingKeyAbi::from(binding);
        let existing = self.maps.bindings().get_exact(&key)?.ok_or(Error::BindingNotFound)?;

        let destination = binding.destination();
        let owns = DestinationTable::new(self.maps, self.capacity)
            .has_id(&destination, existing.destination_id.into())?;
        if !owns {
            return Err(Error::BindingNotFound);
        }

        self.maps.bindings().remove(&key)?;
        DestinationTable::new(self.maps, self.capacity).release(&destination)?;
        Ok(())
    }

    /// Joins every `bindings` entry with its destination record to
    /// recover the label. Order is unspecified; callers sort for
    /// display with [`crate::binding::sort_for_display`].
    pub fn list(&mut self) -> Result<Vec<Binding>> {
        let entries = self.maps.bindings().iter()?;
        let mut out = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let (protocol, prefix, port) = key.decode()?;
            let label = find_label(self.maps, value.destination_id)?;
            out.push(Binding::new(label, protocol, prefix, port));
        }
        Ok(out)
    }

    /// Diffs the stored set against `new_set` by `(protocol, prefix,
    /// port)` key equality and applies removals before additions — the
    /// conservative ordering noted in §9 pending an atomic map swap.
    pub fn replace(&mut self, new_set: &[Binding]) -> Result<(Vec<Binding>, Vec<Binding>)> {
        let mut seen = HashSet::new();
        for binding in new_set {
            if !seen.insert(binding.key()) {
                return Err(Error::DuplicateBinding {
                    protocol: binding.protocol,
                    prefix: binding.prefix,
                    port: binding.port,
                });
            }
        }

        let current = self.list()?;
        let current_keys: std::collections::HashMap<BindingKey, &Binding> =
            current.iter().map(|b| (b.key(), b)).collect();
        let new_keys: std::collections::HashMap<BindingKey, &Binding> =
            new_set.iter().map(|b| (b.key(), b)).collect();

        let removed: Vec<Binding> = current
            .iter()
            .filter(|b| !new_keys.contains_key(&b.key()))
            .cloned()
            .collect();
        let added: Vec<Binding> = new_set
            .iter()
            .filter(|b| !current_keys.contains_key(&b.key()))
            .cloned()
            .collect();

        for binding in &removed {
            self.remove(binding)?;
        }
        for binding in &added {
            self.add(binding)?;
        }

        Ok((added, removed))
    }
}

fn find_label<M: MapSet>(maps: &mut M, destination_id: u32) -> Result<Label> {
    let (key, _) = maps
        .destinations()
        .iter()?
        .into_iter()
        .find(|(_, v)| v.id == destination_id)
        .ok_or_else(|| Error::StateCorrupt(format!("binding references unknown destination ID {destination_id}")))?;
    Ok(crate::label::Label::from_fixed_bytes(&key.label)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::mock::MockMapSet;

    fn binding(label: &str, proto: Protocol, prefix: &str, len: u8, port: u16) -> Binding {
        Binding::new(
            Label::new(label).unwrap(),
            proto,
            Prefix::new(prefix.parse().unwrap(), len).unwrap(),
            port,
        )
    }

    #[test]
    fn add_then_list_round_trips() {
        let mut maps = MockMapSet::default();
        let mut table = BindingTable::new(&mut maps, 512);

        let b = binding("spectrum", Protocol::Tcp, "1.2.3.0", 24, 0);
        table.add(&b).unwrap();

        let listed = table.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0], b);
    }

    #[test]
    fn add_twice_supersedes_and_releases_old_destination() {
        let mut maps = MockMapSet::default();
        let mut table = BindingTable::new(&mut maps, 512);

        let first = binding("foo", Protocol::Tcp, "1.2.3.0", 24, 0);
        table.add(&first).unwrap();

        let second = binding("bar", Protocol::Tcp, "1.2.3.0", 24, 0);
        table.add(&second).unwrap();

        let listed = table.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].label.as_str(), "bar");

        let dest_table = DestinationTable::new(&mut maps, 512);
        let _ = dest_table;
        assert_eq!(maps.destinations.entries.len(), 1, "foo's destination record should be released");
    }

    #[test]
    fn remove_releases_destination() {
        let mut maps = MockMapSet::default();
        let mut table = BindingTable::new(&mut maps, 512);

        let b = binding("spectrum", Protocol::Tcp, "1.2.3.0", 24, 0);
        table.add(&b).unwrap();
        table.remove(&b).unwrap();

        assert!(table.list().unwrap().is_empty());
        assert!(maps.destinations.entries.is_empty());
    }

    #[test]
    fn remove_missing_binding_is_an_error() {
        let mut maps = MockMapSet::default();
        let mut table = BindingTable::new(&mut maps, 512);
        let b = binding("spectrum", Protocol::Tcp, "1.2.3.0", 24, 0);
        assert!(matches!(table.remove(&b), Err(Error::BindingNotFound)));
    }

    #[test]
    fn replace_reports_added_and_removed() {
        let mut maps = MockMapSet::default();
        let mut table = BindingTable::new(&mut maps, 512);

        let a = binding("a", Protocol::Tcp, "10.0.0.0", 8, 0);
        let b = binding("b", Protocol::Tcp, "10.0.1.0", 24, 0);
        let c = binding("c", Protocol::Tcp, "10.0.2.0", 24, 0);

        table.add(&a).unwrap();
        table.add(&b).unwrap();

        let (added, removed) = table.replace(&[a.clone(), c.clone()]).unwrap();
        assert_eq!(added, vec![c.clone()]);
        assert_eq!(removed, vec![b]);

        let mut listed = table.list().unwrap();
        crate::binding::sort_for_display(&mut listed);
        assert_eq!(listed.len(), 2);
    }

    #[test]
    fn replace_rejects_duplicate_keys_in_new_set() {
        let mut maps = MockMapSet::default();
        let mut table = BindingTable::new(&mut maps, 512);

        let a = binding("a", Protocol::Tcp, "10.0.0.0", 8, 0);
        let a_dup = binding("a-dup", Protocol::Tcp, "10.0.0.0", 8, 0);

        assert!(matches!(
            table.replace(&[a, a_dup]),
            Err(Error::DuplicateBinding { .. })
        ));
    }

    #[test]
    fn overlapping_prefixes_both_listable_independently() {
        let mut maps = MockMapSet::default();
        let mut table = BindingTable::new(&mut maps, 512);

        let broad = binding("spectrum", Protocol::Tcp, "1.2.3.0", 24, 0);
        let narrow = binding("nginx-ssl", Protocol::Tcp, "1.2.3.4", 32, 443);
        table.add(&broad).unwrap();
        table.add(&narrow).unwrap();

        let mut listed = table.list().unwrap();
        crate::binding::sort_for_display(&mut listed);
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].prefix.prefix_len(), 32);
        assert_eq!(listed[1].prefix.prefix_len(), 24);
    }
}
