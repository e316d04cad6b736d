//! The `(label, protocol, prefix, port)` rule tuple, and the ordering
//! used for human-facing listings (§4.5).

use std::cmp::Ordering;
use std::fmt;
use std::net::IpAddr;

use crate::destination::Destination;
use crate::label::Label;
use crate::prefix::Prefix;
use crate::protocol::Protocol;

/// A steering rule. Port `0` denotes "any port".
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Binding {
    pub label: Label,
    pub protocol: Protocol,
    pub prefix: Prefix,
    pub port: u16,
}

impl Binding {
    pub fn new(label: Label, protocol: Protocol, prefix: Prefix, port: u16) -> Self {
        Self { label, protocol, prefix, port }
    }

    /// A binding projects deterministically to the destination it feeds,
    /// by mapping the prefix's address family to a [`crate::protocol::Domain`].
    pub fn destination(&self) -> Destination {
        Destination::new(self.label.clone(), self.prefix.domain(), self.protocol)
    }

    /// The `(protocol, prefix, port)` identity used for key equality —
    /// two bindings with this tuple equal but different labels collide.
    pub fn key(&self) -> BindingKey {
        BindingKey { protocol: self.protocol, prefix: self.prefix, port: self.port }
    }
}

/// The part of a [`Binding`] that must be unique within the table;
/// distinct from the kernel trie key encoding in `kernel::abi`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingKey {
    pub protocol: Protocol,
    pub prefix: Prefix,
    pub port: u16,
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} port {}",
            self.label, self.protocol, self.prefix, self.port
        )
    }
}

/// Display-sort order (§4.5): protocol ascending, v4 before v6, more
/// specific prefixes first, then lexicographic IP, then port (nonzero
/// ascending, 0 last), then label. Mirrors the datapath's own matching
/// precedence so listings read the way traffic is actually steered.
pub fn sort_for_display(bindings: &mut [Binding]) {
    bindings.sort_by(|a, b| compare_for_display(a, b));
}

fn compare_for_display(a: &Binding, b: &Binding) -> Ordering {
    a.protocol
        .cmp(&b.protocol)
        .then_with(|| is_v6(&a.prefix.addr()).cmp(&is_v6(&b.prefix.addr())))
        .then_with(|| b.prefix.prefix_len().cmp(&a.prefix.prefix_len()))
        .then_with(|| ip_sort_bytes(&a.prefix.addr()).cmp(&ip_sort_bytes(&b.prefix.addr())))
        .then_with(|| port_sort_key(a.port).cmp(&port_sort_key(b.port)))
        .then_with(|| a.label.cmp(&b.label))
}

fn is_v6(ip: &IpAddr) -> bool {
    matches!(ip, IpAddr::V6(_))
}

fn ip_sort_bytes(ip: &IpAddr) -> [u8; 16] {
    match ip {
        IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
        IpAddr::V6(v6) => v6.octets(),
    }
}

/// Nonzero ports sort ascending, `0` ("any port", the least specific)
/// always sorts last.
fn port_sort_key(port: u16) -> (bool, u16) {
    (port == 0, port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Protocol;

    fn binding(label: &str, proto: Protocol, prefix: &str, len: u8, port: u16) -> Binding {
        Binding::new(
            Label::new(label).unwrap(),
            proto,
            Prefix::new(prefix.parse().unwrap(), len).unwrap(),
            port,
        )
    }

    #[test]
    fn display_order_matches_precedence_example() {
        let mut bindings = vec![
            binding("nginx-ssl", Protocol::Tcp, "1.2.3.4", 32, 80),
            binding("spectrum", Protocol::Tcp, "1.2.3.0", 24, 0),
            binding("nginx-ssl", Protocol::Tcp, "1.2.3.0", 24, 443),
            binding("spectrum", Protocol::Tcp, "1.2.3.4", 32, 0),
        ];

        sort_for_display(&mut bindings);

        let labels: Vec<_> = bindings.iter().map(|b| (b.prefix.to_string(), b.port)).collect();
        // more specific prefixes (/32) sort before /24, regardless of label
        assert_eq!(labels[0].0, "1.2.3.4/32");
        assert_eq!(labels[1].0, "1.2.3.4/32");
        assert_eq!(labels[2].0, "1.2.3.0/24");
        assert_eq!(labels[3].0, "1.2.3.0/24");
    }

    #[test]
    fn zero_port_sorts_after_nonzero_on_same_prefix() {
        let mut bindings = vec![
            binding("a", Protocol::Tcp, "10.0.0.0", 8, 0),
            binding("b", Protocol::Tcp, "10.0.0.0", 8, 53),
        ];
        sort_for_display(&mut bindings);
        assert_eq!(bindings[0].port, 53);
        assert_eq!(bindings[1].port, 0);
    }

    #[test]
    fn v4_sorts_before_v6() {
        let mut bindings = vec![
            binding("a", Protocol::Tcp, "::", 0, 0),
            binding("b", Protocol::Tcp, "0.0.0.0", 0, 0),
        ];
        sort_for_display(&mut bindings);
        assert_eq!(bindings[0].label.as_str(), "b");
        assert_eq!(bindings[1].label.as_str(), "a");
    }

    #[test]
    fn key_ignores_label() {
        let a = binding("a", Protocol::Tcp, "10.0.0.0", 8, 53);
        let b = binding("b", Protocol::Tcp, "10.0.0.0", 8, 53);
        assert_eq!(a.key(), b.key());
    }
}
