//! IP prefixes, stored in canonical masked form (I4) with IPv4-mapped
//! IPv6 prefixes rejected at the boundary (I6).

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::IpNet;

use crate::error::InvalidPrefix;
use crate::protocol::Domain;

/// A canonically-masked `(IP, prefix-length)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Prefix(IpNet);

impl Prefix {
    /// Build a canonical prefix, masking host bits and rejecting
    /// IPv4-mapped IPv6 addresses and out-of-range lengths.
    pub fn new(ip: IpAddr, prefix_len: u8) -> Result<Self, InvalidPrefix> {
        if let IpAddr::V6(v6) = ip
            && v6.to_ipv4_mapped().is_some()
        {
            return Err(InvalidPrefix::V4MappedV6(v6));
        }

        let max = match ip {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix_len > max {
            return Err(InvalidPrefix::LengthOutOfRange { len: prefix_len, max });
        }

        let net = IpNet::new(ip, prefix_len).expect("length already validated above");
        Ok(Self(net.trunc()))
    }

    pub fn v4_all() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0).expect("0.0.0.0/0 is always valid")
    }

    pub fn v6_all() -> Self {
        Self::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0).expect("::/0 is always valid")
    }

    pub fn addr(&self) -> IpAddr {
        self.0.addr()
    }

    pub fn prefix_len(&self) -> u8 {
        self.0.prefix_len()
    }

    pub fn domain(&self) -> Domain {
        Domain::from_ip(self.addr())
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.0.contains(&ip)
    }

    /// `prefix_len` with 96 added for IPv4 so v4 and v6 prefixes share a
    /// single trie depth, as the kernel `bindings` map key requires (§4.5).
    pub fn trie_prefix_len(&self) -> u32 {
        match self.addr() {
            IpAddr::V4(_) => u32::from(self.prefix_len()) + 96,
            IpAddr::V6(_) => u32::from(self.prefix_len()),
        }
    }

    /// Canonical 16-byte representation used as the trie key's IP field.
    pub fn to_trie_bytes(&self) -> [u8; 16] {
        match self.addr() {
            IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
            IpAddr::V6(v6) => v6.octets(),
        }
    }

    /// Inverse of [`Self::trie_prefix_len`] + [`Self::to_trie_bytes`].
    pub fn from_trie_fields(trie_prefix_len: u32, ip: [u8; 16]) -> Result<Self, InvalidPrefix> {
        if trie_prefix_len >= 96 {
            let v4_len = trie_prefix_len - 96;
            if v4_len > 32 {
                return Err(InvalidPrefix::LengthOutOfRange {
                    len: v4_len as u8,
                    max: 32,
                });
            }
            let v6 = Ipv6Addr::from(ip);
            let v4 = v6
                .to_ipv4_mapped()
                .or_else(|| v6.to_ipv4())
                .unwrap_or(Ipv4Addr::UNSPECIFIED);
            Self::new(IpAddr::V4(v4), v4_len as u8)
        } else {
            Self::new(IpAddr::V6(Ipv6Addr::from(ip)), trie_prefix_len as u8)
        }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
