//! Bit-exact wire layouts for the kernel maps (§6). These structs are
//! `#[repr(C)]` and must never gain a field without updating the pinned
//! classifier blob in lockstep.

use crate::binding::Binding;
use crate::error::{Error, InvalidPrefix};
use crate::prefix::Prefix;
use crate::protocol::Protocol;

/// `bindings` map key: `u32 prefix_len; u8 protocol; u16 port; u8[16] ip`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingKeyAbi {
    pub prefix_len: u32,
    pub protocol: u8,
    pub port: u16,
    pub ip: [u8; 16],
}

impl BindingKeyAbi {
    pub fn encode(protocol: Protocol, prefix: Prefix, port: u16) -> Self {
        Self {
            prefix_len: prefix.trie_prefix_len(),
            protocol: protocol.as_u8(),
            port,
            ip: prefix.to_trie_bytes(),
        }
    }

    pub fn decode(&self) -> Result<(Protocol, Prefix, u16), Error> {
        let protocol = Protocol::try_from(self.protocol)
            .map_err(|p| Error::StateCorrupt(format!("unknown protocol byte {p}")))?;
        let prefix = Prefix::from_trie_fields(self.prefix_len, self.ip)
            .map_err(|e: InvalidPrefix| Error::StateCorrupt(e.to_string()))?;
        Ok((protocol, prefix, self.port))
    }
}

impl From<&Binding> for BindingKeyAbi {
    fn from(binding: &Binding) -> Self {
        Self::encode(binding.protocol, binding.prefix, binding.port)
    }
}

/// `bindings` map value: `u32 destination_id; u32 prefix_len`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingValueAbi {
    pub destination_id: u32,
    pub prefix_len: u32,
}

/// `sockets` map key: `u32 destination_id`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketKeyAbi {
    pub destination_id: u32,
}

/// `destination_metrics` per-CPU value: `u64 lookups; u64 misses; u64 error_bad_socket`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsValueAbi {
    pub lookups: u64,
    pub misses: u64,
    pub error_bad_socket: u64,
}

/// `destinations` (userspace-only) key: `u8[255] label; u8 domain; u8 protocol`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DestinationKeyAbi {
    pub label: [u8; crate::label::MAX_LABEL_LEN],
    pub domain: u8,
    pub protocol: u8,
}

/// `destinations` value: `u32 id; u32 refcount`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestinationValueAbi {
    pub id: u32,
    pub refcount: u32,
}

// SAFETY: all of these are `#[repr(C)]`, contain only integer fields (or
// fixed-size arrays of them), and have no padding-sensitive invariants —
// exactly what `aya::Pod` requires to hand them to the kernel as raw map
// key/value bytes.
unsafe impl aya::Pod for BindingKeyAbi {}
unsafe impl aya::Pod for BindingValueAbi {}
unsafe impl aya::Pod for MetricsValueAbi {}
unsafe impl aya::Pod for DestinationKeyAbi {}
unsafe impl aya::Pod for DestinationValueAbi {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::Label;
    use crate::protocol::Protocol;

    #[test]
    fn binding_key_round_trips() {
        let prefix = Prefix::new("1.2.3.0".parse().unwrap(), 24).unwrap();
        let abi = BindingKeyAbi::encode(Protocol::Tcp, prefix, 443);
        let (protocol, decoded_prefix, port) = abi.decode().unwrap();
        assert_eq!(protocol, Protocol::Tcp);
        assert_eq!(decoded_prefix, prefix);
        assert_eq!(port, 443);
    }

    #[test]
    fn binding_to_abi_preserves_fields() {
        let binding = Binding::new(
            Label::new("spectrum").unwrap(),
            Protocol::Udp,
            Prefix::new("2001:db8::".parse().unwrap(), 32).unwrap(),
            53,
        );
        let abi = BindingKeyAbi::from(&binding);
        let (protocol, prefix, port) = abi.decode().unwrap();
        assert_eq!(protocol, binding.protocol);
        assert_eq!(prefix, binding.prefix);
        assert_eq!(port, binding.port);
    }
}
