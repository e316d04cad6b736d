//! The two finite, non-extensible enumerations that key every table in
//! this crate: [`Protocol`] and [`Domain`]. Both serialize to a single
//! byte matching the kernel ABI (§6) rather than an arbitrary encoding.

use std::fmt;

/// Transport protocol, stored as its IANA protocol number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum Protocol {
    Tcp = 6,
    Udp = 17,
}

impl Protocol {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Protocol {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            6 => Ok(Self::Tcp),
            17 => Ok(Self::Udp),
            other => Err(other),
        }
    }
}

impl From<Protocol> for u8 {
    fn from(value: Protocol) -> Self {
        value.as_u8()
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

/// Address family, stored as its AF_* number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum Domain {
    V4 = libc::AF_INET as u8,
    V6 = libc::AF_INET6 as u8,
}

impl Domain {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_ip(ip: std::net::IpAddr) -> Self {
        match ip {
            std::net::IpAddr::V4(_) => Self::V4,
            std::net::IpAddr::V6(_) => Self::V6,
        }
    }
}

impl TryFrom<u8> for Domain {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value as i32 {
            libc::AF_INET => Ok(Self::V4),
            libc::AF_INET6 => Ok(Self::V6),
            _ => Err(value),
        }
    }
}

impl From<Domain> for u8 {
    fn from(value: Domain) -> Self {
        value.as_u8()
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4 => write!(f, "v4"),
            Self::V6 => write!(f, "v6"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_round_trips_through_u8() {
        for p in [Protocol::Tcp, Protocol::Udp] {
            assert_eq!(Protocol::try_from(u8::from(p)), Ok(p));
        }
    }

    #[test]
    fn protocol_rejects_unknown_numbers() {
        assert_eq!(Protocol::try_from(1), Err(1));
    }

    #[test]
    fn domain_round_trips_through_u8() {
        for d in [Domain::V4, Domain::V6] {
            assert_eq!(Domain::try_from(u8::from(d)), Ok(d));
        }
    }

    #[test]
    fn domain_from_ip() {
        assert_eq!(Domain::from_ip("127.0.0.1".parse().unwrap()), Domain::V4);
        assert_eq!(Domain::from_ip("::1".parse().unwrap()), Domain::V6);
    }
}
