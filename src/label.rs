//! Operator-chosen service name, validated once at construction so the
//! rest of the crate can treat it as an opaque, already-valid key.

use std::fmt;

use crate::error::InvalidLabel;

/// Maximum label length in bytes, mirroring the systemd unit-name limit
/// so labels can carry unit names unchanged.
pub const MAX_LABEL_LEN: usize = 255;

/// A non-empty ASCII string, at most [`MAX_LABEL_LEN`] bytes, containing
/// no NUL byte.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Label(String);

impl Label {
    pub fn new(value: impl Into<String>) -> Result<Self, InvalidLabel> {
        let value = value.into();

        if value.is_empty() {
            return Err(InvalidLabel::Empty);
        }

        if value.len() > MAX_LABEL_LEN {
            return Err(InvalidLabel::TooLong { len: value.len() });
        }

        if let Some(offset) = value.bytes().position(|b| b == 0) {
            return Err(InvalidLabel::ContainsNul { offset });
        }

        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Encode into a fixed-size, NUL-padded buffer matching the on-disk
    /// `destinations` map key layout (§6): `u8[255]`.
    pub fn to_fixed_bytes(&self) -> [u8; MAX_LABEL_LEN] {
        let mut buf = [0u8; MAX_LABEL_LEN];
        buf[..self.0.len()].copy_from_slice(self.0.as_bytes());
        buf
    }

    /// Decode from a fixed-size buffer, trimming trailing NUL padding.
    pub fn from_fixed_bytes(buf: &[u8; MAX_LABEL_LEN]) -> Result<Self, InvalidLabel> {
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        let s = String::from_utf8(buf[..end].to_vec())
            .map_err(|_| InvalidLabel::ContainsNul { offset: 0 })?;
        Self::new(s)
    }
}

impl TryFrom<String> for Label {
    type Error = InvalidLabel;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Label> for String {
    fn from(value: Label) -> Self {
        value.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
