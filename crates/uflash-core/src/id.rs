//! Flash identifier
//!
//! IDs are compared prefix-wise: a database entry with a 2-byte ID matches
//! any chip whose first two ID bytes agree, and longer entries win ties.

use serde::{Deserialize, Serialize};

/// Maximum identifier length in bytes
pub const ID_MAX_LEN: usize = 8;

/// A chip identifier of up to [`ID_MAX_LEN`] bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<u8>", into = "Vec<u8>")]
pub struct FlashId {
    /// ID bytes; only the first `len` are meaningful
    pub bytes: [u8; ID_MAX_LEN],
    /// Effective length
    pub len: u8,
}

impl FlashId {
    /// Build from a byte slice (truncated to [`ID_MAX_LEN`])
    pub fn new(bytes: &[u8]) -> Self {
        let mut id = FlashId::default();
        let n = bytes.len().min(ID_MAX_LEN);
        id.bytes[..n].copy_from_slice(&bytes[..n]);
        id.len = n as u8;
        id
    }

    /// The meaningful bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// Strip trailing 0xFF padding to determine the effective length
    pub fn compute_len(&mut self) {
        let mut len = self.len as usize;
        while len > 0 && self.bytes[len - 1] == 0xFF {
            len -= 1;
        }
        self.len = len as u8;
    }

    /// Whether `self` (a database entry) matches the probed `read` ID
    /// prefix-wise
    pub fn matches(&self, read: &FlashId) -> bool {
        self.len > 0
            && self.len <= read.len
            && self.as_slice() == &read.as_slice()[..self.len as usize]
    }

    /// All-0x00 or all-0xFF reads mean no chip answered
    pub fn is_blank(&self) -> bool {
        let s = self.as_slice();
        s.is_empty() || s.iter().all(|&b| b == 0x00) || s.iter().all(|&b| b == 0xFF)
    }
}

impl From<Vec<u8>> for FlashId {
    fn from(v: Vec<u8>) -> Self {
        FlashId::new(&v)
    }
}

impl From<FlashId> for Vec<u8> {
    fn from(id: FlashId) -> Self {
        id.as_slice().to_vec()
    }
}

impl core::fmt::Display for FlashId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for (i, b) in self.as_slice().iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_match_and_padding() {
        let probed = FlashId::new(&[0xEF, 0x40, 0x18]);
        assert!(FlashId::new(&[0xEF, 0x40]).matches(&probed));
        assert!(FlashId::new(&[0xEF, 0x40, 0x18]).matches(&probed));
        assert!(!FlashId::new(&[0xEF, 0x40, 0x17]).matches(&probed));
        assert!(!FlashId::new(&[0xEF, 0x40, 0x18, 0x00]).matches(&probed));

        let mut padded = FlashId::new(&[0xC2, 0x20, 0xFF, 0xFF]);
        padded.compute_len();
        assert_eq!(padded.len, 2);

        assert!(FlashId::new(&[0x00, 0x00, 0x00]).is_blank());
        assert!(FlashId::new(&[0xFF, 0xFF]).is_blank());
        assert!(!probed.is_blank());
    }
}
