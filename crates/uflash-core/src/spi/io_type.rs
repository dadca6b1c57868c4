//! SPI-MEM I/O types
//!
//! An I/O type names one SPI transfer flavor as the tuple
//! (cmd_bw, addr_bw, data_bw, cmd_dtr, addr_dtr, data_dtr). The ordering of
//! the enum is also the throughput ordering used during I/O-mode negotiation:
//! later entries within a width class are faster.

use bitflags::bitflags;

/// One SPI transfer flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum IoType {
    /// 1-1-1 single SPI
    Io1_1_1 = 0,
    /// 1S-1D-1D: single-rate command, double-rate address/data
    Io1s1d1d,
    /// 1D-1D-1D: fully double-rate single
    Io1d1d1d,

    /// 1-1-2 dual output
    Io1_1_2,
    /// 1-2-2 dual I/O
    Io1_2_2,
    /// 2-2-2 DPI
    Io2_2_2,
    /// 1S-2D-2D
    Io1s2d2d,
    /// 2D-2D-2D
    Io2d2d2d,

    /// 1-1-4 quad output
    Io1_1_4,
    /// 1-4-4 quad I/O
    Io1_4_4,
    /// 4-4-4 QPI
    Io4_4_4,
    /// 1S-4D-4D
    Io1s4d4d,
    /// 4D-4D-4D
    Io4d4d4d,

    /// 1-1-8 octal output
    Io1_1_8,
    /// 1-8-8 octal I/O
    Io1_8_8,
    /// 8-8-8 OPI
    Io8_8_8,
    /// 1S-8D-8D
    Io1s8d8d,
    /// 8D-8D-8D
    Io8d8d8d,
}

/// (cmd_bw, addr_bw, data_bw, cmd_dtr, addr_dtr, data_dtr) per type,
/// indexed by discriminant.
const IO_INFO: [(u8, u8, u8, bool, bool, bool); 18] = [
    (1, 1, 1, false, false, false),
    (1, 1, 1, false, true, true),
    (1, 1, 1, true, true, true),
    (1, 1, 2, false, false, false),
    (1, 2, 2, false, false, false),
    (2, 2, 2, false, false, false),
    (1, 2, 2, false, true, true),
    (2, 2, 2, true, true, true),
    (1, 1, 4, false, false, false),
    (1, 4, 4, false, false, false),
    (4, 4, 4, false, false, false),
    (1, 4, 4, false, true, true),
    (4, 4, 4, true, true, true),
    (1, 1, 8, false, false, false),
    (1, 8, 8, false, false, false),
    (8, 8, 8, false, false, false),
    (1, 8, 8, false, true, true),
    (8, 8, 8, true, true, true),
];

const IO_NAMES: [&str; 18] = [
    "1-1-1", "1S-1D-1D", "1D-1D-1D", "1-1-2", "1-2-2", "2-2-2", "1S-2D-2D", "2D-2D-2D", "1-1-4",
    "1-4-4", "4-4-4", "1S-4D-4D", "4D-4D-4D", "1-1-8", "1-8-8", "8-8-8", "1S-8D-8D", "8D-8D-8D",
];

const ALL_IO_TYPES: [IoType; 18] = [
    IoType::Io1_1_1,
    IoType::Io1s1d1d,
    IoType::Io1d1d1d,
    IoType::Io1_1_2,
    IoType::Io1_2_2,
    IoType::Io2_2_2,
    IoType::Io1s2d2d,
    IoType::Io2d2d2d,
    IoType::Io1_1_4,
    IoType::Io1_4_4,
    IoType::Io4_4_4,
    IoType::Io1s4d4d,
    IoType::Io4d4d4d,
    IoType::Io1_1_8,
    IoType::Io1_8_8,
    IoType::Io8_8_8,
    IoType::Io1s8d8d,
    IoType::Io8d8d8d,
];

impl IoType {
    /// All I/O types in negotiation order (slowest first)
    pub const ALL: [IoType; 18] = ALL_IO_TYPES;

    /// Command-phase bus width
    pub const fn cmd_bw(self) -> u8 {
        IO_INFO[self as usize].0
    }

    /// Address-phase bus width
    pub const fn addr_bw(self) -> u8 {
        IO_INFO[self as usize].1
    }

    /// Data-phase bus width
    pub const fn data_bw(self) -> u8 {
        IO_INFO[self as usize].2
    }

    /// Command phase clocked on both edges
    pub const fn cmd_dtr(self) -> bool {
        IO_INFO[self as usize].3
    }

    /// Address phase clocked on both edges
    pub const fn addr_dtr(self) -> bool {
        IO_INFO[self as usize].4
    }

    /// Data phase clocked on both edges
    pub const fn data_dtr(self) -> bool {
        IO_INFO[self as usize].5
    }

    /// Canonical display name, e.g. "1-4-4"
    pub const fn name(self) -> &'static str {
        IO_NAMES[self as usize]
    }

    /// Parse a canonical name back into a type
    pub fn from_name(name: &str) -> Option<IoType> {
        IO_NAMES
            .iter()
            .position(|n| n.eq_ignore_ascii_case(name))
            .map(|i| ALL_IO_TYPES[i])
    }

    /// The capability bit for this type
    pub const fn cap(self) -> IoCaps {
        IoCaps::from_bits_truncate(1 << self as u32)
    }

    /// Whether any phase is double-rate
    pub const fn has_dtr(self) -> bool {
        self.cmd_dtr() || self.addr_dtr() || self.data_dtr()
    }
}

impl core::fmt::Display for IoType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// A set of I/O types, one bit per [`IoType`] discriminant
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct IoCaps: u32 {
        /// 1-1-1
        const IO_1_1_1 = 1 << 0;
        /// 1S-1D-1D
        const IO_1S_1D_1D = 1 << 1;
        /// 1D-1D-1D
        const IO_1D_1D_1D = 1 << 2;
        /// 1-1-2
        const IO_1_1_2 = 1 << 3;
        /// 1-2-2
        const IO_1_2_2 = 1 << 4;
        /// 2-2-2
        const IO_2_2_2 = 1 << 5;
        /// 1S-2D-2D
        const IO_1S_2D_2D = 1 << 6;
        /// 2D-2D-2D
        const IO_2D_2D_2D = 1 << 7;
        /// 1-1-4
        const IO_1_1_4 = 1 << 8;
        /// 1-4-4
        const IO_1_4_4 = 1 << 9;
        /// 4-4-4
        const IO_4_4_4 = 1 << 10;
        /// 1S-4D-4D
        const IO_1S_4D_4D = 1 << 11;
        /// 4D-4D-4D
        const IO_4D_4D_4D = 1 << 12;
        /// 1-1-8
        const IO_1_1_8 = 1 << 13;
        /// 1-8-8
        const IO_1_8_8 = 1 << 14;
        /// 8-8-8
        const IO_8_8_8 = 1 << 15;
        /// 1S-8D-8D
        const IO_1S_8D_8D = 1 << 16;
        /// 8D-8D-8D
        const IO_8D_8D_8D = 1 << 17;
    }
}

impl IoCaps {
    /// Dual data lanes with single command lane
    pub const X2: IoCaps = IoCaps::IO_1_1_2.union(IoCaps::IO_1_2_2);
    /// Quad data lanes with single command lane
    pub const X4: IoCaps = IoCaps::IO_1_1_4.union(IoCaps::IO_1_4_4);
    /// Octal data lanes with single command lane
    pub const X8: IoCaps = IoCaps::IO_1_1_8.union(IoCaps::IO_1_8_8);
    /// Everything reachable with a 2-wire controller
    pub const DPI: IoCaps = IoCaps::X2.union(IoCaps::IO_2_2_2);
    /// Everything reachable with a 4-wire controller
    pub const QPI: IoCaps = IoCaps::X4.union(IoCaps::IO_4_4_4);
    /// Everything reachable with an 8-wire controller
    pub const OPI: IoCaps = IoCaps::X8.union(IoCaps::IO_8_8_8);
    /// Single-wire only
    pub const SINGLE: IoCaps = IoCaps::IO_1_1_1;

    /// Whether this set contains the given type
    pub fn supports(self, io: IoType) -> bool {
        self.contains(io.cap())
    }

    /// Iterate contained types from fastest to slowest
    pub fn iter_fastest_first(self) -> impl Iterator<Item = IoType> {
        IoType::ALL
            .into_iter()
            .rev()
            .filter(move |io| self.supports(*io))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_matches_names() {
        assert_eq!(IoType::Io1_4_4.name(), "1-4-4");
        assert_eq!(IoType::Io1_4_4.cmd_bw(), 1);
        assert_eq!(IoType::Io1_4_4.addr_bw(), 4);
        assert_eq!(IoType::Io1_4_4.data_bw(), 4);
        assert!(!IoType::Io1_4_4.has_dtr());
        assert!(IoType::Io1s4d4d.addr_dtr());
        assert_eq!(IoType::Io8d8d8d.cmd_bw(), 8);
        assert!(IoType::Io8d8d8d.cmd_dtr());
    }

    #[test]
    fn name_roundtrip() {
        for io in IoType::ALL {
            assert_eq!(IoType::from_name(io.name()), Some(io));
        }
        assert_eq!(IoType::from_name("1s-4d-4d"), Some(IoType::Io1s4d4d));
        assert_eq!(IoType::from_name("9-9-9"), None);
    }

    #[test]
    fn caps_bit_per_type() {
        for io in IoType::ALL {
            assert!(io.cap().supports(io));
        }
        assert!(IoCaps::QPI.supports(IoType::Io4_4_4));
        assert!(!IoCaps::QPI.supports(IoType::Io2_2_2));
        let mut fast = IoCaps::QPI.iter_fastest_first();
        assert_eq!(fast.next(), Some(IoType::Io4_4_4));
    }
}
