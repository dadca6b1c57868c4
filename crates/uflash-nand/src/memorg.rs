//! NAND memory organization
//!
//! Geometry is declared per part and expanded once into shifts, masks and
//! totals. A page address is one linear page number split as
//! chip | lun | block | page-in-block by the derived shifts.

use serde::{Deserialize, Serialize};
use uflash_core::error::{Error, Result};

/// Declared geometry of a NAND chip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memorg {
    /// Dies behind this CS
    #[serde(default = "one")]
    pub num_chips: u32,
    /// LUNs per die
    #[serde(default = "one")]
    pub luns_per_cs: u32,
    /// Blocks per LUN
    pub blocks_per_lun: u32,
    /// Pages per block (power of two)
    pub pages_per_block: u32,
    /// Main-area page size (power of two)
    pub page_size: u32,
    /// Spare-area size per page
    pub oob_size: u32,
    /// Planes per LUN (not part of the size calculation)
    #[serde(default = "one")]
    pub planes_per_lun: u32,
}

fn one() -> u32 {
    1
}

impl Memorg {
    /// Common single-die geometry
    pub fn simple(blocks_per_lun: u32, pages_per_block: u32, page_size: u32, oob_size: u32) -> Self {
        Self {
            num_chips: 1,
            luns_per_cs: 1,
            blocks_per_lun,
            pages_per_block,
            page_size,
            oob_size,
            planes_per_lun: 1,
        }
    }

    /// Total block count across chips and LUNs
    pub fn total_blocks(&self) -> u64 {
        self.num_chips as u64 * self.luns_per_cs as u64 * self.blocks_per_lun as u64
    }

    /// Total main-area size in bytes
    pub fn total_size(&self) -> u64 {
        self.total_blocks() * self.pages_per_block as u64 * self.page_size as u64
    }
}

/// Derived shifts, masks and totals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemAux {
    /// Total main-area size
    pub size: u64,
    /// Page-number shift selecting the chip
    pub chip_shift: u32,
    /// Page-number shift selecting the LUN
    pub lun_shift: u32,
    /// Main block size in bytes
    pub block_size: u32,
    /// Raw (main+spare) block size in bytes
    pub oob_block_size: u32,
    /// Byte-address shift of a block
    pub block_shift: u32,
    /// Byte-address mask within a block
    pub block_mask: u32,
    /// Total block count
    pub block_count: u32,
    /// Raw (main+spare) page size
    pub oob_page_size: u32,
    /// Byte-address shift of a page
    pub page_shift: u32,
    /// Byte-address mask within a page
    pub page_mask: u32,
    /// Total page count
    pub page_count: u32,
    /// Page-number shift of a block
    pub pages_per_block_shift: u32,
    /// Page-number mask within a block
    pub pages_per_block_mask: u32,
}

impl MemAux {
    /// Expand a memorg. Page size, pages per block and blocks per LUN must be
    /// powers of two.
    pub fn derive(org: &Memorg) -> Result<MemAux> {
        if !org.page_size.is_power_of_two()
            || !org.pages_per_block.is_power_of_two()
            || !org.blocks_per_lun.is_power_of_two()
        {
            return Err(Error::InvalidParameter("memorg dimensions must be powers of two"));
        }
        if org.num_chips == 0 || org.luns_per_cs == 0 {
            return Err(Error::InvalidParameter("memorg chip/lun count"));
        }

        let page_shift = org.page_size.trailing_zeros();
        let ppb_shift = org.pages_per_block.trailing_zeros();
        let bpl_shift = org.blocks_per_lun.trailing_zeros();

        let block_count64 = org.total_blocks();
        let page_count64 = block_count64 * org.pages_per_block as u64;
        if page_count64 > u32::MAX as u64 {
            return Err(Error::InvalidParameter("page space exceeds 32 bits"));
        }

        let lun_bits = if org.luns_per_cs <= 1 {
            0
        } else {
            32 - (org.luns_per_cs - 1).leading_zeros()
        };

        Ok(MemAux {
            size: org.total_size(),
            chip_shift: ppb_shift + bpl_shift + lun_bits,
            lun_shift: ppb_shift + bpl_shift,
            block_size: org.page_size << ppb_shift,
            oob_block_size: (org.page_size + org.oob_size) * org.pages_per_block,
            block_shift: page_shift + ppb_shift,
            block_mask: (org.page_size << ppb_shift) - 1,
            block_count: block_count64 as u32,
            oob_page_size: org.page_size + org.oob_size,
            page_shift,
            page_mask: org.page_size - 1,
            page_count: page_count64 as u32,
            pages_per_block_shift: ppb_shift,
            pages_per_block_mask: org.pages_per_block - 1,
        })
    }

    /// First page number of a block
    pub fn block_to_page(&self, block: u32) -> u32 {
        block << self.pages_per_block_shift
    }

    /// Block containing a page number
    pub fn page_to_block(&self, page: u32) -> u32 {
        page >> self.pages_per_block_shift
    }

    /// LUN index of a page number
    pub fn page_to_lun(&self, page: u32) -> u32 {
        page >> self.lun_shift
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_1gbit() {
        // W25N01GV-style: 1024 blocks x 64 pages x 2048+64
        let org = Memorg::simple(1024, 64, 2048, 64);
        let aux = MemAux::derive(&org).unwrap();

        assert_eq!(aux.size, 128 << 20);
        assert_eq!(aux.block_size, 128 << 10);
        assert_eq!(aux.oob_page_size, 2112);
        assert_eq!(aux.oob_block_size, 2112 * 64);
        assert_eq!(aux.page_count, 1024 * 64);
        assert_eq!(aux.block_count, 1024);
        assert_eq!(aux.pages_per_block_shift, 6);
        assert_eq!(aux.page_shift, 11);

        assert_eq!(aux.block_to_page(42), 42 * 64);
        assert_eq!(aux.page_to_block(42 * 64 + 5), 42);
    }

    #[test]
    fn rejects_non_power_of_two() {
        let org = Memorg::simple(1000, 64, 2048, 64);
        assert!(MemAux::derive(&org).is_err());

        let org = Memorg::simple(1024, 64, 2000, 64);
        assert!(MemAux::derive(&org).is_err());
    }
}
