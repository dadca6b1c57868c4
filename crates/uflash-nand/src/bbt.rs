//! Bad-block table binding
//!
//! A BBT is a 2-bit-per-block map over the whole chip. [`RamBbt`] lives only
//! in memory and is rebuilt by scanning the physical bad-block marks.
//! [`FlashBbt`] additionally persists the map in one of the last 32 blocks
//! of the chip, tagged with an OOB signature, with a program-verify loop on
//! writeback and reserved-block protection so the table cannot destroy
//! itself.

use crate::bitmap::Bitmap;
use crate::core::NandChip;
use bitflags::bitflags;
use uflash_core::error::{Error, Result};

/// Blocks at the top of the chip scanned for a persisted table
pub const BBT_SCAN_BLOCKS: u32 = 32;
/// OOB signature tagging a table block, at offset 1 past the marker byte
pub const BBT_SIGNATURE: &[u8; 7] = b"uflashb";
/// Signature offset within the canonical OOB (after the marker byte)
pub const BBT_SIGNATURE_OOB_OFS: u32 = 1;

/// Per-block state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BbtState {
    /// Never scanned
    Unknown = 0,
    /// Known good
    Good = 1,
    /// Known bad
    Bad = 2,
    /// Known good and currently erased
    Erased = 3,
}

impl BbtState {
    fn from_cell(v: u8) -> BbtState {
        match v {
            1 => BbtState::Good,
            2 => BbtState::Bad,
            3 => BbtState::Erased,
            _ => BbtState::Unknown,
        }
    }
}

bitflags! {
    /// BBT behavior switches
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BbtConfig: u32 {
        /// Rescan every block on reprobe, not just unknown ones
        const FULL_SCAN = 1 << 0;
        /// Never write the table back to flash
        const READ_ONLY = 1 << 1;
        /// Report table storage blocks as reserved
        const PROTECTION = 1 << 2;
    }
}

/// The BBT contract (C10). Implementations keep no reference to the NAND;
/// the chip is handed in per call.
pub trait Bbt {
    /// Rebuild the table: load persisted state if any, then rescan marks
    fn reprobe(&mut self, nand: &mut dyn NandChip) -> Result<()>;
    /// Persist pending changes, when the backing supports it
    fn commit(&mut self, nand: &mut dyn NandChip) -> Result<()>;
    /// Adjust behavior flags
    fn modify_config(&mut self, clr: BbtConfig, set: BbtConfig) -> Result<()>;
    /// Current behavior flags
    fn config(&self) -> BbtConfig;
    /// State of one block
    fn get_state(&self, block: u32) -> Result<BbtState>;
    /// Record the state of one block (table only; does not touch the chip)
    fn set_state(&mut self, block: u32, state: BbtState) -> Result<()>;
    /// Whether the block backs the table itself and must not be written
    fn is_reserved(&self, block: u32) -> bool;
}

fn scan_marks(bm: &mut Bitmap, nand: &mut dyn NandChip, full: bool) -> Result<u32> {
    let mut changed = 0u32;

    for block in 0..bm.cells() {
        let old = bm.get(block)?;
        if !full && old != BbtState::Unknown as u8 {
            continue;
        }

        let state = if nand.check_bad(block)? {
            log::info!("bad block {}", block);
            BbtState::Bad
        } else {
            BbtState::Good
        };

        if old != state as u8 {
            bm.set(block, state as u8)?;
            changed += 1;
        }
    }

    Ok(changed)
}

// ---------------------------------------------------------------------------
// RAM-backed table
// ---------------------------------------------------------------------------

/// Volatile bad-block table
pub struct RamBbt {
    bm: Bitmap,
    config: BbtConfig,
}

impl RamBbt {
    /// Create for a chip; call [`Bbt::reprobe`] before use
    pub fn new(nand: &dyn NandChip) -> Result<RamBbt> {
        let blocks = nand.info().maux.block_count;
        Ok(RamBbt {
            bm: Bitmap::new(2, blocks, BbtState::Unknown as u8)?,
            config: BbtConfig::FULL_SCAN,
        })
    }
}

impl Bbt for RamBbt {
    fn reprobe(&mut self, nand: &mut dyn NandChip) -> Result<()> {
        self.bm.reset();
        scan_marks(&mut self.bm, nand, true)?;
        Ok(())
    }

    fn commit(&mut self, _nand: &mut dyn NandChip) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn modify_config(&mut self, clr: BbtConfig, set: BbtConfig) -> Result<()> {
        self.config = (self.config - clr) | set;
        Ok(())
    }

    fn config(&self) -> BbtConfig {
        self.config
    }

    fn get_state(&self, block: u32) -> Result<BbtState> {
        Ok(BbtState::from_cell(self.bm.get(block)?))
    }

    fn set_state(&mut self, block: u32, state: BbtState) -> Result<()> {
        self.bm.set(block, state as u8)
    }

    fn is_reserved(&self, _block: u32) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Flash-backed table
// ---------------------------------------------------------------------------

/// Bad-block table persisted in the last [`BBT_SCAN_BLOCKS`] blocks
pub struct FlashBbt {
    bm: Bitmap,
    config: BbtConfig,
    /// Block currently holding the table (0 = none found)
    bbt_block: u32,
    changed: bool,
}

impl FlashBbt {
    /// Create for a chip; call [`Bbt::reprobe`] before use
    pub fn new(nand: &dyn NandChip) -> Result<FlashBbt> {
        let blocks = nand.info().maux.block_count;
        if blocks <= BBT_SCAN_BLOCKS {
            return Err(Error::InvalidParameter("chip too small for a flash BBT"));
        }
        Ok(FlashBbt {
            bm: Bitmap::new(2, blocks, BbtState::Unknown as u8)?,
            config: BbtConfig::FULL_SCAN | BbtConfig::PROTECTION,
            bbt_block: 0,
            changed: false,
        })
    }

    fn sig_offset(nand: &dyn NandChip) -> usize {
        let info = nand.info();
        (info.memorg.page_size + BBT_SIGNATURE_OOB_OFS) as usize
    }

    /// Try to load the table from one candidate block. The stored image is
    /// canonical pages: table bytes in the data area, signature in the OOB of
    /// the first page.
    fn load_from(&mut self, nand: &mut dyn NandChip, block: u32) -> Result<()> {
        if nand.check_bad(block)? {
            return Err(Error::Fail);
        }

        let info = nand.info();
        let oob_page = info.maux.oob_page_size as usize;
        let page_size = info.memorg.page_size as usize;
        let sig_ofs = Self::sig_offset(nand);

        let mut raw = vec![0u8; oob_page];
        let mut canon = vec![0u8; oob_page];

        let mut page = info.maux.block_to_page(block);
        let mut left = self.bm.data().len();
        let mut pos = 0usize;
        let mut check_sig = true;

        while left > 0 {
            nand.read_page(page, &mut raw, false)?;
            nand.convert_page_format(&raw, &mut canon, false)?;

            if check_sig {
                if &canon[sig_ofs..sig_ofs + BBT_SIGNATURE.len()] != BBT_SIGNATURE {
                    return Err(Error::Fail);
                }
                check_sig = false;
            }

            let chunk = left.min(page_size);
            self.bm.data_mut()[pos..pos + chunk].copy_from_slice(&canon[..chunk]);

            pos += chunk;
            left -= chunk;
            page += 1;
        }

        Ok(())
    }

    /// Write the table image into one candidate block with read-back verify
    fn store_to(&mut self, nand: &mut dyn NandChip, block: u32) -> Result<()> {
        if nand.check_bad(block)? {
            return Err(Error::Fail);
        }

        let info = nand.info();
        let oob_page = info.maux.oob_page_size as usize;
        let page_size = info.memorg.page_size as usize;
        let sig_ofs = Self::sig_offset(nand);

        nand.erase_block(info.maux.block_to_page(block))?;

        let image = self.bm.data().to_vec();
        let mut canon = vec![0u8; oob_page];
        let mut raw = vec![0u8; oob_page];

        let mut page = info.maux.block_to_page(block);
        let mut pos = 0usize;
        let mut write_sig = true;

        while pos < image.len() {
            let chunk = (image.len() - pos).min(page_size);

            canon.fill(0xFF);
            canon[..chunk].copy_from_slice(&image[pos..pos + chunk]);
            if write_sig {
                canon[sig_ofs..sig_ofs + BBT_SIGNATURE.len()].copy_from_slice(BBT_SIGNATURE);
            }

            nand.convert_page_format(&canon, &mut raw, true)?;
            nand.write_page(page, &raw, false)?;

            // Verify the write before trusting this block
            let mut readback = vec![0u8; oob_page];
            let mut readback_canon = vec![0u8; oob_page];
            nand.read_page(page, &mut readback, false)?;
            nand.convert_page_format(&readback, &mut readback_canon, false)?;

            if readback_canon[..chunk] != image[pos..pos + chunk] {
                return Err(Error::VerificationFail);
            }
            if write_sig
                && &readback_canon[sig_ofs..sig_ofs + BBT_SIGNATURE.len()] != BBT_SIGNATURE
            {
                return Err(Error::VerificationFail);
            }

            write_sig = false;
            pos += chunk;
            page += 1;
        }

        Ok(())
    }

    fn load(&mut self, nand: &mut dyn NandChip) {
        let blocks = self.bm.cells();
        for block in (blocks - BBT_SCAN_BLOCKS + 1..blocks).rev() {
            if self.load_from(nand, block).is_ok() {
                log::info!("bad-block table found at block {}", block);
                self.bbt_block = block;
                self.config -= BbtConfig::READ_ONLY;
                return;
            }
        }
        self.bbt_block = 0;
    }

    fn save(&mut self, nand: &mut dyn NandChip) -> Result<()> {
        let blocks = self.bm.cells();
        let start = if self.bbt_block != 0 {
            self.bbt_block
        } else {
            blocks - 1
        };

        for block in (blocks - BBT_SCAN_BLOCKS + 1..=start).rev() {
            if self.store_to(nand, block).is_ok() {
                log::info!("bad-block table written to block {}", block);
                self.bbt_block = block;
                self.changed = false;
                return Ok(());
            }
        }

        Err(Error::Fail)
    }
}

impl Bbt for FlashBbt {
    fn reprobe(&mut self, nand: &mut dyn NandChip) -> Result<()> {
        self.bm.reset();
        self.load(nand);

        let changed = scan_marks(&mut self.bm, nand, self.config.contains(BbtConfig::FULL_SCAN))?;
        if changed > 0 {
            self.changed = true;
        }

        if !self.config.contains(BbtConfig::READ_ONLY) && self.changed {
            self.save(nand)?;
        }

        Ok(())
    }

    fn commit(&mut self, nand: &mut dyn NandChip) -> Result<()> {
        if self.config.contains(BbtConfig::READ_ONLY) {
            return Err(Error::Unsupported);
        }
        if !self.changed && self.bbt_block != 0 {
            return Ok(());
        }
        self.save(nand)
    }

    fn modify_config(&mut self, clr: BbtConfig, set: BbtConfig) -> Result<()> {
        self.config = (self.config - clr) | set;
        Ok(())
    }

    fn config(&self) -> BbtConfig {
        self.config
    }

    fn get_state(&self, block: u32) -> Result<BbtState> {
        Ok(BbtState::from_cell(self.bm.get(block)?))
    }

    fn set_state(&mut self, block: u32, state: BbtState) -> Result<()> {
        let old = self.bm.get(block)?;
        if old != state as u8 {
            self.changed = true;
        }

        // Losing the table's own block disables writeback
        if state != BbtState::Good && self.bbt_block != 0 && block == self.bbt_block {
            log::warn!("BBT storage block {} degraded; writeback disabled", block);
            self.bbt_block = 0;
            self.config |= BbtConfig::READ_ONLY;
        }

        self.bm.set(block, state as u8)
    }

    fn is_reserved(&self, block: u32) -> bool {
        self.config.contains(BbtConfig::PROTECTION)
            && self.bbt_block != 0
            && block == self.bbt_block
    }
}
