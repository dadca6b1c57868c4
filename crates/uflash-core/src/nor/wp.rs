//! Write-protect region arithmetic
//!
//! A part declares a table mapping block-protect field values to protected
//! ranges. Getting the active region decodes the field; setting scans the
//! table for the requested range and writes the field back through the
//! register engine.

use super::core::SpiNor;
use super::part::{WpEntry, WpRange};
use super::regs::{RegAccess, SRCR_ACC, SR_ACC};
use crate::controller::SpiController;
use crate::error::{Error, Result};

impl<C: SpiController> SpiNor<C> {
    fn wp_access(&self) -> RegAccess {
        if self.state.reg.cr.is_some() {
            SRCR_ACC
        } else {
            SR_ACC
        }
    }

    fn wp_info(&self) -> Result<(RegAccess, u32, u8, Vec<WpEntry>)> {
        let part = self.part().ok_or(Error::NotProbed)?;
        let wp = part.wp.as_ref().ok_or(Error::Unsupported)?;
        Ok((self.wp_access(), wp.shift, wp.mask, wp.entries.clone()))
    }

    /// The ranges selectable on this part
    pub fn wp_region_list(&self) -> Result<Vec<WpRange>> {
        let part = self.part().ok_or(Error::NotProbed)?;
        let wp = part.wp.as_ref().ok_or(Error::Unsupported)?;
        Ok(wp
            .entries
            .iter()
            .map(|e| WpRange {
                base: e.base,
                size: e.size,
            })
            .collect())
    }

    /// Decode the currently protected range from the status register
    pub fn get_wp_region(&mut self) -> Result<WpRange> {
        let (acc, shift, mask, entries) = self.wp_info()?;

        let val = self.read_reg_acc(&acc)?;
        let field = ((val >> shift) & mask as u32) as u8;

        entries
            .iter()
            .find(|e| e.sr_val == field)
            .map(|e| WpRange {
                base: e.base,
                size: e.size,
            })
            .ok_or(Error::NotExist)
    }

    /// Protect exactly the given range; it must be one of the advertised
    /// ranges.
    pub fn set_wp_region(&mut self, region: &WpRange) -> Result<()> {
        let (acc, shift, mask, entries) = self.wp_info()?;

        let entry = entries
            .iter()
            .find(|e| e.base == region.base && e.size == region.size)
            .ok_or(Error::InvalidParameter("no matching protection range"))?;

        let clr = (mask as u32) << shift;
        let set = (entry.sr_val as u32) << shift;
        self.update_reg_acc(&acc, clr, set, false)?;

        let val = self.read_reg_acc(&acc)?;
        if ((val >> shift) & mask as u32) as u8 != entry.sr_val {
            return Err(Error::Fail);
        }

        Ok(())
    }
}

/// Build the classic BP0..BP2 + TB table covering a chip from the top or
/// bottom in power-of-two fractions. Shared by database entries that don't
/// spell every range out.
pub fn bp3_tb_ranges(size: u64, block_size: u64) -> Vec<WpEntry> {
    let mut entries = vec![WpEntry {
        sr_val: 0,
        base: 0,
        size: 0,
    }];

    // BP = n protects the top 2^(n-1) blocks; TB set mirrors from the bottom
    for bp in 1u8..=7 {
        let blocks = 1u64 << (bp - 1);
        let len = (blocks * block_size).min(size);

        entries.push(WpEntry {
            sr_val: bp,
            base: size - len,
            size: len,
        });
        entries.push(WpEntry {
            sr_val: bp | 0x8,
            base: 0,
            size: len,
        });

        if len == size {
            break;
        }
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bp_table_covers_top_and_bottom() {
        let size = 16u64 << 20;
        let entries = bp3_tb_ranges(size, 64 << 10);

        // BP=0 protects nothing
        assert_eq!(entries[0].size, 0);

        // BP=1: top 64 KiB
        let top = entries.iter().find(|e| e.sr_val == 1).unwrap();
        assert_eq!(top.base, size - (64 << 10));
        assert_eq!(top.size, 64 << 10);

        // TB|BP=1: bottom 64 KiB
        let bottom = entries.iter().find(|e| e.sr_val == 0x9).unwrap();
        assert_eq!(bottom.base, 0);
        assert_eq!(bottom.size, 64 << 10);

        // No overlapping duplicate ranges
        for (i, a) in entries.iter().enumerate() {
            for b in entries.iter().skip(i + 1) {
                assert!(
                    a.base != b.base || a.size != b.size,
                    "duplicate range {:x}+{:x}",
                    a.base,
                    a.size
                );
            }
        }
    }
}
