//! Flash translation layer binding
//!
//! The basic FTL maps logical pages to physical pages 1:1 within an optional
//! partition, skipping bad and reserved blocks. Page streams accept a
//! caller-supplied pre/post callback pair so large transfers can pipeline
//! I/O with encoding or file access, and always report how much actually
//! moved so interrupted operations can resume.

use crate::bbt::{Bbt, BbtState};
use crate::core::{AccessFlags, BulkOutcome, NandChip, PageStatus};
use uflash_core::error::{Error, Result};

/// A block-aligned window of the chip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FtlPart {
    /// First physical block of the partition
    pub base_block: u32,
    /// Blocks in the partition
    pub block_count: u32,
}

/// Streaming callbacks for page batches.
///
/// `pre` runs before a batch of `requested` pages is moved (fill the buffer
/// for writes); `post` runs after `actual` pages moved (drain the buffer for
/// reads). Either may abort the stream by returning an error.
pub trait FtlCallback {
    /// About to move up to `requested` pages
    fn pre(&mut self, _requested: u32) -> Result<()> {
        Ok(())
    }
    /// Moved `actual` pages
    fn post(&mut self, _actual: u32) -> Result<()> {
        Ok(())
    }
}

/// No-op callback for plain buffer transfers
pub struct NoCallback;

impl FtlCallback for NoCallback {}

/// The basic 1:1 FTL (C11)
pub struct BasicFtl {
    /// Skip the bad/reserved-block filter entirely (forensic workflows)
    dont_check_bad: bool,
}

impl Default for BasicFtl {
    fn default() -> Self {
        Self::new()
    }
}

impl BasicFtl {
    /// Plain instance with bad-block skipping active
    pub fn new() -> BasicFtl {
        BasicFtl {
            dont_check_bad: false,
        }
    }

    /// Forensic instance: logical equals physical, no filtering
    pub fn without_bad_block_check() -> BasicFtl {
        BasicFtl {
            dont_check_bad: true,
        }
    }

    fn part_bounds(nand: &dyn NandChip, part: Option<&FtlPart>) -> FtlPart {
        let total = nand.info().maux.block_count;
        match part {
            Some(p) => FtlPart {
                base_block: p.base_block.min(total),
                block_count: p.block_count.min(total - p.base_block.min(total)),
            },
            None => FtlPart {
                base_block: 0,
                block_count: total,
            },
        }
    }

    fn block_usable(&self, bbt: Option<&dyn Bbt>, block: u32) -> bool {
        if self.dont_check_bad {
            return true;
        }
        match bbt {
            None => true,
            Some(bbt) => {
                !bbt.is_reserved(block)
                    && !matches!(bbt.get_state(block), Ok(BbtState::Bad))
            }
        }
    }

    /// Map a logical block within the partition to a physical block,
    /// counting only usable blocks.
    fn logical_to_physical(
        &self,
        bbt: Option<&dyn Bbt>,
        part: &FtlPart,
        logical_block: u32,
    ) -> Option<u32> {
        let mut remaining = logical_block;
        for phys in part.base_block..part.base_block + part.block_count {
            if !self.block_usable(bbt, phys) {
                continue;
            }
            if remaining == 0 {
                return Some(phys);
            }
            remaining -= 1;
        }
        None
    }

    /// Usable size of the partition in bytes
    pub fn size(&self, nand: &dyn NandChip, bbt: Option<&dyn Bbt>, part: Option<&FtlPart>) -> u64 {
        let info = nand.info();
        let part = Self::part_bounds(nand, part);
        let usable = (part.base_block..part.base_block + part.block_count)
            .filter(|b| self.block_usable(bbt, *b))
            .count() as u64;
        usable * info.maux.block_size as u64
    }

    fn map_page(
        &self,
        nand: &dyn NandChip,
        bbt: Option<&dyn Bbt>,
        part: &FtlPart,
        page: u32,
    ) -> Result<u32> {
        let info = nand.info();
        let lblock = page >> info.maux.pages_per_block_shift;
        let in_block = page & info.maux.pages_per_block_mask;
        let phys = self
            .logical_to_physical(bbt, part, lblock)
            .ok_or(Error::AddressOutOfRange)?;
        Ok((phys << info.maux.pages_per_block_shift) | in_block)
    }

    /// Read one logical page
    pub fn read_page(
        &self,
        nand: &mut dyn NandChip,
        bbt: Option<&dyn Bbt>,
        part: Option<&FtlPart>,
        page: u32,
        buf: &mut [u8],
        raw: bool,
    ) -> Result<PageStatus> {
        let part = Self::part_bounds(nand, part);
        let phys = self.map_page(nand, bbt, &part, page)?;
        nand.read_page(phys, buf, raw)
    }

    /// Write one logical page
    pub fn write_page(
        &self,
        nand: &mut dyn NandChip,
        bbt: Option<&dyn Bbt>,
        part: Option<&FtlPart>,
        page: u32,
        buf: &[u8],
        raw: bool,
    ) -> Result<()> {
        let part = Self::part_bounds(nand, part);
        let phys = self.map_page(nand, bbt, &part, page)?;
        nand.write_page(phys, buf, raw)
    }

    /// Stream logical pages out of the chip. Bad and reserved blocks are
    /// skipped without shortening the count; the outcome reports the pages
    /// actually delivered so a failed run can resume.
    pub fn read_pages(
        &self,
        nand: &mut dyn NandChip,
        bbt: Option<&dyn Bbt>,
        part: Option<&FtlPart>,
        page: u32,
        count: u32,
        buf: &mut [u8],
        raw: bool,
        flags: AccessFlags,
        cb: &mut dyn FtlCallback,
    ) -> BulkOutcome {
        let info = nand.info();
        let part = Self::part_bounds(nand, part);
        let oob_page = info.maux.oob_page_size as usize;
        let ppb = info.maux.pages_per_block_mask + 1;

        if buf.len() < count as usize * oob_page {
            return BulkOutcome {
                completed: 0,
                result: Err(Error::InvalidParameter("bulk buffer too short")),
            };
        }

        let mut done = 0u32;
        let mut worst = PageStatus::Clean;

        while done < count {
            let lpage = page + done;
            let in_block = lpage & info.maux.pages_per_block_mask;
            // Batch to the end of the logical block
            let batch = (ppb - in_block).min(count - done);

            if let Err(e) = cb.pre(batch) {
                return BulkOutcome {
                    completed: done,
                    result: Err(e),
                };
            }

            let phys = match self.map_page(nand, bbt, &part, lpage) {
                Ok(p) => p,
                Err(e) => {
                    return BulkOutcome {
                        completed: done,
                        result: Err(e),
                    }
                }
            };

            for i in 0..batch {
                let chunk =
                    &mut buf[(done + i) as usize * oob_page..(done + i + 1) as usize * oob_page];
                match nand.read_page(phys + i, chunk, raw) {
                    Ok(PageStatus::Uncorrectable) => {
                        worst = PageStatus::Uncorrectable;
                        if !flags.contains(AccessFlags::IGNORE_ECC_ERROR) {
                            return BulkOutcome {
                                completed: done + i,
                                result: Err(Error::EccUncorrectable),
                            };
                        }
                    }
                    Ok(st) => worst = worst.merge(st),
                    Err(e) => {
                        if !flags.contains(AccessFlags::IGNORE_IO_ERROR) {
                            return BulkOutcome {
                                completed: done + i,
                                result: Err(e),
                            };
                        }
                    }
                }
            }

            if let Err(e) = cb.post(batch) {
                return BulkOutcome {
                    completed: done + batch,
                    result: Err(e),
                };
            }

            done += batch;
        }

        BulkOutcome {
            completed: done,
            result: Ok(worst),
        }
    }

    /// Stream logical pages into the chip
    #[allow(clippy::too_many_arguments)]
    pub fn write_pages(
        &self,
        nand: &mut dyn NandChip,
        bbt: Option<&dyn Bbt>,
        part: Option<&FtlPart>,
        page: u32,
        count: u32,
        buf: &[u8],
        raw: bool,
        ignore_error: bool,
        cb: &mut dyn FtlCallback,
    ) -> BulkOutcome {
        let info = nand.info();
        let part = Self::part_bounds(nand, part);
        let oob_page = info.maux.oob_page_size as usize;
        let ppb = info.maux.pages_per_block_mask + 1;

        if buf.len() < count as usize * oob_page {
            return BulkOutcome {
                completed: 0,
                result: Err(Error::InvalidParameter("bulk buffer too short")),
            };
        }

        let mut done = 0u32;

        while done < count {
            let lpage = page + done;
            let in_block = lpage & info.maux.pages_per_block_mask;
            let batch = (ppb - in_block).min(count - done);

            if let Err(e) = cb.pre(batch) {
                return BulkOutcome {
                    completed: done,
                    result: Err(e),
                };
            }

            let phys = match self.map_page(nand, bbt, &part, lpage) {
                Ok(p) => p,
                Err(e) => {
                    return BulkOutcome {
                        completed: done,
                        result: Err(e),
                    }
                }
            };

            for i in 0..batch {
                let chunk = &buf[(done + i) as usize * oob_page..(done + i + 1) as usize * oob_page];
                if let Err(e) = nand.write_page(phys + i, chunk, raw) {
                    if !ignore_error {
                        return BulkOutcome {
                            completed: done + i,
                            result: Err(e),
                        };
                    }
                    log::warn!("page {} write failed ({}), continuing", phys + i, e);
                }
            }

            if let Err(e) = cb.post(batch) {
                return BulkOutcome {
                    completed: done + batch,
                    result: Err(e),
                };
            }

            done += batch;
        }

        BulkOutcome {
            completed: done,
            result: Ok(PageStatus::Clean),
        }
    }

    /// Erase a run of logical blocks. `spread` requests wear spreading;
    /// the basic mapping has no spare blocks to rotate, so it is accepted
    /// and ignored.
    #[allow(clippy::too_many_arguments)]
    pub fn erase_blocks(
        &self,
        nand: &mut dyn NandChip,
        bbt: Option<&mut dyn Bbt>,
        part: Option<&FtlPart>,
        block: u32,
        count: u32,
        spread: bool,
        cb: &mut dyn FtlCallback,
    ) -> BulkOutcome {
        let _ = spread;
        let info = nand.info();
        let part = Self::part_bounds(nand, part);
        let mut bbt = bbt;

        for i in 0..count {
            if let Err(e) = cb.pre(1) {
                return BulkOutcome {
                    completed: i,
                    result: Err(e),
                };
            }

            let phys = match self.logical_to_physical(bbt.as_deref(), &part, block + i) {
                Some(p) => p,
                None => {
                    return BulkOutcome {
                        completed: i,
                        result: Err(Error::AddressOutOfRange),
                    }
                }
            };

            match nand.erase_block(info.maux.block_to_page(phys)) {
                Ok(()) => {
                    if let Some(bbt) = bbt.as_deref_mut() {
                        let _ = bbt.set_state(phys, BbtState::Erased);
                    }
                }
                Err(e) => {
                    log::warn!("erase of block {} failed ({})", phys, e);
                    if let Some(bbt) = bbt.as_deref_mut() {
                        let _ = bbt.set_state(phys, BbtState::Bad);
                    }
                    return BulkOutcome {
                        completed: i,
                        result: Err(e),
                    };
                }
            }

            if let Err(e) = cb.post(1) {
                return BulkOutcome {
                    completed: i + 1,
                    result: Err(e),
                };
            }
        }

        BulkOutcome {
            completed: count,
            result: Ok(PageStatus::Clean),
        }
    }
}
