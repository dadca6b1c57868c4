//! Unified flash handle
//!
//! One surface over probed NOR and NAND instances so the CLI reads, writes,
//! erases and verifies without caring which stack answered. NAND access
//! goes through the basic FTL with a RAM bad-block table, in canonical page
//! layout, main data only; the raw/OOB paths stay available through the
//! typed accessors.

use uflash_core::controller::SpiController;
use uflash_core::db::Environment;
use uflash_core::error::{Error, Result};
use uflash_core::{NorDatabase, SpiBus, SpiNor};
use uflash_nand::bbt::{Bbt, RamBbt};
use uflash_nand::core::{AccessFlags, NandChip, PageStatus, SpiNand};
use uflash_nand::ftl::{BasicFtl, NoCallback};

/// Progress callback: (bytes done, bytes total)
pub type Progress<'a> = &'a mut dyn FnMut(u64, u64);

/// Which flash stack to probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlashKind {
    /// Probe NOR first, then NAND
    #[default]
    Auto,
    /// SPI-NOR only
    Nor,
    /// SPI-NAND only
    Nand,
}

/// A probed NAND with its default bindings
pub struct NandDevice {
    /// The probed chip
    pub nand: SpiNand<Box<dyn SpiController>>,
    /// Scan-based bad-block table
    pub bbt: RamBbt,
    /// 1:1 translation skipping bad blocks
    pub ftl: BasicFtl,
}

/// A probed flash device of either kind
pub enum FlashHandle {
    /// SPI-NOR instance
    Nor(Box<SpiNor<Box<dyn SpiController>>>),
    /// SPI-NAND instance with bindings
    Nand(Box<NandDevice>),
}

/// Open a programmer, probe the chip, return the unified handle
pub fn open_flash(spec: &str, kind: FlashKind, env: &Environment) -> Result<FlashHandle> {
    match kind {
        FlashKind::Nor => open_nor(spec, env),
        FlashKind::Nand => open_nand(spec, env),
        FlashKind::Auto => match open_nor(spec, env) {
            Ok(h) => Ok(h),
            Err(Error::PartNotRecognised) => {
                log::info!("no SPI-NOR answered, trying SPI-NAND");
                open_nand(spec, env)
            }
            Err(e) => Err(e),
        },
    }
}

fn open_nor(spec: &str, env: &Environment) -> Result<FlashHandle> {
    let db = env.load_nor_db().unwrap_or_else(|e| {
        log::warn!("SPI-NOR database unavailable ({}), SFDP-only probing", e);
        NorDatabase::default()
    });

    let ctrl = super::registry::open_controller(spec)?;
    let bus = SpiBus::attach(ctrl)?;
    let mut nor = SpiNor::new(bus);
    nor.probe_init(&db)?;

    Ok(FlashHandle::Nor(Box::new(nor)))
}

fn open_nand(spec: &str, env: &Environment) -> Result<FlashHandle> {
    let db = uflash_nand::db::load_nand_db(env)?;

    let ctrl = super::registry::open_controller(spec)?;
    let bus = SpiBus::attach(ctrl)?;
    let mut nand = SpiNand::new(bus);
    nand.probe_init(&db)?;

    let mut bbt = RamBbt::new(&nand)?;
    bbt.reprobe(&mut nand)?;

    Ok(FlashHandle::Nand(Box::new(NandDevice {
        nand,
        bbt,
        ftl: BasicFtl::new(),
    })))
}

impl FlashHandle {
    /// Usable size in bytes (NAND: main areas of good blocks)
    pub fn size(&self) -> u64 {
        match self {
            FlashHandle::Nor(nor) => nor.size(),
            FlashHandle::Nand(dev) => dev.ftl.size(&dev.nand, Some(&dev.bbt), None),
        }
    }

    /// One-line description for the CLI
    pub fn describe(&self) -> String {
        match self {
            FlashHandle::Nor(nor) => match nor.info() {
                Ok(i) => format!(
                    "SPI-NOR {} {} [{}] {} bytes, read {}, pp {}",
                    i.vendor, i.model, i.id, i.size, i.read_io, i.pp_io
                ),
                Err(_) => "SPI-NOR (not probed)".into(),
            },
            FlashHandle::Nand(dev) => {
                let i = dev.nand.info();
                format!(
                    "SPI-NAND {} {} [{}] {} bytes ({}+{} per page), read {}",
                    i.vendor,
                    i.model,
                    i.id,
                    i.maux.size,
                    i.memorg.page_size,
                    i.memorg.oob_size,
                    i.rd_io
                )
            }
        }
    }

    fn nand_page_geometry(dev: &NandDevice) -> (usize, usize) {
        let maux = *dev.nand.maux();
        (maux.page_mask as usize + 1, maux.oob_page_size as usize)
    }

    /// Read `buf.len()` bytes starting at `addr`
    pub fn read(&mut self, addr: u64, buf: &mut [u8], progress: Progress<'_>) -> Result<()> {
        let total = buf.len() as u64;

        match self {
            FlashHandle::Nor(nor) => {
                // Chunked so the progress bar moves
                const CHUNK: usize = 64 * 1024;
                let mut done = 0usize;
                while done < buf.len() {
                    let n = CHUNK.min(buf.len() - done);
                    nor.read(addr + done as u64, &mut buf[done..done + n])?;
                    done += n;
                    progress(done as u64, total);
                }
                Ok(())
            }
            FlashHandle::Nand(dev) => {
                let (page_size, oob_page) = Self::nand_page_geometry(dev);
                if addr % page_size as u64 != 0 || buf.len() % page_size != 0 {
                    return Err(Error::InvalidParameter("NAND access must be page-aligned"));
                }

                let first_page = (addr / page_size as u64) as u32;
                let count = (buf.len() / page_size) as u32;
                let mut raw = vec![0u8; oob_page];
                let mut canon = vec![0u8; oob_page];

                for i in 0..count {
                    let st = dev.ftl.read_page(
                        &mut dev.nand,
                        Some(&dev.bbt),
                        None,
                        first_page + i,
                        &mut raw,
                        false,
                    )?;
                    if st == PageStatus::Uncorrectable {
                        return Err(Error::EccUncorrectable);
                    }
                    dev.nand.convert_page_format(&raw, &mut canon, false)?;
                    buf[i as usize * page_size..(i as usize + 1) * page_size]
                        .copy_from_slice(&canon[..page_size]);
                    progress((i as u64 + 1) * page_size as u64, total);
                }
                Ok(())
            }
        }
    }

    /// Program `data` at `addr` (the range must be erased)
    pub fn write(&mut self, addr: u64, data: &[u8], progress: Progress<'_>) -> Result<()> {
        let total = data.len() as u64;

        match self {
            FlashHandle::Nor(nor) => {
                const CHUNK: usize = 16 * 1024;
                let mut done = 0usize;
                while done < data.len() {
                    let n = CHUNK.min(data.len() - done);
                    nor.write(addr + done as u64, &data[done..done + n])?;
                    done += n;
                    progress(done as u64, total);
                }
                Ok(())
            }
            FlashHandle::Nand(dev) => {
                let (page_size, oob_page) = Self::nand_page_geometry(dev);
                if addr % page_size as u64 != 0 || data.len() % page_size != 0 {
                    return Err(Error::InvalidParameter("NAND access must be page-aligned"));
                }

                let first_page = (addr / page_size as u64) as u32;
                let count = (data.len() / page_size) as u32;
                let mut canon = vec![0xFFu8; oob_page];
                let mut raw = vec![0u8; oob_page];

                for i in 0..count {
                    canon[..page_size].copy_from_slice(
                        &data[i as usize * page_size..(i as usize + 1) * page_size],
                    );
                    canon[page_size..].fill(0xFF);
                    dev.nand.convert_page_format(&canon, &mut raw, true)?;
                    dev.ftl.write_page(
                        &mut dev.nand,
                        Some(&dev.bbt),
                        None,
                        first_page + i,
                        &raw,
                        false,
                    )?;
                    progress((i as u64 + 1) * page_size as u64, total);
                }
                Ok(())
            }
        }
    }

    /// Erase `[addr, addr + len)`
    pub fn erase(&mut self, addr: u64, len: u64, progress: Progress<'_>) -> Result<()> {
        match self {
            FlashHandle::Nor(nor) => {
                let (start, end) = nor.erase_range(addr, len)?;
                let mut at = start;
                while at < end {
                    let n = nor.erase_at(at, end - at)?;
                    at += n as u64;
                    progress(at - start, end - start);
                }
                Ok(())
            }
            FlashHandle::Nand(dev) => {
                let block_size = dev.nand.maux().block_size as u64;
                if addr % block_size != 0 {
                    return Err(Error::InvalidParameter("NAND erase must be block-aligned"));
                }
                let len = len.div_ceil(block_size) * block_size;

                let first = (addr / block_size) as u32;
                let count = (len / block_size) as u32;
                let outcome = dev.ftl.erase_blocks(
                    &mut dev.nand,
                    Some(&mut dev.bbt),
                    None,
                    first,
                    count,
                    false,
                    &mut NoCallback,
                );
                progress(outcome.completed as u64 * block_size, len);
                outcome.result.map(|_| ())
            }
        }
    }

    /// Read back and compare against `expected`
    pub fn verify(&mut self, addr: u64, expected: &[u8], progress: Progress<'_>) -> Result<()> {
        let mut buf = vec![0u8; expected.len()];
        self.read(addr, &mut buf, progress)?;
        if buf != expected {
            let first = buf
                .iter()
                .zip(expected)
                .position(|(a, b)| a != b)
                .unwrap_or(0);
            log::error!("verification failed at offset {:#x}", addr + first as u64);
            return Err(Error::VerificationFail);
        }
        Ok(())
    }

    /// The NOR instance, when this handle is NOR
    pub fn as_nor(&mut self) -> Result<&mut SpiNor<Box<dyn SpiController>>> {
        match self {
            FlashHandle::Nor(nor) => Ok(nor),
            _ => Err(Error::Unsupported),
        }
    }

    /// The NAND bindings, when this handle is NAND
    pub fn as_nand(&mut self) -> Result<&mut NandDevice> {
        match self {
            FlashHandle::Nand(dev) => Ok(dev),
            _ => Err(Error::Unsupported),
        }
    }

    /// Bulk NAND page dump including OOB, for forensic workflows
    pub fn read_raw_pages(
        &mut self,
        first_page: u32,
        count: u32,
        buf: &mut [u8],
        ignore_ecc: bool,
    ) -> Result<u32> {
        let dev = self.as_nand()?;
        let mut flags = AccessFlags::IGNORE_IO_ERROR;
        if ignore_ecc {
            flags |= AccessFlags::IGNORE_ECC_ERROR;
        }
        let outcome = dev.nand.read_pages(first_page, count, buf, true, flags);
        outcome.result.map(|_| outcome.completed)
    }
}
