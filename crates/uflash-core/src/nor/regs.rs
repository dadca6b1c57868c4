//! SPI-NOR register access engine
//!
//! All register reads and writes go through one typed path driven by a
//! [`RegAccess`] descriptor, so chips with split SR/CR pairs, dual-opcode
//! registers, addressed registers, and volatile-write quirks all behave
//! uniformly. Update is read-modify-write.

use crate::controller::SpiController;
use crate::error::{Error, Result};
use crate::spi::{opcodes, MemData, MemDataPhase, SpiMemOp};
use bitflags::bitflags;

use super::core::SpiNor;

/// Timeout for a non-volatile status/config register write
pub const WRITE_NV_REG_TIMEOUT_MS: u32 = 100;

/// Register flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegKind {
    /// One opcode pair, `ndata` bytes
    Normal,
    /// Two 1-byte reads (SR via op, CR via op2) assembled low/high, written
    /// jointly through a single 2-byte write
    SrCr,
    /// Two independent 1-byte registers with separate read and write opcodes
    Dual,
}

bitflags! {
    /// Register access quirks
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RegFlags: u32 {
        /// Address width tracks the current 3B/4B state
        const ADDR_4B_MODE = 1 << 0;
        /// Multi-byte values are little-endian on the wire
        const LITTLE_ENDIAN = 1 << 1;
        /// No write-enable required before writing
        const NO_WREN = 1 << 2;
        /// Use the volatile write-enable (50h) instead of WREN
        const VOLATILE_WREN_50H = 1 << 3;
        /// A dedicated volatile-write opcode exists
        const HAS_VOLATILE_WR_OPCODE = 1 << 4;
    }
}

/// Typed register access descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegAccess {
    /// Register flavor
    pub kind: RegKind,
    /// Address bytes (0 for unaddressed registers)
    pub naddr: u8,
    /// Register address
    pub addr: u32,
    /// Dummy bytes on read
    pub ndummy_read: u8,
    /// Dummy bytes on write
    pub ndummy_write: u8,
    /// Data bytes (Normal kind; 1..=4)
    pub ndata: u8,
    /// Read opcode
    pub read_opcode: u8,
    /// Second read opcode (SrCr / Dual kinds)
    pub read_opcode2: u8,
    /// Write opcode
    pub write_opcode: u8,
    /// Volatile write opcode (with `HAS_VOLATILE_WR_OPCODE`)
    pub write_opcode_volatile: u8,
    /// Second write opcode (Dual kind)
    pub write_opcode2: u8,
    /// Quirks
    pub flags: RegFlags,
}

impl RegAccess {
    /// A plain unaddressed 1-byte register
    pub const fn normal(read_opcode: u8, write_opcode: u8) -> Self {
        Self {
            kind: RegKind::Normal,
            naddr: 0,
            addr: 0,
            ndummy_read: 0,
            ndummy_write: 0,
            ndata: 1,
            read_opcode,
            read_opcode2: 0,
            write_opcode,
            write_opcode_volatile: 0,
            write_opcode2: 0,
            flags: RegFlags::empty(),
        }
    }

    /// SR+CR pair read separately, written jointly. The joint write clocks
    /// SR first, so the assembled (SR | CR << 8) value goes out low byte
    /// first.
    pub const fn srcr(read_sr: u8, read_cr: u8, write_sr: u8) -> Self {
        Self {
            kind: RegKind::SrCr,
            naddr: 0,
            addr: 0,
            ndummy_read: 0,
            ndummy_write: 0,
            ndata: 2,
            read_opcode: read_sr,
            read_opcode2: read_cr,
            write_opcode: write_sr,
            write_opcode_volatile: 0,
            write_opcode2: 0,
            flags: RegFlags::LITTLE_ENDIAN,
        }
    }

    /// Two independent 1-byte registers
    pub const fn dual(read1: u8, read2: u8, write1: u8, write2: u8) -> Self {
        Self {
            kind: RegKind::Dual,
            naddr: 0,
            addr: 0,
            ndummy_read: 0,
            ndummy_write: 0,
            ndata: 2,
            read_opcode: read1,
            read_opcode2: read2,
            write_opcode: write1,
            write_opcode_volatile: 0,
            write_opcode2: write2,
            flags: RegFlags::empty(),
        }
    }

    /// Register width in bytes
    pub const fn nbytes(&self) -> u32 {
        match self.kind {
            RegKind::Normal => self.ndata as u32,
            RegKind::SrCr | RegKind::Dual => 2,
        }
    }
}

/// Status register 1 (05h / 01h)
pub const SR_ACC: RegAccess = RegAccess::normal(opcodes::RDSR, opcodes::WRSR);
/// Configuration register / status register 2 (35h / 31h)
pub const CR_ACC: RegAccess = RegAccess::normal(opcodes::RDCR, opcodes::WRSR2);
/// Status register 3 (15h / 11h)
pub const SR3_ACC: RegAccess = RegAccess::normal(opcodes::RDSR3, opcodes::WRSR3);
/// SR+CR joint access (05h + 35h read, 2-byte 01h write)
pub const SRCR_ACC: RegAccess = RegAccess::srcr(opcodes::RDSR, opcodes::RDCR, opcodes::WRSR);
/// Extended address register (C8h / C5h)
pub const EAR_ACC: RegAccess = RegAccess::normal(opcodes::RDEAR, opcodes::WREAR);
/// Bank register (16h / 17h)
pub const BANK_ACC: RegAccess = RegAccess::normal(opcodes::RDBANK, opcodes::WRBANK);
/// Security register (2Bh / 2Fh)
pub const SCUR_ACC: RegAccess = RegAccess::normal(opcodes::RDSCUR, opcodes::WRSCUR);

/// Which register accesses carry the part's SR and CR
#[derive(Debug, Clone, Copy)]
pub struct RegSet {
    /// SR read access
    pub sr_r: RegAccess,
    /// SR write access
    pub sr_w: RegAccess,
    /// CR access, for parts that have one
    pub cr: Option<RegAccess>,
    /// Bit offset of CR within the assembled (SR | CR << 8) value
    pub cr_shift: u32,
}

impl Default for RegSet {
    fn default() -> Self {
        Self {
            sr_r: SR_ACC,
            sr_w: SR_ACC,
            cr: Some(CR_ACC),
            cr_shift: 8,
        }
    }
}

impl<C: SpiController> SpiNor<C> {
    fn reg_addr_len(&self, access: &RegAccess) -> u8 {
        if access.flags.contains(RegFlags::ADDR_4B_MODE) {
            if self.state.a4b_mode {
                4
            } else {
                3
            }
        } else {
            access.naddr
        }
    }

    fn read_reg_one(&mut self, access: &RegAccess, read_opcode: u8, ndata: u8) -> Result<u32> {
        if ndata as usize > 4 {
            return Err(Error::Unsupported);
        }

        let bw = self.state.cmd_buswidth_curr;
        let naddr = self.reg_addr_len(access);
        let mut data = [0u8; 4];

        let mut op = SpiMemOp::cmd_addr(read_opcode, bw, naddr, access.addr as u64);
        op.dummy.len = access.ndummy_read;
        op.dummy.buswidth = bw;
        op.data = MemDataPhase {
            buswidth: bw,
            dtr: false,
            buf: MemData::In(&mut data[..ndata as usize]),
        };

        if !self.bus.mem_supports_op(&op) {
            return Err(Error::Unsupported);
        }

        self.bus.mem_exec_op(&mut op)?;
        drop(op);

        let le = access.flags.contains(RegFlags::LITTLE_ENDIAN);
        let val = match ndata {
            1 => data[0] as u32,
            2 if le => data[0] as u32 | (data[1] as u32) << 8,
            2 => data[1] as u32 | (data[0] as u32) << 8,
            _ if le => u32::from_le_bytes(data),
            _ => u32::from_be_bytes(data),
        };

        Ok(val)
    }

    /// Read a register through its descriptor
    pub fn read_reg_acc(&mut self, access: &RegAccess) -> Result<u32> {
        match access.kind {
            RegKind::Normal => self.read_reg_one(access, access.read_opcode, access.ndata),
            RegKind::SrCr => {
                let lo = self.read_reg_one(access, access.read_opcode, 1)?;
                let hi = self.read_reg_one(access, access.read_opcode2, 1)?;
                Ok((lo & 0xFF) | (hi & 0xFF) << 8)
            }
            RegKind::Dual => {
                let first = self.read_reg_one(access, access.read_opcode, 1)?;
                let second = self.read_reg_one(access, access.read_opcode2, 1)?;
                if access.flags.contains(RegFlags::LITTLE_ENDIAN) {
                    Ok((first & 0xFF) | (second & 0xFF) << 8)
                } else {
                    Ok((first & 0xFF) << 8 | (second & 0xFF))
                }
            }
        }
    }

    fn write_reg_one(
        &mut self,
        access: &RegAccess,
        write_opcode: u8,
        ndata: u8,
        val: u32,
    ) -> Result<()> {
        if ndata as usize > 4 {
            return Err(Error::Unsupported);
        }

        let bw = self.state.cmd_buswidth_curr;
        let naddr = self.reg_addr_len(access);

        let mut data = [0u8; 4];
        if access.flags.contains(RegFlags::LITTLE_ENDIAN) {
            data[..ndata as usize].copy_from_slice(&val.to_le_bytes()[..ndata as usize]);
        } else {
            let be = val.to_be_bytes();
            data[..ndata as usize].copy_from_slice(&be[4 - ndata as usize..]);
        }

        let mut op = SpiMemOp::cmd_addr(write_opcode, bw, naddr, access.addr as u64);
        op.dummy.len = access.ndummy_write;
        op.dummy.buswidth = bw;
        op.data = MemDataPhase {
            buswidth: bw,
            dtr: false,
            buf: MemData::Out(&data[..ndata as usize]),
        };

        if !self.bus.mem_supports_op(&op) {
            return Err(Error::Unsupported);
        }

        let mut poll = false;
        if !access.flags.contains(RegFlags::NO_WREN) {
            if access.flags.contains(RegFlags::VOLATILE_WREN_50H) {
                self.volatile_write_enable()?;
            } else {
                self.write_enable()?;
                poll = true;
            }
        }

        self.bus.mem_exec_op(&mut op)?;
        drop(op);

        if poll {
            return self.wait_busy(WRITE_NV_REG_TIMEOUT_MS);
        }

        Ok(())
    }

    /// Write a register through its descriptor
    pub fn write_reg_acc(&mut self, access: &RegAccess, val: u32, volatile_write: bool) -> Result<()> {
        match access.kind {
            RegKind::Normal | RegKind::SrCr => {
                let opcode = if volatile_write
                    && access.flags.contains(RegFlags::HAS_VOLATILE_WR_OPCODE)
                {
                    access.write_opcode_volatile
                } else {
                    access.write_opcode
                };
                self.write_reg_one(access, opcode, access.ndata, val)
            }
            RegKind::Dual => {
                let (v1, v2) = if access.flags.contains(RegFlags::LITTLE_ENDIAN) {
                    (val & 0xFF, (val >> 8) & 0xFF)
                } else {
                    ((val >> 8) & 0xFF, val & 0xFF)
                };
                self.write_reg_one(access, access.write_opcode, 1, v1)?;
                self.write_reg_one(access, access.write_opcode2, 1, v2)
            }
        }
    }

    /// Read-modify-write a register
    pub fn update_reg_acc(
        &mut self,
        access: &RegAccess,
        clr: u32,
        set: u32,
        volatile_write: bool,
    ) -> Result<()> {
        let mut val = self.read_reg_acc(access)?;
        val &= !clr;
        val |= set;
        self.write_reg_acc(access, val, volatile_write)
    }
}
