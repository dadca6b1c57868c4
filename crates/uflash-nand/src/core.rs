//! SPI-NAND core
//!
//! Every array operation is two-phase on SPI-NAND: move a page between the
//! array and the cache (13h / 10h), poll the status feature register, then
//! clock the cache over the bus (read-from-cache / program-load). ECC runs
//! either on the die (status bits decoded from C0h) or in a bound external
//! engine operating on the raw page.

use crate::ecc::{BbmFlags, EccConfig, EccEngine, EccStepStatus, OnDieEcc, SectorEcc};
use crate::memorg::{MemAux, Memorg};
use crate::opcodes;
use bitflags::bitflags;
use uflash_core::bus::SpiBus;
use uflash_core::controller::{ControllerCaps, SpiController};
use uflash_core::error::{Error, Result};
use uflash_core::id::FlashId;
use uflash_core::spi::{IoCaps, IoType, MemData, MemDataPhase, SpiMemOp};

/// Probe clock
pub const SPEED_LOW: u32 = 10_000_000;
/// Steady-state clock
pub const SPEED_HIGH: u32 = 60_000_000;
/// Page read / program / erase timeout
pub const OP_TIMEOUT_MS: u32 = 2500;
/// Default unique-ID length
pub const DFL_UID_LEN: u32 = 16;
/// Default unique-ID repetition count
pub const DFL_UID_REPEATS: u32 = 16;

bitflags! {
    /// Per-part quirks
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NandFlags: u32 {
        /// Quad I/O is gated by the config-feature QE bit
        const HAS_QE = 1 << 0;
        /// Chip has no usable on-die ECC
        const NO_ON_DIE_ECC = 1 << 1;
        /// Chip exposes a unique ID page
        const HAS_UID = 1 << 2;
    }
}

bitflags! {
    /// Flags for bulk reads/writes
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AccessFlags: u32 {
        /// Keep scanning past transfer-level errors
        const IGNORE_IO_ERROR = 1 << 0;
        /// Keep scanning past uncorrectable pages
        const IGNORE_ECC_ERROR = 1 << 1;
    }
}

/// How the status-feature ECC field decodes on this part
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EccStatusType {
    /// Classic 2-bit field: 00 clean, 01 corrected, 10 uncorrectable,
    /// 11 corrected at threshold
    #[default]
    Bits2,
    /// 3-bit field (bits 6:4): 000 clean, 001/011/101 corrected buckets,
    /// 010 uncorrectable
    Bits3,
}

/// Outcome of a page read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStatus {
    /// No bit errors
    Clean,
    /// Bit errors corrected; the data is good
    Corrected {
        /// Corrected bitflip count (aggregate when the engine can't say
        /// per-step)
        bitflips: u32,
    },
    /// Beyond correction; the buffer holds the damaged data
    Uncorrectable,
}

impl PageStatus {
    /// Worst of two statuses
    pub fn merge(self, other: PageStatus) -> PageStatus {
        use PageStatus::*;
        match (self, other) {
            (Uncorrectable, _) | (_, Uncorrectable) => Uncorrectable,
            (Corrected { bitflips: a }, Corrected { bitflips: b }) => Corrected {
                bitflips: a.max(b),
            },
            (c @ Corrected { .. }, _) | (_, c @ Corrected { .. }) => c,
            _ => Clean,
        }
    }
}

/// Outcome of a bulk operation: what finished, and how
#[derive(Debug)]
pub struct BulkOutcome {
    /// Pages (or blocks) fully completed
    pub completed: u32,
    /// Final status; `Err` means the operation stopped early
    pub result: Result<PageStatus>,
}

/// A database-resolved part description
#[derive(Debug, Clone)]
pub struct NandPart {
    /// Display model name
    pub model: String,
    /// Display vendor name
    pub vendor: String,
    /// Matching ID
    pub id: FlashId,
    /// Geometry
    pub memorg: Memorg,
    /// On-die correction capability
    pub ecc_req: EccConfig,
    /// Read-from-cache flavors the part supports
    pub rd_caps: IoCaps,
    /// Program-load flavors the part supports
    pub pl_caps: IoCaps,
    /// Highest supported clock (0 = unlimited)
    pub max_speed: u32,
    /// Quirks
    pub flags: NandFlags,
    /// Status-field decoding
    pub ecc_status: EccStatusType,
    /// OTP-proper page count
    pub otp_pages: u32,
    /// Unique ID length in bytes
    pub uid_len: u32,
    /// Unique ID repetition count on the UID page
    pub uid_repeats: u32,
}

/// Summary for front-ends
#[derive(Debug, Clone)]
pub struct NandInfo {
    /// Display model name
    pub model: String,
    /// Display vendor name
    pub vendor: String,
    /// Probed ID
    pub id: FlashId,
    /// Geometry
    pub memorg: Memorg,
    /// Derived shifts/masks/totals
    pub maux: MemAux,
    /// Active correction geometry
    pub ecc_config: EccConfig,
    /// Selected read flavor
    pub rd_io: IoType,
    /// Selected program flavor
    pub pl_io: IoType,
}

/// Object-safe generic NAND interface, the surface BBT and FTL bindings
/// compose over.
pub trait NandChip {
    /// Chip summary
    fn info(&self) -> NandInfo;
    /// Read one raw-sized page. `raw` bypasses ECC and layout conversion.
    fn read_page(&mut self, page: u32, buf: &mut [u8], raw: bool) -> Result<PageStatus>;
    /// Program one raw-sized page
    fn write_page(&mut self, page: u32, buf: &[u8], raw: bool) -> Result<()>;
    /// Erase the block containing `page`
    fn erase_block(&mut self, page: u32) -> Result<()>;
    /// Whether the block carries a bad-block mark
    fn check_bad(&mut self, block: u32) -> Result<bool>;
    /// Write the bad-block mark
    fn mark_bad(&mut self, block: u32) -> Result<()>;
    /// Convert a page between raw and canonical layouts
    fn convert_page_format(&self, src: &[u8], dst: &mut [u8], from_canonical: bool) -> Result<()>;
}

struct NandState {
    rd_io: IoType,
    rd_opcode: u8,
    rd_ndummy: u8,
    pl_io: IoType,
    pl_opcode: u8,
    curr_die: u32,
}

impl Default for NandState {
    fn default() -> Self {
        Self {
            rd_io: IoType::Io1_1_1,
            rd_opcode: opcodes::FAST_READ_FROM_CACHE,
            rd_ndummy: 1,
            pl_io: IoType::Io1_1_1,
            pl_opcode: opcodes::PROGRAM_LOAD,
            curr_die: 0,
        }
    }
}

/// Read-from-cache opcode menu, slowest first
const RD_MENU: [(IoType, u8, u8); 5] = [
    (IoType::Io1_1_1, opcodes::FAST_READ_FROM_CACHE, 1),
    (IoType::Io1_1_2, opcodes::READ_FROM_CACHE_X2, 1),
    (IoType::Io1_2_2, opcodes::READ_FROM_CACHE_DUAL_IO, 1),
    (IoType::Io1_1_4, opcodes::READ_FROM_CACHE_X4, 1),
    (IoType::Io1_4_4, opcodes::READ_FROM_CACHE_QUAD_IO, 1),
];

/// Program-load opcode menu
const PL_MENU: [(IoType, u8); 2] = [
    (IoType::Io1_1_1, opcodes::PROGRAM_LOAD),
    (IoType::Io1_1_4, opcodes::PROGRAM_LOAD_X4),
];

/// SPI-NAND instance (C8)
pub struct SpiNand<C: SpiController> {
    bus: SpiBus<C>,
    state: NandState,
    part: Option<NandPart>,
    maux: MemAux,
    probed_id: FlashId,
    ecc: Option<Box<dyn EccEngine>>,
    ecc_enabled: bool,
    allowed_io_caps: IoCaps,
    scratch: Vec<u8>,
}

impl<C: SpiController> SpiNand<C> {
    /// Wrap an attached bus; unusable until probe succeeds
    pub fn new(bus: SpiBus<C>) -> Self {
        Self {
            bus,
            state: NandState::default(),
            part: None,
            maux: MemAux::default(),
            probed_id: FlashId::default(),
            ecc: None,
            ecc_enabled: true,
            allowed_io_caps: IoCaps::all(),
            scratch: Vec::new(),
        }
    }

    /// Hand the bus back
    pub fn detach(self) -> SpiBus<C> {
        self.bus
    }

    /// Host policy: restrict negotiable I/O flavors
    pub fn set_allowed_io_caps(&mut self, caps: IoCaps) {
        self.allowed_io_caps = caps;
    }

    /// The probed part
    pub fn part(&self) -> Option<&NandPart> {
        self.part.as_ref()
    }

    /// Derived geometry
    pub fn maux(&self) -> &MemAux {
        &self.maux
    }

    /// The probed ID
    pub fn id(&self) -> &FlashId {
        &self.probed_id
    }

    /// Bind an ECC engine (replacing the probe-time default)
    pub fn set_ecc(&mut self, ecc: Box<dyn EccEngine>) -> Result<()> {
        let layout_total = ecc.page_layout(false).total();
        if self.part.is_some() && layout_total != self.maux.oob_page_size {
            return Err(Error::InvalidParameter("ECC geometry does not match the chip"));
        }
        self.ecc = Some(ecc);
        Ok(())
    }

    /// The bound ECC engine
    pub fn ecc(&self) -> Option<&dyn EccEngine> {
        self.ecc.as_deref()
    }

    /// Enable or bypass correction for subsequent non-raw operations
    pub fn set_ecc_enabled(&mut self, enabled: bool) {
        self.ecc_enabled = enabled;
    }

    fn require_part(&self) -> Result<&NandPart> {
        self.part.as_ref().ok_or(Error::NotProbed)
    }

    // ------------------------------------------------------------------
    // Wire primitives
    // ------------------------------------------------------------------

    fn issue_opcode(&mut self, opcode: u8) -> Result<()> {
        let mut op = SpiMemOp::cmd(opcode, 1);
        self.bus.mem_exec_op(&mut op)
    }

    /// GET_FEATURE (0Fh)
    pub fn get_feature(&mut self, addr: u8) -> Result<u8> {
        let mut val = [0u8; 1];
        let mut op = SpiMemOp::cmd_addr(opcodes::GET_FEATURE, 1, 1, addr as u64);
        op.data = MemDataPhase {
            buswidth: 1,
            dtr: false,
            buf: MemData::In(&mut val),
        };
        self.bus.mem_exec_op(&mut op)?;
        drop(op);
        Ok(val[0])
    }

    /// SET_FEATURE (1Fh)
    pub fn set_feature(&mut self, addr: u8, val: u8) -> Result<()> {
        let data = [val];
        let mut op = SpiMemOp::cmd_addr(opcodes::SET_FEATURE, 1, 1, addr as u64);
        op.data = MemDataPhase {
            buswidth: 1,
            dtr: false,
            buf: MemData::Out(&data),
        };
        self.bus.mem_exec_op(&mut op)
    }

    /// Read-modify-write a feature register
    pub fn update_feature(&mut self, addr: u8, clr: u8, set: u8) -> Result<()> {
        let val = self.get_feature(addr)?;
        self.set_feature(addr, (val & !clr) | set)
    }

    /// Poll OIP clear; returns the final status byte
    fn wait_ready(&mut self, timeout_ms: u32) -> Result<u8> {
        let mut val = [0u8; 1];
        {
            let mut op = SpiMemOp::cmd_addr(
                opcodes::GET_FEATURE,
                1,
                1,
                opcodes::FEATURE_STATUS as u64,
            );
            op.data = MemDataPhase {
                buswidth: 1,
                dtr: false,
                buf: MemData::In(&mut val),
            };
            self.bus
                .mem_poll_status(&mut op, opcodes::STATUS_OIP as u16, 0, 0, 10, timeout_ms)?;
        }
        Ok(val[0])
    }

    fn write_enable(&mut self) -> Result<()> {
        self.issue_opcode(opcodes::WRITE_ENABLE)
    }

    /// Select a die in a multi-die package
    pub fn select_die(&mut self, die: u32) -> Result<()> {
        let part = self.require_part()?;
        if die >= part.memorg.num_chips {
            return Err(Error::InvalidParameter("die index"));
        }
        if part.memorg.num_chips == 1 || self.state.curr_die == die {
            self.state.curr_die = die;
            return Ok(());
        }

        let data = [die as u8];
        let mut op = SpiMemOp::cmd_data_out(opcodes::SELECT_DIE, 1, &data);
        self.bus.mem_exec_op(&mut op)?;
        drop(op);
        self.state.curr_die = die;
        Ok(())
    }

    /// Split a linear page number into (die, row address within die)
    fn page_to_row(&self, page: u32) -> (u32, u32) {
        if self.maux.chip_shift >= 32 {
            return (0, page);
        }
        let die = page >> self.maux.chip_shift;
        let row = page & ((1 << self.maux.chip_shift) - 1);
        (die, row)
    }

    fn decode_ecc_status(&self, status: u8) -> PageStatus {
        let part = match self.part.as_ref() {
            Some(p) => p,
            None => return PageStatus::Clean,
        };
        let strength = part.ecc_req.strength_per_step as u32;

        match part.ecc_status {
            EccStatusType::Bits2 => {
                match (status & opcodes::STATUS_ECC_MASK) >> opcodes::STATUS_ECC_SHIFT {
                    0b00 => PageStatus::Clean,
                    0b01 => PageStatus::Corrected {
                        bitflips: strength.saturating_sub(1).max(1),
                    },
                    0b11 => PageStatus::Corrected { bitflips: strength },
                    _ => PageStatus::Uncorrectable,
                }
            }
            EccStatusType::Bits3 => match (status >> 4) & 0x7 {
                0b000 => PageStatus::Clean,
                0b001 => PageStatus::Corrected { bitflips: 3 },
                0b011 => PageStatus::Corrected { bitflips: 6 },
                0b101 => PageStatus::Corrected { bitflips: strength },
                _ => PageStatus::Uncorrectable,
            },
        }
    }

    // ------------------------------------------------------------------
    // Probe
    // ------------------------------------------------------------------

    fn read_id(&mut self) -> Result<FlashId> {
        let mut bytes = [0u8; 4];
        let mut op = SpiMemOp::cmd(opcodes::READID, 1);
        op.dummy.len = 1;
        op.dummy.buswidth = 1;
        op.data = MemDataPhase {
            buswidth: 1,
            dtr: false,
            buf: MemData::In(&mut bytes),
        };
        self.bus.mem_exec_op(&mut op)?;
        drop(op);
        Ok(FlashId::new(&bytes))
    }

    /// Probe the chip and derive the steady state
    pub fn probe_init(&mut self, db: &crate::db::NandDatabase) -> Result<()> {
        self.bus.set_speed_closest(SPEED_LOW).ok();

        self.issue_opcode(opcodes::RESET)?;
        self.wait_ready(OP_TIMEOUT_MS)?;

        let id = self.read_id()?;
        if id.is_blank() {
            return Err(Error::PartNotRecognised);
        }
        log::info!("SPI-NAND ID: {}", id);
        self.probed_id = id;

        let part = db.lookup(&id).ok_or(Error::PartNotRecognised)?.clone();
        log::info!("matched part {} {}", part.vendor, part.model);

        self.maux = MemAux::derive(&part.memorg)?;
        self.scratch = vec![0xFF; self.maux.oob_page_size as usize];

        // Default binding: the chip's own engine, or the external sector
        // engine for parts without usable on-die correction
        if part.flags.contains(NandFlags::NO_ON_DIE_ECC) {
            let sector = SectorEcc::new(part.memorg.page_size, part.memorg.oob_size, false)?;
            self.ecc = Some(Box::new(sector));
        } else {
            let on_die = OnDieEcc::new(
                part.memorg.page_size,
                part.memorg.oob_size,
                part.ecc_req,
            );
            self.ecc = Some(Box::new(on_die));
        }

        self.select_io_modes(&part)?;

        // Unlock the whole array; shipped parts power up block-protected
        self.set_feature(opcodes::FEATURE_PROTECT, 0)?;

        self.part = Some(part);
        self.check_param_page();

        let max = match self.part.as_ref().unwrap().max_speed {
            0 => SPEED_HIGH,
            s => s.min(SPEED_HIGH),
        };
        self.bus.set_speed_closest(max).ok();

        Ok(())
    }

    /// Peek at the parameter page. The database already fixed the geometry;
    /// this only cross-checks the signature and flags surprises.
    fn check_param_page(&mut self) {
        let mut page = vec![0u8; self.maux.oob_page_size as usize];

        let ok = self.otp_control(true).is_ok()
            && self
                .read_page_status(opcodes::OTP_PAGE_PARAM, &mut page, true)
                .is_ok();
        let _ = self.otp_control(false);

        if !ok {
            log::debug!("parameter page not readable");
            return;
        }

        let sig = u32::from_le_bytes(page[0..4].try_into().unwrap());
        if sig == opcodes::ONFI_SIGNATURE {
            log::debug!("ONFI parameter page present");
        } else {
            log::debug!("no ONFI signature in the parameter page ({:#010x})", sig);
        }
    }

    fn controller_io_caps(&self) -> IoCaps {
        let caps = self.bus.caps();
        let mut io = IoCaps::SINGLE;
        if caps.contains(ControllerCaps::DUAL) {
            io |= IoCaps::X2 | IoCaps::IO_1_2_2;
        }
        if caps.contains(ControllerCaps::QUAD) {
            io |= IoCaps::X4 | IoCaps::IO_1_4_4;
        }
        io
    }

    fn select_io_modes(&mut self, part: &NandPart) -> Result<()> {
        let usable = self.allowed_io_caps & self.controller_io_caps();

        for (io, opcode, ndummy) in RD_MENU.iter().rev() {
            if !(usable & part.rd_caps).supports(*io) {
                continue;
            }
            let mut probe = [0u8; 1];
            let op = SpiMemOp::read(*io, *opcode, 2, 0, *ndummy, &mut probe);
            if !self.bus.mem_supports_op(&op) {
                continue;
            }
            self.state.rd_io = *io;
            self.state.rd_opcode = *opcode;
            self.state.rd_ndummy = *ndummy;
            break;
        }

        for (io, opcode) in PL_MENU.iter().rev() {
            if !(usable & part.pl_caps).supports(*io) {
                continue;
            }
            let probe = [0u8; 1];
            let op = SpiMemOp::write(*io, *opcode, 2, 0, &probe);
            if !self.bus.mem_supports_op(&op) {
                continue;
            }
            self.state.pl_io = *io;
            self.state.pl_opcode = *opcode;
            break;
        }

        log::info!(
            "read-from-cache {} ({:02X}h), program-load {} ({:02X}h)",
            self.state.rd_io,
            self.state.rd_opcode,
            self.state.pl_io,
            self.state.pl_opcode
        );

        // Quad flavors are gated by the QE config bit on most parts
        if part.flags.contains(NandFlags::HAS_QE) {
            let quad = self.state.rd_io.data_bw() == 4 || self.state.pl_io.data_bw() == 4;
            if quad {
                self.update_feature(opcodes::FEATURE_CONFIG, 0, opcodes::CONFIG_QUAD_EN)?;
            } else {
                self.update_feature(opcodes::FEATURE_CONFIG, opcodes::CONFIG_QUAD_EN, 0)?;
            }
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Page data path
    // ------------------------------------------------------------------

    fn on_die_ecc_control(&mut self, enable: bool) -> Result<()> {
        // The die's engine runs only when it is the bound engine; an external
        // engine (and every raw access) needs the chip transparent.
        let on_die = self.ecc.as_ref().map(|e| e.is_on_die()).unwrap_or(false);
        if enable && on_die {
            self.update_feature(opcodes::FEATURE_CONFIG, 0, opcodes::CONFIG_ECC_EN)
        } else {
            self.update_feature(opcodes::FEATURE_CONFIG, opcodes::CONFIG_ECC_EN, 0)
        }
    }

    fn read_from_cache(&mut self, column: u32, buf: &mut [u8]) -> Result<()> {
        let granularity = self.bus.max_read_granularity();
        let mut offset = 0usize;

        while offset < buf.len() {
            let want = (buf.len() - offset).min(granularity);

            let chunk = {
                let op = SpiMemOp::read(
                    self.state.rd_io,
                    self.state.rd_opcode,
                    2,
                    (column as usize + offset) as u64,
                    self.state.rd_ndummy,
                    &mut buf[offset..offset + want],
                );
                want.min(self.bus.mem_adjust_op_size(&op)?)
            };

            let mut op = SpiMemOp::read(
                self.state.rd_io,
                self.state.rd_opcode,
                2,
                (column as usize + offset) as u64,
                self.state.rd_ndummy,
                &mut buf[offset..offset + chunk],
            );
            self.bus.mem_exec_op(&mut op)?;
            drop(op);
            offset += chunk;
        }

        Ok(())
    }

    fn program_load(&mut self, column: u32, data: &[u8]) -> Result<()> {
        // PROGRAM_LOAD resets the cache, so the page must fit one op
        let op = SpiMemOp::write(
            self.state.pl_io,
            self.state.pl_opcode,
            2,
            column as u64,
            data,
        );
        if self.bus.mem_adjust_op_size(&op)? < data.len() {
            return Err(Error::Unsupported);
        }
        drop(op);

        let mut op = SpiMemOp::write(
            self.state.pl_io,
            self.state.pl_opcode,
            2,
            column as u64,
            data,
        );
        self.bus.mem_exec_op(&mut op)
    }

    /// Read one page. For `raw`, ECC and layout conversion are bypassed and
    /// the buffer receives the array bytes as-is. Uncorrectable pages return
    /// `Ok(PageStatus::Uncorrectable)` with the damaged data in place.
    pub fn read_page_status(&mut self, page: u32, buf: &mut [u8], raw: bool) -> Result<PageStatus> {
        self.require_part()?;
        if page >= self.maux.page_count {
            return Err(Error::AddressOutOfRange);
        }
        if buf.len() < self.maux.oob_page_size as usize {
            return Err(Error::InvalidParameter("page buffer too short"));
        }

        let use_ecc = !raw && self.ecc_enabled;
        self.on_die_ecc_control(use_ecc)?;

        let (die, row) = self.page_to_row(page);
        self.select_die(die)?;

        let mut op = SpiMemOp::cmd_addr(opcodes::READ_TO_CACHE, 1, 3, row as u64);
        self.bus.mem_exec_op(&mut op)?;
        drop(op);

        let status = self.wait_ready(OP_TIMEOUT_MS)?;

        let oob_page = self.maux.oob_page_size as usize;
        self.read_from_cache(0, &mut buf[..oob_page])?;

        if !use_ecc {
            return Ok(PageStatus::Clean);
        }

        let on_die = self.ecc.as_ref().map(|e| e.is_on_die()).unwrap_or(true);
        if on_die {
            let outcome = self.decode_ecc_status(status);
            if let Some(ecc) = self.ecc.as_mut() {
                // Mirror the feature-register outcome into the engine's
                // status surface
                let mut st = EccStepStatus {
                    per_step: false,
                    step_bitflips: vec![0; 1],
                };
                match outcome {
                    PageStatus::Corrected { bitflips } => st.step_bitflips[0] = bitflips as i32,
                    PageStatus::Uncorrectable => st.step_bitflips[0] = -1,
                    PageStatus::Clean => {}
                }
                ecc.set_feature_status(st);
            }
            Ok(outcome)
        } else {
            let ecc = self.ecc.as_mut().unwrap();
            match ecc.decode_page(&mut buf[..oob_page]) {
                Ok(()) => {
                    let bitflips = ecc.status().total_bitflips();
                    if bitflips > 0 {
                        Ok(PageStatus::Corrected { bitflips })
                    } else {
                        Ok(PageStatus::Clean)
                    }
                }
                Err(Error::EccUncorrectable) => Ok(PageStatus::Uncorrectable),
                Err(e) => Err(e),
            }
        }
    }

    /// Program one page. For non-raw writes through an external engine the
    /// page is encoded into the core's scratch first.
    pub fn write_page_raw(&mut self, page: u32, buf: &[u8], raw: bool) -> Result<()> {
        self.require_part()?;
        if page >= self.maux.page_count {
            return Err(Error::AddressOutOfRange);
        }
        let oob_page = self.maux.oob_page_size as usize;
        if buf.len() < oob_page {
            return Err(Error::InvalidParameter("page buffer too short"));
        }

        let use_ecc = !raw && self.ecc_enabled;
        self.on_die_ecc_control(use_ecc)?;

        let (die, row) = self.page_to_row(page);
        self.select_die(die)?;

        let external = use_ecc && !self.ecc.as_ref().map(|e| e.is_on_die()).unwrap_or(true);
        if external {
            self.scratch[..oob_page].copy_from_slice(&buf[..oob_page]);
            let mut scratch = std::mem::take(&mut self.scratch);
            let res = self.ecc.as_mut().unwrap().encode_page(&mut scratch[..oob_page]);
            self.scratch = scratch;
            res?;
        }

        self.write_enable()?;

        if external {
            let scratch = std::mem::take(&mut self.scratch);
            let res = self.program_load(0, &scratch[..oob_page]);
            self.scratch = scratch;
            res?;
        } else {
            self.program_load(0, &buf[..oob_page])?;
        }

        let mut op = SpiMemOp::cmd_addr(opcodes::PROGRAM_EXECUTE, 1, 3, row as u64);
        self.bus.mem_exec_op(&mut op)?;
        drop(op);

        let status = self.wait_ready(OP_TIMEOUT_MS)?;
        if status & opcodes::STATUS_PROGRAM_FAIL != 0 {
            return Err(Error::ProgramFailed);
        }

        Ok(())
    }

    /// Erase the block containing `page`
    pub fn erase_block_at(&mut self, page: u32) -> Result<()> {
        self.require_part()?;
        if page >= self.maux.page_count {
            return Err(Error::AddressOutOfRange);
        }

        let (die, row) = self.page_to_row(page);
        self.select_die(die)?;

        self.write_enable()?;

        let row = row & !self.maux.pages_per_block_mask;
        let mut op = SpiMemOp::cmd_addr(opcodes::BLOCK_ERASE, 1, 3, row as u64);
        self.bus.mem_exec_op(&mut op)?;
        drop(op);

        let status = self.wait_ready(OP_TIMEOUT_MS)?;
        if status & opcodes::STATUS_ERASE_FAIL != 0 {
            return Err(Error::EraseFailed);
        }

        Ok(())
    }

    /// Bulk page read with partial-failure reporting
    pub fn read_pages(
        &mut self,
        page: u32,
        count: u32,
        buf: &mut [u8],
        raw: bool,
        flags: AccessFlags,
    ) -> BulkOutcome {
        let oob_page = self.maux.oob_page_size as usize;
        if buf.len() < count as usize * oob_page {
            return BulkOutcome {
                completed: 0,
                result: Err(Error::InvalidParameter("bulk buffer too short")),
            };
        }
        let mut worst = PageStatus::Clean;

        for i in 0..count {
            let chunk = &mut buf[i as usize * oob_page..(i as usize + 1) * oob_page];
            match self.read_page_status(page + i, chunk, raw) {
                Ok(PageStatus::Uncorrectable) => {
                    worst = PageStatus::Uncorrectable;
                    if !flags.contains(AccessFlags::IGNORE_ECC_ERROR) {
                        return BulkOutcome {
                            completed: i,
                            result: Err(Error::EccUncorrectable),
                        };
                    }
                }
                Ok(st) => worst = worst.merge(st),
                Err(e) => {
                    if !flags.contains(AccessFlags::IGNORE_IO_ERROR) {
                        return BulkOutcome {
                            completed: i,
                            result: Err(e),
                        };
                    }
                    log::warn!("page {} read failed ({}), continuing", page + i, e);
                }
            }
        }

        BulkOutcome {
            completed: count,
            result: Ok(worst),
        }
    }

    /// Bulk page write with partial-failure reporting
    pub fn write_pages(
        &mut self,
        page: u32,
        count: u32,
        buf: &[u8],
        raw: bool,
        ignore_error: bool,
    ) -> BulkOutcome {
        let oob_page = self.maux.oob_page_size as usize;
        if buf.len() < count as usize * oob_page {
            return BulkOutcome {
                completed: 0,
                result: Err(Error::InvalidParameter("bulk buffer too short")),
            };
        }

        for i in 0..count {
            let chunk = &buf[i as usize * oob_page..(i as usize + 1) * oob_page];
            if let Err(e) = self.write_page_raw(page + i, chunk, raw) {
                if !ignore_error {
                    return BulkOutcome {
                        completed: i,
                        result: Err(e),
                    };
                }
                log::warn!("page {} write failed ({}), continuing", page + i, e);
            }
        }

        BulkOutcome {
            completed: count,
            result: Ok(PageStatus::Clean),
        }
    }

    // ------------------------------------------------------------------
    // Bad-block marks
    // ------------------------------------------------------------------

    /// The effective BBM policy: the ECC engine's, with the chip's default
    /// pages merged in
    pub fn bbm_config(&self) -> crate::ecc::BbmConfig {
        let mut cfg = self
            .ecc
            .as_ref()
            .map(|e| e.bbm_config())
            .unwrap_or_default();

        if cfg.pages.is_empty() || cfg.flags.contains(BbmFlags::MERGE_PAGE) {
            for p in [0u32, u32::MAX] {
                if !cfg.pages.contains(&p) {
                    cfg.pages.push(p);
                }
            }
        }
        if cfg.check_pos.is_empty() {
            cfg.check_pos.push(self.maux.page_mask + 1);
        }
        if cfg.mark_pos.is_empty() {
            cfg.mark_pos.push(self.maux.page_mask + 1);
        }
        cfg
    }

    fn bbm_page_list(&self, block: u32) -> Vec<u32> {
        let first = self.maux.block_to_page(block);
        let last = first + self.maux.pages_per_block_mask;
        self.bbm_config()
            .pages
            .iter()
            .map(|p| if *p == u32::MAX { last } else { first + *p })
            .collect()
    }

    /// Whether the block carries a bad-block mark
    pub fn check_bad_block(&mut self, block: u32) -> Result<bool> {
        if block >= self.maux.block_count {
            return Err(Error::InvalidParameter("block index"));
        }

        let cfg = self.bbm_config();
        let raw = cfg.flags.contains(BbmFlags::RAW) || !cfg.flags.contains(BbmFlags::CANONICAL_LAYOUT);
        let oob_page = self.maux.oob_page_size as usize;

        for page in self.bbm_page_list(block) {
            let mut buf = vec![0u8; oob_page];
            // Damaged pages still carry their marks; tolerate ECC failures
            match self.read_page_status(page, &mut buf, raw) {
                Ok(_) => {}
                Err(_) => continue,
            }

            let view = if cfg.flags.contains(BbmFlags::CANONICAL_LAYOUT) {
                let mut canon = vec![0u8; oob_page];
                self.convert_page_format(&buf, &mut canon, false)?;
                canon
            } else {
                buf
            };

            for &pos in &cfg.check_pos {
                if let Some(&b) = view.get(pos as usize) {
                    if b != 0xFF {
                        return Ok(true);
                    }
                }
            }
        }

        Ok(false)
    }

    /// Write the bad-block mark
    pub fn mark_bad_block(&mut self, block: u32) -> Result<()> {
        if block >= self.maux.block_count {
            return Err(Error::InvalidParameter("block index"));
        }

        let cfg = self.bbm_config();
        let raw = cfg.flags.contains(BbmFlags::RAW) || !cfg.flags.contains(BbmFlags::CANONICAL_LAYOUT);
        let oob_page = self.maux.oob_page_size as usize;

        // Best effort: the block may be unerasable, mark it anyway
        let _ = self.erase_block_at(self.maux.block_to_page(block));

        for page in self.bbm_page_list(block) {
            let mut buf = vec![0xFFu8; oob_page];

            if cfg.flags.contains(BbmFlags::MARK_WHOLE_PAGE) {
                buf.fill(0x00);
            } else {
                for &pos in &cfg.mark_pos {
                    let n = cfg.mark_bytes.max(1) as usize;
                    for i in 0..n {
                        if let Some(b) = buf.get_mut(pos as usize + i) {
                            *b = 0x00;
                        }
                    }
                }
                if cfg.flags.contains(BbmFlags::CANONICAL_LAYOUT) {
                    let mut rawbuf = vec![0u8; oob_page];
                    self.convert_page_format(&buf, &mut rawbuf, true)?;
                    buf = rawbuf;
                }
            }

            if let Err(e) = self.write_page_raw(page, &buf, raw) {
                log::warn!("BBM write on page {} failed ({})", page, e);
            }
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // OTP window, unique ID, parameter page
    // ------------------------------------------------------------------

    fn otp_control(&mut self, enable: bool) -> Result<()> {
        if enable {
            self.update_feature(opcodes::FEATURE_CONFIG, 0, opcodes::CONFIG_OTP_EN)
        } else {
            self.update_feature(opcodes::FEATURE_CONFIG, opcodes::CONFIG_OTP_EN, 0)
        }
    }

    /// Read one OTP-window page (0 = UID, 1 = parameter page, 2.. = OTP)
    pub fn otp_read(&mut self, index: u32, buf: &mut [u8], raw: bool) -> Result<PageStatus> {
        let part = self.require_part()?;
        if index >= opcodes::OTP_PAGE_OTP + part.otp_pages {
            return Err(Error::InvalidParameter("OTP page index"));
        }

        self.otp_control(true)?;
        let res = self.read_page_status(index, buf, raw);
        let restore = self.otp_control(false);
        restore?;
        res
    }

    /// Program one OTP-proper page
    pub fn otp_write(&mut self, index: u32, buf: &[u8], raw: bool) -> Result<()> {
        let part = self.require_part()?;
        if index < opcodes::OTP_PAGE_OTP || index >= opcodes::OTP_PAGE_OTP + part.otp_pages {
            return Err(Error::InvalidParameter("OTP page index"));
        }

        self.otp_control(true)?;
        let res = self.write_page_raw(index, buf, raw);
        let restore = self.otp_control(false);
        restore?;
        res
    }

    /// Permanently lock the OTP area. Irreversible on die.
    pub fn otp_lock(&mut self) -> Result<()> {
        self.require_part()?;

        self.update_feature(
            opcodes::FEATURE_CONFIG,
            0,
            opcodes::CONFIG_OTP_EN | opcodes::CONFIG_OTP_LOCK,
        )?;
        self.write_enable()?;
        let mut op = SpiMemOp::cmd_addr(opcodes::PROGRAM_EXECUTE, 1, 3, 0);
        self.bus.mem_exec_op(&mut op)?;
        drop(op);
        self.wait_ready(OP_TIMEOUT_MS)?;

        self.update_feature(
            opcodes::FEATURE_CONFIG,
            opcodes::CONFIG_OTP_EN | opcodes::CONFIG_OTP_LOCK,
            0,
        )
    }

    /// Whether the OTP area is locked
    pub fn otp_locked(&mut self) -> Result<bool> {
        self.require_part()?;
        let cfg = self.get_feature(opcodes::FEATURE_CONFIG)?;
        Ok(cfg & opcodes::CONFIG_OTP_LOCK != 0)
    }

    /// Read the unique ID with repetition-majority decoding
    pub fn read_uid(&mut self) -> Result<Vec<u8>> {
        let part = self.require_part()?;
        if !part.flags.contains(NandFlags::HAS_UID) {
            return Err(Error::Unsupported);
        }
        let uid_len = part.uid_len as usize;
        let repeats = part.uid_repeats as usize;

        let mut page = vec![0u8; self.maux.oob_page_size as usize];
        self.otp_control(true)?;
        let res = self.read_page_status(opcodes::OTP_PAGE_UID, &mut page, true);
        let restore = self.otp_control(false);
        res?;
        restore?;

        // Majority vote per bit across the stored repetitions
        let mut uid = vec![0u8; uid_len];
        for (i, out) in uid.iter_mut().enumerate() {
            for bit in 0..8u32 {
                let mut votes = 0usize;
                for r in 0..repeats {
                    let ofs = r * uid_len + i;
                    if page.get(ofs).map(|b| b >> bit & 1 == 1).unwrap_or(false) {
                        votes += 1;
                    }
                }
                if votes * 2 >= repeats {
                    *out |= 1 << bit;
                }
            }
        }

        Ok(uid)
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Destructive block test: erase, pattern-program, verify, erase
    pub fn torture_block(&mut self, block: u32) -> Result<()> {
        if block >= self.maux.block_count {
            return Err(Error::InvalidParameter("block index"));
        }

        let first = self.maux.block_to_page(block);
        let pages = self.maux.pages_per_block_mask + 1;
        let oob_page = self.maux.oob_page_size as usize;

        for pattern in [0x55u8, 0xAA] {
            self.erase_block_at(first)?;

            let buf = vec![pattern; oob_page];
            for p in 0..pages {
                self.write_page_raw(first + p, &buf, true)?;
            }

            let mut check = vec![0u8; oob_page];
            for p in 0..pages {
                self.read_page_status(first + p, &mut check, true)?;
                if check != buf {
                    return Err(Error::VerificationFail);
                }
            }
        }

        self.erase_block_at(first)?;
        Ok(())
    }
}

impl<C: SpiController> NandChip for SpiNand<C> {
    fn info(&self) -> NandInfo {
        let part = self.part.as_ref();
        NandInfo {
            model: part.map(|p| p.model.clone()).unwrap_or_default(),
            vendor: part.map(|p| p.vendor.clone()).unwrap_or_default(),
            id: self.probed_id,
            memorg: part.map(|p| p.memorg).unwrap_or(Memorg::simple(1, 1, 1, 0)),
            maux: self.maux,
            ecc_config: self
                .ecc
                .as_ref()
                .map(|e| e.config())
                .unwrap_or_default(),
            rd_io: self.state.rd_io,
            pl_io: self.state.pl_io,
        }
    }

    fn read_page(&mut self, page: u32, buf: &mut [u8], raw: bool) -> Result<PageStatus> {
        self.read_page_status(page, buf, raw)
    }

    fn write_page(&mut self, page: u32, buf: &[u8], raw: bool) -> Result<()> {
        self.write_page_raw(page, buf, raw)
    }

    fn erase_block(&mut self, page: u32) -> Result<()> {
        self.erase_block_at(page)
    }

    fn check_bad(&mut self, block: u32) -> Result<bool> {
        self.check_bad_block(block)
    }

    fn mark_bad(&mut self, block: u32) -> Result<()> {
        self.mark_bad_block(block)
    }

    fn convert_page_format(&self, src: &[u8], dst: &mut [u8], from_canonical: bool) -> Result<()> {
        let ecc = self.ecc.as_ref().ok_or(Error::Unsupported)?;
        ecc.convert_page_layout(src, dst, from_canonical)
    }
}

/// Count bitflips against an expected all-ones buffer; used by erased-page
/// checks with a tolerance threshold.
pub fn count_buf_bitflips(buf: &[u8], threshold: u32) -> Option<u32> {
    let mut flips = 0u32;
    for &b in buf {
        flips += (b ^ 0xFF).count_ones();
        if flips > threshold {
            return None;
        }
    }
    Some(flips)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_status_merge_keeps_worst() {
        let c1 = PageStatus::Corrected { bitflips: 1 };
        let c3 = PageStatus::Corrected { bitflips: 3 };
        assert_eq!(PageStatus::Clean.merge(c1), c1);
        assert_eq!(c1.merge(c3), c3);
        assert_eq!(
            c3.merge(PageStatus::Uncorrectable),
            PageStatus::Uncorrectable
        );
    }

    #[test]
    fn bitflip_counting() {
        assert_eq!(count_buf_bitflips(&[0xFF, 0xFF], 4), Some(0));
        assert_eq!(count_buf_bitflips(&[0xFF, 0xFE], 4), Some(1));
        assert_eq!(count_buf_bitflips(&[0x00, 0xFF], 4), None);
    }
}
