//! SPI-NOR core
//!
//! Probe brings the chip from an unknown state (possibly QPI, possibly
//! 4-byte mode) to a steady state captured in [`NorState`], then read,
//! program and erase execute against that state. All chip interaction goes
//! through the SPI-MEM layer of the attached bus.

use super::erase::{self, EraseRegion};
use super::part::*;
use super::regs::{RegSet, BANK_ACC, EAR_ACC};
use super::sfdp::{fill_4bait, fill_bfpt, Sfdp};
use crate::bus::SpiBus;
use crate::controller::{ControllerCaps, SpiController};
use crate::db::NorDatabase;
use crate::error::{Error, Result};
use crate::id::FlashId;
use crate::spi::{opcodes, IoCaps, IoType, MemData, MemDataPhase, SpiMemOp};

/// READ-ID retries before declaring the chip absent
pub const ID_READ_RETRIES: u32 = 3;
/// Probe clock
pub const SPEED_LOW: u32 = 10_000_000;
/// Steady-state clock
pub const SPEED_HIGH: u32 = 60_000_000;
/// Settle time after a soft reset
pub const RESET_WAIT_MS: u32 = 25;

/// Runtime state reached after probe-init
#[derive(Debug, Clone)]
pub struct NorState {
    /// Bus width commands are currently issued at (4/8 when in QPI/OPI)
    pub cmd_buswidth_curr: u8,
    /// Current address width in bytes (3 or 4)
    pub naddr: u8,
    /// Whether the chip itself is switched into 4-byte mode
    pub a4b_mode: bool,
    /// Whether the Quad-Enable bit has been set by us
    pub qe_set: bool,
    /// Currently selected die
    pub curr_die: u32,
    /// Current EAR/Bank high-address byte
    pub curr_high_addr: u32,
    /// Probe clock actually achieved
    pub speed_low: u32,
    /// Steady-state clock actually achieved
    pub speed_high: u32,
    /// Selected read opcode
    pub read_opcode: u8,
    /// Dummy bytes for the selected read
    pub read_ndummy: u8,
    /// Selected read flavor
    pub read_io: IoType,
    /// Selected page-program opcode
    pub pp_opcode: u8,
    /// Selected page-program flavor
    pub pp_io: IoType,
    /// Non-volatile register write timeout
    pub max_nvcr_pp_time_ms: u32,
    /// Vendor-private flags copied from the part
    pub vendor_flags: u32,
    /// Which register accesses reach this part's SR/CR
    pub reg: RegSet,
}

impl Default for NorState {
    fn default() -> Self {
        Self {
            cmd_buswidth_curr: 1,
            naddr: 3,
            a4b_mode: false,
            qe_set: false,
            curr_die: 0,
            curr_high_addr: 0,
            speed_low: 0,
            speed_high: 0,
            read_opcode: opcodes::FAST_READ,
            read_ndummy: 1,
            read_io: IoType::Io1_1_1,
            pp_opcode: opcodes::PP,
            pp_io: IoType::Io1_1_1,
            max_nvcr_pp_time_ms: super::regs::WRITE_NV_REG_TIMEOUT_MS,
            vendor_flags: 0,
            reg: RegSet::default(),
        }
    }
}

/// Summary reported to front-ends
#[derive(Debug, Clone)]
pub struct NorInfo {
    /// Display model name
    pub model: String,
    /// Display vendor name
    pub vendor: String,
    /// Probed ID
    pub id: FlashId,
    /// Total size
    pub size: u64,
    /// Die count
    pub ndies: u32,
    /// Program page size
    pub page_size: u32,
    /// Selected read flavor
    pub read_io: IoType,
    /// Selected program flavor
    pub pp_io: IoType,
    /// Current command bus width
    pub cmd_buswidth: u8,
    /// Erase flavors in use
    pub erasesizes: Vec<u32>,
    /// Erase regions
    pub regions: Vec<EraseRegion>,
}

/// SPI-NOR instance (C6)
pub struct SpiNor<C: SpiController> {
    pub(crate) bus: SpiBus<C>,
    pub(crate) state: NorState,
    pub(crate) sfdp: Option<Sfdp>,
    part: Option<NorPart>,
    probed_id: FlashId,
    erase_regions: Vec<EraseRegion>,
    allowed_io_caps: IoCaps,
    speed_limit: u32,
}

impl<C: SpiController> SpiNor<C> {
    /// Wrap an attached bus. The instance is unusable until
    /// [`probe_init`](Self::probe_init) succeeds.
    pub fn new(bus: SpiBus<C>) -> Self {
        Self {
            bus,
            state: NorState::default(),
            sfdp: None,
            part: None,
            probed_id: FlashId::default(),
            erase_regions: Vec::new(),
            allowed_io_caps: IoCaps::all(),
            speed_limit: 0,
        }
    }

    /// Tear down: leave QPI and 4-byte mode so the next user finds the chip
    /// in its power-on state, then hand the bus back.
    pub fn detach(mut self) -> SpiBus<C> {
        if self.part.is_some() {
            if self.state.a4b_mode {
                let _ = self.a4b_control(false);
            }
            if self.state.cmd_buswidth_curr != 1 {
                let _ = self.qpi_control(false);
            }
        }
        self.bus
    }

    /// Host policy: restrict which I/O flavors negotiation may pick
    pub fn set_allowed_io_caps(&mut self, caps: IoCaps) {
        self.allowed_io_caps = caps;
    }

    /// Host policy: cap the steady-state clock (0 = part limit)
    pub fn set_speed_limit(&mut self, hz: u32) {
        self.speed_limit = hz;
    }

    /// The probed part, if any
    pub fn part(&self) -> Option<&NorPart> {
        self.part.as_ref()
    }

    /// The probed ID
    pub fn id(&self) -> &FlashId {
        &self.probed_id
    }

    /// Runtime state (primarily for diagnostics)
    pub fn state(&self) -> &NorState {
        &self.state
    }

    /// Erase regions derived at probe
    pub fn erase_regions(&self) -> &[EraseRegion] {
        &self.erase_regions
    }

    /// Bus access for register-level front-ends
    pub fn bus_mut(&mut self) -> &mut SpiBus<C> {
        &mut self.bus
    }

    fn require_part(&self) -> Result<&NorPart> {
        self.part.as_ref().ok_or(Error::NotProbed)
    }

    /// Chip size in bytes
    pub fn size(&self) -> u64 {
        self.part.as_ref().map(|p| p.size).unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Low-level command helpers
    // ------------------------------------------------------------------

    /// Issue a bare opcode at the current command width
    pub(crate) fn issue_opcode(&mut self, opcode: u8) -> Result<()> {
        let mut op = SpiMemOp::cmd(opcode, self.state.cmd_buswidth_curr);
        self.bus.mem_exec_op(&mut op)
    }

    /// WREN (06h)
    pub(crate) fn write_enable(&mut self) -> Result<()> {
        self.issue_opcode(opcodes::WREN)
    }

    /// WRDI (04h)
    pub(crate) fn write_disable(&mut self) -> Result<()> {
        self.issue_opcode(opcodes::WRDI)
    }

    /// Volatile-SR write enable (50h)
    pub(crate) fn volatile_write_enable(&mut self) -> Result<()> {
        self.issue_opcode(opcodes::VOLATILE_WREN)
    }

    /// Poll SR.BUSY clear with a bounded timeout
    pub(crate) fn wait_busy(&mut self, timeout_ms: u32) -> Result<()> {
        let bw = self.state.cmd_buswidth_curr;
        let mut sr = [0u8; 1];
        let mut op = SpiMemOp::cmd_data_in(opcodes::RDSR, bw, &mut sr);
        self.bus
            .mem_poll_status(&mut op, opcodes::SR_BUSY as u16, 0, 0, 10, timeout_ms)
    }

    fn read_id_op(&mut self, opcode: u8, bw: u8, ndummy: u8, len: usize) -> Result<FlashId> {
        let mut bytes = [0u8; crate::id::ID_MAX_LEN];
        let mut op = SpiMemOp::cmd(opcode, bw);
        op.dummy.len = ndummy;
        op.dummy.buswidth = bw;
        op.data = MemDataPhase {
            buswidth: bw,
            dtr: false,
            buf: MemData::In(&mut bytes[..len]),
        };

        if !self.bus.mem_supports_op(&op) {
            return Err(Error::Unsupported);
        }
        self.bus.mem_exec_op(&mut op)?;
        drop(op);

        Ok(FlashId::new(&bytes[..len]))
    }

    /// Read the JEDEC ID, retrying on all-0x00/0xFF answers, also trying the
    /// multi-I/O variant to catch chips sitting in QPI.
    pub fn read_jedec_id(&mut self) -> Result<FlashId> {
        for _ in 0..ID_READ_RETRIES {
            let id = self.read_id_op(opcodes::RDID, 1, 0, 3)?;
            if !id.is_blank() {
                return Ok(id);
            }
        }

        // A chip in QPI ignores 9Fh on one wire; AFh on four answers.
        if self.bus.caps().contains(ControllerCaps::QUAD) {
            if let Ok(id) = self.read_id_op(opcodes::RDID_MULTI, 4, 0, 3) {
                if !id.is_blank() {
                    log::info!("chip answered the multi-I/O READ ID; currently in QPI");
                    self.state.cmd_buswidth_curr = 4;
                    return Ok(id);
                }
            }
        }

        Err(Error::PartNotRecognised)
    }

    // ------------------------------------------------------------------
    // Probe
    // ------------------------------------------------------------------

    /// Probe the chip and derive the steady state: JEDEC ID, database match
    /// (longest prefix wins), SFDP, I/O-mode negotiation, addressing mode,
    /// erase plan, clocks.
    pub fn probe_init(&mut self, db: &NorDatabase) -> Result<()> {
        self.state = NorState::default();
        self.state.speed_low = self.bus.set_speed_closest(SPEED_LOW).unwrap_or(0);

        let id = self.read_jedec_id()?;
        log::info!("JEDEC ID: {}", id);
        self.probed_id = id;

        // A chip found in QPI must leave it before SFDP and negotiation
        if self.state.cmd_buswidth_curr != 1 {
            let dis = db
                .lookup(&id)
                .map(|e| e.part.qpi_dis)
                .unwrap_or(QpiDisType::OpFfh);
            self.leave_qpi(dis)?;
        }

        let mut part = match db.lookup(&id) {
            Some(entry) => {
                log::info!("matched part {} {}", entry.part.vendor, entry.part.model);
                entry.part.clone()
            }
            None => {
                log::info!("no database match, relying on SFDP");
                let mut blank = NorPart::blank();
                blank.id = id;
                blank.model = format!("SFDP:{}", id);
                blank
            }
        };

        if !part.flags.contains(NorFlags::NO_SFDP) {
            match self.fetch_sfdp() {
                Ok(sfdp) => {
                    let from_db = part.size != 0;
                    if !from_db {
                        fill_bfpt(&sfdp, &mut part)?;
                    } else {
                        // Database fields win; SFDP supplements what the entry
                        // left unset.
                        let mut sfdp_part = NorPart::blank();
                        if fill_bfpt(&sfdp, &mut sfdp_part).is_ok() {
                            merge_sfdp_part(&mut part, &sfdp_part);
                        }
                    }
                    fill_4bait(&sfdp, &mut part);
                    self.sfdp = Some(sfdp);
                }
                Err(e) if part.size != 0 => {
                    log::debug!("SFDP unavailable ({}), using database entry alone", e);
                }
                Err(e) => return Err(e),
            }
        }

        if part.size == 0 {
            log::error!("unable to derive chip size");
            return Err(Error::PartNotRecognised);
        }

        self.part = Some(part);
        self.setup_chip()?;

        // SMPT refines the erase plan once the part geometry is known
        if let Some(regions) = self.parse_smpt().unwrap_or(None) {
            self.erase_regions = regions;
        }

        let part = self.require_part()?;
        let max_speed = match (self.speed_limit, part.max_speed) {
            (0, 0) => SPEED_HIGH,
            (0, p) => p.min(SPEED_HIGH),
            (l, 0) => l,
            (l, p) => l.min(p),
        };
        self.state.speed_high = self.bus.set_speed_closest(max_speed).unwrap_or(0);

        Ok(())
    }

    /// Configure the probed chip: I/O modes, QE, QPI, addressing, erase plan
    fn setup_chip(&mut self) -> Result<()> {
        let part = self.require_part()?.clone();

        // Addressing mode first: opcode tables differ between 3B and 4B
        let use_4b = part.size > (16 << 20)
            || part.a4b_en == A4bEnType::Always
            || part.flags.contains(NorFlags::ALWAYS_4B);

        if use_4b {
            match part.a4b_en {
                A4bEnType::Always => {
                    self.state.naddr = 4;
                    self.state.a4b_mode = true;
                }
                A4bEnType::Opcode4b => {
                    self.state.naddr = 4;
                    self.state.a4b_mode = false;
                }
                A4bEnType::Ear | A4bEnType::Bank => {
                    // Stay in 3-byte addressing, bank the high byte
                    self.state.naddr = 3;
                    self.state.a4b_mode = false;
                    self.state.curr_high_addr = 0;
                }
                A4bEnType::OpB7h | A4bEnType::WrenB7h => {
                    self.a4b_control(true)?;
                }
                A4bEnType::None => {
                    log::error!("part is larger than 16 MiB but declares no 4-byte mode");
                    return Err(Error::Unsupported);
                }
            }
        }

        self.select_read_mode(&part)?;
        self.select_pp_mode(&part)?;

        // Quad flavors need the QE bit before first use
        if (self.state.read_io.data_bw() >= 4 || self.state.pp_io.data_bw() >= 4)
            && self.state.cmd_buswidth_curr == 1
        {
            self.quad_enable()?;
        }

        // QPI wanted iff the negotiated mode commands on 4 wires
        if self.state.read_io.cmd_bw() == 4 && self.state.cmd_buswidth_curr != 4 {
            self.qpi_control(true)?;
        }

        self.build_erase_regions();

        Ok(())
    }

    /// I/O flavors reachable with the attached controller
    fn controller_io_caps(&self) -> IoCaps {
        let caps = self.bus.caps();
        let mut io = IoCaps::SINGLE;
        if caps.contains(ControllerCaps::DUAL) {
            io |= IoCaps::DPI;
        }
        if caps.contains(ControllerCaps::QUAD) {
            io |= IoCaps::QPI;
        }
        if caps.contains(ControllerCaps::OCTAL) {
            io |= IoCaps::OPI;
        }
        if caps.contains(ControllerCaps::DTR) {
            io |= IoCaps::IO_1S_1D_1D
                | IoCaps::IO_1D_1D_1D
                | IoCaps::IO_1S_2D_2D
                | IoCaps::IO_2D_2D_2D
                | IoCaps::IO_1S_4D_4D
                | IoCaps::IO_4D_4D_4D
                | IoCaps::IO_1S_8D_8D
                | IoCaps::IO_8D_8D_8D;
        }
        io
    }

    fn read_table<'a>(&self, part: &'a NorPart) -> &'a IoOpcodeSet {
        if self.state.naddr == 4 && !part.read_4b.caps().is_empty() && !self.state.a4b_mode {
            &part.read_4b
        } else {
            &part.read_3b
        }
    }

    /// Dummy bytes on the wire for an opcode at an I/O flavor: the SFDP
    /// tables count clocks, the wire counts bytes.
    fn dummy_bytes(io: IoType, op: IoOpcode) -> u8 {
        let clocks = (op.ndummy + op.nmode) as u32;
        ((clocks * io.addr_bw() as u32) / 8) as u8
    }

    fn select_read_mode(&mut self, part: &NorPart) -> Result<()> {
        let candidates = self.allowed_io_caps & self.controller_io_caps();
        let table = self.read_table(part).clone();

        for io in (candidates & table.caps()).iter_fastest_first() {
            let Some(opcode) = table.get(io) else { continue };
            let ndummy = Self::dummy_bytes(io, opcode);

            // Canonical probe op: 1-byte read at the real widths
            let mut probe = [0u8; 1];
            let op = SpiMemOp::read(
                io,
                opcode.opcode,
                self.state.naddr,
                0,
                ndummy,
                &mut probe,
            );
            if !self.bus.mem_supports_op(&op) {
                continue;
            }

            self.state.read_io = io;
            self.state.read_opcode = opcode.opcode;
            self.state.read_ndummy = ndummy;
            log::info!(
                "selected read mode {} ({:02X}h, {} dummy bytes)",
                io,
                opcode.opcode,
                ndummy
            );
            return Ok(());
        }

        Err(Error::Unsupported)
    }

    fn select_pp_mode(&mut self, part: &NorPart) -> Result<()> {
        let candidates = self.allowed_io_caps & self.controller_io_caps();
        let table = if self.state.naddr == 4 && !part.pp_4b.caps().is_empty() && !self.state.a4b_mode
        {
            part.pp_4b
        } else {
            part.pp_3b
        };

        for io in (candidates & table.caps()).iter_fastest_first() {
            // Program flavors never outrun the command width the read chose
            if io.cmd_bw() > self.state.read_io.cmd_bw() {
                continue;
            }
            let Some(opcode) = table.get(io) else { continue };

            let probe = [0u8; 1];
            let op = SpiMemOp::write(io, opcode.opcode, self.state.naddr, 0, &probe);
            if !self.bus.mem_supports_op(&op) {
                continue;
            }

            self.state.pp_io = io;
            self.state.pp_opcode = opcode.opcode;
            log::info!("selected program mode {} ({:02X}h)", io, opcode.opcode);
            return Ok(());
        }

        Err(Error::Unsupported)
    }

    fn build_erase_regions(&mut self) {
        let Some(part) = self.part.as_ref() else {
            return;
        };
        self.erase_regions = vec![EraseRegion::uniform(0, part.size, &part.erase_3b)];
    }

    // ------------------------------------------------------------------
    // Mode transitions
    // ------------------------------------------------------------------

    /// Set the Quad-Enable bit per the part's declared flavor
    pub(crate) fn quad_enable(&mut self) -> Result<()> {
        let part = self.require_part()?;
        let qe = part.qe_type;

        let (acc, bit): (super::regs::RegAccess, u32) = match qe {
            QeType::DontCare => {
                self.state.qe_set = true;
                return Ok(());
            }
            QeType::Sr2Bit1WrSr1 => (super::regs::SRCR_ACC, 1 << 9),
            QeType::Sr1Bit6 => (super::regs::SR_ACC, 1 << 6),
            QeType::Sr2Bit7 => (super::regs::CR_ACC, 1 << 7),
            QeType::Sr2Bit1 => (super::regs::CR_ACC, 1 << 1),
        };

        let val = self.read_reg_acc(&acc)?;
        if val & bit == 0 {
            self.write_reg_acc(&acc, val | bit, false)?;

            let check = self.read_reg_acc(&acc)?;
            if check & bit == 0 {
                log::error!("Quad-Enable bit did not stick");
                return Err(Error::Fail);
            }
        }

        self.state.qe_set = true;
        Ok(())
    }

    fn leave_qpi(&mut self, dis: QpiDisType) -> Result<()> {
        match dis {
            QpiDisType::None => return Ok(()),
            QpiDisType::OpFfh => self.issue_opcode(opcodes::RSTQPI_FF)?,
            QpiDisType::OpF5h => self.issue_opcode(opcodes::RSTQPI_F5)?,
            QpiDisType::Op66h99h => {
                self.issue_opcode(opcodes::RSTEN)?;
                self.issue_opcode(opcodes::RST)?;
                self.bus.udelay(RESET_WAIT_MS * 1000);
            }
        }
        self.state.cmd_buswidth_curr = 1;
        Ok(())
    }

    /// Enter or leave QPI per the part's declared sequences
    pub(crate) fn qpi_control(&mut self, enable: bool) -> Result<()> {
        let part = self.require_part()?;

        if enable {
            match part.qpi_en {
                QpiEnType::None => return Err(Error::Unsupported),
                QpiEnType::Op38h => self.issue_opcode(opcodes::EQPI_38)?,
                QpiEnType::QeOp38h => {
                    self.quad_enable()?;
                    self.issue_opcode(opcodes::EQPI_38)?;
                }
                QpiEnType::Op35h => self.issue_opcode(opcodes::EQPI_35)?,
            }
            self.state.cmd_buswidth_curr = 4;
            Ok(())
        } else {
            let dis = part.qpi_dis;
            self.leave_qpi(dis)
        }
    }

    /// Enter or leave 4-byte addressing per the part's declared method
    pub(crate) fn a4b_control(&mut self, enable: bool) -> Result<()> {
        let part = self.require_part().map(|p| p.clone());

        if enable {
            let en = part.as_ref().map(|p| p.a4b_en).unwrap_or(A4bEnType::OpB7h);
            match en {
                A4bEnType::OpB7h => self.issue_opcode(opcodes::EN4B)?,
                A4bEnType::WrenB7h => {
                    self.write_enable()?;
                    self.issue_opcode(opcodes::EN4B)?;
                }
                A4bEnType::Always => {}
                _ => return Err(Error::Unsupported),
            }
            self.state.naddr = 4;
            self.state.a4b_mode = true;
        } else {
            let dis = part
                .as_ref()
                .map(|p| p.a4b_dis)
                .unwrap_or(A4bDisType::OpE9h);
            match dis {
                A4bDisType::OpE9h => self.issue_opcode(opcodes::EX4B)?,
                A4bDisType::WrenE9h => {
                    self.write_enable()?;
                    self.issue_opcode(opcodes::EX4B)?;
                }
                A4bDisType::Ear => {
                    self.write_reg_acc(&EAR_ACC, 0, false)?;
                }
                A4bDisType::Bank => {
                    self.write_reg_acc(&BANK_ACC, 0, false)?;
                }
                A4bDisType::SoftReset => {
                    self.soft_reset()?;
                }
                A4bDisType::None => {}
            }
            self.state.naddr = 3;
            self.state.a4b_mode = false;
            self.state.curr_high_addr = 0;
        }
        Ok(())
    }

    /// Soft-reset the chip using the best declared sequence
    pub fn soft_reset(&mut self) -> Result<()> {
        let flags = self
            .part
            .as_ref()
            .map(|p| p.soft_reset)
            .unwrap_or(SoftResetFlags::OP_66H_99H);

        if flags.contains(SoftResetFlags::OP_66H_99H) || flags.is_empty() {
            self.issue_opcode(opcodes::RSTEN)?;
            self.issue_opcode(opcodes::RST)?;
        } else if flags.contains(SoftResetFlags::OP_F0H) {
            self.issue_opcode(opcodes::RST_F0)?;
        } else if flags.contains(SoftResetFlags::DRIVE_4IO_FH_8CLKS) {
            self.bus.drive_4io_ones(8)?;
            if self.state.a4b_mode && flags.contains(SoftResetFlags::DRIVE_4IO_FH_10CLKS_4B) {
                self.bus.drive_4io_ones(10)?;
            }
        } else {
            return Err(Error::Unsupported);
        }

        self.bus.udelay(RESET_WAIT_MS * 1000);
        self.state.cmd_buswidth_curr = 1;
        self.state.a4b_mode = false;
        self.state.naddr = 3;
        Ok(())
    }

    /// Select a die in a multi-die package
    pub fn select_die(&mut self, index: u32) -> Result<()> {
        let part = self.require_part()?;
        if index >= part.ndies {
            return Err(Error::InvalidParameter("die index"));
        }
        if part.ndies == 1 || self.state.curr_die == index {
            self.state.curr_die = index;
            return Ok(());
        }

        let bw = self.state.cmd_buswidth_curr;
        let data = [index as u8];
        let mut op = SpiMemOp::cmd_data_out(opcodes::SELECT_DIE, bw, &data);
        self.bus.mem_exec_op(&mut op)?;
        drop(op);

        self.state.curr_die = index;
        // High-address banking is per die
        self.state.curr_high_addr = 0;
        Ok(())
    }

    /// Map a chip address to (die, op address, high byte for EAR/Bank)
    fn split_addr(&self, part: &NorPart, addr: u64) -> (u32, u64, Option<u8>) {
        let die_size = part.size / part.ndies as u64;
        let die = (addr / die_size) as u32;
        let in_die = addr % die_size;

        match part.a4b_en {
            A4bEnType::Ear | A4bEnType::Bank if self.state.naddr == 3 => {
                (die, in_die & 0xFF_FFFF, Some((in_die >> 24) as u8))
            }
            _ => (die, in_die, None),
        }
    }

    fn update_high_addr(&mut self, part: &NorPart, high: u8) -> Result<()> {
        if self.state.curr_high_addr == high as u32 {
            return Ok(());
        }
        let acc = match part.a4b_en {
            A4bEnType::Ear => EAR_ACC,
            A4bEnType::Bank => BANK_ACC,
            _ => return Ok(()),
        };
        self.write_reg_acc(&acc, high as u32, false)?;
        self.state.curr_high_addr = high as u32;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Data path
    // ------------------------------------------------------------------

    /// Read `buf.len()` bytes starting at `addr`, splitting at die and
    /// banking boundaries and honoring the controller's read granularity.
    pub fn read(&mut self, addr: u64, buf: &mut [u8]) -> Result<()> {
        let part = self.require_part()?.clone();

        if addr + buf.len() as u64 > part.size {
            return Err(Error::AddressOutOfRange);
        }

        let die_size = part.size / part.ndies as u64;
        let mut addr = addr;
        let mut done = 0usize;

        while done < buf.len() {
            let (die, op_addr, high) = self.split_addr(&part, addr);
            self.select_die(die)?;
            if let Some(high) = high {
                self.update_high_addr(&part, high)?;
            }

            // Stay inside the die and, when banking, inside the 16 MiB window
            let die_left = die_size - (addr % die_size);
            let window_left = if high.is_some() {
                (1u64 << 24) - (op_addr & 0xFF_FFFF)
            } else {
                u64::MAX
            };
            let chunk = (buf.len() - done)
                .min(die_left as usize)
                .min(window_left.min(usize::MAX as u64) as usize)
                .min(self.bus.max_read_granularity());

            let chunk = {
                let op = SpiMemOp::read(
                    self.state.read_io,
                    self.state.read_opcode,
                    self.state.naddr,
                    op_addr,
                    self.state.read_ndummy,
                    &mut buf[done..done + chunk],
                );
                chunk.min(self.bus.mem_adjust_op_size(&op)?)
            };

            let mut op = SpiMemOp::read(
                self.state.read_io,
                self.state.read_opcode,
                self.state.naddr,
                op_addr,
                self.state.read_ndummy,
                &mut buf[done..done + chunk],
            );
            self.bus.mem_exec_op(&mut op)?;
            drop(op);

            addr += chunk as u64;
            done += chunk;
        }

        Ok(())
    }

    /// Program up to one page at `addr`; returns the byte count written
    pub fn write_page(&mut self, addr: u64, data: &[u8]) -> Result<usize> {
        let part = self.require_part()?.clone();

        if addr + data.len() as u64 > part.size {
            return Err(Error::AddressOutOfRange);
        }

        let page_left = part.page_size as u64 - (addr % part.page_size as u64);
        let mut len = data.len().min(page_left as usize);

        let (die, op_addr, high) = self.split_addr(&part, addr);
        self.select_die(die)?;
        if let Some(high) = high {
            self.update_high_addr(&part, high)?;
        }

        len = {
            let op = SpiMemOp::write(
                self.state.pp_io,
                self.state.pp_opcode,
                self.state.naddr,
                op_addr,
                &data[..len],
            );
            len.min(self.bus.mem_adjust_op_size(&op)?)
        };

        self.write_enable()?;

        let mut op = SpiMemOp::write(
            self.state.pp_io,
            self.state.pp_opcode,
            self.state.naddr,
            op_addr,
            &data[..len],
        );
        self.bus.mem_exec_op(&mut op)?;
        drop(op);

        self.wait_busy(part.max_pp_time_ms)?;

        Ok(len)
    }

    /// Program an arbitrary range (page-chunked). The range must be erased.
    pub fn write(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        let mut addr = addr;
        let mut done = 0usize;

        while done < data.len() {
            let n = self.write_page(addr, &data[done..])?;
            if n == 0 {
                return Err(Error::ProgramFailed);
            }
            addr += n as u64;
            done += n;
        }

        Ok(())
    }

    /// The erase region covering `addr`
    pub fn erase_region_at(&self, addr: u64) -> Option<&EraseRegion> {
        erase::region_at(&self.erase_regions, addr)
    }

    /// Snap `[addr, addr+len)` outward to region-permitted boundaries
    pub fn erase_range(&self, addr: u64, len: u64) -> Result<(u64, u64)> {
        erase::erase_range(&self.erase_regions, addr, len)
    }

    /// Erase the largest region-permitted block at `addr` not exceeding
    /// `maxlen`; returns the erased size.
    pub fn erase_at(&mut self, addr: u64, maxlen: u64) -> Result<u32> {
        let part = self.require_part()?.clone();

        if addr >= part.size {
            return Err(Error::AddressOutOfRange);
        }

        let region = *erase::region_at(&self.erase_regions, addr).ok_or(Error::AddressOutOfRange)?;

        // Opcodes come from the 4-byte table when running on 4-byte opcodes
        let info = if self.state.naddr == 4 && !self.state.a4b_mode && !part.erase_4b.is_empty() {
            part.erase_4b
        } else {
            part.erase_3b
        };

        let entry = *erase::pick_erase_entry(&info, &region, addr, maxlen)
            .ok_or(Error::InvalidParameter("unaligned erase"))?;

        let (die, op_addr, high) = self.split_addr(&part, addr);
        self.select_die(die)?;
        if let Some(high) = high {
            self.update_high_addr(&part, high)?;
        }

        self.write_enable()?;

        let bw = self.state.cmd_buswidth_curr;
        let mut op = SpiMemOp::cmd_addr(entry.opcode, bw, self.state.naddr, op_addr);
        self.bus.mem_exec_op(&mut op)?;
        drop(op);

        self.wait_busy(entry.max_ms)?;

        Ok(entry.size)
    }

    /// Erase `[addr, addr+len)`. Both endpoints must sit on region-permitted
    /// boundaries.
    pub fn erase(&mut self, addr: u64, len: u64) -> Result<()> {
        let part = self.require_part()?;
        if addr + len > part.size {
            return Err(Error::AddressOutOfRange);
        }

        let (start, end) = self.erase_range(addr, len)?;
        if start != addr || end != addr + len {
            return Err(Error::InvalidParameter("erase range not on erase boundaries"));
        }

        let mut at = addr;
        while at < end {
            let n = self.erase_at(at, end - at)?;
            at += n as u64;
        }

        Ok(())
    }

    /// Read the unique ID (4Bh), for parts that declare one
    pub fn read_uid(&mut self) -> Result<Vec<u8>> {
        let part = self.require_part()?;
        if !part.flags.contains(NorFlags::UNIQUE_ID) {
            return Err(Error::Unsupported);
        }

        let bw = self.state.cmd_buswidth_curr;
        let mut uid = vec![0u8; 8];
        let mut op = SpiMemOp::cmd(opcodes::RDUID, bw);
        op.dummy.len = 4;
        op.dummy.buswidth = bw;
        op.data = MemDataPhase {
            buswidth: bw,
            dtr: false,
            buf: MemData::In(&mut uid),
        };
        self.bus.mem_exec_op(&mut op)?;
        drop(op);

        Ok(uid)
    }

    /// Summary for front-ends
    pub fn info(&self) -> Result<NorInfo> {
        let part = self.require_part()?;
        Ok(NorInfo {
            model: part.model.clone(),
            vendor: part.vendor.clone(),
            id: self.probed_id,
            size: part.size,
            ndies: part.ndies,
            page_size: part.page_size,
            read_io: self.state.read_io,
            pp_io: self.state.pp_io,
            cmd_buswidth: self.state.cmd_buswidth_curr,
            erasesizes: part.erase_3b.iter().map(|e| e.size).collect(),
            regions: self.erase_regions.clone(),
        })
    }
}

/// Merge SFDP-derived fields into a database entry: the database wins where
/// it speaks, SFDP fills the silence.
fn merge_sfdp_part(part: &mut NorPart, sfdp: &NorPart) {
    if part.size == 0 {
        part.size = sfdp.size;
    }
    if part.read_3b.caps() == IoCaps::IO_1_1_1 && sfdp.read_3b.caps() != IoCaps::IO_1_1_1 {
        part.read_3b = sfdp.read_3b;
    }
    if part.read_4b.caps().is_empty() {
        part.read_4b = sfdp.read_4b;
    }
    if part.pp_4b.caps().is_empty() {
        part.pp_4b = sfdp.pp_4b;
    }
    if part.erase_3b.is_empty() {
        part.erase_3b = sfdp.erase_3b;
    }
    if part.erase_4b.is_empty() {
        part.erase_4b = sfdp.erase_4b;
    }
    if part.qe_type == QeType::DontCare {
        part.qe_type = sfdp.qe_type;
    }
    if part.a4b_en == A4bEnType::None {
        part.a4b_en = sfdp.a4b_en;
        part.a4b_dis = sfdp.a4b_dis;
    }
    if part.qpi_en == QpiEnType::None {
        part.qpi_en = sfdp.qpi_en;
        part.qpi_dis = sfdp.qpi_dis;
    }
    if part.soft_reset.is_empty() {
        part.soft_reset = sfdp.soft_reset;
    }
    if part.max_pp_time_ms == DFL_PP_TIME_MS && sfdp.max_pp_time_ms != DFL_PP_TIME_MS {
        // SFDP-declared worst case, doubled defensively, still capped by the
        // library default
        part.max_pp_time_ms = (sfdp.max_pp_time_ms * 2).min(DFL_PP_TIME_MS);
    }
}
