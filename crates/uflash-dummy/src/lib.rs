//! uflash-dummy - In-memory flash emulation
//!
//! Emulated SPI-NOR and SPI-NAND chips sitting behind the generic-transfer
//! controller contract. The emulation parses the same wire bytes a real
//! bridge would clock out, so everything from SPI-MEM packing upward is
//! exercised for real. Useful for development without hardware and as the
//! test vehicle for the flash cores.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod nand;
mod nor;

pub use nand::{DummyNand, DummyNandConfig};
pub use nor::{build_sfdp_blob, DummyNor, DummyNorConfig};

use std::cell::RefCell;
use std::rc::Rc;
use uflash_core::controller::{ControllerCaps, SpiController, Xfer, XferBuf};
use uflash_core::error::{Error, Result};

/// One decoded chip-select envelope, for test assertions
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Concatenated outbound bytes before the first inbound segment
    pub out: Vec<u8>,
    /// Bus width of the command segment
    pub cmd_buswidth: u8,
    /// Total inbound byte count
    pub in_len: usize,
}

/// A chip model the dummy controller can drive
pub trait ChipModel {
    /// Execute one CS envelope: `out` holds every outbound byte in wire
    /// order (at `cmd_buswidth` for the first segment); `input` receives the
    /// chip's answer for the trailing inbound segment, if any.
    fn transaction(&mut self, out: &[u8], cmd_buswidth: u8, input: &mut [u8]);
}

/// Controller backend driving an emulated chip
pub struct DummyController<M: ChipModel> {
    chip: Rc<RefCell<M>>,
    caps: ControllerCaps,
    speed: u32,
    log: Rc<RefCell<Vec<Envelope>>>,
}

impl<M: ChipModel> DummyController<M> {
    /// Wrap a chip model with dual/quad capability
    pub fn new(chip: M) -> Self {
        Self {
            chip: Rc::new(RefCell::new(chip)),
            caps: ControllerCaps::DUAL | ControllerCaps::QUAD,
            speed: 12_000_000,
            log: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Restrict or extend the advertised capabilities
    pub fn with_caps(mut self, caps: ControllerCaps) -> Self {
        self.caps = caps;
        self
    }

    /// Shared handle to the chip, for injecting faults mid-test
    pub fn chip(&self) -> Rc<RefCell<M>> {
        self.chip.clone()
    }

    /// Shared handle to the envelope log
    pub fn envelope_log(&self) -> Rc<RefCell<Vec<Envelope>>> {
        self.log.clone()
    }
}

impl<M: ChipModel> SpiController for DummyController<M> {
    fn name(&self) -> &'static str {
        "dummy"
    }

    fn caps(&self) -> ControllerCaps {
        self.caps
    }

    fn max_read_granularity(&self) -> usize {
        4096
    }

    fn generic_xfer_max_size(&self) -> usize {
        4096
    }

    fn generic_xfer(&mut self, xfers: &mut [Xfer<'_>]) -> Result<()> {
        if xfers.is_empty() {
            return Err(Error::InvalidParameter("empty transfer list"));
        }

        let mut out = Vec::new();
        let cmd_buswidth = xfers[0].buswidth;
        let mut chip = self.chip.borrow_mut();
        let mut in_len = 0usize;

        // All outbound segments concatenate ahead of the inbound one; the
        // chip answers during the inbound segment.
        let mut input: Option<&mut [u8]> = None;
        for x in xfers.iter_mut() {
            match &mut x.buf {
                XferBuf::Out(b) => {
                    if input.is_some() {
                        return Err(Error::Unsupported);
                    }
                    out.extend_from_slice(b);
                }
                XferBuf::In(b) => {
                    in_len += b.len();
                    input = Some(b);
                }
            }
        }

        match input {
            Some(buf) => chip.transaction(&out, cmd_buswidth, buf),
            None => chip.transaction(&out, cmd_buswidth, &mut []),
        }

        self.log.borrow_mut().push(Envelope {
            out,
            cmd_buswidth,
            in_len,
        });

        Ok(())
    }

    fn set_speed(&mut self, hz: u32) -> Result<u32> {
        self.speed = hz.clamp(1_000_000, 60_000_000);
        Ok(self.speed)
    }

    fn get_speed(&self) -> u32 {
        self.speed
    }

    fn get_speed_range(&self) -> Option<(u32, u32)> {
        Some((1_000_000, 60_000_000))
    }

    fn set_cs_pol(&mut self, _positive: bool) -> Result<()> {
        Ok(())
    }

    fn set_mode(&mut self, _mode: u8) -> Result<()> {
        Ok(())
    }

    fn set_wp(&mut self, _high: bool) -> Result<()> {
        Ok(())
    }

    fn set_hold(&mut self, _high: bool) -> Result<()> {
        Ok(())
    }

    fn udelay(&mut self, _us: u32) {}
}
