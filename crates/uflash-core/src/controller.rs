//! Controller contract
//!
//! The narrow interface a bridge backend must satisfy. A backend provides
//! either a generic transfer primitive ([`SpiController::generic_xfer`]), a
//! native SPI-MEM execution path, or both; everything else is optional and
//! defaults to [`Error::Unsupported`]. The bus binds a controller once at
//! attach and never looks methods up again on the hot path.

use crate::error::{Error, Result};
use crate::spi::SpiMemOp;
use bitflags::bitflags;
use std::time::Duration;

/// Controller interface major version the bus understands
pub const SPI_IF_MAJOR: u16 = 1;
/// Controller interface minor version
pub const SPI_IF_MINOR: u16 = 0;

bitflags! {
    /// Generic-transfer capabilities of a controller
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ControllerCaps: u32 {
        /// 2-wire transfers
        const DUAL = 1 << 0;
        /// 4-wire transfers
        const QUAD = 1 << 1;
        /// 8-wire transfers
        const OCTAL = 1 << 2;
        /// Double-transfer-rate segments
        const DTR = 1 << 3;
        /// Bulk reads are unreliable while the chip is in QPI
        const NO_QPI_BULK_READ = 1 << 4;
    }
}

/// Transfer segment buffer
pub enum XferBuf<'a> {
    /// Clock data in
    In(&'a mut [u8]),
    /// Clock data out
    Out(&'a [u8]),
}

impl XferBuf<'_> {
    /// Segment byte length
    pub fn len(&self) -> usize {
        match self {
            XferBuf::In(b) => b.len(),
            XferBuf::Out(b) => b.len(),
        }
    }

    /// Whether the segment carries no bytes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One segment of a generic transfer
///
/// All segments of one [`SpiController::generic_xfer`] call form a single CS
/// envelope in listed order; CS is released after the last segment whose
/// `end` flag is set.
pub struct Xfer<'a> {
    /// Bus width of this segment (1/2/4/8)
    pub buswidth: u8,
    /// Clock data on both edges
    pub dtr: bool,
    /// Release CS after this segment
    pub end: bool,
    /// Per-segment speed override in Hz (0 = controller default). Controllers
    /// that cannot latch a new speed without dropping CS must reject the
    /// transfer with `Unsupported`.
    pub speed: u32,
    /// Direction and bytes
    pub buf: XferBuf<'a>,
}

impl<'a> Xfer<'a> {
    /// An outbound segment at the given width
    pub fn out(buswidth: u8, dtr: bool, buf: &'a [u8]) -> Self {
        Self {
            buswidth,
            dtr,
            end: false,
            speed: 0,
            buf: XferBuf::Out(buf),
        }
    }

    /// An inbound segment at the given width
    pub fn input(buswidth: u8, dtr: bool, buf: &'a mut [u8]) -> Self {
        Self {
            buswidth,
            dtr,
            end: false,
            speed: 0,
            buf: XferBuf::In(buf),
        }
    }

    /// Mark this segment as the envelope terminator
    pub fn ending(mut self) -> Self {
        self.end = true;
        self
    }
}

/// The controller contract (C1)
///
/// Required: [`caps`](Self::caps) and at least one of
/// [`generic_xfer`](Self::generic_xfer) or the native SPI-MEM trio
/// (signalled by [`has_native_mem_ops`](Self::has_native_mem_ops)).
pub trait SpiController {
    /// Short name for logs and the registry
    fn name(&self) -> &'static str;

    /// Interface version as (major, minor); the bus rejects a major mismatch
    fn api_version(&self) -> (u16, u16) {
        (SPI_IF_MAJOR, SPI_IF_MINOR)
    }

    /// Generic-transfer capability flags
    fn caps(&self) -> ControllerCaps;

    /// Largest single read the controller can clock in one data segment
    fn max_read_granularity(&self) -> usize {
        usize::MAX
    }

    /// Largest byte count accepted by one generic transfer segment
    fn generic_xfer_max_size(&self) -> usize {
        usize::MAX
    }

    /// Whether [`generic_xfer`](Self::generic_xfer) is usable. Native-only
    /// controllers return false and the bus skips synthesis entirely.
    fn has_generic_xfer(&self) -> bool {
        true
    }

    /// Execute a list of segments inside one CS envelope
    fn generic_xfer(&mut self, xfers: &mut [Xfer<'_>]) -> Result<()>;

    /// Whether the native SPI-MEM path below is implemented
    fn has_native_mem_ops(&self) -> bool {
        false
    }

    /// Native SPI-MEM execution
    fn mem_exec_op(&mut self, _op: &mut SpiMemOp<'_>) -> Result<()> {
        Err(Error::Unsupported)
    }

    /// Native SPI-MEM support query
    fn mem_supports_op(&self, _op: &SpiMemOp<'_>) -> bool {
        false
    }

    /// Native SPI-MEM data-length clamp; returns the usable data length
    fn mem_adjust_op_size(&self, _op: &SpiMemOp<'_>) -> Result<usize> {
        Err(Error::Unsupported)
    }

    /// Hardware-assisted status polling, if the controller has it
    fn mem_poll_status(
        &mut self,
        _op: &mut SpiMemOp<'_>,
        _mask: u16,
        _match_val: u16,
        _initial_delay_us: u32,
        _polling_rate_us: u32,
        _timeout_ms: u32,
    ) -> Result<()> {
        Err(Error::Unsupported)
    }

    /// Reset the controller (not the chip)
    fn reset(&mut self) -> Result<()> {
        Err(Error::Unsupported)
    }

    /// Abort an in-flight transfer; must be callable concurrently
    fn cancel_transfer(&self) -> Result<()> {
        Err(Error::Unsupported)
    }

    /// Chip-select polarity
    fn set_cs_pol(&mut self, _positive: bool) -> Result<()> {
        Err(Error::Unsupported)
    }

    /// SPI mode 0..=3
    fn set_mode(&mut self, _mode: u8) -> Result<()> {
        Err(Error::Unsupported)
    }

    /// Set clock; returns the actual frequency
    fn set_speed(&mut self, _hz: u32) -> Result<u32> {
        Err(Error::Unsupported)
    }

    /// Current clock in Hz (0 when unknown)
    fn get_speed(&self) -> u32 {
        0
    }

    /// Continuous speed range, if the controller has one
    fn get_speed_range(&self) -> Option<(u32, u32)> {
        None
    }

    /// Discrete speed list (descending), if the controller has one
    fn get_speed_list(&self) -> Option<Vec<u32>> {
        None
    }

    /// Drive the WP pin
    fn set_wp(&mut self, _high: bool) -> Result<()> {
        Err(Error::Unsupported)
    }

    /// Drive the HOLD pin
    fn set_hold(&mut self, _high: bool) -> Result<()> {
        Err(Error::Unsupported)
    }

    /// Busy indicator (LED)
    fn set_busy_ind(&mut self, _active: bool) -> Result<()> {
        Err(Error::Unsupported)
    }

    /// Target power rail control. Default: powering on succeeds trivially,
    /// powering off is unsupported.
    fn power_control(&mut self, on: bool) -> Result<()> {
        if on {
            Ok(())
        } else {
            Err(Error::Unsupported)
        }
    }

    /// Drive all four I/O lines high for the given clock count (soft-reset
    /// rescue sequence)
    fn drive_4io_ones(&mut self, _clocks: u32) -> Result<()> {
        Err(Error::Unsupported)
    }

    /// Busy-wait helper; backends with hardware delay queues may override
    fn udelay(&mut self, us: u32) {
        std::thread::sleep(Duration::from_micros(us as u64));
    }
}

impl<T: SpiController + ?Sized> SpiController for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }
    fn api_version(&self) -> (u16, u16) {
        (**self).api_version()
    }
    fn caps(&self) -> ControllerCaps {
        (**self).caps()
    }
    fn max_read_granularity(&self) -> usize {
        (**self).max_read_granularity()
    }
    fn generic_xfer_max_size(&self) -> usize {
        (**self).generic_xfer_max_size()
    }
    fn has_generic_xfer(&self) -> bool {
        (**self).has_generic_xfer()
    }
    fn generic_xfer(&mut self, xfers: &mut [Xfer<'_>]) -> Result<()> {
        (**self).generic_xfer(xfers)
    }
    fn has_native_mem_ops(&self) -> bool {
        (**self).has_native_mem_ops()
    }
    fn mem_exec_op(&mut self, op: &mut SpiMemOp<'_>) -> Result<()> {
        (**self).mem_exec_op(op)
    }
    fn mem_supports_op(&self, op: &SpiMemOp<'_>) -> bool {
        (**self).mem_supports_op(op)
    }
    fn mem_adjust_op_size(&self, op: &SpiMemOp<'_>) -> Result<usize> {
        (**self).mem_adjust_op_size(op)
    }
    fn mem_poll_status(
        &mut self,
        op: &mut SpiMemOp<'_>,
        mask: u16,
        match_val: u16,
        initial_delay_us: u32,
        polling_rate_us: u32,
        timeout_ms: u32,
    ) -> Result<()> {
        (**self).mem_poll_status(op, mask, match_val, initial_delay_us, polling_rate_us, timeout_ms)
    }
    fn reset(&mut self) -> Result<()> {
        (**self).reset()
    }
    fn cancel_transfer(&self) -> Result<()> {
        (**self).cancel_transfer()
    }
    fn set_cs_pol(&mut self, positive: bool) -> Result<()> {
        (**self).set_cs_pol(positive)
    }
    fn set_mode(&mut self, mode: u8) -> Result<()> {
        (**self).set_mode(mode)
    }
    fn set_speed(&mut self, hz: u32) -> Result<u32> {
        (**self).set_speed(hz)
    }
    fn get_speed(&self) -> u32 {
        (**self).get_speed()
    }
    fn get_speed_range(&self) -> Option<(u32, u32)> {
        (**self).get_speed_range()
    }
    fn get_speed_list(&self) -> Option<Vec<u32>> {
        (**self).get_speed_list()
    }
    fn set_wp(&mut self, high: bool) -> Result<()> {
        (**self).set_wp(high)
    }
    fn set_hold(&mut self, high: bool) -> Result<()> {
        (**self).set_hold(high)
    }
    fn set_busy_ind(&mut self, active: bool) -> Result<()> {
        (**self).set_busy_ind(active)
    }
    fn power_control(&mut self, on: bool) -> Result<()> {
        (**self).power_control(on)
    }
    fn drive_4io_ones(&mut self, clocks: u32) -> Result<()> {
        (**self).drive_4io_ones(clocks)
    }
    fn udelay(&mut self, us: u32) {
        (**self).udelay(us)
    }
}
