//! OTP (security register) operations
//!
//! The common security-register window protocol: dedicated read (48h),
//! program (42h) and erase (44h) opcodes addressing per-region windows, with
//! lock bits in SR2 that are one-time-programmable on die.

use super::core::SpiNor;
use super::part::OtpInfo;
use super::regs::{CR_ACC, SRCR_ACC};
use crate::controller::SpiController;
use crate::error::{Error, Result};
use crate::spi::{opcodes, MemData, MemDataPhase, SpiMemOp};

/// First lock bit (LB1) position within SR2
const LB_SHIFT: u32 = 3;

impl<C: SpiController> SpiNor<C> {
    fn otp_info(&self) -> Result<OtpInfo> {
        let part = self.part().ok_or(Error::NotProbed)?;
        part.otp.ok_or(Error::Unsupported)
    }

    /// Security registers sit at (index << 12) in the OTP window
    fn otp_addr(info: &OtpInfo, index: u32, offset: u32) -> Result<u64> {
        if index < info.start_index || index >= info.start_index + info.count {
            return Err(Error::InvalidParameter("OTP region index"));
        }
        Ok(((index as u64) << 12) | offset as u64)
    }

    /// Read from one OTP region
    pub fn otp_read(&mut self, index: u32, offset: u32, buf: &mut [u8]) -> Result<()> {
        let info = self.otp_info()?;
        if offset + buf.len() as u32 > info.size {
            return Err(Error::AddressOutOfRange);
        }

        let addr = Self::otp_addr(&info, index, offset)?;
        let bw = self.state.cmd_buswidth_curr;

        let mut op = SpiMemOp::cmd_addr(opcodes::OTP_READ, bw, 3, addr);
        op.dummy.len = 1;
        op.dummy.buswidth = bw;
        op.data = MemDataPhase {
            buswidth: bw,
            dtr: false,
            buf: MemData::In(buf),
        };
        self.bus.mem_exec_op(&mut op)
    }

    /// Program one OTP region (1→0 bit semantics, like the main array)
    pub fn otp_write(&mut self, index: u32, offset: u32, data: &[u8]) -> Result<()> {
        let info = self.otp_info()?;
        if offset + data.len() as u32 > info.size {
            return Err(Error::AddressOutOfRange);
        }

        let addr = Self::otp_addr(&info, index, offset)?;
        let bw = self.state.cmd_buswidth_curr;
        let timeout = self
            .part()
            .map(|p| p.max_pp_time_ms)
            .unwrap_or(super::part::DFL_PP_TIME_MS);

        self.write_enable()?;

        let mut op = SpiMemOp::cmd_addr(opcodes::OTP_PROG, bw, 3, addr);
        op.data = MemDataPhase {
            buswidth: bw,
            dtr: false,
            buf: MemData::Out(data),
        };
        self.bus.mem_exec_op(&mut op)?;
        drop(op);

        self.wait_busy(timeout)
    }

    /// Erase one OTP region (refused once locked, by the chip)
    pub fn otp_erase(&mut self, index: u32) -> Result<()> {
        let info = self.otp_info()?;
        let addr = Self::otp_addr(&info, index, 0)?;
        let bw = self.state.cmd_buswidth_curr;

        self.write_enable()?;

        let mut op = SpiMemOp::cmd_addr(opcodes::OTP_ERASE, bw, 3, addr);
        self.bus.mem_exec_op(&mut op)?;
        drop(op);

        self.wait_busy(super::part::DFL_ERASE_TIME_MS)
    }

    fn lock_bit(info: &OtpInfo, index: u32) -> Result<u32> {
        if index < info.start_index || index >= info.start_index + info.count {
            return Err(Error::InvalidParameter("OTP region index"));
        }
        Ok(1 << (LB_SHIFT + (index - info.start_index)))
    }

    /// Permanently lock one OTP region. Irreversible on die.
    pub fn otp_lock(&mut self, index: u32) -> Result<()> {
        let info = self.otp_info()?;
        let bit = Self::lock_bit(&info, index)?;

        if self.state.reg.cr.is_some() {
            // LB bits live in SR2; joint write keeps SR1 intact
            self.update_reg_acc(&SRCR_ACC, 0, bit << 8, false)
        } else {
            self.update_reg_acc(&CR_ACC, 0, bit, false)
        }
    }

    /// Whether one OTP region is locked
    pub fn otp_locked(&mut self, index: u32) -> Result<bool> {
        let info = self.otp_info()?;
        let bit = Self::lock_bit(&info, index)?;

        let val = if self.state.reg.cr.is_some() {
            self.read_reg_acc(&SRCR_ACC)? >> 8
        } else {
            self.read_reg_acc(&CR_ACC)?
        };

        Ok(val & bit != 0)
    }
}
