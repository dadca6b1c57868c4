//! SPI bus abstraction
//!
//! Wraps an attached [`SpiController`] and exposes a uniform SPI / SPI-MEM
//! surface. When the backend has no native SPI-MEM execution, the bus
//! synthesizes it from generic transfers by packing the command, address and
//! dummy phases into outbound segments: a new segment begins whenever the
//! (bus width, DTR) pair changes between phases or the scratch buffer would
//! overflow. Outbound data merges into the preceding write segment when it
//! fits; inbound data is always its own segment.

use crate::controller::{ControllerCaps, SpiController, Xfer, XferBuf, SPI_IF_MAJOR};
use crate::error::{Error, Result};
use crate::spi::{MemData, SpiMemOp};
use std::time::{Duration, Instant};

/// Size of the bus-owned transfer scratch buffer
pub const XFER_BUFFER_LEN: usize = 64 * 1024;

/// A planned transfer segment (extents only; bytes are materialized later)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegKind {
    /// Outbound bytes staged in the scratch buffer
    Scratch { len: usize },
    /// Outbound data straight from the caller's buffer
    DataOut { len: usize },
    /// Inbound data into the caller's buffer
    DataIn { len: usize },
}

#[derive(Debug, Clone, Copy)]
struct Seg {
    buswidth: u8,
    dtr: bool,
    kind: SegKind,
}

struct XferPlan {
    segs: Vec<Seg>,
    /// Bytes staged in scratch (header phases + merged outbound data)
    buflen: usize,
    /// Usable data-phase length after clamping
    datalen: usize,
}

/// SPI bus over an attached controller (C2)
pub struct SpiBus<C: SpiController> {
    ctrl: C,
    caps: ControllerCaps,
    max_read_granularity: usize,
    generic_xfer_max_size: usize,
    scratch: Vec<u8>,
    speed_min: u32,
    speed_max: u32,
}

impl<C: SpiController> SpiBus<C> {
    /// Attach a controller, validating its interface version and transfer
    /// capability set.
    pub fn attach(ctrl: C) -> Result<Self> {
        let (major, minor) = ctrl.api_version();
        if major != SPI_IF_MAJOR {
            log::error!(
                "SPI interface version {}.{} not supported, {} required",
                major,
                minor,
                SPI_IF_MAJOR
            );
            return Err(Error::Unsupported);
        }

        if !ctrl.has_native_mem_ops() && !ctrl.has_generic_xfer() {
            log::error!("controller supports no type of SPI transfer");
            return Err(Error::MissingSymbol("generic_xfer or mem_exec_op"));
        }

        let caps = ctrl.caps();
        let max_read_granularity = ctrl.max_read_granularity();
        let generic_xfer_max_size = ctrl.generic_xfer_max_size();

        let (speed_min, speed_max) = if let Some((lo, hi)) = ctrl.get_speed_range() {
            (lo, hi)
        } else if let Some(list) = ctrl.get_speed_list() {
            if list.is_empty() {
                return Err(Error::Io("empty speed list".into()));
            }
            (*list.last().unwrap(), list[0])
        } else {
            (0, 0)
        };

        Ok(Self {
            ctrl,
            caps,
            max_read_granularity,
            generic_xfer_max_size,
            scratch: vec![0u8; XFER_BUFFER_LEN],
            speed_min,
            speed_max,
        })
    }

    /// Detach and recover the controller
    pub fn into_controller(self) -> C {
        self.ctrl
    }

    /// Direct access to the controller for backend-specific setup
    pub fn controller_mut(&mut self) -> &mut C {
        &mut self.ctrl
    }

    /// Generic-transfer capability flags cached at attach
    pub fn caps(&self) -> ControllerCaps {
        self.caps
    }

    /// Largest single read the controller can clock per data segment
    pub fn max_read_granularity(&self) -> usize {
        self.max_read_granularity
    }

    /// Chip-select polarity
    pub fn set_cs_pol(&mut self, positive: bool) -> Result<()> {
        self.ctrl.set_cs_pol(positive)
    }

    /// SPI mode 0..=3
    pub fn set_mode(&mut self, mode: u8) -> Result<()> {
        if mode > 3 {
            return Err(Error::InvalidParameter("SPI mode"));
        }
        self.ctrl.set_mode(mode)
    }

    /// Set clock, returning the actual frequency
    pub fn set_speed(&mut self, hz: u32) -> Result<u32> {
        self.ctrl.set_speed(hz)
    }

    /// Current clock in Hz
    pub fn get_speed(&self) -> u32 {
        self.ctrl.get_speed()
    }

    /// Continuous speed range, when known
    pub fn get_speed_range(&self) -> Option<(u32, u32)> {
        self.ctrl.get_speed_range()
    }

    /// Discrete speed list, when known
    pub fn get_speed_list(&self) -> Option<Vec<u32>> {
        self.ctrl.get_speed_list()
    }

    /// Clamp to the controller's speed envelope, then set
    pub fn set_speed_closest(&mut self, hz: u32) -> Result<u32> {
        if self.speed_max == 0 {
            return Err(Error::Unsupported);
        }
        let hz = hz.clamp(self.speed_min, self.speed_max);
        self.ctrl.set_speed(hz)
    }

    /// Drive the WP pin
    pub fn set_wp(&mut self, high: bool) -> Result<()> {
        self.ctrl.set_wp(high)
    }

    /// Drive the HOLD pin
    pub fn set_hold(&mut self, high: bool) -> Result<()> {
        self.ctrl.set_hold(high)
    }

    /// Busy indicator
    pub fn set_busy_ind(&mut self, active: bool) -> Result<()> {
        self.ctrl.set_busy_ind(active)
    }

    /// Target power control
    pub fn power_control(&mut self, on: bool) -> Result<()> {
        self.ctrl.power_control(on)
    }

    /// Soft-reset rescue clocking
    pub fn drive_4io_ones(&mut self, clocks: u32) -> Result<()> {
        self.ctrl.drive_4io_ones(clocks)
    }

    /// Raw generic transfer passthrough
    pub fn generic_xfer(&mut self, xfers: &mut [Xfer<'_>]) -> Result<()> {
        self.ctrl.generic_xfer(xfers)
    }

    /// Busy-wait helper
    pub fn udelay(&mut self, us: u32) {
        self.ctrl.udelay(us);
    }

    /// Plan the segment list for an op without touching any buffer.
    ///
    /// `data_len` is the requested data-phase length; the plan clamps it.
    fn plan_mem_op(&self, op: &SpiMemOp<'_>, merge_tx_data: bool) -> Result<XferPlan> {
        let mut segs: Vec<Seg> = Vec::with_capacity(4);
        let mut buflen = 0usize;
        let mut datalen = 0usize;
        let max_seg = self.generic_xfer_max_size;
        let max_buf = self.scratch.len();

        let mut push_header = |segs: &mut Vec<Seg>, bw: u8, dtr: bool, nbytes: usize| {
            match segs.last_mut() {
                Some(Seg {
                    buswidth,
                    dtr: sdtr,
                    kind: SegKind::Scratch { len },
                }) if *buswidth == bw && *sdtr == dtr => *len += nbytes,
                _ => segs.push(Seg {
                    buswidth: bw,
                    dtr,
                    kind: SegKind::Scratch { len: nbytes },
                }),
            }
            buflen += nbytes;
        };

        if op.cmd.len > 0 {
            push_header(&mut segs, op.cmd.buswidth, op.cmd.dtr, op.cmd.len as usize);
        }

        if op.addr.len > 0 {
            push_header(&mut segs, op.addr.buswidth, op.addr.dtr, op.addr.len as usize);
        }

        if op.dummy.len > 0 {
            // DTR clocks a byte per edge, so the wire carries twice the bytes
            let wire = op.dummy.len as usize * if op.dummy.dtr { 2 } else { 1 };
            push_header(&mut segs, op.dummy.buswidth, op.dummy.dtr, wire);
        }

        if buflen > max_seg || buflen > max_buf {
            return Err(Error::Unsupported);
        }

        let req = op.data.buf.len();
        if req > 0 {
            match &op.data.buf {
                MemData::In(_) => {
                    datalen = req.min(max_seg);
                    segs.push(Seg {
                        buswidth: op.data.buswidth,
                        dtr: op.data.dtr,
                        kind: SegKind::DataIn { len: datalen },
                    });
                }
                MemData::Out(_) => {
                    let mergeable = matches!(
                        segs.last(),
                        Some(Seg { buswidth, dtr, kind: SegKind::Scratch { .. } })
                            if *buswidth == op.data.buswidth && *dtr == op.data.dtr
                    ) && buflen < max_seg
                        && buflen < max_buf
                        // Not worth staging when little scratch headroom is left
                        && max_buf - buflen >= max_seg.min(max_buf) / 2;

                    if merge_tx_data && mergeable {
                        datalen = req.min(max_seg - buflen).min(max_buf - buflen);
                        if let Some(Seg {
                            kind: SegKind::Scratch { len },
                            ..
                        }) = segs.last_mut()
                        {
                            *len += datalen;
                        }
                        buflen += datalen;
                    } else {
                        datalen = req.min(max_seg);
                        segs.push(Seg {
                            buswidth: op.data.buswidth,
                            dtr: op.data.dtr,
                            kind: SegKind::DataOut { len: datalen },
                        });
                    }
                }
                MemData::None => {}
            }
        }

        Ok(XferPlan {
            segs,
            buflen,
            datalen,
        })
    }

    fn plan_mem_op_any(&self, op: &SpiMemOp<'_>) -> Result<XferPlan> {
        self.plan_mem_op(op, true)
            .or_else(|_| self.plan_mem_op(op, false))
    }

    /// Stage the outbound header (and merged data) bytes into scratch,
    /// matching the planned extents.
    fn fill_scratch(&mut self, op: &SpiMemOp<'_>, plan: &XferPlan) {
        let mut pos = 0usize;

        if op.cmd.len > 0 {
            if op.cmd.len > 1 {
                self.scratch[pos] = (op.cmd.opcode >> 8) as u8;
                pos += 1;
            }
            self.scratch[pos] = op.cmd.opcode as u8;
            pos += 1;
        }

        for i in 0..op.addr.len as usize {
            self.scratch[pos] = (op.addr.val >> (8 * (op.addr.len as usize - i - 1))) as u8;
            pos += 1;
        }

        if op.dummy.len > 0 {
            let wire = op.dummy.len as usize * if op.dummy.dtr { 2 } else { 1 };
            self.scratch[pos..pos + wire].fill(0xFF);
            pos += wire;
        }

        if plan.buflen > pos {
            // Merged outbound data
            if let MemData::Out(data) = &op.data.buf {
                let n = plan.buflen - pos;
                self.scratch[pos..pos + n].copy_from_slice(&data[..n]);
            }
        }
    }

    fn exec_synth(&mut self, op: &mut SpiMemOp<'_>) -> Result<()> {
        let plan = self.plan_mem_op_any(op)?;
        self.fill_scratch(op, &plan);

        let nsegs = plan.segs.len();

        // Hand out disjoint scratch slices in layout order, then borrow the
        // caller's data buffer for the data segment.
        let mut scratch_rest: &mut [u8] = &mut self.scratch[..plan.buflen];
        let mut xfers: Vec<Xfer<'_>> = Vec::with_capacity(nsegs);

        let mut data_out: Option<&[u8]> = None;
        let mut data_in: Option<&mut [u8]> = None;
        match &mut op.data.buf {
            MemData::Out(data) => data_out = Some(data),
            MemData::In(data) => data_in = Some(data),
            MemData::None => {}
        }

        for (i, seg) in plan.segs.iter().enumerate() {
            let buf = match seg.kind {
                SegKind::Scratch { len } => {
                    let (head, rest) = std::mem::take(&mut scratch_rest).split_at_mut(len);
                    scratch_rest = rest;
                    XferBuf::Out(head)
                }
                SegKind::DataOut { len } => match data_out.take() {
                    Some(data) => XferBuf::Out(&data[..len]),
                    None => return Err(Error::InvalidParameter("data direction")),
                },
                SegKind::DataIn { len } => match data_in.take() {
                    Some(data) => XferBuf::In(&mut data[..len]),
                    None => return Err(Error::InvalidParameter("data direction")),
                },
            };

            xfers.push(Xfer {
                buswidth: seg.buswidth,
                dtr: seg.dtr,
                end: i == nsegs - 1,
                speed: 0,
                buf,
            });
        }

        self.ctrl.generic_xfer(&mut xfers)
    }

    fn supports_synth(&self, op: &SpiMemOp<'_>) -> bool {
        if self.plan_mem_op_any(op).is_err() {
            return false;
        }

        if op.has_dtr() && !self.caps.contains(ControllerCaps::DTR) {
            return false;
        }

        match op.max_buswidth() {
            1 => true,
            2 => self.caps.contains(ControllerCaps::DUAL),
            4 => self.caps.contains(ControllerCaps::QUAD),
            8 => self.caps.contains(ControllerCaps::OCTAL),
            _ => false,
        }
    }

    /// Clamp the op's data length to what one execution can move.
    ///
    /// Returns the usable length; the caller re-issues with trimmed buffers.
    pub fn mem_adjust_op_size(&self, op: &SpiMemOp<'_>) -> Result<usize> {
        if self.ctrl.has_native_mem_ops() {
            return self.ctrl.mem_adjust_op_size(op);
        }
        Ok(self.plan_mem_op_any(op)?.datalen)
    }

    /// Whether the controller can execute this op at all
    pub fn mem_supports_op(&self, op: &SpiMemOp<'_>) -> bool {
        if self.ctrl.has_native_mem_ops() {
            return self.ctrl.mem_supports_op(op);
        }
        self.supports_synth(op)
    }

    /// Execute one SPI-MEM op
    pub fn mem_exec_op(&mut self, op: &mut SpiMemOp<'_>) -> Result<()> {
        if self.ctrl.has_native_mem_ops() {
            return self.ctrl.mem_exec_op(op);
        }
        self.exec_synth(op)
    }

    /// Poll a 1- or 2-byte big-endian status until `(value & mask) == match`
    /// or the timeout elapses.
    pub fn mem_poll_status(
        &mut self,
        op: &mut SpiMemOp<'_>,
        mask: u16,
        match_val: u16,
        initial_delay_us: u32,
        polling_rate_us: u32,
        timeout_ms: u32,
    ) -> Result<()> {
        if self.ctrl.has_native_mem_ops() {
            match self.ctrl.mem_poll_status(
                op,
                mask,
                match_val,
                initial_delay_us,
                polling_rate_us,
                timeout_ms,
            ) {
                Err(Error::Unsupported) => {}
                other => return other,
            }
        }

        let datalen = op.data.buf.len();
        if !(1..=2).contains(&datalen) || !matches!(op.data.buf, MemData::In(_)) {
            return Err(Error::Unsupported);
        }

        if !self.mem_supports_op(op) {
            return Err(Error::Unsupported);
        }

        if initial_delay_us > 0 {
            self.ctrl.udelay(initial_delay_us);
        }

        let deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);

        loop {
            self.mem_exec_op(op)?;

            let val = match &op.data.buf {
                MemData::In(buf) => {
                    if datalen == 2 {
                        ((buf[0] as u16) << 8) | buf[1] as u16
                    } else {
                        buf[0] as u16
                    }
                }
                _ => unreachable!(),
            };

            if (val & mask) == match_val {
                return Ok(());
            }

            if Instant::now() > deadline {
                return Err(Error::Timeout);
            }

            if polling_rate_us > 0 {
                self.ctrl.udelay(polling_rate_us);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spi::{MemData, MemDataPhase, SpiMemOp};
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Records every envelope's segments for inspection
    #[derive(Default)]
    struct Recorded {
        /// (buswidth, dtr, out bytes or None for in, end flag)
        segs: Vec<(u8, bool, Option<Vec<u8>>, bool)>,
    }

    struct RecordingCtrl {
        caps: ControllerCaps,
        max_seg: usize,
        log: Rc<RefCell<Vec<Recorded>>>,
        /// Bytes fed back to inbound segments
        read_byte: u8,
    }

    impl RecordingCtrl {
        fn new(caps: ControllerCaps) -> (Self, Rc<RefCell<Vec<Recorded>>>) {
            let log = Rc::new(RefCell::new(Vec::new()));
            (
                Self {
                    caps,
                    max_seg: 4096,
                    log: log.clone(),
                    read_byte: 0x00,
                },
                log,
            )
        }
    }

    impl SpiController for RecordingCtrl {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn caps(&self) -> ControllerCaps {
            self.caps
        }

        fn generic_xfer_max_size(&self) -> usize {
            self.max_seg
        }

        fn generic_xfer(&mut self, xfers: &mut [Xfer<'_>]) -> Result<()> {
            let mut rec = Recorded::default();
            for x in xfers.iter_mut() {
                let bytes = match &mut x.buf {
                    XferBuf::Out(b) => Some(b.to_vec()),
                    XferBuf::In(b) => {
                        b.fill(self.read_byte);
                        None
                    }
                };
                rec.segs.push((x.buswidth, x.dtr, bytes, x.end));
            }
            self.log.borrow_mut().push(rec);
            Ok(())
        }

        fn udelay(&mut self, _us: u32) {}
    }

    fn outbound_concat(rec: &Recorded) -> Vec<u8> {
        rec.segs
            .iter()
            .filter_map(|(_, _, b, _)| b.clone())
            .flatten()
            .collect()
    }

    #[test]
    fn synth_packs_bytes_in_order() {
        let (ctrl, log) = RecordingCtrl::new(ControllerCaps::QUAD);
        let mut bus = SpiBus::attach(ctrl).unwrap();

        let data = [0xAA, 0xBB, 0xCC];
        let mut op = SpiMemOp::cmd_addr(0x02, 1, 3, 0x012345);
        op.data = MemDataPhase {
            buswidth: 1,
            dtr: false,
            buf: MemData::Out(&data),
        };

        bus.mem_exec_op(&mut op).unwrap();

        let recs = log.borrow();
        let rec = &recs[0];
        // Same width throughout and small: one merged segment
        assert_eq!(rec.segs.len(), 1);
        assert!(rec.segs.last().unwrap().3, "last segment must end the envelope");
        assert_eq!(
            outbound_concat(rec),
            vec![0x02, 0x01, 0x23, 0x45, 0xAA, 0xBB, 0xCC]
        );
    }

    #[test]
    fn synth_splits_on_buswidth_change() {
        let (ctrl, log) = RecordingCtrl::new(ControllerCaps::QUAD);
        let mut bus = SpiBus::attach(ctrl).unwrap();

        // 1-4-4 read: cmd at 1 wire, addr+dummy at 4 wires, data in at 4
        let mut buf = [0u8; 8];
        let mut op = SpiMemOp::read(crate::spi::IoType::Io1_4_4, 0xEB, 3, 0x1000, 2, &mut buf);
        bus.mem_exec_op(&mut op).unwrap();

        let recs = log.borrow();
        let rec = &recs[0];
        assert_eq!(rec.segs.len(), 3);
        assert_eq!(rec.segs[0].0, 1);
        assert_eq!(rec.segs[0].2.as_deref(), Some(&[0xEB][..]));
        assert_eq!(rec.segs[1].0, 4);
        assert_eq!(
            rec.segs[1].2.as_deref(),
            Some(&[0x00, 0x10, 0x00, 0xFF, 0xFF][..])
        );
        assert_eq!(rec.segs[2].0, 4);
        assert!(rec.segs[2].2.is_none());
        assert!(rec.segs[2].3);
    }

    #[test]
    fn dtr_doubles_dummy_bytes() {
        let (ctrl, log) = RecordingCtrl::new(ControllerCaps::QUAD | ControllerCaps::DTR);
        let mut bus = SpiBus::attach(ctrl).unwrap();

        let mut buf = [0u8; 4];
        let mut op = SpiMemOp::read(crate::spi::IoType::Io1s4d4d, 0xED, 3, 0, 4, &mut buf);
        bus.mem_exec_op(&mut op).unwrap();

        let recs = log.borrow();
        let rec = &recs[0];
        // addr (3 bytes) + dummy (4 bytes doubled to 8) share the DTR segment
        assert_eq!(rec.segs[1].2.as_ref().unwrap().len(), 3 + 8);
    }

    #[test]
    fn two_byte_opcode_msb_first() {
        let (ctrl, log) = RecordingCtrl::new(ControllerCaps::empty());
        let mut bus = SpiBus::attach(ctrl).unwrap();

        let mut op = SpiMemOp::cmd(0, 1);
        op.cmd.opcode = 0x05FA;
        op.cmd.len = 2;
        bus.mem_exec_op(&mut op).unwrap();

        let recs = log.borrow();
        assert_eq!(outbound_concat(&recs[0]), vec![0x05, 0xFA]);
    }

    #[test]
    fn supports_op_respects_caps() {
        let (ctrl, _) = RecordingCtrl::new(ControllerCaps::DUAL);
        let bus = SpiBus::attach(ctrl).unwrap();

        let mut buf = [0u8; 4];
        let op = SpiMemOp::read(crate::spi::IoType::Io1_1_2, 0x3B, 3, 0, 1, &mut buf);
        assert!(bus.mem_supports_op(&op));

        let mut buf = [0u8; 4];
        let op = SpiMemOp::read(crate::spi::IoType::Io1_1_4, 0x6B, 3, 0, 1, &mut buf);
        assert!(!bus.mem_supports_op(&op), "quad not advertised");

        let mut buf = [0u8; 4];
        let op = SpiMemOp::read(crate::spi::IoType::Io1s2d2d, 0xBD, 3, 0, 1, &mut buf);
        assert!(!bus.mem_supports_op(&op), "DTR not advertised");
    }

    #[test]
    fn adjust_op_size_is_honored_by_supports() {
        let (ctrl, _) = RecordingCtrl::new(ControllerCaps::empty());
        let bus = SpiBus::attach(ctrl).unwrap();

        let mut big = vec![0u8; 1 << 20];
        let op = SpiMemOp::read(crate::spi::IoType::Io1_1_1, 0x03, 3, 0, 0, &mut big);
        let n = bus.mem_adjust_op_size(&op).unwrap();
        assert!(n <= 4096);

        let mut trimmed = vec![0u8; n];
        let op2 = SpiMemOp::read(crate::spi::IoType::Io1_1_1, 0x03, 3, 0, 0, &mut trimmed);
        assert!(bus.mem_supports_op(&op2));
    }

    #[test]
    fn poll_status_times_out_and_matches() {
        let (mut ctrl, _) = RecordingCtrl::new(ControllerCaps::empty());
        ctrl.read_byte = 0x01; // busy forever
        let mut bus = SpiBus::attach(ctrl).unwrap();

        let mut sr = [0u8; 1];
        let mut op = SpiMemOp::cmd_data_in(0x05, 1, &mut sr);
        let err = bus.mem_poll_status(&mut op, 0x01, 0x00, 0, 0, 10);
        assert_eq!(err, Err(Error::Timeout));

        let (mut ctrl, _) = RecordingCtrl::new(ControllerCaps::empty());
        ctrl.read_byte = 0x00; // immediately ready
        let mut bus = SpiBus::attach(ctrl).unwrap();
        let mut sr = [0u8; 1];
        let mut op = SpiMemOp::cmd_data_in(0x05, 1, &mut sr);
        bus.mem_poll_status(&mut op, 0x01, 0x00, 0, 0, 10).unwrap();
    }
}
