//! SPI-MEM operation description
//!
//! A [`SpiMemOp`] describes one chip-select envelope as four phases:
//! command, address, dummy, data. Each phase carries its own bus width and
//! DTR flag so a single op can express any of the I/O types. How the phases
//! reach the wire is the bus's business (native controller support or
//! synthesis from generic transfers).

use super::IoType;

/// Data phase direction and buffer
pub enum MemData<'a> {
    /// No data phase
    None,
    /// Read into the buffer
    In(&'a mut [u8]),
    /// Write from the buffer
    Out(&'a [u8]),
}

impl MemData<'_> {
    /// Byte length of the data phase
    pub fn len(&self) -> usize {
        match self {
            MemData::None => 0,
            MemData::In(buf) => buf.len(),
            MemData::Out(buf) => buf.len(),
        }
    }

    /// Whether there is no data phase
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the data phase is outbound
    pub fn is_out(&self) -> bool {
        matches!(self, MemData::Out(_))
    }
}

/// Command phase: a 1- or 2-byte opcode
#[derive(Debug, Clone, Copy)]
pub struct MemCmd {
    /// Opcode value; when `len == 2` the high byte is shifted out first
    pub opcode: u16,
    /// Opcode length in bytes (1 or 2)
    pub len: u8,
    /// Bus width of the command phase
    pub buswidth: u8,
    /// Command phase clocked on both edges
    pub dtr: bool,
}

/// Address phase
#[derive(Debug, Clone, Copy)]
pub struct MemAddr {
    /// Number of address bytes (0 = no address phase)
    pub len: u8,
    /// Bus width of the address phase
    pub buswidth: u8,
    /// Address phase clocked on both edges
    pub dtr: bool,
    /// Address value, shifted out MSB first over `len` bytes
    pub val: u64,
}

/// Dummy phase
#[derive(Debug, Clone, Copy)]
pub struct MemDummy {
    /// Number of dummy bytes (not cycles)
    pub len: u8,
    /// Bus width of the dummy phase
    pub buswidth: u8,
    /// Dummy phase clocked on both edges (doubles the wire bytes)
    pub dtr: bool,
}

/// Data phase descriptor
pub struct MemDataPhase<'a> {
    /// Bus width of the data phase
    pub buswidth: u8,
    /// Data phase clocked on both edges
    pub dtr: bool,
    /// Direction and buffer
    pub buf: MemData<'a>,
}

/// One SPI-MEM operation (a single CS envelope)
pub struct SpiMemOp<'a> {
    /// Command phase
    pub cmd: MemCmd,
    /// Address phase
    pub addr: MemAddr,
    /// Dummy phase
    pub dummy: MemDummy,
    /// Data phase
    pub data: MemDataPhase<'a>,
}

impl<'a> SpiMemOp<'a> {
    /// Command-only op (e.g. WREN)
    pub fn cmd(opcode: u8, buswidth: u8) -> Self {
        Self {
            cmd: MemCmd {
                opcode: opcode as u16,
                len: 1,
                buswidth,
                dtr: false,
            },
            addr: MemAddr {
                len: 0,
                buswidth: 0,
                dtr: false,
                val: 0,
            },
            dummy: MemDummy {
                len: 0,
                buswidth: 0,
                dtr: false,
            },
            data: MemDataPhase {
                buswidth: 0,
                dtr: false,
                buf: MemData::None,
            },
        }
    }

    /// Command + inbound data, all phases at one width (e.g. RDID, RDSR)
    pub fn cmd_data_in(opcode: u8, buswidth: u8, buf: &'a mut [u8]) -> Self {
        let mut op = Self::cmd(opcode, buswidth);
        op.data = MemDataPhase {
            buswidth,
            dtr: false,
            buf: MemData::In(buf),
        };
        op
    }

    /// Command + outbound data, all phases at one width (e.g. WRSR)
    pub fn cmd_data_out(opcode: u8, buswidth: u8, buf: &'a [u8]) -> Self {
        let mut op = Self::cmd(opcode, buswidth);
        op.data = MemDataPhase {
            buswidth,
            dtr: false,
            buf: MemData::Out(buf),
        };
        op
    }

    /// Command + address, no data (e.g. erase)
    pub fn cmd_addr(opcode: u8, buswidth: u8, naddr: u8, addr: u64) -> Self {
        let mut op = Self::cmd(opcode, buswidth);
        op.addr = MemAddr {
            len: naddr,
            buswidth,
            dtr: false,
            val: addr,
        };
        op
    }

    /// A read shaped by an [`IoType`]: per-phase widths and DTR flags come
    /// from the type, dummy length in bytes from `ndummy`.
    pub fn read(
        io: IoType,
        opcode: u8,
        naddr: u8,
        addr: u64,
        ndummy: u8,
        buf: &'a mut [u8],
    ) -> Self {
        Self {
            cmd: MemCmd {
                opcode: opcode as u16,
                len: 1,
                buswidth: io.cmd_bw(),
                dtr: io.cmd_dtr(),
            },
            addr: MemAddr {
                len: naddr,
                buswidth: io.addr_bw(),
                dtr: io.addr_dtr(),
                val: addr,
            },
            dummy: MemDummy {
                len: ndummy,
                buswidth: io.addr_bw(),
                dtr: io.addr_dtr(),
            },
            data: MemDataPhase {
                buswidth: io.data_bw(),
                dtr: io.data_dtr(),
                buf: MemData::In(buf),
            },
        }
    }

    /// A program shaped by an [`IoType`]
    pub fn write(io: IoType, opcode: u8, naddr: u8, addr: u64, buf: &'a [u8]) -> Self {
        Self {
            cmd: MemCmd {
                opcode: opcode as u16,
                len: 1,
                buswidth: io.cmd_bw(),
                dtr: io.cmd_dtr(),
            },
            addr: MemAddr {
                len: naddr,
                buswidth: io.addr_bw(),
                dtr: io.addr_dtr(),
                val: addr,
            },
            dummy: MemDummy {
                len: 0,
                buswidth: 0,
                dtr: false,
            },
            data: MemDataPhase {
                buswidth: io.data_bw(),
                dtr: io.data_dtr(),
                buf: MemData::Out(buf),
            },
        }
    }

    /// Set the dummy phase, inheriting the address-phase width
    pub fn with_dummy(mut self, ndummy: u8) -> Self {
        self.dummy = MemDummy {
            len: ndummy,
            buswidth: if self.addr.len > 0 {
                self.addr.buswidth
            } else {
                self.cmd.buswidth
            },
            dtr: if self.addr.len > 0 {
                self.addr.dtr
            } else {
                self.cmd.dtr
            },
        };
        self
    }

    /// Highest bus width used by any non-empty phase
    pub fn max_buswidth(&self) -> u8 {
        let mut bw = self.cmd.buswidth;
        if self.addr.len > 0 {
            bw = bw.max(self.addr.buswidth);
        }
        if self.dummy.len > 0 {
            bw = bw.max(self.dummy.buswidth);
        }
        if !self.data.buf.is_empty() {
            bw = bw.max(self.data.buswidth);
        }
        bw
    }

    /// Whether any non-empty phase is double-rate
    pub fn has_dtr(&self) -> bool {
        self.cmd.dtr
            || (self.addr.len > 0 && self.addr.dtr)
            || (self.dummy.len > 0 && self.dummy.dtr)
            || (!self.data.buf.is_empty() && self.data.dtr)
    }
}
