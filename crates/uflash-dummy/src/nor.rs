//! Emulated SPI-NOR chip
//!
//! Behaves like a W25Q-class chip: JEDEC ID, SFDP, status registers with QE
//! and lock bits, 3/4-byte addressing with EAR banking, QPI entry/exit,
//! page programming with 1→0 semantics, sector/block/chip erase, security
//! registers and a unique ID.

use crate::ChipModel;

/// Configuration of the emulated NOR chip
#[derive(Debug, Clone)]
pub struct DummyNorConfig {
    /// JEDEC ID bytes
    pub id: Vec<u8>,
    /// Array size in bytes (across all dies)
    pub size: usize,
    /// Program page size
    pub page_size: usize,
    /// Dies behind the CS
    pub ndies: u32,
    /// SFDP blob served on 5Ah (None = no SFDP)
    pub sfdp: Option<Vec<u8>>,
    /// Opcode entering QPI (None = chip has no QPI)
    pub qpi_en_op: Option<u8>,
    /// Opcode leaving QPI
    pub qpi_dis_op: Option<u8>,
}

impl Default for DummyNorConfig {
    fn default() -> Self {
        // 16 MiB Winbond-style part
        Self {
            id: vec![0xEF, 0x40, 0x18],
            size: 16 << 20,
            page_size: 256,
            ndies: 1,
            sfdp: Some(build_sfdp_blob(16 << 20, false)),
            qpi_en_op: Some(0x38),
            qpi_dis_op: Some(0xFF),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wel {
    None,
    Wren,
    Volatile,
}

/// The emulated chip
pub struct DummyNor {
    cfg: DummyNorConfig,
    data: Vec<u8>,
    sr1: u8,
    sr2: u8,
    sr3: u8,
    ear: u8,
    wel: Wel,
    qpi: bool,
    a4b: bool,
    reset_latch: bool,
    curr_die: u32,
    otp: [[u8; 256]; 3],
    uid: [u8; 8],
}

const SR2_QE: u8 = 1 << 1;

impl DummyNor {
    /// Build with a configuration
    pub fn new(cfg: DummyNorConfig) -> Self {
        let size = cfg.size;
        Self {
            cfg,
            data: vec![0xFF; size],
            sr1: 0,
            sr2: 0,
            sr3: 0,
            ear: 0,
            wel: Wel::None,
            qpi: false,
            a4b: false,
            reset_latch: false,
            curr_die: 0,
            otp: [[0xFF; 256]; 3],
            uid: [0xD5, 0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD],
        }
    }

    /// Default 16 MiB part
    pub fn new_default() -> Self {
        Self::new(DummyNorConfig::default())
    }

    /// Array contents
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Array contents, writable (test preparation)
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Whether the chip currently runs in QPI
    pub fn in_qpi(&self) -> bool {
        self.qpi
    }

    /// Whether the chip currently runs with 4-byte addresses
    pub fn in_4byte_mode(&self) -> bool {
        self.a4b
    }

    /// Status register 1
    pub fn sr1(&self) -> u8 {
        self.sr1
    }

    /// Status register 2
    pub fn sr2(&self) -> u8 {
        self.sr2
    }

    fn die_size(&self) -> usize {
        self.data.len() / self.cfg.ndies as usize
    }

    fn naddr(&self) -> usize {
        if self.a4b {
            4
        } else {
            3
        }
    }

    fn take_addr(&self, out: &[u8], naddr: usize) -> usize {
        let mut addr = 0usize;
        for &b in out.iter().skip(1).take(naddr) {
            addr = addr << 8 | b as usize;
        }
        if naddr == 3 {
            addr |= (self.ear as usize) << 24;
        }
        addr + self.curr_die as usize * self.die_size()
    }

    fn take_wel(&mut self) -> bool {
        let ok = self.wel != Wel::None;
        self.wel = Wel::None;
        ok
    }

    fn read_array(&self, addr: usize, input: &mut [u8]) {
        for (i, b) in input.iter_mut().enumerate() {
            *b = self.data.get(addr + i).copied().unwrap_or(0xFF);
        }
    }

    fn program(&mut self, addr: usize, data: &[u8]) {
        let page = self.cfg.page_size;
        let page_base = addr / page * page;
        for (i, &b) in data.iter().enumerate() {
            // Address wraps within the page, NOR-style
            let a = page_base + (addr - page_base + i) % page;
            if let Some(cell) = self.data.get_mut(a) {
                *cell &= b;
            }
        }
    }

    fn erase(&mut self, addr: usize, size: usize) {
        let base = addr / size * size;
        let len = self.data.len();
        for cell in self.data[base.min(len)..(base + size).min(len)].iter_mut() {
            *cell = 0xFF;
        }
    }

    fn otp_locked(&self, idx: usize) -> bool {
        idx >= 1 && self.sr2 & (1 << (2 + idx)) != 0
    }
}

impl ChipModel for DummyNor {
    fn transaction(&mut self, out: &[u8], cmd_buswidth: u8, input: &mut [u8]) {
        input.fill(0xFF);

        if out.is_empty() {
            return;
        }

        // A chip in QPI ignores 1-wire commands and vice versa
        let expect_bw = if self.qpi { 4 } else { 1 };
        if cmd_buswidth != expect_bw {
            return;
        }

        let opcode = out[0];
        if opcode != 0x99 {
            self.reset_latch = opcode == 0x66;
        }

        match opcode {
            0x9F | 0xAF => {
                for (i, b) in input.iter_mut().enumerate() {
                    *b = self.cfg.id.get(i).copied().unwrap_or(0x00);
                }
            }

            0x05 => input.fill(self.sr1),
            0x35 => input.fill(self.sr2),
            0x15 => input.fill(self.sr3),

            0x06 => self.wel = Wel::Wren,
            0x50 => self.wel = Wel::Volatile,
            0x04 => self.wel = Wel::None,

            0x01 => {
                if self.take_wel() {
                    if let Some(&v) = out.get(1) {
                        self.sr1 = v;
                    }
                    if let Some(&v) = out.get(2) {
                        self.sr2 = v;
                    }
                }
            }
            0x31 => {
                if self.take_wel() {
                    if let Some(&v) = out.get(1) {
                        self.sr2 = v;
                    }
                }
            }
            0x11 => {
                if self.take_wel() {
                    if let Some(&v) = out.get(1) {
                        self.sr3 = v;
                    }
                }
            }

            // Reads at the current addressing width
            0x03 | 0x0B | 0x3B | 0xBB => {
                let addr = self.take_addr(out, self.naddr());
                self.read_array(addr, input);
            }
            0x6B | 0xEB => {
                if self.sr2 & SR2_QE != 0 {
                    let addr = self.take_addr(out, self.naddr());
                    self.read_array(addr, input);
                }
            }

            // Dedicated 4-byte-address reads
            0x13 | 0x0C | 0x3C | 0xBC => {
                let addr = self.take_addr(out, 4);
                self.read_array(addr, input);
            }
            0x6C | 0xEC => {
                if self.sr2 & SR2_QE != 0 {
                    let addr = self.take_addr(out, 4);
                    self.read_array(addr, input);
                }
            }

            0x02 => {
                if self.take_wel() {
                    let naddr = self.naddr();
                    let addr = self.take_addr(out, naddr);
                    self.program(addr, &out[1 + naddr..]);
                }
            }
            0x32 => {
                if self.take_wel() && self.sr2 & SR2_QE != 0 {
                    let naddr = self.naddr();
                    let addr = self.take_addr(out, naddr);
                    self.program(addr, &out[1 + naddr..]);
                }
            }
            0x12 | 0x34 => {
                if self.take_wel() {
                    let addr = self.take_addr(out, 4);
                    self.program(addr, &out[5..]);
                }
            }

            0x20 | 0x52 | 0xD8 => {
                if self.take_wel() {
                    let size = match opcode {
                        0x20 => 4096,
                        0x52 => 32768,
                        _ => 65536,
                    };
                    let addr = self.take_addr(out, self.naddr());
                    self.erase(addr, size);
                }
            }
            0x21 | 0x5C | 0xDC => {
                if self.take_wel() {
                    let size = match opcode {
                        0x21 => 4096,
                        0x5C => 32768,
                        _ => 65536,
                    };
                    let addr = self.take_addr(out, 4);
                    self.erase(addr, size);
                }
            }
            0xC7 | 0x60 => {
                if self.take_wel() {
                    self.data.fill(0xFF);
                }
            }

            0xB7 => self.a4b = true,
            0xE9 => {
                self.a4b = false;
                self.ear = 0;
            }

            0xC8 => input.fill(self.ear),
            0xC5 => {
                if self.take_wel() {
                    if let Some(&v) = out.get(1) {
                        self.ear = v;
                    }
                }
            }

            0xC2 => {
                if let Some(&die) = out.get(1) {
                    if (die as u32) < self.cfg.ndies {
                        self.curr_die = die as u32;
                    }
                }
            }

            0x5A => {
                if let Some(sfdp) = &self.cfg.sfdp {
                    let mut addr = 0usize;
                    for &b in out.iter().skip(1).take(3) {
                        addr = addr << 8 | b as usize;
                    }
                    for (i, b) in input.iter_mut().enumerate() {
                        *b = sfdp.get(addr + i).copied().unwrap_or(0xFF);
                    }
                }
            }

            0x4B => {
                for (i, b) in input.iter_mut().enumerate() {
                    *b = self.uid.get(i).copied().unwrap_or(0x00);
                }
            }

            // Security registers: read 48h, program 42h, erase 44h
            0x48 => {
                let addr = {
                    let mut a = 0usize;
                    for &b in out.iter().skip(1).take(3) {
                        a = a << 8 | b as usize;
                    }
                    a
                };
                let idx = (addr >> 12).wrapping_sub(1);
                let ofs = addr & 0xFF;
                if let Some(reg) = self.otp.get(idx) {
                    for (i, b) in input.iter_mut().enumerate() {
                        *b = reg.get(ofs + i).copied().unwrap_or(0xFF);
                    }
                }
            }
            0x42 => {
                if self.take_wel() {
                    let mut addr = 0usize;
                    for &b in out.iter().skip(1).take(3) {
                        addr = addr << 8 | b as usize;
                    }
                    let idx = (addr >> 12).wrapping_sub(1);
                    let ofs = addr & 0xFF;
                    if idx < 3 && !self.otp_locked(idx + 1) {
                        for (i, &b) in out[4..].iter().enumerate() {
                            if let Some(cell) = self.otp[idx].get_mut(ofs + i) {
                                *cell &= b;
                            }
                        }
                    }
                }
            }
            0x44 => {
                if self.take_wel() {
                    let mut addr = 0usize;
                    for &b in out.iter().skip(1).take(3) {
                        addr = addr << 8 | b as usize;
                    }
                    let idx = (addr >> 12).wrapping_sub(1);
                    if idx < 3 && !self.otp_locked(idx + 1) {
                        self.otp[idx].fill(0xFF);
                    }
                }
            }

            // QPI entry/exit and soft reset (35h entry is shadowed by RDCR
            // here; the emulated part family enters with 38h)
            0x38 if Some(opcode) == self.cfg.qpi_en_op => {
                if self.sr2 & SR2_QE != 0 {
                    self.qpi = true;
                }
            }
            0xFF | 0xF5 if Some(opcode) == self.cfg.qpi_dis_op => {
                self.qpi = false;
            }
            0x66 => {}
            0x99 => {
                if self.reset_latch {
                    self.qpi = false;
                    self.a4b = false;
                    self.ear = 0;
                    self.wel = Wel::None;
                    self.reset_latch = false;
                }
            }
            0xF0 => {
                self.qpi = false;
                self.a4b = false;
            }

            _ => {}
        }
    }
}

/// Assemble an SFDP blob (header + 16-DWORD BFPT, plus a 4BAIT when
/// `with_4bait`) describing a uniform 4K/32K/64K-erase quad-capable part.
pub fn build_sfdp_blob(size: u64, with_4bait: bool) -> Vec<u8> {
    let bfpt_ofs = 0x30usize;
    let a4bait_ofs = bfpt_ofs + 16 * 4;
    let total = if with_4bait { a4bait_ofs + 2 * 4 } else { a4bait_ofs };

    let mut blob = vec![0xFFu8; total];

    blob[0..4].copy_from_slice(b"SFDP");
    blob[4] = 0x06;
    blob[5] = 0x01;
    blob[6] = if with_4bait { 1 } else { 0 };
    blob[7] = 0xFF;

    // BFPT header
    blob[8] = 0x00;
    blob[9] = 0x06;
    blob[10] = 0x01;
    blob[11] = 16;
    blob[12..15].copy_from_slice(&(bfpt_ofs as u32).to_le_bytes()[..3]);
    blob[15] = 0xFF;

    if with_4bait {
        blob[16] = 0x84;
        blob[17] = 0x00;
        blob[18] = 0x01;
        blob[19] = 2;
        blob[20..23].copy_from_slice(&(a4bait_ofs as u32).to_le_bytes()[..3]);
        blob[23] = 0xFF;
    }

    let mut dw = [0xFFFF_FFFFu32; 16];

    let addr_mode = if size > 16 << 20 { 0b01 } else { 0b00 };
    dw[0] = 0x01
        | (0x20 << 8)
        | (addr_mode << 17)
        | (1 << 16)  // 1-1-2
        | (1 << 20)  // 1-2-2
        | (1 << 21)  // 1-4-4
        | (1 << 22); // 1-1-4
    dw[1] = (1 << 31) | (63 - (size * 8).leading_zeros());
    dw[2] = ((0x6B << 8 | 8) << 16) | (0xEB << 8 | (2 << 5) | 4);
    dw[3] = ((0xBB << 8 | (2 << 5)) << 16) | (0x3B << 8 | 8);
    dw[4] = 0; // no 2-2-2 / 4-4-4
    dw[5] = 0;
    dw[6] = 0;
    dw[7] = 12 | (0x20 << 8) | (15 << 16) | (0x52 << 24);
    dw[8] = 16 | (0xD8 << 8);
    dw[9] = 1 | (0x25 << 4) | (0x25 << 11) | (0x2A << 18);
    dw[10] = 2 | (8 << 4) | (7 << 8) | (1 << 13);
    dw[11] = 0;
    dw[12] = 0;
    dw[13] = 0;
    // QE = SR2 bit 1 via 2-byte WRSR; QPI enter 38h, leave FFh
    dw[14] = (1 << 20) | (1 << 5) | (1 << 0);
    // Enter 4B: WREN+B7h; exit: WREN+E9h; soft reset 66h+99h
    dw[15] = (1 << 25) | (1 << 15) | (1 << 12);

    for (i, d) in dw.iter().enumerate() {
        blob[bfpt_ofs + i * 4..bfpt_ofs + i * 4 + 4].copy_from_slice(&d.to_le_bytes());
    }

    if with_4bait {
        // 4B variants: plain+fast read, dual/quad out, 1-4-4, PP, erases 1-3
        let dw1: u32 = 0x3F | (1 << 6) | (1 << 7) | (0b0111 << 9);
        let dw2: u32 = 0x21 | (0x5C << 8) | (0xDC << 16) | (0xFF << 24);
        blob[a4bait_ofs..a4bait_ofs + 4].copy_from_slice(&dw1.to_le_bytes());
        blob[a4bait_ofs + 4..a4bait_ofs + 8].copy_from_slice(&dw2.to_le_bytes());
    }

    blob
}
