//! Emulated SPI-NAND chip
//!
//! Behaves like a W25N-class chip: feature registers, two-phase page access
//! through the cache, on-die ECC with injectable bitflips, program/erase
//! failure injection, an OTP window with UID and parameter pages, and
//! physical bad-block marks.

use crate::ChipModel;
use std::collections::{HashMap, HashSet};

/// Configuration of the emulated NAND chip
#[derive(Debug, Clone)]
pub struct DummyNandConfig {
    /// ID bytes answered after the dummy byte
    pub id: Vec<u8>,
    /// Blocks per LUN
    pub blocks: u32,
    /// Pages per block
    pub pages_per_block: u32,
    /// Main page size
    pub page_size: u32,
    /// Spare size
    pub oob_size: u32,
    /// On-die correction strength per 512-byte step
    pub ecc_strength: u32,
    /// Unique ID bytes (repeated over the UID page)
    pub uid: Vec<u8>,
    /// OTP-proper page count
    pub otp_pages: u32,
}

impl Default for DummyNandConfig {
    fn default() -> Self {
        // W25N01GV-style 1 Gbit part
        Self {
            id: vec![0xEF, 0xAA, 0x21],
            blocks: 1024,
            pages_per_block: 64,
            page_size: 2048,
            oob_size: 64,
            ecc_strength: 1,
            uid: vec![
                0x4E, 0x61, 0x6E, 0x64, 0x55, 0x49, 0x44, 0x30, 0x11, 0x22, 0x33, 0x44, 0x55,
                0x66, 0x77, 0x88,
            ],
            otp_pages: 10,
        }
    }
}

const FEAT_PROTECT: u8 = 0xA0;
const FEAT_CONFIG: u8 = 0xB0;
const FEAT_STATUS: u8 = 0xC0;

const CFG_QE: u8 = 1 << 0;
const CFG_ECC_EN: u8 = 1 << 4;
const CFG_OTP_EN: u8 = 1 << 6;
const CFG_OTP_LOCK: u8 = 1 << 7;

/// The emulated chip
pub struct DummyNand {
    cfg: DummyNandConfig,
    /// Raw array: oob_page_size bytes per page
    pages: Vec<u8>,
    /// Pristine copies of pages that had bitflips injected
    golden: HashMap<u32, Vec<u8>>,
    /// Injected bitflip count per page
    injected: HashMap<u32, u32>,
    /// Pages whose next program fails
    program_fail: HashSet<u32>,
    /// Blocks whose next erase fails
    erase_fail: HashSet<u32>,

    /// OTP window storage (UID page, parameter page, OTP pages)
    otp: Vec<Vec<u8>>,
    otp_locked: bool,

    cache: Vec<u8>,
    reg_protect: u8,
    reg_config: u8,
    wel: bool,
    ecc_field: u8,
    prog_fail_latch: bool,
    erase_fail_latch: bool,
}

impl DummyNand {
    /// Build with a configuration
    pub fn new(cfg: DummyNandConfig) -> Self {
        let oob_page = (cfg.page_size + cfg.oob_size) as usize;
        let page_count = (cfg.blocks * cfg.pages_per_block) as usize;

        let mut otp = vec![vec![0xFFu8; oob_page]; (2 + cfg.otp_pages) as usize];

        // UID page: the unique ID repeated back to back
        let uid_page = &mut otp[0];
        let mut pos = 0usize;
        while pos + cfg.uid.len() <= cfg.page_size as usize {
            uid_page[pos..pos + cfg.uid.len()].copy_from_slice(&cfg.uid);
            pos += cfg.uid.len();
        }

        // Parameter page: ONFI signature and little else
        otp[1][..4].copy_from_slice(b"ONFI");

        Self {
            pages: vec![0xFF; oob_page * page_count],
            golden: HashMap::new(),
            injected: HashMap::new(),
            program_fail: HashSet::new(),
            erase_fail: HashSet::new(),
            otp,
            otp_locked: false,
            cache: vec![0xFF; oob_page],
            reg_protect: 0x38, // ships block-protected
            reg_config: CFG_ECC_EN,
            wel: false,
            ecc_field: 0,
            prog_fail_latch: false,
            erase_fail_latch: false,
            cfg,
        }
    }

    /// Default 1 Gbit part
    pub fn new_default() -> Self {
        Self::new(DummyNandConfig::default())
    }

    fn oob_page(&self) -> usize {
        (self.cfg.page_size + self.cfg.oob_size) as usize
    }

    fn page_count(&self) -> u32 {
        self.cfg.blocks * self.cfg.pages_per_block
    }

    fn page_slice(&self, page: u32) -> &[u8] {
        let n = self.oob_page();
        &self.pages[page as usize * n..(page as usize + 1) * n]
    }

    fn page_slice_mut(&mut self, page: u32) -> &mut [u8] {
        let n = self.oob_page();
        &mut self.pages[page as usize * n..(page as usize + 1) * n]
    }

    /// Flip `count` distinct bits in the stored page, remembering the
    /// pristine content so on-die correction can "repair" them.
    pub fn inject_bitflips(&mut self, page: u32, count: u32) {
        if count == 0 {
            return;
        }
        let n = self.oob_page();
        if !self.golden.contains_key(&page) {
            let copy = self.pages[page as usize * n..(page as usize + 1) * n].to_vec();
            self.golden.insert(page, copy);
        }

        let already = *self.injected.get(&page).unwrap_or(&0);
        for i in 0..count {
            // Deterministic spread across the data area
            let bit = (already + i) as usize * 137 + 13;
            let byte = bit / 8 % n.min(self.cfg.page_size as usize);
            let mask = 1u8 << (bit % 8);
            self.pages[page as usize * n + byte] ^= mask;
        }

        *self.injected.entry(page).or_insert(0) += count;
    }

    /// XOR one stored byte in place, bypassing the on-die ECC bookkeeping.
    /// For exercising external ECC engines, which see the array as-is.
    pub fn corrupt_raw(&mut self, page: u32, offset: usize, mask: u8) {
        let n = self.oob_page();
        self.pages[page as usize * n + offset] ^= mask;
    }

    /// Make the next program of `page` fail
    pub fn set_program_fail(&mut self, page: u32) {
        self.program_fail.insert(page);
    }

    /// Make the next erase of `block` fail
    pub fn set_erase_fail(&mut self, block: u32) {
        self.erase_fail.insert(block);
    }

    /// Stamp a factory bad-block mark (0x00 at the first OOB byte of the
    /// block's first page)
    pub fn mark_bad_physical(&mut self, block: u32) {
        let page = block * self.cfg.pages_per_block;
        let page_size = self.cfg.page_size as usize;
        self.page_slice_mut(page)[page_size] = 0x00;
    }

    /// Raw page bytes, for assertions
    pub fn raw_page(&self, page: u32) -> &[u8] {
        self.page_slice(page)
    }

    /// Whether the OTP area is locked
    pub fn is_otp_locked(&self) -> bool {
        self.otp_locked
    }

    /// Protection feature register, for assertions
    pub fn reg_protect(&self) -> u8 {
        self.reg_protect
    }

    /// Configuration feature register, for assertions
    pub fn reg_config(&self) -> u8 {
        self.reg_config
    }

    fn take_row(&self, out: &[u8]) -> u32 {
        let mut row = 0u32;
        for &b in out.iter().skip(1).take(3) {
            row = row << 8 | b as u32;
        }
        row
    }

    fn take_col(&self, out: &[u8]) -> usize {
        let mut col = 0usize;
        for &b in out.iter().skip(1).take(2) {
            col = col << 8 | b as usize;
        }
        col & 0xFFF
    }

    fn otp_mode(&self) -> bool {
        self.reg_config & CFG_OTP_EN != 0
    }

    fn load_cache(&mut self, row: u32) {
        self.ecc_field = 0;

        if self.otp_mode() {
            let src = self
                .otp
                .get(row as usize)
                .cloned()
                .unwrap_or_else(|| vec![0xFF; self.oob_page()]);
            self.cache.copy_from_slice(&src);
            return;
        }

        if row >= self.page_count() {
            self.cache.fill(0xFF);
            return;
        }

        let ecc_on = self.reg_config & CFG_ECC_EN != 0;
        let flips = *self.injected.get(&row).unwrap_or(&0);

        if ecc_on && flips > 0 {
            if flips <= self.cfg.ecc_strength {
                // Corrected: serve the pristine data
                self.cache.copy_from_slice(&self.golden[&row]);
                self.ecc_field = 0b01;
            } else {
                let n = self.oob_page();
                let start = row as usize * n;
                self.cache.copy_from_slice(&self.pages[start..start + n]);
                self.ecc_field = 0b10;
            }
        } else {
            let n = self.oob_page();
            let start = row as usize * n;
            self.cache.copy_from_slice(&self.pages[start..start + n]);
        }
    }

    fn program_execute(&mut self, row: u32) {
        if !self.wel {
            return;
        }
        self.wel = false;

        if self.otp_mode() {
            if self.reg_config & CFG_OTP_LOCK != 0 {
                self.otp_locked = true;
                return;
            }
            if let Some(p) = self.otp.get_mut(row as usize) {
                if row >= 2 && !self.otp_locked {
                    for (cell, &b) in p.iter_mut().zip(self.cache.iter()) {
                        *cell &= b;
                    }
                }
            }
            return;
        }

        if row >= self.page_count() {
            return;
        }

        if self.program_fail.remove(&row) {
            self.prog_fail_latch = true;
            return;
        }

        let cache = self.cache.clone();
        for (cell, &b) in self.page_slice_mut(row).iter_mut().zip(cache.iter()) {
            *cell &= b;
        }
    }

    fn erase_block(&mut self, row: u32) {
        if !self.wel {
            return;
        }
        self.wel = false;

        let block = row / self.cfg.pages_per_block;
        if block >= self.cfg.blocks {
            return;
        }

        if self.erase_fail.remove(&block) {
            self.erase_fail_latch = true;
            return;
        }

        let first = block * self.cfg.pages_per_block;
        for page in first..first + self.cfg.pages_per_block {
            self.page_slice_mut(page).fill(0xFF);
            self.golden.remove(&page);
            self.injected.remove(&page);
        }
    }

    fn status(&self) -> u8 {
        let mut st = 0u8;
        if self.wel {
            st |= 1 << 1;
        }
        if self.erase_fail_latch {
            st |= 1 << 2;
        }
        if self.prog_fail_latch {
            st |= 1 << 3;
        }
        st | (self.ecc_field << 4)
    }
}

impl ChipModel for DummyNand {
    fn transaction(&mut self, out: &[u8], cmd_buswidth: u8, input: &mut [u8]) {
        input.fill(0xFF);

        if out.is_empty() || cmd_buswidth != 1 {
            return;
        }

        let opcode = out[0];
        match opcode {
            0xFF => {
                self.reg_config = CFG_ECC_EN;
                self.cache.fill(0xFF);
                self.wel = false;
                self.prog_fail_latch = false;
                self.erase_fail_latch = false;
            }

            0x9F => {
                for (i, b) in input.iter_mut().enumerate() {
                    *b = self.cfg.id.get(i).copied().unwrap_or(0x00);
                }
            }

            0x0F => {
                let val = match out.get(1) {
                    Some(&FEAT_PROTECT) => self.reg_protect,
                    Some(&FEAT_CONFIG) => {
                        let mut v = self.reg_config;
                        if self.otp_locked {
                            v |= CFG_OTP_LOCK;
                        }
                        v
                    }
                    Some(&FEAT_STATUS) => self.status(),
                    _ => 0,
                };
                input.fill(val);
            }
            0x1F => {
                if let (Some(&addr), Some(&val)) = (out.get(1), out.get(2)) {
                    match addr {
                        FEAT_PROTECT => self.reg_protect = val,
                        FEAT_CONFIG => self.reg_config = val,
                        _ => {}
                    }
                }
            }

            0x06 => self.wel = true,
            0x04 => self.wel = false,

            0x13 => {
                let row = self.take_row(out);
                self.prog_fail_latch = false;
                self.erase_fail_latch = false;
                self.load_cache(row);
            }

            0x03 | 0x0B | 0x3B | 0xBB => {
                let col = self.take_col(out);
                for (i, b) in input.iter_mut().enumerate() {
                    *b = self.cache.get(col + i).copied().unwrap_or(0xFF);
                }
            }
            0x6B | 0xEB => {
                if self.reg_config & CFG_QE != 0 {
                    let col = self.take_col(out);
                    for (i, b) in input.iter_mut().enumerate() {
                        *b = self.cache.get(col + i).copied().unwrap_or(0xFF);
                    }
                }
            }

            0x02 => {
                let col = self.take_col(out);
                self.cache.fill(0xFF);
                for (i, &b) in out[3..].iter().enumerate() {
                    if let Some(cell) = self.cache.get_mut(col + i) {
                        *cell = b;
                    }
                }
            }
            0x32 => {
                if self.reg_config & CFG_QE != 0 {
                    let col = self.take_col(out);
                    self.cache.fill(0xFF);
                    for (i, &b) in out[3..].iter().enumerate() {
                        if let Some(cell) = self.cache.get_mut(col + i) {
                            *cell = b;
                        }
                    }
                }
            }

            0x10 => {
                let row = self.take_row(out);
                self.prog_fail_latch = false;
                self.erase_fail_latch = false;
                self.program_execute(row);
            }

            0xD8 => {
                let row = self.take_row(out);
                self.prog_fail_latch = false;
                self.erase_fail_latch = false;
                self.erase_block(row);
            }

            0xC2 => {}

            _ => {}
        }
    }
}
