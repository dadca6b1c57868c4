//! ECC engine binding
//!
//! An ECC instance is created per (page_size, spare_size, config) geometry
//! and owns the page-layout knowledge for that geometry. Two engines ship
//! here: [`OnDieEcc`] for chips that correct internally (transforms are
//! no-ops, status comes from the feature register), and [`SectorEcc`], an
//! external engine with 512-byte sectors, an 8-byte FDM region per sector
//! and an optional bad-block-marker swap, as found on MT7622-class NAND
//! controllers.

use crate::layout::{convert_page, PageByteKind, PageLayout};
use bitflags::bitflags;
use uflash_core::error::{Error, Result};

/// ECC sector size of the sector engine
pub const ECC_SECTOR_SIZE: u32 = 512;
/// FDM (free data metadata) bytes per sector
pub const ECC_FDM_SIZE: u32 = 8;
/// FDM bytes covered by ECC
pub const ECC_FDM_ECC_SIZE: u32 = 1;

/// Spare-per-sector sizes the sector engine understands
const SPARE_SIZES: [u32; 4] = [16, 26, 27, 28];
/// Correction strengths the sector engine can be configured for
const ECC_CAPS: [u32; 5] = [4, 6, 8, 10, 12];

/// Declared correction geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EccConfig {
    /// Bytes protected per step (main data only)
    pub step_size: u16,
    /// Correctable bits per step
    pub strength_per_step: u16,
}

bitflags! {
    /// How bad-block marks are read and written on this geometry
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BbmFlags: u32 {
        /// Merge the chip's own BBM page list into this config
        const MERGE_PAGE = 1 << 0;
        /// Mark the whole page with 00h, not just the marker bytes
        const MARK_WHOLE_PAGE = 1 << 1;
        /// Access marker bytes through raw reads/writes
        const RAW = 1 << 2;
        /// Marker positions are in canonical layout
        const CANONICAL_LAYOUT = 1 << 3;
    }
}

/// Bad-block-marker policy contributed by the ECC geometry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BbmConfig {
    /// Pages within the block to check/mark (indices into the block)
    pub pages: Vec<u32>,
    /// Byte positions to check
    pub check_pos: Vec<u32>,
    /// Byte positions to mark
    pub mark_pos: Vec<u32>,
    /// Bits of the marker that must read 0xFF for a good block
    pub check_width: u16,
    /// Bytes written per mark position
    pub mark_bytes: u16,
    /// Flags
    pub flags: BbmFlags,
}

/// Per-decode status surface
#[derive(Debug, Clone, Default)]
pub struct EccStepStatus {
    /// Whether per-step counts are meaningful (else only the aggregate is)
    pub per_step: bool,
    /// Corrected bitflips per step; -1 = step uncorrectable
    pub step_bitflips: Vec<i32>,
}

impl EccStepStatus {
    /// Total corrected bitflips (uncorrectable steps excluded)
    pub fn total_bitflips(&self) -> u32 {
        self.step_bitflips.iter().filter(|&&n| n > 0).map(|&n| n as u32).sum()
    }

    /// Whether any step failed
    pub fn has_uncorrectable(&self) -> bool {
        self.step_bitflips.iter().any(|&n| n < 0)
    }
}

/// The ECC engine contract (C9)
pub trait EccEngine {
    /// Correction geometry
    fn config(&self) -> EccConfig;
    /// BBM policy for this geometry
    fn bbm_config(&self) -> BbmConfig;
    /// Whether correction happens on the die (transforms are no-ops)
    fn is_on_die(&self) -> bool {
        false
    }
    /// Encode a full raw page in place
    fn encode_page(&mut self, page: &mut [u8]) -> Result<()>;
    /// Decode a full raw page in place; `EccUncorrectable` when beyond
    /// correction. Status is valid afterwards either way.
    fn decode_page(&mut self, page: &mut [u8]) -> Result<()>;
    /// Status of the last decode
    fn status(&self) -> &EccStepStatus;
    /// On-die engines receive the feature-register outcome through here
    fn set_feature_status(&mut self, _status: EccStepStatus) {}
    /// Raw or canonical layout of a page
    fn page_layout(&self, canonical: bool) -> &PageLayout;
    /// Direct converter between the two layouts
    fn convert_page_layout(&self, src: &[u8], dst: &mut [u8], from_canonical: bool) -> Result<()> {
        let (from, to) = if from_canonical {
            (self.page_layout(true), self.page_layout(false))
        } else {
            (self.page_layout(false), self.page_layout(true))
        };
        convert_page(from, to, src, dst)
    }
}

// ---------------------------------------------------------------------------
// On-die engine
// ---------------------------------------------------------------------------

/// ECC engine for chips that correct internally
pub struct OnDieEcc {
    config: EccConfig,
    bbm: BbmConfig,
    raw: PageLayout,
    canonical: PageLayout,
    status: EccStepStatus,
}

impl OnDieEcc {
    /// Build for a page geometry and the chip's declared requirement
    pub fn new(page_size: u32, spare_size: u32, config: EccConfig) -> OnDieEcc {
        // On-die layouts are flat: the chip hides its parity area
        let mut raw = PageLayout::default();
        raw.add(page_size, PageByteKind::Data);
        raw.add(1, PageByteKind::Marker);
        raw.add(spare_size - 1, PageByteKind::OobData);

        let bbm = BbmConfig {
            pages: vec![0, u32::MAX], // first and last page of the block
            check_pos: vec![page_size],
            mark_pos: vec![page_size],
            check_width: 8,
            mark_bytes: 1,
            flags: BbmFlags::MERGE_PAGE | BbmFlags::RAW,
        };

        OnDieEcc {
            config,
            bbm,
            canonical: raw.clone(),
            raw,
            status: EccStepStatus::default(),
        }
    }
}

impl EccEngine for OnDieEcc {
    fn config(&self) -> EccConfig {
        self.config
    }

    fn bbm_config(&self) -> BbmConfig {
        self.bbm.clone()
    }

    fn is_on_die(&self) -> bool {
        true
    }

    fn encode_page(&mut self, _page: &mut [u8]) -> Result<()> {
        Ok(())
    }

    fn decode_page(&mut self, _page: &mut [u8]) -> Result<()> {
        Ok(())
    }

    fn status(&self) -> &EccStepStatus {
        &self.status
    }

    fn set_feature_status(&mut self, status: EccStepStatus) {
        self.status = status;
    }

    fn page_layout(&self, canonical: bool) -> &PageLayout {
        if canonical {
            &self.canonical
        } else {
            &self.raw
        }
    }
}

// ---------------------------------------------------------------------------
// Parity codec
// ---------------------------------------------------------------------------

/// Bits covered by one parity half-block
const CODE_BITS: u32 = 2048;
/// Address bits of one parity half-block
const ADDR_BITS: u32 = 11;

/// Line/column parity over one 256-byte half: 11 odd + 11 even parity bits
/// packed little-endian into 3 bytes, stored inverted so erased (all-0xFF)
/// halves read back clean.
fn parity256(data: &[u8]) -> u32 {
    debug_assert_eq!(data.len(), 256);

    let mut odd = 0u32;
    let mut even = 0u32;

    for idx in 0..CODE_BITS {
        let bit = (data[(idx >> 3) as usize] >> (idx & 7)) & 1;
        if bit == 0 {
            continue;
        }
        for k in 0..ADDR_BITS {
            if idx & (1 << k) != 0 {
                odd ^= 1 << k;
            } else {
                even ^= 1 << k;
            }
        }
    }

    odd | even << ADDR_BITS
}

/// Outcome of decoding one 256-byte half
enum HalfDecode {
    Clean,
    /// (byte index, bit index) corrected in data
    Corrected(usize, u8),
    /// Bitflip confined to the parity bytes
    EccByteFlip,
    Uncorrectable,
}

fn decode256(data: &[u8], stored_code: u32) -> HalfDecode {
    let syndrome = parity256(data) ^ stored_code;
    if syndrome == 0 {
        return HalfDecode::Clean;
    }

    let ones = syndrome.count_ones();
    if ones == 1 {
        return HalfDecode::EccByteFlip;
    }

    if ones == ADDR_BITS {
        let odd = syndrome & ((1 << ADDR_BITS) - 1);
        let even = syndrome >> ADDR_BITS;
        // A single data-bit error flips exactly one parity bit of each pair
        if odd ^ even == (1 << ADDR_BITS) - 1 {
            let idx = odd;
            return HalfDecode::Corrected((idx >> 3) as usize, (idx & 7) as u8);
        }
    }

    HalfDecode::Uncorrectable
}

// ---------------------------------------------------------------------------
// Sector engine
// ---------------------------------------------------------------------------

/// External sector-based ECC engine (MT7622-class geometry)
pub struct SectorEcc {
    page_size: u32,
    spare_size: u32,
    ecc_steps: u32,
    spare_per_sector: u32,
    raw_sector_size: u32,
    ecc_strength: u32,
    ecc_bytes: u32,
    bbm_swap: bool,

    raw: PageLayout,
    canonical: PageLayout,
    status: EccStepStatus,
}

impl SectorEcc {
    /// Build for a geometry; picks the largest strength whose parity fits in
    /// (spare-per-sector − FDM) bytes.
    pub fn new(page_size: u32, spare_size: u32, bbm_swap: bool) -> Result<SectorEcc> {
        if page_size == 0 || spare_size == 0 || page_size % ECC_SECTOR_SIZE != 0 {
            return Err(Error::InvalidParameter("page geometry"));
        }

        let ecc_steps = page_size / ECC_SECTOR_SIZE;
        if ecc_steps > 8 {
            return Err(Error::Unsupported);
        }

        let spare_per_step = spare_size / ecc_steps;
        let spare_per_sector = SPARE_SIZES
            .iter()
            .rev()
            .copied()
            .find(|s| *s <= spare_per_step)
            .ok_or(Error::Unsupported)?;

        let msg_size = ECC_SECTOR_SIZE + ECC_FDM_ECC_SIZE;
        let parity_bits = 32 - (1 + 8 * msg_size).leading_zeros();
        let max_ecc_bytes = spare_per_sector - ECC_FDM_SIZE;
        let max_strength = max_ecc_bytes * 8 / parity_bits;

        let ecc_strength = ECC_CAPS
            .iter()
            .rev()
            .copied()
            .find(|s| *s <= max_strength)
            .ok_or(Error::Unsupported)?;
        let ecc_bytes = (ecc_strength * parity_bits).div_ceil(8);

        let mut ecc = SectorEcc {
            page_size,
            spare_size,
            ecc_steps,
            spare_per_sector,
            raw_sector_size: ECC_SECTOR_SIZE + spare_per_sector,
            ecc_strength,
            ecc_bytes,
            bbm_swap: bbm_swap && ecc_steps > 1,
            raw: PageLayout::default(),
            canonical: PageLayout::default(),
            status: EccStepStatus {
                per_step: true,
                step_bitflips: vec![0; ecc_steps as usize],
            },
        };

        ecc.gen_raw_layout();
        ecc.gen_canonical_layout();

        Ok(ecc)
    }

    /// Corrected strength actually configured (sizes the parity area)
    pub fn strength(&self) -> u32 {
        self.ecc_strength
    }

    fn unused_per_sector(&self) -> u32 {
        self.spare_per_sector - ECC_FDM_SIZE - self.ecc_bytes
    }

    fn gen_raw_layout(&mut self) {
        let l = &mut self.raw;
        let plain_steps = if self.bbm_swap {
            self.ecc_steps - 1
        } else {
            self.ecc_steps
        };

        for i in 0..plain_steps {
            l.add(ECC_SECTOR_SIZE, PageByteKind::Data);
            if !self.bbm_swap && i == 0 {
                l.add(ECC_FDM_ECC_SIZE, PageByteKind::Marker);
            } else {
                l.add(ECC_FDM_ECC_SIZE, PageByteKind::OobData);
            }
            l.add(ECC_FDM_SIZE - ECC_FDM_ECC_SIZE, PageByteKind::OobFree);
            l.add(self.ecc_bytes, PageByteKind::EccParity);
            l.add(self.spare_per_sector - ECC_FDM_SIZE - self.ecc_bytes, PageByteKind::Unused);
        }

        if self.bbm_swap {
            // The swap parks the marker at raw offset `page_size`, inside the
            // last sector's data run; the displaced data byte lands in the
            // first FDM column.
            let lead = self.page_size - (self.ecc_steps - 1) * self.raw_sector_size;
            l.add(lead, PageByteKind::Data);
            l.add(1, PageByteKind::Marker);
            l.add(ECC_SECTOR_SIZE - lead, PageByteKind::Data);
            l.add(ECC_FDM_SIZE - ECC_FDM_ECC_SIZE, PageByteKind::OobFree);
            l.add(self.ecc_bytes, PageByteKind::EccParity);
            l.add(self.spare_per_sector - ECC_FDM_SIZE - self.ecc_bytes, PageByteKind::Unused);
        }

        let tail = self.spare_size - self.ecc_steps * self.spare_per_sector;
        l.add(tail, PageByteKind::Unused);
    }

    fn gen_canonical_layout(&mut self) {
        let steps = self.ecc_steps;
        let ecc_bytes = self.ecc_bytes;
        let unused = self.unused_per_sector();
        let l = &mut self.canonical;

        l.add(self.page_size, PageByteKind::Data);

        for i in 0..steps {
            if i == 0 {
                l.add(ECC_FDM_ECC_SIZE, PageByteKind::Marker);
            } else {
                l.add(ECC_FDM_ECC_SIZE, PageByteKind::OobData);
            }
            l.add(ECC_FDM_SIZE - ECC_FDM_ECC_SIZE, PageByteKind::OobFree);
        }

        for _ in 0..steps {
            l.add(ecc_bytes, PageByteKind::EccParity);
            l.add(unused, PageByteKind::Unused);
        }

        let tail = self.spare_size - steps * self.spare_per_sector;
        l.add(tail, PageByteKind::Unused);
    }

    fn parity_offset(&self, step: u32) -> usize {
        (step * self.raw_sector_size + ECC_SECTOR_SIZE + ECC_FDM_SIZE) as usize
    }

    /// Raw offset of canonical-order byte `idx` of one sector's data window.
    ///
    /// With the marker swap active, the last sector's window is interrupted
    /// by the marker byte at raw offset `page_size`: the data byte that would
    /// sit there lives in the sector's first FDM column instead. Parity runs
    /// over the canonical order, so corrections land on the right raw byte.
    fn sector_offset(&self, step: u32, idx: usize) -> usize {
        let base = (step * self.raw_sector_size) as usize;

        if self.bbm_swap && step == self.ecc_steps - 1 {
            let lead = (self.page_size - (self.ecc_steps - 1) * self.raw_sector_size) as usize;
            if idx == lead {
                return base + ECC_SECTOR_SIZE as usize;
            }
        }

        base + idx
    }

    fn gather_sector(&self, page: &[u8], step: u32) -> [u8; ECC_SECTOR_SIZE as usize] {
        let mut sector = [0u8; ECC_SECTOR_SIZE as usize];
        for (i, b) in sector.iter_mut().enumerate() {
            *b = page[self.sector_offset(step, i)];
        }
        sector
    }

    // The marker swap pair. On the raw side the two swaps rotate three
    // bytes: the canonical marker (first FDM byte of sector 0), the last
    // sector's first FDM byte, and the data byte at raw offset `page_size`.
    // The canonical-side pair is the exact inverse.

    fn fdm_swap_raw(&self, buf: &mut [u8]) {
        if !self.bbm_swap {
            return;
        }
        let pos1 = ECC_SECTOR_SIZE as usize;
        let pos2 = ((self.ecc_steps - 1) * self.raw_sector_size + ECC_SECTOR_SIZE) as usize;
        buf.swap(pos1, pos2);
    }

    fn marker_swap_raw(&self, buf: &mut [u8]) {
        if !self.bbm_swap {
            return;
        }
        let fdm_pos = ((self.ecc_steps - 1) * self.raw_sector_size + ECC_SECTOR_SIZE) as usize;
        buf.swap(fdm_pos, self.page_size as usize);
    }

    fn marker_swap_canonical(&self, buf: &mut [u8]) {
        if !self.bbm_swap {
            return;
        }
        let data_pos = (self.page_size - (self.ecc_steps - 1) * self.spare_per_sector) as usize;
        let fdm_pos = (self.page_size + (self.ecc_steps - 1) * ECC_FDM_SIZE) as usize;
        buf.swap(fdm_pos, data_pos);
    }

    fn fdm_swap_canonical(&self, buf: &mut [u8]) {
        if !self.bbm_swap {
            return;
        }
        let pos1 = self.page_size as usize;
        let pos2 = (self.page_size + (self.ecc_steps - 1) * ECC_FDM_SIZE) as usize;
        buf.swap(pos1, pos2);
    }

    fn canonical_data(&self, step: u32) -> usize {
        (step * ECC_SECTOR_SIZE) as usize
    }

    fn canonical_fdm(&self, step: u32) -> usize {
        (self.page_size + step * ECC_FDM_SIZE) as usize
    }

    fn canonical_ecc(&self, step: u32) -> usize {
        (self.page_size
            + self.ecc_steps * ECC_FDM_SIZE
            + step * (self.spare_per_sector - ECC_FDM_SIZE)) as usize
    }
}

impl EccEngine for SectorEcc {
    fn config(&self) -> EccConfig {
        EccConfig {
            step_size: ECC_SECTOR_SIZE as u16,
            strength_per_step: self.ecc_strength as u16,
        }
    }

    fn bbm_config(&self) -> BbmConfig {
        let mut cfg = BbmConfig {
            pages: vec![0],
            check_width: 8,
            mark_bytes: 1,
            ..Default::default()
        };

        if self.bbm_swap {
            cfg.check_pos = vec![self.page_size];
            cfg.mark_pos = vec![self.page_size];
            cfg.flags = BbmFlags::MERGE_PAGE | BbmFlags::CANONICAL_LAYOUT;
        } else {
            cfg.check_pos = vec![ECC_SECTOR_SIZE];
            cfg.mark_pos = vec![ECC_SECTOR_SIZE, self.page_size];
            cfg.flags = BbmFlags::MERGE_PAGE | BbmFlags::MARK_WHOLE_PAGE | BbmFlags::RAW;
        }

        cfg
    }

    fn encode_page(&mut self, page: &mut [u8]) -> Result<()> {
        if page.len() < (self.page_size + self.spare_size) as usize {
            return Err(Error::InvalidParameter("page buffer too short"));
        }

        for step in 0..self.ecc_steps {
            let sector = self.gather_sector(page, step);
            let codes = [parity256(&sector[..256]), parity256(&sector[256..512])];

            let pofs = self.parity_offset(step);
            let parity = &mut page[pofs..pofs + self.ecc_bytes as usize];
            parity.fill(0xFF);
            for (h, code) in codes.iter().enumerate() {
                let inv = !code & 0x3F_FFFF;
                parity[h * 3] = inv as u8;
                parity[h * 3 + 1] = (inv >> 8) as u8;
                parity[h * 3 + 2] = (inv >> 16) as u8;
            }
        }

        Ok(())
    }

    fn decode_page(&mut self, page: &mut [u8]) -> Result<()> {
        if page.len() < (self.page_size + self.spare_size) as usize {
            return Err(Error::InvalidParameter("page buffer too short"));
        }

        let mut failed = false;

        for step in 0..self.ecc_steps {
            let sector = self.gather_sector(page, step);
            let mut bitflips = 0i32;

            for half in 0..2usize {
                let pofs = self.parity_offset(step) + half * 3;
                let raw = u32::from(page[pofs])
                    | u32::from(page[pofs + 1]) << 8
                    | u32::from(page[pofs + 2]) << 16;
                let stored = !raw & 0x3F_FFFF;

                let outcome = decode256(&sector[half * 256..half * 256 + 256], stored);

                match outcome {
                    HalfDecode::Clean => {}
                    HalfDecode::EccByteFlip => bitflips += 1,
                    HalfDecode::Corrected(byte, bit) => {
                        let ofs = self.sector_offset(step, half * 256 + byte);
                        page[ofs] ^= 1 << bit;
                        bitflips += 1;
                    }
                    HalfDecode::Uncorrectable => {
                        bitflips = -1;
                        failed = true;
                    }
                }

                if bitflips < 0 {
                    break;
                }
            }

            self.status.step_bitflips[step as usize] = bitflips;
        }

        if failed {
            return Err(Error::EccUncorrectable);
        }

        Ok(())
    }

    fn status(&self) -> &EccStepStatus {
        &self.status
    }

    fn page_layout(&self, canonical: bool) -> &PageLayout {
        if canonical {
            &self.canonical
        } else {
            &self.raw
        }
    }

    /// Direct converter: per-sector block copies, then the marker-swap pair
    /// on the produced buffer. Faster than the generic layout walker and the
    /// only place the swap rotation happens.
    fn convert_page_layout(&self, src: &[u8], dst: &mut [u8], from_canonical: bool) -> Result<()> {
        let total = (self.page_size + self.spare_size) as usize;
        if src.len() < total || dst.len() < total {
            return Err(Error::InvalidParameter("page buffer too short"));
        }

        let sector = ECC_SECTOR_SIZE as usize;
        let fdm = ECC_FDM_SIZE as usize;
        let spare = self.spare_per_sector as usize;
        let rss = self.raw_sector_size as usize;
        let steps = self.ecc_steps as usize;
        let tail = (self.spare_size - self.ecc_steps * self.spare_per_sector) as usize;

        if from_canonical {
            for i in 0..steps {
                let raw = i * rss;
                let d = self.canonical_data(i as u32);
                let f = self.canonical_fdm(i as u32);
                let e = self.canonical_ecc(i as u32);

                dst[raw..raw + sector].copy_from_slice(&src[d..d + sector]);
                dst[raw + sector..raw + sector + fdm].copy_from_slice(&src[f..f + fdm]);
                dst[raw + sector + fdm..raw + rss].copy_from_slice(&src[e..e + spare - fdm]);
            }

            dst[steps * rss..steps * rss + tail]
                .copy_from_slice(&src[steps * rss..steps * rss + tail]);

            self.fdm_swap_raw(dst);
            self.marker_swap_raw(dst);
        } else {
            for i in 0..steps {
                let raw = i * rss;
                let d = self.canonical_data(i as u32);
                let f = self.canonical_fdm(i as u32);
                let e = self.canonical_ecc(i as u32);

                dst[d..d + sector].copy_from_slice(&src[raw..raw + sector]);
                dst[f..f + fdm].copy_from_slice(&src[raw + sector..raw + sector + fdm]);
                dst[e..e + spare - fdm].copy_from_slice(&src[raw + sector + fdm..raw + rss]);
            }

            dst[steps * rss..steps * rss + tail]
                .copy_from_slice(&src[steps * rss..steps * rss + tail]);

            self.marker_swap_canonical(dst);
            self.fdm_swap_canonical(dst);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_2048_64() {
        let ecc = SectorEcc::new(2048, 64, false).unwrap();
        // 4 steps, 16 spare per sector, parity bits = fls(1+8*513) = 13,
        // max strength = (16-8)*8/13 = 4
        assert_eq!(ecc.ecc_steps, 4);
        assert_eq!(ecc.spare_per_sector, 16);
        assert_eq!(ecc.strength(), 4);
        assert_eq!(ecc.ecc_bytes, 7);

        assert_eq!(ecc.page_layout(false).total(), 2048 + 64);
        assert_eq!(ecc.page_layout(true).total(), 2048 + 64);
    }

    #[test]
    fn layouts_agree_on_byte_population() {
        for bbm_swap in [false, true] {
            let ecc = SectorEcc::new(2048, 64, bbm_swap).unwrap();
            let raw = ecc.page_layout(false).to_map();
            let canon = ecc.page_layout(true).to_map();

            let count = |map: &[PageByteKind], k: PageByteKind| {
                map.iter().filter(|x| **x == k).count()
            };
            for kind in [
                PageByteKind::Data,
                PageByteKind::OobData,
                PageByteKind::OobFree,
                PageByteKind::EccParity,
                PageByteKind::Unused,
                PageByteKind::Marker,
            ] {
                assert_eq!(count(&raw, kind), count(&canon, kind), "{:?}", kind);
            }
        }
    }

    #[test]
    fn convert_roundtrip_identity() {
        for bbm_swap in [false, true] {
            let ecc = SectorEcc::new(2048, 64, bbm_swap).unwrap();
            let src: Vec<u8> = (0..2112u32).map(|i| (i * 7 + 3) as u8).collect();
            let mut canon = vec![0u8; 2112];
            let mut back = vec![0u8; 2112];

            ecc.convert_page_layout(&src, &mut canon, false).unwrap();
            ecc.convert_page_layout(&canon, &mut back, true).unwrap();
            assert_eq!(src, back, "bbm_swap={}", bbm_swap);
        }
    }

    #[test]
    fn converter_rotates_marker_to_page_size() {
        // steps = 4, raw_sector_size = 528: the rotation involves the
        // canonical marker (2048), the last sector's first FDM byte (2072
        // canonical / 2096 raw) and the data byte at canonical 2000.
        let ecc = SectorEcc::new(2048, 64, true).unwrap();

        let mut canon = vec![0u8; 2112];
        canon[2048] = 0xA1; // marker
        canon[2072] = 0xB2; // last sector's protected FDM byte
        canon[2000] = 0xC3; // the data byte displaced by the marker

        let mut raw = vec![0u8; 2112];
        ecc.convert_page_layout(&canon, &mut raw, true).unwrap();

        assert_eq!(raw[2048], 0xA1, "marker sits at raw page_size");
        assert_eq!(raw[512], 0xB2, "last FDM byte parks in sector 0's FDM column");
        assert_eq!(raw[2096], 0xC3, "displaced data byte lands in the last FDM column");

        // The raw layout map agrees with where the rotation puts things
        let map = ecc.page_layout(false).to_map();
        assert_eq!(map[2048], PageByteKind::Marker);
        assert_eq!(map[512], PageByteKind::OobData);
        assert_eq!(map[2096], PageByteKind::Data);

        let mut back = vec![0u8; 2112];
        ecc.convert_page_layout(&raw, &mut back, false).unwrap();
        assert_eq!(back, canon);
    }

    #[test]
    fn erased_page_decodes_clean() {
        let mut ecc = SectorEcc::new(2048, 64, false).unwrap();
        let mut page = vec![0xFFu8; 2112];
        ecc.decode_page(&mut page).unwrap();
        assert_eq!(ecc.status().total_bitflips(), 0);
        assert!(!ecc.status().has_uncorrectable());
    }

    #[test]
    fn single_bitflip_is_corrected_per_step() {
        let mut ecc = SectorEcc::new(2048, 64, false).unwrap();
        let mut page: Vec<u8> = (0..2112u32).map(|i| (i * 13 + 1) as u8).collect();
        ecc.encode_page(&mut page).unwrap();
        let golden = page.clone();

        // One flip in sector 2's first half
        let victim = 2 * ecc.raw_sector_size as usize + 17;
        page[victim] ^= 0x10;

        ecc.decode_page(&mut page).unwrap();
        assert_eq!(page, golden);
        assert_eq!(ecc.status().step_bitflips[2], 1);
        assert_eq!(ecc.status().total_bitflips(), 1);
    }

    #[test]
    fn double_errors_are_uncorrectable() {
        let mut ecc = SectorEcc::new(2048, 64, false).unwrap();
        let mut page: Vec<u8> = (0..2112u32).map(|i| (i ^ 0x5A) as u8).collect();
        ecc.encode_page(&mut page).unwrap();

        // Two flips inside the same 256-byte half: beyond correction,
        // guaranteed detectable
        page[10] ^= 0x01;
        page[11] ^= 0x02;

        assert_eq!(ecc.decode_page(&mut page), Err(Error::EccUncorrectable));
        assert!(ecc.status().has_uncorrectable());
        assert_eq!(ecc.status().step_bitflips[0], -1);
    }

    #[test]
    fn encode_roundtrip_decodes_clean() {
        let mut ecc = SectorEcc::new(2048, 64, true).unwrap();
        let mut page: Vec<u8> = (0..2112u32).map(|i| (i * 31) as u8).collect();
        ecc.encode_page(&mut page).unwrap();
        ecc.decode_page(&mut page).unwrap();
        assert_eq!(ecc.status().total_bitflips(), 0);
    }

    #[test]
    fn swap_geometry_corrects_flips_at_physical_offsets() {
        let mut ecc = SectorEcc::new(2048, 64, true).unwrap();
        let mut page: Vec<u8> = (0..2112u32).map(|i| (i * 11 + 5) as u8).collect();
        ecc.encode_page(&mut page).unwrap();
        let golden = page.clone();

        // The displaced data byte living in the last sector's FDM column
        page[2096] ^= 0x08;
        ecc.decode_page(&mut page).unwrap();
        assert_eq!(page, golden, "correction must land on the FDM-column byte");
        assert_eq!(ecc.status().step_bitflips[3], 1);

        // A flip right next to the marker, inside the interrupted data run
        page[2049] ^= 0x40;
        ecc.decode_page(&mut page).unwrap();
        assert_eq!(page, golden);
        assert_eq!(ecc.status().step_bitflips[3], 1);

        // And one in the lead part of the last sector's window
        page[1700] ^= 0x01;
        ecc.decode_page(&mut page).unwrap();
        assert_eq!(page, golden);
        assert_eq!(ecc.status().step_bitflips[3], 1);
    }

    #[test]
    fn marker_byte_is_outside_the_parity_window() {
        let mut ecc = SectorEcc::new(2048, 64, true).unwrap();
        let mut page: Vec<u8> = (0..2112u32).map(|i| (i * 17 + 9) as u8).collect();
        ecc.encode_page(&mut page).unwrap();
        let golden = page.clone();

        // A bad-block mark written straight onto the wire position
        page[2048] = 0x00;

        ecc.decode_page(&mut page).unwrap();
        assert_eq!(ecc.status().total_bitflips(), 0);
        assert_eq!(page[2048], 0x00, "the mark survives decoding");
        assert_eq!(&page[..2048], &golden[..2048]);
        assert_eq!(&page[2049..], &golden[2049..]);
    }
}
