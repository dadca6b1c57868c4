//! SFDP parsing
//!
//! Pulls the Serial Flash Discoverable Parameters tables from the chip and
//! derives read/program opcodes, erase flavors and timing, addressing-mode
//! transitions, QE/QPI flavors and soft-reset capabilities.
//!
//! The blob is kept as raw little-endian DWORDs and accessed through
//! [`Sfdp::dw`]; no language-level bitfields anywhere near the wire format.

use super::core::SpiNor;
use super::erase::EraseRegion;
use super::part::{
    A4bDisType, A4bEnType, EraseEntry, EraseInfo, IoOpcode, NorPart, QeType, QpiDisType,
    QpiEnType, SoftResetFlags,
};
use crate::controller::SpiController;
use crate::error::{Error, Result};
use crate::spi::{opcodes, IoType, MemData, MemDataPhase, SpiMemOp};

/// "SFDP" little-endian
pub const SFDP_SIGNATURE: u32 = 0x5044_4653;

/// Parameter IDs as (id_msb, id_lsb)
pub const PARAM_ID_BFPT: (u8, u8) = (0xFF, 0x00);
/// Sector Map Parameter Table
pub const PARAM_ID_SMPT: (u8, u8) = (0xFF, 0x81);
/// 4-Byte Addressing Instruction Table
pub const PARAM_ID_4BAIT: (u8, u8) = (0xFF, 0x84);

/// One located parameter table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableRef {
    /// Byte offset of the table inside the blob
    pub offset: usize,
    /// Table length in DWORDs
    pub ndwords: u32,
    /// Table revision
    pub major: u8,
    /// Table revision
    pub minor: u8,
}

/// A fetched-and-indexed SFDP blob
#[derive(Debug, Clone, Default)]
pub struct Sfdp {
    /// The raw bytes, from offset 0 up to the end of the furthest table
    pub data: Vec<u8>,
    /// Basic Flash Parameter Table
    pub bfpt: Option<TableRef>,
    /// 4-Byte Addressing Instruction Table
    pub a4bait: Option<TableRef>,
    /// Sector Map Parameter Table
    pub smpt: Option<TableRef>,
    /// First vendor table, with its (id_msb, id_lsb)
    pub vendor: Option<(u8, u8, TableRef)>,
}

impl Sfdp {
    /// 1-based little-endian DWORD access into a table
    pub fn dw(&self, table: &TableRef, idx: u32) -> u32 {
        let ofs = table.offset + (idx as usize - 1) * 4;
        u32::from_le_bytes(self.data[ofs..ofs + 4].try_into().unwrap())
    }

    /// Index a complete blob: verify the signature, walk the parameter
    /// headers, remember the tables the core cares about.
    pub fn parse(data: Vec<u8>) -> Result<Sfdp> {
        if data.len() < 8 {
            return Err(Error::PartNotRecognised);
        }

        let sig = u32::from_le_bytes(data[0..4].try_into().unwrap());
        if sig != SFDP_SIGNATURE {
            return Err(Error::PartNotRecognised);
        }

        let nph = data[6] as usize + 1;
        let mut sfdp = Sfdp {
            data,
            ..Default::default()
        };

        for i in 0..nph {
            let hofs = 8 + i * 8;
            if hofs + 8 > sfdp.data.len() {
                log::warn!("SFDP header {} truncated", i);
                break;
            }

            let h = &sfdp.data[hofs..hofs + 8];
            let id_lsb = h[0];
            let minor = h[1];
            let major = h[2];
            let ndwords = h[3] as u32;
            let ptr = u32::from_le_bytes([h[4], h[5], h[6], 0]) as usize;
            let id_msb = h[7];

            if ptr + ndwords as usize * 4 > sfdp.data.len() {
                log::warn!(
                    "SFDP table {:02X}{:02X} points outside the blob",
                    id_msb,
                    id_lsb
                );
                continue;
            }

            let table = TableRef {
                offset: ptr,
                ndwords,
                major,
                minor,
            };

            match (id_msb, id_lsb) {
                PARAM_ID_BFPT => sfdp.bfpt = Some(table),
                PARAM_ID_SMPT => sfdp.smpt = Some(table),
                PARAM_ID_4BAIT => sfdp.a4bait = Some(table),
                (msb, lsb) if msb < 0xFF && sfdp.vendor.is_none() => {
                    sfdp.vendor = Some((msb, lsb, table))
                }
                _ => {}
            }
        }

        if sfdp.bfpt.is_none() {
            log::warn!("SFDP present but carries no BFPT");
        }

        Ok(sfdp)
    }
}

/// Extract one 16-bit fast-read descriptor half: (opcode, mode clocks,
/// dummy clocks). An all-zero or all-ones half means "not described".
fn read_half(half: u32) -> Option<(u8, u8, u8)> {
    let opcode = ((half >> 8) & 0xFF) as u8;
    if opcode == 0x00 || opcode == 0xFF {
        return None;
    }
    let nmode = ((half >> 5) & 0x7) as u8;
    let ndummy = (half & 0x1F) as u8;
    Some((opcode, nmode, ndummy))
}

fn set_read(part: &mut NorPart, io: IoType, half: u32) {
    if let Some((opcode, nmode, ndummy)) = read_half(half) {
        part.read_3b.set(
            io,
            IoOpcode {
                opcode,
                ndummy,
                nmode,
            },
        );
    }
}

/// Erase time units of BFPT DW10, in milliseconds
const ERASE_TIME_UNITS_MS: [u32; 4] = [1, 16, 128, 1000];

/// Fill a part from the BFPT (DW1..DW16 where present)
pub fn fill_bfpt(sfdp: &Sfdp, part: &mut NorPart) -> Result<()> {
    let Some(bfpt) = sfdp.bfpt else {
        return Err(Error::PartNotRecognised);
    };

    if bfpt.ndwords < 2 {
        return Err(Error::PartNotRecognised);
    }

    // DW2: density. bit31 set: size = 2^bits30..0; clear: size = bits30..0 + 1
    // (both in bits).
    let dw2 = sfdp.dw(&bfpt, 2);
    if dw2 & (1 << 31) != 0 {
        let n = dw2 & 0x7FFF_FFFF;
        if n < 3 || n >= 64 {
            return Err(Error::PartNotRecognised);
        }
        part.size = 1u64 << (n - 3);
    } else {
        part.size = ((dw2 as u64 & 0x7FFF_FFFF) + 1) / 8;
    }

    let dw1 = sfdp.dw(&bfpt, 1);

    // DW1 bits 18:17: address bytes. 00 = 3-byte only, 01 = 3 or 4, 10 = 4 only
    match (dw1 >> 17) & 0x3 {
        0b10 => {
            part.a4b_en = A4bEnType::Always;
            part.a4b_dis = A4bDisType::None;
        }
        0b01 => {
            if part.a4b_en == A4bEnType::None {
                part.a4b_en = A4bEnType::OpB7h;
                part.a4b_dis = A4bDisType::OpE9h;
            }
        }
        _ => {}
    }

    // Basic single read is always there; 0Bh with 8 dummy clocks
    part.read_3b.set(IoType::Io1_1_1, IoOpcode::with_dummy(opcodes::FAST_READ, 8));

    // DW1 support bits gate the descriptors in DW3/DW4
    if bfpt.ndwords >= 4 {
        let dw3 = sfdp.dw(&bfpt, 3);
        let dw4 = sfdp.dw(&bfpt, 4);

        if dw1 & (1 << 22) != 0 {
            set_read(part, IoType::Io1_1_4, dw3 >> 16);
        }
        if dw1 & (1 << 21) != 0 {
            set_read(part, IoType::Io1_4_4, dw3 & 0xFFFF);
        }
        if dw1 & (1 << 16) != 0 {
            set_read(part, IoType::Io1_1_2, dw4 & 0xFFFF);
        }
        if dw1 & (1 << 20) != 0 {
            set_read(part, IoType::Io1_2_2, dw4 >> 16);
        }
    }

    if bfpt.ndwords >= 7 {
        let dw5 = sfdp.dw(&bfpt, 5);
        if dw5 & (1 << 0) != 0 {
            set_read(part, IoType::Io2_2_2, sfdp.dw(&bfpt, 6) >> 16);
        }
        if dw5 & (1 << 4) != 0 {
            set_read(part, IoType::Io4_4_4, sfdp.dw(&bfpt, 7) >> 16);
        }
    }

    // DW8/DW9: up to four erase flavors
    if bfpt.ndwords >= 9 {
        let mut erase = EraseInfo::default();
        let dw8 = sfdp.dw(&bfpt, 8);
        let dw9 = sfdp.dw(&bfpt, 9);

        for (i, half) in [dw8 & 0xFFFF, dw8 >> 16, dw9 & 0xFFFF, dw9 >> 16]
            .into_iter()
            .enumerate()
        {
            let n = (half & 0xFF) as u32;
            let opcode = ((half >> 8) & 0xFF) as u8;
            if n == 0 || n >= 64 || opcode == 0x00 {
                continue;
            }
            erase.entries[i] = Some(EraseEntry {
                opcode,
                size: 1 << n,
                max_ms: super::part::DFL_ERASE_TIME_MS,
            });
        }

        // DW10: typical erase times with a shared worst-case factor
        if bfpt.ndwords >= 10 {
            let dw10 = sfdp.dw(&bfpt, 10);
            let mult = dw10 & 0xF;
            for (i, slot) in erase.entries.iter_mut().enumerate() {
                if let Some(e) = slot {
                    let desc = (dw10 >> (4 + i * 7)) & 0x7F;
                    let count = desc & 0x1F;
                    let units = ERASE_TIME_UNITS_MS[((desc >> 5) & 0x3) as usize];
                    let typ_ms = (count + 1) * units;
                    e.max_ms = 2 * (mult + 1) * typ_ms;
                }
            }
        }

        if !erase.is_empty() {
            part.erase_3b = erase;
        }
    }

    // DW11: page size and page-program worst-case time
    if bfpt.ndwords >= 11 {
        let dw11 = sfdp.dw(&bfpt, 11);
        let page_exp = (dw11 >> 4) & 0xF;
        if page_exp > 0 {
            part.page_size = 1 << page_exp;
        }

        let mult = dw11 & 0xF;
        let count = (dw11 >> 8) & 0x1F;
        let units_us = if dw11 & (1 << 13) != 0 { 64 } else { 8 };
        let typ_us = (count + 1) * units_us;
        let max_us = 2 * (mult + 1) * typ_us;
        part.max_pp_time_ms = max_us.div_ceil(1000).max(1);
    }

    // DW15: QE flavor and QPI sequences
    if bfpt.ndwords >= 15 {
        let dw15 = sfdp.dw(&bfpt, 15);

        part.qe_type = match (dw15 >> 20) & 0x7 {
            0 => QeType::DontCare,
            1 | 4 | 5 => QeType::Sr2Bit1WrSr1,
            2 => QeType::Sr1Bit6,
            3 => QeType::Sr2Bit7,
            6 => QeType::Sr2Bit1,
            _ => QeType::DontCare,
        };

        let en = (dw15 >> 4) & 0x1F;
        if en & (1 << 1) != 0 {
            part.qpi_en = QpiEnType::Op38h;
        } else if en & (1 << 0) != 0 {
            part.qpi_en = QpiEnType::QeOp38h;
        } else if en & (1 << 2) != 0 {
            part.qpi_en = QpiEnType::Op35h;
        }

        let dis = dw15 & 0xF;
        if dis & (1 << 0) != 0 {
            part.qpi_dis = QpiDisType::OpFfh;
        } else if dis & (1 << 1) != 0 {
            part.qpi_dis = QpiDisType::OpF5h;
        } else if dis & (1 << 3) != 0 {
            part.qpi_dis = QpiDisType::Op66h99h;
        }
    }

    // DW16: 3B<->4B transitions and soft-reset flavors
    if bfpt.ndwords >= 16 {
        let dw16 = sfdp.dw(&bfpt, 16);

        let en = (dw16 >> 24) & 0xFF;
        if part.a4b_en != A4bEnType::Always {
            if en & (1 << 0) != 0 {
                part.a4b_en = A4bEnType::OpB7h;
            } else if en & (1 << 1) != 0 {
                part.a4b_en = A4bEnType::WrenB7h;
            } else if en & (1 << 2) != 0 {
                part.a4b_en = A4bEnType::Ear;
            } else if en & (1 << 3) != 0 {
                part.a4b_en = A4bEnType::Bank;
            } else if en & (1 << 6) != 0 {
                part.a4b_en = A4bEnType::Always;
            }
        }

        let dis = (dw16 >> 14) & 0x3FF;
        if dis & (1 << 0) != 0 {
            part.a4b_dis = A4bDisType::OpE9h;
        } else if dis & (1 << 1) != 0 {
            part.a4b_dis = A4bDisType::WrenE9h;
        } else if dis & (1 << 2) != 0 {
            part.a4b_dis = A4bDisType::Ear;
        } else if dis & (1 << 3) != 0 {
            part.a4b_dis = A4bDisType::Bank;
        } else if dis & (1 << 6) != 0 {
            part.a4b_dis = A4bDisType::SoftReset;
        }

        let rst = (dw16 >> 8) & 0x3F;
        if rst & (1 << 0) != 0 {
            part.soft_reset |= SoftResetFlags::DRIVE_4IO_FH_8CLKS;
        }
        if rst & (1 << 1) != 0 {
            part.soft_reset |= SoftResetFlags::DRIVE_4IO_FH_10CLKS_4B;
        }
        if rst & (1 << 2) != 0 {
            part.soft_reset |= SoftResetFlags::DRIVE_4IO_FH_16CLKS;
        }
        if rst & (1 << 3) != 0 {
            part.soft_reset |= SoftResetFlags::OP_F0H;
        }
        if rst & (1 << 4) != 0 {
            part.soft_reset |= SoftResetFlags::OP_66H_99H;
        }
    }

    Ok(())
}

/// Fill 4-byte-address opcode tables from the 4BAIT table
pub fn fill_4bait(sfdp: &Sfdp, part: &mut NorPart) {
    let Some(t) = sfdp.a4bait else { return };
    if t.ndwords < 2 {
        return;
    }

    let dw1 = sfdp.dw(&t, 1);
    let dw2 = sfdp.dw(&t, 2);

    let reads: [(u32, IoType, u8); 6] = [
        (1 << 0, IoType::Io1_1_1, opcodes::READ_4B),
        (1 << 1, IoType::Io1_1_1, opcodes::FAST_READ_4B),
        (1 << 2, IoType::Io1_1_2, opcodes::READ_1_1_2_4B),
        (1 << 3, IoType::Io1_2_2, opcodes::READ_1_2_2_4B),
        (1 << 4, IoType::Io1_1_4, opcodes::READ_1_1_4_4B),
        (1 << 5, IoType::Io1_4_4, opcodes::READ_1_4_4_4B),
    ];

    for (bit, io, opcode) in reads {
        if dw1 & bit == 0 {
            continue;
        }
        // Dummies carry over from the 3-byte flavor of the same io type
        let Some(base) = part.read_3b.get(io) else {
            continue;
        };
        // Prefer the fast-read variant when both plain and fast are flagged
        if io == IoType::Io1_1_1 && opcode == opcodes::READ_4B && dw1 & (1 << 1) != 0 {
            continue;
        }
        part.read_4b.set(
            io,
            IoOpcode {
                opcode,
                ndummy: base.ndummy,
                nmode: base.nmode,
            },
        );
    }

    if dw1 & (1 << 6) != 0 {
        part.pp_4b.set(IoType::Io1_1_1, IoOpcode::new(opcodes::PP_4B));
    }
    if dw1 & (1 << 7) != 0 {
        part.pp_4b
            .set(IoType::Io1_1_4, IoOpcode::new(opcodes::PP_1_1_4_4B));
    }

    // DW2: 4-byte variants of the erase flavors where declared
    let mut erase_4b = EraseInfo::default();
    for i in 0..4 {
        if dw1 & (1 << (9 + i)) == 0 {
            continue;
        }
        let opcode = ((dw2 >> (8 * i)) & 0xFF) as u8;
        if opcode == 0x00 || opcode == 0xFF {
            continue;
        }
        if let Some(e3) = part.erase_3b.entries[i] {
            erase_4b.entries[i] = Some(EraseEntry { opcode, ..e3 });
        }
    }
    if !erase_4b.is_empty() {
        part.erase_4b = erase_4b;
    }

    if !part.read_4b.caps().is_empty() && part.a4b_en == A4bEnType::None {
        part.a4b_en = A4bEnType::Opcode4b;
    }
}

impl<C: SpiController> SpiNor<C> {
    /// Raw SFDP read at a bus width: 5Ah, 3-byte address, 8 dummy clocks
    /// (one dummy byte per wire).
    pub(crate) fn read_sfdp_raw(&mut self, bw: u8, addr: u32, buf: &mut [u8]) -> Result<()> {
        let granularity = self.bus.max_read_granularity();
        let mut offset = 0usize;

        while offset < buf.len() {
            let chunk = granularity.min(buf.len() - offset);
            let mut op = SpiMemOp::cmd_addr(opcodes::RDSFDP, bw, 3, (addr as usize + offset) as u64);
            op.dummy.len = bw;
            op.dummy.buswidth = bw;
            op.data = MemDataPhase {
                buswidth: bw,
                dtr: false,
                buf: MemData::In(&mut buf[offset..offset + chunk]),
            };

            let allowed = self.bus.mem_adjust_op_size(&op)?;
            drop(op);
            let chunk = chunk.min(allowed);

            let mut op = SpiMemOp::cmd_addr(opcodes::RDSFDP, bw, 3, (addr as usize + offset) as u64);
            op.dummy.len = bw;
            op.dummy.buswidth = bw;
            op.data = MemDataPhase {
                buswidth: bw,
                dtr: false,
                buf: MemData::In(&mut buf[offset..offset + chunk]),
            };
            self.bus.mem_exec_op(&mut op)?;
            offset += chunk;
        }

        Ok(())
    }

    /// Fetch and index the SFDP blob.
    ///
    /// Tries bus width 1 first; a chip currently sitting in DPI/QPI only
    /// answers on 2 or 4 wires, so those are tried next before giving up.
    pub(crate) fn fetch_sfdp(&mut self) -> Result<Sfdp> {
        let mut found_bw = None;

        for bw in [1u8, 2, 4] {
            if bw > 1 && !self.bus.mem_supports_op(&SpiMemOp::cmd(opcodes::RDSFDP, bw)) {
                continue;
            }

            let mut hdr = [0u8; 8];
            if self.read_sfdp_raw(bw, 0, &mut hdr).is_err() {
                continue;
            }

            let sig = u32::from_le_bytes(hdr[0..4].try_into().unwrap());
            if sig == SFDP_SIGNATURE {
                found_bw = Some((bw, hdr));
                break;
            }

            log::debug!("no SFDP signature at bus width {}", bw);
        }

        let Some((bw, hdr)) = found_bw else {
            return Err(Error::PartNotRecognised);
        };

        if bw > 1 {
            log::info!("SFDP answered at bus width {}; chip is in a multi-I/O mode", bw);
        }

        let nph = hdr[6] as usize + 1;
        let mut headers = vec![0u8; nph * 8];
        self.read_sfdp_raw(bw, 8, &mut headers)?;

        // The blob covers the union of every pointed range
        let mut end = 8 + nph * 8;
        for i in 0..nph {
            let h = &headers[i * 8..i * 8 + 8];
            let ndwords = h[3] as usize;
            let ptr = u32::from_le_bytes([h[4], h[5], h[6], 0]) as usize;
            end = end.max(ptr + ndwords * 4);
        }

        let mut data = vec![0u8; end];
        self.read_sfdp_raw(bw, 0, &mut data)?;

        let sfdp = Sfdp::parse(data)?;
        log::debug!(
            "SFDP: {} bytes, BFPT {}, SMPT {}, 4BAIT {}",
            sfdp.data.len(),
            sfdp.bfpt.is_some(),
            sfdp.smpt.is_some(),
            sfdp.a4bait.is_some()
        );

        Ok(sfdp)
    }

    /// Evaluate the SMPT detection sequence and build the erase-region list.
    ///
    /// Detection reads use `state.naddr` when the descriptor declares a
    /// variable address width; during probe that is the database default.
    pub(crate) fn parse_smpt(&mut self) -> Result<Option<Vec<EraseRegion>>> {
        let Some(sfdp) = self.sfdp.clone() else {
            return Ok(None);
        };
        let Some(smpt) = sfdp.smpt else {
            return Ok(None);
        };

        let part_size = self.part().map(|p| p.size).unwrap_or(0);

        let mut i = 1u32;
        let mut map_id = 0u32;

        // Detection descriptors come first, two DWORDs each, until a
        // descriptor with the map bit set.
        while i <= smpt.ndwords {
            let dw = sfdp.dw(&smpt, i);
            if dw & (1 << 1) != 0 {
                break;
            }
            if i + 1 > smpt.ndwords {
                return Err(Error::PartNotRecognised);
            }

            let mask = ((dw >> 24) & 0xFF) as u8;
            let opcode = ((dw >> 8) & 0xFF) as u8;
            let ndummy_clocks = ((dw >> 16) & 0x3F) as u8;
            let naddr = match (dw >> 22) & 0x3 {
                0 => 0u8,
                1 => 3,
                2 => 4,
                _ => self.state.naddr,
            };
            let addr = sfdp.dw(&smpt, i + 1) as u64;

            let mut byte = [0u8; 1];
            let mut op = SpiMemOp::cmd_addr(opcode, 1, naddr, addr);
            op.dummy.len = ndummy_clocks / 8;
            op.dummy.buswidth = 1;
            op.data = MemDataPhase {
                buswidth: 1,
                dtr: false,
                buf: MemData::In(&mut byte),
            };
            self.bus.mem_exec_op(&mut op)?;
            drop(op);

            map_id = (map_id << 1) | u32::from(byte[0] & mask != 0);
            i += 2;
        }

        // Configuration maps follow; pick the one selected by the read-back
        // bits.
        while i <= smpt.ndwords {
            let dw = sfdp.dw(&smpt, i);
            let this_id = (dw >> 8) & 0xFF;
            let region_count = ((dw >> 16) & 0xFF) + 1;
            let is_last = dw & (1 << 0) != 0;

            if this_id != map_id {
                if is_last {
                    break;
                }
                i += region_count + 1;
                continue;
            }

            let mut regions = Vec::with_capacity(region_count as usize);
            let mut base = 0u64;

            for r in 0..region_count {
                let rdw = sfdp.dw(&smpt, i + 1 + r);
                let size = (((rdw >> 8) as u64 & 0xFF_FFFF) + 1) * 256;
                let mask = (rdw & 0xF) as u8;

                let mut region = EraseRegion {
                    base,
                    size,
                    erasesizes_mask: mask,
                    min_erasesize: 0,
                    max_erasesize: 0,
                };
                if let Some(part) = self.part() {
                    region.fill_min_max(&part.erase_3b);
                }
                regions.push(region);
                base += size;
            }

            if part_size != 0 && base != part_size {
                log::warn!(
                    "SMPT regions sum to {:#x}, chip size is {:#x}",
                    base,
                    part_size
                );
                return Err(Error::PartNotRecognised);
            }

            return Ok(Some(regions));
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hand-assembled SFDP blob: header + BFPT (16 DWORDs) for a 16 MiB part
    /// with 1-1-4/1-4-4 reads and three erase flavors.
    pub(crate) fn test_blob_16mib() -> Vec<u8> {
        let mut blob = vec![0u8; 0x30 + 16 * 4];

        blob[0..4].copy_from_slice(&SFDP_SIGNATURE.to_le_bytes());
        blob[4] = 0x06; // minor
        blob[5] = 0x01; // major
        blob[6] = 0x00; // nph = 1 header

        // BFPT header: id_lsb, minor, major, len, ptr[3], id_msb
        blob[8] = 0x00;
        blob[9] = 0x06;
        blob[10] = 0x01;
        blob[11] = 16;
        blob[12..15].copy_from_slice(&[0x30, 0x00, 0x00]);
        blob[15] = 0xFF;

        let mut dw = [0u32; 16];
        // DW1: 4K erase 20h, 3-or-4-byte addressing, 1-1-4 + 1-4-4 + 1-1-2
        dw[0] = 0x01 | (0x20 << 8) | (0b01 << 17) | (1 << 16) | (1 << 21) | (1 << 22);
        // DW2: density = 2^27 bits = 16 MiB
        dw[1] = (1 << 31) | 27;
        // DW3: 1-1-4 = 6Bh, 8 dummy clocks (high half); 1-4-4 = EBh, 4 dummies
        // + 2 mode clocks (low half)
        dw[2] = ((0x6B << 8 | 8) << 16) | (0xEB << 8 | (2 << 5) | 4);
        // DW4: 1-1-2 = 3Bh with 8 dummy clocks (low half)
        dw[3] = 0x3B << 8 | 8;
        // DW8: 4K/20h + 32K/52h, DW9: 64K/D8h
        dw[7] = (12) | (0x20 << 8) | ((15) << 16) | (0x52 << 24);
        dw[8] = (16) | (0xD8 << 8);
        // DW10: mult=1, types 1..3 typical 16ms-ish
        dw[9] = 1 | (0x25 << 4) | (0x25 << 11) | (0x2A << 18);
        // DW11: pp mult=2, page 2^8=256, pp typ (7+1)*64us
        dw[10] = 2 | (8 << 4) | (7 << 8) | (1 << 13);
        // DW15: QE = SR2 bit1 via WRSR1 (001), QPI en 38h, dis FFh
        dw[14] = (1 << 20) | (1 << 5) | (1 << 0);
        // DW16: enter B7h, exit E9h, soft reset 66h+99h
        dw[15] = (1 << 24) | (1 << 14) | (1 << 12);

        for (i, d) in dw.iter().enumerate() {
            blob[0x30 + i * 4..0x30 + i * 4 + 4].copy_from_slice(&d.to_le_bytes());
        }

        blob
    }

    #[test]
    fn parse_locates_bfpt() {
        let sfdp = Sfdp::parse(test_blob_16mib()).unwrap();
        let bfpt = sfdp.bfpt.unwrap();
        assert_eq!(bfpt.ndwords, 16);
        assert_eq!(bfpt.offset, 0x30);
        assert_eq!(sfdp.dw(&bfpt, 2), (1 << 31) | 27);
    }

    #[test]
    fn rejects_bad_signature() {
        let mut blob = test_blob_16mib();
        blob[0] = b'X';
        assert!(Sfdp::parse(blob).is_err());
    }

    #[test]
    fn bfpt_fill_derives_size_reads_erases() {
        let sfdp = Sfdp::parse(test_blob_16mib()).unwrap();
        let mut part = NorPart::blank();
        fill_bfpt(&sfdp, &mut part).unwrap();

        assert_eq!(part.size, 16 << 20);
        assert_eq!(part.page_size, 256);

        let r = part.read_3b.get(IoType::Io1_1_4).unwrap();
        assert_eq!((r.opcode, r.ndummy, r.nmode), (0x6B, 8, 0));
        let r = part.read_3b.get(IoType::Io1_4_4).unwrap();
        assert_eq!((r.opcode, r.ndummy, r.nmode), (0xEB, 4, 2));
        let r = part.read_3b.get(IoType::Io1_1_2).unwrap();
        assert_eq!(r.opcode, 0x3B);

        let sizes: Vec<u32> = part.erase_3b.iter().map(|e| e.size).collect();
        assert_eq!(sizes, vec![4096, 32768, 65536]);
        // DW10 worst case factor: 2*(mult+1) with mult=1
        let e = part.erase_3b.entry_for_size(4096).unwrap();
        assert_eq!(e.max_ms, 2 * 2 * (5 + 1) * 16);

        assert_eq!(part.qe_type, QeType::Sr2Bit1WrSr1);
        assert_eq!(part.qpi_en, QpiEnType::Op38h);
        assert_eq!(part.qpi_dis, QpiDisType::OpFfh);
        assert_eq!(part.a4b_en, A4bEnType::OpB7h);
        assert_eq!(part.a4b_dis, A4bDisType::OpE9h);
        assert!(part.soft_reset.contains(SoftResetFlags::OP_66H_99H));

        // DW11: 2*(2+1) * 8*64us = 3072us -> 4ms
        assert_eq!(part.max_pp_time_ms, 4);
    }

    #[test]
    fn density_bit31_clear_is_bit_count() {
        let mut blob = test_blob_16mib();
        // 64 Mibit - 1 => 8 MiB
        let dw2 = (64u32 * 1024 * 1024 - 1).to_le_bytes();
        blob[0x34..0x38].copy_from_slice(&dw2);
        let sfdp = Sfdp::parse(blob).unwrap();
        let mut part = NorPart::blank();
        fill_bfpt(&sfdp, &mut part).unwrap();
        assert_eq!(part.size, 8 << 20);
    }

    #[test]
    fn density_bit31_decodes_large_sizes() {
        let mut blob = test_blob_16mib();
        // 2^32 bits = 512 MiB
        let dw2 = ((1u32 << 31) | 32).to_le_bytes();
        blob[0x34..0x38].copy_from_slice(&dw2);
        let sfdp = Sfdp::parse(blob).unwrap();
        let mut part = NorPart::blank();
        fill_bfpt(&sfdp, &mut part).unwrap();
        assert_eq!(part.size, 512 << 20);
    }
}
