//! JSON device database
//!
//! Per-part metadata lives in JSON files under one or more `device`
//! directories: `spi-nor.json` ships with the tool, `spi-nor-ext.json` lets
//! users add parts without rebuilding. Entries are grouped by vendor and
//! matched by ID prefix, longest prefix winning.

use crate::error::{Error, Result};
use crate::id::FlashId;
use crate::nor::part::*;
use crate::nor::regs::{RegAccess, CR_ACC, SRCR_ACC, SR3_ACC, SR_ACC};
use crate::spi::IoType;
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default database directories: the working directory's `device`, then the
/// one next to the executable
static DEFAULT_DATA_DIRS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    let mut dirs = vec![PathBuf::from("device")];
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            dirs.push(dir.join("device"));
        }
    }
    dirs
});

/// Where the process looks for data files. The original's process-global
/// directory registry, recast as an explicit value handed to constructors.
#[derive(Debug, Clone)]
pub struct Environment {
    /// Database directories, searched in order
    pub data_dirs: Vec<PathBuf>,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            data_dirs: DEFAULT_DATA_DIRS.clone(),
        }
    }
}

impl Environment {
    /// An environment rooted at explicit directories
    pub fn with_dirs(dirs: Vec<PathBuf>) -> Self {
        Self { data_dirs: dirs }
    }

    fn read_first(&self, name: &str) -> Option<(PathBuf, String)> {
        for dir in &self.data_dirs {
            let path = dir.join(name);
            if let Ok(text) = std::fs::read_to_string(&path) {
                return Some((path, text));
            }
        }
        None
    }

    /// Load the SPI-NOR database (base file plus optional ext-id file)
    pub fn load_nor_db(&self) -> Result<NorDatabase> {
        let mut db = NorDatabase::default();

        let Some((path, text)) = self.read_first("spi-nor.json") else {
            return Err(Error::File("spi-nor.json not found".into()));
        };
        db.merge_json(&text)
            .map_err(|e| Error::Json(format!("{}: {}", path.display(), e)))?;

        if let Some((path, text)) = self.read_first("spi-nor-ext.json") {
            db.merge_json(&text)
                .map_err(|e| Error::Json(format!("{}: {}", path.display(), e)))?;
        }

        Ok(db)
    }
}

/// Accept `170` or `"0xAA"` for opcode-ish numbers
fn hex_u32<'de, D: serde::Deserializer<'de>>(de: D) -> std::result::Result<u32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u32),
        Str(String),
    }

    match Raw::deserialize(de)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => {
            let t = s.trim().trim_start_matches("0x").trim_start_matches("0X");
            u32::from_str_radix(t, 16).map_err(serde::de::Error::custom)
        }
    }
}

fn hex_u8<'de, D: serde::Deserializer<'de>>(de: D) -> std::result::Result<u8, D::Error> {
    hex_u32(de)?
        .try_into()
        .map_err(|_| serde::de::Error::custom("value does not fit in a byte"))
}

#[derive(Debug, Deserialize)]
struct NorDbFile {
    vendors: Vec<NorVendorJson>,
}

#[derive(Debug, Deserialize)]
struct NorVendorJson {
    id: String,
    name: String,
    parts: Vec<NorPartJson>,
}

#[derive(Debug, Deserialize)]
struct IoOpcodeJson {
    io: String,
    #[serde(deserialize_with = "hex_u8")]
    opcode: u8,
    #[serde(default)]
    ndummy: u8,
    #[serde(default)]
    nmode: u8,
}

#[derive(Debug, Deserialize)]
struct EraseJson {
    #[serde(deserialize_with = "hex_u8")]
    opcode: u8,
    size: u32,
    #[serde(default)]
    max_ms: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WpJson {
    /// The classic BP0..2 + TB layout, generated from the block size
    Preset {
        preset: String,
        block_size: u64,
        #[serde(default)]
        shift: Option<u32>,
        #[serde(default)]
        mask: Option<u8>,
    },
    /// Fully spelled out
    Table {
        shift: u32,
        #[serde(deserialize_with = "hex_u8")]
        mask: u8,
        entries: Vec<WpEntry>,
    },
}

/// Register-field definition for UI reflection
#[derive(Debug, Clone, Deserialize)]
pub struct RegFieldDef {
    /// Field name (e.g. "QE")
    pub name: String,
    /// Human description
    pub desc: String,
    /// Bit position
    pub shift: u32,
    /// Field width in bits
    #[serde(default = "one")]
    pub width: u32,
}

fn one() -> u32 {
    1
}

/// Register definition for UI reflection
#[derive(Debug, Clone, Deserialize)]
pub struct RegDef {
    /// Register name (e.g. "SR2")
    pub name: String,
    /// Human description
    pub desc: String,
    /// Which access reaches it
    #[serde(default)]
    pub access: RegName,
    /// Fields within the register
    pub fields: Vec<RegFieldDef>,
}

/// Named well-known register accesses for the JSON side
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RegName {
    /// Status register
    #[default]
    Sr,
    /// Configuration register / SR2
    Cr,
    /// Status register 3
    Sr3,
    /// Joint SR+CR
    SrCr,
}

impl RegName {
    /// The access descriptor this name stands for
    pub fn access(self) -> RegAccess {
        match self {
            RegName::Sr => SR_ACC,
            RegName::Cr => CR_ACC,
            RegName::Sr3 => SR3_ACC,
            RegName::SrCr => SRCR_ACC,
        }
    }
}

#[derive(Debug, Deserialize)]
struct NorPartJson {
    model: String,
    ids: Vec<Vec<u8>>,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    ndies: Option<u32>,
    #[serde(default)]
    page_size: Option<u32>,
    #[serde(default)]
    max_speed: Option<u32>,
    #[serde(default)]
    max_pp_time_ms: Option<u32>,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default, deserialize_with = "opt_hex_u32")]
    vendor_flags: Option<u32>,
    #[serde(default)]
    read: Vec<IoOpcodeJson>,
    #[serde(default)]
    read_4b: Vec<IoOpcodeJson>,
    #[serde(default)]
    pp: Vec<IoOpcodeJson>,
    #[serde(default)]
    pp_4b: Vec<IoOpcodeJson>,
    #[serde(default)]
    erase: Vec<EraseJson>,
    #[serde(default)]
    erase_4b: Vec<EraseJson>,
    #[serde(default)]
    qe_type: Option<QeType>,
    #[serde(default)]
    qpi_en: Option<QpiEnType>,
    #[serde(default)]
    qpi_dis: Option<QpiDisType>,
    #[serde(default)]
    a4b_en: Option<A4bEnType>,
    #[serde(default)]
    a4b_dis: Option<A4bDisType>,
    #[serde(default)]
    soft_reset: Vec<String>,
    #[serde(default)]
    otp: Option<OtpInfo>,
    #[serde(default)]
    wp: Option<WpJson>,
    #[serde(default)]
    regs: Vec<RegDef>,
}

fn opt_hex_u32<'de, D: serde::Deserializer<'de>>(
    de: D,
) -> std::result::Result<Option<u32>, D::Error> {
    hex_u32(de).map(Some)
}

/// One resolved database entry
#[derive(Debug, Clone)]
pub struct NorDbEntry {
    /// Vendor identifier (e.g. "winbond")
    pub vendor_id: String,
    /// The part template
    pub part: NorPart,
    /// Register definitions for UI reflection
    pub regs: Vec<RegDef>,
}

/// The SPI-NOR device database (C12)
#[derive(Debug, Clone, Default)]
pub struct NorDatabase {
    entries: Vec<NorDbEntry>,
}

fn io_set(list: &[IoOpcodeJson]) -> Result<IoOpcodeSet> {
    let mut set = IoOpcodeSet::default();
    for item in list {
        let io = IoType::from_name(&item.io)
            .ok_or_else(|| Error::Json(format!("unknown io type '{}'", item.io)))?;
        set.set(
            io,
            IoOpcode {
                opcode: item.opcode,
                ndummy: item.ndummy,
                nmode: item.nmode,
            },
        );
    }
    Ok(set)
}

fn erase_info(list: &[EraseJson]) -> Result<EraseInfo> {
    let mut info = EraseInfo::default();
    for e in list {
        if !e.size.is_power_of_two() {
            return Err(Error::Json(format!("erase size {} not a power of two", e.size)));
        }
        info.add(EraseEntry {
            opcode: e.opcode,
            size: e.size,
            max_ms: e.max_ms.unwrap_or(DFL_ERASE_TIME_MS),
        });
    }
    Ok(info)
}

fn part_flags(names: &[String]) -> Result<NorFlags> {
    let mut flags = NorFlags::empty();
    for n in names {
        flags |= match n.as_str() {
            "no-sfdp" => NorFlags::NO_SFDP,
            "sfdp-4b-mode" => NorFlags::SFDP_4B_MODE,
            "sr-volatile" => NorFlags::SR_VOLATILE,
            "unique-id" => NorFlags::UNIQUE_ID,
            "always-4b" => NorFlags::ALWAYS_4B,
            other => return Err(Error::Json(format!("unknown part flag '{}'", other))),
        };
    }
    Ok(flags)
}

fn soft_reset_flags(names: &[String]) -> Result<SoftResetFlags> {
    let mut flags = SoftResetFlags::empty();
    for n in names {
        flags |= match n.as_str() {
            "drive-4io-fh-8clks" => SoftResetFlags::DRIVE_4IO_FH_8CLKS,
            "drive-4io-fh-10clks-4b" => SoftResetFlags::DRIVE_4IO_FH_10CLKS_4B,
            "drive-4io-fh-16clks" => SoftResetFlags::DRIVE_4IO_FH_16CLKS,
            "f0h" => SoftResetFlags::OP_F0H,
            "66h-99h" => SoftResetFlags::OP_66H_99H,
            other => return Err(Error::Json(format!("unknown soft-reset flag '{}'", other))),
        };
    }
    Ok(flags)
}

impl NorDatabase {
    /// Parse a JSON document and merge its vendors into the database
    pub fn merge_json(&mut self, text: &str) -> Result<()> {
        let file: NorDbFile =
            serde_json::from_str(text).map_err(|e| Error::Json(e.to_string()))?;

        for vendor in file.vendors {
            for pj in vendor.parts {
                for id in &pj.ids {
                    let mut part = NorPart::blank();
                    part.model = pj.model.clone();
                    part.vendor = vendor.name.clone();
                    part.id = FlashId::new(id);
                    part.size = pj.size;
                    part.ndies = pj.ndies.unwrap_or(1);
                    if let Some(ps) = pj.page_size {
                        part.page_size = ps;
                    }
                    part.max_speed = pj.max_speed.unwrap_or(0);
                    if let Some(t) = pj.max_pp_time_ms {
                        part.max_pp_time_ms = t;
                    }
                    part.flags = part_flags(&pj.flags)?;
                    part.vendor_flags = pj.vendor_flags.unwrap_or(0);

                    if !pj.read.is_empty() {
                        part.read_3b = io_set(&pj.read)?;
                    }
                    part.read_4b = io_set(&pj.read_4b)?;
                    if !pj.pp.is_empty() {
                        part.pp_3b = io_set(&pj.pp)?;
                    }
                    part.pp_4b = io_set(&pj.pp_4b)?;
                    part.erase_3b = erase_info(&pj.erase)?;
                    part.erase_4b = erase_info(&pj.erase_4b)?;

                    part.qe_type = pj.qe_type.unwrap_or_default();
                    part.qpi_en = pj.qpi_en.unwrap_or_default();
                    part.qpi_dis = pj.qpi_dis.unwrap_or_default();
                    part.a4b_en = pj.a4b_en.unwrap_or_default();
                    part.a4b_dis = pj.a4b_dis.unwrap_or_default();
                    part.soft_reset = soft_reset_flags(&pj.soft_reset)?;
                    part.otp = pj.otp;

                    part.wp = match &pj.wp {
                        None => None,
                        Some(WpJson::Table {
                            shift,
                            mask,
                            entries,
                        }) => Some(WpInfo {
                            shift: *shift,
                            mask: *mask,
                            entries: entries.clone(),
                        }),
                        Some(WpJson::Preset {
                            preset,
                            block_size,
                            shift,
                            mask,
                        }) => {
                            if preset != "bp3-tb" {
                                return Err(Error::Json(format!(
                                    "unknown wp preset '{}'",
                                    preset
                                )));
                            }
                            Some(WpInfo {
                                shift: shift.unwrap_or(2),
                                mask: mask.unwrap_or(0xF),
                                entries: crate::nor::wp::bp3_tb_ranges(pj.size, *block_size),
                            })
                        }
                    };

                    self.entries.push(NorDbEntry {
                        vendor_id: vendor.id.clone(),
                        part,
                        regs: pj.regs.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// All entries
    pub fn entries(&self) -> &[NorDbEntry] {
        &self.entries
    }

    /// Add a pre-built entry (tests, ext tooling)
    pub fn push(&mut self, entry: NorDbEntry) {
        self.entries.push(entry);
    }

    /// Longest-prefix ID match
    pub fn lookup(&self, id: &FlashId) -> Option<&NorDbEntry> {
        self.entries
            .iter()
            .filter(|e| e.part.id.matches(id))
            .max_by_key(|e| e.part.id.len)
    }

    /// List parts, optionally filtered by vendor id and name substring
    pub fn list(&self, vendor: Option<&str>, matching: Option<&str>) -> Vec<&NorDbEntry> {
        self.entries
            .iter()
            .filter(|e| vendor.map(|v| e.vendor_id == v).unwrap_or(true))
            .filter(|e| {
                matching
                    .map(|m| e.part.model.to_lowercase().contains(&m.to_lowercase()))
                    .unwrap_or(true)
            })
            .collect()
    }
}

/// Load a database from a bare directory path (convenience for tools)
pub fn load_nor_db_from(dir: &Path) -> Result<NorDatabase> {
    Environment::with_dirs(vec![dir.to_path_buf()]).load_nor_db()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
      "vendors": [
        {
          "id": "winbond",
          "name": "Winbond",
          "parts": [
            {
              "model": "W25Q128FV",
              "ids": [[239, 64, 24]],
              "size": 16777216,
              "page_size": 256,
              "erase": [
                { "opcode": "0x20", "size": 4096 },
                { "opcode": "0x52", "size": 32768 },
                { "opcode": "0xD8", "size": 65536 }
              ],
              "read": [
                { "io": "1-1-1", "opcode": "0x0B", "ndummy": 8 },
                { "io": "1-1-4", "opcode": "0x6B", "ndummy": 8 }
              ],
              "qe_type": "sr2-bit1-wr-sr1",
              "wp": { "preset": "bp3-tb", "block_size": 65536 }
            },
            {
              "model": "W25Q128FV-generic",
              "ids": [[239, 64]],
              "size": 16777216
            }
          ]
        }
      ]
    }"#;

    #[test]
    fn longest_prefix_wins() {
        let mut db = NorDatabase::default();
        db.merge_json(SAMPLE).unwrap();

        let probed = FlashId::new(&[0xEF, 0x40, 0x18]);
        let entry = db.lookup(&probed).unwrap();
        assert_eq!(entry.part.model, "W25Q128FV");

        let other = FlashId::new(&[0xEF, 0x40, 0x17]);
        let entry = db.lookup(&other).unwrap();
        assert_eq!(entry.part.model, "W25Q128FV-generic");

        assert!(db.lookup(&FlashId::new(&[0xC2, 0x20, 0x17])).is_none());
    }

    #[test]
    fn json_fields_reach_the_part() {
        let mut db = NorDatabase::default();
        db.merge_json(SAMPLE).unwrap();

        let entry = db.lookup(&FlashId::new(&[0xEF, 0x40, 0x18])).unwrap();
        let part = &entry.part;
        assert_eq!(part.size, 16 << 20);
        assert_eq!(part.erase_3b.iter().count(), 3);
        assert_eq!(part.read_3b.get(IoType::Io1_1_4).unwrap().opcode, 0x6B);
        assert_eq!(part.qe_type, QeType::Sr2Bit1WrSr1);
        let wp = part.wp.as_ref().unwrap();
        assert_eq!(wp.shift, 2);
        assert!(wp.entries.len() > 10);
    }

    #[test]
    fn bad_io_name_is_a_json_error() {
        let mut db = NorDatabase::default();
        let bad = SAMPLE.replace("1-1-4", "1-1-3");
        assert!(matches!(db.merge_json(&bad), Err(Error::Json(_))));
    }
}
