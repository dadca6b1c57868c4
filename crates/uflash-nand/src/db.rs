//! SPI-NAND device database
//!
//! Same JSON model as the NOR side: vendors with part lists under `device/`,
//! longest ID prefix wins, an ext-id file merges on top.

use crate::core::{EccStatusType, NandFlags, NandPart, DFL_UID_LEN, DFL_UID_REPEATS};
use crate::ecc::EccConfig;
use crate::memorg::Memorg;
use serde::Deserialize;
use uflash_core::db::Environment;
use uflash_core::error::{Error, Result};
use uflash_core::id::FlashId;
use uflash_core::spi::{IoCaps, IoType};

#[derive(Debug, Deserialize)]
struct NandDbFile {
    vendors: Vec<NandVendorJson>,
}

#[derive(Debug, Deserialize)]
struct NandVendorJson {
    #[allow(dead_code)]
    id: String,
    name: String,
    parts: Vec<NandPartJson>,
}

#[derive(Debug, Deserialize)]
struct EccReqJson {
    step_size: u16,
    strength_per_step: u16,
}

#[derive(Debug, Deserialize)]
struct NandPartJson {
    model: String,
    ids: Vec<Vec<u8>>,
    memorg: Memorg,
    ecc_req: EccReqJson,
    #[serde(default)]
    rd_caps: Vec<String>,
    #[serde(default)]
    pl_caps: Vec<String>,
    #[serde(default)]
    max_speed: Option<u32>,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    ecc_status: Option<EccStatusType>,
    #[serde(default)]
    otp_pages: Option<u32>,
    #[serde(default)]
    uid_len: Option<u32>,
    #[serde(default)]
    uid_repeats: Option<u32>,
}

fn io_caps(names: &[String]) -> Result<IoCaps> {
    let mut caps = IoCaps::empty();
    for n in names {
        let io = IoType::from_name(n)
            .ok_or_else(|| Error::Json(format!("unknown io type '{}'", n)))?;
        caps |= io.cap();
    }
    Ok(caps)
}

fn nand_flags(names: &[String]) -> Result<NandFlags> {
    let mut flags = NandFlags::empty();
    for n in names {
        flags |= match n.as_str() {
            "has-qe" => NandFlags::HAS_QE,
            "no-on-die-ecc" => NandFlags::NO_ON_DIE_ECC,
            "has-uid" => NandFlags::HAS_UID,
            other => return Err(Error::Json(format!("unknown part flag '{}'", other))),
        };
    }
    Ok(flags)
}

/// The SPI-NAND device database
#[derive(Debug, Clone, Default)]
pub struct NandDatabase {
    entries: Vec<NandPart>,
}

impl NandDatabase {
    /// Parse a JSON document and merge its vendors
    pub fn merge_json(&mut self, text: &str) -> Result<()> {
        let file: NandDbFile =
            serde_json::from_str(text).map_err(|e| Error::Json(e.to_string()))?;

        for vendor in file.vendors {
            for pj in vendor.parts {
                for id in &pj.ids {
                    self.entries.push(NandPart {
                        model: pj.model.clone(),
                        vendor: vendor.name.clone(),
                        id: FlashId::new(id),
                        memorg: pj.memorg,
                        ecc_req: EccConfig {
                            step_size: pj.ecc_req.step_size,
                            strength_per_step: pj.ecc_req.strength_per_step,
                        },
                        rd_caps: if pj.rd_caps.is_empty() {
                            IoCaps::SINGLE
                        } else {
                            io_caps(&pj.rd_caps)?
                        },
                        pl_caps: if pj.pl_caps.is_empty() {
                            IoCaps::SINGLE
                        } else {
                            io_caps(&pj.pl_caps)?
                        },
                        max_speed: pj.max_speed.unwrap_or(0),
                        flags: nand_flags(&pj.flags)?,
                        ecc_status: pj.ecc_status.unwrap_or_default(),
                        otp_pages: pj.otp_pages.unwrap_or(0),
                        uid_len: pj.uid_len.unwrap_or(DFL_UID_LEN),
                        uid_repeats: pj.uid_repeats.unwrap_or(DFL_UID_REPEATS),
                    });
                }
            }
        }

        Ok(())
    }

    /// All entries
    pub fn entries(&self) -> &[NandPart] {
        &self.entries
    }

    /// Add a pre-built entry (tests, ext tooling)
    pub fn push(&mut self, part: NandPart) {
        self.entries.push(part);
    }

    /// Longest-prefix ID match
    pub fn lookup(&self, id: &FlashId) -> Option<&NandPart> {
        self.entries
            .iter()
            .filter(|p| p.id.matches(id))
            .max_by_key(|p| p.id.len)
    }

    /// List parts, optionally filtered by vendor name and model substring
    pub fn list(&self, vendor: Option<&str>, matching: Option<&str>) -> Vec<&NandPart> {
        self.entries
            .iter()
            .filter(|p| {
                vendor
                    .map(|v| p.vendor.eq_ignore_ascii_case(v))
                    .unwrap_or(true)
            })
            .filter(|p| {
                matching
                    .map(|m| p.model.to_lowercase().contains(&m.to_lowercase()))
                    .unwrap_or(true)
            })
            .collect()
    }
}

/// Load the SPI-NAND database from an environment's data directories
pub fn load_nand_db(env: &Environment) -> Result<NandDatabase> {
    let mut db = NandDatabase::default();
    let mut found = false;

    for dir in &env.data_dirs {
        for name in ["spi-nand.json", "spi-nand-ext.json"] {
            let path = dir.join(name);
            let Ok(text) = std::fs::read_to_string(&path) else {
                continue;
            };
            if name == "spi-nand.json" && found {
                continue;
            }
            db.merge_json(&text)
                .map_err(|e| Error::Json(format!("{}: {}", path.display(), e)))?;
            if name == "spi-nand.json" {
                found = true;
            }
        }
    }

    if !found {
        return Err(Error::File("spi-nand.json not found".into()));
    }

    Ok(db)
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
              "model": "W25N01GV",
              "ids": [[239, 170, 33]],
              "memorg": {
                "blocks_per_lun": 1024,
                "pages_per_block": 64,
                "page_size": 2048,
                "oob_size": 64
              },
              "ecc_req": { "step_size": 512, "strength_per_step": 1 },
              "rd_caps": ["1-1-1", "1-1-2", "1-2-2", "1-1-4", "1-4-4"],
              "pl_caps": ["1-1-1", "1-1-4"],
              "flags": ["has-qe", "has-uid"]
            }
          ]
        }
      ]
    }"#;

    #[test]
    fn lookup_and_fields() {
        let mut db = NandDatabase::default();
        db.merge_json(SAMPLE).unwrap();

        let part = db.lookup(&FlashId::new(&[0xEF, 0xAA, 0x21, 0x00])).unwrap();
        assert_eq!(part.model, "W25N01GV");
        assert_eq!(part.memorg.total_size(), 128 << 20);
        assert!(part.rd_caps.supports(IoType::Io1_4_4));
        assert!(part.flags.contains(NandFlags::HAS_QE));
        assert_eq!(part.ecc_status, EccStatusType::Bits2);
        assert_eq!(part.uid_len, DFL_UID_LEN);

        assert!(db.lookup(&FlashId::new(&[0xC8, 0xD1])).is_none());
    }
}
