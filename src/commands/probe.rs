//! `probe` command

use crate::cli::Cli;
use uflash_core::error::Result;
use uflash_flash::FlashHandle;
use uflash_nand::core::NandChip;

pub fn run(args: &Cli) -> Result<()> {
    let mut handle = super::open(args)?;

    println!("{}", handle.describe());

    match &mut handle {
        FlashHandle::Nor(nor) => {
            let info = nor.info()?;
            println!("  erase sizes: {:?}", info.erasesizes);
            for region in &info.regions {
                println!(
                    "  region {:#010x}+{:#x}: erase mask {:#06b}",
                    region.base, region.size, region.erasesizes_mask
                );
            }
            if let Ok(uid) = nor.read_uid() {
                let hex: Vec<String> = uid.iter().map(|b| format!("{:02X}", b)).collect();
                println!("  unique id: {}", hex.join(" "));
            }
            if let Ok(regions) = nor.wp_region_list() {
                println!("  write-protect ranges: {}", regions.len());
            }

            // Register-field reflection from the database entry
            let env = super::environment(args);
            if let Ok(db) = env.load_nor_db() {
                if let Some(entry) = db.lookup(nor.id()) {
                    for reg in &entry.regs {
                        println!("  {} ({}):", reg.name, reg.desc);
                        for field in &reg.fields {
                            println!(
                                "    bit {:2} {:6} {}",
                                field.shift, field.name, field.desc
                            );
                        }
                    }
                }
            }
        }
        FlashHandle::Nand(dev) => {
            let info = dev.nand.info();
            println!(
                "  geometry: {} blocks x {} pages x ({}+{})",
                info.memorg.blocks_per_lun * info.memorg.luns_per_cs * info.memorg.num_chips,
                info.memorg.pages_per_block,
                info.memorg.page_size,
                info.memorg.oob_size
            );
            println!(
                "  ECC: {} bits per {}-byte step",
                info.ecc_config.strength_per_step, info.ecc_config.step_size
            );
            if let Ok(uid) = dev.nand.read_uid() {
                let hex: Vec<String> = uid.iter().map(|b| format!("{:02X}", b)).collect();
                println!("  unique id: {}", hex.join(" "));
            }
        }
    }

    Ok(())
}
