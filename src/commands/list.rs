//! `list` command

use crate::cli::{Cli, ListArgs};
use uflash_core::error::Result;

pub fn run(args: &Cli, list: &ListArgs) -> Result<()> {
    println!("Programmers:");
    for (name, desc) in uflash_flash::list_programmers() {
        println!("  {:10} {}", name, desc);
    }

    if list.programmers {
        return Ok(());
    }

    let env = super::environment(args);

    if let Ok(db) = env.load_nor_db() {
        println!("\nSPI-NOR parts:");
        for entry in db.list(list.vendor.as_deref(), list.matching.as_deref()) {
            println!(
                "  {:12} {:<20} [{}] {} bytes",
                entry.part.vendor, entry.part.model, entry.part.id, entry.part.size
            );
        }
    }

    if let Ok(db) = uflash_nand::db::load_nand_db(&env) {
        println!("\nSPI-NAND parts:");
        for part in db.list(list.vendor.as_deref(), list.matching.as_deref()) {
            println!(
                "  {:12} {:<20} [{}] {} bytes",
                part.vendor,
                part.model,
                part.id,
                part.memorg.total_size()
            );
        }
    }

    Ok(())
}
