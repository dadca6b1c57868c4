//! `wp` command

use crate::cli::{Cli, WpArgs, WpOp};
use uflash_core::error::Result;
use uflash_core::nor::part::WpRange;

pub fn run(args: &Cli, wp: &WpArgs) -> Result<()> {
    let mut handle = super::open(args)?;
    let nor = handle.as_nor()?;

    match wp.op {
        WpOp::List => {
            for (i, r) in nor.wp_region_list()?.iter().enumerate() {
                if r.size == 0 {
                    println!("  {:2}: none", i);
                } else {
                    println!("  {:2}: {:#010x} + {:#x}", i, r.base, r.size);
                }
            }
        }
        WpOp::Get => {
            let r = nor.get_wp_region()?;
            if r.size == 0 {
                println!("no range protected");
            } else {
                println!("protected: {:#010x} + {:#x}", r.base, r.size);
            }
        }
        WpOp::Set { base, size } => {
            nor.set_wp_region(&WpRange { base, size })?;
            println!("protected: {:#010x} + {:#x}", base, size);
        }
    }

    Ok(())
}
