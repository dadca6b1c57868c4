//! `nand` command: bad-block and OTP-window maintenance

use crate::cli::{Cli, NandArgs, NandOp};
use uflash_core::error::{Error, Result};
use uflash_nand::bbt::{Bbt, BbtState};
use uflash_nand::core::NandChip;

pub fn run(args: &Cli, nand_args: &NandArgs) -> Result<()> {
    let mut handle = super::open(args)?;
    let dev = handle.as_nand()?;

    match &nand_args.op {
        NandOp::BbtScan => {
            dev.bbt.reprobe(&mut dev.nand)?;
            let blocks = dev.nand.maux().block_count;
            let mut bad = 0u32;
            for block in 0..blocks {
                if dev.bbt.get_state(block)? == BbtState::Bad {
                    let addr = (block as u64) << dev.nand.maux().block_shift;
                    println!("bad block {:5} at {:#010x}", block, addr);
                    bad += 1;
                }
            }
            println!("{} bad of {} blocks", bad, blocks);
        }
        NandOp::Markbad { block } => {
            dev.nand.mark_bad_block(*block)?;
            dev.bbt.set_state(*block, BbtState::Bad)?;
            println!("block {} marked bad", block);
        }
        NandOp::Torture { block } => {
            dev.nand.torture_block(*block)?;
            println!("block {} passed", block);
        }
        NandOp::Uid => {
            let uid = dev.nand.read_uid()?;
            let hex: Vec<String> = uid.iter().map(|b| format!("{:02X}", b)).collect();
            println!("{}", hex.join(" "));
        }
        NandOp::Dump {
            page,
            count,
            output,
            ignore_ecc,
        } => {
            let oob_page = dev.nand.maux().oob_page_size as usize;
            let mut buf = vec![0u8; oob_page * *count as usize];
            let done = handle.read_raw_pages(*page, *count, &mut buf, *ignore_ecc)?;
            std::fs::write(output, &buf[..done as usize * oob_page])
                .map_err(|e| Error::File(e.to_string()))?;
            println!("dumped {} raw pages to {}", done, output.display());
        }
    }

    Ok(())
}
