//! `verify` command

use crate::cli::{Cli, VerifyArgs};
use uflash_core::error::{Error, Result};

pub fn run(args: &Cli, verify: &VerifyArgs) -> Result<()> {
    let expected = std::fs::read(&verify.input).map_err(|e| Error::File(e.to_string()))?;

    let mut handle = super::open(args)?;
    if verify.addr + expected.len() as u64 > handle.size() {
        return Err(Error::AddressOutOfRange);
    }

    let bar = super::progress_bar(expected.len() as u64, "verifying");
    handle.verify(verify.addr, &expected, &mut |done, _| bar.set_position(done))?;
    bar.finish();

    println!("verification passed");
    Ok(())
}
