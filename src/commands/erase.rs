//! `erase` command

use crate::cli::{Cli, EraseArgs};
use uflash_core::error::{Error, Result};

pub fn run(args: &Cli, erase: &EraseArgs) -> Result<()> {
    let mut handle = super::open(args)?;

    let size = handle.size();
    let len = erase.len.unwrap_or(size.saturating_sub(erase.addr));
    if erase.addr + len > size {
        return Err(Error::AddressOutOfRange);
    }

    let bar = super::progress_bar(len, "erasing");
    handle.erase(erase.addr, len, &mut |done, _| bar.set_position(done))?;
    bar.finish();

    Ok(())
}
