//! `write` command

use crate::cli::{Cli, WriteArgs};
use uflash_core::error::{Error, Result};

pub fn run(args: &Cli, write: &WriteArgs) -> Result<()> {
    let data = std::fs::read(&write.input).map_err(|e| Error::File(e.to_string()))?;

    let mut handle = super::open(args)?;
    if write.addr + data.len() as u64 > handle.size() {
        return Err(Error::AddressOutOfRange);
    }

    if !write.no_erase {
        let bar = super::progress_bar(data.len() as u64, "erasing");
        handle.erase(write.addr, data.len() as u64, &mut |done, _| {
            bar.set_position(done)
        })?;
        bar.finish();
    }

    let bar = super::progress_bar(data.len() as u64, "writing");
    handle.write(write.addr, &data, &mut |done, _| bar.set_position(done))?;
    bar.finish();

    if write.verify {
        let bar = super::progress_bar(data.len() as u64, "verifying");
        handle.verify(write.addr, &data, &mut |done, _| bar.set_position(done))?;
        bar.finish();
        log::info!("verification passed");
    }

    Ok(())
}
