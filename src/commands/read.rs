//! `read` command

use crate::cli::{Cli, ReadArgs};
use uflash_core::error::{Error, Result};

pub fn run(args: &Cli, read: &ReadArgs) -> Result<()> {
    let mut handle = super::open(args)?;

    let size = handle.size();
    let len = read.len.unwrap_or(size.saturating_sub(read.addr));
    if read.addr + len > size {
        return Err(Error::AddressOutOfRange);
    }

    let mut buf = vec![0u8; len as usize];
    let bar = super::progress_bar(len, "reading");
    handle.read(read.addr, &mut buf, &mut |done, _| bar.set_position(done))?;
    bar.finish();

    std::fs::write(&read.output, &buf).map_err(|e| Error::File(e.to_string()))?;
    log::info!("wrote {} bytes to {}", len, read.output.display());

    Ok(())
}
