//! `otp` command

use crate::cli::{Cli, OtpArgs, OtpOp};
use uflash_core::error::{Error, Result};

pub fn run(args: &Cli, otp: &OtpArgs) -> Result<()> {
    let mut handle = super::open(args)?;
    let nor = handle.as_nor()?;

    match &otp.op {
        OtpOp::Info => {
            let info = nor
                .part()
                .and_then(|p| p.otp)
                .ok_or(Error::Unsupported)?;
            println!(
                "OTP: {} regions of {} bytes, indices {}..{}",
                info.count,
                info.size,
                info.start_index,
                info.start_index + info.count - 1
            );
            for idx in info.start_index..info.start_index + info.count {
                let locked = nor.otp_locked(idx)?;
                println!("  region {}: {}", idx, if locked { "locked" } else { "open" });
            }
        }
        OtpOp::Read { index, output } => {
            let info = nor
                .part()
                .and_then(|p| p.otp)
                .ok_or(Error::Unsupported)?;
            let mut buf = vec![0u8; info.size as usize];
            nor.otp_read(*index, 0, &mut buf)?;
            std::fs::write(output, &buf).map_err(|e| Error::File(e.to_string()))?;
            println!("read region {} to {}", index, output.display());
        }
        OtpOp::Write { index, input } => {
            let data = std::fs::read(input).map_err(|e| Error::File(e.to_string()))?;
            nor.otp_write(*index, 0, &data)?;
            println!("programmed {} bytes into region {}", data.len(), index);
        }
        OtpOp::Lock { index, yes } => {
            if !yes {
                return Err(Error::InvalidParameter(
                    "OTP lock is irreversible; pass --yes to confirm",
                ));
            }
            nor.otp_lock(*index)?;
            println!("region {} locked", index);
        }
    }

    Ok(())
}
