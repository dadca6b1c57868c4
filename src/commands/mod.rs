//! Command dispatch and shared helpers

mod erase;
mod list;
mod nand;
mod otp;
mod probe;
mod read;
mod verify;
mod wp;
mod write;

use crate::cli::{Cli, Command, Kind};
use indicatif::{ProgressBar, ProgressStyle};
use uflash_core::db::Environment;
use uflash_core::error::Result;
use uflash_flash::{open_flash, FlashHandle, FlashKind};

pub fn run(args: &Cli) -> Result<()> {
    match &args.command {
        Command::Probe => probe::run(args),
        Command::List(a) => list::run(args, a),
        Command::Read(a) => read::run(args, a),
        Command::Write(a) => write::run(args, a),
        Command::Erase(a) => erase::run(args, a),
        Command::Verify(a) => verify::run(args, a),
        Command::Wp(a) => wp::run(args, a),
        Command::Otp(a) => otp::run(args, a),
        Command::Nand(a) => nand::run(args, a),
    }
}

/// The database environment with the CLI's extra directory prepended
pub fn environment(args: &Cli) -> Environment {
    let mut env = Environment::default();
    if let Some(dir) = &args.device_dir {
        env.data_dirs.insert(0, dir.clone());
    }
    env
}

/// Open and probe per the global flags
pub fn open(args: &Cli) -> Result<FlashHandle> {
    let kind = match args.kind {
        Kind::Auto => FlashKind::Auto,
        Kind::Nor => FlashKind::Nor,
        Kind::Nand => FlashKind::Nand,
    };
    let handle = open_flash(&args.programmer, kind, &environment(args))?;
    log::info!("{}", handle.describe());
    Ok(handle)
}

/// A byte-count progress bar in the house style
pub fn progress_bar(total: u64, verb: &str) -> ProgressBar {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template(
            "{msg:8} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
        )
        .unwrap()
        .progress_chars("=> "),
    );
    bar.set_message(verb.to_string());
    bar
}
