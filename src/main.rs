//! uflash - USB SPI-NOR/SPI-NAND flash programmer

mod cli;
mod commands;

use clap::Parser;

fn main() {
    let args = cli::Cli::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();

    match commands::run(&args) {
        Ok(()) => {}
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(e.code().min(125) as i32);
        }
    }
}
