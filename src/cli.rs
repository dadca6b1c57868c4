//! Command-line definitions

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// USB SPI-NOR/SPI-NAND flash programmer for WCH CH341A/CH347 bridges
#[derive(Parser)]
#[command(name = "uflash", version, about)]
pub struct Cli {
    /// Programmer connection descriptor, e.g. "ch341a", "ch347:index=1",
    /// "dummy:type=nand"
    #[arg(short, long, global = true, default_value = "ch341a")]
    pub programmer: String,

    /// Flash stack to probe
    #[arg(short = 't', long, global = true, value_enum, default_value = "auto")]
    pub kind: Kind,

    /// Extra device-database directory (searched before the defaults)
    #[arg(short = 'd', long, global = true)]
    pub device_dir: Option<PathBuf>,

    /// Verbose logging (same as RUST_LOG=debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Flash stack selection
#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Kind {
    /// Try NOR first, then NAND
    Auto,
    /// SPI-NOR only
    Nor,
    /// SPI-NAND only
    Nand,
}

#[derive(Subcommand)]
pub enum Command {
    /// Probe the chip and print what was found
    Probe,

    /// List supported programmers and database parts
    List(ListArgs),

    /// Read flash contents into a file
    Read(ReadArgs),

    /// Erase (unless told otherwise), write a file, optionally verify
    Write(WriteArgs),

    /// Erase a range
    Erase(EraseArgs),

    /// Compare flash contents against a file
    Verify(VerifyArgs),

    /// Write-protection regions
    Wp(WpArgs),

    /// OTP / security-register operations
    Otp(OtpArgs),

    /// NAND-specific maintenance
    Nand(NandArgs),
}

#[derive(Args)]
pub struct ListArgs {
    /// Only list programmers
    #[arg(long)]
    pub programmers: bool,

    /// Filter parts by vendor id (e.g. "winbond")
    #[arg(long)]
    pub vendor: Option<String>,

    /// Filter parts by model substring
    #[arg(long = "match")]
    pub matching: Option<String>,
}

#[derive(Args)]
pub struct ReadArgs {
    /// Output file
    #[arg(short, long)]
    pub output: PathBuf,

    /// Start address (0x-prefixed hex accepted)
    #[arg(short, long, default_value = "0", value_parser = parse_num)]
    pub addr: u64,

    /// Byte count (defaults to the rest of the chip)
    #[arg(short, long, value_parser = parse_num)]
    pub len: Option<u64>,
}

#[derive(Args)]
pub struct WriteArgs {
    /// Input file
    #[arg(short, long)]
    pub input: PathBuf,

    /// Start address
    #[arg(short, long, default_value = "0", value_parser = parse_num)]
    pub addr: u64,

    /// Skip the erase before programming
    #[arg(long)]
    pub no_erase: bool,

    /// Read back and compare after programming
    #[arg(long)]
    pub verify: bool,
}

#[derive(Args)]
pub struct EraseArgs {
    /// Start address
    #[arg(short, long, default_value = "0", value_parser = parse_num)]
    pub addr: u64,

    /// Byte count (defaults to the rest of the chip)
    #[arg(short, long, value_parser = parse_num)]
    pub len: Option<u64>,
}

#[derive(Args)]
pub struct VerifyArgs {
    /// File with the expected contents
    #[arg(short, long)]
    pub input: PathBuf,

    /// Start address
    #[arg(short, long, default_value = "0", value_parser = parse_num)]
    pub addr: u64,
}

#[derive(Args)]
pub struct WpArgs {
    #[command(subcommand)]
    pub op: WpOp,
}

#[derive(Subcommand)]
pub enum WpOp {
    /// List the selectable protection ranges
    List,
    /// Show the active protection range
    Get,
    /// Protect exactly base+size (must be an advertised range)
    Set {
        /// Range base address
        #[arg(long, value_parser = parse_num)]
        base: u64,
        /// Range size
        #[arg(long, value_parser = parse_num)]
        size: u64,
    },
}

#[derive(Args)]
pub struct OtpArgs {
    #[command(subcommand)]
    pub op: OtpOp,
}

#[derive(Subcommand)]
pub enum OtpOp {
    /// Show OTP geometry and lock state
    Info,
    /// Dump one OTP region to a file
    Read {
        /// Region index
        #[arg(long)]
        index: u32,
        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Program one OTP region from a file
    Write {
        /// Region index
        #[arg(long)]
        index: u32,
        /// Input file
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Permanently lock one OTP region (irreversible)
    Lock {
        /// Region index
        #[arg(long)]
        index: u32,
        /// Confirm the irreversible operation
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Args)]
pub struct NandArgs {
    #[command(subcommand)]
    pub op: NandOp,
}

#[derive(Subcommand)]
pub enum NandOp {
    /// Scan for bad blocks and print the table
    BbtScan,
    /// Mark a block bad
    Markbad {
        /// Block index
        #[arg(long, value_parser = parse_num32)]
        block: u32,
    },
    /// Destructive pattern test of one block
    Torture {
        /// Block index
        #[arg(long, value_parser = parse_num32)]
        block: u32,
    },
    /// Print the unique ID
    Uid,
    /// Raw page dump including OOB bytes
    Dump {
        /// First page
        #[arg(long, default_value = "0", value_parser = parse_num32)]
        page: u32,
        /// Page count
        #[arg(long, value_parser = parse_num32)]
        count: u32,
        /// Output file
        #[arg(short, long)]
        output: PathBuf,
        /// Keep going past uncorrectable pages
        #[arg(long)]
        ignore_ecc: bool,
    },
}

/// Accept decimal or 0x-prefixed hex
pub fn parse_num(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).map_err(|e| e.to_string())
    } else {
        s.parse().map_err(|e: std::num::ParseIntError| e.to_string())
    }
}

fn parse_num32(s: &str) -> Result<u32, String> {
    parse_num(s)?.try_into().map_err(|_| "value too large".to_string())
}
