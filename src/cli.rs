// CLI definitions using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hidwatch")]
#[command(author, version, about = "HID device enumeration and hotplug watcher")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Session configuration (TOML)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log every report buffer (needs RUST_LOG=hidwatch=trace)
    #[arg(long, global = true)]
    pub monitor: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List attached HID devices
    #[command(visible_aliases = ["ls", "l"])]
    List {
        /// Vendor ID filter (hex, 0 = any)
        #[arg(long, value_parser = parse_hex_u16, default_value = "0")]
        vid: u16,
        /// Product ID filter (hex, 0 = any)
        #[arg(long, value_parser = parse_hex_u16, default_value = "0")]
        pid: u16,
    },

    /// Print attach/detach events until Ctrl-C
    #[command(visible_alias = "w")]
    Watch {
        /// Scan interval in milliseconds
        #[arg(short, long)]
        interval: Option<u64>,
        /// Open every attached device and print its input reports
        #[arg(long)]
        read: bool,
    },

    /// Open one device and print its strings and a feature report
    #[command(visible_alias = "i")]
    Info {
        /// Vendor ID (hex)
        #[arg(long, value_parser = parse_hex_u16)]
        vid: u16,
        /// Product ID (hex)
        #[arg(long, value_parser = parse_hex_u16)]
        pid: u16,
        /// Serial number
        #[arg(long)]
        serial: Option<String>,
        /// Feature report ID to read
        #[arg(long, value_parser = parse_hex_u8)]
        feature: Option<u8>,
    },
}

fn parse_hex_u16(s: &str) -> Result<u16, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(digits, 16).map_err(|e| format!("'{s}': {e}"))
}

fn parse_hex_u8(s: &str) -> Result<u8, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u8::from_str_radix(digits, 16).map_err(|e| format!("'{s}': {e}"))
}
