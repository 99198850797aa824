//! Check whether an I2C device answers, or scan the whole bus.

mod logging;

use std::io::IsTerminal;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use i2c_platform::{
    driver::{SCAN_FIRST, SCAN_LAST},
    DriverConfig, RetryPolicy,
};
use tracing::{debug, info};

/// Probe the I2C bus of the current platform
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Device address, hex (0x48) or decimal (72)
    #[arg(value_parser = parse_address, required_unless_present = "scan")]
    address: Option<u8>,

    /// Scan every usable address and print a map
    #[arg(short, long, conflicts_with = "address")]
    scan: bool,

    /// Host bus index (/dev/i2c-N); overrides board detection
    #[arg(short, long)]
    bus: Option<u8>,

    /// Total attempts per transfer
    #[arg(short, long)]
    retries: Option<u8>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Enable debug logging
    #[arg(short = 'd', long)]
    debug: bool,
}

impl Args {
    /// Explicit flags win, then the environment, then the cached default.
    fn driver_config(&self) -> Option<DriverConfig> {
        if self.bus.is_none() && self.retries.is_none() {
            return DriverConfig::from_env();
        }
        let mut config = DriverConfig::default();
        if let Some(bus) = self.bus {
            config = config.with_bus_index(bus);
        }
        if let Some(attempts) = self.retries {
            config = config.with_retry(RetryPolicy {
                attempts,
                ..RetryPolicy::default()
            });
        }
        Some(config)
    }
}

fn parse_address(s: &str) -> Result<u8, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    let address = parsed.map_err(|e| format!("invalid address '{}': {}", s, e))?;
    if address > 0x7f {
        return Err(format!("address 0x{:02x} is outside the 7-bit range", address));
    }
    Ok(address)
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    logging::init(args.debug);

    if args.no_color || !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }

    let config = args.driver_config();
    debug!(?config, "Driver configuration");

    if args.scan {
        let driver = i2c_platform::get_driver(config.as_ref())
            .context("No I2C driver available for this platform")?;
        info!(driver = driver.name(), "Scanning I2C bus");

        let found = driver.scan().context("Bus scan failed")?;
        print!("{}", render_grid(&found, |cell| cell.green().bold().to_string()));
        println!("{} device(s) found", found.len());

        return Ok(if found.is_empty() {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        });
    }

    let Some(address) = args.address else {
        anyhow::bail!("an address or --scan is required");
    };
    if i2c_platform::is_device_connected(address, config.as_ref()) {
        println!("0x{:02x}: {}", address, "device present".green());
        Ok(ExitCode::SUCCESS)
    } else {
        println!("0x{:02x}: {}", address, "no response".red());
        Ok(ExitCode::FAILURE)
    }
}

/// i2cdetect-style map. Reserved addresses are blank, silent ones `--`.
fn render_grid(found: &[u8], highlight: impl Fn(String) -> String) -> String {
    let mut out = String::from("    ");
    for col in 0..16 {
        out.push_str(&format!(" {:x} ", col));
    }
    out.push('\n');

    for row in (0u8..0x80).step_by(16) {
        out.push_str(&format!("{:02x}: ", row));
        for address in row..row + 16 {
            let cell = if !(SCAN_FIRST..=SCAN_LAST).contains(&address) {
                "   ".to_string()
            } else if found.contains(&address) {
                format!("{} ", highlight(format!("{:02x}", address)))
            } else {
                "-- ".to_string()
            };
            out.push_str(&cell);
        }
        out.truncate(out.trim_end().len());
        out.push('\n');
    }
    out
}
