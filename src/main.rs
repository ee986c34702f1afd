use std::{thread::sleep, time::Duration};

use anyhow::Result;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use nuvoprog::{config::ConfigFlags, format, Flashing};

#[derive(Parser)]
#[command(
    name = "nuvoprog",
    version,
    about = "Flash Nuvoton N76E003 MCUs through their UART ISP bootloader"
)]
struct Cli {
    /// Serial port of the target, the first one found if omitted
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Turn on debug logging, every packet is dumped
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Get info about current connected chip
    Info {},
    /// Print the CONFIG bytes
    Config {},
    /// Erase the whole APROM
    Erase {},
    /// Erase, program and verify APROM
    Flash {
        /// Firmware file: .bin, Intel HEX or plain hex text
        path: String,
        /// Boot into APROM afterwards
        #[arg(long)]
        reset: bool,
    },
    /// Compare flash content with a firmware file
    Verify { path: String },
    /// Read APROM and LDROM into a file
    Read {
        /// .hex writes Intel HEX, anything else raw binary
        path: String,
    },
    /// Erase the 128-byte page holding ADDRESS
    PageErase {
        #[arg(value_parser = parse_number)]
        address: u32,
    },
    /// Rewrite CONFIG
    WriteConfig {
        /// Lock the chip (flash becomes unreadable over ICP)
        #[arg(long)]
        lock: bool,
        /// Boot from LDROM after reset
        #[arg(long)]
        ldrom_boot: bool,
        /// Boot from APROM after reset
        #[arg(long, conflicts_with = "ldrom_boot")]
        aprom_boot: bool,
        /// LDROM size in KiB, 0 to 4
        #[arg(long)]
        ldrom_size: Option<u8>,
    },
    /// Leave the bootloader and run APROM
    Reset {},
}

fn parse_number(s: &str) -> std::result::Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("{}: {}", s, e))
}

fn progress_bar(len: usize) -> Result<ProgressBar> {
    let bar = ProgressBar::new(len as u64);
    bar.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {wide_bar} {bytes}/{total_bytes}")?,
    );
    Ok(bar)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        simplelog::LevelFilter::Debug
    } else {
        simplelog::LevelFilter::Info
    };
    let _ = simplelog::TermLogger::init(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let mut flashing = Flashing::new_from_serial(cli.port.as_deref())?;
    match cli.command {
        Commands::Info {} => {
            flashing.dump_info()?;
        }
        Commands::Config {} => {
            let config = flashing.read_config()?;
            log::debug!("{}", hexdump(&config.encode()));
            print!("{}", config.describe(flashing.chip().flash_size));
        }
        Commands::Erase {} => {
            flashing.erase_all()?;
        }
        Commands::Flash { path, reset } => {
            flashing.dump_info()?;
            let firmware = format::read_firmware_from_file(path)?;
            log::info!("Firmware size: {}", firmware.data.len());
            let bar = progress_bar(firmware.data.len())?;
            flashing.flash(firmware.address, &firmware.data, |n| bar.set_position(n as u64))?;
            bar.finish();
            sleep(Duration::from_millis(100));
            flashing.verify(firmware.address, &firmware.data)?;
            if reset {
                flashing.reset()?;
            }
        }
        Commands::Verify { path } => {
            let firmware = format::read_firmware_from_file(path)?;
            log::info!("Firmware size: {}", firmware.data.len());
            flashing.verify(firmware.address, &firmware.data)?;
            log::info!("Verified!");
        }
        Commands::Read { path } => {
            let bar = progress_bar(flashing.chip().flash_size as usize)?;
            let data = flashing.dump(|n| bar.set_position(n as u64))?;
            bar.finish();
            log::debug!("{}", hexdump(&data[..data.len().min(256)]));
            format::write_firmware_to_file(path, 0, &data)?;
        }
        Commands::PageErase { address } => {
            flashing.page_erase(address)?;
        }
        Commands::WriteConfig {
            lock,
            ldrom_boot,
            aprom_boot,
            ldrom_size,
        } => {
            let mut config: ConfigFlags = flashing.read_config()?;
            if lock {
                config.set_lock(false);
            }
            if ldrom_boot || aprom_boot {
                config.set_cbs(aprom_boot);
            }
            if let Some(kb) = ldrom_size {
                anyhow::ensure!(kb <= 4, "LDROM size must be 0 to 4 KiB");
                config.set_ldrom_size_kb(kb);
            }
            flashing.write_config(config)?;
            print!("{}", config.describe(flashing.chip().flash_size));
        }
        Commands::Reset {} => {
            flashing.reset()?;
        }
    }

    Ok(())
}

fn hexdump(data: &[u8]) -> String {
    let mut out = Vec::new();
    // writing into a Vec cannot fail
    let _ = hxdmp::hexdump(data, &mut out);
    String::from_utf8_lossy(&out).into_owned()
}
