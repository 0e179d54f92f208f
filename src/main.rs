use std::{fs::File, io::BufWriter};

use anyhow::Result;
use clap::{Parser, Subcommand};

use sioprog::{
    Flashing, Transport,
    device::PageRange,
    flashing::{ClockSettings, CrackOptions, parse_code},
    simulator::SimulatedTarget,
    transport::SerialTransport,
};

#[derive(Parser)]
#[command(
    name = "sioprog",
    about = "Standard Serial I/O programmer and ID code cracker for M16C MCUs"
)]
struct Cli {
    /// Bridge serial port, defaults to the first one found
    #[arg(long, short, global = true)]
    port: Option<String>,
    /// Host UART baudrate
    #[arg(long, global = true)]
    baud: Option<u32>,
    /// Talk to an in-process bridge and simulated target instead
    #[arg(long, global = true)]
    emulate: bool,
    /// ID code planted in the simulated target
    #[arg(long, global = true, default_value = "4d2ce861197dc4")]
    emulate_code: String,
    /// -v for protocol traffic, -vv for raw bridge bytes
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List serial ports a bridge might be attached to
    Ports,
    /// Get info about the bridge and the connected target
    Info,
    /// Reset the target
    Reset,
    /// Show the result of the last ID check
    Status,
    /// Read the bridge busy timer
    Timer,
    /// Recover the ID code through busy-time measurements
    Crack {
        /// Timed attempts per candidate byte
        #[arg(long, default_value_t = 3)]
        samples: usize,
        #[arg(long, default_value_t = ClockSettings::CRACK.tclk)]
        tclk: u8,
        #[arg(long, default_value_t = ClockSettings::CRACK.sclk)]
        sclk: u16,
    },
    /// Unlock the target and dump its flash to a file
    Dump {
        #[arg(long, short)]
        output: String,
        /// ID code as 14 hex digits
        #[arg(long, short)]
        code: String,
        /// First page, defaults to the chip's dump range
        #[arg(long, value_parser = parse_page)]
        start: Option<u16>,
        /// Last page, inclusive
        #[arg(long, value_parser = parse_page)]
        end: Option<u16>,
        #[arg(long, default_value_t = ClockSettings::DUMP.tclk)]
        tclk: u8,
        #[arg(long, default_value_t = ClockSettings::DUMP.sclk)]
        sclk: u16,
    },
    /// Read one page and print it
    ReadPage {
        #[arg(value_parser = parse_page)]
        page: u16,
    },
}

fn parse_page(s: &str) -> Result<u16, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(digits, 16).map_err(|e| format!("invalid page {:?}: {}", s, e))
}

fn list_ports() -> Result<()> {
    let ports = SerialTransport::scan_ports()?;
    anyhow::ensure!(!ports.is_empty(), "No serial ports found!");
    for port in ports {
        log::info!("Found serial port: {}", port);
    }
    Ok(())
}

fn run<T: Transport>(mut flashing: Flashing<T>, command: Command) -> Result<()> {
    match command {
        Command::Ports => list_ports()?,
        Command::Info => {
            flashing.dump_info()?;
        }
        Command::Reset => {
            flashing.reset()?;
        }
        Command::Status => {
            let status = flashing.unlock_status()?;
            log::info!("Unlock status: {:?}", status);
        }
        Command::Timer => {
            let timer = flashing.busy_timer()?;
            log::info!(
                "Busy timer: {} cycles ({})",
                timer.count,
                if timer.running { "running" } else { "stopped" }
            );
        }
        Command::Crack {
            samples,
            tclk,
            sclk,
        } => {
            let opts = CrackOptions {
                samples,
                pad_byte: flashing.chip().pad_byte,
                clocks: ClockSettings { tclk, sclk },
            };
            flashing.crack(&opts)?;
        }
        Command::Dump {
            output,
            code,
            start,
            end,
            tclk,
            sclk,
        } => {
            let code = parse_code(&code)?;
            let default = flashing.chip().dump;
            let range = PageRange {
                start: start.unwrap_or(default.start),
                end: end.unwrap_or(default.end),
            };
            anyhow::ensure!(!range.is_empty(), "empty page range");
            let mut out = BufWriter::new(File::create(&output)?);
            let written = flashing.dump(&code, &range, ClockSettings { tclk, sclk }, &mut out)?;
            log::info!("Wrote {} bytes to {}", written, output);
        }
        Command::ReadPage { page } => {
            let data = flashing.read_page(page)?;
            for (i, line) in data.chunks(16).enumerate() {
                log::info!("{:04x}{:02x}: {}", page, i * 16, hex::encode(line));
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    let _ = simplelog::TermLogger::init(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    // needs no bridge
    if let Command::Ports = cli.command {
        return list_ports();
    }

    if cli.emulate {
        let code = parse_code(&cli.emulate_code)?;
        log::info!("Emulating bridge and target, planted code {}", hex::encode(code));
        let flashing = Flashing::new_from_emulator(SimulatedTarget::new(code))?;
        run(flashing, cli.command)
    } else {
        let flashing = Flashing::new_from_serial(cli.port.as_deref(), cli.baud)?;
        run(flashing, cli.command)
    }
}
