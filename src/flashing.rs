//! Session logic: ID code recovery and flash dumping.

use std::io::Write;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};

use crate::Error;
use crate::adapter::{Adapter, TimerReading};
use crate::constants::{HOST_BAUDRATE, sio};
use crate::device::{Chip, PageRange};
use crate::serialio::{SerialIo, UnlockStatus};
use crate::simulator::SimulatedTarget;
use crate::transport::{EmulatorTransport, SerialTransport, Transport};

pub type Code = [u8; sio::CODE_LEN];

/// Bridge clock dividers used for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSettings {
    pub tclk: u8,
    pub sclk: u16,
}

impl ClockSettings {
    /// Target at 3MHz.
    pub const CRACK: ClockSettings = ClockSettings { tclk: 1, sclk: 127 };
    /// Target at 6MHz.
    pub const DUMP: ClockSettings = ClockSettings { tclk: 0, sclk: 127 };
}

#[derive(Debug, Clone)]
pub struct CrackOptions {
    /// Timed unlock attempts per candidate byte.
    pub samples: usize,
    pub pad_byte: u8,
    pub clocks: ClockSettings,
}

impl Default for CrackOptions {
    fn default() -> Self {
        CrackOptions {
            samples: 3,
            pad_byte: 0xde,
            clocks: ClockSettings::CRACK,
        }
    }
}

/// Reduces timing samples to one value: the element at rank `len / 3` once
/// sorted. This is not the median; it leans towards the fast samples.
pub(crate) fn representative(samples: &mut [u32]) -> u32 {
    samples.sort_unstable();
    samples[samples.len() / 3]
}

/// Picks the candidate for `position`. A correct byte makes the target
/// compare further, so the slowest candidate wins, except for the last byte
/// where a full match takes the short path and the fastest wins. Ties go to
/// the lowest candidate.
pub(crate) fn pick_candidate(times: &[u32], position: usize) -> u8 {
    let last = position == sio::CODE_LEN - 1;
    let mut best = 0;
    for (candidate, &t) in times.iter().enumerate() {
        let better = if last { t < times[best] } else { t > times[best] };
        if better {
            best = candidate;
        }
    }
    best as u8
}

/// Known prefix, then the candidate, right-padded to a full code.
pub(crate) fn trial_code(prefix: &[u8], candidate: u8, pad_byte: u8) -> Code {
    let mut code = [pad_byte; sio::CODE_LEN];
    code[..prefix.len()].copy_from_slice(prefix);
    code[prefix.len()] = candidate;
    code
}

/// Parses a code given as 14 hex digits.
pub fn parse_code(s: &str) -> Result<Code> {
    let raw = hex::decode(s.trim())
        .map_err(|e| anyhow::format_err!("code must be in hexadecimal format: {}", e))?;
    anyhow::ensure!(
        raw.len() == sio::CODE_LEN,
        "code must be {} bytes long, got {}",
        sio::CODE_LEN,
        raw.len()
    );
    let mut code = [0u8; sio::CODE_LEN];
    code.copy_from_slice(&raw);
    Ok(code)
}

pub struct Flashing<T: Transport> {
    sio: SerialIo<T>,
    chip: Chip,
    /// Raw version reply of the target
    target_version: Vec<u8>,
    progress: bool,
}

impl Flashing<SerialTransport> {
    pub fn new_from_serial(port: Option<&str>, baudrate: Option<u32>) -> Result<Self> {
        let transport = match port {
            Some(port) => SerialTransport::open(port, baudrate.unwrap_or(HOST_BAUDRATE))?,
            None => {
                let mut transport = SerialTransport::open_any()?;
                if let Some(baudrate) = baudrate {
                    transport.set_baudrate(baudrate)?;
                }
                transport
            }
        };
        Self::new(transport)
    }
}

impl Flashing<EmulatorTransport> {
    pub fn new_from_emulator(target: SimulatedTarget) -> Result<Self> {
        Self::new(EmulatorTransport::new(target))
    }
}

impl<T: Transport> Flashing<T> {
    /// Connects to the bridge and the target behind it.
    pub fn new(transport: T) -> Result<Self> {
        let chip = Chip::load()?;
        let mut sio = SerialIo::new(Adapter::new(transport), chip.version_marker.as_bytes());
        let target_version = sio.connect()?;
        log::debug!("found target: {}", String::from_utf8_lossy(&target_version));
        Ok(Flashing {
            sio,
            chip,
            target_version,
            progress: true,
        })
    }

    /// Shows or hides progress bars for long operations.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn chip(&self) -> &Chip {
        &self.chip
    }

    pub fn sio(&mut self) -> &mut SerialIo<T> {
        &mut self.sio
    }

    pub fn dump_info(&self) -> Result<()> {
        log::info!("Chip: {}", self.chip);
        log::info!(
            "Target version: {}",
            String::from_utf8_lossy(&self.target_version)
        );
        Ok(())
    }

    pub fn reset(&mut self) -> Result<()> {
        self.sio.adapter().reset_target()?;
        log::info!("Target reset");
        Ok(())
    }

    pub fn unlock_status(&mut self) -> Result<UnlockStatus> {
        self.sio.unlock_status()
    }

    pub fn busy_timer(&mut self) -> Result<TimerReading> {
        self.sio.adapter().busy_timer()
    }

    pub fn read_page(&mut self, page: u16) -> Result<Vec<u8>> {
        self.sio.read_page(page)
    }

    /// Presents `code` and requires the target to report success.
    pub fn unlock(&mut self, code: &Code) -> Result<()> {
        self.sio.unlock(code)?;
        let status = self.sio.unlock_status()?;
        if status != UnlockStatus::Successful {
            return Err(Error::UnlockFailure(status).into());
        }
        log::info!("Target unlocked");
        Ok(())
    }

    fn progress_bar(&self, len: u64, msg: &'static str) -> Result<ProgressBar> {
        if !self.progress {
            return Ok(ProgressBar::hidden());
        }
        let bar = ProgressBar::new(len);
        bar.set_style(
            ProgressStyle::with_template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
                .progress_chars("#>-"),
        );
        bar.set_message(msg);
        Ok(bar)
    }

    /// Times one candidate: `samples` unlock attempts, each followed by a
    /// busy timer read.
    fn time_candidate(&mut self, attempt: &Code, samples: usize) -> Result<u32> {
        let mut times = Vec::with_capacity(samples);
        for _ in 0..samples {
            self.sio.unlock(attempt)?;
            times.push(self.sio.adapter().wait_busy_timer()?);
        }
        let value = representative(&mut times);
        log::debug!(
            "code {}, times {:?}, representative {}",
            hex::encode(attempt),
            times,
            value
        );
        Ok(value)
    }

    /// Recovers the ID code byte by byte through the busy-time side channel,
    /// then verifies it unlocks the target.
    pub fn crack(&mut self, opts: &CrackOptions) -> Result<Code> {
        anyhow::ensure!(opts.samples > 0, "at least one sample per candidate is needed");
        self.sio
            .adapter()
            .set_clock_dividers(opts.clocks.tclk, opts.clocks.sclk)?;

        let bar = self.progress_bar((sio::CODE_LEN * 256) as u64, "Cracking")?;
        let mut code = Vec::with_capacity(sio::CODE_LEN);
        while code.len() != sio::CODE_LEN {
            let position = code.len();
            log::info!("Cracking byte {}/{}...", position + 1, sio::CODE_LEN);
            let mut times = Vec::with_capacity(256);
            for candidate in 0..=255u8 {
                let attempt = trial_code(&code, candidate, opts.pad_byte);
                times.push(self.time_candidate(&attempt, opts.samples)?);
                bar.inc(1);
            }
            let correct = pick_candidate(&times, position);
            log::info!(
                "Byte {}/{} -> {:#04x}",
                position + 1,
                sio::CODE_LEN,
                correct
            );
            code.push(correct);
        }
        bar.finish();

        let mut recovered = [0u8; sio::CODE_LEN];
        recovered.copy_from_slice(&code);
        log::info!("Finished. Code: {}", hex::encode(recovered));
        self.unlock(&recovered)?;
        Ok(recovered)
    }

    /// Unlocks with `code` and writes `range` to `out`, page after page.
    /// Returns the number of bytes written.
    pub fn dump<W: Write>(
        &mut self,
        code: &Code,
        range: &PageRange,
        clocks: ClockSettings,
        out: &mut W,
    ) -> Result<usize> {
        self.sio.adapter().set_clock_dividers(clocks.tclk, clocks.sclk)?;
        self.unlock(code)?;

        log::info!("Dumping pages {:04x}-{:04x}...", range.start, range.end);
        let bar = self.progress_bar(range.len() as u64, "Dumping")?;
        let mut written = 0;
        for page in range.pages() {
            log::debug!("Dumping {:04x}00-{:04x}ff...", page, page);
            let data = self.sio.read_page(page)?;
            out.write_all(&data)?;
            written += data.len();
            bar.inc(1);
        }
        bar.finish();
        out.flush()?;
        log::info!("Dumped {} bytes", written);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn representative_takes_rank_len_over_three() {
        assert_eq!(representative(&mut [30, 10, 20]), 20);
        assert_eq!(representative(&mut [5]), 5);
        // true median would be 40
        assert_eq!(representative(&mut [90, 10, 40, 70, 20, 30]), 30);
        assert_eq!(representative(&mut [7, 1, 3, 9]), 3);
    }

    #[test]
    fn slowest_wins_except_last_position() {
        let mut times = vec![100u32; 256];
        times[0x42] = 150;
        times[0x17] = 50;
        assert_eq!(pick_candidate(&times, 0), 0x42);
        assert_eq!(pick_candidate(&times, 5), 0x42);
        assert_eq!(pick_candidate(&times, 6), 0x17);
    }

    #[test]
    fn ties_go_to_lowest_candidate() {
        let times = vec![7u32; 256];
        assert_eq!(pick_candidate(&times, 0), 0);
        assert_eq!(pick_candidate(&times, 6), 0);
    }

    #[test]
    fn trial_code_pads_the_tail() {
        assert_eq!(
            trial_code(&[1, 2], 3, 0xde),
            [1, 2, 3, 0xde, 0xde, 0xde, 0xde]
        );
        assert_eq!(trial_code(&[1, 2, 3, 4, 5, 6], 7, 0xde), [1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn code_must_be_seven_hex_bytes() {
        assert_eq!(
            parse_code("4d2ce861197dc4").unwrap(),
            [0x4d, 0x2c, 0xe8, 0x61, 0x19, 0x7d, 0xc4]
        );
        assert!(parse_code("4d2ce861197d").is_err());
        assert!(parse_code("not hex at all").is_err());
    }
}
