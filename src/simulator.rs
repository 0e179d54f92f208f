//! Software model of an M16C in Standard Serial I/O mode.
//!
//! The model is clocked by the bridge's pins: it shifts a bit in on every
//! rising edge of the serial clock and a bit out on every falling edge, LSB
//! first. Busy time is counted in target clock cycles (rising edges of
//! `tclk`), so the bridge's target clock divider scales it.
//!
//! Unlock attempts leak their comparison progress through the busy line: each
//! leading byte that matches costs `step` more cycles, except that a fully
//! matching code takes the short success path.

use std::collections::VecDeque;

use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::bridge::{TargetLines, TargetModel, TargetPins};
use crate::constants::sio;
use crate::serialio::UnlockStatus;

/// Size of the modelled address space.
pub const FLASH_SIZE: usize = 0x10_0000;

/// Busy durations, in target clock cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub base: u32,
    pub step: u32,
    /// Busy pulse after every received byte.
    pub byte_busy: u32,
    /// Upper bound of uniform noise added to unlock timing.
    pub jitter: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            base: 100,
            step: 50,
            byte_busy: 2,
            jitter: 0,
        }
    }
}

/// Busy cycles of an unlock attempt, given the presented code, the real code
/// and the number of attempts made before this one.
pub type LeakModel = Box<dyn FnMut(&[u8; sio::CODE_LEN], &[u8; sio::CODE_LEN], u64) -> u32>;

pub struct SimulatedTarget {
    code: [u8; sio::CODE_LEN],
    version: [u8; sio::VERSION_LEN],
    flash: Vec<u8>,
    status: UnlockStatus,
    timing: Timing,
    rng: Option<StdRng>,
    leak: Option<LeakModel>,
    attempts: u64,

    last_rst: bool,
    last_sclk: bool,
    last_tclk: bool,
    bit_index: u8,
    shift_in: u8,
    out_byte: u8,
    /// The current slot carries a reply byte; whatever is clocked in is a dummy.
    transmitting: bool,
    txd: bool,
    busy_cycles: u32,

    command: Vec<u8>,
    replies: VecDeque<u8>,
}

impl SimulatedTarget {
    pub fn new(code: [u8; sio::CODE_LEN]) -> Self {
        let flash = (0..FLASH_SIZE as u32)
            .map(|addr| (addr.wrapping_mul(0x9e37_79b1) >> 24) as u8)
            .collect();
        SimulatedTarget {
            code,
            version: *b"VER.2.00",
            flash,
            status: UnlockStatus::NotAttempted,
            timing: Timing::default(),
            rng: None,
            leak: None,
            attempts: 0,
            last_rst: false,
            last_sclk: false,
            last_tclk: false,
            bit_index: 0,
            shift_in: 0,
            out_byte: 0xff,
            transmitting: false,
            txd: true,
            busy_cycles: 0,
            command: Vec::new(),
            replies: VecDeque::new(),
        }
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Enables unlock timing jitter from a seeded generator.
    pub fn with_jitter(mut self, jitter: u32, seed: u64) -> Self {
        self.timing.jitter = jitter;
        self.rng = Some(StdRng::seed_from_u64(seed));
        self
    }

    /// Replaces the matching-prefix unlock timing. Jitter still applies.
    pub fn with_leak(
        mut self,
        leak: impl FnMut(&[u8; sio::CODE_LEN], &[u8; sio::CODE_LEN], u64) -> u32 + 'static,
    ) -> Self {
        self.leak = Some(Box::new(leak));
        self
    }

    pub fn with_version(mut self, version: [u8; sio::VERSION_LEN]) -> Self {
        self.version = version;
        self
    }

    pub fn code(&self) -> &[u8; sio::CODE_LEN] {
        &self.code
    }

    pub fn flash(&self) -> &[u8] {
        &self.flash
    }

    pub fn unlock_status(&self) -> UnlockStatus {
        self.status
    }

    /// Number of completed unlock commands.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Busy cycles an unlock attempt with `matching` leading bytes costs.
    pub fn unlock_busy(&self, matching: usize) -> u32 {
        let t = &self.timing;
        if matching == sio::CODE_LEN {
            t.base + t.step * (sio::CODE_LEN as u32 - 2)
        } else {
            t.base + t.step * matching as u32
        }
    }

    fn reset(&mut self) {
        self.status = UnlockStatus::NotAttempted;
        self.bit_index = 0;
        self.shift_in = 0;
        self.out_byte = 0xff;
        self.transmitting = false;
        self.txd = true;
        self.busy_cycles = 0;
        self.command.clear();
        self.replies.clear();
    }

    fn receive(&mut self, byte: u8) {
        self.busy_cycles = self.timing.byte_busy;
        if self.transmitting {
            return;
        }
        self.command.push(byte);

        let opcode = self.command[0];
        match opcode {
            sio::VERSION => {
                self.replies.extend(self.version);
                self.command.clear();
            }
            sio::READ_STATUS => {
                self.replies.extend([0x80, (self.status as u8) << 2]);
                self.command.clear();
            }
            sio::READ_PAGE if self.command.len() == 3 => {
                let page = u16::from_le_bytes([self.command[1], self.command[2]]) as usize;
                let start = (page * sio::PAGE_SIZE) % FLASH_SIZE;
                if self.status == UnlockStatus::Successful {
                    self.replies.extend(&self.flash[start..start + sio::PAGE_SIZE]);
                } else {
                    self.replies.extend([0xff; sio::PAGE_SIZE]);
                }
                self.command.clear();
            }
            sio::READ_PAGE => {}
            b if b == sio::UNLOCK[0] => {
                let header = sio::UNLOCK.len();
                let len = self.command.len();
                if len <= header && self.command[len - 1] != sio::UNLOCK[len - 1] {
                    self.command.clear();
                } else if len == header + sio::CODE_LEN {
                    self.check_code();
                    self.command.clear();
                }
            }
            _ => self.command.clear(),
        }
    }

    fn check_code(&mut self) {
        let mut attempt = [0u8; sio::CODE_LEN];
        attempt.copy_from_slice(&self.command[sio::UNLOCK.len()..]);
        let matching = attempt
            .iter()
            .zip(self.code.iter())
            .take_while(|(a, b)| a == b)
            .count();
        self.status = if matching == sio::CODE_LEN {
            UnlockStatus::Successful
        } else {
            UnlockStatus::Failed
        };
        let jitter = match self.rng.as_mut() {
            Some(rng) => rng.random_range(0..=self.timing.jitter),
            None => 0,
        };
        let prefix_busy = self.unlock_busy(matching);
        let busy = match self.leak.as_mut() {
            Some(leak) => leak(&attempt, &self.code, self.attempts),
            None => prefix_busy,
        };
        self.busy_cycles = busy + jitter;
        self.attempts += 1;
    }
}

impl TargetModel for SimulatedTarget {
    fn lines(&self) -> TargetLines {
        TargetLines {
            txd: self.txd,
            busy: self.busy_cycles > 0,
        }
    }

    fn tick(&mut self, pins: &TargetPins) {
        let released = pins.rst && !self.last_rst;
        let last_sclk = self.last_sclk;
        let last_tclk = self.last_tclk;
        self.last_rst = pins.rst;
        self.last_sclk = pins.sclk;
        self.last_tclk = pins.tclk;

        if !pins.rst {
            self.reset();
            return;
        }
        if released {
            return;
        }

        if pins.tclk && !last_tclk && self.busy_cycles > 0 {
            self.busy_cycles -= 1;
        }

        if last_sclk && !pins.sclk {
            if self.bit_index == 0 {
                match self.replies.pop_front() {
                    Some(byte) => {
                        self.out_byte = byte;
                        self.transmitting = true;
                    }
                    None => {
                        self.out_byte = 0xff;
                        self.transmitting = false;
                    }
                }
            }
            self.txd = (self.out_byte >> self.bit_index) & 1 != 0;
        } else if !last_sclk && pins.sclk {
            self.shift_in |= (pins.rxd as u8) << self.bit_index;
            self.bit_index += 1;
            if self.bit_index == 8 {
                let byte = self.shift_in;
                self.bit_index = 0;
                self.shift_in = 0;
                self.receive(byte);
            }
        }
    }
}
