//! Clocked full-duplex byte exchange with the target.
//!
//! Every byte popped from the outbound FIFO is shifted out LSB first while a
//! byte is shifted in from the target, and the received byte is pushed into
//! the inbound FIFO. The engine runs until the outbound FIFO is empty.

use super::{Fifo, TargetLines, TargetPins};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    /// Pop the next byte, or finish.
    Prepare,
    WaitNotBusy,
    /// Count down, then drop the clock and drive the data bit.
    Falling,
    /// Count down with the clock low, then sample and raise the clock.
    Rising,
    Writeback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Running,
    /// The outbound FIFO is drained.
    Done,
}

#[derive(Debug, Clone)]
pub struct Transaction {
    phase: Phase,
    send_byte: u8,
    receive_byte: u8,
    bit_index: u8,
    bit_counter: u16,
    overruns: u32,
}

impl Default for Transaction {
    fn default() -> Self {
        Transaction {
            phase: Phase::Start,
            send_byte: 0,
            receive_byte: 0,
            bit_index: 0,
            bit_counter: 0,
            overruns: 0,
        }
    }
}

impl Transaction {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Received bytes dropped because the inbound FIFO was full.
    pub fn overruns(&self) -> u32 {
        self.overruns
    }

    pub(crate) fn start(&mut self) {
        self.phase = Phase::Start;
    }

    /// Advances one clock tick. `sampled` holds the registered target lines.
    pub(crate) fn step(
        &mut self,
        outbound: &mut Fifo,
        inbound: &mut Fifo,
        sampled: TargetLines,
        pins: &mut TargetPins,
        sclk_divider: u16,
    ) -> Step {
        match self.phase {
            Phase::Start => {
                self.bit_index = 0;
                self.phase = Phase::Prepare;
            }
            Phase::Prepare => match outbound.pop() {
                Some(byte) => {
                    self.send_byte = byte;
                    self.phase = Phase::WaitNotBusy;
                }
                None => return Step::Done,
            },
            Phase::WaitNotBusy => {
                if !sampled.busy {
                    self.bit_counter = sclk_divider;
                    self.phase = Phase::Falling;
                }
            }
            Phase::Falling => {
                if self.bit_counter == 0 {
                    pins.sclk = false;
                    pins.rxd = (self.send_byte >> self.bit_index) & 1 != 0;
                    self.bit_counter = sclk_divider;
                    self.phase = Phase::Rising;
                } else {
                    self.bit_counter -= 1;
                }
            }
            Phase::Rising => {
                if self.bit_counter == 0 {
                    self.receive_byte = ((sampled.txd as u8) << 7) | (self.receive_byte >> 1);
                    pins.sclk = true;
                    if self.bit_index == 7 {
                        self.bit_index = 0;
                        self.phase = Phase::Writeback;
                    } else {
                        self.bit_index += 1;
                        self.bit_counter = sclk_divider;
                        self.phase = Phase::Falling;
                    }
                } else {
                    self.bit_counter -= 1;
                }
            }
            Phase::Writeback => {
                if inbound.push(self.receive_byte).is_err() {
                    self.overruns += 1;
                    log::warn!(
                        "inbound FIFO full, dropped {:#04x}",
                        self.receive_byte
                    );
                }
                self.phase = Phase::Prepare;
            }
        }
        Step::Running
    }
}
