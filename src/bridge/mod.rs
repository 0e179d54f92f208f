//! Cycle-level model of the bridge between host UART and target SIO port.
//!
//! [`Bridge::tick`] advances every register by one board clock: the command
//! dispatcher, the transaction engine, the busy timer and the target clock
//! divider. Target outputs are latched into registered copies at the end of
//! each tick and only those copies feed the logic.

use std::collections::VecDeque;

use crate::constants::{
    BRIDGE_VERSION, DEFAULT_SCLK_DIVIDER, DEFAULT_TCLK_DIVIDER, FIFO_DEPTH, RESET_HOLD_CYCLES,
    commands, replies,
};

pub use self::clock::{ClockDivider, Registered};
pub use self::engine::{Phase, Step, Transaction};
pub use self::fifo::Fifo;
pub use self::timer::BusyTimer;

mod clock;
mod engine;
mod fifo;
mod timer;

/// Lines driven by the bridge towards the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TargetPins {
    /// Active low.
    pub rst: bool,
    pub sclk: bool,
    /// Target receive data, i.e. bridge -> target.
    pub rxd: bool,
    pub tclk: bool,
}

/// Lines driven by the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TargetLines {
    /// Target transmit data, i.e. target -> bridge.
    pub txd: bool,
    pub busy: bool,
}

/// Anything that can sit on the other end of the target port.
pub trait TargetModel {
    /// Current level of the target's output lines.
    fn lines(&self) -> TargetLines;
    /// Advance one board clock, observing the bridge's pins after its tick.
    fn tick(&mut self, pins: &TargetPins);
}

/// Byte-level host UART: a receive queue and a bounded transmit queue.
#[derive(Debug, Clone)]
pub struct HostLink {
    rx: VecDeque<u8>,
    tx: VecDeque<u8>,
    tx_depth: usize,
}

impl HostLink {
    pub fn new(tx_depth: usize) -> Self {
        HostLink {
            rx: VecDeque::new(),
            tx: VecDeque::new(),
            tx_depth,
        }
    }

    /// Host side: queue bytes towards the bridge.
    pub fn feed(&mut self, data: &[u8]) {
        self.rx.extend(data);
    }

    /// Host side: take one byte sent by the bridge.
    pub fn take(&mut self) -> Option<u8> {
        self.tx.pop_front()
    }

    fn readable(&self) -> bool {
        !self.rx.is_empty()
    }

    fn writable(&self) -> bool {
        self.tx.len() < self.tx_depth
    }

    fn read(&mut self) -> Option<u8> {
        self.rx.pop_front()
    }

    fn write(&mut self, byte: u8) {
        debug_assert!(self.writable());
        self.tx.push_back(byte);
    }
}

impl Default for HostLink {
    fn default() -> Self {
        HostLink::new(16)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Dispatch,
    /// Send `response`, then go idle.
    Respond,
    Flush,
    ResetTarget,
    FifoWrite,
    Transaction,
    /// Collecting the 4-byte count argument of `R`.
    FifoReadStart,
    FifoRead,
    /// Streaming the 4 timer bytes, index in `counter`.
    TimerReport,
    SetTclk,
    SetSclk,
}

pub struct Bridge {
    state: State,
    host: HostLink,
    pins: TargetPins,
    txd: Registered,
    busy: Registered,

    outbound: Fifo,
    inbound: Fifo,
    transaction: Transaction,
    timer: BusyTimer,
    tclk: ClockDivider,
    sclk_divider: u16,

    request: u8,
    response: u8,
    /// Shared by the multi-cycle states.
    counter: u32,
    /// Little-endian argument being shifted in.
    argument: u32,
    read_remaining: u32,
    reset_hold: u32,
}

impl Default for Bridge {
    fn default() -> Self {
        Bridge::new()
    }
}

impl Bridge {
    pub fn new() -> Self {
        Bridge {
            state: State::Idle,
            host: HostLink::default(),
            pins: TargetPins::default(),
            txd: Registered::default(),
            busy: Registered::default(),
            outbound: Fifo::new(FIFO_DEPTH),
            inbound: Fifo::new(FIFO_DEPTH),
            transaction: Transaction::default(),
            timer: BusyTimer::default(),
            tclk: ClockDivider::new(DEFAULT_TCLK_DIVIDER),
            sclk_divider: DEFAULT_SCLK_DIVIDER,
            request: 0,
            response: 0,
            counter: 0,
            argument: 0,
            read_remaining: 0,
            reset_hold: RESET_HOLD_CYCLES,
        }
    }

    /// Shortens the reset pulse, for emulation.
    pub fn with_reset_hold(mut self, cycles: u32) -> Self {
        self.reset_hold = cycles.max(1);
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn pins(&self) -> &TargetPins {
        &self.pins
    }

    pub fn host(&self) -> &HostLink {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut HostLink {
        &mut self.host
    }

    pub fn outbound(&self) -> &Fifo {
        &self.outbound
    }

    pub fn inbound(&self) -> &Fifo {
        &self.inbound
    }

    pub fn timer(&self) -> &BusyTimer {
        &self.timer
    }

    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    pub fn tclk_divider(&self) -> u8 {
        self.tclk.divider()
    }

    pub fn sclk_divider(&self) -> u16 {
        self.sclk_divider
    }


    /// One board clock. `lines` are the raw target outputs; they only become
    /// visible to the logic on the following tick.
    pub fn tick(&mut self, lines: TargetLines) {
        let sampled = TargetLines {
            txd: self.txd.get(),
            busy: self.busy.get(),
        };

        self.timer.tick(sampled.busy);
        self.tclk.tick();
        self.pins.tclk = self.tclk.level();
        self.step(sampled);

        self.txd.latch(lines.txd);
        self.busy.latch(lines.busy);
    }

    fn step(&mut self, sampled: TargetLines) {
        match self.state {
            State::Idle => {
                if let Some(byte) = self.host.read() {
                    self.request = byte;
                    self.state = State::Dispatch;
                }
            }
            State::Dispatch => self.dispatch(),
            State::Respond => {
                if self.host.writable() {
                    self.host.write(self.response);
                    self.state = State::Idle;
                }
            }
            State::Flush => {
                if self.outbound.is_empty() && self.inbound.is_empty() {
                    self.respond(replies::ACK);
                } else {
                    self.outbound.pop();
                    self.inbound.pop();
                }
            }
            State::ResetTarget => {
                if self.counter == 0 {
                    self.pins.rst = true;
                    self.pins.sclk = true;
                    self.respond(replies::ACK);
                } else {
                    self.counter -= 1;
                }
            }
            State::FifoWrite => {
                if let Some(byte) = self.host.read() {
                    match self.outbound.push(byte) {
                        Ok(()) => self.respond(replies::ACK),
                        Err(_) => self.respond(replies::FIFO_FULL),
                    }
                }
            }
            State::Transaction => {
                let step = self.transaction.step(
                    &mut self.outbound,
                    &mut self.inbound,
                    sampled,
                    &mut self.pins,
                    self.sclk_divider,
                );
                if step == Step::Done {
                    self.respond(replies::ACK);
                }
            }
            State::FifoReadStart => {
                if let Some(byte) = self.host.read() {
                    self.argument = (self.argument >> 8) | ((byte as u32) << 24);
                    if self.counter == 0 {
                        self.read_remaining = self.argument;
                        self.state = State::FifoRead;
                    } else {
                        self.counter -= 1;
                    }
                }
            }
            State::FifoRead => {
                if self.read_remaining == 0 {
                    self.state = State::Idle;
                } else if self.host.writable() {
                    let byte = self.inbound.pop().unwrap_or(replies::FILLER);
                    self.host.write(byte);
                    self.read_remaining -= 1;
                }
            }
            State::TimerReport => {
                if self.host.writable() {
                    self.host.write((self.timer.count() >> (self.counter * 8)) as u8);
                    if self.counter == 3 {
                        self.state = State::Idle;
                    } else {
                        self.counter += 1;
                    }
                }
            }
            State::SetTclk => {
                if let Some(byte) = self.host.read() {
                    self.tclk.set_divider(byte);
                    self.respond(replies::ACK);
                }
            }
            State::SetSclk => {
                if let Some(byte) = self.host.read() {
                    self.sclk_divider = (self.sclk_divider >> 8) | ((byte as u16) << 8);
                    if self.counter == 0 {
                        self.respond(replies::ACK);
                    } else {
                        self.counter -= 1;
                    }
                }
            }
        }
    }

    fn dispatch(&mut self) {
        self.state = match self.request {
            commands::VERSION => {
                self.response = BRIDGE_VERSION;
                State::Respond
            }
            commands::FLUSH => State::Flush,
            commands::RESET_TARGET => {
                self.pins.rst = false;
                self.counter = self.reset_hold - 1;
                State::ResetTarget
            }
            commands::FIFO_WRITE => State::FifoWrite,
            commands::TRANSACTION => {
                self.transaction.start();
                State::Transaction
            }
            commands::FIFO_READ => {
                self.counter = 3;
                State::FifoReadStart
            }
            commands::TIMER_COUNT => {
                self.counter = 0;
                State::TimerReport
            }
            commands::TIMER_STATUS => {
                self.response = if self.timer.running() {
                    replies::TIMER_RUNNING
                } else {
                    replies::TIMER_STOPPED
                };
                State::Respond
            }
            commands::SET_TCLK => State::SetTclk,
            commands::SET_SCLK => {
                self.counter = 1;
                State::SetSclk
            }
            _ => {
                self.response = replies::UNKNOWN;
                State::Respond
            }
        };
    }

    fn respond(&mut self, response: u8) {
        self.response = response;
        self.state = State::Respond;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDLE: TargetLines = TargetLines {
        txd: true,
        busy: false,
    };

    fn command(bridge: &mut Bridge, bytes: &[u8], reply_len: usize) -> Vec<u8> {
        command_with(bridge, bytes, reply_len, IDLE)
    }

    fn command_with(
        bridge: &mut Bridge,
        bytes: &[u8],
        reply_len: usize,
        lines: TargetLines,
    ) -> Vec<u8> {
        bridge.host_mut().feed(bytes);
        let mut out = vec![];
        for _ in 0..100_000 {
            if out.len() == reply_len && bridge.state() == State::Idle && !bridge.host.readable() {
                break;
            }
            bridge.tick(lines);
            while let Some(b) = bridge.host_mut().take() {
                out.push(b);
            }
        }
        out
    }

    #[test]
    fn version_replies_ascii_zero() {
        let mut bridge = Bridge::new();
        assert_eq!(command(&mut bridge, b"v", 1), b"0");
    }

    #[test]
    fn unknown_command_replies_question_mark() {
        let mut bridge = Bridge::new();
        assert_eq!(command(&mut bridge, b"x", 1), b"?");
        assert_eq!(command(&mut bridge, &[0x00], 1), b"?");
    }

    #[test]
    fn fifo_write_acks_and_stores() {
        let mut bridge = Bridge::new();
        assert_eq!(command(&mut bridge, b"wA", 1), b".");
        assert_eq!(bridge.outbound().len(), 1);
    }

    #[test]
    fn fifo_write_when_full_drops_byte() {
        let mut bridge = Bridge::new();
        let mut stuffing = vec![];
        for i in 0..FIFO_DEPTH {
            stuffing.extend_from_slice(&[b'w', i as u8]);
        }
        let acks = command(&mut bridge, &stuffing, FIFO_DEPTH);
        assert!(acks.iter().all(|&a| a == b'.'));
        assert!(bridge.outbound().is_full());

        assert_eq!(command(&mut bridge, b"wZ", 1), b"!");
        assert_eq!(bridge.outbound().len(), FIFO_DEPTH);
    }

    #[test]
    fn flush_empties_fifos() {
        let mut bridge = Bridge::new();
        command(&mut bridge, b"w1w2w3", 3);
        assert_eq!(bridge.outbound().len(), 3);
        assert_eq!(command(&mut bridge, b"f", 1), b".");
        assert!(bridge.outbound().is_empty());
        assert!(bridge.inbound().is_empty());
    }

    #[test]
    fn read_streams_filler_when_empty() {
        let mut bridge = Bridge::new();
        let out = command(&mut bridge, &[b'R', 5, 0, 0, 0], 5);
        assert_eq!(out, vec![0xff; 5]);
    }

    #[test]
    fn read_of_zero_bytes_streams_nothing() {
        let mut bridge = Bridge::new();
        assert!(command(&mut bridge, &[b'R', 0, 0, 0, 0], 0).is_empty());
        assert_eq!(command(&mut bridge, b"v", 1), b"0");
    }

    #[test]
    fn set_dividers() {
        let mut bridge = Bridge::new();
        assert_eq!(command(&mut bridge, &[b's', 1], 1), b".");
        assert_eq!(bridge.tclk_divider(), 1);
        assert_eq!(command(&mut bridge, &[b'S', 0x7f, 0x01], 1), b".");
        assert_eq!(bridge.sclk_divider(), 0x017f);
    }

    #[test]
    fn reset_pulses_rst_and_idles_sclk() {
        let mut bridge = Bridge::new().with_reset_hold(10);
        bridge.host_mut().feed(b"r");
        bridge.tick(IDLE);
        bridge.tick(IDLE);
        assert_eq!(bridge.state(), State::ResetTarget);
        assert!(!bridge.pins().rst);
        assert_eq!(command(&mut bridge, &[], 1), b".");
        assert!(bridge.pins().rst);
        assert!(bridge.pins().sclk);
    }

    #[test]
    fn timer_reports_status_and_count() {
        let mut bridge = Bridge::new();
        let busy = TargetLines { busy: true, ..IDLE };
        assert_eq!(command(&mut bridge, b"T", 1), b"s");

        for _ in 0..0x0102 {
            bridge.tick(busy);
        }
        assert!(bridge.timer().running());
        assert_eq!(command_with(&mut bridge, b"T", 1, busy), b"r");
        let before = bridge.timer().count();
        bridge.tick(IDLE);
        bridge.tick(IDLE);
        bridge.tick(IDLE);
        assert!(!bridge.timer().running());
        let count = bridge.timer().count();
        assert!(count >= before);
        let out = command(&mut bridge, b"t", 4);
        assert_eq!(out, count.to_le_bytes());
        assert_eq!(command(&mut bridge, b"T", 1), b"s");
    }

    #[test]
    fn transaction_echoes_each_staged_byte() {
        let mut bridge = Bridge::new();
        command(&mut bridge, &[b'S', 1, 0], 1);
        command(&mut bridge, b"wAwBwC", 3);

        // Target that ties its output to the bridge data line.
        bridge.host_mut().feed(b"W");
        let mut out = vec![];
        let mut lines = IDLE;
        for _ in 0..10_000 {
            bridge.tick(lines);
            lines.txd = bridge.pins().rxd;
            while let Some(b) = bridge.host_mut().take() {
                out.push(b);
            }
            if !out.is_empty() {
                break;
            }
        }
        assert_eq!(out, b".");
        assert!(bridge.outbound().is_empty());
        assert_eq!(bridge.inbound().len(), 3);
        assert_eq!(command(&mut bridge, &[b'R', 3, 0, 0, 0], 3), b"ABC");
    }
}
