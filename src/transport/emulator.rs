//! In-process transport: a [`Bridge`] wired to a [`TargetModel`].
use anyhow::Result;

use super::Transport;
use crate::bridge::{Bridge, TargetModel};
use crate::simulator::SimulatedTarget;

/// Clock cycles without progress after which a read gives up. A byte
/// clocked out by a transaction counts as progress.
const DEFAULT_TIMEOUT_CYCLES: u64 = 2_000_000;
/// Reset pulse used instead of the full 10ms one.
const EMULATED_RESET_HOLD: u32 = 1_000;

pub struct EmulatorTransport<M: TargetModel = SimulatedTarget> {
    bridge: Bridge,
    target: M,
    timeout_cycles: u64,
}

impl<M: TargetModel> EmulatorTransport<M> {
    pub fn new(target: M) -> Self {
        Self::with_bridge(Bridge::new().with_reset_hold(EMULATED_RESET_HOLD), target)
    }

    pub fn with_bridge(bridge: Bridge, target: M) -> Self {
        EmulatorTransport {
            bridge,
            target,
            timeout_cycles: DEFAULT_TIMEOUT_CYCLES,
        }
    }

    pub fn with_timeout_cycles(mut self, cycles: u64) -> Self {
        self.timeout_cycles = cycles;
        self
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn target(&self) -> &M {
        &self.target
    }

    /// Advances bridge and target by one board clock.
    pub fn tick(&mut self) {
        let lines = self.target.lines();
        self.bridge.tick(lines);
        self.target.tick(self.bridge.pins());
    }
}

impl<M: TargetModel> Transport for EmulatorTransport<M> {
    fn send_raw(&mut self, raw: &[u8]) -> Result<()> {
        self.bridge.host_mut().feed(raw);
        Ok(())
    }

    fn recv_raw(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut n = 0;
        let mut idle = 0;
        while n < buf.len() {
            if let Some(byte) = self.bridge.host_mut().take() {
                buf[n] = byte;
                n += 1;
                idle = 0;
                continue;
            }
            if idle >= self.timeout_cycles {
                break;
            }
            let pending = self.bridge.outbound().len();
            self.tick();
            if self.bridge.outbound().len() < pending {
                idle = 0;
            } else {
                idle += 1;
            }
        }
        Ok(n)
    }
}
