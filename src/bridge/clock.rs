//! Free-running dividers and registered inputs.

/// Toggles an output every `divider + 1` ticks.
#[derive(Debug, Clone)]
pub struct ClockDivider {
    divider: u8,
    counter: u8,
    level: bool,
}

impl ClockDivider {
    pub fn new(divider: u8) -> Self {
        ClockDivider {
            divider,
            counter: 0,
            level: false,
        }
    }

    pub fn divider(&self) -> u8 {
        self.divider
    }

    /// Takes effect from the next toggle.
    pub fn set_divider(&mut self, divider: u8) {
        self.divider = divider;
    }

    pub fn level(&self) -> bool {
        self.level
    }

    pub fn tick(&mut self) {
        // counter may sit above a freshly lowered divider
        if self.counter >= self.divider {
            self.counter = 0;
            self.level = !self.level;
        } else {
            self.counter += 1;
        }
    }

    /// Output frequency for a given board clock.
    pub fn frequency(divider: u8, clock_hz: u32) -> u32 {
        clock_hz / (2 * (divider as u32 + 1))
    }
}

/// One-cycle-delayed copy of an external signal.
///
/// The raw line is only ever latched here; all logic reads `get()`, which
/// returns the value captured on the previous tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct Registered {
    value: bool,
}

impl Registered {
    pub fn get(&self) -> bool {
        self.value
    }

    pub fn latch(&mut self, raw: bool) {
        self.value = raw;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggles_every_divider_plus_one_ticks() {
        let mut clk = ClockDivider::new(4);
        let mut edges = vec![];
        let mut last = clk.level();
        for i in 0..20 {
            clk.tick();
            if clk.level() != last {
                edges.push(i);
                last = clk.level();
            }
        }
        assert_eq!(edges, vec![4, 9, 14, 19]);
    }

    #[test]
    fn default_divider_is_about_1_2_mhz() {
        assert_eq!(ClockDivider::frequency(4, 12_000_000), 1_200_000);
        assert_eq!(ClockDivider::frequency(0, 12_000_000), 6_000_000);
        assert_eq!(ClockDivider::frequency(1, 12_000_000), 3_000_000);
    }

    #[test]
    fn lowering_divider_recovers() {
        let mut clk = ClockDivider::new(100);
        for _ in 0..50 {
            clk.tick();
        }
        clk.set_divider(1);
        let before = clk.level();
        clk.tick();
        assert_ne!(clk.level(), before);
    }
}
