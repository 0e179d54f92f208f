//! Busy-duration timer, the side channel measured by the host.

/// Counts ticks while the (registered) busy line is asserted.
///
/// Armed on a rising edge while stopped, which also clears the count. Stops
/// on the falling edge and keeps its value until the next rising edge.
#[derive(Debug, Clone, Default)]
pub struct BusyTimer {
    count: u32,
    running: bool,
    last_busy: bool,
}

impl BusyTimer {
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn running(&self) -> bool {
        self.running
    }

    /// `busy` must be the registered copy of the target line.
    pub fn tick(&mut self, busy: bool) {
        if !self.running {
            if !self.last_busy && busy {
                self.running = true;
                self.count = 0;
            }
        } else if !busy {
            self.running = false;
        } else {
            self.count = self.count.wrapping_add(1);
        }
        self.last_busy = busy;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(timer: &mut BusyTimer, busy: bool, ticks: usize) -> Vec<u32> {
        (0..ticks)
            .map(|_| {
                timer.tick(busy);
                timer.count()
            })
            .collect()
    }

    #[test]
    fn counts_while_busy_and_freezes_after() {
        let mut timer = BusyTimer::default();
        run(&mut timer, false, 3);
        assert!(!timer.running());

        let counts = run(&mut timer, true, 10);
        assert!(timer.running());
        assert!(counts.windows(2).all(|w| w[1] == w[0] + 1));
        let frozen = timer.count();
        assert_eq!(frozen, 9);

        timer.tick(false);
        assert!(!timer.running());
        assert_eq!(run(&mut timer, false, 5), vec![frozen; 5]);
    }

    #[test]
    fn next_assertion_restarts_from_zero() {
        let mut timer = BusyTimer::default();
        run(&mut timer, true, 20);
        timer.tick(false);
        assert_eq!(timer.count(), 19);

        timer.tick(true);
        assert!(timer.running());
        assert_eq!(timer.count(), 0);
        timer.tick(true);
        assert_eq!(timer.count(), 1);
    }

    #[test]
    fn line_already_high_does_not_arm() {
        let mut timer = BusyTimer {
            last_busy: true,
            ..Default::default()
        };
        run(&mut timer, true, 4);
        assert!(!timer.running());
        assert_eq!(timer.count(), 0);
    }
}
