//! RTC-style character device
//!
//! The minimal collaborator behind the fourth ops table: open resets the
//! rate to 2Hz, a write reprograms the rate (powers of two, 2..=1024Hz
//! only), and a read blocks until the next tick arrives from the interrupt
//! path. The real device driver is out of scope; this is just enough state
//! machine for the descriptor dispatch to exercise.

use super::platform::Platform;

pub const RTC_IRQ: u8 = 8;

const MIN_HZ: u32 = 2;
const MAX_HZ: u32 = 1024;

/// Virtualized periodic tick source.
#[derive(Debug)]
pub struct Rtc {
    frequency: u32,
    ticks: u64,
    tick_pending: bool,
}

impl Rtc {
    pub fn new() -> Self {
        Self {
            frequency: MIN_HZ,
            ticks: 0,
            tick_pending: false,
        }
    }

    /// The type-specific open hook: reset to the default 2Hz rate.
    pub fn open(&mut self) {
        self.frequency = MIN_HZ;
    }

    pub fn frequency(&self) -> u32 {
        self.frequency
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Reprogram the tick rate. Only powers of two within range stick.
    pub fn set_frequency(&mut self, hz: u32) -> bool {
        if hz.is_power_of_two() && (MIN_HZ..=MAX_HZ).contains(&hz) {
            self.frequency = hz;
            true
        } else {
            false
        }
    }

    /// Interrupt-path notification that a tick fired.
    pub fn tick(&mut self) {
        self.ticks += 1;
        self.tick_pending = true;
    }

    /// Block until a tick is pending, then consume it. Spins on the
    /// platform idle hook; the interrupt path calls `tick`.
    pub fn wait_tick(&mut self, platform: &mut dyn Platform) {
        while !self.tick_pending {
            platform.idle();
        }
        self.tick_pending = false;
    }
}

impl Default for Rtc {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::platform::MachineState;

    #[test]
    fn frequency_accepts_powers_of_two_in_range() {
        let mut rtc = Rtc::new();
        assert!(rtc.set_frequency(2));
        assert!(rtc.set_frequency(1024));
        assert!(!rtc.set_frequency(3));
        assert!(!rtc.set_frequency(2048));
        assert!(!rtc.set_frequency(0));
        assert_eq!(rtc.frequency(), 1024);
    }

    #[test]
    fn open_resets_rate() {
        let mut rtc = Rtc::new();
        rtc.set_frequency(512);
        rtc.open();
        assert_eq!(rtc.frequency(), 2);
    }

    #[test]
    fn wait_consumes_a_pending_tick() {
        let mut rtc = Rtc::new();
        let mut platform = MachineState::new();
        rtc.tick();
        rtc.wait_tick(&mut platform);
        assert_eq!(rtc.ticks(), 1);
        assert_eq!(platform.idle_count, 0);
    }
}
