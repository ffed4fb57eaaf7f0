//! System timer
//!
//! Programs PIT channel 0 as a 100Hz rate generator; every tick drives one
//! scheduler rotation. The interrupt path acknowledges the line before
//! rescheduling, matching the hardware handler's ordering.

use super::Kernel;
use super::platform::PortBus;

pub const PIT_CHANNEL_0: u16 = 0x40;
pub const PIT_MODE_REG: u16 = 0x43;
pub const TIMER_IRQ: u8 = 0;

const PIT_HZ: u32 = 1_193_182;
/// Scheduler tick rate: 100Hz, 10ms per tick.
pub const TICK_HZ: u32 = 100;

/// Select channel 0, lobyte/hibyte access, rate generator mode.
const PIT_COMMAND: u8 = 0x34;

/// Program the PIT divisor for the tick rate.
pub fn init(bus: &mut dyn PortBus) {
    let divisor = (PIT_HZ / TICK_HZ) as u16;
    bus.outb(PIT_MODE_REG, PIT_COMMAND);
    bus.outb(PIT_CHANNEL_0, (divisor & 0xFF) as u8);
    bus.outb(PIT_CHANNEL_0, (divisor >> 8) as u8);
}

impl Kernel {
    /// Timer interrupt entry: acknowledge the line, then reschedule.
    pub fn timer_interrupt(&mut self) {
        self.pic.acknowledge(self.bus.as_mut(), TIMER_IRQ);
        self.timer_tick();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::platform::RecordingBus;

    #[test]
    fn init_programs_100hz_divisor() {
        let mut bus = RecordingBus::new();
        init(&mut bus);
        let divisor = (PIT_HZ / TICK_HZ) as u16;
        assert_eq!(
            bus.writes,
            vec![
                (PIT_MODE_REG, PIT_COMMAND),
                (PIT_CHANNEL_0, (divisor & 0xFF) as u8),
                (PIT_CHANNEL_0, (divisor >> 8) as u8),
            ]
        );
    }
}
