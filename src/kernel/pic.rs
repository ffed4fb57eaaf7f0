//! Interrupt controller abstraction
//!
//! Two cascaded 8259 controllers: the master owns lines 0-7, the slave
//! lines 8-15, with master line 2 wired to the slave's output. The mask
//! registers are mirrored here so enable/disable are single read-modify-
//! write operations; acknowledgement for slave lines must signal both
//! chips or interrupts on the cascade get lost.
//!
//! This is a fire-and-forget hardware-register interface: no blocking, no
//! failure returns, out-of-range lines are no-ops.

use super::platform::PortBus;

pub const MASTER_CMD: u16 = 0x20;
pub const MASTER_DATA: u16 = 0x21;
pub const SLAVE_CMD: u16 = 0xA0;
pub const SLAVE_DATA: u16 = 0xA1;

/// Cascade line on the master reserved for the slave controller.
pub const CASCADE_IRQ: u8 = 2;

const ICW1: u8 = 0x11;
const ICW2_MASTER: u8 = 0x20;
const ICW2_SLAVE: u8 = 0x28;
const ICW3_MASTER: u8 = 0x04;
const ICW3_SLAVE: u8 = 0x02;
const ICW4: u8 = 0x01;
const EOI: u8 = 0x60;

/// Programmable interrupt controller pair.
#[derive(Debug)]
pub struct Pic {
    master_mask: u8,
    slave_mask: u8,
}

impl Pic {
    /// Both controllers start fully masked.
    pub fn new() -> Self {
        Self {
            master_mask: 0xFF,
            slave_mask: 0xFF,
        }
    }

    /// Program the initialization command words and unmask the cascade line
    /// so slave interrupts can reach the CPU at all.
    pub fn init(&mut self, bus: &mut dyn PortBus) {
        bus.outb(MASTER_CMD, ICW1);
        bus.outb(SLAVE_CMD, ICW1);

        // Vector offsets
        bus.outb(MASTER_DATA, ICW2_MASTER);
        bus.outb(SLAVE_DATA, ICW2_SLAVE);

        // Cascade wiring: slave on master line 2
        bus.outb(MASTER_DATA, ICW3_MASTER);
        bus.outb(SLAVE_DATA, ICW3_SLAVE);

        bus.outb(MASTER_DATA, ICW4);
        bus.outb(SLAVE_DATA, ICW4);

        self.enable(bus, CASCADE_IRQ);
    }

    /// Unmask one interrupt line.
    pub fn enable(&mut self, bus: &mut dyn PortBus, irq: u8) {
        if irq > 15 {
            return;
        }
        if irq < 8 {
            self.master_mask &= !(1 << irq);
            bus.outb(MASTER_DATA, self.master_mask);
        } else {
            self.slave_mask &= !(1 << (irq - 8));
            bus.outb(SLAVE_DATA, self.slave_mask);
        }
    }

    /// Mask one interrupt line.
    pub fn disable(&mut self, bus: &mut dyn PortBus, irq: u8) {
        if irq > 15 {
            return;
        }
        if irq < 8 {
            self.master_mask |= 1 << irq;
            bus.outb(MASTER_DATA, self.master_mask);
        } else {
            self.slave_mask |= 1 << (irq - 8);
            bus.outb(SLAVE_DATA, self.slave_mask);
        }
    }

    /// Send end-of-interrupt. For slave lines the slave is signalled first,
    /// then the master's cascade line.
    pub fn acknowledge(&mut self, bus: &mut dyn PortBus, irq: u8) {
        if irq > 15 {
            return;
        }
        if irq >= 8 {
            bus.outb(SLAVE_CMD, EOI | (irq - 8));
            bus.outb(MASTER_CMD, EOI | CASCADE_IRQ);
        } else {
            bus.outb(MASTER_CMD, EOI | irq);
        }
    }

    /// Whether a line is currently unmasked.
    pub fn is_enabled(&self, irq: u8) -> bool {
        if irq > 15 {
            return false;
        }
        if irq < 8 {
            self.master_mask & (1 << irq) == 0
        } else {
            self.slave_mask & (1 << (irq - 8)) == 0
        }
    }
}

impl Default for Pic {
    fn default() -> Self {
        Self::new()
    }
}
