//! Kernel core
//!
//! All subsystem state lives in one `Kernel` object owned by the embedding:
//! interrupt controller, paging structures, process arena, terminal
//! multiplexer, scheduler, and the machine interface. Interrupt entry
//! points (`timer_interrupt`, `key_input`, `rtc_interrupt`,
//! `handle_exception`) and the system-call surface (`sys_*`) are methods on
//! it; there is no global state and no interior locking, only the
//! `IrqMask` guard marking the sections an interrupt handler must not
//! observe half-done.

pub mod fault;
pub mod paging;
pub mod pic;
pub mod platform;
pub mod process;
pub mod rtc;
pub mod scheduler;
pub mod syscall;
pub mod terminal;
pub mod timer;

#[cfg(test)]
mod invariants_test;

pub use fault::Exception;
pub use process::{Fd, Pid, TerminalId};
pub use syscall::SyscallError;

use crate::fs::Volume;

use paging::{Paging, PhysMemory};
use pic::Pic;
use platform::{IrqMask, MachineState, Platform, PortBus};
use process::PcbTable;
use rtc::Rtc;
use scheduler::Scheduler;
use syscall::AssignTable;
use terminal::{NUM_TERMINALS, TerminalMux, VideoMem};

/// Keyboard controller interrupt line.
pub const KEYBOARD_IRQ: u8 = 1;

/// The whole kernel. Construct with [`Kernel::boot`], then feed it
/// interrupts and system calls.
pub struct Kernel {
    pub pic: Pic,
    pub paging: Paging,
    pub phys: PhysMemory,
    pub pcbs: PcbTable,
    pub terminals: TerminalMux,
    pub video: VideoMem,
    pub scheduler: Scheduler,
    pub assign: AssignTable,
    pub rtc: Rtc,
    pub volume: Box<dyn Volume>,
    pub platform: Box<dyn Platform>,
    pub bus: Box<dyn PortBus>,
    pub irq: IrqMask,
}

impl Kernel {
    /// Bring the machine up: paging layout, interrupt controller, timer,
    /// and zeroed terminals. No process exists yet; the first timer ticks
    /// spawn the base shells.
    pub fn boot(
        volume: Box<dyn Volume>,
        platform: Box<dyn Platform>,
        mut bus: Box<dyn PortBus>,
    ) -> Self {
        let paging = Paging::new(NUM_TERMINALS);

        let mut pic = Pic::new();
        pic.init(bus.as_mut());
        pic.enable(bus.as_mut(), timer::TIMER_IRQ);
        pic.enable(bus.as_mut(), KEYBOARD_IRQ);
        pic.enable(bus.as_mut(), rtc::RTC_IRQ);

        timer::init(bus.as_mut());

        let mut video = VideoMem::new();
        let terminals = TerminalMux::new(&mut video, bus.as_mut());

        log::info!("kernel up: {NUM_TERMINALS} terminals, paging and timer programmed");

        Self {
            pic,
            paging,
            phys: PhysMemory::new(),
            pcbs: PcbTable::new(),
            terminals,
            video,
            scheduler: Scheduler::new(),
            assign: AssignTable::new(),
            rtc: Rtc::new(),
            volume,
            platform,
            bus,
            irq: IrqMask::new(),
        }
    }

    /// PCB scheduled on the terminal the rotation currently favors.
    pub fn current_pid(&self) -> Option<Pid> {
        self.scheduler.current_pid()
    }

    /// Keyboard interrupt entry: acknowledge the line, then route the byte
    /// to the displayed terminal's line buffer.
    pub fn key_input(&mut self, byte: u8) {
        self.pic.acknowledge(self.bus.as_mut(), KEYBOARD_IRQ);
        let displayed = self.terminals.displayed;
        self.terminals.putc_to_buffer(displayed, byte);
    }

    /// RTC interrupt entry: acknowledge the slave line and deliver a tick.
    pub fn rtc_interrupt(&mut self) {
        self.pic.acknowledge(self.bus.as_mut(), rtc::RTC_IRQ);
        self.rtc.tick();
    }

    /// Change the physically displayed terminal, typically from a keyboard
    /// chord. Safe against the scheduler: the whole exchange runs masked.
    pub fn switch_terminal(&mut self, target: usize) {
        let _irq = self.irq.lock();
        let scheduled = self.scheduler.current;
        self.terminals.switch_to(
            target,
            scheduled,
            &mut self.paging,
            &mut self.video,
            self.bus.as_mut(),
        );
    }

    /// The recording platform, when the kernel was booted on one.
    pub fn machine(&self) -> Option<&MachineState> {
        self.platform.as_any().downcast_ref()
    }
}
