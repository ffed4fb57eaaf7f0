//! CPU exceptions
//!
//! An exception raised while a user program runs kills that program, not
//! the machine: the handler logs the vector and halts the offender with a
//! status the parent can tell apart from any ordinary exit. With no
//! process scheduled there is nothing to kill and the kernel itself is at
//! fault, so the platform parks.

use super::Kernel;

/// The x86 exception vectors the kernel distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    DivideError,
    Debug,
    NonMaskableInterrupt,
    Breakpoint,
    Overflow,
    BoundRangeExceeded,
    InvalidOpcode,
    DeviceNotAvailable,
    DoubleFault,
    InvalidTss,
    SegmentNotPresent,
    StackSegmentFault,
    GeneralProtectionFault,
    PageFault,
    FloatingPointError,
    AlignmentCheck,
    MachineCheck,
    SimdFloatingPointError,
}

impl Exception {
    /// Hardware vector number.
    pub fn vector(self) -> u8 {
        match self {
            Exception::DivideError => 0,
            Exception::Debug => 1,
            Exception::NonMaskableInterrupt => 2,
            Exception::Breakpoint => 3,
            Exception::Overflow => 4,
            Exception::BoundRangeExceeded => 5,
            Exception::InvalidOpcode => 6,
            Exception::DeviceNotAvailable => 7,
            Exception::DoubleFault => 8,
            Exception::InvalidTss => 10,
            Exception::SegmentNotPresent => 11,
            Exception::StackSegmentFault => 12,
            Exception::GeneralProtectionFault => 13,
            Exception::PageFault => 14,
            Exception::FloatingPointError => 16,
            Exception::AlignmentCheck => 17,
            Exception::MachineCheck => 18,
            Exception::SimdFloatingPointError => 19,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Exception::DivideError => "divide error",
            Exception::Debug => "debug",
            Exception::NonMaskableInterrupt => "non-maskable interrupt",
            Exception::Breakpoint => "breakpoint",
            Exception::Overflow => "overflow",
            Exception::BoundRangeExceeded => "bound range exceeded",
            Exception::InvalidOpcode => "invalid opcode",
            Exception::DeviceNotAvailable => "device not available",
            Exception::DoubleFault => "double fault",
            Exception::InvalidTss => "invalid TSS",
            Exception::SegmentNotPresent => "segment not present",
            Exception::StackSegmentFault => "stack segment fault",
            Exception::GeneralProtectionFault => "general protection fault",
            Exception::PageFault => "page fault",
            Exception::FloatingPointError => "floating point error",
            Exception::AlignmentCheck => "alignment check",
            Exception::MachineCheck => "machine check",
            Exception::SimdFloatingPointError => "SIMD floating point error",
        }
    }
}

impl std::fmt::Display for Exception {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (vector {})", self.name(), self.vector())
    }
}

impl Kernel {
    /// Exception entry point. Kills the faulting process; the widened halt
    /// status lets the parent distinguish a fault from `exit(255)`.
    pub fn handle_exception(&mut self, exception: Exception) {
        match self.current_pid() {
            Some(pid) => {
                log::error!("{exception} in {pid}, killing it");
                if let Err(err) = self.sys_halt(u8::MAX) {
                    log::error!("halt of faulting {pid} failed: {err}");
                }
            }
            None => {
                log::error!("{exception} with no process scheduled, parking");
                self.platform.idle();
            }
        }
    }
}
