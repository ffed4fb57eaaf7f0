//! Machine interface
//!
//! Everything the core needs from the CPU but cannot express portably:
//! register save/restore for context switches, the privilege-level
//! transition into user mode, the kernel-stack-top register (the TSS esp0
//! slot on x86), port I/O, and the idle wait used by blocking reads.
//!
//! The rest of the kernel is written against these traits and never touches
//! a register directly. `MachineState` is the recording implementation used
//! at boot and in tests; a bare-metal port would supply its own.

/// Saved stack/base pointer pair, the minimal context the scheduler and the
/// process-lifecycle layer move between kernel stacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SavedContext {
    pub sp: u32,
    pub bp: u32,
}

/// Port-mapped I/O. The PIC, the PIT, and the VGA cursor registers are the
/// only consumers.
pub trait PortBus {
    fn outb(&mut self, port: u16, value: u8);
    fn inb(&mut self, port: u16) -> u8;
}

/// CPU-level operations for context switching and privilege transitions.
pub trait Platform {
    /// Capture the current kernel stack/base pointers.
    fn save_context(&mut self) -> SavedContext;

    /// Resume execution at a previously saved point. On real hardware this
    /// does not return to the caller; the recording implementation just
    /// notes the switch.
    fn restore_context(&mut self, ctx: SavedContext);

    /// Drop to user mode at `entry` with the given user stack pointer,
    /// interrupts enabled.
    fn enter_user_mode(&mut self, entry: u32, user_sp: u32);

    /// Unwind to `ctx` with `status` in the return-value register - the
    /// tail of `halt`, emulating a function return into the parent.
    fn halt_return(&mut self, ctx: SavedContext, status: i32);

    /// Set the kernel-stack-top register used on the next privilege-level
    /// transition (tss.esp0).
    fn set_kernel_stack_top(&mut self, top: u32);

    /// Current kernel-stack-top register value.
    fn kernel_stack_top(&self) -> u32;

    /// Relax while waiting for an interrupt to change observable state.
    /// The terminal line-read and the RTC read spin on this.
    fn idle(&mut self);

    /// Downcast hook, so a host embedding can get its concrete platform
    /// back out of the kernel.
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Interrupt mask state. Every multi-field update shared with interrupt
/// handlers goes through a guard from here; the guard restores the previous
/// depth on drop, so sections nest.
#[derive(Debug, Default)]
pub struct IrqMask {
    depth: u32,
}

impl IrqMask {
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Enter an interrupt-masked critical section.
    pub fn lock(&mut self) -> IrqGuard<'_> {
        self.depth += 1;
        IrqGuard { mask: self }
    }

    /// Whether interrupts are currently masked.
    pub fn is_masked(&self) -> bool {
        self.depth > 0
    }
}

/// RAII guard for a masked section.
pub struct IrqGuard<'a> {
    mask: &'a mut IrqMask,
}

impl Drop for IrqGuard<'_> {
    fn drop(&mut self) {
        self.mask.depth -= 1;
    }
}

// ========== RECORDING IMPLEMENTATIONS ==========

/// A machine transition observed by `MachineState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// `restore_context` resumed a saved kernel context.
    Restored(SavedContext),
    /// `enter_user_mode` dropped to user code.
    EnteredUser { entry: u32, user_sp: u32 },
    /// `halt_return` unwound into a parent with an exit status.
    HaltReturned { status: i32 },
}

/// Recording platform: hands out monotonically growing fake stack pointers
/// and keeps a transcript of every transition.
#[derive(Debug, Default)]
pub struct MachineState {
    pub transitions: Vec<Transition>,
    pub idle_count: u64,
    kernel_stack_top: u32,
    next_sp: u32,
}

impl MachineState {
    pub fn new() -> Self {
        Self {
            transitions: Vec::new(),
            idle_count: 0,
            kernel_stack_top: 0,
            next_sp: 0x0070_0000,
        }
    }

    /// Last recorded user-mode entry, if any.
    pub fn last_user_entry(&self) -> Option<(u32, u32)> {
        self.transitions.iter().rev().find_map(|t| match t {
            Transition::EnteredUser { entry, user_sp } => Some((*entry, *user_sp)),
            _ => None,
        })
    }

    /// Last recorded halt status, if any.
    pub fn last_halt_status(&self) -> Option<i32> {
        self.transitions.iter().rev().find_map(|t| match t {
            Transition::HaltReturned { status } => Some(*status),
            _ => None,
        })
    }
}

impl Platform for MachineState {
    fn save_context(&mut self) -> SavedContext {
        self.next_sp -= 0x40;
        SavedContext {
            sp: self.next_sp,
            bp: self.next_sp + 0x20,
        }
    }

    fn restore_context(&mut self, ctx: SavedContext) {
        self.transitions.push(Transition::Restored(ctx));
    }

    fn enter_user_mode(&mut self, entry: u32, user_sp: u32) {
        self.transitions.push(Transition::EnteredUser { entry, user_sp });
    }

    fn halt_return(&mut self, ctx: SavedContext, status: i32) {
        let _ = ctx;
        self.transitions.push(Transition::HaltReturned { status });
    }

    fn set_kernel_stack_top(&mut self, top: u32) {
        self.kernel_stack_top = top;
    }

    fn kernel_stack_top(&self) -> u32 {
        self.kernel_stack_top
    }

    fn idle(&mut self) {
        self.idle_count += 1;
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Recording port bus: remembers every `outb` and answers reads with zero.
#[derive(Debug, Default)]
pub struct RecordingBus {
    pub writes: Vec<(u16, u8)>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self { writes: Vec::new() }
    }

    /// All values written to one port, in order.
    pub fn written_to(&self, port: u16) -> Vec<u8> {
        self.writes
            .iter()
            .filter(|(p, _)| *p == port)
            .map(|(_, v)| *v)
            .collect()
    }
}

impl PortBus for RecordingBus {
    fn outb(&mut self, port: u16, value: u8) {
        self.writes.push((port, value));
    }

    fn inb(&mut self, _port: u16) -> u8 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn irq_mask_nests() {
        let mut mask = IrqMask::new();
        assert!(!mask.is_masked());
        {
            let _outer = mask.lock();
        }
        assert!(!mask.is_masked());

        let mut mask = IrqMask::new();
        let g1 = mask.lock();
        drop(g1);
        assert!(!mask.is_masked());
    }

    #[test]
    fn machine_state_records_transitions() {
        let mut m = MachineState::new();
        m.enter_user_mode(0x0804_8000, 0x083F_FFFC);
        m.halt_return(SavedContext::default(), 256);
        assert_eq!(m.last_user_entry(), Some((0x0804_8000, 0x083F_FFFC)));
        assert_eq!(m.last_halt_status(), Some(256));
    }

    #[test]
    fn saved_contexts_are_distinct() {
        let mut m = MachineState::new();
        let a = m.save_context();
        let b = m.save_context();
        assert_ne!(a.sp, b.sp);
    }
}
