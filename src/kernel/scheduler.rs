//! Round-robin scheduler
//!
//! One rotation per timer tick, by terminal slot rather than by process:
//! the slot table (`[Option<Pid>; NUM_TERMINALS]`) is the only path the
//! scheduler takes to a PCB during a switch. A terminal whose slot is
//! empty keeps its place in the rotation and merely skips context restore;
//! a terminal that has never been activated gets a base shell spawned
//! synchronously the first time the rotation reaches it, and that spawn
//! path ends in a privilege-level transition instead of returning here.

use super::Kernel;
use super::platform::SavedContext;
use super::process::{Pid, TerminalId};
use super::terminal::{NUM_TERMINALS, VideoFrame};

/// Scheduler state: the slot table, the current rotation position, and the
/// one-shot flag for the boot-time display correction.
#[derive(Debug)]
pub struct Scheduler {
    /// One slot per terminal; the PCB currently eligible for CPU time.
    pub slots: [Option<Pid>; NUM_TERMINALS],
    /// Terminal the rotation currently favors.
    pub current: usize,
    first_dispatch_done: bool,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            slots: [None; NUM_TERMINALS],
            current: 0,
            first_dispatch_done: false,
        }
    }

    /// PCB scheduled for the terminal the rotation currently favors.
    pub fn current_pid(&self) -> Option<Pid> {
        self.slots[self.current]
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel {
    /// One scheduler rotation. Runs on every timer tick with the timer's
    /// interrupt line already acknowledged.
    pub fn timer_tick(&mut self) {
        let current = self.scheduler.current;
        let next = (current + 1) % NUM_TERMINALS;

        // Save the outgoing context into its PCB.
        if let Some(pid) = self.scheduler.slots[current] {
            let _irq = self.irq.lock();
            let ctx = self.platform.save_context();
            let top = self.platform.kernel_stack_top();
            if let Some(pcb) = self.pcbs.get_mut(pid) {
                pcb.kernel_sp = ctx.sp;
                pcb.kernel_bp = ctx.bp;
                pcb.kstack_top = top;
            }
        }

        // A terminal the rotation has never reached gets its base shell
        // now. `execute` ends in a user-mode transition, so the rest of
        // this tick is skipped on that path; on failure the terminal is
        // deactivated again and the spawn retries next rotation.
        if !self.terminals.get(next).active {
            self.terminals.get_mut(next).active = true;
            self.scheduler.current = next;
            self.switch_terminal(next);
            if let Err(err) = self.sys_execute("shell") {
                log::error!("base shell spawn on {} failed: {}", TerminalId(next), err);
                self.terminals.get_mut(next).active = false;
            }
            return;
        }

        self.scheduler.current = next;

        // Reconcile the video window: the favored terminal writes to real
        // video memory only while it is also the one displayed.
        let frame = if self.terminals.displayed == next {
            VideoFrame::Live
        } else {
            VideoFrame::Cache(next)
        };
        self.paging.remap_video_window(frame.phys());

        // Boot-time ordering artifact: the spawn sequence leaves the
        // display on the last terminal activated; the first normal tick
        // forces it back onto the scheduled terminal, once.
        if !self.scheduler.first_dispatch_done {
            self.scheduler.first_dispatch_done = true;
            self.switch_terminal(next);
        }

        // Restore the incoming context. An empty slot is a normal
        // transient (mid shell respawn): skip restore, keep the rotation.
        let Some(pid) = self.scheduler.slots[next] else {
            return;
        };
        let Some(pcb) = self.pcbs.get(pid) else {
            return;
        };
        let (sp, bp, top) = (pcb.kernel_sp, pcb.kernel_bp, pcb.kstack_top);

        let _irq = self.irq.lock();
        self.paging.remap_user_process(pid);
        self.platform.set_kernel_stack_top(top);
        self.platform.restore_context(SavedContext { sp, bp });
    }
}

#[cfg(test)]
mod tests {
    use crate::kernel::tests::test_kernel;
    use crate::kernel::terminal::NUM_TERMINALS;

    #[test]
    fn rotation_is_strict_round_robin() {
        let mut kernel = test_kernel();
        // Drive the boot spawns until every terminal holds a shell.
        for _ in 0..NUM_TERMINALS {
            kernel.timer_tick();
        }
        assert!(kernel.scheduler.slots.iter().all(Option::is_some));

        let mut visited = Vec::new();
        for _ in 0..6 {
            kernel.timer_tick();
            visited.push(kernel.scheduler.current);
        }
        // Spawn order ends with terminal 0 scheduled, so rotation resumes at 1
        assert_eq!(visited, vec![1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn empty_slot_skips_restore_but_not_rotation() {
        let mut kernel = test_kernel();
        for _ in 0..NUM_TERMINALS {
            kernel.timer_tick();
        }
        // Vacate terminal 1's slot and watch the rotation pass through it
        kernel.scheduler.slots[1] = None;
        let restored_before = kernel.machine().unwrap().transitions.len();
        kernel.timer_tick(); // -> 1, no restore
        assert_eq!(kernel.scheduler.current, 1);
        kernel.timer_tick(); // -> 2, restores
        assert_eq!(kernel.scheduler.current, 2);
        assert!(kernel.machine().unwrap().transitions.len() > restored_before);
    }

    #[test]
    fn restore_remaps_user_paging_for_incoming_pid() {
        let mut kernel = test_kernel();
        for _ in 0..NUM_TERMINALS {
            kernel.timer_tick();
        }
        kernel.timer_tick();
        let pid = kernel.scheduler.current_pid().unwrap();
        let expected = crate::kernel::paging::Paging::user_frame_base(pid);
        let user_phys = kernel
            .paging
            .translate(crate::kernel::paging::USER_VIRT_BASE)
            .unwrap();
        assert_eq!(user_phys, expected);
    }
}
