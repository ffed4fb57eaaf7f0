//! Process control blocks and the file-descriptor table
//!
//! A process is one of at most six slots in a fixed arena. The original
//! design carved PCBs out of kernel memory by address arithmetic
//! (8MB - (pid + 1) * 8KB); the arena keeps the fixed-capacity, no-heap
//! property while turning the arithmetic into array indexing. The per-pid
//! kernel-stack-top value survives as a pure computation because the
//! scheduler still saves and restores it.
//!
//! Descriptor slots 0 and 1 are always the terminal's stdin/stdout and are
//! never closed; slots 2..7 are dynamic and must have their in-use flag
//! cleared before reuse.

use super::paging::PAGE_4K;

/// Process identifier, an index into the bounded pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid(pub usize);

impl std::fmt::Display for Pid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pid:{}", self.0)
    }
}

/// Virtual terminal identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TerminalId(pub usize);

impl std::fmt::Display for TerminalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "term:{}", self.0)
    }
}

/// File descriptor, an index into a process's descriptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fd(pub usize);

impl Fd {
    pub const STDIN: Fd = Fd(0);
    pub const STDOUT: Fd = Fd(1);
}

impl std::fmt::Display for Fd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fd:{}", self.0)
    }
}

/// Maximum live processes.
pub const MAX_PROCESSES: usize = 6;
/// Descriptor table size per process.
pub const MAX_FDS: usize = 8;
/// Maximum stored argument length.
pub const MAX_ARG: usize = 32;

/// Kernel stack region reserved per process below the 8MB ceiling.
pub const KERNEL_STACK_SIZE: u32 = 2 * PAGE_4K;
const KERNEL_CEILING: u32 = 0x80_0000;

/// Operations bundle a descriptor dispatches through, selected at open
/// time from the target's type tag. A closed enum instead of the
/// function-pointer tables the original used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileOps {
    /// Terminal input (line-buffered read).
    TerminalIn,
    /// Terminal output (screen write).
    #[default]
    TerminalOut,
    /// RTC-style character device.
    Rtc,
    /// Directory listing.
    Directory,
    /// Regular file on the read-only volume.
    RegularFile,
}

/// One descriptor slot: the ops selector, the backing inode (meaningful
/// only for volume-backed descriptors), a byte offset, and the in-use flag.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileDescriptor {
    pub ops: FileOps,
    pub inode: u32,
    pub position: u32,
    pub in_use: bool,
}

/// Per-process state.
#[derive(Debug, Clone)]
pub struct Pcb {
    pub pid: Pid,
    pub terminal: TerminalId,
    pub parent: Pid,
    /// Kernel stack/base pointers saved by the scheduler on preemption.
    pub kernel_sp: u32,
    pub kernel_bp: u32,
    /// Kernel-stack-top register value for the privilege-level transition.
    pub kstack_top: u32,
    /// Stack/base pointers captured at `execute` entry; `halt` unwinds here.
    pub entry_sp: u32,
    pub entry_bp: u32,
    /// Parsed command-line argument, if one was stored.
    pub args: Option<String>,
    pub fds: [FileDescriptor; MAX_FDS],
}

impl Pcb {
    pub fn new(pid: Pid, terminal: TerminalId, parent: Pid) -> Self {
        let mut pcb = Self {
            pid,
            terminal,
            parent,
            kernel_sp: 0,
            kernel_bp: 0,
            kstack_top: PcbTable::kernel_stack_top(pid),
            entry_sp: 0,
            entry_bp: 0,
            args: None,
            fds: [FileDescriptor::default(); MAX_FDS],
        };
        pcb.init_standard_descriptors();
        pcb
    }

    /// Bind slot 0 to terminal input and slot 1 to terminal output, both
    /// in use with inode and offset zeroed; the rest start free.
    pub fn init_standard_descriptors(&mut self) {
        self.fds = [FileDescriptor::default(); MAX_FDS];
        self.fds[0] = FileDescriptor {
            ops: FileOps::TerminalIn,
            in_use: true,
            ..Default::default()
        };
        self.fds[1] = FileDescriptor {
            ops: FileOps::TerminalOut,
            in_use: true,
            ..Default::default()
        };
    }

    /// First free dynamic descriptor slot, if any.
    pub fn free_fd(&self) -> Option<Fd> {
        (2..MAX_FDS).find(|&i| !self.fds[i].in_use).map(Fd)
    }
}

/// Fixed-capacity PCB arena indexed by process id.
#[derive(Debug, Default)]
pub struct PcbTable {
    slots: [Option<Pcb>; MAX_PROCESSES],
}

impl PcbTable {
    pub fn new() -> Self {
        Self {
            slots: Default::default(),
        }
    }

    /// Kernel-stack-top register value for `pid`: one fixed-size stack
    /// region per process below the kernel memory ceiling, minus one word
    /// of alignment slack.
    pub fn kernel_stack_top(pid: Pid) -> u32 {
        KERNEL_CEILING - pid.0 as u32 * KERNEL_STACK_SIZE - 4
    }

    /// Lowest free process id, if the pool is not exhausted.
    pub fn free_pid(&self) -> Option<Pid> {
        (0..MAX_PROCESSES)
            .find(|&i| self.slots[i].is_none())
            .map(Pid)
    }

    /// Install a PCB in its slot. The slot must be free; `execute` always
    /// pairs this with `free_pid`.
    pub fn insert(&mut self, pcb: Pcb) {
        let idx = pcb.pid.0;
        debug_assert!(self.slots[idx].is_none());
        self.slots[idx] = Some(pcb);
    }

    /// Tear down a process: the id returns to the pool and every
    /// descriptor flag dies with the slot.
    pub fn remove(&mut self, pid: Pid) -> Option<Pcb> {
        self.slots.get_mut(pid.0).and_then(Option::take)
    }

    pub fn get(&self, pid: Pid) -> Option<&Pcb> {
        self.slots.get(pid.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Pcb> {
        self.slots.get_mut(pid.0).and_then(Option::as_mut)
    }

    /// Number of live processes.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Iterate over live PCBs.
    pub fn iter(&self) -> impl Iterator<Item = &Pcb> {
        self.slots.iter().filter_map(Option::as_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_descriptors_are_reserved() {
        let pcb = Pcb::new(Pid(0), TerminalId(0), Pid(0));
        assert!(pcb.fds[0].in_use);
        assert_eq!(pcb.fds[0].ops, FileOps::TerminalIn);
        assert!(pcb.fds[1].in_use);
        assert_eq!(pcb.fds[1].ops, FileOps::TerminalOut);
        for i in 2..MAX_FDS {
            assert!(!pcb.fds[i].in_use);
        }
        assert_eq!(pcb.free_fd(), Some(Fd(2)));
    }

    #[test]
    fn arena_reuses_lowest_free_pid() {
        let mut table = PcbTable::new();
        assert_eq!(table.free_pid(), Some(Pid(0)));
        table.insert(Pcb::new(Pid(0), TerminalId(0), Pid(0)));
        table.insert(Pcb::new(Pid(1), TerminalId(1), Pid(1)));
        assert_eq!(table.free_pid(), Some(Pid(2)));

        table.remove(Pid(0));
        assert_eq!(table.free_pid(), Some(Pid(0)));
        assert_eq!(table.live_count(), 1);
    }

    #[test]
    fn pool_exhausts_at_capacity() {
        let mut table = PcbTable::new();
        for i in 0..MAX_PROCESSES {
            table.insert(Pcb::new(Pid(i), TerminalId(0), Pid(0)));
        }
        assert_eq!(table.free_pid(), None);
    }

    #[test]
    fn kernel_stack_tops_descend_per_pid() {
        let top0 = PcbTable::kernel_stack_top(Pid(0));
        let top1 = PcbTable::kernel_stack_top(Pid(1));
        assert_eq!(top0, 0x80_0000 - 4);
        assert_eq!(top0 - top1, KERNEL_STACK_SIZE);
    }
}
