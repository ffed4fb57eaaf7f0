//! System calls and process lifecycle
//!
//! `execute` and `halt` are the heart of the layer: execute parses the
//! command, validates the image, claims a pid, loads the program into its
//! user frame and drops to user mode; halt unwinds back into the parent's
//! kernel context with the exit status. Everything else dispatches through
//! the per-process descriptor table.
//!
//! A process's terminal identity is decided once, at execute time, from the
//! terminal the scheduler currently favors; every later read and write uses
//! the PCB's stored identity rather than re-deriving it.

use crate::fs::{ENTRY_POINT_OFFSET, EXEC_MAGIC, FileKind, MAX_NAME, VolumeError};

use super::Kernel;
use super::paging::{PAGE_4M, USER_VIRT_BASE, VIDMAP_VIRT};
use super::platform::SavedContext;
use super::process::{
    Fd, FileDescriptor, FileOps, MAX_ARG, MAX_FDS, MAX_PROCESSES, Pcb, PcbTable, Pid, TerminalId,
};
use super::terminal::{NUM_TERMINALS, TerminalError};

/// Virtual load address of a user program image.
pub const PROGRAM_VIRT: u32 = 0x0804_8000;
/// Image offset within the user 4MB region; bounds the loadable size.
const PROGRAM_OFFSET: u32 = PROGRAM_VIRT - USER_VIRT_BASE;

/// User stack pointer handed to a fresh process: top of the user region,
/// minus one word of slack.
pub const USER_STACK_TOP: u32 = USER_VIRT_BASE + PAGE_4M - 4;

/// System-call failure. Closed set; the ABI maps every variant to -1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    /// Descriptor out of range, unopened, or wrong direction.
    BadDescriptor,
    /// No free dynamic descriptor slot.
    NoFreeDescriptor,
    /// Name not present in the directory.
    NotFound,
    /// Command string empty or unparseable.
    InvalidCommand,
    /// Argument failed validation.
    InvalidArgument,
    /// No stored argument to return.
    NoArguments,
    /// Image lacks the executable signature.
    NotExecutable,
    /// Image does not fit the user region.
    ImageTooLarge,
    /// Process pool exhausted.
    TooManyProcesses,
    /// No process is scheduled on the current terminal.
    NoProcess,
    /// Pointer outside the user region.
    BadAddress,
    /// Write to a read-only target.
    ReadOnly,
    /// Recognized but unimplemented call.
    Unsupported,
}

impl std::fmt::Display for SyscallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyscallError::BadDescriptor => write!(f, "bad file descriptor"),
            SyscallError::NoFreeDescriptor => write!(f, "no free file descriptor"),
            SyscallError::NotFound => write!(f, "no such file"),
            SyscallError::InvalidCommand => write!(f, "invalid command"),
            SyscallError::InvalidArgument => write!(f, "invalid argument"),
            SyscallError::NoArguments => write!(f, "no arguments"),
            SyscallError::NotExecutable => write!(f, "not an executable"),
            SyscallError::ImageTooLarge => write!(f, "image too large"),
            SyscallError::TooManyProcesses => write!(f, "too many processes"),
            SyscallError::NoProcess => write!(f, "no current process"),
            SyscallError::BadAddress => write!(f, "address outside user space"),
            SyscallError::ReadOnly => write!(f, "read-only target"),
            SyscallError::Unsupported => write!(f, "unsupported call"),
        }
    }
}

impl From<VolumeError> for SyscallError {
    fn from(_: VolumeError) -> Self {
        SyscallError::BadDescriptor
    }
}

impl From<TerminalError> for SyscallError {
    fn from(_: TerminalError) -> Self {
        SyscallError::InvalidArgument
    }
}

/// Split a command string into a program name and an optional argument.
///
/// Leading spaces are skipped; the name is the first space-delimited word,
/// truncated to the directory's name limit. The argument is everything
/// after the name with surrounding spaces stripped, kept only if it is a
/// single word no longer than the stored-argument limit; otherwise it is
/// discarded entirely rather than truncated.
pub fn parse_command(command: &str) -> Option<(String, Option<String>)> {
    let trimmed = command.trim_start_matches(' ');
    if trimmed.is_empty() {
        return None;
    }
    let (name, rest) = match trimmed.split_once(' ') {
        Some((name, rest)) => (name, rest),
        None => (trimmed, ""),
    };
    let mut name = name.to_string();
    name.truncate(MAX_NAME);

    let arg = rest.trim_matches(' ');
    let arg = (!arg.is_empty() && arg.len() <= MAX_ARG && !arg.contains(' '))
        .then(|| arg.to_string());
    Some((name, arg))
}

/// Process-to-terminal assignment bookkeeping, kept beside the PCB arena so
/// terminal switching and halt can answer "whose terminal is this" without
/// walking every PCB.
#[derive(Debug, Default)]
pub struct AssignTable {
    entries: [Option<(Pid, TerminalId)>; MAX_PROCESSES],
    base_shell: [Option<Pid>; NUM_TERMINALS],
}

impl AssignTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, pid: Pid, terminal: TerminalId) {
        self.entries[pid.0] = Some((pid, terminal));
    }

    pub fn remove(&mut self, pid: Pid) {
        self.entries[pid.0] = None;
    }

    pub fn terminal_for(&self, pid: Pid) -> Option<TerminalId> {
        self.entries[pid.0].map(|(_, t)| t)
    }

    /// The base shell spawned first on a terminal, if still recorded.
    pub fn base_shell(&self, terminal: TerminalId) -> Option<Pid> {
        self.base_shell[terminal.0]
    }

    pub fn record_base_shell(&mut self, terminal: TerminalId, pid: Pid) {
        self.base_shell[terminal.0] = Some(pid);
    }

    pub fn clear_base_shell(&mut self, terminal: TerminalId) {
        self.base_shell[terminal.0] = None;
    }

    /// Highest live pid, the most recently claimed slot under lowest-free
    /// allocation.
    pub fn most_recent_pid(&self) -> Option<Pid> {
        self.entries.iter().flatten().map(|(p, _)| *p).max()
    }
}

impl Kernel {
    /// Spawn a program on the terminal the scheduler currently favors.
    ///
    /// Validation happens in full before a pid is claimed, so a rejected
    /// command leaves the process pool untouched. On success this ends in a
    /// privilege-level transition into the fresh program; control comes
    /// back to this call frame when the child halts.
    pub fn sys_execute(&mut self, command: &str) -> Result<(), SyscallError> {
        let (name, arg) = parse_command(command).ok_or(SyscallError::InvalidCommand)?;
        let target = self.volume.lookup(&name).ok_or(SyscallError::NotFound)?;
        if target.kind != FileKind::Regular {
            return Err(SyscallError::NotExecutable);
        }

        let len = self.volume.len(target.inode)?;
        if len < ENTRY_POINT_OFFSET + 4 {
            return Err(SyscallError::NotExecutable);
        }
        let mut header = [0u8; 4];
        self.volume.read(target.inode, 0, &mut header)?;
        if header != EXEC_MAGIC {
            return Err(SyscallError::NotExecutable);
        }
        if len > PAGE_4M - PROGRAM_OFFSET {
            return Err(SyscallError::ImageTooLarge);
        }

        let pid = match self.pcbs.free_pid() {
            Some(pid) => pid,
            None => {
                log::warn!("process pool exhausted, refusing \"{name}\"");
                return Err(SyscallError::TooManyProcesses);
            }
        };

        // Terminal identity is fixed here, from the scheduled terminal.
        let terminal = TerminalId(self.scheduler.current);
        let parent = self.scheduler.slots[terminal.0];

        let mut image = vec![0u8; len as usize];
        self.volume.read(target.inode, 0, &mut image)?;
        let off = ENTRY_POINT_OFFSET as usize;
        let entry = u32::from_le_bytes([image[off], image[off + 1], image[off + 2], image[off + 3]]);

        {
            let _irq = self.irq.lock();

            self.paging.remap_user_process(pid);
            let load = self
                .paging
                .translate(PROGRAM_VIRT)
                .ok_or(SyscallError::BadAddress)?;
            self.phys.write(load, &image);

            // With no parent on the slot this is the terminal's base shell
            // and becomes its own parent.
            let mut pcb = Pcb::new(pid, terminal, parent.unwrap_or(pid));
            pcb.args = arg;
            let ctx = self.platform.save_context();
            pcb.entry_sp = ctx.sp;
            pcb.entry_bp = ctx.bp;
            let kstack_top = pcb.kstack_top;
            self.pcbs.insert(pcb);

            if parent.is_none() {
                self.assign.record_base_shell(terminal, pid);
            }
            self.assign.assign(pid, terminal);
            self.scheduler.slots[terminal.0] = Some(pid);
            self.terminals.get_mut(terminal.0).pid = Some(pid);

            self.platform.set_kernel_stack_top(kstack_top);
        }

        log::debug!("execute \"{name}\" as {pid} on {terminal}");
        self.platform.enter_user_mode(entry, USER_STACK_TOP);
        Ok(())
    }

    /// Tear down the current process and unwind into its parent's kernel
    /// context with `status` as the exit value. A status of 255 is widened
    /// to 256 so exception deaths stay distinguishable from ordinary exits.
    ///
    /// The base shell on a terminal never dies: halting it respawns a fresh
    /// shell in place.
    pub fn sys_halt(&mut self, status: u8) -> Result<(), SyscallError> {
        let pid = self.current_pid().ok_or(SyscallError::NoProcess)?;
        let ret: i32 = if status == u8::MAX { 256 } else { status as i32 };

        let pcb = {
            let _irq = self.irq.lock();
            self.pcbs.remove(pid).ok_or(SyscallError::NoProcess)?
        };
        let terminal = pcb.terminal;
        self.assign.remove(pid);

        if self.assign.base_shell(terminal) == Some(pid) {
            log::info!("{pid} is the base shell on {terminal}, respawning");
            self.assign.clear_base_shell(terminal);
            self.scheduler.slots[terminal.0] = None;
            self.terminals.get_mut(terminal.0).pid = None;
            return self.sys_execute("shell");
        }

        let parent = pcb.parent;
        {
            let _irq = self.irq.lock();
            self.scheduler.slots[terminal.0] = Some(parent);
            self.terminals.get_mut(terminal.0).pid = Some(parent);
            self.paging.remap_user_process(parent);
            self.platform
                .set_kernel_stack_top(PcbTable::kernel_stack_top(parent));
        }

        self.terminals.write(
            terminal.0,
            b"\n",
            &self.paging,
            &mut self.video,
            self.bus.as_mut(),
        )?;

        log::debug!("halt {pid}, status {ret}, resuming {parent}");
        self.platform.halt_return(
            SavedContext {
                sp: pcb.entry_sp,
                bp: pcb.entry_bp,
            },
            ret,
        );
        Ok(())
    }

    /// Read through a descriptor. Descriptor 1 is write-only.
    pub fn sys_read(&mut self, fd: Fd, buf: &mut [u8]) -> Result<usize, SyscallError> {
        if fd == Fd::STDOUT || fd.0 >= MAX_FDS {
            return Err(SyscallError::BadDescriptor);
        }
        let pid = self.current_pid().ok_or(SyscallError::NoProcess)?;
        let (desc, terminal) = {
            let pcb = self.pcbs.get(pid).ok_or(SyscallError::NoProcess)?;
            (pcb.fds[fd.0], pcb.terminal)
        };
        if !desc.in_use {
            return Err(SyscallError::BadDescriptor);
        }

        match desc.ops {
            FileOps::TerminalIn => {
                Ok(self
                    .terminals
                    .read_line(terminal.0, buf, self.platform.as_mut()))
            }
            FileOps::TerminalOut => Err(SyscallError::BadDescriptor),
            FileOps::Rtc => {
                self.rtc.wait_tick(self.platform.as_mut());
                Ok(0)
            }
            FileOps::Directory => match self.volume.entry_at(desc.position as usize)
            {
                None => Ok(0),
                Some(dentry) => {
                    let bytes = dentry.name.as_bytes();
                    let n = bytes.len().min(buf.len()).min(MAX_NAME);
                    buf[..n].copy_from_slice(&bytes[..n]);
                    if let Some(pcb) = self.pcbs.get_mut(pid) {
                        pcb.fds[fd.0].position += 1;
                    }
                    Ok(n)
                }
            },
            FileOps::RegularFile => {
                let n = self.volume.read(desc.inode, desc.position, buf)?;
                if let Some(pcb) = self.pcbs.get_mut(pid) {
                    pcb.fds[fd.0].position += n as u32;
                }
                Ok(n)
            }
        }
    }

    /// Write through a descriptor. Descriptor 0 is read-only; volume-backed
    /// descriptors reject writes outright.
    pub fn sys_write(&mut self, fd: Fd, buf: &[u8]) -> Result<usize, SyscallError> {
        if fd == Fd::STDIN || fd.0 >= MAX_FDS {
            return Err(SyscallError::BadDescriptor);
        }
        let pid = self.current_pid().ok_or(SyscallError::NoProcess)?;
        let (desc, terminal) = {
            let pcb = self.pcbs.get(pid).ok_or(SyscallError::NoProcess)?;
            (pcb.fds[fd.0], pcb.terminal)
        };
        if !desc.in_use {
            return Err(SyscallError::BadDescriptor);
        }

        match desc.ops {
            FileOps::TerminalOut => Ok(self.terminals.write(
                terminal.0,
                buf,
                &self.paging,
                &mut self.video,
                self.bus.as_mut(),
            )?),
            FileOps::TerminalIn => Err(SyscallError::BadDescriptor),
            FileOps::Rtc => {
                // A rate write is exactly one little-endian frequency word.
                let word: [u8; 4] = buf
                    .try_into()
                    .map_err(|_| SyscallError::InvalidArgument)?;
                let hz = u32::from_le_bytes(word);
                if self.rtc.set_frequency(hz) {
                    Ok(4)
                } else {
                    Err(SyscallError::InvalidArgument)
                }
            }
            FileOps::Directory | FileOps::RegularFile => {
                Err(SyscallError::ReadOnly)
            }
        }
    }

    /// Open a name into the first free dynamic descriptor slot, selecting
    /// the ops bundle from the entry's type tag.
    pub fn sys_open(&mut self, name: &str) -> Result<Fd, SyscallError> {
        let dentry = self.volume.lookup(name).ok_or(SyscallError::NotFound)?;
        let pid = self.current_pid().ok_or(SyscallError::NoProcess)?;

        let ops = match dentry.kind {
            FileKind::Rtc => {
                self.rtc.open();
                FileOps::Rtc
            }
            FileKind::Directory => FileOps::Directory,
            FileKind::Regular => FileOps::RegularFile,
        };

        let pcb = self.pcbs.get_mut(pid).ok_or(SyscallError::NoProcess)?;
        let fd = pcb.free_fd().ok_or(SyscallError::NoFreeDescriptor)?;
        pcb.fds[fd.0] = FileDescriptor {
            ops,
            inode: dentry.inode,
            position: 0,
            in_use: true,
        };
        Ok(fd)
    }

    /// Close a dynamic descriptor. Slots 0 and 1 are permanent.
    pub fn sys_close(&mut self, fd: Fd) -> Result<(), SyscallError> {
        if fd.0 < 2 || fd.0 >= MAX_FDS {
            return Err(SyscallError::BadDescriptor);
        }
        let pid = self.current_pid().ok_or(SyscallError::NoProcess)?;
        let pcb = self.pcbs.get_mut(pid).ok_or(SyscallError::NoProcess)?;
        if !pcb.fds[fd.0].in_use {
            return Err(SyscallError::BadDescriptor);
        }
        pcb.fds[fd.0] = FileDescriptor::default();
        Ok(())
    }

    /// Copy the stored command-line argument into `buf`, NUL-terminated.
    pub fn sys_getargs(&self, buf: &mut [u8]) -> Result<usize, SyscallError> {
        let pid = self.current_pid().ok_or(SyscallError::NoProcess)?;
        let pcb = self.pcbs.get(pid).ok_or(SyscallError::NoProcess)?;
        let arg = pcb.args.as_deref().ok_or(SyscallError::NoArguments)?;
        if arg.len() + 1 > buf.len() {
            return Err(SyscallError::InvalidArgument);
        }
        buf[..arg.len()].copy_from_slice(arg.as_bytes());
        buf[arg.len()] = 0;
        Ok(arg.len())
    }

    /// Map video memory into user space. `screen_start` must point into the
    /// user region; the mapping lands at a fixed virtual address, returned.
    pub fn sys_vidmap(&mut self, screen_start: u32) -> Result<u32, SyscallError> {
        if !(USER_VIRT_BASE..USER_VIRT_BASE + PAGE_4M).contains(&screen_start) {
            return Err(SyscallError::BadAddress);
        }
        self.current_pid().ok_or(SyscallError::NoProcess)?;
        self.paging.map_user_video();
        Ok(VIDMAP_VIRT)
    }

    /// Signal-handler registration. Recognized, never implemented.
    pub fn sys_set_handler(&mut self, _signum: u32, _handler: u32) -> Result<(), SyscallError> {
        Err(SyscallError::Unsupported)
    }

    /// Signal return. Recognized, never implemented.
    pub fn sys_sigreturn(&mut self) -> Result<(), SyscallError> {
        Err(SyscallError::Unsupported)
    }
}
