//! Paging subsystem
//!
//! Two-level x86-style structures: a 1024-entry page directory plus two
//! fine-grained tables. The layout is fixed for the kernel's lifetime:
//!
//! - slot 0: the low 4MB through `first_table`, mostly absent except the
//!   four video frames (live VGA frame + one cache frame per terminal)
//! - slot 1: the kernel's own 4MB page at 0x400000, supervisor only
//! - slot 32: the "current user process" 4MB page; its frame is recomputed
//!   from the process id on every process switch
//! - slot 34: the video window; a coarse 4MB alias at boot, retargeted at
//!   page granularity through `video_table` once `vidmap` runs
//!
//! Nothing here can fail: process ids come from a bounded pool and frame
//! selection is a pure computation. Every mutation bumps the TLB flush
//! counter, standing in for the cr3 reload on hardware.

use std::collections::HashMap;

use super::process::Pid;

pub const PAGE_ENTRIES: usize = 1024;
pub const PAGE_4K: u32 = 0x1000;
pub const PAGE_4M: u32 = 0x40_0000;

/// Physical base of the visible VGA text frame.
pub const VIDEO_PHYS: u32 = 0xB8000;
/// Physical base of the first per-terminal cache frame; terminal `t` caches
/// at `VIDEO_CACHE_BASE + t * PAGE_4K`.
pub const VIDEO_CACHE_BASE: u32 = 0xB9000;

/// Physical load address of the kernel image.
pub const KERNEL_PHYS: u32 = 0x40_0000;
/// Physical base of the per-process user frames: 8MB + pid * 4MB.
pub const USER_PHYS_BASE: u32 = 0x80_0000;
/// Virtual base of the single user 4MB region.
pub const USER_VIRT_BASE: u32 = 0x0800_0000;
/// Fixed virtual address where `vidmap` exposes video memory to user code.
pub const VIDMAP_VIRT: u32 = USER_VIRT_BASE + 0x80_0000;

pub const DIR_KERNEL: usize = 1;
pub const DIR_USER: usize = 32;
pub const DIR_VIDEO: usize = 34;

/// One page directory slot. `frame` is the physical base in 4KB units for
/// both granularities, matching the hardware encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirEntry {
    pub present: bool,
    pub writable: bool,
    pub user: bool,
    pub page_4mb: bool,
    pub frame: u32,
}

impl DirEntry {
    /// Hardware bit pattern of this entry.
    pub fn to_bits(self) -> u32 {
        (self.present as u32)
            | (self.writable as u32) << 1
            | (self.user as u32) << 2
            | (self.page_4mb as u32) << 7
            | self.frame << 12
    }
}

/// One page table slot mapping a single 4KB page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableEntry {
    pub present: bool,
    pub writable: bool,
    pub user: bool,
    pub cache_disable: bool,
    pub frame: u32,
}

impl TableEntry {
    /// Hardware bit pattern of this entry.
    pub fn to_bits(self) -> u32 {
        (self.present as u32)
            | (self.writable as u32) << 1
            | (self.user as u32) << 2
            | (self.cache_disable as u32) << 4
            | self.frame << 12
    }
}

/// The live paging structures plus a TLB flush counter.
pub struct Paging {
    pub directory: Box<[DirEntry; PAGE_ENTRIES]>,
    pub first_table: Box<[TableEntry; PAGE_ENTRIES]>,
    pub video_table: Box<[TableEntry; PAGE_ENTRIES]>,
    tlb_flushes: u64,
}

impl Paging {
    /// Build the boot-time directory/table set.
    pub fn new(terminal_count: usize) -> Self {
        let mut directory = Box::new([DirEntry::default(); PAGE_ENTRIES]);
        let mut first_table = Box::new([TableEntry::default(); PAGE_ENTRIES]);
        let mut video_table = Box::new([TableEntry::default(); PAGE_ENTRIES]);

        // Low 4MB: fine-grained, identity frames, only the video frames present
        directory[0] = DirEntry {
            present: true,
            writable: true,
            user: false,
            page_4mb: false,
            frame: 0, // backed by first_table; resolved structurally
        };
        for (i, entry) in first_table.iter_mut().enumerate() {
            let phys = i as u32 * PAGE_4K;
            entry.writable = true;
            entry.frame = i as u32;
            entry.present = phys == VIDEO_PHYS
                || (phys >= VIDEO_CACHE_BASE
                    && phys < VIDEO_CACHE_BASE + terminal_count as u32 * PAGE_4K);
        }

        // Kernel image: one supervisor 4MB page
        directory[DIR_KERNEL] = DirEntry {
            present: true,
            writable: true,
            user: false,
            page_4mb: true,
            frame: KERNEL_PHYS / PAGE_4K,
        };

        // Current user process slot; frame rewritten on every switch
        directory[DIR_USER] = DirEntry {
            present: true,
            writable: true,
            user: true,
            page_4mb: true,
            frame: USER_PHYS_BASE / PAGE_4K,
        };

        // Video window: coarse alias at boot, retargeted via video_table
        directory[DIR_VIDEO] = DirEntry {
            present: true,
            writable: true,
            user: true,
            page_4mb: true,
            frame: VIDEO_PHYS / PAGE_4K,
        };
        for (i, entry) in video_table.iter_mut().enumerate() {
            *entry = TableEntry {
                present: true,
                writable: true,
                user: false,
                cache_disable: true,
                frame: i as u32,
            };
        }
        video_table[0].frame = VIDEO_PHYS / PAGE_4K;

        Self {
            directory,
            first_table,
            video_table,
            tlb_flushes: 0,
        }
    }

    fn flush_tlb(&mut self) {
        self.tlb_flushes += 1;
    }

    /// Number of TLB invalidations performed so far.
    pub fn tlb_flushes(&self) -> u64 {
        self.tlb_flushes
    }

    /// Physical base of the user frame reserved for `pid`.
    pub fn user_frame_base(pid: Pid) -> u32 {
        USER_PHYS_BASE + pid.0 as u32 * PAGE_4M
    }

    /// Point the "current user process" slot at `pid`'s frame.
    pub fn remap_user_process(&mut self, pid: Pid) {
        self.directory[DIR_USER].frame = Self::user_frame_base(pid) / PAGE_4K;
        self.flush_tlb();
    }

    /// Retarget the video window (and the low-memory alias of the live
    /// frame) at `phys`: either the real VGA frame or a terminal cache.
    pub fn remap_video_window(&mut self, phys: u32) {
        self.video_table[0].frame = phys / PAGE_4K;
        self.first_table[(VIDEO_PHYS / PAGE_4K) as usize].frame = phys / PAGE_4K;
        self.flush_tlb();
    }

    /// Physical frame the video window currently targets.
    pub fn video_window(&self) -> u32 {
        self.video_table[0].frame * PAGE_4K
    }

    /// The `vidmap` path: expose real video memory to user code through the
    /// fine-grained table at `VIDMAP_VIRT`.
    pub fn map_user_video(&mut self) {
        self.video_table[0] = TableEntry {
            present: true,
            writable: true,
            user: true,
            cache_disable: true,
            frame: VIDEO_PHYS / PAGE_4K,
        };
        self.directory[DIR_VIDEO] = DirEntry {
            present: true,
            writable: true,
            user: true,
            page_4mb: false,
            frame: 0, // backed by video_table; resolved structurally
        };
        self.flush_tlb();
    }

    /// Walk the live structures. The two fine-grained slots are fixed by
    /// construction (slot 0 -> first_table, slot 34 -> video_table), so the
    /// walk resolves them structurally rather than chasing frame numbers.
    pub fn translate(&self, vaddr: u32) -> Option<u32> {
        let idx = (vaddr >> 22) as usize;
        let entry = self.directory[idx];
        if !entry.present {
            return None;
        }
        if entry.page_4mb {
            return Some(entry.frame * PAGE_4K + (vaddr & (PAGE_4M - 1)));
        }
        let table = match idx {
            0 => &self.first_table,
            DIR_VIDEO => &self.video_table,
            _ => return None,
        };
        let te = table[((vaddr >> 12) & 0x3FF) as usize];
        if !te.present {
            return None;
        }
        Some(te.frame * PAGE_4K + (vaddr & (PAGE_4K - 1)))
    }
}

/// Simulated physical memory for the per-process user frames. Frames are
/// materialized on first write, 4MB each, keyed by frame base.
#[derive(Debug, Default)]
pub struct PhysMemory {
    frames: HashMap<u32, Vec<u8>>,
}

impl PhysMemory {
    pub fn new() -> Self {
        Self {
            frames: HashMap::new(),
        }
    }

    fn frame_base(paddr: u32) -> u32 {
        paddr & !(PAGE_4M - 1)
    }

    /// Copy `bytes` to physical memory. Callers stay within one 4MB frame.
    pub fn write(&mut self, paddr: u32, bytes: &[u8]) {
        let base = Self::frame_base(paddr);
        let offset = (paddr - base) as usize;
        debug_assert!(offset + bytes.len() <= PAGE_4M as usize);
        let frame = self
            .frames
            .entry(base)
            .or_insert_with(|| vec![0; PAGE_4M as usize]);
        frame[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Copy from physical memory into `buf`; unmapped frames read as zero.
    pub fn read(&self, paddr: u32, buf: &mut [u8]) {
        let base = Self::frame_base(paddr);
        let offset = (paddr - base) as usize;
        debug_assert!(offset + buf.len() <= PAGE_4M as usize);
        match self.frames.get(&base) {
            Some(frame) => buf.copy_from_slice(&frame[offset..offset + buf.len()]),
            None => buf.fill(0),
        }
    }
}
