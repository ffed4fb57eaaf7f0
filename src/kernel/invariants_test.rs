//! Invariant Tests
//!
//! Each test verifies one structural invariant the subsystems rely on but
//! no single unit test states outright, and is named after that invariant.

mod descriptor_invariants {
    use crate::kernel::process::{FileOps, MAX_FDS, Pcb, Pid, TerminalId};
    use crate::kernel::syscall::SyscallError;
    use crate::kernel::tests::boot_shells;
    use crate::kernel::Fd;

    /// Slots 0 and 1 exist in every fresh descriptor table, bound to the
    /// terminal, and survive any sweep of the dynamic slots.
    #[test]
    fn stdio_slots_always_reserved() {
        let mut pcb = Pcb::new(Pid(0), TerminalId(0), Pid(0));
        pcb.init_standard_descriptors();
        assert_eq!(pcb.fds[0].ops, FileOps::TerminalIn);
        assert_eq!(pcb.fds[1].ops, FileOps::TerminalOut);
        assert!(pcb.fds[0].in_use && pcb.fds[1].in_use);
        assert_eq!(pcb.free_fd(), Some(Fd(2)));
    }

    /// Direction discipline: descriptor 0 never writes, descriptor 1 never
    /// reads, regardless of process state.
    #[test]
    fn stdio_direction_never_inverts() {
        let mut kernel = boot_shells();
        let mut buf = [0u8; 4];
        assert_eq!(
            kernel.sys_read(Fd::STDOUT, &mut buf),
            Err(SyscallError::BadDescriptor)
        );
        assert_eq!(
            kernel.sys_write(Fd::STDIN, b"x"),
            Err(SyscallError::BadDescriptor)
        );
    }

    /// Every dynamic descriptor operation is gated on the in-use flag; a
    /// closed slot behaves exactly like one that never existed.
    #[test]
    fn unused_slots_reject_all_operations() {
        let mut kernel = boot_shells();
        let mut buf = [0u8; 4];
        for i in 2..MAX_FDS {
            assert_eq!(
                kernel.sys_read(Fd(i), &mut buf),
                Err(SyscallError::BadDescriptor)
            );
            assert_eq!(kernel.sys_write(Fd(i), b"x"), Err(SyscallError::BadDescriptor));
            assert_eq!(kernel.sys_close(Fd(i)), Err(SyscallError::BadDescriptor));
        }
    }
}

mod paging_invariants {
    use crate::kernel::paging::{DIR_KERNEL, DIR_USER, DIR_VIDEO, PAGE_4M, Paging, USER_VIRT_BASE};
    use crate::kernel::process::{MAX_PROCESSES, Pid};

    /// The directory always carries exactly the boot-time trio of coarse
    /// mappings plus the fine-grained low slot, whatever remapping happens.
    #[test]
    fn coarse_mapping_trio_is_permanent() {
        let mut paging = Paging::new(3);
        paging.remap_user_process(Pid(4));
        paging.remap_video_window(0xB9000);
        paging.map_user_video();

        assert!(paging.directory[0].present);
        assert!(paging.directory[DIR_KERNEL].present && paging.directory[DIR_KERNEL].page_4mb);
        assert!(paging.directory[DIR_USER].present && paging.directory[DIR_USER].page_4mb);
        assert!(paging.directory[DIR_VIDEO].present);

        let live = paging.directory.iter().filter(|e| e.present).count();
        assert_eq!(live, 4);
    }

    /// The kernel page is never user-visible and the user page always is.
    #[test]
    fn privilege_bits_never_drift() {
        let mut paging = Paging::new(3);
        for p in 0..MAX_PROCESSES {
            paging.remap_user_process(Pid(p));
            assert!(!paging.directory[DIR_KERNEL].user);
            assert!(paging.directory[DIR_USER].user);
        }
    }

    /// Distinct pids always resolve the user window to distinct frames.
    #[test]
    fn user_translation_is_injective() {
        let mut paging = Paging::new(3);
        let mut seen = std::collections::HashSet::new();
        for p in 0..MAX_PROCESSES {
            paging.remap_user_process(Pid(p));
            let phys = paging.translate(USER_VIRT_BASE).unwrap();
            assert!(seen.insert(phys));
            assert_eq!(phys % PAGE_4M, 0);
        }
    }
}

mod scheduler_invariants {
    use crate::kernel::terminal::NUM_TERMINALS;
    use crate::kernel::tests::boot_shells;

    /// The slot table is the scheduler's only path to a PCB: vacating a
    /// slot makes the rotation skip that terminal's restore without
    /// consulting the arena.
    #[test]
    fn slot_table_is_sole_pcb_path() {
        let mut kernel = boot_shells();
        let pid = kernel.scheduler.slots[1].take().unwrap();
        // The PCB is still live in the arena
        assert!(kernel.pcbs.get(pid).is_some());

        for _ in 0..NUM_TERMINALS {
            kernel.timer_tick();
        }
        // Rotation kept turning and never resurrected the unlinked PCB
        assert!(kernel.scheduler.slots[1].is_none());
    }

    /// After the rotation settles, the video window targets real video
    /// memory exactly when the scheduled terminal is the displayed one.
    #[test]
    fn window_tracks_scheduled_vs_displayed() {
        use crate::kernel::terminal::VideoFrame;
        let mut kernel = boot_shells();
        kernel.timer_tick(); // past the one-shot display correction
        for _ in 0..2 * NUM_TERMINALS {
            kernel.timer_tick();
            let scheduled = kernel.scheduler.current;
            let expected = if scheduled == kernel.terminals.displayed {
                VideoFrame::Live
            } else {
                VideoFrame::Cache(scheduled)
            };
            assert_eq!(kernel.paging.video_window(), expected.phys());
        }
    }
}

mod lifecycle_invariants {
    use crate::kernel::process::MAX_PROCESSES;
    use crate::kernel::syscall::SyscallError;
    use crate::kernel::tests::boot_shells;

    /// The process pool never exceeds its capacity and a failed spawn never
    /// leaks a slot.
    #[test]
    fn pool_capacity_is_hard() {
        let mut kernel = boot_shells();
        while kernel.pcbs.live_count() < MAX_PROCESSES {
            kernel.sys_execute("counter").unwrap();
        }
        assert_eq!(
            kernel.sys_execute("counter"),
            Err(SyscallError::TooManyProcesses)
        );
        assert_eq!(kernel.pcbs.live_count(), MAX_PROCESSES);
    }

    /// Every terminal keeps at least one process: halting the last shell on
    /// a terminal replaces it rather than emptying the terminal.
    #[test]
    fn terminals_never_empty_out() {
        let mut kernel = boot_shells();
        for _ in 0..4 {
            kernel.sys_halt(0).unwrap();
            assert!(kernel.current_pid().is_some());
        }
    }

    /// Exit statuses occupy 0..=254 for ordinary exits; 255 and exception
    /// deaths share the widened 256, never colliding with a real status.
    #[test]
    fn widened_status_is_unreachable_by_exit() {
        let mut kernel = boot_shells();
        kernel.sys_execute("counter").unwrap();
        kernel.sys_halt(254).unwrap();
        assert_eq!(kernel.machine().unwrap().last_halt_status(), Some(254));

        kernel.sys_execute("counter").unwrap();
        kernel.sys_halt(255).unwrap();
        assert_eq!(kernel.machine().unwrap().last_halt_status(), Some(256));
    }
}

mod concurrency_invariants {
    use crate::kernel::platform::IrqMask;

    fn guarded_early_exit(mask: &mut IrqMask) -> Option<()> {
        let _guard = mask.lock();
        None
    }

    /// Every masked section unwinds on every exit path, leaving the mask
    /// clear between sections.
    #[test]
    fn irq_mask_always_unwinds() {
        let mut mask = IrqMask::new();
        {
            let _a = mask.lock();
        }
        assert!(!mask.is_masked());
        assert!(guarded_early_exit(&mut mask).is_none());
        assert!(!mask.is_masked());
    }
}
