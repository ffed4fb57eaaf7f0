//! kmux - a small multitasking kernel core
//!
//! Design principles:
//! - Tractable: a bounded pool of processes, a fixed set of virtual
//!   terminals, comprehensible by one human
//! - Explicit state: page tables, the scheduling slot table, and terminal
//!   buffers are owned fields of one `Kernel` object, never free statics
//! - Hardware behind traits: context switching, privilege transitions, and
//!   port I/O live behind `kernel::platform`, so the core is portable and
//!   testable with plain `cargo test`
//!
//! The core multiplexes three virtual terminals over one screen, schedules
//! one process per terminal round-robin at timer-tick granularity, and gives
//! each process a flat 4MB user region selected by rewriting a single page
//! directory slot on every switch.

pub mod fs;
pub mod kernel;

pub use kernel::Kernel;
