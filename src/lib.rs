//! KAOS Execution Core Library
//!
//! The part of the KAOS kernel that owns mutable shared state and non-local
//! control transfer: the next-fit heap, thread contexts and their switch
//! primitive, the interrupt dispatch table, the round-robin scheduler and
//! counting semaphores. Drivers, paging and boot code live elsewhere and only
//! hand this crate a memory region, timer interrupts and a log sink.
//!
//! Bare-metal builds are `no_std`. Hosted builds link `std` so the
//! integration tests under `tests/` can drive the same code as ordinary
//! processes.

#![cfg_attr(target_os = "none", no_std)]

extern crate alloc;

pub mod allocator;
pub mod arch;
pub mod config;
pub mod irq;
pub mod kernel;
pub mod logging;
pub mod memory;
pub mod scheduler;
pub mod sync;

pub use config::KernelConfig;
pub use kernel::{HeapRegion, Kernel};
