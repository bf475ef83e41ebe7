//! Synchronization primitives.

pub mod semaphore;
pub mod spinlock;
