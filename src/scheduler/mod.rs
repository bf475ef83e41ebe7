//! Scheduler module facade.
//!
//! The round-robin policy lives in `roundrobin.rs`, thread contexts in
//! `thread.rs`; both are re-exported here so `crate::scheduler::*` call sites
//! stay clean.

mod roundrobin;
pub mod thread;

pub use roundrobin::*;
pub use thread::{Runnable, Thread, ThreadId};
