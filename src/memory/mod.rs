//! Memory management: the next-fit kernel heap.

pub mod heap;

pub use heap::{BlockInfo, HeapError, HeapStats, HeapViolation, LinkedListHeap};
