//! Shared kernel heap handle.
//!
//! [`LockedHeap`] wraps the next-fit heap in the interrupt-masking spinlock so
//! thread code and interrupt handlers can allocate safely, and implements
//! [`GlobalAlloc`] so a bare-metal binary can register a `static LockedHeap`
//! as its `#[global_allocator]`.

use alloc::vec::Vec;
use core::alloc::{GlobalAlloc, Layout};
use core::mem::size_of;
use core::ptr::NonNull;

use crate::logging::Logger;
use crate::memory::heap::{
    BlockInfo, HeapError, HeapStats, HeapViolation, LinkedListHeap, HEAP_ALIGNMENT,
};
use crate::sync::spinlock::SpinLock;

pub struct LockedHeap {
    inner: SpinLock<LinkedListHeap>,
}

impl LockedHeap {
    pub const fn empty() -> Self {
        Self {
            inner: SpinLock::new(LinkedListHeap::empty()),
        }
    }

    /// See [`LinkedListHeap::init`].
    ///
    /// # Safety
    /// `start..start + size` must be writable memory owned by the heap from
    /// now on.
    pub unsafe fn init(&self, start: *mut u8, size: usize) -> Result<usize, HeapError> {
        // SAFETY:
        // - Forwarded contract, see `# Safety`.
        self.with_heap(|heap| unsafe { heap.init(start, size) })
    }

    pub fn init_from_slice(&self, region: &'static mut [u8]) -> Result<usize, HeapError> {
        self.with_heap(|heap| heap.init_from_slice(region))
    }

    pub fn set_logger(&self, logger: Logger, debug_output: bool) {
        self.with_heap(|heap| heap.set_logger(logger, debug_output));
    }

    /// Executes a closure with exclusive access to the heap.
    pub fn with_heap<R>(&self, f: impl FnOnce(&mut LinkedListHeap) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }

    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>, HeapError> {
        self.with_heap(|heap| heap.allocate(size))
    }

    pub fn free(&self, ptr: NonNull<u8>) -> Result<usize, HeapError> {
        self.with_heap(|heap| heap.free(ptr))
    }

    pub fn stats(&self) -> Result<HeapStats, HeapViolation> {
        self.with_heap(|heap| heap.stats())
    }

    pub fn check_integrity(&self) -> Result<HeapStats, HeapViolation> {
        self.with_heap(|heap| heap.check_integrity())
    }

    pub fn blocks(&self) -> Result<Vec<BlockInfo>, HeapViolation> {
        self.with_heap(|heap| heap.blocks())
    }

    pub fn free_blocks(&self) -> Result<Vec<BlockInfo>, HeapViolation> {
        self.with_heap(|heap| heap.free_blocks())
    }

    pub fn dump_free_memory(&self) {
        self.with_heap(|heap| heap.dump_free_memory());
    }

    /// Frees a block on a path that has no caller to report to.
    ///
    /// A rejected free means a double free, a foreign pointer or a damaged
    /// heap, so it is fatal. The heap has already logged the reason.
    fn release_or_halt(&self, ptr: NonNull<u8>) {
        if let Err(err) = self.free(ptr) {
            panic!(
                "heap block {:#x} could not be released: {}",
                ptr.as_ptr() as usize,
                err
            );
        }
    }
}

impl Default for LockedHeap {
    fn default() -> Self {
        Self::empty()
    }
}

#[inline]
fn align_up(addr: usize, align: usize) -> Option<usize> {
    let mask = align.checked_sub(1)?;
    addr.checked_add(mask).map(|v| v & !mask)
}

#[inline]
fn aligned_backref_slot(aligned_ptr: *mut u8) -> *mut *mut u8 {
    aligned_ptr
        .wrapping_sub(size_of::<*mut u8>())
        .cast::<*mut u8>()
}

// SAFETY:
// - `allocate`/`free` take the heap spinlock, so access is exclusive.
// - The heap only returns pointers inside its region, aligned to
//   `HEAP_ALIGNMENT`; stricter alignments are served by over-allocation.
unsafe impl GlobalAlloc for LockedHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let size = layout.size().max(1);
        let align = layout.align();
        if align <= HEAP_ALIGNMENT {
            return self
                .allocate(size)
                .map_or(core::ptr::null_mut(), NonNull::as_ptr);
        }

        let overhead = match align
            .checked_sub(1)
            .and_then(|v| v.checked_add(size_of::<*mut u8>()))
        {
            Some(v) => v,
            None => return core::ptr::null_mut(),
        };
        let total_size = match size.checked_add(overhead) {
            Some(v) => v,
            None => return core::ptr::null_mut(),
        };

        let Ok(raw) = self.allocate(total_size) else {
            return core::ptr::null_mut();
        };

        let Some(aligned_addr) = align_up(raw.as_ptr() as usize + size_of::<*mut u8>(), align)
        else {
            self.release_or_halt(raw);
            return core::ptr::null_mut();
        };
        let aligned_ptr = aligned_addr as *mut u8;

        // SAFETY:
        // - `aligned_ptr` lies within the over-allocated block returned above.
        // - One pointer-sized slot before `aligned_ptr` is reserved for the
        //   original block pointer.
        unsafe {
            core::ptr::write_unaligned(aligned_backref_slot(aligned_ptr), raw.as_ptr());
        }
        aligned_ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let raw = if layout.align() <= HEAP_ALIGNMENT {
            ptr
        } else {
            // SAFETY:
            // - For over-aligned allocations, `alloc` stored the original heap
            //   pointer one pointer-sized slot before `ptr`.
            unsafe { core::ptr::read_unaligned(aligned_backref_slot(ptr)) }
        };

        match NonNull::new(raw) {
            Some(raw) => self.release_or_halt(raw),
            None => panic!("dealloc of a null pointer"),
        }
    }
}
