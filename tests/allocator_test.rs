//! Kernel Heap Allocator Integration Tests
//!
//! These tests drive the shared `LockedHeap` the way a bare-metal kernel uses
//! its `#[global_allocator]`.

use std::alloc::{GlobalAlloc, Layout};

use kaos_core::allocator::LockedHeap;
use kaos_core::arch::interrupts;

fn locked_heap(size: usize) -> &'static LockedHeap {
    let region: &'static mut [u8] = Box::leak(vec![0u8; size].into_boxed_slice());
    let heap: &'static LockedHeap = Box::leak(Box::new(LockedHeap::empty()));
    heap.init_from_slice(region)
        .expect("region should be large enough for a heap");
    heap
}

/// Contract: GlobalAlloc hands out writable memory and takes it back.
#[test]
fn test_global_allocator_round_trip() {
    let heap = locked_heap(8192);
    let layout = Layout::from_size_align(32, 8).unwrap();

    // SAFETY:
    // - `layout` has a non-zero size.
    let ptr = unsafe { heap.alloc(layout) };
    assert!(!ptr.is_null(), "global allocator should return a pointer");

    // SAFETY:
    // - `ptr` was allocated with at least 32 bytes.
    // - We only touch the first byte of the allocation.
    unsafe {
        core::ptr::write_volatile(ptr, 0xCC);
        let val = core::ptr::read_volatile(ptr);
        assert!(val == 0xCC, "global allocator memory should be readable/writable");
        heap.dealloc(ptr, layout);
    }

    let stats = heap.check_integrity().expect("heap should stay consistent");
    assert!(stats.allocated_blocks == 0, "dealloc should return the block");
}

/// Contract: over-aligned layouts are served by over-allocation and freed
/// through the back-reference slot.
#[test]
fn test_global_allocator_over_aligned_request() {
    let heap = locked_heap(8192);
    let layout = Layout::from_size_align(100, 64).unwrap();

    // SAFETY:
    // - `layout` has a non-zero size.
    let ptr = unsafe { heap.alloc(layout) };
    assert!(!ptr.is_null(), "over-aligned allocation should succeed");
    assert!(
        (ptr as usize) % 64 == 0,
        "over-aligned allocation should honour the requested alignment"
    );

    // SAFETY:
    // - `ptr` was returned by `alloc` with this layout.
    unsafe {
        core::ptr::write_bytes(ptr, 0x5A, 100);
        heap.dealloc(ptr, layout);
    }

    let stats = heap.check_integrity().expect("heap should stay consistent");
    assert!(
        stats.allocated_blocks == 0 && stats.free_blocks == 1,
        "the over-allocated block should be released and coalesced"
    );
}

/// Contract: exhaustion is reported as a null pointer, never a panic.
#[test]
fn test_global_allocator_reports_exhaustion_as_null() {
    let heap = locked_heap(1024);
    let layout = Layout::from_size_align(4096, 8).unwrap();

    // SAFETY:
    // - `layout` has a non-zero size.
    let ptr = unsafe { heap.alloc(layout) };
    assert!(ptr.is_null(), "an unsatisfiable request should yield null");
}

/// Contract: the heap lock leaves disabled interrupts disabled.
#[test]
fn test_locked_heap_preserves_interrupt_state_when_disabled() {
    let heap = locked_heap(4096);
    interrupts::disable();

    let ptr = heap.allocate(16).expect("allocation should succeed");
    heap.free(ptr).expect("free should succeed");

    assert!(
        !interrupts::are_enabled(),
        "heap operations should not enable interrupts when they were disabled"
    );
}

/// Contract: the heap lock restores enabled interrupts on release.
#[test]
fn test_locked_heap_restores_enabled_interrupts() {
    let heap = locked_heap(4096);
    interrupts::enable();

    let ptr = heap.allocate(16).expect("allocation should succeed");
    heap.free(ptr).expect("free should succeed");

    assert!(
        interrupts::are_enabled(),
        "heap operations should restore enabled interrupts"
    );
    interrupts::disable();
}

/// Contract: stats, free list and dump agree on a fragmented heap.
#[test]
fn test_locked_heap_dump_and_stats() {
    let heap = locked_heap(4096);
    let a = heap.allocate(100).expect("allocation should succeed");
    let _b = heap.allocate(100).expect("allocation should succeed");
    heap.free(a).expect("free should succeed");

    let stats = heap.stats().expect("stats should be readable");
    assert!(stats.is_conserved(), "bytes should be conserved");
    assert!(stats.free_blocks == 2, "freed block and tail should be free");
    assert!(
        heap.free_blocks().expect("free list should be readable").len() == 2,
        "free list should match the region walk"
    );
    heap.dump_free_memory();
}

/// Contract: a double free through GlobalAlloc is fatal.
/// Given: A 64-byte block allocated and released through `GlobalAlloc`.
/// When: The same pointer is passed to `dealloc` a second time.
/// Then: The allocator halts with the heap's diagnostic instead of returning.
#[test]
#[should_panic(expected = "double free or invalid pointer")]
fn test_global_allocator_double_free_is_fatal() {
    let heap = locked_heap(4096);
    let layout = Layout::from_size_align(64, 8).unwrap();

    // SAFETY:
    // - `layout` has a non-zero size; the second `dealloc` is the misuse
    //   under test and is rejected before the heap is touched.
    unsafe {
        let ptr = heap.alloc(layout);
        assert!(!ptr.is_null(), "allocation should succeed");
        heap.dealloc(ptr, layout);
        heap.dealloc(ptr, layout);
    }
}

/// Contract: a foreign pointer passed to dealloc is fatal.
/// Given: An initialized heap and a pointer into memory it does not manage.
/// When: The pointer is passed to `dealloc`.
/// Then: The allocator halts and reports the pointer as outside the region.
#[test]
#[should_panic(expected = "pointer outside heap region")]
fn test_global_allocator_foreign_pointer_is_fatal() {
    let heap = locked_heap(4096);
    let layout = Layout::from_size_align(8, 8).unwrap();
    let foreign: &'static mut u64 = Box::leak(Box::new(0u64));

    // SAFETY:
    // - The heap rejects the pointer before dereferencing anything.
    unsafe { heap.dealloc((foreign as *mut u64).cast::<u8>(), layout) };
}
