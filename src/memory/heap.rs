//! Next-fit kernel heap over one contiguous region.
//!
//! Design summary:
//! - The bootstrap hands over one flat region; every byte of it belongs to
//!   exactly one block, free or allocated.
//! - Each block starts with a [`BlockHeader`] holding the payload `size`, a
//!   state `tag` and `next`, the offset of the next free block.
//! - Free blocks form a single circular list in ascending address order, so
//!   the neighbours of a freed block are found without a size search.
//! - Next-fit: scanning resumes at a cursor instead of the lowest block.
//! - Blocks are split on allocation and coalesced in both directions on free.
//!
//! Notes:
//! - Block sizes exclude the header; the payload starts `HEADER_SIZE` bytes
//!   after the header.
//! - Headers are addressed by byte offset from the region start. Every header
//!   access is bounds-checked, so a corrupted link or a foreign pointer turns
//!   into a [`HeapViolation`] instead of a wild write.
//! - An allocated block keeps its stale `next`. It is only read again when
//!   the block is freed, as a starting hint for locating its free neighbours.

use alloc::vec::Vec;
use core::fmt;
use core::mem::{align_of, size_of};
use core::ptr::NonNull;

use crate::logging::Logger;

/// Size of one block header in bytes.
pub const HEADER_SIZE: usize = size_of::<BlockHeader>();
/// Payload alignment and size granularity.
pub const HEAP_ALIGNMENT: usize = align_of::<usize>();
/// Smallest payload a split-off tail block may have.
pub const MIN_PAYLOAD_SIZE: usize = 2 * HEAP_ALIGNMENT;

const TAG_FREE: usize = 0xF4EE_B10C;
const TAG_ALLOCATED: usize = 0xA110_CA7E;

/// Per-block metadata stored in place at the start of every block.
#[repr(C)]
#[derive(Clone, Copy)]
struct BlockHeader {
    /// Payload bytes, header excluded.
    size: usize,
    /// [`TAG_FREE`] or [`TAG_ALLOCATED`]; anything else is corruption.
    tag: usize,
    /// Offset of the next free block. Stale while allocated.
    next: usize,
}

impl BlockHeader {
    #[inline]
    fn is_free(&self) -> bool {
        self.tag == TAG_FREE
    }

    #[inline]
    fn is_allocated(&self) -> bool {
        self.tag == TAG_ALLOCATED
    }
}

/// Detected misuse of the heap or damage to its metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapViolation {
    /// The heap has no region yet.
    NotInitialized,
    /// The region is null, overflows the address space or cannot hold one block.
    InvalidRegion,
    /// The pointer lies outside the managed region.
    OutsideRegion,
    /// The pointer does not sit on a payload boundary.
    Misaligned,
    /// The block is not allocated: double free or a pointer into a payload.
    NotAllocated,
    /// A header has an unknown tag or a size running past the region end.
    CorruptHeader,
    /// Free list links are out of bounds, unordered or do not close the cycle.
    CorruptFreeList,
}

impl fmt::Display for HeapViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            HeapViolation::NotInitialized => "heap not initialized",
            HeapViolation::InvalidRegion => "invalid heap region",
            HeapViolation::OutsideRegion => "pointer outside heap region",
            HeapViolation::Misaligned => "pointer not on a payload boundary",
            HeapViolation::NotAllocated => "double free or invalid pointer",
            HeapViolation::CorruptHeader => "corrupt block header",
            HeapViolation::CorruptFreeList => "corrupt free list",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    /// No free block can hold the request. The free list is unchanged.
    OutOfMemory { requested: usize, largest_free: usize },

    /// The caller broke the heap contract or the metadata is damaged.
    ContractViolation(HeapViolation),
}

impl From<HeapViolation> for HeapError {
    fn from(violation: HeapViolation) -> Self {
        HeapError::ContractViolation(violation)
    }
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapError::OutOfMemory {
                requested,
                largest_free,
            } => write!(
                f,
                "out of memory: requested {} bytes, largest free block {} bytes",
                requested, largest_free
            ),
            HeapError::ContractViolation(violation) => {
                write!(f, "heap contract violation: {}", violation)
            }
        }
    }
}

/// One block as seen by a walk over the region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Offset of the header from the region start.
    pub offset: usize,
    /// Address of the payload.
    pub address: usize,
    /// Payload bytes.
    pub size: usize,
    pub allocated: bool,
}

/// Accounting snapshot of the whole region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub region_size: usize,
    pub free_bytes: usize,
    pub allocated_bytes: usize,
    pub header_bytes: usize,
    pub free_blocks: usize,
    pub allocated_blocks: usize,
    pub largest_free: usize,
}

impl HeapStats {
    /// Whether payloads plus headers account for every byte of the region.
    pub fn is_conserved(&self) -> bool {
        self.free_bytes + self.allocated_bytes + self.header_bytes == self.region_size
    }
}

/// Aligns `value` up to the next `align` boundary.
#[inline]
fn align_up_checked(value: usize, align: usize) -> Option<usize> {
    let mask = align.checked_sub(1)?;
    value.checked_add(mask).map(|v| v & !mask)
}

/// Whether `block` lies strictly between `prev` and `next` on the circular,
/// address-ordered free list.
#[inline]
fn brackets(prev: usize, block: usize, next: usize) -> bool {
    if prev == next {
        true
    } else if prev < next {
        prev < block && block < next
    } else {
        block > prev || block < next
    }
}

/// Next-fit allocator state. Not synchronized; see
/// [`crate::allocator::LockedHeap`] for the shared kernel instance.
pub struct LinkedListHeap {
    /// Aligned start of the managed region, null before `init`.
    base: *mut u8,
    /// Managed bytes, a multiple of [`HEAP_ALIGNMENT`].
    len: usize,
    /// Next-fit cursor; `None` when no free block exists.
    cursor: Option<usize>,
    /// Members of the free list, bounds every list walk.
    free_count: usize,
    logger: Logger,
    debug_output: bool,
}

// SAFETY:
// - `base` points into a region exclusively owned by this heap after `init`.
// - All access goes through `&mut self` or an external lock.
unsafe impl Send for LinkedListHeap {}

impl LinkedListHeap {
    pub const fn empty() -> Self {
        Self {
            base: core::ptr::null_mut(),
            len: 0,
            cursor: None,
            free_count: 0,
            logger: Logger::disabled(),
            debug_output: false,
        }
    }

    /// Routes diagnostics to `logger`. With `debug_output` every allocation
    /// and free is logged, otherwise only failures.
    pub fn set_logger(&mut self, logger: Logger, debug_output: bool) {
        self.logger = logger;
        self.debug_output = debug_output;
    }

    /// Establishes one free block spanning the whole region and returns the
    /// number of managed bytes.
    ///
    /// The start is aligned up and the length trimmed to [`HEAP_ALIGNMENT`].
    ///
    /// # Safety
    /// `start..start + size` must be writable memory that nothing else uses
    /// for as long as this heap (and any pointer it hands out) is alive.
    pub unsafe fn init(&mut self, start: *mut u8, size: usize) -> Result<usize, HeapError> {
        let addr = start as usize;
        if start.is_null() || addr.checked_add(size).is_none() {
            return Err(HeapViolation::InvalidRegion.into());
        }
        let Some(aligned) = align_up_checked(addr, HEAP_ALIGNMENT) else {
            return Err(HeapViolation::InvalidRegion.into());
        };
        let usable = size.saturating_sub(aligned - addr) & !(HEAP_ALIGNMENT - 1);
        if usable < HEADER_SIZE + MIN_PAYLOAD_SIZE {
            return Err(HeapViolation::InvalidRegion.into());
        }

        self.base = aligned as *mut u8;
        self.len = usable;
        self.write(
            0,
            BlockHeader {
                size: usable - HEADER_SIZE,
                tag: TAG_FREE,
                next: 0,
            },
        )?;
        self.cursor = Some(0);
        self.free_count = 1;

        self.logger.info(
            "heap",
            format_args!(
                "[HEAP] init start={:#x} size={} first_block={}",
                aligned,
                usable,
                usable - HEADER_SIZE
            ),
        );
        Ok(usable)
    }

    /// Convenience wrapper around [`LinkedListHeap::init`] for a static buffer.
    pub fn init_from_slice(&mut self, region: &'static mut [u8]) -> Result<usize, HeapError> {
        let size = region.len();
        // SAFETY:
        // - The `'static mut` borrow hands exclusive ownership of the buffer
        //   to the heap for the rest of the program.
        unsafe { self.init(region.as_mut_ptr(), size) }
    }

    pub fn is_initialized(&self) -> bool {
        !self.base.is_null()
    }

    /// Start address of the managed region (after alignment).
    pub fn region_start(&self) -> usize {
        self.base as usize
    }

    /// Managed bytes.
    pub fn region_size(&self) -> usize {
        self.len
    }

    /// Number of blocks on the free list.
    pub fn free_block_count(&self) -> usize {
        self.free_count
    }

    /// Payload address of the block the next allocation scan starts at.
    pub fn cursor_address(&self) -> Option<usize> {
        self.cursor.map(|offset| self.payload_address(offset))
    }

    /// Whether `addr` falls inside the managed region.
    pub fn contains(&self, addr: usize) -> bool {
        let start = self.base as usize;
        self.is_initialized() && addr >= start && addr < start + self.len
    }

    #[inline]
    fn payload_address(&self, offset: usize) -> usize {
        self.base as usize + offset + HEADER_SIZE
    }

    fn read(&self, offset: usize) -> Result<BlockHeader, HeapViolation> {
        self.check_header_offset(offset)?;
        // SAFETY:
        // - `offset + HEADER_SIZE <= len`, so the header lies inside the region.
        // - Every bit pattern is a valid `BlockHeader` (three `usize` fields).
        Ok(unsafe {
            self.base
                .add(offset)
                .cast::<BlockHeader>()
                .read_unaligned()
        })
    }

    fn write(&mut self, offset: usize, header: BlockHeader) -> Result<(), HeapViolation> {
        self.check_header_offset(offset)?;
        // SAFETY:
        // - `offset + HEADER_SIZE <= len`, so the header lies inside the region.
        // - The region is exclusively owned by the heap.
        unsafe {
            self.base
                .add(offset)
                .cast::<BlockHeader>()
                .write_unaligned(header);
        }
        Ok(())
    }

    fn set_next(&mut self, offset: usize, next: usize) -> Result<(), HeapViolation> {
        let mut header = self.read(offset)?;
        header.next = next;
        self.write(offset, header)
    }

    #[inline]
    fn check_header_offset(&self, offset: usize) -> Result<(), HeapViolation> {
        if self.base.is_null() {
            return Err(HeapViolation::NotInitialized);
        }
        let in_bounds = offset
            .checked_add(HEADER_SIZE)
            .is_some_and(|end| end <= self.len);
        if offset % HEAP_ALIGNMENT != 0 || !in_bounds {
            return Err(HeapViolation::CorruptFreeList);
        }
        Ok(())
    }

    /// Walks the list from `target` until the block whose `next` is `target`.
    fn find_previous(&self, target: usize) -> Result<usize, HeapViolation> {
        let mut current = target;
        for _ in 0..=self.free_count {
            let next = self.read(current)?.next;
            if next == target {
                return Ok(current);
            }
            current = next;
        }
        Err(HeapViolation::CorruptFreeList)
    }

    fn is_free_member(&self, candidate: usize) -> Result<bool, HeapViolation> {
        let Some(start) = self.cursor else {
            return Ok(false);
        };
        let mut current = start;
        for _ in 0..self.free_count {
            if current == candidate {
                return Ok(true);
            }
            current = self.read(current)?.next;
        }
        Ok(false)
    }

    fn largest_free(&self) -> usize {
        let Some(start) = self.cursor else {
            return 0;
        };
        let mut largest = 0;
        let mut current = start;
        for _ in 0..self.free_count {
            let Ok(header) = self.read(current) else {
                break;
            };
            largest = largest.max(header.size);
            current = header.next;
        }
        largest
    }

    fn out_of_memory(&self, requested: usize) -> HeapError {
        let largest_free = self.largest_free();
        self.logger.warn(
            "heap",
            format_args!(
                "[HEAP] alloc failed requested={} largest_free={}",
                requested, largest_free
            ),
        );
        HeapError::OutOfMemory {
            requested,
            largest_free,
        }
    }

    /// Allocates at least `size` bytes, rounded up to [`HEAP_ALIGNMENT`].
    ///
    /// A zero-sized request is served with one word.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, HeapError> {
        if !self.is_initialized() {
            return Err(HeapViolation::NotInitialized.into());
        }
        let Some(rounded) = align_up_checked(size.max(1), HEAP_ALIGNMENT) else {
            return Err(self.out_of_memory(size));
        };
        let Some(start) = self.cursor else {
            return Err(self.out_of_memory(size));
        };

        let mut current = start;
        let mut visited = 0;
        loop {
            let header = self.read(current)?;
            if !header.is_free() {
                return Err(HeapViolation::CorruptFreeList.into());
            }
            if header.size >= rounded {
                let block_size = self.take_block(current, header, rounded)?;
                let address = self.payload_address(current);
                if self.debug_output {
                    self.logger.debug(
                        "heap",
                        format_args!(
                            "[HEAP] alloc ptr={:#x} requested={} block={}",
                            address, size, block_size
                        ),
                    );
                }
                // SAFETY:
                // - `address` is inside the region, whose base is non-null.
                return Ok(unsafe { NonNull::new_unchecked(address as *mut u8) });
            }

            visited += 1;
            current = header.next;
            if current == start {
                return Err(self.out_of_memory(size));
            }
            if visited >= self.free_count {
                return Err(HeapViolation::CorruptFreeList.into());
            }
        }
    }

    /// Detaches the free block at `offset` from the list, splitting off a tail
    /// when the remainder is worth keeping. Returns the allocated payload size.
    fn take_block(
        &mut self,
        offset: usize,
        header: BlockHeader,
        rounded: usize,
    ) -> Result<usize, HeapViolation> {
        let only_block = header.next == offset;

        if header.size >= rounded + HEADER_SIZE + MIN_PAYLOAD_SIZE {
            // The tail takes the block's place in the list.
            let tail = offset + HEADER_SIZE + rounded;
            self.write(
                tail,
                BlockHeader {
                    size: header.size - rounded - HEADER_SIZE,
                    tag: TAG_FREE,
                    next: if only_block { tail } else { header.next },
                },
            )?;
            if !only_block {
                let prev = self.find_previous(offset)?;
                self.set_next(prev, tail)?;
            }
            self.write(
                offset,
                BlockHeader {
                    size: rounded,
                    tag: TAG_ALLOCATED,
                    next: tail,
                },
            )?;
            self.cursor = Some(tail);
            return Ok(rounded);
        }

        if only_block {
            self.cursor = None;
        } else {
            let prev = self.find_previous(offset)?;
            self.set_next(prev, header.next)?;
            self.cursor = Some(header.next);
        }
        self.free_count -= 1;
        self.write(
            offset,
            BlockHeader {
                tag: TAG_ALLOCATED,
                ..header
            },
        )?;
        Ok(header.size)
    }

    /// Maps a payload pointer back to its header offset.
    fn block_of(&self, ptr: NonNull<u8>) -> Result<usize, HeapViolation> {
        if !self.is_initialized() {
            return Err(HeapViolation::NotInitialized);
        }
        let addr = ptr.as_ptr() as usize;
        let start = self.base as usize;
        if addr < start + HEADER_SIZE || addr >= start + self.len {
            return Err(HeapViolation::OutsideRegion);
        }
        let offset = addr - start - HEADER_SIZE;
        if offset % HEAP_ALIGNMENT != 0 {
            return Err(HeapViolation::Misaligned);
        }
        Ok(offset)
    }

    /// Returns a block handed out by [`LinkedListHeap::allocate`] to the free
    /// list and reports the payload size it had.
    ///
    /// Foreign pointers and double frees are rejected with a
    /// [`HeapError::ContractViolation`]; the heap is left untouched then.
    pub fn free(&mut self, ptr: NonNull<u8>) -> Result<usize, HeapError> {
        match self.free_block(ptr) {
            Ok(block_size) => {
                if self.debug_output {
                    self.logger.debug(
                        "heap",
                        format_args!(
                            "[HEAP] free ptr={:#x} block={}",
                            ptr.as_ptr() as usize,
                            block_size
                        ),
                    );
                }
                Ok(block_size)
            }
            Err(violation) => {
                self.logger.error(
                    "heap",
                    format_args!(
                        "[HEAP] free rejected ptr={:#x} reason={}",
                        ptr.as_ptr() as usize,
                        violation
                    ),
                );
                Err(violation.into())
            }
        }
    }

    fn free_block(&mut self, ptr: NonNull<u8>) -> Result<usize, HeapViolation> {
        let block = self.block_of(ptr)?;
        let header = self.read(block)?;
        if !header.is_allocated() {
            return Err(HeapViolation::NotAllocated);
        }
        let block_size = header.size;
        let fits = block
            .checked_add(HEADER_SIZE + block_size)
            .is_some_and(|end| end <= self.len);
        if !fits {
            return Err(HeapViolation::CorruptHeader);
        }

        if self.cursor.is_none() {
            // Heap was fully allocated: the freed block becomes the whole list.
            self.write(
                block,
                BlockHeader {
                    size: block_size,
                    tag: TAG_FREE,
                    next: block,
                },
            )?;
            self.cursor = Some(block);
            self.free_count = 1;
            return Ok(block_size);
        }

        let (mut prev, next_free) = self.locate_free_neighbours(block, header.next)?;
        let mut merged = BlockHeader {
            size: block_size,
            tag: TAG_FREE,
            next: next_free,
        };
        let mut surviving = block;
        self.free_count += 1;

        // Forward: absorb the following block if it is the next free one.
        if block + HEADER_SIZE + merged.size == next_free {
            let absorbed = self.read(next_free)?;
            merged.size += HEADER_SIZE + absorbed.size;
            merged.next = if absorbed.next == next_free {
                block
            } else {
                absorbed.next
            };
            if prev == next_free {
                prev = block;
            }
            self.free_count -= 1;
        }
        self.write(block, merged)?;

        if prev != block {
            self.set_next(prev, block)?;

            // Backward: let the predecessor absorb us if it ends where we start.
            let before = self.read(prev)?;
            if prev + HEADER_SIZE + before.size == block {
                self.write(
                    prev,
                    BlockHeader {
                        size: before.size + HEADER_SIZE + merged.size,
                        tag: TAG_FREE,
                        next: if merged.next == block {
                            prev
                        } else {
                            merged.next
                        },
                    },
                )?;
                self.free_count -= 1;
                surviving = prev;
            }
        }

        self.cursor = Some(surviving);
        Ok(block_size)
    }

    /// Finds the free blocks that will surround `block` once it is freed.
    ///
    /// The stale `next` of the block is tried first: following it past blocks
    /// that are still allocated usually lands on the next free block. The
    /// result is only trusted if it is a list member whose predecessor
    /// brackets `block`; otherwise the list is scanned.
    fn locate_free_neighbours(
        &self,
        block: usize,
        hint: usize,
    ) -> Result<(usize, usize), HeapViolation> {
        if let Some(candidate) = self.follow_stale_next(block, hint) {
            if self.is_free_member(candidate)? {
                let prev = self.find_previous(candidate)?;
                if brackets(prev, block, candidate) {
                    return Ok((prev, candidate));
                }
            }
        }
        self.scan_free_neighbours(block)
    }

    fn follow_stale_next(&self, block: usize, hint: usize) -> Option<usize> {
        let max_blocks = self.len / (HEADER_SIZE + HEAP_ALIGNMENT) + 1;
        let mut current = hint;
        for _ in 0..max_blocks {
            if current == block {
                return None;
            }
            let header = self.read(current).ok()?;
            if header.is_free() {
                return Some(current);
            }
            if !header.is_allocated() {
                return None;
            }
            current = header.next;
        }
        None
    }

    fn scan_free_neighbours(&self, block: usize) -> Result<(usize, usize), HeapViolation> {
        let start = self.cursor.ok_or(HeapViolation::CorruptFreeList)?;
        let mut lowest = start;
        let mut successor: Option<usize> = None;
        let mut current = start;
        for _ in 0..self.free_count {
            if current == block {
                return Err(HeapViolation::CorruptFreeList);
            }
            lowest = lowest.min(current);
            if current > block && successor.is_none_or(|s| current < s) {
                successor = Some(current);
            }
            current = self.read(current)?.next;
        }
        if current != start {
            return Err(HeapViolation::CorruptFreeList);
        }

        let next_free = successor.unwrap_or(lowest);
        let prev = self.find_previous(next_free)?;
        Ok((prev, next_free))
    }

    /// Every block in address order, found by walking the region itself.
    pub fn blocks(&self) -> Result<Vec<BlockInfo>, HeapViolation> {
        if !self.is_initialized() {
            return Err(HeapViolation::NotInitialized);
        }
        let mut blocks = Vec::new();
        let mut offset = 0;
        while offset < self.len {
            let header = self.read(offset)?;
            if !header.is_free() && !header.is_allocated() {
                return Err(HeapViolation::CorruptHeader);
            }
            let end = offset
                .checked_add(HEADER_SIZE + header.size)
                .filter(|end| *end <= self.len)
                .ok_or(HeapViolation::CorruptHeader)?;
            blocks.push(BlockInfo {
                offset,
                address: self.payload_address(offset),
                size: header.size,
                allocated: header.is_allocated(),
            });
            offset = end;
        }
        Ok(blocks)
    }

    /// Free list members, lowest address first.
    pub fn free_blocks(&self) -> Result<Vec<BlockInfo>, HeapViolation> {
        let Some(start) = self.cursor else {
            return Ok(Vec::new());
        };
        let mut blocks = Vec::with_capacity(self.free_count);
        let mut current = start;
        for _ in 0..self.free_count {
            let header = self.read(current)?;
            blocks.push(BlockInfo {
                offset: current,
                address: self.payload_address(current),
                size: header.size,
                allocated: false,
            });
            current = header.next;
        }
        if let Some(lowest) = blocks
            .iter()
            .enumerate()
            .min_by_key(|(_, block)| block.offset)
            .map(|(index, _)| index)
        {
            blocks.rotate_left(lowest);
        }
        Ok(blocks)
    }

    pub fn stats(&self) -> Result<HeapStats, HeapViolation> {
        let mut stats = HeapStats {
            region_size: self.len,
            ..HeapStats::default()
        };
        for block in self.blocks()? {
            stats.header_bytes += HEADER_SIZE;
            if block.allocated {
                stats.allocated_bytes += block.size;
                stats.allocated_blocks += 1;
            } else {
                stats.free_bytes += block.size;
                stats.free_blocks += 1;
                stats.largest_free = stats.largest_free.max(block.size);
            }
        }
        Ok(stats)
    }

    /// Cross-checks the region walk against the free list.
    ///
    /// Verifies that blocks tile the region, that the list is a single
    /// address-ordered cycle holding exactly the free blocks, and that no two
    /// free blocks are left adjacent.
    pub fn check_integrity(&self) -> Result<HeapStats, HeapViolation> {
        let stats = self.stats()?;
        if !stats.is_conserved() || stats.free_blocks != self.free_count {
            return Err(HeapViolation::CorruptFreeList);
        }

        let blocks = self.blocks()?;
        let adjacent_free = blocks
            .windows(2)
            .any(|pair| !pair[0].allocated && !pair[1].allocated);
        if adjacent_free {
            return Err(HeapViolation::CorruptFreeList);
        }

        let Some(start) = self.cursor else {
            return if self.free_count == 0 {
                Ok(stats)
            } else {
                Err(HeapViolation::CorruptFreeList)
            };
        };

        let mut descents = 0;
        let mut current = start;
        for _ in 0..self.free_count {
            let header = self.read(current)?;
            if !header.is_free() {
                return Err(HeapViolation::CorruptFreeList);
            }
            if header.next <= current {
                descents += 1;
            }
            current = header.next;
        }
        if current != start || descents != 1 {
            return Err(HeapViolation::CorruptFreeList);
        }
        Ok(stats)
    }

    /// Logs every free block, lowest address first.
    pub fn dump_free_memory(&self) {
        match self.free_blocks() {
            Ok(blocks) => {
                self.logger.info(
                    "heap",
                    format_args!("[HEAP] free list: {} block(s)", blocks.len()),
                );
                for block in blocks {
                    let next = self.read(block.offset).map(|h| h.next).unwrap_or(0);
                    self.logger.info(
                        "heap",
                        format_args!(
                            "[HEAP]   block off={:#x} addr={:#x} size={} next={:#x}",
                            block.offset, block.address, block.size, next
                        ),
                    );
                }
            }
            Err(violation) => {
                self.logger.error(
                    "heap",
                    format_args!("[HEAP] free list unreadable: {}", violation),
                );
            }
        }
    }
}

impl Default for LinkedListHeap {
    fn default() -> Self {
        Self::empty()
    }
}
