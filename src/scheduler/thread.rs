//! Thread contexts.
//!
//! A [`Thread`] owns a stack carved out of the kernel heap and the register
//! record of its suspended continuation. It is created boxed, so the record
//! keeps a stable address for the whole life of the thread, and its first
//! activation enters [`thread_trampoline`] with the thread itself as the only
//! argument.

use alloc::boxed::Box;
use alloc::string::String;
use core::cell::UnsafeCell;
use core::fmt;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::allocator::LockedHeap;
use crate::arch::context::{self, ThreadRegisters};
use crate::arch::interrupts;
use crate::config::MIN_STACK_SIZE;
use crate::logging::Logger;

use super::roundrobin::{Scheduler, SpawnError};

/// Source of thread ids. Zero is reserved for "no thread".
static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique, monotonically increasing thread identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(u64);

impl ThreadId {
    fn allocate() -> Self {
        Self(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Reconstructs an id from its raw value; zero means "no thread".
    pub const fn from_raw(raw: u64) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(Self(raw))
        }
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Behaviour a thread executes once it is first scheduled.
///
/// Closures qualify directly; named types implement it to carry their own
/// state into the thread.
pub trait Runnable: Send {
    fn run(self: Box<Self>);
}

impl<F: FnOnce() + Send> Runnable for F {
    fn run(self: Box<Self>) {
        (*self)()
    }
}

/// Stack memory owned by one thread, returned to the heap on drop.
struct ThreadStack {
    base: NonNull<u8>,
    size: usize,
    heap: &'static LockedHeap,
}

// SAFETY:
// - The stack block is exclusively owned by its thread; `base` is never
//   shared outside of it.
unsafe impl Send for ThreadStack {}

impl Drop for ThreadStack {
    fn drop(&mut self) {
        if let Err(err) = self.heap.free(self.base) {
            panic!(
                "thread stack {:#x} could not be released: {}",
                self.base.as_ptr() as usize,
                err
            );
        }
    }
}

pub struct Thread {
    id: ThreadId,
    name: String,
    regs: UnsafeCell<ThreadRegisters>,
    body: UnsafeCell<Option<Box<dyn Runnable>>>,
    /// Set once by `Scheduler::spawn`, read by the trampoline on exit.
    scheduler: Option<&'static Scheduler>,
    logger: Logger,
    stack: ThreadStack,
}

impl Thread {
    /// Allocates a stack of `stack_size` bytes (at least [`MIN_STACK_SIZE`])
    /// from `heap` and prepares the first activation of `body`.
    pub fn new(
        heap: &'static LockedHeap,
        name: &str,
        stack_size: usize,
        body: Box<dyn Runnable>,
        logger: Logger,
    ) -> Result<Box<Thread>, SpawnError> {
        let stack_size = stack_size.max(MIN_STACK_SIZE);
        let base = heap
            .allocate(stack_size)
            .map_err(SpawnError::StackAllocation)?;

        let thread = Box::new(Thread {
            id: ThreadId::allocate(),
            name: String::from(name),
            regs: UnsafeCell::new(ThreadRegisters::default()),
            body: UnsafeCell::new(Some(body)),
            scheduler: None,
            logger,
            stack: ThreadStack {
                base,
                size: stack_size,
                heap,
            },
        });

        let arg = &*thread as *const Thread as usize;
        // SAFETY:
        // - The stack block was just allocated for this thread and is owned by
        //   `thread.stack` until the thread is dropped.
        // - `arg` points into the box, whose address never changes.
        // - Nobody can switch to the record before `new` returns.
        unsafe {
            *thread.regs.get() =
                context::prepare_initial_frame(base.as_ptr(), stack_size, thread_trampoline, arg);
        }

        thread.logger.debug(
            "thread",
            format_args!(
                "Initialized thread {} ({}) stack={:#x}+{}",
                thread.id,
                thread.name,
                base.as_ptr() as usize,
                stack_size
            ),
        );
        Ok(thread)
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lowest address of the stack block.
    pub fn stack_base(&self) -> usize {
        self.stack.base.as_ptr() as usize
    }

    pub fn stack_size(&self) -> usize {
        self.stack.size
    }

    /// Whether the body has not been started yet.
    pub fn is_fresh(&self) -> bool {
        // SAFETY:
        // - Only the thread itself takes the body, and it is not running while
        //   someone else holds a reference to inspect it.
        unsafe { (*self.body.get()).is_some() }
    }

    pub(crate) fn attach(&mut self, scheduler: &'static Scheduler) {
        self.scheduler = Some(scheduler);
    }

    pub(crate) fn regs_ptr(&self) -> *mut ThreadRegisters {
        self.regs.get()
    }

    /// Copy of the saved register record, for diagnostics.
    pub fn saved_registers(&self) -> ThreadRegisters {
        // SAFETY:
        // - The record is only written during a switch with interrupts
        //   masked; a caller holding `&Thread` is not inside that window.
        unsafe { *self.regs.get() }
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("stack_base", &format_args!("{:#x}", self.stack_base()))
            .field("stack_size", &self.stack.size)
            .finish()
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        self.logger.debug(
            "thread",
            format_args!("Uninitialized thread {} ({})", self.id, self.name),
        );
    }
}

/// First Rust code of every thread.
///
/// Runs the body once, then terminates the thread through its scheduler.
/// Never returns; the return address above it is poisoned.
extern "C" fn thread_trampoline(arg: usize) -> ! {
    interrupts::enable();

    // SAFETY:
    // - `arg` is the address of the boxed `Thread` passed to
    //   `prepare_initial_frame`; the scheduler keeps the box alive while the
    //   thread can run.
    let thread = unsafe { &*(arg as *const Thread) };

    // SAFETY:
    // - The body slot is only taken here, on the thread's own stack, once.
    let body = unsafe { (*thread.body.get()).take() };
    if let Some(body) = body {
        body.run();
    }

    match thread.scheduler {
        Some(scheduler) => scheduler.exit_current(),
        None => {
            thread.logger.error(
                "thread",
                format_args!("thread {} finished without a scheduler", thread.id),
            );
            interrupts::halt_forever()
        }
    }
}
