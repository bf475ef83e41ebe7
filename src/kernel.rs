//! Process-wide kernel context.
//!
//! One [`Kernel`] owns the heap, the scheduler, the interrupt dispatch table
//! and the system clock. It is built once at startup and shared as
//! `&'static Kernel`: a bare-metal bootstrap keeps it in a `spin::Once`,
//! tests leak a `Box`.

use alloc::boxed::Box;
use alloc::sync::Arc;

use crate::allocator::LockedHeap;
use crate::arch::interrupts;
use crate::config::KernelConfig;
use crate::irq::timer::{PreemptionTimer, SystemClock};
use crate::irq::{DispatchError, InterruptDispatcher, TIMER_VECTOR};
use crate::logging::Logger;
use crate::memory::heap::HeapError;
use crate::scheduler::{Runnable, Scheduler, SchedulerError, SpawnError, Thread, ThreadId};
use crate::sync::semaphore::Semaphore;

/// Raw memory handed to the kernel heap.
#[derive(Debug, Clone, Copy)]
pub struct HeapRegion {
    start: *mut u8,
    size: usize,
}

impl HeapRegion {
    /// # Safety
    /// `start..start + size` must be writable, unused by anything else and
    /// stay valid for the rest of the program.
    pub const unsafe fn from_raw(start: *mut u8, size: usize) -> Self {
        Self { start, size }
    }

    pub fn from_static(region: &'static mut [u8]) -> Self {
        Self {
            start: region.as_mut_ptr(),
            size: region.len(),
        }
    }

    /// Leaks a zeroed, word-aligned buffer of `size` bytes from the global
    /// allocator.
    pub fn leaked(size: usize) -> Self {
        let words = size.div_ceil(core::mem::size_of::<u64>());
        let buffer: &'static mut [u64] = alloc::vec![0u64; words].leak();
        Self {
            start: buffer.as_mut_ptr().cast::<u8>(),
            size,
        }
    }

    pub fn start(&self) -> *mut u8 {
        self.start
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

/// Body of the idle thread.
struct IdleBody(&'static Scheduler);

impl Runnable for IdleBody {
    fn run(self: Box<Self>) {
        self.0.idle_loop()
    }
}

pub struct Kernel {
    // Threads own heap stacks, so the scheduler is declared (and dropped)
    // before the heap.
    scheduler: Scheduler,
    dispatcher: InterruptDispatcher,
    clock: SystemClock,
    heap: LockedHeap,
    config: KernelConfig,
    logger: Logger,
}

impl Kernel {
    /// Builds the kernel context on `region`.
    ///
    /// Registers the preemption timer on [`TIMER_VECTOR`] when the config
    /// asks for it. Fails if the region cannot hold a heap.
    pub fn new(region: HeapRegion, config: KernelConfig, logger: Logger) -> Result<Self, HeapError> {
        let logger = logger.with_level(config.log_level);

        let heap = LockedHeap::empty();
        heap.set_logger(logger.clone(), config.heap_debug);
        // SAFETY:
        // - `HeapRegion` construction guarantees the range is owned memory
        //   that outlives the kernel.
        let usable = unsafe { heap.init(region.start, region.size) }?;

        let kernel = Self {
            scheduler: Scheduler::new(config.idle_policy, logger.clone()),
            dispatcher: InterruptDispatcher::new(logger.clone()),
            clock: SystemClock::new(),
            heap,
            config,
            logger,
        };

        if config.install_timer {
            let timer = Arc::new(PreemptionTimer::new(config.time_slice_ticks));
            if let Err(err) = kernel.dispatcher.register(TIMER_VECTOR, timer) {
                kernel
                    .logger
                    .error("kernel", format_args!("timer registration failed: {}", err));
            }
        }

        kernel.logger.info(
            "kernel",
            format_args!(
                "kernel ready heap={:#x}+{} stack_size={} time_slice={}",
                region.start as usize, usable, config.stack_size, config.time_slice_ticks
            ),
        );
        Ok(kernel)
    }

    pub fn heap(&self) -> &LockedHeap {
        &self.heap
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn dispatcher(&self) -> &InterruptDispatcher {
        &self.dispatcher
    }

    pub fn clock(&self) -> &SystemClock {
        &self.clock
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Timer ticks seen since boot.
    pub fn ticks(&self) -> u64 {
        self.clock.ticks()
    }

    /// Creates a thread running `body` and queues it at the tail of the
    /// ready queue.
    pub fn spawn<F>(&'static self, name: &str, body: F) -> Result<ThreadId, SpawnError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.spawn_runnable(name, Box::new(body))
    }

    pub fn spawn_runnable(
        &'static self,
        name: &str,
        body: Box<dyn Runnable>,
    ) -> Result<ThreadId, SpawnError> {
        let thread = Thread::new(
            &self.heap,
            name,
            self.config.stack_size,
            body,
            self.logger.clone(),
        )?;
        Ok(self.scheduler.spawn(thread))
    }

    /// New semaphore with `initial` permits, bound to this kernel's scheduler.
    pub fn semaphore(&self, initial: usize) -> Semaphore<'_> {
        Semaphore::new(&self.scheduler, initial)
    }

    /// Starts scheduling from the bootstrap context.
    ///
    /// The idle thread is created on the first call. Returns when the idle
    /// thread hands control back, which only happens with
    /// [`crate::scheduler::IdlePolicy::ReturnToBootstrap`].
    pub fn run(&'static self) -> Result<(), SchedulerError> {
        if !self.scheduler.has_idle() {
            let idle = Thread::new(
                &self.heap,
                "idle",
                self.config.stack_size,
                Box::new(IdleBody(&self.scheduler)),
                self.logger.clone(),
            );
            match idle {
                Ok(idle) => self.scheduler.install_idle(idle),
                Err(err) => {
                    self.logger
                        .error("kernel", format_args!("idle thread creation failed: {}", err));
                    return Err(SchedulerError::IdleThreadMissing);
                }
            }
        }

        self.scheduler.run()
    }

    /// Never-returning scheduler entry point for a bootstrap.
    ///
    /// Whenever the idle thread hands control back, waits for the next
    /// interrupt and resumes scheduling.
    pub fn schedule(&'static self) -> ! {
        loop {
            if let Err(err) = self.run() {
                self.logger
                    .error("kernel", format_args!("scheduler stopped: {}", err));
                interrupts::halt_forever();
            }
            interrupts::enable();
            interrupts::halt();
        }
    }

    /// Entry for the platform interrupt stub: runs the registered handler,
    /// then performs a pending preemption at this safe point.
    pub fn handle_interrupt(&self, vector: usize) -> Result<(), DispatchError> {
        let result = self.dispatcher.dispatch(self, vector);
        self.scheduler.preempt_if_requested();
        result
    }
}
