//! Boot-time configuration of the execution core.
//!
//! Every tunable of the heap, scheduler and timer lives here so one bootstrap
//! (or one test) can pick its own values without touching the subsystems.

use crate::logging::LogLevel;
use crate::scheduler::IdlePolicy;

/// Default per-thread stack size.
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

/// Smallest stack a thread may be created with.
///
/// Covers the initial frame plus a little room for the trampoline itself.
pub const MIN_STACK_SIZE: usize = 4 * 1024;

/// Default number of timer ticks between two preemption requests.
pub const DEFAULT_TIME_SLICE_TICKS: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Stack bytes allocated from the kernel heap for every thread.
    pub stack_size: usize,
    /// Timer ticks between preemption requests. Zero disables preemption.
    pub time_slice_ticks: u64,
    /// What the idle thread does when nothing is ready.
    pub idle_policy: IdlePolicy,
    /// Most verbose level forwarded to the log sink.
    pub log_level: LogLevel,
    /// Log every heap allocation and free, not just failures.
    pub heap_debug: bool,
    /// Register the preemption timer on the timer vector at construction.
    pub install_timer: bool,
}

impl KernelConfig {
    pub const fn new() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            time_slice_ticks: DEFAULT_TIME_SLICE_TICKS,
            idle_policy: IdlePolicy::Halt,
            log_level: LogLevel::Info,
            heap_debug: false,
            install_timer: true,
        }
    }

    /// Stack size is clamped to [`MIN_STACK_SIZE`].
    pub const fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = if stack_size < MIN_STACK_SIZE {
            MIN_STACK_SIZE
        } else {
            stack_size
        };
        self
    }

    pub const fn with_time_slice_ticks(mut self, ticks: u64) -> Self {
        self.time_slice_ticks = ticks;
        self
    }

    pub const fn with_idle_policy(mut self, policy: IdlePolicy) -> Self {
        self.idle_policy = policy;
        self
    }

    pub const fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub const fn with_heap_debug(mut self, enabled: bool) -> Self {
        self.heap_debug = enabled;
        self
    }

    pub const fn with_timer(mut self, install: bool) -> Self {
        self.install_timer = install;
        self
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}
