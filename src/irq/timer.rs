//! Timer collaborator: system tick counter and the preemption handler.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::kernel::Kernel;

use super::InterruptHandler;

/// Process-wide tick counter, advanced once per timer interrupt.
pub struct SystemClock {
    ticks: AtomicU64,
}

impl SystemClock {
    pub const fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
        }
    }

    /// Advances the clock and returns the new tick count.
    pub fn tick(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Timer interrupt handler: ticks the clock and asks the scheduler to preempt
/// the running thread once per time slice.
pub struct PreemptionTimer {
    time_slice_ticks: u64,
}

impl PreemptionTimer {
    /// A `time_slice_ticks` of zero counts ticks but never preempts.
    pub const fn new(time_slice_ticks: u64) -> Self {
        Self { time_slice_ticks }
    }

    pub fn time_slice_ticks(&self) -> u64 {
        self.time_slice_ticks
    }
}

impl InterruptHandler for PreemptionTimer {
    fn trigger(&self, kernel: &Kernel, _vector: usize) {
        let now = kernel.clock().tick();
        if self.time_slice_ticks != 0 && now % self.time_slice_ticks == 0 {
            kernel.scheduler().request_preemption();
        }
    }
}
