//! Counting semaphore on top of the scheduler's wait queues.
//!
//! The counter never goes below zero: a caller that finds no permit queues
//! its thread id and blocks, and `release` hands the permit straight to the
//! longest waiter instead of bumping the counter. Waiters therefore resume in
//! FIFO order. A handed-over permit is recorded per waiter, so a thread woken
//! by anything other than `release` goes back to sleep in its old position.

use alloc::collections::{BTreeSet, VecDeque};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::arch::interrupts;
use crate::scheduler::{Scheduler, SchedulerError, ThreadId, WaitReason};
use crate::sync::spinlock::SpinLock;

static NEXT_SEMAPHORE_ID: AtomicU64 = AtomicU64::new(1);

struct SemaphoreState {
    count: usize,
    waiters: VecDeque<ThreadId>,
    /// Waiters a permit was handed to that have not resumed yet.
    granted: BTreeSet<ThreadId>,
}

pub struct Semaphore<'s> {
    id: u64,
    scheduler: &'s Scheduler,
    state: SpinLock<SemaphoreState>,
}

impl<'s> Semaphore<'s> {
    pub fn new(scheduler: &'s Scheduler, initial: usize) -> Self {
        Self {
            id: NEXT_SEMAPHORE_ID.fetch_add(1, Ordering::Relaxed),
            scheduler,
            state: SpinLock::new(SemaphoreState {
                count: initial,
                waiters: VecDeque::new(),
                granted: BTreeSet::new(),
            }),
        }
    }

    /// Identifier used as [`WaitReason::Semaphore`] for the waiters.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Takes a permit, blocking the calling thread until one is handed over.
    ///
    /// Fails with [`SchedulerError::NotInThreadContext`] only when no permit
    /// is available and the caller is not a scheduled thread.
    pub fn acquire(&self) -> Result<(), SchedulerError> {
        // Queueing and blocking must not be split by an interrupt, or a
        // release in between would wake a thread that is not blocked yet.
        interrupts::without_interrupts(|| self.acquire_masked())
    }

    fn acquire_masked(&self) -> Result<(), SchedulerError> {
        let mut state = self.state.lock();
        if state.count > 0 {
            state.count -= 1;
            return Ok(());
        }

        let id = self
            .scheduler
            .current_id()
            .ok_or(SchedulerError::NotInThreadContext)?;
        state.waiters.push_back(id);

        loop {
            drop(state);
            self.scheduler.logger().debug(
                "sem",
                format_args!("[SEM] thread {} waits on semaphore {}", id, self.id),
            );
            let blocked = self.scheduler.block(WaitReason::Semaphore(self.id));

            state = self.state.lock();
            if let Err(err) = blocked {
                state.waiters.retain(|&waiter| waiter != id);
                return Err(err);
            }
            if state.granted.remove(&id) {
                return Ok(());
            }
            // Woken without a permit: still queued, wait again.
        }
    }

    /// Takes a permit if one is available, without blocking.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        if state.count == 0 {
            return false;
        }
        state.count -= 1;
        true
    }

    /// Returns a permit: hands it to the longest waiter, or increments the
    /// counter when nobody waits. Never switches.
    ///
    /// Waiters unknown to the scheduler are dropped from the queue and the
    /// permit goes to the next one.
    pub fn release(&self) {
        let mut state = self.state.lock();
        while let Some(id) = state.waiters.pop_front() {
            if self.scheduler.thread_state(id).is_none() {
                self.scheduler.logger().error(
                    "sem",
                    format_args!("[SEM] dropping unknown waiter {} of semaphore {}", id, self.id),
                );
                continue;
            }
            state.granted.insert(id);
            // A waiter woken early is already ready and picks the grant up
            // when it runs.
            self.scheduler.wake(id);
            return;
        }
        state.count += 1;
    }

    /// Permits currently available.
    pub fn count(&self) -> usize {
        self.state.lock().count
    }

    /// Threads waiting for a permit, longest waiting first.
    pub fn waiters(&self) -> Vec<ThreadId> {
        self.state.lock().waiters.iter().copied().collect()
    }
}
