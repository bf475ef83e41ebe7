//! Round-robin scheduler with deferred timer preemption.
//!
//! Threads are switched cooperatively: a running thread keeps the CPU until
//! it yields, blocks or exits. The timer interrupt only *requests* a switch
//! ([`Scheduler::request_preemption`]); the switch itself happens at the next
//! safe point ([`Scheduler::preempt_if_requested`], called at the end of
//! interrupt handling, or any cooperative switch), so scheduler state is never
//! observed half-modified.
//!
//! The thread table owns every spawned [`Thread`]. The ready queue and the
//! blocked queues only hold [`ThreadId`]s and are pairwise disjoint.

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, VecDeque};
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::arch::context::{self, ThreadRegisters};
use crate::arch::interrupts;
use crate::logging::Logger;
use crate::memory::heap::HeapError;
use crate::sync::spinlock::{SpinLock, SpinLockGuard};

use super::thread::{Thread, ThreadId};

/// Why a thread is blocked. Each reason has its own FIFO of waiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WaitReason {
    /// Waiting for a permit of the semaphore with this id.
    Semaphore(u64),
    /// Waiting for the given thread to terminate.
    Join(ThreadId),
    /// Waiting for a driver-defined event (I/O completion, input).
    Event(u32),
}

/// Lifecycle state of a scheduled thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Queued on the ready queue.
    Ready,

    /// The one thread currently executing on the CPU.
    Running,

    /// Parked on a wait queue until [`Scheduler::wake`] moves it back.
    Blocked(WaitReason),

    /// The body returned. The thread keeps its table slot and its stack until
    /// it is reclaimed with [`Scheduler::join`] or [`Scheduler::reap`].
    Terminated,
}

/// What the idle thread does while nothing is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdlePolicy {
    /// Halt until an interrupt makes a thread ready. [`Scheduler::run`]
    /// never returns.
    #[default]
    Halt,

    /// Switch back to the context that called [`Scheduler::run`].
    ReturnToBootstrap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    /// Heap allocation for the thread stack failed.
    StackAllocation(HeapError),
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::StackAllocation(err) => write!(f, "stack allocation failed: {}", err),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    /// `run` was called from a scheduled thread or the idle thread.
    NotInBootstrapContext,
    /// The operation needs a running thread to suspend.
    NotInThreadContext,
    /// `run` was called before an idle thread was installed.
    IdleThreadMissing,
    /// No thread with this id is known to the scheduler.
    UnknownThread(ThreadId),
    /// A thread tried to join itself.
    SelfJoin,
    /// The thread has not terminated yet and cannot be reclaimed.
    NotTerminated(ThreadId),
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerError::NotInBootstrapContext => f.write_str("not in bootstrap context"),
            SchedulerError::NotInThreadContext => f.write_str("not in thread context"),
            SchedulerError::IdleThreadMissing => f.write_str("idle thread not installed"),
            SchedulerError::UnknownThread(id) => write!(f, "unknown thread {}", id),
            SchedulerError::SelfJoin => f.write_str("thread cannot join itself"),
            SchedulerError::NotTerminated(id) => write!(f, "thread {} has not terminated", id),
        }
    }
}

/// Who owns the CPU right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Context {
    /// The code that called `run`, typically the kernel bootstrap.
    Bootstrap,
    Idle,
    Thread(ThreadId),
}

/// What happens to the outgoing thread on a switch.
#[derive(Clone, Copy)]
enum Outgoing {
    Requeue,
    Block(WaitReason),
    Terminate,
}

struct ThreadEntry {
    thread: Box<Thread>,
    state: ThreadState,
}

struct SchedulerState {
    threads: BTreeMap<ThreadId, ThreadEntry>,
    ready: VecDeque<ThreadId>,
    blocked: BTreeMap<WaitReason, VecDeque<ThreadId>>,
    current: Context,
    idle: Option<Box<Thread>>,
    context_switches: u64,
}

impl SchedulerState {
    const fn new() -> Self {
        Self {
            threads: BTreeMap::new(),
            ready: VecDeque::new(),
            blocked: BTreeMap::new(),
            current: Context::Bootstrap,
            idle: None,
            context_switches: 0,
        }
    }

    fn set_state(&mut self, id: ThreadId, state: ThreadState) {
        if let Some(entry) = self.threads.get_mut(&id) {
            entry.state = state;
        }
    }

    /// Moves a blocked thread to the tail of the ready queue.
    fn wake(&mut self, id: ThreadId) -> bool {
        let Some(ThreadState::Blocked(reason)) = self.threads.get(&id).map(|e| e.state) else {
            return false;
        };
        if let Some(queue) = self.blocked.get_mut(&reason) {
            queue.retain(|&waiter| waiter != id);
            if queue.is_empty() {
                self.blocked.remove(&reason);
            }
        }
        self.set_state(id, ThreadState::Ready);
        self.ready.push_back(id);
        true
    }

    fn wake_one(&mut self, reason: WaitReason) -> Option<ThreadId> {
        let id = *self.blocked.get(&reason)?.front()?;
        self.wake(id).then_some(id)
    }

    fn regs_of(&self, context: Context, bootstrap: *mut ThreadRegisters) -> Option<*mut ThreadRegisters> {
        match context {
            Context::Bootstrap => Some(bootstrap),
            Context::Idle => self.idle.as_ref().map(|idle| idle.regs_ptr()),
            Context::Thread(id) => self.threads.get(&id).map(|e| e.thread.regs_ptr()),
        }
    }
}

/// Round-robin scheduler for one CPU.
pub struct Scheduler {
    state: SpinLock<SchedulerState>,
    /// Continuation of the context that called `run`.
    bootstrap: UnsafeCell<ThreadRegisters>,
    /// Raw id of the running thread, 0 while idle or in the bootstrap context.
    running: AtomicU64,
    /// Raw id of the thread the timer wants preempted, 0 for none.
    preempt_pending: AtomicU64,
    idle_policy: IdlePolicy,
    logger: Logger,
}

// SAFETY:
// - `bootstrap` is only accessed inside `switch_to`, with interrupts masked
//   on the single CPU that owns the scheduler.
// - All other state is behind the spinlock or atomic.
unsafe impl Sync for Scheduler {}

impl Scheduler {
    pub fn new(idle_policy: IdlePolicy, logger: Logger) -> Self {
        Self {
            state: SpinLock::new(SchedulerState::new()),
            bootstrap: UnsafeCell::new(ThreadRegisters::default()),
            running: AtomicU64::new(0),
            preempt_pending: AtomicU64::new(0),
            idle_policy,
            logger,
        }
    }

    pub fn idle_policy(&self) -> IdlePolicy {
        self.idle_policy
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Adds a new thread at the tail of the ready queue.
    pub fn spawn(&'static self, mut thread: Box<Thread>) -> ThreadId {
        thread.attach(self);
        let id = thread.id();
        self.logger.info(
            "sched",
            format_args!("[SCHED] spawn thread {} ({})", id, thread.name()),
        );

        let mut state = self.state.lock();
        state.threads.insert(
            id,
            ThreadEntry {
                thread,
                state: ThreadState::Ready,
            },
        );
        state.ready.push_back(id);
        id
    }

    /// Installs the idle thread. It never enters the ready queue.
    pub fn install_idle(&'static self, mut idle: Box<Thread>) {
        idle.attach(self);
        let previous = self.state.lock().idle.replace(idle);
        debug_assert!(previous.is_none(), "idle thread installed twice");
    }

    pub fn has_idle(&self) -> bool {
        self.state.lock().idle.is_some()
    }

    /// Hands the CPU from the current context to `next` and returns once
    /// something switches back.
    ///
    /// The caller masks interrupts before taking the lock; the guard is
    /// released before the switch so no lock is held across it.
    fn switch_to(&self, mut state: SpinLockGuard<'_, SchedulerState>, next: Context) {
        let from = state.current;
        if from == next {
            return;
        }

        let bootstrap = self.bootstrap.get();
        let (Some(from_regs), Some(to_regs)) =
            (state.regs_of(from, bootstrap), state.regs_of(next, bootstrap))
        else {
            drop(state);
            self.logger.error(
                "sched",
                format_args!("[SCHED] invalid switch {:?} -> {:?}", from, next),
            );
            panic!("invalid context switch target {:?}", next);
        };

        if let Context::Thread(id) = next {
            state.set_state(id, ThreadState::Running);
        }
        state.current = next;
        state.context_switches += 1;
        self.running.store(
            match next {
                Context::Thread(id) => id.as_u64(),
                _ => 0,
            },
            Ordering::Release,
        );
        drop(state);

        // SAFETY:
        // - Both records belong to live contexts: the bootstrap record is
        //   owned by `self`, thread records by boxes in the table or the idle
        //   slot, and a terminated thread is never switched to.
        // - Interrupts are masked, so nothing else touches either record
        //   until the switch completes.
        unsafe { context::switch(from_regs, to_regs) };
    }

    /// Retires the running thread as `outgoing` says and switches to the head
    /// of the ready queue, or to the idle thread if the queue is empty.
    fn reschedule(&self, mut state: SpinLockGuard<'_, SchedulerState>, outgoing: Outgoing) {
        let Context::Thread(current) = state.current else {
            return;
        };

        match outgoing {
            Outgoing::Requeue => {
                if state.ready.is_empty() {
                    return;
                }
                state.set_state(current, ThreadState::Ready);
                state.ready.push_back(current);
            }
            Outgoing::Block(reason) => {
                state.set_state(current, ThreadState::Blocked(reason));
                state.blocked.entry(reason).or_default().push_back(current);
            }
            Outgoing::Terminate => {
                state.set_state(current, ThreadState::Terminated);
                let joiners = state
                    .blocked
                    .remove(&WaitReason::Join(current))
                    .unwrap_or_default();
                for joiner in joiners {
                    state.set_state(joiner, ThreadState::Ready);
                    state.ready.push_back(joiner);
                }
            }
        }

        let next = match state.ready.pop_front() {
            Some(id) => Context::Thread(id),
            None if state.idle.is_some() => Context::Idle,
            None => Context::Bootstrap,
        };
        self.switch_to(state, next);
    }

    /// Gives up the CPU to the next ready thread, if there is one.
    ///
    /// Also consumes a pending preemption request. No-op outside a thread.
    pub fn yield_now(&self) {
        self.preempt_pending.store(0, Ordering::Release);

        let were_enabled = interrupts::are_enabled();
        interrupts::disable();

        let state = self.state.lock();
        self.reschedule(state, Outgoing::Requeue);

        if were_enabled {
            interrupts::enable();
        }
    }

    /// Parks the running thread under `reason` until someone wakes it.
    pub fn block(&self, reason: WaitReason) -> Result<(), SchedulerError> {
        self.preempt_pending.store(0, Ordering::Release);

        let were_enabled = interrupts::are_enabled();
        interrupts::disable();

        let state = self.state.lock();
        let result = if matches!(state.current, Context::Thread(_)) {
            self.reschedule(state, Outgoing::Block(reason));
            Ok(())
        } else {
            Err(SchedulerError::NotInThreadContext)
        };

        if were_enabled {
            interrupts::enable();
        }
        result
    }

    /// Moves a blocked thread to the tail of the ready queue.
    ///
    /// Does not switch. Returns `false` if the thread is not blocked.
    pub fn wake(&self, id: ThreadId) -> bool {
        self.state.lock().wake(id)
    }

    /// Wakes the longest waiter for `reason`.
    pub fn wake_one(&self, reason: WaitReason) -> Option<ThreadId> {
        self.state.lock().wake_one(reason)
    }

    /// Wakes every waiter for `reason` and returns how many there were.
    pub fn wake_all(&self, reason: WaitReason) -> usize {
        let mut state = self.state.lock();
        let mut woken = 0;
        while state.wake_one(reason).is_some() {
            woken += 1;
        }
        woken
    }

    /// Terminates the running thread. Called by the trampoline when a thread
    /// body returns; threads may also call it to exit early.
    pub fn exit_current(&self) -> ! {
        interrupts::disable();
        self.preempt_pending.store(0, Ordering::Release);

        let state = self.state.lock();
        let current = state.current;
        match current {
            Context::Thread(id) => {
                self.logger.info("sched", format_args!("[SCHED] thread {} exited", id));
                self.reschedule(state, Outgoing::Terminate);
            }
            other => {
                drop(state);
                self.logger.error(
                    "sched",
                    format_args!("[SCHED] exit_current from {:?}", other),
                );
                panic!("exit_current called outside a scheduled thread");
            }
        }

        // Nothing switches back to a terminated thread.
        interrupts::halt_forever()
    }

    /// Timer side of preemption: marks the running thread for preemption.
    ///
    /// Safe to call from interrupt context; never switches.
    pub fn request_preemption(&self) {
        let running = self.running.load(Ordering::Acquire);
        self.preempt_pending.store(running, Ordering::Release);
    }

    /// Raw id of the thread marked for preemption, 0 if none.
    pub fn pending_preemption(&self) -> u64 {
        self.preempt_pending.load(Ordering::Acquire)
    }

    /// Safe point: performs a pending preemption of the running thread.
    ///
    /// Returns whether a request for the running thread was consumed. A
    /// request aimed at a thread that already gave up the CPU is dropped.
    pub fn preempt_if_requested(&self) -> bool {
        let pending = self.preempt_pending.swap(0, Ordering::AcqRel);
        if pending == 0 || pending != self.running.load(Ordering::Acquire) {
            return false;
        }
        self.yield_now();
        true
    }

    /// Starts scheduling from the bootstrap context.
    ///
    /// Switches to the head of the ready queue (or the idle thread) and
    /// returns once the idle thread hands control back, which only happens
    /// with [`IdlePolicy::ReturnToBootstrap`]. May be called again later to
    /// resume scheduling.
    pub fn run(&self) -> Result<(), SchedulerError> {
        let were_enabled = interrupts::are_enabled();
        interrupts::disable();

        let mut state = self.state.lock();
        let result = if state.current != Context::Bootstrap {
            Err(SchedulerError::NotInBootstrapContext)
        } else if state.idle.is_none() {
            Err(SchedulerError::IdleThreadMissing)
        } else {
            self.logger.info(
                "sched",
                format_args!(
                    "[SCHED] run ready={} blocked={}",
                    state.ready.len(),
                    state.blocked.values().map(VecDeque::len).sum::<usize>()
                ),
            );
            let next = match state.ready.pop_front() {
                Some(id) => Context::Thread(id),
                None => Context::Idle,
            };
            self.switch_to(state, next);
            state = self.state.lock();
            self.logger.info(
                "sched",
                format_args!("[SCHED] back in bootstrap ready={}", state.ready.len()),
            );
            Ok(())
        };
        drop(state);

        if were_enabled {
            interrupts::enable();
        }
        result
    }

    /// Body of the idle thread.
    pub(crate) fn idle_loop(&self) -> ! {
        loop {
            interrupts::disable();
            let mut state = self.state.lock();

            if let Some(id) = state.ready.pop_front() {
                self.switch_to(state, Context::Thread(id));
                continue;
            }

            match self.idle_policy {
                IdlePolicy::ReturnToBootstrap => self.switch_to(state, Context::Bootstrap),
                IdlePolicy::Halt => {
                    drop(state);
                    interrupts::enable();
                    interrupts::halt();
                }
            }
        }
    }

    /// Blocks the running thread until `id` terminates, then reclaims it.
    pub fn join(&self, id: ThreadId) -> Result<(), SchedulerError> {
        loop {
            let were_enabled = interrupts::are_enabled();
            interrupts::disable();

            let mut state = self.state.lock();
            let current = state.current;
            let target = state.threads.get(&id).map(|e| e.state);
            let outcome = match current {
                Context::Thread(me) if me == id => Err(SchedulerError::SelfJoin),
                Context::Thread(_) => match target {
                    None => Err(SchedulerError::UnknownThread(id)),
                    Some(ThreadState::Terminated) => Ok(state.threads.remove(&id)),
                    Some(_) => {
                        self.reschedule(state, Outgoing::Block(WaitReason::Join(id)));
                        if were_enabled {
                            interrupts::enable();
                        }
                        continue;
                    }
                },
                _ => Err(SchedulerError::NotInThreadContext),
            };
            drop(state);

            if were_enabled {
                interrupts::enable();
            }
            // The reclaimed thread is dropped here, outside the lock.
            return outcome.map(|_| ());
        }
    }

    /// Takes a terminated thread out of the table. Dropping the returned
    /// thread releases its stack.
    pub fn reap(&self, id: ThreadId) -> Result<Box<Thread>, SchedulerError> {
        let mut state = self.state.lock();
        let target = state.threads.get(&id).map(|e| e.state);
        match target {
            None => Err(SchedulerError::UnknownThread(id)),
            Some(ThreadState::Terminated) => state
                .threads
                .remove(&id)
                .map(|entry| entry.thread)
                .ok_or(SchedulerError::UnknownThread(id)),
            Some(_) => Err(SchedulerError::NotTerminated(id)),
        }
    }

    /// Reclaims every terminated thread and returns how many were released.
    pub fn reap_terminated(&self) -> usize {
        let reaped: Vec<ThreadEntry> = {
            let mut state = self.state.lock();
            let ids: Vec<ThreadId> = state
                .threads
                .iter()
                .filter(|(_, entry)| entry.state == ThreadState::Terminated)
                .map(|(&id, _)| id)
                .collect();
            ids.iter()
                .filter_map(|id| state.threads.remove(id))
                .collect()
        };
        reaped.len()
    }

    /// Id of the running thread; `None` while idle or in the bootstrap context.
    pub fn current_id(&self) -> Option<ThreadId> {
        ThreadId::from_raw(self.running.load(Ordering::Acquire))
    }

    pub fn thread_state(&self, id: ThreadId) -> Option<ThreadState> {
        self.state.lock().threads.get(&id).map(|e| e.state)
    }

    pub fn thread_name(&self, id: ThreadId) -> Option<String> {
        self.state
            .lock()
            .threads
            .get(&id)
            .map(|e| String::from(e.thread.name()))
    }

    /// Ready queue, head first.
    pub fn ready_ids(&self) -> Vec<ThreadId> {
        self.state.lock().ready.iter().copied().collect()
    }

    /// Waiters for `reason`, longest waiting first.
    pub fn blocked_on(&self, reason: WaitReason) -> Vec<ThreadId> {
        self.state
            .lock()
            .blocked
            .get(&reason)
            .map(|queue| queue.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Threads in the table, terminated ones included.
    pub fn thread_count(&self) -> usize {
        self.state.lock().threads.len()
    }

    pub fn context_switches(&self) -> u64 {
        self.state.lock().context_switches
    }
}
