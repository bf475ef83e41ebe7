//! Thread lifecycle integration tests: block, wake, exit, join and reaping.

use std::sync::Arc;

use kaos_core::logging::Logger;
use kaos_core::memory::HeapError;
use kaos_core::scheduler::{
    IdlePolicy, SchedulerError, SpawnError, Thread, ThreadId, ThreadState, WaitReason,
};
use kaos_core::sync::spinlock::SpinLock;
use kaos_core::{HeapRegion, Kernel, KernelConfig};

type Trace = Arc<SpinLock<Vec<String>>>;

fn boot_kernel() -> &'static Kernel {
    let config = KernelConfig::new()
        .with_idle_policy(IdlePolicy::ReturnToBootstrap)
        .with_stack_size(16 * 1024)
        .with_timer(false);
    let kernel = Kernel::new(HeapRegion::leaked(256 * 1024), config, Logger::disabled())
        .expect("kernel should boot on a 256 KiB heap");
    Box::leak(Box::new(kernel))
}

fn new_trace() -> Trace {
    Arc::new(SpinLock::new(Vec::new()))
}

fn record(trace: &Trace, entry: impl Into<String>) {
    trace.lock().push(entry.into());
}

fn snapshot(trace: &Trace) -> Vec<String> {
    trace.lock().clone()
}

/// Contract: a blocked thread stays off the ready queue until woken.
#[test]
fn test_block_and_wake_moves_thread_back_to_ready() {
    let kernel = boot_kernel();
    let trace = new_trace();
    let reason = WaitReason::Event(7);

    let t = trace.clone();
    let sleeper = kernel
        .spawn("sleeper", move || {
            record(&t, "sleeper blocks");
            let blocked = kernel.scheduler().block(reason);
            record(&t, format!("sleeper resumed {:?}", blocked));
        })
        .expect("spawn should succeed");

    let t = trace.clone();
    kernel
        .spawn("waker", move || {
            let sched = kernel.scheduler();
            record(&t, format!("waiters {}", sched.blocked_on(reason).len()));
            record(
                &t,
                format!("state {:?}", sched.thread_state(sleeper)),
            );
            record(&t, format!("woken {:?}", sched.wake_one(reason).map(|id| id == sleeper)));
            record(&t, format!("ready has sleeper {}", sched.ready_ids().contains(&sleeper)));
        })
        .expect("spawn should succeed");

    kernel.run().expect("run should return");

    assert!(
        snapshot(&trace)
            == [
                "sleeper blocks",
                "waiters 1",
                "state Some(Blocked(Event(7)))",
                "woken Some(true)",
                "ready has sleeper true",
                "sleeper resumed Ok(())",
            ],
        "a blocked thread should resume only after an explicit wake"
    );
    assert!(
        kernel.scheduler().blocked_on(reason).is_empty(),
        "wait queue should be empty after the wake"
    );
}

/// Contract: wake only queues the thread; the waker keeps running.
#[test]
fn test_wake_does_not_switch_immediately() {
    let kernel = boot_kernel();
    let trace = new_trace();
    let reason = WaitReason::Event(3);

    let t = trace.clone();
    let sleeper = kernel
        .spawn("sleeper", move || {
            let _ = kernel.scheduler().block(reason);
            record(&t, "sleeper");
        })
        .expect("spawn should succeed");

    let t = trace.clone();
    kernel
        .spawn("waker", move || {
            let woke = kernel.scheduler().wake(sleeper);
            record(&t, format!("waker woke={}", woke));
            record(&t, "waker still running");
        })
        .expect("spawn should succeed");

    kernel.run().expect("run should return");

    assert!(
        snapshot(&trace) == ["waker woke=true", "waker still running", "sleeper"],
        "wake should only queue the thread"
    );
}

/// Contract: wake_all releases every waiter of one reason in arrival order.
#[test]
fn test_wake_all_releases_every_waiter_in_fifo_order() {
    let kernel = boot_kernel();
    let trace = new_trace();
    let reason = WaitReason::Event(11);

    for name in ["w1", "w2", "w3"] {
        let t = trace.clone();
        kernel
            .spawn(name, move || {
                let _ = kernel.scheduler().block(reason);
                record(&t, name);
            })
            .expect("spawn should succeed");
    }

    let t = trace.clone();
    kernel
        .spawn("broadcaster", move || {
            let woken = kernel.scheduler().wake_all(reason);
            record(&t, format!("woken {}", woken));
        })
        .expect("spawn should succeed");

    kernel.run().expect("run should return");

    assert!(
        snapshot(&trace) == ["woken 3", "w1", "w2", "w3"],
        "wake_all should release waiters in the order they blocked"
    );
}

/// Contract: waking a thread that is not blocked changes nothing.
#[test]
fn test_wake_of_non_blocked_thread_is_noop() {
    let kernel = boot_kernel();
    let id = kernel.spawn("ready", || {}).expect("spawn should succeed");

    assert!(!kernel.scheduler().wake(id), "a ready thread cannot be woken");
    assert!(
        kernel.scheduler().ready_ids() == [id],
        "a failed wake must not duplicate the thread in the ready queue"
    );
    assert!(
        kernel.scheduler().wake_one(WaitReason::Event(1)).is_none(),
        "wake_one on an empty wait queue should report nothing"
    );
}

/// Contract: the bootstrap context cannot block.
#[test]
fn test_block_outside_thread_is_rejected() {
    let kernel = boot_kernel();
    assert!(
        kernel.scheduler().block(WaitReason::Event(0)) == Err(SchedulerError::NotInThreadContext),
        "the bootstrap context cannot block"
    );
}

/// Contract: run is only accepted from the bootstrap context.
#[test]
fn test_run_inside_thread_is_rejected() {
    let kernel = boot_kernel();
    let trace = new_trace();

    let t = trace.clone();
    kernel
        .spawn("nested", move || {
            record(&t, format!("{:?}", kernel.run()));
        })
        .expect("spawn should succeed");

    kernel.run().expect("run should return");

    assert!(
        snapshot(&trace) == ["Err(NotInBootstrapContext)"],
        "run from a thread must be refused"
    );
}

/// Contract: join blocks until the target terminates and reclaims it.
/// Given: A worker that yields twice and a joiner that joins it.
/// When: Both run to completion.
/// Then: The joiner resumes after the worker finished and the worker's table
/// slot and stack are gone.
#[test]
fn test_join_waits_for_termination_and_reclaims() {
    let kernel = boot_kernel();
    let trace = new_trace();

    let t = trace.clone();
    let worker = kernel
        .spawn("worker", move || {
            record(&t, "worker 0");
            kernel.scheduler().yield_now();
            record(&t, "worker 1");
            kernel.scheduler().yield_now();
            record(&t, "worker done");
        })
        .expect("spawn should succeed");

    let t = trace.clone();
    let joiner = kernel
        .spawn("joiner", move || {
            record(&t, "join start");
            let joined = kernel.scheduler().join(worker);
            record(&t, format!("joined {:?}", joined));
        })
        .expect("spawn should succeed");

    kernel.run().expect("run should return");

    assert!(
        snapshot(&trace) == ["worker 0", "join start", "worker 1", "worker done", "joined Ok(())"],
        "join should block until the worker terminates"
    );
    assert!(
        kernel.scheduler().thread_state(worker).is_none(),
        "joined thread should be removed from the table"
    );
    assert!(
        kernel.scheduler().thread_state(joiner) == Some(ThreadState::Terminated),
        "unjoined thread should stay as Terminated"
    );

    let stats = kernel.heap().check_integrity().expect("heap should stay consistent");
    assert!(
        stats.allocated_blocks == 2,
        "only the idle and joiner stacks should remain allocated"
    );
}

/// Contract: self-join and joins of unknown threads are reported as errors.
#[test]
fn test_join_misuse_is_reported() {
    let kernel = boot_kernel();
    let trace = new_trace();

    let t = trace.clone();
    kernel
        .spawn("self-joiner", move || {
            let sched = kernel.scheduler();
            let me = sched.current_id();
            record(&t, format!("{:?}", me.map(|id| sched.join(id))));
            let unknown = ThreadId::from_raw(u64::MAX).map(|id| sched.join(id));
            record(&t, format!("{:?}", unknown.map(|r| r.is_err())));
        })
        .expect("spawn should succeed");

    assert!(
        kernel.scheduler().join(ThreadId::from_raw(1).unwrap())
            == Err(SchedulerError::NotInThreadContext),
        "the bootstrap context cannot join"
    );

    kernel.run().expect("run should return");

    assert!(
        snapshot(&trace) == ["Some(Err(SelfJoin))", "Some(true)"],
        "self join and unknown ids should be rejected"
    );
}

/// Contract: reaping terminated threads returns their stacks to the heap.
#[test]
fn test_reap_returns_stacks_to_heap() {
    let kernel = boot_kernel();
    let baseline = kernel
        .heap()
        .stats()
        .expect("stats should be readable")
        .allocated_blocks;

    let a = kernel.spawn("a", || {}).expect("spawn should succeed");
    let _b = kernel.spawn("b", || {}).expect("spawn should succeed");
    let _c = kernel.spawn("c", || {}).expect("spawn should succeed");

    assert!(
        matches!(kernel.scheduler().reap(a), Err(SchedulerError::NotTerminated(id)) if id == a),
        "a thread that has not run cannot be reaped"
    );

    kernel.run().expect("run should return");
    assert!(kernel.scheduler().thread_count() == 3, "terminated threads stay in the table");

    let reaped = kernel.scheduler().reap(a).expect("terminated thread should be reapable");
    assert!(reaped.id() == a, "reap should hand out the requested thread");
    assert!(reaped.name() == "a", "thread name should survive termination");
    drop(reaped);

    assert!(
        kernel.scheduler().reap_terminated() == 2,
        "remaining terminated threads should be reclaimed"
    );
    assert!(kernel.scheduler().thread_count() == 0, "table should be empty");
    assert!(
        matches!(kernel.scheduler().reap(a), Err(SchedulerError::UnknownThread(_))),
        "a reaped thread is unknown afterwards"
    );

    let stats = kernel.heap().check_integrity().expect("heap should stay consistent");
    assert!(
        stats.allocated_blocks == baseline + 1,
        "every thread stack except the idle one should be back in the heap"
    );
}

/// Contract: a stack that does not fit fails the spawn and queues nothing.
#[test]
fn test_spawn_fails_cleanly_when_stack_does_not_fit() {
    let config = KernelConfig::new()
        .with_idle_policy(IdlePolicy::ReturnToBootstrap)
        .with_stack_size(64 * 1024)
        .with_timer(false);
    let kernel = Kernel::new(HeapRegion::leaked(16 * 1024), config, Logger::disabled())
        .expect("kernel should boot");
    let kernel: &'static Kernel = Box::leak(Box::new(kernel));

    let result = kernel.spawn("too big", || {});
    assert!(
        matches!(
            result,
            Err(SpawnError::StackAllocation(HeapError::OutOfMemory { .. }))
        ),
        "a stack larger than the heap should fail with OutOfMemory"
    );
    assert!(kernel.scheduler().thread_count() == 0, "nothing should be queued");
    assert!(
        kernel.run() == Err(SchedulerError::IdleThreadMissing),
        "run should refuse to start without an idle stack"
    );
}

/// Contract: a thread is prepared fresh and consumed by its only run.
/// Given: A thread built directly on the kernel heap with a 16 KiB stack.
/// When: It is inspected, handed to the scheduler, run and reaped.
/// Then: Its saved stack pointer starts inside its stack, the body is pending
/// until the first activation and gone once the thread terminated.
#[test]
fn test_thread_is_fresh_until_first_run() {
    let kernel = boot_kernel();
    assert!(
        kernel.scheduler().idle_policy() == IdlePolicy::ReturnToBootstrap,
        "the scheduler should use the configured idle policy"
    );

    let thread = Thread::new(
        kernel.heap(),
        "fresh",
        16 * 1024,
        Box::new(|| {}),
        Logger::disabled(),
    )
    .expect("thread should fit into the heap");

    let base = thread.stack_base() as u64;
    let sp = thread.saved_registers().stack_pointer();
    assert!(thread.is_fresh(), "the body should not have run yet");
    assert!(thread.stack_size() == 16 * 1024, "the requested stack size is kept");
    assert!(
        sp > base && sp < base + thread.stack_size() as u64,
        "the first activation should start inside the thread's stack"
    );

    let id = kernel.scheduler().spawn(thread);
    kernel.run().expect("run should return");

    let thread = kernel.scheduler().reap(id).expect("thread should be terminated");
    assert!(thread.name() == "fresh", "the name survives until reaping");
    assert!(!thread.is_fresh(), "the body should have been taken by its run");
}
