//! Timer Preemption Integration Tests
//!
//! The timer interrupt is simulated by calling `Kernel::handle_interrupt`
//! with the timer vector from inside a running thread, which is exactly what
//! the platform interrupt stub does on hardware.

use std::sync::Arc;

use kaos_core::irq::TIMER_VECTOR;
use kaos_core::logging::Logger;
use kaos_core::scheduler::IdlePolicy;
use kaos_core::sync::spinlock::SpinLock;
use kaos_core::{HeapRegion, Kernel, KernelConfig};

type Trace = Arc<SpinLock<Vec<String>>>;

fn boot_kernel(time_slice_ticks: u64) -> &'static Kernel {
    let config = KernelConfig::new()
        .with_idle_policy(IdlePolicy::ReturnToBootstrap)
        .with_stack_size(16 * 1024)
        .with_time_slice_ticks(time_slice_ticks);
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

/// Contract: a timer tick switches threads only at the end of interrupt handling.
#[test]
fn test_timer_tick_preempts_running_thread_at_safe_point() {
    let kernel = boot_kernel(1);
    let trace = new_trace();

    let t = trace.clone();
    kernel
        .spawn("busy", move || {
            record(&t, "busy before tick");
            let handled = kernel.handle_interrupt(TIMER_VECTOR);
            record(&t, format!("busy after tick {:?}", handled));
        })
        .expect("spawn should succeed");

    let t = trace.clone();
    kernel
        .spawn("other", move || record(&t, "other"))
        .expect("spawn should succeed");

    kernel.run().expect("run should return");

    assert!(
        snapshot(&trace) == ["busy before tick", "other", "busy after tick Ok(())"],
        "a timer tick should hand the CPU to the next ready thread"
    );
    assert!(kernel.ticks() == 1, "the tick should be counted");
}

/// Contract: preemption is requested once per time slice.
#[test]
fn test_time_slice_spans_several_ticks() {
    let kernel = boot_kernel(3);
    let trace = new_trace();

    let t = trace.clone();
    kernel
        .spawn("busy", move || {
            for tick in 1..=3 {
                let _ = kernel.handle_interrupt(TIMER_VECTOR);
                record(&t, format!("busy tick {}", tick));
            }
        })
        .expect("spawn should succeed");

    let t = trace.clone();
    kernel
        .spawn("other", move || record(&t, "other"))
        .expect("spawn should succeed");

    kernel.run().expect("run should return");

    assert!(
        snapshot(&trace) == ["busy tick 1", "busy tick 2", "other", "busy tick 3"],
        "preemption should only be requested once per time slice"
    );
    assert!(kernel.ticks() == 3, "every tick should be counted");
}

/// Contract: a request with no running thread is not recorded.
#[test]
fn test_request_outside_thread_is_not_pending() {
    let kernel = boot_kernel(1);

    kernel.scheduler().request_preemption();
    assert!(
        kernel.scheduler().pending_preemption() == 0,
        "with no running thread the marker must stay at zero"
    );
    assert!(
        !kernel.scheduler().preempt_if_requested(),
        "safe point without a request should not switch"
    );

    assert!(
        kernel.handle_interrupt(TIMER_VECTOR).is_ok(),
        "timer interrupt in the bootstrap context should be handled"
    );
    assert!(kernel.ticks() == 1, "the tick should still be counted");
}

/// Contract: a voluntary yield clears a pending request.
#[test]
fn test_voluntary_yield_consumes_pending_request() {
    let kernel = boot_kernel(1);
    let trace = new_trace();

    let t = trace.clone();
    kernel
        .spawn("requester", move || {
            kernel.scheduler().request_preemption();
            record(&t, format!("pending {}", kernel.scheduler().pending_preemption() != 0));
            kernel.scheduler().yield_now();
            record(&t, "requester resumed");
        })
        .expect("spawn should succeed");

    let t = trace.clone();
    kernel
        .spawn("observer", move || {
            let sched = kernel.scheduler();
            record(&t, format!("observer sees {}", sched.pending_preemption()));
            record(&t, format!("observer preempted {}", sched.preempt_if_requested()));
        })
        .expect("spawn should succeed");

    kernel.run().expect("run should return");

    assert!(
        snapshot(&trace)
            == [
                "pending true",
                "observer sees 0",
                "observer preempted false",
                "requester resumed",
            ],
        "a cooperative switch should clear the request of the thread it suspends"
    );
}

/// Contract: the safe point is a no-op without a request.
#[test]
fn test_safe_point_without_request_does_not_switch() {
    let kernel = boot_kernel(1);
    let trace = new_trace();

    let t = trace.clone();
    kernel
        .spawn("first", move || {
            let preempted = kernel.scheduler().preempt_if_requested();
            record(&t, format!("first preempted {}", preempted));
        })
        .expect("spawn should succeed");

    let t = trace.clone();
    kernel
        .spawn("second", move || record(&t, "second"))
        .expect("spawn should succeed");

    kernel.run().expect("run should return");

    assert!(
        snapshot(&trace) == ["first preempted false", "second"],
        "the safe point must not switch without a pending request"
    );
}

/// Contract: busy threads that never yield still share the CPU.
#[test]
fn test_preemption_round_robins_busy_threads() {
    let kernel = boot_kernel(1);
    let trace = new_trace();

    for name in ["a", "b", "c"] {
        let t = trace.clone();
        kernel
            .spawn(name, move || {
                for _ in 0..2 {
                    record(&t, name);
                    let _ = kernel.handle_interrupt(TIMER_VECTOR);
                }
            })
            .expect("spawn should succeed");
    }

    kernel.run().expect("run should return");

    assert!(
        snapshot(&trace) == ["a", "b", "c", "a", "b", "c"],
        "forced preemption should rotate through the ready queue"
    );
    assert!(kernel.ticks() == 6, "every tick should be counted");
}

/// Contract: an unhandled vector is reported and requests nothing.
#[test]
fn test_unhandled_vector_does_not_preempt() {
    let kernel = boot_kernel(1);
    let trace = new_trace();

    let t = trace.clone();
    kernel
        .spawn("first", move || {
            let result = kernel.handle_interrupt(77);
            record(&t, format!("first {:?}", result));
        })
        .expect("spawn should succeed");

    let t = trace.clone();
    kernel
        .spawn("second", move || record(&t, "second"))
        .expect("spawn should succeed");

    kernel.run().expect("run should return");

    assert!(
        snapshot(&trace) == ["first Err(Unhandled(77))", "second"],
        "an unregistered vector is reported and does not switch"
    );
    assert!(kernel.ticks() == 0, "no timer tick happened");
}
