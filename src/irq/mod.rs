//! Interrupt dispatch table.
//!
//! Maps vector numbers to at most one registered handler each. The low-level
//! entry stub (IDT gate, PIC acknowledge) belongs to the platform glue; it
//! calls [`crate::Kernel::handle_interrupt`] with the vector, which ends up in
//! [`InterruptDispatcher::dispatch`].

pub mod timer;

use alloc::sync::Arc;
use core::fmt;

use crate::kernel::Kernel;
use crate::logging::Logger;
use crate::sync::spinlock::SpinLock;

pub const VECTOR_COUNT: usize = 256;
pub const IRQ_BASE: usize = 32;
pub const TIMER_VECTOR: usize = IRQ_BASE;
pub const KEYBOARD_VECTOR: usize = IRQ_BASE + 1;

/// Capability invoked for a delivered interrupt.
///
/// Runs in interrupt context: handlers must be short and must not block.
/// A handler that wants a thread switch requests it (see
/// [`crate::scheduler::Scheduler::request_preemption`]) instead of switching.
pub trait InterruptHandler: Send + Sync {
    fn trigger(&self, kernel: &Kernel, vector: usize);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    /// Vector outside `0..VECTOR_COUNT`.
    InvalidVector(usize),
    /// No handler is registered for the vector.
    Unhandled(usize),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::InvalidVector(vector) => write!(f, "invalid interrupt vector {}", vector),
            DispatchError::Unhandled(vector) => write!(f, "no handler for vector {}", vector),
        }
    }
}

pub struct InterruptDispatcher {
    handlers: SpinLock<[Option<Arc<dyn InterruptHandler>>; VECTOR_COUNT]>,
    logger: Logger,
}

impl InterruptDispatcher {
    pub fn new(logger: Logger) -> Self {
        Self {
            handlers: SpinLock::new([const { None }; VECTOR_COUNT]),
            logger,
        }
    }

    /// Registers `handler` for `vector`, replacing any previous registration.
    pub fn register(
        &self,
        vector: usize,
        handler: Arc<dyn InterruptHandler>,
    ) -> Result<(), DispatchError> {
        if vector >= VECTOR_COUNT {
            self.logger.error(
                "irq",
                format_args!("[IRQ] register rejected vector={}", vector),
            );
            return Err(DispatchError::InvalidVector(vector));
        }

        let replaced = self.handlers.lock()[vector].replace(handler).is_some();
        self.logger.debug(
            "irq",
            format_args!("[IRQ] register vector={} replaced={}", vector, replaced),
        );
        Ok(())
    }

    /// Removes and returns the handler for `vector`.
    pub fn unregister(&self, vector: usize) -> Option<Arc<dyn InterruptHandler>> {
        if vector >= VECTOR_COUNT {
            return None;
        }
        self.handlers.lock()[vector].take()
    }

    pub fn is_registered(&self, vector: usize) -> bool {
        vector < VECTOR_COUNT && self.handlers.lock()[vector].is_some()
    }

    /// Invokes the handler registered for `vector`.
    ///
    /// Out-of-range and unregistered vectors are logged and reported, never
    /// fatal. The handler runs without the table lock held.
    pub fn dispatch(&self, kernel: &Kernel, vector: usize) -> Result<(), DispatchError> {
        if vector >= VECTOR_COUNT {
            self.logger.warn(
                "irq",
                format_args!("[IRQ] dispatch invalid vector={}", vector),
            );
            return Err(DispatchError::InvalidVector(vector));
        }

        let handler = self.handlers.lock()[vector].clone();
        match handler {
            Some(handler) => {
                handler.trigger(kernel, vector);
                Ok(())
            }
            None => {
                self.logger.warn(
                    "irq",
                    format_args!("[IRQ] unhandled vector={}", vector),
                );
                Err(DispatchError::Unhandled(vector))
            }
        }
    }
}
