//! CPU interrupt-enable flag and halt.
//!
//! On bare-metal x86_64 these are the real `sti`/`cli`/`hlt` instructions.
//! Hosted builds cannot execute them in user mode, so the flag is simulated
//! per OS thread: every green thread of one scheduler runs on the same OS
//! thread, which is exactly the single CPU the core assumes.

#[cfg(all(target_os = "none", not(target_arch = "x86_64")))]
compile_error!("bare-metal builds of kaos_core support x86_64 only");

#[cfg(all(target_os = "none", target_arch = "x86_64"))]
mod imp {
    use x86_64::instructions::interrupts as cpu;

    #[inline]
    pub fn enable() {
        cpu::enable();
    }

    #[inline]
    pub fn disable() {
        cpu::disable();
    }

    #[inline]
    pub fn are_enabled() -> bool {
        cpu::are_enabled()
    }

    #[inline]
    pub fn halt() {
        x86_64::instructions::hlt();
    }
}

#[cfg(not(target_os = "none"))]
mod imp {
    use core::cell::Cell;

    std::thread_local! {
        // Boot state: interrupts stay masked until the bootstrap enables them.
        static INTERRUPTS_ENABLED: Cell<bool> = const { Cell::new(false) };
    }

    #[inline]
    pub fn enable() {
        INTERRUPTS_ENABLED.with(|flag| flag.set(true));
    }

    #[inline]
    pub fn disable() {
        INTERRUPTS_ENABLED.with(|flag| flag.set(false));
    }

    #[inline]
    pub fn are_enabled() -> bool {
        INTERRUPTS_ENABLED.with(|flag| flag.get())
    }

    #[inline]
    pub fn halt() {
        core::hint::spin_loop();
    }
}

/// Enable interrupts globally.
#[inline]
pub fn enable() {
    imp::enable();
}

/// Disable interrupts globally.
#[inline]
pub fn disable() {
    imp::disable();
}

/// Returns whether interrupts are currently enabled (IF flag set).
#[inline]
pub fn are_enabled() -> bool {
    imp::are_enabled()
}

/// Waits for the next interrupt.
///
/// Returns immediately on hosted builds.
#[inline]
pub fn halt() {
    imp::halt();
}

/// Runs `f` with interrupts masked and restores the previous state afterwards.
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    let were_enabled = are_enabled();
    disable();
    let result = f();
    if were_enabled {
        enable();
    }
    result
}

/// Halts forever with interrupts masked.
pub fn halt_forever() -> ! {
    disable();
    loop {
        halt();
    }
}
