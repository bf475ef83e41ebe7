//! Saved register records and the context switch primitive.
//!
//! This is the only place that knows which registers make up a thread's
//! continuation. Everything above it deals in opaque [`ThreadRegisters`]
//! records and two operations:
//!
//! - [`prepare_initial_frame`] builds a record whose first activation
//!   "returns" into a bootstrap shim, which calls `entry(arg)` with a poisoned
//!   return address.
//! - [`switch`] saves the callee-saved registers of the caller into one record
//!   and resumes the continuation stored in another.
//!
//! Only callee-saved state is captured. Caller-saved registers are already
//! spilled by the compiler around the `extern "C"` call, so a switch never
//! allocates and never touches the heap.

use core::mem::{offset_of, size_of};

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("context switching is implemented for x86_64 and aarch64 only");

#[cfg(all(target_arch = "x86_64", windows))]
compile_error!("the x86_64 context switch follows the System V ABI");

/// Entry point of a fresh thread. Receives the opaque argument given to
/// [`prepare_initial_frame`] and must never return.
pub type ThreadEntry = extern "C" fn(arg: usize) -> !;

/// Required alignment of a thread's initial stack pointer.
pub const STACK_ALIGNMENT: usize = 16;

/// Bytes of a fresh stack consumed by the initial frame.
pub const INITIAL_FRAME_SIZE: usize = 2 * size_of::<u64>();

/// Callee-saved register state of a suspended x86_64 (System V) thread.
///
/// Layout contract (offsets are used by `switch_context`):
///
/// | Offset | Field    |
/// |--------|----------|
/// | 0x00   | `rsp`    |
/// | 0x08   | `rbx`    |
/// | 0x10   | `rbp`    |
/// | 0x18   | `r12`    |
/// | 0x20   | `r13`    |
/// | 0x28   | `r14`    |
/// | 0x30   | `r15`    |
/// | 0x38   | `rflags` |
#[cfg(target_arch = "x86_64")]
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadRegisters {
    pub rsp: u64,
    pub rbx: u64,
    pub rbp: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rflags: u64,
}

#[cfg(target_arch = "x86_64")]
const _: () = {
    assert!(offset_of!(ThreadRegisters, rsp) == 0x00);
    assert!(offset_of!(ThreadRegisters, rbx) == 0x08);
    assert!(offset_of!(ThreadRegisters, rbp) == 0x10);
    assert!(offset_of!(ThreadRegisters, r12) == 0x18);
    assert!(offset_of!(ThreadRegisters, r13) == 0x20);
    assert!(offset_of!(ThreadRegisters, r14) == 0x28);
    assert!(offset_of!(ThreadRegisters, r15) == 0x30);
    assert!(offset_of!(ThreadRegisters, rflags) == 0x38);
    assert!(size_of::<ThreadRegisters>() == 0x40);
};

/// RFLAGS bit 1: reserved, always set.
#[cfg(target_arch = "x86_64")]
const RFLAGS_RESERVED: u64 = 1 << 1;

/// Fresh threads start with interrupts masked; the trampoline enables them
/// once it runs on its own stack.
#[cfg(target_arch = "x86_64")]
pub const INITIAL_RFLAGS: u64 = RFLAGS_RESERVED;

/// Callee-saved register state of a suspended AArch64 (AAPCS64) thread.
///
/// Layout contract (offsets are used by `switch_context`): `sp` at 0x00,
/// `x19..=x30` from 0x08 to 0x60, `d8..=d15` from 0x68 to 0xA0.
#[cfg(target_arch = "aarch64")]
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadRegisters {
    pub sp: u64,
    pub x19: u64,
    pub x20: u64,
    pub x21: u64,
    pub x22: u64,
    pub x23: u64,
    pub x24: u64,
    pub x25: u64,
    pub x26: u64,
    pub x27: u64,
    pub x28: u64,
    /// Frame pointer.
    pub x29: u64,
    /// Link register; the resume address.
    pub x30: u64,
    pub d8: u64,
    pub d9: u64,
    pub d10: u64,
    pub d11: u64,
    pub d12: u64,
    pub d13: u64,
    pub d14: u64,
    pub d15: u64,
}

#[cfg(target_arch = "aarch64")]
const _: () = {
    assert!(offset_of!(ThreadRegisters, sp) == 0x00);
    assert!(offset_of!(ThreadRegisters, x19) == 0x08);
    assert!(offset_of!(ThreadRegisters, x29) == 0x58);
    assert!(offset_of!(ThreadRegisters, x30) == 0x60);
    assert!(offset_of!(ThreadRegisters, d8) == 0x68);
    assert!(offset_of!(ThreadRegisters, d15) == 0xA0);
    assert!(size_of::<ThreadRegisters>() == 0xA8);
};

impl ThreadRegisters {
    /// Saved stack pointer of the suspended continuation.
    pub fn stack_pointer(&self) -> u64 {
        #[cfg(target_arch = "x86_64")]
        {
            self.rsp
        }
        #[cfg(target_arch = "aarch64")]
        {
            self.sp
        }
    }
}

#[inline]
const fn align_down(value: usize, align: usize) -> usize {
    value & !(align - 1)
}

/// Landing address for a thread entry that returns despite its `-> !` type.
///
/// Reaching it means the continuation is unrecoverable, so the CPU is parked.
pub extern "C" fn thread_return_trap() -> ! {
    crate::arch::interrupts::halt_forever()
}

/// Builds the initial register record for a thread that owns
/// `stack_base..stack_base + stack_size`.
///
/// The first [`switch`] to the returned record runs `entry(arg)` on that
/// stack with [`thread_return_trap`] as its return address.
///
/// # Safety
/// - `stack_base..stack_base + stack_size` must be writable memory exclusively
///   owned by the new thread for as long as the record may be switched to.
/// - `stack_size` must be at least [`INITIAL_FRAME_SIZE`] plus alignment slack.
pub unsafe fn prepare_initial_frame(
    stack_base: *mut u8,
    stack_size: usize,
    entry: ThreadEntry,
    arg: usize,
) -> ThreadRegisters {
    let top = align_down(stack_base as usize + stack_size, STACK_ALIGNMENT);
    debug_assert!(top - INITIAL_FRAME_SIZE >= stack_base as usize);

    #[cfg(target_arch = "x86_64")]
    {
        let return_slot = (top - 8) as *mut u64;
        let resume_slot = (top - 16) as *mut u64;
        // SAFETY:
        // - Both slots lie inside the caller-provided stack (see `# Safety`).
        // - `top` is 16-byte aligned, so both slots are 8-byte aligned.
        // - After `ret` pops `resume_slot`, `rsp == top - 8`, which is the
        //   alignment a System V callee expects on entry.
        unsafe {
            return_slot.write(thread_return_trap as usize as u64);
            resume_slot.write(thread_bootstrap as usize as u64);
        }

        ThreadRegisters {
            rsp: resume_slot as u64,
            r12: arg as u64,
            r13: entry as usize as u64,
            rflags: INITIAL_RFLAGS,
            ..ThreadRegisters::default()
        }
    }

    #[cfg(target_arch = "aarch64")]
    {
        ThreadRegisters {
            sp: top as u64,
            x19: arg as u64,
            x20: thread_return_trap as usize as u64,
            x21: entry as usize as u64,
            x30: thread_bootstrap as usize as u64,
            ..ThreadRegisters::default()
        }
    }
}

/// Saves the caller's continuation into `from` and resumes `to`.
///
/// Returns when some other context later switches back to `from`.
///
/// # Safety
/// - `from` must be valid for writes and `to` must hold a continuation built
///   by [`prepare_initial_frame`] or saved by an earlier `switch`.
/// - The stack `to` refers to must still be alive.
/// - Neither record may be accessed by anyone else until the switch is done;
///   callers mask interrupts around it.
#[inline]
pub unsafe fn switch(from: *mut ThreadRegisters, to: *const ThreadRegisters) {
    // SAFETY:
    // - Forwarded contract, see `# Safety`.
    unsafe { switch_context(from, to) }
}

#[cfg(target_arch = "x86_64")]
#[unsafe(naked)]
unsafe extern "C" fn switch_context(_from: *mut ThreadRegisters, _to: *const ThreadRegisters) {
    core::arch::naked_asm!(
        // rdi = from, rsi = to. [rsp] is our return address.
        "mov [rdi + 0x00], rsp",
        "mov [rdi + 0x08], rbx",
        "mov [rdi + 0x10], rbp",
        "mov [rdi + 0x18], r12",
        "mov [rdi + 0x20], r13",
        "mov [rdi + 0x28], r14",
        "mov [rdi + 0x30], r15",
        "pushfq",
        "pop qword ptr [rdi + 0x38]",
        "mov rsp, [rsi + 0x00]",
        "mov rbx, [rsi + 0x08]",
        "mov rbp, [rsi + 0x10]",
        "mov r12, [rsi + 0x18]",
        "mov r13, [rsi + 0x20]",
        "mov r14, [rsi + 0x28]",
        "mov r15, [rsi + 0x30]",
        "push qword ptr [rsi + 0x38]",
        "popfq",
        "ret",
    );
}

/// First code a fresh x86_64 thread executes: `entry(arg)` with the trap
/// address left on the stack as return address.
#[cfg(target_arch = "x86_64")]
#[unsafe(naked)]
unsafe extern "C" fn thread_bootstrap() {
    core::arch::naked_asm!("mov rdi, r12", "jmp r13");
}

#[cfg(target_arch = "aarch64")]
#[unsafe(naked)]
unsafe extern "C" fn switch_context(_from: *mut ThreadRegisters, _to: *const ThreadRegisters) {
    core::arch::naked_asm!(
        // x0 = from, x1 = to. x30 holds our return address.
        "mov x9, sp",
        "str x9, [x0, #0x00]",
        "stp x19, x20, [x0, #0x08]",
        "stp x21, x22, [x0, #0x18]",
        "stp x23, x24, [x0, #0x28]",
        "stp x25, x26, [x0, #0x38]",
        "stp x27, x28, [x0, #0x48]",
        "stp x29, x30, [x0, #0x58]",
        "stp d8, d9, [x0, #0x68]",
        "stp d10, d11, [x0, #0x78]",
        "stp d12, d13, [x0, #0x88]",
        "stp d14, d15, [x0, #0x98]",
        "ldr x9, [x1, #0x00]",
        "mov sp, x9",
        "ldp x19, x20, [x1, #0x08]",
        "ldp x21, x22, [x1, #0x18]",
        "ldp x23, x24, [x1, #0x28]",
        "ldp x25, x26, [x1, #0x38]",
        "ldp x27, x28, [x1, #0x48]",
        "ldp x29, x30, [x1, #0x58]",
        "ldp d8, d9, [x1, #0x68]",
        "ldp d10, d11, [x1, #0x78]",
        "ldp d12, d13, [x1, #0x88]",
        "ldp d14, d15, [x1, #0x98]",
        "ret",
    );
}

/// First code a fresh AArch64 thread executes: `entry(arg)` with the trap
/// address in the link register.
#[cfg(target_arch = "aarch64")]
#[unsafe(naked)]
unsafe extern "C" fn thread_bootstrap() {
    core::arch::naked_asm!("mov x0, x19", "mov x30, x20", "br x21");
}
