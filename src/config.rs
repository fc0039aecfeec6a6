//! # Port Configuration
//!
//! Compile-time constants for the Tuman32 port: clock and tick rates, stack
//! sizing, and the one table of hardware register addresses. Nothing else in
//! the crate spells out a physical address.

use crate::frame::FRAME_WORDS;

/// Core clock feeding the free-running timer counter, in Hz.
pub const CPU_CLOCK_HZ: u32 = 50_000_000;

/// Scheduler tick frequency in Hz.
pub const TICK_RATE_HZ: u32 = 1000;

/// Counter increments between two tick interrupts.
pub const TICKS_PER_INTERVAL: u32 = ticks_per_interval(CPU_CLOCK_HZ, TICK_RATE_HZ);

const _: () = assert!(TICKS_PER_INTERVAL > 0, "tick rate must not exceed the clock rate");

/// Counter increments per tick for the given clock and tick rates.
pub const fn ticks_per_interval(clock_hz: u32, tick_hz: u32) -> u32 {
    clock_hz / tick_hz
}

/// Default per-task stack size in words. Must hold the initial register
/// frame plus the deepest call chain of the task.
pub const TASK_STACK_WORDS: usize = 256;

const _: () = assert!(TASK_STACK_WORDS >= FRAME_WORDS);

// ---------------------------------------------------------------------------
// Register address table
// ---------------------------------------------------------------------------

/// Low word of the board's free-running timer counter.
pub const TIMER_COUNTER_ADDR: usize = 0x1100_0000;

/// Low word of the board's timer compare register. The timer interrupt is
/// raised while `counter >= compare`.
pub const TIMER_COMPARE_ADDR: usize = 0x1100_0008;

/// Standard RISC-V `mtime`, for boards that carry a CLINT instead.
pub const MTIME_ADDR: usize = 0x0200_BFF8;

/// Standard RISC-V `mtimecmp` for hart 0.
pub const MTIMECMP_ADDR: usize = 0x0200_4000;

/// Switch-pending bit: SSIP in `sip`.
pub const SWITCH_PENDING_BIT: u32 = 1 << 1;
