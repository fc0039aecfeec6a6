//! # Synchronization Primitives
//!
//! Interrupt-safe critical sections. Shared port state (the tick comparator,
//! the registered scheduler) is only touched inside one.
//!
//! On the target the `critical-section` implementation comes from the
//! `riscv` crate (single hart: clear and restore `mstatus.MIE`). Host tests
//! use the `std` implementation.

pub use critical_section::{CriticalSection, Mutex};

/// Execute a closure within a critical section (interrupts disabled).
///
/// Critical sections nest: the interrupt state on entry is restored on exit,
/// so calling this from a trap handler, where interrupts are already off,
/// leaves them off.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(CriticalSection<'_>) -> R,
{
    critical_section::with(f)
}
