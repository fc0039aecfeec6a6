//! # Switch-Request Trigger
//!
//! A context switch is never performed inline. Code that wants one asserts
//! the switch-pending flag; the trap layer notices the pending software
//! interrupt at the next safe point, clears the flag and runs the switch
//! primitive.
//!
//! The flag is a single hardware bit, so requests are idempotent: asserting it
//! while it is already set changes nothing, and there is no way to withdraw a
//! request once made.

use log::trace;

use crate::mmio::Reg;

/// The switch-pending flag.
///
/// Requesters only ever call [`PendFlag::set`]; the interrupt-servicing path
/// is the only caller of [`PendFlag::clear`].
pub trait PendFlag {
    /// Assert a pending software interrupt.
    fn set(&self);
    /// Whether a switch is pending.
    fn is_set(&self) -> bool;
    /// Acknowledge the pending switch.
    fn clear(&self);

    /// Clear the flag if it was set, reporting whether it was.
    fn take(&self) -> bool {
        let pending = self.is_set();
        if pending {
            self.clear();
        }
        pending
    }
}

/// Request a context switch at the next safe point.
#[inline]
pub fn request_context_switch<F: PendFlag + ?Sized>(flag: &F) {
    trace!("context switch requested");
    flag.set();
}

/// Switch-pending bit in a readable memory-mapped latch.
///
/// Requesting writes the mask alone. The register must read back the latched
/// bit, and acknowledging clears it with a read-modify-write that keeps every
/// other bit. Host tests use it over an ordinary word; on Tuman32 the flag
/// lives in `sip` instead.
#[derive(Clone, Copy)]
pub struct MmioPendFlag {
    reg: Reg<u32>,
    mask: u32,
}

impl MmioPendFlag {
    pub const fn new(reg: Reg<u32>, mask: u32) -> Self {
        Self { reg, mask }
    }
}

impl PendFlag for MmioPendFlag {
    #[inline]
    fn set(&self) {
        self.reg.write(self.mask);
    }

    #[inline]
    fn is_set(&self) -> bool {
        self.reg.read() & self.mask != 0
    }

    #[inline]
    fn clear(&self) {
        self.reg.modify(|v| v & !self.mask);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SWITCH_PENDING_BIT;

    #[test]
    fn test_repeated_requests_are_observed_once() {
        let mut word: u32 = 0;
        let flag = MmioPendFlag::new(unsafe { Reg::from_ptr(&mut word) }, SWITCH_PENDING_BIT);

        for n in 1..=5 {
            for _ in 0..n {
                request_context_switch(&flag);
            }
            let mut observed = 0;
            while flag.take() {
                observed += 1;
            }
            assert_eq!(observed, 1, "{} requests before servicing", n);
        }
    }

    #[test]
    fn test_set_writes_only_the_bit() {
        let mut word: u32 = 0;
        let reg = unsafe { Reg::from_ptr(&mut word) };
        let flag = MmioPendFlag::new(reg, SWITCH_PENDING_BIT);

        assert!(!flag.is_set());
        request_context_switch(&flag);
        assert_eq!(reg.read(), 0b10);
        assert!(flag.is_set());
        flag.clear();
        assert_eq!(reg.read(), 0);
    }

    #[test]
    fn test_clear_keeps_other_latched_bits() {
        let mut word: u32 = 0b1000_0001;
        let reg = unsafe { Reg::from_ptr(&mut word) };
        let flag = MmioPendFlag::new(reg, SWITCH_PENDING_BIT);

        request_context_switch(&flag);
        assert_eq!(reg.read(), SWITCH_PENDING_BIT);
        reg.write(0b1000_0011);
        assert!(flag.take());
        assert_eq!(reg.read(), 0b1000_0001);
        assert!(!flag.take());
    }
}
