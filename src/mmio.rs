//! # Memory-Mapped Registers
//!
//! Typed accessor for a single device register. Every hardware address the
//! port touches is wrapped in a [`Reg`] built from the table in
//! [`crate::config`], so reads and writes always go through volatile access.

use core::marker::PhantomData;
use core::ptr::{read_volatile, write_volatile};

/// One memory-mapped register of width `T`.
///
/// Reads and writes are volatile and never elided or merged. The register is
/// identified purely by address; copies refer to the same hardware.
pub struct Reg<T: Copy> {
    addr: usize,
    _width: PhantomData<T>,
}

impl<T: Copy> Clone for Reg<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Copy> Copy for Reg<T> {}

// Safety: a `Reg` is an address, not a borrow. Concurrent access to the
// underlying register is governed by the interrupt discipline of its users.
unsafe impl<T: Copy> Send for Reg<T> {}
unsafe impl<T: Copy> Sync for Reg<T> {}

impl<T: Copy> Reg<T> {
    /// Wrap the register at `addr`.
    ///
    /// # Safety
    /// `addr` must be a valid, suitably aligned location of type `T` for as
    /// long as the returned value (or any copy of it) is used.
    pub const unsafe fn new(addr: usize) -> Self {
        Self {
            addr,
            _width: PhantomData,
        }
    }

    /// Wrap a location in ordinary memory. Used by host-side fakes.
    ///
    /// # Safety
    /// Same contract as [`Reg::new`].
    pub unsafe fn from_ptr(ptr: *mut T) -> Self {
        Self::new(ptr as usize)
    }

    #[inline]
    pub fn read(&self) -> T {
        unsafe { read_volatile(self.addr as *const T) }
    }

    #[inline]
    pub fn write(&self, value: T) {
        unsafe { write_volatile(self.addr as *mut T, value) }
    }

    /// Read, transform and write back. Not atomic: callers that race with an
    /// interrupt must hold a critical section.
    #[inline]
    pub fn modify<F: FnOnce(T) -> T>(&self, f: F) {
        self.write(f(self.read()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_modify() {
        let mut word: u32 = 0x10;
        let reg = unsafe { Reg::from_ptr(&mut word as *mut u32) };

        assert_eq!(reg.read(), 0x10);
        reg.write(0xAB);
        assert_eq!(reg.read(), 0xAB);
        reg.modify(|v| v | 0x100);
        assert_eq!(reg.read(), 0x1AB);

        let copy = reg;
        copy.write(7);
        assert_eq!(reg.read(), 7);
        assert_eq!(word, 7);
    }
}
