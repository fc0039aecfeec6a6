//! # Current Task Slot
//!
//! The saved top of stack of whichever task owns the processor. The trap
//! layer needs it on every switch: it stores the outgoing task's top here
//! right after saving the frame, and loads the incoming task's top from here
//! right before restoring. Keeping it in one place avoids a call into the
//! scheduler on the hot path.
//!
//! ## Access discipline
//!
//! - The trap layer writes it once per switch ([`CurrentTask::save`]), with
//!   interrupts disabled, before handing control to the switch hook.
//! - The switch hook writes it once per switch ([`CurrentTask::publish`])
//!   with the top chosen by the scheduler.
//! - Everything else only reads it.
//!
//! Both writes happen inside the same trap, so there is never more than one
//! writer at a time.

use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::frame::StackWord;

/// Top of stack of the running task.
///
/// `#[repr(transparent)]` so the switch primitive can address it as a plain
/// word through its symbol.
#[repr(transparent)]
pub struct CurrentTask {
    top: AtomicPtr<StackWord>,
}

impl CurrentTask {
    pub const fn new() -> Self {
        Self {
            top: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Saved top of stack of the running task; null before the first dispatch.
    #[inline]
    pub fn top(&self) -> *mut StackWord {
        self.top.load(Ordering::Acquire)
    }

    /// Record where the trap layer saved the outgoing task's frame.
    #[inline]
    pub fn save(&self, top: *mut StackWord) {
        self.top.store(top, Ordering::Release);
    }

    /// Make `top` the context the trap layer restores next.
    #[inline]
    pub fn publish(&self, top: *mut StackWord) {
        self.top.store(top, Ordering::Release);
    }
}

impl Default for CurrentTask {
    fn default() -> Self {
        Self::new()
    }
}
