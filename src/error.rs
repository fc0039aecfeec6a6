//! # Errors and Halt Reasons
//!
//! The port has one recoverable error (a stack region that cannot hold a
//! register frame) and a handful of fatal conditions. Fatal conditions are
//! never returned; they are handed to `Cpu::halt` which parks the processor.

use core::fmt;

/// A stack region rejected by the checked frame builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// The region holds fewer words than one register frame.
    StackTooSmall { needed: usize, available: usize },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::StackTooSmall { needed, available } => write!(
                f,
                "stack too small for register frame: need {} words, have {}",
                needed, available
            ),
        }
    }
}

/// Why the processor was parked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum HaltReason {
    /// A task entry function returned.
    TaskReturned = 1,
    /// The first-dispatch control transfer came back to the kernel.
    DispatchReturned = 2,
    /// `stop_scheduler` was called. There is no graceful shutdown.
    Stopped = 3,
    /// The scheduler was started before one was registered.
    NoScheduler = 4,
    /// The trap vector is not in direct mode.
    VectorMode = 5,
    /// A trap the board's dispatcher has no handler for.
    UnexpectedTrap = 6,
}

impl HaltReason {
    /// Code stored for the debugger when the processor halts.
    #[inline]
    pub const fn code(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            HaltReason::TaskReturned => "task returned from its entry function",
            HaltReason::DispatchReturned => "first dispatch returned to the kernel",
            HaltReason::Stopped => "scheduler stopped",
            HaltReason::NoScheduler => "no scheduler registered",
            HaltReason::VectorMode => "trap vector not in direct mode",
            HaltReason::UnexpectedTrap => "unexpected trap",
        };
        f.write_str(msg)
    }
}
