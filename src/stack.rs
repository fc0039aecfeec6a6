//! # Stack Frame Builder
//!
//! Lays out the register frame of a task that has never run, so that the
//! switch primitive (or the first-dispatch bootstrap) cannot tell it apart
//! from a task that was preempted right before its first instruction.
//!
//! ## Initial frame (top = high address, growing down)
//!
//! ```text
//! stack_top ->               (not written)
//!   arg     argument
//!   pc      entry           <- read by the bootstrap (ENTRY_SLOT)
//!   x31..x11  0
//!   x10 a0  argument
//!   x9..x3  0
//!   x2  sp  stack_top
//!   x1  ra  entry
//!   x0      0               <- returned top of stack
//! ```

use core::mem::align_of;
use core::ptr;

use log::trace;

use crate::config::TASK_STACK_WORDS;
use crate::error::FrameError;
use crate::frame::{RegisterFrame, Slot, StackWord, FRAME_WORDS};

/// Task entry point. Tasks receive their argument in `a0` and never return.
pub type TaskEntry = extern "C" fn(usize) -> !;

/// Build the initial register frame below `stack_top` and return the new top
/// of stack, which the scheduler stores for the task.
///
/// `stack_top` is the address just past the highest word of the region;
/// nothing at or above it is written. Only the `FRAME_WORDS` words below it
/// are touched.
///
/// # Safety
/// The `FRAME_WORDS` words below `stack_top` must be valid for writes and
/// owned by the caller, and `stack_top` must be word-aligned. A region that
/// is too small is undefined behaviour; use [`init_frame`] to have it checked.
///
/// `entry` must never return. A task entered through the restore path starts
/// with `ra == entry`, so a returning entry runs again with its own return
/// value in `a0` instead of reaching the task-returned halt. [`TaskStack::init`]
/// enforces this through [`TaskEntry`].
pub unsafe fn build_initial_frame(
    stack_top: *mut StackWord,
    entry: StackWord,
    argument: StackWord,
) -> *mut StackWord {
    debug_assert!(stack_top as usize % align_of::<StackWord>() == 0);

    let mut frame = RegisterFrame::zeroed();
    frame[Slot::Argument] = argument;
    frame[Slot::Pc] = entry;
    frame[Slot::Ra] = entry;
    frame[Slot::Sp] = stack_top as StackWord;
    frame[Slot::A0] = argument;

    let top = stack_top.sub(FRAME_WORDS);
    ptr::write(top as *mut RegisterFrame, frame);

    trace!(
        "initial frame at {:#x}: entry {:#x}, argument {:#x}",
        top as usize,
        entry,
        argument
    );
    top
}

/// Checked variant of [`build_initial_frame`] for a stack given as a slice.
/// The frame is placed at the high end of `stack`. `entry` must never return,
/// as for the unchecked builder.
pub fn init_frame(
    stack: &mut [StackWord],
    entry: StackWord,
    argument: StackWord,
) -> Result<*mut StackWord, FrameError> {
    if stack.len() < FRAME_WORDS {
        return Err(FrameError::StackTooSmall {
            needed: FRAME_WORDS,
            available: stack.len(),
        });
    }
    let stack_top = stack.as_mut_ptr_range().end;
    // Safety: the slice is exclusively borrowed and holds at least one frame.
    Ok(unsafe { build_initial_frame(stack_top, entry, argument) })
}

// ---------------------------------------------------------------------------
// Statically sized task stacks
// ---------------------------------------------------------------------------

/// Stack storage for one task, aligned to 16 bytes as the RISC-V psABI
/// requires of `sp`.
#[repr(C, align(16))]
pub struct TaskStack<const WORDS: usize = TASK_STACK_WORDS> {
    words: [StackWord; WORDS],
}

impl<const WORDS: usize> TaskStack<WORDS> {
    const FITS_FRAME: () = assert!(WORDS >= FRAME_WORDS, "task stack smaller than a register frame");

    pub const fn new() -> Self {
        Self { words: [0; WORDS] }
    }

    /// Address just past the highest word.
    #[inline]
    pub fn top(&mut self) -> *mut StackWord {
        self.words.as_mut_ptr_range().end
    }

    /// Build the initial frame for `entry` and return the task's top of stack.
    pub fn init(&mut self, entry: TaskEntry, argument: usize) -> *mut StackWord {
        #[allow(clippy::let_unit_value)]
        let () = Self::FITS_FRAME;
        // Safety: `words` is exclusively borrowed and large enough.
        unsafe { build_initial_frame(self.top(), entry as usize, argument) }
    }
}

impl<const WORDS: usize> Default for TaskStack<WORDS> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
