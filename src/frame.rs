//! # Register Frame Layout
//!
//! The saved execution context of a task, exactly as it sits on the task's
//! stack. The switch primitive in `arch::tuman32` writes and reads this frame;
//! the stack frame builder fakes one for tasks that have never run.
//!
//! ## Layout (lowest address first, word offsets from the saved top of stack)
//!
//! ```text
//!  0  x0   zero; stored as 0, never restored
//!  1  x1   ra
//!  2  x2   sp above the frame; recomputed on restore, not loaded
//!  3  x3   gp
//!  .  ...
//! 31  x31  t6
//! 32  pc   resume address (mepc); the entry point on a fresh frame
//! 33  arg  task argument, written once by the builder
//! ```
//!
//! Slots are addressed through [`Slot`] so no code outside this module needs
//! to know a raw offset. [`save`] and [`restore`] describe, in Rust, what the
//! target switch primitive does with those slots; they are the reference the
//! assembly is checked against.

use core::mem::size_of;
use core::ops::{Index, IndexMut};

/// One stack slot: the width of a general-purpose register.
pub type StackWord = usize;

/// General-purpose registers in the RV32I register file, `x0` included.
pub const GPR_COUNT: usize = 32;

/// Words in one register frame: the 32 register slots, pc and argument.
pub const FRAME_WORDS: usize = GPR_COUNT + 2;

/// Bytes in one register frame.
pub const FRAME_BYTES: usize = FRAME_WORDS * size_of::<StackWord>();

/// Stack pointer alignment the psABI requires at every call.
pub const STACK_ALIGN: usize = 16;

/// Word offset of the entry-address slot from the saved top of stack. The
/// first-dispatch bootstrap reads the task's entry point from here.
pub const ENTRY_SLOT: usize = Slot::Pc as usize;

/// Symbolic index of a frame slot. Register slots use their ABI names and sit
/// at their architectural register number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Slot {
    Zero = 0,
    Ra = 1,
    Sp = 2,
    Gp = 3,
    Tp = 4,
    T0 = 5,
    T1 = 6,
    T2 = 7,
    S0 = 8,
    S1 = 9,
    A0 = 10,
    A1 = 11,
    A2 = 12,
    A3 = 13,
    A4 = 14,
    A5 = 15,
    A6 = 16,
    A7 = 17,
    S2 = 18,
    S3 = 19,
    S4 = 20,
    S5 = 21,
    S6 = 22,
    S7 = 23,
    S8 = 24,
    S9 = 25,
    S10 = 26,
    S11 = 27,
    T3 = 28,
    T4 = 29,
    T5 = 30,
    T6 = 31,
    /// Resume address.
    Pc = 32,
    /// Argument handed to the task on first execution.
    Argument = 33,
}

impl Slot {
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Byte offset of this slot from the saved top of stack.
    #[inline]
    pub const fn byte_offset(self) -> usize {
        self.index() * size_of::<StackWord>()
    }

    /// Whether the restore half of the switch primitive loads this slot into
    /// a register. `x0` is hard-wired, `sp` is recomputed, and the argument
    /// slot is only ever read by the bootstrap.
    pub const fn is_restored(self) -> bool {
        !matches!(self, Slot::Zero | Slot::Sp | Slot::Argument)
    }
}

/// A saved execution context.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterFrame {
    words: [StackWord; FRAME_WORDS],
}

const _: () = assert!(size_of::<RegisterFrame>() == FRAME_BYTES);
const _: () = assert!(Slot::T6.index() == GPR_COUNT - 1);
const _: () = assert!(Slot::Argument.index() == FRAME_WORDS - 1);

impl RegisterFrame {
    pub const fn zeroed() -> Self {
        Self {
            words: [0; FRAME_WORDS],
        }
    }

    /// View the frame that starts at a saved top of stack.
    ///
    /// # Safety
    /// `top` must point at `FRAME_WORDS` initialised, word-aligned words that
    /// nothing else mutates for `'a`.
    pub unsafe fn from_top<'a>(top: *const StackWord) -> &'a RegisterFrame {
        &*(top as *const RegisterFrame)
    }

    /// Mutable view of the frame that starts at `top`.
    ///
    /// # Safety
    /// `top` must point at `FRAME_WORDS` word-aligned words exclusively owned
    /// by the caller for `'a`.
    pub unsafe fn from_top_mut<'a>(top: *mut StackWord) -> &'a mut RegisterFrame {
        &mut *(top as *mut RegisterFrame)
    }

    /// Address the task resumes at.
    #[inline]
    pub fn entry(&self) -> StackWord {
        self[Slot::Pc]
    }

    #[inline]
    pub fn argument(&self) -> StackWord {
        self[Slot::Argument]
    }

    #[inline]
    pub fn as_words(&self) -> &[StackWord; FRAME_WORDS] {
        &self.words
    }
}

impl Default for RegisterFrame {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl Index<Slot> for RegisterFrame {
    type Output = StackWord;

    #[inline]
    fn index(&self, slot: Slot) -> &StackWord {
        &self.words[slot.index()]
    }
}

impl IndexMut<Slot> for RegisterFrame {
    #[inline]
    fn index_mut(&mut self, slot: Slot) -> &mut StackWord {
        &mut self.words[slot.index()]
    }
}

// ---------------------------------------------------------------------------
// Switch primitive model
// ---------------------------------------------------------------------------

/// Architectural state visible to a task: the register file and the pc.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuState {
    pub x: [StackWord; GPR_COUNT],
    pub pc: StackWord,
}

impl CpuState {
    pub const fn new() -> Self {
        Self {
            x: [0; GPR_COUNT],
            pc: 0,
        }
    }

    /// Value of the register that lives in `slot`. Panics for the pc and
    /// argument slots, which are not registers.
    pub fn reg(&self, slot: Slot) -> StackWord {
        self.x[slot.index()]
    }
}

impl Default for CpuState {
    fn default() -> Self {
        Self::new()
    }
}

/// Save half of the switch primitive.
///
/// `state.x[2]` is the stack pointer at the moment of interruption, which is
/// the address right above the frame. The argument slot is left untouched.
pub fn save(state: &CpuState, frame: &mut RegisterFrame) {
    frame[Slot::Zero] = 0;
    frame.words[1..GPR_COUNT].copy_from_slice(&state.x[1..GPR_COUNT]);
    frame[Slot::Pc] = state.pc;
}

/// Stack pointer the switch hook runs on, for the frame saved at `top`.
///
/// The frame size is not a multiple of [`STACK_ALIGN`], so the primitive
/// rounds `sp` down below the frame before calling into Rust. The frame
/// itself stays where it was saved; `top` is reloaded after the call.
pub const fn hook_stack_pointer(top: StackWord) -> StackWord {
    top & !(STACK_ALIGN - 1)
}

/// Restore half of the switch primitive, for the frame saved at `top`.
///
/// Loads every restored slot, pops the frame (so `sp = top + FRAME_BYTES`)
/// and resumes at the saved pc.
pub fn restore(frame: &RegisterFrame, top: StackWord) -> CpuState {
    let mut state = CpuState::new();
    for n in 1..GPR_COUNT {
        state.x[n] = frame.words[n];
    }
    state.x[Slot::Zero.index()] = 0;
    state.x[Slot::Sp.index()] = top + FRAME_BYTES;
    state.pc = frame[Slot::Pc];
    state
}
