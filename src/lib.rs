//! # Tuman32 Port
//!
//! Processor port of a preemptive real-time kernel for the Tuman32 core, a
//! 32-bit RISC-V register machine. The portable kernel (ready queues, task
//! control blocks, timing services) lives elsewhere; this crate is the part
//! that knows about registers:
//!
//! - what a task's saved context looks like on its stack,
//! - how a task that has never run gets a context that looks saved,
//! - how the very first task is entered with nothing to save,
//! - how a switch is requested, and how the tick timer is kept armed.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │           Portable kernel (scheduler, TCBs)             │
//! ├────────────────────────────────────────────────────────┤
//! │              Port API (port.rs)                         │
//! │  start_scheduler · stop_scheduler · service_switch      │
//! │  service_tick · first_dispatch                          │
//! ├──────────────┬──────────────┬──────────────┬───────────┤
//! │ Frame layout │ Frame builder│ Switch flag  │ Tick timer│
//! │ frame.rs     │ stack.rs     │ switch.rs    │ tick.rs   │
//! ├──────────────┴──────────────┴──────────────┴───────────┤
//! │  Registers (mmio.rs) · Current task (current.rs)        │
//! ├────────────────────────────────────────────────────────┤
//! │  Arch binding (arch/tuman32.rs): switch primitive,      │
//! │  first-task entry, SSIP, halt                           │
//! ├────────────────────────────────────────────────────────┤
//! │         Tuman32 hardware (RV32, machine mode)           │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Memory Model
//!
//! - **No heap**: task stacks are provided by the kernel or by [`TaskStack`]
//! - **Fixed frame**: [`frame::FRAME_WORDS`] words per saved context
//! - **Single hart**: concurrency is interrupt-driven only; shared state is
//!   touched inside [`sync::critical_section`]

#![no_std]

pub mod config;
pub mod error;
pub mod mmio;
pub mod frame;
pub mod stack;
pub mod switch;
pub mod tick;
pub mod current;
pub mod port;
pub mod arch;
pub mod sync;

pub use current::CurrentTask;
pub use error::{FrameError, HaltReason};
pub use frame::{RegisterFrame, Slot, StackWord};
pub use port::{
    first_dispatch, service_switch, service_tick, start_scheduler, stop_scheduler, Cpu, Dispatch,
    Scheduler,
};
pub use stack::{build_initial_frame, init_frame, TaskEntry, TaskStack};
pub use switch::{request_context_switch, MmioPendFlag, PendFlag};
pub use tick::{Clint64, Comparator32, Rearm, TickSource};
