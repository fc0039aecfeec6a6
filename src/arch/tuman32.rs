//! # Tuman32 Port Layer
//!
//! Target wiring for the Tuman32 core (RV32 with Zicsr, machine mode, a
//! single hart). Binds the generic port to this processor:
//!
//! - the switch-pending flag is SSIP in `sip`, raised by software;
//! - the tick comes from the board's 32-bit comparator ([`BoardTick`]);
//! - [`port_switch_trap`] is the one save/restore primitive for every path
//!   that switches tasks;
//! - faults halt with interrupts off, the reason left in `PORT_HALT_REASON`.
//!
//! ## Trap layer contract
//!
//! The trap dispatcher owns `mtvec` and decides what fired. It must:
//!
//! - jump (not call) to `port_switch_trap` on a supervisor software
//!   interrupt, with every register still holding the interrupted task's
//!   value;
//! - call `port_tick` on a machine timer interrupt.

use core::arch::{asm, global_asm};
use core::cell::RefCell;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::sync::{self, Mutex};
use log::error;
use riscv::register::mtvec::TrapMode;
use riscv::register::{mie, mtvec, sip};

use crate::config::SWITCH_PENDING_BIT;
use crate::current::CurrentTask;
use crate::error::HaltReason;
use crate::frame::{Slot, StackWord, FRAME_BYTES, STACK_ALIGN};
use crate::port::{self, Cpu, Dispatch, Scheduler};
use crate::switch::{self, PendFlag};
use crate::tick::{Comparator32, Rearm, TickSource};

/// Tick source used on this board.
pub type BoardTick = Comparator32;

// The switch primitive below hard-codes these.
const _: () = assert!(FRAME_BYTES == 136);
const _: () = assert!(Slot::Sp.byte_offset() == 8);
const _: () = assert!(Slot::Pc.byte_offset() == 128);
const _: () = assert!(STACK_ALIGN == 16);
const _: () = assert!(SWITCH_PENDING_BIT == 2);

// ---------------------------------------------------------------------------
// Port state
// ---------------------------------------------------------------------------

/// Top of stack of the running task, shared with the switch primitive.
#[no_mangle]
pub static PORT_CURRENT_TASK: CurrentTask = CurrentTask::new();

/// Last halt reason, for the debugger. Zero while running.
#[no_mangle]
pub static PORT_HALT_REASON: AtomicU32 = AtomicU32::new(0);

static SCHEDULER: Mutex<RefCell<Option<&'static mut (dyn Scheduler + Send)>>> =
    Mutex::new(RefCell::new(None));

static TICK: Mutex<RefCell<BoardTick>> = Mutex::new(RefCell::new(BoardTick::board()));

/// The switch-pending flag of this core.
pub static SWITCH_FLAG: SipPendFlag = SipPendFlag;

// ---------------------------------------------------------------------------
// Switch-pending flag
// ---------------------------------------------------------------------------

/// SSIP in `sip`.
pub struct SipPendFlag;

impl PendFlag for SipPendFlag {
    #[inline]
    fn set(&self) {
        unsafe { asm!("csrsi sip, 2", options(nomem, nostack)) };
    }

    #[inline]
    fn is_set(&self) -> bool {
        sip::read().ssoft()
    }

    #[inline]
    fn clear(&self) {
        unsafe { asm!("csrci sip, 2", options(nomem, nostack)) };
    }
}

// ---------------------------------------------------------------------------
// Control transfer and halting
// ---------------------------------------------------------------------------

pub struct Tuman32;

impl Cpu for Tuman32 {
    fn disable_interrupts(&self) {
        unsafe { riscv::interrupt::disable() };
    }

    fn enable_interrupt_sources(&self) {
        // Machine timer, machine external and supervisor software.
        unsafe {
            mie::set_mtimer();
            mie::set_mext();
            mie::set_ssoft();
        }
    }

    unsafe fn enter_first_task(&self, dispatch: Dispatch) {
        // ra points at the fault path, so a returning task is caught.
        asm!(
            "mv   sp, t0",
            "la   ra, {returned}",
            "csrsi mstatus, 8",
            "jr   t1",
            returned = sym port_task_returned,
            in("t0") dispatch.stack,
            in("t1") dispatch.entry,
            in("a0") dispatch.argument,
            options(noreturn),
        );
    }

    fn halt(&self, reason: HaltReason) -> ! {
        self.disable_interrupts();
        PORT_HALT_REASON.store(reason.code(), Ordering::Relaxed);
        error!("halting: {}", reason);
        unsafe { riscv::asm::ebreak() };
        loop {
            unsafe { riscv::asm::wfi() };
        }
    }
}

#[no_mangle]
extern "C" fn port_task_returned() -> ! {
    port::task_returned(&Tuman32)
}

// ---------------------------------------------------------------------------
// Registered scheduler and tick source
// ---------------------------------------------------------------------------

/// Handle on the registered scheduler; every call takes a critical section.
struct Registered;

fn with_scheduler<R>(f: impl FnOnce(&mut (dyn Scheduler + Send)) -> R) -> R {
    sync::critical_section(|cs| {
        let mut slot = SCHEDULER.borrow_ref_mut(cs);
        match slot.as_deref_mut() {
            Some(scheduler) => f(scheduler),
            None => Tuman32.halt(HaltReason::NoScheduler),
        }
    })
}

unsafe impl Scheduler for Registered {
    fn switch_context(&mut self) {
        with_scheduler(|s| s.switch_context())
    }

    fn current_top(&self) -> *mut StackWord {
        with_scheduler(|s| s.current_top())
    }

    fn set_current_top(&mut self, top: *mut StackWord) {
        with_scheduler(|s| s.set_current_top(top))
    }

    fn increment_tick(&mut self) -> bool {
        with_scheduler(|s| s.increment_tick())
    }
}

struct BoardTimer;

impl TickSource for BoardTimer {
    fn start(&mut self) {
        sync::critical_section(|cs| TICK.borrow_ref_mut(cs).start())
    }

    fn rearm(&mut self) -> Rearm {
        sync::critical_section(|cs| TICK.borrow_ref_mut(cs).rearm())
    }
}

// ---------------------------------------------------------------------------
// Kernel-facing API
// ---------------------------------------------------------------------------

/// Hand the kernel's scheduler to the port. Must happen before
/// [`start_scheduler`].
pub fn register_scheduler(scheduler: &'static mut (dyn Scheduler + Send)) {
    sync::critical_section(|cs| {
        SCHEDULER.borrow_ref_mut(cs).replace(scheduler);
    });
}

/// Start multitasking. Never returns.
///
/// `mstatus.MIE` is cleared before any interrupt source is enabled and stays
/// clear until the first task is entered. A switch requested while tasks were
/// being created therefore fires in the first task, not on the boot stack.
pub fn start_scheduler() -> ! {
    if !matches!(mtvec::read().trap_mode(), Some(TrapMode::Direct)) {
        Tuman32.halt(HaltReason::VectorMode);
    }

    port::start_scheduler(&mut Registered, &mut BoardTimer, &PORT_CURRENT_TASK, &Tuman32)
}

/// Park the processor; there is no way back.
pub fn stop_scheduler() -> ! {
    port::stop_scheduler(&Tuman32)
}

/// Ask for a context switch at the next safe point.
#[inline]
pub fn request_context_switch() {
    switch::request_context_switch(&SWITCH_FLAG);
}

/// Re-arm the board timer for the next tick.
pub fn rearm_tick_timer() -> Rearm {
    BoardTimer.rearm()
}

// ---------------------------------------------------------------------------
// Trap hooks
// ---------------------------------------------------------------------------

/// Called by `port_switch_trap` with the outgoing frame saved.
#[no_mangle]
extern "C" fn port_switch_context() {
    port::service_switch(&mut Registered, &PORT_CURRENT_TASK, &SWITCH_FLAG);
}

/// Machine timer interrupt hook, called by the trap dispatcher.
#[no_mangle]
pub extern "C" fn port_tick() {
    port::service_tick(&mut Registered, &mut BoardTimer, &SWITCH_FLAG);
}

extern "C" {
    /// Save the interrupted task, run the switch hook, restore the chosen task.
    pub fn port_switch_trap() -> !;
}

// Frame layout: see `crate::frame`. x0 is stored as zero, x2 as the stack
// pointer above the frame, mepc in the pc slot. The argument slot is not
// touched. The hook runs on `frame::hook_stack_pointer(top)`.
global_asm!(
    ".section .text.port_switch_trap, \"ax\"",
    ".global port_switch_trap",
    ".align 2",
    "port_switch_trap:",
    "addi sp, sp, -136",
    "sw   x0, 0(sp)",
    "sw   x1, 4(sp)",
    "sw   x3, 12(sp)",
    "sw   x4, 16(sp)",
    "sw   x5, 20(sp)",
    "sw   x6, 24(sp)",
    "sw   x7, 28(sp)",
    "sw   x8, 32(sp)",
    "sw   x9, 36(sp)",
    "sw   x10, 40(sp)",
    "sw   x11, 44(sp)",
    "sw   x12, 48(sp)",
    "sw   x13, 52(sp)",
    "sw   x14, 56(sp)",
    "sw   x15, 60(sp)",
    "sw   x16, 64(sp)",
    "sw   x17, 68(sp)",
    "sw   x18, 72(sp)",
    "sw   x19, 76(sp)",
    "sw   x20, 80(sp)",
    "sw   x21, 84(sp)",
    "sw   x22, 88(sp)",
    "sw   x23, 92(sp)",
    "sw   x24, 96(sp)",
    "sw   x25, 100(sp)",
    "sw   x26, 104(sp)",
    "sw   x27, 108(sp)",
    "sw   x28, 112(sp)",
    "sw   x29, 116(sp)",
    "sw   x30, 120(sp)",
    "sw   x31, 124(sp)",
    "csrr t0, mepc",
    "sw   t0, 128(sp)",
    "addi t0, sp, 136",
    "sw   t0, 8(sp)",
    "la   t0, PORT_CURRENT_TASK",
    "sw   sp, 0(t0)",
    "andi sp, sp, -16",
    "call port_switch_context",
    "la   t0, PORT_CURRENT_TASK",
    "lw   sp, 0(t0)",
    "lw   t0, 128(sp)",
    "csrw mepc, t0",
    "lw   x1, 4(sp)",
    "lw   x3, 12(sp)",
    "lw   x4, 16(sp)",
    "lw   x5, 20(sp)",
    "lw   x6, 24(sp)",
    "lw   x7, 28(sp)",
    "lw   x8, 32(sp)",
    "lw   x9, 36(sp)",
    "lw   x10, 40(sp)",
    "lw   x11, 44(sp)",
    "lw   x12, 48(sp)",
    "lw   x13, 52(sp)",
    "lw   x14, 56(sp)",
    "lw   x15, 60(sp)",
    "lw   x16, 64(sp)",
    "lw   x17, 68(sp)",
    "lw   x18, 72(sp)",
    "lw   x19, 76(sp)",
    "lw   x20, 80(sp)",
    "lw   x21, 84(sp)",
    "lw   x22, 88(sp)",
    "lw   x23, 92(sp)",
    "lw   x24, 96(sp)",
    "lw   x25, 100(sp)",
    "lw   x26, 104(sp)",
    "lw   x27, 108(sp)",
    "lw   x28, 112(sp)",
    "lw   x29, 116(sp)",
    "lw   x30, 120(sp)",
    "lw   x31, 124(sp)",
    "addi sp, sp, 136",
    "mret",
);
