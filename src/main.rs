//! # Tuman32 Port Demo Firmware
//!
//! Two tasks sharing the core under a minimal round-robin scheduler:
//!
//! | Task | Argument | Behavior |
//! |------|----------|----------|
//! | `counter_task` | counter index | Busy-counts; preempted when its slice expires |
//! | `yielding_task` | counter index | Counts a little, then requests a switch |
//!
//! The trap vector below is the board's dispatcher: supervisor software
//! interrupts go straight to the port's switch primitive, machine timer
//! interrupts to the port's tick hook. Everything else halts.
//!
//! Build with `--features rt` for a `riscv32` target.

#![no_std]
#![no_main]

use core::arch::global_asm;
use core::ptr::addr_of_mut;
use core::sync::atomic::{AtomicU32, Ordering};

use panic_halt as _;
use riscv::register::mcause;
use riscv_rt::entry;

use tuman32_port::arch::tuman32;
use tuman32_port::{Cpu, HaltReason, Scheduler, StackWord, TaskStack};

/// Ticks a task may run before it is preempted.
const TIME_SLICE: u32 = 10;

static COUNTERS: [AtomicU32; 2] = [AtomicU32::new(0), AtomicU32::new(0)];

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Never yields; only the tick takes the core away from it.
extern "C" fn counter_task(index: usize) -> ! {
    loop {
        COUNTERS[index].fetch_add(1, Ordering::Relaxed);
    }
}

/// Gives the core away after every small burst of work.
extern "C" fn yielding_task(index: usize) -> ! {
    loop {
        for _ in 0..100 {
            COUNTERS[index].fetch_add(1, Ordering::Relaxed);
        }
        tuman32::request_context_switch();
    }
}

// ---------------------------------------------------------------------------
// Round-robin scheduler
// ---------------------------------------------------------------------------

struct RoundRobin {
    tops: [*mut StackWord; 2],
    current: Option<usize>,
    ticks_left: u32,
}

// Safety: the stacks behind `tops` are statics owned by this scheduler.
unsafe impl Send for RoundRobin {}

unsafe impl Scheduler for RoundRobin {
    fn switch_context(&mut self) {
        let next = match self.current {
            None => 0,
            Some(i) => (i + 1) % self.tops.len(),
        };
        self.current = Some(next);
        self.ticks_left = TIME_SLICE;
    }

    fn current_top(&self) -> *mut StackWord {
        self.tops[self.current.unwrap_or(0)]
    }

    fn set_current_top(&mut self, top: *mut StackWord) {
        if let Some(i) = self.current {
            self.tops[i] = top;
        }
    }

    fn increment_tick(&mut self) -> bool {
        self.ticks_left = self.ticks_left.saturating_sub(1);
        self.ticks_left == 0
    }
}

static mut STACKS: [TaskStack; 2] = [TaskStack::new(), TaskStack::new()];
static mut SCHEDULER: RoundRobin = RoundRobin {
    tops: [core::ptr::null_mut(); 2],
    current: None,
    ticks_left: TIME_SLICE,
};

// ---------------------------------------------------------------------------
// Trap dispatch
// ---------------------------------------------------------------------------

/// Supervisor software interrupt, as read from `mcause`.
const CAUSE_SSOFT: u32 = 0x8000_0001;

global_asm!(
    ".section .trap, \"ax\"",
    ".global _start_trap",
    ".align 2",
    "_start_trap:",
    "addi sp, sp, -64",
    "sw   ra, 0(sp)",
    "sw   t0, 4(sp)",
    "sw   t1, 8(sp)",
    "sw   t2, 12(sp)",
    "sw   t3, 16(sp)",
    "sw   t4, 20(sp)",
    "sw   t5, 24(sp)",
    "sw   t6, 28(sp)",
    "sw   a0, 32(sp)",
    "sw   a1, 36(sp)",
    "sw   a2, 40(sp)",
    "sw   a3, 44(sp)",
    "sw   a4, 48(sp)",
    "sw   a5, 52(sp)",
    "sw   a6, 56(sp)",
    "sw   a7, 60(sp)",
    "csrr t0, mcause",
    "li   t1, {ssoft}",
    "bne  t0, t1, 1f",
    // Switch request: hand the untouched task context to the port.
    "lw   t0, 4(sp)",
    "lw   t1, 8(sp)",
    "lw   ra, 0(sp)",
    "addi sp, sp, 64",
    "j    port_switch_trap",
    "1:",
    "call demo_trap",
    "lw   ra, 0(sp)",
    "lw   t0, 4(sp)",
    "lw   t1, 8(sp)",
    "lw   t2, 12(sp)",
    "lw   t3, 16(sp)",
    "lw   t4, 20(sp)",
    "lw   t5, 24(sp)",
    "lw   t6, 28(sp)",
    "lw   a0, 32(sp)",
    "lw   a1, 36(sp)",
    "lw   a2, 40(sp)",
    "lw   a3, 44(sp)",
    "lw   a4, 48(sp)",
    "lw   a5, 52(sp)",
    "lw   a6, 56(sp)",
    "lw   a7, 60(sp)",
    "addi sp, sp, 64",
    "mret",
    ssoft = const CAUSE_SSOFT,
);

/// Every trap that is not a switch request.
#[no_mangle]
extern "C" fn demo_trap() {
    let cause = mcause::read();
    if cause.is_interrupt() && cause.code() == 7 {
        tuman32::port_tick();
    } else {
        tuman32::Tuman32.halt(HaltReason::UnexpectedTrap);
    }
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

#[entry]
fn main() -> ! {
    // Safety: runs once, before any task or interrupt can observe the statics.
    let scheduler = unsafe {
        let stacks = &mut *addr_of_mut!(STACKS);
        let scheduler = &mut *addr_of_mut!(SCHEDULER);
        scheduler.tops[0] = stacks[0].init(counter_task, 0);
        scheduler.tops[1] = stacks[1].init(yielding_task, 1);
        scheduler
    };

    tuman32::register_scheduler(scheduler);
    tuman32::start_scheduler()
}
