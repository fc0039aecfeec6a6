//! # Port Entry Points
//!
//! The operations the portable kernel calls into, and the hooks the trap
//! layer runs. Everything here is generic over the two collaborators the port
//! does not own:
//!
//! - [`Scheduler`]: the kernel's task selection and per-task saved stack.
//! - [`Cpu`]: the architecture's way of entering a task and of halting.
//!
//! ## Startup Sequence
//!
//! ```text
//! kernel creates tasks          ← stack::build_initial_frame() per task
//!   └─► start_scheduler()
//!         ├─► Cpu::disable_interrupts()       ← nothing fires on the boot stack
//!         ├─► Cpu::enable_interrupt_sources()
//!         ├─► TickSource::start()             ← first tick armed
//!         ├─► first_dispatch()                ← scheduler picks, entry slot read
//!         └─► Cpu::enter_first_task()         ← unmasks; no return on success
//!               └─► Cpu::halt(DispatchReturned) otherwise
//! ```
//!
//! ## Interrupt Paths
//!
//! ```text
//! software interrupt ─► save frame ─► service_switch() ─► restore frame
//! timer interrupt    ─► service_tick() ─► (request_context_switch())
//! ```

use log::{debug, error, info};

use crate::current::CurrentTask;
use crate::error::HaltReason;
use crate::frame::{RegisterFrame, StackWord};
use crate::switch::{request_context_switch, PendFlag};
use crate::tick::{Rearm, TickSource};

/// The kernel's scheduler, as seen by the port.
///
/// # Safety
/// [`Scheduler::current_top`] must always return a top of stack produced by
/// the stack frame builder or saved by the switch primitive, for a task whose
/// stack is still alive.
pub unsafe trait Scheduler {
    /// Select the task to run next and make it current. With no task running
    /// yet this picks the first task.
    fn switch_context(&mut self);

    /// Saved top of stack of the current task.
    fn current_top(&self) -> *mut StackWord;

    /// Store the top of stack the trap layer saved for the current task.
    fn set_current_top(&mut self, top: *mut StackWord);

    /// Advance kernel time by one tick. Returns `true` when a switch is due.
    fn increment_tick(&mut self) -> bool;
}

/// Architecture interrupt control, control transfer and fault parking.
pub trait Cpu {
    /// Mask all interrupts globally. Only [`Cpu::enter_first_task`] unmasks
    /// them again.
    fn disable_interrupts(&self);

    /// Enable the interrupt sources the port relies on (tick, switch
    /// request). Takes effect once interrupts are unmasked.
    fn enable_interrupt_sources(&self);

    /// Enter a task for the first time: set its stack pointer, pass its
    /// argument, unmask interrupts and jump to its entry. Does not return on
    /// success.
    ///
    /// # Safety
    /// `dispatch` must describe a task built by the stack frame builder.
    unsafe fn enter_first_task(&self, dispatch: Dispatch);

    /// Park the processor in a state a debugger can tell apart from a hang.
    fn halt(&self, reason: HaltReason) -> !;
}

/// Where and how to enter the first task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    /// Saved top of stack the values were read from.
    pub top: *mut StackWord,
    /// Value of the entry-address slot.
    pub entry: StackWord,
    pub argument: StackWord,
    /// Stack pointer the task starts with.
    pub stack: StackWord,
}

/// Let the scheduler pick the first task and read what is needed to enter it.
///
/// Only the entry slot, argument and stack pointer are read: with no previous
/// context there is nothing to save, and a fresh frame holds no other state
/// worth restoring.
pub fn first_dispatch<S>(scheduler: &mut S, current: &CurrentTask) -> Dispatch
where
    S: Scheduler + ?Sized,
{
    scheduler.switch_context();
    let top = scheduler.current_top();
    // Safety: guaranteed by the `Scheduler` contract.
    let frame = unsafe { RegisterFrame::from_top(top) };
    current.publish(top);

    Dispatch {
        top,
        entry: frame.entry(),
        argument: frame.argument(),
        stack: frame[crate::frame::Slot::Sp],
    }
}

/// Start the scheduler. Never returns.
///
/// Masks interrupts, enables the port's sources, arms the first tick,
/// dispatches the first task and, should control ever come back, halts with
/// [`HaltReason::DispatchReturned`]. There is no retry: no safe state exists
/// to retry from.
///
/// Interrupts stay masked until the first task is entered. A switch request
/// left pending by task creation is taken in that task, after the tick is
/// armed and the first dispatch has been published.
pub fn start_scheduler<S, T, C>(
    scheduler: &mut S,
    tick: &mut T,
    current: &CurrentTask,
    cpu: &C,
) -> !
where
    S: Scheduler + ?Sized,
    T: TickSource + ?Sized,
    C: Cpu + ?Sized,
{
    cpu.disable_interrupts();
    cpu.enable_interrupt_sources();
    tick.start();
    let dispatch = first_dispatch(scheduler, current);
    info!(
        "starting first task: entry {:#x}, stack {:#x}",
        dispatch.entry, dispatch.stack
    );

    // Safety: the dispatch was read from a frame the scheduler vouches for.
    unsafe { cpu.enter_first_task(dispatch) };

    error!("first dispatch to {:#x} returned", dispatch.entry);
    cpu.halt(HaltReason::DispatchReturned)
}

/// Stop the scheduler. There is no graceful shutdown: the processor is
/// parked for good.
pub fn stop_scheduler<C: Cpu + ?Sized>(cpu: &C) -> ! {
    info!("scheduler stopped");
    cpu.halt(HaltReason::Stopped)
}

/// Landing point for a task whose entry function returned.
pub fn task_returned<C: Cpu + ?Sized>(cpu: &C) -> ! {
    error!("task returned from its entry function");
    cpu.halt(HaltReason::TaskReturned)
}

/// Switch hook, run by the software-interrupt path between saving the
/// outgoing frame and restoring the incoming one.
///
/// Acknowledges the pending request, files the outgoing task's saved top with
/// the scheduler, lets it choose, and publishes the chosen task's top.
pub fn service_switch<S, F>(scheduler: &mut S, current: &CurrentTask, flag: &F)
where
    S: Scheduler + ?Sized,
    F: PendFlag + ?Sized,
{
    flag.clear();
    scheduler.set_current_top(current.top());
    scheduler.switch_context();
    let next = scheduler.current_top();
    current.publish(next);
    debug!("switching to task at {:#x}", next as usize);
}

/// Tick hook, run by the timer-interrupt path: re-arm the tick, advance kernel
/// time, and request a switch if the kernel asks for one.
pub fn service_tick<S, T, F>(scheduler: &mut S, tick: &mut T, flag: &F) -> Rearm
where
    S: Scheduler + ?Sized,
    T: TickSource + ?Sized,
    F: PendFlag + ?Sized,
{
    let armed = tick.rearm();
    if scheduler.increment_tick() {
        request_context_switch(flag);
    }
    armed
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::frame::{restore, save, CpuState, Slot, FRAME_BYTES};
    use crate::mmio::Reg;
    use crate::stack::init_frame;
    use crate::switch::MmioPendFlag;
    use crate::tick::Comparator32;
    use core::cell::{Cell, RefCell};
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::vec::Vec;

    const TASK_A: StackWord = 0x8000_0100;
    const TASK_B: StackWord = 0x8000_0200;

    /// Round-robin over a fixed set of tasks, switching every `slice` ticks.
    struct RoundRobin<const N: usize> {
        tops: [*mut StackWord; N],
        current: Option<usize>,
        ticks: u32,
        slice: u32,
    }

    impl<const N: usize> RoundRobin<N> {
        fn new(tops: [*mut StackWord; N], slice: u32) -> Self {
            Self {
                tops,
                current: None,
                ticks: 0,
                slice,
            }
        }
    }

    unsafe impl<const N: usize> Scheduler for RoundRobin<N> {
        fn switch_context(&mut self) {
            self.current = Some(match self.current {
                None => 0,
                Some(i) => (i + 1) % N,
            });
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
            self.ticks += 1;
            self.ticks % self.slice == 0
        }
    }

    /// Records the dispatch and returns, as a corrupt jump target would.
    #[derive(Default)]
    struct RecordingCpu {
        entered: Cell<Option<Dispatch>>,
        events: RefCell<Vec<&'static str>>,
    }

    impl Cpu for RecordingCpu {
        fn disable_interrupts(&self) {
            self.events.borrow_mut().push("mask");
        }

        fn enable_interrupt_sources(&self) {
            self.events.borrow_mut().push("sources");
        }

        unsafe fn enter_first_task(&self, dispatch: Dispatch) {
            self.events.borrow_mut().push("enter");
            self.entered.set(Some(dispatch));
        }

        fn halt(&self, reason: HaltReason) -> ! {
            panic!("halted: {}", reason);
        }
    }

    struct IdleTick {
        started: bool,
    }

    impl TickSource for IdleTick {
        fn start(&mut self) {
            self.started = true;
        }

        fn rearm(&mut self) -> Rearm {
            Rearm::Armed { compare: 0 }
        }
    }

    /// Logs into the same event list as the CPU.
    struct LoggingTick<'a> {
        events: &'a RefCell<Vec<&'static str>>,
    }

    impl TickSource for LoggingTick<'_> {
        fn start(&mut self) {
            self.events.borrow_mut().push("tick");
        }

        fn rearm(&mut self) -> Rearm {
            Rearm::Armed { compare: 0 }
        }
    }

    fn pend_flag(word: &mut u32) -> MmioPendFlag {
        MmioPendFlag::new(unsafe { Reg::from_ptr(word) }, 1 << 1)
    }

    #[test]
    fn test_first_dispatch_reads_entry_slot() {
        let mut stack_a = [0 as StackWord; 64];
        let mut stack_b = [0 as StackWord; 64];
        let end_a = stack_a.as_ptr_range().end as StackWord;
        let top_a = init_frame(&mut stack_a, TASK_A, 0x11).unwrap();
        let top_b = init_frame(&mut stack_b, TASK_B, 0x22).unwrap();
        let mut sched = RoundRobin::new([top_a, top_b], 1);
        let current = CurrentTask::new();

        let dispatch = first_dispatch(&mut sched, &current);

        assert_eq!(dispatch.entry, TASK_A);
        assert_eq!(dispatch.entry, unsafe { *top_a.add(crate::frame::ENTRY_SLOT) });
        assert_eq!(dispatch.argument, 0x11);
        assert_eq!(dispatch.stack, end_a);
        assert_eq!(dispatch.top, top_a);
        assert_eq!(current.top(), top_a);
    }

    #[test]
    fn test_start_scheduler_halts_if_dispatch_returns() {
        let mut stack = [0 as StackWord; 64];
        let top = init_frame(&mut stack, TASK_A, 0x1).unwrap();
        let mut sched = RoundRobin::new([top], 1);
        let mut tick = IdleTick { started: false };
        let current = CurrentTask::new();
        let cpu = RecordingCpu::default();

        let result = catch_unwind(AssertUnwindSafe(|| {
            start_scheduler(&mut sched, &mut tick, &current, &cpu);
        }));

        let payload = result.unwrap_err();
        let msg = payload.downcast_ref::<std::string::String>().unwrap();
        assert_eq!(msg, "halted: first dispatch returned to the kernel");
        assert!(tick.started);
        let entered = cpu.entered.get().unwrap();
        assert_eq!(entered.entry, TASK_A);
        assert_eq!(entered.argument, 0x1);
    }

    #[test]
    fn test_start_scheduler_masks_interrupts_before_arming() {
        let mut stack = [0 as StackWord; 64];
        let top = init_frame(&mut stack, TASK_A, 0x1).unwrap();
        let mut sched = RoundRobin::new([top], 1);
        let current = CurrentTask::new();
        let cpu = RecordingCpu::default();
        let mut tick = LoggingTick { events: &cpu.events };

        let result = catch_unwind(AssertUnwindSafe(|| {
            start_scheduler(&mut sched, &mut tick, &current, &cpu);
        }));

        assert!(result.is_err());
        assert_eq!(*cpu.events.borrow(), ["mask", "sources", "tick", "enter"]);
        assert_eq!(current.top(), top);
    }

    #[test]
    #[should_panic(expected = "halted: scheduler stopped")]
    fn test_stop_scheduler_halts() {
        stop_scheduler(&RecordingCpu::default());
    }

    #[test]
    #[should_panic(expected = "halted: task returned from its entry function")]
    fn test_task_returned_halts() {
        task_returned(&RecordingCpu::default());
    }

    #[test]
    fn test_switch_round_trip() {
        let mut stack_a = [0 as StackWord; 128];
        let mut stack_b = [0 as StackWord; 128];
        let end_a = stack_a.as_ptr_range().end as StackWord;
        let top_a = init_frame(&mut stack_a, TASK_A, 0x11).unwrap();
        let top_b = init_frame(&mut stack_b, TASK_B, 0x22).unwrap();
        let mut sched = RoundRobin::new([top_a, top_b], 1);
        let current = CurrentTask::new();
        let mut pending = 0u32;
        let flag = pend_flag(&mut pending);

        first_dispatch(&mut sched, &current);

        // Task A runs on its own stack and gets preempted mid-way.
        let mut running = CpuState::new();
        for n in 1..32 {
            running.x[n] = 0xA000 + n;
        }
        running.pc = TASK_A + 0x40;
        let saved_a = (end_a - 2 * FRAME_BYTES) as *mut StackWord;
        running.x[Slot::Sp.index()] = saved_a as StackWord + FRAME_BYTES;
        save(&running, unsafe { RegisterFrame::from_top_mut(saved_a) });

        request_context_switch(&flag);
        current.save(saved_a);
        service_switch(&mut sched, &current, &flag);

        assert!(!flag.is_set());
        assert_eq!(current.top(), top_b);
        let entered_b = restore(unsafe { RegisterFrame::from_top(top_b) }, top_b as StackWord);
        assert_eq!(entered_b.pc, TASK_B);
        assert_eq!(entered_b.reg(Slot::A0), 0x22);

        // B is preempted immediately; A resumes exactly where it stopped.
        current.save(top_b);
        service_switch(&mut sched, &current, &flag);
        assert_eq!(current.top(), saved_a);
        let resumed = restore(unsafe { RegisterFrame::from_top(saved_a) }, saved_a as StackWord);
        assert_eq!(resumed, running);
    }

    #[test]
    fn test_tick_requests_switch_when_slice_expires() {
        let mut stack = [0 as StackWord; 64];
        let top = init_frame(&mut stack, TASK_A, 0).unwrap();
        let mut sched = RoundRobin::new([top], 3);
        let mut pending = 0u32;
        let flag = pend_flag(&mut pending);
        let mut regs = [0u32; 2];
        let base = regs.as_mut_ptr();
        let counter = unsafe { Reg::from_ptr(base) };
        let mut tick = Comparator32::new(counter, unsafe { Reg::from_ptr(base.add(1)) }, 100);

        let mut switches = 0;
        for n in 1..=9u32 {
            counter.write(n * 100);
            let armed = service_tick(&mut sched, &mut tick, &flag);
            assert_eq!(armed, Rearm::Armed { compare: (n as u64 + 1) * 100 });
            if flag.take() {
                switches += 1;
            }
        }
        assert_eq!(switches, 3);
    }
}
