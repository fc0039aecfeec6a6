//! # Tick-Timer Arming
//!
//! The periodic tick is produced by a counter/compare register pair: the
//! timer interrupt is raised while `counter >= compare`. Each tick the
//! interrupt path re-arms the comparator one interval ahead.
//!
//! The tick source is a build-time choice of one [`TickSource`]
//! implementation:
//!
//! - [`Comparator32`]: the Tuman32 board timer, a 32-bit counter that wraps
//!   to zero. Used by default.
//! - [`Clint64`]: a standard RISC-V CLINT `mtime`/`mtimecmp` pair, 64 bits wide
//!   and read as two halves.
//!
//! Every read-compute-write of the comparator runs inside a critical section,
//! so another timer event can never interleave with the update.

use log::{debug, trace, warn};

use crate::config::{
    MTIMECMP_ADDR, MTIME_ADDR, TICKS_PER_INTERVAL, TIMER_COMPARE_ADDR, TIMER_COUNTER_ADDR,
};
use crate::mmio::Reg;
use crate::sync;

/// Outcome of arming the comparator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rearm {
    /// Compare set one interval past the current counter.
    Armed { compare: u64 },
    /// The interval crossed the counter's wrap point. The counter was reset to
    /// zero and the compare set to the part of the interval left after the
    /// wrap.
    Wrapped { compare: u64 },
    /// Whole intervals elapsed unserviced; they were skipped and `compare` is
    /// the first interval boundary still ahead of the counter.
    Skipped { compare: u64, missed: u64 },
}

impl Rearm {
    /// Compare value programmed into the hardware.
    pub fn compare(&self) -> u64 {
        match *self {
            Rearm::Armed { compare }
            | Rearm::Wrapped { compare }
            | Rearm::Skipped { compare, .. } => compare,
        }
    }
}

/// A hardware source of periodic tick interrupts.
pub trait TickSource {
    /// Program the first tick. Called once, before the first task runs.
    fn start(&mut self);

    /// Schedule the next tick. Called from the timer interrupt each time it
    /// fires. Does not request a context switch.
    fn rearm(&mut self) -> Rearm;
}

// ---------------------------------------------------------------------------
// Tuman32 board timer
// ---------------------------------------------------------------------------

/// 32-bit free-running counter and compare register.
pub struct Comparator32 {
    counter: Reg<u32>,
    compare: Reg<u32>,
    interval: u32,
}

impl Comparator32 {
    /// The board timer at the configured tick rate.
    pub const fn board() -> Self {
        // Safety: addresses come from the board register table.
        unsafe {
            Self::new(
                Reg::new(TIMER_COUNTER_ADDR),
                Reg::new(TIMER_COMPARE_ADDR),
                TICKS_PER_INTERVAL,
            )
        }
    }

    pub const fn new(counter: Reg<u32>, compare: Reg<u32>, interval: u32) -> Self {
        assert!(interval > 0, "tick interval must be non-zero");
        Self {
            counter,
            compare,
            interval,
        }
    }

    #[inline]
    pub fn interval(&self) -> u32 {
        self.interval
    }
}

impl TickSource for Comparator32 {
    fn start(&mut self) {
        let armed = self.rearm();
        debug!("tick timer started, compare {}", armed.compare());
    }

    fn rearm(&mut self) -> Rearm {
        sync::critical_section(|_cs| {
            let now = self.counter.read();
            let next = now.wrapping_add(self.interval);

            if now > next {
                // The threshold lies past the wrap point and `counter >= compare`
                // would hold immediately. Restart the count from zero, keeping
                // the remainder of the interval.
                let compare = next.max(1);
                self.counter.write(0);
                self.compare.write(compare);
                warn!("tick counter wrapped at {}, restarting with compare {}", now, compare);
                Rearm::Wrapped {
                    compare: compare as u64,
                }
            } else {
                self.compare.write(next);
                trace!("tick rearmed: counter {}, compare {}", now, next);
                Rearm::Armed {
                    compare: next as u64,
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// CLINT mtime / mtimecmp
// ---------------------------------------------------------------------------

/// Read a 64-bit counter exposed as two 32-bit halves.
///
/// The high half is read on both sides of the low half and the read retried
/// until it is stable, so a carry between the two reads is never observed as
/// a torn value.
pub fn read_split_counter<H, L>(mut hi: H, mut lo: L) -> u64
where
    H: FnMut() -> u32,
    L: FnMut() -> u32,
{
    loop {
        let high = hi();
        let low = lo();
        if hi() == high {
            return ((high as u64) << 32) | low as u64;
        }
    }
}

/// 64-bit `mtime`/`mtimecmp` pair on a 32-bit hart.
///
/// Ticks are kept on a fixed grid (`next` advances by exactly one interval),
/// so interrupt latency does not accumulate as drift. `mtime` does not wrap
/// in practice.
pub struct Clint64 {
    mtime_lo: Reg<u32>,
    mtime_hi: Reg<u32>,
    mtimecmp_lo: Reg<u32>,
    mtimecmp_hi: Reg<u32>,
    interval: u64,
    next: u64,
}

impl Clint64 {
    /// The CLINT of hart 0 at the configured tick rate.
    pub const fn board() -> Self {
        // Safety: addresses come from the board register table.
        unsafe { Self::new(MTIME_ADDR, MTIMECMP_ADDR, TICKS_PER_INTERVAL) }
    }

    /// # Safety
    /// `mtime` and `mtimecmp` must be the addresses of the two 64-bit
    /// registers, low word first.
    pub const unsafe fn new(mtime: usize, mtimecmp: usize, interval: u32) -> Self {
        assert!(interval > 0, "tick interval must be non-zero");
        Self {
            mtime_lo: Reg::new(mtime),
            mtime_hi: Reg::new(mtime + 4),
            mtimecmp_lo: Reg::new(mtimecmp),
            mtimecmp_hi: Reg::new(mtimecmp + 4),
            interval: interval as u64,
            next: 0,
        }
    }

    pub fn now(&self) -> u64 {
        read_split_counter(|| self.mtime_hi.read(), || self.mtime_lo.read())
    }

    /// Program `mtimecmp` without ever passing through a value below both the
    /// old and the new compare.
    fn write_compare(&self, value: u64) {
        self.mtimecmp_lo.write(u32::MAX);
        self.mtimecmp_hi.write((value >> 32) as u32);
        self.mtimecmp_lo.write(value as u32);
    }
}

impl TickSource for Clint64 {
    fn start(&mut self) {
        sync::critical_section(|_cs| {
            let compare = self.now() + self.interval;
            self.write_compare(compare);
            self.next = compare + self.interval;
            debug!("tick timer started, mtimecmp {}", compare);
        })
    }

    fn rearm(&mut self) -> Rearm {
        sync::critical_section(|_cs| {
            let now = self.now();
            let mut compare = self.next;
            let mut missed = 0;
            if compare <= now {
                missed = (now - compare) / self.interval + 1;
                compare += missed * self.interval;
            }
            self.write_compare(compare);
            self.next = compare + self.interval;

            if missed > 0 {
                warn!("{} tick(s) missed, mtimecmp {}", missed, compare);
                Rearm::Skipped { compare, missed }
            } else {
                trace!("tick rearmed: mtime {}, mtimecmp {}", now, compare);
                Rearm::Armed { compare }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ticks_per_interval;
    use core::cell::Cell;

    /// Counter word followed by compare word.
    fn board_timer(regs: &mut [u32; 2], interval: u32) -> (Comparator32, Reg<u32>, Reg<u32>) {
        let base = regs.as_mut_ptr();
        let counter = unsafe { Reg::from_ptr(base) };
        let compare = unsafe { Reg::from_ptr(base.add(1)) };
        (Comparator32::new(counter, compare, interval), counter, compare)
    }

    #[test]
    fn test_rearm_one_interval_ahead() {
        let mut regs = [500, 0];
        let (mut timer, counter, compare) = board_timer(&mut regs, ticks_per_interval(1_000_000, 1_000));

        assert_eq!(timer.rearm(), Rearm::Armed { compare: 1_500 });
        assert_eq!(compare.read(), 1_500);
        assert_eq!(counter.read(), 500);
    }

    #[test]
    fn test_rearm_near_wrap_resets_counter() {
        let mut regs = [u32::MAX - 1, 0];
        let (mut timer, counter, compare) = board_timer(&mut regs, 100);

        assert_eq!(timer.rearm(), Rearm::Wrapped { compare: 98 });
        assert_eq!(counter.read(), 0);
        assert_eq!(compare.read(), 98);
        assert!(compare.read() > counter.read());
        assert!(compare.read() <= timer.interval());
    }

    #[test]
    fn test_rearm_exactly_at_wrap() {
        // now + interval == 2^32 lands the threshold on zero.
        let mut regs = [u32::MAX - 99, 0];
        let (mut timer, counter, compare) = board_timer(&mut regs, 100);

        assert_eq!(timer.rearm(), Rearm::Wrapped { compare: 1 });
        assert_eq!(counter.read(), 0);
        assert_eq!(compare.read(), 1);
    }

    #[test]
    fn test_compare_always_ahead_of_counter() {
        let interval = 1_000;
        for &now in &[0, 1, 500, 0x7FFF_FFFF, u32::MAX - interval, u32::MAX - interval + 1, u32::MAX] {
            let mut regs = [now, 0];
            let (mut timer, counter, compare) = board_timer(&mut regs, interval);
            timer.rearm();
            assert!(compare.read() > counter.read(), "counter {} before rearm", now);
            assert!(compare.read() - counter.read() <= interval);
        }
    }

    #[test]
    fn test_start_arms_first_tick() {
        let mut regs = [0, 0];
        let (mut timer, _, compare) = board_timer(&mut regs, 250);
        timer.start();
        assert_eq!(compare.read(), 250);
    }

    #[test]
    fn test_split_read_retries_on_carry() {
        // The high half ticks over between the first two reads.
        let highs = [7u32, 8, 8];
        let lows = [0xFFFF_FFFFu32, 0x0000_0002];
        let hi_reads = Cell::new(0);
        let lo_reads = Cell::new(0);

        let value = read_split_counter(
            || {
                let i = hi_reads.get();
                hi_reads.set(i + 1);
                highs[i.min(highs.len() - 1)]
            },
            || {
                let i = lo_reads.get();
                lo_reads.set(i + 1);
                lows[i.min(lows.len() - 1)]
            },
        );

        assert_eq!(value, (8u64 << 32) | 2);
        assert_eq!(lo_reads.get(), 2);
    }

    /// `mtime` (two words) followed by `mtimecmp` (two words).
    fn clint(regs: &mut [u32; 4], interval: u32) -> Clint64 {
        let base = regs.as_mut_ptr() as usize;
        unsafe { Clint64::new(base, base + 8, interval) }
    }

    fn set_mtime(regs: *mut u32, value: u64) {
        unsafe {
            Reg::from_ptr(regs).write(value as u32);
            Reg::from_ptr(regs.add(1)).write((value >> 32) as u32);
        }
    }

    fn mtimecmp(regs: *mut u32) -> u64 {
        unsafe {
            let lo = Reg::from_ptr(regs.add(2)).read() as u64;
            let hi = Reg::from_ptr(regs.add(3)).read() as u64;
            (hi << 32) | lo
        }
    }

    #[test]
    fn test_clint_fixed_grid() {
        let mut regs = [0u32; 4];
        let mut timer = clint(&mut regs, 1_000);
        let base = regs.as_mut_ptr();

        set_mtime(base, 0xFFFF_FF00);
        timer.start();
        assert_eq!(mtimecmp(base), 0xFFFF_FF00 + 1_000);

        // Serviced late: the next tick stays on the grid.
        set_mtime(base, 0xFFFF_FF00 + 1_200);
        assert_eq!(timer.rearm(), Rearm::Armed { compare: 0xFFFF_FF00 + 2_000 });
        assert_eq!(mtimecmp(base), 0xFFFF_FF00 + 2_000);
        assert!(mtimecmp(base) > timer.now());
    }

    #[test]
    fn test_clint_skips_missed_intervals() {
        let mut regs = [0u32; 4];
        let mut timer = clint(&mut regs, 100);
        let base = regs.as_mut_ptr();

        timer.start();
        set_mtime(base, 450);
        assert_eq!(timer.rearm(), Rearm::Skipped { compare: 500, missed: 3 });
        assert_eq!(mtimecmp(base), 500);

        set_mtime(base, 500);
        assert_eq!(timer.rearm(), Rearm::Armed { compare: 600 });
    }
}
