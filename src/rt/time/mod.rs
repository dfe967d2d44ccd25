//! Time management module
//!
//! System time, the tick handler and tick/time unit conversions.

mod vt;

pub use vt::{VirtualTimer, VtFn, VtList};

use crate::config::CFG_TICK_RATE_HZ;
use crate::kernel::Sys;
use crate::port::Port;
use crate::types::{SysInterval, SysTime};

#[inline]
const fn to_ticks(n: u32, per_second: u64) -> SysInterval {
    let ticks = (n as u64 * CFG_TICK_RATE_HZ as u64).div_ceil(per_second);
    if ticks > SysInterval::MAX as u64 {
        SysInterval::MAX
    } else {
        ticks as SysInterval
    }
}

/// Seconds to ticks, rounded up
pub const fn s2i(secs: u32) -> SysInterval {
    to_ticks(secs, 1)
}

/// Milliseconds to ticks, rounded up
pub const fn ms2i(ms: u32) -> SysInterval {
    to_ticks(ms, 1_000)
}

/// Microseconds to ticks, rounded up
pub const fn us2i(us: u32) -> SysInterval {
    to_ticks(us, 1_000_000)
}

/// Ticks to milliseconds, rounded up
pub const fn i2ms(ticks: SysInterval) -> u32 {
    let ms = (ticks as u64 * 1_000).div_ceil(CFG_TICK_RATE_HZ as u64);
    if ms > u32::MAX as u64 {
        u32::MAX
    } else {
        ms as u32
    }
}

/// `time` lies in the window `[start, end)`, wrap-around aware
#[inline]
pub const fn time_is_in_range(time: SysTime, start: SysTime, end: SysTime) -> bool {
    time.wrapping_sub(start) < end.wrapping_sub(start)
}

impl<P: Port> Sys<P> {
    /// System tick handler: charges the running thread's quantum and
    /// advances the virtual timers
    pub fn timer_handler_i(&mut self) {
        if self.cfg.time_quantum > 0 {
            let cur = &mut self.threads[self.current.index()];
            cur.ticks = cur.ticks.saturating_sub(1);
        }
        self.vt_do_tick_i();
    }

    /// System time is inside `[start, end)`
    #[inline]
    pub fn is_system_time_within(&self, start: SysTime, end: SysTime) -> bool {
        time_is_in_range(self.system_time(), start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions_round_up() {
        assert_eq!(ms2i(0), 0);
        assert_eq!(ms2i(1), CFG_TICK_RATE_HZ.div_ceil(1000));
        assert_eq!(s2i(2), 2 * CFG_TICK_RATE_HZ);
        assert_eq!(us2i(1), 1);
        assert_eq!(i2ms(s2i(3)), 3_000);
    }

    #[test]
    fn range_wraps() {
        assert!(time_is_in_range(5, 0, 10));
        assert!(!time_is_in_range(10, 0, 10));
        assert!(time_is_in_range(2, SysTime::MAX - 3, 5));
        assert!(!time_is_in_range(6, SysTime::MAX - 3, 5));
    }
}
