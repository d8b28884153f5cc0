//! The monotonic clock the scheduler runs on.
//!
//! The timer interrupt fires every [`arch::TICK_US`] and advances a global counter. The
//! periodic tick doubles as the scheduler's preemption timer, so arming a deadline only
//! records it; the run loop checks the record after every interrupt.

use core::sync::atomic::{AtomicU64, Ordering};

use ksched::Platform;

use crate::arch;

static NOW_US: AtomicU64 = AtomicU64::new(0);

pub fn start() {
    arch::start_timer();
}

/// Called from the timer interrupt.
pub fn advance() {
    NOW_US.fetch_add(arch::TICK_US, Ordering::Relaxed);
}

pub fn now_us() -> u64 {
    NOW_US.load(Ordering::Relaxed)
}

/// The clock as seen by [`ksched::Kernel::tick`].
#[derive(Debug, Default)]
pub struct TickClock {
    deadline_us: u64,
}

impl TickClock {
    pub const fn new() -> Self {
        Self { deadline_us: 0 }
    }

    /// Returns true once the deadline from the last `arm_timer` has passed.
    pub fn expired(&self) -> bool {
        now_us() >= self.deadline_us
    }
}

impl Platform for TickClock {
    fn now_us(&self) -> u64 {
        now_us()
    }

    fn arm_timer(&mut self, deadline_us: u64) {
        self.deadline_us = deadline_us;
    }
}
