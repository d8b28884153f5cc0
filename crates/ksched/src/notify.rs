//! Interrupt notification slots.
//!
//! Raising an interrupt line bumps a counter that waiters consume, so a notification
//! that arrives before anyone waits is not lost.

use alloc::collections::BTreeMap;

use crate::{Completion, Kernel, OK, Pending, Tid, WaitReason, WakeCause};

#[derive(Debug, Default)]
pub(crate) struct NotifySlots {
    raised: BTreeMap<u32, u32>,
}

impl NotifySlots {
    fn raise(&mut self, line: u32) {
        let count = self.raised.entry(line).or_default();
        *count = count.saturating_add(1);
    }

    fn is_raised(&self, line: u32) -> bool {
        self.raised.get(&line).is_some_and(|&count| count > 0)
    }

    fn take(&mut self, line: u32) -> bool {
        match self.raised.get_mut(&line) {
            Some(count) if *count > 0 => {
                *count -= 1;
                true
            }
            _ => false,
        }
    }
}

impl Kernel {
    /// Records an interrupt on `line` and wakes every task waiting for it.
    ///
    /// Returns the number of tasks woken.
    pub fn raise_interrupt(&mut self, line: u32) -> usize {
        self.notify.raise(line);
        let woken = self.wake(WaitReason::Interrupt(line));
        log::trace!("interrupt {}: raised, {} waiters woken", line, woken);
        woken
    }

    /// Consumes one notification on `line`, blocking until one is raised.
    pub fn await_interrupt(&mut self, _tid: Tid, line: u32) -> Completion {
        if self.notify.take(line) {
            return Completion::Ready(OK);
        }
        Completion::Pending(Pending::new(WaitReason::Interrupt(line), is_raised, consume))
    }
}

fn is_raised(kernel: &Kernel, tid: Tid) -> bool {
    match kernel.pending_reason(tid) {
        Some(WaitReason::Interrupt(line)) => kernel.notify.is_raised(line),
        _ => false,
    }
}

fn consume(kernel: &mut Kernel, tid: Tid, _: WakeCause) -> i64 {
    if let Some(WaitReason::Interrupt(line)) = kernel.pending_reason(tid) {
        kernel.notify.take(line);
    }
    OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Dispatch, RunState,
        testing::{Clock, kernel, noop, resumed, run},
    };

    #[test]
    fn early_notifications_are_kept() {
        let mut kernel = kernel();
        let tid = kernel.create_kernel_task(noop, 0, "driver").unwrap();

        assert_eq!(kernel.raise_interrupt(33), 0);
        assert_eq!(kernel.raise_interrupt(33), 0);
        assert!(matches!(kernel.await_interrupt(tid, 33), Completion::Ready(OK)));
        assert!(matches!(kernel.await_interrupt(tid, 33), Completion::Ready(OK)));
        assert!(matches!(kernel.await_interrupt(tid, 33), Completion::Pending(_)));
    }

    #[test]
    fn woken_tasks_run_only_once_their_predicate_holds() {
        let mut kernel = kernel();
        let mut clock = Clock::default();
        let tid = kernel.create_kernel_task(noop, 0, "driver").unwrap();
        run(&mut kernel, &mut clock);

        let wait = kernel.await_interrupt(tid, 5);
        kernel.complete(tid, wait);
        for _ in 0..3 {
            assert!(matches!(kernel.tick(&mut clock), Dispatch::Idle { .. }));
        }

        assert_eq!(kernel.wake(WaitReason::Interrupt(5)), 1);
        assert_eq!(kernel.task(tid).unwrap().state(), RunState::WaitWakeup);
        assert!(matches!(kernel.tick(&mut clock), Dispatch::Idle { .. }));
        assert_eq!(kernel.task(tid).unwrap().state(), RunState::Wait);

        assert_eq!(kernel.raise_interrupt(5), 1);
        assert_eq!(resumed(&kernel.tick(&mut clock)), Some((tid, OK)));
        assert!(matches!(kernel.await_interrupt(tid, 5), Completion::Pending(_)));
    }

    #[test]
    fn one_notification_resumes_one_waiter() {
        let mut kernel = kernel();
        let mut clock = Clock::default();
        let first = kernel.create_kernel_task(noop, 0, "first").unwrap();
        let second = kernel.create_kernel_task(noop, 0, "second").unwrap();
        run(&mut kernel, &mut clock);
        run(&mut kernel, &mut clock);

        for tid in [first, second] {
            let wait = kernel.await_interrupt(tid, 7);
            kernel.complete(tid, wait);
        }
        assert_eq!(kernel.raise_interrupt(7), 2);

        assert_eq!(resumed(&kernel.tick(&mut clock)), Some((first, OK)));
        assert_eq!(kernel.task(second).unwrap().state(), RunState::Wait);
    }
}
