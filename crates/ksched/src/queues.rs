//! The four ordered run queues.

use alloc::collections::VecDeque;

use crate::{RunState, Tid};

/// Queue membership of every task, one queue per non-running state.
///
/// `Awake` tasks share the runnable queue with `Runnable` ones, so waking a task does
/// not reorder it against tasks that never blocked.
#[derive(Debug, Default)]
pub(crate) struct RunQueues {
    pub runnable: VecDeque<Tid>,
    pub wait: VecDeque<Tid>,
    pub wakeup: VecDeque<Tid>,
    pub complete: VecDeque<Tid>,
}

impl RunQueues {
    pub fn queue_mut(&mut self, state: RunState) -> &mut VecDeque<Tid> {
        match state {
            RunState::Runnable | RunState::Awake => &mut self.runnable,
            RunState::Wait => &mut self.wait,
            RunState::WaitWakeup => &mut self.wakeup,
            RunState::Complete => &mut self.complete,
        }
    }

    /// Moves `tid` from the queue of `from` to the tail of the queue of `to`.
    ///
    /// # Panics
    ///
    /// Panics if `tid` is not in the queue of `from`.
    #[track_caller]
    pub fn shift(&mut self, tid: Tid, from: RunState, to: RunState) {
        if slot(from) == slot(to) {
            return;
        }
        self.remove(tid, from);
        self.queue_mut(to).push_back(tid);
    }

    /// Removes `tid` from the queue of `state`.
    ///
    /// # Panics
    ///
    /// Panics if `tid` is not in that queue.
    #[track_caller]
    pub fn remove(&mut self, tid: Tid, state: RunState) {
        let queue = self.queue_mut(state);
        let index = queue
            .iter()
            .position(|&queued| queued == tid)
            .unwrap_or_else(|| panic!("task {} is missing from the {:?} queue", tid, state));
        queue.remove(index);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.runnable.len() + self.wait.len() + self.wakeup.len() + self.complete.len()
    }
}

const fn slot(state: RunState) -> usize {
    match state {
        RunState::Runnable | RunState::Awake => 0,
        RunState::Wait => 1,
        RunState::WaitWakeup => 2,
        RunState::Complete => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tid(n: u32) -> Tid {
        Tid::new(n, false)
    }

    #[test]
    fn shift_moves_to_the_tail() {
        let mut queues = RunQueues::default();
        queues.runnable.extend([tid(1), tid(2)]);
        queues.wait.push_back(tid(3));

        queues.shift(tid(1), RunState::Runnable, RunState::Wait);
        assert_eq!(queues.runnable, [tid(2)]);
        assert_eq!(queues.wait, [tid(3), tid(1)]);
        assert_eq!(queues.len(), 3);
    }

    #[test]
    fn awake_and_runnable_share_a_queue() {
        let mut queues = RunQueues::default();
        queues.runnable.extend([tid(1), tid(2)]);

        queues.shift(tid(1), RunState::Awake, RunState::Runnable);
        assert_eq!(queues.runnable, [tid(1), tid(2)]);
    }

    #[test]
    #[should_panic(expected = "is missing from the Wait queue")]
    fn moving_a_task_from_the_wrong_queue_panics() {
        let mut queues = RunQueues::default();
        queues.runnable.push_back(tid(1));
        queues.shift(tid(1), RunState::Wait, RunState::Runnable);
    }
}
