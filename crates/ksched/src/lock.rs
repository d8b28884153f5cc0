//! Kernel locks with first-come, first-served hand-off.
//!
//! Releasing a contended lock passes ownership straight to the longest waiter, so a
//! task that releases and immediately re-acquires cannot starve the others.

use alloc::{collections::{BTreeMap, VecDeque}, vec::Vec};

use crate::{BADARG, Completion, Kernel, OK, Pending, Tid, WaitReason, WakeCause};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockId(u32);

#[derive(Debug, Default)]
struct LockState {
    owner: Option<Tid>,
    waiters: VecDeque<Tid>,
}

#[derive(Debug, Default)]
pub(crate) struct LockTable {
    locks: BTreeMap<LockId, LockState>,
    next: u32,
}

impl Kernel {
    pub fn create_lock(&mut self) -> LockId {
        let id = LockId(self.locks.next);
        self.locks.next += 1;
        self.locks.locks.insert(id, LockState::default());
        id
    }

    pub fn lock_owner(&self, lock: LockId) -> Option<Tid> {
        self.locks.locks.get(&lock)?.owner
    }

    /// Takes `lock` for `tid`, blocking behind earlier waiters while it is held.
    pub fn lock_acquire(&mut self, tid: Tid, lock: LockId) -> Completion {
        let Some(state) = self.locks.locks.get_mut(&lock) else {
            return Completion::Ready(BADARG);
        };
        match state.owner {
            None => {
                state.owner = Some(tid);
                Completion::Ready(OK)
            }
            Some(owner) if owner == tid => Completion::Ready(BADARG),
            Some(_) => {
                state.waiters.push_back(tid);
                Completion::Pending(Pending::new(WaitReason::Lock(lock), handed_over, acquired))
            }
        }
    }

    /// Releases `lock` held by `tid` and hands it to the longest waiter.
    pub fn lock_release(&mut self, tid: Tid, lock: LockId) -> i64 {
        let Some(state) = self.locks.locks.get_mut(&lock) else {
            return BADARG;
        };
        if state.owner != Some(tid) {
            return BADARG;
        }
        state.owner = state.waiters.pop_front();
        if let Some(next) = state.owner {
            log::trace!("lock {:?}: handed from {} to {}", lock, tid, next);
            self.wake_task(next, WaitReason::Lock(lock));
        }
        OK
    }

    /// Drops `tid` from every wait list and hands on every lock it holds.
    pub(crate) fn release_locks(&mut self, tid: Tid) {
        let mut handed = Vec::new();
        for (&id, state) in self.locks.locks.iter_mut() {
            state.waiters.retain(|&waiter| waiter != tid);
            if state.owner == Some(tid) {
                state.owner = state.waiters.pop_front();
                handed.extend(state.owner.map(|next| (id, next)));
            }
        }
        for (id, next) in handed {
            log::debug!("lock {:?}: abandoned by {}, handed to {}", id, tid, next);
            self.wake_task(next, WaitReason::Lock(id));
        }
    }
}

fn handed_over(kernel: &Kernel, tid: Tid) -> bool {
    match kernel.pending_reason(tid) {
        Some(WaitReason::Lock(lock)) => kernel.lock_owner(lock) == Some(tid),
        _ => false,
    }
}

fn acquired(_: &mut Kernel, _: Tid, _: WakeCause) -> i64 {
    OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        RunState,
        testing::{Clock, kernel, noop, resumed, run},
    };

    fn started(count: usize) -> (Kernel, Clock, Vec<Tid>) {
        let mut kernel = kernel();
        let mut clock = Clock::default();
        let tids: Vec<Tid> = (0..count)
            .map(|_| kernel.create_kernel_task(noop, 0, "locker").unwrap())
            .collect();
        for _ in 0..count {
            run(&mut kernel, &mut clock);
        }
        (kernel, clock, tids)
    }

    fn acquire(kernel: &mut Kernel, tid: Tid, lock: LockId) {
        let completion = kernel.lock_acquire(tid, lock);
        kernel.complete(tid, completion);
    }

    #[test]
    fn contended_locks_are_handed_over_in_arrival_order() {
        let (mut kernel, mut clock, tids) = started(3);
        let [owner, second, third] = tids[..] else {
            unreachable!()
        };
        let lock = kernel.create_lock();

        assert!(matches!(kernel.lock_acquire(owner, lock), Completion::Ready(OK)));
        acquire(&mut kernel, second, lock);
        acquire(&mut kernel, third, lock);
        assert_eq!(kernel.task(second).unwrap().state(), RunState::Wait);

        assert_eq!(kernel.lock_release(owner, lock), OK);
        assert_eq!(kernel.lock_owner(lock), Some(second));
        assert_eq!(kernel.tick(&mut clock).tid(), Some(owner));
        assert_eq!(resumed(&kernel.tick(&mut clock)), Some((second, OK)));
        assert_eq!(kernel.task(third).unwrap().state(), RunState::Wait);

        assert_eq!(kernel.lock_release(second, lock), OK);
        assert_eq!(kernel.lock_owner(lock), Some(third));
        assert_eq!(kernel.lock_release(third, lock), OK);
        assert_eq!(kernel.lock_owner(lock), None);
    }

    #[test]
    fn misuse_is_reported_to_the_caller() {
        let (mut kernel, _, tids) = started(2);
        let lock = kernel.create_lock();

        assert!(matches!(kernel.lock_acquire(tids[0], lock), Completion::Ready(OK)));
        assert!(matches!(kernel.lock_acquire(tids[0], lock), Completion::Ready(BADARG)));
        assert_eq!(kernel.lock_release(tids[1], lock), BADARG);
        assert_eq!(kernel.lock_release(tids[0], LockId(99)), BADARG);
    }

    #[test]
    fn exiting_owner_hands_the_lock_on() {
        let (mut kernel, mut clock, tids) = started(2);
        let lock = kernel.create_lock();
        acquire(&mut kernel, tids[0], lock);
        acquire(&mut kernel, tids[1], lock);

        kernel.task_cleanup(tids[0], 0);
        assert_eq!(kernel.lock_owner(lock), Some(tids[1]));
        assert_eq!(resumed(&kernel.tick(&mut clock)), Some((tids[1], OK)));
    }
}
