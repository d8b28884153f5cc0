//! Completion tokens for asynchronous device requests.

use alloc::collections::BTreeMap;

use crate::{BADARG, Completion, Kernel, Pending, Tid, WaitReason, WakeCause};

/// Names one outstanding device request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IoToken(u64);

impl IoToken {
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Default)]
pub(crate) struct IoCompletions {
    next: u64,
    owners: BTreeMap<IoToken, Tid>,
    done: BTreeMap<IoToken, i64>,
}

impl IoCompletions {
    /// Drops every request issued by `tid` along with any result nobody collected.
    pub(crate) fn forget(&mut self, tid: Tid) {
        let done = &mut self.done;
        self.owners.retain(|token, owner| {
            let keep = *owner != tid;
            if !keep {
                done.remove(token);
            }
            keep
        });
    }

    fn collect(&mut self, token: IoToken) -> Option<i64> {
        let value = self.done.remove(&token)?;
        self.owners.remove(&token);
        Some(value)
    }
}

impl Kernel {
    /// Issues a token for a request `tid` is about to submit to a device.
    pub fn begin_io(&mut self, tid: Tid) -> IoToken {
        let token = IoToken(self.io.next);
        self.io.next += 1;
        self.io.owners.insert(token, tid);
        token
    }

    /// Records the result of the request behind `token` and wakes its waiters.
    ///
    /// Results for requests whose issuer has exited are dropped.
    pub fn complete_io(&mut self, token: IoToken, value: i64) -> usize {
        if !self.io.owners.contains_key(&token) {
            log::trace!("io {}: completed with no owner", token.as_u64());
            return 0;
        }
        self.io.done.insert(token, value);
        self.wake(WaitReason::Io(token))
    }

    /// Returns the result of the request behind `token`, blocking until it completes.
    pub fn await_io(&mut self, tid: Tid, token: IoToken) -> Completion {
        if self.io.owners.get(&token) != Some(&tid) {
            return Completion::Ready(BADARG);
        }
        match self.io.collect(token) {
            Some(value) => Completion::Ready(value),
            None => {
                Completion::Pending(Pending::new(WaitReason::Io(token), is_done, take_result))
            }
        }
    }
}

fn is_done(kernel: &Kernel, tid: Tid) -> bool {
    match kernel.pending_reason(tid) {
        Some(WaitReason::Io(token)) => kernel.io.done.contains_key(&token),
        _ => false,
    }
}

fn take_result(kernel: &mut Kernel, tid: Tid, _: WakeCause) -> i64 {
    match kernel.pending_reason(tid) {
        Some(WaitReason::Io(token)) => kernel.io.collect(token).unwrap_or(BADARG),
        _ => BADARG,
    }
}
