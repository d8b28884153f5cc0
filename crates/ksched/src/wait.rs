//! Typed continuations for blocking kernel calls.
//!
//! A call that cannot finish immediately returns [`Completion::Pending`]. The [`Pending`]
//! token names what the task waits for and carries two plain functions: a predicate the
//! scheduler evaluates to decide whether the wait is over, and a resume function that
//! finishes the call and produces the value the task sees.

use alloc::vec::Vec;

use crate::{Interest, IoToken, Kernel, LockId, Tid};

/// What a blocked task is waiting for. External wakes match on this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    Lock(LockId),
    Message,
    Interrupt(u32),
    Io(IoToken),
    Timer,
    Select,
    Exit(Tid),
}

/// Why a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeCause {
    /// The predicate held.
    Signaled,
    /// The deadline passed first.
    TimedOut,
}

/// Data a wait needs beyond its reason.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum WaitPayload {
    #[default]
    None,
    /// Descriptors and conditions a readiness wait watches.
    Interests(Vec<Interest>),
}

/// Decides whether a blocked task can be resumed.
pub type Predicate = fn(&Kernel, Tid) -> bool;

/// Finishes a blocked call and returns the value delivered to the task.
pub type Resume = fn(&mut Kernel, Tid, WakeCause) -> i64;

/// The continuation of a blocked call.
#[derive(Debug)]
pub struct Pending {
    pub(crate) reason: WaitReason,
    pub(crate) payload: WaitPayload,
    pub(crate) deadline: Option<u64>,
    pub(crate) polled: bool,
    pub(crate) timed_out: bool,
    pub(crate) predicate: Predicate,
    pub(crate) resume: Resume,
}

impl Pending {
    pub fn new(reason: WaitReason, predicate: Predicate, resume: Resume) -> Self {
        Self {
            reason,
            payload: WaitPayload::None,
            deadline: None,
            polled: false,
            timed_out: false,
            predicate,
            resume,
        }
    }

    /// Ends the wait with [`WakeCause::TimedOut`] once the monotonic clock reaches
    /// `deadline` microseconds.
    pub fn with_deadline(mut self, deadline: u64) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Evaluates the predicate on every tick instead of waiting for an explicit wake.
    pub fn polled(mut self) -> Self {
        self.polled = true;
        self
    }

    pub fn with_payload(mut self, payload: WaitPayload) -> Self {
        self.payload = payload;
        self
    }

    pub fn reason(&self) -> WaitReason {
        self.reason
    }

    pub fn deadline(&self) -> Option<u64> {
        self.deadline
    }

    pub fn is_polled(&self) -> bool {
        self.polled
    }

    pub fn payload(&self) -> &WaitPayload {
        &self.payload
    }
}

/// Outcome of a kernel call made by a task.
#[derive(Debug)]
pub enum Completion {
    /// The call finished with this value.
    Ready(i64),
    /// The call blocks the task.
    Pending(Pending),
}

impl From<i64> for Completion {
    fn from(value: i64) -> Self {
        Completion::Ready(value)
    }
}
