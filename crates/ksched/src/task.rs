use alloc::{string::String, vec::Vec};
use core::fmt;

use kmm::{MemorySpace, PhysicalAddress};

use crate::{DescriptorTable, MessageQueue, Pending, RegisterFrame, Tid};

/// Entry point of a kernel task. The argument is the value the task was created with,
/// the return value becomes its exit status.
pub type KernelEntry = fn(usize) -> i64;

/// Scheduling disposition of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Ready to run from its saved register frame.
    Runnable,
    /// Blocked until a deadline passes or something wakes it.
    Wait,
    /// Blocked, but due for its predicate to be checked on the next tick.
    WaitWakeup,
    /// Ready to run, with a value to resume its blocked call with.
    Awake,
    /// Exited; kept until every waiter has collected the exit status.
    Complete,
}

/// CPU time charged to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Accounting {
    /// Times the task has been dispatched.
    pub dispatches: u64,
    /// Microseconds between each dispatch and the tick that followed it.
    pub runtime_us: u64,
}

pub(crate) enum Descriptors {
    Owned(DescriptorTable),
    Pooled(usize),
}

/// A task record.
pub struct Task {
    pub(crate) tid: Tid,
    pub(crate) name: String,
    pub(crate) frame: RegisterFrame,
    pub(crate) state: RunState,
    pub(crate) pending: Option<Pending>,
    pub(crate) wake_value: i64,
    pub(crate) space: Option<MemorySpace>,
    pub(crate) kernel_stack: Option<PhysicalAddress>,
    pub(crate) entry: Option<KernelEntry>,
    pub(crate) descriptors: Descriptors,
    pub(crate) messages: MessageQueue,
    pub(crate) accounting: Accounting,
    pub(crate) waiters: Vec<Tid>,
    pub(crate) exit: Option<i64>,
}

impl Task {
    pub fn tid(&self) -> Tid {
        self.tid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn frame(&self) -> &RegisterFrame {
        &self.frame
    }

    pub fn frame_mut(&mut self) -> &mut RegisterFrame {
        &mut self.frame
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// The wait this task is blocked in, if any.
    pub fn pending(&self) -> Option<&Pending> {
        self.pending.as_ref()
    }

    /// Address space of a user task; kernel tasks run in the kernel space.
    pub fn space(&self) -> Option<&MemorySpace> {
        self.space.as_ref()
    }

    pub fn space_mut(&mut self) -> Option<&mut MemorySpace> {
        self.space.as_mut()
    }

    pub fn accounting(&self) -> Accounting {
        self.accounting
    }

    pub fn messages(&self) -> &MessageQueue {
        &self.messages
    }

    /// Exit status, once the task has completed.
    pub fn exit_status(&self) -> Option<i64> {
        self.exit
    }

    /// Tasks registered to collect this task's exit status.
    pub fn waiters(&self) -> &[Tid] {
        &self.waiters
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("tid", &self.tid)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("pending", &self.pending.as_ref().map(|p| p.reason))
            .field("accounting", &self.accounting)
            .finish_non_exhaustive()
    }
}
