#![cfg_attr(not(test), no_std)]

//! # Kestrel Scheduler (ksched)
//!
//! Tasks, the ways they block, and the tick that decides who runs next.
//!
//! Everything hangs off one [`Kernel`] context: a flat table of tasks keyed by [`Tid`],
//! four ordered run queues, the kernel memory space and the tables behind each wait
//! discipline (locks, interrupt notifications, I/O completions). Blocking calls never
//! switch stacks. They return a [`Completion`], and a [`Completion::Pending`] carries
//! the predicate and resume function the scheduler uses to finish the call later.

extern crate alloc;

mod context;
mod descriptor;
mod io;
mod kernel;
mod lock;
mod message;
mod notify;
mod queues;
mod select;
mod status;
mod task;
#[cfg(test)]
mod testing;
mod tid;
mod wait;

pub use context::{BAD_RETURN_ADDRESS, RegisterFrame};
pub use descriptor::{
    Descriptor, DescriptorError, DescriptorTable, KERNEL_DESCRIPTOR_POOL, KERNEL_DESCRIPTORS,
    Ready, USER_DESCRIPTORS,
};
pub use io::IoToken;
pub use kernel::{
    Dispatch, KERNEL_STACK_SIZE, Kernel, MAX_QUANTUM_US, Platform, TaskError, USER_STACK_SIZE,
};
pub use lock::LockId;
pub use message::{MESSAGE_CAPACITY, Message, MessageError, MessageQueue};
pub use select::Interest;
pub use status::{BADARG, NORESOURCE, NOSPACE, OK};
pub use task::{Accounting, KernelEntry, RunState, Task};
pub use tid::{MAX_TASKS, TID_KERNEL, Tid};
pub use wait::{Completion, Pending, Predicate, Resume, WaitPayload, WaitReason, WakeCause};
