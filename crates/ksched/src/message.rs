//! Fixed-capacity per-task message queues.

use alloc::collections::VecDeque;
use core::fmt;

use crate::{Completion, Kernel, OK, Pending, RunState, Tid, WaitReason, WakeCause};

/// Messages a task's queue holds before senders see [`MessageError::QueueFull`].
pub const MESSAGE_CAPACITY: usize = 64;

/// One inter-task message: four machine words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Message(pub [u64; 4]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageError {
    /// The receiver's queue already holds [`MESSAGE_CAPACITY`] messages.
    QueueFull,
    /// No live task has the receiver's id.
    UnknownTask,
}

impl MessageError {
    pub const fn code(self) -> i64 {
        match self {
            MessageError::QueueFull => crate::NORESOURCE,
            MessageError::UnknownTask => crate::BADARG,
        }
    }
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageError::QueueFull => write!(f, "message queue full"),
            MessageError::UnknownTask => write!(f, "no such task"),
        }
    }
}

#[derive(Debug, Default)]
pub struct MessageQueue {
    messages: VecDeque<Message>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) -> Result<(), MessageError> {
        if self.messages.len() >= MESSAGE_CAPACITY {
            return Err(MessageError::QueueFull);
        }
        self.messages.push_back(message);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Message> {
        self.messages.pop_front()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.messages.clear();
    }
}

impl Kernel {
    /// Queues `message` for `to` and wakes it if it is waiting for one.
    pub fn send_message(&mut self, to: Tid, message: Message) -> Result<(), MessageError> {
        let task = self
            .tasks
            .get_mut(&to)
            .filter(|task| task.state != RunState::Complete)
            .ok_or(MessageError::UnknownTask)?;
        task.messages.push(message)?;
        self.wake_task(to, WaitReason::Message);
        Ok(())
    }

    /// Delivers the oldest queued message into `tid`'s argument registers, blocking
    /// until one arrives.
    pub fn receive_message(&mut self, tid: Tid) -> Completion {
        if self.deliver_message(tid) {
            return Completion::Ready(OK);
        }
        Completion::Pending(Pending::new(WaitReason::Message, has_message, delivered))
    }

    fn deliver_message(&mut self, tid: Tid) -> bool {
        let task = self.record_mut(tid);
        match task.messages.pop() {
            Some(Message(words)) => {
                task.frame.args = words;
                true
            }
            None => false,
        }
    }
}

fn has_message(kernel: &Kernel, tid: Tid) -> bool {
    kernel
        .task(tid)
        .is_some_and(|task| !task.messages().is_empty())
}

fn delivered(kernel: &mut Kernel, tid: Tid, _: WakeCause) -> i64 {
    kernel.deliver_message(tid);
    OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Clock, kernel, noop, resumed, run};

    #[test]
    fn messages_come_out_in_order() {
        let mut queue = MessageQueue::new();
        queue.push(Message([1, 0, 0, 0])).unwrap();
        queue.push(Message([2, 0, 0, 0])).unwrap();

        assert_eq!(queue.pop(), Some(Message([1, 0, 0, 0])));
        assert_eq!(queue.pop(), Some(Message([2, 0, 0, 0])));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn queue_holds_at_most_capacity() {
        let mut queue = MessageQueue::new();
        for n in 0..MESSAGE_CAPACITY as u64 {
            queue.push(Message([n, 0, 0, 0])).unwrap();
        }

        assert_eq!(queue.push(Message::default()), Err(MessageError::QueueFull));
        assert_eq!(queue.len(), MESSAGE_CAPACITY);
        queue.pop();
        assert!(queue.push(Message::default()).is_ok());
    }

    #[test]
    fn queued_messages_are_received_at_once() {
        let mut kernel = kernel();
        let tid = kernel.create_kernel_task(noop, 0, "server").unwrap();

        kernel.send_message(tid, Message([1, 2, 3, 4])).unwrap();
        assert!(matches!(kernel.receive_message(tid), Completion::Ready(OK)));
        assert_eq!(kernel.task(tid).unwrap().frame().args, [1, 2, 3, 4]);
        assert!(kernel.task(tid).unwrap().messages().is_empty());
    }

    #[test]
    fn receivers_block_until_a_message_arrives() {
        let mut kernel = kernel();
        let mut clock = Clock::default();
        let server = kernel.create_kernel_task(noop, 0, "server").unwrap();
        let client = kernel.create_kernel_task(noop, 0, "client").unwrap();
        run(&mut kernel, &mut clock);
        run(&mut kernel, &mut clock);

        let receive = kernel.receive_message(server);
        kernel.complete(server, receive);
        assert_eq!(kernel.tick(&mut clock).tid(), Some(client));
        assert_eq!(kernel.task(server).unwrap().state(), RunState::Wait);

        kernel.send_message(server, Message([9, 8, 7, 6])).unwrap();
        assert_eq!(kernel.task(server).unwrap().state(), RunState::WaitWakeup);
        assert_eq!(kernel.tick(&mut clock).tid(), Some(client));
        assert_eq!(resumed(&kernel.tick(&mut clock)), Some((server, OK)));
        assert_eq!(kernel.task(server).unwrap().frame().args, [9, 8, 7, 6]);
    }

    #[test]
    fn senders_see_full_queues_and_missing_tasks() {
        let mut kernel = kernel();
        let tid = kernel.create_kernel_task(noop, 0, "server").unwrap();
        for _ in 0..MESSAGE_CAPACITY {
            kernel.send_message(tid, Message::default()).unwrap();
        }

        assert_eq!(
            kernel.send_message(tid, Message::default()),
            Err(MessageError::QueueFull)
        );
        kernel.task_cleanup(tid, 0);
        assert_eq!(
            kernel.send_message(tid, Message::default()),
            Err(MessageError::UnknownTask)
        );
        assert_eq!(MessageError::UnknownTask.code(), crate::BADARG);
    }
}
