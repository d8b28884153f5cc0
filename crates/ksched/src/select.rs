//! Readiness multiplexing over descriptors.
//!
//! A select wait is polled: the scheduler re-checks the watched descriptors on every
//! tick, since readiness changes are not signalled to the kernel.

use alloc::vec::Vec;

use crate::{
    Completion, DescriptorError, Kernel, Pending, Ready, Tid, WaitPayload, WaitReason, WakeCause,
};

/// One descriptor and the conditions a select waits for on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub fd: usize,
    pub ready: Ready,
}

impl Kernel {
    /// Waits until any of `interests` is satisfied or `deadline` passes.
    ///
    /// Completes with a bit mask of the satisfied descriptor numbers, zero on timeout,
    /// or a negative status when a descriptor is not open.
    pub fn select(
        &mut self,
        tid: Tid,
        interests: Vec<Interest>,
        deadline: Option<u64>,
    ) -> Completion {
        match self.ready_set(tid, &interests) {
            Err(err) => Completion::Ready(err.code()),
            Ok(mask) if mask != 0 => Completion::Ready(mask),
            Ok(_) => {
                let pending = Pending::new(WaitReason::Select, any_ready, ready_mask)
                    .polled()
                    .with_payload(WaitPayload::Interests(interests));
                Completion::Pending(match deadline {
                    Some(deadline) => pending.with_deadline(deadline),
                    None => pending,
                })
            }
        }
    }

    fn ready_set(&self, tid: Tid, interests: &[Interest]) -> Result<i64, DescriptorError> {
        let mut mask = 0;
        for interest in interests {
            let descriptor = self.descriptor(tid, interest.fd)?;
            if descriptor.readiness().intersects(interest.ready) {
                mask |= 1 << interest.fd;
            }
        }
        Ok(mask)
    }

    fn watched_ready_set(&self, tid: Tid) -> Result<i64, DescriptorError> {
        match self.task(tid).and_then(|task| task.pending()).map(Pending::payload) {
            Some(WaitPayload::Interests(interests)) => self.ready_set(tid, interests),
            _ => Ok(0),
        }
    }
}

fn any_ready(kernel: &Kernel, tid: Tid) -> bool {
    kernel.watched_ready_set(tid).map_or(true, |mask| mask != 0)
}

fn ready_mask(kernel: &mut Kernel, tid: Tid, _: WakeCause) -> i64 {
    kernel
        .watched_ready_set(tid)
        .unwrap_or_else(DescriptorError::code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        BADARG, Descriptor, RunState,
        testing::{Clock, kernel, noop, resumed, run},
    };
    use alloc::sync::Arc;
    use core::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Pipe(AtomicU32);

    impl Pipe {
        fn set(&self, ready: Ready) {
            self.0.store(ready.bits(), Ordering::SeqCst);
        }
    }

    impl Descriptor for Pipe {
        fn readiness(&self) -> Ready {
            Ready::from_bits(self.0.load(Ordering::SeqCst))
        }
    }

    fn reading(fd: usize) -> Interest {
        Interest {
            fd,
            ready: Ready::READ | Ready::CLOSE,
        }
    }

    #[test]
    fn ready_descriptors_complete_at_once() {
        let mut kernel = kernel();
        let tid = kernel.create_kernel_task(noop, 0, "poller").unwrap();
        let pipe = Arc::new(Pipe::default());
        let idle = kernel.open(tid, Arc::new(Pipe::default())).unwrap();
        let fd = kernel.open(tid, pipe.clone()).unwrap();

        pipe.set(Ready::CLOSE);
        let completion = kernel.select(tid, vec![reading(idle), reading(fd)], None);
        assert!(matches!(completion, Completion::Ready(mask) if mask == 1 << fd));
    }

    #[test]
    fn pollers_wake_when_a_descriptor_turns_ready() {
        let mut kernel = kernel();
        let mut clock = Clock::default();
        let tid = kernel.create_kernel_task(noop, 0, "poller").unwrap();
        run(&mut kernel, &mut clock);
        let pipe = Arc::new(Pipe::default());
        let fd = kernel.open(tid, pipe.clone()).unwrap();

        let wait = kernel.select(tid, vec![reading(fd)], None);
        kernel.complete(tid, wait);
        assert_eq!(kernel.task(tid).unwrap().state(), RunState::WaitWakeup);
        assert_eq!(kernel.tick(&mut clock).tid(), None);
        assert_eq!(kernel.task(tid).unwrap().state(), RunState::WaitWakeup);

        pipe.set(Ready::READ | Ready::WRITE);
        assert_eq!(resumed(&kernel.tick(&mut clock)), Some((tid, 1 << fd)));
    }

    #[test]
    fn pollers_time_out_with_an_empty_set() {
        let mut kernel = kernel();
        let mut clock = Clock::default();
        let tid = kernel.create_kernel_task(noop, 0, "poller").unwrap();
        run(&mut kernel, &mut clock);
        let fd = kernel.open(tid, Arc::new(Pipe::default())).unwrap();

        let wait = kernel.select(tid, vec![reading(fd)], Some(2_000));
        kernel.complete(tid, wait);
        assert_eq!(kernel.tick(&mut clock).tid(), None);
        assert_eq!(clock.armed.last(), Some(&2_000));

        clock.now = 2_000;
        assert_eq!(resumed(&kernel.tick(&mut clock)), Some((tid, 0)));
    }

    #[test]
    fn closed_descriptors_are_reported() {
        let mut kernel = kernel();
        let mut clock = Clock::default();
        let tid = kernel.create_kernel_task(noop, 0, "poller").unwrap();
        run(&mut kernel, &mut clock);
        let fd = kernel.open(tid, Arc::new(Pipe::default())).unwrap();

        assert!(matches!(
            kernel.select(tid, vec![reading(fd + 1)], None),
            Completion::Ready(BADARG)
        ));

        let wait = kernel.select(tid, vec![reading(fd)], None);
        kernel.complete(tid, wait);
        kernel.close(tid, fd).unwrap();
        assert_eq!(resumed(&kernel.tick(&mut clock)), Some((tid, BADARG)));
    }
}
