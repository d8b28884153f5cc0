//! Fixtures shared by the unit tests.

use kmm::{
    AddressTranslator, CachePopulator, FrameAllocator, MemoryError, PAGE_SIZE, PhysicalAddress,
};

use crate::{Dispatch, Kernel, Platform, Tid};

/// A clock the test moves by hand, recording every timer it is asked to arm.
#[derive(Debug, Default)]
pub(crate) struct Clock {
    pub now: u64,
    pub armed: Vec<u64>,
}

impl Platform for Clock {
    fn now_us(&self) -> u64 {
        self.now
    }

    fn arm_timer(&mut self, deadline_us: u64) {
        self.armed.push(deadline_us);
    }
}

/// A kernel over 8 MiB of emulated memory.
pub(crate) fn kernel() -> Kernel {
    let _ = std::panic::catch_unwind(|| {
        AddressTranslator::set_current(AddressTranslator::emulated(0x80_0000));
    });
    let frames: &'static FrameAllocator = Box::leak(Box::new(FrameAllocator::new()));
    frames
        .add_region(PhysicalAddress::new(0x10_0000), 0x70_0000)
        .unwrap();
    Kernel::new(frames)
}

pub(crate) fn noop(_: usize) -> i64 {
    0
}

/// Ticks once and expects some task to be dispatched.
pub(crate) fn run(kernel: &mut Kernel, clock: &mut Clock) -> Dispatch {
    let dispatch = kernel.tick(clock);
    assert!(dispatch.tid().is_some(), "expected a dispatch, got {:?}", dispatch);
    dispatch
}

pub(crate) fn resumed(dispatch: &Dispatch) -> Option<(Tid, i64)> {
    match *dispatch {
        Dispatch::Resume { tid, value, .. } => Some((tid, value)),
        _ => None,
    }
}

/// Hands out zeroed frames.
pub(crate) struct ZeroPages;

impl CachePopulator for ZeroPages {
    fn populate(
        &mut self,
        frames: &FrameAllocator,
        _: usize,
    ) -> Result<PhysicalAddress, MemoryError> {
        Ok(frames.try_alloc(PAGE_SIZE)?)
    }
}
