use kmm::VirtualAddress;

use crate::{arch, clock, scheduler};

#[derive(Debug)]
pub struct InterruptContext {
    vector: arch::InterruptVector,
    state: arch::InterruptState,
    kind: InterruptKind,
}

impl InterruptContext {
    pub fn new(
        vector: arch::InterruptVector,
        state: arch::InterruptState,
        kind: InterruptKind,
    ) -> Self {
        Self {
            vector,
            state,
            kind,
        }
    }
}

#[derive(Debug)]
pub enum InterruptKind {
    Exception,
    PageFault {
        faulting_address: Option<VirtualAddress>,
    },
    Timer,
    Spurious,
}

/// Routes an interrupt to the clock, the scheduler or the panic path.
///
/// Page faults raised from user mode are handed to the faulting task's memory space;
/// a fault the space cannot resolve ends the task. Any other exception is fatal.
pub fn interrupt_was_received(context: InterruptContext) {
    log::trace!("interrupt received: {:?}", context);
    match context.kind {
        InterruptKind::Timer => {
            clock::advance();
            arch::acknowledge_timer();
        }
        InterruptKind::Spurious => {}
        InterruptKind::PageFault {
            faulting_address: Some(addr),
        } if context.state.from_user() => scheduler::user_fault(addr),
        _ => panic!(
            "unhandled {} at {} (error code {:?})",
            context.vector,
            context.state.instruction_pointer(),
            context.state.error_code()
        ),
    }
}
