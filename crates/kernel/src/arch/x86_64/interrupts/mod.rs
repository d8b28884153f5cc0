use kmm::VirtualAddress;
use x86_64::structures::idt::{
    InterruptDescriptorTable, InterruptStackFrame, InterruptStackFrameValue,
};

use crate::interrupts::{InterruptContext, InterruptKind, interrupt_was_received};

mod handlers;

pub const DOUBLE_FAULT_IST_INDEX: u16 = 0;
static IDT: spin::Once<InterruptDescriptorTable> = spin::Once::new();

pub fn idt() -> &'static InterruptDescriptorTable {
    IDT.call_once(|| {
        let mut idt = InterruptDescriptorTable::new();
        handlers::register_handlers(&mut idt, DOUBLE_FAULT_IST_INDEX);
        idt
    })
}

/// Common interrupt handler called by all interrupt stubs.
fn common_interrupt(vector: u8, stack_frame: InterruptStackFrame, error_code: Option<u64>) {
    let vector = InterruptVector::new(vector);
    let state = InterruptState::new(stack_frame, error_code);
    let kind = match vector {
        InterruptVector::PAGE_FAULT => {
            let faulting_address = x86_64::registers::control::Cr2::read()
                .ok()
                .map(|v| VirtualAddress::new(v.as_u64() as usize));
            InterruptKind::PageFault { faulting_address }
        }
        InterruptVector::TIMER => InterruptKind::Timer,
        InterruptVector::SPURIOUS => InterruptKind::Spurious,
        _ => InterruptKind::Exception,
    };

    interrupt_was_received(InterruptContext::new(vector, state, kind));
}

/// An IDT vector number.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct InterruptVector(u8);

const VECTOR_NAMES: &[(u8, &str)] = &[
    (0, "divide error"),
    (1, "debug"),
    (2, "non-maskable interrupt"),
    (3, "breakpoint"),
    (4, "overflow"),
    (5, "bound range exceeded"),
    (6, "invalid opcode"),
    (7, "device not available"),
    (8, "double fault"),
    (10, "invalid TSS"),
    (11, "segment not present"),
    (12, "stack segment fault"),
    (13, "general protection fault"),
    (14, "page fault"),
    (16, "x87 floating point exception"),
    (17, "alignment check"),
    (18, "machine check"),
    (19, "SIMD floating point exception"),
    (32, "timer"),
    (255, "spurious interrupt"),
];

impl InterruptVector {
    pub const PAGE_FAULT: Self = Self(14);
    pub const TIMER: Self = Self(32);
    pub const SPURIOUS: Self = Self(255);

    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    pub fn name(self) -> Option<&'static str> {
        VECTOR_NAMES
            .iter()
            .find(|(vector, _)| *vector == self.0)
            .map(|(_, name)| *name)
    }
}

impl core::fmt::Debug for InterruptVector {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "InterruptVector({})", self.0)
    }
}

impl core::fmt::Display for InterruptVector {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "vector {}", self.0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InterruptState {
    stack_frame: InterruptStackFrameValue,
    error_code: Option<u64>,
}

impl InterruptState {
    pub fn new(stack_frame: InterruptStackFrame, error_code: Option<u64>) -> Self {
        Self {
            stack_frame: *stack_frame,
            error_code,
        }
    }

    pub fn instruction_pointer(&self) -> VirtualAddress {
        VirtualAddress::new(self.stack_frame.instruction_pointer.as_u64() as usize)
    }

    pub fn error_code(&self) -> Option<u64> {
        self.error_code
    }

    /// Returns true if the CPU was running in ring 3 when the interrupt arrived.
    pub fn from_user(&self) -> bool {
        self.stack_frame.code_segment.rpl() == x86_64::PrivilegeLevel::Ring3
    }
}
