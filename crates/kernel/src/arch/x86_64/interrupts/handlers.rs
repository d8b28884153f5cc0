//! Interrupt stubs that forward to `common_interrupt` in mod.rs.

use super::common_interrupt;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};

macro_rules! stub {
    ($name:ident, $vector:expr) => {
        #[unsafe(link_section = ".interrupt_handlers")]
        extern "x86-interrupt" fn $name(stack_frame: InterruptStackFrame) {
            common_interrupt($vector, stack_frame, None);
        }
    };
    ($name:ident, $vector:expr, error_code) => {
        #[unsafe(link_section = ".interrupt_handlers")]
        extern "x86-interrupt" fn $name(stack_frame: InterruptStackFrame, error_code: u64) {
            common_interrupt($vector, stack_frame, Some(error_code));
        }
    };
}

stub!(divide_error_handler, 0);
stub!(debug_handler, 1);
stub!(nmi_handler, 2);
stub!(breakpoint_handler, 3);
stub!(overflow_handler, 4);
stub!(bound_range_exceeded_handler, 5);
stub!(invalid_opcode_handler, 6);
stub!(device_not_available_handler, 7);
stub!(invalid_tss_handler, 10, error_code);
stub!(segment_not_present_handler, 11, error_code);
stub!(stack_segment_fault_handler, 12, error_code);
stub!(general_protection_fault_handler, 13, error_code);
stub!(x87_floating_point_handler, 16);
stub!(alignment_check_handler, 17, error_code);
stub!(simd_floating_point_handler, 19);
stub!(timer_handler, 32);
stub!(spurious_handler, 255);

#[unsafe(link_section = ".interrupt_handlers")]
extern "x86-interrupt" fn double_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) -> ! {
    common_interrupt(8, stack_frame, Some(error_code));
    panic!("returned from double fault handler");
}

#[unsafe(link_section = ".interrupt_handlers")]
extern "x86-interrupt" fn page_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    common_interrupt(14, stack_frame, Some(error_code.bits()));
}

#[unsafe(link_section = ".interrupt_handlers")]
extern "x86-interrupt" fn machine_check_handler(stack_frame: InterruptStackFrame) -> ! {
    common_interrupt(18, stack_frame, None);
    panic!("returned from machine check handler");
}

pub fn register_handlers(idt: &mut InterruptDescriptorTable, double_fault_ist_index: u16) {
    idt.divide_error.set_handler_fn(divide_error_handler);
    idt.debug.set_handler_fn(debug_handler);
    idt.non_maskable_interrupt.set_handler_fn(nmi_handler);
    idt.breakpoint.set_handler_fn(breakpoint_handler);
    idt.overflow.set_handler_fn(overflow_handler);
    idt.bound_range_exceeded.set_handler_fn(bound_range_exceeded_handler);
    idt.invalid_opcode.set_handler_fn(invalid_opcode_handler);
    idt.device_not_available.set_handler_fn(device_not_available_handler);
    unsafe {
        idt.double_fault
            .set_handler_fn(double_fault_handler)
            .set_stack_index(double_fault_ist_index);
    }
    idt.invalid_tss.set_handler_fn(invalid_tss_handler);
    idt.segment_not_present.set_handler_fn(segment_not_present_handler);
    idt.stack_segment_fault.set_handler_fn(stack_segment_fault_handler);
    idt.general_protection_fault.set_handler_fn(general_protection_fault_handler);
    idt.page_fault.set_handler_fn(page_fault_handler);
    idt.x87_floating_point.set_handler_fn(x87_floating_point_handler);
    idt.alignment_check.set_handler_fn(alignment_check_handler);
    idt.machine_check.set_handler_fn(machine_check_handler);
    idt.simd_floating_point.set_handler_fn(simd_floating_point_handler);
    idt[32].set_handler_fn(timer_handler);
    idt[255].set_handler_fn(spurious_handler);
}
