// cSpell:ignore kenter

#![cfg_attr(not(test), no_std)]
#![cfg_attr(target_arch = "x86_64", feature(abi_x86_interrupt))]

extern crate alloc;

mod arch;
mod clock;
mod console;
mod interrupts;
mod mem;
mod scheduler;
mod serial;

use limine::{BaseRevision, request::StackSizeRequest};

#[used]
#[unsafe(link_section = ".requests")]
static BASE_REVISION: BaseRevision = BaseRevision::with_revision(4);

// Kernel tasks run on the boot stack.
#[used]
#[unsafe(link_section = ".requests")]
static STACK_SIZE: StackSizeRequest = StackSizeRequest::new().with_size(64 * 1024);

pub fn kernel_main() -> ! {
    assert!(BASE_REVISION.is_supported());

    let console = console::Console::init();
    serial::init(console);
    arch::init();

    let frames = mem::init_frames();
    mem::init_heap(frames);
    log::debug!(
        "frame allocator ready: {:#x} of {:#x} bytes free",
        frames.free_memory(),
        frames.total_memory()
    );

    scheduler::init(frames);
    clock::start();
    scheduler::run()
}

/// Reports a panic on the console and parks the CPU.
pub fn handle_panic(info: &core::panic::PanicInfo) -> ! {
    arch::disable_interrupts();
    log::error!("kernel panic: {}", info);
    arch::park()
}
