use x86_64::{
    VirtAddr,
    instructions::{interrupts as cpu_interrupts, tables::load_tss},
    registers::segmentation::{CS, Segment},
    structures::{
        gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector},
        tss::TaskStateSegment,
    },
};

mod interrupts;
mod pit;
mod stack;

pub use interrupts::{InterruptState, InterruptVector};
pub use pit::{TICK_US, acknowledge_timer, start_timer};
pub use stack::call_on_stack;

static TSS: spin::Once<TaskStateSegment> = spin::Once::new();
static GDT: spin::Once<(GlobalDescriptorTable, Selectors)> = spin::Once::new();

/// The architecture-specific entry point named in the linker script.
#[unsafe(no_mangle)]
pub extern "C" fn kenter() -> ! {
    crate::kernel_main()
}

fn tss() -> &'static TaskStateSegment {
    TSS.call_once(|| {
        let mut tss = TaskStateSegment::new();
        tss.interrupt_stack_table[interrupts::DOUBLE_FAULT_IST_INDEX as usize] = {
            const STACK_SIZE: usize = 4096 * 5;
            static mut STACK: [u8; STACK_SIZE] = [0; STACK_SIZE];

            let start = VirtAddr::from_ptr(&raw const STACK);
            start + STACK_SIZE as u64
        };
        tss
    })
}

fn gdt() -> (&'static GlobalDescriptorTable, &'static Selectors) {
    let (gdt, selectors) = GDT.call_once(|| {
        let mut gdt = GlobalDescriptorTable::new();
        let code_selector = gdt.append(Descriptor::kernel_code_segment());
        let tss_selector = gdt.append(Descriptor::tss_segment(tss()));
        let selectors = Selectors {
            code_selector,
            tss_selector,
        };
        (gdt, selectors)
    });
    (gdt, selectors)
}

struct Selectors {
    code_selector: SegmentSelector,
    tss_selector: SegmentSelector,
}

pub fn init() {
    let (gdt, selectors) = gdt();
    gdt.load();
    unsafe {
        CS::set_reg(selectors.code_selector);
        load_tss(selectors.tss_selector);
    }
    interrupts::idt().load();
    log::debug!("descriptor tables loaded");
}

/// Halts the CPU for good, waking only for interrupts that are then ignored.
pub fn park() -> ! {
    loop {
        x86_64::instructions::hlt();
    }
}

pub fn disable_interrupts() {
    cpu_interrupts::disable();
}

/// Enables interrupts and halts until the next one arrives.
pub fn wait_for_interrupt() {
    cpu_interrupts::enable_and_hlt();
}

/// Runs `f` with interrupts masked, restoring the previous state afterwards.
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    cpu_interrupts::without_interrupts(f)
}
