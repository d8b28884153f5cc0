// cSpell:ignore Hhdm

use kmm::{AddressTranslator, FrameAllocator, PhysicalAddress, VirtualAddress};
use limine::{
    memory_map::EntryType,
    request::{HhdmRequest, MemoryMapRequest},
};
use linked_list_allocator::LockedHeap;

/// Size of the kernel heap carved out of physical memory at boot.
pub const HEAP_SIZE: usize = 4 * 1024 * 1024;

#[used]
#[unsafe(link_section = ".requests")]
static MEMORY_MAP_REQUEST: MemoryMapRequest = MemoryMapRequest::new();

#[used]
#[unsafe(link_section = ".requests")]
static HIGHER_HALF_DIRECT_MAP: HhdmRequest = HhdmRequest::new();

static FRAMES: FrameAllocator = FrameAllocator::new();

#[global_allocator]
static KERNEL_HEAP: LockedHeap = LockedHeap::empty();

fn type_name(entry_type: EntryType) -> &'static str {
    match entry_type {
        EntryType::USABLE => "USABLE",
        EntryType::RESERVED => "RESERVED",
        EntryType::ACPI_RECLAIMABLE => "ACPI_RECLAIMABLE",
        EntryType::ACPI_NVS => "ACPI_NVS",
        EntryType::BAD_MEMORY => "BAD_MEMORY",
        EntryType::BOOTLOADER_RECLAIMABLE => "BOOTLOADER_RECLAIMABLE",
        EntryType::EXECUTABLE_AND_MODULES => "EXECUTABLE_AND_MODULES",
        EntryType::FRAMEBUFFER => "FRAMEBUFFER",
        _ => "UNKNOWN",
    }
}

/// Installs the direct-map translator and hands every usable region of the boot memory
/// map to the frame allocator.
///
/// Regions the allocator cannot track are logged and skipped.
pub fn init_frames() -> &'static FrameAllocator {
    let direct_offset = HIGHER_HALF_DIRECT_MAP
        .get_response()
        .expect("higher-half direct map request should have been answered")
        .offset();
    AddressTranslator::set_current(AddressTranslator::hardware(direct_offset as usize));

    let entries = MEMORY_MAP_REQUEST
        .get_response()
        .expect("memory map request should have been answered")
        .entries();

    for entry in entries {
        log::trace!(
            "memory map: {:#x}..{:#x} {}",
            entry.base,
            entry.base + entry.length,
            type_name(entry.entry_type)
        );
        if entry.entry_type != EntryType::USABLE {
            continue;
        }
        let base = PhysicalAddress::new(entry.base as usize);
        if let Err(err) = FRAMES.add_region(base, entry.length as usize) {
            log::warn!("memory map: dropped region at {}: {}", base, err);
        }
    }

    &FRAMES
}

/// Backs the global allocator with a contiguous run of frames.
pub fn init_heap(frames: &FrameAllocator) {
    let base = frames.alloc(HEAP_SIZE);
    let start = VirtualAddress::direct_mapped(base);
    // SAFETY: The frames were just allocated for the heap and are reachable through the
    // direct map for the lifetime of the kernel.
    unsafe {
        KERNEL_HEAP.lock().init(start.as_mut_ptr::<u8>(), HEAP_SIZE);
    }
    log::debug!("kernel heap: {:#x} bytes at {}", HEAP_SIZE, start);
}
