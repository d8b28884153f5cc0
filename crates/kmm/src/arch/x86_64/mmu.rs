//! Control of the x86_64 MMU through CR3 and the TLB.

use x86_64::{
    PhysAddr,
    instructions::tlb,
    registers::control::{Cr3, Cr3Flags},
    structures::paging::PhysFrame,
};

use crate::PhysicalAddress;

/// Activates the page table rooted at `root` by loading it into CR3.
///
/// # Safety
/// Loading an invalid page table causes undefined behavior, including memory
/// corruption and system crashes. The caller must ensure:
/// - The page table correctly maps all memory that will be accessed
/// - The kernel is properly mapped
/// - The page table itself is mapped
pub unsafe fn activate(root: PhysicalAddress) {
    let frame = PhysFrame::containing_address(PhysAddr::new(root.as_usize() as u64));
    // SAFETY: Caller must ensure the page table is valid
    unsafe {
        Cr3::write(frame, Cr3Flags::empty());
    }
}

/// Returns the root of the page table currently loaded in CR3.
pub fn active_root() -> Option<PhysicalAddress> {
    let (frame, _) = Cr3::read();
    Some(PhysicalAddress::new(frame.start_address().as_u64() as usize))
}

/// Flushes every non-global TLB entry.
pub fn flush_tlb() {
    tlb::flush_all();
}

/// Orders page table writes before subsequent translations.
///
/// x86_64 page walks observe prior stores in program order; only the compiler has to be
/// kept from reordering.
pub fn barrier() {
    core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
}
