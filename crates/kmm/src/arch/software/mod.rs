//! Software emulation implementation for testing and development.
//!
//! This module provides a software-emulated architecture that can run on any host.
//! The emulated MMU follows the AArch64 stage-1 layout with a 4 KiB granule:
//! - 48-bit virtual and physical addresses
//! - 4 levels of page tables (level 3 is the root, level 0 maps pages)
//! - 9-bit indexes (512 entries per table)
//! - 12-bit page offset (4 KiB pages)
//! - Block descriptors at levels 1 (2 MiB) and 2 (1 GiB)
//!
//! Physical memory is a host buffer of page-aligned frames, so page tables built here
//! are real tables that can be walked and inspected.

mod entry;
mod flags;
mod mmu;

use alloc::{boxed::Box, vec};
use core::ptr::NonNull;

pub use entry::PageEntry;
pub use flags::PageFlags;
pub use mmu::{activate, active_root, barrier, flush_tlb, tlb_flush_count};

/// Maximum number of bits in a physical address for software emulation.
pub const MAX_PHYSICAL_BITS: usize = 48;

/// Maximum number of bits in a virtual address for software emulation.
pub const MAX_VIRTUAL_BITS: usize = 48;

/// Page size in bytes (4 KiB = 2^12).
pub const PAGE_SIZE: usize = 4096;

/// Number of page table levels (level 3, 2, 1, 0).
pub const PAGE_TABLE_LEVELS: usize = 4;

/// Returns the page table index for a given virtual address at the specified level.
///
/// - Level 0: Bits 12-20
/// - Level 1: Bits 21-29
/// - Level 2: Bits 30-38
/// - Level 3: Bits 39-47 (root)
#[inline]
pub const fn page_index(address: usize, level: usize) -> usize {
    assert!(level < PAGE_TABLE_LEVELS, "level out of range for software emulation (0-3)");
    (address >> (12 + level * 9)) & 0x1FF
}

/// Validates a physical address for software emulation.
#[inline]
pub const fn validate_physical(addr: usize) -> bool {
    addr < (1usize << MAX_PHYSICAL_BITS)
}

/// Validates a virtual address for software emulation.
///
/// Virtual addresses must be canonical (bits 48-63 must be sign-extended from bit 47).
#[inline]
pub const fn validate_virtual(addr: usize) -> bool {
    canonicalize_virtual(addr) == addr
}

/// Canonicalizes a virtual address by sign-extending bit 47 to bits 48-63.
#[inline]
pub const fn canonicalize_virtual(addr: usize) -> usize {
    if (addr & (1 << 47)) != 0 {
        addr | 0xFFFF_0000_0000_0000
    } else {
        addr & 0x0000_FFFF_FFFF_FFFF
    }
}

#[derive(Clone, Copy)]
#[repr(C, align(4096))]
struct EmulatedFrame([u8; PAGE_SIZE]);

/// Emulated physical memory for software simulation.
///
/// Physical address `n` is byte `n` of a host buffer made of page-aligned frames, so
/// page tables and frame contents can live inside it.
pub struct EmulatedMemory {
    frames: NonNull<EmulatedFrame>,
    frame_count: usize,
}

impl EmulatedMemory {
    /// Creates a zeroed emulated memory of at least `size` bytes, rounded up to pages.
    pub fn new(size: usize) -> Self {
        let frame_count = size.div_ceil(PAGE_SIZE);
        let frames = vec![EmulatedFrame([0; PAGE_SIZE]); frame_count].into_boxed_slice();
        let frames = NonNull::from(Box::leak(frames)).cast::<EmulatedFrame>();
        Self {
            frames,
            frame_count,
        }
    }

    /// Translates a physical address to a pointer into the buffer.
    pub fn translate(&self, phys: usize) -> *mut u8 {
        assert!(phys < self.size(), "physical address out of bounds");
        // SAFETY: `phys` is within the buffer allocated in `new`.
        unsafe { self.frames.cast::<u8>().as_ptr().add(phys) }
    }

    /// Translates a pointer into the buffer back to a physical address.
    pub fn ptr_to_phys(&self, ptr: *const u8) -> usize {
        let base = self.frames.as_ptr() as usize;
        let addr = ptr as usize;
        assert!(
            addr >= base && addr < base + self.size(),
            "pointer not within emulated memory"
        );
        addr - base
    }

    /// Returns the size of the emulated memory in bytes.
    pub fn size(&self) -> usize {
        self.frame_count * PAGE_SIZE
    }
}

impl Drop for EmulatedMemory {
    fn drop(&mut self) {
        let slice = core::ptr::slice_from_raw_parts_mut(self.frames.as_ptr(), self.frame_count);
        // SAFETY: The slice was leaked from a boxed slice of exactly this length in `new`.
        drop(unsafe { Box::from_raw(slice) });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexes_use_nine_bits_per_level() {
        let addr = (0x1A3 << 39) | (0x0F0 << 30) | (0x155 << 21) | (0x0AA << 12) | 0x123;
        assert_eq!(page_index(addr, 0), 0x0AA);
        assert_eq!(page_index(addr, 1), 0x155);
        assert_eq!(page_index(addr, 2), 0x0F0);
        assert_eq!(page_index(addr, 3), 0x1A3);
    }

    #[test]
    fn canonical_addresses() {
        assert!(validate_virtual(0x0000_7FFF_FFFF_F000));
        assert!(validate_virtual(0xFFFF_8000_0000_0000));
        assert!(!validate_virtual(0x0000_8000_0000_0000));
        assert_eq!(canonicalize_virtual(0x0000_8000_0000_0000), 0xFFFF_8000_0000_0000);
    }

    #[test]
    fn emulated_memory_is_page_aligned() {
        let memory = EmulatedMemory::new(3 * PAGE_SIZE + 1);
        assert_eq!(memory.size(), 4 * PAGE_SIZE);
        let ptr = memory.translate(PAGE_SIZE);
        assert_eq!(ptr as usize % PAGE_SIZE, 0);
        assert_eq!(memory.ptr_to_phys(ptr), PAGE_SIZE);
    }

    #[test]
    #[should_panic(expected = "physical address out of bounds")]
    fn emulated_memory_rejects_out_of_bounds() {
        let memory = EmulatedMemory::new(PAGE_SIZE);
        memory.translate(PAGE_SIZE);
    }
}
