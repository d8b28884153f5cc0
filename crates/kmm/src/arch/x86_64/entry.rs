//! Page table entry for x86_64 architecture.

use x86_64::structures::paging::PageTableFlags;

use crate::{EntryKind, PhysicalAddress};

use super::flags::PageFlags;

/// A single page table entry for x86_64.
///
/// On x86_64, page table entries are 64-bit values containing a physical address
/// and various flags. The huge page bit turns a level 1 or 2 entry into a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageEntry(usize);

impl PageEntry {
    /// Physical address mask for x86_64 page table entries.
    /// Bits 12-51 contain the physical address (assuming 52-bit physical addresses).
    const ADDRESS_MASK: usize = 0x000F_FFFF_FFFF_F000;

    /// Creates an invalid entry.
    pub const fn invalid() -> Self {
        Self(0)
    }

    /// Creates an entry pointing at the next-level table at `table`.
    ///
    /// Intermediate entries are permissive; the leaf decides the effective access.
    pub fn table(table: PhysicalAddress) -> Self {
        let flags = PageTableFlags::PRESENT
            | PageTableFlags::WRITABLE
            | PageTableFlags::USER_ACCESSIBLE;
        Self(Self::output(table) | flags.bits() as usize)
    }

    /// Creates a level 0 entry mapping the page at `page`.
    pub fn page(page: PhysicalAddress, flags: PageFlags) -> Self {
        let flags = flags.inner() | PageTableFlags::PRESENT;
        Self(Self::output(page) | flags.bits() as usize)
    }

    /// Creates a level 1 or 2 entry mapping the block at `block`.
    pub fn block(block: PhysicalAddress, flags: PageFlags) -> Self {
        let flags = flags.inner() | PageTableFlags::PRESENT | PageTableFlags::HUGE_PAGE;
        Self(Self::output(block) | flags.bits() as usize)
    }

    /// Decodes the entry as it appears at `level`.
    pub fn kind(self, level: usize) -> EntryKind {
        if !self.is_valid() {
            return EntryKind::Invalid;
        }
        let huge = self.raw_flags().contains(PageTableFlags::HUGE_PAGE);
        match (level, huge) {
            (0, _) => EntryKind::Page,
            (1 | 2, true) => EntryKind::Block,
            (3, true) => EntryKind::Invalid,
            _ => EntryKind::Table,
        }
    }

    /// Returns whether the present bit is set.
    pub fn is_valid(self) -> bool {
        self.raw_flags().contains(PageTableFlags::PRESENT)
    }

    /// Returns the physical address of a present entry.
    pub fn address(self) -> Option<PhysicalAddress> {
        self.is_valid()
            .then(|| PhysicalAddress::new(self.0 & Self::ADDRESS_MASK))
    }

    /// Returns the flags for this entry.
    pub fn flags(self) -> PageFlags {
        PageFlags::from_raw(self.0 & !Self::ADDRESS_MASK)
    }

    /// Clears this entry (sets it to zero).
    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// Returns the raw usize value of this entry.
    pub const fn as_usize(self) -> usize {
        self.0
    }

    fn raw_flags(self) -> PageTableFlags {
        PageTableFlags::from_bits_truncate(self.0 as u64)
    }

    fn output(address: PhysicalAddress) -> usize {
        debug_assert!(
            address.as_usize() & 0xFFF == 0,
            "physical address must be page-aligned"
        );
        address.as_usize() & Self::ADDRESS_MASK
    }
}

impl Default for PageEntry {
    fn default() -> Self {
        Self::invalid()
    }
}
