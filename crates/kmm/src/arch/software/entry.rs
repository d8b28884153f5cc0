//! Translation descriptor for software emulation.

use crate::{EntryKind, PhysicalAddress};

use super::flags::PageFlags;

/// A single emulated translation descriptor.
///
/// The entry format:
/// - Bit 0: Valid
/// - Bit 1: Table (levels 1-3) or page (level 0); clear at levels 1-2 means block
/// - Bits 2-11: Lower attributes (see [`PageFlags`])
/// - Bits 12-47: Output address
/// - Bits 52-54: Upper attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageEntry(usize);

impl PageEntry {
    const VALID: usize = 1 << 0;
    const TABLE_OR_PAGE: usize = 1 << 1;
    const ADDRESS_MASK: usize = 0x0000_FFFF_FFFF_F000;

    /// Creates an invalid entry.
    pub const fn invalid() -> Self {
        Self(0)
    }

    /// Creates an entry pointing at the next-level table at `table`.
    pub fn table(table: PhysicalAddress) -> Self {
        Self(Self::output(table) | Self::VALID | Self::TABLE_OR_PAGE)
    }

    /// Creates a level 0 entry mapping the page at `page`.
    pub fn page(page: PhysicalAddress, flags: PageFlags) -> Self {
        Self(
            Self::output(page)
                | flags.to_raw()
                | PageFlags::ACCESSED
                | Self::VALID
                | Self::TABLE_OR_PAGE,
        )
    }

    /// Creates a level 1 or 2 entry mapping the block at `block`.
    pub fn block(block: PhysicalAddress, flags: PageFlags) -> Self {
        Self(Self::output(block) | flags.to_raw() | PageFlags::ACCESSED | Self::VALID)
    }

    /// Decodes the entry as it appears at `level`.
    pub fn kind(self, level: usize) -> EntryKind {
        if !self.is_valid() {
            return EntryKind::Invalid;
        }
        let table_bit = self.0 & Self::TABLE_OR_PAGE != 0;
        match (level, table_bit) {
            (0, true) => EntryKind::Page,
            (1 | 2, false) => EntryKind::Block,
            (1..=3, true) => EntryKind::Table,
            // Reserved encodings translate nothing.
            _ => EntryKind::Invalid,
        }
    }

    /// Returns whether the valid bit is set.
    pub fn is_valid(self) -> bool {
        self.0 & Self::VALID != 0
    }

    /// Returns the output address of a valid entry.
    pub fn address(self) -> Option<PhysicalAddress> {
        self.is_valid()
            .then(|| PhysicalAddress::new(self.0 & Self::ADDRESS_MASK))
    }

    /// Returns the attribute bits of this entry.
    pub fn flags(self) -> PageFlags {
        PageFlags::from_raw(self.0)
    }

    /// Clears this entry.
    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// Returns the raw descriptor.
    pub const fn as_usize(self) -> usize {
        self.0
    }

    fn output(address: PhysicalAddress) -> usize {
        debug_assert!(
            address.as_usize() & 0xFFF == 0,
            "output address must be page-aligned"
        );
        address.as_usize() & Self::ADDRESS_MASK
    }
}

impl Default for PageEntry {
    fn default() -> Self {
        Self::invalid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MappingKind, Permissions};

    #[test]
    fn table_entries_decode_as_tables_above_level_zero() {
        let entry = PageEntry::table(PhysicalAddress::new(0x4000));
        assert_eq!(entry.kind(3), EntryKind::Table);
        assert_eq!(entry.kind(1), EntryKind::Table);
        assert_eq!(entry.address(), Some(PhysicalAddress::new(0x4000)));
    }

    #[test]
    fn block_entries_only_at_levels_one_and_two() {
        let flags = PageFlags::for_mapping(Permissions::KernelReadWrite, MappingKind::Memory);
        let entry = PageEntry::block(PhysicalAddress::new(0x20_0000), flags);
        assert_eq!(entry.kind(1), EntryKind::Block);
        assert_eq!(entry.kind(2), EntryKind::Block);
        assert_eq!(entry.kind(3), EntryKind::Invalid);
        assert_eq!(entry.kind(0), EntryKind::Invalid);
    }

    #[test]
    fn page_keeps_flags_and_address() {
        let flags = PageFlags::for_mapping(Permissions::UserReadWrite, MappingKind::Memory);
        let entry = PageEntry::page(PhysicalAddress::new(0x1234_5000), flags);
        assert_eq!(entry.kind(0), EntryKind::Page);
        assert_eq!(entry.address(), Some(PhysicalAddress::new(0x1234_5000)));
        assert!(entry.flags().is_user());
        assert!(entry.flags().is_writable());
    }

    #[test]
    fn cleared_entry_is_invalid() {
        let mut entry = PageEntry::table(PhysicalAddress::new(0x4000));
        entry.clear();
        assert_eq!(entry, PageEntry::invalid());
        assert_eq!(entry.address(), None);
    }
}
