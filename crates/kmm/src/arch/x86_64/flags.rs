//! Page table entry flags for x86_64 architecture.

use x86_64::structures::paging::PageTableFlags;

use crate::{MappingKind, Permissions};

/// Page table entry flags for x86_64.
///
/// This wraps the x86_64 crate's page table entry flags and exposes only the
/// attributes the memory-space manager asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFlags(PageTableFlags);

impl PageFlags {
    /// Creates empty page flags.
    pub const fn empty() -> Self {
        Self(PageTableFlags::empty())
    }

    /// Builds the attributes for a mapping with the given permissions and memory type.
    pub fn for_mapping(permissions: Permissions, kind: MappingKind) -> Self {
        let mut flags = PageTableFlags::empty();
        flags.set(PageTableFlags::WRITABLE, permissions.is_writable());
        flags.set(PageTableFlags::USER_ACCESSIBLE, permissions.is_user());
        flags.set(
            PageTableFlags::NO_EXECUTE,
            !permissions.is_executable() || kind == MappingKind::Device,
        );
        if kind == MappingKind::Device {
            flags |= PageTableFlags::NO_CACHE | PageTableFlags::WRITE_THROUGH;
        }
        Self(flags)
    }

    /// Creates flags from raw entry bits.
    pub const fn from_raw(raw: usize) -> Self {
        Self(PageTableFlags::from_bits_truncate(raw as u64))
    }

    /// Returns the raw entry bits.
    pub const fn to_raw(self) -> usize {
        self.0.bits() as usize
    }

    /// Returns whether user mode may access the page.
    pub fn is_user(self) -> bool {
        self.0.contains(PageTableFlags::USER_ACCESSIBLE)
    }

    /// Returns whether the page is writable.
    pub fn is_writable(self) -> bool {
        self.0.contains(PageTableFlags::WRITABLE)
    }

    /// Returns whether the page is executable.
    pub fn is_executable(self) -> bool {
        !self.0.contains(PageTableFlags::NO_EXECUTE)
    }

    /// Returns whether the page is uncached device memory.
    pub fn is_device(self) -> bool {
        self.0.contains(PageTableFlags::NO_CACHE)
    }

    pub(super) fn inner(self) -> PageTableFlags {
        self.0
    }
}

impl Default for PageFlags {
    fn default() -> Self {
        Self::empty()
    }
}
