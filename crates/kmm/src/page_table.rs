//! Architecture-independent page table management.
//!
//! This module provides [`RootTable`], which owns a 4-level translation table and
//! provides high-level operations for mapping and unmapping virtual address ranges.
//! Tables live in frames handed out by the [`FrameAllocator`] and are reached through
//! the address translator, so the same code runs against real memory and against the
//! emulated memory used in tests.

use core::fmt;

use crate::{
    FrameAllocator, MappingKind, Permissions, PhysicalAddress, VirtualAddress,
    arch::{self, PAGE_SIZE, PAGE_TABLE_LEVELS, PageEntry, PageFlags},
};

/// Number of entries in one page table.
pub const ENTRY_COUNT: usize = 512;

/// What a table slot holds, decoded for the level the slot lives at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Translates nothing.
    Invalid,
    /// Points to the next-level table.
    Table,
    /// Terminates translation early at level 1 or 2.
    Block,
    /// Terminates translation at level 0.
    Page,
}

/// Whether mapping over an existing translation is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwritePolicy {
    /// Every page must be unmapped; an existing translation is a programming error.
    AssertEmpty,
    /// Pages that are already mapped keep their translation.
    SkipMapped,
}

/// A decoded translation for one virtual address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    /// Physical address the virtual address translates to, including the page offset.
    pub phys: PhysicalAddress,
    /// Attributes of the page or block.
    pub flags: PageFlags,
    /// Size of the page or block that holds the translation.
    pub size: usize,
}

/// One 512-entry table of the translation hierarchy, occupying exactly one frame.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageEntry; ENTRY_COUNT],
}

impl PageTable {
    /// Returns the entry at the given index.
    ///
    /// # Panics
    /// Panics if index >= 512.
    pub fn entry(&self, index: usize) -> PageEntry {
        assert!(index < ENTRY_COUNT, "page table index out of bounds");
        self.entries[index]
    }

    /// Returns a mutable reference to the entry at the given index.
    ///
    /// # Panics
    /// Panics if index >= 512.
    pub fn entry_mut(&mut self, index: usize) -> &mut PageEntry {
        assert!(index < ENTRY_COUNT, "page table index out of bounds");
        &mut self.entries[index]
    }

    /// Returns true if no entry is valid.
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| !e.is_valid())
    }
}

const _: () = assert!(core::mem::size_of::<PageTable>() == PAGE_SIZE);

/// Returns the number of bytes one entry translates at `level`.
const fn level_size(level: usize) -> usize {
    PAGE_SIZE << (9 * level)
}

/// Reinterprets the frame at `phys` as a page table.
///
/// # Safety
///
/// `phys` must be a frame that holds a page table, and the caller must not create a
/// second live reference to the same table.
unsafe fn table_at<'a>(phys: PhysicalAddress) -> &'a mut PageTable {
    // SAFETY: Upheld by the caller; the translator maps every allocated frame.
    unsafe { &mut *VirtualAddress::direct_mapped(phys).as_mut_ptr::<PageTable>() }
}

/// The root of a translation table hierarchy.
///
/// The root and every intermediate table are frames owned by this value. They are only
/// returned to the allocator by [`RootTable::destroy`]; dropping a `RootTable` without
/// destroying it leaks its tables.
pub struct RootTable {
    root: PhysicalAddress,
}

impl RootTable {
    /// Allocates an empty root table.
    pub fn new(frames: &FrameAllocator) -> Self {
        let root = frames.alloc(PAGE_SIZE);
        log::trace!("page table: new root at {}", root);
        Self { root }
    }

    /// Returns the physical address of the root table.
    pub fn address(&self) -> PhysicalAddress {
        self.root
    }

    /// Maps `len` bytes at `virt` to the physical range starting at `phys`.
    ///
    /// The length is rounded up to whole pages. Missing intermediate tables are
    /// allocated from `frames`.
    ///
    /// # Panics
    ///
    /// Panics if either address is not page-aligned, if the frame allocator is exhausted,
    /// or if a page is already mapped and `policy` is [`OverwritePolicy::AssertEmpty`].
    #[allow(clippy::too_many_arguments)]
    #[track_caller]
    pub fn map_range(
        &mut self,
        frames: &FrameAllocator,
        phys: PhysicalAddress,
        virt: VirtualAddress,
        len: usize,
        permissions: Permissions,
        kind: MappingKind,
        policy: OverwritePolicy,
    ) {
        assert!(
            phys.is_page_aligned() && virt.is_page_aligned(),
            "map_range requires page-aligned addresses"
        );

        let flags = PageFlags::for_mapping(permissions, kind);
        for page in 0..len.div_ceil(PAGE_SIZE) {
            let offset = page * PAGE_SIZE;
            let virt = virt + offset;
            match self.leaf_or_create(frames, virt) {
                Some(entry) if !entry.is_valid() => *entry = PageEntry::page(phys + offset, flags),
                _ if policy == OverwritePolicy::SkipMapped => continue,
                _ => panic!("virtual address {} is already mapped", virt),
            }
        }

        log::trace!(
            "page table {}: mapped {} -> {} ({:#x} bytes, {}, {:?})",
            self.root,
            virt,
            phys,
            len,
            permissions,
            kind
        );
        self.sync();
    }

    /// Maps one block of `PAGE_SIZE << (9 * level)` bytes at `virt`.
    ///
    /// # Panics
    ///
    /// Panics if `level` is not 1 or 2, if either address is not aligned to the block
    /// size, or if the slot is already in use.
    #[track_caller]
    pub fn map_block(
        &mut self,
        frames: &FrameAllocator,
        phys: PhysicalAddress,
        virt: VirtualAddress,
        level: usize,
        permissions: Permissions,
        kind: MappingKind,
    ) {
        assert!(level == 1 || level == 2, "blocks exist only at levels 1 and 2");
        let size = level_size(level);
        assert!(
            phys.is_aligned(size) && virt.is_aligned(size),
            "block mapping must be aligned to its size"
        );

        // SAFETY: The root is a table owned by self.
        let mut table = unsafe { table_at(self.root) };
        for depth in ((level + 1)..PAGE_TABLE_LEVELS).rev() {
            let entry = table.entry_mut(virt.page_index(depth));
            let next = match entry.kind(depth) {
                EntryKind::Invalid => {
                    let next = frames.alloc(PAGE_SIZE);
                    *entry = PageEntry::table(next);
                    next
                }
                EntryKind::Table => entry
                    .address()
                    .unwrap_or_else(|| panic!("table entry without address")),
                _ => panic!("virtual address {} is already mapped", virt),
            };
            // SAFETY: `next` is a table frame owned by this hierarchy.
            table = unsafe { table_at(next) };
        }

        let entry = table.entry_mut(virt.page_index(level));
        assert!(!entry.is_valid(), "virtual address {} is already mapped", virt);
        *entry = PageEntry::block(phys, PageFlags::for_mapping(permissions, kind));

        log::trace!(
            "page table {}: mapped level {} block {} -> {}",
            self.root,
            level,
            virt,
            phys
        );
        self.sync();
    }

    /// Removes every translation in `len` bytes at `virt`.
    ///
    /// Unmapped pages are skipped, so unmapping the same range twice is harmless. Any
    /// intermediate table left without valid entries is returned to `frames`; the root is
    /// never freed.
    ///
    /// # Panics
    ///
    /// Panics if `virt` is not page-aligned, if the range wraps past the top of the
    /// address space or if it covers only part of a block.
    #[track_caller]
    pub fn unmap_range(&mut self, frames: &FrameAllocator, virt: VirtualAddress, len: usize) {
        assert!(virt.is_page_aligned(), "unmap_range requires a page-aligned address");
        if len == 0 {
            return;
        }

        // Inclusive, so a range ending at the top of the address space does not wrap.
        let last = len
            .checked_next_multiple_of(PAGE_SIZE)
            .and_then(|len| virt.as_usize().checked_add(len - 1))
            .unwrap_or_else(|| panic!("unmap of {} (+{:#x}) wraps the address space", virt, len));
        let mut at = virt.as_usize();
        loop {
            let step = self.unmap_one(frames, VirtualAddress::new(at), last);
            match at.checked_add(step) {
                Some(next) if next <= last => at = next,
                _ => break,
            }
        }

        log::trace!("page table {}: unmapped {} (+{:#x})", self.root, virt, len);
        self.sync();
    }

    /// Translates `virt` without modifying the hierarchy.
    pub fn walk(&self, virt: VirtualAddress) -> Option<PhysicalAddress> {
        self.lookup(virt).map(|m| m.phys)
    }

    /// Decodes the full translation of `virt`, including its attributes.
    pub fn lookup(&self, virt: VirtualAddress) -> Option<Mapping> {
        let mut table = self.root;
        for level in (0..PAGE_TABLE_LEVELS).rev() {
            // SAFETY: Only a shared read of a table owned by self.
            let entry = unsafe { table_at(table) }.entry(virt.page_index(level));
            match entry.kind(level) {
                EntryKind::Invalid => return None,
                EntryKind::Table => table = entry.address()?,
                EntryKind::Block | EntryKind::Page => {
                    let size = level_size(level);
                    return Some(Mapping {
                        phys: entry.address()? + (virt.as_usize() & (size - 1)),
                        flags: entry.flags(),
                        size,
                    });
                }
            }
        }
        None
    }

    /// Returns the number of table frames in the hierarchy, root included.
    pub fn table_count(&self) -> usize {
        fn count(table: PhysicalAddress, level: usize) -> usize {
            if level == 0 {
                return 1;
            }
            // SAFETY: Only a shared read of a table owned by the hierarchy.
            let table = unsafe { table_at(table) };
            1 + (0..ENTRY_COUNT)
                .map(|i| table.entry(i))
                .filter(|e| e.kind(level) == EntryKind::Table)
                .filter_map(|e| e.address())
                .map(|next| count(next, level - 1))
                .sum::<usize>()
        }
        count(self.root, PAGE_TABLE_LEVELS - 1)
    }

    /// Returns true if this hierarchy is the one the MMU is using.
    pub fn is_active(&self) -> bool {
        arch::active_root() == Some(self.root)
    }

    /// Installs this hierarchy into the MMU.
    ///
    /// # Safety
    ///
    /// The hierarchy must map everything the kernel touches after the switch, including
    /// the currently executing code and stack.
    pub unsafe fn activate(&self) {
        // SAFETY: Forwarded to the caller.
        unsafe { arch::activate(self.root) };
    }

    /// Frees every table of the hierarchy, root included.
    ///
    /// The frames that leaf entries point to are not owned by the table and are left
    /// alone.
    pub fn destroy(self, frames: &FrameAllocator) {
        fn release(frames: &FrameAllocator, table: PhysicalAddress, level: usize) {
            if level > 0 {
                // SAFETY: The hierarchy is being consumed; nothing else refers to it.
                let entries = unsafe { table_at(table) };
                for i in 0..ENTRY_COUNT {
                    let entry = entries.entry(i);
                    if entry.kind(level) == EntryKind::Table {
                        if let Some(next) = entry.address() {
                            release(frames, next, level - 1);
                        }
                    }
                }
            }
            frames.free(table);
        }

        log::trace!("page table {}: destroyed", self.root);
        release(frames, self.root, PAGE_TABLE_LEVELS - 1);
    }

    /// Returns the level 0 entry for `virt`, creating intermediate tables as needed.
    ///
    /// Returns `None` when a block already translates `virt`.
    fn leaf_or_create(
        &mut self,
        frames: &FrameAllocator,
        virt: VirtualAddress,
    ) -> Option<&mut PageEntry> {
        // SAFETY: The root is a table owned by self, borrowed mutably through &mut self.
        let mut table = unsafe { table_at(self.root) };
        for level in (1..PAGE_TABLE_LEVELS).rev() {
            let entry = table.entry_mut(virt.page_index(level));
            match entry.kind(level) {
                EntryKind::Invalid => *entry = PageEntry::table(frames.alloc(PAGE_SIZE)),
                EntryKind::Table => {}
                EntryKind::Block | EntryKind::Page => return None,
            }
            // SAFETY: The entry points at a table frame owned by this hierarchy.
            table = unsafe { table_at(entry.address()?) };
        }
        Some(table.entry_mut(virt.page_index(0)))
    }

    /// Clears the translation containing `virt` and returns how far to advance.
    fn unmap_one(&mut self, frames: &FrameAllocator, virt: VirtualAddress, last: usize) -> usize {
        let mut path = [(self.root, 0usize); PAGE_TABLE_LEVELS];
        let mut table = self.root;

        for (depth, level) in (0..PAGE_TABLE_LEVELS).rev().enumerate() {
            let index = virt.page_index(level);
            path[depth] = (table, index);
            // SAFETY: `table` is a frame of this hierarchy, borrowed through &mut self.
            let entries = unsafe { table_at(table) };
            let entry = entries.entry(index);
            let size = level_size(level);

            match entry.kind(level) {
                EntryKind::Invalid => return size - (virt.as_usize() & (size - 1)),
                EntryKind::Table => match entry.address() {
                    Some(next) => table = next,
                    None => return size,
                },
                EntryKind::Block | EntryKind::Page => {
                    assert!(
                        virt.is_aligned(size) && virt.as_usize() + (size - 1) <= last,
                        "unmap of {} covers only part of a block mapping",
                        virt
                    );
                    entries.entry_mut(index).clear();
                    self.release_empty(frames, &path[..=depth]);
                    return size;
                }
            }
        }
        PAGE_SIZE
    }

    /// Frees the deepest tables of `path` that no longer hold a valid entry.
    fn release_empty(&mut self, frames: &FrameAllocator, path: &[(PhysicalAddress, usize)]) {
        for depth in (1..path.len()).rev() {
            let (table, _) = path[depth];
            // SAFETY: `table` is a non-root frame of this hierarchy.
            if !unsafe { table_at(table) }.is_empty() {
                break;
            }
            let (parent, index) = path[depth - 1];
            // SAFETY: `parent` is a frame of this hierarchy, distinct from `table`.
            unsafe { table_at(parent) }.entry_mut(index).clear();
            frames.free(table);
        }
    }

    fn sync(&self) {
        arch::barrier();
        if self.is_active() {
            arch::flush_tlb();
        }
    }
}

impl fmt::Debug for RootTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootTable").field("root", &self.root).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AddressTranslator, tlb_flush_count};

    fn setup() -> FrameAllocator {
        let _ = std::panic::catch_unwind(|| {
            AddressTranslator::set_current(AddressTranslator::emulated(0x40_0000));
        });
        let frames = FrameAllocator::new();
        frames
            .add_region(PhysicalAddress::new(0x10_0000), 0x30_0000)
            .unwrap();
        frames
    }

    fn map(
        table: &mut RootTable,
        frames: &FrameAllocator,
        phys: usize,
        virt: usize,
        len: usize,
        policy: OverwritePolicy,
    ) {
        table.map_range(
            frames,
            PhysicalAddress::new(phys),
            VirtualAddress::new(virt),
            len,
            Permissions::KernelReadWrite,
            MappingKind::Memory,
            policy,
        );
    }

    #[test]
    fn walk_returns_page_base_plus_offset() {
        let frames = setup();
        let mut table = RootTable::new(&frames);
        map(&mut table, &frames, 0x1000, 0x2000_0000, PAGE_SIZE, OverwritePolicy::AssertEmpty);

        assert_eq!(
            table.walk(VirtualAddress::new(0x2000_0000 + 0x123)),
            Some(PhysicalAddress::new(0x1123))
        );
        assert_eq!(table.walk(VirtualAddress::new(0x2000_1000)), None);
    }

    #[test]
    fn every_page_of_a_range_translates() {
        let frames = setup();
        let mut table = RootTable::new(&frames);
        // Crosses a level 1 boundary at 0x4020_0000.
        let virt = 0x401F_C000;
        let phys = 0x8000_0000;
        let pages = 8;
        map(&mut table, &frames, phys, virt, pages * PAGE_SIZE, OverwritePolicy::AssertEmpty);

        for page in 0..pages {
            let offset = page * PAGE_SIZE + 0x10;
            assert_eq!(
                table.walk(VirtualAddress::new(virt + offset)),
                Some(PhysicalAddress::new(phys + offset))
            );
        }
        // Root, one level 2, one level 1, two level 0 tables.
        assert_eq!(table.table_count(), 5);
    }

    #[test]
    fn unmap_frees_tables_and_is_idempotent() {
        let frames = setup();
        let mut table = RootTable::new(&frames);
        let free_before = frames.free_memory();

        let virt = VirtualAddress::new(0x7000_0000);
        map(&mut table, &frames, 0x5000, virt.as_usize(), 3 * PAGE_SIZE, OverwritePolicy::AssertEmpty);
        assert_eq!(table.table_count(), 4);

        table.unmap_range(&frames, virt, 3 * PAGE_SIZE);
        for page in 0..3 {
            assert_eq!(table.walk(virt + page * PAGE_SIZE), None);
        }
        assert_eq!(table.table_count(), 1);
        assert_eq!(frames.free_memory(), free_before);

        table.unmap_range(&frames, virt, 3 * PAGE_SIZE);
        assert_eq!(table.table_count(), 1);
    }

    #[test]
    fn unmap_reaches_the_top_of_the_address_space() {
        let frames = setup();
        let mut table = RootTable::new(&frames);
        let top = VirtualAddress::new(usize::MAX - (2 * PAGE_SIZE - 1));
        map(&mut table, &frames, 0x5000, top.as_usize(), 2 * PAGE_SIZE, OverwritePolicy::AssertEmpty);
        assert!(table.walk(top + PAGE_SIZE).is_some());

        table.unmap_range(&frames, top, 2 * PAGE_SIZE);
        assert_eq!(table.walk(top), None);
        assert_eq!(table.walk(top + PAGE_SIZE), None);
        assert_eq!(table.table_count(), 1);
    }

    #[test]
    fn partial_unmap_keeps_shared_tables() {
        let frames = setup();
        let mut table = RootTable::new(&frames);
        let virt = VirtualAddress::new(0x7000_0000);
        map(&mut table, &frames, 0x5000, virt.as_usize(), 2 * PAGE_SIZE, OverwritePolicy::AssertEmpty);

        table.unmap_range(&frames, virt, PAGE_SIZE);
        assert_eq!(table.walk(virt), None);
        assert_eq!(table.walk(virt + PAGE_SIZE), Some(PhysicalAddress::new(0x6000)));
        assert_eq!(table.table_count(), 4);
    }

    #[test]
    #[should_panic(expected = "is already mapped")]
    fn assert_empty_detects_overlap() {
        let frames = setup();
        let mut table = RootTable::new(&frames);
        map(&mut table, &frames, 0x1000, 0x2000_0000, PAGE_SIZE, OverwritePolicy::AssertEmpty);
        map(&mut table, &frames, 0x9000, 0x2000_0000, PAGE_SIZE, OverwritePolicy::AssertEmpty);
    }

    #[test]
    fn skip_mapped_keeps_existing_translation() {
        let frames = setup();
        let mut table = RootTable::new(&frames);
        map(&mut table, &frames, 0x1000, 0x2000_0000, PAGE_SIZE, OverwritePolicy::AssertEmpty);
        map(&mut table, &frames, 0x9000, 0x2000_0000, 2 * PAGE_SIZE, OverwritePolicy::SkipMapped);

        assert_eq!(table.walk(VirtualAddress::new(0x2000_0000)), Some(PhysicalAddress::new(0x1000)));
        assert_eq!(table.walk(VirtualAddress::new(0x2000_1000)), Some(PhysicalAddress::new(0xA000)));
    }

    #[test]
    fn device_mappings_are_uncached_and_never_executable() {
        let frames = setup();
        let mut table = RootTable::new(&frames);
        table.map_range(
            &frames,
            PhysicalAddress::new(0x0900_0000),
            VirtualAddress::new(0xFFFF_8000_0900_0000),
            PAGE_SIZE,
            Permissions::KernelReadWrite,
            MappingKind::Device,
            OverwritePolicy::SkipMapped,
        );

        let mapping = table
            .lookup(VirtualAddress::new(0xFFFF_8000_0900_0004))
            .unwrap();
        assert_eq!(mapping.phys, PhysicalAddress::new(0x0900_0004));
        assert_eq!(mapping.size, PAGE_SIZE);
        assert!(mapping.flags.is_device());
        assert!(!mapping.flags.is_executable());
        assert!(!mapping.flags.is_user());
    }

    #[test]
    fn block_mappings_translate_with_offset() {
        let frames = setup();
        let mut table = RootTable::new(&frames);
        table.map_block(
            &frames,
            PhysicalAddress::new(0x4000_0000),
            VirtualAddress::new(0x20_0000),
            1,
            Permissions::KernelReadExecute,
            MappingKind::Memory,
        );

        let mapping = table.lookup(VirtualAddress::new(0x21_2345)).unwrap();
        assert_eq!(mapping.phys, PhysicalAddress::new(0x4001_2345));
        assert_eq!(mapping.size, 0x20_0000);
        assert!(mapping.flags.is_executable());

        table.unmap_range(&frames, VirtualAddress::new(0x20_0000), 0x20_0000);
        assert_eq!(table.walk(VirtualAddress::new(0x21_2345)), None);
        assert_eq!(table.table_count(), 1);
    }

    #[test]
    #[should_panic(expected = "covers only part of a block mapping")]
    fn partial_block_unmap_is_fatal() {
        let frames = setup();
        let mut table = RootTable::new(&frames);
        table.map_block(
            &frames,
            PhysicalAddress::new(0x4000_0000),
            VirtualAddress::new(0x20_0000),
            1,
            Permissions::KernelRead,
            MappingKind::Memory,
        );
        table.unmap_range(&frames, VirtualAddress::new(0x20_0000), PAGE_SIZE);
    }

    #[test]
    fn pages_under_a_block_are_skipped() {
        let frames = setup();
        let mut table = RootTable::new(&frames);
        table.map_block(
            &frames,
            PhysicalAddress::new(0x4000_0000),
            VirtualAddress::new(0x20_0000),
            1,
            Permissions::KernelRead,
            MappingKind::Memory,
        );
        map(&mut table, &frames, 0x1000, 0x20_0000, PAGE_SIZE, OverwritePolicy::SkipMapped);
        assert_eq!(table.walk(VirtualAddress::new(0x20_0000)), Some(PhysicalAddress::new(0x4000_0000)));
    }

    #[test]
    fn only_the_active_table_flushes_the_tlb() {
        let frames = setup();
        let mut active = RootTable::new(&frames);
        let mut inactive = RootTable::new(&frames);
        unsafe { active.activate() };
        assert!(active.is_active());

        let before = tlb_flush_count();
        map(&mut inactive, &frames, 0x1000, 0x1000, PAGE_SIZE, OverwritePolicy::AssertEmpty);
        assert_eq!(tlb_flush_count(), before);

        map(&mut active, &frames, 0x1000, 0x1000, PAGE_SIZE, OverwritePolicy::AssertEmpty);
        active.unmap_range(&frames, VirtualAddress::new(0x1000), PAGE_SIZE);
        assert_eq!(tlb_flush_count(), before + 2);
    }

    #[test]
    fn destroy_returns_every_table() {
        let frames = setup();
        let free_before = frames.free_memory();
        let mut table = RootTable::new(&frames);
        map(&mut table, &frames, 0x1000, 0x1000, PAGE_SIZE, OverwritePolicy::AssertEmpty);
        map(&mut table, &frames, 0x1000, 0x80_0000_0000, PAGE_SIZE, OverwritePolicy::AssertEmpty);
        assert_eq!(table.table_count(), 7);

        table.destroy(&frames);
        assert_eq!(frames.free_memory(), free_before);
    }
}
