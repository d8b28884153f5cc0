//! Address spaces as staged logs of mapping entries.
//!
//! A [`MemorySpace`] never touches its page tables when entries are added or removed.
//! Changes are queued and reconciled in one pass by [`MemorySpace::build`], so callers
//! can batch many changes between builds. Cache entries are the exception: they are
//! populated page by page from [`MemorySpace::handle_fault`], which performs a partial
//! build restricted to the faulting entry.

use alloc::{boxed::Box, collections::BTreeMap, vec::Vec};
use core::{fmt, panic::Location};

use crate::{
    AllocError, FrameAllocator, MappingKind, OverwritePolicy, PAGE_SIZE, Permissions,
    PhysicalAddress, RootTable, VirtualAddress, VirtualRange,
};

/// Errors a memory space reports to the requesting task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    /// The entry's range overlaps an entry already in the space.
    Overlap,
    /// The dynamic region cursor would cross the space's ceiling.
    OutOfVirtualSpace,
    /// No physical memory was available for the request.
    OutOfMemory,
    /// No entry covers the address.
    NotMapped,
    /// The address is mapped but the access cannot be satisfied.
    AccessViolation,
    /// A zero-length region was requested.
    EmptyRange,
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::Overlap => write!(f, "range overlaps an existing entry"),
            MemoryError::OutOfVirtualSpace => write!(f, "out of virtual address space"),
            MemoryError::OutOfMemory => write!(f, "out of physical memory"),
            MemoryError::NotMapped => write!(f, "address is not mapped"),
            MemoryError::AccessViolation => write!(f, "access violation"),
            MemoryError::EmptyRange => write!(f, "empty range"),
        }
    }
}

impl From<AllocError> for MemoryError {
    fn from(_: AllocError) -> Self {
        MemoryError::OutOfMemory
    }
}

/// Supplies the pages of a cache entry on first touch.
pub trait CachePopulator: Send {
    /// Returns a newly allocated frame holding the contents of the page at `offset`
    /// bytes into the entry. The frame becomes owned by the entry.
    fn populate(
        &mut self,
        frames: &FrameAllocator,
        offset: usize,
    ) -> Result<PhysicalAddress, MemoryError>;
}

/// What a mapping entry translates to.
pub enum Backing {
    /// A contiguous physical range. Owned ranges are freed with the entry.
    Physical { phys: PhysicalAddress, owned: bool },
    /// Device registers, mapped uncached and never executable.
    Device { phys: PhysicalAddress },
    /// A downward-growing stack. `[limit, base)` is committed and backed by `phys`;
    /// the entry reserves `[max_limit, base)` for growth.
    Stack {
        base: VirtualAddress,
        limit: VirtualAddress,
        max_limit: VirtualAddress,
        phys: PhysicalAddress,
    },
    /// Pages populated on demand, keyed by page index within the entry.
    Cache {
        pages: BTreeMap<usize, PhysicalAddress>,
        populator: Box<dyn CachePopulator>,
    },
}

impl fmt::Debug for Backing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backing::Physical { phys, owned } => f
                .debug_struct("Physical")
                .field("phys", phys)
                .field("owned", owned)
                .finish(),
            Backing::Device { phys } => f.debug_struct("Device").field("phys", phys).finish(),
            Backing::Stack {
                base,
                limit,
                max_limit,
                phys,
            } => f
                .debug_struct("Stack")
                .field("base", base)
                .field("limit", limit)
                .field("max_limit", max_limit)
                .field("phys", phys)
                .finish(),
            Backing::Cache { pages, .. } => f
                .debug_struct("Cache")
                .field("populated", &pages.len())
                .finish_non_exhaustive(),
        }
    }
}

/// One virtual range of a memory space and what backs it.
#[derive(Debug)]
pub struct MemoryEntry {
    range: VirtualRange,
    permissions: Permissions,
    origin: &'static Location<'static>,
    backing: Backing,
}

impl MemoryEntry {
    /// Maps `len` bytes of caller-owned physical memory at `virt`.
    #[track_caller]
    pub fn physical(
        phys: PhysicalAddress,
        virt: VirtualAddress,
        len: usize,
        permissions: Permissions,
    ) -> Self {
        Self::new(
            VirtualRange::new(virt, page_round(len)),
            permissions,
            Backing::Physical { phys, owned: false },
        )
    }

    /// Like [`MemoryEntry::physical`], but the frames are freed when the entry is
    /// removed or the space is torn down.
    #[track_caller]
    pub fn owned_physical(
        phys: PhysicalAddress,
        virt: VirtualAddress,
        len: usize,
        permissions: Permissions,
    ) -> Self {
        Self::new(
            VirtualRange::new(virt, page_round(len)),
            permissions,
            Backing::Physical { phys, owned: true },
        )
    }

    /// Allocates `len` bytes of zeroed frames and maps them at `virt`.
    #[track_caller]
    pub fn allocate(
        frames: &FrameAllocator,
        virt: VirtualAddress,
        len: usize,
        permissions: Permissions,
    ) -> Result<Self, MemoryError> {
        let phys = frames.try_alloc(len)?;
        Ok(Self::owned_physical(phys, virt, len, permissions))
    }

    /// Maps device registers at `virt`.
    ///
    /// # Panics
    ///
    /// Panics if `permissions` allow execution.
    #[track_caller]
    pub fn device(
        phys: PhysicalAddress,
        virt: VirtualAddress,
        len: usize,
        permissions: Permissions,
    ) -> Self {
        assert!(
            !permissions.is_executable(),
            "device memory cannot be executable"
        );
        Self::new(
            VirtualRange::new(virt, page_round(len)),
            permissions,
            Backing::Device { phys },
        )
    }

    /// Reserves `reserved` for a stack growing down from its end and commits the top
    /// `committed` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `permissions` allow execution or if `committed` exceeds the reservation.
    #[track_caller]
    pub fn stack(
        frames: &FrameAllocator,
        reserved: VirtualRange,
        committed: usize,
        permissions: Permissions,
    ) -> Result<Self, MemoryError> {
        assert!(!permissions.is_executable(), "stacks cannot be executable");
        let committed = page_round(committed);
        assert!(
            committed > 0 && committed <= reserved.len(),
            "stack commitment does not fit its reservation"
        );

        let phys = frames.try_alloc(committed)?;
        let base = reserved.end();
        Ok(Self::new(
            reserved,
            permissions,
            Backing::Stack {
                base,
                limit: base - committed,
                max_limit: reserved.start(),
                phys,
            },
        ))
    }

    /// Creates a range whose pages are supplied by `populator` on first access.
    #[track_caller]
    pub fn cache(
        range: VirtualRange,
        permissions: Permissions,
        populator: Box<dyn CachePopulator>,
    ) -> Self {
        Self::new(
            range,
            permissions,
            Backing::Cache {
                pages: BTreeMap::new(),
                populator,
            },
        )
    }

    #[track_caller]
    fn new(range: VirtualRange, permissions: Permissions, backing: Backing) -> Self {
        assert!(
            range.start().is_page_aligned(),
            "memory entries must start on a page boundary"
        );
        Self {
            range,
            permissions,
            origin: Location::caller(),
            backing,
        }
    }

    pub fn range(&self) -> VirtualRange {
        self.range
    }

    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    /// Returns the source location that created the entry.
    pub fn origin(&self) -> &'static Location<'static> {
        self.origin
    }

    pub fn backing(&self) -> &Backing {
        &self.backing
    }

    fn map(&self, root: &mut RootTable, frames: &FrameAllocator, policy: OverwritePolicy) {
        let start = self.range.start();
        match &self.backing {
            Backing::Physical { phys, .. } => root.map_range(
                frames,
                *phys,
                start,
                self.range.len(),
                self.permissions,
                MappingKind::Memory,
                policy,
            ),
            Backing::Device { phys } => root.map_range(
                frames,
                *phys,
                start,
                self.range.len(),
                self.permissions,
                MappingKind::Device,
                policy,
            ),
            Backing::Stack {
                base, limit, phys, ..
            } => root.map_range(
                frames,
                *phys,
                *limit,
                *base - *limit,
                self.permissions,
                MappingKind::Memory,
                policy,
            ),
            Backing::Cache { pages, .. } => {
                for (&index, &phys) in pages {
                    root.map_range(
                        frames,
                        phys,
                        start + index * PAGE_SIZE,
                        PAGE_SIZE,
                        self.permissions,
                        MappingKind::Memory,
                        policy,
                    );
                }
            }
        }
    }

    fn release(self, frames: &FrameAllocator) {
        match self.backing {
            Backing::Physical { phys, owned: true } | Backing::Stack { phys, .. } => {
                frames.free(phys)
            }
            Backing::Cache { pages, .. } => pages.into_values().for_each(|phys| frames.free(phys)),
            Backing::Physical { owned: false, .. } | Backing::Device { .. } => {}
        }
    }
}

/// The regions of the virtual address space a memory space hands out dynamically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceLayout {
    /// First address the dynamic region cursor starts from.
    pub dynamic_base: VirtualAddress,
    /// Address the cursor may not pass.
    pub ceiling: VirtualAddress,
}

impl SpaceLayout {
    /// Layout of a user task's space: the upper half of the lower canonical range.
    pub const USER: SpaceLayout = SpaceLayout::new(
        VirtualAddress::new(0x0000_4000_0000_0000),
        VirtualAddress::new(0x0000_7FFF_0000_0000),
    );

    /// Layout of the kernel space, clear of the direct map and the kernel image.
    pub const KERNEL: SpaceLayout = SpaceLayout::new(
        VirtualAddress::new(0xFFFF_A000_0000_0000),
        VirtualAddress::new(0xFFFF_C000_0000_0000),
    );

    pub const fn new(dynamic_base: VirtualAddress, ceiling: VirtualAddress) -> Self {
        assert!(
            ceiling.as_usize() > dynamic_base.as_usize(),
            "space ceiling must lie above the dynamic base"
        );
        Self {
            dynamic_base,
            ceiling,
        }
    }
}

/// An address space: live entries, staged changes and the page tables they build.
pub struct MemorySpace {
    root: RootTable,
    live: Vec<MemoryEntry>,
    pending_add: Vec<MemoryEntry>,
    pending_remove: Vec<VirtualAddress>,
    pending_refresh: Vec<VirtualAddress>,
    cursor: VirtualAddress,
    ceiling: VirtualAddress,
}

impl MemorySpace {
    /// Creates an empty space with a freshly allocated root table.
    pub fn new(frames: &FrameAllocator, layout: SpaceLayout) -> Self {
        let root = RootTable::new(frames);
        log::debug!("memory space {}: created", root.address());
        Self {
            root,
            live: Vec::new(),
            pending_add: Vec::new(),
            pending_remove: Vec::new(),
            pending_refresh: Vec::new(),
            cursor: layout.dynamic_base,
            ceiling: layout.ceiling,
        }
    }

    /// Checks that `range` is free once staged removals and additions are applied.
    ///
    /// Callers that must allocate frames for an entry check here first, since an entry
    /// rejected by [`MemorySpace::add_entry`] is dropped without releasing its frames.
    pub fn check_free(&self, range: VirtualRange) -> Result<(), MemoryError> {
        match self.entries_after_removal().find(|e| e.range.overlaps(range)) {
            Some(existing) => {
                log::debug!(
                    "memory space {}: {:?} overlaps {:?} from {}",
                    self.root.address(),
                    range,
                    existing.range,
                    existing.origin
                );
                Err(MemoryError::Overlap)
            }
            None => Ok(()),
        }
    }

    /// Stages `entry` for the next build.
    pub fn add_entry(&mut self, entry: MemoryEntry) -> Result<(), MemoryError> {
        self.check_free(entry.range)?;
        log::trace!(
            "memory space {}: staged {:?} {} {:?}",
            self.root.address(),
            entry.range,
            entry.permissions,
            entry.backing
        );
        self.pending_add.push(entry);
        Ok(())
    }

    /// Stages `entry` unless an existing entry already covers its range.
    ///
    /// Returns whether the entry was staged. Partial overlaps are still rejected.
    pub fn add_entry_ignoring_duplicates(
        &mut self,
        entry: MemoryEntry,
    ) -> Result<bool, MemoryError> {
        if self.entries_after_removal().any(|e| e.range.covers(entry.range)) {
            log::trace!(
                "memory space {}: {:?} already mapped",
                self.root.address(),
                entry.range
            );
            return Ok(false);
        }
        self.add_entry(entry).map(|()| true)
    }

    /// Stages removal of the live entry starting at `start`.
    pub fn remove_entry(&mut self, start: VirtualAddress) {
        self.pending_remove.push(start);
    }

    /// Stages a remap of the populated pages of the cache entry starting at `start`.
    pub fn refresh_cache(&mut self, start: VirtualAddress) {
        self.pending_refresh.push(start);
    }

    /// Returns true if changes are waiting for a build.
    pub fn has_pending(&self) -> bool {
        !(self.pending_add.is_empty()
            && self.pending_remove.is_empty()
            && self.pending_refresh.is_empty())
    }

    /// Reconciles staged changes into the page tables and returns the root.
    ///
    /// Removals are applied first, then additions, then cache refreshes.
    ///
    /// # Panics
    ///
    /// Panics if a staged removal or refresh names an address where no live entry
    /// starts, or if an addition maps over an existing translation.
    #[track_caller]
    pub fn build(&mut self, frames: &FrameAllocator) -> PhysicalAddress {
        for start in core::mem::take(&mut self.pending_remove) {
            let index = self.live_index(start);
            let entry = self.live.remove(index);
            self.root.unmap_range(frames, entry.range.start(), entry.range.len());
            log::trace!("memory space {}: removed {:?}", self.root.address(), entry.range);
            entry.release(frames);
        }

        for entry in core::mem::take(&mut self.pending_add) {
            entry.map(&mut self.root, frames, OverwritePolicy::AssertEmpty);
            self.live.push(entry);
        }

        self.apply_refreshes(frames);

        log::debug!(
            "memory space {}: built with {} live entries",
            self.root.address(),
            self.live.len()
        );
        self.root.address()
    }

    /// Reserves `len` bytes of virtual space with an unmapped guard page on each side.
    pub fn alloc_virtual_space(&mut self, len: usize) -> Result<VirtualRange, MemoryError> {
        if len == 0 {
            return Err(MemoryError::EmptyRange);
        }
        let start = self
            .cursor
            .as_usize()
            .checked_add(PAGE_SIZE)
            .ok_or(MemoryError::OutOfVirtualSpace)?;
        let cursor = len
            .checked_next_multiple_of(PAGE_SIZE)
            .and_then(|len| len.checked_add(start + PAGE_SIZE))
            .filter(|&cursor| cursor <= self.ceiling.as_usize())
            .ok_or(MemoryError::OutOfVirtualSpace)?;

        let range = VirtualRange::from_bounds(
            VirtualAddress::new(start),
            VirtualAddress::new(cursor - PAGE_SIZE),
        );
        self.cursor = VirtualAddress::new(cursor);
        Ok(range)
    }

    /// Resolves a page fault at `addr`.
    ///
    /// Faults inside cache entries ask the entry's populator for the missing page at
    /// most once, then map it. Any other fault is reported to the caller.
    pub fn handle_fault(
        &mut self,
        frames: &FrameAllocator,
        addr: VirtualAddress,
    ) -> Result<(), MemoryError> {
        let root = self.root.address();
        let entry = self
            .live
            .iter_mut()
            .find(|e| e.range.contains(addr))
            .ok_or(MemoryError::NotMapped)?;
        let start = entry.range.start();

        let Backing::Cache { pages, populator } = &mut entry.backing else {
            return Err(MemoryError::AccessViolation);
        };

        let index = (addr - start) / PAGE_SIZE;
        if !pages.contains_key(&index) {
            let phys = populator
                .populate(frames, index * PAGE_SIZE)
                .inspect_err(|err| {
                    log::warn!("memory space {}: populating {} failed: {}", root, addr, err)
                })?;
            log::trace!("memory space {}: cache page {} -> {}", root, start + index * PAGE_SIZE, phys);
            pages.insert(index, phys);
        }

        // Only the faulting entry is remapped; staged refreshes wait for the next build.
        entry.map(&mut self.root, frames, OverwritePolicy::SkipMapped);
        Ok(())
    }

    /// Returns the live entry covering `addr`.
    pub fn entry_at(&self, addr: VirtualAddress) -> Option<&MemoryEntry> {
        self.live.iter().find(|e| e.range.contains(addr))
    }

    /// Translates `addr` through the built page tables.
    pub fn walk(&self, addr: VirtualAddress) -> Option<PhysicalAddress> {
        self.root.walk(addr)
    }

    /// Returns the physical address of the root table.
    pub fn root(&self) -> PhysicalAddress {
        self.root.address()
    }

    /// Iterates over the live entries in the order they were built.
    pub fn entries(&self) -> impl Iterator<Item = &MemoryEntry> {
        self.live.iter()
    }

    /// Installs the space's page tables in the MMU.
    ///
    /// # Safety
    ///
    /// The space must map everything the processor touches once it is active.
    pub unsafe fn activate(&self) {
        // SAFETY: Forwarded to the caller.
        unsafe { self.root.activate() }
    }

    /// Frees every owned frame, stack and cache page, and every table of the space.
    pub fn teardown(self, frames: &FrameAllocator) {
        let root = self.root.address();
        let count = self.live.len();
        self.live
            .into_iter()
            .chain(self.pending_add)
            .for_each(|entry| entry.release(frames));
        self.root.destroy(frames);
        log::debug!("memory space {}: torn down ({} entries)", root, count);
    }

    fn entries_after_removal(&self) -> impl Iterator<Item = &MemoryEntry> {
        self.live
            .iter()
            .filter(|e| !self.pending_remove.contains(&e.range.start()))
            .chain(self.pending_add.iter())
    }

    #[track_caller]
    fn live_index(&self, start: VirtualAddress) -> usize {
        self.live
            .iter()
            .position(|e| e.range.start() == start)
            .unwrap_or_else(|| panic!("no live memory entry starts at {}", start))
    }

    #[track_caller]
    fn apply_refreshes(&mut self, frames: &FrameAllocator) {
        for start in core::mem::take(&mut self.pending_refresh) {
            let entry = &self.live[self.live_index(start)];
            assert!(
                matches!(entry.backing, Backing::Cache { .. }),
                "refresh of {} names a non-cache entry",
                start
            );
            entry.map(&mut self.root, frames, OverwritePolicy::SkipMapped);
        }
    }
}

impl fmt::Debug for MemorySpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySpace")
            .field("root", &self.root.address())
            .field("live", &self.live.len())
            .field("pending_add", &self.pending_add.len())
            .field("pending_remove", &self.pending_remove.len())
            .field("cursor", &self.cursor)
            .finish()
    }
}

const fn page_round(len: usize) -> usize {
    len.div_ceil(PAGE_SIZE) * PAGE_SIZE
}
