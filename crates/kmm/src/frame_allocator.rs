//! First-fit physical frame allocator.
//!
//! Physical memory is tracked as a fixed, base-sorted array of blocks, each either free
//! or in use. Allocation splits the first free block large enough for the request;
//! freeing coalesces the block with free neighbours so the array does not accumulate
//! holes. The array needs no dynamic allocation, so the allocator can run before the
//! kernel heap exists and can back the kernel heap itself.

use core::fmt;

use crate::arch::PAGE_SIZE;
use crate::{PhysicalAddress, VirtualAddress};

/// Maximum number of blocks that can be tracked.
pub const MAX_BLOCKS: usize = 128;

/// Smallest remainder kept as a separate free block when a block is split.
///
/// A smaller remainder stays attached to the allocation.
pub const MIN_FRAGMENT: usize = PAGE_SIZE;

/// Errors that can occur during physical memory allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// No free block is large enough for the request.
    OutOfMemory,
    /// The request was for zero bytes.
    ZeroSize,
    /// The block array is full and cannot track more blocks.
    BlocksFull,
    /// A new region overlaps memory that is already tracked.
    RegionOverlap,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of physical memory"),
            Self::ZeroSize => write!(f, "zero-sized allocation"),
            Self::BlocksFull => write!(f, "physical block array full"),
            Self::RegionOverlap => write!(f, "region overlaps tracked memory"),
        }
    }
}

/// A contiguous range of physical memory that is either free or in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicalBlock {
    base: PhysicalAddress,
    len: usize,
    in_use: bool,
}

impl PhysicalBlock {
    const fn new(base: PhysicalAddress, len: usize, in_use: bool) -> Self {
        Self { base, len, in_use }
    }

    /// Returns the base address of this block.
    pub const fn base(&self) -> PhysicalAddress {
        self.base
    }

    /// Returns the length of this block in bytes.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the block is allocated.
    pub const fn in_use(&self) -> bool {
        self.in_use
    }

    /// Returns the end address (exclusive) of this block.
    pub const fn end(&self) -> usize {
        self.base.as_usize() + self.len
    }

    const fn overlaps(&self, base: usize, len: usize) -> bool {
        self.base.as_usize() < base + len && base < self.end()
    }

    /// Returns true if `other` starts exactly where this block ends and both are free.
    const fn joins(&self, other: &PhysicalBlock) -> bool {
        !self.in_use && !other.in_use && self.end() == other.base.as_usize()
    }
}

/// Fixed-size, base-sorted array of blocks.
#[derive(Debug)]
struct BlockArray {
    blocks: [Option<PhysicalBlock>; MAX_BLOCKS],
    count: usize,
}

impl BlockArray {
    const fn new() -> Self {
        Self {
            blocks: [None; MAX_BLOCKS],
            count: 0,
        }
    }

    const fn is_full(&self) -> bool {
        self.count >= MAX_BLOCKS
    }

    fn iter(&self) -> impl Iterator<Item = &PhysicalBlock> {
        self.blocks[..self.count].iter().filter_map(|b| b.as_ref())
    }

    fn get(&self, index: usize) -> Option<PhysicalBlock> {
        if index < self.count {
            self.blocks[index]
        } else {
            None
        }
    }

    fn get_mut(&mut self, index: usize) -> Option<&mut PhysicalBlock> {
        if index < self.count {
            self.blocks[index].as_mut()
        } else {
            None
        }
    }

    /// Inserts a block at the specified index, shifting subsequent blocks.
    fn insert(&mut self, index: usize, block: PhysicalBlock) -> Result<(), AllocError> {
        if self.is_full() || index > self.count {
            return Err(AllocError::BlocksFull);
        }

        for i in (index..self.count).rev() {
            self.blocks[i + 1] = self.blocks[i];
        }

        self.blocks[index] = Some(block);
        self.count += 1;
        Ok(())
    }

    /// Removes the block at the specified index, shifting subsequent blocks.
    fn remove(&mut self, index: usize) {
        if index >= self.count {
            return;
        }

        for i in index..self.count - 1 {
            self.blocks[i] = self.blocks[i + 1];
        }

        self.blocks[self.count - 1] = None;
        self.count -= 1;
    }

    /// Returns the index at which a block starting at `base` keeps the array sorted.
    fn position_for(&self, base: usize) -> usize {
        self.iter()
            .position(|b| b.base.as_usize() > base)
            .unwrap_or(self.count)
    }

    /// Merges the free block at `index` with free neighbours on either side.
    fn coalesce(&mut self, mut index: usize) {
        let prev = index.checked_sub(1).and_then(|i| self.get(i));
        if let (Some(prev), Some(current)) = (prev, self.get(index)) {
            if prev.joins(&current) {
                if let Some(prev) = self.get_mut(index - 1) {
                    prev.len += current.len;
                }
                self.remove(index);
                index -= 1;
            }
        }

        if let (Some(current), Some(next)) = (self.get(index), self.get(index + 1)) {
            if current.joins(&next) {
                if let Some(current) = self.get_mut(index) {
                    current.len += next.len;
                }
                self.remove(index + 1);
            }
        }
    }
}

/// A first-fit physical frame allocator with static accounting space.
///
/// # Thread Safety
///
/// The allocator uses `spin::Mutex` for interior mutability so that page-table growth and
/// memory spaces can share it through `&FrameAllocator`. The kernel only touches it with
/// interrupts masked, so the lock is never contended.
pub struct FrameAllocator {
    blocks: spin::Mutex<BlockArray>,
}

impl FrameAllocator {
    /// Creates a new allocator that tracks no memory.
    pub const fn new() -> Self {
        Self {
            blocks: spin::Mutex::new(BlockArray::new()),
        }
    }

    /// Adds a usable region of physical memory.
    ///
    /// The base is aligned up and the length down to page boundaries. A region that is
    /// smaller than a page after alignment is ignored. A region adjacent to an existing
    /// free block is merged with it.
    pub fn add_region(&self, base: PhysicalAddress, len: usize) -> Result<(), AllocError> {
        let start = base.align_up(PAGE_SIZE).as_usize();
        let end = (base.as_usize() + len) & !(PAGE_SIZE - 1);
        if end <= start {
            return Ok(());
        }
        let len = end - start;

        let mut blocks = self.blocks.lock();
        if blocks.iter().any(|b| b.overlaps(start, len)) {
            return Err(AllocError::RegionOverlap);
        }

        let index = blocks.position_for(start);
        blocks.insert(index, PhysicalBlock::new(PhysicalAddress::new(start), len, false))?;
        blocks.coalesce(index);

        log::debug!("frame allocator: added region {:#x}..{:#x}", start, end);
        Ok(())
    }

    /// Permanently marks a range as in use.
    ///
    /// Used for memory that was handed over by the bootloader but must not be
    /// allocated, such as the kernel image. The range is widened to page boundaries and
    /// must lie inside a single free block.
    pub fn reserve(&self, base: PhysicalAddress, len: usize) -> Result<(), AllocError> {
        if len == 0 {
            return Ok(());
        }
        let start = base.align_down(PAGE_SIZE).as_usize();
        let end = (base.as_usize() + len + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);

        let mut blocks = self.blocks.lock();
        let index = blocks
            .iter()
            .position(|b| !b.in_use && b.base.as_usize() <= start && end <= b.end())
            .ok_or(AllocError::RegionOverlap)?;
        let Some(block) = blocks.get(index) else {
            return Err(AllocError::RegionOverlap);
        };

        // Split into up to three pieces: free head, reserved middle, free tail.
        let mut at = index;
        if block.base.as_usize() < start {
            let head_len = start - block.base.as_usize();
            if let Some(head) = blocks.get_mut(at) {
                head.len = head_len;
            }
            at += 1;
            blocks.insert(at, PhysicalBlock::new(PhysicalAddress::new(start), end - start, true))?;
        } else if let Some(middle) = blocks.get_mut(at) {
            middle.len = end - start;
            middle.in_use = true;
        }

        if end < block.end() {
            blocks.insert(
                at + 1,
                PhysicalBlock::new(PhysicalAddress::new(end), block.end() - end, false),
            )?;
        }

        log::debug!("frame allocator: reserved {:#x}..{:#x}", start, end);
        Ok(())
    }

    /// Allocates `bytes` of zeroed, page-aligned physical memory.
    ///
    /// Callers that can report failure use this; the request is rounded up to whole
    /// pages and served from the first free block that fits.
    pub fn try_alloc(&self, bytes: usize) -> Result<PhysicalAddress, AllocError> {
        if bytes == 0 {
            return Err(AllocError::ZeroSize);
        }
        let size = bytes.div_ceil(PAGE_SIZE) * PAGE_SIZE;

        let mut blocks = self.blocks.lock();
        let index = blocks
            .iter()
            .position(|b| !b.in_use && b.len >= size)
            .ok_or(AllocError::OutOfMemory)?;
        let Some(block) = blocks.get(index) else {
            return Err(AllocError::OutOfMemory);
        };

        let remainder = block.len - size;
        let taken = if remainder >= MIN_FRAGMENT && !blocks.is_full() {
            let tail = PhysicalBlock::new(block.base + size, remainder, false);
            blocks.insert(index + 1, tail)?;
            size
        } else {
            block.len
        };

        if let Some(block) = blocks.get_mut(index) {
            block.len = taken;
            block.in_use = true;
        }
        drop(blocks);

        zero(block.base, taken);
        log::trace!("frame allocator: {:#x} bytes at {}", taken, block.base);
        Ok(block.base)
    }

    /// Allocates `bytes` of zeroed, page-aligned physical memory.
    ///
    /// # Panics
    ///
    /// Panics if no free block is large enough. This is the entry point for paths that
    /// have no way to report failure, such as page-table growth.
    #[track_caller]
    pub fn alloc(&self, bytes: usize) -> PhysicalAddress {
        match self.try_alloc(bytes) {
            Ok(addr) => addr,
            Err(err) => panic!("physical allocation of {:#x} bytes failed: {}", bytes, err),
        }
    }

    /// Returns the block starting at `addr` to the free pool.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not the base of an allocated block, including when the block
    /// has already been freed.
    #[track_caller]
    pub fn free(&self, addr: PhysicalAddress) {
        let mut blocks = self.blocks.lock();
        let Some(index) = blocks.iter().position(|b| b.base == addr) else {
            panic!("free of untracked physical address {}", addr);
        };
        match blocks.get_mut(index) {
            Some(block) if block.in_use => block.in_use = false,
            _ => panic!("double free of physical address {}", addr),
        }
        blocks.coalesce(index);
        log::trace!("frame allocator: freed {}", addr);
    }

    /// Returns the length of the allocated block starting at `addr`.
    pub fn allocation_size(&self, addr: PhysicalAddress) -> Option<usize> {
        self.blocks
            .lock()
            .iter()
            .find(|b| b.base == addr && b.in_use)
            .map(|b| b.len)
    }

    /// Returns the total amount of physical memory tracked by the allocator.
    pub fn total_memory(&self) -> usize {
        self.blocks.lock().iter().map(|b| b.len).sum()
    }

    /// Returns the amount of memory in free blocks.
    pub fn free_memory(&self) -> usize {
        self.blocks
            .lock()
            .iter()
            .filter(|b| !b.in_use)
            .map(|b| b.len)
            .sum()
    }

    /// Returns the number of blocks currently tracked.
    pub fn block_count(&self) -> usize {
        self.blocks.lock().count
    }

    /// Calls `f` for every block in address order.
    pub fn for_each_block(&self, mut f: impl FnMut(&PhysicalBlock)) {
        self.blocks.lock().iter().for_each(|b| f(b));
    }
}

impl Default for FrameAllocator {
    fn default() -> Self {
        Self::new()
    }
}

fn zero(base: PhysicalAddress, len: usize) {
    let ptr = VirtualAddress::direct_mapped(base).as_mut_ptr::<u8>();
    // SAFETY: The block was just handed out by the allocator, so nothing else references
    // it, and the translator maps every tracked physical byte.
    unsafe { core::ptr::write_bytes(ptr, 0, len) };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AddressTranslator;

    const MEMORY_SIZE: usize = 0x10_0000;

    fn setup() -> FrameAllocator {
        let _ = std::panic::catch_unwind(|| {
            AddressTranslator::set_current(AddressTranslator::emulated(MEMORY_SIZE));
        });
        let frames = FrameAllocator::new();
        frames
            .add_region(PhysicalAddress::new(0x1_0000), 0x4_0000)
            .unwrap();
        frames
    }

    fn blocks(frames: &FrameAllocator) -> Vec<(usize, usize, bool)> {
        let mut out = Vec::new();
        frames.for_each_block(|b| out.push((b.base().as_usize(), b.len(), b.in_use())));
        out
    }

    #[test]
    fn add_region_aligns_to_pages() {
        let _ = std::panic::catch_unwind(|| {
            AddressTranslator::set_current(AddressTranslator::emulated(MEMORY_SIZE));
        });
        let frames = FrameAllocator::new();
        frames
            .add_region(PhysicalAddress::new(0x1_0800), 0x2_0000)
            .unwrap();
        assert_eq!(blocks(&frames), vec![(0x1_1000, 0x1_f000, false)]);
    }

    #[test]
    fn add_region_rejects_overlap_and_merges_adjacent() {
        let frames = setup();
        assert_eq!(
            frames.add_region(PhysicalAddress::new(0x4_0000), 0x1000),
            Err(AllocError::RegionOverlap)
        );
        frames
            .add_region(PhysicalAddress::new(0x5_0000), 0x1_0000)
            .unwrap();
        assert_eq!(blocks(&frames), vec![(0x1_0000, 0x5_0000, false)]);
    }

    #[test]
    fn alloc_is_first_fit_and_splits() {
        let frames = setup();
        let a = frames.alloc(100);
        let b = frames.alloc(PAGE_SIZE + 1);
        assert_eq!(a, PhysicalAddress::new(0x1_0000));
        assert_eq!(b, PhysicalAddress::new(0x1_1000));
        assert_eq!(
            blocks(&frames),
            vec![
                (0x1_0000, 0x1000, true),
                (0x1_1000, 0x2000, true),
                (0x1_3000, 0x3_d000, false),
            ]
        );
    }

    #[test]
    fn alloc_zero_fills() {
        let frames = setup();
        let addr = frames.alloc(PAGE_SIZE);
        let ptr = VirtualAddress::direct_mapped(addr).as_mut_ptr::<u8>();
        unsafe { core::ptr::write_bytes(ptr, 0xAB, PAGE_SIZE) };
        frames.free(addr);

        let again = frames.alloc(PAGE_SIZE);
        assert_eq!(again, addr);
        let bytes = unsafe { core::slice::from_raw_parts(ptr, PAGE_SIZE) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn free_coalesces_back_to_one_block() {
        let frames = setup();
        let a = frames.alloc(PAGE_SIZE);
        let b = frames.alloc(PAGE_SIZE);
        let c = frames.alloc(PAGE_SIZE);
        frames.free(b);
        frames.free(a);
        frames.free(c);
        assert_eq!(blocks(&frames), vec![(0x1_0000, 0x4_0000, false)]);
        assert_eq!(frames.free_memory(), frames.total_memory());
    }

    #[test]
    fn exact_fit_consumes_block() {
        let _ = std::panic::catch_unwind(|| {
            AddressTranslator::set_current(AddressTranslator::emulated(MEMORY_SIZE));
        });
        let frames = FrameAllocator::new();
        frames
            .add_region(PhysicalAddress::new(0x1_0000), 2 * PAGE_SIZE)
            .unwrap();
        let addr = frames.alloc(PAGE_SIZE);
        assert_eq!(frames.allocation_size(addr), Some(PAGE_SIZE));
        let rest = frames.alloc(PAGE_SIZE);
        assert_eq!(frames.allocation_size(rest), Some(PAGE_SIZE));
        assert_eq!(frames.try_alloc(1), Err(AllocError::OutOfMemory));
    }

    #[test]
    fn try_alloc_reports_exhaustion() {
        let frames = setup();
        assert_eq!(frames.try_alloc(0x10_0000), Err(AllocError::OutOfMemory));
        assert_eq!(frames.try_alloc(0), Err(AllocError::ZeroSize));
    }

    #[test]
    #[should_panic(expected = "physical allocation of 0x100000 bytes failed")]
    fn alloc_exhaustion_is_fatal() {
        let frames = setup();
        frames.alloc(0x10_0000);
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn double_free_is_fatal() {
        let frames = setup();
        let a = frames.alloc(PAGE_SIZE);
        let _b = frames.alloc(PAGE_SIZE);
        frames.free(a);
        frames.free(a);
    }

    #[test]
    #[should_panic(expected = "free of untracked physical address")]
    fn free_of_interior_address_is_fatal() {
        let frames = setup();
        let a = frames.alloc(2 * PAGE_SIZE);
        frames.free(a + PAGE_SIZE);
    }

    #[test]
    fn reserve_splits_free_block() {
        let frames = setup();
        frames
            .reserve(PhysicalAddress::new(0x2_0800), 0x1000)
            .unwrap();
        assert_eq!(
            blocks(&frames),
            vec![
                (0x1_0000, 0x1_0000, false),
                (0x2_0000, 0x2000, true),
                (0x2_2000, 0x2_e000, false),
            ]
        );
        assert_eq!(
            frames.reserve(PhysicalAddress::new(0x2_0000), 0x1000),
            Err(AllocError::RegionOverlap)
        );
    }
}
