#![cfg_attr(not(any(test, feature = "software-emulation")), no_std)]

//! # Kestrel Memory Manager (KMM)
//!
//! The Kestrel Memory Manager owns everything between physical RAM and a task's view of
//! memory:
//!
//! - A first-fit physical frame allocator fed from the boot memory map.
//! - A 4-level page table builder that maps, unmaps and walks translation tables.
//! - Memory spaces: staged logs of mapping entries reconciled into page tables on demand,
//!   including demand-populated cache regions.
//! - Software emulation of the MMU for testing in non-kernel environments.

extern crate alloc;

mod address;
mod arch;
mod frame_allocator;
mod memory_space;
mod page_table;
mod permissions;

pub use address::{AddressTranslator, PhysicalAddress, VirtualAddress, VirtualRange};
pub use frame_allocator::{AllocError, FrameAllocator, MAX_BLOCKS, MIN_FRAGMENT, PhysicalBlock};
pub use memory_space::{
    Backing, CachePopulator, MemoryEntry, MemoryError, MemorySpace, SpaceLayout,
};
pub use page_table::{ENTRY_COUNT, EntryKind, Mapping, OverwritePolicy, PageTable, RootTable};
pub use permissions::{MappingKind, Permissions};

pub use arch::{PAGE_SIZE, PAGE_TABLE_LEVELS, PageEntry, PageFlags};

#[cfg(any(test, feature = "software-emulation"))]
pub use arch::{EmulatedMemory, tlb_flush_count};
