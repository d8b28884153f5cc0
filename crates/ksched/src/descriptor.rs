//! Per-task descriptor tables and the pool kernel tasks draw theirs from.

use alloc::{sync::Arc, vec::Vec};
use core::{fmt, ops::BitOr};

/// Descriptor slots in a user task's table.
pub const USER_DESCRIPTORS: usize = 32;

/// Descriptor slots in a kernel task's table.
pub const KERNEL_DESCRIPTORS: usize = 8;

/// Number of kernel descriptor tables reserved at boot.
pub const KERNEL_DESCRIPTOR_POOL: usize = 32;

/// Readiness of a descriptor, as a set of conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ready(u32);

impl Ready {
    pub const NONE: Ready = Ready(0);
    /// Data can be read without blocking.
    pub const READ: Ready = Ready(1);
    /// Data can be written without blocking.
    pub const WRITE: Ready = Ready(2);
    /// The other end has closed.
    pub const CLOSE: Ready = Ready(4);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & 0b111)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if any condition in `other` is also in `self`.
    pub const fn intersects(self, other: Ready) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Ready {
    type Output = Ready;

    fn bitor(self, rhs: Ready) -> Ready {
        Ready(self.0 | rhs.0)
    }
}

/// A resource a task holds open: a file, a pipe end, a device.
pub trait Descriptor: Send + Sync {
    /// Reports which operations would complete without blocking right now.
    fn readiness(&self) -> Ready;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorError {
    /// The descriptor number is out of range or not open.
    BadDescriptor,
    /// Every slot of the table is in use.
    TableFull,
    /// Every kernel descriptor table is in use.
    PoolExhausted,
}

impl DescriptorError {
    pub const fn code(self) -> i64 {
        match self {
            DescriptorError::BadDescriptor => crate::BADARG,
            DescriptorError::TableFull | DescriptorError::PoolExhausted => crate::NORESOURCE,
        }
    }
}

impl fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorError::BadDescriptor => write!(f, "bad descriptor"),
            DescriptorError::TableFull => write!(f, "descriptor table full"),
            DescriptorError::PoolExhausted => write!(f, "kernel descriptor pool exhausted"),
        }
    }
}

/// A fixed number of descriptor slots; the lowest free slot is used first.
pub struct DescriptorTable {
    slots: Vec<Option<Arc<dyn Descriptor>>>,
}

impl DescriptorTable {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Installs `descriptor` in the lowest free slot and returns its number.
    pub fn open(&mut self, descriptor: Arc<dyn Descriptor>) -> Result<usize, DescriptorError> {
        let fd = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(DescriptorError::TableFull)?;
        self.slots[fd] = Some(descriptor);
        Ok(fd)
    }

    /// Removes the descriptor at `fd` and hands it back.
    pub fn close(&mut self, fd: usize) -> Result<Arc<dyn Descriptor>, DescriptorError> {
        self.slots
            .get_mut(fd)
            .and_then(Option::take)
            .ok_or(DescriptorError::BadDescriptor)
    }

    pub fn get(&self, fd: usize) -> Result<&Arc<dyn Descriptor>, DescriptorError> {
        self.slots
            .get(fd)
            .and_then(Option::as_ref)
            .ok_or(DescriptorError::BadDescriptor)
    }

    /// Returns the number of open descriptors.
    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }
}

impl fmt::Debug for DescriptorTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorTable")
            .field("capacity", &self.capacity())
            .field("open", &self.open_count())
            .finish()
    }
}

/// Kernel tasks share one reserved set of small tables instead of owning theirs.
pub(crate) struct DescriptorPool {
    tables: Vec<DescriptorTable>,
    in_use: Vec<bool>,
}

impl DescriptorPool {
    pub fn new() -> Self {
        Self {
            tables: (0..KERNEL_DESCRIPTOR_POOL)
                .map(|_| DescriptorTable::new(KERNEL_DESCRIPTORS))
                .collect(),
            in_use: alloc::vec![false; KERNEL_DESCRIPTOR_POOL],
        }
    }

    pub fn acquire(&mut self) -> Result<usize, DescriptorError> {
        let slot = self
            .in_use
            .iter()
            .position(|used| !used)
            .ok_or(DescriptorError::PoolExhausted)?;
        self.in_use[slot] = true;
        Ok(slot)
    }

    /// Closes everything left open in `slot` and returns it to the pool.
    #[track_caller]
    pub fn release(&mut self, slot: usize) {
        assert!(self.in_use[slot], "kernel descriptor table {} released twice", slot);
        self.tables[slot].clear();
        self.in_use[slot] = false;
    }

    pub fn table(&self, slot: usize) -> &DescriptorTable {
        &self.tables[slot]
    }

    pub fn table_mut(&mut self, slot: usize) -> &mut DescriptorTable {
        &mut self.tables[slot]
    }

    #[cfg(test)]
    pub fn available(&self) -> usize {
        self.in_use.iter().filter(|used| !**used).count()
    }
}
