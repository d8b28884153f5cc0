//! Address types for physical and virtual memory management.
//!
//! Physical and virtual addresses are distinct, non-interchangeable types. The only way
//! to turn one into the other is through the [`AddressTranslator`], which keeps the
//! direction of every translation visible at the call site.

use core::fmt;
use core::ops::{Add, Sub};

use crate::arch::{self, PAGE_SIZE};

#[cfg(any(test, feature = "software-emulation"))]
use crate::arch::EmulatedMemory;

/// Address translator for converting between physical and virtual addresses.
///
/// This enum supports two modes:
/// - Hardware: Uses a direct-map offset for translation (kernel mode)
/// - Emulated: Uses an emulated memory buffer for translation (testing mode)
pub enum AddressTranslator {
    /// Hardware translation using a direct-map offset.
    Hardware { direct_map_offset: usize },
    /// Emulated translation using a simulated memory region.
    #[cfg(any(test, feature = "software-emulation"))]
    Emulated(EmulatedMemory),
}

impl AddressTranslator {
    /// Creates a new hardware translator with the given direct-map offset.
    pub const fn hardware(direct_map_offset: usize) -> Self {
        Self::Hardware { direct_map_offset }
    }

    /// Creates a new emulated translator backed by `size` bytes of zeroed memory.
    #[cfg(any(test, feature = "software-emulation"))]
    pub fn emulated(size: usize) -> Self {
        Self::Emulated(EmulatedMemory::new(size))
    }

    /// Sets the global address translator.
    ///
    /// This function must be called exactly once during initialization.
    ///
    /// # Panics
    ///
    /// Panics if the translator has already been set.
    pub fn set_current(translator: AddressTranslator) {
        #[cfg(not(any(test, feature = "software-emulation")))]
        {
            if ADDRESS_TRANSLATOR.get().is_some() {
                panic!("address translator already set");
            }
            ADDRESS_TRANSLATOR.call_once(|| translator);
        }

        #[cfg(any(test, feature = "software-emulation"))]
        {
            ADDRESS_TRANSLATOR.with(|t| {
                if t.get().is_some() {
                    panic!("address translator already set");
                }
                t.call_once(|| translator);
            });
        }
    }

    /// Returns a reference to the current global address translator.
    ///
    /// # Panics
    ///
    /// Panics if the translator has not been set yet.
    pub fn current() -> &'static AddressTranslator {
        Self::try_current().expect(
            "address translator not set; call AddressTranslator::set_current during initialization",
        )
    }

    /// Returns a reference to the current global address translator if it has been set.
    pub fn try_current() -> Option<&'static AddressTranslator> {
        #[cfg(not(any(test, feature = "software-emulation")))]
        {
            ADDRESS_TRANSLATOR.get()
        }

        #[cfg(any(test, feature = "software-emulation"))]
        {
            ADDRESS_TRANSLATOR.with(|t| {
                t.get().map(|translator| {
                    // SAFETY: We leak the reference to make it 'static. Each thread owns its
                    // ADDRESS_TRANSLATOR, it is never modified once set, and it lives for the
                    // rest of the thread.
                    unsafe { &*(translator as *const AddressTranslator) }
                })
            })
        }
    }

    /// Translates a physical address to the address the kernel dereferences.
    pub fn phys_to_virt(&self, phys: usize) -> usize {
        match self {
            Self::Hardware { direct_map_offset } => phys.wrapping_add(*direct_map_offset),
            #[cfg(any(test, feature = "software-emulation"))]
            Self::Emulated(mem) => mem.translate(phys) as usize,
        }
    }

    /// Translates a kernel-dereferenceable address back to a physical address.
    pub fn virt_to_phys(&self, virt: usize) -> usize {
        match self {
            Self::Hardware { direct_map_offset } => virt.wrapping_sub(*direct_map_offset),
            #[cfg(any(test, feature = "software-emulation"))]
            Self::Emulated(mem) => mem.ptr_to_phys(virt as *const u8),
        }
    }
}

/// Global address translator.
///
/// This is initialized once during kernel initialization (with Hardware variant).
/// In test/software-emulation mode, this is thread-local to allow each test to have its own
/// emulated memory space.
#[cfg(not(any(test, feature = "software-emulation")))]
static ADDRESS_TRANSLATOR: spin::Once<AddressTranslator> = spin::Once::new();

#[cfg(any(test, feature = "software-emulation"))]
std::thread_local! {
    static ADDRESS_TRANSLATOR: spin::Once<AddressTranslator> = const { spin::Once::new() };
}

/// Macro to define common address type functionality.
///
/// This macro generates the basic structure and methods common to both physical
/// and virtual address types.
macro_rules! impl_address_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Creates a new address without validation.
            ///
            /// # Safety
            ///
            /// The caller must ensure that the address is valid for the current architecture.
            #[inline]
            pub const unsafe fn new_unchecked(addr: usize) -> Self {
                Self(addr)
            }

            /// Returns the raw address value.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }

            /// Checks if the address is aligned to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn is_aligned(self, align: usize) -> bool {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                self.0 & (align - 1) == 0
            }

            /// Returns true if the address is on a page boundary.
            #[inline]
            pub const fn is_page_aligned(self) -> bool {
                self.is_aligned(PAGE_SIZE)
            }

            /// Aligns the address down to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn align_down(self, align: usize) -> Self {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                Self(self.0 & !(align - 1))
            }

            /// Aligns the address up to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn align_up(self, align: usize) -> Self {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                Self((self.0 + align - 1) & !(align - 1))
            }

            /// Returns the offset of the address within its page.
            #[inline]
            pub const fn page_offset(self) -> usize {
                self.0 & (PAGE_SIZE - 1)
            }
        }

        impl fmt::Pointer for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:p}", self.0 as *const u8)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }

        impl From<u64> for $name {
            #[inline]
            fn from(addr: u64) -> Self {
                Self::new(addr as usize)
            }
        }

        impl From<usize> for $name {
            #[inline]
            fn from(addr: usize) -> Self {
                Self::new(addr)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: usize) -> Self::Output {
                Self::new(self.0 + rhs)
            }
        }

        impl Sub<usize> for $name {
            type Output = Self;

            #[inline]
            fn sub(self, rhs: usize) -> Self::Output {
                Self::new(self.0 - rhs)
            }
        }

        impl Sub<$name> for $name {
            type Output = usize;

            #[inline]
            fn sub(self, rhs: $name) -> Self::Output {
                self.0 - rhs.0
            }
        }
    };
}

impl_address_common!(
    PhysicalAddress,
    "A physical memory address.\n\n\
     Physical addresses are what the frame allocator hands out and what page table\n\
     entries store. They cannot be dereferenced without going through the translator."
);

impl PhysicalAddress {
    /// Creates a new physical address.
    ///
    /// # Panics
    ///
    /// Panics if the address exceeds the architecture's maximum physical address width.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        assert!(
            arch::validate_physical(addr),
            "physical address exceeds maximum width"
        );
        Self(addr)
    }

    /// Converts a direct-mapped virtual address back to a physical address.
    ///
    /// # Panics
    ///
    /// Panics if the address translator has not been set via [`AddressTranslator::set_current`].
    #[inline]
    pub fn from_direct_mapped(virt: VirtualAddress) -> Self {
        let translator = AddressTranslator::current();
        Self::new(translator.virt_to_phys(virt.as_usize()))
    }
}

impl_address_common!(
    VirtualAddress,
    "A virtual memory address.\n\n\
     Virtual addresses are always canonical. They provide the page table indices\n\
     used to walk a translation table."
);

impl VirtualAddress {
    /// Creates a new virtual address.
    ///
    /// # Panics
    ///
    /// Panics if the address is not canonical for the architecture.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        assert!(arch::validate_virtual(addr), "address is not canonical");
        Self(addr)
    }

    /// Returns the kernel's direct-mapped view of a physical address.
    ///
    /// # Panics
    ///
    /// Panics if the address translator has not been set via [`AddressTranslator::set_current`].
    #[inline]
    pub fn direct_mapped(phys: PhysicalAddress) -> Self {
        let translator = AddressTranslator::current();
        let virt = translator.phys_to_virt(phys.as_usize());

        // In emulated mode, phys_to_virt returns a host pointer which need not be canonical
        // for the guest architecture. Bypass the validity check in that case.
        #[cfg(any(test, feature = "software-emulation"))]
        if matches!(translator, AddressTranslator::Emulated(_)) {
            return Self(virt);
        }

        Self::new(virt)
    }

    /// Converts the address to a pointer.
    #[inline]
    pub const fn as_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    /// Converts the address to a mutable pointer.
    #[inline]
    pub const fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    /// Returns the page table index at the specified level.
    ///
    /// Level 0 indexes the leaf table; level 3 indexes the root.
    #[inline]
    pub const fn page_index(self, level: usize) -> usize {
        arch::page_index(self.0, level)
    }
}

/// A half-open range `[start, end)` of virtual addresses.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct VirtualRange {
    start: VirtualAddress,
    end: VirtualAddress,
}

impl VirtualRange {
    /// Creates a range covering `len` bytes from `start`.
    ///
    /// # Panics
    ///
    /// Panics if the range is empty or ends outside the canonical address space.
    #[inline]
    pub const fn new(start: VirtualAddress, len: usize) -> Self {
        assert!(len > 0, "virtual range must not be empty");
        Self {
            start,
            end: VirtualAddress::new(start.as_usize() + len),
        }
    }

    /// Creates a range from its bounds.
    ///
    /// # Panics
    ///
    /// Panics if `end` is not above `start`.
    #[inline]
    pub const fn from_bounds(start: VirtualAddress, end: VirtualAddress) -> Self {
        assert!(end.as_usize() > start.as_usize(), "virtual range must not be empty");
        Self { start, end }
    }

    /// Returns the first address of the range.
    #[inline]
    pub const fn start(self) -> VirtualAddress {
        self.start
    }

    /// Returns the address one past the end of the range.
    #[inline]
    pub const fn end(self) -> VirtualAddress {
        self.end
    }

    /// Returns the length of the range in bytes.
    #[inline]
    pub const fn len(self) -> usize {
        self.end.as_usize() - self.start.as_usize()
    }

    /// Returns true if `addr` lies within the range.
    #[inline]
    pub const fn contains(self, addr: VirtualAddress) -> bool {
        addr.as_usize() >= self.start.as_usize() && addr.as_usize() < self.end.as_usize()
    }

    /// Returns true if the two ranges share at least one address.
    #[inline]
    pub const fn overlaps(self, other: VirtualRange) -> bool {
        self.start.as_usize() < other.end.as_usize()
            && other.start.as_usize() < self.end.as_usize()
    }

    /// Returns true if `other` lies entirely within this range.
    #[inline]
    pub const fn covers(self, other: VirtualRange) -> bool {
        other.start.as_usize() >= self.start.as_usize()
            && other.end.as_usize() <= self.end.as_usize()
    }

    /// Returns the number of pages touched by the range.
    #[inline]
    pub const fn page_count(self) -> usize {
        let first = self.start.align_down(PAGE_SIZE).as_usize();
        let last = self.end.align_up(PAGE_SIZE).as_usize();
        (last - first) / PAGE_SIZE
    }
}

impl fmt::Debug for VirtualRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}..{:#x}", self.start.as_usize(), self.end.as_usize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod physical_address {
        use super::*;

        #[test]
        fn new_max_valid_address() {
            let max_addr = (1usize << arch::MAX_PHYSICAL_BITS) - 1;
            let addr = PhysicalAddress::new(max_addr);
            assert_eq!(addr.as_usize(), max_addr);
        }

        #[test]
        #[should_panic(expected = "physical address exceeds maximum width")]
        fn new_exceeds_max() {
            PhysicalAddress::new(1usize << arch::MAX_PHYSICAL_BITS);
        }

        #[test]
        fn alignment() {
            let addr = PhysicalAddress::new(0x1_2345);
            assert!(!addr.is_page_aligned());
            assert_eq!(addr.align_down(PAGE_SIZE), PhysicalAddress::new(0x1_2000));
            assert_eq!(addr.align_up(PAGE_SIZE), PhysicalAddress::new(0x1_3000));
            assert_eq!(addr.page_offset(), 0x345);
        }

        #[test]
        fn arithmetic() {
            let addr = PhysicalAddress::new(0x1000);
            assert_eq!(addr + 0x123, PhysicalAddress::new(0x1123));
            assert_eq!(PhysicalAddress::new(0x3000) - addr, 0x2000);
        }

        #[test]
        fn formatting() {
            let addr = PhysicalAddress::new(0x1000);
            assert_eq!(format!("{:?}", addr), "PhysicalAddress(0x1000)");
            assert_eq!(format!("{}", addr), "0x1000");
        }
    }

    mod virtual_address {
        use super::*;

        #[test]
        fn canonical_halves() {
            assert_eq!(
                VirtualAddress::new(0x0000_7FFF_FFFF_FFFF).as_usize(),
                0x0000_7FFF_FFFF_FFFF
            );
            assert_eq!(
                VirtualAddress::new(0xFFFF_8000_0000_0000).as_usize(),
                0xFFFF_8000_0000_0000
            );
        }

        #[test]
        #[should_panic(expected = "address is not canonical")]
        fn non_canonical_low() {
            VirtualAddress::new(0x0000_8000_0000_0000);
        }

        #[test]
        #[should_panic(expected = "address is not canonical")]
        fn non_canonical_high() {
            VirtualAddress::new(0xFFFF_7FFF_FFFF_FFFF);
        }

        #[test]
        fn page_indices() {
            let addr = VirtualAddress::new(0x2000_0123);
            assert_eq!(addr.page_offset(), 0x123);
            assert_eq!(addr.page_index(0), 0);
            assert_eq!(addr.page_index(1), 0x100);
            assert_eq!(addr.page_index(2), 0);
            assert_eq!(addr.page_index(3), 0);
        }

        #[test]
        fn upper_half_root_index() {
            let addr = VirtualAddress::new(0xFFFF_8000_0000_0000);
            assert_eq!(addr.page_index(3), 0x100);
        }
    }

    mod virtual_range {
        use super::*;

        #[test]
        fn overlap_and_containment() {
            let a = VirtualRange::new(VirtualAddress::new(0x1000), 0x2000);
            let b = VirtualRange::new(VirtualAddress::new(0x2000), 0x2000);
            let c = VirtualRange::new(VirtualAddress::new(0x3000), 0x1000);

            assert!(a.overlaps(b));
            assert!(!a.overlaps(c));
            assert!(b.covers(c));
            assert!(a.contains(VirtualAddress::new(0x2FFF)));
            assert!(!a.contains(VirtualAddress::new(0x3000)));
        }

        #[test]
        fn page_count_rounds_outward() {
            let range = VirtualRange::new(VirtualAddress::new(0x1800), 0x1000);
            assert_eq!(range.page_count(), 2);
        }

        #[test]
        #[should_panic(expected = "virtual range must not be empty")]
        fn empty_range() {
            VirtualRange::new(VirtualAddress::new(0x1000), 0);
        }
    }

    mod translation {
        use super::*;

        fn setup() {
            let _ = std::panic::catch_unwind(|| {
                AddressTranslator::set_current(AddressTranslator::hardware(0xFFFF_8000_0000_0000));
            });
        }

        #[test]
        fn direct_map_round_trip() {
            setup();
            let phys = PhysicalAddress::new(0x1234_5000);
            let virt = VirtualAddress::direct_mapped(phys);
            assert_eq!(virt.as_usize(), 0xFFFF_8000_1234_5000);
            assert_eq!(PhysicalAddress::from_direct_mapped(virt), phys);
        }

        #[test]
        fn emulated_translation_points_into_buffer() {
            let _ = std::panic::catch_unwind(|| {
                AddressTranslator::set_current(AddressTranslator::emulated(0x4000));
            });
            let phys = PhysicalAddress::new(0x2000);
            let virt = VirtualAddress::direct_mapped(phys);
            assert_eq!(virt.as_usize() % PAGE_SIZE, 0);
            assert_eq!(PhysicalAddress::from_direct_mapped(virt), phys);
        }

        #[test]
        #[should_panic(expected = "address translator already set")]
        fn panics_on_double_set() {
            AddressTranslator::set_current(AddressTranslator::hardware(0xFFFF_8000_0000_0000));
            AddressTranslator::set_current(AddressTranslator::hardware(0xFFFF_9000_0000_0000));
        }
    }
}
