//! Descriptor attribute bits for software emulation.

use crate::{MappingKind, Permissions};

/// Attribute bits of an emulated translation descriptor.
///
/// The layout follows the AArch64 stage-1 lower and upper attributes: `AttrIndx` selects
/// normal or device memory, `AP` encodes user access and read-only, and the two
/// execute-never bits apply to user and privileged execution separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFlags(usize);

impl PageFlags {
    /// Memory attribute index 1: device nGnRE (bits 2-4).
    const ATTR_DEVICE: usize = 1 << 2;

    /// AP[1]: accessible from EL0 (bit 6).
    const USER: usize = 1 << 6;

    /// AP[2]: read-only (bit 7).
    const READ_ONLY: usize = 1 << 7;

    /// Access flag (bit 10).
    pub(super) const ACCESSED: usize = 1 << 10;

    /// Privileged execute-never (bit 53).
    const PXN: usize = 1 << 53;

    /// Unprivileged execute-never (bit 54).
    const UXN: usize = 1 << 54;

    /// Mask of every attribute bit this model defines.
    pub(super) const MASK: usize = Self::ATTR_DEVICE
        | Self::USER
        | Self::READ_ONLY
        | Self::ACCESSED
        | Self::PXN
        | Self::UXN;

    /// Creates empty flags (kernel read/write, executable, normal memory).
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Builds the attributes for a mapping with the given permissions and memory type.
    pub fn for_mapping(permissions: Permissions, kind: MappingKind) -> Self {
        let mut bits = Self::ACCESSED;
        if permissions.is_user() {
            bits |= Self::USER;
        }
        if !permissions.is_writable() {
            bits |= Self::READ_ONLY;
        }

        let executable = permissions.is_executable() && kind == MappingKind::Memory;
        bits |= match (executable, permissions.is_user()) {
            (true, true) => Self::PXN,
            (true, false) => Self::UXN,
            (false, _) => Self::PXN | Self::UXN,
        };

        if kind == MappingKind::Device {
            bits |= Self::ATTR_DEVICE;
        }
        Self(bits)
    }

    /// Creates flags from raw descriptor bits, discarding anything outside the model.
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw & Self::MASK)
    }

    /// Returns the raw descriptor bits.
    pub const fn to_raw(self) -> usize {
        self.0
    }

    /// Returns whether user mode may access the page.
    pub fn is_user(self) -> bool {
        self.0 & Self::USER != 0
    }

    /// Returns whether the page is writable.
    pub fn is_writable(self) -> bool {
        self.0 & Self::READ_ONLY == 0
    }

    /// Returns whether the page is executable at its own privilege level.
    pub fn is_executable(self) -> bool {
        let never = if self.is_user() { Self::UXN } else { Self::PXN };
        self.0 & never == 0
    }

    /// Returns whether the page is device memory.
    pub fn is_device(self) -> bool {
        self.0 & Self::ATTR_DEVICE != 0
    }
}

impl Default for PageFlags {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_read_execute() {
        let flags = PageFlags::for_mapping(Permissions::UserReadExecute, MappingKind::Memory);
        assert!(flags.is_user());
        assert!(!flags.is_writable());
        assert!(flags.is_executable());
        assert!(!flags.is_device());
    }

    #[test]
    fn kernel_read_write() {
        let flags = PageFlags::for_mapping(Permissions::KernelReadWrite, MappingKind::Memory);
        assert!(!flags.is_user());
        assert!(flags.is_writable());
        assert!(!flags.is_executable());
    }

    #[test]
    fn device_memory_never_executes() {
        let flags = PageFlags::for_mapping(Permissions::KernelReadExecute, MappingKind::Device);
        assert!(flags.is_device());
        assert!(!flags.is_executable());
    }
}
