//! Access permissions and memory types requested by mapping entries.

use core::fmt;

/// Access granted to a mapped range.
///
/// Every readable combination the hardware supports is covered; write and execute are
/// never granted together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permissions {
    /// User and kernel may read.
    UserRead,
    /// User and kernel may read and write.
    UserReadWrite,
    /// User may read and execute; kernel may read.
    UserReadExecute,
    /// Kernel may read.
    KernelRead,
    /// Kernel may read and write.
    KernelReadWrite,
    /// Kernel may read and execute.
    KernelReadExecute,
}

impl Permissions {
    /// Returns true if user mode may access the range.
    pub const fn is_user(self) -> bool {
        matches!(
            self,
            Self::UserRead | Self::UserReadWrite | Self::UserReadExecute
        )
    }

    /// Returns true if the range is writable.
    pub const fn is_writable(self) -> bool {
        matches!(self, Self::UserReadWrite | Self::KernelReadWrite)
    }

    /// Returns true if the range is executable at its own privilege level.
    pub const fn is_executable(self) -> bool {
        matches!(self, Self::UserReadExecute | Self::KernelReadExecute)
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let who = if self.is_user() { 'U' } else { 'K' };
        let w = if self.is_writable() { 'W' } else { '-' };
        let x = if self.is_executable() { 'X' } else { '-' };
        write!(f, "{}R{}{}", who, w, x)
    }
}

/// Memory type of a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MappingKind {
    /// Normal cacheable memory.
    Memory,
    /// Device registers: uncached and never executable.
    Device,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_and_execute_are_exclusive() {
        for perm in [
            Permissions::UserRead,
            Permissions::UserReadWrite,
            Permissions::UserReadExecute,
            Permissions::KernelRead,
            Permissions::KernelReadWrite,
            Permissions::KernelReadExecute,
        ] {
            assert!(!(perm.is_writable() && perm.is_executable()), "{perm}");
        }
    }

    #[test]
    fn display_is_compact() {
        assert_eq!(format!("{}", Permissions::UserReadWrite), "URW-");
        assert_eq!(format!("{}", Permissions::KernelReadExecute), "KR-X");
    }
}
