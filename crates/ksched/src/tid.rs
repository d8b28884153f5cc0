use core::fmt;

/// Bit set in the id of every kernel task.
pub const TID_KERNEL: u32 = 1 << 31;

/// Number of live tasks the kernel tracks at once.
pub const MAX_TASKS: usize = 1024;

/// Identifies a task for its whole life, including after it completes and until its
/// exit status has been collected.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tid(u32);

impl Tid {
    /// Builds the id for sequence number `serial`.
    ///
    /// # Panics
    ///
    /// Panics if `serial` collides with the kernel bit.
    pub const fn new(serial: u32, kernel: bool) -> Self {
        assert!(serial & TID_KERNEL == 0, "task serial overflows into the kernel bit");
        if kernel {
            Self(serial | TID_KERNEL)
        } else {
            Self(serial)
        }
    }

    pub const fn is_kernel(self) -> bool {
        self.0 & TID_KERNEL != 0
    }

    /// Returns the id without the kernel bit.
    pub const fn serial(self) -> u32 {
        self.0 & !TID_KERNEL
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_kernel() {
            write!(f, "k{}", self.serial())
        } else {
            write!(f, "u{}", self.serial())
        }
    }
}

impl fmt::Debug for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tid({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_bit_tags_the_id() {
        let kernel = Tid::new(7, true);
        let user = Tid::new(7, false);

        assert!(kernel.is_kernel());
        assert!(!user.is_kernel());
        assert_eq!(kernel.serial(), user.serial());
        assert_eq!(kernel.as_u32(), 7 | TID_KERNEL);
        assert_ne!(kernel, user);
        assert_eq!(format!("{kernel} {user}"), "k7 u7");
    }

    #[test]
    #[should_panic(expected = "overflows into the kernel bit")]
    fn serial_must_leave_the_kernel_bit_clear() {
        Tid::new(TID_KERNEL, false);
    }
}
