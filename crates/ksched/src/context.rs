//! Saved register state of a task.

/// Return address planted at the top of every user stack.
///
/// The value is non-canonical, so a task that returns from its entry function faults
/// instead of running whatever the stack held.
pub const BAD_RETURN_ADDRESS: usize = 0xDEAD_BEEF_0000_0000;

/// The registers restored when a task is dispatched cold.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegisterFrame {
    /// Instruction pointer.
    pub ip: usize,
    /// Stack pointer.
    pub sp: usize,
    /// Argument registers. A received message is delivered here.
    pub args: [u64; 4],
    /// Return value register of the last completed kernel call.
    pub ret: i64,
    /// Whether the frame returns to user mode.
    pub user: bool,
}

impl RegisterFrame {
    /// A frame that enters user code at `ip` with the given stack pointer.
    pub fn user(ip: usize, sp: usize) -> Self {
        Self {
            ip,
            sp,
            user: true,
            ..Self::default()
        }
    }

    /// A frame that enters kernel code at `ip` with `arg` in the first argument register.
    pub fn kernel(ip: usize, sp: usize, arg: usize) -> Self {
        Self {
            ip,
            sp,
            args: [arg as u64, 0, 0, 0],
            ..Self::default()
        }
    }
}
