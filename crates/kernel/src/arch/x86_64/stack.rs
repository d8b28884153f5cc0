use ksched::KernelEntry;

/// Calls `entry(arg)` with the stack pointer set to `top`, returning to the caller's
/// stack afterwards.
///
/// # Safety
///
/// `top` must be the 16-byte aligned end of a mapped stack that nothing else uses while
/// `entry` runs.
pub unsafe fn call_on_stack(top: usize, entry: KernelEntry, arg: usize) -> i64 {
    extern "C" fn trampoline(entry: KernelEntry, arg: usize) -> i64 {
        entry(arg)
    }

    let ret: i64;
    unsafe {
        core::arch::asm!(
            "mov r12, rsp",
            "mov rsp, {top}",
            "call {trampoline}",
            "mov rsp, r12",
            top = in(reg) top,
            trampoline = sym trampoline,
            in("rdi") entry,
            in("rsi") arg,
            lateout("rax") ret,
            out("r12") _,
            clobber_abi("C"),
        );
    }
    ret
}
