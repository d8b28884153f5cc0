//! Emulated MMU control.
//!
//! The active root and the number of TLB invalidations are tracked per thread so that
//! each test observes only its own translation state.

use core::cell::Cell;

use crate::PhysicalAddress;

std::thread_local! {
    static ACTIVE_ROOT: Cell<Option<PhysicalAddress>> = const { Cell::new(None) };
    static TLB_FLUSHES: Cell<usize> = const { Cell::new(0) };
}

/// Installs `root` as the active translation table.
///
/// # Safety
///
/// On hardware this changes the translation of every subsequent access; the emulated
/// version only records the root, but callers must uphold the same contract.
pub unsafe fn activate(root: PhysicalAddress) {
    ACTIVE_ROOT.with(|active| active.set(Some(root)));
    flush_tlb();
}

/// Returns the root of the active translation table, if any.
pub fn active_root() -> Option<PhysicalAddress> {
    ACTIVE_ROOT.with(Cell::get)
}

/// Invalidates all cached translations.
pub fn flush_tlb() {
    TLB_FLUSHES.with(|count| count.set(count.get() + 1));
}

/// Orders table writes before subsequent translations.
pub fn barrier() {
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
}

/// Returns how many times this thread invalidated the TLB.
pub fn tlb_flush_count() -> usize {
    TLB_FLUSHES.with(Cell::get)
}
