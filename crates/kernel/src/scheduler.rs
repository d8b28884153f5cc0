//! Drives [`ksched::Kernel`] on the boot CPU.
//!
//! Kernel tasks run to completion: the first resumption of a kernel task calls its entry
//! point on the task's own kernel stack and ends the task with the returned status. User tasks are
//! accounted for but never entered, since this target has no ring 3 return path yet.

use kmm::{FrameAllocator, VirtualAddress};
use ksched::{Dispatch, Kernel, NORESOURCE, OK, TaskError, Tid};
use spin::{Mutex, Once};

use crate::{arch, clock::TickClock};

const BOOT_WORKERS: usize = 3;

static KERNEL: Once<Mutex<Kernel>> = Once::new();

fn with_kernel<R>(f: impl FnOnce(&mut Kernel) -> R) -> R {
    let kernel = KERNEL.get().expect("scheduler used before init");
    arch::without_interrupts(|| f(&mut kernel.lock()))
}

/// Creates the kernel context and the boot task.
pub fn init(frames: &'static FrameAllocator) {
    KERNEL.call_once(|| Mutex::new(Kernel::new(frames)));
    match with_kernel(|k| k.create_kernel_task(boot_task, BOOT_WORKERS, "boot")) {
        Ok(tid) => log::info!("scheduler ready, boot task {}", tid),
        Err(err) => panic!("boot task not created: {}", err),
    }
}

/// The scheduling loop. Never returns.
pub fn run() -> ! {
    let mut clock = TickClock::new();
    loop {
        match with_kernel(|k| k.tick(&mut clock)) {
            Dispatch::Resume { tid, value, .. } => enter(tid, value),
            Dispatch::Cold { tid, .. } => {
                log::warn!("task {}: user mode is not available, ending task", tid);
                with_kernel(|k| k.task_cleanup(tid, NORESOURCE));
            }
            Dispatch::Idle { .. } => {
                while !clock.expired() {
                    arch::wait_for_interrupt();
                }
            }
        }
    }
}

fn enter(tid: Tid, value: i64) {
    let start = with_kernel(|k| {
        let entry = k.take_entry(tid)?;
        Some((entry, k.task(tid)?.frame().sp))
    });
    let Some((entry, top)) = start else {
        log::trace!("task {}: resumed with {}", tid, value);
        return;
    };
    // The stack belongs to `tid` until its cleanup below.
    let ret = unsafe { arch::call_on_stack(top, entry, value as usize) };
    with_kernel(|k| k.task_cleanup(tid, ret));
}

/// Hands a user-mode page fault to the current task's memory space.
///
/// A fault the space cannot resolve ends the task.
pub fn user_fault(addr: VirtualAddress) {
    with_kernel(|k| {
        let Some(tid) = k.current() else {
            panic!("user page fault at {} with no current task", addr);
        };
        if let Err(err) = k.handle_fault(tid, addr) {
            log::warn!("task {}: fault at {} not resolved: {}", tid, addr, err);
            k.task_cleanup(tid, TaskError::from(err).code());
        }
    });
}

fn boot_task(workers: usize) -> i64 {
    for index in 0..workers {
        match with_kernel(|k| k.create_kernel_task(worker_task, index, "worker")) {
            Ok(tid) => log::debug!("boot: started worker {}", tid),
            Err(err) => {
                log::warn!("boot: worker {} not started: {}", index, err);
                return err.code();
            }
        }
    }
    OK
}

fn worker_task(index: usize) -> i64 {
    log::info!("worker {} running at {}us", index, crate::clock::now_us());
    OK
}
