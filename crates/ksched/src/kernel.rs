//! The kernel context: task table, run queues, kernel space and the scheduler tick.

use alloc::{collections::BTreeMap, string::String, sync::Arc, vec::Vec};
use core::fmt;

use kmm::{
    AllocError, Backing, FrameAllocator, MemoryEntry, MemoryError, MemorySpace, Permissions,
    PhysicalAddress, SpaceLayout, VirtualAddress,
};

use crate::{
    Accounting, BADARG, BAD_RETURN_ADDRESS, Completion, Descriptor, DescriptorError,
    DescriptorTable, KernelEntry, MAX_TASKS, MessageQueue, NORESOURCE, NOSPACE, OK, Pending,
    RegisterFrame, RunState, Task, Tid, USER_DESCRIPTORS, WaitReason, WakeCause,
    descriptor::DescriptorPool, io::IoCompletions, lock::LockTable, notify::NotifySlots,
    queues::RunQueues, task::Descriptors,
};

/// Longest time between two scheduling decisions, in microseconds.
pub const MAX_QUANTUM_US: u64 = 10_000;

/// Bytes of kernel stack given to every task.
pub const KERNEL_STACK_SIZE: usize = 16 * 1024;

/// Bytes of user stack committed for a new user task.
pub const USER_STACK_SIZE: usize = 64 * 1024;

/// Bytes at the top of a user stack holding the trap return frame.
const GUARD_FRAME_SIZE: usize = 2 * size_of::<usize>();

/// Timekeeping hardware the scheduler drives.
pub trait Platform {
    /// Reads the monotonic clock, in microseconds.
    fn now_us(&self) -> u64;

    /// Programs the one-shot timer to fire at `deadline_us` on the monotonic clock.
    fn arm_timer(&mut self, deadline_us: u64);
}

/// What the processor should do after a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Restore `frame` with `root` active.
    Cold {
        tid: Tid,
        frame: RegisterFrame,
        root: PhysicalAddress,
    },
    /// Finish the task's blocked call with `value`.
    Resume {
        tid: Tid,
        value: i64,
        root: PhysicalAddress,
    },
    /// Nothing is runnable; halt with the kernel space active until an interrupt.
    Idle { root: PhysicalAddress },
}

impl Dispatch {
    /// The task being dispatched, if any.
    pub fn tid(&self) -> Option<Tid> {
        match self {
            Dispatch::Cold { tid, .. } | Dispatch::Resume { tid, .. } => Some(*tid),
            Dispatch::Idle { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskError {
    /// The task table holds [`MAX_TASKS`] tasks.
    TooManyTasks,
    /// No live task has the given id.
    UnknownTask,
    Memory(MemoryError),
    Descriptors(DescriptorError),
}

impl TaskError {
    pub const fn code(self) -> i64 {
        match self {
            TaskError::TooManyTasks => NORESOURCE,
            TaskError::UnknownTask => BADARG,
            TaskError::Memory(MemoryError::OutOfMemory | MemoryError::OutOfVirtualSpace) => {
                NOSPACE
            }
            TaskError::Memory(_) => BADARG,
            TaskError::Descriptors(err) => err.code(),
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::TooManyTasks => write!(f, "task table full"),
            TaskError::UnknownTask => write!(f, "no such task"),
            TaskError::Memory(err) => write!(f, "memory: {}", err),
            TaskError::Descriptors(err) => write!(f, "descriptors: {}", err),
        }
    }
}

impl From<MemoryError> for TaskError {
    fn from(err: MemoryError) -> Self {
        TaskError::Memory(err)
    }
}

impl From<AllocError> for TaskError {
    fn from(err: AllocError) -> Self {
        TaskError::Memory(err.into())
    }
}

impl From<DescriptorError> for TaskError {
    fn from(err: DescriptorError) -> Self {
        TaskError::Descriptors(err)
    }
}

/// The single kernel context.
///
/// Owns every task record, the run queues, the kernel address space and the tables
/// behind each wait discipline. Nothing here is synchronized; callers hold it under
/// whatever masks interrupts on their platform.
pub struct Kernel {
    pub(crate) frames: &'static FrameAllocator,
    pub(crate) tasks: BTreeMap<Tid, Task>,
    pub(crate) queues: RunQueues,
    pub(crate) space: MemorySpace,
    pub(crate) pool: DescriptorPool,
    pub(crate) locks: LockTable,
    pub(crate) notify: NotifySlots,
    pub(crate) io: IoCompletions,
    next_serial: u32,
    current: Option<(Tid, u64)>,
}

impl Kernel {
    /// Creates the context and builds an empty kernel space from `frames`.
    pub fn new(frames: &'static FrameAllocator) -> Self {
        let mut space = MemorySpace::new(frames, SpaceLayout::KERNEL);
        space.build(frames);
        log::debug!("kernel: context created, kernel space at {}", space.root());

        Self {
            frames,
            tasks: BTreeMap::new(),
            queues: RunQueues::default(),
            space,
            pool: DescriptorPool::new(),
            locks: LockTable::default(),
            notify: NotifySlots::default(),
            io: IoCompletions::default(),
            next_serial: 1,
            current: None,
        }
    }

    pub fn frames(&self) -> &'static FrameAllocator {
        self.frames
    }

    /// The address space kernel tasks and the idle path run in.
    pub fn kernel_space(&self) -> &MemorySpace {
        &self.space
    }

    pub fn task(&self, tid: Tid) -> Option<&Task> {
        self.tasks.get(&tid)
    }

    pub fn task_mut(&mut self, tid: Tid) -> Option<&mut Task> {
        self.tasks.get_mut(&tid)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// The task dispatched by the last tick.
    pub fn current(&self) -> Option<Tid> {
        self.current.map(|(tid, _)| tid)
    }

    /// Creates a kernel task that starts in `entry` with `arg`.
    ///
    /// The task runs in the kernel space, takes its descriptor table from the reserved
    /// pool and is first dispatched as a resumption carrying `arg`.
    pub fn create_kernel_task(
        &mut self,
        entry: KernelEntry,
        arg: usize,
        name: &str,
    ) -> Result<Tid, TaskError> {
        let tid = self.alloc_tid(true)?;
        let slot = self.pool.acquire()?;
        let stack = self.frames.try_alloc(KERNEL_STACK_SIZE).inspect_err(|_| {
            self.pool.release(slot);
        })?;
        let top = VirtualAddress::direct_mapped(stack).as_usize() + KERNEL_STACK_SIZE;

        self.insert(Task {
            tid,
            name: String::from(name),
            frame: RegisterFrame::kernel(entry as usize, top, arg),
            state: RunState::Awake,
            pending: None,
            wake_value: arg as i64,
            space: None,
            kernel_stack: Some(stack),
            entry: Some(entry),
            descriptors: Descriptors::Pooled(slot),
            messages: MessageQueue::new(),
            accounting: Accounting::default(),
            waiters: Vec::new(),
            exit: None,
        });
        log::debug!("task {}: created kernel task '{}'", tid, name);
        Ok(tid)
    }

    /// Creates a user task that enters `entry` in `space`.
    ///
    /// A user stack is carved out of the space's dynamic region and seeded with a return
    /// frame pointing at [`BAD_RETURN_ADDRESS`]; then the space is built. On failure the
    /// space is torn down.
    pub fn create_user_task(
        &mut self,
        entry: VirtualAddress,
        mut space: MemorySpace,
        name: &str,
    ) -> Result<Tid, TaskError> {
        let prepared = self.alloc_tid(false).and_then(|tid| {
            let (sp, kernel_stack) = self.prepare_user_stack(&mut space)?;
            Ok((tid, sp, kernel_stack))
        });
        let (tid, sp, kernel_stack) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => {
                log::debug!("user task '{}' not created: {}", name, err);
                space.teardown(self.frames);
                return Err(err);
            }
        };
        let root = space.build(self.frames);

        self.insert(Task {
            tid,
            name: String::from(name),
            frame: RegisterFrame::user(entry.as_usize(), sp),
            state: RunState::Runnable,
            pending: None,
            wake_value: OK,
            space: Some(space),
            kernel_stack: Some(kernel_stack),
            entry: None,
            descriptors: Descriptors::Owned(DescriptorTable::new(USER_DESCRIPTORS)),
            messages: MessageQueue::new(),
            accounting: Accounting::default(),
            waiters: Vec::new(),
            exit: None,
        });
        log::debug!("task {}: created user task '{}' in space {}", tid, name, root);
        Ok(tid)
    }

    /// Takes the entry point of a kernel task that has not started yet.
    pub fn take_entry(&mut self, tid: Tid) -> Option<KernelEntry> {
        self.tasks.get_mut(&tid)?.entry.take()
    }

    /// Ends `tid` with exit status `ret`.
    ///
    /// Releases the task's memory, kernel stack, descriptors and locks, then wakes every
    /// task waiting for its exit. The record is dropped right away when nobody waits.
    ///
    /// # Panics
    ///
    /// Panics if the task does not exist or has already completed.
    #[track_caller]
    pub fn task_cleanup(&mut self, tid: Tid, ret: i64) {
        let state = self.record(tid).state;
        assert!(state != RunState::Complete, "task {} cleaned up twice", tid);

        self.release_locks(tid);
        self.transition(tid, RunState::Complete);

        let frames = self.frames;
        let task = self.record_mut(tid);
        task.pending = None;
        task.entry = None;
        task.exit = Some(ret);
        task.messages.clear();
        if let Some(space) = task.space.take() {
            space.teardown(frames);
        }
        if let Some(stack) = task.kernel_stack.take() {
            frames.free(stack);
        }
        let descriptors = core::mem::replace(
            &mut task.descriptors,
            Descriptors::Owned(DescriptorTable::new(0)),
        );
        let unwatched = task.waiters.is_empty();
        if let Descriptors::Pooled(slot) = descriptors {
            self.pool.release(slot);
        }
        self.io.forget(tid);

        log::debug!("task {}: exited with {}", tid, ret);
        self.stop_watching(tid);
        self.wake(WaitReason::Exit(tid));
        if unwatched {
            self.reap(tid);
        }
    }

    /// Registers `waiter` to collect the exit status of `target`.
    pub fn watch(&mut self, waiter: Tid, target: Tid) -> Result<(), TaskError> {
        if !self.tasks.contains_key(&waiter) {
            return Err(TaskError::UnknownTask);
        }
        let task = self.tasks.get_mut(&target).ok_or(TaskError::UnknownTask)?;
        if !task.waiters.contains(&waiter) {
            task.waiters.push(waiter);
        }
        Ok(())
    }

    /// Waits for `target` to exit and returns its exit status.
    pub fn await_exit(&mut self, waiter: Tid, target: Tid) -> Completion {
        match self.tasks.get(&target) {
            None => return Completion::Ready(BADARG),
            Some(task) if task.exit.is_some() => {
                return Completion::Ready(self.collect_exit(waiter, target));
            }
            Some(_) => {}
        }
        if let Err(err) = self.watch(waiter, target) {
            return Completion::Ready(err.code());
        }
        Completion::Pending(Pending::new(WaitReason::Exit(target), has_exited, collect_exit))
    }

    /// Blocks until the monotonic clock reaches `deadline` microseconds.
    pub fn sleep_until(&mut self, _tid: Tid, deadline: u64) -> Completion {
        Completion::Pending(
            Pending::new(WaitReason::Timer, never, slept).with_deadline(deadline),
        )
    }

    /// Applies the outcome of a kernel call made by `tid`.
    ///
    /// A ready value lands in the task's return register. A pending call blocks the
    /// task: it leaves the runnable queue for `Wait`, or `WaitWakeup` for polled waits.
    ///
    /// # Panics
    ///
    /// Panics if a task that is not running tries to block.
    #[track_caller]
    pub fn complete(&mut self, tid: Tid, completion: Completion) {
        let task = self.record_mut(tid);
        match completion {
            Completion::Ready(value) => task.frame.ret = value,
            Completion::Pending(pending) => {
                assert!(
                    task.state == RunState::Runnable,
                    "task {} blocked while {:?}",
                    tid,
                    task.state
                );
                let to = if pending.polled {
                    RunState::WaitWakeup
                } else {
                    RunState::Wait
                };
                log::trace!("task {}: blocked on {:?}", tid, pending.reason);
                task.pending = Some(pending);
                self.transition(tid, to);
            }
        }
    }

    /// Moves every task waiting for `reason` to `WaitWakeup` and returns how many moved.
    pub fn wake(&mut self, reason: WaitReason) -> usize {
        let matching: Vec<Tid> = self
            .queues
            .wait
            .iter()
            .copied()
            .filter(|&tid| self.waits_for(tid, reason))
            .collect();
        for &tid in &matching {
            self.transition(tid, RunState::WaitWakeup);
        }
        matching.len()
    }

    /// Moves `tid` to `WaitWakeup` if it is waiting for `reason`.
    pub fn wake_task(&mut self, tid: Tid, reason: WaitReason) -> bool {
        let waiting = self
            .tasks
            .get(&tid)
            .is_some_and(|task| task.state == RunState::Wait)
            && self.waits_for(tid, reason);
        if waiting {
            self.transition(tid, RunState::WaitWakeup);
        }
        waiting
    }

    /// Runs one scheduling decision.
    ///
    /// Charges the previous task, times out expired waits, resumes every woken task
    /// whose predicate holds, then dispatches the head of the runnable queue and arms
    /// the timer for the nearest deadline.
    pub fn tick(&mut self, platform: &mut impl Platform) -> Dispatch {
        let now = platform.now_us();
        if let Some((tid, since)) = self.current.take() {
            if let Some(task) = self.tasks.get_mut(&tid) {
                task.accounting.runtime_us += now.saturating_sub(since);
            }
        }

        self.expire(now);
        self.evaluate_wakeups();

        let Some(tid) = self.queues.runnable.pop_front() else {
            self.arm(platform, now);
            log::trace!("tick {}: idle", now);
            return Dispatch::Idle {
                root: self.space.root(),
            };
        };
        self.queues.runnable.push_back(tid);

        let kernel_root = self.space.root();
        let task = self.record_mut(tid);
        task.accounting.dispatches += 1;
        let root = task.space.as_ref().map_or(kernel_root, MemorySpace::root);
        let dispatch = match task.state {
            RunState::Runnable => Dispatch::Cold {
                tid,
                frame: task.frame.clone(),
                root,
            },
            RunState::Awake => {
                task.state = RunState::Runnable;
                task.frame.ret = task.wake_value;
                Dispatch::Resume {
                    tid,
                    value: task.wake_value,
                    root,
                }
            }
            state => panic!("task {} is in the runnable queue while {:?}", tid, state),
        };

        self.current = Some((tid, now));
        self.arm(platform, now);
        log::trace!("tick {}: {:?}", now, dispatch);
        dispatch
    }

    /// Resolves a page fault raised by `tid` at `addr`.
    pub fn handle_fault(&mut self, tid: Tid, addr: VirtualAddress) -> Result<(), MemoryError> {
        let task = self.tasks.get_mut(&tid).ok_or(MemoryError::NotMapped)?;
        let space = match task.space.as_mut() {
            Some(space) => space,
            None => &mut self.space,
        };
        space.handle_fault(self.frames, addr)
    }

    /// Installs `descriptor` in the lowest free slot of `tid`'s table.
    pub fn open(
        &mut self,
        tid: Tid,
        descriptor: Arc<dyn Descriptor>,
    ) -> Result<usize, DescriptorError> {
        self.table_mut(tid)?.open(descriptor)
    }

    pub fn close(
        &mut self,
        tid: Tid,
        fd: usize,
    ) -> Result<Arc<dyn Descriptor>, DescriptorError> {
        self.table_mut(tid)?.close(fd)
    }

    pub fn descriptor(
        &self,
        tid: Tid,
        fd: usize,
    ) -> Result<&Arc<dyn Descriptor>, DescriptorError> {
        self.table(tid)?.get(fd)
    }

    pub(crate) fn table(&self, tid: Tid) -> Result<&DescriptorTable, DescriptorError> {
        let task = self.tasks.get(&tid).ok_or(DescriptorError::BadDescriptor)?;
        match &task.descriptors {
            Descriptors::Owned(table) => Ok(table),
            Descriptors::Pooled(slot) => Ok(self.pool.table(*slot)),
        }
    }

    fn table_mut(&mut self, tid: Tid) -> Result<&mut DescriptorTable, DescriptorError> {
        let task = self
            .tasks
            .get_mut(&tid)
            .ok_or(DescriptorError::BadDescriptor)?;
        match &mut task.descriptors {
            Descriptors::Owned(table) => Ok(table),
            Descriptors::Pooled(slot) => Ok(self.pool.table_mut(*slot)),
        }
    }

    /// Returns the reason `tid` is blocked for.
    pub(crate) fn pending_reason(&self, tid: Tid) -> Option<WaitReason> {
        Some(self.tasks.get(&tid)?.pending.as_ref()?.reason)
    }

    fn waits_for(&self, tid: Tid, reason: WaitReason) -> bool {
        self.pending_reason(tid) == Some(reason)
    }

    /// Moves `tid` into `to`, keeping its queue membership in step.
    ///
    /// # Panics
    ///
    /// Panics if the task is unknown, already complete, or missing from its queue.
    #[track_caller]
    pub(crate) fn transition(&mut self, tid: Tid, to: RunState) {
        let task = self.record_mut(tid);
        let from = core::mem::replace(&mut task.state, to);
        assert!(from != RunState::Complete, "task {} left the Complete state", tid);
        self.queues.shift(tid, from, to);
    }

    #[track_caller]
    fn record(&self, tid: Tid) -> &Task {
        self.tasks
            .get(&tid)
            .unwrap_or_else(|| panic!("unknown task {}", tid))
    }

    #[track_caller]
    pub(crate) fn record_mut(&mut self, tid: Tid) -> &mut Task {
        self.tasks
            .get_mut(&tid)
            .unwrap_or_else(|| panic!("unknown task {}", tid))
    }

    fn alloc_tid(&mut self, kernel: bool) -> Result<Tid, TaskError> {
        if self.tasks.len() >= MAX_TASKS {
            return Err(TaskError::TooManyTasks);
        }
        loop {
            let serial = self.next_serial;
            self.next_serial = match (serial + 1) & !crate::TID_KERNEL {
                0 => 1,
                next => next,
            };
            if !self.tasks.contains_key(&Tid::new(serial, kernel)) {
                return Ok(Tid::new(serial, kernel));
            }
        }
    }

    fn insert(&mut self, task: Task) {
        let (tid, state) = (task.tid, task.state);
        self.tasks.insert(tid, task);
        self.queues.queue_mut(state).push_back(tid);
    }

    /// Allocates the user stack entry and the kernel stack of a new user task.
    fn prepare_user_stack(
        &mut self,
        space: &mut MemorySpace,
    ) -> Result<(usize, PhysicalAddress), TaskError> {
        let reserved = space.alloc_virtual_space(USER_STACK_SIZE)?;
        space.check_free(reserved)?;
        let stack = MemoryEntry::stack(
            self.frames,
            reserved,
            USER_STACK_SIZE,
            Permissions::UserReadWrite,
        )?;
        let (base, limit, phys) = match *stack.backing() {
            Backing::Stack {
                base, limit, phys, ..
            } => (base, limit, phys),
            _ => unreachable!("stack entry without stack backing"),
        };

        let guard = VirtualAddress::direct_mapped(phys + (base - limit) - GUARD_FRAME_SIZE);
        // SAFETY: The frame was just allocated for this stack and is direct mapped.
        unsafe {
            let words = guard.as_mut_ptr::<usize>();
            words.write(BAD_RETURN_ADDRESS);
            words.add(1).write(0);
        }

        space.add_entry(stack)?;
        let kernel_stack = self.frames.try_alloc(KERNEL_STACK_SIZE)?;
        Ok(((base - GUARD_FRAME_SIZE).as_usize(), kernel_stack))
    }

    /// Takes the exit status of `target` on behalf of `waiter`.
    fn collect_exit(&mut self, waiter: Tid, target: Tid) -> i64 {
        let Some(task) = self.tasks.get_mut(&target) else {
            return BADARG;
        };
        task.waiters.retain(|&w| w != waiter);
        let (status, unwatched) = (task.exit.unwrap_or(BADARG), task.waiters.is_empty());
        if unwatched && task.state == RunState::Complete {
            self.reap(target);
        }
        status
    }

    /// Withdraws `waiter` from every exit watch list, reaping completed tasks that are
    /// left with nobody to collect their status.
    fn stop_watching(&mut self, waiter: Tid) {
        let orphaned: Vec<Tid> = self
            .tasks
            .values_mut()
            .filter_map(|task| {
                let watched = task.waiters.len();
                task.waiters.retain(|&w| w != waiter);
                let dropped = task.waiters.len() < watched;
                (dropped && task.waiters.is_empty() && task.state == RunState::Complete)
                    .then_some(task.tid)
            })
            .collect();
        for tid in orphaned {
            log::trace!("task {}: last watcher {} exited", tid, waiter);
            self.reap(tid);
        }
    }

    fn reap(&mut self, tid: Tid) {
        self.queues.remove(tid, RunState::Complete);
        self.tasks.remove(&tid);
        log::trace!("task {}: reaped", tid);
    }

    /// Moves every `Wait` task whose deadline has passed to `WaitWakeup`, timed out.
    fn expire(&mut self, now: u64) {
        let expired: Vec<Tid> = self
            .queues
            .wait
            .iter()
            .chain(&self.queues.wakeup)
            .copied()
            .filter(|tid| {
                self.tasks
                    .get(tid)
                    .and_then(|task| task.pending.as_ref()?.deadline)
                    .is_some_and(|deadline| deadline <= now)
            })
            .collect();

        for tid in expired {
            let task = self.record_mut(tid);
            if let Some(pending) = task.pending.as_mut() {
                pending.timed_out = true;
            }
            if task.state == RunState::Wait {
                self.transition(tid, RunState::WaitWakeup);
            }
        }
    }

    /// Resumes woken tasks whose wait is over; returns the rest to where they belong.
    fn evaluate_wakeups(&mut self) {
        let woken: Vec<Tid> = self.queues.wakeup.iter().copied().collect();
        for tid in woken {
            let task = self.record(tid);
            if task.state != RunState::WaitWakeup {
                continue;
            }
            let Some(pending) = task.pending.as_ref() else {
                panic!("task {} is in WaitWakeup without a pending call", tid);
            };
            let (predicate, resume) = (pending.predicate, pending.resume);
            let (timed_out, polled) = (pending.timed_out, pending.polled);

            let cause = if predicate(self, tid) {
                WakeCause::Signaled
            } else if timed_out {
                WakeCause::TimedOut
            } else {
                if !polled {
                    log::trace!("task {}: woken but not ready", tid);
                    self.transition(tid, RunState::Wait);
                }
                continue;
            };

            let value = resume(self, tid, cause);
            let task = self.record_mut(tid);
            task.pending = None;
            task.wake_value = value;
            self.transition(tid, RunState::Awake);
            log::trace!("task {}: resumed ({:?}) with {}", tid, cause, value);
        }
    }

    /// Arms the timer for the nearest wait deadline, no later than one quantum away.
    fn arm(&self, platform: &mut impl Platform, now: u64) {
        let limit = now + MAX_QUANTUM_US;
        let nearest = self
            .queues
            .wait
            .iter()
            .chain(&self.queues.wakeup)
            .filter_map(|tid| self.tasks.get(tid)?.pending.as_ref()?.deadline)
            .min();
        platform.arm_timer(nearest.map_or(limit, |deadline| deadline.min(limit)));
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("tasks", &self.tasks.len())
            .field("queues", &self.queues)
            .field("space", &self.space)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

fn never(_: &Kernel, _: Tid) -> bool {
    false
}

fn slept(_: &mut Kernel, _: Tid, _: WakeCause) -> i64 {
    OK
}

fn has_exited(kernel: &Kernel, tid: Tid) -> bool {
    match kernel.pending_reason(tid) {
        Some(WaitReason::Exit(target)) => kernel
            .task(target)
            .is_none_or(|task| task.exit.is_some()),
        _ => false,
    }
}

fn collect_exit(kernel: &mut Kernel, tid: Tid, _: WakeCause) -> i64 {
    match kernel.pending_reason(tid) {
        Some(WaitReason::Exit(target)) => kernel.collect_exit(tid, target),
        _ => BADARG,
    }
}
