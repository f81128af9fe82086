//! # Task Descriptors
//!
//! Defines the task model: one [`Task`] record per task, declared at build
//! time and never destroyed. The record mixes an immutable registration part
//! (entry point, arguments, priority, stack size) with two cells the
//! scheduler owns exclusively — the saved stack pointer and the wake-up
//! deadline. Application code never touches the cells; they have interior
//! mutability only so the table can live in an ordinary `static`.
//!
//! Tasks are identified by their index in the table. The last entry is
//! always the idle task, appended by [`os_tasks!`](crate::os_tasks).

use core::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

use crate::config::{IDLE_STACK_SIZE, LOWEST_PRIO, TASK_STACK_SIZE};

/// Task entry point: three opaque arguments, never returns.
///
/// The arguments land in `r0`-`r2` of the synthesized first-dispatch frame,
/// so the signature must stay `extern "C"`.
pub type TaskEntry = extern "C" fn(*mut (), *mut (), *mut ()) -> !;

/// `wakeup_time` value meaning "not sleeping". The wake predicate is
/// `now > wakeup_time`, which this value can never satisfy.
pub const NO_WAKEUP: u64 = u64::MAX;

/// A 64-bit tick deadline stored as two 32-bit halves.
///
/// The Cortex-M33 has no 64-bit atomics. A torn read cannot be observed in
/// practice: the owning task writes the cell only while it is `RUNNING`, and
/// the scheduler reads it only once the task has left the CPU (`PENDING` or
/// `EJECTED`).
struct WakeupTime {
    lo: AtomicU32,
    hi: AtomicU32,
}

impl WakeupTime {
    const fn new() -> Self {
        Self {
            lo: AtomicU32::new(NO_WAKEUP as u32),
            hi: AtomicU32::new((NO_WAKEUP >> 32) as u32),
        }
    }

    fn get(&self) -> u64 {
        let hi = self.hi.load(Ordering::Relaxed) as u64;
        let lo = self.lo.load(Ordering::Relaxed) as u64;
        (hi << 32) | lo
    }

    fn set(&self, ticks: u64) {
        self.lo.store(ticks as u32, Ordering::Relaxed);
        self.hi.store((ticks >> 32) as u32, Ordering::Relaxed);
    }
}

/// One task as the scheduler sees it.
pub struct Task {
    /// Function called on first dispatch. Must never return; the frame
    /// synthesizer still plants a trap sink in `lr` behind it.
    entry: TaskEntry,
    /// Opaque arguments handed to `entry`.
    args: [*mut (); 3],
    /// Larger is more urgent. 0 belongs to the idle task.
    priority: u8,
    /// Bytes this task owns inside the shared stack region.
    stack_size: usize,
    /// Saved stack pointer while the task is off-CPU. Written by the
    /// bootstrap and by the context-switch handler, nobody else.
    sp: AtomicPtr<u32>,
    /// Tick at which a sleeping task becomes eligible again.
    wakeup_time: WakeupTime,
}

// Safety: the raw argument pointers are opaque tokens only ever passed back
// to the task's own entry function, and the mutable cells follow the
// single-core, single-writer discipline documented on each accessor.
unsafe impl Sync for Task {}

impl Task {
    /// Declare an application task (the registration record).
    ///
    /// Order matters: the position in the [`os_tasks!`](crate::os_tasks)
    /// list is the task number, task 0 is launched at bootstrap, and ties
    /// between equal priorities go to the lower task number.
    pub const fn new(
        entry: TaskEntry,
        arg1: *mut (),
        arg2: *mut (),
        arg3: *mut (),
        priority: u8,
    ) -> Task {
        Task {
            entry,
            args: [arg1, arg2, arg3],
            priority,
            stack_size: TASK_STACK_SIZE,
            sp: AtomicPtr::new(core::ptr::null_mut()),
            wakeup_time: WakeupTime::new(),
        }
    }

    /// The stock idle task slot: lowest priority, small stack, `wfi` body.
    pub const fn idle() -> Task {
        Self::idle_with(crate::kernel::idle_task)
    }

    /// An idle slot with a custom body. The replacement inherits the idle
    /// contract: it must never return and never sleep.
    pub const fn idle_with(entry: TaskEntry) -> Task {
        Task {
            entry,
            args: [core::ptr::null_mut(); 3],
            priority: LOWEST_PRIO,
            stack_size: IDLE_STACK_SIZE,
            sp: AtomicPtr::new(core::ptr::null_mut()),
            wakeup_time: WakeupTime::new(),
        }
    }

    pub(crate) fn entry(&self) -> TaskEntry {
        self.entry
    }

    pub(crate) fn args(&self) -> [*mut (); 3] {
        self.args
    }

    pub(crate) fn priority(&self) -> u8 {
        self.priority
    }

    /// Bytes reserved for this task in the stack region.
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    /// Saved stack pointer. Meaningless while the task is `RUNNING`.
    pub(crate) fn sp(&self) -> *mut u32 {
        self.sp.load(Ordering::Relaxed)
    }

    /// Store the saved stack pointer. Called from the bootstrap and from
    /// the context-switch handler's save half only.
    pub(crate) fn set_sp(&self, sp: *mut u32) {
        self.sp.store(sp, Ordering::Relaxed);
    }

    pub(crate) fn wakeup_time(&self) -> u64 {
        self.wakeup_time.get()
    }

    /// Arm the wake-up deadline. Only the task itself does this, from
    /// `sleep`, while it is still on-CPU.
    pub(crate) fn set_wakeup_time(&self, ticks: u64) {
        self.wakeup_time.set(ticks);
    }

    pub(crate) fn clear_wakeup_time(&self) {
        self.wakeup_time.set(NO_WAKEUP);
    }

    /// A task counts as sleeping from `sleep` arming the deadline until the
    /// tick wake scan clears it.
    pub(crate) fn is_sleeping(&self) -> bool {
        self.wakeup_time.get() != NO_WAKEUP
    }
}

/// Declare the task table, its stack region, and the scheduler in one go.
///
/// This is the single registration construct: it appends the idle task,
/// derives the task count, and sizes the contiguous stack region as
/// `user_tasks * TASK_STACK_SIZE + IDLE_STACK_SIZE`. Invoke it once per
/// firmware.
///
/// ```ignore
/// static PORT: CortexM33 = CortexM33::new();
///
/// femtos::os_tasks! {
///     scheduler: SCHEDULER,
///     port: &PORT,
///     tasks: [
///         Task::new(sensor_task, ptr::null_mut(), ptr::null_mut(), ptr::null_mut(), 2),
///         Task::new(report_task, ptr::null_mut(), ptr::null_mut(), ptr::null_mut(), 1),
///     ],
/// }
/// ```
///
/// An `idle: my_idle` arm swaps the idle task body while keeping its slot,
/// priority, and stack size — the replacement must uphold the idle contract.
#[macro_export]
macro_rules! os_tasks {
    (
        scheduler: $vis:vis $name:ident,
        port: $port:expr,
        tasks: [ $($task:expr),+ $(,)? ] $(,)?
    ) => {
        $crate::os_tasks!(@build $vis $name, $port, $crate::Task::idle(), $($task),+);
    };

    (
        scheduler: $vis:vis $name:ident,
        port: $port:expr,
        tasks: [ $($task:expr),+ $(,)? ],
        idle: $idle:path $(,)?
    ) => {
        $crate::os_tasks!(@build $vis $name, $port, $crate::Task::idle_with($idle), $($task),+);
    };

    (@build $vis:vis $name:ident, $port:expr, $idle:expr, $($task:expr),+) => {
        const __FEMTOS_USER_TASKS: usize = [$(stringify!($task)),+].len();

        static __FEMTOS_STACKS: $crate::stack::StackRegion<
            { $crate::stack::region_size(__FEMTOS_USER_TASKS) },
        > = $crate::stack::StackRegion::new();

        static __FEMTOS_TASKS: [$crate::Task; __FEMTOS_USER_TASKS + 1] = [
            $($task,)+
            $idle,
        ];

        $vis static $name: $crate::Scheduler =
            $crate::Scheduler::new(&__FEMTOS_TASKS, __FEMTOS_STACKS.raw(), $port);
    };
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
