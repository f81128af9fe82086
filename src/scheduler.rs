//! # Scheduler
//!
//! Core scheduling logic: the task state machine, the tick-driven wake scan,
//! priority selection, and the hand-off protocol with the context-switch
//! interrupt.
//!
//! ## State model
//!
//! Scheduler state is five 32-bit bitmasks, one per logical state, where bit
//! `31 - task_number` marks membership (MSB = task 0, so a leading-zero
//! count turns a mask into the lowest member task number):
//!
//! - `NEXT`    — chosen successor awaiting the context switch (≤ 1 bit)
//! - `READY`   — runnable, not on the CPU
//! - `PENDING` — sleeping until a tick deadline
//! - `RUNNING` — on the CPU (exactly 1 bit outside switch transients)
//! - `EJECTED` — just switched out, not yet reclassified (≤ 1 bit)
//!
//! Every task is in exactly one of `READY`/`PENDING`/`RUNNING`/`EJECTED`;
//! `NEXT` overlays that partition while a preemption is in flight.
//!
//! ## Scheduling algorithm
//!
//! On every tick: reclassify the ejected task, wake sleepers whose deadline
//! has passed (`now > wakeup_time`, strictly), and if anybody woke, preempt
//! the current task when a ready task of equal or higher priority exists.
//! Ties go to the lowest task number. A tick never switches to a strictly
//! lower-priority task; voluntary `yield_now`/`sleep` are the only way down.

use core::convert::Infallible;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::arch::{count_leading_zeros, SystemPort};
use crate::config::{MAX_TASKS, STACK_CANARY, TICK_INTERVAL_MS};
use crate::error::Error;
use crate::kernel;
use crate::stack::RawStacks;
use crate::sync;
use crate::task::Task;

// ---------------------------------------------------------------------------
// State vectors
// ---------------------------------------------------------------------------

/// Bit for `task` under the MSB-is-task-0 convention.
const fn task_bit(task: usize) -> u32 {
    1 << (31 - task)
}

/// Lowest-numbered member of a state mask. 32 for an empty mask, so callers
/// must check for that before indexing.
fn first_task(mask: u32) -> usize {
    count_leading_zeros(mask) as usize
}

/// One state mask. Single-word atomics are all the single-core model needs;
/// the one multi-word edit (`NEXT -> RUNNING`) is made in a critical
/// section by [`Scheduler::switch_in`].
struct Mask(AtomicU32);

impl Mask {
    const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    fn get(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }

    fn set(&self, mask: u32) {
        self.0.store(mask, Ordering::Relaxed);
    }

    fn insert(&self, task: usize) {
        self.0.fetch_or(task_bit(task), Ordering::Relaxed);
    }

    fn remove(&self, task: usize) {
        self.0.fetch_and(!task_bit(task), Ordering::Relaxed);
    }

    fn merge(&self, mask: u32) {
        self.0.fetch_or(mask, Ordering::Relaxed);
    }
}

struct StateVectors {
    next: Mask,
    ready: Mask,
    pending: Mask,
    running: Mask,
    ejected: Mask,
}

impl StateVectors {
    const fn new() -> Self {
        Self {
            next: Mask::new(),
            ready: Mask::new(),
            pending: Mask::new(),
            running: Mask::new(),
            ejected: Mask::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// The scheduler singleton: task table, stack region, architecture port,
/// and the state vectors. Built `const` by [`os_tasks!`](crate::os_tasks)
/// and installed for the interrupt handlers by [`Scheduler::start`].
pub struct Scheduler {
    /// Ordered task table; index = task number, last entry is the idle task.
    tasks: &'static [Task],
    /// The contiguous stack arena the tasks live in.
    stacks: RawStacks,
    /// Constant-after-construction binding to the architecture.
    port: &'static dyn SystemPort,
    state: StateVectors,
}

// Safety: `RawStacks` carries a raw pointer into a `'static` region that is
// only ever carved into per-task stacks. All mutable state is in atomics
// governed by the single-core discipline documented per method.
unsafe impl Sync for Scheduler {}

impl Scheduler {
    /// Build the scheduler. The stack region must be sized by
    /// [`region_size`](crate::stack::region_size) for `tasks.len() - 1` user
    /// tasks, which the registration macro guarantees.
    pub const fn new(
        tasks: &'static [Task],
        stacks: RawStacks,
        port: &'static dyn SystemPort,
    ) -> Scheduler {
        Scheduler {
            tasks,
            stacks,
            port,
            state: StateVectors::new(),
        }
    }

    /// Bring the system up and hand the CPU to task 0. Returns only when
    /// bootstrap validation or the port rejects the configuration; on
    /// success the direct call into task 0 never comes back.
    pub fn start(&'static self) -> Result<Infallible, Error> {
        let count = self.tasks.len();
        if count > MAX_TASKS {
            os_error!("task count {} exceeds the {}-task ceiling", count, MAX_TASKS);
            return Err(Error::TooManyTasks);
        }

        os_debug!("scheduler start: {} tasks", count);

        for (num, task) in self.tasks.iter().enumerate() {
            task.set_sp(self.stacks.initial_top(num, count));
            task.clear_wakeup_time();
            if num > 0 {
                self.state.ready.insert(num);
            } else {
                self.state.running.insert(num);
            }

            // canary at the far end of the sub-region
            unsafe {
                self.stacks
                    .sub_region_bottom(num, count)
                    .write_volatile(STACK_CANARY);
            }

            self.port.task_stack_init(task);
        }

        // The interrupt handlers find the scheduler through this; it must
        // be in place before either interrupt can fire.
        kernel::install(self);

        self.port.ctxswitch_init()?;
        self.port.tick_init(TICK_INTERVAL_MS, kernel::tick_entry)?;
        self.port.sync_barriers();

        let task0 = &self.tasks[0];
        let [arg1, arg2, arg3] = task0.args();
        (task0.entry())(arg1, arg2, arg3)
    }

    /// Tick entry point, invoked from tick interrupt context once per
    /// millisecond.
    ///
    /// A tick that wakes nobody does no work beyond the reclaim phase. When
    /// somebody does wake, the current task is preempted only by an equal-
    /// or higher-priority candidate, lowest task number first.
    pub fn tick(&self) {
        self.reclaim();

        if self.state.pending.get() == 0 {
            return;
        }

        let now = self.port.tick_get();

        // Wake scan: walk a working copy of PENDING highest-bit-first. The
        // sentinel deadline is u64::MAX, which `now` can never exceed, so
        // no separate "is sleeping" test is needed here.
        let mut scan = self.state.pending.get();
        let mut woke = false;
        while scan != 0 {
            let task = first_task(scan);
            if now > self.tasks[task].wakeup_time() {
                self.tasks[task].clear_wakeup_time();
                self.state.pending.remove(task);
                self.state.ready.insert(task);
                woke = true;
            }
            scan &= !task_bit(task);
        }

        if !woke {
            return;
        }

        let running = self.state.running.get();
        if running == 0 {
            // The tick landed between the two halves of a context switch.
            // Whoever woke is READY and will be considered next tick.
            return;
        }

        let curr = first_task(running);
        let selected = self.select_candidate(curr);
        if selected != curr {
            os_trace!("tick preempts task {} with task {}", curr, selected);
            self.stage_next(selected);
            self.port.ctxswitch_trigger();
        }
    }

    /// Voluntarily hand over the CPU.
    ///
    /// Switches to the first ready task of equal or higher priority, if
    /// any; otherwise returns immediately — unless the caller is mid-
    /// `sleep`, in which case the first ready task of *any* priority (at
    /// minimum the idle task) takes over. Returns when the caller is next
    /// dispatched.
    pub fn yield_now(&self) {
        self.reclaim();

        if self.state.ready.get() == 0 {
            return;
        }

        let running = self.state.running.get();
        if running == 0 {
            return;
        }
        let curr = first_task(running);

        os_trace!("yield from task {}", curr);

        let mut next = self.select_candidate(curr);
        if next == curr {
            if !self.tasks[curr].is_sleeping() {
                // nothing better to run and no deadline armed: keep going
                return;
            }
            // sleeping: fall through to whatever is ready, idle included
            next = first_task(self.state.ready.get());
        }

        self.stage_next(next);
        self.port.ctxswitch_trigger();
    }

    /// Put the current task to sleep for at least `ms` milliseconds.
    ///
    /// The wake predicate is strictly `now > deadline`, so the task resumes
    /// on the first tick *after* the deadline — `sleep(0)` still blocks for
    /// one tick, and the worst case is one tick beyond the request. The
    /// `PENDING` transition itself happens in the reclaim phase of the next
    /// scheduler entry, once the context switch has ejected the task.
    pub fn sleep(&self, ms: u32) {
        let running = self.state.running.get();
        if running == 0 {
            return;
        }
        let curr = first_task(running);

        os_trace!("task {} sleeps {} ms", curr, ms);

        self.tasks[curr].set_wakeup_time(self.port.tick_get() + ms as u64);
        self.yield_now();
    }

    /// Monotonic tick count since boot.
    pub fn ticks(&self) -> u64 {
        self.port.tick_get()
    }

    /// Blocking delay that does not yield.
    pub fn busy_sleep(&self, us: u32) {
        self.port.busy_sleep(us);
    }

    /// True while every task's stack-bottom canary word is intact. A false
    /// return means some stack has overflowed at some point; the kernel
    /// makes no attempt to act on it.
    pub fn stack_canaries_ok(&self) -> bool {
        let count = self.tasks.len();
        (0..count).all(|num| unsafe {
            self.stacks
                .sub_region_bottom(num, count)
                .read_volatile()
                == STACK_CANARY
        })
    }

    /// Reclassify the task the last context switch ejected: back to
    /// `PENDING` if its deadline is armed, `READY` otherwise. Runs at the
    /// top of every scheduler entry.
    fn reclaim(&self) {
        let ejected = self.state.ejected.get();
        if ejected == 0 {
            return;
        }

        let task = first_task(ejected);
        if self.tasks[task].is_sleeping() {
            self.state.pending.merge(ejected);
        } else {
            self.state.ready.merge(ejected);
        }
        self.state.ejected.set(0);
    }

    /// First READY task (lowest number wins) with priority at least that of
    /// `curr`; `curr` itself when there is none.
    fn select_candidate(&self, curr: usize) -> usize {
        let floor = self.tasks[curr].priority();
        let mut candidates = self.state.ready.get();
        while candidates != 0 {
            let task = first_task(candidates);
            if self.tasks[task].priority() >= floor {
                return task;
            }
            candidates &= !task_bit(task);
        }
        curr
    }

    /// Stage `task` as the successor: it leaves READY and becomes the
    /// single NEXT bit for the context switch to consume.
    fn stage_next(&self, task: usize) {
        self.state.next.set(task_bit(task));
        self.state.ready.remove(task);
    }

    /// Save half of the context switch: the running task becomes EJECTED
    /// (reclassified on the next scheduler entry) and its grown stack is
    /// filed away. Called from the port's context-switch handler after it
    /// has pushed the callee-save registers.
    pub fn switch_out(&self, sp: *mut u32) {
        let running = self.state.running.get();
        self.state.ejected.set(running);
        self.state.running.set(0);

        let curr = first_task(running);
        self.tasks[curr].set_sp(sp);
    }

    /// Restore half of the context switch: consume NEXT into RUNNING and
    /// produce the successor's stack pointer for the port to resume from.
    ///
    /// The tick runs at higher priority and may restage NEXT at any moment,
    /// so the read-promote-clear must be indivisible.
    pub fn switch_in(&self) -> *mut u32 {
        let next_mask = sync::critical_section(|| {
            let mask = self.state.next.get();
            self.state.running.set(mask);
            self.state.next.set(0);
            mask
        });

        let next = first_task(next_mask);
        self.tasks[next].sp()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IDLE_STACK_SIZE, TASK_STACK_SIZE};
    use crate::stack::{region_size, StackRegion};
    use core::ptr::null_mut;
    use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize};
    use std::boxed::Box;
    use std::vec::Vec;

    extern "C" fn spin(_: *mut (), _: *mut (), _: *mut ()) -> ! {
        unreachable!()
    }

    /// Recording port double with a settable clock.
    struct FakePort {
        now: AtomicU64,
        triggers: AtomicUsize,
        tick_inits: AtomicUsize,
        ctx_inits: AtomicUsize,
        stack_inits: AtomicUsize,
        fail_tick_init: AtomicBool,
    }

    impl FakePort {
        const fn new() -> Self {
            Self {
                now: AtomicU64::new(0),
                triggers: AtomicUsize::new(0),
                tick_inits: AtomicUsize::new(0),
                ctx_inits: AtomicUsize::new(0),
                stack_inits: AtomicUsize::new(0),
                fail_tick_init: AtomicBool::new(false),
            }
        }

        fn set_now(&self, ticks: u64) {
            self.now.store(ticks, Ordering::Relaxed);
        }

        fn triggers(&self) -> usize {
            self.triggers.load(Ordering::Relaxed)
        }
    }

    impl SystemPort for FakePort {
        fn tick_init(&self, _interval_ms: u32, _callback: fn()) -> Result<(), Error> {
            self.tick_inits.fetch_add(1, Ordering::Relaxed);
            if self.fail_tick_init.load(Ordering::Relaxed) {
                Err(Error::TickInit)
            } else {
                Ok(())
            }
        }

        fn tick_get(&self) -> u64 {
            self.now.load(Ordering::Relaxed)
        }

        fn busy_sleep(&self, _us: u32) {}

        fn ctxswitch_init(&self) -> Result<(), Error> {
            self.ctx_inits.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn ctxswitch_trigger(&self) {
            self.triggers.fetch_add(1, Ordering::Relaxed);
        }

        fn task_stack_init(&self, _task: &Task) {
            self.stack_inits.fetch_add(1, Ordering::Relaxed);
        }

        fn sync_barriers(&self) {}
    }

    /// Leak a scheduler with one user task per priority in `prios`, plus
    /// the idle task the macro would append. The region is sized for the
    /// start-path tests; pure state-machine tests never touch it.
    fn fixture(prios: &[u8]) -> (&'static Scheduler, &'static FakePort) {
        let port: &'static FakePort = Box::leak(Box::new(FakePort::new()));
        let mut tasks = Vec::with_capacity(prios.len() + 1);
        for &prio in prios {
            tasks.push(Task::new(spin, null_mut(), null_mut(), null_mut(), prio));
        }
        tasks.push(Task::idle());
        let tasks: &'static [Task] = Vec::leak(tasks);
        let stacks = Box::leak(Box::new(StackRegion::<{ region_size(8) }>::new()));
        let sched = Box::leak(Box::new(Scheduler::new(tasks, stacks.raw(), port)));
        (sched, port)
    }

    /// Put the state vectors where `start` would leave them: task 0
    /// running, everyone else ready, nobody sleeping.
    fn seed_started(s: &Scheduler) {
        s.state.running.insert(0);
        for num in 1..s.tasks.len() {
            s.state.ready.insert(num);
        }
    }

    /// Every task in exactly one state. A staged task sits in NEXT alone
    /// (staging removes it from READY until the switch promotes it), so
    /// NEXT counts as a class here.
    fn assert_partition(s: &Scheduler) {
        let next = s.state.next.get();
        let ready = s.state.ready.get();
        let pending = s.state.pending.get();
        let running = s.state.running.get();
        let ejected = s.state.ejected.get();

        for num in 0..s.tasks.len() {
            let bit = task_bit(num);
            let memberships = (next & bit != 0) as u32
                + (ready & bit != 0) as u32
                + (pending & bit != 0) as u32
                + (running & bit != 0) as u32
                + (ejected & bit != 0) as u32;
            assert_eq!(memberships, 1, "task {} is in {} states", num, memberships);
        }
        assert!(next.count_ones() <= 1);
        assert!(running.count_ones() <= 1);
        assert!(ejected.count_ones() <= 1);
    }

    // -- registration ------------------------------------------------------

    mod default_idle {
        use super::super::*;
        use super::FakePort;
        use core::ptr::null_mut;

        extern "C" fn worker(_: *mut (), _: *mut (), _: *mut ()) -> ! {
            unreachable!()
        }

        static PORT: FakePort = FakePort::new();

        crate::os_tasks! {
            scheduler: pub SCHED,
            port: &PORT,
            tasks: [
                crate::Task::new(worker, null_mut(), null_mut(), null_mut(), 2),
                crate::Task::new(worker, null_mut(), null_mut(), null_mut(), 1),
            ],
        }
    }

    mod custom_idle {
        use super::super::*;
        use super::FakePort;
        use core::ptr::null_mut;

        extern "C" fn worker(_: *mut (), _: *mut (), _: *mut ()) -> ! {
            unreachable!()
        }

        pub extern "C" fn quiet_idle(_: *mut (), _: *mut (), _: *mut ()) -> ! {
            unreachable!()
        }

        static PORT: FakePort = FakePort::new();

        crate::os_tasks! {
            scheduler: pub SCHED,
            port: &PORT,
            tasks: [
                crate::Task::new(worker, null_mut(), null_mut(), null_mut(), 1),
            ],
            idle: quiet_idle,
        }
    }

    #[test]
    fn test_macro_appends_idle_and_sizes_region() {
        let s = &default_idle::SCHED;
        assert_eq!(s.tasks.len(), 3);
        assert_eq!(s.tasks[2].priority(), 0);
        assert_eq!(s.tasks[2].stack_size(), IDLE_STACK_SIZE);
        assert_eq!(s.tasks[0].stack_size(), TASK_STACK_SIZE);
        assert_eq!(s.stacks.len(), region_size(2));
    }

    #[test]
    fn test_macro_idle_override_keeps_the_slot() {
        let s = &custom_idle::SCHED;
        assert_eq!(s.tasks.len(), 2);
        let idle = &s.tasks[1];
        assert_eq!(idle.priority(), 0);
        assert_eq!(idle.stack_size(), IDLE_STACK_SIZE);
        assert_eq!(idle.entry() as usize, custom_idle::quiet_idle as usize);
    }

    // -- bootstrap ---------------------------------------------------------

    #[test]
    fn test_start_rejects_more_than_32_tasks() {
        // 32 user tasks + idle = 33
        let (s, port) = fixture(&[1u8; 32]);
        assert_eq!(s.start(), Err(Error::TooManyTasks));
        // the tick was never programmed
        assert_eq!(port.tick_inits.load(Ordering::Relaxed), 0);
        assert_eq!(port.ctx_inits.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_start_seeds_tasks_before_port_init_can_fail() {
        let (s, port) = fixture(&[2, 1]);
        port.fail_tick_init.store(true, Ordering::Relaxed);

        assert_eq!(s.start(), Err(Error::TickInit));

        // ctxswitch comes first, then the failing tick init
        assert_eq!(port.ctx_inits.load(Ordering::Relaxed), 1);
        assert_eq!(port.tick_inits.load(Ordering::Relaxed), 1);

        // per-task init already happened: task 0 running, others ready,
        // stack pointers assigned, frames requested, canaries written
        assert_eq!(s.state.running.get(), task_bit(0));
        assert_eq!(s.state.ready.get(), task_bit(1) | task_bit(2));
        assert!(s.tasks.iter().all(|t| !t.sp().is_null()));
        assert!(s.tasks.iter().all(|t| !t.is_sleeping()));
        assert_eq!(port.stack_inits.load(Ordering::Relaxed), 3);
        assert!(s.stack_canaries_ok());
        assert_partition(s);
    }

    #[test]
    fn test_canary_reports_a_smashed_stack() {
        let (s, port) = fixture(&[1]);
        port.fail_tick_init.store(true, Ordering::Relaxed);
        let _ = s.start();

        assert!(s.stack_canaries_ok());
        unsafe {
            s.stacks.sub_region_bottom(0, s.tasks.len()).write_volatile(0);
        }
        assert!(!s.stack_canaries_ok());
    }

    // -- tick path ---------------------------------------------------------

    #[test]
    fn test_tick_with_nothing_pending_changes_nothing() {
        let (s, port) = fixture(&[2, 1]);
        seed_started(s);

        s.tick();

        assert_eq!(s.state.running.get(), task_bit(0));
        assert_eq!(s.state.ready.get(), task_bit(1) | task_bit(2));
        assert_eq!(s.state.pending.get(), 0);
        assert_eq!(s.state.next.get(), 0);
        assert_eq!(port.triggers(), 0);
        assert_partition(s);
    }

    #[test]
    fn test_reclaim_moves_ejected_to_ready() {
        let (s, _) = fixture(&[1, 1]);
        // task 1 was just switched out in favor of task 0, no deadline
        s.state.running.insert(0);
        s.state.ejected.insert(1);
        s.state.ready.insert(2);

        s.tick();

        assert_eq!(s.state.ejected.get(), 0);
        assert!(s.state.ready.get() & task_bit(1) != 0);
        assert_partition(s);
    }

    #[test]
    fn test_reclaim_moves_sleeping_ejected_to_pending() {
        let (s, _) = fixture(&[1, 1]);
        s.state.running.insert(0);
        s.state.ejected.insert(1);
        s.state.ready.insert(2);
        s.tasks[1].set_wakeup_time(50);

        s.tick();

        assert_eq!(s.state.ejected.get(), 0);
        assert!(s.state.pending.get() & task_bit(1) != 0);
        // still asleep: the deadline has not passed
        assert!(s.tasks[1].is_sleeping());
        assert_partition(s);
    }

    #[test]
    fn test_wake_is_strictly_after_the_deadline() {
        let (s, port) = fixture(&[1]);
        // idle runs while task 0 sleeps until tick 50
        s.state.running.insert(1);
        s.state.pending.insert(0);
        s.tasks[0].set_wakeup_time(50);

        port.set_now(50);
        s.tick();
        assert!(s.state.pending.get() & task_bit(0) != 0);
        assert_eq!(port.triggers(), 0);

        port.set_now(51);
        s.tick();

        // woken, deadline disarmed, and idle is preempted
        assert!(!s.tasks[0].is_sleeping());
        assert_eq!(s.state.pending.get(), 0);
        assert_eq!(s.state.next.get(), task_bit(0));
        assert_eq!(port.triggers(), 1);
        assert_partition(s);
    }

    #[test]
    fn test_wake_of_higher_priority_preempts() {
        let (s, port) = fixture(&[2, 1]);
        // task 1 (prio 1) runs; task 0 (prio 2) sleeps until 50
        s.state.running.insert(1);
        s.state.ready.insert(2);
        s.state.pending.insert(0);
        s.tasks[0].set_wakeup_time(50);

        port.set_now(51);
        s.tick();

        assert_eq!(s.state.next.get(), task_bit(0));
        assert!(s.state.ready.get() & task_bit(0) == 0);
        assert_eq!(port.triggers(), 1);
    }

    #[test]
    fn test_wake_of_lower_priority_does_not_preempt() {
        let (s, port) = fixture(&[1, 2]);
        // task 1 (prio 2) runs; task 0 (prio 1) sleeps until 50
        s.state.running.insert(1);
        s.state.ready.insert(2);
        s.state.pending.insert(0);
        s.tasks[0].set_wakeup_time(50);

        port.set_now(51);
        s.tick();

        // woken but only made ready
        assert!(s.state.ready.get() & task_bit(0) != 0);
        assert_eq!(s.state.next.get(), 0);
        assert_eq!(s.state.running.get(), task_bit(1));
        assert_eq!(port.triggers(), 0);
        assert_partition(s);
    }

    #[test]
    fn test_wake_of_equal_priority_preempts() {
        let (s, port) = fixture(&[1, 1]);
        s.state.running.insert(1);
        s.state.ready.insert(2);
        s.state.pending.insert(0);
        s.tasks[0].set_wakeup_time(10);

        port.set_now(11);
        s.tick();

        assert_eq!(s.state.next.get(), task_bit(0));
        assert_eq!(port.triggers(), 1);
    }

    #[test]
    fn test_equal_priorities_tie_break_to_lowest_task_number() {
        let (s, port) = fixture(&[1, 1, 1]);
        // task 2 runs; tasks 0 and 1 both wake on this tick
        s.state.running.insert(2);
        s.state.ready.insert(3);
        s.state.pending.insert(0);
        s.state.pending.insert(1);
        s.tasks[0].set_wakeup_time(5);
        s.tasks[1].set_wakeup_time(5);

        port.set_now(6);
        s.tick();

        assert_eq!(s.state.next.get(), task_bit(0));
        // the loser stays ready
        assert!(s.state.ready.get() & task_bit(1) != 0);
    }

    #[test]
    fn test_tick_mid_switch_skips_the_preemption_decision() {
        let (s, port) = fixture(&[1]);
        // between switch_out and switch_in: RUNNING is transiently empty
        s.state.ejected.insert(1);
        s.state.pending.insert(0);
        s.tasks[0].set_wakeup_time(1);

        port.set_now(10);
        s.tick();

        // the sleeper still wakes, but nobody is preempted
        assert!(s.state.ready.get() & task_bit(0) != 0);
        assert_eq!(s.state.next.get(), 0);
        assert_eq!(port.triggers(), 0);
    }

    // -- yield -------------------------------------------------------------

    #[test]
    fn test_yield_returns_without_an_equal_priority_candidate() {
        let (s, port) = fixture(&[1]);
        seed_started(s);

        s.yield_now();

        // only the idle task was ready, so the caller keeps the CPU
        assert_eq!(s.state.running.get(), task_bit(0));
        assert_eq!(s.state.next.get(), 0);
        assert_eq!(port.triggers(), 0);
        assert_partition(s);
    }

    #[test]
    fn test_yield_hands_over_to_an_equal_priority_peer() {
        let (s, port) = fixture(&[1, 1]);
        seed_started(s);

        s.yield_now();

        assert_eq!(s.state.next.get(), task_bit(1));
        assert!(s.state.ready.get() & task_bit(1) == 0);
        assert_eq!(port.triggers(), 1);
    }

    #[test]
    fn test_yield_while_sleeping_falls_back_to_any_ready_task() {
        let (s, port) = fixture(&[2, 1]);
        seed_started(s);
        // task 0 (prio 2) arms a deadline; only lower-priority tasks ready
        s.tasks[0].set_wakeup_time(100);

        s.yield_now();

        // the highest-bit ready task takes over even at lower priority
        assert_eq!(s.state.next.get(), task_bit(1));
        assert_eq!(port.triggers(), 1);
    }

    #[test]
    fn test_yield_reclaims_before_selecting() {
        let (s, port) = fixture(&[1, 1]);
        // task 1 just got switched out, task 0 runs, nothing ready yet
        s.state.running.insert(0);
        s.state.ejected.insert(1);
        s.state.ready.insert(2);

        s.yield_now();

        // reclaim made task 1 ready, so the yield can pick it
        assert_eq!(s.state.next.get(), task_bit(1));
        assert_eq!(port.triggers(), 1);
    }

    // -- sleep -------------------------------------------------------------

    #[test]
    fn test_sleep_arms_the_deadline_and_yields_to_idle() {
        let (s, port) = fixture(&[1]);
        seed_started(s);
        port.set_now(7);

        s.sleep(100);

        assert_eq!(s.tasks[0].wakeup_time(), 107);
        // idle (prio 0) is all that is ready, and a sleeper may not keep
        // the CPU, so it is staged regardless of priority
        assert_eq!(s.state.next.get(), task_bit(1));
        assert_eq!(port.triggers(), 1);
    }

    // -- context-switch handshake ------------------------------------------

    #[test]
    fn test_switch_handshake_moves_running_to_ejected_and_next_in() {
        let (s, _) = fixture(&[1, 1]);
        seed_started(s);
        s.stage_next(1);
        s.tasks[1].set_sp(0xB000 as *mut u32);

        s.switch_out(0xA000 as *mut u32);
        assert_eq!(s.state.ejected.get(), task_bit(0));
        assert_eq!(s.state.running.get(), 0);
        assert_eq!(s.tasks[0].sp() as usize, 0xA000);

        let resume = s.switch_in();
        assert_eq!(resume as usize, 0xB000);
        assert_eq!(s.state.running.get(), task_bit(1));
        assert_eq!(s.state.next.get(), 0);
        assert_partition(s);
    }

    // -- end-to-end scenarios ----------------------------------------------

    /// Drive a staged switch through both handler halves, as PendSV would.
    fn perform_switch(s: &Scheduler, sp: *mut u32) {
        s.switch_out(sp);
        let _ = s.switch_in();
    }

    #[test]
    fn test_scenario_two_equal_peers_trade_the_cpu() {
        let (s, _) = fixture(&[1, 1]);
        seed_started(s);

        // A yields to B
        s.yield_now();
        assert_eq!(s.state.next.get(), task_bit(1));
        perform_switch(s, 0xA000 as *mut u32);
        assert_eq!(s.state.running.get(), task_bit(1));

        // B yields; the reclaim phase makes A eligible again and the
        // tie-break picks it
        s.yield_now();
        assert_eq!(s.state.next.get(), task_bit(0));
        perform_switch(s, 0xB000 as *mut u32);
        assert_eq!(s.state.running.get(), task_bit(0));
        assert_partition(s);
    }

    #[test]
    fn test_scenario_sleep_runs_idle_until_the_wake_tick() {
        let (s, port) = fixture(&[1]);
        seed_started(s);

        // task 0 sleeps 100 ms at tick 0; idle takes over
        s.sleep(100);
        perform_switch(s, 0xA000 as *mut u32);
        assert_eq!(s.state.running.get(), task_bit(1));

        // ticks 1..=100: the first tick reclaims the sleeper into PENDING,
        // none of them wakes it or stages a switch
        for now in 1..=100u64 {
            port.set_now(now);
            s.tick();
            assert_eq!(s.state.next.get(), 0, "woken early at tick {}", now);
            assert!(s.state.pending.get() & task_bit(0) != 0);
            assert_partition(s);
        }

        // tick 101 wakes it and preempts idle
        port.set_now(101);
        s.tick();
        assert_eq!(s.state.next.get(), task_bit(0));
        assert!(s.ticks() >= 100 + 1);

        perform_switch(s, 0xB000 as *mut u32);
        assert_eq!(s.state.running.get(), task_bit(0));
        assert_partition(s);
    }

    #[test]
    fn test_scenario_preemption_never_lowers_the_running_priority() {
        let (s, port) = fixture(&[3, 2, 1]);
        seed_started(s);

        // the high-priority task sleeps; the mid one is next by priority
        port.set_now(0);
        s.sleep(10);
        perform_switch(s, 0xA000 as *mut u32);
        assert_eq!(s.state.running.get(), task_bit(1));

        // while it waits, every tick keeps the invariant: the running
        // task's priority never drops below what it preempted
        for now in 1..=10u64 {
            port.set_now(now);
            s.tick();
            assert_eq!(s.state.next.get(), 0);
        }

        port.set_now(11);
        s.tick();
        assert_eq!(s.state.next.get(), task_bit(0));
        let woken = first_task(s.state.next.get());
        let curr = first_task(s.state.running.get());
        assert!(s.tasks[woken].priority() >= s.tasks[curr].priority());
    }
}
