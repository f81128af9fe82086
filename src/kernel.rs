//! # Kernel
//!
//! The scheduler singleton and the task-facing API.
//!
//! [`Scheduler::start`](crate::Scheduler::start) publishes the scheduler's
//! address here before any interrupt can fire; the tick and context-switch
//! handlers, and the free functions below, all reach it through that one
//! pointer. It is written exactly once and the scheduler it points at is a
//! `'static` that never moves.

use core::sync::atomic::{AtomicPtr, Ordering};

use crate::scheduler::Scheduler;

/// Address of the one and only scheduler; null until bootstrap.
static SCHEDULER_PTR: AtomicPtr<Scheduler> = AtomicPtr::new(core::ptr::null_mut());

/// Publish the scheduler for the interrupt handlers. Called from
/// `Scheduler::start` before the tick or switch interrupts are configured.
pub(crate) fn install(scheduler: &'static Scheduler) {
    SCHEDULER_PTR.store(
        scheduler as *const Scheduler as *mut Scheduler,
        Ordering::Release,
    );
}

/// The scheduler, assuming bootstrap has run.
///
/// # Safety
///
/// Callable only from paths that cannot execute before [`install`]: the
/// tick and context-switch handlers, which are configured afterwards.
#[cfg_attr(not(target_arch = "arm"), allow(dead_code))]
pub(crate) unsafe fn scheduler() -> &'static Scheduler {
    unsafe { &*SCHEDULER_PTR.load(Ordering::Relaxed) }
}

fn try_scheduler() -> Option<&'static Scheduler> {
    let ptr = SCHEDULER_PTR.load(Ordering::Relaxed);
    if ptr.is_null() {
        None
    } else {
        // Safety: `install` only ever stores a valid `&'static Scheduler`.
        Some(unsafe { &*ptr })
    }
}

/// Tick callback handed to the port at bootstrap; runs in tick interrupt
/// context once per tick.
pub(crate) fn tick_entry() {
    // Safety: the tick is programmed after `install`.
    unsafe { scheduler() }.tick();
}

/// Voluntarily hand over the CPU. May or may not context-switch; returns
/// when the caller is next dispatched. A no-op before the scheduler starts.
pub fn yield_now() {
    if let Some(scheduler) = try_scheduler() {
        scheduler.yield_now();
    }
}

/// Sleep for at least `ms` milliseconds and at most one tick longer.
pub fn sleep(ms: u32) {
    if let Some(scheduler) = try_scheduler() {
        scheduler.sleep(ms);
    }
}

/// Ticks since boot; 0 before the scheduler starts.
pub fn ticks() -> u64 {
    match try_scheduler() {
        Some(scheduler) => scheduler.ticks(),
        None => 0,
    }
}

/// Blocking delay of roughly `us` microseconds without yielding.
pub fn busy_sleep(us: u32) {
    if let Some(scheduler) = try_scheduler() {
        scheduler.busy_sleep(us);
    }
}

/// The stock idle task: park the CPU until the next interrupt, forever.
///
/// Runs whenever no other task is ready, which is also why it must never
/// sleep. Swap in a custom body with the `idle:` arm of
/// [`os_tasks!`](crate::os_tasks).
#[cfg(target_arch = "arm")]
pub extern "C" fn idle_task(_arg1: *mut (), _arg2: *mut (), _arg3: *mut ()) -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}

/// Host stand-in: there is no `wfi` instruction to wait on, so just spin.
#[cfg(not(target_arch = "arm"))]
pub extern "C" fn idle_task(_arg1: *mut (), _arg2: *mut (), _arg3: *mut ()) -> ! {
    loop {
        core::hint::spin_loop();
    }
}
