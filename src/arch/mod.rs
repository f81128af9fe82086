//! # Architecture Port Layer
//!
//! The scheduler is pure policy; everything that touches hardware goes
//! through the [`SystemPort`] capability trait. The firmware binds a
//! [`cortex_m33::CortexM33`] once at registration time and the binding never
//! changes afterwards; host tests bind a fake instead.

use crate::error::Error;
use crate::task::Task;

pub(crate) mod frame;

#[cfg(target_arch = "arm")]
pub mod cortex_m33;

/// Services the scheduler consumes from the architecture.
///
/// Pure mechanism, no policy: the port decides *how* to raise an interrupt
/// or seed a stack, never *which* task runs.
pub trait SystemPort: Sync {
    /// Program the periodic tick at `interval_ms` milliseconds and arrange
    /// for `callback` to run from tick interrupt context.
    fn tick_init(&self, interval_ms: u32, callback: fn()) -> Result<(), Error>;

    /// Monotonic tick count since boot.
    fn tick_get(&self) -> u64;

    /// Blocking delay without yielding the CPU.
    fn busy_sleep(&self, us: u32);

    /// Configure the context-switch interrupt at a priority strictly below
    /// the tick, so tick-driven state edits always precede the switch they
    /// request.
    fn ctxswitch_init(&self) -> Result<(), Error>;

    /// Request a context switch at the earliest opportunity (tail-chained
    /// behind whatever interrupt is active).
    fn ctxswitch_trigger(&self);

    /// Populate `task`'s stack so that restoring it dispatches
    /// `entry(arg1, arg2, arg3)`. The task's `sp` must already point at its
    /// initial top and is updated to the synthesized frame.
    fn task_stack_init(&self, task: &Task);

    /// Instruction- and data-synchronization barriers, issued once at the
    /// end of bootstrap so the interrupt configuration is visible before
    /// the first interrupt can fire.
    fn sync_barriers(&self);
}

/// Count leading zeros; 32 for a zero input.
///
/// The selection loops lean on this: with the MSB-is-task-0 convention the
/// leading-zero count of a state mask *is* the lowest member task number.
/// Lowers to the `clz` instruction on ARM, so there is no reason to route
/// it through the port.
#[inline]
pub(crate) fn count_leading_zeros(value: u32) -> u32 {
    value.leading_zeros()
}
