//! Kernel error type.
//!
//! Everything that can go wrong goes wrong before the scheduler starts:
//! either the task table fails validation or the architecture port rejects
//! an init call. Once `Scheduler::start` has handed control to task 0 there
//! is no error path left — interrupt handlers have nobody to report to.

/// Reasons `Scheduler::start` can refuse to bring the system up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The task table (idle task included) exceeds the 32-task ceiling.
    TooManyTasks,
    /// The port could not program the periodic tick, e.g. the requested
    /// interval does not fit the timer's reload register.
    TickInit,
    /// The port could not configure the context-switch interrupt.
    ContextSwitchInit,
}
