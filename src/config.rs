//! # femtos Configuration
//!
//! Compile-time constants governing the scheduler and system behavior.
//! All limits are fixed at compile time — no dynamic allocation.

/// Hard ceiling on the number of tasks, including the auto-appended idle
/// task. The state vectors are 32-bit masks with one bit per task, so this
/// can never be raised past 32. Applications therefore get at most 31 tasks
/// of their own.
pub const MAX_TASKS: usize = 32;

/// Scheduler tick interval in milliseconds. One tick is the unit of
/// scheduling time; `sleep` durations are rounded up to it.
pub const TICK_INTERVAL_MS: u32 = 1;

/// Stack bytes reserved for each application task. Must cover the deepest
/// call chain plus one full exception frame (tasks run on the main stack,
/// so interrupts stack on top of whichever task is current).
pub const TASK_STACK_SIZE: usize = 0x400;

/// Stack bytes reserved for the idle task. The idle task only executes
/// `wfi` in a loop, so it gets by with far less than a real task.
pub const IDLE_STACK_SIZE: usize = 0x100;

/// Core clock in Hz. The STM32U5 boots on the 4 MHz MSIS oscillator and the
/// demo never reprograms it; the SysTick reload value is derived from this.
pub const SYSTEM_CLOCK_HZ: u32 = 4_000_000;

/// Lowest task priority. Reserved for the idle task; application tasks
/// should use `LOWEST_PRIO + n`.
pub const LOWEST_PRIO: u8 = 0;

/// Word written to the bottom of every task stack at bootstrap. Purely a
/// post-mortem marker: nothing stops a task from running through it.
pub const STACK_CANARY: u32 = 0xC0DE_57A4;
