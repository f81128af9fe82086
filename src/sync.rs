//! # Synchronization Primitives
//!
//! Interrupt-safe critical section for the single-core model. The only
//! scheduler state that needs one is the `NEXT -> RUNNING` hand-off inside
//! the context-switch handler, which the tick must not interleave with.
//! Everything else gets by with single-word atomic edits.

/// Execute a closure with interrupts masked.
///
/// Keep the closure short: the tick handler is blocked for its duration and
/// a late tick is a late wake-up.
#[cfg(target_arch = "arm")]
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    cortex_m::interrupt::free(|_| f())
}

/// Host stand-in: unit tests drive the scheduler from a single thread, so
/// the closure runs as-is.
#[cfg(not(target_arch = "arm"))]
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    f()
}
