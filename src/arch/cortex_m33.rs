//! # Cortex-M33 Port
//!
//! Hardware backing for [`SystemPort`] on the Armv8-M mainline core:
//! SysTick drives the scheduler tick and the 64-bit tick counter, PendSV
//! performs the deferred context switch.
//!
//! ## Interrupt priorities
//!
//! SysTick runs at 0xC0 and PendSV at 0xFF, the lowest priority. The tick
//! may therefore preempt a switch in progress (the scheduler's reclaim
//! phase is built for that), but a switch can never interleave with itself
//! and never delays the tick.
//!
//! ## Stacking model
//!
//! Everything — bootstrap, tasks, handlers — runs on the main stack
//! pointer. Task 0 is launched by a direct call from `Scheduler::start`, so
//! it inherits the boot stack; every other task starts from the frame
//! seeded into its own sub-region. The switch handler swaps MSP between
//! task stacks directly.

use core::arch::naked_asm;
use core::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

use crate::arch::{frame, SystemPort};
use crate::config::SYSTEM_CLOCK_HZ;
use crate::error::Error;
use crate::kernel;
use crate::task::Task;

// ---------------------------------------------------------------------------
// System Control Space registers
// ---------------------------------------------------------------------------

const SYST_CSR: *mut u32 = 0xE000_E010 as *mut u32;
const SYST_RVR: *mut u32 = 0xE000_E014 as *mut u32;
const SYST_CVR: *mut u32 = 0xE000_E018 as *mut u32;
const ICSR: *mut u32 = 0xE000_ED04 as *mut u32;
const SHPR3: *mut u32 = 0xE000_ED20 as *mut u32;

/// CLKSOURCE | TICKINT | ENABLE
const SYST_CSR_RUN: u32 = 0x7;
/// The reload register is 24 bits wide.
const SYST_RVR_MAX: u32 = 0x00FF_FFFF;

const PENDSVSET: u32 = 1 << 28;

const SYSTICK_PRIO_MASK: u32 = 0xFF << 24;
const SYSTICK_PRIO: u32 = 0xC0 << 24;
const PENDSV_PRIO_MASK: u32 = 0xFF << 16;
const PENDSV_PRIO: u32 = 0xFF << 16;

// ---------------------------------------------------------------------------
// Tick state
// ---------------------------------------------------------------------------

/// 64-bit tick counter, split in two words because the core has no 64-bit
/// atomics. Only the SysTick handler writes it.
static SYSTICKS_LO: AtomicU32 = AtomicU32::new(0);
static SYSTICKS_HI: AtomicU32 = AtomicU32::new(0);

/// Scheduler callback invoked from the SysTick handler once installed.
static TICK_CALLBACK: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());

/// The Cortex-M33 implementation of the port. Stateless; all hardware
/// access goes through the System Control Space.
pub struct CortexM33 {
    _private: (),
}

impl CortexM33 {
    pub const fn new() -> Self {
        Self { _private: () }
    }
}

impl Default for CortexM33 {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemPort for CortexM33 {
    fn tick_init(&self, interval_ms: u32, callback: fn()) -> Result<(), Error> {
        // (clock / 1000) * ms - 1 SysTick cycles per tick
        let per_ms = SYSTEM_CLOCK_HZ / 1000;
        let reload = match per_ms.checked_mul(interval_ms) {
            Some(cycles) if cycles > 0 && cycles - 1 <= SYST_RVR_MAX => cycles - 1,
            _ => return Err(Error::TickInit),
        };

        // Install the callback before the counter can fire
        TICK_CALLBACK.store(callback as *mut (), Ordering::Relaxed);

        unsafe {
            let prio = (SHPR3.read_volatile() & !SYSTICK_PRIO_MASK) | SYSTICK_PRIO;
            SHPR3.write_volatile(prio);
            SYST_RVR.write_volatile(reload);
            SYST_CVR.write_volatile(0);
            SYST_CSR.write_volatile(SYST_CSR_RUN);
        }
        Ok(())
    }

    fn tick_get(&self) -> u64 {
        // A torn read needs the upper word to carry between the two loads,
        // which happens once every ~49 days at a 1 ms tick. Accepted.
        let hi = SYSTICKS_HI.load(Ordering::Relaxed) as u64;
        let lo = SYSTICKS_LO.load(Ordering::Relaxed) as u64;
        (hi << 32) | lo
    }

    fn busy_sleep(&self, us: u32) {
        cortex_m::asm::delay(us.saturating_mul(SYSTEM_CLOCK_HZ / 1_000_000));
    }

    fn ctxswitch_init(&self) -> Result<(), Error> {
        unsafe {
            let prio = (SHPR3.read_volatile() & !PENDSV_PRIO_MASK) | PENDSV_PRIO;
            SHPR3.write_volatile(prio);
        }
        Ok(())
    }

    fn ctxswitch_trigger(&self) {
        unsafe {
            ICSR.write_volatile(PENDSVSET);
        }
        cortex_m::asm::dsb();
        cortex_m::asm::isb();
    }

    fn task_stack_init(&self, task: &Task) {
        frame::seed(task);
    }

    fn sync_barriers(&self) {
        cortex_m::asm::dsb();
        cortex_m::asm::isb();
    }
}

// ---------------------------------------------------------------------------
// SysTick handler
// ---------------------------------------------------------------------------

/// Tick interrupt: two-word carry add on the counter, then the scheduler
/// callback (if one is installed yet).
#[no_mangle]
extern "C" fn SysTick() {
    let lo = SYSTICKS_LO.load(Ordering::Relaxed).wrapping_add(1);
    SYSTICKS_LO.store(lo, Ordering::Relaxed);
    if lo == 0 {
        let hi = SYSTICKS_HI.load(Ordering::Relaxed).wrapping_add(1);
        SYSTICKS_HI.store(hi, Ordering::Relaxed);
    }

    let callback = TICK_CALLBACK.load(Ordering::Relaxed);
    if !callback.is_null() {
        // Safety: the only value ever stored is a `fn()` from `tick_init`.
        let callback: fn() = unsafe { core::mem::transmute(callback) };
        callback();
    }
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------

/// Context-switch exception. Hardware has already stacked
/// {r0-r3, r12, lr, pc, xPSR} on the interrupted (main) stack.
///
/// 1. Push the remaining {r4-r11} plus the saved `lr` (EXC_RETURN).
/// 2. `pendsv_switch_out` files the grown stack under the ejected task.
/// 3. `pendsv_switch_in` consumes `NEXT` and returns the successor's stack.
/// 4. Swap MSP, pop {r4-r11, lr}, and return; hardware unstacks the rest
///    and resumes the successor.
///
/// Naked so the compiler cannot touch r4-r11 between entry and the push:
/// those registers still belong to the interrupted task.
#[no_mangle]
#[unsafe(naked)]
unsafe extern "C" fn PendSV() {
    naked_asm!(
        r#"
        push    {{r4-r11, lr}}

        // file the interrupted stack under the ejected task; the nine-word
        // push left sp 4-byte aligned, so drop one more word to honor the
        // eight-byte call ABI (the successor's sp replaces it anyway)
        mov     r0, sp
        sub     sp, #4
        bl      {switch_out}

        // fetch the successor's stack pointer
        bl      {switch_in}
        mov     sp, r0

        pop     {{r4-r11, lr}}
        bx      lr
        "#,
        switch_out = sym pendsv_switch_out,
        switch_in = sym pendsv_switch_in,
    )
}

/// First half of the switch, called from [`PendSV`] with the grown stack
/// pointer in `r0`.
#[no_mangle]
unsafe extern "C" fn pendsv_switch_out(sp: *mut u32) {
    // Safety: PendSV can only be pended through the scheduler, which is
    // installed before the interrupt is configured.
    let scheduler = unsafe { kernel::scheduler() };
    scheduler.switch_out(sp);
}

/// Second half of the switch; returns the stack pointer to resume from.
#[no_mangle]
unsafe extern "C" fn pendsv_switch_in() -> *mut u32 {
    let scheduler = unsafe { kernel::scheduler() };
    scheduler.switch_in()
}
