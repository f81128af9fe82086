//! Initial exception-frame synthesis.
//!
//! Bootstrap seeds every task stack with the image the context-switch
//! handler expects to pop: the eight software-saved registers, the saved
//! `lr` (EXC_RETURN), and the eight-word hardware frame the exception return
//! then unstacks. First dispatch of a task is therefore indistinguishable
//! from resuming one that was switched out.
//!
//! The writer is plain pointer arithmetic so the layout can be unit-tested
//! on the host word by word.

use crate::task::Task;

/// xPSR for a fresh task: just the Thumb bit, the only execution state the
/// M-profile supports.
const INITIAL_XPSR: u32 = 1 << 24;

/// EXC_RETURN for "return to Thread mode, main stack, standard frame".
/// Every task runs on MSP; the first FPU instruction a task executes will
/// switch its saved `lr` to the extended-frame form on the next ejection.
const EXC_RETURN_THREAD_MSP: u32 = 0xFFFF_FFF9;

/// Where a task lands if its entry function ever returns. The task's frame
/// is gone at that point, so all that is left is to park the CPU between
/// interrupts; the scheduler keeps ticking but never re-dispatches it.
#[cfg(target_arch = "arm")]
pub(crate) extern "C" fn task_trap() -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}

/// Host stand-in: there is no `wfi` instruction to wait on, so just spin.
#[cfg(not(target_arch = "arm"))]
pub(crate) extern "C" fn task_trap() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

/// Writer for a full-descending stack. Never writes *at* the given pointer,
/// only below it.
struct FrameWriter(*mut u32);

impl FrameWriter {
    /// # Safety
    ///
    /// There must be room below `top` for everything that will be pushed.
    unsafe fn new(top: *mut u32) -> FrameWriter {
        FrameWriter(top)
    }

    fn push(&mut self, value: u32) {
        self.0 = unsafe { self.0.offset(-1) };
        unsafe {
            self.0.write_volatile(value);
        }
    }

    fn current(&self) -> *mut u32 {
        self.0
    }
}

/// Synthesize the first-dispatch frame below `task.sp()` and move the saved
/// stack pointer down to it.
pub(crate) fn seed(task: &Task) {
    let [arg1, arg2, arg3] = task.args();

    // Safety: bootstrap points `sp` one word below the top of the task's
    // own sub-region, which is large enough for the 17-word frame.
    let mut writer = unsafe { FrameWriter::new(task.sp()) };

    // Hardware frame, unstacked by the exception return
    writer.push(INITIAL_XPSR);
    writer.push(task.entry() as usize as u32);
    writer.push(task_trap as usize as u32);
    writer.push(0); // r12
    writer.push(0); // r3
    writer.push(arg3 as usize as u32); // r2
    writer.push(arg2 as usize as u32); // r1
    writer.push(arg1 as usize as u32); // r0

    // Software frame, popped by the handler epilogue: saved lr first, then
    // r11 down to r4 so the ascending load ends on lr
    writer.push(EXC_RETURN_THREAD_MSP);
    for _ in 0..8 {
        writer.push(0); // r11..r4
    }

    task.set_sp(writer.current());
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
