//! # femtos Demo Firmware
//!
//! Three tasks on a Nucleo-U545RE-Q, logging over RTT:
//!
//! | Task | Priority | Behavior |
//! |------|----------|----------|
//! | `sensor_task` | 2 | samples every 100 ms (period passed as task arg) |
//! | `report_task` | 1 | prints a heartbeat every 1000 ms |
//! | `monitor_task` | 1 | audits the stack canaries every 5 s |
//!
//! The sensor task preempts the others whenever its sleep expires; the two
//! priority-1 tasks trade the CPU cooperatively, and the idle task soaks up
//! the rest in `wfi`. The board runs on the 4 MHz MSIS reset clock, so no
//! clock setup is needed before `SCHEDULER.start()`.

#![no_std]
#![no_main]

use core::ptr;

use cortex_m_rt::entry;
use defmt_rtt as _;
use panic_halt as _;

use femtos::{CortexM33, Task};

static PORT: CortexM33 = CortexM33::new();

femtos::os_tasks! {
    scheduler: SCHEDULER,
    port: &PORT,
    tasks: [
        Task::new(sensor_task, 100 as *mut (), ptr::null_mut(), ptr::null_mut(), 2),
        Task::new(report_task, 1000 as *mut (), ptr::null_mut(), ptr::null_mut(), 1),
        Task::new(monitor_task, ptr::null_mut(), ptr::null_mut(), ptr::null_mut(), 1),
    ],
}

/// Pretend sensor with its sampling period handed in as the first task
/// argument.
extern "C" fn sensor_task(period_ms: *mut (), _: *mut (), _: *mut ()) -> ! {
    let period_ms = period_ms as usize as u32;
    let mut sample: u32 = 0;

    loop {
        // stand-in for an ADC conversion
        femtos::busy_sleep(250);
        defmt::info!("sensor sample {}", sample);
        sample = sample.wrapping_add(1);
        femtos::sleep(period_ms);
    }
}

/// Once-a-second heartbeat with the kernel tick count.
extern "C" fn report_task(period_ms: *mut (), _: *mut (), _: *mut ()) -> ! {
    let period_ms = period_ms as usize as u32;

    loop {
        defmt::info!("alive at tick {}", femtos::ticks());
        femtos::sleep(period_ms);
    }
}

/// Periodic stack audit. The kernel only writes the canaries; noticing a
/// smashed one is on us.
extern "C" fn monitor_task(_: *mut (), _: *mut (), _: *mut ()) -> ! {
    loop {
        if !SCHEDULER.stack_canaries_ok() {
            defmt::warn!("a task stack has overflowed its region");
        }
        // let the report task go first if it is due
        femtos::yield_now();
        femtos::sleep(5000);
    }
}

#[entry]
fn main() -> ! {
    defmt::info!("femtos demo on STM32U545 @ 4 MHz");

    // Hands the CPU to sensor_task and never comes back unless the
    // configuration is rejected.
    if let Err(err) = SCHEDULER.start() {
        defmt::error!("scheduler refused to start: {}", err);
    }

    loop {
        cortex_m::asm::wfi();
    }
}
