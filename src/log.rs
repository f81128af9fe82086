//! Logging shims.
//!
//! The kernel logs through `defmt` when the `defmt` feature is enabled and
//! compiles to nothing otherwise, so host test builds carry no logger and
//! firmware builds pick the transport (RTT, semihosting) at the binary.

#[cfg(feature = "defmt")]
macro_rules! os_error {
    ($($arg:tt)*) => { ::defmt::error!($($arg)*) };
}

#[cfg(not(feature = "defmt"))]
macro_rules! os_error {
    ($($arg:tt)*) => {{}};
}

#[cfg(feature = "defmt")]
macro_rules! os_debug {
    ($($arg:tt)*) => { ::defmt::debug!($($arg)*) };
}

#[cfg(not(feature = "defmt"))]
macro_rules! os_debug {
    ($($arg:tt)*) => {{}};
}

#[cfg(feature = "defmt")]
macro_rules! os_trace {
    ($($arg:tt)*) => { ::defmt::trace!($($arg)*) };
}

#[cfg(not(feature = "defmt"))]
macro_rules! os_trace {
    ($($arg:tt)*) => {{}};
}
