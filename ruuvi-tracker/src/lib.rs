//! Firmware core of the RuuviTracker GPS/GSM tracker.
//!
//! A single core, no operating system, and two serial modules that never stop talking. The
//! pieces here are:
//!
//! - [`scheduler`]: a cooperative executor for `async` tasks with timers and I/O readiness waits.
//! - [`parser`]: an incremental UART line framer with pluggable matchers and a command/response
//!   helper built on top of the scheduler.
//! - [`power`]: reference counted power rails shared by the drivers.
//! - [`nmea`]: the NMEA 0183 decoder feeding the GPS fix.
//! - [`devices`]: the GPS and GSM drivers tying the above together.
//!
//! Hardware is reached only through the traits of [`platform`] and `embedded-hal` pins, so the
//! whole core runs on the host against the [`mock`] platform.

#![no_std]
#![deny(missing_docs)]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod config;
pub mod devices;
mod error;
pub mod mock;
pub mod nmea;
pub mod parser;
pub mod platform;
pub mod power;
pub mod scheduler;

pub use error::{Error, Fatal};
pub use ruuvi_time::{Clock, Duration, ExtU32, Instant, TimeoutError};
