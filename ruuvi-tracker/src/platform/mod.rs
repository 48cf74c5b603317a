//! Hardware seams of the firmware core.
//!
//! The board implements these on top of its HAL, the host tests use [`crate::mock`].

use ruuvi_time::Duration;

use crate::config::MAX_IO_WAITERS;

pub use embedded_hal::digital::{OutputPin, PinState, StatefulOutputPin};
pub use ruuvi_time::Clock;

/// Identifies a device to the readiness [`Poller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Handle(pub u8);

/// Which readiness a waiter wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Direction {
    /// Data can be read.
    Read,
    /// Data can be written.
    Write,
}

/// A device and a direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Interest {
    /// The device.
    pub handle: Handle,
    /// The direction.
    pub direction: Direction,
}

impl Interest {
    /// Readable interest on `handle`.
    pub const fn readable(handle: Handle) -> Self {
        Self {
            handle,
            direction: Direction::Read,
        }
    }

    /// Writable interest on `handle`.
    pub const fn writable(handle: Handle) -> Self {
        Self {
            handle,
            direction: Direction::Write,
        }
    }
}

/// Readiness reported by one [`Poller::poll`].
pub type Events = heapless::Vec<Interest, MAX_IO_WAITERS>;

/// The idle wait of the scheduler.
pub trait Poller {
    /// Block until one of `interests` is ready or `timeout` passes, `None` waits forever.
    ///
    /// Ready interests are pushed to `events` in the order the hardware reports them.
    fn poll(&mut self, interests: &[Interest], timeout: Option<Duration>, events: &mut Events);

    /// Block for `duration` when nobody waits on I/O.
    fn sleep(&mut self, duration: Duration);
}

/// Errors reported by a serial device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum UartError {
    /// Received data was lost.
    #[error("overrun")]
    Overrun,
    /// A stop bit was missing.
    #[error("framing error")]
    Framing,
    /// Noise on the line.
    #[error("noise")]
    Noise,
    /// Parity check failed.
    #[error("parity error")]
    Parity,
    /// Anything else.
    #[error("device error")]
    Other,
}

/// A non-blocking serial device.
pub trait Uart {
    /// The handle the device is polled with.
    fn handle(&self) -> Handle;

    /// Read up to `buffer.len()` bytes. `Ok(0)` means no data right now, not end of stream.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, UartError>;

    /// Write as much of `data` as the device accepts, possibly nothing.
    fn write(&mut self, data: &[u8]) -> Result<usize, UartError>;
}
