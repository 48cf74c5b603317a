use crate::nmea::NmeaError;
use crate::platform::{Interest, UartError};
use crate::power::RailId;

/// Conditions that stop the whole scheduler.
///
/// There is no dynamic growth on the target, running out of a fixed table is not something a
/// task can recover from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Fatal {
    /// Every task slot is in use.
    #[error("all task slots are in use")]
    TaskSlotsExhausted,
    /// Every timer slot is in use.
    #[error("all timer slots are in use")]
    TimerSlotsExhausted,
    /// Every I/O waiter slot is in use.
    #[error("all I/O waiter slots are in use")]
    WaiterSlotsExhausted,
    /// Live tasks remain but nothing (ready task, timer or I/O waiter) can ever wake them.
    #[error("tasks are waiting on nothing that can wake them")]
    Stalled,
}

/// Errors of the firmware core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Error {
    /// A matcher with this id is already registered on the parser.
    #[error("matcher `{0}` is already registered")]
    DuplicateMatcher(&'static str),
    /// The parser has no room for another matcher.
    #[error("matcher table is full")]
    TooManyMatchers,
    /// Another command is already waiting for its response on this parser.
    #[error("a command is already pending")]
    CommandInProgress,
    /// No response line arrived before the deadline.
    #[error("command timed out")]
    CommandTimeout,
    /// The device answered the command with a failure.
    #[error("command rejected by the device")]
    CommandRejected,
    /// The parser state was mutated from inside one of its own callbacks.
    #[error("parser is busy dispatching")]
    ParserBusy,
    /// A matcher pattern failed to compile.
    #[error("invalid matcher pattern")]
    InvalidPattern,
    /// The rail already carries the maximum number of reservations.
    #[error("reservation overflow on rail {0:?}")]
    ReservationOverflow(RailId),
    /// Release of a rail that has no reservations.
    #[error("reservation underflow on rail {0:?}")]
    ReservationUnderflow(RailId),
    /// No rail with this id is managed.
    #[error("unknown rail {0:?}")]
    UnknownRail(RailId),
    /// More rails were configured than the manager can hold.
    #[error("rail table is full")]
    TooManyRails,
    /// Driving or sampling a pin failed.
    #[error("pin I/O failed")]
    Pin,
    /// The serial device reported an error.
    #[error("uart: {0}")]
    Uart(#[from] UartError),
    /// Another task already waits for this readiness.
    #[error("a waiter is already registered for {0:?}")]
    WaiterConflict(Interest),
    /// The task was cancelled before it completed.
    #[error("task cancelled")]
    Cancelled,
    /// An NMEA sentence could not be decoded.
    #[error("nmea: {0}")]
    Nmea(#[from] NmeaError),
    /// The scheduler halted.
    #[error("fatal: {0}")]
    Fatal(#[from] Fatal),
}

impl Error {
    /// True for the errors that halt the scheduler when a task returns them: resource
    /// exhaustion and rail invariant violations.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Fatal(_) | Error::ReservationOverflow(_) | Error::ReservationUnderflow(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::ToString;

    #[test]
    fn fatal_class() {
        assert!(Error::Fatal(Fatal::Stalled).is_fatal());
        assert!(Error::ReservationOverflow(RailId(0)).is_fatal());
        assert!(Error::ReservationUnderflow(RailId(3)).is_fatal());
        assert!(!Error::CommandTimeout.is_fatal());
        assert!(!Error::DuplicateMatcher("RMC").is_fatal());
        assert!(!Error::Nmea(NmeaError::MissingStart).is_fatal());
    }

    #[test]
    fn messages() {
        assert_eq!(
            Error::DuplicateMatcher("all").to_string(),
            "matcher `all` is already registered"
        );
        assert_eq!(
            Error::from(Fatal::TimerSlotsExhausted).to_string(),
            "fatal: all timer slots are in use"
        );
    }
}
