//! Small building blocks shared by the RuuviTracker firmware crates.

#![no_std]
#![deny(missing_docs)]

#[cfg(test)]
extern crate std;

pub mod dropper;
pub mod waker_registration;
