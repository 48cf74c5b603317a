//! Drivers of the two serial modules.
//!
//! A driver owns its parser and registers its matchers when started. Nothing is shared
//! between driver instances except the [`PowerManager`](crate::power::PowerManager).

pub mod gps;
pub mod gsm;

pub use gps::Gps;
pub use gsm::Gsm;
