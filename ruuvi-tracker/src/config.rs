//! Board configuration and compile-time capacities.

use ruuvi_time::Duration;

use crate::power::{InitialState, Polarity, RailConfig};

/// Task slots of a [`Scheduler`](crate::scheduler::Scheduler).
pub const MAX_TASKS: usize = 16;

/// Armed timer entries (sleeps, timeouts and scheduled tasks) of a scheduler.
pub const MAX_TIMERS: usize = 32;

/// Concurrent I/O readiness waiters of a scheduler.
pub const MAX_IO_WAITERS: usize = 8;

/// Line matchers, and separately pattern matchers, per parser.
pub const MAX_MATCHERS: usize = 8;

/// Rails per [`PowerManager`](crate::power::PowerManager).
pub const MAX_RAILS: usize = 8;

/// Default size of a parser buffer, enough for the longest NMEA sentence or AT response line.
pub const DEFAULT_BUFFER_SIZE: usize = 256;

/// Upper bound of a single UART read.
pub const MAX_READ_CHUNK: usize = 64;

/// Timeout of a command when the driver has no better idea.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_ticks(1000);

/// How long the GSM power key is held low to toggle the modem.
pub const GSM_POWER_PULSE: Duration = Duration::from_ticks(2000);

/// Serial settings of one parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct UartConfig {
    /// Line rate, informational for the board code opening the port.
    pub baud_rate: u32,
    /// Bytes requested per read, clamped to [`MAX_READ_CHUNK`] and the free buffer space.
    pub read_chunk: usize,
}

impl UartConfig {
    /// Settings for `baud_rate` with the default read size.
    pub const fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            read_chunk: MAX_READ_CHUNK,
        }
    }

    /// Change the read size.
    pub const fn read_chunk(mut self, read_chunk: usize) -> Self {
        self.read_chunk = read_chunk;
        self
    }
}

impl Default for UartConfig {
    fn default() -> Self {
        Self::new(115_200)
    }
}

/// Rail ids of the RuuviTracker rev C3 board, indices into [`RUUVI_C3_RAILS`].
pub mod rails {
    use crate::power::RailId;

    /// LDO2, feeds the GPS antenna and the SD card.
    pub const LDO2: RailId = RailId(0);
    /// LDO3, feeds the GPS module.
    pub const LDO3: RailId = RailId(1);
    /// LDO4.
    pub const LDO4: RailId = RailId(2);
    /// GSM modem battery switch.
    pub const GSM_VBAT: RailId = RailId(3);
    /// GPS backup supply, keeps the almanac for warm starts.
    pub const GPS_VBACKUP: RailId = RailId(4);

    /// GPS module supply.
    pub const GPS_VCC: RailId = LDO3;
    /// Active GPS antenna supply.
    pub const GPS_ANT: RailId = LDO2;
    /// SD card supply.
    pub const SDCARD: RailId = LDO2;
}

/// Rail table of the RuuviTracker rev C3 board, in [`RailId`](crate::power::RailId) order.
///
/// The GSM battery switch is active-low and is forced off before it is sampled, the modem must
/// never be left half powered by a previous boot stage.
pub const RUUVI_C3_RAILS: [RailConfig; 5] = [
    RailConfig::new("LDO2", Polarity::ActiveHigh),
    RailConfig::new("LDO3", Polarity::ActiveHigh),
    RailConfig::new("LDO4", Polarity::ActiveHigh),
    RailConfig::new("GSM_VBAT", Polarity::ActiveLow).initial(InitialState::ForceOff),
    RailConfig::new("GPS_VBACKUP", Polarity::ActiveHigh),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn board_table_matches_ids() {
        assert_eq!(RUUVI_C3_RAILS[rails::GSM_VBAT.index()].name, "GSM_VBAT");
        assert_eq!(RUUVI_C3_RAILS[rails::GPS_VCC.index()].name, "LDO3");
        assert_eq!(RUUVI_C3_RAILS[rails::GPS_ANT.index()].name, "LDO2");
        assert_eq!(rails::SDCARD, rails::GPS_ANT);
        assert!(RUUVI_C3_RAILS.len() <= MAX_RAILS);
    }

    #[test]
    fn uart_defaults() {
        let config = UartConfig::default();
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.read_chunk, MAX_READ_CHUNK);
        assert_eq!(UartConfig::new(9600).read_chunk(8).read_chunk, 8);
    }
}
