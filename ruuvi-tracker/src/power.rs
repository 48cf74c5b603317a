//! Reference counted power rails.
//!
//! Several drivers share a rail (the GPS antenna and the SD card hang off the same LDO), so
//! nobody drives a rail pin directly. Every consumer [`request`](PowerManager::request)s the rail
//! and [`release`](PowerManager::release)s it when done, the pin follows `reservations > 0`.

use core::cell::RefCell;

use critical_section::Mutex;
use embedded_hal::digital::StatefulOutputPin;
use heapless::Vec;

use crate::config::MAX_RAILS;
use crate::Error;

/// Most reservations a rail can carry.
pub const MAX_RESERVATIONS: u8 = 254;

/// Identifies a rail of a [`PowerManager`], its index in the rail table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct RailId(pub u8);

impl RailId {
    /// Index in the rail table.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Pin level that turns a rail on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Polarity {
    /// High is on.
    ActiveHigh,
    /// Low is on.
    ActiveLow,
}

/// What to do with the pin at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum InitialState {
    /// Keep the level a previous boot stage left, an asserted pin counts as one reservation.
    Sample,
    /// Drive the rail off before sampling.
    ForceOff,
}

/// Static description of a rail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct RailConfig {
    /// Name for the logs.
    pub name: &'static str,
    /// Level that turns the rail on.
    pub polarity: Polarity,
    /// Boot behaviour.
    pub initial: InitialState,
}

impl RailConfig {
    /// A sampled rail.
    pub const fn new(name: &'static str, polarity: Polarity) -> Self {
        Self {
            name,
            polarity,
            initial: InitialState::Sample,
        }
    }

    /// Change the boot behaviour.
    pub const fn initial(mut self, initial: InitialState) -> Self {
        self.initial = initial;
        self
    }
}

/// A pin and its reservation count.
pub struct PowerRail<P> {
    pin: P,
    config: RailConfig,
    reservations: u8,
}

impl<P: StatefulOutputPin> PowerRail<P> {
    /// Take over `pin`, seeding the count from its current level.
    pub fn new(pin: P, config: RailConfig) -> Result<Self, Error> {
        let mut rail = Self {
            pin,
            config,
            reservations: 0,
        };
        if config.initial == InitialState::ForceOff {
            rail.drive(false)?;
        }
        if rail.is_on()? {
            log::debug!("{} already on at boot", config.name);
            rail.reservations = 1;
        }
        Ok(rail)
    }

    fn drive(&mut self, on: bool) -> Result<(), Error> {
        let high = on == (self.config.polarity == Polarity::ActiveHigh);
        let result = if high {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
        result.map_err(|_| Error::Pin)
    }

    fn is_on(&mut self) -> Result<bool, Error> {
        let high = self.pin.is_set_high().map_err(|_| Error::Pin)?;
        Ok(high == (self.config.polarity == Polarity::ActiveHigh))
    }

    fn request(&mut self, id: RailId) -> Result<bool, Error> {
        if self.reservations >= MAX_RESERVATIONS {
            log::error!("{}: reservation overflow", self.config.name);
            return Err(Error::ReservationOverflow(id));
        }
        if self.reservations == 0 {
            self.drive(true)?;
            log::debug!("{} on", self.config.name);
        }
        self.reservations += 1;
        Ok(self.reservations == 1)
    }

    fn release(&mut self, id: RailId) -> Result<bool, Error> {
        if self.reservations == 0 {
            log::error!("{}: release without reservation", self.config.name);
            return Err(Error::ReservationUnderflow(id));
        }
        if self.reservations == 1 {
            self.drive(false)?;
            log::debug!("{} off", self.config.name);
        }
        self.reservations -= 1;
        Ok(self.reservations == 0)
    }
}

/// The rails of the board.
///
/// Each rail sits behind its own critical section mutex, the manager is shared by `&` (or `Rc`)
/// between drivers and tasks. A failed call leaves the count and the pin as they were.
pub struct PowerManager<P, const N: usize = MAX_RAILS> {
    rails: Vec<Mutex<RefCell<PowerRail<P>>>, N>,
}

impl<P: StatefulOutputPin, const N: usize> PowerManager<P, N> {
    /// Take over the pins, rail ids follow the iteration order.
    pub fn new(rails: impl IntoIterator<Item = (P, RailConfig)>) -> Result<Self, Error> {
        let mut table = Vec::new();
        for (pin, config) in rails {
            let rail = PowerRail::new(pin, config)?;
            table
                .push(Mutex::new(RefCell::new(rail)))
                .map_err(|_| Error::TooManyRails)?;
        }
        Ok(Self { rails: table })
    }

    fn with_rail<R>(
        &self,
        id: RailId,
        f: impl FnOnce(&mut PowerRail<P>) -> Result<R, Error>,
    ) -> Result<R, Error> {
        let rail = self.rails.get(id.index()).ok_or(Error::UnknownRail(id))?;
        critical_section::with(|cs| f(&mut rail.borrow_ref_mut(cs)))
    }

    /// Add a reservation, true if this turned the rail on.
    pub fn request(&self, id: RailId) -> Result<bool, Error> {
        self.with_rail(id, |rail| rail.request(id))
    }

    /// Drop a reservation, true if this turned the rail off.
    pub fn release(&self, id: RailId) -> Result<bool, Error> {
        self.with_rail(id, |rail| rail.release(id))
    }

    /// Electrical state of the rail, polarity applied.
    pub fn status(&self, id: RailId) -> Result<bool, Error> {
        self.with_rail(id, |rail| rail.is_on())
    }

    /// Current reservation count.
    pub fn reservations(&self, id: RailId) -> Result<u8, Error> {
        self.with_rail(id, |rail| Ok(rail.reservations))
    }

    /// Name from the rail table.
    pub fn name(&self, id: RailId) -> Result<&'static str, Error> {
        self.with_rail(id, |rail| Ok(rail.config.name))
    }

    /// True if every rail reads off.
    pub fn all_released(&self) -> Result<bool, Error> {
        for index in 0..self.rails.len() {
            if self.status(RailId(index as u8))? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Number of managed rails.
    pub fn len(&self) -> usize {
        self.rails.len()
    }

    /// True if no rail is managed.
    pub fn is_empty(&self) -> bool {
        self.rails.is_empty()
    }
}
