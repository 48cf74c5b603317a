//! MediaTek MT3339 GPS receiver.

use alloc::format;
use alloc::rc::Rc;
use core::cell::{Cell, RefCell};

use embedded_hal::digital::StatefulOutputPin;
use ruuvi_common::dropper::OnDrop;
use ruuvi_time::Duration;

use crate::config::rails::{GPS_ANT, GPS_VBACKUP, GPS_VCC};
use crate::config::{UartConfig, DEFAULT_COMMAND_TIMEOUT};
use crate::nmea::{self, Fix};
use crate::parser::{LineTest, Retention, UartParser};
use crate::platform::Uart;
use crate::power::PowerManager;
use crate::scheduler::{Spawner, TaskId};
use crate::Error;

/// Matcher ids and the sentences they take, any GPS/GLONASS/combined talker.
const SENTENCES: [(&str, &str); 4] = [
    ("RMC", r"^\$G[PLN]RMC,"),
    ("GGA", r"^\$G[PLN]GGA,"),
    ("GSA", r"^\$G[PLN]GSA,"),
    ("ZDA", r"^\$G[PLN]ZDA,"),
];

/// The GPS driver.
///
/// While started, every RMC, GGA, GSA and ZDA sentence with a valid checksum updates the fix, see
/// [`last_fix`](Gps::last_fix).
pub struct Gps<U: Uart, P: StatefulOutputPin> {
    parser: Rc<UartParser<U>>,
    power: Rc<PowerManager<P>>,
    spawner: Spawner,
    fix: Rc<RefCell<Fix>>,
    task: Cell<Option<TaskId>>,
}

impl<U: Uart + 'static, P: StatefulOutputPin> Gps<U, P> {
    /// A stopped driver for the receiver on `uart`.
    pub fn new(uart: U, power: Rc<PowerManager<P>>, spawner: Spawner) -> Self {
        let parser = UartParser::new(uart, spawner.clone(), UartConfig::default());
        Self {
            parser: Rc::new(parser),
            power,
            spawner,
            fix: Rc::new(RefCell::new(Fix::default())),
            task: Cell::new(None),
        }
    }

    /// Power the receiver and start decoding.
    ///
    /// On error nothing stays registered or requested, except the backup supply.
    pub fn start(&self) -> Result<(), Error> {
        if self.is_running() {
            return Ok(());
        }

        let added = Cell::new(0);
        let unregister = OnDrop::new(|| {
            for (id, _) in &SENTENCES[..added.get()] {
                let _ = self.parser.remove_line_matcher(id);
            }
        });
        for (id, pattern) in SENTENCES {
            let fix = self.fix.clone();
            let spawner = self.spawner.clone();
            self.parser
                .add_line_matcher(id, LineTest::pattern(pattern)?, move |line| {
                    let mut fix = fix.borrow_mut();
                    match fix.update(line) {
                        Ok(_) => fix.last_update = Some(spawner.now()),
                        Err(error) => log::debug!("gps: sentence dropped: {}", error),
                    }
                    Retention::Release
                })?;
            added.set(added.get() + 1);
        }

        self.power.request(GPS_VCC)?;
        let vcc = OnDrop::new(|| {
            let _ = self.power.release(GPS_VCC);
        });
        self.power.request(GPS_ANT)?;
        let ant = OnDrop::new(|| {
            let _ = self.power.release(GPS_ANT);
        });
        // The backup supply stays on across stops so the receiver can warm start.
        if !self.power.status(GPS_VBACKUP)? {
            self.power.request(GPS_VBACKUP)?;
        }
        ant.defuse();
        vcc.defuse();
        unregister.defuse();

        let parser = self.parser.clone();
        let task = self.spawner.spawn(async move { parser.run().await });
        self.task.set(Some(task.id()));
        log::info!("gps started");
        Ok(())
    }

    /// Stop decoding and power the receiver down, the backup supply stays on.
    pub fn stop(&self) -> Result<(), Error> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        for (id, _) in SENTENCES {
            self.parser.remove_line_matcher(id)?;
        }
        // Also ends a parser task that has not been polled yet.
        self.spawner.cancel(task);
        self.power.release(GPS_ANT)?;
        self.power.release(GPS_VCC)?;
        log::info!("gps stopped");
        Ok(())
    }

    /// True between [`start`](Self::start) and [`stop`](Self::stop).
    pub fn is_running(&self) -> bool {
        self.task.get().is_some()
    }

    /// A copy of the current fix.
    pub fn last_fix(&self) -> Fix {
        *self.fix.borrow()
    }

    /// Set the fix interval, waiting for the receiver to acknowledge it.
    pub async fn set_interval(&self, interval: Duration) -> Result<(), Error> {
        let command = nmea::with_checksum(&format!("$PMTK300,{},0,0,0,0", interval.ticks()))?;
        let ack = self
            .parser
            .send_command_expecting(
                command.as_bytes(),
                LineTest::prefix("$PMTK001,300,"),
                DEFAULT_COMMAND_TIMEOUT,
            )
            .await?;
        // `$PMTK001,300,<flag>*HH`, 3 is success.
        match ack.get(13) {
            Some(b'3') => Ok(()),
            _ => {
                log::warn!("gps: interval {} ms rejected", interval.ticks());
                Err(Error::CommandRejected)
            }
        }
    }

    /// Enter or leave standby. Any byte wakes the receiver, leaving sends the test packet.
    pub async fn set_standby(&self, standby: bool) -> Result<(), Error> {
        let command = if standby { "$PMTK161,0" } else { "$PMTK000" };
        let command = nmea::with_checksum(command)?;
        self.parser.write_line(command.as_bytes()).await
    }

    /// The parser of the receiver.
    pub fn parser(&self) -> &UartParser<U> {
        &self.parser
    }
}
