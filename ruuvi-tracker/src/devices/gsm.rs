//! SIMCom SIM800 GSM modem.

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};

use embedded_hal::digital::{OutputPin, StatefulOutputPin};
use heapless::HistoryBuffer;
use ruuvi_common::dropper::OnDrop;

use crate::config::rails::GSM_VBAT;
use crate::config::{UartConfig, DEFAULT_COMMAND_TIMEOUT, GSM_POWER_PULSE};
use crate::parser::{LineTest, Retention, UartParser};
use crate::platform::Uart;
use crate::power::PowerManager;
use crate::scheduler::{Spawner, TaskId};
use crate::Error;

/// Unsolicited notices kept for [`Gsm::notices`].
pub const MAX_NOTICES: usize = 8;

const NOTICES: &str = "notices";

/// The GSM driver.
///
/// `K` drives the power key and the DTR line of the modem.
pub struct Gsm<U: Uart, P: StatefulOutputPin, K: OutputPin> {
    parser: Rc<UartParser<U>>,
    power: Rc<PowerManager<P>>,
    spawner: Spawner,
    power_key: RefCell<K>,
    dtr: RefCell<K>,
    notices: Rc<RefCell<HistoryBuffer<Vec<u8>, MAX_NOTICES>>>,
    task: Cell<Option<TaskId>>,
}

impl<U: Uart + 'static, P: StatefulOutputPin, K: OutputPin> Gsm<U, P, K> {
    /// A stopped driver for the modem on `uart`.
    pub fn new(
        uart: U,
        power: Rc<PowerManager<P>>,
        power_key: K,
        dtr: K,
        spawner: Spawner,
    ) -> Self {
        let parser = UartParser::new(uart, spawner.clone(), UartConfig::default());
        Self {
            parser: Rc::new(parser),
            power,
            spawner,
            power_key: RefCell::new(power_key),
            dtr: RefCell::new(dtr),
            notices: Rc::new(RefCell::new(HistoryBuffer::new())),
            task: Cell::new(None),
        }
    }

    /// Power the modem up and open its serial port.
    ///
    /// On error the matcher, the parser task and the battery switch are all given back.
    pub async fn start(&self) -> Result<(), Error> {
        if self.is_running() {
            return Ok(());
        }

        let notices = self.notices.clone();
        self.parser
            .add_line_matcher(NOTICES, LineTest::prefix("+"), move |line| {
                log::info!("gsm: {}", core::str::from_utf8(line).unwrap_or("<binary>"));
                notices.borrow_mut().write(line.to_vec());
                Retention::Release
            })?;
        let unregister = OnDrop::new(|| {
            let _ = self.parser.remove_line_matcher(NOTICES);
        });

        // Reads from the first boot message on.
        let parser = self.parser.clone();
        let task = self.spawner.spawn(async move { parser.run().await }).id();
        let cancel = OnDrop::new(|| {
            self.spawner.cancel(task);
        });

        self.power.request(GSM_VBAT)?;
        let vbat = OnDrop::new(|| {
            let _ = self.power.release(GSM_VBAT);
        });
        self.push_power_key().await?;
        // DTR asserted enables the modem UART.
        self.dtr.borrow_mut().set_low().map_err(|_| Error::Pin)?;

        vbat.defuse();
        cancel.defuse();
        unregister.defuse();
        self.task.set(Some(task));
        log::info!("gsm started");
        Ok(())
    }

    /// Power the modem down and close its serial port.
    pub async fn stop(&self) -> Result<(), Error> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        self.parser.remove_line_matcher(NOTICES)?;
        self.push_power_key().await?;
        self.spawner.cancel(task);
        self.dtr.borrow_mut().set_high().map_err(|_| Error::Pin)?;
        self.power.release(GSM_VBAT)?;
        log::info!("gsm stopped");
        Ok(())
    }

    /// Hold the power key down long enough for the modem to toggle its power state.
    async fn push_power_key(&self) -> Result<(), Error> {
        self.power_key.borrow_mut().set_low().map_err(|_| Error::Pin)?;
        self.spawner.sleep(GSM_POWER_PULSE).await;
        self.power_key.borrow_mut().set_high().map_err(|_| Error::Pin)
    }

    /// Send `AT`, true if the modem answered `OK`.
    pub async fn at_test(&self) -> Result<bool, Error> {
        let response = self
            .parser
            .send_command(b"AT", DEFAULT_COMMAND_TIMEOUT)
            .await?;
        Ok(response == b"OK")
    }

    /// The latest unsolicited `+` notices, oldest first.
    pub fn notices(&self) -> Vec<Vec<u8>> {
        self.notices.borrow().oldest_ordered().cloned().collect()
    }

    /// True between [`start`](Self::start) and [`stop`](Self::stop).
    pub fn is_running(&self) -> bool {
        self.task.get().is_some()
    }

    /// The parser of the modem.
    pub fn parser(&self) -> &UartParser<U> {
        &self.parser
    }
}
