//! Both modems on one scheduler and one set of rails.

use std::rc::Rc;

use ruuvi_tracker::config::rails::{GPS_ANT, GPS_VBACKUP, GPS_VCC, GSM_VBAT, SDCARD};
use ruuvi_tracker::config::RUUVI_C3_RAILS;
use ruuvi_tracker::devices::{Gps, Gsm};
use ruuvi_tracker::mock::{MockClock, MockPin, MockPoller, MockUart};
use ruuvi_tracker::platform::Handle;
use ruuvi_tracker::power::PowerManager;
use ruuvi_tracker::scheduler::Scheduler;
use ruuvi_tracker::ExtU32;

#[test]
fn gps_and_gsm_share_the_board() {
    let clock = MockClock::new();
    let gps_uart = MockUart::new(Handle(2), &clock);
    let gsm_uart = MockUart::new(Handle(3), &clock);
    let mut poller = MockPoller::new(&clock);
    poller.attach(&gps_uart);
    poller.attach(&gsm_uart);
    let mut scheduler = Scheduler::new(clock.clone(), poller);
    let spawner = scheduler.spawner();

    let pins: Vec<MockPin> = RUUVI_C3_RAILS.iter().map(|_| MockPin::new()).collect();
    let power = Rc::new(PowerManager::new(pins.into_iter().zip(RUUVI_C3_RAILS)).unwrap());
    let gps = Rc::new(Gps::new(gps_uart.clone(), power.clone(), spawner.clone()));
    let gsm = Rc::new(Gsm::new(
        gsm_uart.clone(),
        power.clone(),
        MockPin::high(),
        MockPin::high(),
        spawner.clone(),
    ));

    // The SD card holds the antenna LDO across the GPS session.
    power.request(SDCARD).unwrap();

    gps_uart.push_rx_after(
        1.secs(),
        b"$GPRMC,193202.000,A,6007.2666,N,02423.8747,E,0.16,354.15,140315,,,A*68\r\n",
    );
    gsm_uart.reply_to(b"AT", b"AT\r\nOK\r\n", 20.millis());

    let (g, m) = (gps.clone(), gsm.clone());
    let session = scheduler.spawn(async move {
        g.start()?;
        m.start().await?;
        let modem_ok = m.at_test().await?;
        let fix = g.last_fix();
        g.stop()?;
        m.stop().await?;
        Ok((modem_ok, fix))
    });
    let (modem_ok, fix) = scheduler.run_until(session).unwrap();
    scheduler.run_forever().unwrap();

    assert!(modem_ok);
    assert!(fix.is_valid());
    assert_eq!(fix.last_update.map(|at| at.ticks()), Some(1_000));
    assert_eq!(power.status(GPS_VCC), Ok(false));
    assert_eq!(power.status(GSM_VBAT), Ok(false));
    assert_eq!(power.reservations(GPS_ANT), Ok(1));
    assert_eq!(power.status(GPS_VBACKUP), Ok(true));
    assert!(!gps.is_running());
    assert!(!gsm.is_running());
}

#[test]
fn two_receivers_keep_their_own_matchers() {
    let clock = MockClock::new();
    let first_uart = MockUart::new(Handle(2), &clock);
    let second_uart = MockUart::new(Handle(4), &clock);
    let mut poller = MockPoller::new(&clock);
    poller.attach(&first_uart);
    poller.attach(&second_uart);
    let mut scheduler = Scheduler::new(clock.clone(), poller);
    let spawner = scheduler.spawner();

    let pins: Vec<MockPin> = RUUVI_C3_RAILS.iter().map(|_| MockPin::new()).collect();
    let power = Rc::new(PowerManager::new(pins.into_iter().zip(RUUVI_C3_RAILS)).unwrap());
    let first = Rc::new(Gps::new(first_uart.clone(), power.clone(), spawner.clone()));
    let second = Rc::new(Gps::new(second_uart.clone(), power.clone(), spawner.clone()));

    first.start().unwrap();
    assert_eq!(first.parser().line_matcher_count(), 4);
    assert_eq!(second.parser().line_matcher_count(), 0);
    second.start().unwrap();
    assert_eq!(second.parser().line_matcher_count(), 4);
    assert_eq!(power.reservations(GPS_VCC), Ok(2));

    first_uart.push_rx_after(
        100.millis(),
        b"$GPRMC,193202.000,A,6007.2666,N,02423.8747,E,0.16,354.15,140315,,,A*68\r\n",
    );
    let (a, b, sleeper) = (first.clone(), second.clone(), spawner.clone());
    let session = scheduler.spawn(async move {
        sleeper.sleep(200.millis()).await;
        a.stop()?;
        let after_first = (b.parser().line_matcher_count(), b.is_running());
        b.stop()?;
        Ok(after_first)
    });
    assert_eq!(scheduler.run_until(session), Ok((4, true)));
    scheduler.run_forever().unwrap();

    assert!(first.last_fix().is_valid());
    assert_eq!(second.last_fix(), Default::default());
    assert_eq!(first.parser().line_matcher_count(), 0);
    assert_eq!(second.parser().line_matcher_count(), 0);
    assert_eq!(power.reservations(GPS_VCC), Ok(0));
    assert_eq!(power.reservations(GPS_ANT), Ok(0));
    assert_eq!(power.status(GPS_VBACKUP), Ok(true));
}
