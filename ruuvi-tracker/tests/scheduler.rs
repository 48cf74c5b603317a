//! Timing and cancellation through the public scheduler API.

use std::cell::RefCell;
use std::rc::Rc;

use ruuvi_tracker::mock::{MockClock, MockPoller, MockUart};
use ruuvi_tracker::parser::UartParser;
use ruuvi_tracker::platform::{Clock, Handle};
use ruuvi_tracker::scheduler::{Scheduler, Spawner, Wait};
use ruuvi_tracker::{Error, ExtU32, Instant};

#[test]
fn timers_fire_on_time_next_to_a_busy_task() {
    let clock = MockClock::new();
    let mut scheduler = Scheduler::new(clock.clone(), MockPoller::new(&clock));
    let spawner = scheduler.spawner();
    let fired = Rc::new(RefCell::new(Vec::new()));

    let log = fired.clone();
    let now = spawner.clone();
    let first = spawner.schedule_after(5.secs(), async move {
        log.borrow_mut().push(("first", now.now().ticks()));
        Ok(())
    });
    assert_eq!(spawner.wait_condition(first.id()), Some(Wait::ReadyAt(Instant::from_ticks(5_000))));

    let log = fired.clone();
    let sleeper = spawner.clone();
    scheduler.spawn(async move {
        sleeper.sleep(15.secs()).await;
        log.borrow_mut().push(("second", sleeper.now().ticks()));
        Ok(())
    });

    // One millisecond of work per pass, never blocking.
    let busy = spawner.clone();
    let done = fired.clone();
    let time = clock.clone();
    let worker = scheduler.spawn(async move {
        let mut passes = 0u32;
        while done.borrow().len() < 2 {
            time.advance(1.millis());
            passes += 1;
            busy.yield_now().await;
        }
        Ok(passes)
    });

    let passes = scheduler.run_until(worker).unwrap();
    let fired = fired.borrow();
    assert_eq!(fired[0].0, "first");
    assert!((5_000..=5_001).contains(&fired[0].1), "{:?}", fired[0]);
    assert_eq!(fired[1].0, "second");
    assert!((15_000..=15_001).contains(&fired[1].1), "{:?}", fired[1]);
    assert!(passes >= 15_000);
}

#[test]
fn respawning_chain_does_not_starve_a_timer() {
    let clock = MockClock::new();
    let mut scheduler = Scheduler::new(clock.clone(), MockPoller::new(&clock));
    let spawner = scheduler.spawner();
    let fired_at = Rc::new(RefCell::new(None));

    let seen = fired_at.clone();
    let now = spawner.clone();
    let timer = spawner.schedule_after(5.secs(), async move {
        *seen.borrow_mut() = Some(now.now().ticks());
        Ok(())
    });

    fn link(spawner: Spawner, clock: MockClock, stop: Rc<RefCell<Option<u32>>>) {
        let next = spawner.clone();
        spawner.spawn(async move {
            if stop.borrow().is_none() {
                clock.advance(1.millis());
                link(next, clock, stop);
            }
            Ok(())
        });
    }
    link(spawner.clone(), clock.clone(), fired_at.clone());

    scheduler.run_until(timer).unwrap();
    let at = fired_at.borrow().unwrap();
    assert!((5_000..=5_001).contains(&at), "fired at {}", at);
}

#[test]
fn cancelling_the_caller_frees_the_command_slot() {
    let clock = MockClock::new();
    let uart = MockUart::new(Handle(1), &clock);
    let mut poller = MockPoller::new(&clock);
    poller.attach(&uart);
    let mut scheduler = Scheduler::new(clock.clone(), poller);
    let spawner = scheduler.spawner();
    let parser: Rc<UartParser<MockUart>> =
        Rc::new(UartParser::new(uart.clone(), spawner.clone(), Default::default()));

    let reader = parser.clone();
    scheduler.spawn(async move { reader.run().await });

    let caller = parser.clone();
    let stuck = scheduler.spawn(async move { caller.send_command(b"AT+COPS?", 10.secs()).await });
    let stuck_id = stuck.id();

    let canceller = spawner.clone();
    let check = parser.clone();
    let cancelled = scheduler.spawn(async move {
        canceller.sleep(50.millis()).await;
        assert!(check.has_pending_command());
        assert!(canceller.wait_condition(stuck_id).is_some());
        assert!(canceller.cancel(stuck_id));
        Ok(())
    });
    scheduler.run_until(cancelled).unwrap();
    assert_eq!(scheduler.run_until(stuck), Err(Error::Cancelled));
    assert!(!parser.has_pending_command());

    uart.reply_to(b"AT", b"OK\r\n", 5.millis());
    let caller = parser.clone();
    let next = scheduler.spawn(async move { caller.send_command(b"AT", 1.secs()).await });
    assert_eq!(scheduler.run_until(next), Ok(b"OK".to_vec()));
    assert!(clock.now().ticks() < 1_000);
}

#[test]
fn sleeps_across_the_counter_wrap() {
    let clock = MockClock::starting_at(u32::MAX - 100);
    let mut scheduler = Scheduler::new(clock.clone(), MockPoller::new(&clock));
    let spawner = scheduler.spawner();
    let woke = Rc::new(RefCell::new(Vec::new()));

    let log = woke.clone();
    let late = spawner.clone();
    scheduler.spawn(async move {
        late.sleep(500.millis()).await;
        log.borrow_mut().push(late.now().ticks());
        Ok(())
    });
    let log = woke.clone();
    let early = spawner.clone();
    scheduler.spawn(async move {
        early.sleep(50.millis()).await;
        log.borrow_mut().push(early.now().ticks());
        Ok(())
    });

    scheduler.run_forever().unwrap();
    assert_eq!(*woke.borrow(), [u32::MAX - 50, 399]);
    assert_eq!(clock.now().ticks(), 399);
}
