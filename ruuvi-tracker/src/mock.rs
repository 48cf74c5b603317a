//! Host implementations of the platform seams.
//!
//! Time is virtual: the [`MockPoller`] advances the [`MockClock`] to the next deadline or data
//! arrival instead of sleeping, so tests run instantly and deterministically.

use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::convert::Infallible;

use embedded_hal::digital::{ErrorType, OutputPin, StatefulOutputPin};
use ruuvi_time::{Clock, Duration, Instant};

use crate::parser::EOL;
use crate::platform::{Direction, Events, Handle, Interest, Poller, Uart, UartError};

/// A clock that only moves when told to.
#[derive(Clone, Default)]
pub struct MockClock {
    ticks: Rc<Cell<u32>>,
}

impl MockClock {
    /// A clock at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// A clock at `ticks`, e.g. just before the counter wraps.
    pub fn starting_at(ticks: u32) -> Self {
        let clock = Self::new();
        clock.ticks.set(ticks);
        clock
    }

    /// Move time forward, wrapping like the hardware counter.
    pub fn advance(&self, duration: Duration) {
        self.ticks
            .set(self.ticks.get().wrapping_add(duration.ticks()));
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        Instant::from_ticks(self.ticks.get())
    }
}

struct Reply {
    line: Vec<u8>,
    response: Vec<u8>,
    latency: Duration,
}

struct UartState {
    handle: Handle,
    clock: MockClock,
    rx: VecDeque<(Instant, Vec<u8>)>,
    tx: Vec<u8>,
    tx_line: Vec<u8>,
    write_limit: Option<usize>,
    replies: Vec<Reply>,
    fail_next_read: Option<UartError>,
}

impl UartState {
    fn arrived(&self, at: Instant) -> bool {
        ruuvi_time::is_at_least(self.clock.now(), at)
    }

    fn queue(&mut self, at: Instant, bytes: Vec<u8>) {
        // Chunks are delivered in arrival order, equal times keep push order.
        let index = self
            .rx
            .iter()
            .position(|(other, _)| !ruuvi_time::is_at_least(at, *other))
            .unwrap_or(self.rx.len());
        self.rx.insert(index, (at, bytes));
    }

    fn answer_line(&mut self) {
        while let Some(end) = self.tx_line.windows(2).position(|w| w == EOL) {
            let line: Vec<u8> = self.tx_line.drain(..end + 2).take(end).collect();
            let now = self.clock.now();
            let due: Vec<(Instant, Vec<u8>)> = self
                .replies
                .iter()
                .filter(|reply| reply.line == line)
                .map(|reply| {
                    (
                        ruuvi_time::after(now, reply.latency),
                        reply.response.clone(),
                    )
                })
                .collect();
            for (at, bytes) in due {
                self.queue(at, bytes);
            }
        }
    }
}

/// A scripted serial device.
///
/// Every pushed chunk is delivered by its own read (split over several if the reader's buffer is
/// smaller), which is how tests control the read boundaries the parser sees.
#[derive(Clone)]
pub struct MockUart {
    state: Rc<RefCell<UartState>>,
}

impl MockUart {
    /// A device with `handle` reading time from `clock`.
    pub fn new(handle: Handle, clock: &MockClock) -> Self {
        Self {
            state: Rc::new(RefCell::new(UartState {
                handle,
                clock: clock.clone(),
                rx: VecDeque::new(),
                tx: Vec::new(),
                tx_line: Vec::new(),
                write_limit: None,
                replies: Vec::new(),
                fail_next_read: None,
            })),
        }
    }

    /// Make `bytes` readable now.
    pub fn push_rx(&self, bytes: &[u8]) {
        self.push_rx_after(Duration::from_ticks(0), bytes);
    }

    /// Make `bytes` readable `delay` from now.
    pub fn push_rx_after(&self, delay: Duration, bytes: &[u8]) {
        let mut state = self.state.borrow_mut();
        let at = ruuvi_time::after(state.clock.now(), delay);
        state.queue(at, bytes.to_vec());
    }

    /// Whenever `line` followed by `\r\n` is written, make `response` readable `latency` later.
    pub fn reply_to(&self, line: &[u8], response: &[u8], latency: Duration) {
        self.state.borrow_mut().replies.push(Reply {
            line: line.to_vec(),
            response: response.to_vec(),
            latency,
        });
    }

    /// Accept at most `limit` bytes per write.
    pub fn limit_writes(&self, limit: usize) {
        self.state.borrow_mut().write_limit = Some(limit);
    }

    /// Make the next read fail.
    pub fn fail_next_read(&self, error: UartError) {
        self.state.borrow_mut().fail_next_read = Some(error);
    }

    /// Everything written so far.
    pub fn tx(&self) -> Vec<u8> {
        self.state.borrow().tx.clone()
    }

    /// Everything written so far, clearing the log.
    pub fn take_tx(&self) -> Vec<u8> {
        core::mem::take(&mut self.state.borrow_mut().tx)
    }

    /// True if a read would return data now.
    pub fn has_data(&self) -> bool {
        let state = self.state.borrow();
        state.rx.front().is_some_and(|(at, _)| state.arrived(*at)) || state.fail_next_read.is_some()
    }

    /// When the next chunk becomes readable.
    pub fn next_arrival(&self) -> Option<Instant> {
        self.state.borrow().rx.front().map(|(at, _)| *at)
    }

    /// Chunks not read yet.
    pub fn pending_chunks(&self) -> usize {
        self.state.borrow().rx.len()
    }
}

impl Uart for MockUart {
    fn handle(&self) -> Handle {
        self.state.borrow().handle
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, UartError> {
        let mut state = self.state.borrow_mut();
        if let Some(error) = state.fail_next_read.take() {
            return Err(error);
        }
        let ready = state.rx.front().is_some_and(|(at, _)| state.arrived(*at));
        if !ready {
            return Ok(0);
        }
        let Some((_, chunk)) = state.rx.front_mut() else {
            return Ok(0);
        };
        let n = chunk.len().min(buffer.len());
        buffer[..n].copy_from_slice(&chunk[..n]);
        chunk.drain(..n);
        if chunk.is_empty() {
            state.rx.pop_front();
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, UartError> {
        let mut state = self.state.borrow_mut();
        let n = state.write_limit.map_or(data.len(), |limit| limit.min(data.len()));
        state.tx.extend_from_slice(&data[..n]);
        state.tx_line.extend_from_slice(&data[..n]);
        state.answer_line();
        Ok(n)
    }
}

/// Readiness poller over a set of [`MockUart`]s.
///
/// A poll that could only return on I/O that never comes returns no events, so
/// [`run_until`](crate::scheduler::Scheduler::run_until) can still see its task finish. Too many
/// of those in a row is a deadlock and panics.
pub struct MockPoller {
    clock: MockClock,
    uarts: Vec<MockUart>,
    idle_polls: u32,
}

const MAX_IDLE_POLLS: u32 = 1000;

impl MockPoller {
    /// A poller advancing `clock`.
    pub fn new(clock: &MockClock) -> Self {
        Self {
            clock: clock.clone(),
            uarts: Vec::new(),
            idle_polls: 0,
        }
    }

    /// Report readiness of `uart`.
    pub fn attach(&mut self, uart: &MockUart) {
        self.uarts.push(uart.clone());
    }

    fn uart(&self, handle: Handle) -> Option<&MockUart> {
        self.uarts.iter().find(|uart| uart.handle() == handle)
    }

    fn collect(&self, interests: &[Interest], events: &mut Events) {
        for interest in interests {
            let ready = match interest.direction {
                Direction::Read => self.uart(interest.handle).is_some_and(MockUart::has_data),
                Direction::Write => self.uart(interest.handle).is_some(),
            };
            if ready {
                let _ = events.push(*interest);
            }
        }
    }
}

impl Poller for MockPoller {
    fn poll(&mut self, interests: &[Interest], timeout: Option<Duration>, events: &mut Events) {
        self.collect(interests, events);
        if !events.is_empty() {
            self.idle_polls = 0;
            return;
        }

        let now = self.clock.now();
        let arrival = interests
            .iter()
            .filter(|interest| interest.direction == Direction::Read)
            .filter_map(|interest| self.uart(interest.handle))
            .filter_map(MockUart::next_arrival)
            .map(|at| ruuvi_time::remaining(now, at))
            .min();

        let wait = match (timeout, arrival) {
            (Some(timeout), Some(arrival)) => timeout.min(arrival),
            (Some(timeout), None) => timeout,
            (None, Some(arrival)) => arrival,
            (None, None) => {
                self.idle_polls += 1;
                assert!(
                    self.idle_polls < MAX_IDLE_POLLS,
                    "mock poller blocked forever on {:?}",
                    interests
                );
                return;
            }
        };
        self.idle_polls = 0;
        self.clock.advance(wait);
        self.collect(interests, events);
    }

    fn sleep(&mut self, duration: Duration) {
        self.clock.advance(duration);
    }
}

/// An output pin remembering its level, shared between the test and the code under test.
#[derive(Clone, Default)]
pub struct MockPin {
    high: Rc<Cell<bool>>,
    transitions: Rc<Cell<usize>>,
}

impl MockPin {
    /// A pin driven low.
    pub fn new() -> Self {
        Self::default()
    }

    /// A pin left high, e.g. by the bootloader.
    pub fn high() -> Self {
        let pin = Self::new();
        pin.high.set(true);
        pin
    }

    /// Current level.
    pub fn is_high(&self) -> bool {
        self.high.get()
    }

    /// Number of level changes since creation.
    pub fn transitions(&self) -> usize {
        self.transitions.get()
    }

    fn drive(&self, high: bool) {
        if self.high.replace(high) != high {
            self.transitions.set(self.transitions.get() + 1);
        }
    }
}

impl ErrorType for MockPin {
    type Error = Infallible;
}

impl OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.drive(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.drive(true);
        Ok(())
    }
}

impl StatefulOutputPin for MockPin {
    fn is_set_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.high.get())
    }

    fn is_set_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.high.get())
    }
}
