//! UART protocol parser.
//!
//! One parser wraps one serial device. Its [`run`](UartParser::run) task reads whatever the
//! device has, appends it to a fixed size buffer and frames `\r\n` terminated lines. Every line
//! goes first to the pending command, if any, then to the line matchers in registration order.
//! Pattern matchers see the raw buffer instead, for responses that are not whole lines (the
//! `> ` prompt of a modem, for example).
//!
//! Scanning and dispatch are synchronous, the parser suspends only while waiting for the device.
//! Callbacks must be short.
//!
//! ```
//! use std::rc::Rc;
//! use ruuvi_tracker::mock::{MockClock, MockPoller, MockUart};
//! use ruuvi_tracker::parser::{LineTest, Retention, UartParser};
//! use ruuvi_tracker::platform::Handle;
//! use ruuvi_tracker::scheduler::Scheduler;
//! use ruuvi_tracker::ExtU32;
//!
//! let clock = MockClock::new();
//! let uart = MockUart::new(Handle(1), &clock);
//! let mut poller = MockPoller::new(&clock);
//! poller.attach(&uart);
//! let mut scheduler = Scheduler::new(clock, poller);
//!
//! let parser: Rc<UartParser<MockUart>> =
//!     Rc::new(UartParser::new(uart.clone(), scheduler.spawner(), Default::default()));
//! parser
//!     .add_line_matcher("ring", LineTest::equals("RING"), |_| Retention::Release)
//!     .unwrap();
//! scheduler.spawn({
//!     let parser = parser.clone();
//!     async move { parser.run().await }
//! });
//!
//! uart.reply_to(b"AT", b"AT\r\nOK\r\n", 20.millis());
//! let command = scheduler.spawn({
//!     let parser = parser.clone();
//!     async move { parser.send_command(b"AT", 1.secs()).await }
//! });
//! assert_eq!(scheduler.run_until(command).unwrap(), b"OK");
//! ```

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell, RefMut};
use core::future::poll_fn;
use core::task::{Context, Poll};

use ruuvi_common::dropper::OnDrop;
use ruuvi_time::{Duration, TimeoutError};

use crate::config::{UartConfig, DEFAULT_BUFFER_SIZE, MAX_MATCHERS, MAX_READ_CHUNK};
use crate::platform::{Handle, Interest, Uart};
use crate::scheduler::Spawner;
use crate::Error;

mod buffer;
mod command;
mod matcher;

pub use buffer::{ParserBuffer, EOL};
pub use matcher::{LineTest, Pattern, PatternMatch, PatternMode, Retention};

use command::{Expect, PendingCommand};
use matcher::{LineMatcher, PatternMatcher};

type RawCallback = Box<dyn FnMut(&[u8])>;

struct State<const N: usize> {
    buffer: ParserBuffer<N>,
    lines: heapless::Vec<LineMatcher, MAX_MATCHERS>,
    patterns: heapless::Vec<PatternMatcher, MAX_MATCHERS>,
    raw: Option<RawCallback>,
}

/// Line framing, matcher dispatch and command/response over one serial device.
///
/// `N` is the buffer size. A line longer than the buffer is discarded with a warning, up to and
/// including its terminator.
pub struct UartParser<U: Uart, const N: usize = DEFAULT_BUFFER_SIZE> {
    uart: RefCell<U>,
    handle: Handle,
    spawner: Spawner,
    config: UartConfig,
    state: RefCell<State<N>>,
    command: RefCell<Option<PendingCommand>>,
    stop_requested: Cell<bool>,
    running: Cell<bool>,
}

impl<U: Uart, const N: usize> UartParser<U, N> {
    /// Wrap `uart`, the parser does nothing until [`run`](Self::run) is spawned.
    pub fn new(uart: U, spawner: Spawner, config: UartConfig) -> Self {
        const { assert!(N > 0, "parser buffer must hold at least one byte") };
        let handle = uart.handle();
        Self {
            uart: RefCell::new(uart),
            handle,
            spawner,
            config,
            state: RefCell::new(State {
                buffer: ParserBuffer::new(),
                lines: heapless::Vec::new(),
                patterns: heapless::Vec::new(),
                raw: None,
            }),
            command: RefCell::new(None),
            stop_requested: Cell::new(false),
            running: Cell::new(false),
        }
    }

    /// The handle of the wrapped device.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    fn state(&self) -> Result<RefMut<'_, State<N>>, Error> {
        self.state.try_borrow_mut().map_err(|_| Error::ParserBusy)
    }

    /// Call `callback` with every line passing `test`.
    pub fn add_line_matcher(
        &self,
        id: &'static str,
        test: LineTest,
        callback: impl FnMut(&[u8]) -> Retention + 'static,
    ) -> Result<(), Error> {
        let mut state = self.state()?;
        if state.lines.iter().any(|matcher| matcher.id == id) {
            log::error!("parser {:?}: line matcher `{}` already registered", self.handle, id);
            return Err(Error::DuplicateMatcher(id));
        }
        let matcher = LineMatcher {
            id,
            test,
            callback: Box::new(callback),
        };
        state
            .lines
            .push(matcher)
            .map_err(|_| Error::TooManyMatchers)
    }

    /// Remove a line matcher, true if it was registered.
    pub fn remove_line_matcher(&self, id: &str) -> Result<bool, Error> {
        let mut state = self.state()?;
        let before = state.lines.len();
        state.lines.retain(|matcher| matcher.id != id);
        Ok(state.lines.len() != before)
    }

    /// Call `callback` whenever `pattern` matches the buffer.
    ///
    /// Releasing a match drops the buffer up to its end and the pattern is tried again on what
    /// is left. Keeping it stops the buffer from being flushed, the callback sees the same match
    /// again after the next read.
    pub fn add_pattern_matcher(
        &self,
        id: &'static str,
        pattern: Pattern,
        mode: PatternMode,
        callback: impl FnMut(&PatternMatch<'_>) -> Retention + 'static,
    ) -> Result<(), Error> {
        let mut state = self.state()?;
        if state.patterns.iter().any(|matcher| matcher.id == id) {
            log::error!("parser {:?}: pattern matcher `{}` already registered", self.handle, id);
            return Err(Error::DuplicateMatcher(id));
        }
        state
            .patterns
            .push(PatternMatcher::new(id, pattern, mode, Box::new(callback)))
            .map_err(|_| Error::TooManyMatchers)
    }

    /// Remove a pattern matcher, true if it was registered.
    pub fn remove_pattern_matcher(&self, id: &str) -> Result<bool, Error> {
        let mut state = self.state()?;
        let before = state.patterns.len();
        state.patterns.retain(|matcher| matcher.id != id);
        Ok(state.patterns.len() != before)
    }

    /// Hand every received chunk to `callback` untouched until [`exit_raw`](Self::exit_raw).
    pub fn enter_raw(&self, callback: impl FnMut(&[u8]) + 'static) -> Result<(), Error> {
        self.state()?.raw = Some(Box::new(callback));
        Ok(())
    }

    /// Back to framing, whatever was buffered before is dropped.
    pub fn exit_raw(&self) -> Result<(), Error> {
        let mut state = self.state()?;
        state.raw = None;
        state.buffer.clear();
        Ok(())
    }

    /// The parser task: read, frame and dispatch until [`stop`](Self::stop)ped.
    pub async fn run(&self) -> Result<(), Error> {
        if self.running.replace(true) {
            return Err(Error::ParserBusy);
        }
        let _running = OnDrop::new(|| {
            self.running.set(false);
            self.stop_requested.set(false);
        });
        log::debug!("parser {:?} running", self.handle);

        let mut chunk = [0u8; MAX_READ_CHUNK];
        let chunk_len = self.config.read_chunk.clamp(1, MAX_READ_CHUNK);

        while !self.stop_requested.get() {
            self.spawner.readable(self.handle).await?;
            if self.stop_requested.get() {
                break;
            }

            let len = chunk_len.min(self.free().max(1));
            let read = self.uart.borrow_mut().read(&mut chunk[..len]);
            match read {
                // Nothing this time.
                Ok(0) => {}
                Ok(n) => self.feed(&chunk[..n]),
                Err(error) => log::warn!("parser {:?}: read failed: {}", self.handle, error),
            }
        }

        log::debug!("parser {:?} stopped", self.handle);
        Ok(())
    }

    /// Ask the running parser to exit at its next suspension point.
    ///
    /// Does nothing while the parser is not running, a later [`run`](Self::run) reads as usual.
    pub fn stop(&self) {
        if !self.running.get() {
            log::debug!("parser {:?}: stop while not running ignored", self.handle);
            return;
        }
        self.stop_requested.set(true);
        self.spawner.notify(Interest::readable(self.handle));
    }

    fn free(&self) -> usize {
        match self.state.try_borrow() {
            Ok(state) if state.raw.is_some() => MAX_READ_CHUNK,
            Ok(state) => state.buffer.free(),
            Err(_) => 0,
        }
    }

    /// Process `data` as if it had just been read.
    pub fn feed(&self, data: &[u8]) {
        let Ok(mut state) = self.state.try_borrow_mut() else {
            log::warn!("parser {:?}: feed from a callback ignored", self.handle);
            return;
        };
        let state = &mut *state;

        if let Some(raw) = state.raw.as_mut() {
            raw(data);
            return;
        }

        let mut rest = data;
        while !rest.is_empty() {
            // The tail of an overlong line is not a line of its own.
            rest = state.buffer.skip_discarded(rest);
            if rest.is_empty() {
                break;
            }
            if state.buffer.free() == 0 {
                log::warn!(
                    "parser {:?}: no line terminator in {} bytes, line discarded",
                    self.handle,
                    state.buffer.len()
                );
                state.buffer.discard_line();
                continue;
            }
            let (now, later) = rest.split_at(rest.len().min(state.buffer.free()));
            // Fits, `now` is at most the free space.
            let _ = state.buffer.extend(now);
            self.scan(state);
            rest = later;
        }
    }

    fn scan(&self, state: &mut State<N>) {
        let State {
            buffer,
            lines,
            patterns,
            ..
        } = state;
        let mut keep = false;

        while let Some(range) = buffer.next_line() {
            let line = &buffer.as_bytes()[range];
            log::trace!("parser {:?} < {}", self.handle, printable(line));

            if self.offer_to_command(line) {
                continue;
            }
            for matcher in lines.iter_mut() {
                if matcher.test.matches(line) && (matcher.callback)(line) == Retention::Keep {
                    keep = true;
                }
            }
        }

        for matcher in patterns.iter_mut() {
            while let Some((end, retention)) = matcher.dispatch(buffer.as_bytes()) {
                if retention == Retention::Keep {
                    keep = true;
                    break;
                }
                if end == 0 {
                    break;
                }
                buffer.consume(end);
            }
        }

        if !keep {
            buffer.flush();
        }
    }

    fn offer_to_command(&self, line: &[u8]) -> bool {
        match self.command.try_borrow_mut() {
            Ok(mut slot) => slot.as_mut().is_some_and(|pending| pending.offer(line)),
            Err(_) => false,
        }
    }

    /// Write all of `data`, waiting for the device to drain when it takes only part of it.
    pub async fn write_all(&self, mut data: &[u8]) -> Result<(), Error> {
        while !data.is_empty() {
            let written = self.uart.borrow_mut().write(data)?;
            data = &data[written.min(data.len())..];
            if !data.is_empty() {
                self.spawner.writable(self.handle).await?;
            }
        }
        Ok(())
    }

    /// Write `line` and the terminator.
    pub async fn write_line(&self, line: &[u8]) -> Result<(), Error> {
        log::trace!("parser {:?} > {}", self.handle, printable(line));
        self.write_all(line).await?;
        self.write_all(EOL).await
    }

    /// Send `command` and return the first line that answers it.
    ///
    /// Empty lines, the echo of the command and `+` notices are not answers, they go to the line
    /// matchers as usual. Fails with [`Error::CommandInProgress`] if another command is pending
    /// and with [`Error::CommandTimeout`] when nothing answers within `timeout`; either way the
    /// parser accepts the next command.
    pub async fn send_command(&self, command: &[u8], timeout: Duration) -> Result<Vec<u8>, Error> {
        self.exchange(command, Expect::Reply, timeout).await
    }

    /// Like [`send_command`](Self::send_command), the answer being the first line passing
    /// `expect`.
    pub async fn send_command_expecting(
        &self,
        command: &[u8],
        expect: LineTest,
        timeout: Duration,
    ) -> Result<Vec<u8>, Error> {
        self.exchange(command, Expect::Line(expect), timeout).await
    }

    async fn exchange(
        &self,
        command: &[u8],
        expect: Expect,
        timeout: Duration,
    ) -> Result<Vec<u8>, Error> {
        {
            let mut slot = self.command.try_borrow_mut().map_err(|_| Error::ParserBusy)?;
            if slot.is_some() {
                log::error!("parser {:?}: command already pending", self.handle);
                return Err(Error::CommandInProgress);
            }
            *slot = Some(PendingCommand::new(command, expect));
        }
        // Also runs when the awaiting task is cancelled.
        let _pending = OnDrop::new(|| {
            if let Ok(mut slot) = self.command.try_borrow_mut() {
                *slot = None;
            }
        });

        self.write_line(command).await?;

        let deadline = ruuvi_time::after(self.spawner.now(), timeout);
        let response = poll_fn(|cx| self.poll_response(cx));
        match self.spawner.timeout_at(deadline, response).await {
            Ok(response) => response,
            Err(TimeoutError) => {
                log::warn!(
                    "parser {:?}: no answer to {}",
                    self.handle,
                    printable(command)
                );
                Err(Error::CommandTimeout)
            }
        }
    }

    fn poll_response(&self, cx: &mut Context<'_>) -> Poll<Result<Vec<u8>, Error>> {
        let Ok(mut slot) = self.command.try_borrow_mut() else {
            cx.waker().wake_by_ref();
            return Poll::Pending;
        };
        match slot.as_mut() {
            Some(pending) => match pending.take_response() {
                Some(response) => Poll::Ready(Ok(response)),
                None => {
                    pending.waker().register(cx.waker());
                    Poll::Pending
                }
            },
            None => Poll::Ready(Err(Error::Cancelled)),
        }
    }

    /// Registered line matchers.
    pub fn line_matcher_count(&self) -> usize {
        self.state.try_borrow().map_or(0, |state| state.lines.len())
    }

    /// Registered pattern matchers.
    pub fn pattern_matcher_count(&self) -> usize {
        self.state.try_borrow().map_or(0, |state| state.patterns.len())
    }

    /// True between [`enter_raw`](Self::enter_raw) and [`exit_raw`](Self::exit_raw).
    pub fn is_raw(&self) -> bool {
        self.state
            .try_borrow()
            .is_ok_and(|state| state.raw.is_some())
    }

    /// True while a command waits for its answer.
    pub fn has_pending_command(&self) -> bool {
        self.command
            .try_borrow()
            .map_or(true, |slot| slot.is_some())
    }

    /// True while the parser task runs.
    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    /// Bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.state.try_borrow().map_or(0, |state| state.buffer.len())
    }
}

fn printable(bytes: &[u8]) -> &str {
    core::str::from_utf8(bytes).unwrap_or("<binary>")
}
