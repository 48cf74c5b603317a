//! Cooperative single core executor.
//!
//! Tasks are `async` blocks. A task runs until it awaits something that is not ready, the
//! leaf futures of this module ([`Sleep`], [`Readiness`], [`YieldNow`], a [`JoinHandle`] or a
//! parser's command response) then park it on a timer entry, an I/O waiter or a waker and the
//! loop moves on. Every loop iteration
//!
//! 1. moves the expired timers to the ready queue,
//! 2. polls the tasks that were ready when the iteration began, FIFO,
//! 3. waits for the next deadline, through the [`Poller`] when anyone waits on I/O, and wakes
//!    the waiters in the order the poller reported them.
//!
//! A task that returns an error ends alone, the error is logged. A task that returns a
//! [fatal](Error::is_fatal) error, running out of a fixed table, or a stall halts the loop.

use alloc::boxed::Box;
use alloc::rc::{Rc, Weak};
use alloc::sync::Arc;
use core::cell::{Cell, RefCell};
use core::future::Future;
use core::pin::pin;
use core::task::{Context, Poll, Waker};

use futures_util::future::{select, Either};
use heapless::Vec;
use ruuvi_time::{Clock, Duration, Instant, TimeoutError, TimerKey, TimerQueue};

use crate::config::{MAX_IO_WAITERS, MAX_TASKS, MAX_TIMERS};
use crate::platform::{Direction, Events, Handle, Interest, Poller};
use crate::{Error, Fatal};

mod io;
mod join;
mod task;
mod time;

pub use io::Readiness;
pub use join::JoinHandle;
pub use task::{TaskId, Wait};
pub use time::{Sleep, YieldNow};

use join::{Cancel, JoinState};
use task::{BoxedTask, ReadyQueue, Slot, Task, TaskWaker};

/// What a timer entry wakes.
enum Wakeup {
    /// A task parked by `schedule_at`, before its first poll.
    Task(TaskId),
    /// A sleeping future.
    Waker(Waker),
}

struct IoWaiter {
    interest: Interest,
    key: u32,
    waker: Waker,
}

/// State shared by the scheduler, its spawners and the leaf futures.
pub(crate) struct Shared {
    clock: Box<dyn Clock>,
    tasks: RefCell<Vec<Slot, MAX_TASKS>>,
    ready: Arc<ReadyQueue>,
    timers: RefCell<TimerQueue<Wakeup, MAX_TIMERS>>,
    waiters: RefCell<Vec<IoWaiter, MAX_IO_WAITERS>>,
    next_waiter_key: Cell<u32>,
    current: Cell<Option<TaskId>>,
    current_wait: Cell<Option<Wait>>,
    halted: Cell<Option<Error>>,
}

impl Shared {
    fn new(clock: Box<dyn Clock>) -> Self {
        let mut tasks = Vec::new();
        while tasks.push(Slot::vacant()).is_ok() {}
        Self {
            clock,
            tasks: RefCell::new(tasks),
            ready: Arc::new(ReadyQueue::new()),
            timers: RefCell::new(TimerQueue::new()),
            waiters: RefCell::new(Vec::new()),
            next_waiter_key: Cell::new(0),
            current: Cell::new(None),
            current_wait: Cell::new(None),
            halted: Cell::new(None),
        }
    }

    fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Stop the loop, the first reason is kept.
    fn halt(&self, error: Error) {
        if self.halted.get().is_none() {
            log::error!("scheduler halted: {}", error);
            self.halted.set(Some(error));
        }
    }

    fn check_halted(&self) -> Result<(), Error> {
        match self.halted.get() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Record what the task being polled is about to wait for.
    fn note_wait(&self, wait: Wait) {
        if self.current.get().is_some() {
            self.current_wait.set(Some(wait));
        }
    }

    fn insert_task(
        &self,
        future: BoxedTask,
        on_cancel: Rc<dyn Cancel>,
        park_until: Option<Instant>,
    ) -> Result<TaskId, Error> {
        let task = {
            let mut tasks = self.tasks.borrow_mut();
            match tasks.iter().position(|slot| slot.task.is_none()) {
                Some(index) => {
                    let slot = &mut tasks[index];
                    let id = TaskId::new(index, slot.generation);
                    slot.task = Some(Task {
                        waker: TaskWaker::new(id, self.ready.clone()),
                        future: Some(future),
                        wait: Wait::RunNow,
                        on_cancel,
                        cancel_requested: false,
                    });
                    Ok(id)
                }
                None => Err(future),
            }
        };

        let id = match task {
            Ok(id) => id,
            Err(future) => {
                drop(future);
                let error = Error::Fatal(Fatal::TaskSlotsExhausted);
                self.halt(error);
                return Err(error);
            }
        };

        match park_until {
            None => self.wake_task(id),
            Some(deadline) => {
                if self
                    .timers
                    .borrow_mut()
                    .insert(deadline, Wakeup::Task(id))
                    .is_err()
                {
                    let task = self.tasks.borrow_mut()[id.index()].vacate();
                    drop(task);
                    let error = Error::Fatal(Fatal::TimerSlotsExhausted);
                    self.halt(error);
                    return Err(error);
                }
                self.set_wait(id, Wait::ReadyAt(deadline));
            }
        }

        log::trace!("spawned {:?}", id);
        Ok(id)
    }

    fn set_wait(&self, id: TaskId, wait: Wait) {
        let mut tasks = self.tasks.borrow_mut();
        if let Some(task) = tasks
            .get_mut(id.index())
            .filter(|slot| slot.holds(id))
            .and_then(|slot| slot.task.as_mut())
        {
            task.wait = wait;
        }
    }

    fn wake_task(&self, id: TaskId) {
        let waker = {
            let tasks = self.tasks.borrow();
            tasks
                .get(id.index())
                .filter(|slot| slot.holds(id))
                .and_then(|slot| slot.task.as_ref())
                .map(|task| task.waker.clone())
        };
        if let Some(waker) = waker {
            waker.schedule();
        }
    }

    fn live_tasks(&self) -> usize {
        self.tasks
            .borrow()
            .iter()
            .filter(|slot| slot.task.is_some())
            .count()
    }

    fn poll_task(&self, id: TaskId) {
        let taken = {
            let mut tasks = self.tasks.borrow_mut();
            tasks
                .get_mut(id.index())
                .filter(|slot| slot.holds(id))
                .and_then(|slot| slot.task.as_mut())
                .and_then(|task| {
                    let future = task.future.take()?;
                    task.wait = Wait::RunNow;
                    Some((future, task.waker.clone()))
                })
        };
        let Some((mut future, task_waker)) = taken else {
            return;
        };

        task_waker.clear_queued();
        let waker = Waker::from(task_waker.clone());
        let mut cx = Context::from_waker(&waker);

        self.current.set(Some(id));
        self.current_wait.set(None);
        let poll = future.as_mut().poll(&mut cx);
        self.current.set(None);
        let wait = self.current_wait.take().unwrap_or(Wait::Signal);

        let mut future = Some(future);
        let retired = {
            let mut tasks = self.tasks.borrow_mut();
            let slot = &mut tasks[id.index()];
            let keep = poll.is_pending()
                && slot.task.as_ref().is_some_and(|task| !task.cancel_requested);
            match slot.task.as_mut() {
                Some(task) if keep => {
                    task.future = future.take();
                    task.wait = if task_waker.is_queued() {
                        Wait::RunNow
                    } else {
                        wait
                    };
                    None
                }
                _ => slot.vacate(),
            }
        };

        // Dropped outside of the borrow, the future's guards unregister their timers and waiters.
        drop(future);
        if let Some(task) = retired {
            task.waker.retire();
            if poll.is_pending() {
                log::debug!("{:?} cancelled itself", id);
                task.on_cancel.cancel();
            } else {
                log::trace!("{:?} finished", id);
            }
        }
    }

    fn cancel(&self, id: TaskId) -> bool {
        let task = {
            let mut tasks = self.tasks.borrow_mut();
            let Some(slot) = tasks.get_mut(id.index()).filter(|slot| slot.holds(id)) else {
                return false;
            };
            // Cancelling itself, finished off once its poll returns.
            if let Some(task) = slot.task.as_mut().filter(|task| task.future.is_none()) {
                task.cancel_requested = true;
                return true;
            }
            slot.vacate()
        };
        let Some(task) = task else {
            return false;
        };

        task.waker.retire();
        self.timers
            .borrow_mut()
            .retain(|entry| !matches!(entry.value, Wakeup::Task(parked) if parked == id));
        let Task {
            future, on_cancel, ..
        } = task;
        drop(future);
        on_cancel.cancel();
        log::debug!("{:?} cancelled", id);
        true
    }

    fn wait_condition(&self, id: TaskId) -> Option<Wait> {
        let tasks = self.tasks.borrow();
        tasks
            .get(id.index())
            .filter(|slot| slot.holds(id))
            .and_then(|slot| slot.task.as_ref())
            .map(|task| task.wait)
    }

    fn fire_timers(&self) {
        let now = self.now();
        loop {
            let Some(entry) = self.timers.borrow_mut().pop_expired(now) else {
                break;
            };
            match entry.value {
                Wakeup::Task(id) => self.wake_task(id),
                Wakeup::Waker(waker) => waker.wake(),
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timers.borrow().next_deadline()
    }

    fn arm_timer(&self, deadline: Instant, waker: &Waker) -> Option<TimerKey> {
        let key = self
            .timers
            .borrow_mut()
            .insert(deadline, Wakeup::Waker(waker.clone()))
            .ok();
        match key {
            Some(_) => self.note_wait(Wait::ReadyAt(deadline)),
            None => self.halt(Error::Fatal(Fatal::TimerSlotsExhausted)),
        }
        key
    }

    /// Still armed? If so make sure it wakes `waker`.
    fn refresh_timer(&self, key: TimerKey, deadline: Instant, waker: &Waker) -> bool {
        let mut timers = self.timers.borrow_mut();
        let Some(Wakeup::Waker(armed)) = timers.get_mut(key) else {
            return false;
        };
        if !armed.will_wake(waker) {
            *armed = waker.clone();
        }
        drop(timers);
        self.note_wait(Wait::ReadyAt(deadline));
        true
    }

    fn disarm_timer(&self, key: TimerKey) {
        self.timers.borrow_mut().remove(key);
    }

    fn register_waiter(&self, interest: Interest, waker: &Waker) -> Result<u32, Error> {
        let mut waiters = self.waiters.borrow_mut();
        if waiters.iter().any(|w| w.interest == interest) {
            return Err(Error::WaiterConflict(interest));
        }
        let key = self.next_waiter_key.get();
        self.next_waiter_key.set(key.wrapping_add(1));
        let waiter = IoWaiter {
            interest,
            key,
            waker: waker.clone(),
        };
        if waiters.push(waiter).is_err() {
            drop(waiters);
            let error = Error::Fatal(Fatal::WaiterSlotsExhausted);
            self.halt(error);
            return Err(error);
        }
        drop(waiters);
        self.note_wait(wait_for(interest));
        Ok(key)
    }

    fn refresh_waiter(&self, key: u32, waker: &Waker) -> bool {
        let mut waiters = self.waiters.borrow_mut();
        let Some(waiter) = waiters.iter_mut().find(|w| w.key == key) else {
            return false;
        };
        if !waiter.waker.will_wake(waker) {
            waiter.waker = waker.clone();
        }
        let interest = waiter.interest;
        drop(waiters);
        self.note_wait(wait_for(interest));
        true
    }

    fn remove_waiter(&self, key: u32) {
        self.waiters.borrow_mut().retain(|w| w.key != key);
    }

    fn notify(&self, interest: Interest) -> bool {
        let waiter = {
            let mut waiters = self.waiters.borrow_mut();
            let index = waiters.iter().position(|w| w.interest == interest);
            index.map(|index| waiters.swap_remove(index))
        };
        match waiter {
            Some(waiter) => {
                waiter.waker.wake();
                true
            }
            None => false,
        }
    }

    fn interests(&self) -> Vec<Interest, MAX_IO_WAITERS> {
        self.waiters.borrow().iter().map(|w| w.interest).collect()
    }
}

fn wait_for(interest: Interest) -> Wait {
    match interest.direction {
        Direction::Read => Wait::Readable(interest.handle),
        Direction::Write => Wait::Writable(interest.handle),
    }
}

/// A handle to spawn tasks and reach the scheduler from inside them.
///
/// Cheap to clone. Drivers and parsers keep one.
#[derive(Clone)]
pub struct Spawner {
    shared: Rc<Shared>,
}

impl Spawner {
    /// Spawn a task, it is polled in the next loop iteration.
    pub fn spawn<F, T>(&self, future: F) -> JoinHandle<T>
    where
        F: Future<Output = Result<T, Error>> + 'static,
        T: 'static,
    {
        self.spawn_inner(future, None)
    }

    /// Spawn a task that is first polled `delay` from now.
    pub fn schedule_after<F, T>(&self, delay: Duration, future: F) -> JoinHandle<T>
    where
        F: Future<Output = Result<T, Error>> + 'static,
        T: 'static,
    {
        let deadline = ruuvi_time::after(self.now(), delay);
        self.spawn_inner(future, Some(deadline))
    }

    /// Spawn a task that is first polled at `deadline`.
    pub fn schedule_at<F, T>(&self, deadline: Instant, future: F) -> JoinHandle<T>
    where
        F: Future<Output = Result<T, Error>> + 'static,
        T: 'static,
    {
        self.spawn_inner(future, Some(deadline))
    }

    fn spawn_inner<F, T>(&self, future: F, park_until: Option<Instant>) -> JoinHandle<T>
    where
        F: Future<Output = Result<T, Error>> + 'static,
        T: 'static,
    {
        let state = Rc::new(JoinState::new());
        let completion = state.clone();
        let shared: Weak<Shared> = Rc::downgrade(&self.shared);

        let task = async move {
            let result = future.await;
            if let Err(error) = &result {
                if error.is_fatal() {
                    if let Some(shared) = shared.upgrade() {
                        shared.halt(*error);
                    }
                } else {
                    log::warn!("task failed: {}", error);
                }
            }
            completion.complete(result);
        };

        match self
            .shared
            .insert_task(Box::pin(task), state.clone(), park_until)
        {
            Ok(id) => JoinHandle::new(id, state),
            Err(error) => {
                state.complete(Err(error));
                JoinHandle::new(TaskId::DETACHED, state)
            }
        }
    }

    /// Cancel a task: drop its future and resolve its [`JoinHandle`] with
    /// [`Error::Cancelled`]. Returns false if the task already finished.
    pub fn cancel(&self, id: TaskId) -> bool {
        self.shared.cancel(id)
    }

    /// What a task currently waits for, `None` once it is gone.
    pub fn wait_condition(&self, id: TaskId) -> Option<Wait> {
        self.shared.wait_condition(id)
    }

    /// The current time.
    pub fn now(&self) -> Instant {
        self.shared.now()
    }

    /// Suspend for `duration`.
    pub fn sleep(&self, duration: Duration) -> Sleep {
        self.sleep_until(ruuvi_time::after(self.now(), duration))
    }

    /// Suspend until `deadline`.
    pub fn sleep_until(&self, deadline: Instant) -> Sleep {
        Sleep::new(self.shared.clone(), deadline)
    }

    /// Let every other ready task run once.
    pub fn yield_now(&self) -> YieldNow {
        YieldNow::new()
    }

    /// Run `future` for at most `duration`.
    pub async fn timeout<F: Future>(
        &self,
        duration: Duration,
        future: F,
    ) -> Result<F::Output, TimeoutError> {
        self.timeout_at(ruuvi_time::after(self.now(), duration), future)
            .await
    }

    /// Run `future` until `deadline` at most. The future is dropped on timeout.
    pub async fn timeout_at<F: Future>(
        &self,
        deadline: Instant,
        future: F,
    ) -> Result<F::Output, TimeoutError> {
        let future = pin!(future);
        match select(future, self.sleep_until(deadline)).await {
            Either::Left((output, _)) => Ok(output),
            Either::Right(((), _)) => Err(TimeoutError),
        }
    }

    /// Suspend until `handle` is readable.
    pub fn readable(&self, handle: Handle) -> Readiness {
        Readiness::new(self.shared.clone(), Interest::readable(handle))
    }

    /// Suspend until `handle` is writable.
    pub fn writable(&self, handle: Handle) -> Readiness {
        Readiness::new(self.shared.clone(), Interest::writable(handle))
    }

    /// Resolve the waiter of `interest` as if the device had reported readiness. Returns false
    /// if nobody waits for it.
    pub fn notify(&self, interest: Interest) -> bool {
        self.shared.notify(interest)
    }
}

/// The event loop.
pub struct Scheduler<P: Poller> {
    spawner: Spawner,
    poller: P,
    events: Events,
}

/// What one loop iteration left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Turn {
    Busy,
    Idle,
}

impl<P: Poller> Scheduler<P> {
    /// A scheduler reading time from `clock` and idling through `poller`.
    pub fn new(clock: impl Clock + 'static, poller: P) -> Self {
        Self {
            spawner: Spawner {
                shared: Rc::new(Shared::new(Box::new(clock))),
            },
            poller,
            events: Events::new(),
        }
    }

    /// A handle for spawning from outside and inside tasks.
    pub fn spawner(&self) -> Spawner {
        self.spawner.clone()
    }

    /// See [`Spawner::spawn`].
    pub fn spawn<F, T>(&self, future: F) -> JoinHandle<T>
    where
        F: Future<Output = Result<T, Error>> + 'static,
        T: 'static,
    {
        self.spawner.spawn(future)
    }

    /// The poller, for the board code and tests.
    pub fn poller_mut(&mut self) -> &mut P {
        &mut self.poller
    }

    /// Number of tasks that have not finished.
    pub fn live_tasks(&self) -> usize {
        self.spawner.shared.live_tasks()
    }

    /// Run until the task of `handle` finishes and return its result.
    ///
    /// Returns the fatal error instead if the loop halts first.
    pub fn run_until<T>(&mut self, handle: JoinHandle<T>) -> Result<T, Error> {
        loop {
            if let Some(result) = handle.try_take() {
                return result;
            }
            if self.turn()? == Turn::Idle {
                return match handle.try_take() {
                    Some(result) => result,
                    None => Err(Error::Cancelled),
                };
            }
        }
    }

    /// Run until no task is left.
    pub fn run_forever(&mut self) -> Result<(), Error> {
        while self.turn()? == Turn::Busy {}
        Ok(())
    }

    fn turn(&mut self) -> Result<Turn, Error> {
        let shared = &*self.spawner.shared;
        shared.check_halted()?;

        shared.fire_timers();

        // Only what is ready now, tasks woken during this pass run in the next one.
        for _ in 0..shared.ready.len() {
            let Some(id) = shared.ready.pop() else {
                break;
            };
            shared.poll_task(id);
            shared.check_halted()?;
        }

        if shared.live_tasks() == 0 {
            return Ok(Turn::Idle);
        }

        let timeout = if shared.ready.is_empty() {
            shared
                .next_deadline()
                .map(|deadline| ruuvi_time::remaining(shared.now(), deadline))
        } else {
            Some(Duration::from_ticks(0))
        };

        let interests = shared.interests();
        if !interests.is_empty() {
            self.events.clear();
            self.poller.poll(&interests, timeout, &mut self.events);
            for interest in self.events.iter() {
                shared.notify(*interest);
            }
        } else {
            match timeout {
                Some(duration) if duration.ticks() > 0 => self.poller.sleep(duration),
                Some(_) => {}
                None => {
                    let error = Error::Fatal(Fatal::Stalled);
                    shared.halt(error);
                    return Err(error);
                }
            }
        }

        Ok(Turn::Busy)
    }
}
