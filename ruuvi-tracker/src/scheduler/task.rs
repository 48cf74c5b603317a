//! Task slots, ids and the ready queue.

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::sync::Arc;
use alloc::task::Wake;
use core::cell::RefCell;
use core::future::Future;
use core::pin::Pin;

use critical_section::Mutex;
use heapless::Deque;
use portable_atomic::{AtomicBool, Ordering};
use ruuvi_time::Instant;

use super::join::Cancel;
use crate::config::MAX_TASKS;
use crate::platform::Handle;

/// Identifies a spawned task.
///
/// Slots are recycled, the generation makes sure an id (and a waker) of a finished task never
/// reaches the task that took its slot over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct TaskId {
    index: u16,
    generation: u16,
}

impl TaskId {
    /// An id no task ever has, given to handles of tasks that could not be spawned.
    pub(crate) const DETACHED: TaskId = TaskId {
        index: u16::MAX,
        generation: 0,
    };

    pub(crate) fn new(index: usize, generation: u16) -> Self {
        Self {
            index: index as u16,
            generation,
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.index as usize
    }

    pub(crate) fn generation(&self) -> u16 {
        self.generation
    }
}

/// What a suspended task waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Wait {
    /// Queued, runs in the next iteration.
    RunNow,
    /// Parked on a timer.
    ReadyAt(Instant),
    /// Parked on read readiness.
    Readable(Handle),
    /// Parked on write readiness.
    Writable(Handle),
    /// Parked until another task wakes it (a join, a command response).
    Signal,
}

const READY_CAPACITY: usize = 2 * MAX_TASKS;

/// FIFO of task ids to poll, shared with the wakers.
pub(crate) struct ReadyQueue {
    queue: Mutex<RefCell<Deque<TaskId, READY_CAPACITY>>>,
}

impl ReadyQueue {
    pub(crate) const fn new() -> Self {
        Self {
            queue: Mutex::new(RefCell::new(Deque::new())),
        }
    }

    fn push(&self, id: TaskId) {
        let full = critical_section::with(|cs| self.queue.borrow_ref_mut(cs).push_back(id).is_err());
        if full {
            // Cannot happen while every task is queued at most once.
            log::error!("ready queue full, wake of {:?} lost", id);
        }
    }

    pub(crate) fn pop(&self) -> Option<TaskId> {
        critical_section::with(|cs| self.queue.borrow_ref_mut(cs).pop_front())
    }

    pub(crate) fn len(&self) -> usize {
        critical_section::with(|cs| self.queue.borrow_ref(cs).len())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The waker of one task.
pub(crate) struct TaskWaker {
    id: TaskId,
    queued: AtomicBool,
    ready: Arc<ReadyQueue>,
}

impl TaskWaker {
    pub(crate) fn new(id: TaskId, ready: Arc<ReadyQueue>) -> Arc<Self> {
        Arc::new(Self {
            id,
            queued: AtomicBool::new(false),
            ready,
        })
    }

    /// Queue the task unless it already is.
    pub(crate) fn schedule(&self) {
        if !self.queued.swap(true, Ordering::AcqRel) {
            self.ready.push(self.id);
        }
    }

    /// Called right before the task is polled, wakes from now on queue it again.
    pub(crate) fn clear_queued(&self) {
        self.queued.store(false, Ordering::Release);
    }

    pub(crate) fn is_queued(&self) -> bool {
        self.queued.load(Ordering::Acquire)
    }

    /// The task is gone, all clones of this waker become no-ops.
    pub(crate) fn retire(&self) {
        self.queued.store(true, Ordering::Release);
    }
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.schedule();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.schedule();
    }
}

pub(crate) type BoxedTask = Pin<Box<dyn Future<Output = ()>>>;

pub(crate) struct Task {
    pub(crate) waker: Arc<TaskWaker>,
    /// `None` while the task is being polled.
    pub(crate) future: Option<BoxedTask>,
    pub(crate) wait: Wait,
    pub(crate) on_cancel: Rc<dyn Cancel>,
    pub(crate) cancel_requested: bool,
}

pub(crate) struct Slot {
    pub(crate) generation: u16,
    pub(crate) task: Option<Task>,
}

impl Slot {
    pub(crate) const fn vacant() -> Self {
        Self {
            generation: 0,
            task: None,
        }
    }

    pub(crate) fn holds(&self, id: TaskId) -> bool {
        self.generation == id.generation() && self.task.is_some()
    }

    /// Empty the slot, bumping the generation so old ids stop matching.
    pub(crate) fn vacate(&mut self) -> Option<Task> {
        let task = self.task.take();
        if task.is_some() {
            self.generation = self.generation.wrapping_add(1);
        }
        task
    }
}
