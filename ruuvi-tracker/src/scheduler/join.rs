use core::cell::{Cell, RefCell};
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};

use alloc::rc::Rc;
use ruuvi_common::waker_registration::WakerSlot;

use super::TaskId;
use crate::Error;

/// Resolves the result slot of a task that was dropped without completing.
pub(crate) trait Cancel {
    fn cancel(&self);
}

pub(crate) struct JoinState<T> {
    result: RefCell<Option<Result<T, Error>>>,
    finished: Cell<bool>,
    waker: WakerSlot,
}

impl<T> JoinState<T> {
    pub(crate) fn new() -> Self {
        Self {
            result: RefCell::new(None),
            finished: Cell::new(false),
            waker: WakerSlot::new(),
        }
    }

    /// Store the result, the first one wins.
    pub(crate) fn complete(&self, result: Result<T, Error>) {
        if self.finished.replace(true) {
            return;
        }
        *self.result.borrow_mut() = Some(result);
        self.waker.wake();
    }

    fn take(&self) -> Option<Result<T, Error>> {
        self.result.borrow_mut().take()
    }
}

impl<T> Cancel for JoinState<T> {
    fn cancel(&self) {
        self.complete(Err(Error::Cancelled));
    }
}

/// The result of a spawned task.
///
/// Awaiting it from another task suspends that task until the spawned one completes or is
/// cancelled. Dropping the handle detaches the task, it keeps running.
pub struct JoinHandle<T> {
    id: TaskId,
    state: Rc<JoinState<T>>,
}

impl<T> JoinHandle<T> {
    pub(crate) fn new(id: TaskId, state: Rc<JoinState<T>>) -> Self {
        Self { id, state }
    }

    /// The id of the task, for [`Spawner::cancel`](super::Spawner::cancel).
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// True once the task has completed, failed or was cancelled.
    pub fn is_finished(&self) -> bool {
        self.state.finished.get()
    }

    /// Take the result if the task has finished and nobody took it yet.
    pub fn try_take(&self) -> Option<Result<T, Error>> {
        self.state.take()
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(result) = self.state.take() {
            return Poll::Ready(result);
        }
        if self.state.finished.get() {
            // Someone else took the result.
            return Poll::Ready(Err(Error::Cancelled));
        }
        self.state.waker.register(cx.waker());
        Poll::Pending
    }
}
