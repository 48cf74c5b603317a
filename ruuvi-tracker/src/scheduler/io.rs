use alloc::rc::Rc;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};

use super::Shared;
use crate::platform::Interest;
use crate::Error;

/// Completes once the device reports the readiness, or the waiter is
/// [notified](super::Spawner::notify).
///
/// Only one waiter per handle and direction may exist, a second one fails with
/// [`Error::WaiterConflict`]. Dropping it unregisters the waiter.
pub struct Readiness {
    shared: Rc<Shared>,
    interest: Interest,
    key: Option<u32>,
}

impl Readiness {
    pub(super) fn new(shared: Rc<Shared>, interest: Interest) -> Self {
        Self {
            shared,
            interest,
            key: None,
        }
    }
}

impl Future for Readiness {
    type Output = Result<(), Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        match this.key {
            Some(key) => {
                if this.shared.refresh_waiter(key, cx.waker()) {
                    Poll::Pending
                } else {
                    this.key = None;
                    Poll::Ready(Ok(()))
                }
            }
            None => match this.shared.register_waiter(this.interest, cx.waker()) {
                Ok(key) => {
                    this.key = Some(key);
                    Poll::Pending
                }
                Err(error) => Poll::Ready(Err(error)),
            },
        }
    }
}

impl Drop for Readiness {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.shared.remove_waiter(key);
        }
    }
}
