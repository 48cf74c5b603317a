use alloc::rc::Rc;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};

use ruuvi_time::{Instant, TimerKey};

use super::Shared;

/// Completes once its deadline has passed. Dropping it disarms the timer.
pub struct Sleep {
    shared: Rc<Shared>,
    deadline: Instant,
    key: Option<TimerKey>,
}

impl Sleep {
    pub(super) fn new(shared: Rc<Shared>, deadline: Instant) -> Self {
        Self {
            shared,
            deadline,
            key: None,
        }
    }

    /// When this sleep completes.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();

        if let Some(key) = this.key {
            if this.shared.refresh_timer(key, this.deadline, cx.waker()) {
                return Poll::Pending;
            }
            // The loop popped the entry, the deadline has passed.
            this.key = None;
            return Poll::Ready(());
        }

        if ruuvi_time::is_at_least(this.shared.now(), this.deadline) {
            return Poll::Ready(());
        }

        // `None` halts the loop, this task never runs again.
        this.key = this.shared.arm_timer(this.deadline, cx.waker());
        Poll::Pending
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.shared.disarm_timer(key);
        }
    }
}

/// Suspends once, every task that is ready runs before this one resumes.
pub struct YieldNow {
    yielded: bool,
}

impl YieldNow {
    pub(super) fn new() -> Self {
        Self { yielded: false }
    }
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}
