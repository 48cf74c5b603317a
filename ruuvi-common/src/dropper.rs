//! A drop implementation runner.

/// Runs a closure on drop, unless it was defused first.
///
/// Used to undo a registration (a timer entry, an I/O waiter, a pending command slot) when the
/// future that owns it is dropped before it completes, which is how cancellation reaches the
/// structures a task was parked in.
pub struct OnDrop<F: FnOnce()> {
    f: Option<F>,
}

impl<F: FnOnce()> OnDrop<F> {
    /// Make a new dropper given a closure.
    pub fn new(f: F) -> Self {
        Self { f: Some(f) }
    }

    /// Make it not run on drop.
    pub fn defuse(mut self) {
        self.f = None;
    }

    /// Run the closure now instead of on drop. Running twice is a no-op.
    pub fn execute(&mut self) {
        if let Some(f) = self.f.take() {
            f()
        }
    }
}

impl<F: FnOnce()> Drop for OnDrop<F> {
    fn drop(&mut self) {
        self.execute();
    }
}
