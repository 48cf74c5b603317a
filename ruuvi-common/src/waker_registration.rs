//! Waker registration utility.

use core::cell::RefCell;
use core::task::Waker;

use critical_section::Mutex;

/// A single waker slot, protected by a critical section.
///
/// Holds the waker of the one task that waits on some event (a task's completion, the response
/// to a pending command). Registering a waker from another task replaces the old one.
pub struct WakerSlot {
    waker: Mutex<RefCell<Option<Waker>>>,
}

impl WakerSlot {
    /// Create an empty slot.
    pub const fn new() -> Self {
        Self {
            waker: Mutex::new(RefCell::new(None)),
        }
    }

    /// Register a waker, replacing the previous one.
    pub fn register(&self, new_waker: &Waker) {
        critical_section::with(|cs| {
            let mut slot = self.waker.borrow_ref_mut(cs);
            match slot.as_ref() {
                // Same task, keep the waker we already cloned.
                Some(old) if old.will_wake(new_waker) => {}
                _ => *slot = Some(new_waker.clone()),
            }
        });
    }

    /// Wake and clear the registered waker, if any.
    pub fn wake(&self) {
        let waker = critical_section::with(|cs| self.waker.borrow_ref_mut(cs).take());
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Drop the registered waker without waking it.
    pub fn clear(&self) {
        critical_section::with(|cs| self.waker.borrow_ref_mut(cs).take());
    }

    /// True if a waker is currently registered.
    pub fn is_registered(&self) -> bool {
        critical_section::with(|cs| self.waker.borrow_ref(cs).is_some())
    }
}

impl Default for WakerSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::task::Wake;

    struct Counter(AtomicUsize);

    impl Wake for Counter {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn wake_fires_registered_waker_once() {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let waker = Waker::from(counter.clone());
        let slot = WakerSlot::new();

        slot.register(&waker);
        assert!(slot.is_registered());
        slot.wake();
        slot.wake();

        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert!(!slot.is_registered());
    }

    #[test]
    fn clear_drops_without_waking() {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let slot = WakerSlot::new();
        slot.register(&Waker::from(counter.clone()));
        slot.clear();
        slot.wake();
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }
}
