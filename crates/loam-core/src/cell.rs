use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// A write-once, read-many slot. Readers block until the single write
/// happens; every waiter is woken by it. All inter-task ordering in a build
/// goes through these.
pub struct Cell<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    slot: Mutex<Option<T>>,
    ready: Condvar,
}

impl<T: Clone> Cell<T> {
    pub fn new() -> Cell<T> {
        Cell {
            inner: Arc::new(Inner {
                slot: Mutex::new(None),
                ready: Condvar::new(),
            }),
        }
    }

    /// Fill the cell. Filling twice is a caller bug.
    pub fn put(&self, value: T) {
        let mut slot = lock(&self.inner.slot);
        assert!(slot.replace(value).is_none(), "cell written twice");
        self.inner.ready.notify_all();
    }

    /// Block until the cell is filled, then read it.
    pub fn wait(&self) -> T {
        let mut slot = lock(&self.inner.slot);
        loop {
            if let Some(value) = slot.as_ref() {
                return value.clone();
            }
            slot = self
                .inner
                .ready
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn try_get(&self) -> Option<T> {
        lock(&self.inner.slot).clone()
    }
}

impl<T: Clone> Default for Cell<T> {
    fn default() -> Cell<T> {
        Cell::new()
    }
}

impl<T> Clone for Cell<T> {
    fn clone(&self) -> Cell<T> {
        Cell {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn lock<T>(mutex: &Mutex<Option<T>>) -> MutexGuard<'_, Option<T>> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
