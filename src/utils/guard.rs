use std::sync::{Mutex, PoisonError};

/// A mutex-protected cell whose only access form is a closure run under the
/// lock.
///
/// Shared mutable state in this compositor (the session list, the keybinding
/// table, the focus slot, the wallpaper cache) is accessed from multiple
/// long-running threads. Wrapping each structure in a `Guard` makes it
/// impossible for a reference to the protected data to escape its critical
/// section.
#[derive(Debug, Default)]
pub struct Guard<T> {
    inner: Mutex<T>,
}

impl<T> Guard<T> {
    pub fn new(value: T) -> Self {
        Guard {
            inner: Mutex::new(value),
        }
    }

    /// Runs `job` with exclusive access to the protected value.
    ///
    /// A poisoned lock is recovered; the protected structures stay
    /// consistent across panics because every mutation is completed before
    /// the closure returns.
    pub fn with<R>(&self, job: impl FnOnce(&mut T) -> R) -> R {
        let mut data = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        job(&mut data)
    }
}

impl<T: Clone> Guard<T> {
    /// Returns a copy of the protected value.
    pub fn snapshot(&self) -> T {
        self.with(|data| data.clone())
    }
}
