use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

type Cleanup = Box<dyn FnOnce() + Send>;

/// Lifetime of one screen.
///
/// Holds the cleanup callbacks that end the screen's pipelines. Closing the
/// scope (explicitly or by dropping it) runs them once, newest first. A
/// callback registered after closing runs immediately.
pub struct ScreenScope {
    name: String,
    closed: AtomicBool,
    cleanups: Mutex<Vec<Cleanup>>,
}

impl std::fmt::Debug for ScreenScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScreenScope")
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScreenScope {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            closed: AtomicBool::new(false),
            cleanups: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Run `cleanup` when the scope closes.
    pub fn on_close<F>(&self, cleanup: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut cleanups = lock(&self.cleanups);
            if !self.is_closed() {
                cleanups.push(Box::new(cleanup));
                return;
            }
        }
        cleanup();
    }

    pub fn close(&self) {
        let cleanups: Vec<Cleanup> = {
            let mut cleanups = lock(&self.cleanups);
            if self.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            cleanups.drain(..).collect()
        };
        for cleanup in cleanups.into_iter().rev() {
            cleanup();
        }

        tracing::debug!(scope = %self.name, "Screen scope closed");
    }
}

impl Drop for ScreenScope {
    fn drop(&mut self) {
        self.close();
    }
}
