use futures::stream::{BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;

use super::distinct_until_changed;

type Factory<T> = Arc<dyn Fn() -> BoxStream<'static, T> + Send + Sync>;

/// A hot, replaying stream shared by any number of observers.
///
/// The upstream is built from the factory when the first observer subscribes
/// and is cancelled once no observer has been present for the grace period.
/// A new observer during the grace period keeps the running upstream.
///
/// The most recent value is retained across upstream restarts and handed to
/// every new observer first. Consecutive equal values are never published.
///
/// [`SharedStream::shutdown`] is final: every observer ends and the upstream
/// never starts again.
pub struct SharedStream<T> {
    core: Arc<Core>,
    cache: Arc<watch::Sender<Option<T>>>,
    factory: Factory<T>,
}

impl<T> Clone for SharedStream<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            cache: Arc::clone(&self.cache),
            factory: Arc::clone(&self.factory),
        }
    }
}

impl<T> std::fmt::Debug for SharedStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.core.state();
        f.debug_struct("SharedStream")
            .field("label", &self.core.label)
            .field("grace", &self.core.grace)
            .field("observers", &state.observers)
            .field("active", &state.upstream.is_some())
            .field("closed", &state.closed)
            .finish()
    }
}

struct Core {
    label: String,
    grace: Duration,
    state: Mutex<State>,
    closed_tx: watch::Sender<bool>,
}

#[derive(Default)]
struct State {
    closed: bool,
    observers: usize,
    upstream: Option<JoinHandle<()>>,
    teardown: Option<JoinHandle<()>>,
}

impl Core {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancel the upstream if nobody came back during the grace period.
    fn stop_if_idle(&self) {
        let mut state = self.state();
        if state.observers > 0 {
            return;
        }
        state.teardown = None;
        if let Some(upstream) = state.upstream.take() {
            upstream.abort();
            tracing::debug!(stream = %self.label, "Shared upstream stopped");
        }
    }

    fn release(self: &Arc<Self>) {
        let mut state = self.state();
        state.observers = state.observers.saturating_sub(1);
        if state.observers > 0 || state.closed {
            return;
        }

        match Handle::try_current() {
            Ok(handle) => {
                let core = Arc::downgrade(self);
                let grace = self.grace;
                state.teardown = Some(handle.spawn(async move {
                    tokio::time::sleep(grace).await;
                    if let Some(core) = core.upgrade() {
                        core.stop_if_idle();
                    }
                }));
            }
            Err(_) => {
                // No runtime left to run a timer on
                if let Some(upstream) = state.upstream.take() {
                    upstream.abort();
                }
            }
        }
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(upstream) = state.upstream.take() {
            upstream.abort();
        }
        if let Some(teardown) = state.teardown.take() {
            teardown.abort();
        }
    }
}

impl<T> SharedStream<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Share the stream built by `factory`, with nothing to replay until it emits.
    pub fn new<F>(label: impl Into<String>, grace: Duration, factory: F) -> Self
    where
        F: Fn() -> BoxStream<'static, T> + Send + Sync + 'static,
    {
        Self::build(label.into(), grace, None, Arc::new(factory))
    }

    /// Share the stream built by `factory`, replaying `initial` until it emits.
    pub fn with_initial<F>(label: impl Into<String>, grace: Duration, initial: T, factory: F) -> Self
    where
        F: Fn() -> BoxStream<'static, T> + Send + Sync + 'static,
    {
        Self::build(label.into(), grace, Some(initial), Arc::new(factory))
    }

    fn build(label: String, grace: Duration, initial: Option<T>, factory: Factory<T>) -> Self {
        let (cache, _) = watch::channel(initial);
        let (closed_tx, _) = watch::channel(false);
        Self {
            core: Arc::new(Core {
                label,
                grace,
                state: Mutex::new(State::default()),
                closed_tx,
            }),
            cache: Arc::new(cache),
            factory,
        }
    }

    /// Register an observer. Must be called from within a Tokio runtime.
    ///
    /// The returned stream yields the retained value (if any) first, then
    /// every later value, never the same value twice in a row. Dropping it
    /// unregisters the observer. After shutdown it ends without yielding.
    pub fn subscribe(&self) -> Subscription<T> {
        {
            let mut state = self.core.state();
            state.observers += 1;
            if let Some(teardown) = state.teardown.take() {
                teardown.abort();
            }
            if state.upstream.is_none() && !state.closed {
                state.upstream = Some(self.spawn_upstream());
                tracing::debug!(stream = %self.core.label, "Shared upstream started");
            }
        }

        // Conflation can surface A, B, A as A, A; filter per observer too
        let values = distinct_until_changed(
            WatchStream::new(self.cache.subscribe())
                .filter_map(futures::future::ready)
                .boxed(),
        )
        .take_until(closed(self.core.closed_tx.subscribe()))
        .boxed();

        Subscription {
            values,
            _guard: ObserverGuard {
                core: Arc::clone(&self.core),
            },
        }
    }

    fn spawn_upstream(&self) -> JoinHandle<()> {
        let cache = Arc::clone(&self.cache);
        let factory = Arc::clone(&self.factory);
        let label = self.core.label.clone();

        tokio::spawn(async move {
            let mut upstream = factory();
            while let Some(value) = upstream.next().await {
                cache.send_if_modified(|current| {
                    if current.as_ref() == Some(&value) {
                        false
                    } else {
                        *current = Some(value);
                        true
                    }
                });
            }
            tracing::debug!(stream = %label, "Shared upstream completed");
        })
    }

    /// The retained value, without subscribing.
    pub fn value(&self) -> Option<T> {
        self.cache.borrow().clone()
    }

    pub fn observer_count(&self) -> usize {
        self.core.state().observers
    }

    /// Whether the upstream is currently running (or waiting out its grace period).
    pub fn is_active(&self) -> bool {
        self.core.state().upstream.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.core.state().closed
    }

    /// Cancel the upstream now, regardless of observers or grace period, and
    /// end every observer.
    pub fn shutdown(&self) {
        let mut state = self.core.state();
        state.closed = true;
        self.core.closed_tx.send_replace(true);
        if let Some(teardown) = state.teardown.take() {
            teardown.abort();
        }
        if let Some(upstream) = state.upstream.take() {
            upstream.abort();
            tracing::debug!(stream = %self.core.label, "Shared upstream shut down");
        }
    }
}

/// Resolves once the stream is shut down.
async fn closed(mut rx: watch::Receiver<bool>) {
    loop {
        let closed = *rx.borrow_and_update();
        if closed {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

struct ObserverGuard {
    core: Arc<Core>,
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        self.core.release();
    }
}

/// One observer of a [`SharedStream`].
pub struct Subscription<T> {
    values: BoxStream<'static, T>,
    _guard: ObserverGuard,
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.values.poll_next_unpin(cx)
    }
}
