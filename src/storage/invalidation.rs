//! Table-level change tracking that turns one-shot queries into live ones.
//!
//! Every write bumps a version counter for each table it touched. Live
//! queries hold a `watch` receiver on the version vector and re-run when a
//! table they read from moves. `watch` keeps only the newest vector, so a
//! burst of writes between two polls costs a single re-run.

use futures::stream::{self, BoxStream, StreamExt};
use std::future::Future;
use tokio::sync::watch;

use super::schema::Database;
use super::types::DatabaseError;

/// Tables whose writes can be observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    ContentItems,
    Topics,
    ContentTopicLinks,
    RecentSearchQueries,
    ContentFts,
    TopicsFts,
    UserPreferences,
}

impl Table {
    const COUNT: usize = 7;

    fn index(self) -> usize {
        self as usize
    }
}

pub(crate) type TableVersions = [u64; Table::COUNT];

#[derive(Debug)]
pub(crate) struct InvalidationTracker {
    versions: watch::Sender<TableVersions>,
}

impl InvalidationTracker {
    pub(crate) fn new() -> Self {
        let (versions, _) = watch::channel([0; Table::COUNT]);
        Self { versions }
    }

    /// Record a committed write to `tables`.
    pub(crate) fn notify(&self, tables: &[Table]) {
        if tables.is_empty() {
            return;
        }
        self.versions.send_modify(|versions| {
            for table in tables {
                let slot = &mut versions[table.index()];
                *slot = slot.wrapping_add(1);
            }
        });
        tracing::trace!(?tables, "Tables invalidated");
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<TableVersions> {
        self.versions.subscribe()
    }
}

fn touched(prev: &TableVersions, next: &TableVersions, tables: &[Table]) -> bool {
    tables
        .iter()
        .any(|table| prev[table.index()] != next[table.index()])
}

struct LiveQuery<F> {
    db: Database,
    versions: watch::Receiver<TableVersions>,
    seen: Option<TableVersions>,
    query: F,
    failed: bool,
}

impl Database {
    /// Run `query` now and again after every write to one of `tables`.
    ///
    /// The stream is cold: each call gets its own subscription. A failed
    /// query is yielded once as `Err` and ends the stream.
    pub fn observe<T, F, Fut>(
        &self,
        tables: &'static [Table],
        query: F,
    ) -> BoxStream<'static, Result<T, DatabaseError>>
    where
        T: Send + 'static,
        F: Fn(Database) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, DatabaseError>> + Send + 'static,
    {
        let state = LiveQuery {
            db: self.clone(),
            versions: self.tracker.subscribe(),
            seen: None,
            query,
            failed: false,
        };

        stream::unfold(state, move |mut state| async move {
            if state.failed {
                return None;
            }

            match state.seen {
                None => {
                    state.seen = Some(*state.versions.borrow_and_update());
                }
                Some(prev) => loop {
                    if state.versions.changed().await.is_err() {
                        return None;
                    }
                    let next = *state.versions.borrow_and_update();
                    if touched(&prev, &next, tables) {
                        state.seen = Some(next);
                        break;
                    }
                },
            }

            let result = (state.query)(state.db.clone()).await;
            if let Err(e) = &result {
                tracing::warn!(error = %e, ?tables, "Live query failed, closing stream");
                state.failed = true;
            }
            Some((result, state))
        })
        .boxed()
    }
}
